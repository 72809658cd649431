// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use core::sync::atomic::{fence, AtomicU32, Ordering};

use static_assertions::const_assert_eq;
use status_regs::RegisterIo;
use vcell::VolatileCell;

use crate::{HostError, Request, Response};

const ZERO: AtomicU32 = AtomicU32::new(0);
const EMPTY_REQUEST: VolatileCell<Request> = VolatileCell::new(Request::ZERO);
const EMPTY_RESPONSE: VolatileCell<Response> =
    VolatileCell::new(Response::ZERO);

/// Queue header, as laid out in shared memory.
///
/// The first 16 bytes are written by the host, the second 16 by the
/// controller.
#[repr(C)]
pub struct Header {
    request_wptr: AtomicU32,
    response_rptr: AtomicU32,
    _host_reserved: [AtomicU32; 2],

    request_rptr: AtomicU32,
    response_wptr: AtomicU32,
    last_serial: AtomicU32,
    _controller_reserved: AtomicU32,
}

const_assert_eq!(core::mem::size_of::<Header>(), 32);

impl Header {
    const fn new() -> Self {
        Self {
            request_wptr: ZERO,
            response_rptr: ZERO,
            _host_reserved: [ZERO; 2],
            request_rptr: ZERO,
            response_wptr: ZERO,
            last_serial: ZERO,
            _controller_reserved: ZERO,
        }
    }

    fn clear(&self) {
        for word in [
            &self.request_wptr,
            &self.response_rptr,
            &self._host_reserved[0],
            &self._host_reserved[1],
            &self.request_rptr,
            &self.response_wptr,
            &self.last_serial,
            &self._controller_reserved,
        ] {
            word.store(0, Ordering::Relaxed);
        }
    }
}

/// A snapshot of a queue's header pointers.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Pointers {
    pub request_wptr: u32,
    pub request_rptr: u32,
    pub response_wptr: u32,
    pub response_rptr: u32,
    pub last_serial: u32,
}

/// Outcome of checking whether a queue has a request we can take.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum NextMessage {
    Ready,
    Empty,
    /// There's a request, but nowhere to put its response; it stays put
    /// until the host drains a response.
    ResponseFull,
    /// A pointer is out of range.  We don't try to repair the header.
    Corrupt,
}

/// One request/response ring pair with `N` slots in each ring.
#[repr(C)]
pub struct MessageQueue<const N: usize> {
    header: Header,
    requests: [VolatileCell<Request>; N],
    responses: [VolatileCell<Response>; N],
}

// Safety: the slots are only touched by the side that currently owns them,
// and ownership is handed back and forth through the header pointers.  A
// request slot belongs to the host from the request read pointer up to the
// write pointer and to the controller otherwise (and vice versa for
// responses), and there's one host and one draining context per queue.
unsafe impl<const N: usize> Sync for MessageQueue<N> {}

impl<const N: usize> MessageQueue<N> {
    const WRAP: u32 = (2 * N) as u32;

    pub const fn new() -> Self {
        Self {
            header: Header::new(),
            requests: [EMPTY_REQUEST; N],
            responses: [EMPTY_RESPONSE; N],
        }
    }

    fn slot(ptr: u32) -> usize {
        ptr as usize % N
    }

    fn advance(ptr: u32) -> u32 {
        ptr.wrapping_add(1) % Self::WRAP
    }

    /// Number of occupied slots given a write and read pointer.  Exact for
    /// pointers below `WRAP`, whether or not `WRAP` divides 2^32; anything
    /// else is caught by the range check in [`Self::start_next`].
    fn distance(wptr: u32, rptr: u32) -> u32 {
        wptr.wrapping_add(Self::WRAP).wrapping_sub(rptr) % Self::WRAP
    }

    pub fn pointers(&self) -> Pointers {
        let h = &self.header;
        Pointers {
            request_wptr: h.request_wptr.load(Ordering::Relaxed),
            request_rptr: h.request_rptr.load(Ordering::Relaxed),
            response_wptr: h.response_wptr.load(Ordering::Relaxed),
            response_rptr: h.response_rptr.load(Ordering::Relaxed),
            last_serial: h.last_serial.load(Ordering::Relaxed),
        }
    }

    pub fn last_serial(&self) -> u32 {
        self.header.last_serial.load(Ordering::Relaxed)
    }

    pub fn host(&self) -> HostPort<'_, N> {
        HostPort { queue: self }
    }

    pub(crate) fn reset(&self) {
        self.header.clear();
    }

    /// Decides whether the next request can be taken.  Each host-written
    /// pointer is read exactly once.
    pub(crate) fn start_next(&self) -> NextMessage {
        let h = &self.header;

        let request_wptr = h.request_wptr.load(Ordering::Relaxed);
        let request_rptr = h.request_rptr.load(Ordering::Relaxed);
        if request_wptr == request_rptr {
            return NextMessage::Empty;
        }

        let response_wptr = h.response_wptr.load(Ordering::Relaxed);
        let response_rptr = h.response_rptr.load(Ordering::Relaxed);
        if Self::distance(response_wptr, response_rptr) == N as u32 {
            return NextMessage::ResponseFull;
        }

        if [request_wptr, request_rptr, response_wptr, response_rptr]
            .iter()
            .any(|&p| p >= Self::WRAP)
        {
            return NextMessage::Corrupt;
        }

        fence(Ordering::Acquire);
        NextMessage::Ready
    }

    /// Copies out the request at the read pointer and hands its slot back
    /// to the host.  Only valid after [`Self::start_next`] said `Ready`.
    pub(crate) fn pop_request(&self) -> Request {
        let rptr = self.header.request_rptr.load(Ordering::Relaxed);
        let request = self.requests[Self::slot(rptr)].get();

        // The payload must be read before the host may reuse the slot.
        fence(Ordering::SeqCst);
        self.header
            .request_rptr
            .store(Self::advance(rptr), Ordering::Relaxed);
        request
    }

    pub(crate) fn push_response(&self, response: &Response) {
        let wptr = self.header.response_wptr.load(Ordering::Relaxed);
        self.responses[Self::slot(wptr)].set(*response);

        // This matches the fence the host driver was validated against;
        // it is not a release fence.
        fence(Ordering::Acquire);
        self.header
            .response_wptr
            .store(Self::advance(wptr), Ordering::Relaxed);
    }

    pub(crate) fn set_last_serial(&self, serial: u32) {
        self.header.last_serial.store(serial, Ordering::Relaxed);
    }

    pub(crate) fn bump_last_serial(&self) {
        let serial = self.last_serial();
        self.set_last_serial(serial.wrapping_add(1));
    }
}

impl<const N: usize> Default for MessageQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// The host's view of a queue.
///
/// On real hardware this side lives in the host driver; here it lets tests
/// and simulations play the host.  It only writes the host-owned pointers.
pub struct HostPort<'a, const N: usize> {
    queue: &'a MessageQueue<N>,
}

impl<const N: usize> HostPort<'_, N> {
    pub fn push_request(&self, request: &Request) -> Result<(), HostError> {
        let q = self.queue;
        let wptr = q.header.request_wptr.load(Ordering::Relaxed);
        let rptr = q.header.request_rptr.load(Ordering::Acquire);
        if MessageQueue::<N>::distance(wptr, rptr) == N as u32 {
            return Err(HostError::RequestRingFull);
        }

        q.requests[MessageQueue::<N>::slot(wptr)].set(*request);
        q.header
            .request_wptr
            .store(MessageQueue::<N>::advance(wptr), Ordering::Release);
        Ok(())
    }

    pub fn pop_response(&self) -> Result<Response, HostError> {
        let q = self.queue;
        let rptr = q.header.response_rptr.load(Ordering::Relaxed);
        let wptr = q.header.response_wptr.load(Ordering::Acquire);
        if wptr == rptr {
            return Err(HostError::NoResponse);
        }

        let response = q.responses[MessageQueue::<N>::slot(rptr)].get();
        fence(Ordering::SeqCst);
        q.header
            .response_rptr
            .store(MessageQueue::<N>::advance(rptr), Ordering::Relaxed);
        Ok(response)
    }

    /// Number of requests the controller has yet to take.
    pub fn pending_requests(&self) -> u32 {
        let p = self.queue.pointers();
        MessageQueue::<N>::distance(p.request_wptr, p.request_rptr)
    }

    /// Number of responses waiting for the host.
    pub fn pending_responses(&self) -> u32 {
        let p = self.queue.pointers();
        MessageQueue::<N>::distance(p.response_wptr, p.response_rptr)
    }

    /// Overwrites the request write pointer without touching any slot.
    pub fn poke_request_wptr(&self, value: u32) {
        self.queue
            .header
            .request_wptr
            .store(value, Ordering::Relaxed);
    }

    /// Overwrites the response read pointer without touching any slot.
    pub fn poke_response_rptr(&self, value: u32) {
        self.queue
            .header
            .response_rptr
            .store(value, Ordering::Relaxed);
    }
}

/// The queue array, plus the small descriptor the host reads to find it.
#[repr(C)]
pub struct MessageQueues<const Q: usize, const N: usize> {
    queues: [MessageQueue<N>; Q],
    info: [AtomicU32; 4],
}

impl<const Q: usize, const N: usize> MessageQueues<Q, N> {
    const EMPTY: MessageQueue<N> = MessageQueue::new();

    pub const fn new() -> Self {
        Self {
            queues: [Self::EMPTY; Q],
            info: [ZERO; 4],
        }
    }

    /// Geometry word of the descriptor: slots per ring in the low byte,
    /// number of queues in the next.
    pub const fn shape() -> u32 {
        (N as u32) | ((Q as u32) << 8)
    }

    /// Clears every header, fills in the descriptor, and publishes the
    /// descriptor's address to the host.
    ///
    /// This is the only place the queues are reset, so it must run before
    /// the doorbell is unmasked.
    pub fn init(&self, regs: &impl RegisterIo) {
        for q in &self.queues {
            q.reset();
        }

        let base = self.queues.as_ptr() as usize as u32;
        self.info[0].store(base, Ordering::Relaxed);
        self.info[1].store(Self::shape(), Ordering::Relaxed);
        self.info[2].store(0, Ordering::Relaxed);
        self.info[3].store(0, Ordering::Relaxed);

        regs.write(
            status_regs::MSG_Q_INFO_REG,
            self.info.as_ptr() as usize as u32,
        );
        status_regs::set_msg_queue_ready(regs);
    }

    /// Words of the descriptor published by [`Self::init`].
    pub fn info(&self) -> [u32; 4] {
        [
            self.info[0].load(Ordering::Relaxed),
            self.info[1].load(Ordering::Relaxed),
            self.info[2].load(Ordering::Relaxed),
            self.info[3].load(Ordering::Relaxed),
        ]
    }

    pub fn queue(&self, index: usize) -> Option<&MessageQueue<N>> {
        self.queues.get(index)
    }

    pub fn host(&self, index: usize) -> Option<HostPort<'_, N>> {
        self.queue(index).map(|q| q.host())
    }

    pub fn iter(&self) -> impl Iterator<Item = &MessageQueue<N>> {
        self.queues.iter()
    }
}

impl<const Q: usize, const N: usize> Default for MessageQueues<Q, N> {
    fn default() -> Self {
        Self::new()
    }
}
