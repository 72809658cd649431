// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use core::sync::atomic::{AtomicBool, Ordering};

use num_traits::FromPrimitive;
use ringbuf::{ringbuf, ringbuf_entry};
use status_regs::{PostCode, PostSource, RegisterIo};

use crate::{
    BuiltinCode, HandlerTable, MessageQueue, MessageQueues, NextMessage,
    Request, Response, STATUS_SCRATCH_ONLY, STATUS_UNRECOGNIZED,
};

#[derive(Copy, Clone, Debug, PartialEq)]
enum Trace {
    None,
    Doorbell,
    Drain,
    Request { queue: u8, code: u8 },
    Unrecognized { queue: u8, code: u8 },
    Exit { code: u8, exit: u8 },
    ResponseFull(u8),
    Corrupt(u8),
}

ringbuf!(Trace, 32, Trace::None);

/// Pending-work flag between the doorbell interrupt and the task that
/// drains the queues.  Any number of submits before a take collapse into
/// one drain.
pub struct WorkFlag {
    pending: AtomicBool,
}

impl WorkFlag {
    pub const fn new() -> Self {
        Self {
            pending: AtomicBool::new(false),
        }
    }

    pub fn submit(&self) {
        self.pending.store(true, Ordering::Release);
    }

    /// Clears the flag, returning whether it was set.
    pub fn take(&self) -> bool {
        self.pending.swap(false, Ordering::AcqRel)
    }
}

impl Default for WorkFlag {
    fn default() -> Self {
        Self::new()
    }
}

/// Doorbell interrupt body: acknowledge the doorbell, then defer the work.
pub fn doorbell_isr(regs: &impl RegisterIo, work: &WorkFlag) {
    status_regs::clear_doorbell(regs);
    work.submit();
    ringbuf_entry!(Trace::Doorbell);
}

/// Runs requests from the queues to completion.
pub struct Dispatcher<'a, R> {
    handlers: &'a HandlerTable<'a>,
    regs: &'a R,
}

impl<'a, R: RegisterIo> Dispatcher<'a, R> {
    pub fn new(handlers: &'a HandlerTable<'a>, regs: &'a R) -> Self {
        Self { handlers, regs }
    }

    fn post(&self, code: PostCode) {
        status_regs::set_post_code(self.regs, PostSource::Cmfw, code);
    }

    /// Drains every queue, in order.
    pub fn process_all<const Q: usize, const N: usize>(
        &self,
        queues: &MessageQueues<Q, N>,
    ) {
        ringbuf_entry!(Trace::Drain);
        self.post(PostCode::MsgHandleStart);
        for (i, q) in queues.iter().enumerate() {
            self.post(PostCode::MsgQueue(i as u8));
            self.process_queue(i as u8, q);
        }
        self.post(PostCode::MsgHandleDone);
    }

    fn process_queue<const N: usize>(&self, index: u8, q: &MessageQueue<N>) {
        loop {
            match q.start_next() {
                NextMessage::Ready => {}
                NextMessage::Empty => break,
                NextMessage::ResponseFull => {
                    ringbuf_entry!(Trace::ResponseFull(index));
                    break;
                }
                NextMessage::Corrupt => {
                    ringbuf_entry!(Trace::Corrupt(index));
                    break;
                }
            }

            let request = q.pop_request();
            let mut response = Response::ZERO;
            ringbuf_entry!(Trace::Request {
                queue: index,
                code: request.code()
            });

            self.process_one(index, q, &request, &mut response);
            q.push_response(&response);

            if BuiltinCode::from_u8(request.code())
                != Some(BuiltinCode::SetLastSerial)
            {
                q.bump_last_serial();
            }
        }
    }

    fn process_one<const N: usize>(
        &self,
        index: u8,
        q: &MessageQueue<N>,
        request: &Request,
        response: &mut Response,
    ) {
        let code = request.code();

        match BuiltinCode::from_u8(code) {
            Some(BuiltinCode::SetLastSerial) => {
                q.set_last_serial(request.0[1]);
            }
            Some(BuiltinCode::Test) => {
                response.0[0] = 0;
                response.0[1] = request.0[1].wrapping_add(1);
                response.0[2] = q.last_serial().wrapping_add(1);
            }
            Some(BuiltinCode::ReportScratchOnly) => {
                response.0[0] = u32::from(STATUS_SCRATCH_ONLY);
            }
            None => match self.handlers.get(code) {
                Some(h) => {
                    let exit = h.handle(code, request, response);
                    if exit != 0 {
                        ringbuf_entry!(Trace::Exit { code, exit });
                    }
                    response.0[0] |= u32::from(exit);
                }
                None => {
                    ringbuf_entry!(Trace::Unrecognized { queue: index, code });
                    response.0[0] = u32::from(STATUS_UNRECOGNIZED);
                }
            },
        }
    }
}
