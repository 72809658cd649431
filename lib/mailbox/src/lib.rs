// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Acknowledged, one-at-a-time messages to a sibling controller.
//!
//! The peer is the bus controller and we are only ever a target, so we
//! can't push a message to it.  Instead, messages are queued here with
//! [`Mailbox::enqueue`] and the peer polls for them with a block read of
//! [`PULL`].  The first poll that finds something takes it off the queue,
//! stamps it with the next sequence number and makes it the in-flight
//! message; every poll after that returns the same bytes until the peer
//! acknowledges it with a word write of [`ACK`] carrying its id and sequence
//! number.  An empty mailbox reads as six zero bytes.
//!
//! There is no retransmission timer: a message that is never acknowledged
//! stays in flight.
//!
//! This crate works on both the host and embedded system.

#![cfg_attr(not(test), no_std)]

use core::cell::RefCell;

use critical_section::Mutex;
use heapless::Deque;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive as _;
use ringbuf::*;
use smbus_target::{Command, HandlerError, ReceiveHandler, SendHandler};
use static_assertions::const_assert_eq;
use zerocopy::byteorder::{LittleEndian, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

pub mod client;

/// Block read (6 bytes): fetch the in-flight message.
pub const PULL: u8 = 0x10;
/// Word write `{id, seq}`: acknowledge the in-flight message.
pub const ACK: u8 = 0x11;
/// Word write: the peer's answer to [`MessageId::Ping`].
pub const PING_RESPONSE: u8 = 0x21;
pub const PING_MAGIC: u16 = 0xa5a5;

pub const DEPTH: usize = 4;

/// Ids of messages we send to the peer.
#[derive(Copy, Clone, Debug, Eq, PartialEq, FromPrimitive)]
pub enum MessageId {
    /// Only ever seen on the wire, meaning "nothing to send".
    Null = 0,
    ResetReq = 1,
    Ping = 2,
    FanSpeedUpdate = 3,
    Ready = 4,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Message {
    pub id: MessageId,
    pub data: u32,
}

impl Message {
    pub fn new(id: MessageId, data: u32) -> Self {
        Self { id, data }
    }
}

/// A message as the peer reads it.
#[derive(
    Copy,
    Clone,
    Debug,
    Default,
    Eq,
    PartialEq,
    FromBytes,
    IntoBytes,
    Immutable,
    KnownLayout,
)]
#[repr(C)]
pub struct WireMessage {
    pub id: u8,
    pub seq: u8,
    pub data: U32<LittleEndian>,
}

const_assert_eq!(core::mem::size_of::<WireMessage>(), 6);

impl WireMessage {
    pub const EMPTY: Self = Self {
        id: 0,
        seq: 0,
        data: U32::ZERO,
    };

    pub fn is_empty(&self) -> bool {
        self.id == MessageId::Null as u8
    }

    /// The decoded id, or `None` for an id this end doesn't know.
    pub fn message_id(&self) -> Option<MessageId> {
        MessageId::from_u8(self.id)
    }
}

/// The peer's acknowledgment of a [`WireMessage`].
#[derive(
    Copy,
    Clone,
    Debug,
    Eq,
    PartialEq,
    FromBytes,
    IntoBytes,
    Immutable,
    KnownLayout,
)]
#[repr(C)]
pub struct Ack {
    pub id: u8,
    pub seq: u8,
}

const_assert_eq!(core::mem::size_of::<Ack>(), 2);

impl Ack {
    pub fn as_word(&self) -> u16 {
        u16::from_le_bytes([self.id, self.seq])
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MailboxError {
    Full,
    NotInFlight,
    Mismatch,
}

#[derive(Copy, Clone, Debug, PartialEq)]
enum Trace {
    None,
    Enqueue(MessageId),
    Full(MessageId),
    Assign { id: u8, seq: u8 },
    Ack { id: u8, seq: u8 },
    AckRejected(MailboxError),
    Retired(u8),
    Reset,
}

ringbuf!(Trace, 16, Trace::None);

struct Inner<const N: usize> {
    pending: Deque<Message, N>,
    valid: bool,
    next_seq: u8,
    current: WireMessage,
}

impl<const N: usize> Inner<N> {
    /// Makes sure there's an in-flight message if there's anything to send,
    /// returning it.
    fn load(&mut self) -> Option<WireMessage> {
        if !self.valid {
            let msg = self.pending.pop_front()?;
            self.current = WireMessage {
                id: msg.id as u8,
                seq: self.next_seq,
                data: U32::new(msg.data),
            };
            self.next_seq = self.next_seq.wrapping_add(1);
            self.valid = true;
            ringbuf_entry!(Trace::Assign {
                id: self.current.id,
                seq: self.current.seq
            });
        }
        Some(self.current)
    }
}

/// One direction of a controller pair, holding up to `N` queued messages
/// and one in flight.
pub struct Mailbox<const N: usize = DEPTH> {
    inner: Mutex<RefCell<Inner<N>>>,
}

impl<const N: usize> Mailbox<N> {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(RefCell::new(Inner {
                pending: Deque::new(),
                valid: false,
                next_seq: 0,
                current: WireMessage::EMPTY,
            })),
        }
    }

    /// Queues a message for the peer.  Never blocks, so it's fine to call
    /// from an interrupt handler.
    pub fn enqueue(&self, msg: Message) -> Result<(), MailboxError> {
        let r = critical_section::with(|cs| {
            self.inner.borrow_ref_mut(cs).pending.push_back(msg)
        });
        match r {
            Ok(()) => {
                ringbuf_entry!(Trace::Enqueue(msg.id));
                Ok(())
            }
            Err(_) => {
                ringbuf_entry!(Trace::Full(msg.id));
                Err(MailboxError::Full)
            }
        }
    }

    /// What the peer sees when it polls: the in-flight message (promoting
    /// the next queued one if there is none), or all zeroes.
    pub fn serve(&self) -> WireMessage {
        critical_section::with(|cs| self.inner.borrow_ref_mut(cs).load())
            .unwrap_or(WireMessage::EMPTY)
    }

    /// Retires the in-flight message if `ack` names it exactly.
    pub fn acknowledge(&self, ack: Ack) -> Result<(), MailboxError> {
        let r = critical_section::with(|cs| {
            let mut inner = self.inner.borrow_ref_mut(cs);
            if !inner.valid {
                Err(MailboxError::NotInFlight)
            } else if inner.current.id != ack.id || inner.current.seq != ack.seq
            {
                Err(MailboxError::Mismatch)
            } else {
                inner.valid = false;
                Ok(())
            }
        });

        match r {
            Ok(()) => ringbuf_entry!(Trace::Ack {
                id: ack.id,
                seq: ack.seq
            }),
            Err(e) => ringbuf_entry!(Trace::AckRejected(e)),
        }
        r
    }

    /// For peers that never acknowledge: reports the id of the next message
    /// (zero if there is none) and retires it on the spot.
    pub fn serve_and_retire(&self) -> u8 {
        let id = critical_section::with(|cs| {
            let mut inner = self.inner.borrow_ref_mut(cs);
            let id = inner.load().map(|m| m.id).unwrap_or(0);
            inner.valid = false;
            id
        });
        ringbuf_entry!(Trace::Retired(id));
        id
    }

    /// Drops everything, as if the owning controller had just come out of
    /// reset.
    pub fn reset(&self) {
        critical_section::with(|cs| {
            let mut inner = self.inner.borrow_ref_mut(cs);
            inner.pending.clear();
            inner.valid = false;
            inner.next_seq = 0;
            inner.current = WireMessage::EMPTY;
        });
        ringbuf_entry!(Trace::Reset);
    }

    pub fn in_flight(&self) -> Option<WireMessage> {
        critical_section::with(|cs| {
            let inner = self.inner.borrow_ref(cs);
            inner.valid.then_some(inner.current)
        })
    }

    pub fn pending(&self) -> usize {
        critical_section::with(|cs| self.inner.borrow_ref(cs).pending.len())
    }

    /// SMBus command for [`PULL`].
    pub fn pull_command(&self) -> Command<'_> {
        Command::BlockRead {
            len: core::mem::size_of::<WireMessage>() as u8,
            handler: self,
        }
    }

    /// SMBus command for [`ACK`].
    pub fn ack_command(&self) -> Command<'_> {
        Command::WriteWord(self)
    }
}

impl<const N: usize> Default for Mailbox<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> SendHandler for Mailbox<N> {
    fn send(&self, data: &mut [u8]) -> Result<(), HandlerError> {
        if data.len() != core::mem::size_of::<WireMessage>() {
            return Err(HandlerError::BadLength);
        }
        data.copy_from_slice(self.serve().as_bytes());
        Ok(())
    }
}

impl<const N: usize> ReceiveHandler for Mailbox<N> {
    fn receive(&self, data: &[u8]) -> Result<(), HandlerError> {
        let ack = Ack::read_from_bytes(data)
            .map_err(|_| HandlerError::BadLength)?;
        self.acknowledge(ack).map_err(|_| HandlerError::Rejected)
    }
}

/// Adapter serving [`Mailbox::serve_and_retire`] as a one-byte read.
///
/// This is for command tables facing a board-management controller, which
/// reads the next id with a read-byte and never acknowledges.  The
/// device-management link uses [`PULL`] and [`ACK`] instead and does not
/// register it.
pub struct RetireOnRead<'a, const N: usize = DEPTH>(pub &'a Mailbox<N>);

impl<const N: usize> SendHandler for RetireOnRead<'_, N> {
    fn send(&self, data: &mut [u8]) -> Result<(), HandlerError> {
        data.fill(0);
        if let Some(first) = data.first_mut() {
            *first = self.0.serve_and_retire();
        }
        Ok(())
    }
}
