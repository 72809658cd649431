// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Host command queues.
//!
//! The host talks to the control core through a small array of queues in
//! controller memory.  Each queue is a pair of rings (requests and
//! responses) of fixed-size, eight-word records, with a header of free
//! running pointers.  Pointers run modulo twice the ring size, so a ring is
//! empty when its pointers are equal and full when they differ by exactly
//! the ring size.
//!
//! Ownership of the header is split: the host writes the request write
//! pointer and the response read pointer, and the controller writes
//! everything else.  Neither side ever writes the other's fields.
//!
//! The host announces new work by ringing a doorbell.  The interrupt handler
//! clears the doorbell and flags a [`WorkFlag`]; the task then calls
//! [`Dispatcher::process_all`], which drains every queue in order, one
//! request at a time, routing each to a [`RequestHandler`] found in a
//! [`HandlerTable`].
//!
//! This crate works on both the host and embedded system.

#![cfg_attr(not(test), no_std)]

use num_derive::FromPrimitive;
use static_assertions::const_assert_eq;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

mod dispatch;
mod handlers;
mod queue;

pub use dispatch::{doorbell_isr, Dispatcher, WorkFlag};
pub use handlers::{HandlerTable, Registration, RequestHandler};
pub use queue::{
    Header, HostPort, MessageQueue, MessageQueues, NextMessage, Pointers,
};

pub const NUM_QUEUES: usize = 4;
pub const QUEUE_SIZE: usize = 4;

pub const REQUEST_WORDS: usize = 8;
pub const RESPONSE_WORDS: usize = 8;

/// The full set of queues the controller exposes to the host.
pub type HostQueues = MessageQueues<NUM_QUEUES, QUEUE_SIZE>;

/// Response status for a request no handler claimed.
pub const STATUS_UNRECOGNIZED: u8 = 0xff;
/// Response status for requests that only make sense over the scratch
/// register interface.
pub const STATUS_SCRATCH_ONLY: u8 = 0xfe;

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
pub struct Request(pub [u32; REQUEST_WORDS]);

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
pub struct Response(pub [u32; RESPONSE_WORDS]);

const_assert_eq!(core::mem::size_of::<Request>(), 32);
const_assert_eq!(core::mem::size_of::<Response>(), 32);

impl Request {
    pub const ZERO: Self = Self([0; REQUEST_WORDS]);

    /// Builds a request whose first word carries `code` in its low byte.
    pub fn new(code: u8, args: &[u32]) -> Self {
        let mut req = Self::ZERO;
        req.0[0] = u32::from(code);
        for (w, a) in req.0[1..].iter_mut().zip(args) {
            *w = *a;
        }
        req
    }

    pub fn code(&self) -> u8 {
        self.0[0] as u8
    }
}

impl Response {
    pub const ZERO: Self = Self([0; RESPONSE_WORDS]);

    pub fn status(&self) -> u8 {
        self.0[0] as u8
    }
}

/// Codes the queue machinery handles itself.  They can't be claimed by a
/// [`Registration`].
#[derive(Copy, Clone, Debug, Eq, PartialEq, FromPrimitive)]
pub enum BuiltinCode {
    ReportScratchOnly = 0x16,
    Test = 0x90,
    SetLastSerial = 0x93,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RegistryError {
    /// Two registrations named the same code.
    Duplicate(u8),
    /// A registration named a [`BuiltinCode`].
    Reserved(u8),
}

/// Failures seen by the host side of a queue.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum HostError {
    RequestRingFull,
    NoResponse,
}
