// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The SMBus target, shared between the bus interrupt and the task.
//!
//! Host commands may block (a ping sleeps while it waits for the peer), and
//! the peer can only answer over this bus.  So the target can't belong to
//! the drain loop: the bus driver's interrupt feeds it through
//! [`BusTarget::handle`] whatever the task is doing, and the task's own
//! [`BusTarget::service`] picks up anything a polled port has queued.

use core::cell::RefCell;

use critical_section::Mutex;
use smbus_target::{
    BusAction, BusEvent, CommandTable, SmbusTarget, State, TargetPort,
};

use crate::TARGET_ADDRESS;

pub struct BusTarget<'a> {
    target: Mutex<RefCell<SmbusTarget<'a>>>,
}

impl<'a> BusTarget<'a> {
    pub fn new(commands: &'a CommandTable<'a>) -> Self {
        Self {
            target: Mutex::new(RefCell::new(SmbusTarget::new(
                TARGET_ADDRESS,
                commands,
            ))),
        }
    }

    /// One bus event, from the driver's interrupt handler.
    pub fn handle(&self, event: BusEvent) -> BusAction {
        self.with(|t| t.handle(event))
    }

    /// Drains a polled port; returns the number of events handled.  Each
    /// event gets its own critical section.
    pub fn service(&self, port: &mut impl TargetPort) -> usize {
        let mut n = 0;
        while let Some(event) = port.poll() {
            port.respond(self.handle(event));
            n += 1;
        }
        n
    }

    /// Runs `f` with the target locked, e.g. to play a whole transaction
    /// against it in a simulation.
    pub fn with<T>(&self, f: impl FnOnce(&mut SmbusTarget<'a>) -> T) -> T {
        critical_section::with(|cs| f(&mut self.target.borrow_ref_mut(cs)))
    }

    pub fn state(&self) -> State {
        self.with(|t| t.state())
    }
}
