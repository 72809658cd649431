// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use msgqueue::{doorbell_isr, Dispatcher, HandlerTable, HostQueues, WorkFlag};
use ringbuf::*;
use smbus_target::TargetPort;
use status_regs::RegisterIo;

use crate::{BusTarget, Context, Platform};

/// Host doorbell: the host has pushed at least one request.
pub const DOORBELL_IRQ: u32 = 1 << 0;
/// The SMBus target block has events for us.
pub const SMBUS_IRQ: u32 = 1 << 1;

const ALL_IRQS: u32 = DOORBELL_IRQ | SMBUS_IRQ;

/// How the task waits for interrupts.
pub trait Notifications {
    fn irq_control(&mut self, mask: u32, enable: bool);

    /// Blocks until at least one notification in `mask` is posted and
    /// returns the posted bits.
    fn wait(&mut self, mask: u32) -> u32;
}

#[derive(Copy, Clone, Debug, PartialEq)]
enum Trace {
    None,
    Notification(u32),
    SmbusEvents(usize),
}

ringbuf!(Trace, 16, Trace::None);

pub struct Server<'a, R> {
    regs: &'a R,
    queues: &'a HostQueues,
    work: &'a WorkFlag,
    dispatcher: Dispatcher<'a, R>,
    bus: &'a BusTarget<'a>,
}

impl<'a, R: RegisterIo> Server<'a, R> {
    pub fn new(
        regs: &'a R,
        queues: &'a HostQueues,
        work: &'a WorkFlag,
        handlers: &'a HandlerTable<'a>,
        bus: &'a BusTarget<'a>,
    ) -> Self {
        Self {
            regs,
            queues,
            work,
            dispatcher: Dispatcher::new(handlers, regs),
            bus,
        }
    }

    /// Publishes the host queues and tells the peer we're up.
    pub fn init<P: Platform>(&self, ctx: &Context<'_, R, P>) {
        self.queues.init(self.regs);
        ctx.announce_ready();
    }

    /// Bus events go first: a host command may block waiting on the peer,
    /// and the peer can only reach us over the bus.
    pub fn handle_notification(
        &mut self,
        bits: u32,
        port: &mut impl TargetPort,
    ) {
        ringbuf_entry!(Trace::Notification(bits));

        if bits & SMBUS_IRQ != 0 {
            let n = self.bus.service(port);
            ringbuf_entry!(Trace::SmbusEvents(n));
        }

        if bits & DOORBELL_IRQ != 0 {
            doorbell_isr(self.regs, self.work);
        }
        if self.work.take() {
            self.dispatcher.process_all(self.queues);
        }
    }

    pub fn bus(&self) -> &'a BusTarget<'a> {
        self.bus
    }

    pub fn run(
        &mut self,
        sys: &mut impl Notifications,
        port: &mut impl TargetPort,
    ) -> ! {
        sys.irq_control(ALL_IRQS, true);
        loop {
            let bits = sys.wait(ALL_IRQS);
            self.handle_notification(bits, port);
            sys.irq_control(bits & ALL_IRQS, true);
        }
    }
}
