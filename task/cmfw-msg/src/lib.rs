// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Chip-management messaging task.
//!
//! This wires the messaging libraries into the control core's image: the
//! host command queues and the commands registered on them, the SMBus target
//! the device-management controller talks to, and the mailbox that carries
//! our requests back to it.  [`Server::run`] is the task's main loop.

#![cfg_attr(not(test), no_std)]

use mailbox::{Mailbox, Message, MessageId};
use ringbuf::*;

mod bus;
mod host_cmds;
mod server;
mod smbus_cmds;
mod telemetry;

pub use bus::BusTarget;
pub use host_cmds::{HostCommands, PingDm, TriggerReset, PING_DM, TRIGGER_RESET};
pub use server::{Notifications, Server, DOORBELL_IRQ, SMBUS_IRQ};
pub use smbus_cmds::{
    ScratchRead, ScratchWrite, SmbusCommands, CURRENT, FAN_RPM, POWER,
    POWER_LIMIT, SCRATCH_READ_BLOCK, SCRATCH_READ_BYTE, SCRATCH_READ_WORD,
    SCRATCH_WRITE_BLOCK, SCRATCH_WRITE_BYTE, SCRATCH_WRITE_WORD, STATIC_INFO,
    THERM_TRIP_COUNT,
};
pub use telemetry::{Sink, SinkKind, StaticInfo, Telemetry};

/// Our address on the link to the device-management controller.
pub const TARGET_ADDRESS: u8 = 0x0a;

/// How long a host ping waits for the peer to answer.
pub const PING_SETTLE_MS: u32 = 50;

/// Services this task needs from the rest of the system.
pub trait Platform: Sync {
    /// Blocks the calling task.
    fn sleep_ms(&self, ms: u32);

    /// Puts the chip into its pre-reset state.  Must be safe to call from
    /// an interrupt handler.
    fn lock_down_for_reset(&self);

    /// Ceiling on the board power limit, from the firmware table.
    fn board_power_cap(&self) -> u16;
}

#[derive(Copy, Clone, Debug, PartialEq)]
enum Trace {
    None,
    ResetRequested(u8),
    Masked(u32),
    FanSpeedRequested(u32),
    Ready,
    Dropped(MessageId),
}

ringbuf!(Trace, 16, Trace::None);

/// The state shared by every command handler in this task.
pub struct Context<'a, R, P> {
    pub regs: &'a R,
    pub platform: &'a P,
    pub mailbox: &'a Mailbox,
    pub telemetry: &'a Telemetry,
}

impl<R, P> Clone for Context<'_, R, P> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<R, P> Copy for Context<'_, R, P> {}

impl<R, P: Platform> Context<'_, R, P> {
    fn send(&self, msg: Message) {
        // A full mailbox means the peer has stopped polling; there's nobody
        // to tell.
        if self.mailbox.enqueue(msg).is_err() {
            ringbuf_entry!(Trace::Dropped(msg.id));
        }
    }

    /// Locks the chip down and asks the peer to reset it.
    pub fn issue_chip_reset(&self, level: u8) {
        ringbuf_entry!(Trace::ResetRequested(level));
        self.platform.lock_down_for_reset();
        self.send(Message::new(MessageId::ResetReq, u32::from(level)));
    }

    /// Interrupt handler for fatal-error lines: masks `irq` so a level
    /// interrupt doesn't fire again while we wait to be reset, then asks
    /// for a full chip reset.
    pub fn chip_reset_isr(
        &self,
        irq: Option<u32>,
        sys: &mut impl Notifications,
    ) {
        if let Some(mask) = irq {
            ringbuf_entry!(Trace::Masked(mask));
            sys.irq_control(mask, false);
        }
        self.issue_chip_reset(0);
    }

    pub fn request_fan_speed(&self, speed: u32) {
        ringbuf_entry!(Trace::FanSpeedRequested(speed));
        self.send(Message::new(MessageId::FanSpeedUpdate, speed));
    }

    pub fn announce_ready(&self) {
        ringbuf_entry!(Trace::Ready);
        self.send(Message::new(MessageId::Ready, 0));
    }

    pub fn send_ping(&self) {
        self.send(Message::new(MessageId::Ping, 0));
    }
}
