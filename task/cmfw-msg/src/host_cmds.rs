// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Host commands owned by this task.

use msgqueue::{
    HandlerTable, Registration, RegistryError, Request, RequestHandler,
    Response,
};
use status_regs::RegisterIo;

use crate::{Context, Platform, PING_SETTLE_MS};

pub const TRIGGER_RESET: u8 = 0x56;
pub const PING_DM: u8 = 0xc0;

/// Resets the chip through the device-management controller.
///
/// Levels 0 and 3 are forwarded.  The peer never answers, so anything else
/// is refused here by handing the level back as the exit code.
pub struct TriggerReset<'a, R, P>(pub Context<'a, R, P>);

impl<R: RegisterIo + Sync, P: Platform> RequestHandler
    for TriggerReset<'_, R, P>
{
    fn handle(
        &self,
        _code: u8,
        request: &Request,
        _response: &mut Response,
    ) -> u8 {
        let level = request.0[1] as u8;
        match level {
            0 | 3 => {
                self.0.issue_chip_reset(level);
                0
            }
            other => other,
        }
    }
}

/// Pings the device-management controller.  Response word 1 is 1 if it
/// answered within [`PING_SETTLE_MS`].
pub struct PingDm<'a, R, P>(pub Context<'a, R, P>);

impl<R: RegisterIo + Sync, P: Platform> RequestHandler for PingDm<'_, R, P> {
    fn handle(
        &self,
        _code: u8,
        _request: &Request,
        response: &mut Response,
    ) -> u8 {
        let ctx = &self.0;
        ctx.telemetry.clear_ping();
        ctx.send_ping();
        ctx.platform.sleep_ms(PING_SETTLE_MS);
        response.0[1] = u32::from(ctx.telemetry.ping_valid());
        0
    }
}

pub struct HostCommands<'a, R, P> {
    trigger_reset: TriggerReset<'a, R, P>,
    ping_dm: PingDm<'a, R, P>,
}

impl<'a, R: RegisterIo + Sync, P: Platform> HostCommands<'a, R, P> {
    pub fn new(ctx: Context<'a, R, P>) -> Self {
        Self {
            trigger_reset: TriggerReset(ctx),
            ping_dm: PingDm(ctx),
        }
    }

    pub fn table(&self) -> Result<HandlerTable<'_>, RegistryError> {
        HandlerTable::from_registrations(&[
            Registration {
                code: TRIGGER_RESET,
                handler: &self.trigger_reset,
            },
            Registration {
                code: PING_DM,
                handler: &self.ping_dm,
            },
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Telemetry;
    use core::sync::atomic::{AtomicU32, Ordering};
    use mailbox::{Mailbox, MessageId};
    use status_regs::shadow::ShadowRegisters;

    #[derive(Default)]
    struct Quiet {
        lockdowns: AtomicU32,
        slept: AtomicU32,
    }

    impl Platform for Quiet {
        fn sleep_ms(&self, ms: u32) {
            self.slept.fetch_add(ms, Ordering::SeqCst);
        }

        fn lock_down_for_reset(&self) {
            self.lockdowns.fetch_add(1, Ordering::SeqCst);
        }

        fn board_power_cap(&self) -> u16 {
            300
        }
    }

    fn call(h: &dyn RequestHandler, code: u8, arg: u32) -> (u8, Response) {
        let mut rsp = Response::ZERO;
        let exit = h.handle(code, &Request::new(code, &[arg]), &mut rsp);
        (exit, rsp)
    }

    #[test]
    fn reset_levels() {
        let regs = ShadowRegisters::new();
        let platform = Quiet::default();
        let mailbox = Mailbox::new();
        let telemetry = Telemetry::new();
        let ctx = Context {
            regs: &regs,
            platform: &platform,
            mailbox: &mailbox,
            telemetry: &telemetry,
        };
        let handler = TriggerReset(ctx);

        assert_eq!(call(&handler, TRIGGER_RESET, 5).0, 5);
        assert_eq!(mailbox.pending(), 0);
        assert_eq!(platform.lockdowns.load(Ordering::SeqCst), 0);

        assert_eq!(call(&handler, TRIGGER_RESET, 3).0, 0);
        let msg = mailbox.serve();
        assert_eq!((msg.id, msg.data.get()), (MessageId::ResetReq as u8, 3));
        assert_eq!(platform.lockdowns.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unanswered_ping_reports_zero() {
        let regs = ShadowRegisters::new();
        let platform = Quiet::default();
        let mailbox = Mailbox::new();
        let telemetry = Telemetry::new();
        let ctx = Context {
            regs: &regs,
            platform: &platform,
            mailbox: &mailbox,
            telemetry: &telemetry,
        };

        let (exit, rsp) = call(&PingDm(ctx), PING_DM, 0);

        assert_eq!((exit, rsp.0[1]), (0, 0));
        assert_eq!(platform.slept.load(Ordering::SeqCst), PING_SETTLE_MS);
        assert_eq!(mailbox.serve().id, MessageId::Ping as u8);
    }

    #[test]
    fn registry_holds_both_commands() {
        let regs = ShadowRegisters::new();
        let platform = Quiet::default();
        let mailbox = Mailbox::new();
        let telemetry = Telemetry::new();
        let cmds = HostCommands::new(Context {
            regs: &regs,
            platform: &platform,
            mailbox: &mailbox,
            telemetry: &telemetry,
        });

        let table = cmds.table().unwrap();
        assert!(table.get(TRIGGER_RESET).is_some());
        assert!(table.get(PING_DM).is_some());
        assert!(table.get(0x57).is_none());
    }
}
