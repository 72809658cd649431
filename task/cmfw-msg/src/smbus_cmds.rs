// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The command table we serve as an SMBus target.

use mailbox::{ACK, PING_RESPONSE, PULL};
use smbus_target::{
    Command, CommandDef, CommandTable, HandlerError, ReceiveHandler,
    SendHandler, TableError,
};
use status_regs::{RegisterIo, FW_SCRATCH_REG};

use crate::{Context, Platform, Sink, SinkKind};

pub const STATIC_INFO: u8 = 0x20;
pub const CURRENT: u8 = 0x22;
pub const FAN_RPM: u8 = 0x23;
pub const POWER_LIMIT: u8 = 0x24;
pub const POWER: u8 = 0x25;
pub const THERM_TRIP_COUNT: u8 = 0x28;

pub const SCRATCH_READ_BYTE: u8 = 0xd8;
pub const SCRATCH_WRITE_BYTE: u8 = 0xd9;
pub const SCRATCH_READ_WORD: u8 = 0xda;
pub const SCRATCH_WRITE_WORD: u8 = 0xdb;
pub const SCRATCH_READ_BLOCK: u8 = 0xdc;
pub const SCRATCH_WRITE_BLOCK: u8 = 0xdd;

const SCRATCH_BLOCK_LEN: u8 = 4;

/// Reads the firmware scratch register, as much of it as the transaction
/// is long.
pub struct ScratchRead<'a, R>(pub &'a R);

impl<R: RegisterIo + Sync> SendHandler for ScratchRead<'_, R> {
    fn send(&self, data: &mut [u8]) -> Result<(), HandlerError> {
        let value = self.0.read(FW_SCRATCH_REG).to_le_bytes();
        match data.len() {
            1 | 2 | 4 => {
                data.copy_from_slice(&value[..data.len()]);
                Ok(())
            }
            _ => Err(HandlerError::BadLength),
        }
    }
}

/// Writes the firmware scratch register.  Byte and word writes record the
/// transaction size in bits 16 and up so a test can tell them apart.
pub struct ScratchWrite<'a, R>(pub &'a R);

impl<R: RegisterIo + Sync> ReceiveHandler for ScratchWrite<'_, R> {
    fn receive(&self, data: &[u8]) -> Result<(), HandlerError> {
        let value = match *data {
            [b0] => 1 << 16 | u32::from(b0),
            [b0, b1] => 2 << 16 | u32::from(b1) << 8 | u32::from(b0),
            [b0, b1, b2, b3] => u32::from_le_bytes([b0, b1, b2, b3]),
            _ => return Err(HandlerError::BadLength),
        };
        self.0.write(FW_SCRATCH_REG, value);
        Ok(())
    }
}

pub struct SmbusCommands<'a, R, P> {
    ctx: Context<'a, R, P>,
    static_info: Sink<'a, P>,
    ping: Sink<'a, P>,
    current: Sink<'a, P>,
    fan_rpm: Sink<'a, P>,
    #[cfg_attr(feature = "recovery", allow(dead_code))]
    power_limit: Sink<'a, P>,
    #[cfg_attr(feature = "recovery", allow(dead_code))]
    power: Sink<'a, P>,
    therm_trip: Sink<'a, P>,
    scratch_read: ScratchRead<'a, R>,
    scratch_write: ScratchWrite<'a, R>,
}

impl<'a, R: RegisterIo + Sync, P: Platform> SmbusCommands<'a, R, P> {
    pub fn new(ctx: Context<'a, R, P>) -> Self {
        let sink = |kind| Sink {
            telemetry: ctx.telemetry,
            platform: ctx.platform,
            kind,
        };
        Self {
            ctx,
            static_info: sink(SinkKind::StaticInfo),
            ping: sink(SinkKind::Ping),
            current: sink(SinkKind::InputCurrent),
            fan_rpm: sink(SinkKind::FanRpm),
            power_limit: sink(SinkKind::BoardPowerLimit),
            power: sink(SinkKind::InputPower),
            therm_trip: sink(SinkKind::ThermTripCount),
            scratch_read: ScratchRead(ctx.regs),
            scratch_write: ScratchWrite(ctx.regs),
        }
    }

    pub fn table(&self) -> Result<CommandTable<'_>, TableError> {
        let mut table = CommandTable::empty();
        let defs = [
            (PULL, self.ctx.mailbox.pull_command()),
            (ACK, self.ctx.mailbox.ack_command()),
            (
                STATIC_INFO,
                Command::BlockWrite {
                    len: core::mem::size_of::<crate::StaticInfo>() as u8,
                    handler: &self.static_info,
                },
            ),
            (PING_RESPONSE, Command::WriteWord(&self.ping)),
            (
                CURRENT,
                Command::BlockWrite {
                    len: 4,
                    handler: &self.current,
                },
            ),
            (FAN_RPM, Command::WriteWord(&self.fan_rpm)),
            (THERM_TRIP_COUNT, Command::WriteWord(&self.therm_trip)),
            (SCRATCH_READ_BYTE, Command::ReadByte(&self.scratch_read)),
            (SCRATCH_WRITE_BYTE, Command::WriteByte(&self.scratch_write)),
            (SCRATCH_READ_WORD, Command::ReadWord(&self.scratch_read)),
            (SCRATCH_WRITE_WORD, Command::WriteWord(&self.scratch_write)),
            (
                SCRATCH_READ_BLOCK,
                Command::BlockRead {
                    len: SCRATCH_BLOCK_LEN,
                    handler: &self.scratch_read,
                },
            ),
            (
                SCRATCH_WRITE_BLOCK,
                Command::BlockWrite {
                    len: SCRATCH_BLOCK_LEN,
                    handler: &self.scratch_write,
                },
            ),
        ];
        for (code, command) in defs {
            table.insert(CommandDef { code, command })?;
        }

        #[cfg(not(feature = "recovery"))]
        {
            table.insert(CommandDef {
                code: POWER_LIMIT,
                command: Command::WriteWord(&self.power_limit),
            })?;
            table.insert(CommandDef {
                code: POWER,
                command: Command::WriteWord(&self.power),
            })?;
        }

        Ok(table)
    }
}
