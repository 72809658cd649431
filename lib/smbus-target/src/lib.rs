// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! SMBus target.
//!
//! Sibling controllers reach us over an SMBus link on which we are the
//! target.  Every transaction carries a PEC.  The [`SmbusTarget`] state
//! machine is fed one byte at a time from the bus driver's callbacks (or
//! from a polled transport via [`SmbusTarget::service`]), looks the command
//! byte up in a [`CommandTable`], and hands validated payloads to a
//! [`ReceiveHandler`] or asks a [`SendHandler`] for bytes to shift out.
//!
//! The [`host`] module has the controller side of the same transactions,
//! and [`loopback`] connects the two in memory.
//!
//! This crate works on both the host and embedded system.

#![cfg_attr(not(test), no_std)]

pub mod host;
pub mod loopback;
mod target;

pub use target::{BusAction, BusEvent, SmbusTarget, State, TargetPort};

/// Largest payload any command may carry.
pub const MAX_MESSAGE_SIZE: usize = 64;

/// What we shift out when we have nothing valid to send.
pub const FILLER: u8 = 0xff;

pub const WRITE_BIT: u8 = 0;
pub const READ_BIT: u8 = 1;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum HandlerError {
    /// The payload was the wrong size for the handler.
    BadLength,
    /// The payload was understood and refused.
    Rejected,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BusError {
    UnknownCommand(u8),
    /// A read of a write command, or vice versa.
    WrongDirection,
    BlockSizeMismatch { expected: u8, declared: u8 },
    BadPec { expected: u8, received: u8 },
    Handler(HandlerError),
    /// A byte arrived in a state that doesn't take one.
    Unexpected(State),
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TableError {
    Duplicate(u8),
    BadBlockSize(u8),
}

/// Consumes the payload of a write transaction.
pub trait ReceiveHandler: Sync {
    fn receive(&self, data: &[u8]) -> Result<(), HandlerError>;
}

/// Produces the payload of a read transaction; `data` is exactly as long as
/// the transaction.
pub trait SendHandler: Sync {
    fn send(&self, data: &mut [u8]) -> Result<(), HandlerError>;
}

impl<F> ReceiveHandler for F
where
    F: Fn(&[u8]) -> Result<(), HandlerError> + Sync,
{
    fn receive(&self, data: &[u8]) -> Result<(), HandlerError> {
        self(data)
    }
}

impl<F> SendHandler for F
where
    F: Fn(&mut [u8]) -> Result<(), HandlerError> + Sync,
{
    fn send(&self, data: &mut [u8]) -> Result<(), HandlerError> {
        self(data)
    }
}

/// The shape of a command and the handler that services it.
#[derive(Copy, Clone)]
pub enum Command<'a> {
    WriteByte(&'a dyn ReceiveHandler),
    WriteWord(&'a dyn ReceiveHandler),
    BlockWrite {
        len: u8,
        handler: &'a dyn ReceiveHandler,
    },
    ReadByte(&'a dyn SendHandler),
    ReadWord(&'a dyn SendHandler),
    BlockRead {
        len: u8,
        handler: &'a dyn SendHandler,
    },
}

impl Command<'_> {
    /// Payload length for fixed-size transactions.
    pub fn payload_len(&self) -> u8 {
        match self {
            Command::WriteByte(_) | Command::ReadByte(_) => 1,
            Command::WriteWord(_) | Command::ReadWord(_) => 2,
            Command::BlockWrite { len, .. }
            | Command::BlockRead { len, .. } => *len,
        }
    }

    pub fn is_block(&self) -> bool {
        matches!(self, Command::BlockWrite { .. } | Command::BlockRead { .. })
    }
}

#[derive(Copy, Clone)]
pub struct CommandDef<'a> {
    pub code: u8,
    pub command: Command<'a>,
}

/// Command byte to [`Command`] map.  Built once, then read-only.
pub struct CommandTable<'a> {
    commands: [Option<Command<'a>>; 256],
}

impl<'a> CommandTable<'a> {
    pub const fn empty() -> Self {
        Self {
            commands: [None; 256],
        }
    }

    pub fn new(defs: &[CommandDef<'a>]) -> Result<Self, TableError> {
        let mut table = Self::empty();
        for def in defs {
            table.insert(*def)?;
        }
        Ok(table)
    }

    pub fn insert(&mut self, def: CommandDef<'a>) -> Result<(), TableError> {
        let len = def.command.payload_len();
        if def.command.is_block()
            && (len == 0 || usize::from(len) > MAX_MESSAGE_SIZE)
        {
            return Err(TableError::BadBlockSize(def.code));
        }

        let slot = &mut self.commands[usize::from(def.code)];
        if slot.is_some() {
            return Err(TableError::Duplicate(def.code));
        }
        *slot = Some(def.command);
        Ok(())
    }

    pub fn get(&self, code: u8) -> Option<Command<'a>> {
        self.commands[usize::from(code)]
    }
}

/// Computes the PEC of a transaction as this target frames it: the address
/// byte with the direction bit, the command, the byte count for block
/// transfers, then the payload.
pub fn transaction_pec(
    address: u8,
    dir: u8,
    command: u8,
    count: Option<u8>,
    payload: &[u8],
) -> u8 {
    let mut buf = [0u8; MAX_MESSAGE_SIZE + 3];
    buf[0] = address << 1 | dir;
    buf[1] = command;
    let mut n = 2;
    if let Some(count) = count {
        buf[n] = count;
        n += 1;
    }
    let payload = &payload[..payload.len().min(MAX_MESSAGE_SIZE)];
    buf[n..n + payload.len()].copy_from_slice(payload);
    smbus_pec::pec(&buf[..n + payload.len()])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sink(_data: &[u8]) -> Result<(), HandlerError> {
        Ok(())
    }

    fn source(data: &mut [u8]) -> Result<(), HandlerError> {
        data.fill(0x5a);
        Ok(())
    }

    #[test]
    fn pec_matches_crc8() {
        // CRC-8, polynomial 0x07, init 0, over the framed transaction.
        let mut crc = 0u8;
        for b in [0x14, 0x11, 0x02, 0x07] {
            crc ^= b;
            for _ in 0..8 {
                crc = if crc & 0x80 != 0 { crc << 1 ^ 0x07 } else { crc << 1 };
            }
        }
        let pec = transaction_pec(0x0a, WRITE_BIT, 0x11, None, &[0x02, 0x07]);
        assert_eq!(pec, crc);
    }

    #[test]
    fn table_rejects_duplicates() {
        let r = CommandTable::new(&[
            CommandDef { code: 0x20, command: Command::WriteWord(&sink) },
            CommandDef { code: 0x20, command: Command::ReadWord(&source) },
        ]);
        assert_eq!(r.err(), Some(TableError::Duplicate(0x20)));
    }

    #[test]
    fn table_rejects_bad_block_sizes() {
        for len in [0, 65] {
            let r = CommandTable::new(&[CommandDef {
                code: 0x30,
                command: Command::BlockRead { len, handler: &source },
            }]);
            assert_eq!(r.err(), Some(TableError::BadBlockSize(0x30)));
        }
    }

    #[test]
    fn table_lookup() {
        let table = CommandTable::new(&[CommandDef {
            code: 0x22,
            command: Command::BlockWrite { len: 4, handler: &sink },
        }])
        .unwrap();

        assert_eq!(table.get(0x22).map(|c| c.payload_len()), Some(4));
        assert!(table.get(0x23).is_none());
    }
}
