// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! An in-memory bus between a [`SmbusController`] user and a
//! [`SmbusTarget`], for simulation and tests.
//!
//! Each transaction is played out as the event sequence a real target
//! driver would see.  A one-shot fault can be armed to flip bits in a byte
//! on the wire.

use crate::host::SmbusController;
use crate::{BusAction, BusEvent, SmbusTarget};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LoopbackError {
    AddressNack,
    /// The target refused the byte at this offset of the write.
    DataNack(usize),
    /// The target answered a read with something other than a byte.
    NoData,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Fault {
    /// XOR `mask` into byte `index` of the next write phase.
    FlipWrite { index: usize, mask: u8 },
    /// XOR `mask` into byte `index` of the next read phase.
    FlipRead { index: usize, mask: u8 },
}

pub struct Loopback<'t, 'a> {
    target: &'t mut SmbusTarget<'a>,
    fault: Option<Fault>,
}

impl<'t, 'a> Loopback<'t, 'a> {
    pub fn new(target: &'t mut SmbusTarget<'a>) -> Self {
        Self {
            target,
            fault: None,
        }
    }

    pub fn arm(&mut self, fault: Fault) {
        self.fault = Some(fault);
    }

    pub fn target(&self) -> &SmbusTarget<'a> {
        self.target
    }

    fn start(&mut self, address: u8, read: bool) -> Result<(), LoopbackError> {
        match self.target.handle(BusEvent::Start { address, read }) {
            BusAction::Ack => Ok(()),
            _ => {
                self.target.handle(BusEvent::Stop);
                Err(LoopbackError::AddressNack)
            }
        }
    }

    fn send(&mut self, bytes: &[u8]) -> Result<(), LoopbackError> {
        let flip = match self.fault {
            Some(Fault::FlipWrite { index, mask }) => {
                self.fault = None;
                Some((index, mask))
            }
            _ => None,
        };

        for (i, &b) in bytes.iter().enumerate() {
            let b = match flip {
                Some((index, mask)) if index == i => b ^ mask,
                _ => b,
            };
            if self.target.handle(BusEvent::Received(b)) != BusAction::Ack {
                self.target.handle(BusEvent::Stop);
                return Err(LoopbackError::DataNack(i));
            }
        }
        Ok(())
    }

    fn receive(&mut self, rbuf: &mut [u8]) -> Result<(), LoopbackError> {
        let flip = match self.fault {
            Some(Fault::FlipRead { index, mask }) => {
                self.fault = None;
                Some((index, mask))
            }
            _ => None,
        };

        for (i, slot) in rbuf.iter_mut().enumerate() {
            let BusAction::Transmit(b) =
                self.target.handle(BusEvent::ReadRequested)
            else {
                self.target.handle(BusEvent::Stop);
                return Err(LoopbackError::NoData);
            };
            *slot = match flip {
                Some((index, mask)) if index == i => b ^ mask,
                _ => b,
            };
        }
        Ok(())
    }
}

impl SmbusController for Loopback<'_, '_> {
    type Error = LoopbackError;

    fn write(&mut self, address: u8, bytes: &[u8]) -> Result<(), Self::Error> {
        self.start(address, false)?;
        self.send(bytes)?;
        self.target.handle(BusEvent::Stop);
        Ok(())
    }

    fn write_read(
        &mut self,
        address: u8,
        wbuf: &[u8],
        rbuf: &mut [u8],
    ) -> Result<(), Self::Error> {
        self.start(address, false)?;
        self.send(wbuf)?;
        self.start(address, true)?;
        self.receive(rbuf)?;
        self.target.handle(BusEvent::Stop);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{self, HostError};
    use crate::{
        BusError, Command, CommandDef, CommandTable, HandlerError, State,
        FILLER,
    };
    use core::sync::atomic::{AtomicU32, Ordering};

    const ADDR: u8 = 0x0a;

    static SCRATCH: AtomicU32 = AtomicU32::new(0);
    static OTHER: AtomicU32 = AtomicU32::new(0);

    fn latch(dest: &AtomicU32, data: &[u8]) -> Result<(), HandlerError> {
        let bytes: [u8; 4] =
            data.try_into().map_err(|_| HandlerError::BadLength)?;
        dest.store(u32::from_le_bytes(bytes), Ordering::SeqCst);
        Ok(())
    }

    fn put(data: &[u8]) -> Result<(), HandlerError> {
        latch(&SCRATCH, data)
    }

    fn put_other(data: &[u8]) -> Result<(), HandlerError> {
        latch(&OTHER, data)
    }

    fn get(data: &mut [u8]) -> Result<(), HandlerError> {
        data.copy_from_slice(&0xfeed_f00du32.to_le_bytes());
        Ok(())
    }

    fn word(data: &mut [u8]) -> Result<(), HandlerError> {
        data.copy_from_slice(&[0xef, 0xbe]);
        Ok(())
    }

    fn table() -> CommandTable<'static> {
        CommandTable::new(&[
            CommandDef {
                code: 0xdc,
                command: Command::BlockRead { len: 4, handler: &get },
            },
            CommandDef {
                code: 0xdd,
                command: Command::BlockWrite { len: 4, handler: &put },
            },
            CommandDef {
                code: 0xde,
                command: Command::BlockWrite { len: 4, handler: &put_other },
            },
            CommandDef { code: 0xda, command: Command::ReadWord(&word) },
        ])
        .unwrap()
    }

    #[test]
    fn block_transfers() {
        let table = table();
        let mut target = SmbusTarget::new(ADDR, &table);
        let mut bus = Loopback::new(&mut target);

        host::block_write(&mut bus, ADDR, 0xdd, &[1, 2, 3, 4]).unwrap();
        assert_eq!(SCRATCH.load(Ordering::SeqCst), 0x0403_0201);

        let mut buf = [0; 4];
        host::block_read(&mut bus, ADDR, 0xdc, &mut buf).unwrap();
        assert_eq!(buf, 0xfeed_f00du32.to_le_bytes());

        assert_eq!(host::read_word(&mut bus, ADDR, 0xda), Ok(0xbeef));
        assert_eq!(bus.target().state(), State::Idle);
    }

    #[test]
    fn wrong_address_is_nacked() {
        let table = table();
        let mut target = SmbusTarget::new(ADDR, &table);
        let mut bus = Loopback::new(&mut target);

        assert_eq!(
            host::read_word(&mut bus, 0x0b, 0xda),
            Err(HostError::Bus(LoopbackError::AddressNack))
        );
    }

    #[test]
    fn corrupted_write_is_nacked_at_pec() {
        let table = table();
        let mut target = SmbusTarget::new(ADDR, &table);
        let mut bus = Loopback::new(&mut target);

        // Command, count, four data bytes, PEC.
        bus.arm(Fault::FlipWrite { index: 3, mask: 0x10 });
        assert_eq!(
            host::block_write(&mut bus, ADDR, 0xde, &[9, 9, 9, 9]),
            Err(HostError::Bus(LoopbackError::DataNack(6)))
        );
        assert_eq!(OTHER.load(Ordering::SeqCst), 0);

        // The fault was one-shot.
        host::block_write(&mut bus, ADDR, 0xde, &[9, 9, 9, 9]).unwrap();
        assert_eq!(OTHER.load(Ordering::SeqCst), 0x0909_0909);
    }

    #[test]
    fn corrupted_read_fails_pec_check() {
        let table = table();
        let mut target = SmbusTarget::new(ADDR, &table);
        let mut bus = Loopback::new(&mut target);

        bus.arm(Fault::FlipRead { index: 2, mask: 0x01 });
        let mut buf = [0; 4];
        let r = host::block_read(&mut bus, ADDR, 0xdc, &mut buf);
        assert!(matches!(r, Err(HostError::BadPec { .. })));
    }

    #[test]
    fn short_block_read_is_a_length_error() {
        let table = table();
        let mut target = SmbusTarget::new(ADDR, &table);
        let mut bus = Loopback::new(&mut target);

        let mut buf = [0; 6];
        assert_eq!(
            host::block_read(&mut bus, ADDR, 0xdc, &mut buf),
            Err(HostError::BadLength)
        );
    }

    #[test]
    fn read_after_failed_handler_is_filler() {
        fn refuse(_: &mut [u8]) -> Result<(), HandlerError> {
            Err(HandlerError::Rejected)
        }
        let table = CommandTable::new(&[CommandDef {
            code: 0x10,
            command: Command::ReadWord(&refuse),
        }])
        .unwrap();
        let mut target = SmbusTarget::new(ADDR, &table);

        let mut rbuf = [0; 3];
        Loopback::new(&mut target)
            .write_read(ADDR, &[0x10], &mut rbuf)
            .unwrap();
        assert_eq!(rbuf, [FILLER; 3]);

        assert_eq!(
            target.write_received(0x10).and_then(|_| target.read_requested()),
            Err(BusError::Handler(HandlerError::Rejected))
        );
    }
}
