// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use ringbuf::*;

use crate::{
    transaction_pec, BusError, Command, CommandTable, FILLER,
    MAX_MESSAGE_SIZE, READ_BIT, WRITE_BIT,
};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum State {
    Idle,
    /// We have a command byte and are waiting to see which way the
    /// transaction goes.
    Command,
    ReceivingData,
    ReceivingCheck,
    SendingData,
    SendingCheck,
    /// Done, or failed.  Only a stop gets us out.
    WaitIdle,
}

#[derive(Copy, Clone, Debug, PartialEq)]
enum Trace {
    None,
    Initiate(u8),
    Rx(State, u8),
    Tx(State, u8),
    Stop(State),
    Error(BusError),
}

ringbuf!(Trace, 64, Trace::None);

/// Something that happened on the bus, as reported by the driver.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BusEvent {
    /// Start (or repeated start) addressed to `address`.
    Start { address: u8, read: bool },
    Received(u8),
    ReadRequested,
    Stop,
}

/// What the driver should do in response to a [`BusEvent`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BusAction {
    Ack,
    Nack,
    Transmit(u8),
    Nothing,
}

/// A byte-level transport that is polled rather than interrupt driven.
pub trait TargetPort {
    fn poll(&mut self) -> Option<BusEvent>;
    fn respond(&mut self, action: BusAction);
}

pub struct SmbusTarget<'a> {
    address: u8,
    table: &'a CommandTable<'a>,

    state: State,
    command: u8,
    block_size: u8,
    rcv_index: u8,
    send_index: u8,
    received: [u8; MAX_MESSAGE_SIZE],
    send: [u8; MAX_MESSAGE_SIZE],
}

impl<'a> SmbusTarget<'a> {
    pub fn new(address: u8, table: &'a CommandTable<'a>) -> Self {
        Self {
            address,
            table,
            state: State::Idle,
            command: 0,
            block_size: 0,
            rcv_index: 0,
            send_index: 0,
            received: [0; MAX_MESSAGE_SIZE],
            send: [0; MAX_MESSAGE_SIZE],
        }
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Address match check for the driver; any direction is fine.
    pub fn initiate(&mut self, address: u8) -> bool {
        ringbuf_entry!(Trace::Initiate(address));
        address == self.address
    }

    fn fail(&mut self, err: BusError) -> BusError {
        ringbuf_entry!(Trace::Error(err));
        self.state = State::WaitIdle;
        err
    }

    fn current(&self) -> Option<Command<'a>> {
        self.table.get(self.command)
    }

    /// Handles a byte written by the controller.  An error means the byte
    /// should be NACKed; the transaction is dead until the next stop.
    pub fn write_received(&mut self, val: u8) -> Result<(), BusError> {
        ringbuf_entry!(Trace::Rx(self.state, val));

        match self.state {
            State::Idle => {
                self.command = val;
                if self.current().is_none() {
                    return Err(self.fail(BusError::UnknownCommand(val)));
                }
                self.state = State::Command;
            }
            State::Command => match self.current() {
                Some(Command::BlockWrite { len, .. }) => {
                    if val != len {
                        return Err(self.fail(BusError::BlockSizeMismatch {
                            expected: len,
                            declared: val,
                        }));
                    }
                    self.block_size = val;
                    self.state = State::ReceivingData;
                }
                Some(Command::WriteByte(_)) => {
                    self.block_size = 1;
                    self.push_received(val);
                    self.state = State::ReceivingCheck;
                }
                Some(Command::WriteWord(_)) => {
                    self.block_size = 2;
                    self.push_received(val);
                    self.state = State::ReceivingData;
                }
                _ => return Err(self.fail(BusError::WrongDirection)),
            },
            State::ReceivingData => {
                self.push_received(val);
                if self.rcv_index >= self.block_size {
                    self.state = State::ReceivingCheck;
                }
            }
            State::ReceivingCheck => return self.finish_write(val),
            state => return Err(self.fail(BusError::Unexpected(state))),
        }

        Ok(())
    }

    fn push_received(&mut self, val: u8) {
        if let Some(slot) = self.received.get_mut(usize::from(self.rcv_index))
        {
            *slot = val;
            self.rcv_index += 1;
        }
    }

    fn finish_write(&mut self, received_pec: u8) -> Result<(), BusError> {
        let Some(cmd) = self.current() else {
            return Err(self.fail(BusError::UnknownCommand(self.command)));
        };

        let payload = &self.received[..usize::from(self.block_size)];
        let count = cmd.is_block().then_some(self.block_size);
        let pec = transaction_pec(
            self.address,
            WRITE_BIT,
            self.command,
            count,
            payload,
        );

        if pec != received_pec {
            return Err(self.fail(BusError::BadPec {
                expected: pec,
                received: received_pec,
            }));
        }

        let result = match cmd {
            Command::WriteByte(h)
            | Command::WriteWord(h)
            | Command::BlockWrite { handler: h, .. } => h.receive(payload),
            _ => return Err(self.fail(BusError::WrongDirection)),
        };

        self.state = State::WaitIdle;
        result.map_err(|e| self.fail(BusError::Handler(e)))
    }

    /// Produces the next byte of a read transaction.  On error, the driver
    /// should send [`FILLER`]; see [`Self::transmit`].
    pub fn read_requested(&mut self) -> Result<u8, BusError> {
        let val = match self.state {
            State::Command => self.start_read()?,
            State::SendingData => {
                let val = self.pop_send();
                if self.send_index >= self.block_size {
                    self.state = State::SendingCheck;
                }
                val
            }
            State::SendingCheck => {
                let count = self
                    .current()
                    .is_some_and(|c| c.is_block())
                    .then_some(self.block_size);
                let payload = &self.send[..usize::from(self.block_size)];
                self.state = State::WaitIdle;
                transaction_pec(
                    self.address,
                    READ_BIT,
                    self.command,
                    count,
                    payload,
                )
            }
            state => return Err(self.fail(BusError::Unexpected(state))),
        };

        ringbuf_entry!(Trace::Tx(self.state, val));
        Ok(val)
    }

    fn start_read(&mut self) -> Result<u8, BusError> {
        let (handler, size) = match self.current() {
            Some(Command::BlockRead { len, handler }) => (handler, len),
            Some(Command::ReadByte(h)) => (h, 1),
            Some(Command::ReadWord(h)) => (h, 2),
            _ => return Err(self.fail(BusError::WrongDirection)),
        };

        self.block_size = size;
        let buf = &mut self.send[..usize::from(size)];
        if let Err(e) = handler.send(buf) {
            return Err(self.fail(BusError::Handler(e)));
        }

        Ok(match self.current() {
            Some(Command::BlockRead { .. }) => {
                self.state = State::SendingData;
                self.block_size
            }
            Some(Command::ReadByte(_)) => {
                self.state = State::SendingCheck;
                self.pop_send()
            }
            _ => {
                self.state = State::SendingData;
                self.pop_send()
            }
        })
    }

    fn pop_send(&mut self) -> u8 {
        let val = self
            .send
            .get(usize::from(self.send_index))
            .copied()
            .unwrap_or(FILLER);
        self.send_index = self.send_index.saturating_add(1);
        val
    }

    /// [`Self::read_requested`], with errors turned into [`FILLER`].
    pub fn transmit(&mut self) -> u8 {
        self.read_requested().unwrap_or(FILLER)
    }

    /// Bus stop: back to idle.  The data buffers are left as they are.
    pub fn stop(&mut self) {
        ringbuf_entry!(Trace::Stop(self.state));
        self.state = State::Idle;
        self.command = 0;
        self.block_size = 0;
        self.rcv_index = 0;
        self.send_index = 0;
    }

    /// Entry point for interrupt-driven drivers.
    pub fn handle(&mut self, event: BusEvent) -> BusAction {
        match event {
            BusEvent::Start { address, .. } => {
                if self.initiate(address) {
                    BusAction::Ack
                } else {
                    BusAction::Nack
                }
            }
            BusEvent::Received(val) => match self.write_received(val) {
                Ok(()) => BusAction::Ack,
                Err(_) => BusAction::Nack,
            },
            BusEvent::ReadRequested => BusAction::Transmit(self.transmit()),
            BusEvent::Stop => {
                self.stop();
                BusAction::Nothing
            }
        }
    }

    /// Drains whatever the port has for us; returns the number of events
    /// handled.
    pub fn service(&mut self, port: &mut impl TargetPort) -> usize {
        let mut n = 0;
        while let Some(event) = port.poll() {
            let action = self.handle(event);
            port.respond(action);
            n += 1;
        }
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CommandDef, HandlerError};
    use core::sync::atomic::{AtomicU32, Ordering};
    use proptest::prelude::*;

    const ADDR: u8 = 0x0a;

    static LAST_WORD: AtomicU32 = AtomicU32::new(0);
    static LAST_BYTE: AtomicU32 = AtomicU32::new(0);
    static LAST_BLOCK: AtomicU32 = AtomicU32::new(0);

    fn latch(dest: &AtomicU32, data: &[u8]) -> Result<(), HandlerError> {
        let mut word = [0u8; 4];
        word[..data.len()].copy_from_slice(data);
        dest.store(u32::from_le_bytes(word), Ordering::SeqCst);
        Ok(())
    }

    fn store_word(data: &[u8]) -> Result<(), HandlerError> {
        latch(&LAST_WORD, data)
    }

    fn store_byte(data: &[u8]) -> Result<(), HandlerError> {
        latch(&LAST_BYTE, data)
    }

    fn store_block(data: &[u8]) -> Result<(), HandlerError> {
        latch(&LAST_BLOCK, data)
    }

    fn word_source(data: &mut [u8]) -> Result<(), HandlerError> {
        data.copy_from_slice(&[0x34, 0x12]);
        Ok(())
    }

    fn block_source(data: &mut [u8]) -> Result<(), HandlerError> {
        data.copy_from_slice(&[1, 2, 3, 4, 5, 6]);
        Ok(())
    }

    fn byte_source(data: &mut [u8]) -> Result<(), HandlerError> {
        data[0] = 0x77;
        Ok(())
    }

    fn broken(_data: &mut [u8]) -> Result<(), HandlerError> {
        Err(HandlerError::Rejected)
    }

    fn picky(data: &[u8]) -> Result<(), HandlerError> {
        if data == [0xa5, 0xa5] {
            Ok(())
        } else {
            Err(HandlerError::Rejected)
        }
    }

    fn table() -> CommandTable<'static> {
        let defs = [
            (
                0x10,
                Command::BlockRead {
                    len: 6,
                    handler: &block_source,
                },
            ),
            (0x11, Command::WriteWord(&store_word)),
            (0x12, Command::WriteByte(&store_byte)),
            (0x13, Command::ReadWord(&word_source)),
            (0x14, Command::ReadByte(&byte_source)),
            (0x15, Command::ReadWord(&broken)),
            (0x21, Command::WriteWord(&picky)),
            (
                0x22,
                Command::BlockWrite {
                    len: 4,
                    handler: &store_block,
                },
            ),
        ];
        CommandTable::new(&defs.map(|(code, command)| CommandDef {
            code,
            command,
        }))
        .unwrap()
    }

    fn write(t: &mut SmbusTarget<'_>, bytes: &[u8]) -> Result<(), BusError> {
        let mut r = Ok(());
        for &b in bytes {
            r = t.write_received(b);
            if r.is_err() {
                break;
            }
        }
        t.stop();
        r
    }

    fn framed_write(cmd: u8, count: Option<u8>, payload: &[u8]) -> Vec<u8> {
        let mut v = vec![cmd];
        v.extend(count);
        v.extend_from_slice(payload);
        v.push(transaction_pec(ADDR, WRITE_BIT, cmd, count, payload));
        v
    }

    fn read(t: &mut SmbusTarget<'_>, cmd: u8, n: usize) -> Vec<u8> {
        t.write_received(cmd).unwrap();
        let out = (0..n).map(|_| t.transmit()).collect();
        t.stop();
        out
    }

    #[test]
    fn word_write_invokes_handler() {
        let table = table();
        let mut t = SmbusTarget::new(ADDR, &table);

        write(&mut t, &framed_write(0x11, None, &[0xcd, 0xab])).unwrap();

        assert_eq!(LAST_WORD.load(Ordering::SeqCst), 0xabcd);
        assert_eq!(t.state(), State::Idle);
    }

    #[test]
    fn byte_write_goes_straight_to_check() {
        let table = table();
        let mut t = SmbusTarget::new(ADDR, &table);

        t.write_received(0x12).unwrap();
        t.write_received(0x99).unwrap();
        assert_eq!(t.state(), State::ReceivingCheck);
        let pec = transaction_pec(ADDR, WRITE_BIT, 0x12, None, &[0x99]);
        t.write_received(pec).unwrap();
        assert_eq!(t.state(), State::WaitIdle);
        assert_eq!(LAST_BYTE.load(Ordering::SeqCst), 0x99);
    }

    #[test]
    fn unknown_command_waits_for_stop() {
        let table = table();
        let mut t = SmbusTarget::new(ADDR, &table);

        assert_eq!(t.write_received(0x55), Err(BusError::UnknownCommand(0x55)));
        assert_eq!(t.state(), State::WaitIdle);
        assert_eq!(
            t.write_received(0x11),
            Err(BusError::Unexpected(State::WaitIdle))
        );
        assert_eq!(t.transmit(), FILLER);

        t.stop();
        assert_eq!(t.state(), State::Idle);
    }

    #[test]
    fn block_length_mismatch_is_rejected_before_payload() {
        let table = table();
        let mut t = SmbusTarget::new(ADDR, &table);

        t.write_received(0x22).unwrap();
        assert_eq!(
            t.write_received(5),
            Err(BusError::BlockSizeMismatch {
                expected: 4,
                declared: 5
            })
        );
        assert_eq!(t.state(), State::WaitIdle);
        assert_eq!(t.rcv_index, 0);
    }

    #[test]
    fn handler_failure_is_surfaced() {
        let table = table();
        let mut t = SmbusTarget::new(ADDR, &table);

        let r = write(&mut t, &framed_write(0x21, None, &[0x00, 0x01]));
        assert_eq!(r, Err(BusError::Handler(HandlerError::Rejected)));

        let r = write(&mut t, &framed_write(0x21, None, &[0xa5, 0xa5]));
        assert_eq!(r, Ok(()));
    }

    #[test]
    fn write_to_read_command_is_rejected() {
        let table = table();
        let mut t = SmbusTarget::new(ADDR, &table);

        t.write_received(0x13).unwrap();
        assert_eq!(t.write_received(0x01), Err(BusError::WrongDirection));
    }

    #[test]
    fn read_of_write_command_sends_filler() {
        let table = table();
        let mut t = SmbusTarget::new(ADDR, &table);

        t.write_received(0x11).unwrap();
        assert_eq!(t.read_requested(), Err(BusError::WrongDirection));
        assert_eq!(t.transmit(), FILLER);
    }

    #[test]
    fn block_read_sends_count_data_pec() {
        let table = table();
        let mut t = SmbusTarget::new(ADDR, &table);

        let bytes = read(&mut t, 0x10, 9);
        let data = [1, 2, 3, 4, 5, 6];
        let pec = transaction_pec(ADDR, READ_BIT, 0x10, Some(6), &data);
        assert_eq!(bytes, [6, 1, 2, 3, 4, 5, 6, pec, FILLER]);
    }

    #[test]
    fn word_and_byte_reads() {
        let table = table();
        let mut t = SmbusTarget::new(ADDR, &table);

        let pec = transaction_pec(ADDR, READ_BIT, 0x13, None, &[0x34, 0x12]);
        assert_eq!(read(&mut t, 0x13, 3), [0x34, 0x12, pec]);

        let pec = transaction_pec(ADDR, READ_BIT, 0x14, None, &[0x77]);
        assert_eq!(read(&mut t, 0x14, 2), [0x77, pec]);
    }

    #[test]
    fn send_handler_failure_sends_filler() {
        let table = table();
        let mut t = SmbusTarget::new(ADDR, &table);

        t.write_received(0x15).unwrap();
        assert_eq!(
            t.read_requested(),
            Err(BusError::Handler(HandlerError::Rejected))
        );
        assert_eq!(t.state(), State::WaitIdle);
        assert_eq!(t.transmit(), FILLER);
    }

    #[test]
    fn events_map_to_actions() {
        let table = table();
        let mut t = SmbusTarget::new(ADDR, &table);

        let start = |address, read| BusEvent::Start { address, read };

        assert_eq!(t.handle(start(0x0b, false)), BusAction::Nack);
        assert_eq!(t.handle(start(ADDR, false)), BusAction::Ack);
        assert_eq!(t.handle(BusEvent::Received(0x14)), BusAction::Ack);
        assert_eq!(t.handle(start(ADDR, true)), BusAction::Ack);
        assert_eq!(
            t.handle(BusEvent::ReadRequested),
            BusAction::Transmit(0x77)
        );
        assert_eq!(t.handle(BusEvent::Stop), BusAction::Nothing);
        assert_eq!(t.handle(BusEvent::Received(0x56)), BusAction::Nack);
    }

    struct Script {
        events: std::collections::VecDeque<BusEvent>,
        actions: Vec<BusAction>,
    }

    impl TargetPort for Script {
        fn poll(&mut self) -> Option<BusEvent> {
            self.events.pop_front()
        }

        fn respond(&mut self, action: BusAction) {
            self.actions.push(action);
        }
    }

    #[test]
    fn service_drains_port() {
        let table = table();
        let mut t = SmbusTarget::new(ADDR, &table);
        let mut port = Script {
            events: [
                BusEvent::Start { address: ADDR, read: false },
                BusEvent::Received(0x14),
                BusEvent::Start { address: ADDR, read: true },
                BusEvent::ReadRequested,
                BusEvent::Stop,
            ]
            .into(),
            actions: vec![],
        };

        assert_eq!(t.service(&mut port), 5);
        assert_eq!(port.actions[3], BusAction::Transmit(0x77));
        assert_eq!(t.service(&mut port), 0);
    }

    proptest! {
        #[test]
        fn any_bit_flip_in_block_write_is_rejected(
            payload in proptest::array::uniform4(any::<u8>()),
            bit in 0usize..32,
        ) {
            let table = table();
            let mut t = SmbusTarget::new(ADDR, &table);

            let mut frame = framed_write(0x22, Some(4), &payload);
            // Payload starts after the command and count bytes.
            frame[2 + bit / 8] ^= 1 << (bit % 8);

            let r = write(&mut t, &frame);
            let is_bad_pec = matches!(r, Err(BusError::BadPec { .. }));
            prop_assert!(is_bad_pec);
        }
    }
}
