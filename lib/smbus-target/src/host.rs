// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Controller side of the transactions [`crate::SmbusTarget`] serves.
//!
//! PECs are framed the way the target frames them (see
//! [`crate::transaction_pec`]), so these helpers only interoperate with
//! targets built on this crate.

use crate::{transaction_pec, MAX_MESSAGE_SIZE, READ_BIT, WRITE_BIT};

/// An SMBus (or I2C) controller.
pub trait SmbusController {
    type Error;

    /// Writes `bytes` to `address` and stops.
    fn write(&mut self, address: u8, bytes: &[u8]) -> Result<(), Self::Error>;

    /// Writes `wbuf` to `address`, issues a repeated start, reads `rbuf.len()`
    /// bytes, and stops.
    fn write_read(
        &mut self,
        address: u8,
        wbuf: &[u8],
        rbuf: &mut [u8],
    ) -> Result<(), Self::Error>;
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum HostError<E> {
    Bus(E),
    BadPec { expected: u8, received: u8 },
    /// The target's byte count didn't match what we asked for, or the
    /// request itself was too big.
    BadLength,
}

fn check_pec<E>(expected: u8, received: u8) -> Result<(), HostError<E>> {
    if expected == received {
        Ok(())
    } else {
        Err(HostError::BadPec { expected, received })
    }
}

fn write_framed<C: SmbusController>(
    bus: &mut C,
    address: u8,
    command: u8,
    count: Option<u8>,
    payload: &[u8],
) -> Result<(), HostError<C::Error>> {
    if payload.len() > MAX_MESSAGE_SIZE {
        return Err(HostError::BadLength);
    }

    let mut buf = [0u8; MAX_MESSAGE_SIZE + 3];
    buf[0] = command;
    let mut n = 1;
    if let Some(count) = count {
        buf[n] = count;
        n += 1;
    }
    buf[n..n + payload.len()].copy_from_slice(payload);
    n += payload.len();
    buf[n] = transaction_pec(address, WRITE_BIT, command, count, payload);

    bus.write(address, &buf[..=n]).map_err(HostError::Bus)
}

pub fn write_byte<C: SmbusController>(
    bus: &mut C,
    address: u8,
    command: u8,
    value: u8,
) -> Result<(), HostError<C::Error>> {
    write_framed(bus, address, command, None, &[value])
}

pub fn write_word<C: SmbusController>(
    bus: &mut C,
    address: u8,
    command: u8,
    value: u16,
) -> Result<(), HostError<C::Error>> {
    write_framed(bus, address, command, None, &value.to_le_bytes())
}

pub fn block_write<C: SmbusController>(
    bus: &mut C,
    address: u8,
    command: u8,
    data: &[u8],
) -> Result<(), HostError<C::Error>> {
    let count = u8::try_from(data.len()).map_err(|_| HostError::BadLength)?;
    write_framed(bus, address, command, Some(count), data)
}

fn read_fixed<C: SmbusController, const N: usize>(
    bus: &mut C,
    address: u8,
    command: u8,
) -> Result<[u8; N], HostError<C::Error>> {
    let mut rbuf = [0u8; MAX_MESSAGE_SIZE + 1];
    bus.write_read(address, &[command], &mut rbuf[..=N])
        .map_err(HostError::Bus)?;

    let mut out = [0u8; N];
    out.copy_from_slice(&rbuf[..N]);
    let expected = transaction_pec(address, READ_BIT, command, None, &out);
    check_pec(expected, rbuf[N])?;
    Ok(out)
}

pub fn read_byte<C: SmbusController>(
    bus: &mut C,
    address: u8,
    command: u8,
) -> Result<u8, HostError<C::Error>> {
    let [b] = read_fixed::<C, 1>(bus, address, command)?;
    Ok(b)
}

pub fn read_word<C: SmbusController>(
    bus: &mut C,
    address: u8,
    command: u8,
) -> Result<u16, HostError<C::Error>> {
    Ok(u16::from_le_bytes(read_fixed::<C, 2>(bus, address, command)?))
}

/// Reads a block of exactly `data.len()` bytes.
pub fn block_read<C: SmbusController>(
    bus: &mut C,
    address: u8,
    command: u8,
    data: &mut [u8],
) -> Result<(), HostError<C::Error>> {
    let len = data.len();
    if len == 0 || len > MAX_MESSAGE_SIZE {
        return Err(HostError::BadLength);
    }

    // Count, payload, PEC.
    let mut rbuf = [0u8; MAX_MESSAGE_SIZE + 2];
    bus.write_read(address, &[command], &mut rbuf[..len + 2])
        .map_err(HostError::Bus)?;

    let count = rbuf[0];
    if usize::from(count) != len {
        return Err(HostError::BadLength);
    }

    let payload = &rbuf[1..=len];
    let expected =
        transaction_pec(address, READ_BIT, command, Some(count), payload);
    check_pec(expected, rbuf[len + 1])?;

    data.copy_from_slice(payload);
    Ok(())
}
