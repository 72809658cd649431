// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The peer's side of a mailbox: poll, then acknowledge.

use smbus_target::host::{self, HostError, SmbusController};
use zerocopy::FromBytes;

use crate::{Ack, WireMessage, ACK, PING_MAGIC, PING_RESPONSE, PULL};

/// Polls the mailbox at `address` once.  A message that comes back is
/// acknowledged before it's returned; an empty mailbox yields `None`.
pub fn fetch_message<C: SmbusController>(
    bus: &mut C,
    address: u8,
) -> Result<Option<WireMessage>, HostError<C::Error>> {
    let mut raw = [0u8; core::mem::size_of::<WireMessage>()];
    host::block_read(bus, address, PULL, &mut raw)?;

    let msg = WireMessage::read_from_bytes(&raw[..])
        .map_err(|_| HostError::BadLength)?;
    if msg.is_empty() {
        return Ok(None);
    }

    let ack = Ack {
        id: msg.id,
        seq: msg.seq,
    };
    host::write_word(bus, address, ACK, ack.as_word())?;
    Ok(Some(msg))
}

/// Answers a ping message.
pub fn answer_ping<C: SmbusController>(
    bus: &mut C,
    address: u8,
) -> Result<(), HostError<C::Error>> {
    host::write_word(bus, address, PING_RESPONSE, PING_MAGIC)
}
