// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Values the device-management controller pushes to us over SMBus.

use core::sync::atomic::{
    AtomicBool, AtomicI32, AtomicU16, AtomicU32, Ordering,
};

use mailbox::PING_MAGIC;
use ringbuf::*;
use smbus_target::{HandlerError, ReceiveHandler};
use static_assertions::const_assert_eq;
use zerocopy::byteorder::{LittleEndian, I32, U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::Platform;

#[derive(Copy, Clone, Debug, PartialEq)]
enum Trace {
    None,
    StaticInfo { version: u32 },
    BadPing(u16),
    PowerLimit { requested: u16, applied: u16 },
    Refused(SinkKind),
}

ringbuf!(Trace, 16, Trace::None);

/// Block write payload of the static-info command.
#[derive(
    Copy,
    Clone,
    Debug,
    Default,
    Eq,
    PartialEq,
    FromBytes,
    IntoBytes,
    Immutable,
    KnownLayout,
)]
#[repr(C)]
pub struct StaticInfo {
    pub version: U32<LittleEndian>,
    pub bl_version: U32<LittleEndian>,
    pub app_version: U32<LittleEndian>,
}

const_assert_eq!(core::mem::size_of::<StaticInfo>(), 12);

pub struct Telemetry {
    dm_version: AtomicU32,
    dm_bl_version: AtomicU32,
    dm_app_version: AtomicU32,
    ping_valid: AtomicBool,
    input_current: AtomicI32,
    fan_rpm: AtomicU16,
    board_power_limit: AtomicU16,
    input_power: AtomicU16,
    therm_trip_count: AtomicU16,
}

impl Telemetry {
    pub const fn new() -> Self {
        Self {
            dm_version: AtomicU32::new(0),
            dm_bl_version: AtomicU32::new(0),
            dm_app_version: AtomicU32::new(0),
            ping_valid: AtomicBool::new(false),
            input_current: AtomicI32::new(0),
            fan_rpm: AtomicU16::new(0),
            board_power_limit: AtomicU16::new(0),
            input_power: AtomicU16::new(0),
            therm_trip_count: AtomicU16::new(0),
        }
    }

    /// The last static info we accepted; all zeroes until the peer has
    /// reported in.
    pub fn static_info(&self) -> StaticInfo {
        StaticInfo {
            version: U32::new(self.dm_version.load(Ordering::Relaxed)),
            bl_version: U32::new(self.dm_bl_version.load(Ordering::Relaxed)),
            app_version: U32::new(self.dm_app_version.load(Ordering::Relaxed)),
        }
    }

    pub fn ping_valid(&self) -> bool {
        self.ping_valid.load(Ordering::Acquire)
    }

    pub fn clear_ping(&self) {
        self.ping_valid.store(false, Ordering::Release);
    }

    /// Input current in the peer's units (signed).
    pub fn input_current(&self) -> i32 {
        self.input_current.load(Ordering::Relaxed)
    }

    pub fn fan_rpm(&self) -> u16 {
        self.fan_rpm.load(Ordering::Relaxed)
    }

    pub fn board_power_limit(&self) -> u16 {
        self.board_power_limit.load(Ordering::Relaxed)
    }

    pub fn input_power(&self) -> u16 {
        self.input_power.load(Ordering::Relaxed)
    }

    pub fn therm_trip_count(&self) -> u16 {
        self.therm_trip_count.load(Ordering::Relaxed)
    }

    fn accept_static_info(&self, data: &[u8]) -> Result<(), HandlerError> {
        let info = StaticInfo::read_from_bytes(data)
            .map_err(|_| HandlerError::BadLength)?;
        if info.version.get() == 0 {
            return Err(HandlerError::Rejected);
        }
        ringbuf_entry!(Trace::StaticInfo {
            version: info.version.get()
        });
        self.dm_version.store(info.version.get(), Ordering::Relaxed);
        self.dm_bl_version.store(info.bl_version.get(), Ordering::Relaxed);
        self.dm_app_version
            .store(info.app_version.get(), Ordering::Relaxed);
        Ok(())
    }

    fn accept_ping(&self, word: u16) -> Result<(), HandlerError> {
        let ok = word == PING_MAGIC;
        self.ping_valid.store(ok, Ordering::Release);
        if ok {
            Ok(())
        } else {
            ringbuf_entry!(Trace::BadPing(word));
            Err(HandlerError::Rejected)
        }
    }
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::new()
    }
}

/// Which telemetry value a [`Sink`] updates.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SinkKind {
    StaticInfo,
    Ping,
    InputCurrent,
    FanRpm,
    BoardPowerLimit,
    InputPower,
    ThermTripCount,
}

cfg_if::cfg_if! {
    if #[cfg(feature = "recovery")] {
        // The recovery image has no throttler or fan loop to feed.
        fn needs_full_firmware(kind: SinkKind) -> bool {
            matches!(kind, SinkKind::StaticInfo | SinkKind::FanRpm)
        }
    } else {
        fn needs_full_firmware(_kind: SinkKind) -> bool {
            false
        }
    }
}

fn word(data: &[u8]) -> Result<u16, HandlerError> {
    U16::<LittleEndian>::read_from_bytes(data)
        .map(|w| w.get())
        .map_err(|_| HandlerError::BadLength)
}

/// SMBus write handler storing into one field of a [`Telemetry`].
pub struct Sink<'a, P> {
    pub telemetry: &'a Telemetry,
    pub platform: &'a P,
    pub kind: SinkKind,
}

impl<P: Platform> ReceiveHandler for Sink<'_, P> {
    fn receive(&self, data: &[u8]) -> Result<(), HandlerError> {
        if needs_full_firmware(self.kind) {
            ringbuf_entry!(Trace::Refused(self.kind));
            return Err(HandlerError::Rejected);
        }

        let t = self.telemetry;
        match self.kind {
            SinkKind::StaticInfo => t.accept_static_info(data)?,
            SinkKind::Ping => t.accept_ping(word(data)?)?,
            SinkKind::InputCurrent => {
                let current = I32::<LittleEndian>::read_from_bytes(data)
                    .map_err(|_| HandlerError::BadLength)?;
                t.input_current.store(current.get(), Ordering::Relaxed);
            }
            SinkKind::FanRpm => t.fan_rpm.store(word(data)?, Ordering::Relaxed),
            SinkKind::BoardPowerLimit => {
                let requested = word(data)?;
                let applied = requested.min(self.platform.board_power_cap());
                ringbuf_entry!(Trace::PowerLimit { requested, applied });
                t.board_power_limit.store(applied, Ordering::Relaxed);
            }
            SinkKind::InputPower => {
                t.input_power.store(word(data)?, Ordering::Relaxed)
            }
            SinkKind::ThermTripCount => {
                t.therm_trip_count.store(word(data)?, Ordering::Relaxed)
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Capped(u16);

    impl Platform for Capped {
        fn sleep_ms(&self, _ms: u32) {}
        fn lock_down_for_reset(&self) {}
        fn board_power_cap(&self) -> u16 {
            self.0
        }
    }

    fn sink<'a>(
        t: &'a Telemetry,
        p: &'a Capped,
        kind: SinkKind,
    ) -> Sink<'a, Capped> {
        Sink {
            telemetry: t,
            platform: p,
            kind,
        }
    }

    #[test]
    fn ping_must_carry_magic() {
        let t = Telemetry::new();
        let p = Capped(0);
        let ping = sink(&t, &p, SinkKind::Ping);

        ping.receive(&PING_MAGIC.to_le_bytes()).unwrap();
        assert!(t.ping_valid());

        assert_eq!(ping.receive(&[0xa5, 0x00]), Err(HandlerError::Rejected));
        assert!(!t.ping_valid());
        assert_eq!(ping.receive(&[0xa5]), Err(HandlerError::BadLength));
    }

    #[test]
    fn power_limit_is_capped() {
        let t = Telemetry::new();
        let p = Capped(300);
        let limit = sink(&t, &p, SinkKind::BoardPowerLimit);

        limit.receive(&450u16.to_le_bytes()).unwrap();
        assert_eq!(t.board_power_limit(), 300);
        limit.receive(&150u16.to_le_bytes()).unwrap();
        assert_eq!(t.board_power_limit(), 150);
    }

    #[test]
    fn current_is_signed() {
        let t = Telemetry::new();
        let p = Capped(0);
        sink(&t, &p, SinkKind::InputCurrent)
            .receive(&(-1234i32).to_le_bytes())
            .unwrap();
        assert_eq!(t.input_current(), -1234);
    }

    #[test]
    fn words_land_in_their_fields() {
        let t = Telemetry::new();
        let p = Capped(0);
        sink(&t, &p, SinkKind::InputPower).receive(&[0x2c, 0x01]).unwrap();
        sink(&t, &p, SinkKind::ThermTripCount).receive(&[3, 0]).unwrap();

        assert_eq!(t.input_power(), 300);
        assert_eq!(t.therm_trip_count(), 3);
    }

    #[cfg(not(feature = "recovery"))]
    #[test]
    fn static_info_needs_a_version() {
        let t = Telemetry::new();
        let p = Capped(0);
        let info = sink(&t, &p, SinkKind::StaticInfo);

        let mut bytes = [0u8; 12];
        bytes[4] = 9;
        assert_eq!(info.receive(&bytes), Err(HandlerError::Rejected));
        assert_eq!(t.static_info(), StaticInfo::default());

        bytes[0] = 1;
        info.receive(&bytes).unwrap();
        assert_eq!(t.static_info().version.get(), 1);
        assert_eq!(t.static_info().bl_version.get(), 9);

        sink(&t, &p, SinkKind::FanRpm).receive(&[0xb8, 0x0b]).unwrap();
        assert_eq!(t.fan_rpm(), 3000);
    }

    #[cfg(feature = "recovery")]
    #[test]
    fn recovery_refuses_full_firmware_pushes() {
        let t = Telemetry::new();
        let p = Capped(0);
        let mut bytes = [0u8; 12];
        bytes[0] = 1;
        assert_eq!(
            sink(&t, &p, SinkKind::StaticInfo).receive(&bytes),
            Err(HandlerError::Rejected)
        );
        assert_eq!(
            sink(&t, &p, SinkKind::FanRpm).receive(&[1, 0]),
            Err(HandlerError::Rejected)
        );
    }
}
