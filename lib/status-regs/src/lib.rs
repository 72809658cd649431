// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Status and scratch registers of the control core's reset unit.
//!
//! The host and the sibling controllers learn what this controller is doing
//! almost entirely through a handful of scratch registers: a post code that
//! tracks progress, boot status bits, and the pointer to the command queue
//! layout.  This crate names those registers and provides the
//! [`RegisterIo`] seam through which the rest of the firmware touches them,
//! so the messaging crates can be exercised on the host against
//! [`shadow::ShadowRegisters`] instead of real MMIO.
//!
//! This crate works on both the host and embedded system.

#![cfg_attr(not(test), no_std)]

use bitfield::bitfield;

#[cfg(any(test, feature = "shadow"))]
pub mod shadow;

pub const RESET_UNIT_SCRATCH_BASE: u32 = 0x8003_0060;
pub const RESET_UNIT_SCRATCH_RAM_BASE: u32 = 0x8003_0400;

/// Misc control register of the reset unit; carries the doorbell trigger.
pub const ARC_MISC_CNTL_REG: u32 = 0x8003_0100;

/// Address of `SCRATCH_n`.
pub const fn scratch_reg(n: u32) -> u32 {
    RESET_UNIT_SCRATCH_BASE + 4 * n
}

/// Address of `SCRATCH_RAM_n`.
pub const fn scratch_ram_reg(n: u32) -> u32 {
    RESET_UNIT_SCRATCH_RAM_BASE + 4 * n
}

pub const POST_CODE_REG: u32 = scratch_reg(0);

pub const FW_VERSION_REG: u32 = scratch_ram_reg(0);
// SCRATCH_RAM_1 belongs to the boot ROM's security handshake.
pub const BOOT_STATUS0_REG: u32 = scratch_ram_reg(2);
pub const BOOT_STATUS1_REG: u32 = scratch_ram_reg(3);
pub const ERROR_STATUS0_REG: u32 = scratch_ram_reg(4);
pub const ERROR_STATUS1_REG: u32 = scratch_ram_reg(5);
pub const MSG_Q_STATUS_REG: u32 = scratch_ram_reg(8);
pub const MSG_Q_ERR_FLAGS_REG: u32 = scratch_ram_reg(9);
pub const MSG_Q_INFO_REG: u32 = scratch_ram_reg(11);
pub const FW_SCRATCH_REG: u32 = scratch_ram_reg(63);

/// Word-sized register access.
///
/// Implementations must perform exactly one access per call; the registers
/// behind this are observed by other agents (the host, the boot ROM, the
/// management controllers).
pub trait RegisterIo {
    fn read(&self, addr: u32) -> u32;
    fn write(&self, addr: u32, value: u32);

    /// Read-modify-write of a single register.
    fn modify(&self, addr: u32, f: impl FnOnce(u32) -> u32)
    where
        Self: Sized,
    {
        let v = self.read(addr);
        self.write(addr, f(v));
    }
}

impl<R: RegisterIo> RegisterIo for &R {
    fn read(&self, addr: u32) -> u32 {
        (**self).read(addr)
    }

    fn write(&self, addr: u32, value: u32) {
        (**self).write(addr, value)
    }
}

/// Direct memory-mapped access to the control core's register space.
pub struct Mmio {
    _private: (),
}

impl Mmio {
    /// # Safety
    ///
    /// Every address subsequently handed to this `Mmio` must be a valid,
    /// word-aligned device register on the running part.  This is only true
    /// on the control core itself.
    pub const unsafe fn new() -> Self {
        Self { _private: () }
    }
}

impl RegisterIo for Mmio {
    fn read(&self, addr: u32) -> u32 {
        // Safety: guaranteed by the contract of `Mmio::new`.
        unsafe { core::ptr::read_volatile(addr as usize as *const u32) }
    }

    fn write(&self, addr: u32, value: u32) {
        // Safety: guaranteed by the contract of `Mmio::new`.
        unsafe { core::ptr::write_volatile(addr as usize as *mut u32, value) }
    }
}

bitfield! {
    /// `BOOT_STATUS0`, polled by the host during bring-up.
    #[derive(Copy, Clone, Eq, PartialEq)]
    pub struct BootStatus0(u32);
    pub msg_queue_ready, set_msg_queue_ready: 0;
    pub u8, hw_init_status, set_hw_init_status: 2, 1;
    pub u8, fw_id, set_fw_id: 6, 3;
}

bitfield! {
    /// `ARC_MISC_CNTL`; the host rings the command queue doorbell by setting
    /// a bit in `irq0_trig`.
    #[derive(Copy, Clone, Eq, PartialEq)]
    pub struct MiscCntl(u32);
    pub u8, run, set_run: 3, 0;
    pub u8, halt, set_halt: 7, 4;
    pub soft_reset, set_soft_reset: 12;
    pub dbg_cache_rst, set_dbg_cache_rst: 13;
    pub mbus_clkdis, set_mbus_clkdis: 14;
    pub dbus_clkdis, set_dbus_clkdis: 15;
    pub u8, irq0_trig, set_irq0_trig: 19, 16;
    pub self_reset, set_self_reset: 31;
}

/// Marks the command queue as open for business in `BOOT_STATUS0`.
pub fn set_msg_queue_ready(regs: &impl RegisterIo) {
    regs.modify(BOOT_STATUS0_REG, |v| {
        let mut status = BootStatus0(v);
        status.set_msg_queue_ready(true);
        status.0
    });
}

/// Clears the command queue doorbell.
pub fn clear_doorbell(regs: &impl RegisterIo) {
    regs.modify(ARC_MISC_CNTL_REG, |v| {
        let mut cntl = MiscCntl(v);
        cntl.set_irq0_trig(0);
        cntl.0
    });
}

pub const POST_CODE_PREFIX: u32 = 0xc0de;

/// Firmware that is reporting a post code.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PostSource {
    Cmfw = 0,
}

/// Progress markers written to [`POST_CODE_REG`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PostCode {
    MsgHandleStart,
    /// Draining the given queue; queues 0 through 13 have their own code.
    MsgQueue(u8),
    MsgHandleDone,
}

impl PostCode {
    pub fn value(self) -> u16 {
        match self {
            PostCode::MsgHandleStart => 0x30,
            PostCode::MsgQueue(i) => 0x31 + u16::from(i.min(13)),
            PostCode::MsgHandleDone => 0x3f,
        }
    }
}

/// Encodes a post code as it appears in [`POST_CODE_REG`].
pub fn post_code_word(src: PostSource, code: PostCode) -> u32 {
    (POST_CODE_PREFIX << 16)
        | ((src as u32 & 0x3) << 14)
        | (u32::from(code.value()) & 0x3fff)
}

pub fn set_post_code(regs: &impl RegisterIo, src: PostSource, code: PostCode) {
    regs.write(POST_CODE_REG, post_code_word(src, code));
}

#[cfg(test)]
mod tests {
    use super::shadow::ShadowRegisters;
    use super::*;

    #[test]
    fn register_addresses() {
        assert_eq!(POST_CODE_REG, 0x8003_0060);
        assert_eq!(BOOT_STATUS0_REG, 0x8003_0408);
        assert_eq!(MSG_Q_INFO_REG, 0x8003_042c);
        assert_eq!(FW_SCRATCH_REG, 0x8003_04fc);
    }

    #[test]
    fn post_code_encoding() {
        assert_eq!(
            post_code_word(PostSource::Cmfw, PostCode::MsgHandleStart),
            0xc0de_0030
        );
        assert_eq!(
            post_code_word(PostSource::Cmfw, PostCode::MsgQueue(2)),
            0xc0de_0033
        );
        assert_eq!(
            post_code_word(PostSource::Cmfw, PostCode::MsgHandleDone),
            0xc0de_003f
        );
    }

    #[test]
    fn doorbell_clear_only_touches_trigger() {
        let regs = ShadowRegisters::new();
        regs.write(ARC_MISC_CNTL_REG, 0x8005_1001);

        clear_doorbell(&regs);

        assert_eq!(regs.read(ARC_MISC_CNTL_REG), 0x8000_1001);
    }

    #[test]
    fn queue_ready_preserves_other_bits() {
        let regs = ShadowRegisters::new();
        regs.write(BOOT_STATUS0_REG, 0b110_0110);

        set_msg_queue_ready(&regs);

        let status = BootStatus0(regs.read(BOOT_STATUS0_REG));
        assert!(status.msg_queue_ready());
        assert_eq!(status.hw_init_status(), 0b11);
        assert_eq!(status.fw_id(), 0b1100);
    }
}
