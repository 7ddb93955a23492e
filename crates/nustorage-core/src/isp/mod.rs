//! In-system-programming flash controller
//!
//! This module drives the memory-mapped ISP command interface of the
//! on-chip flash: erase, program, read, checksum, execute-only-memory
//! regions, one-time-programmable rows, user configuration words and the
//! security key engine.
//!
//! All hardware access goes through the [`IspRegisterFile`] capability,
//! so the controller can run against a software model of the register
//! file in tests.

mod controller;
pub mod map;
mod regs;

pub use controller::{AllOnes, BootSelect, BootSource, FlashController};
pub use regs::{
    cmd, IspCtl, IspReg, IspRegisterFile, IspSts, KpKeySts, KpKeyTrg, MpSts, ISPTRG_GO,
    KEY_STATUS_UNLOCKED, KPCNT_KPMAX_MASK, KPCNT_KPMAX_SHIFT, KPKEYCNT_KPKEMAX_MASK,
    KPKEYCNT_KPKEMAX_SHIFT,
};
