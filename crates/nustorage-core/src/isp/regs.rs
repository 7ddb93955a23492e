//! ISP register interface
//!
//! The flash controller never touches memory-mapped hardware directly;
//! it reads and writes named registers through the [`IspRegisterFile`]
//! capability. A target port implements the trait over the real register
//! block, tests implement it over an in-memory model.

use bitflags::bitflags;

/// Named registers of the ISP engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IspReg {
    /// Command register
    Cmd,
    /// Target address register
    Addr,
    /// Data register
    Dat,
    /// Trigger register
    Trg,
    /// Control register
    Ctl,
    /// Status register
    Sts,
    /// Multi-word program data register 0
    MpDat0,
    /// Multi-word program data register 1
    MpDat1,
    /// Multi-word program data register 2
    MpDat2,
    /// Multi-word program data register 3
    MpDat3,
    /// Multi-word program status register
    MpSts,
    /// Data flash base address register
    Dfba,
    /// XOM active-summary status register
    XomSts,
    /// XOM region 0 descriptor status
    Xom0Sts,
    /// XOM region 1 descriptor status
    Xom1Sts,
    /// XOM region 2 descriptor status
    Xom2Sts,
    /// XOM region 3 descriptor status
    Xom3Sts,
    /// Security key word register 0
    KpKey0,
    /// Security key word register 1
    KpKey1,
    /// Security key word register 2
    KpKey2,
    /// Security key comparison trigger register
    KpKeyTrg,
    /// Security key status register
    KpKeySts,
    /// Power-on key mismatch counter register
    KpCnt,
    /// Total key mismatch counter register
    KpKeyCnt,
}

impl IspReg {
    /// Descriptor status register for XOM region `region`.
    ///
    /// Returns `None` when the index is out of range; this is the single
    /// place the 0..=3 bound is encoded.
    pub fn xom_status(region: u32) -> Option<IspReg> {
        const TABLE: [IspReg; 4] = [
            IspReg::Xom0Sts,
            IspReg::Xom1Sts,
            IspReg::Xom2Sts,
            IspReg::Xom3Sts,
        ];
        TABLE.get(region as usize).copied()
    }
}

/// Hardware register access capability
///
/// Reading takes `&mut self` because register reads may have side
/// effects on the implementing hardware or model.
pub trait IspRegisterFile {
    /// Read a named register
    fn read(&mut self, reg: IspReg) -> u32;

    /// Write a named register
    fn write(&mut self, reg: IspReg, value: u32);
}

impl<T: IspRegisterFile + ?Sized> IspRegisterFile for &mut T {
    fn read(&mut self, reg: IspReg) -> u32 {
        (**self).read(reg)
    }

    fn write(&mut self, reg: IspReg, value: u32) {
        (**self).write(reg, value)
    }
}

bitflags! {
    /// Control register bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct IspCtl: u32 {
        /// ISP function enable
        const ISPEN = 1 << 0;
        /// Boot select (set: LDROM, clear: APROM)
        const BS = 1 << 1;
        /// APROM update enable
        const APUEN = 1 << 3;
        /// User configuration update enable
        const CFGUEN = 1 << 4;
        /// LDROM update enable
        const LDUEN = 1 << 5;
        /// ISP fail flag (write 1 to clear)
        const ISPFF = 1 << 6;
        /// Currently booted from the boot loader
        const BL = 1 << 16;
    }
}

bitflags! {
    /// Status register bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct IspSts: u32 {
        /// ISP engine busy
        const ISPBUSY = 1 << 0;
        /// ISP fail flag (write 1 to clear)
        const ISPFF = 1 << 6;
        /// All-ones verdict latch (write 1 to clear)
        const ALLONE = 1 << 7;
    }
}

bitflags! {
    /// Multi-word program status register bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MpSts: u32 {
        /// Multi-word program engine busy
        const MPBUSY = 1 << 0;
        /// Program cycle in progress
        const PPGO = 1 << 1;
        /// ISP fail flag mirror
        const ISPFF = 1 << 2;
        /// Data register 0 holds unconsumed data
        const D0 = 1 << 4;
        /// Data register 1 holds unconsumed data
        const D1 = 1 << 5;
        /// Data register 2 holds unconsumed data
        const D2 = 1 << 6;
        /// Data register 3 holds unconsumed data
        const D3 = 1 << 7;
    }
}

bitflags! {
    /// Security key status register bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct KpKeySts: u32 {
        /// Key engine busy
        const KEYBUSY = 1 << 0;
        /// Key is locked in
        const KEYLOCK = 1 << 1;
        /// Last comparison matched
        const KEYMATCH = 1 << 2;
        /// Mismatch limit reached; comparisons are refused
        const FORBID = 1 << 3;
        /// A key has been programmed
        const KEYFLAG = 1 << 4;
        /// CONFIG region is key-write-protected
        const CFGFLAG = 1 << 5;
        /// SPROM region is key-write-protected
        const SPFLAG = 1 << 6;
    }
}

bitflags! {
    /// Security key trigger register bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct KpKeyTrg: u32 {
        /// Start key comparison
        const KPKEYGO = 1 << 0;
        /// Count this comparison against the mismatch limits
        const TCEN = 1 << 1;
    }
}

/// Trigger-register GO bit; also reads back as the busy indication
pub const ISPTRG_GO: u32 = 0x1;

/// Key status value of a part with no key locked in and the engine idle
pub const KEY_STATUS_UNLOCKED: u32 = 0x200;

/// Power-on mismatch limit field mask in the power-on counter register
pub const KPCNT_KPMAX_MASK: u32 = 0x0F00;
/// Power-on mismatch limit field shift
pub const KPCNT_KPMAX_SHIFT: u32 = 8;
/// Total mismatch limit field mask in the total counter register
pub const KPKEYCNT_KPKEMAX_MASK: u32 = 0x3F00;
/// Total mismatch limit field shift
pub const KPKEYCNT_KPKEMAX_SHIFT: u32 = 8;

/// ISP command codes
pub mod cmd {
    /// Read one word
    pub const READ: u32 = 0x00;
    /// Read the 96-bit unique ID
    pub const READ_UID: u32 = 0x04;
    /// Fetch the latched all-ones verdict
    pub const READ_ALL_ONE: u32 = 0x08;
    /// Read the company ID
    pub const READ_CID: u32 = 0x0B;
    /// Read the device ID
    pub const READ_DID: u32 = 0x0C;
    /// Fetch the latched checksum result
    pub const READ_CKS: u32 = 0x0D;
    /// Program one word
    pub const PROGRAM: u32 = 0x21;
    /// Erase one page
    pub const PAGE_ERASE: u32 = 0x22;
    /// Erase one bank
    pub const BANK_ERASE: u32 = 0x23;
    /// Erase one block (four pages)
    pub const BLOCK_ERASE: u32 = 0x25;
    /// Multi-word program burst
    pub const PROGRAM_MUL: u32 = 0x27;
    /// Run the all-ones scan
    pub const RUN_ALL_ONE: u32 = 0x28;
    /// Run the checksum calculation
    pub const RUN_CKS: u32 = 0x2D;
    /// Read a double word
    pub const READ_64: u32 = 0x40;
    /// Program a double word
    pub const PROGRAM_64: u32 = 0x61;
}
