//! Flash memory map and timing constants
//!
//! Region base addresses are fixed hardware constants of the target chip
//! family. Timeouts are busy-poll iteration budgets, not wall-clock
//! times; no OS timer is assumed.

/// APROM (main application flash) base address
pub const APROM_BASE: u32 = 0x0000_0000;
/// First address past the end of APROM
pub const APROM_END: u32 = 0x0008_0000;
/// LDROM (loader flash) base address
pub const LDROM_BASE: u32 = 0x0010_0000;
/// First address past the end of LDROM
pub const LDROM_END: u32 = 0x0010_1000;
/// SPROM (secure program flash) base address
pub const SPROM_BASE: u32 = 0x0020_0000;
/// User configuration region base address
pub const CONFIG_BASE: u32 = 0x0030_0000;
/// XOM region descriptor table base address
pub const XOM_BASE: u32 = 0x0030_0040;
/// Security key page base address
pub const KPROM_BASE: u32 = 0x0030_1000;
/// OTP row array base address
pub const OTP_BASE: u32 = 0x0031_0000;
/// Offset from [`OTP_BASE`] of the per-row lock words
pub const OTP_LOCK_OFFSET: u32 = 0x800;

/// Flash page size in bytes
pub const PAGE_SIZE: u32 = 0x1000;
/// Pages covered by one block erase
pub const BLOCK_PAGES: u32 = 4;
/// Number of XOM regions
pub const XOM_REGIONS: u32 = 4;
/// Number of OTP rows
pub const OTP_ROWS: u32 = 256;
/// Number of user configuration words
pub const CONFIG_WORDS: usize = 2;
/// Bytes consumed by one multi-word program burst
pub const MULTI_WORD_PROG_LEN: usize = 512;

/// Authorization key written to the data register for SPROM and XOM
/// page erases
pub const ERASE_KEY: u32 = 0x0055_AA03;
/// Erased pattern of the reserved third configuration word
pub const CONFIG_RESERVED_ERASED: u32 = 0xFFFF_5A5A;

/// All-ones query verdict: the scanned area is fully erased
pub const ALLONE_YES: u32 = 0xA11F_FFFF;
/// All-ones query verdict: the scanned area holds programmed bits
pub const ALLONE_NOT: u32 = 0xA110_0000;

/// Poll budget for read-class commands (shortest)
pub const TIMEOUT_READ: u32 = 0x8000;
/// Poll budget for word and double-word program commands
pub const TIMEOUT_WRITE: u32 = 0x2_0000;
/// Poll budget for page and block erase commands
pub const TIMEOUT_ERASE: u32 = 0x20_0000;
/// Poll budget for checksum commands
pub const TIMEOUT_CHKSUM: u32 = 0x40_0000;
/// Poll budget for all-ones scan commands
pub const TIMEOUT_CHKALLONE: u32 = 0x40_0000;
/// Poll budget for bank erase (longest-running command)
pub const TIMEOUT_BANK_ERASE: u32 = 0x80_0000;
