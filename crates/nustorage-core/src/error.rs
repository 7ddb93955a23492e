//! Error types for nustorage-core
//!
//! This module provides a no_std compatible error type shared by both
//! drivers. Every public operation maps internal hardware faults onto
//! exactly one variant; raw fault bits never reach the caller.

use core::fmt;

/// Core error type - no_std compatible, Copy for efficiency
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    // Timeouts
    /// A bounded busy poll exhausted its iteration budget
    Timeout,
    /// Multi-word program stalled mid-burst; `programmed` bytes were
    /// acknowledged before the stall
    BurstTimeout {
        /// Bytes confirmed programmed before the poll budget ran out
        programmed: u32,
    },

    // Engine faults
    /// The ISP engine raised its fail flag (cleared before returning)
    ProgramFault,
    /// A word read back differently than it was programmed
    VerifyFailed,
    /// The all-ones query finished without a recognizable verdict
    CommandFailed,

    // Parameter errors
    /// Address is misaligned or outside the programmable range
    InvalidAddress,
    /// Address or byte count violates the 512-byte alignment rule
    InvalidAlignment,
    /// XOM region index is not 0..=3
    InvalidXomRegion,
    /// OTP row index is not 0..=255
    InvalidOtpRow,
    /// Provided buffer is too small for the requested sector count
    BufferTooSmall,

    // State conflicts
    /// XOM region is already active
    XomActive,
    /// XOM region is not active
    XomInactive,
    /// A security key is already locked in and cannot be overwritten
    KeyLocked,
    /// No security key is locked in; comparison is not required
    KeyNotLocked,
    /// Operation attempted before a successful card initialization
    NotInitialized,

    // Security key programming/verification
    /// Erasing a security key page failed
    KeyEraseFailed,
    /// The key lock bit did not stick after programming
    KeyLockFailed,
    /// The CONFIG write-protect flag read back differently than requested
    ConfigLockFailed,
    /// The SPROM write-protect flag read back differently than requested
    SpromLockFailed,
    /// The power-on mismatch limit read back differently than programmed
    PowerOnLimitMismatch,
    /// The total mismatch limit read back differently than programmed
    TotalLimitMismatch,
    /// Key comparison budget exhausted; further comparisons are refused
    Forbidden,
    /// The supplied key does not match the stored key
    KeyMismatch,
    /// The key matched but the lock did not release
    UnlockFailed,

    // SD protocol errors
    /// The card did not release the bus within the ready poll ceiling
    CardNotReady,
    /// The card rejected a command; carries the command index and R1 byte
    CommandRejected {
        /// Command index (without the start bits)
        cmd: u8,
        /// R1 response byte (0xFF when no response arrived at all)
        r1: u8,
    },
    /// The data start token never arrived within the retry ceiling
    DataStartTimeout,
    /// The card's data response rejected a written block
    DataRejected {
        /// Raw data response byte
        response: u8,
    },
    /// The initialization handshake could not identify the card
    CardNotRecognized,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "operation timed out"),
            Self::BurstTimeout { programmed } => {
                write!(
                    f,
                    "multi-word program stalled after {} bytes",
                    programmed
                )
            }
            Self::ProgramFault => write!(f, "program or erase failed"),
            Self::VerifyFailed => write!(f, "verify failed: data mismatch"),
            Self::CommandFailed => write!(f, "command finished without a verdict"),
            Self::InvalidAddress => write!(f, "invalid address"),
            Self::InvalidAlignment => write!(f, "invalid alignment"),
            Self::InvalidXomRegion => write!(f, "invalid XOM region number"),
            Self::InvalidOtpRow => write!(f, "invalid OTP row number"),
            Self::BufferTooSmall => write!(f, "buffer too small"),
            Self::XomActive => write!(f, "XOM region is already active"),
            Self::XomInactive => write!(f, "XOM region is not active"),
            Self::KeyLocked => write!(f, "security key is locked"),
            Self::KeyNotLocked => write!(f, "no security key is locked"),
            Self::NotInitialized => write!(f, "card is not initialized"),
            Self::KeyEraseFailed => write!(f, "security key page erase failed"),
            Self::KeyLockFailed => write!(f, "security key lock failed"),
            Self::ConfigLockFailed => write!(f, "CONFIG lock flag mismatch"),
            Self::SpromLockFailed => write!(f, "SPROM lock flag mismatch"),
            Self::PowerOnLimitMismatch => {
                write!(f, "power-on mismatch limit readback differs")
            }
            Self::TotalLimitMismatch => {
                write!(f, "total mismatch limit readback differs")
            }
            Self::Forbidden => write!(f, "key comparison budget exhausted"),
            Self::KeyMismatch => write!(f, "security key mismatch"),
            Self::UnlockFailed => write!(f, "key matched but unlock failed"),
            Self::CardNotReady => write!(f, "card not ready"),
            Self::CommandRejected { cmd, r1 } => {
                write!(f, "CMD{} rejected with R1 {:#04x}", cmd, r1)
            }
            Self::DataStartTimeout => write!(f, "data start token never arrived"),
            Self::DataRejected { response } => {
                write!(f, "data block rejected with response {:#04x}", response)
            }
            Self::CardNotRecognized => write!(f, "card type not recognized"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

/// Result type alias using the core Error type
pub type Result<T> = core::result::Result<T, Error>;
