//! Block-device contract for filesystem glue
//!
//! The narrow surface a filesystem layer consumes: status, bring-up,
//! sector transfers and a handful of typed control queries. The SD
//! driver implements it; a filesystem glue layer is the only intended
//! caller and stays outside this crate.

use bitflags::bitflags;

use crate::error::Result;

bitflags! {
    /// Drive status bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DiskStatus: u8 {
        /// Drive has not been initialized
        const NOINIT = 0x01;
        /// No medium in the drive
        const NODISK = 0x02;
        /// Medium is write protected
        const PROTECT = 0x04;
    }
}

/// Control queries a filesystem layer may issue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskIoctl {
    /// Flush any pending writes
    Sync,
    /// Number of addressable sectors
    SectorCount,
    /// Sector size in bytes
    SectorSize,
    /// Erase block size in sectors
    EraseBlockSize,
}

/// Sector-addressed storage exposed to a filesystem
///
/// Multi-sector transfers are part of this contract; policy restrictions
/// on the transfer size belong to the caller.
pub trait BlockDevice {
    /// Current drive status
    fn status(&self) -> DiskStatus;

    /// Bring the drive up and report the resulting status
    fn initialize(&mut self) -> DiskStatus;

    /// Read `count` sectors starting at `sector` into `buf`
    fn read_sectors(&mut self, buf: &mut [u8], sector: u32, count: u32) -> Result<()>;

    /// Write `count` sectors starting at `sector` from `buf`
    fn write_sectors(&mut self, buf: &[u8], sector: u32, count: u32) -> Result<()>;

    /// Answer a control query; the meaning of the returned value depends
    /// on the query
    fn ioctl(&mut self, query: DiskIoctl) -> Result<u32>;
}

/// Timestamp for filesystem metadata.
///
/// There is no RTC on the board; a fixed epoch is returned as a known
/// stand-in, matching what the filesystem glue historically shipped.
pub fn fat_time() -> u32 {
    0
}
