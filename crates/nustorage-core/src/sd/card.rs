//! SD/MMC card driver
//!
//! Command framing: 6 bytes (index | 0x40, four big-endian argument
//! bytes, CRC), then the R1 response is polled for a bounded number of
//! bytes. Chip select brackets exactly one command-response-data
//! exchange; every poll has a fixed retry ceiling so no call can hang.

use log::debug;

use crate::disk::{BlockDevice, DiskIoctl, DiskStatus};
use crate::error::{Error, Result};

use super::bus::{BusSpeed, SdBus};
use super::cmd;

/// Logical sector size in bytes
pub const SECTOR_SIZE: usize = 512;

/// Card variant discovered during initialization
///
/// Fixed after a successful [`SdCard::initialize`]; determines whether
/// sector operations address by block index (high capacity) or by byte
/// offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CardType {
    /// MMC card (CMD1 initialization)
    Mmc,
    /// SD specification v1
    SdV1,
    /// SD specification v2, standard capacity
    SdV2,
    /// SD specification v2, high capacity (block addressed)
    SdV2Hc,
    /// Not initialized or not recognized
    #[default]
    Unknown,
}

/// Driver for an SPI-attached SD/MMC card
pub struct SdCard<B> {
    bus: B,
    card_type: CardType,
}

impl<B: SdBus> SdCard<B> {
    /// Create a driver over the given bus; the card starts unidentified
    pub fn new(bus: B) -> Self {
        Self {
            bus,
            card_type: CardType::Unknown,
        }
    }

    /// Consume the driver and return the bus
    pub fn into_inner(self) -> B {
        self.bus
    }

    /// Card variant discovered by [`SdCard::initialize`]
    pub fn card_type(&self) -> CardType {
        self.card_type
    }

    /// Clock 0xFF until the card signals ready (returns 0xFF) or the
    /// poll ceiling is reached
    fn wait_ready(&mut self) -> Result<()> {
        for _ in 0..cmd::READY_RETRIES {
            if self.bus.transfer(0xFF) == 0xFF {
                return Ok(());
            }
        }
        Err(Error::CardNotReady)
    }

    /// Release chip select and clock one byte so the card frees the
    /// data-out line
    fn deselect(&mut self) {
        self.bus.deselect();
        self.bus.transfer(0xFF);
    }

    /// Assert chip select and wait for the card to be ready
    fn select(&mut self) -> Result<()> {
        self.bus.select();
        if self.wait_ready().is_ok() {
            Ok(())
        } else {
            self.deselect();
            Err(Error::CardNotReady)
        }
    }

    /// Send a command frame and poll for its R1 response.
    ///
    /// Returns the raw R1 byte; 0xFF means no response arrived within
    /// the ceiling. Fails only when the card never released the bus.
    fn send_cmd(&mut self, index: u8, arg: u32, crc: u8) -> Result<u8> {
        self.deselect();
        self.select()?;

        self.bus.transfer(index | 0x40);
        self.bus.transfer((arg >> 24) as u8);
        self.bus.transfer((arg >> 16) as u8);
        self.bus.transfer((arg >> 8) as u8);
        self.bus.transfer(arg as u8);
        self.bus.transfer(crc);

        if index == cmd::STOP_TRANSMISSION {
            // One stuff byte before the response when stopping a read.
            self.bus.transfer(0xFF);
        }

        let mut r1 = 0xFF;
        for _ in 0..=cmd::R1_RETRIES {
            r1 = self.bus.transfer(0xFF);
            if r1 & 0x80 == 0 {
                break;
            }
        }
        Ok(r1)
    }

    /// [`SdCard::send_cmd`] for the init handshake, where an unselectable
    /// card reads as an absent response rather than an error
    fn try_cmd(&mut self, index: u8, arg: u32, crc: u8) -> u8 {
        self.send_cmd(index, arg, crc).unwrap_or(0xFF)
    }

    /// Receive one data block into `buf`: wait for the start token,
    /// clock the payload, discard the trailing CRC
    fn recv_block(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut seen = false;
        for _ in 0..cmd::TOKEN_RETRIES {
            if self.bus.transfer(0xFF) == cmd::DATA_START_TOKEN {
                seen = true;
                break;
            }
        }
        if !seen {
            return Err(Error::DataStartTimeout);
        }

        for byte in buf.iter_mut() {
            *byte = self.bus.transfer(0xFF);
        }
        self.bus.transfer(0xFF);
        self.bus.transfer(0xFF);
        Ok(())
    }

    /// Send one data block under `token`; for the stop token only the
    /// token itself is clocked out
    fn send_block(&mut self, buf: &[u8], token: u8) -> Result<()> {
        self.wait_ready()?;

        self.bus.transfer(token);
        if token != cmd::STOP_TRAN_TOKEN {
            for &byte in buf {
                self.bus.transfer(byte);
            }
            self.bus.transfer(0xFF);
            self.bus.transfer(0xFF);
            let response = self.bus.transfer(0xFF);
            if response & cmd::DATA_RESPONSE_MASK != cmd::DATA_ACCEPTED {
                return Err(Error::DataRejected { response });
            }
        }
        Ok(())
    }

    /// Run the initialization handshake and identify the card.
    ///
    /// Leaves the bus at transfer speed whatever the outcome. On success
    /// the discovered [`CardType`] fixes the address encoding of all
    /// later sector operations.
    pub fn initialize(&mut self) -> Result<CardType> {
        self.bus.set_speed(BusSpeed::Low);

        // At least 74 clocks with the card deselected.
        for _ in 0..10 {
            self.bus.transfer(0xFF);
        }

        let mut r1 = 0xFF;
        for _ in 0..=cmd::IDLE_RETRIES {
            r1 = self.try_cmd(cmd::GO_IDLE_STATE, 0, cmd::CMD0_CRC);
            if r1 == cmd::R1_IDLE {
                break;
            }
        }

        let mut card_type = CardType::Unknown;
        if r1 == cmd::R1_IDLE {
            if self.try_cmd(cmd::SEND_IF_COND, 0x1AA, cmd::CMD8_CRC) == cmd::R1_IDLE {
                // R7 trailer: voltage acceptance and the echoed pattern.
                let mut trailer = [0u8; 4];
                for byte in trailer.iter_mut() {
                    *byte = self.bus.transfer(0xFF);
                }
                if trailer[2] == 0x01 && trailer[3] == 0xAA {
                    let mut retry = cmd::OP_COND_RETRIES;
                    loop {
                        self.try_cmd(cmd::APP_CMD, 0, cmd::DUMMY_CRC);
                        r1 = self.try_cmd(cmd::SD_SEND_OP_COND, cmd::ACMD41_HCS, cmd::DUMMY_CRC);
                        if r1 == 0 || retry == 0 {
                            break;
                        }
                        retry -= 1;
                    }
                    if r1 == 0 && self.try_cmd(cmd::READ_OCR, 0, cmd::DUMMY_CRC) == 0 {
                        let mut ocr = [0u8; 4];
                        for byte in ocr.iter_mut() {
                            *byte = self.bus.transfer(0xFF);
                        }
                        card_type = if ocr[0] & cmd::OCR_CCS != 0 {
                            CardType::SdV2Hc
                        } else {
                            CardType::SdV2
                        };
                    }
                }
            } else {
                // Legacy path: SD v1 if the card answers ACMD41 at all,
                // MMC otherwise.
                self.try_cmd(cmd::APP_CMD, 0, cmd::DUMMY_CRC);
                r1 = self.try_cmd(cmd::SD_SEND_OP_COND, 0, cmd::DUMMY_CRC);
                let mut retry = cmd::OP_COND_RETRIES;
                if r1 <= 1 {
                    card_type = CardType::SdV1;
                    loop {
                        self.try_cmd(cmd::APP_CMD, 0, cmd::DUMMY_CRC);
                        r1 = self.try_cmd(cmd::SD_SEND_OP_COND, 0, cmd::DUMMY_CRC);
                        if r1 == 0 || retry == 0 {
                            break;
                        }
                        retry -= 1;
                    }
                } else {
                    card_type = CardType::Mmc;
                    loop {
                        r1 = self.try_cmd(cmd::SEND_OP_COND, 0, cmd::DUMMY_CRC);
                        if r1 == 0 || retry == 0 {
                            break;
                        }
                        retry -= 1;
                    }
                }
                // Legacy cards need the block length pinned to one sector.
                if r1 != 0 || self.try_cmd(cmd::SET_BLOCKLEN, SECTOR_SIZE as u32, cmd::DUMMY_CRC) != 0
                {
                    card_type = CardType::Unknown;
                }
            }
        }

        self.deselect();
        self.bus.set_speed(BusSpeed::High);
        self.card_type = card_type;

        match card_type {
            CardType::Unknown => Err(Error::CardNotRecognized),
            identified => {
                debug!("card identified: {:?}", identified);
                Ok(identified)
            }
        }
    }

    /// Encode a sector index per the card's addressing convention
    fn sector_arg(&self, sector: u32) -> u32 {
        if self.card_type == CardType::SdV2Hc {
            sector
        } else {
            sector << 9
        }
    }

    /// Read `count` sectors starting at `sector` into `buf`
    pub fn read_sectors(&mut self, buf: &mut [u8], sector: u32, count: u32) -> Result<()> {
        let res = self.read_sectors_inner(buf, sector, count);
        self.deselect();
        res
    }

    fn read_sectors_inner(&mut self, buf: &mut [u8], sector: u32, count: u32) -> Result<()> {
        if self.card_type == CardType::Unknown {
            return Err(Error::NotInitialized);
        }
        let needed = count as usize * SECTOR_SIZE;
        if buf.len() < needed {
            return Err(Error::BufferTooSmall);
        }
        if count == 0 {
            return Ok(());
        }

        let arg = self.sector_arg(sector);
        if count == 1 {
            let r1 = self.send_cmd(cmd::READ_SINGLE_BLOCK, arg, cmd::DUMMY_CRC)?;
            if r1 != 0 {
                return Err(Error::CommandRejected {
                    cmd: cmd::READ_SINGLE_BLOCK,
                    r1,
                });
            }
            return self.recv_block(&mut buf[..SECTOR_SIZE]);
        }

        let r1 = self.send_cmd(cmd::READ_MULTIPLE_BLOCK, arg, cmd::DUMMY_CRC)?;
        if r1 != 0 {
            return Err(Error::CommandRejected {
                cmd: cmd::READ_MULTIPLE_BLOCK,
                r1,
            });
        }
        let mut res = Ok(());
        for chunk in buf[..needed].chunks_exact_mut(SECTOR_SIZE) {
            if let Err(e) = self.recv_block(chunk) {
                res = Err(e);
                break;
            }
        }
        // Stop the transfer whatever the data outcome.
        let _ = self.send_cmd(cmd::STOP_TRANSMISSION, 0, cmd::DUMMY_CRC);
        res
    }

    /// Write `count` sectors starting at `sector` from `buf`
    pub fn write_sectors(&mut self, buf: &[u8], sector: u32, count: u32) -> Result<()> {
        let res = self.write_sectors_inner(buf, sector, count);
        self.deselect();
        res
    }

    fn write_sectors_inner(&mut self, buf: &[u8], sector: u32, count: u32) -> Result<()> {
        if self.card_type == CardType::Unknown {
            return Err(Error::NotInitialized);
        }
        let needed = count as usize * SECTOR_SIZE;
        if buf.len() < needed {
            return Err(Error::BufferTooSmall);
        }
        if count == 0 {
            return Ok(());
        }

        let arg = self.sector_arg(sector);
        if count == 1 {
            let r1 = self.send_cmd(cmd::WRITE_BLOCK, arg, cmd::DUMMY_CRC)?;
            if r1 != 0 {
                return Err(Error::CommandRejected {
                    cmd: cmd::WRITE_BLOCK,
                    r1,
                });
            }
            return self.send_block(&buf[..SECTOR_SIZE], cmd::DATA_START_TOKEN);
        }

        if self.card_type != CardType::Mmc {
            // Pre-erase hint; best effort, the card may ignore it.
            self.try_cmd(cmd::APP_CMD, 0, cmd::DUMMY_CRC);
            self.try_cmd(cmd::SET_WR_BLK_ERASE_COUNT, count, cmd::DUMMY_CRC);
        }

        let r1 = self.send_cmd(cmd::WRITE_MULTIPLE_BLOCK, arg, cmd::DUMMY_CRC)?;
        if r1 != 0 {
            return Err(Error::CommandRejected {
                cmd: cmd::WRITE_MULTIPLE_BLOCK,
                r1,
            });
        }
        let mut res = Ok(());
        for chunk in buf[..needed].chunks_exact(SECTOR_SIZE) {
            if let Err(e) = self.send_block(chunk, cmd::MULTI_WRITE_TOKEN) {
                res = Err(e);
                break;
            }
        }
        // Terminate the transfer whatever the data outcome.
        let stop = self.send_block(&[], cmd::STOP_TRAN_TOKEN);
        res.and(stop)
    }

    /// Fetch the 16-byte card-specific data register
    pub fn read_csd(&mut self) -> Result<[u8; 16]> {
        let res = self.read_register_16(cmd::SEND_CSD);
        self.deselect();
        res
    }

    /// Fetch the 16-byte card identification register
    pub fn read_cid(&mut self) -> Result<[u8; 16]> {
        let res = self.read_register_16(cmd::SEND_CID);
        self.deselect();
        res
    }

    fn read_register_16(&mut self, index: u8) -> Result<[u8; 16]> {
        let r1 = self.send_cmd(index, 0, cmd::DUMMY_CRC)?;
        if r1 != 0 {
            return Err(Error::CommandRejected { cmd: index, r1 });
        }
        let mut reg = [0u8; 16];
        self.recv_block(&mut reg)?;
        Ok(reg)
    }

    /// Number of addressable sectors, decoded from the CSD register
    pub fn sector_count(&mut self) -> Result<u32> {
        let csd = self.read_csd()?;
        let sectors = decode_sector_count(&csd);
        debug!("CSD reports {} sectors", sectors);
        Ok(sectors)
    }

    /// Turn CRC checking off explicitly (it is off by default in SPI
    /// mode; some cards want it stated)
    pub fn crc_off(&mut self) -> Result<()> {
        let r1 = self.send_cmd(cmd::CRC_ON_OFF, 0, cmd::CRC_OFF_CRC)?;
        self.deselect();
        if r1 != 0 {
            return Err(Error::CommandRejected {
                cmd: cmd::CRC_ON_OFF,
                r1,
            });
        }
        Ok(())
    }
}

/// Decode the sector count from a raw CSD register.
///
/// Dispatches on the CSD structure version in byte 0: v2 carries the
/// count directly in 1024-sector units, v1 splits it across C_SIZE and
/// C_SIZE_MULT fields.
pub fn decode_sector_count(csd: &[u8; 16]) -> u32 {
    if csd[0] & 0xC0 == 0x40 {
        let c_size = csd[9] as u32 + ((csd[8] as u32) << 8) + 1;
        c_size << 10
    } else {
        let n = (csd[5] & 15) as u32 + ((csd[10] & 128) >> 7) as u32 + (((csd[9] & 3) as u32) << 1) + 2;
        let c_size = (csd[8] >> 6) as u32 + ((csd[7] as u32) << 2) + (((csd[6] & 3) as u32) << 10) + 1;
        c_size << (n - 9)
    }
}

impl<B: SdBus> BlockDevice for SdCard<B> {
    fn status(&self) -> DiskStatus {
        if self.card_type == CardType::Unknown {
            DiskStatus::NOINIT
        } else {
            DiskStatus::empty()
        }
    }

    fn initialize(&mut self) -> DiskStatus {
        match SdCard::initialize(self) {
            Ok(_) => DiskStatus::empty(),
            Err(_) => DiskStatus::NOINIT,
        }
    }

    fn read_sectors(&mut self, buf: &mut [u8], sector: u32, count: u32) -> Result<()> {
        SdCard::read_sectors(self, buf, sector, count)
    }

    fn write_sectors(&mut self, buf: &[u8], sector: u32, count: u32) -> Result<()> {
        SdCard::write_sectors(self, buf, sector, count)
    }

    fn ioctl(&mut self, query: DiskIoctl) -> Result<u32> {
        match query {
            DiskIoctl::Sync => Ok(0),
            DiskIoctl::SectorCount => self.sector_count(),
            DiskIoctl::SectorSize => Ok(SECTOR_SIZE as u32),
            DiskIoctl::EraseBlockSize => Ok(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_sector_count_csd_v2() {
        let mut csd = [0u8; 16];
        csd[0] = 0x40;
        csd[8] = 0x03;
        csd[9] = 0xFF;
        // (0x3FF + 1) * 1024 sectors
        assert_eq!(decode_sector_count(&csd), 0x10_0000);
    }

    #[test]
    fn decode_sector_count_csd_v1() {
        let mut csd = [0u8; 16];
        // READ_BL_LEN = 9, C_SIZE = 127, C_SIZE_MULT = 7
        csd[5] = 0x09;
        csd[7] = 0x1F;
        csd[8] = 0xC0;
        csd[9] = 0x03;
        csd[10] = 0x80;
        // (127 + 1) << (9 + 7 + 2 - 9) sectors
        assert_eq!(decode_sector_count(&csd), 65536);
    }
}
