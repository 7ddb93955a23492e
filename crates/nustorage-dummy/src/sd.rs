//! In-memory SD/MMC card emulator (SPI mode)
//!
//! A byte-level state machine behind the [`SdBus`] trait: command
//! frames are parsed as they are clocked in, responses and data tokens
//! are queued and shifted out on subsequent transfers. The emulated
//! card honors the configured type in its handshake responses and in
//! the sector address decoding (block index for high capacity, byte
//! offset otherwise).

use alloc::collections::VecDeque;
use alloc::vec;
use alloc::vec::Vec;

use log::debug;

use nustorage_core::sd::{cmd, BusSpeed, CardType, SdBus, SECTOR_SIZE};

/// Configuration for the SD card emulator
#[derive(Debug, Clone)]
pub struct DummySdConfig {
    /// Card variant presented during the handshake
    pub card_type: CardType,
    /// Capacity in sectors; must be a multiple of 1024 for high
    /// capacity cards and of 512 otherwise, so it encodes exactly into
    /// the emitted CSD
    pub sectors: u32,
    /// Operating-condition polls answered busy before the card reports
    /// ready
    pub ready_after: u32,
}

impl Default for DummySdConfig {
    fn default() -> Self {
        Self {
            card_type: CardType::SdV2Hc,
            sectors: 2048,
            ready_after: 1,
        }
    }
}

enum Phase {
    /// Assembling command frames
    Command,
    /// Waiting for (or collecting) write data after CMD24/CMD25
    WriteData {
        sector: u32,
        multi: bool,
        collecting: bool,
        buf: Vec<u8>,
    },
}

/// Software model of an SPI-mode SD/MMC card
pub struct DummySd {
    config: DummySdConfig,
    data: Vec<u8>,
    cs_low: bool,
    speed: BusSpeed,
    idle: bool,
    app_cmd: bool,
    op_cond_polls: u32,
    frame: [u8; 6],
    frame_len: usize,
    out: VecDeque<u8>,
    phase: Phase,
    multi_read: Option<u32>,
    cmd_log: Vec<(u8, u32)>,

    unresponsive: bool,
    suppress_read_token: bool,
}

impl DummySd {
    /// Create an emulator with the given configuration; the medium
    /// starts zero-filled
    pub fn new(config: DummySdConfig) -> Self {
        let data = vec![0u8; config.sectors as usize * SECTOR_SIZE];
        Self {
            data,
            cs_low: false,
            speed: BusSpeed::Low,
            idle: false,
            app_cmd: false,
            op_cond_polls: 0,
            frame: [0; 6],
            frame_len: 0,
            out: VecDeque::new(),
            phase: Phase::Command,
            multi_read: None,
            cmd_log: Vec::new(),
            unresponsive: false,
            suppress_read_token: false,
            config,
        }
    }

    /// Create an emulator with the default configuration (2048-sector
    /// high capacity card)
    pub fn new_default() -> Self {
        Self::new(DummySdConfig::default())
    }

    /// Medium contents
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Mutable medium contents
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Commands received so far, as (index, argument) pairs
    pub fn commands(&self) -> &[(u8, u32)] {
        &self.cmd_log
    }

    /// Forget the commands received so far
    pub fn clear_commands(&mut self) {
        self.cmd_log.clear();
    }

    /// Bus clock currently selected by the host
    pub fn speed(&self) -> BusSpeed {
        self.speed
    }

    /// Make the card electrically absent: every transfer reads 0xFF
    pub fn set_unresponsive(&mut self, unresponsive: bool) {
        self.unresponsive = unresponsive;
    }

    /// Swallow data start tokens so reads run into the token ceiling
    pub fn set_suppress_read_token(&mut self, suppress: bool) {
        self.suppress_read_token = suppress;
    }

    fn r1(&mut self, value: u8) {
        // One response-delay byte, then the R1 itself.
        self.out.push_back(0xFF);
        self.out.push_back(value);
    }

    fn push_bytes(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.out.push_back(b);
        }
    }

    fn decode_sector(&self, arg: u32) -> Option<u32> {
        let sector = if self.config.card_type == CardType::SdV2Hc {
            arg
        } else {
            arg >> 9
        };
        if (sector as usize + 1) * SECTOR_SIZE <= self.data.len() {
            Some(sector)
        } else {
            None
        }
    }

    fn queue_block(&mut self, sector: u32) -> bool {
        let start = sector as usize * SECTOR_SIZE;
        let end = start + SECTOR_SIZE;
        if end > self.data.len() {
            return false;
        }
        self.out.push_back(cmd::DATA_START_TOKEN);
        for i in start..end {
            let byte = self.data[i];
            self.out.push_back(byte);
        }
        self.out.push_back(0xFF);
        self.out.push_back(0xFF);
        true
    }

    fn queue_register(&mut self, reg: [u8; 16]) {
        self.out.push_back(cmd::DATA_START_TOKEN);
        self.push_bytes(&reg);
        self.out.push_back(0xFF);
        self.out.push_back(0xFF);
    }

    fn build_csd(&self) -> [u8; 16] {
        let mut csd = [0u8; 16];
        if self.config.card_type == CardType::SdV2Hc {
            // CSD v2: capacity in 1024-sector units.
            csd[0] = 0x40;
            let c = self.config.sectors / 1024 - 1;
            csd[8] = (c >> 8) as u8;
            csd[9] = c as u8;
        } else {
            // CSD v1 with READ_BL_LEN = 9 and C_SIZE_MULT = 7, so the
            // sector count is (C_SIZE + 1) << 9.
            let c = (self.config.sectors >> 9) - 1;
            csd[5] = 0x09;
            csd[6] = ((c >> 10) & 0x3) as u8;
            csd[7] = ((c >> 2) & 0xFF) as u8;
            csd[8] = ((c & 0x3) << 6) as u8;
            csd[9] = 0x03;
            csd[10] = 0x80;
        }
        csd
    }

    fn build_cid(&self) -> [u8; 16] {
        [
            0x02, 0x54, 0x4D, b'S', b'A', b'0', b'1', b'G', 0x10, 0x00, 0x00, 0x12, 0x34, 0x01,
            0x4A, 0x01,
        ]
    }

    fn commit_write(&mut self, sector: u32, payload: &[u8]) -> u8 {
        let start = sector as usize * SECTOR_SIZE;
        let end = start + SECTOR_SIZE;
        if end <= self.data.len() {
            self.data[start..end].copy_from_slice(payload);
            cmd::DATA_ACCEPTED
        } else {
            // Write-error data response.
            0x0D
        }
    }

    fn handle_command(&mut self) {
        let index = self.frame[0] & 0x3F;
        let arg = u32::from_be_bytes([self.frame[1], self.frame[2], self.frame[3], self.frame[4]]);
        let acmd = self.app_cmd;
        self.app_cmd = false;
        self.cmd_log.push((index, arg));
        debug!("card got CMD{} arg {:#010x}", index, arg);

        match index {
            cmd::GO_IDLE_STATE => {
                self.idle = true;
                self.op_cond_polls = 0;
                self.r1(cmd::R1_IDLE);
            }
            cmd::SEND_IF_COND => match self.config.card_type {
                CardType::SdV2 | CardType::SdV2Hc => {
                    self.r1(cmd::R1_IDLE);
                    self.push_bytes(&[0x00, 0x00, 0x01, 0xAA]);
                }
                // Illegal command for v1 and MMC parts.
                _ => self.r1(0x05),
            },
            cmd::APP_CMD => {
                self.app_cmd = true;
                self.r1(if self.idle { cmd::R1_IDLE } else { 0x00 });
            }
            cmd::SD_SEND_OP_COND if acmd => match self.config.card_type {
                CardType::SdV1 | CardType::SdV2 | CardType::SdV2Hc => {
                    self.op_cond_polls += 1;
                    if self.op_cond_polls > self.config.ready_after {
                        self.idle = false;
                        self.r1(0x00);
                    } else {
                        self.r1(cmd::R1_IDLE);
                    }
                }
                _ => self.r1(0x05),
            },
            cmd::SEND_OP_COND => match self.config.card_type {
                CardType::Mmc => {
                    self.op_cond_polls += 1;
                    if self.op_cond_polls > self.config.ready_after {
                        self.idle = false;
                        self.r1(0x00);
                    } else {
                        self.r1(cmd::R1_IDLE);
                    }
                }
                _ => self.r1(0x05),
            },
            cmd::READ_OCR => {
                self.r1(0x00);
                let first = if self.config.card_type == CardType::SdV2Hc {
                    0x80 | cmd::OCR_CCS
                } else {
                    0x80
                };
                self.push_bytes(&[first, 0xFF, 0x80, 0x00]);
            }
            cmd::SET_BLOCKLEN => {
                self.r1(if arg == SECTOR_SIZE as u32 { 0x00 } else { 0x40 });
            }
            cmd::CRC_ON_OFF => self.r1(0x00),
            cmd::SET_WR_BLK_ERASE_COUNT => self.r1(0x00),
            cmd::SEND_CSD => {
                self.r1(0x00);
                let csd = self.build_csd();
                self.queue_register(csd);
            }
            cmd::SEND_CID => {
                self.r1(0x00);
                let cid = self.build_cid();
                self.queue_register(cid);
            }
            cmd::READ_SINGLE_BLOCK => match self.decode_sector(arg) {
                Some(sector) => {
                    self.r1(0x00);
                    if !self.suppress_read_token {
                        self.queue_block(sector);
                    }
                }
                None => self.r1(0x40),
            },
            cmd::READ_MULTIPLE_BLOCK => match self.decode_sector(arg) {
                Some(sector) => {
                    self.r1(0x00);
                    if !self.suppress_read_token && self.queue_block(sector) {
                        self.multi_read = Some(sector + 1);
                    }
                }
                None => self.r1(0x40),
            },
            cmd::STOP_TRANSMISSION => {
                self.multi_read = None;
                self.out.clear();
                self.r1(0x00);
            }
            cmd::WRITE_BLOCK => match self.decode_sector(arg) {
                Some(sector) => {
                    self.r1(0x00);
                    self.phase = Phase::WriteData {
                        sector,
                        multi: false,
                        collecting: false,
                        buf: Vec::with_capacity(SECTOR_SIZE + 2),
                    };
                }
                None => self.r1(0x40),
            },
            cmd::WRITE_MULTIPLE_BLOCK => match self.decode_sector(arg) {
                Some(sector) => {
                    self.r1(0x00);
                    self.phase = Phase::WriteData {
                        sector,
                        multi: true,
                        collecting: false,
                        buf: Vec::with_capacity(SECTOR_SIZE + 2),
                    };
                }
                None => self.r1(0x40),
            },
            _ => self.r1(0x05),
        }
    }

    fn refill_stream(&mut self) {
        if !self.out.is_empty() {
            return;
        }
        if let Some(sector) = self.multi_read {
            if self.queue_block(sector) {
                self.multi_read = Some(sector + 1);
            } else {
                self.multi_read = None;
            }
        }
    }

    fn consume(&mut self, byte: u8) {
        match core::mem::replace(&mut self.phase, Phase::Command) {
            Phase::Command => {
                if self.frame_len == 0 {
                    if byte & 0xC0 == 0x40 {
                        self.frame[0] = byte;
                        self.frame_len = 1;
                    }
                } else {
                    self.frame[self.frame_len] = byte;
                    self.frame_len += 1;
                    if self.frame_len == 6 {
                        self.frame_len = 0;
                        self.handle_command();
                    }
                }
            }
            Phase::WriteData {
                sector,
                multi,
                collecting,
                mut buf,
            } => {
                if !collecting {
                    match byte {
                        cmd::DATA_START_TOKEN | cmd::MULTI_WRITE_TOKEN => {
                            buf.clear();
                            self.phase = Phase::WriteData {
                                sector,
                                multi,
                                collecting: true,
                                buf,
                            };
                        }
                        // Stop token ends a multi-block write.
                        cmd::STOP_TRAN_TOKEN => {}
                        _ => {
                            self.phase = Phase::WriteData {
                                sector,
                                multi,
                                collecting,
                                buf,
                            };
                        }
                    }
                } else {
                    buf.push(byte);
                    if buf.len() == SECTOR_SIZE + 2 {
                        // Payload plus the two CRC bytes.
                        let response = self.commit_write(sector, &buf[..SECTOR_SIZE]);
                        self.out.push_back(response);
                        if multi {
                            buf.clear();
                            self.phase = Phase::WriteData {
                                sector: sector + 1,
                                multi,
                                collecting: false,
                                buf,
                            };
                        }
                    } else {
                        self.phase = Phase::WriteData {
                            sector,
                            multi,
                            collecting,
                            buf,
                        };
                    }
                }
            }
        }
    }
}

impl SdBus for DummySd {
    fn transfer(&mut self, byte: u8) -> u8 {
        if self.unresponsive || !self.cs_low {
            return 0xFF;
        }
        self.refill_stream();
        let response = self.out.pop_front().unwrap_or(0xFF);
        self.consume(byte);
        response
    }

    fn select(&mut self) {
        self.cs_low = true;
    }

    fn deselect(&mut self) {
        self.cs_low = false;
        self.frame_len = 0;
        self.out.clear();
        self.multi_read = None;
        self.phase = Phase::Command;
    }

    fn set_speed(&mut self, speed: BusSpeed) {
        self.speed = speed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nustorage_core::disk::{fat_time, BlockDevice, DiskIoctl, DiskStatus};
    use nustorage_core::sd::SdCard;
    use nustorage_core::Error;

    fn init_logs() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn config(card_type: CardType, sectors: u32) -> DummySdConfig {
        DummySdConfig {
            card_type,
            sectors,
            ready_after: 1,
        }
    }

    fn pattern(seed: u8) -> Vec<u8> {
        (0..SECTOR_SIZE)
            .map(|i| seed.wrapping_add(i as u8))
            .collect()
    }

    #[test]
    fn test_initialize_v2hc() {
        init_logs();
        let mut sd = DummySd::new_default();
        let mut card = SdCard::new(&mut sd);
        assert_eq!(card.initialize(), Ok(CardType::SdV2Hc));
        assert_eq!(card.card_type(), CardType::SdV2Hc);
        drop(card);
        // Clock raised after the handshake.
        assert_eq!(sd.speed(), BusSpeed::High);
    }

    #[test]
    fn test_initialize_v2_standard_capacity() {
        let mut sd = DummySd::new(config(CardType::SdV2, 2048));
        let mut card = SdCard::new(&mut sd);
        assert_eq!(card.initialize(), Ok(CardType::SdV2));
    }

    #[test]
    fn test_initialize_v1() {
        let mut sd = DummySd::new(config(CardType::SdV1, 2048));
        let mut card = SdCard::new(&mut sd);
        assert_eq!(card.initialize(), Ok(CardType::SdV1));
    }

    #[test]
    fn test_initialize_mmc() {
        let mut sd = DummySd::new(config(CardType::Mmc, 2048));
        let mut card = SdCard::new(&mut sd);
        assert_eq!(card.initialize(), Ok(CardType::Mmc));
    }

    #[test]
    fn test_initialize_unresponsive_card() {
        let mut sd = DummySd::new_default();
        sd.set_unresponsive(true);
        let mut card = SdCard::new(&mut sd);
        assert_eq!(card.initialize(), Err(Error::CardNotRecognized));
        assert_eq!(card.status(), DiskStatus::NOINIT);
    }

    #[test]
    fn test_high_capacity_addresses_by_block_index() {
        init_logs();
        let mut sd = DummySd::new_default();
        let mut card = SdCard::new(&mut sd);
        card.initialize().unwrap();

        let data = pattern(0x11);
        card.write_sectors(&data, 5, 1).unwrap();
        let mut readback = vec![0u8; SECTOR_SIZE];
        card.read_sectors(&mut readback, 5, 1).unwrap();
        assert_eq!(readback, data);

        drop(card);
        // The data landed where sector 5 lives.
        assert_eq!(&sd.data()[5 * SECTOR_SIZE..6 * SECTOR_SIZE], &data[..]);
        // Exactly one single-block read, addressed by block index.
        let reads: Vec<_> = sd
            .commands()
            .iter()
            .filter(|(c, _)| *c == cmd::READ_SINGLE_BLOCK)
            .collect();
        assert_eq!(reads, [&(cmd::READ_SINGLE_BLOCK, 5)]);
        assert!(sd.commands().contains(&(cmd::WRITE_BLOCK, 5)));
    }

    #[test]
    fn test_standard_capacity_addresses_by_byte_offset() {
        let mut sd = DummySd::new(config(CardType::SdV1, 2048));
        let mut card = SdCard::new(&mut sd);
        card.initialize().unwrap();

        let data = pattern(0x22);
        card.write_sectors(&data, 5, 1).unwrap();
        let mut readback = vec![0u8; SECTOR_SIZE];
        card.read_sectors(&mut readback, 5, 1).unwrap();
        assert_eq!(readback, data);

        drop(card);
        assert_eq!(&sd.data()[5 * SECTOR_SIZE..6 * SECTOR_SIZE], &data[..]);
        assert!(sd.commands().contains(&(cmd::READ_SINGLE_BLOCK, 5 * 512)));
        assert!(sd.commands().contains(&(cmd::WRITE_BLOCK, 5 * 512)));
    }

    #[test]
    fn test_multi_sector_read() {
        let mut sd = DummySd::new_default();
        for (i, byte) in sd.data_mut()[2 * SECTOR_SIZE..5 * SECTOR_SIZE]
            .iter_mut()
            .enumerate()
        {
            *byte = (i % 253) as u8;
        }
        let mut card = SdCard::new(&mut sd);
        card.initialize().unwrap();

        let mut buf = vec![0u8; 3 * SECTOR_SIZE];
        card.read_sectors(&mut buf, 2, 3).unwrap();
        let expected: Vec<u8> = (0..3 * SECTOR_SIZE).map(|i| (i % 253) as u8).collect();
        assert_eq!(buf, expected);

        drop(card);
        assert!(sd.commands().contains(&(cmd::READ_MULTIPLE_BLOCK, 2)));
        assert!(sd.commands().contains(&(cmd::STOP_TRANSMISSION, 0)));
    }

    #[test]
    fn test_multi_sector_write_with_preerase_hint() {
        let mut sd = DummySd::new_default();
        let mut card = SdCard::new(&mut sd);
        card.initialize().unwrap();

        let mut data = pattern(0x33);
        data.extend(pattern(0x44));
        card.write_sectors(&data, 8, 2).unwrap();

        drop(card);
        assert_eq!(&sd.data()[8 * SECTOR_SIZE..10 * SECTOR_SIZE], &data[..]);
        assert!(sd.commands().contains(&(cmd::SET_WR_BLK_ERASE_COUNT, 2)));
        assert!(sd.commands().contains(&(cmd::WRITE_MULTIPLE_BLOCK, 8)));
    }

    #[test]
    fn test_mmc_multi_write_skips_preerase_hint() {
        let mut sd = DummySd::new(config(CardType::Mmc, 2048));
        let mut card = SdCard::new(&mut sd);
        card.initialize().unwrap();

        let mut data = pattern(0x55);
        data.extend(pattern(0x66));
        card.write_sectors(&data, 0, 2).unwrap();

        drop(card);
        assert!(!sd
            .commands()
            .iter()
            .any(|(c, _)| *c == cmd::SET_WR_BLK_ERASE_COUNT));
        assert_eq!(&sd.data()[..2 * SECTOR_SIZE], &data[..]);
    }

    #[test]
    fn test_sector_count_high_capacity() {
        let mut sd = DummySd::new_default();
        let mut card = SdCard::new(&mut sd);
        card.initialize().unwrap();
        assert_eq!(card.sector_count(), Ok(2048));
    }

    #[test]
    fn test_sector_count_csd_v1() {
        let mut sd = DummySd::new(config(CardType::SdV1, 8192));
        let mut card = SdCard::new(&mut sd);
        card.initialize().unwrap();
        assert_eq!(card.sector_count(), Ok(8192));
    }

    #[test]
    fn test_missing_data_token_fails_bounded() {
        let mut sd = DummySd::new_default();
        sd.set_suppress_read_token(true);
        let mut card = SdCard::new(&mut sd);
        card.initialize().unwrap();

        let mut buf = vec![0u8; SECTOR_SIZE];
        assert_eq!(
            card.read_sectors(&mut buf, 0, 1),
            Err(Error::DataStartTimeout)
        );
    }

    #[test]
    fn test_transfers_before_initialize_are_refused() {
        let mut sd = DummySd::new_default();
        let mut card = SdCard::new(&mut sd);
        let mut buf = vec![0u8; SECTOR_SIZE];
        assert_eq!(
            card.read_sectors(&mut buf, 0, 1),
            Err(Error::NotInitialized)
        );
        assert_eq!(card.write_sectors(&buf, 0, 1), Err(Error::NotInitialized));
    }

    #[test]
    fn test_out_of_range_sector_is_rejected() {
        let mut sd = DummySd::new_default();
        let mut card = SdCard::new(&mut sd);
        card.initialize().unwrap();

        let mut buf = vec![0u8; SECTOR_SIZE];
        assert_eq!(
            card.read_sectors(&mut buf, 4096, 1),
            Err(Error::CommandRejected {
                cmd: cmd::READ_SINGLE_BLOCK,
                r1: 0x40
            })
        );
    }

    #[test]
    fn test_short_buffer_is_rejected() {
        let mut sd = DummySd::new_default();
        let mut card = SdCard::new(&mut sd);
        card.initialize().unwrap();

        let mut buf = vec![0u8; SECTOR_SIZE - 1];
        assert_eq!(
            card.read_sectors(&mut buf, 0, 1),
            Err(Error::BufferTooSmall)
        );
    }

    #[test]
    fn test_read_cid() {
        let mut sd = DummySd::new_default();
        let mut card = SdCard::new(&mut sd);
        card.initialize().unwrap();
        let cid = card.read_cid().unwrap();
        assert_eq!(cid[0], 0x02);
    }

    #[test]
    fn test_block_device_contract() {
        let mut sd = DummySd::new_default();
        let mut card = SdCard::new(&mut sd);
        assert_eq!(card.status(), DiskStatus::NOINIT);
        assert_eq!(BlockDevice::initialize(&mut card), DiskStatus::empty());
        assert_eq!(card.status(), DiskStatus::empty());

        assert_eq!(card.ioctl(DiskIoctl::Sync), Ok(0));
        assert_eq!(card.ioctl(DiskIoctl::SectorCount), Ok(2048));
        assert_eq!(card.ioctl(DiskIoctl::SectorSize), Ok(512));
        assert_eq!(card.ioctl(DiskIoctl::EraseBlockSize), Ok(1));
        assert_eq!(fat_time(), 0);
    }
}
