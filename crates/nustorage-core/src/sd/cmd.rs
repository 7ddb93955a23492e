//! SD/MMC SPI-mode command set
//!
//! Command indices, data tokens and the fixed retry ceilings of the
//! protocol. The bus runs with CRC checking off; only the two frames the
//! card always verifies carry a real CRC byte.

/// CMD0: reset the card into idle state
pub const GO_IDLE_STATE: u8 = 0;
/// CMD1: MMC-style operating condition negotiation
pub const SEND_OP_COND: u8 = 1;
/// CMD8: interface condition (voltage + check pattern echo)
pub const SEND_IF_COND: u8 = 8;
/// CMD9: read the card-specific data register
pub const SEND_CSD: u8 = 9;
/// CMD10: read the card identification register
pub const SEND_CID: u8 = 10;
/// CMD12: stop a multi-block read
pub const STOP_TRANSMISSION: u8 = 12;
/// CMD16: set the block length
pub const SET_BLOCKLEN: u8 = 16;
/// CMD17: read a single block
pub const READ_SINGLE_BLOCK: u8 = 17;
/// CMD18: read multiple blocks
pub const READ_MULTIPLE_BLOCK: u8 = 18;
/// ACMD23: pre-erase hint before a multi-block write
pub const SET_WR_BLK_ERASE_COUNT: u8 = 23;
/// CMD24: write a single block
pub const WRITE_BLOCK: u8 = 24;
/// CMD25: write multiple blocks
pub const WRITE_MULTIPLE_BLOCK: u8 = 25;
/// ACMD41: SD-style operating condition negotiation
pub const SD_SEND_OP_COND: u8 = 41;
/// CMD55: escape prefix for application commands
pub const APP_CMD: u8 = 55;
/// CMD58: read the operating conditions register
pub const READ_OCR: u8 = 58;
/// CMD59: toggle CRC checking
pub const CRC_ON_OFF: u8 = 59;

/// R1 idle-state response
pub const R1_IDLE: u8 = 0x01;

/// Host capacity support bit in the ACMD41 argument
pub const ACMD41_HCS: u32 = 1 << 30;
/// Card capacity status bit in the first OCR byte
pub const OCR_CCS: u8 = 0x40;

/// Start token for single-block transfers in either direction
pub const DATA_START_TOKEN: u8 = 0xFE;
/// Start token for each block of a multi-block write
pub const MULTI_WRITE_TOKEN: u8 = 0xFC;
/// Stop token terminating a multi-block write
pub const STOP_TRAN_TOKEN: u8 = 0xFD;
/// Mask over the data response byte
pub const DATA_RESPONSE_MASK: u8 = 0x1F;
/// Data response pattern for an accepted block
pub const DATA_ACCEPTED: u8 = 0x05;

/// Valid CRC for CMD0 with a zero argument
pub const CMD0_CRC: u8 = 0x95;
/// Valid CRC for CMD8 with the 0x1AA argument
pub const CMD8_CRC: u8 = 0x87;
/// Valid CRC for CMD59 with a zero argument
pub const CRC_OFF_CRC: u8 = 0x25;
/// Placeholder CRC once CRC checking is off
pub const DUMMY_CRC: u8 = 0x01;

/// Poll ceiling for the card releasing the bus (reads of 0xFF)
pub const READY_RETRIES: u32 = 0xFF_FFFF;
/// Poll ceiling for the data start token
pub const TOKEN_RETRIES: u32 = 0xFFFF;
/// Poll ceiling for the R1 response byte after a command
pub const R1_RETRIES: u32 = 0x1F;
/// Attempts at CMD0 before giving up on the reset
pub const IDLE_RETRIES: u32 = 20;
/// Attempts at the operating-condition negotiation loops
pub const OP_COND_RETRIES: u32 = 0xFFFE;
