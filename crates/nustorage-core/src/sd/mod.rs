//! SD/MMC block driver in SPI mode
//!
//! Implements the SD/MMC command protocol over a plain byte-exchange
//! SPI bus: the initialization handshake, single and multi sector
//! transfers, and the CSD/CID register fetches used for the capacity
//! query.
//!
//! The bus is injected through the [`SdBus`] capability so the protocol
//! logic can be driven against an emulated card in tests.

mod bus;
mod card;
pub mod cmd;

pub use bus::{BusSpeed, SdBus};
pub use card::{decode_sector_count, CardType, SdCard, SECTOR_SIZE};
