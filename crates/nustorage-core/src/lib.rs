//! nustorage-core - storage drivers for NuMicro-class microcontrollers
//!
//! This crate provides the two storage drivers of the board support
//! package: the in-system-programming (ISP) flash controller and the
//! SD/MMC block driver in SPI mode. It is designed to be `no_std`
//! compatible for use in embedded environments.
//!
//! Both drivers talk to hardware exclusively through narrow injected
//! capabilities (a named-register file for the flash controller, a
//! byte-exchange SPI bus for the SD driver), so the control logic can be
//! exercised against software fakes without real hardware.
//!
//! # Features
//!
//! - `std` - Enable standard library support (`std::error::Error` impls)
//!
//! # Example
//!
//! ```ignore
//! use nustorage_core::isp::{FlashController, IspRegisterFile};
//!
//! fn dump_word<R: IspRegisterFile>(fmc: &mut FlashController<R>, addr: u32) {
//!     match fmc.read(addr) {
//!         Ok(word) => println!("{:#010x}: {:#010x}", addr, word),
//!         Err(e) => println!("{:#010x}: read failed: {}", addr, e),
//!     }
//! }
//! ```

#![no_std]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

#[cfg(feature = "std")]
extern crate std;

pub mod disk;
pub mod error;
pub mod isp;
pub mod sd;

pub use error::{Error, Result};
