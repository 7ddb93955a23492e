//! nustorage-dummy - in-memory hardware emulators for testing
//!
//! This crate provides software models of the two hardware seams the
//! core drivers are written against: [`DummyIsp`] emulates the ISP
//! flash register file, [`DummySd`] emulates an SD/MMC card in SPI
//! mode. Both are useful for testing and development without real
//! hardware, and both carry fault-injection knobs for the failure paths
//! a healthy device never takes.

#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(feature = "alloc")]
extern crate alloc;

#[cfg(feature = "alloc")]
mod isp;
#[cfg(feature = "alloc")]
mod sd;

#[cfg(feature = "alloc")]
pub use isp::{DummyIsp, DummyIspConfig};
#[cfg(feature = "alloc")]
pub use sd::{DummySd, DummySdConfig};
