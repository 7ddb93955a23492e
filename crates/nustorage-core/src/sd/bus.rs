//! SPI bus capability for the SD driver

/// Bus clock selection
///
/// The handshake runs at a low clock (a few hundred kHz) until the card
/// is identified; data transfers run at the full bus speed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusSpeed {
    /// Initialization speed
    Low,
    /// Transfer speed
    High,
}

/// Byte-level SPI access to the card
///
/// Chip select is a binary exclusive-access gate: the driver asserts it
/// around every command-response-data exchange and never interleaves
/// two commands.
pub trait SdBus {
    /// Exchange one byte, full duplex
    fn transfer(&mut self, byte: u8) -> u8;

    /// Assert chip select (drive it active)
    fn select(&mut self);

    /// Release chip select
    fn deselect(&mut self);

    /// Switch the bus clock
    fn set_speed(&mut self, speed: BusSpeed);
}

impl<T: SdBus + ?Sized> SdBus for &mut T {
    fn transfer(&mut self, byte: u8) -> u8 {
        (**self).transfer(byte)
    }

    fn select(&mut self) {
        (**self).select()
    }

    fn deselect(&mut self) {
        (**self).deselect()
    }

    fn set_speed(&mut self, speed: BusSpeed) {
        (**self).set_speed(speed)
    }
}
