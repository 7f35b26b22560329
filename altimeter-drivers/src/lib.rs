#![no_std]

pub mod accel;
pub mod baro;
pub mod eeprom;

#[cfg(test)]
pub(crate) mod test_bus;

pub use accel::*;
pub use baro::*;
pub use eeprom::*;
