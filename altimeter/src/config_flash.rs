// config_flash.rs
//
// Byte-addressed config store over the last 4 KiB sector of the boot flash.
// A RAM shadow absorbs the sector-granular erase: every put rewrites the
// whole config page. Puts only happen at flight milestones, so wear is not
// a concern.

use altimeter_core::config::{layout, ConfigStore};
use embassy_rp::flash::{Blocking, Error as FlashError, Flash};
use embassy_rp::peripherals::FLASH;

pub const FLASH_SIZE: usize = 2 * 1024 * 1024;
const SECTOR_SIZE: u32 = 4096;
const PAGE_SIZE: usize = 256;
const CONFIG_OFFSET: u32 = FLASH_SIZE as u32 - SECTOR_SIZE;

#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    OutOfRange,
    Flash(FlashError),
}

pub struct FlashConfig<'d> {
    flash: Flash<'d, FLASH, Blocking, FLASH_SIZE>,
    shadow: [u8; PAGE_SIZE],
}

impl<'d> FlashConfig<'d> {
    pub fn new(mut flash: Flash<'d, FLASH, Blocking, FLASH_SIZE>) -> Self {
        let mut shadow = [0xFF; PAGE_SIZE];
        if flash.blocking_read(CONFIG_OFFSET, &mut shadow).is_err() {
            shadow = [0xFF; PAGE_SIZE];
        }
        Self { flash, shadow }
    }
}

impl ConfigStore for FlashConfig<'_> {
    type Error = ConfigError;

    fn get(&mut self, addr: u16, buf: &mut [u8]) -> Result<(), ConfigError> {
        let a = addr as usize;
        let end = a + buf.len();
        if end > layout::SIZE as usize {
            return Err(ConfigError::OutOfRange);
        }
        buf.copy_from_slice(&self.shadow[a..end]);
        Ok(())
    }

    fn put(&mut self, addr: u16, data: &[u8]) -> Result<(), ConfigError> {
        let a = addr as usize;
        let end = a + data.len();
        if end > layout::SIZE as usize {
            return Err(ConfigError::OutOfRange);
        }
        self.shadow[a..end].copy_from_slice(data);
        self.flash
            .blocking_erase(CONFIG_OFFSET, CONFIG_OFFSET + SECTOR_SIZE)
            .map_err(ConfigError::Flash)?;
        self.flash
            .blocking_write(CONFIG_OFFSET, &self.shadow)
            .map_err(ConfigError::Flash)
    }
}
