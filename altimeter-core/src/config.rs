// config.rs
//
// Byte-addressed persistent settings. The store itself is a capability the
// firmware injects (RP2040 flash there, an array in tests); this module
// owns the offset layout and the typed accessors. Defaulting/seeding policy
// belongs to the owner of the store, not to this map.

pub trait ConfigStore {
    type Error: core::fmt::Debug;

    fn get(&mut self, addr: u16, buf: &mut [u8]) -> Result<(), Self::Error>;
    fn put(&mut self, addr: u16, data: &[u8]) -> Result<(), Self::Error>;
}

/// Fixed offset map. Additions go at the end; reordering breaks every
/// deployed unit.
pub mod layout {
    pub const CURSOR: u16 = 0x00; // u32, bytes
    pub const PERIOD_ASCENT_MS: u16 = 0x04; // u16
    pub const PERIOD_DESCENT_MS: u16 = 0x06; // u16
    pub const SEA_LEVEL_QPA: u16 = 0x08; // u32, quarter-pascals
    pub const HCO_TRIGGER_AGL_M: u16 = 0x0C; // f32
    pub const LANDED_DWELL_MS: u16 = 0x10; // u32
    pub const LAST_MAX_AGL_M: u16 = 0x14; // f32
    pub const EPOCH_BASE_SECS: u16 = 0x18; // i64
    pub const FLAGS: u16 = 0x20; // u8
    pub const LOCATION: u16 = 0x24; // [u8; 28], zero-terminated
    pub const SIZE: u16 = 0x40;

    pub const FLAG_UNITS_FEET: u8 = 1 << 0;
    pub const FLAG_UNITS_CELSIUS: u8 = 1 << 1;
    /// Set at the flight-start milestone, cleared at flight-end. A set flag
    /// at boot means the previous flight lost power mid-air.
    pub const FLAG_FLIGHT_OPEN: u8 = 1 << 2;
}

pub struct ConfigMap<C: ConfigStore> {
    store: C,
}

impl<C: ConfigStore> ConfigMap<C> {
    pub const fn new(store: C) -> Self {
        Self { store }
    }

    pub fn into_inner(self) -> C {
        self.store
    }

    fn get_u16(&mut self, addr: u16) -> Result<u16, C::Error> {
        let mut b = [0u8; 2];
        self.store.get(addr, &mut b)?;
        Ok(u16::from_le_bytes(b))
    }

    fn get_u32(&mut self, addr: u16) -> Result<u32, C::Error> {
        let mut b = [0u8; 4];
        self.store.get(addr, &mut b)?;
        Ok(u32::from_le_bytes(b))
    }

    fn get_f32(&mut self, addr: u16) -> Result<f32, C::Error> {
        Ok(f32::from_bits(self.get_u32(addr)?))
    }

    pub fn cursor(&mut self) -> Result<u32, C::Error> {
        self.get_u32(layout::CURSOR)
    }

    pub fn set_cursor(&mut self, bytes: u32) -> Result<(), C::Error> {
        self.store.put(layout::CURSOR, &bytes.to_le_bytes())
    }

    pub fn period_ascent_ms(&mut self) -> Result<u16, C::Error> {
        self.get_u16(layout::PERIOD_ASCENT_MS)
    }

    pub fn set_period_ascent_ms(&mut self, v: u16) -> Result<(), C::Error> {
        self.store.put(layout::PERIOD_ASCENT_MS, &v.to_le_bytes())
    }

    pub fn period_descent_ms(&mut self) -> Result<u16, C::Error> {
        self.get_u16(layout::PERIOD_DESCENT_MS)
    }

    pub fn set_period_descent_ms(&mut self, v: u16) -> Result<(), C::Error> {
        self.store.put(layout::PERIOD_DESCENT_MS, &v.to_le_bytes())
    }

    pub fn sea_level_qpa(&mut self) -> Result<u32, C::Error> {
        self.get_u32(layout::SEA_LEVEL_QPA)
    }

    pub fn set_sea_level_qpa(&mut self, v: u32) -> Result<(), C::Error> {
        self.store.put(layout::SEA_LEVEL_QPA, &v.to_le_bytes())
    }

    pub fn hco_trigger_agl_m(&mut self) -> Result<f32, C::Error> {
        self.get_f32(layout::HCO_TRIGGER_AGL_M)
    }

    pub fn set_hco_trigger_agl_m(&mut self, v: f32) -> Result<(), C::Error> {
        self.store
            .put(layout::HCO_TRIGGER_AGL_M, &v.to_le_bytes())
    }

    pub fn landed_dwell_ms(&mut self) -> Result<u32, C::Error> {
        self.get_u32(layout::LANDED_DWELL_MS)
    }

    pub fn set_landed_dwell_ms(&mut self, v: u32) -> Result<(), C::Error> {
        self.store.put(layout::LANDED_DWELL_MS, &v.to_le_bytes())
    }

    pub fn last_max_agl_m(&mut self) -> Result<f32, C::Error> {
        self.get_f32(layout::LAST_MAX_AGL_M)
    }

    pub fn set_last_max_agl_m(&mut self, v: f32) -> Result<(), C::Error> {
        self.store.put(layout::LAST_MAX_AGL_M, &v.to_le_bytes())
    }

    pub fn epoch_base_secs(&mut self) -> Result<i64, C::Error> {
        let mut b = [0u8; 8];
        self.store.get(layout::EPOCH_BASE_SECS, &mut b)?;
        Ok(i64::from_le_bytes(b))
    }

    pub fn set_epoch_base_secs(&mut self, v: i64) -> Result<(), C::Error> {
        self.store.put(layout::EPOCH_BASE_SECS, &v.to_le_bytes())
    }

    pub fn flags(&mut self) -> Result<u8, C::Error> {
        let mut b = [0u8; 1];
        self.store.get(layout::FLAGS, &mut b)?;
        Ok(b[0])
    }

    pub fn set_flag(&mut self, mask: u8, on: bool) -> Result<(), C::Error> {
        let mut f = self.flags()?;
        if on {
            f |= mask;
        } else {
            f &= !mask;
        }
        self.store.put(layout::FLAGS, &[f])
    }

    pub fn flight_open(&mut self) -> Result<bool, C::Error> {
        Ok(self.flags()? & layout::FLAG_FLIGHT_OPEN != 0)
    }

    pub fn set_flight_open(&mut self, open: bool) -> Result<(), C::Error> {
        self.set_flag(layout::FLAG_FLIGHT_OPEN, open)
    }

    pub fn location(&mut self) -> Result<[u8; 28], C::Error> {
        let mut b = [0u8; 28];
        self.store.get(layout::LOCATION, &mut b)?;
        Ok(b)
    }

    pub fn set_location(&mut self, text: &[u8; 28]) -> Result<(), C::Error> {
        self.store.put(layout::LOCATION, text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MemConfig {
        bytes: [u8; layout::SIZE as usize],
    }

    impl Default for MemConfig {
        fn default() -> Self {
            Self {
                bytes: [0u8; layout::SIZE as usize],
            }
        }
    }

    impl ConfigStore for MemConfig {
        type Error = core::convert::Infallible;

        fn get(&mut self, addr: u16, buf: &mut [u8]) -> Result<(), Self::Error> {
            let a = addr as usize;
            buf.copy_from_slice(&self.bytes[a..a + buf.len()]);
            Ok(())
        }

        fn put(&mut self, addr: u16, data: &[u8]) -> Result<(), Self::Error> {
            let a = addr as usize;
            self.bytes[a..a + data.len()].copy_from_slice(data);
            Ok(())
        }
    }

    #[test]
    fn typed_accessors_round_trip() {
        let mut cfg = ConfigMap::new(MemConfig::default());
        cfg.set_cursor(4 * 32).unwrap();
        cfg.set_period_ascent_ms(50).unwrap();
        cfg.set_period_descent_ms(200).unwrap();
        cfg.set_sea_level_qpa(405_300).unwrap();
        cfg.set_hco_trigger_agl_m(150.0).unwrap();
        cfg.set_landed_dwell_ms(60_000).unwrap();
        cfg.set_last_max_agl_m(842.5).unwrap();
        cfg.set_epoch_base_secs(1_754_000_000).unwrap();

        assert_eq!(cfg.cursor().unwrap(), 128);
        assert_eq!(cfg.period_ascent_ms().unwrap(), 50);
        assert_eq!(cfg.period_descent_ms().unwrap(), 200);
        assert_eq!(cfg.sea_level_qpa().unwrap(), 405_300);
        assert_eq!(cfg.hco_trigger_agl_m().unwrap(), 150.0);
        assert_eq!(cfg.landed_dwell_ms().unwrap(), 60_000);
        assert_eq!(cfg.last_max_agl_m().unwrap(), 842.5);
        assert_eq!(cfg.epoch_base_secs().unwrap(), 1_754_000_000);
    }

    #[test]
    fn flight_open_flag_is_independent_of_units_flags() {
        let mut cfg = ConfigMap::new(MemConfig::default());
        cfg.set_flag(layout::FLAG_UNITS_FEET, true).unwrap();
        cfg.set_flight_open(true).unwrap();
        assert!(cfg.flight_open().unwrap());
        cfg.set_flight_open(false).unwrap();
        assert!(!cfg.flight_open().unwrap());
        assert!(cfg.flags().unwrap() & layout::FLAG_UNITS_FEET != 0);
    }
}
