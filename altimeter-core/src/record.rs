// record.rs
//
// The on-wire flight log is a flat sequence of fixed 32-byte records. Three
// shapes share the footprint; which one a record is can be recovered from
// the status word alone (bit0 = init, bit8 = location, otherwise sensor),
// so a reader never needs positional context beyond the flight boundaries.
// All fields are little-endian with no implicit padding; bytes 30..32 are
// always zero.

use crate::types::FlightPhase;

pub const RECORD_SIZE: usize = 32;

/// A record in its wire form.
pub type RawRecord = [u8; RECORD_SIZE];

const LOCATION_TEXT_LEN: usize = 28;

/// Per-record condition bitfield.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StatusBits(pub u16);

impl StatusBits {
    /// First record of a flight (always the init record).
    pub const INITIAL_RECORD: u16 = 1 << 0;
    pub const HIGH_CURRENT_OUTPUT: u16 = 1 << 1;
    pub const BUZZER_ON: u16 = 1 << 2;
    pub const TEST_POINT: u16 = 1 << 3;
    pub const ALTITUDE_UNITS_FEET: u16 = 1 << 4;
    pub const TEMPERATURE_UNITS_C: u16 = 1 << 5;
    /// Final record of a flight; absent only when storage ran out first.
    pub const LAST_RECORD: u16 = 1 << 6;
    pub const LOCATION_RECORD: u16 = 1 << 8;
    pub const ABNORMAL_TERMINATION: u16 = 1 << 12;
    pub const APOGEE_DETECTED: u16 = 1 << 14;
    pub const LANDING_DETECTED: u16 = 1 << 15;

    const PHASE_SHIFT: u16 = 9;
    const PHASE_MASK: u16 = 0b111 << Self::PHASE_SHIFT;

    pub const fn empty() -> Self {
        StatusBits(0)
    }

    pub const fn contains(self, mask: u16) -> bool {
        self.0 & mask != 0
    }

    pub fn set(&mut self, mask: u16) {
        self.0 |= mask;
    }

    pub fn clear(&mut self, mask: u16) {
        self.0 &= !mask;
    }

    pub fn set_if(&mut self, mask: u16, cond: bool) {
        if cond {
            self.set(mask);
        } else {
            self.clear(mask);
        }
    }

    pub fn set_phase(&mut self, phase: FlightPhase) {
        self.0 = (self.0 & !Self::PHASE_MASK)
            | ((phase.index() as u16) << Self::PHASE_SHIFT);
    }

    pub const fn phase_index(self) -> u8 {
        ((self.0 & Self::PHASE_MASK) >> Self::PHASE_SHIFT) as u8
    }

    pub const fn phase(self) -> Option<FlightPhase> {
        FlightPhase::from_index(self.phase_index())
    }
}

/// Flight header: written once per flight as record 0.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct InitRecord {
    pub status: StatusBits,
    pub met_ms: u32,
    pub field_altitude_m: f32,
    pub temperature_f: f32,
    /// Sea-level reference pressure in quarter-pascals.
    pub sea_level_qpa: u32,
    pub epoch_secs: i64,
    pub spare: u32,
}

/// Launch-site position, record 1. Zero-terminated ASCII "lat,lon".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocationRecord {
    pub status: StatusBits,
    pub text: [u8; LOCATION_TEXT_LEN],
}

impl LocationRecord {
    pub fn from_text(status: StatusBits, s: &str) -> Self {
        let mut text = [0u8; LOCATION_TEXT_LEN];
        // Leave at least one terminating NUL.
        let n = s.len().min(LOCATION_TEXT_LEN - 1);
        text[..n].copy_from_slice(&s.as_bytes()[..n]);
        Self { status, text }
    }

    pub fn text_str(&self) -> &str {
        let end = self
            .text
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(LOCATION_TEXT_LEN);
        core::str::from_utf8(&self.text[..end]).unwrap_or("")
    }
}

/// One logged sample, records 2..N.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SensorRecord {
    pub status: StatusBits,
    pub met_ms: u32,
    pub altitude_agl_m: f32,
    pub temperature_f: f32,
    pub light_mv: u32,
    pub accel_g: [f32; 3],
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FlightRecord {
    Init(InitRecord),
    Location(LocationRecord),
    Sensor(SensorRecord),
}

impl FlightRecord {
    pub fn status(&self) -> StatusBits {
        match self {
            FlightRecord::Init(r) => r.status,
            FlightRecord::Location(r) => r.status,
            FlightRecord::Sensor(r) => r.status,
        }
    }

    /// Serialize into the shared 32-byte footprint. The variant tag bits are
    /// enforced here so a decoded stream can never disagree with the shape
    /// that produced it.
    pub fn encode(&self) -> RawRecord {
        let mut b: RawRecord = [0; RECORD_SIZE];
        match self {
            FlightRecord::Init(r) => {
                let mut status = r.status;
                status.set(StatusBits::INITIAL_RECORD);
                status.clear(StatusBits::LOCATION_RECORD);
                b[0..2].copy_from_slice(&status.0.to_le_bytes());
                b[2..6].copy_from_slice(&r.met_ms.to_le_bytes());
                b[6..10].copy_from_slice(&r.field_altitude_m.to_le_bytes());
                b[10..14].copy_from_slice(&r.temperature_f.to_le_bytes());
                b[14..18].copy_from_slice(&r.sea_level_qpa.to_le_bytes());
                b[18..26].copy_from_slice(&r.epoch_secs.to_le_bytes());
                b[26..30].copy_from_slice(&r.spare.to_le_bytes());
            }
            FlightRecord::Location(r) => {
                let mut status = r.status;
                status.set(StatusBits::LOCATION_RECORD);
                status.clear(StatusBits::INITIAL_RECORD);
                b[0..2].copy_from_slice(&status.0.to_le_bytes());
                b[2..30].copy_from_slice(&r.text);
            }
            FlightRecord::Sensor(r) => {
                let mut status = r.status;
                status.clear(StatusBits::INITIAL_RECORD);
                status.clear(StatusBits::LOCATION_RECORD);
                b[0..2].copy_from_slice(&status.0.to_le_bytes());
                b[2..6].copy_from_slice(&r.met_ms.to_le_bytes());
                b[6..10].copy_from_slice(&r.altitude_agl_m.to_le_bytes());
                b[10..14].copy_from_slice(&r.temperature_f.to_le_bytes());
                b[14..18].copy_from_slice(&r.light_mv.to_le_bytes());
                b[18..22].copy_from_slice(&r.accel_g[0].to_le_bytes());
                b[22..26].copy_from_slice(&r.accel_g[1].to_le_bytes());
                b[26..30].copy_from_slice(&r.accel_g[2].to_le_bytes());
            }
        }
        b
    }

    pub fn decode(b: &RawRecord) -> FlightRecord {
        let status = StatusBits(u16::from_le_bytes([b[0], b[1]]));
        if status.contains(StatusBits::INITIAL_RECORD) {
            FlightRecord::Init(InitRecord {
                status,
                met_ms: u32::from_le_bytes(b[2..6].try_into().unwrap()),
                field_altitude_m: f32::from_le_bytes(b[6..10].try_into().unwrap()),
                temperature_f: f32::from_le_bytes(b[10..14].try_into().unwrap()),
                sea_level_qpa: u32::from_le_bytes(b[14..18].try_into().unwrap()),
                epoch_secs: i64::from_le_bytes(b[18..26].try_into().unwrap()),
                spare: u32::from_le_bytes(b[26..30].try_into().unwrap()),
            })
        } else if status.contains(StatusBits::LOCATION_RECORD) {
            let mut text = [0u8; LOCATION_TEXT_LEN];
            text.copy_from_slice(&b[2..30]);
            FlightRecord::Location(LocationRecord { status, text })
        } else {
            FlightRecord::Sensor(SensorRecord {
                status,
                met_ms: u32::from_le_bytes(b[2..6].try_into().unwrap()),
                altitude_agl_m: f32::from_le_bytes(b[6..10].try_into().unwrap()),
                temperature_f: f32::from_le_bytes(b[10..14].try_into().unwrap()),
                light_mv: u32::from_le_bytes(b[14..18].try_into().unwrap()),
                accel_g: [
                    f32::from_le_bytes(b[18..22].try_into().unwrap()),
                    f32::from_le_bytes(b[22..26].try_into().unwrap()),
                    f32::from_le_bytes(b[26..30].try_into().unwrap()),
                ],
            })
        }
    }

    /// An erased slot reads back as all ones; treat it as end-of-log.
    pub fn is_blank(b: &RawRecord) -> bool {
        b.iter().all(|&v| v == 0xFF)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_record() -> InitRecord {
        let mut status = StatusBits::empty();
        status.set(StatusBits::ALTITUDE_UNITS_FEET);
        status.set_phase(FlightPhase::Ascent);
        InitRecord {
            status: StatusBits(status.0 | StatusBits::INITIAL_RECORD),
            met_ms: 0,
            field_altitude_m: 1401.5,
            temperature_f: 71.2,
            sea_level_qpa: 405_300,
            epoch_secs: 1_754_000_000,
            spare: 0,
        }
    }

    #[test]
    fn init_round_trip() {
        let r = FlightRecord::Init(init_record());
        assert_eq!(FlightRecord::decode(&r.encode()), r);
    }

    #[test]
    fn location_round_trip() {
        let mut status = StatusBits(StatusBits::LOCATION_RECORD);
        status.set_phase(FlightPhase::Ascent);
        let r = FlightRecord::Location(LocationRecord::from_text(status, "40.4406,-79.9959"));
        let decoded = FlightRecord::decode(&r.encode());
        assert_eq!(decoded, r);
        match decoded {
            FlightRecord::Location(l) => assert_eq!(l.text_str(), "40.4406,-79.9959"),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn sensor_round_trip() {
        let mut status = StatusBits::empty();
        status.set(StatusBits::APOGEE_DETECTED);
        status.set(StatusBits::HIGH_CURRENT_OUTPUT);
        status.set_phase(FlightPhase::Descent);
        let r = FlightRecord::Sensor(SensorRecord {
            status,
            met_ms: 12_340,
            altitude_agl_m: 312.75,
            temperature_f: 68.0,
            light_mv: 2890,
            accel_g: [-0.12, 0.05, -3.4],
        });
        assert_eq!(FlightRecord::decode(&r.encode()), r);
    }

    #[test]
    fn encode_is_little_endian_at_fixed_offsets() {
        let r = FlightRecord::Sensor(SensorRecord {
            status: StatusBits(0x0201),
            met_ms: 0x0403_0201,
            altitude_agl_m: 0.0,
            temperature_f: 0.0,
            light_mv: 0,
            accel_g: [0.0; 3],
        });
        let b = r.encode();
        // bit0 is reserved for init records; encode must have stripped it.
        assert_eq!(u16::from_le_bytes([b[0], b[1]]), 0x0200);
        assert_eq!(&b[2..6], &[0x01, 0x02, 0x03, 0x04]);
        // Trailing pad is always zero.
        assert_eq!(&b[30..32], &[0, 0]);
    }

    #[test]
    fn variant_tag_recovered_from_status_alone() {
        let init = FlightRecord::Init(init_record()).encode();
        assert!(matches!(FlightRecord::decode(&init), FlightRecord::Init(_)));

        let loc = FlightRecord::Location(LocationRecord::from_text(
            StatusBits::empty(),
            "0,0",
        ))
        .encode();
        assert!(matches!(
            FlightRecord::decode(&loc),
            FlightRecord::Location(_)
        ));
    }

    #[test]
    fn phase_field_packs_all_seven_states() {
        for i in 0..7u8 {
            let phase = FlightPhase::from_index(i).unwrap();
            let mut s = StatusBits::empty();
            s.set(StatusBits::LANDING_DETECTED);
            s.set_phase(phase);
            assert_eq!(s.phase(), Some(phase));
            assert!(s.contains(StatusBits::LANDING_DETECTED));
        }
    }

    #[test]
    fn blank_slot_detection() {
        assert!(FlightRecord::is_blank(&[0xFF; RECORD_SIZE]));
        assert!(!FlightRecord::is_blank(&[0; RECORD_SIZE]));
    }

    #[test]
    fn location_text_is_always_terminated() {
        let long = "12.3456789,-123.4567890,extra-garbage";
        let r = LocationRecord::from_text(StatusBits::empty(), long);
        assert_eq!(r.text[LOCATION_TEXT_LEN - 1], 0);
        assert!(r.text_str().len() < long.len());
    }
}
