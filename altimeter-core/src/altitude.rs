// altitude.rs
//
// Pure pressure-to-altitude conversions. Kept free of driver state so the
// hypsometric math can be exercised on the host.

use libm::powf;

/// ICAO standard atmosphere sea-level pressure.
pub const STANDARD_SEA_LEVEL_HPA: f32 = 1013.25;

/// Hypsometric formula: altitude in metres for a measured station pressure
/// against a sea-level reference, both in hPa.
pub fn pressure_to_altitude(pressure_hpa: f32, sea_level_hpa: f32) -> f32 {
    44330.0 * (1.0 - powf(pressure_hpa / sea_level_hpa, 0.1903))
}

pub fn celsius_to_fahrenheit(c: f32) -> f32 {
    c * 1.8 + 32.0
}

/// Sea-level pressure is persisted in quarter-pascals to keep sub-hPa
/// resolution in an integer config slot.
pub fn quarter_pa_to_hpa(qpa: u32) -> f32 {
    qpa as f32 / 400.0
}

pub fn hpa_to_quarter_pa(hpa: f32) -> u32 {
    (hpa * 400.0) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_at_reference_pressure() {
        let alt = pressure_to_altitude(STANDARD_SEA_LEVEL_HPA, STANDARD_SEA_LEVEL_HPA);
        assert!(alt.abs() < 1e-3);
    }

    #[test]
    fn monotonically_decreasing_in_pressure() {
        let mut prev = pressure_to_altitude(1050.0, STANDARD_SEA_LEVEL_HPA);
        let mut p = 1049.0;
        while p > 300.0 {
            let alt = pressure_to_altitude(p, STANDARD_SEA_LEVEL_HPA);
            assert!(alt > prev, "altitude must rise as pressure falls (p={p})");
            prev = alt;
            p -= 1.0;
        }
    }

    #[test]
    fn known_altitude_point() {
        // 1000 hPa against a standard day is roughly 110 m.
        let alt = pressure_to_altitude(1000.0, STANDARD_SEA_LEVEL_HPA);
        assert!((alt - 110.9).abs() < 1.0, "got {alt}");
    }

    #[test]
    fn temperature_conversion() {
        assert_eq!(celsius_to_fahrenheit(0.0), 32.0);
        assert_eq!(celsius_to_fahrenheit(100.0), 212.0);
    }

    #[test]
    fn quarter_pa_round_trip() {
        let qpa = hpa_to_quarter_pa(1013.25);
        assert_eq!(qpa, 405_300);
        assert!((quarter_pa_to_hpa(qpa) - 1013.25).abs() < 1e-3);
    }
}
