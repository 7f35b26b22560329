// types.rs

/// One state of the flight classifier, in flight-profile order. The
/// discriminant is what gets packed into the record status phase field.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FlightPhase {
    Init = 0,          // Waiting for field calibration
    WaitForLaunch = 1, // On the pad, watching for the rising edge
    Ascent = 2,        // Climbing, logging at the fast period
    StorageFull = 3,   // Event detection continues, logging stopped
    Descent = 4,       // Past apogee, logging at the slow period
    Landed = 5,        // Down, dwelling before power-down
    LowPower = 6,      // Terminal until a new flight is requested
}

impl FlightPhase {
    pub const fn index(self) -> u8 {
        self as u8
    }

    pub const fn from_index(v: u8) -> Option<FlightPhase> {
        match v {
            0 => Some(FlightPhase::Init),
            1 => Some(FlightPhase::WaitForLaunch),
            2 => Some(FlightPhase::Ascent),
            3 => Some(FlightPhase::StorageFull),
            4 => Some(FlightPhase::Descent),
            5 => Some(FlightPhase::Landed),
            6 => Some(FlightPhase::LowPower),
            _ => None,
        }
    }

    /// True for the phases in which samples are offered to storage.
    pub const fn is_logging(self) -> bool {
        matches!(self, FlightPhase::Ascent | FlightPhase::Descent)
    }

    /// True for any phase belonging to an open flight.
    pub const fn in_flight(self) -> bool {
        matches!(
            self,
            FlightPhase::Ascent | FlightPhase::StorageFull | FlightPhase::Descent
        )
    }
}

/// One tick's worth of sensor readings, assembled by the main loop and
/// handed to the recorder. `altitude_m` is sea-level referenced; `None`
/// means the barometer transaction failed this tick and the recorder should
/// keep reasoning on its previous value.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SensorFrame {
    pub altitude_m: Option<f32>,
    pub temperature_f: f32,
    pub light_mv: u32,
    pub accel_g: [f32; 3],
    pub buzzer_on: bool,
    pub test_point: bool,
}

impl SensorFrame {
    pub const fn new() -> Self {
        Self {
            altitude_m: None,
            temperature_f: 0.0,
            light_mv: 0,
            accel_g: [0.0; 3],
            buzzer_on: false,
            test_point: false,
        }
    }
}

impl Default for SensorFrame {
    fn default() -> Self {
        Self::new()
    }
}
