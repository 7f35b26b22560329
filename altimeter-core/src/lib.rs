// lib.rs
#![no_std]

pub mod altitude;
pub mod config;
pub mod datacells;
pub mod macros;
pub mod reader;
pub mod record;
pub mod recorder;
pub mod store;
pub mod throttle;
pub mod types;

pub use altitude::{celsius_to_fahrenheit, pressure_to_altitude};
pub use config::{ConfigMap, ConfigStore};
pub use datacells::DataCell;
pub use reader::{Flight, FlightIter, RecordIter};
pub use record::{FlightRecord, InitRecord, LocationRecord, RawRecord, SensorRecord, StatusBits, RECORD_SIZE};
pub use recorder::{FlightInit, FlightRecorder, TickOutput};
pub use store::RecordStore;
pub use throttle::SampleThrottle;
pub use types::*;
