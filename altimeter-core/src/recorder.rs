// recorder.rs
//
// The flight classifier and trace writer. Driven once per main-loop tick
// with a sensor frame and a millisecond timestamp; phase and the store
// cursor are the only state that survives between ticks. Storage failures
// are counted and skipped, never retried: the machine must keep detecting
// apogee and landing even when every write is failing.

use crate::config::{layout, ConfigMap, ConfigStore};
use crate::record::{
    FlightRecord, InitRecord, LocationRecord, RawRecord, SensorRecord, StatusBits, RECORD_SIZE,
};
use crate::store::RecordStore;
use crate::throttle::SampleThrottle;
use crate::types::{FlightPhase, SensorFrame};
use crate::{error, info, warn};
use heapless::HistoryBuffer;
use libm::fabsf;

/// Launch edge: the newest history sample must exceed the one two steps
/// back by this much...
pub const LAUNCH_STEP_TWO_BACK_M: f32 = 0.6;
/// ...with at least this much rise on the step before it. Together the two
/// stages reject single-sample noise.
pub const LAUNCH_STEP_PRIOR_M: f32 = 0.3;
/// Absolute fallback in case the edge filter misses an intermediate sample.
pub const LAUNCH_FALLBACK_AGL_M: f32 = 2.0;
/// Hysteresis band below the running maximum that declares apogee.
pub const APOGEE_HYSTERESIS_M: f32 = 2.0;
/// Normal-descent landing test: per-window altitude delta / max AGL.
pub const LANDED_WINDOW_DELTA_M: f32 = 1.0;
pub const LANDED_MAX_AGL_M: f32 = 9.0;
/// Storage-full landing test. Looser on purpose: once logging has stopped,
/// detection latency beats accuracy.
pub const LANDED_FULL_WINDOW_DELTA_M: f32 = 0.5;
pub const LANDED_FULL_MAX_AGL_M: f32 = 10.0;

const DEFAULT_PERIOD_ASCENT_MS: u16 = 50;
const DEFAULT_PERIOD_DESCENT_MS: u16 = 200;
const DEFAULT_LANDED_DWELL_MS: u32 = 60_000;

#[derive(Debug, Clone, Copy)]
struct AltitudeSample {
    agl_m: f32,
    at_ms: u32,
}

/// Per-flight header data the mode controller supplies after field
/// calibration.
#[derive(Debug, Clone, Copy)]
pub struct FlightInit {
    pub field_altitude_m: f32,
    pub temperature_f: f32,
    pub epoch_secs: i64,
}

/// What the main loop acts on after each tick.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TickOutput {
    pub phase: FlightPhase,
    pub high_current: bool,
}

pub struct FlightRecorder<S: RecordStore, C: ConfigStore> {
    store: S,
    config: ConfigMap<C>,
    phase: FlightPhase,
    throttle: SampleThrottle,
    history: HistoryBuffer<AltitudeSample, 3>,
    last_hist_ms: u32,

    init_record: InitRecord,
    location_text: [u8; 28],

    field_altitude_m: f32,
    latest_agl_m: f32,
    max_agl_m: f32,
    mission_start_ms: u32,
    record_index: u32,

    landing_ref: Option<AltitudeSample>,
    landed_at_ms: u32,
    apogee_seen: bool,
    high_current: bool,
    flight_open: bool,

    period_ascent_ms: u16,
    period_descent_ms: u16,
    hco_trigger_agl_m: f32,
    landed_dwell_ms: u32,
    units_bits: u16,

    write_errors: u32,
    config_errors: u32,
}

impl<S: RecordStore, C: ConfigStore> FlightRecorder<S, C> {
    pub fn new(store: S, config: ConfigMap<C>) -> Self {
        Self {
            store,
            config,
            phase: FlightPhase::Init,
            throttle: SampleThrottle::new(DEFAULT_PERIOD_ASCENT_MS as u32),
            history: HistoryBuffer::new(),
            last_hist_ms: 0,
            init_record: InitRecord {
                status: StatusBits::empty(),
                met_ms: 0,
                field_altitude_m: 0.0,
                temperature_f: 0.0,
                sea_level_qpa: 0,
                epoch_secs: 0,
                spare: 0,
            },
            location_text: [0; 28],
            field_altitude_m: 0.0,
            latest_agl_m: 0.0,
            max_agl_m: 0.0,
            mission_start_ms: 0,
            record_index: 0,
            landing_ref: None,
            landed_at_ms: 0,
            apogee_seen: false,
            high_current: false,
            flight_open: false,
            period_ascent_ms: DEFAULT_PERIOD_ASCENT_MS,
            period_descent_ms: DEFAULT_PERIOD_DESCENT_MS,
            hco_trigger_agl_m: 0.0,
            landed_dwell_ms: DEFAULT_LANDED_DWELL_MS,
            units_bits: 0,
            write_errors: 0,
            config_errors: 0,
        }
    }

    // ── Mode-controller surface ──────────────────────────────────────────

    pub fn phase(&self) -> FlightPhase {
        self.phase
    }

    /// Latest altitude above field, live even when logging has stopped.
    pub fn latest_altitude_m(&self) -> f32 {
        self.latest_agl_m
    }

    /// Running maximum for the current flight.
    pub fn latest_max_altitude_m(&self) -> f32 {
        self.max_agl_m
    }

    pub fn is_logging(&self) -> bool {
        self.phase.is_logging()
    }

    pub fn write_errors(&self) -> u32 {
        self.write_errors
    }

    pub fn config_errors(&self) -> u32 {
        self.config_errors
    }

    /// Records successfully written for the current flight.
    pub fn records_written(&self) -> u32 {
        self.record_index
    }

    pub fn high_current(&self) -> bool {
        self.high_current
    }

    /// Maximum altitude of the previous flight, from the config store.
    pub fn last_max_altitude_m(&mut self) -> Result<f32, C::Error> {
        self.config.last_max_agl_m()
    }

    /// Host-synchronized wall-clock base for the init record's epoch field.
    pub fn epoch_base_secs(&mut self) -> Result<i64, C::Error> {
        self.config.epoch_base_secs()
    }

    pub fn set_sea_level_pressure_qpa(&mut self, qpa: u32) -> Result<(), C::Error> {
        self.config.set_sea_level_qpa(qpa)
    }

    pub fn set_high_current_altitude_m(&mut self, agl_m: f32) -> Result<(), C::Error> {
        self.hco_trigger_agl_m = agl_m;
        self.config.set_hco_trigger_agl_m(agl_m)
    }

    /// "Start new flight" request. Seals any flight still open, then waits
    /// in Init for calibration and `begin_flight`.
    pub async fn enter_flight_mode(&mut self, now_ms: u32) {
        if self.flight_open {
            let met = now_ms.wrapping_sub(self.mission_start_ms);
            self.terminate_abnormal(met).await;
        }
        self.phase = FlightPhase::Init;
        self.high_current = false;
    }

    /// A non-flight mode became active. An open flight is sealed so every
    /// flight in the store stays self-terminating for readers.
    pub async fn exit_flight_mode(&mut self, now_ms: u32) {
        if self.flight_open {
            let met = now_ms.wrapping_sub(self.mission_start_ms);
            self.terminate_abnormal(met).await;
        }
        self.phase = FlightPhase::Init;
        self.high_current = false;
    }

    /// Boot-time check: a durable flight-open marker means the previous
    /// flight lost power mid-air. The store cursor must already be restored
    /// from config. Returns true when a flight was sealed.
    pub async fn recover_interrupted(&mut self) -> bool {
        match self.config.flight_open() {
            Ok(true) => {
                warn!("unterminated flight found at boot; sealing it");
                self.flight_open = true;
                self.terminate_abnormal(0).await;
                true
            }
            Ok(false) => false,
            Err(_) => {
                self.config_errors += 1;
                false
            }
        }
    }

    // ── Flight setup ─────────────────────────────────────────────────────

    /// Init → WaitForLaunch, unconditional. Loads the per-flight settings,
    /// populates (but does not persist) the init record and resets all
    /// volatile flight state.
    pub fn begin_flight(&mut self, init: FlightInit, now_ms: u32) {
        self.load_settings();

        let mut status = StatusBits(self.units_bits);
        status.set_phase(FlightPhase::WaitForLaunch);
        let sea_level_qpa = match self.config.sea_level_qpa() {
            Ok(v) => v,
            Err(_) => {
                self.config_errors += 1;
                0
            }
        };
        self.init_record = InitRecord {
            status,
            met_ms: 0,
            field_altitude_m: init.field_altitude_m,
            temperature_f: init.temperature_f,
            sea_level_qpa,
            epoch_secs: init.epoch_secs,
            spare: 0,
        };
        self.location_text = match self.config.location() {
            Ok(t) => t,
            Err(_) => {
                self.config_errors += 1;
                [0; 28]
            }
        };

        self.field_altitude_m = init.field_altitude_m;
        self.latest_agl_m = 0.0;
        self.max_agl_m = 0.0;
        self.record_index = 0;
        self.apogee_seen = false;
        self.high_current = false;
        self.flight_open = false;
        self.landing_ref = None;
        self.history.clear();
        // First pre-launch history sample lands on the next tick.
        self.last_hist_ms = now_ms.wrapping_sub(self.period_descent_ms as u32);
        self.write_errors = 0;

        self.phase = FlightPhase::WaitForLaunch;
        info!("armed: field altitude {} m", init.field_altitude_m);
    }

    fn load_settings(&mut self) {
        self.period_ascent_ms =
            self.sane_period(|c| c.period_ascent_ms(), DEFAULT_PERIOD_ASCENT_MS);
        self.period_descent_ms =
            self.sane_period(|c| c.period_descent_ms(), DEFAULT_PERIOD_DESCENT_MS);
        self.hco_trigger_agl_m = match self.config.hco_trigger_agl_m() {
            Ok(v) if v.is_finite() && v > 0.0 => v,
            Ok(_) => 0.0,
            Err(_) => {
                self.config_errors += 1;
                0.0
            }
        };
        self.landed_dwell_ms = match self.config.landed_dwell_ms() {
            Ok(v) if v > 0 && v != u32::MAX => v,
            Ok(_) => DEFAULT_LANDED_DWELL_MS,
            Err(_) => {
                self.config_errors += 1;
                DEFAULT_LANDED_DWELL_MS
            }
        };
        let flags = match self.config.flags() {
            Ok(f) => f,
            Err(_) => {
                self.config_errors += 1;
                0
            }
        };
        self.units_bits = 0;
        if flags & layout::FLAG_UNITS_FEET != 0 {
            self.units_bits |= StatusBits::ALTITUDE_UNITS_FEET;
        }
        if flags & layout::FLAG_UNITS_CELSIUS != 0 {
            self.units_bits |= StatusBits::TEMPERATURE_UNITS_C;
        }
    }

    fn sane_period(
        &mut self,
        read: impl Fn(&mut ConfigMap<C>) -> Result<u16, C::Error>,
        default: u16,
    ) -> u16 {
        match read(&mut self.config) {
            Ok(p) if p > 0 && p != u16::MAX => p,
            Ok(_) => default,
            Err(_) => {
                self.config_errors += 1;
                default
            }
        }
    }

    // ── Tick ─────────────────────────────────────────────────────────────

    pub async fn step(&mut self, frame: &SensorFrame, now_ms: u32) -> TickOutput {
        // A failed barometer read keeps the previous altitude: phase logic
        // proceeds on stale-but-valid data rather than halting.
        if let Some(alt) = frame.altitude_m {
            self.latest_agl_m = alt - self.field_altitude_m;
        }
        if self.phase.in_flight() || self.phase == FlightPhase::WaitForLaunch {
            if self.latest_agl_m > self.max_agl_m {
                self.max_agl_m = self.latest_agl_m;
            }
        }

        match self.phase {
            FlightPhase::Init | FlightPhase::LowPower => {}

            FlightPhase::WaitForLaunch => {
                if now_ms.wrapping_sub(self.last_hist_ms) >= self.period_descent_ms as u32 {
                    self.history.write(AltitudeSample {
                        agl_m: self.latest_agl_m,
                        at_ms: now_ms,
                    });
                    self.last_hist_ms = now_ms;
                }
                if self.launch_detected() {
                    self.on_launch(frame, now_ms).await;
                }
            }

            FlightPhase::Ascent => {
                if self.store.free_records() == 0 {
                    self.enter_storage_full();
                } else {
                    if self.max_agl_m - self.latest_agl_m >= APOGEE_HYSTERESIS_M {
                        self.on_apogee();
                    }
                    self.maybe_write_scheduled(frame, now_ms).await;
                }
            }

            FlightPhase::Descent => {
                if self.store.free_records() == 0 {
                    self.enter_storage_full();
                } else {
                    self.update_high_current();
                    if self.landing_check(now_ms, LANDED_WINDOW_DELTA_M, LANDED_MAX_AGL_M) {
                        self.on_landed(frame, now_ms, true).await;
                    } else {
                        self.maybe_write_scheduled(frame, now_ms).await;
                    }
                }
            }

            FlightPhase::StorageFull => {
                // Event detection continues; logging does not.
                if !self.apogee_seen && self.max_agl_m - self.latest_agl_m >= APOGEE_HYSTERESIS_M {
                    self.apogee_seen = true;
                }
                if self.apogee_seen {
                    self.update_high_current();
                }
                if self.landing_check(now_ms, LANDED_FULL_WINDOW_DELTA_M, LANDED_FULL_MAX_AGL_M) {
                    self.on_landed(frame, now_ms, false).await;
                }
            }

            FlightPhase::Landed => {
                if now_ms.wrapping_sub(self.landed_at_ms) >= self.landed_dwell_ms {
                    info!("landed dwell elapsed; entering low-power");
                    self.phase = FlightPhase::LowPower;
                }
            }
        }

        TickOutput {
            phase: self.phase,
            high_current: self.high_current,
        }
    }

    // ── Transitions ──────────────────────────────────────────────────────

    fn launch_detected(&self) -> bool {
        if self.latest_agl_m > LAUNCH_FALLBACK_AGL_M {
            return true;
        }
        if self.history.len() < 3 {
            return false;
        }
        let mut it = self.history.oldest_ordered();
        let (h0, h1, h2) = (
            *it.next().unwrap(),
            *it.next().unwrap(),
            *it.next().unwrap(),
        );
        h2.agl_m - h0.agl_m >= LAUNCH_STEP_TWO_BACK_M
            && h1.agl_m - h0.agl_m >= LAUNCH_STEP_PRIOR_M
    }

    /// WaitForLaunch → Ascent. Back-fills the flight preamble: init record,
    /// location from config, then the two queued pre-launch samples from the
    /// altitude history (at the slower pre-launch rate), then one live
    /// sample, before scheduled logging takes over.
    async fn on_launch(&mut self, frame: &SensorFrame, now_ms: u32) {
        self.phase = FlightPhase::Ascent;

        let fallback = AltitudeSample {
            agl_m: self.latest_agl_m,
            at_ms: now_ms,
        };
        let mut it = self.history.oldest_ordered();
        let h0 = it.next().copied().unwrap_or(fallback);
        let h1 = it.next().copied().unwrap_or(h0);
        self.mission_start_ms = h0.at_ms;

        let mut init = self.init_record;
        init.status = self.frame_status(frame);
        self.push(&FlightRecord::Init(init).encode()).await;

        let location = LocationRecord {
            status: self.frame_status(frame),
            text: self.location_text,
        };
        self.push(&FlightRecord::Location(location).encode()).await;

        for h in [h0, h1] {
            let rec = SensorRecord {
                status: self.frame_status(frame),
                met_ms: h.at_ms.wrapping_sub(self.mission_start_ms),
                altitude_agl_m: h.agl_m,
                temperature_f: frame.temperature_f,
                light_mv: frame.light_mv,
                accel_g: frame.accel_g,
            };
            self.push(&FlightRecord::Sensor(rec).encode()).await;
        }

        self.throttle.set_period(self.period_ascent_ms as u32);
        self.throttle.begin(now_ms);
        let live = self.make_sensor_record(frame, now_ms);
        if self.push(&FlightRecord::Sensor(live).encode()).await {
            self.throttle.advance();
        }

        // Flight-start milestone: cursor and open-marker become durable so a
        // power loss from here on is recoverable.
        self.flight_open = true;
        self.persist_milestone(true);
        info!("launch detected at {} ms", now_ms);
    }

    fn on_apogee(&mut self) {
        self.apogee_seen = true;
        self.phase = FlightPhase::Descent;
        self.throttle.set_period(self.period_descent_ms as u32);
        self.landing_ref = None;
        info!("apogee at {} m AGL", self.max_agl_m);
    }

    fn enter_storage_full(&mut self) {
        warn!("record store exhausted; logging stopped, detection continues");
        self.phase = FlightPhase::StorageFull;
        self.landing_ref = None;
    }

    async fn on_landed(&mut self, frame: &SensorFrame, now_ms: u32, write_terminal: bool) {
        self.phase = FlightPhase::Landed;
        self.landed_at_ms = now_ms;
        self.high_current = false;

        if write_terminal {
            let mut rec = self.make_sensor_record(frame, now_ms);
            rec.status.set(StatusBits::LAST_RECORD);
            rec.status.set(StatusBits::LANDING_DETECTED);
            self.push(&FlightRecord::Sensor(rec).encode()).await;
        }

        self.flight_open = false;
        self.persist_milestone(false);
        info!("landed; max altitude {} m AGL", self.max_agl_m);
    }

    /// Seal an interrupted flight: one terminal record with the abnormal
    /// flag, rewritten into the last allocated slot (clipped to the final
    /// full slot if the durable cursor overran).
    async fn terminate_abnormal(&mut self, met_ms: u32) {
        let cursor = self.store.cursor_records();
        let last = self.store.capacity_records().saturating_sub(1);
        let slot = cursor.saturating_sub(1).min(last);

        let mut status = StatusBits(self.units_bits);
        status.set_phase(self.phase);
        status.set(StatusBits::LAST_RECORD);
        status.set(StatusBits::ABNORMAL_TERMINATION);
        status.set_if(StatusBits::APOGEE_DETECTED, self.apogee_seen);
        let rec = SensorRecord {
            status,
            met_ms,
            altitude_agl_m: self.latest_agl_m,
            temperature_f: 0.0,
            light_mv: 0,
            accel_g: [0.0; 3],
        };
        if self
            .store
            .overwrite(slot, &FlightRecord::Sensor(rec).encode())
            .await
            .is_err()
        {
            self.write_errors += 1;
            error!("abnormal-termination record failed ({} errors)", self.write_errors);
        }

        self.flight_open = false;
        self.persist_milestone(false);
    }

    /// Flight-start / flight-end milestone. The cursor is made durable only
    /// here, not per record, to bound config-store latency and wear.
    fn persist_milestone(&mut self, open: bool) {
        let cursor_bytes = self.store.cursor_records() * RECORD_SIZE as u32;
        if self.config.set_cursor(cursor_bytes).is_err() {
            self.config_errors += 1;
        }
        if !open && self.config.set_last_max_agl_m(self.max_agl_m).is_err() {
            self.config_errors += 1;
        }
        if self.config.set_flight_open(open).is_err() {
            self.config_errors += 1;
        }
    }

    // ── Record plumbing ──────────────────────────────────────────────────

    fn frame_status(&self, frame: &SensorFrame) -> StatusBits {
        let mut s = StatusBits(self.units_bits);
        s.set_phase(self.phase);
        s.set_if(StatusBits::HIGH_CURRENT_OUTPUT, self.high_current);
        s.set_if(StatusBits::BUZZER_ON, frame.buzzer_on);
        s.set_if(StatusBits::TEST_POINT, frame.test_point);
        s.set_if(StatusBits::APOGEE_DETECTED, self.apogee_seen);
        s
    }

    /// Freshly computed from the latest readings, never cached.
    fn make_sensor_record(&self, frame: &SensorFrame, now_ms: u32) -> SensorRecord {
        SensorRecord {
            status: self.frame_status(frame),
            met_ms: now_ms.wrapping_sub(self.mission_start_ms),
            altitude_agl_m: self.latest_agl_m,
            temperature_f: frame.temperature_f,
            light_mv: frame.light_mv,
            accel_g: frame.accel_g,
        }
    }

    async fn maybe_write_scheduled(&mut self, frame: &SensorFrame, now_ms: u32) {
        if !self.throttle.is_due(now_ms) {
            return;
        }
        let rec = self.make_sensor_record(frame, now_ms);
        if self.push(&FlightRecord::Sensor(rec).encode()).await {
            self.throttle.advance();
            if self.store.free_records() == 0 {
                self.enter_storage_full();
            }
        }
    }

    async fn push(&mut self, raw: &RawRecord) -> bool {
        match self.store.append(raw).await {
            Ok(()) => {
                self.record_index += 1;
                true
            }
            Err(_) => {
                self.write_errors += 1;
                error!("record append failed ({} errors)", self.write_errors);
                false
            }
        }
    }

    fn update_high_current(&mut self) {
        if !self.high_current
            && self.hco_trigger_agl_m > 0.0
            && self.latest_agl_m < self.hco_trigger_agl_m
        {
            info!("high-current output asserted at {} m AGL", self.latest_agl_m);
            self.high_current = true;
        }
    }

    fn landing_check(&mut self, now_ms: u32, delta_limit: f32, agl_limit: f32) -> bool {
        let window_ms = self.period_descent_ms as u32;
        match self.landing_ref {
            None => {
                self.landing_ref = Some(AltitudeSample {
                    agl_m: self.latest_agl_m,
                    at_ms: now_ms,
                });
                false
            }
            Some(r) => {
                if now_ms.wrapping_sub(r.at_ms) < window_ms {
                    return false;
                }
                let delta = fabsf(self.latest_agl_m - r.agl_m);
                self.landing_ref = Some(AltitudeSample {
                    agl_m: self.latest_agl_m,
                    at_ms: now_ms,
                });
                delta < delta_limit && self.latest_agl_m < agl_limit
            }
        }
    }
}
