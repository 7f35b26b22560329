#![no_std]
#![no_main]

mod config_flash;

use altimeter_core::altitude::{celsius_to_fahrenheit, quarter_pa_to_hpa, STANDARD_SEA_LEVEL_HPA};
use altimeter_core::config::ConfigMap;
use altimeter_core::record::RECORD_SIZE;
use altimeter_core::recorder::{FlightInit, FlightRecorder};
use altimeter_core::store::RecordStore;
use altimeter_core::types::{FlightPhase, SensorFrame};
use altimeter_core::{assign_resources, error, info, warn, DataCell};
use altimeter_drivers::{Adxl343, AltitudeSource, EepromStore};
use config_flash::{FlashConfig, FLASH_SIZE};
use embassy_embedded_hal::shared_bus::asynch::i2c::I2cDevice;
use embassy_executor::Spawner;
use embassy_rp::adc::{
    Adc, Channel as AdcChannel, Config as AdcConfig, InterruptHandler as AdcInterruptHandler,
};
use embassy_rp::bind_interrupts;
use embassy_rp::flash::Flash;
use embassy_rp::gpio::{Input, Level, Output, Pull};
use embassy_rp::i2c::{Config as I2cConfig, I2c, InterruptHandler as I2cInterruptHandler};
use embassy_rp::peripherals::I2C0;
use embassy_sync::blocking_mutex::raw::{CriticalSectionRawMutex, NoopRawMutex};
use embassy_sync::channel::Channel;
use embassy_sync::mutex::Mutex;
use embassy_time::{Delay, Duration, Instant, Ticker, Timer};
use static_cell::StaticCell;
use {defmt_rtt as _, panic_probe as _};

/// Main-loop tick. Short enough for the fast logging profile, long enough
/// for one barometer conversion per tick.
const TICK_MS: u64 = 20;

bind_interrupts!(struct Irqs {
    I2C0_IRQ => I2cInterruptHandler<I2C0>;
    ADC_IRQ_FIFO => AdcInterruptHandler;
});

assign_resources! {
    SensorBus {
        i2c: I2C0,
        scl: PIN_5,
        sda: PIN_4,
    }
    LightSense {
        adc: ADC,
        pin: PIN_26,
    }
    Outputs {
        hco: PIN_15,
        led: PIN_25,
    }
    Power {
        vbus_sense: PIN_24,
    }
    Storage {
        flash: FLASH,
    }
}

// ── Mode-controller interface ─────────────────────────────────────────────
//  Button decoding, display and the host protocol live elsewhere; only
//  their requests arrive here.

pub enum ModeRequest {
    StartFlight,
    ExitFlight,
    SetSeaLevelQpa(u32),
    SetHighCurrentAltitudeM(f32),
}

pub static MODE_REQUESTS: Channel<CriticalSectionRawMutex, ModeRequest, 4> = Channel::new();

// ── Blackboard for display/telemetry consumers ────────────────────────────

pub struct FlightView {
    pub phase: DataCell<FlightPhase>,
    pub altitude_m: DataCell<f32>,
    pub max_altitude_m: DataCell<f32>,
    pub logging: DataCell<bool>,
}

pub static FLIGHT_VIEW: FlightView = FlightView {
    phase: DataCell::new(FlightPhase::Init),
    altitude_m: DataCell::new(0.0),
    max_altitude_m: DataCell::new(0.0),
    logging: DataCell::new(false),
};

type SensorI2c = I2c<'static, I2C0, embassy_rp::i2c::Async>;
type BusMutex = Mutex<NoopRawMutex, SensorI2c>;
type SharedI2c = I2cDevice<'static, NoopRawMutex, SensorI2c>;

static I2C_BUS: StaticCell<BusMutex> = StaticCell::new();

#[embassy_executor::task]
async fn blinky(led: embassy_rp::Peri<'static, embassy_rp::peripherals::PIN_25>) -> ! {
    let mut led = Output::new(led, Level::Low);
    loop {
        led.toggle();
        Timer::after(Duration::from_millis(500)).await;
    }
}

/// USB power removal is one of the two ways out of low-power mode: treat it
/// as an exit-flight request so the recorder re-enters Init.
#[embassy_executor::task]
async fn vbus_task(pin: embassy_rp::Peri<'static, embassy_rp::peripherals::PIN_24>) -> ! {
    let mut vbus = Input::new(pin, Pull::None);
    loop {
        vbus.wait_for_falling_edge().await;
        info!("usb power removed");
        MODE_REQUESTS.send(ModeRequest::ExitFlight).await;
    }
}

#[embassy_executor::task]
async fn flight_task(
    bus: &'static BusMutex,
    light: LightSense,
    outputs_hco: embassy_rp::Peri<'static, embassy_rp::peripherals::PIN_15>,
    storage: Storage,
) -> ! {
    let mut hco = Output::new(outputs_hco, Level::Low);
    let mut adc = Adc::new(light.adc, Irqs, AdcConfig::default());
    let mut light_ch = AdcChannel::new_pin(light.pin, Pull::None);

    // Persistent config, then the log store with its durable cursor.
    let mut config = ConfigMap::new(FlashConfig::new(Flash::new_blocking(storage.flash)));
    let sea_level_hpa = match config.sea_level_qpa() {
        Ok(qpa) if qpa > 0 && qpa != u32::MAX => quarter_pa_to_hpa(qpa),
        _ => STANDARD_SEA_LEVEL_HPA,
    };
    let saved_cursor = config.cursor().unwrap_or(0);

    let mut store = EepromStore::new(I2cDevice::new(bus), Delay);
    let max_cursor = store.capacity_records() * RECORD_SIZE as u32;
    if store.set_cursor(saved_cursor.min(max_cursor)).is_err() {
        warn!("saved cursor unusable; restarting log at 0");
    }

    // Sensors.
    let mut source = AltitudeSource::new(I2cDevice::new(bus), Delay, sea_level_hpa);
    let period_ms = config.period_ascent_ms().unwrap_or(50) as u32;
    if source.setup(period_ms).await.is_err() {
        error!("barometer init failed; altitude will be stale");
    }

    let mut accel = Adxl343::new(I2cDevice::new(bus), Delay);
    let accel_ok = accel.init().await.is_ok() && accel.self_test().await.is_ok();
    if !accel_ok {
        // The one user-fatal condition: halt visibly before flight rather
        // than fly with an unverified sensor.
        loop {
            error!("accelerometer failed pre-flight check; refusing to fly");
            Timer::after(Duration::from_secs(1)).await;
        }
    }

    let mut recorder = FlightRecorder::new(store, config);
    if recorder.recover_interrupted().await {
        warn!("previous flight sealed after power loss");
    }

    let mut ticker = Ticker::every(Duration::from_millis(TICK_MS));
    let mut frame = SensorFrame::new();
    loop {
        let now_ms = Instant::now().as_millis() as u32;

        while let Ok(req) = MODE_REQUESTS.try_receive() {
            handle_request(req, &mut recorder, &mut source, now_ms).await;
        }

        frame.altitude_m = match source.read().await {
            Ok(r) => {
                frame.temperature_f = celsius_to_fahrenheit(r.temperature_c);
                Some(r.altitude_m)
            }
            Err(_) => None,
        };
        if let Ok(g) = accel.read().await {
            frame.accel_g = g;
        }
        if let Ok(raw) = adc.read(&mut light_ch).await {
            frame.light_mv = raw as u32 * 3300 / 4096;
        }

        let out = recorder.step(&frame, now_ms).await;
        hco.set_level(if out.high_current {
            Level::High
        } else {
            Level::Low
        });

        FLIGHT_VIEW.phase.update(out.phase, now_ms);
        FLIGHT_VIEW.altitude_m.update(recorder.latest_altitude_m(), now_ms);
        FLIGHT_VIEW
            .max_altitude_m
            .update(recorder.latest_max_altitude_m(), now_ms);
        FLIGHT_VIEW.logging.update(recorder.is_logging(), now_ms);

        ticker.next().await;
    }
}

async fn handle_request(
    req: ModeRequest,
    recorder: &mut FlightRecorder<EepromStore<SharedI2c, Delay>, FlashConfig<'static>>,
    source: &mut AltitudeSource<SharedI2c, Delay>,
    now_ms: u32,
) {
    match req {
        ModeRequest::StartFlight => {
            recorder.enter_flight_mode(now_ms).await;
            match source.calibrate_field().await {
                Ok(field_m) => {
                    let temperature_f = match source.read().await {
                        Ok(r) => celsius_to_fahrenheit(r.temperature_c),
                        Err(_) => 0.0,
                    };
                    let epoch_secs = recorder.epoch_base_secs().unwrap_or(0)
                        + Instant::now().as_secs() as i64;
                    recorder.begin_flight(
                        FlightInit {
                            field_altitude_m: field_m,
                            temperature_f,
                            epoch_secs,
                        },
                        now_ms,
                    );
                }
                Err(_) => error!("field calibration failed; staying idle"),
            }
        }
        ModeRequest::ExitFlight => {
            recorder.exit_flight_mode(now_ms).await;
        }
        ModeRequest::SetSeaLevelQpa(qpa) => {
            if recorder.set_sea_level_pressure_qpa(qpa).is_err() {
                error!("could not persist sea-level pressure");
            }
            source.set_sea_level_hpa(quarter_pa_to_hpa(qpa));
        }
        ModeRequest::SetHighCurrentAltitudeM(agl_m) => {
            if recorder.set_high_current_altitude_m(agl_m).is_err() {
                error!("could not persist trigger altitude");
            }
        }
    }
}

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    let p = embassy_rp::init(Default::default());
    let r = AssignedResources::take(p);
    info!("altimeter up");

    let i2c = I2c::new_async(
        r.SensorBus.i2c,
        r.SensorBus.scl,
        r.SensorBus.sda,
        Irqs,
        I2cConfig::default(),
    );
    let bus = I2C_BUS.init(Mutex::new(i2c));

    spawner.spawn(blinky(r.Outputs.led)).unwrap();
    spawner.spawn(vbus_task(r.Power.vbus_sense)).unwrap();
    spawner
        .spawn(flight_task(bus, r.LightSense, r.Outputs.hco, r.Storage))
        .unwrap();
}
