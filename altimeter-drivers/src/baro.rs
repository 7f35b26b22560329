// baro.rs
//
// BMP280 barometric sensor plus the field-calibrated altitude source built
// on top of it. The acquisition profile is picked from the loop's sample
// period: a period of 14 ms or more leaves room for the higher-oversampling
// conversion, shorter periods get the faster, noisier one.

use altimeter_core::altitude::pressure_to_altitude;
use altimeter_core::info;
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::i2c::I2c;

const ADDR: u8 = 0x76;
const REG_ID: u8 = 0xD0;
const REG_RESET: u8 = 0xE0;
const REG_CTRL_MEAS: u8 = 0xF4;
const REG_CONFIG: u8 = 0xF5;
const REG_PRESS_MSB: u8 = 0xF7;
const REG_CALIB: u8 = 0x88;

const CHIP_ID: u8 = 0x58;
const CMD_RESET: u8 = 0xB6;

// osrs_t=x1, osrs_p=x4, normal mode: ~13.3 ms worst-case conversion.
const CTRL_LOW_NOISE: u8 = 0b001_011_11;
// osrs_t=x1, osrs_p=x2: ~8.7 ms, roughly twice the pressure noise.
const CTRL_FAST: u8 = 0b001_010_11;
// 0.5 ms standby, IIR filter off: the launch edge detector needs an
// unfiltered step response.
const CONFIG_NORMAL: u8 = 0x00;

/// Sample periods at or above this use the low-noise profile.
pub const LOW_NOISE_PERIOD_MS: u32 = 14;

/// Power-on reset value of the data registers: no conversion has finished
/// yet. Never a genuine reading.
const RAW_INVALID: i32 = 0x80000;

const CAL_SAMPLES: u32 = 30;
const CAL_INTERVAL_MS: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BaroError {
    /// The bus transaction itself failed (NACK, arbitration, timeout).
    Bus,
    DeviceMissing,
    /// The sensor answered but has no finished conversion to give.
    NotReady,
}

#[derive(Default, Debug, Clone, Copy)]
struct Bmp280Coeffs {
    dig_t1: u16,
    dig_t2: i16,
    dig_t3: i16,
    dig_p1: u16,
    dig_p2: i16,
    dig_p3: i16,
    dig_p4: i16,
    dig_p5: i16,
    dig_p6: i16,
    dig_p7: i16,
    dig_p8: i16,
    dig_p9: i16,
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BaroSample {
    pub pressure_hpa: f32,
    pub temperature_c: f32,
}

pub struct Bmp280<I2C, D> {
    i2c: I2C,
    delay: D,
    coeffs: Bmp280Coeffs,
}

impl<I2C: I2c, D: DelayNs> Bmp280<I2C, D> {
    pub fn new(i2c: I2C, delay: D) -> Self {
        Self {
            i2c,
            delay,
            coeffs: Bmp280Coeffs::default(),
        }
    }

    pub async fn init(&mut self, sample_period_ms: u32) -> Result<(), BaroError> {
        self.write_reg(REG_RESET, CMD_RESET).await?;
        self.delay.delay_ms(5).await;

        let mut id = [0u8; 1];
        self.i2c
            .write_read(ADDR, &[REG_ID], &mut id)
            .await
            .map_err(|_| BaroError::Bus)?;
        if id[0] != CHIP_ID {
            return Err(BaroError::DeviceMissing);
        }

        self.read_coeffs().await?;

        let ctrl = if sample_period_ms >= LOW_NOISE_PERIOD_MS {
            CTRL_LOW_NOISE
        } else {
            CTRL_FAST
        };
        self.write_reg(REG_CONFIG, CONFIG_NORMAL).await?;
        self.write_reg(REG_CTRL_MEAS, ctrl).await?;

        // First conversion warm-up.
        self.delay.delay_ms(50).await;
        info!("bmp280 up, ctrl_meas={:#04x}", ctrl);
        Ok(())
    }

    async fn read_coeffs(&mut self) -> Result<(), BaroError> {
        let mut buf = [0u8; 24];
        self.i2c
            .write_read(ADDR, &[REG_CALIB], &mut buf)
            .await
            .map_err(|_| BaroError::Bus)?;

        let u = |i: usize| u16::from_le_bytes([buf[i], buf[i + 1]]);
        let s = |i: usize| i16::from_le_bytes([buf[i], buf[i + 1]]);
        self.coeffs = Bmp280Coeffs {
            dig_t1: u(0),
            dig_t2: s(2),
            dig_t3: s(4),
            dig_p1: u(6),
            dig_p2: s(8),
            dig_p3: s(10),
            dig_p4: s(12),
            dig_p5: s(14),
            dig_p6: s(16),
            dig_p7: s(18),
            dig_p8: s(20),
            dig_p9: s(22),
        };
        Ok(())
    }

    async fn write_reg(&mut self, reg: u8, val: u8) -> Result<(), BaroError> {
        self.i2c
            .write(ADDR, &[reg, val])
            .await
            .map_err(|_| BaroError::Bus)
    }

    /// Burst-read both channels and compensate. Datasheet floating-point
    /// compensation, section 3.11.3.
    pub async fn read(&mut self) -> Result<BaroSample, BaroError> {
        let mut buf = [0u8; 6];
        self.i2c
            .write_read(ADDR, &[REG_PRESS_MSB], &mut buf)
            .await
            .map_err(|_| BaroError::Bus)?;

        let adc_p = ((buf[0] as i32) << 12) | ((buf[1] as i32) << 4) | ((buf[2] as i32) >> 4);
        let adc_t = ((buf[3] as i32) << 12) | ((buf[4] as i32) << 4) | ((buf[5] as i32) >> 4);
        if adc_p == RAW_INVALID || adc_t == RAW_INVALID {
            return Err(BaroError::NotReady);
        }

        let c = &self.coeffs;
        let t1 = (adc_t as f32 / 16384.0 - c.dig_t1 as f32 / 1024.0) * c.dig_t2 as f32;
        let t2 = (adc_t as f32 / 131072.0 - c.dig_t1 as f32 / 8192.0)
            * (adc_t as f32 / 131072.0 - c.dig_t1 as f32 / 8192.0)
            * c.dig_t3 as f32;
        let t_fine = t1 + t2;
        let temperature_c = t_fine / 5120.0;

        let mut var1 = t_fine / 2.0 - 64000.0;
        let mut var2 = var1 * var1 * c.dig_p6 as f32 / 32768.0;
        var2 += var1 * c.dig_p5 as f32 * 2.0;
        var2 = var2 / 4.0 + c.dig_p4 as f32 * 65536.0;
        var1 = (c.dig_p3 as f32 * var1 * var1 / 524288.0 + c.dig_p2 as f32 * var1) / 524288.0;
        var1 = (1.0 + var1 / 32768.0) * c.dig_p1 as f32;
        if var1 == 0.0 {
            return Err(BaroError::NotReady);
        }
        let mut p = 1048576.0 - adc_p as f32;
        p = (p - var2 / 4096.0) * 6250.0 / var1;
        var1 = c.dig_p9 as f32 * p * p / 2147483648.0;
        var2 = p * c.dig_p8 as f32 / 32768.0;
        p += (var1 + var2 + c.dig_p7 as f32) / 16.0;

        Ok(BaroSample {
            pressure_hpa: p / 100.0,
            temperature_c,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AltitudeReading {
    pub altitude_m: f32,
    pub pressure_hpa: f32,
    pub temperature_c: f32,
}

/// The barometer plus the launch-site baseline: what the rest of the system
/// consumes.
pub struct AltitudeSource<I2C, D> {
    baro: Bmp280<I2C, D>,
    sea_level_hpa: f32,
    field_altitude_m: f32,
    last_altitude_m: Option<f32>,
}

impl<I2C: I2c, D: DelayNs> AltitudeSource<I2C, D> {
    pub fn new(i2c: I2C, delay: D, sea_level_hpa: f32) -> Self {
        Self {
            baro: Bmp280::new(i2c, delay),
            sea_level_hpa,
            field_altitude_m: 0.0,
            last_altitude_m: None,
        }
    }

    pub async fn setup(&mut self, sample_period_ms: u32) -> Result<(), BaroError> {
        self.baro.init(sample_period_ms).await
    }

    pub fn set_sea_level_hpa(&mut self, hpa: f32) {
        self.sea_level_hpa = hpa;
    }

    pub fn field_altitude_m(&self) -> f32 {
        self.field_altitude_m
    }

    /// Most recent altitude, if any read since the last calibration.
    pub fn last_altitude_m(&self) -> Option<f32> {
        self.last_altitude_m
    }

    pub async fn read(&mut self) -> Result<AltitudeReading, BaroError> {
        let s = self.baro.read().await?;
        let altitude_m = pressure_to_altitude(s.pressure_hpa, self.sea_level_hpa);
        self.last_altitude_m = Some(altitude_m);
        Ok(AltitudeReading {
            altitude_m,
            pressure_hpa: s.pressure_hpa,
            temperature_c: s.temperature_c,
        })
    }

    /// Average a burst of reads into the field-altitude baseline. Runs on
    /// the pad before arming; any bus problem is surfaced rather than
    /// averaged over.
    pub async fn calibrate_field(&mut self) -> Result<f32, BaroError> {
        let mut sum_hpa = 0.0f32;
        for _ in 0..CAL_SAMPLES {
            sum_hpa += self.baro.read().await?.pressure_hpa;
            self.baro.delay.delay_ms(CAL_INTERVAL_MS).await;
        }
        let avg = sum_hpa / CAL_SAMPLES as f32;
        self.field_altitude_m = pressure_to_altitude(avg, self.sea_level_hpa);
        // Any cached display value predates the new baseline.
        self.last_altitude_m = None;
        info!("field calibrated: {} m", self.field_altitude_m);
        Ok(self.field_altitude_m)
    }
}
