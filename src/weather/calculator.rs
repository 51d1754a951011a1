/// Derived meteorological values for air and sky observations
use log::debug;
use std::collections::{HashMap, VecDeque};
use time::{Date, UtcOffset};

use crate::error::{BridgeError, Result};
use crate::models::{Field, RawObservation, Reading, Trend, Uom};
use crate::utils::{epoch_to_offset, round_to};
use crate::weather::decode::{decode_air, decode_sky};

// Conversion and barometric constants
const MB_TO_INHG: f64 = 0.02952998751;
const MS_TO_KPH: f64 = 18.0 / 5.0;
const KM_PER_MILE: f64 = 1.609344;
const GAS_CONSTANT: f64 = 287.05; // dry air, J/(kg·K)
const GRAVITY: f64 = 9.80665; // m/s²
const LAPSE_RATE: f64 = 0.0065; // K/m
const SEA_LEVEL_TEMP: f64 = 288.15; // K
const SEA_LEVEL_PRESSURE: f64 = 1013.25; // hPa

/// Number of pressure samples kept for trend classification
pub const TREND_WINDOW: usize = 300;

/// Bounded history of station pressures (millibar) for one air device
#[derive(Debug, Clone, Default)]
pub struct TrendHistory {
    samples: VecDeque<f64>,
}

impl TrendHistory {
    /// Record a pressure sample and classify the trend
    ///
    /// The oldest retained sample is compared against the newest; a
    /// difference of more than 1 mb either way is a rising or falling
    /// trend.
    pub fn push(&mut self, pressure: f64) -> Trend {
        self.samples.push_back(pressure);
        if self.samples.len() > TREND_WINDOW {
            self.samples.pop_front();
        }

        let oldest = self.samples.front().copied().unwrap_or(pressure);
        if oldest < pressure - 1.0 {
            Trend::Rising
        } else if oldest > pressure + 1.0 {
            Trend::Falling
        } else {
            Trend::Steady
        }
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }
}

/// Running rain total for the current local calendar day
#[derive(Debug, Clone, Default)]
pub struct DailyRain {
    total: f64,
    day: Option<Date>,
}

impl DailyRain {
    /// Add a rain amount observed on `day` and return the day's total
    ///
    /// The total resets on the first sample of a later day. Samples that
    /// arrive out of order from an earlier day never reset it.
    pub fn add(&mut self, amount: f64, day: Date) -> f64 {
        match self.day {
            Some(current) if day > current => {
                debug!("New day {}, resetting rain total of {:.3} mm", day, self.total);
                self.total = 0.0;
                self.day = Some(day);
            }
            None => self.day = Some(day),
            _ => {}
        }

        self.total += amount;
        self.total
    }
}

/// Dew point (°C) from temperature (°C) and relative humidity (%)
///
/// Humidity is clamped to 1..=100 so the logarithm stays finite.
pub fn dewpoint(temperature: f64, humidity: f64) -> f64 {
    let rh = humidity.clamp(1.0, 100.0) / 100.0;
    let b = (17.625 * temperature) / (243.04 + temperature);
    let c = rh.ln();
    round_to((243.04 * (c + b)) / (17.625 - c - b), 2)
}

/// Sea-level pressure (mb) from station pressure (mb) and elevation (m)
pub fn sea_level_pressure(station: f64, elevation: f64) -> f64 {
    let l = GRAVITY / (GAS_CONSTANT * LAPSE_RATE);
    let c = GAS_CONSTANT * LAPSE_RATE / GRAVITY;
    let u = (1.0
        + (SEA_LEVEL_PRESSURE / station).powf(c) * (LAPSE_RATE * elevation / SEA_LEVEL_TEMP))
        .powf(l);
    round_to(station * u, 3)
}

/// Apparent ("feels like") temperature (°C)
pub fn apparent_temperature(temperature: f64, humidity: f64, wind_mph: f64) -> f64 {
    let vapour = humidity / 100.0 * 6.105 * (17.27 * temperature / (237.7 + temperature)).exp();
    round_to(temperature + 0.33 * vapour - 0.70 * wind_mph - 4.0, 1)
}

/// Rain rate (per hour) from the amount over a report interval in minutes
pub fn rain_rate(amount: f64, interval: f64) -> f64 {
    if interval > 0.0 {
        (amount * 60.0) / interval
    } else {
        amount * 60.0
    }
}

/// Turns raw observations into canonical metric readings
///
/// Keeps the per-device state derived values depend on: the latest
/// reading of each device, the pressure trend window, the daily rain
/// total and the most recent wind speed for apparent temperature.
#[derive(Debug)]
pub struct Calculator {
    elevation: f64,
    offset: UtcOffset,
    readings: HashMap<String, Reading>,
    trends: HashMap<String, TrendHistory>,
    rain: HashMap<String, DailyRain>,
    wind_kph: Option<f64>,
}

impl Calculator {
    pub fn new(elevation: f64, offset: UtcOffset) -> Self {
        Calculator {
            elevation,
            offset,
            readings: HashMap::new(),
            trends: HashMap::new(),
            rain: HashMap::new(),
            wind_kph: None,
        }
    }

    pub fn set_elevation(&mut self, elevation: f64) {
        self.elevation = elevation;
    }

    /// Latest canonical reading for a serial number
    pub fn latest(&self, serial_number: &str) -> Option<&Reading> {
        self.readings.get(serial_number)
    }

    pub fn compute_air(&mut self, raw: &RawObservation) -> Result<Reading> {
        let air = decode_air(raw)?;
        if air.pressure_mb <= 0.0 {
            return Err(BridgeError::malformed(
                "obs_air",
                format!("station pressure {} mb", air.pressure_mb),
            ));
        }

        let sealevel_mb = sea_level_pressure(air.pressure_mb, self.elevation);
        let history = self.trends.entry(raw.serial_number.clone()).or_default();
        let trend = history.push(air.pressure_mb);
        let samples = history.sample_count();
        let apparent = match self.wind_kph {
            Some(kph) => apparent_temperature(air.temperature, air.humidity, kph / KM_PER_MILE),
            None => 0.0,
        };

        let reading = self
            .readings
            .entry(raw.serial_number.clone())
            .or_insert_with(|| Reading::new(&raw.serial_number));
        reading.epoch = air.epoch;
        reading.set(Field::Pressure, round_to(air.pressure_mb * MB_TO_INHG, 3), Uom::InHg);
        reading.set(Field::SeaLevel, round_to(sealevel_mb * MB_TO_INHG, 3), Uom::InHg);
        reading.set(Field::Temperature, air.temperature, Uom::Celsius);
        reading.set(Field::Humidity, air.humidity, Uom::Percent);
        reading.set(Field::StrikeCount, air.strike_count, Uom::Index);
        reading.set(Field::StrikeDistance, air.strike_distance, Uom::Kilometers);
        reading.set(Field::Dewpoint, dewpoint(air.temperature, air.humidity), Uom::Celsius);
        reading.set(Field::ApparentTemp, apparent, Uom::Celsius);
        reading.set(Field::Trend, trend.code(), Uom::Index);
        reading.set(Field::Battery, air.battery, Uom::Volts);
        reading.set(Field::Interval, air.interval, Uom::Index);

        debug!(
            "Air {}: {:.1}°C, {}%, {:.3} inHg sea level, trend {:?} over {} samples",
            raw.serial_number,
            air.temperature,
            air.humidity,
            round_to(sealevel_mb * MB_TO_INHG, 3),
            trend,
            samples
        );

        Ok(reading.clone())
    }

    pub fn compute_sky(&mut self, raw: &RawObservation) -> Result<Reading> {
        let sky = decode_sky(raw)?;

        let day = epoch_to_offset(sky.epoch, self.offset).date();
        let daily = self
            .rain
            .entry(raw.serial_number.clone())
            .or_default()
            .add(sky.rain_amount, day);
        let wind_speed = round_to(sky.wind_avg * MS_TO_KPH, 2);
        self.wind_kph = Some(wind_speed);

        let reading = self
            .readings
            .entry(raw.serial_number.clone())
            .or_insert_with(|| Reading::new(&raw.serial_number));
        reading.epoch = sky.epoch;
        reading.set(Field::Illuminance, sky.illuminance, Uom::Lux);
        reading.set(Field::Uv, sky.uv, Uom::UvIndex);
        reading.set(Field::RainAmount, sky.rain_amount, Uom::Millimeters);
        reading.set(
            Field::RainRate,
            round_to(rain_rate(sky.rain_amount, sky.interval), 3),
            Uom::MillimetersPerHour,
        );
        reading.set(Field::DailyRain, round_to(daily, 3), Uom::Millimeters);
        reading.set(Field::WindLull, round_to(sky.wind_lull * MS_TO_KPH, 2), Uom::KilometersPerHour);
        reading.set(Field::WindSpeed, wind_speed, Uom::KilometersPerHour);
        reading.set(Field::WindGust, round_to(sky.wind_gust * MS_TO_KPH, 2), Uom::KilometersPerHour);
        reading.set(Field::WindDirection, sky.wind_direction, Uom::Degrees);
        reading.set(Field::Battery, sky.battery, Uom::Volts);
        reading.set(Field::Interval, sky.interval, Uom::Index);
        reading.set(Field::SolarRadiation, sky.solar_radiation, Uom::WattsPerSquareMeter);
        reading.set(Field::PrecipType, sky.precip_type, Uom::Index);
        reading.set(Field::WindInterval, sky.wind_interval, Uom::Index);

        debug!(
            "Sky {}: wind {:.2} km/h, rain {:.3} mm today",
            raw.serial_number, wind_speed, daily
        );

        Ok(reading.clone())
    }
}
