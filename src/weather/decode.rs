/// Positional decoding of WeatherFlow observation rows
use crate::error::{BridgeError, Result};
use crate::models::RawObservation;

// Hub UDP protocol, observation row layouts (API version 143)
const AIR_FIELDS: usize = 8;
const SKY_FIELDS: usize = 14;

/// Air observation decoded from `obs[0]` of an `obs_air` packet
#[derive(Debug, Clone, PartialEq)]
pub struct AirObservation {
    pub epoch: i64,
    pub pressure_mb: f64,
    pub temperature: f64,
    pub humidity: f64,
    pub strike_count: f64,
    pub strike_distance: f64,
    pub battery: f64,
    pub interval: f64,
}

/// Sky observation decoded from `obs[0]` of an `obs_sky` packet
#[derive(Debug, Clone, PartialEq)]
pub struct SkyObservation {
    pub epoch: i64,
    pub illuminance: f64,
    pub uv: f64,
    pub rain_amount: f64,
    pub wind_lull: f64,
    pub wind_avg: f64,
    pub wind_gust: f64,
    pub wind_direction: f64,
    pub battery: f64,
    pub interval: f64,
    pub solar_radiation: f64,
    pub precip_type: f64,
    pub wind_interval: f64,
}

/// Decode an `obs_air` row
///
/// - Index 0: Epoch (seconds, UTC)
/// - Index 1: Station pressure (millibar)
/// - Index 2: Air temperature (°C)
/// - Index 3: Relative humidity (%)
/// - Index 4: Lightning strike count
/// - Index 5: Lightning strike average distance (km)
/// - Index 6: Battery (volts)
/// - Index 7: Report interval (minutes)
pub fn decode_air(raw: &RawObservation) -> Result<AirObservation> {
    let row = first_row(raw, "obs_air", AIR_FIELDS)?;
    let at = |index| field(row, index, "obs_air");

    Ok(AirObservation {
        epoch: at(0)? as i64,
        pressure_mb: at(1)?,
        temperature: at(2)?,
        humidity: at(3)?,
        strike_count: at(4)?,
        strike_distance: at(5)?,
        battery: at(6)?,
        interval: at(7)?,
    })
}

/// Decode an `obs_sky` row
///
/// - Index 0: Epoch (seconds, UTC)
/// - Index 1: Illuminance (lux)
/// - Index 2: UV index
/// - Index 3: Rain accumulated over the report interval (mm)
/// - Index 4: Wind lull (m/s)
/// - Index 5: Wind average (m/s)
/// - Index 6: Wind gust (m/s)
/// - Index 7: Wind direction (degrees)
/// - Index 8: Battery (volts)
/// - Index 9: Report interval (minutes)
/// - Index 10: Solar radiation (W/m²)
/// - Index 11: Local day rain accumulation (not used, usually null)
/// - Index 12: Precipitation type (0 none, 1 rain, 2 hail)
/// - Index 13: Wind sample interval (seconds)
pub fn decode_sky(raw: &RawObservation) -> Result<SkyObservation> {
    let row = first_row(raw, "obs_sky", SKY_FIELDS)?;
    let at = |index| field(row, index, "obs_sky");

    Ok(SkyObservation {
        epoch: at(0)? as i64,
        illuminance: at(1)?,
        uv: at(2)?,
        rain_amount: at(3)?,
        wind_lull: at(4)?,
        wind_avg: at(5)?,
        wind_gust: at(6)?,
        wind_direction: at(7)?,
        battery: at(8)?,
        interval: at(9)?,
        solar_radiation: at(10)?,
        precip_type: at(12)?,
        wind_interval: at(13)?,
    })
}

fn first_row<'a>(
    raw: &'a RawObservation,
    packet: &'static str,
    expected: usize,
) -> Result<&'a [Option<f64>]> {
    let row = raw
        .obs
        .first()
        .ok_or_else(|| BridgeError::malformed(packet, "no observation rows"))?;

    if row.len() < expected {
        return Err(BridgeError::ShortObservation {
            packet,
            expected,
            actual: row.len(),
        });
    }

    Ok(row)
}

fn field(row: &[Option<f64>], index: usize, packet: &'static str) -> Result<f64> {
    row.get(index)
        .copied()
        .flatten()
        .ok_or_else(|| BridgeError::malformed(packet, format!("missing value at index {}", index)))
}
