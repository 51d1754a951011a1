use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Broadcast packet as sent by the WeatherFlow hub
///
/// `obs` holds one or more positional rows whose meaning depends on
/// `type`; see `weather::decode` for the index tables.
#[derive(Debug, Clone, Deserialize)]
pub struct RawObservation {
    #[serde(rename = "type")]
    pub packet_type: String,
    #[serde(default)]
    pub serial_number: String,
    #[serde(default)]
    pub hub_sn: String,
    #[serde(default)]
    pub firmware_revision: Option<serde_json::Value>,
    #[serde(default)]
    pub obs: Vec<Vec<Option<f64>>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    AirObservation,
    SkyObservation,
    /// Known to the hub protocol but not consumed here
    Ignored,
    Unknown,
}

impl PacketType {
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "obs_air" => PacketType::AirObservation,
            "obs_sky" => PacketType::SkyObservation,
            "hub_status" | "device_status" | "evt_precip" | "evt_strike" | "rapid_wind"
            | "wind_debug" | "light_debug" | "obs_tower" => PacketType::Ignored,
            _ => PacketType::Unknown,
        }
    }
}

/// Unit-of-measure codes understood by the controller
///
/// The numeric values are a wire contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(into = "u16")]
#[repr(u16)]
pub enum Uom {
    Miles = 0,
    Celsius = 4,
    Degrees = 14,
    Fahrenheit = 17,
    Percent = 22,
    InHg = 23,
    InchesPerHour = 24,
    Index = 25,
    KilometersPerHour = 32,
    Lux = 36,
    MillimetersPerHour = 46,
    MilesPerHour = 48,
    UvIndex = 71,
    Volts = 72,
    WattsPerSquareMeter = 74,
    Millimeters = 82,
    Kilometers = 83,
    Inches = 105,
}

impl From<Uom> for u16 {
    fn from(uom: Uom) -> u16 {
        uom as u16
    }
}

/// Named quantities carried by a canonical reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Field {
    // air
    Pressure,
    SeaLevel,
    Temperature,
    Humidity,
    StrikeCount,
    StrikeDistance,
    Dewpoint,
    ApparentTemp,
    Trend,
    // sky
    Illuminance,
    Uv,
    RainAmount,
    RainRate,
    DailyRain,
    WindLull,
    WindSpeed,
    WindGust,
    WindDirection,
    SolarRadiation,
    PrecipType,
    WindInterval,
    // both
    Battery,
    Interval,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurement {
    pub value: f64,
    pub uom: Uom,
}

/// Calculated, unit-tagged view of one device's latest observation
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub serial_number: String,
    pub epoch: i64,
    pub fields: BTreeMap<Field, Measurement>,
}

impl Reading {
    pub fn new(serial_number: &str) -> Self {
        Reading {
            serial_number: serial_number.to_string(),
            epoch: 0,
            fields: BTreeMap::new(),
        }
    }

    pub fn set(&mut self, field: Field, value: f64, uom: Uom) {
        self.fields.insert(field, Measurement { value, uom });
    }

    pub fn get(&self, field: Field) -> Option<Measurement> {
        self.fields.get(&field).copied()
    }

    pub fn value(&self, field: Field) -> Option<f64> {
        self.fields.get(&field).map(|m| m.value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    Air,
    Sky,
}

impl DeviceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceKind::Air => "air",
            DeviceKind::Sky => "sky",
        }
    }
}

/// Pressure tendency over the trend window, reported as GV8 on air devices
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trend {
    Falling = 0,
    Steady = 1,
    Rising = 2,
}

impl Trend {
    pub fn code(self) -> f64 {
        self as u8 as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitSystem {
    Metric,
    Imperial,
}

impl UnitSystem {
    /// Anything other than "metric" selects imperial units
    pub fn from_param(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("metric") {
            UnitSystem::Metric
        } else {
            UnitSystem::Imperial
        }
    }
}
