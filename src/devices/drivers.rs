/// Driver layouts for air and sky devices
use serde::Serialize;
use std::collections::BTreeMap;

use crate::models::{DeviceKind, Field, Reading, UnitSystem, Uom};
use crate::weather::units::uom_for;

/// Seconds since the device last reported, present on every device
pub const LAST_UPDATE: &str = "GV0";

/// A named data point on a device
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Driver {
    pub driver: String,
    pub value: f64,
    pub uom: Uom,
}

impl Driver {
    pub fn new(code: &str, value: f64, uom: Uom) -> Self {
        Driver {
            driver: code.to_string(),
            value,
            uom,
        }
    }
}

/// Driver code, the reading field it mirrors and its metric unit
#[derive(Debug, Clone, Copy)]
pub struct DriverSpec {
    pub code: &'static str,
    pub field: Option<Field>,
    pub uom: Uom,
}

const fn spec(code: &'static str, field: Option<Field>, uom: Uom) -> DriverSpec {
    DriverSpec { code, field, uom }
}

const AIR: [DriverSpec; 11] = [
    spec(LAST_UPDATE, None, Uom::Index),
    spec("GV1", Some(Field::Temperature), Uom::Celsius),
    spec("GV2", Some(Field::Humidity), Uom::Percent),
    spec("GV3", Some(Field::SeaLevel), Uom::InHg),
    spec("GV4", Some(Field::StrikeCount), Uom::Index),
    spec("GV5", Some(Field::StrikeDistance), Uom::Kilometers),
    spec("GV6", Some(Field::Dewpoint), Uom::Celsius),
    spec("GV7", Some(Field::ApparentTemp), Uom::Celsius),
    spec("GV8", Some(Field::Trend), Uom::Index),
    spec("GV9", Some(Field::Battery), Uom::Volts),
    spec("GV10", Some(Field::Pressure), Uom::InHg),
];

const SKY: [DriverSpec; 12] = [
    spec(LAST_UPDATE, None, Uom::Index),
    spec("GV1", Some(Field::Illuminance), Uom::Lux),
    spec("GV2", Some(Field::Uv), Uom::UvIndex),
    spec("GV3", Some(Field::SolarRadiation), Uom::WattsPerSquareMeter),
    spec("GV4", Some(Field::WindSpeed), Uom::KilometersPerHour),
    spec("GV5", Some(Field::WindGust), Uom::KilometersPerHour),
    spec("GV6", Some(Field::WindLull), Uom::KilometersPerHour),
    spec("GV7", Some(Field::WindDirection), Uom::Degrees),
    spec("GV8", Some(Field::RainRate), Uom::MillimetersPerHour),
    spec("GV9", Some(Field::DailyRain), Uom::Millimeters),
    spec("GV10", Some(Field::Battery), Uom::Volts),
    spec("GV11", Some(Field::PrecipType), Uom::Index),
];

pub fn layout(kind: DeviceKind) -> &'static [DriverSpec] {
    match kind {
        DeviceKind::Air => &AIR,
        DeviceKind::Sky => &SKY,
    }
}

/// Drivers for a device of `kind` filled from an already converted reading
///
/// Fields missing from the reading (and GV0) start at zero.
pub fn from_reading(kind: DeviceKind, reading: &Reading, units: UnitSystem) -> Vec<Driver> {
    layout(kind)
        .iter()
        .map(|spec| {
            let value = spec
                .field
                .and_then(|field| reading.value(field))
                .unwrap_or(0.0);
            let uom = spec
                .field
                .and_then(|field| reading.get(field))
                .map(|m| m.uom)
                .unwrap_or_else(|| uom_for(spec.uom, units));
            Driver::new(spec.code, value, uom)
        })
        .collect()
}

/// Drivers for a device of `kind` seeded from stored controller values
pub fn from_stored(
    kind: DeviceKind,
    units: UnitSystem,
    stored: &BTreeMap<String, f64>,
) -> Vec<Driver> {
    layout(kind)
        .iter()
        .map(|spec| {
            Driver::new(
                spec.code,
                stored.get(spec.code).copied().unwrap_or(0.0),
                uom_for(spec.uom, units),
            )
        })
        .collect()
}
