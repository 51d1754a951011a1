/// Metric to imperial conversion and node definition selection
use crate::models::{DeviceKind, Reading, UnitSystem, Uom};
use crate::utils::round_to;

const KM_PER_MILE: f64 = 1.609344;
const INCHES_PER_MM: f64 = 0.03937;

/// Rewrite a metric reading in imperial units
///
/// Only fields tagged with a metric unit are touched, so applying this
/// to an already converted reading leaves it unchanged.
pub fn to_imperial(reading: &mut Reading) {
    for measurement in reading.fields.values_mut() {
        let (value, uom) = match measurement.uom {
            Uom::Celsius => (round_to(measurement.value * 1.8 + 32.0, 1), Uom::Fahrenheit),
            Uom::Kilometers => (round_to(measurement.value / KM_PER_MILE, 1), Uom::Miles),
            Uom::KilometersPerHour => {
                (round_to(measurement.value / KM_PER_MILE, 2), Uom::MilesPerHour)
            }
            Uom::Millimeters => (round_to(measurement.value * INCHES_PER_MM, 3), Uom::Inches),
            Uom::MillimetersPerHour => {
                (round_to(measurement.value * INCHES_PER_MM, 3), Uom::InchesPerHour)
            }
            _ => continue,
        };
        measurement.value = value;
        measurement.uom = uom;
    }
}

/// Copy of a canonical reading in the requested unit system
pub fn convert(reading: &Reading, units: UnitSystem) -> Reading {
    let mut converted = reading.clone();
    if units == UnitSystem::Imperial {
        to_imperial(&mut converted);
    }
    converted
}

/// Node definition a device of `kind` is announced as
pub fn node_def_id(kind: DeviceKind, units: UnitSystem) -> &'static str {
    match (kind, units) {
        (DeviceKind::Air, UnitSystem::Metric) => "WF_Air",
        (DeviceKind::Air, UnitSystem::Imperial) => "WF_AirSI",
        (DeviceKind::Sky, UnitSystem::Metric) => "WF_Sky",
        (DeviceKind::Sky, UnitSystem::Imperial) => "WF_SkySI",
    }
}

/// Inverse of `node_def_id`, None for definitions this bridge does not own
pub fn parse_node_def(id: &str) -> Option<(DeviceKind, UnitSystem)> {
    match id {
        "WF_Air" => Some((DeviceKind::Air, UnitSystem::Metric)),
        "WF_AirSI" => Some((DeviceKind::Air, UnitSystem::Imperial)),
        "WF_Sky" => Some((DeviceKind::Sky, UnitSystem::Metric)),
        "WF_SkySI" => Some((DeviceKind::Sky, UnitSystem::Imperial)),
        _ => None,
    }
}

/// Unit code a metric driver is reported with in `units`
pub fn uom_for(uom: Uom, units: UnitSystem) -> Uom {
    if units == UnitSystem::Metric {
        return uom;
    }
    match uom {
        Uom::Celsius => Uom::Fahrenheit,
        Uom::Kilometers => Uom::Miles,
        Uom::KilometersPerHour => Uom::MilesPerHour,
        Uom::Millimeters => Uom::Inches,
        Uom::MillimetersPerHour => Uom::InchesPerHour,
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Field;
    use proptest::prelude::*;

    fn metric_reading(temp: f64, distance: f64, speed: f64, rain: f64) -> Reading {
        let mut reading = Reading::new("SK-00000001");
        reading.set(Field::Temperature, temp, Uom::Celsius);
        reading.set(Field::StrikeDistance, distance, Uom::Kilometers);
        reading.set(Field::WindSpeed, speed, Uom::KilometersPerHour);
        reading.set(Field::DailyRain, rain, Uom::Millimeters);
        reading.set(Field::RainRate, rain, Uom::MillimetersPerHour);
        reading.set(Field::Humidity, 55.0, Uom::Percent);
        reading
    }

    #[test]
    fn converts_each_family() {
        let mut reading = metric_reading(21.0, 16.09344, 16.09344, 25.4);
        to_imperial(&mut reading);

        assert_eq!(reading.value(Field::Temperature), Some(69.8));
        assert_eq!(reading.get(Field::Temperature).unwrap().uom, Uom::Fahrenheit);
        assert_eq!(reading.value(Field::StrikeDistance), Some(10.0));
        assert_eq!(reading.get(Field::StrikeDistance).unwrap().uom, Uom::Miles);
        assert_eq!(reading.value(Field::WindSpeed), Some(10.0));
        assert_eq!(reading.get(Field::WindSpeed).unwrap().uom, Uom::MilesPerHour);
        assert_eq!(reading.value(Field::DailyRain), Some(1.0));
        assert_eq!(reading.get(Field::DailyRain).unwrap().uom, Uom::Inches);
        assert_eq!(reading.get(Field::RainRate).unwrap().uom, Uom::InchesPerHour);
        assert_eq!(reading.get(Field::Humidity).unwrap().uom, Uom::Percent);
    }

    #[test]
    fn conversion_is_applied_once() {
        let mut once = metric_reading(21.0, 5.0, 10.0, 2.0);
        to_imperial(&mut once);
        let mut twice = once.clone();
        to_imperial(&mut twice);
        assert_eq!(once, twice);
    }

    #[test]
    fn metric_convert_is_identity() {
        let reading = metric_reading(21.0, 5.0, 10.0, 2.0);
        assert_eq!(convert(&reading, UnitSystem::Metric), reading);
    }

    #[test]
    fn node_defs_round_trip() {
        for kind in [DeviceKind::Air, DeviceKind::Sky] {
            for units in [UnitSystem::Metric, UnitSystem::Imperial] {
                assert_eq!(parse_node_def(node_def_id(kind, units)), Some((kind, units)));
            }
        }
        assert_eq!(parse_node_def("controller"), None);
    }

    proptest! {
        #[test]
        fn inverse_conversion_recovers_metric_values(
            temp in -40.0f64..50.0,
            distance in 0.0f64..40.0,
            speed in 0.0f64..150.0,
            rain in 0.0f64..200.0,
        ) {
            let mut reading = metric_reading(temp, distance, speed, rain);
            to_imperial(&mut reading);

            let f = reading.value(Field::Temperature).unwrap();
            prop_assert!(((f - 32.0) / 1.8 - temp).abs() <= 0.05);
            let mi = reading.value(Field::StrikeDistance).unwrap();
            prop_assert!((mi * KM_PER_MILE - distance).abs() <= 0.05 * KM_PER_MILE + 1e-9);
            let mph = reading.value(Field::WindSpeed).unwrap();
            prop_assert!((mph * KM_PER_MILE - speed).abs() <= 0.005 * KM_PER_MILE + 1e-9);
            let inches = reading.value(Field::DailyRain).unwrap();
            prop_assert!((inches / INCHES_PER_MM - rain).abs() <= 0.0005 / INCHES_PER_MM + 1e-9);
        }
    }
}
