/// Glue between observations, the device registry and controller events
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::sync::Arc;
use time::UtcOffset;

use crate::devices::drivers::{self, LAST_UPDATE};
use crate::devices::DeviceRegistry;
use crate::models::{DeviceKind, RawObservation, Reading, UnitSystem, Uom};
use crate::polyglot::messages::ConfiguredNode;
use crate::polyglot::{Event, Publish, Settings};
use crate::utils::serial_to_address;
use crate::weather::units::{convert, node_def_id, parse_node_def};
use crate::weather::{route, Calculator};

pub struct Bridge {
    registry: DeviceRegistry,
    calculator: Calculator,
    units: UnitSystem,
}

impl Bridge {
    pub fn new(publisher: Option<Arc<dyn Publish>>, settings: &Settings, offset: UtcOffset) -> Self {
        Bridge {
            registry: DeviceRegistry::new(publisher),
            calculator: Calculator::new(settings.elevation, offset),
            units: settings.units,
        }
    }

    #[cfg(test)]
    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    /// Process one hub packet, returning the address of the updated device
    pub fn on_packet(&mut self, packet: &RawObservation) -> Option<String> {
        let (kind, reading) = route(&mut self.calculator, packet)?;
        self.on_observation(kind, &reading)
    }

    /// Create or update the device for a canonical reading
    pub fn on_observation(&mut self, kind: DeviceKind, reading: &Reading) -> Option<String> {
        let address = serial_to_address(&reading.serial_number);
        let converted = convert(reading, self.units);

        if !self.registry.contains(&address) {
            info!("Serial number {} not found, adding node", reading.serial_number);
            let drivers = drivers::from_reading(kind, &converted, self.units);
            if !self.registry.add_device(
                kind,
                node_def_id(kind, self.units),
                &address,
                &reading.serial_number,
                drivers,
            ) {
                return None;
            }
            self.registry.report_all_drivers(&address);
            return Some(address);
        }

        if self.registry.get(&address).map(|d| d.kind) != Some(kind) {
            warn!("{} observation for {} which is not a {} device", kind.as_str(), address, kind.as_str());
            return None;
        }

        self.registry.set_driver(&address, LAST_UPDATE, 0.0, Uom::Index);
        for spec in drivers::layout(kind) {
            let Some(measurement) = spec.field.and_then(|field| converted.get(field)) else {
                continue;
            };
            self.registry
                .set_driver(&address, spec.code, measurement.value, measurement.uom);
        }
        Some(address)
    }

    /// Record seconds since a device last reported
    pub fn on_poll(&mut self, address: &str, elapsed: u64) {
        self.registry
            .set_driver(address, LAST_UPDATE, elapsed as f64, Uom::Index);
    }

    pub fn on_query(&self) {
        for address in self.registry.addresses() {
            self.registry.report_all_drivers(&address);
        }
    }

    /// Track nodes the controller already has, re-announcing any whose
    /// definition does not match the active unit system
    pub fn adopt_nodes(&mut self, nodes: &[ConfiguredNode]) {
        for node in nodes {
            if self.registry.contains(&node.address) {
                continue;
            }
            let Some((kind, node_units)) = parse_node_def(&node.node_def_id) else {
                debug!("Skipping node {} ({})", node.address, node.node_def_id);
                continue;
            };

            info!("Adding {} ({})", node.name, node.address);
            self.registry.register_existing(
                kind,
                &node.node_def_id,
                &node.address,
                &node.name,
                drivers::from_stored(kind, node_units, &node.drivers),
            );

            if node_units != self.units {
                let drivers = self.drivers_for(kind, &node.name);
                self.registry
                    .reannounce(&node.address, node_def_id(kind, self.units), drivers);
            }
        }
    }

    /// Apply new controller settings, re-announcing devices on a unit change
    pub fn apply_settings(&mut self, settings: &Settings) {
        self.calculator.set_elevation(settings.elevation);
        if settings.units == self.units {
            return;
        }

        info!("Units changed from {:?} to {:?}", self.units, settings.units);
        self.units = settings.units;
        let devices: Vec<(String, String, DeviceKind)> = self
            .registry
            .devices()
            .map(|d| (d.address.clone(), d.name.clone(), d.kind))
            .collect();
        for (address, name, kind) in devices {
            let drivers = self.drivers_for(kind, &name);
            self.registry
                .reannounce(&address, node_def_id(kind, self.units), drivers);
        }
    }

    // Drivers in the active units from the latest reading, zeroed if none yet
    fn drivers_for(&self, kind: DeviceKind, serial_number: &str) -> Vec<drivers::Driver> {
        match self.calculator.latest(serial_number) {
            Some(reading) => drivers::from_reading(kind, &convert(reading, self.units), self.units),
            None => drivers::from_stored(kind, self.units, &BTreeMap::new()),
        }
    }

    /// Act on a controller event; returns settings when they were (re)applied
    pub fn handle_event(&mut self, event: Event) -> Option<Settings> {
        match event {
            Event::Configured { nodes, settings } => {
                self.apply_settings(&settings);
                self.adopt_nodes(&nodes);
                Some(settings)
            }
            Event::Reconfigured { settings } => {
                self.apply_settings(&settings);
                Some(settings)
            }
            Event::ShortPoll(elapsed) => {
                for (address, seconds) in elapsed {
                    self.on_poll(&address, seconds);
                }
                None
            }
            Event::LongPoll => {
                debug!("Long poll");
                None
            }
            Event::Query => {
                self.on_query();
                None
            }
            Event::Stop => {
                info!("Stop requested; continuing until the process is terminated");
                None
            }
            Event::Delete => {
                info!("Removing WeatherFlow node server");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Field;
    use crate::polyglot::messages::Message;
    use crate::polyglot::testing::RecordingPublisher;
    use crate::weather::calculator::sea_level_pressure;
    use crate::weather::listener::parse_datagram;

    const EPOCH: i64 = 1_700_000_000;

    fn bridge(units: UnitSystem, elevation: f64) -> (Bridge, Arc<RecordingPublisher>) {
        let publisher = Arc::new(RecordingPublisher::default());
        let settings = Settings {
            units,
            elevation,
            listen_port: 50222,
        };
        (
            Bridge::new(Some(publisher.clone()), &settings, UtcOffset::UTC),
            publisher,
        )
    }

    fn air(epoch: i64, pressure: f64) -> RawObservation {
        let json = format!(
            r#"{{"serial_number":"AR-00001234","type":"obs_air","hub_sn":"HB-00000001","obs":[[{},{},21.0,55,0,0,3.6,60]],"firmware_revision":17}}"#,
            epoch, pressure
        );
        parse_datagram(json.as_bytes()).remove(0)
    }

    fn sky(epoch: i64) -> RawObservation {
        let json = format!(
            r#"{{"serial_number":"SK-00005678","type":"obs_sky","hub_sn":"HB-00000001","obs":[[{},9000,3,0.1,1.0,2.5,4.0,180,3.12,1,130,null,1,3]],"firmware_revision":29}}"#,
            epoch
        );
        parse_datagram(json.as_bytes()).remove(0)
    }

    fn status_codes(messages: &[Message]) -> Vec<String> {
        let mut codes: Vec<String> = messages
            .iter()
            .filter_map(|m| match m {
                Message::Status(status) => Some(status.driver.clone()),
                _ => None,
            })
            .collect();
        codes.sort();
        codes
    }

    #[test]
    fn first_air_packet_creates_device() {
        let (mut bridge, publisher) = bridge(UnitSystem::Metric, 50.0);
        assert_eq!(bridge.on_packet(&air(EPOCH, 1013.0)), Some("ar_00001234".to_string()));

        let sent = publisher.take();
        match &sent[0] {
            Message::AddNode(add) => {
                assert_eq!(add.nodes[0].address, "ar_00001234");
                assert_eq!(add.nodes[0].name, "AR-00001234");
                assert_eq!(add.nodes[0].node_def_id, "WF_Air");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(status_codes(&sent).len(), 11);

        let device = bridge.registry().get("ar_00001234").unwrap();
        let sealevel = ((sea_level_pressure(1013.0, 50.0) * 0.02952998751) * 1000.0).round() / 1000.0;
        assert_eq!(device.driver("GV3").unwrap().value, sealevel);
        assert_eq!(device.driver("GV3").unwrap().uom, Uom::InHg);
        assert_eq!(device.driver("GV1").unwrap().value, 21.0);
        assert_eq!(device.driver("GV1").unwrap().uom, Uom::Celsius);
    }

    #[test]
    fn pressure_change_publishes_only_changed_drivers() {
        let (mut bridge, publisher) = bridge(UnitSystem::Metric, 50.0);
        bridge.on_packet(&air(EPOCH, 1013.0));
        publisher.take();

        bridge.on_packet(&air(EPOCH + 60, 1015.0));
        assert_eq!(status_codes(&publisher.take()), vec!["GV10", "GV3", "GV8"]);

        let device = bridge.registry().get("ar_00001234").unwrap();
        assert_eq!(device.driver("GV8").unwrap().value, 2.0);
    }

    #[test]
    fn repeated_packet_publishes_nothing() {
        let (mut bridge, publisher) = bridge(UnitSystem::Metric, 0.0);
        bridge.on_packet(&air(EPOCH, 1013.0));
        publisher.take();

        bridge.on_packet(&air(EPOCH + 60, 1013.0));
        assert!(publisher.take().is_empty());
    }

    #[test]
    fn imperial_devices_use_imperial_definitions() {
        let (mut bridge, publisher) = bridge(UnitSystem::Imperial, 0.0);
        bridge.on_packet(&sky(EPOCH));

        match &publisher.take()[0] {
            Message::AddNode(add) => {
                assert_eq!(add.nodes[0].node_def_id, "WF_SkySI");
                let speed = &add.nodes[0].drivers[4];
                assert_eq!(speed.uom, Uom::MilesPerHour);
                assert_eq!(speed.value, 5.59);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn unit_change_reannounces_every_device() {
        let (mut bridge, publisher) = bridge(UnitSystem::Metric, 0.0);
        bridge.on_packet(&air(EPOCH, 1013.0));
        bridge.on_packet(&sky(EPOCH));
        publisher.take();

        let imperial = Settings {
            units: UnitSystem::Imperial,
            elevation: 0.0,
            listen_port: 50222,
        };
        assert_eq!(
            bridge.handle_event(Event::Reconfigured { settings: imperial }),
            Some(imperial)
        );

        let announced: Vec<(String, String)> = publisher
            .take()
            .into_iter()
            .filter_map(|m| match m {
                Message::AddNode(add) => {
                    Some((add.nodes[0].address.clone(), add.nodes[0].node_def_id.clone()))
                }
                _ => None,
            })
            .collect();
        assert_eq!(
            announced,
            vec![
                ("ar_00001234".to_string(), "WF_AirSI".to_string()),
                ("sk_00005678".to_string(), "WF_SkySI".to_string()),
            ]
        );

        let temp = bridge.registry().get("ar_00001234").unwrap().driver("GV1").unwrap();
        assert_eq!((temp.value, temp.uom), (69.8, Uom::Fahrenheit));

        // same settings again: nothing to re-announce
        bridge.apply_settings(&imperial);
        assert!(publisher.take().is_empty());
    }

    #[test]
    fn adopts_existing_nodes_from_config() {
        let (mut bridge, publisher) = bridge(UnitSystem::Metric, 0.0);
        let mut stored = BTreeMap::new();
        stored.insert("GV1".to_string(), 20.5);
        let nodes = vec![
            ConfiguredNode {
                address: "ar_00001234".to_string(),
                name: "AR-00001234".to_string(),
                node_def_id: "WF_Air".to_string(),
                drivers: stored,
            },
            ConfiguredNode {
                address: "sk_00005678".to_string(),
                name: "SK-00005678".to_string(),
                node_def_id: "WF_SkySI".to_string(),
                drivers: BTreeMap::new(),
            },
            ConfiguredNode {
                address: "controller".to_string(),
                name: "WeatherFlow".to_string(),
                node_def_id: "WeatherFlow".to_string(),
                drivers: BTreeMap::new(),
            },
        ];
        bridge.adopt_nodes(&nodes);

        let sent = publisher.take();
        assert_eq!(sent.len(), 1, "only the mismatched sky node is re-announced");
        assert!(!bridge.registry().contains("controller"));
        assert_eq!(bridge.registry().get("sk_00005678").unwrap().node_def_id, "WF_Sky");

        // stored value seeds change detection
        bridge.on_packet(&air(EPOCH, 1013.0));
        let codes = status_codes(&publisher.take());
        assert!(codes.contains(&"GV1".to_string()));
        assert!(!codes.contains(&"GV0".to_string()));
    }

    #[test]
    fn short_poll_sets_last_update_once_per_change() {
        let (mut bridge, publisher) = bridge(UnitSystem::Metric, 0.0);
        bridge.on_packet(&air(EPOCH, 1013.0));
        publisher.take();

        let poll = || Event::ShortPoll(vec![("ar_00001234".to_string(), 30)]);
        bridge.handle_event(poll());
        bridge.handle_event(poll());
        assert_eq!(status_codes(&publisher.take()), vec!["GV0"]);
        assert_eq!(
            bridge.registry().get("ar_00001234").unwrap().driver("GV0").unwrap().value,
            30.0
        );

        // a fresh observation resets the counter
        bridge.on_packet(&air(EPOCH + 60, 1013.0));
        assert_eq!(status_codes(&publisher.take()), vec!["GV0"]);
    }

    #[test]
    fn query_reports_every_driver() {
        let (mut bridge, publisher) = bridge(UnitSystem::Metric, 0.0);
        bridge.on_packet(&air(EPOCH, 1013.0));
        bridge.on_packet(&sky(EPOCH));
        publisher.take();

        assert_eq!(bridge.handle_event(Event::Query), None);
        assert_eq!(status_codes(&publisher.take()).len(), 11 + 12);
    }

    #[test]
    fn apparent_temperature_follows_sky_wind() {
        let (mut bridge, _publisher) = bridge(UnitSystem::Metric, 0.0);
        bridge.on_packet(&air(EPOCH, 1013.0));
        bridge.on_packet(&sky(EPOCH));
        bridge.on_packet(&air(EPOCH + 60, 1013.0));

        let reading = bridge.calculator.latest("AR-00001234").unwrap();
        let device = bridge.registry().get("ar_00001234").unwrap();
        assert_eq!(
            device.driver("GV7").unwrap().value,
            reading.value(Field::ApparentTemp).unwrap()
        );
        assert!(device.driver("GV7").unwrap().value != 0.0);
    }

    #[test]
    fn without_publisher_nothing_is_created() {
        let settings = Settings {
            units: UnitSystem::Metric,
            elevation: 0.0,
            listen_port: 50222,
        };
        let mut bridge = Bridge::new(None, &settings, UtcOffset::UTC);
        assert_eq!(bridge.on_packet(&air(EPOCH, 1013.0)), None);
        assert!(!bridge.registry().contains("ar_00001234"));
    }
}
