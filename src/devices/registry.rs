/// In-memory registry of controller-visible devices
use log::{debug, error, info, warn};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::devices::drivers::Driver;
use crate::models::{DeviceKind, Uom};
use crate::polyglot::messages::{Message, NodeAnnouncement, StatusUpdate};
use crate::polyglot::Publish;

#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    pub address: String,
    pub name: String,
    pub kind: DeviceKind,
    pub node_def_id: String,
    pub drivers: Vec<Driver>,
    pub announced: bool,
}

impl Device {
    fn announcement(&self) -> NodeAnnouncement {
        NodeAnnouncement {
            address: self.address.clone(),
            name: self.name.clone(),
            node_def_id: self.node_def_id.clone(),
            primary: self.address.clone(),
            drivers: self.drivers.clone(),
        }
    }

    #[cfg(test)]
    pub fn driver(&self, code: &str) -> Option<&Driver> {
        self.drivers.iter().find(|d| d.driver == code)
    }
}

/// Owns every device and publishes their changes to the controller
///
/// Without a publisher every mutating call is logged and dropped.
pub struct DeviceRegistry {
    devices: BTreeMap<String, Device>,
    publisher: Option<Arc<dyn Publish>>,
}

impl DeviceRegistry {
    pub fn new(publisher: Option<Arc<dyn Publish>>) -> Self {
        DeviceRegistry {
            devices: BTreeMap::new(),
            publisher,
        }
    }

    pub fn contains(&self, address: &str) -> bool {
        self.devices.contains_key(address)
    }

    pub fn get(&self, address: &str) -> Option<&Device> {
        self.devices.get(address)
    }

    pub fn devices(&self) -> impl Iterator<Item = &Device> {
        self.devices.values()
    }

    pub fn addresses(&self) -> Vec<String> {
        self.devices.keys().cloned().collect()
    }

    fn publisher(&self, operation: &str, address: &str) -> Option<&Arc<dyn Publish>> {
        if self.publisher.is_none() {
            error!(
                "{} for {} aborted: no control channel to publish on",
                operation, address
            );
        }
        self.publisher.as_ref()
    }

    /// Create a device and announce it to the controller
    pub fn add_device(
        &mut self,
        kind: DeviceKind,
        node_def_id: &str,
        address: &str,
        name: &str,
        drivers: Vec<Driver>,
    ) -> bool {
        let Some(publisher) = self.publisher("addnode", address) else {
            return false;
        };

        let mut device = Device {
            address: address.to_string(),
            name: name.to_string(),
            kind,
            node_def_id: node_def_id.to_string(),
            drivers,
            announced: false,
        };
        publisher.publish(Message::add_node(device.announcement()));
        device.announced = true;

        info!("Added {} device {} as {}", kind.as_str(), address, node_def_id);
        self.devices.insert(address.to_string(), device);
        true
    }

    /// Track a device the controller already knows without announcing it
    pub fn register_existing(
        &mut self,
        kind: DeviceKind,
        node_def_id: &str,
        address: &str,
        name: &str,
        drivers: Vec<Driver>,
    ) {
        debug!("Registering existing node {} ({})", address, node_def_id);
        self.devices.insert(
            address.to_string(),
            Device {
                address: address.to_string(),
                name: name.to_string(),
                kind,
                node_def_id: node_def_id.to_string(),
                drivers,
                announced: true,
            },
        );
    }

    /// Update a driver, publishing only when its value or unit changed
    ///
    /// Returns whether a status update was published.
    pub fn set_driver(&mut self, address: &str, code: &str, value: f64, uom: Uom) -> bool {
        let Some(publisher) = self.publisher("status", address).cloned() else {
            return false;
        };
        let Some(device) = self.devices.get_mut(address) else {
            warn!("Status for unknown device {}", address);
            return false;
        };
        let Some(driver) = device.drivers.iter_mut().find(|d| d.driver == code) else {
            warn!("Device {} has no driver {}", address, code);
            return false;
        };

        if driver.value == value && driver.uom == uom {
            return false;
        }

        driver.value = value;
        driver.uom = uom;
        debug!("{} {} = {} ({:?})", address, code, value, uom);
        publisher.publish(Message::Status(StatusUpdate {
            address: address.to_string(),
            driver: code.to_string(),
            value,
            uom,
        }));
        true
    }

    /// Publish every driver of a device regardless of change
    pub fn report_all_drivers(&self, address: &str) {
        let Some(publisher) = self.publisher("report", address) else {
            return;
        };
        let Some(device) = self.devices.get(address) else {
            warn!("Report for unknown device {}", address);
            return;
        };
        if !device.announced {
            debug!("Device {} not announced yet, nothing to report", address);
            return;
        }

        for driver in &device.drivers {
            publisher.publish(Message::Status(StatusUpdate {
                address: device.address.clone(),
                driver: driver.driver.clone(),
                value: driver.value,
                uom: driver.uom,
            }));
        }
    }

    /// Announce an existing device again under a new definition
    ///
    /// The controller cannot redefine a node in place, so the node is
    /// re-added with the new definition id and drivers.
    pub fn reannounce(&mut self, address: &str, node_def_id: &str, drivers: Vec<Driver>) -> bool {
        let Some(publisher) = self.publisher("re-announce", address).cloned() else {
            return false;
        };
        let Some(device) = self.devices.get_mut(address) else {
            warn!("Re-announce for unknown device {}", address);
            return false;
        };

        device.node_def_id = node_def_id.to_string();
        device.drivers = drivers;
        publisher.publish(Message::add_node(device.announcement()));
        device.announced = true;

        info!("Re-announced {} as {}", address, node_def_id);
        true
    }
}
