/// UDP broadcast listener and packet classification
use log::{debug, error, info, warn};
use std::net::{Ipv4Addr, SocketAddr};
use tokio::net::UdpSocket;

use crate::error::Result;
use crate::models::{DeviceKind, PacketType, RawObservation, Reading};
use crate::weather::calculator::Calculator;

/// Port the WeatherFlow hub broadcasts on
pub const DEFAULT_PORT: u16 = 50222;
const MAX_DATAGRAM: usize = 4096;

pub struct Listener {
    socket: UdpSocket,
    port: u16,
    buf: Vec<u8>,
}

impl Listener {
    pub async fn bind(port: u16) -> Result<Self> {
        let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
        let socket = UdpSocket::bind(addr).await?;
        let local = socket.local_addr()?;
        info!("Listening for hub broadcasts on {}", local);

        Ok(Listener {
            socket,
            port: local.port(),
            buf: vec![0u8; MAX_DATAGRAM],
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Receive one datagram and return the packets it carries
    ///
    /// Cancel safe: nothing is consumed until the datagram has arrived.
    pub async fn recv(&mut self) -> Result<Vec<RawObservation>> {
        let (len, from) = self.socket.recv_from(&mut self.buf).await?;
        debug!("Received {} bytes from {}", len, from);
        Ok(parse_datagram(&self.buf[..len]))
    }
}

/// Move the listener to `port`
///
/// A failed bind is logged and keeps whatever listener was already
/// running, or none.
pub async fn rebind(current: Option<Listener>, port: u16) -> Option<Listener> {
    if let Some(listener) = &current {
        if listener.port() == port {
            return current;
        }
    }

    match Listener::bind(port).await {
        Ok(listener) => Some(listener),
        Err(e) => {
            error!("Failed to listen on port {}: {}", port, e);
            current
        }
    }
}

/// Receive from the listener if there is one, otherwise wait forever
pub async fn recv_from(listener: &mut Option<Listener>) -> Result<Vec<RawObservation>> {
    match listener {
        Some(listener) => listener.recv().await,
        None => std::future::pending().await,
    }
}

/// Split a datagram into JSON packets, dropping any that fail to parse
pub fn parse_datagram(data: &[u8]) -> Vec<RawObservation> {
    let text = match std::str::from_utf8(data) {
        Ok(text) => text,
        Err(e) => {
            warn!("Dropping non UTF-8 datagram: {}", e);
            return Vec::new();
        }
    };

    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| match serde_json::from_str::<RawObservation>(line) {
            Ok(packet) => Some(packet),
            Err(e) => {
                warn!("Dropping malformed packet: {}", e);
                None
            }
        })
        .collect()
}

/// Send a packet through the calculator according to its type
///
/// Returns the device kind and canonical reading for air and sky
/// observations; every other packet is logged and discarded.
pub fn route(calculator: &mut Calculator, packet: &RawObservation) -> Option<(DeviceKind, Reading)> {
    let result = match PacketType::from_tag(&packet.packet_type) {
        PacketType::AirObservation => calculator
            .compute_air(packet)
            .map(|reading| (DeviceKind::Air, reading)),
        PacketType::SkyObservation => calculator
            .compute_sky(packet)
            .map(|reading| (DeviceKind::Sky, reading)),
        PacketType::Ignored => {
            debug!("Ignoring {} packet from {}", packet.packet_type, packet.serial_number);
            return None;
        }
        PacketType::Unknown => {
            info!("{} unknown data type", packet.packet_type);
            return None;
        }
    };

    match result {
        Ok(routed) => Some(routed),
        Err(e) => {
            warn!(
                "Dropping {} packet from {}: {}",
                packet.packet_type, packet.serial_number, e
            );
            None
        }
    }
}
