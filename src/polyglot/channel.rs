/// MQTT session with the controller
use log::{debug, error, info};
use rumqttc::{AsyncClient, Event as MqttEvent, EventLoop, MqttOptions, Packet, QoS, Transport};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, Duration};

use crate::config::BridgeConfig;
use crate::polyglot::messages::{encode, ConfiguredNode, Message};
use crate::polyglot::protocol::{Event, Protocol, Settings};

const KEEP_ALIVE_SECS: u64 = 30;
const REQUEST_CAPACITY: usize = 64;
const WAIT_BEFORE_RECONNECT: u64 = 5;

/// Fire-and-forget delivery of messages to the controller
pub trait Publish {
    fn publish(&self, message: Message);
}

/// Publishes on the node server's command topic without waiting for acks
#[derive(Clone)]
pub struct MqttPublisher {
    client: AsyncClient,
    topic: String,
    profile: String,
}

impl Publish for MqttPublisher {
    fn publish(&self, message: Message) {
        let payload = match encode(&message, &self.profile) {
            Ok(payload) => payload,
            Err(e) => {
                error!("Failed to encode message: {}", e);
                return;
            }
        };

        if let Err(e) = self
            .client
            .try_publish(&self.topic, QoS::AtMostOnce, false, payload)
        {
            error!("Failed to publish to {}: {}", self.topic, e);
        }
    }
}

/// Result of the configuration handshake
#[derive(Debug, Clone)]
pub struct Session {
    pub nodes: Vec<ConfiguredNode>,
    pub settings: Settings,
}

pub struct ControlChannel {
    client: AsyncClient,
    eventloop: EventLoop,
    protocol: Protocol,
    publisher: Arc<MqttPublisher>,
}

impl ControlChannel {
    /// Set up the MQTT client; the connection is made by the first poll
    pub fn connect(config: &BridgeConfig) -> Self {
        let mut options = MqttOptions::new(&config.client_id, &config.mqtt_host, config.mqtt_port);
        options.set_keep_alive(Duration::from_secs(KEEP_ALIVE_SECS));
        if let Some((username, password)) = &config.credentials {
            options.set_credentials(username, password);
        }
        if config.use_tls {
            options.set_transport(Transport::tls_with_default_config());
        }

        let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let mut protocol = Protocol::new(&config.profile);
        protocol.on_connecting();
        info!(
            "Connecting to controller at {}:{} as profile {}",
            config.mqtt_host, config.mqtt_port, config.profile
        );

        let publisher = Arc::new(MqttPublisher {
            client: client.clone(),
            topic: protocol.command_topic(),
            profile: protocol.profile().to_string(),
        });

        ControlChannel {
            client,
            eventloop,
            protocol,
            publisher,
        }
    }

    pub fn publisher(&self) -> Arc<dyn Publish> {
        self.publisher.clone()
    }

    pub fn mark_updated(&mut self, address: &str) {
        self.protocol.mark_updated(address, Instant::now());
    }

    /// Drive the connection until the controller has sent its configuration
    pub async fn await_configuration(&mut self) -> Session {
        loop {
            match self.next_event().await {
                Some(Event::Configured { nodes, settings }) => {
                    return Session { nodes, settings };
                }
                Some(other) => debug!("Ignoring {:?} before configuration", other),
                None => {}
            }
        }
    }

    /// Poll the connection once, returning any protocol event it produced
    pub async fn next_event(&mut self) -> Option<Event> {
        match self.eventloop.poll().await {
            Ok(MqttEvent::Incoming(Packet::ConnAck(_))) => {
                self.on_connack();
                None
            }
            Ok(MqttEvent::Incoming(Packet::Publish(publish))) => {
                self.protocol
                    .handle(&publish.topic, &publish.payload, &*self.publisher)
            }
            Ok(MqttEvent::Incoming(Packet::Disconnect)) => {
                self.protocol.on_disconnected();
                None
            }
            Ok(_) => None,
            Err(e) => {
                error!("Connection error while {:?}: {}", self.protocol.state(), e);
                self.protocol.on_disconnected();
                sleep(Duration::from_secs(WAIT_BEFORE_RECONNECT)).await;
                self.protocol.on_connecting();
                None
            }
        }
    }

    // Subscriptions are re-issued on every (re)connect
    fn on_connack(&mut self) {
        for topic in self.protocol.subscriptions() {
            if let Err(e) = self.client.try_subscribe(&topic, QoS::AtMostOnce) {
                error!("Subscribe to {} failed: {}", topic, e);
            }
        }
        let announcement = self.protocol.on_connected();
        self.publisher.publish(announcement);
    }
}
