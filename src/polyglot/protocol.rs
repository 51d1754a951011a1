/// Control channel protocol state machine
///
/// Tracks the connection lifecycle, interprets controller messages and
/// keeps the controller's stored custom parameters complete.
use log::{debug, error, info, warn};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Instant;

use crate::models::UnitSystem;
use crate::polyglot::messages::{
    Command, ConfiguredNode, CustomParams, Inbound, Message, Outcome, SessionConfig,
};
use crate::polyglot::Publish;
use crate::weather::listener::DEFAULT_PORT;

const PARAM_UNITS: &str = "Units";
const PARAM_ELEVATION: &str = "Elevation";
const PARAM_LISTEN_PORT: &str = "ListenPort";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    AwaitingConfig,
    Configured,
}

/// Operating settings derived from the controller's custom parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Settings {
    pub units: UnitSystem,
    pub elevation: f64,
    pub listen_port: u16,
}

impl Settings {
    pub fn from_params(params: &CustomParams) -> Self {
        Settings {
            units: units(params),
            elevation: elevation(params),
            listen_port: listen_port(params),
        }
    }
}

fn param_str(params: &CustomParams, key: &str) -> Option<String> {
    match params.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

pub fn units(params: &CustomParams) -> UnitSystem {
    param_str(params, PARAM_UNITS)
        .map(|u| UnitSystem::from_param(&u))
        .unwrap_or(UnitSystem::Metric)
}

pub fn elevation(params: &CustomParams) -> f64 {
    param_str(params, PARAM_ELEVATION)
        .and_then(|e| e.trim().parse().ok())
        .unwrap_or(0.0)
}

pub fn listen_port(params: &CustomParams) -> u16 {
    param_str(params, PARAM_LISTEN_PORT)
        .and_then(|p| p.trim().parse().ok())
        .filter(|port| *port != 0)
        .unwrap_or(DEFAULT_PORT)
}

/// Fill in defaults for any parameter the controller has not stored
pub fn with_defaults(params: &CustomParams) -> CustomParams {
    let mut complete = params.clone();
    for (key, default) in [
        (PARAM_UNITS, "metric"),
        (PARAM_ELEVATION, "0"),
        (PARAM_LISTEN_PORT, ""),
    ] {
        complete
            .entry(key.to_string())
            .or_insert_with(|| Value::String(default.to_string()));
    }
    complete
}

/// What the rest of the bridge has to act on after a controller message
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// First configuration of this connection
    Configured {
        nodes: Vec<ConfiguredNode>,
        settings: Settings,
    },
    /// Configuration resent while already operating
    Reconfigured { settings: Settings },
    /// Seconds since each tracked device last reported
    ShortPoll(Vec<(String, u64)>),
    LongPoll,
    Query,
    Stop,
    Delete,
}

pub struct Protocol {
    profile: String,
    state: ChannelState,
    custom_params: Option<CustomParams>,
    new_params: Option<CustomParams>,
    last_update: HashMap<String, Instant>,
}

impl Protocol {
    pub fn new(profile: &str) -> Self {
        Protocol {
            profile: profile.to_string(),
            state: ChannelState::Disconnected,
            custom_params: None,
            new_params: None,
            last_update: HashMap::new(),
        }
    }

    pub fn profile(&self) -> &str {
        &self.profile
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    /// Topic commands for this node server arrive on and messages leave on
    pub fn command_topic(&self) -> String {
        format!("udi/polyglot/ns/{}", self.profile)
    }

    pub fn subscriptions(&self) -> [String; 3] {
        [
            "udi/polyglot/connections/polyglot".to_string(),
            format!("udi/polyglot/connections/{}", self.profile),
            self.command_topic(),
        ]
    }

    pub fn on_connecting(&mut self) {
        self.state = ChannelState::Connecting;
    }

    /// Broker accepted the connection; a new handshake is required
    pub fn on_connected(&mut self) -> Message {
        info!("Connected to controller as profile {}", self.profile);
        self.state = ChannelState::AwaitingConfig;
        Message::Connected(true)
    }

    pub fn on_disconnected(&mut self) {
        if self.state != ChannelState::Disconnected {
            warn!("Disconnected from controller");
        }
        self.state = ChannelState::Disconnected;
    }

    pub fn mark_updated(&mut self, address: &str, at: Instant) {
        self.last_update.insert(address.to_string(), at);
    }

    /// Handle one message received on `topic`
    pub fn handle(&mut self, topic: &str, payload: &[u8], publisher: &dyn Publish) -> Option<Event> {
        self.handle_at(topic, payload, Instant::now(), publisher)
    }

    pub fn handle_at(
        &mut self,
        topic: &str,
        payload: &[u8],
        now: Instant,
        publisher: &dyn Publish,
    ) -> Option<Event> {
        let event = if topic == self.command_topic() {
            self.process(payload, now)
        } else {
            debug!("{} sent {}", topic, String::from_utf8_lossy(payload));
            None
        };

        self.reconcile_params(publisher);
        event
    }

    fn process(&mut self, payload: &[u8], now: Instant) -> Option<Event> {
        let inbound = match Inbound::parse(payload) {
            Ok(inbound) => inbound,
            Err(e) => {
                warn!("Dropping control message: {}", e);
                return None;
            }
        };

        if !inbound.from_controller() {
            debug!("Message from/for node {}", inbound.node);
            return None;
        }

        let command = match inbound.command() {
            Ok(command) => command,
            Err(e) => {
                warn!("Dropping control message: {}", e);
                return None;
            }
        };

        match command {
            Command::Config(config) => Some(self.configure(*config)),
            Command::Connected => {
                info!("Controller reports we are connected");
                None
            }
            Command::Stop => {
                info!("Controller requested stop");
                Some(Event::Stop)
            }
            Command::Query => Some(Event::Query),
            Command::Command(command) => {
                debug!("Ignoring command {}", command);
                None
            }
            Command::Result(report) => {
                if let Some(outcome) = &report.status {
                    log_outcome("status", outcome);
                } else if let Some(outcome) = &report.addnode {
                    log_outcome("addnode", outcome);
                } else {
                    info!("Result: {:?}", report.other);
                }
                None
            }
            Command::Status => None,
            Command::ShortPoll => Some(Event::ShortPoll(
                self.last_update
                    .iter()
                    .map(|(address, at)| {
                        (address.clone(), now.saturating_duration_since(*at).as_secs())
                    })
                    .collect(),
            )),
            Command::LongPoll => Some(Event::LongPoll),
            Command::Delete => {
                info!("Controller is deleting this node server");
                Some(Event::Delete)
            }
            Command::Unrecognized => {
                info!("Controller sent something we don't understand");
                None
            }
        }
    }

    fn configure(&mut self, config: SessionConfig) -> Event {
        info!(
            "Configuration from {} (ISY {})",
            config.name.as_deref().unwrap_or("controller"),
            config.isy_version.as_ref().map(|v| v.to_string()).unwrap_or_default()
        );

        let settings = Settings::from_params(&config.custom_params);
        info!(
            "  Units {:?}, elevation {} m, UDP port {}",
            settings.units, settings.elevation, settings.listen_port
        );

        self.custom_params = Some(config.custom_params.clone());
        self.new_params = Some(with_defaults(&config.custom_params));

        let event = if self.state == ChannelState::Configured {
            Event::Reconfigured { settings }
        } else {
            Event::Configured {
                nodes: config.configured_nodes().to_vec(),
                settings,
            }
        };
        self.state = ChannelState::Configured;
        event
    }

    /// Write pending parameters back when they differ from the stored set
    fn reconcile_params(&mut self, publisher: &dyn Publish) {
        if self.new_params == self.custom_params {
            return;
        }
        let Some(params) = self.new_params.clone() else {
            return;
        };

        info!("Saving updated custom parameters");
        publisher.publish(Message::CustomParams(params.clone()));
        self.custom_params = Some(params);
    }
}

fn log_outcome(kind: &str, outcome: &Outcome) {
    if outcome.success {
        info!("Success: {} {}", kind, outcome.reason);
    } else {
        error!("Error: {} {}", kind, outcome.reason);
    }
}
