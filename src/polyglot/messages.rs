/// Control channel message formats
///
/// Outbound messages carry exactly one top-level key (`addnode`,
/// `status`, `customparams` or `connected`) plus the `node` sender
/// field. Inbound messages are classified by the first recognised key.
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::devices::Driver;
use crate::error::{BridgeError, Result};
use crate::models::Uom;

/// Sender tag the controller uses for its own messages
pub const CONTROLLER: &str = "polyglot";

pub type CustomParams = BTreeMap<String, Value>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeAnnouncement {
    pub address: String,
    pub name: String,
    pub node_def_id: String,
    pub primary: String,
    pub drivers: Vec<Driver>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AddNode {
    pub nodes: Vec<NodeAnnouncement>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusUpdate {
    pub address: String,
    pub driver: String,
    pub value: f64,
    pub uom: Uom,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Message {
    AddNode(AddNode),
    Status(StatusUpdate),
    CustomParams(CustomParams),
    Connected(bool),
}

impl Message {
    pub fn add_node(announcement: NodeAnnouncement) -> Self {
        Message::AddNode(AddNode {
            nodes: vec![announcement],
        })
    }
}

#[derive(Serialize)]
struct Envelope<'a> {
    #[serde(flatten)]
    message: &'a Message,
    node: &'a str,
}

/// Serialize a message stamped with the sender identity
pub fn encode(message: &Message, profile: &str) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(&Envelope {
        message,
        node: profile,
    })?)
}

/// Controller configuration delivered by the `config` handshake
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    #[serde(default, deserialize_with = "null_as_default")]
    pub nodes: Vec<ConfiguredNode>,
    #[serde(default)]
    pub new_nodes: Option<Vec<ConfiguredNode>>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub custom_params: CustomParams,
    #[serde(default)]
    pub isy_version: Option<Value>,
    #[serde(default)]
    pub name: Option<String>,
}

impl SessionConfig {
    /// Nodes the controller already knows, preferring `newNodes`
    pub fn configured_nodes(&self) -> &[ConfiguredNode] {
        self.new_nodes.as_deref().unwrap_or(&self.nodes)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ConfiguredNode {
    pub address: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(rename = "nodedef", alias = "node_def_id", alias = "nodeDefId", default)]
    pub node_def_id: String,
    #[serde(default, deserialize_with = "driver_values")]
    pub drivers: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum DriverList {
    Map(BTreeMap<String, StoredDriver>),
    List(Vec<NamedDriver>),
}

#[derive(Debug, Clone, Deserialize)]
struct StoredDriver {
    #[serde(deserialize_with = "lenient_f64")]
    value: f64,
}

#[derive(Debug, Clone, Deserialize)]
struct NamedDriver {
    driver: String,
    #[serde(deserialize_with = "lenient_f64")]
    value: f64,
}

// The controller sends `null` for empty collections
fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

// Stored drivers arrive either keyed by driver code or as a list
fn driver_values<'de, D>(deserializer: D) -> std::result::Result<BTreeMap<String, f64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<DriverList>::deserialize(deserializer)? {
        Some(DriverList::Map(map)) => map.into_iter().map(|(k, d)| (k, d.value)).collect(),
        Some(DriverList::List(list)) => list.into_iter().map(|d| (d.driver, d.value)).collect(),
        None => BTreeMap::new(),
    })
}

// The controller stores driver values as strings
fn lenient_f64<'de, D>(deserializer: D) -> std::result::Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().parse().unwrap_or(0.0),
        Value::Bool(b) => f64::from(u8::from(b)),
        _ => 0.0,
    })
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Outcome {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub reason: Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResultReport {
    #[serde(default)]
    pub status: Option<Outcome>,
    #[serde(default)]
    pub addnode: Option<Outcome>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

/// Controller message, classified by its top-level key
#[derive(Debug, Clone)]
pub enum Command {
    Config(Box<SessionConfig>),
    Connected,
    Stop,
    Query,
    Command(Value),
    Result(ResultReport),
    Status,
    ShortPoll,
    LongPoll,
    Delete,
    Unrecognized,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Inbound {
    #[serde(default)]
    pub node: Value,
    #[serde(flatten)]
    pub body: Map<String, Value>,
}

impl Inbound {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        serde_json::from_slice(payload).map_err(|e| BridgeError::malformed("control message", e.to_string()))
    }

    pub fn from_controller(&self) -> bool {
        self.node.as_str() == Some(CONTROLLER)
    }

    pub fn command(mut self) -> Result<Command> {
        const KEYS: [&str; 10] = [
            "config",
            "connected",
            "stop",
            "query",
            "command",
            "result",
            "status",
            "shortPoll",
            "longPoll",
            "delete",
        ];

        let Some((key, value)) = KEYS
            .iter()
            .find_map(|key| self.body.remove(*key).map(|value| (*key, value)))
        else {
            return Ok(Command::Unrecognized);
        };

        Ok(match key {
            "config" => Command::Config(Box::new(
                serde_json::from_value(value)
                    .map_err(|e| BridgeError::malformed("config", e.to_string()))?,
            )),
            "connected" => Command::Connected,
            "stop" => Command::Stop,
            "query" => Command::Query,
            "command" => Command::Command(value),
            "result" => Command::Result(
                serde_json::from_value(value)
                    .map_err(|e| BridgeError::malformed("result", e.to_string()))?,
            ),
            "status" => Command::Status,
            "shortPoll" => Command::ShortPoll,
            "longPoll" => Command::LongPoll,
            _ => Command::Delete,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_envelope_carries_sender() {
        let message = Message::Status(StatusUpdate {
            address: "ar_00001234".to_string(),
            driver: "GV1".to_string(),
            value: 21.0,
            uom: Uom::Celsius,
        });
        let encoded: Value = serde_json::from_slice(&encode(&message, "3").unwrap()).unwrap();
        assert_eq!(
            encoded,
            json!({
                "status": {"address": "ar_00001234", "driver": "GV1", "value": 21.0, "uom": 4},
                "node": "3"
            })
        );
    }

    #[test]
    fn addnode_envelope_shape() {
        let message = Message::add_node(NodeAnnouncement {
            address: "sk_00005678".to_string(),
            name: "SK-00005678".to_string(),
            node_def_id: "WF_Sky".to_string(),
            primary: "sk_00005678".to_string(),
            drivers: vec![Driver::new("GV0", 0.0, Uom::Index)],
        });
        let encoded: Value = serde_json::from_slice(&encode(&message, "3").unwrap()).unwrap();
        assert_eq!(encoded["addnode"]["nodes"][0]["node_def_id"], "WF_Sky");
        assert_eq!(
            encoded["addnode"]["nodes"][0]["drivers"][0],
            json!({"driver": "GV0", "value": 0.0, "uom": 25})
        );
        assert_eq!(encoded["node"], "3");
    }

    #[test]
    fn connected_and_params_envelopes() {
        let connected: Value =
            serde_json::from_slice(&encode(&Message::Connected(true), "7").unwrap()).unwrap();
        assert_eq!(connected, json!({"connected": true, "node": "7"}));

        let mut params = CustomParams::new();
        params.insert("Units".to_string(), json!("metric"));
        let saved: Value =
            serde_json::from_slice(&encode(&Message::CustomParams(params), "7").unwrap()).unwrap();
        assert_eq!(saved, json!({"customparams": {"Units": "metric"}, "node": "7"}));
    }

    #[test]
    fn classifies_controller_messages() {
        let inbound = Inbound::parse(br#"{"node":"polyglot","shortPoll":{}}"#).unwrap();
        assert!(inbound.from_controller());
        assert!(matches!(inbound.command().unwrap(), Command::ShortPoll));

        let inbound = Inbound::parse(br#"{"node":3,"status":{}}"#).unwrap();
        assert!(!inbound.from_controller());

        let inbound = Inbound::parse(br#"{"node":"polyglot","mystery":1}"#).unwrap();
        assert!(matches!(inbound.command().unwrap(), Command::Unrecognized));

        assert!(Inbound::parse(b"not json").is_err());
    }

    #[test]
    fn parses_result_outcomes() {
        let inbound = Inbound::parse(
            br#"{"node":"polyglot","result":{"addnode":{"success":false,"reason":"duplicate"}}}"#,
        )
        .unwrap();
        match inbound.command().unwrap() {
            Command::Result(report) => {
                let outcome = report.addnode.unwrap();
                assert!(!outcome.success);
                assert_eq!(outcome.reason, "duplicate");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn parses_config_with_stored_drivers() {
        let payload = json!({
            "node": "polyglot",
            "config": {
                "isyVersion": "5.0.16",
                "name": "WeatherFlow",
                "customParams": {"Units": "us", "Elevation": "120"},
                "nodes": [{
                    "address": "ar_00001234",
                    "name": "AR-00001234",
                    "nodedef": "WF_AirSI",
                    "drivers": {"GV1": {"value": "70.2", "uom": 17}, "GV2": {"value": 55, "uom": 22}}
                }, {
                    "address": "sk_00005678",
                    "name": "SK-00005678",
                    "node_def_id": "WF_Sky",
                    "drivers": [{"driver": "GV4", "value": "3.5", "uom": 32}]
                }]
            }
        });
        let inbound = Inbound::parse(payload.to_string().as_bytes()).unwrap();
        let config = match inbound.command().unwrap() {
            Command::Config(config) => config,
            other => panic!("unexpected {:?}", other),
        };

        let nodes = config.configured_nodes();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].node_def_id, "WF_AirSI");
        assert_eq!(nodes[0].drivers["GV1"], 70.2);
        assert_eq!(nodes[0].drivers["GV2"], 55.0);
        assert_eq!(nodes[1].node_def_id, "WF_Sky");
        assert_eq!(nodes[1].drivers["GV4"], 3.5);
        assert_eq!(config.custom_params["Units"], "us");
    }

    #[test]
    fn null_config_fields_fall_back_to_empty() {
        let payload = json!({
            "node": "polyglot",
            "config": {
                "customParams": null,
                "nodes": null,
                "newNodes": null,
                "name": null
            }
        });
        let inbound = Inbound::parse(payload.to_string().as_bytes()).unwrap();
        let config = match inbound.command().unwrap() {
            Command::Config(config) => config,
            other => panic!("unexpected {:?}", other),
        };
        assert!(config.custom_params.is_empty());
        assert!(config.configured_nodes().is_empty());

        let node: ConfiguredNode = serde_json::from_value(json!({
            "address": "ar_00001234",
            "name": null,
            "nodedef": "WF_Air",
            "drivers": null
        }))
        .unwrap();
        assert_eq!(node.name, "");
        assert!(node.drivers.is_empty());
    }
}
