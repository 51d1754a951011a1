use std::env;
use url::Url;

use crate::error::BridgeError;

const DEFAULT_MQTT_URL: &str = "mqtt://localhost:1883";
const DEFAULT_MQTT_PORT: u16 = 1883;
const DEFAULT_MQTTS_PORT: u16 = 8883;

/// Connection parameters handed to the bridge at startup
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeConfig {
    pub profile: String,
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub use_tls: bool,
    pub credentials: Option<(String, String)>,
    pub client_id: String,
}

impl BridgeConfig {
    pub fn new() -> Result<Self, BridgeError> {
        // Load environment variables
        dotenv::dotenv().ok();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from any variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, BridgeError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let profile = lookup("PROFILE_NUM")
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .ok_or_else(|| BridgeError::Config("PROFILE_NUM environment variable not set".into()))?;

        let raw_url = lookup("MQTT_URL").unwrap_or_else(|| DEFAULT_MQTT_URL.to_string());
        let url = Url::parse(&raw_url)
            .map_err(|e| BridgeError::Config(format!("invalid MQTT_URL '{}': {}", raw_url, e)))?;

        let use_tls = match url.scheme() {
            "mqtt" | "tcp" => false,
            "mqtts" | "ssl" => true,
            other => {
                return Err(BridgeError::Config(format!(
                    "unsupported MQTT_URL scheme '{}'",
                    other
                )))
            }
        };

        let mqtt_host = url
            .host_str()
            .ok_or_else(|| BridgeError::Config(format!("MQTT_URL '{}' has no host", raw_url)))?
            .to_string();
        let mqtt_port = url.port().unwrap_or(if use_tls {
            DEFAULT_MQTTS_PORT
        } else {
            DEFAULT_MQTT_PORT
        });

        let credentials = match (lookup("MQTT_USERNAME"), lookup("MQTT_PASSWORD")) {
            (Some(username), password) if !username.is_empty() => {
                Some((username, password.unwrap_or_default()))
            }
            _ => None,
        };

        let client_id = lookup("MQTT_CLIENT_ID").unwrap_or_else(|| format!("weatherflow_{}", profile));

        Ok(BridgeConfig {
            profile,
            mqtt_host,
            mqtt_port,
            use_tls,
            credentials,
            client_id,
        })
    }
}
