mod bridge;
mod config;
mod devices;
mod error;
mod models;
mod polyglot;
mod utils;
mod weather;

use log::{error, info};
use time::OffsetDateTime;

use bridge::Bridge;
use config::BridgeConfig;
use polyglot::ControlChannel;
use utils::{format_datetime, local_offset};
use weather::listener::{rebind, recv_from};

async fn main_loop(config: BridgeConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!("Starting WeatherFlow node server");

    let mut channel = ControlChannel::connect(&config);
    let session = channel.await_configuration().await;
    info!(
        "Configured at {}: units {:?}, elevation {} m, {} existing nodes",
        format_datetime(&OffsetDateTime::now_utc()),
        session.settings.units,
        session.settings.elevation,
        session.nodes.len()
    );

    let mut bridge = Bridge::new(Some(channel.publisher()), &session.settings, local_offset());
    bridge.adopt_nodes(&session.nodes);

    let mut listener = rebind(None, session.settings.listen_port).await;

    loop {
        tokio::select! {
            received = recv_from(&mut listener) => match received {
                Ok(packets) => {
                    for packet in &packets {
                        if let Some(address) = bridge.on_packet(packet) {
                            channel.mark_updated(&address);
                        }
                    }
                }
                Err(e) => error!("UDP receive failed: {}", e),
            },
            event = channel.next_event() => {
                if let Some(settings) = event.and_then(|event| bridge.handle_event(event)) {
                    listener = rebind(listener.take(), settings.listen_port).await;
                }
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .format_timestamp_secs()
        .init();

    // Load configuration
    let config = match BridgeConfig::new() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    // Run main loop or wait for shutdown signal
    tokio::select! {
        result = main_loop(config) => {
            if let Err(e) = result {
                error!("Fatal error: {}", e);
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Node server terminated by user. Exiting gracefully.");
        }
    }

    Ok(())
}
