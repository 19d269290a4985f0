//! C12: a small standalone program that connects to a running Tor control
//! port, subscribes to circuit/stream events, and logs each domain's
//! resolved relay set as it's discovered.

use std::env;

use tor_circuit_watch::{Config, Controller};
use tracing::{error, info};

fn config_from_env() -> Config {
    let host = env::var("TOR_CONTROL_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port = env::var("TOR_CONTROL_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(9151);
    let password = env::var("TOR_CONTROL_PASSWORD").unwrap_or_default();
    Config::new(host, port, password)
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = config_from_env();
    info!(endpoint = %config.endpoint(), "connecting to control port");

    let controller = match Controller::connect(config).await {
        Ok(controller) => controller,
        Err(error) => {
            error!(%error, "failed to connect to control port");
            std::process::exit(1);
        }
    };

    controller.on_nodes_changed(Box::new(|domain, nodes| {
        for (hop, node) in nodes.iter().enumerate() {
            info!(
                domain,
                hop,
                fingerprint = %node.fingerprint,
                nickname = %node.nickname,
                ip = %node.ip,
                country = ?node.country,
                "relay resolved"
            );
        }
    }));

    if let Err(error) = tokio::signal::ctrl_c().await {
        error!(%error, "failed to listen for ctrl-c");
    }

    info!("shutting down");
    controller.close().await;
}
