//! C9: the public façade. Wraps a connection with GETINFO helpers and
//! wires the CIRC/STREAM event feed into the circuit/stream tracker.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, instrument, warn};

use crate::config::Config;
use crate::connection::{Connection, CONNECTIONS};
use crate::dispatcher::{Handler, Predicate, SubscriptionId};
use crate::error::{ClientError, Result};
use crate::events::{parse_event, parse_path_fingerprints};
use crate::getinfo::{self, GetInfoValue};
use crate::tracker::{NodeInfo, Tracker};

pub type NodesChangedCallback = Box<dyn FnMut(&str, &[NodeInfo]) + Send>;

/// The client's entry point: one endpoint's connection plus the circuit
/// tracking state fed from its CIRC/STREAM subscription.
pub struct Controller {
    config: Config,
    connection: Connection,
    tracker: Arc<Mutex<Tracker>>,
}

impl Controller {
    #[instrument(skip(config), fields(endpoint = %config.endpoint()))]
    pub async fn connect(config: Config) -> Result<Controller> {
        let connection = CONNECTIONS.connect(&config).await?;
        let tracker = Arc::new(Mutex::new(Tracker::new()));

        install_tracker_feed(&connection, Arc::clone(&tracker)).await?;

        Ok(Controller {
            config,
            connection,
            tracker,
        })
    }

    pub async fn get_info(&self, key: &str) -> Result<GetInfoValue> {
        let mut values = self.get_info_multiple(&[key]).await?;
        values
            .remove(key)
            .ok_or_else(|| ClientError::Parse(format!("no value returned for `{key}`")))
    }

    pub async fn get_info_multiple(&self, keys: &[&str]) -> Result<HashMap<String, GetInfoValue>> {
        let results = getinfo_request(&self.connection, keys).await?;
        Ok(results)
    }

    pub async fn watch_event(&self, event_type: &str, filter: Predicate, handler: Handler) -> Result<SubscriptionId> {
        self.connection.watch_event(event_type.to_string(), filter, handler).await
    }

    pub fn deregister(&self, id: SubscriptionId) {
        self.connection.deregister(id);
    }

    /// Installs the callback fired once a domain's three relays resolve
    /// (§4.8). Replaces whatever callback was previously installed.
    pub fn on_nodes_changed(&self, callback: NodesChangedCallback) {
        self.tracker.lock().unwrap().set_on_nodes_changed(callback);
    }

    pub fn domain_nodes(&self, domain: &str) -> Option<Vec<NodeInfo>> {
        self.tracker.lock().unwrap().domain_nodes(domain).map(<[NodeInfo]>::to_vec)
    }

    /// Idempotent: tears down the connection and drops it from the
    /// process-wide cache.
    pub async fn close(&self) {
        CONNECTIONS.close(&self.config).await;
    }
}

async fn getinfo_request(connection: &Connection, keys: &[&str]) -> Result<HashMap<String, GetInfoValue>> {
    let request = getinfo::format_request(keys)?;
    let message = connection.request(request).await?;
    getinfo::parse_reply(&message)
}

/// Subscribes to CIRC/STREAM and drives the §4.8 algorithm: CIRC BUILT
/// populates the circuit table; STREAM SENTCONNECT triggers the two-stage
/// GETINFO resolution, spawned as its own task since event handlers run
/// synchronously inside the connection's read loop.
async fn install_tracker_feed(connection: &Connection, tracker: Arc<Mutex<Tracker>>) -> Result<()> {
    let circ_tracker = Arc::clone(&tracker);
    connection
        .watch_event(
            "CIRC".to_string(),
            Box::new(|_| true),
            Box::new(move |message| {
                let Some(record) = parse_event(message) else { return };
                if record.positional(1) != Some("BUILT") {
                    return;
                }
                let (Some(circuit_id), Some(path)) = (record.positional(0), record.positional(2)) else {
                    return;
                };
                circ_tracker
                    .lock()
                    .unwrap()
                    .on_circ_built(circuit_id, parse_path_fingerprints(path));
            }),
        )
        .await?;

    let stream_tracker = Arc::clone(&tracker);
    let stream_connection = connection.clone();
    connection
        .watch_event(
            "STREAM".to_string(),
            Box::new(|_| true),
            Box::new(move |message| {
                let Some(record) = parse_event(message) else { return };
                if record.positional(1) != Some("SENTCONNECT") {
                    return;
                }
                let (Some(circuit_id), Some(target)) = (record.positional(0), record.positional(3)) else {
                    return;
                };
                let circuit_id = circuit_id.to_string();
                let target = target.to_string();
                let tracker = Arc::clone(&stream_tracker);
                let connection = stream_connection.clone();
                tokio::spawn(async move {
                    resolve_sentconnect(&connection, &tracker, &circuit_id, &target).await;
                });
            }),
        )
        .await?;

    Ok(())
}

async fn resolve_sentconnect(connection: &Connection, tracker: &Mutex<Tracker>, circuit_id: &str, target: &str) {
    let domain = target.split(':').next().unwrap_or(target).to_string();

    let ns_keys = {
        let mut tracker = tracker.lock().unwrap();
        tracker.on_stream_sentconnect(circuit_id, target)
    };
    let Some(ns_keys) = ns_keys else {
        debug!(circuit_id, domain, "LogicSkip: no ns/id lookup needed for this stream event");
        return;
    };

    let ns_key_refs: Vec<&str> = ns_keys.iter().map(String::as_str).collect();
    let ns_results = match getinfo_request(connection, &ns_key_refs).await {
        Ok(results) => results,
        Err(error) => {
            warn!(%error, domain, "ns/id lookup failed, abandoning circuit assignment");
            return;
        }
    };

    let country_keys = {
        let mut tracker = tracker.lock().unwrap();
        tracker.on_ns_id_resolved(&domain, &ns_results)
    };
    let Some(country_keys) = country_keys else {
        debug!(circuit_id, domain, "LogicSkip: no ip-to-country lookup needed for this ns/id result");
        return;
    };

    let country_key_refs: Vec<&str> = country_keys.iter().map(String::as_str).collect();
    let country_results = match getinfo_request(connection, &country_key_refs).await {
        Ok(results) => results,
        Err(error) => {
            warn!(%error, domain, "ip-to-country lookup failed, abandoning circuit assignment");
            return;
        }
    };

    tracker.lock().unwrap().on_country_resolved(&domain, &country_results);
}
