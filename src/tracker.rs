//! C8: maps a stream's target domain to the three relays carrying its
//! circuit, resolving identity and geolocation via GETINFO.
//!
//! The tracker never talks to the socket itself. Each step returns the
//! next batch of `GETINFO` keys the caller should issue (or `None` when
//! there's nothing to do), so the SENTCONNECT algorithm of §4.8 is
//! testable without a live connection.

use std::collections::HashMap;

use tracing::info;

use crate::getinfo::GetInfoValue;

/// One relay resolved for a domain's circuit.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeInfo {
    pub fingerprint: String,
    pub nickname: String,
    pub ip: String,
    pub country: Option<String>,
}

struct CircuitRecord {
    fingerprints: Vec<String>,
}

struct PendingAssignment {
    fingerprints: Vec<String>,
    nicknames: Vec<String>,
    ips: Vec<String>,
}

pub type NodesChangedCallback = Box<dyn FnMut(&str, &[NodeInfo]) + Send>;

/// Holds the three maps of §4.8 plus whatever domain resolutions are
/// mid-flight (waiting on a `GETINFO` round trip).
#[derive(Default)]
pub struct Tracker {
    circuits: HashMap<String, CircuitRecord>,
    circuit_domain: HashMap<String, String>,
    domain_nodes: HashMap<String, Vec<NodeInfo>>,
    pending: HashMap<String, PendingAssignment>,
    on_nodes_changed: Option<NodesChangedCallback>,
}

impl Tracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_on_nodes_changed(&mut self, callback: NodesChangedCallback) {
        self.on_nodes_changed = Some(callback);
    }

    pub fn domain_nodes(&self, domain: &str) -> Option<&[NodeInfo]> {
        self.domain_nodes.get(domain).map(Vec::as_slice)
    }

    /// Records a circuit's hop fingerprints from a `CIRC ... BUILT` event.
    pub fn on_circ_built(&mut self, circuit_id: &str, fingerprints: Vec<String>) {
        self.circuits.insert(circuit_id.to_string(), CircuitRecord { fingerprints });
    }

    /// Step 1 of §4.8: a `STREAM ... SENTCONNECT` event arrived. Returns the
    /// `ns/id/<fp>` keys to request next, or `None` if no lookup is needed
    /// (domain already bound for this circuit, circuit unknown, or fewer
    /// than three hops).
    pub fn on_stream_sentconnect(&mut self, circuit_id: &str, target: &str) -> Option<Vec<String>> {
        let domain = target.split(':').next().unwrap_or(target).to_string();

        if self.circuit_domain.contains_key(circuit_id) {
            return None;
        }
        self.circuit_domain.insert(circuit_id.to_string(), domain.clone());

        let record = self.circuits.get(circuit_id)?;
        if record.fingerprints.len() < 3 {
            return None;
        }
        let fingerprints: Vec<String> = record.fingerprints[..3].to_vec();
        let keys = fingerprints.iter().map(|fp| format!("ns/id/{fp}")).collect();

        self.pending.insert(
            domain,
            PendingAssignment {
                fingerprints,
                nicknames: Vec::new(),
                ips: Vec::new(),
            },
        );
        Some(keys)
    }

    /// Step 2: the `ns/id/<fp>` batch resolved. Returns the
    /// `ip-to-country/<ip>` keys to request next, or `None` if any
    /// fingerprint failed to resolve (the assignment is abandoned).
    pub fn on_ns_id_resolved(&mut self, domain: &str, results: &HashMap<String, GetInfoValue>) -> Option<Vec<String>> {
        let pending = self.pending.get_mut(domain)?;

        for fp in &pending.fingerprints {
            let (ip, nickname) = results.get(&format!("ns/id/{fp}"))?.as_ns_id()?;
            pending.ips.push(ip.to_string());
            pending.nicknames.push(nickname.to_string());
        }

        Some(pending.ips.iter().map(|ip| format!("ip-to-country/{ip}")).collect())
    }

    /// Step 3: the `ip-to-country/<ip>` batch resolved. Finalizes the
    /// `NodeInfo` records, stores them in `domain_nodes`, and fires the
    /// notification callback exactly once.
    pub fn on_country_resolved(&mut self, domain: &str, results: &HashMap<String, GetInfoValue>) -> Option<&[NodeInfo]> {
        let pending = self.pending.remove(domain)?;

        let nodes: Vec<NodeInfo> = (0..pending.fingerprints.len())
            .map(|i| NodeInfo {
                fingerprint: pending.fingerprints[i].clone(),
                nickname: pending.nicknames[i].clone(),
                ip: pending.ips[i].clone(),
                country: results
                    .get(&format!("ip-to-country/{}", pending.ips[i]))
                    .and_then(GetInfoValue::as_text)
                    .map(str::to_string),
            })
            .collect();

        info!(domain, hops = nodes.len(), "domain resolved to circuit nodes");
        self.domain_nodes.insert(domain.to_string(), nodes);
        if let Some(callback) = self.on_nodes_changed.as_mut() {
            callback(domain, self.domain_nodes.get(domain).unwrap());
        }
        self.domain_nodes.get(domain).map(Vec::as_slice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn ns_id(ip: &str, nickname: &str) -> GetInfoValue {
        GetInfoValue::NsId {
            ip: Some(ip.to_string()),
            nickname: Some(nickname.to_string()),
            raw: String::new(),
        }
    }

    #[test]
    fn s4_full_sentconnect_resolution_fires_once() {
        let mut tracker = Tracker::new();
        tracker.on_circ_built("4", vec!["fpA".into(), "fpB".into(), "fpC".into()]);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        tracker.set_on_nodes_changed(Box::new(move |domain, nodes| {
            s.lock().unwrap().push((domain.to_string(), nodes.to_vec()));
        }));

        let ns_keys = tracker.on_stream_sentconnect("4", "example.com:443").unwrap();
        assert_eq!(ns_keys, vec!["ns/id/fpA", "ns/id/fpB", "ns/id/fpC"]);

        let ns_results = HashMap::from([
            ("ns/id/fpA".to_string(), ns_id("10.0.0.1", "relayA")),
            ("ns/id/fpB".to_string(), ns_id("10.0.0.2", "relayB")),
            ("ns/id/fpC".to_string(), ns_id("10.0.0.3", "relayC")),
        ]);
        let country_keys = tracker.on_ns_id_resolved("example.com", &ns_results).unwrap();
        assert_eq!(country_keys, vec!["ip-to-country/10.0.0.1", "ip-to-country/10.0.0.2", "ip-to-country/10.0.0.3"]);

        let mut country_results = HashMap::new();
        country_results.insert("ip-to-country/10.0.0.1".to_string(), GetInfoValue::Text("US".into()));
        country_results.insert("ip-to-country/10.0.0.2".to_string(), GetInfoValue::Text("DE".into()));
        country_results.insert("ip-to-country/10.0.0.3".to_string(), GetInfoValue::Text("NL".into()));

        let nodes = tracker.on_country_resolved("example.com", &country_results).unwrap();
        assert_eq!(nodes.len(), 3);
        assert_eq!(nodes[0].fingerprint, "fpA");
        assert_eq!(nodes[0].ip, "10.0.0.1");
        assert_eq!(nodes[0].country.as_deref(), Some("US"));

        assert_eq!(seen.lock().unwrap().len(), 1, "notification must fire exactly once");
        assert_eq!(tracker.domain_nodes("example.com").unwrap().len(), 3);

        // A second stream on the same circuit must not trigger another lookup.
        let again = tracker.on_stream_sentconnect("4", "other.example.com:80");
        assert!(again.is_none());
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn stream_before_circ_built_is_skipped() {
        let mut tracker = Tracker::new();
        assert!(tracker.on_stream_sentconnect("9", "example.com:443").is_none());
    }

    #[test]
    fn fewer_than_three_hops_is_skipped() {
        let mut tracker = Tracker::new();
        tracker.on_circ_built("4", vec!["fpA".into(), "fpB".into()]);
        assert!(tracker.on_stream_sentconnect("4", "example.com:443").is_none());
    }

    #[test]
    fn failed_ns_id_lookup_abandons_assignment() {
        let mut tracker = Tracker::new();
        tracker.on_circ_built("4", vec!["fpA".into(), "fpB".into(), "fpC".into()]);
        tracker.on_stream_sentconnect("4", "example.com:443").unwrap();

        let partial = HashMap::from([("ns/id/fpA".to_string(), ns_id("10.0.0.1", "relayA"))]);
        assert!(tracker.on_ns_id_resolved("example.com", &partial).is_none());
    }
}
