//! C5: formats `GETINFO` requests, validates keys against a capability
//! table, and parses the KVEntry grammar out of a reply.

use std::collections::HashMap;

use once_cell::sync::Lazy;

use crate::error::{ClientError, KeyRejection, Result};
use crate::message::ControlMessage;

/// How a key's value should be parsed once the reply comes back.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ValueKind {
    Text,
    Integer,
    Boolean,
    NsId,
}

/// A capability-table entry: either a recognized key with a known value
/// shape, or one of the rejection reasons of §4.5.
enum Capability {
    Parse(ValueKind),
    NotSupported,
    Deprecated,
}

impl Capability {
    fn resolve(&self) -> std::result::Result<ValueKind, KeyRejection> {
        match self {
            Capability::Parse(kind) => Ok(*kind),
            Capability::NotSupported => Err(KeyRejection::NotSupported),
            Capability::Deprecated => Err(KeyRejection::Deprecated),
        }
    }
}

/// The capability table of §4.5: exact keys plus `/`-terminated prefixes.
/// Anything Tor documents that we don't explicitly recognize here resolves
/// to `Unknown` rather than silently succeeding.
static CAPABILITIES: Lazy<HashMap<&'static str, Capability>> = Lazy::new(|| {
    let mut table = HashMap::new();
    table.insert("version", Capability::Parse(ValueKind::Text));
    table.insert("config-file", Capability::Parse(ValueKind::Text));
    table.insert("address", Capability::Parse(ValueKind::Text));
    table.insert("fingerprint", Capability::Parse(ValueKind::Text));
    table.insert("traffic/read", Capability::Parse(ValueKind::Integer));
    table.insert("traffic/written", Capability::Parse(ValueKind::Integer));
    table.insert("accounting/enabled", Capability::Parse(ValueKind::Boolean));
    table.insert("accounting/hibernating", Capability::Parse(ValueKind::Text));
    table.insert("process/descriptor-limit", Capability::Parse(ValueKind::Integer));
    // Prefix families (the key ends in `/<something>`, e.g. `ns/id/<fp>`).
    table.insert("ip-to-country/", Capability::Parse(ValueKind::Text));
    table.insert("next-circuit/", Capability::Parse(ValueKind::Text));
    table.insert("ns/id/", Capability::Parse(ValueKind::NsId));
    // A sample of Tor's documented surface we deliberately don't support.
    table.insert("entry-guards", Capability::NotSupported);
    table.insert("circuit-status", Capability::NotSupported);
    table.insert("stream-status", Capability::NotSupported);
    table.insert("orconn-status", Capability::NotSupported);
    table.insert("dir-usage", Capability::Deprecated);
    table.insert("features/names", Capability::Deprecated);
    table
});

fn lookup(key: &str) -> std::result::Result<ValueKind, KeyRejection> {
    if let Some(cap) = CAPABILITIES.get(key) {
        return cap.resolve();
    }

    // Longest `/`-terminated prefix match.
    let mut best: Option<(&str, &Capability)> = None;
    for (prefix, cap) in CAPABILITIES.iter() {
        if prefix.ends_with('/') && key.starts_with(prefix.as_ref() as &str) {
            let longer = match best {
                Some((bp, _)) => prefix.len() > bp.len(),
                None => true,
            };
            if longer {
                best = Some((prefix, cap));
            }
        }
    }
    match best {
        Some((_, cap)) => cap.resolve(),
        None => Err(KeyRejection::Unknown),
    }
}

/// Validates `key` against the capability table without issuing any
/// request. This is how §4.5's "no bytes are sent" local rejection is
/// implemented.
pub fn validate_key(key: &str) -> Result<()> {
    lookup(key).map(|_| ()).map_err(|rejection| rejection.into_error(key))
}

/// Formats a `GETINFO` request for one or more keys, after validating all
/// of them — the request fails as a unit if any key is bad, and nothing is
/// sent in that case.
pub fn format_request(keys: &[&str]) -> Result<String> {
    for key in keys {
        validate_key(key)?;
    }
    Ok(format!("GETINFO {}\r\n", keys.join(" ")))
}

/// A parsed `GETINFO` value (§3, §4.5).
#[derive(Debug, Clone, PartialEq)]
pub enum GetInfoValue {
    Text(String),
    Integer(i64),
    Boolean(bool),
    /// The fields of an `ns/id/<fp>` routerstatus entry that the tracker
    /// consumes. Implementers may expose more of the raw document; only
    /// `ip` and `nickname` are used by C8.
    NsId {
        ip: Option<String>,
        nickname: Option<String>,
        raw: String,
    },
}

impl GetInfoValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            GetInfoValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            GetInfoValue::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_ns_id(&self) -> Option<(&str, &str)> {
        match self {
            GetInfoValue::NsId {
                ip: Some(ip),
                nickname: Some(nickname),
                ..
            } => Some((ip, nickname)),
            _ => None,
        }
    }
}

fn parse_ns_id(raw: &str) -> GetInfoValue {
    let mut nickname = None;
    let mut ip = None;

    for line in raw.lines() {
        let mut tokens = line.split_whitespace();
        if tokens.next() == Some("r") {
            nickname = tokens.next().map(str::to_string);
            // identity, digest, date, time, then IP.
            ip = tokens.nth(4).map(str::to_string);
            break;
        }
    }

    GetInfoValue::NsId {
        ip,
        nickname,
        raw: raw.to_string(),
    }
}

fn parse_value(key: &str, raw: &str) -> Result<GetInfoValue> {
    match lookup(key) {
        Ok(ValueKind::Text) => Ok(GetInfoValue::Text(raw.to_string())),
        Ok(ValueKind::Integer) => raw
            .trim()
            .parse::<i64>()
            .map(GetInfoValue::Integer)
            .map_err(|_| ClientError::Parse(format!("key `{key}` expected an integer, got `{raw}`"))),
        Ok(ValueKind::Boolean) => match raw.trim() {
            "1" => Ok(GetInfoValue::Boolean(true)),
            "0" => Ok(GetInfoValue::Boolean(false)),
            other => Err(ClientError::Parse(format!("key `{key}` expected 0 or 1, got `{other}`"))),
        },
        Ok(ValueKind::NsId) => Ok(parse_ns_id(raw)),
        // A key we didn't recognize came back anyway; surface it as text
        // rather than failing the whole reply.
        Err(_) => Ok(GetInfoValue::Text(raw.to_string())),
    }
}

/// Scans a `GETINFO` reply's lines for KVEntry segments (§4.5) and parses
/// each value according to the capability table.
pub fn parse_reply(message: &ControlMessage) -> Result<HashMap<String, GetInfoValue>> {
    let mut result = HashMap::new();
    let lines = &message.lines;
    let mut i = 0;

    while i < lines.len() {
        let line = &lines[i];
        if line.len() < 4 {
            i += 1;
            continue;
        }
        let prefix_ok = line.as_bytes()[..3].iter().all(u8::is_ascii_digit);
        if !prefix_ok {
            i += 1;
            continue;
        }

        match line.as_bytes()[3] {
            b'-' => {
                let rest = &line[4..];
                if let Some((key, value)) = rest.split_once('=') {
                    result.insert(key.to_string(), parse_value(key, value)?);
                }
                i += 1;
            }
            b'+' => {
                let key = line[4..].trim_end_matches('=').to_string();
                i += 1;
                let mut body = Vec::new();
                while i < lines.len() && lines[i] != "." {
                    body.push(lines[i].as_str());
                    i += 1;
                }
                i += 1; // consume the lone "." terminator
                let value = parse_value(&key, &body.join("\r\n"))?;
                result.insert(key, value);
            }
            _ => {
                // The trailing "250 OK" (or an error line) isn't a KVEntry.
                i += 1;
            }
        }
    }

    Ok(result)
}
