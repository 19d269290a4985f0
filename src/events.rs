//! C6: tokenizes the parameter portion of `650` events into structured
//! records and predicates that match on event type.

use std::collections::HashMap;

use crate::message::ControlMessage;

/// One `650 <type> ...` event, split into positional tokens and
/// `KEY=VALUE` fields per §4.6.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EventRecord {
    pub event_type: String,
    pub positional: Vec<String>,
    pub fields: HashMap<String, String>,
}

impl EventRecord {
    pub fn positional(&self, index: usize) -> Option<&str> {
        self.positional.get(index).map(String::as_str)
    }

    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }
}

/// Splits on whitespace, treating a double-quoted run as one token with
/// its internal whitespace preserved (and the quote characters dropped).
fn tokenize(input: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for c in input.chars() {
        match c {
            '"' => in_quotes = !in_quotes,
            c if c.is_whitespace() && !in_quotes => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

/// True if `message` is a `650 <event_type> ...` line.
pub fn matches_event_type(message: &ControlMessage, event_type: &str) -> bool {
    if !message.is_event() {
        return false;
    }
    match message.lines.first() {
        Some(first) => first.starts_with(&format!("650 {event_type} ")) || first == &format!("650 {event_type}"),
        None => false,
    }
}

/// Parses a `650` message into an [`EventRecord`]. Multi-line events (rare,
/// but the grammar doesn't forbid them) have their continuation lines
/// appended to the tokenized parameter text.
pub fn parse_event(message: &ControlMessage) -> Option<EventRecord> {
    let first = message.lines.first()?;
    let rest = first.strip_prefix("650 ")?;
    let mut split = rest.splitn(2, ' ');
    let event_type = split.next()?.to_string();
    let mut params = split.next().unwrap_or("").to_string();

    for extra in &message.lines[1..] {
        params.push(' ');
        params.push_str(extra);
    }

    let mut positional = Vec::new();
    let mut fields = HashMap::new();
    for token in tokenize(&params) {
        match token.split_once('=') {
            Some((key, value)) => {
                fields.insert(key.to_string(), value.to_string());
            }
            None => positional.push(token),
        }
    }

    Some(EventRecord {
        event_type,
        positional,
        fields,
    })
}

/// Splits a circuit path field (`$FPA~nicknameA,$FPB~nicknameB,...`) into
/// bare fingerprints, dropping the leading `$` and any `~nickname` suffix.
pub fn parse_path_fingerprints(path: &str) -> Vec<String> {
    path.split(',')
        .filter(|hop| !hop.is_empty())
        .map(|hop| {
            let hop = hop.strip_prefix('$').unwrap_or(hop);
            match hop.split_once('~') {
                Some((fp, _nickname)) => fp.to_string(),
                None => hop.to_string(),
            }
        })
        .collect()
}

/// Returns the request text to install event subscriptions, issued once
/// after authentication (§4.6, §4.7).
pub fn subscribe_request() -> &'static str {
    "SETEVENTS STREAM CIRC\r\n"
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(line: &str) -> ControlMessage {
        ControlMessage {
            status_code: 650,
            lines: vec![line.to_string()],
        }
    }

    #[test]
    fn s3_stream_sentconnect_is_tokenized() {
        let msg = event("650 STREAM 7 SENTCONNECT 4 example.com:443");
        assert!(matches_event_type(&msg, "STREAM"));
        assert!(!matches_event_type(&msg, "CIRC"));

        let record = parse_event(&msg).unwrap();
        assert_eq!(record.event_type, "STREAM");
        assert_eq!(record.positional, vec!["7", "SENTCONNECT", "4", "example.com:443"]);
        assert!(record.fields.is_empty());
    }

    #[test]
    fn circ_built_with_key_value_tail() {
        let msg = event("650 CIRC 4 BUILT $AAAA~relayA,$BBBB~relayB PURPOSE=GENERAL TIME_CREATED=2024-01-01T00:00:00.000000");
        let record = parse_event(&msg).unwrap();
        assert_eq!(record.event_type, "CIRC");
        assert_eq!(record.positional(0), Some("4"));
        assert_eq!(record.positional(1), Some("BUILT"));
        assert_eq!(record.positional(2), Some("$AAAA~relayA,$BBBB~relayB"));
        assert_eq!(record.field("PURPOSE"), Some("GENERAL"));
    }

    #[test]
    fn quoted_substring_preserves_embedded_whitespace() {
        let msg = event(r#"650 STREAM 7 SENTCONNECT 4 example.com:443 REASON="connection refused here""#);
        let record = parse_event(&msg).unwrap();
        assert_eq!(record.field("REASON"), Some("connection refused here"));
    }

    #[test]
    fn path_fingerprints_strip_dollar_and_nickname() {
        let fps = parse_path_fingerprints("$AAAA~relayA,$BBBB~relayB,$CCCC");
        assert_eq!(fps, vec!["AAAA".to_string(), "BBBB".to_string(), "CCCC".to_string()]);
    }

    #[test]
    fn non_event_status_never_matches() {
        let msg = ControlMessage {
            status_code: 250,
            lines: vec!["250 OK".to_string()],
        };
        assert!(!matches_event_type(&msg, "STREAM"));
        assert!(parse_event(&msg).is_none());
    }
}
