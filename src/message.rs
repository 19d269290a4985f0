//! C2: groups framed lines into complete control-protocol replies.

/// A fully assembled reply or event: the leading status code plus every
/// line the assembler buffered for it, in arrival order and without the
/// trailing CRLF on each line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlMessage {
    pub status_code: u16,
    pub lines: Vec<String>,
}

impl ControlMessage {
    fn from_lines(lines: Vec<String>) -> Option<Self> {
        let status_code = lines.first()?.get(0..3)?.parse().ok()?;
        Some(ControlMessage { status_code, lines })
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    pub fn is_error(&self) -> bool {
        (400..600).contains(&self.status_code)
    }

    pub fn is_event(&self) -> bool {
        (600..700).contains(&self.status_code)
    }

    /// The message rejoined with CRLF, the way it appeared on the wire.
    pub fn raw(&self) -> String {
        self.lines.join("\r\n")
    }
}

fn is_terminal_line(line: &str) -> bool {
    line.len() >= 4
        && line.as_bytes()[..3].iter().all(u8::is_ascii_digit)
        && line.as_bytes()[3] == b' '
}

/// Buffers lines for the in-progress message and emits a [`ControlMessage`]
/// once the terminator rule of §4.2 fires.
#[derive(Debug, Default)]
pub struct MessageAssembler {
    buffer: Vec<String>,
}

impl MessageAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one line. Returns a completed message when this line
    /// terminates it.
    pub fn push_line(&mut self, line: String) -> Option<ControlMessage> {
        let is_terminal = is_terminal_line(&line);
        self.buffer.push(line);

        if !is_terminal {
            return None;
        }

        let same_prefix = self.buffer[0].as_bytes()[..3] == self.buffer.last().unwrap().as_bytes()[..3];
        if self.buffer.len() == 1 || same_prefix {
            let lines = std::mem::take(&mut self.buffer);
            return ControlMessage::from_lines(lines);
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assemble(lines: &[&str]) -> Vec<ControlMessage> {
        let mut assembler = MessageAssembler::new();
        lines
            .iter()
            .filter_map(|l| assembler.push_line(l.to_string()))
            .collect()
    }

    #[test]
    fn single_line_reply() {
        let messages = assemble(&["250 OK"]);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].status_code, 250);
        assert!(messages[0].is_success());
    }

    #[test]
    fn s1_multiline_getinfo() {
        let messages = assemble(&[
            "250+config-text=",
            "ControlPort 9151",
            "SocksPort 9150",
            ".",
            "250 OK",
        ]);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].raw(), "250+config-text=\r\nControlPort 9151\r\nSocksPort 9150\r\n.\r\n250 OK");
    }

    #[test]
    fn multi_key_single_line_getinfo() {
        let messages = assemble(&["250-key1=val1", "250-key2=val2", "250 OK"]);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].lines.len(), 3);
    }

    #[test]
    fn s6_two_independent_replies() {
        let messages = assemble(&["250 OK", "250 OK"]);
        assert_eq!(messages.len(), 2);
        assert!(messages.iter().all(|m| m.is_success()));
    }

    #[test]
    fn event_is_classified_separately() {
        let messages = assemble(&["650 STREAM 7 SENTCONNECT 4 example.com:443"]);
        assert_eq!(messages.len(), 1);
        assert!(messages[0].is_event());
    }

    #[test]
    fn error_reply() {
        let messages = assemble(&["515 Authentication failed"]);
        assert_eq!(messages.len(), 1);
        assert!(messages[0].is_error());
    }
}
