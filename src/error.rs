use std::fmt;

/// Errors surfaced by the control-port client.
///
/// These map directly onto the error kinds of the control protocol: local
/// validation failures never touch the socket, `Protocol`/`Parse` come back
/// from the wire, and `Transport`/`ConnectionLost` mean the socket itself is
/// gone.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("GETINFO key `{0}` is not supported by this client")]
    UnsupportedKey(String),

    #[error("GETINFO key `{0}` is deprecated")]
    DeprecatedKey(String),

    #[error("GETINFO key `{0}` is not recognized")]
    UnknownKey(String),

    #[error("control port rejected `{command}`: {reply}")]
    Protocol { command: String, reply: String },

    #[error("could not parse control port reply: {0}")]
    Parse(String),

    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("connection closed")]
    ConnectionLost,
}

impl ClientError {
    pub fn protocol(command: impl Into<String>, reply: impl Into<String>) -> Self {
        ClientError::Protocol {
            command: command.into(),
            reply: reply.into(),
        }
    }
}

/// A key lookup outcome from the capability table (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyRejection {
    NotSupported,
    Deprecated,
    Unknown,
}

impl KeyRejection {
    pub fn into_error(self, key: &str) -> ClientError {
        match self {
            KeyRejection::NotSupported => ClientError::UnsupportedKey(key.to_string()),
            KeyRejection::Deprecated => ClientError::DeprecatedKey(key.to_string()),
            KeyRejection::Unknown => ClientError::UnknownKey(key.to_string()),
        }
    }
}

impl fmt::Display for KeyRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyRejection::NotSupported => write!(f, "not supported"),
            KeyRejection::Deprecated => write!(f, "deprecated"),
            KeyRejection::Unknown => write!(f, "unknown"),
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
