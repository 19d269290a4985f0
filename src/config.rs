/// Control-port connection parameters (§6).
///
/// This is deliberately just three fields with hardcoded defaults — there is
/// no config-file format or CLI parser here, that's out of scope (§1).
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub password: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9151,
            password: String::new(),
        }
    }
}

impl Config {
    pub fn new(host: impl Into<String>, port: u16, password: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            password: password.into(),
        }
    }

    /// The `host:port` form used both as the TCP dial target and as the
    /// process-wide connection cache key (§4.7).
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
