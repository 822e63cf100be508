use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::errors::ConfigError;

pub const DEFAULT_DNS_PORT: u16 = 53;

/// A single upstream resolver endpoint. Immutable after construction.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ConnConfig {
    pub hostname: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

impl ConnConfig {
    pub fn new(hostname: impl Into<String>, port: u16) -> Self {
        Self {
            hostname: hostname.into(),
            port,
        }
    }
}

impl FromStr for ConnConfig {
    type Err = ConfigError;

    /// Parses `host[:port]`; the port defaults to 53 when omitted.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(':');
        let hostname = match parts.next() {
            Some(host) if !host.is_empty() => host.to_string(),
            _ => {
                return Err(ConfigError::Validation(format!(
                    "invalid upstream '{s}': missing hostname"
                )))
            }
        };
        let port = match parts.next() {
            None => DEFAULT_DNS_PORT,
            Some(p) => p.parse::<u16>().map_err(|_| {
                ConfigError::Validation(format!("invalid upstream '{s}': bad port '{p}'"))
            })?,
        };
        if parts.next().is_some() {
            return Err(ConfigError::Validation(format!("invalid upstream '{s}'")));
        }
        Ok(Self { hostname, port })
    }
}

impl fmt::Display for ConnConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.hostname, self.port)
    }
}

fn default_port() -> u16 {
    DEFAULT_DNS_PORT
}
