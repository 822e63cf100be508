use serde::{Deserialize, Serialize};

use super::errors::ConfigError;
use super::upstream::ConnConfig;

/// Forwarding configuration: the upstream list plus the pipeline tuning
/// knobs. Upstreams kill idle TCP connections within a few seconds, so
/// the pool limits default high enough to sustain bursty reconnects.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ForwardConfig {
    /// Upstream resolvers as `host[:port]`; the first entry is the
    /// preferred (primary) upstream.
    #[serde(default = "default_upstreams")]
    pub upstreams: Vec<String>,

    #[serde(default = "default_primary_pipes")]
    pub primary_pipes: usize,

    #[serde(default = "default_secondary_pipes")]
    pub secondary_pipes: usize,

    #[serde(default = "default_dial_timeout_ms")]
    pub dial_timeout_ms: u64,

    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    /// Deliberately short: a stalled socket write means backpressure,
    /// and the pipe should rotate out quickly.
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,

    /// Grace period a failing pipe's reader gets to drain responses that
    /// are already in flight.
    #[serde(default = "default_finalize_timeout_ms")]
    pub finalize_timeout_ms: u64,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl ForwardConfig {
    /// Resolves the textual upstream list into endpoint records.
    pub fn parse_upstreams(&self) -> Result<Vec<ConnConfig>, ConfigError> {
        self.upstreams.iter().map(|s| s.parse()).collect()
    }
}

impl Default for ForwardConfig {
    fn default() -> Self {
        Self {
            upstreams: default_upstreams(),
            primary_pipes: default_primary_pipes(),
            secondary_pipes: default_secondary_pipes(),
            dial_timeout_ms: default_dial_timeout_ms(),
            read_timeout_ms: default_read_timeout_ms(),
            write_timeout_ms: default_write_timeout_ms(),
            finalize_timeout_ms: default_finalize_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

fn default_upstreams() -> Vec<String> {
    vec!["8.8.8.8:53".to_string(), "1.1.1.1:53".to_string()]
}

fn default_primary_pipes() -> usize {
    50
}

fn default_secondary_pipes() -> usize {
    50
}

fn default_dial_timeout_ms() -> u64 {
    1000
}

fn default_read_timeout_ms() -> u64 {
    500
}

fn default_write_timeout_ms() -> u64 {
    5
}

fn default_finalize_timeout_ms() -> u64 {
    2000
}

fn default_request_timeout_ms() -> u64 {
    1000
}
