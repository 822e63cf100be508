use serde::{Deserialize, Serialize};

use super::errors::ConfigError;
use super::forward::ForwardConfig;
use super::server::ServerConfig;

/// Main configuration structure for conduit-dns.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    /// Server configuration (listen port, bind address)
    #[serde(default)]
    pub server: ServerConfig,

    /// Upstream forwarding and pipeline tuning
    #[serde(default)]
    pub forward: ForwardConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from file or use defaults
    ///
    /// Priority order:
    /// 1. Explicitly provided path
    /// 2. conduit-dns.toml in current directory
    /// 3. /etc/conduit-dns/config.toml
    /// 4. Default configuration
    pub fn load(path: Option<&str>, cli_overrides: CliOverrides) -> Result<Self, ConfigError> {
        let mut config = if let Some(path) = path {
            Self::from_file(path)?
        } else if std::path::Path::new("conduit-dns.toml").exists() {
            Self::from_file("conduit-dns.toml")?
        } else if std::path::Path::new("/etc/conduit-dns/config.toml").exists() {
            Self::from_file("/etc/conduit-dns/config.toml")?
        } else {
            Self::default()
        };

        config.apply_cli_overrides(cli_overrides);
        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::FileRead(path.to_string(), e.to_string()))?;
        toml::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    fn apply_cli_overrides(&mut self, overrides: CliOverrides) {
        if let Some(port) = overrides.dns_port {
            self.server.dns_port = port;
        }
        if let Some(bind) = overrides.bind_address {
            self.server.bind_address = bind;
        }
        if let Some(level) = overrides.log_level {
            self.logging.level = level;
        }
        if let Some(upstreams) = overrides.upstreams {
            self.forward.upstreams = upstreams;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.dns_port == 0 {
            return Err(ConfigError::Validation("DNS port cannot be 0".to_string()));
        }

        if self.forward.upstreams.is_empty() {
            return Err(ConfigError::Validation(
                "no upstream servers configured".to_string(),
            ));
        }

        self.forward.parse_upstreams()?;

        if self.forward.primary_pipes == 0 {
            return Err(ConfigError::Validation(
                "primary_pipes must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

/// Command-line overrides for configuration
#[derive(Debug, Default)]
pub struct CliOverrides {
    pub dns_port: Option<u16>,
    pub bind_address: Option<String>,
    pub log_level: Option<String>,
    pub upstreams: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
