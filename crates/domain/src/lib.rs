pub mod config;
pub mod errors;

pub use config::{
    CliOverrides, Config, ConfigError, ConnConfig, ForwardConfig, LoggingConfig, ServerConfig,
};
pub use errors::ForwardError;
