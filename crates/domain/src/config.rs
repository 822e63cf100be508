mod errors;
mod forward;
mod root;
mod server;
mod upstream;

pub use errors::ConfigError;
pub use forward::ForwardConfig;
pub use root::{CliOverrides, Config, LoggingConfig};
pub use server::ServerConfig;
pub use upstream::{ConnConfig, DEFAULT_DNS_PORT};
