mod dns;
mod sinks;

pub use dns::start_dns_server;
