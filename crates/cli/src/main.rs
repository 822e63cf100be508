use clap::Parser;
use std::sync::Arc;
use tracing::info;

use conduit_dns_application::use_cases::ForwardQueryUseCase;
use conduit_dns_domain::CliOverrides;
use conduit_dns_infrastructure::PipeDriver;

mod bootstrap;
mod server;

#[derive(Parser)]
#[command(name = "conduit-dns")]
#[command(version)]
#[command(about = "Pipelined DNS forwarder multiplexing queries over TCP upstreams")]
struct Cli {
    /// Configuration file path
    #[arg(short = 'c', long, value_name = "FILE")]
    config: Option<String>,

    /// DNS listen port
    #[arg(short = 'p', long)]
    port: Option<u16>,

    /// Bind address
    #[arg(short = 'b', long)]
    bind: Option<String>,

    /// Upstream resolver as host[:port]; repeatable, replaces the
    /// configured list
    #[arg(short = 'u', long = "upstream")]
    upstreams: Vec<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let overrides = CliOverrides {
        dns_port: cli.port,
        bind_address: cli.bind,
        log_level: cli.log_level,
        upstreams: (!cli.upstreams.is_empty()).then_some(cli.upstreams),
    };
    let config = bootstrap::load_config(cli.config.as_deref(), overrides)?;
    bootstrap::init_logging(&config);

    info!("Starting conduit-dns v{}", env!("CARGO_PKG_VERSION"));

    let upstreams = config.forward.parse_upstreams()?;
    let driver = PipeDriver::new(upstreams, &config.forward)?;
    let use_case = Arc::new(ForwardQueryUseCase::new(driver));

    server::start_dns_server(&config, use_case).await?;

    info!("Server shutdown complete");
    Ok(())
}
