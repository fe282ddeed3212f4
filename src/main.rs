//! PEP proxy entry point

use std::process::ExitCode;

use clap::Parser;
use tracing::error;

use pep_proxy::cli::Cli;
use pep_proxy::config::Config;
use pep_proxy::proxy::PepProxy;
use pep_proxy::setup_tracing;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> pep_proxy::Result<()> {
    let mut config = Config::load(cli.config.as_deref())?;

    // CLI flags win over file and environment
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    PepProxy::new(config)?.run().await
}
