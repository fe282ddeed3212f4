//! Command-line interface

use std::path::PathBuf;

use clap::Parser;

/// PEP Proxy - authenticating reverse proxy for business APIs
#[derive(Parser, Debug)]
#[command(name = "pep-proxy")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "PEP_PROXY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "PEP_PROXY_PORT")]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "PEP_PROXY_HOST")]
    pub host: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "PEP_PROXY_LOG_LEVEL")]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "PEP_PROXY_LOG_FORMAT")]
    pub log_format: Option<String>,
}
