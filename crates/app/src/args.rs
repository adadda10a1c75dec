pub use clap::Parser;

use std::path::PathBuf;
use std::time::Duration;

use common::cluster::parse_duration;
use url::Url;

use crate::state::DEFAULT_CONFIG_PATH;

#[derive(Parser, Debug)]
#[command(name = "vault-pki")]
#[command(about = "Cluster PKI, policies and node credentials backed by Vault")]
pub struct Args {
    /// Directory holding config.toml and the node's token files
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    pub config_path: PathBuf,

    /// Backend address (defaults to config.toml, then http://127.0.0.1:8200)
    #[arg(long, global = true, env = "VAULT_ADDR")]
    pub vault_addr: Option<Url>,

    /// Token used when no instance token is available
    #[arg(long, global = true, env = "VAULT_TOKEN", hide_env_values = true)]
    pub vault_token: Option<String>,

    /// Client-side timeout for each backend request, e.g. 30s
    #[arg(long, global = true, value_parser = parse_duration)]
    pub timeout: Option<Duration>,

    /// Default log level, overridden by RUST_LOG
    #[arg(long, global = true, default_value = "info")]
    pub log_level: tracing::Level,

    #[command(subcommand)]
    pub command: crate::Command,
}
