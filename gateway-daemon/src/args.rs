use clap::Parser;
use std::path::PathBuf;

/// CLI surface for the composition root (§4.10: CLI-args -> env -> file ->
/// defaults, CLI wins). Only the handful of options worth a flag are here;
/// everything else — chain RPC endpoints, gas-fee wallets, per-chain
/// credentials — lives in the config file.
#[derive(Debug, Parser)]
#[command(name = "gateway-daemon", version, about = "Stablecoin deposit-watching payment gateway")]
pub struct DaemonArgs {
    /// Path to a TOML config file covering the chains table and any
    /// non-default tunables.
    #[arg(long, env = "GATEWAY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Overrides `http_bind_address` from the config file.
    #[arg(long)]
    pub http_bind_address: Option<String>,

    /// Overrides `storage_path` from the config file.
    #[arg(long)]
    pub storage_path: Option<String>,

    /// Bind address for the Prometheus `/metrics` exporter.
    #[arg(long, default_value = "0.0.0.0:9090")]
    pub metrics_bind_address: String,

    /// `log` facade filter string, e.g. `info,gateway_engine=debug`.
    #[arg(long, env = "GATEWAY_LOG", default_value = "info")]
    pub log_filter: String,
}
