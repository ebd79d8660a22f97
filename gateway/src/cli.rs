//! CLI argument definitions for the edgesplit gateway.
//!
//! This file should remain minimal, containing only CLI argument struct definitions.

use clap::Parser;
use edgesplit_core::observability::LogFormat;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(version, about)]
pub struct GatewayArgs {
    /// Path to the TOML config file. Incompatible with `--default-config`
    #[arg(long, env = "EDGESPLIT_CONFIG_FILE")]
    pub config_file: Option<PathBuf>,

    /// Start with the default config, which has no tests. Incompatible with `--config-file`
    #[arg(long)]
    pub default_config: bool,

    /// Sets the log format used for all gateway logs.
    #[arg(long)]
    #[arg(value_enum)]
    #[clap(default_value_t = LogFormat::default())]
    pub log_format: LogFormat,

    /// Load and validate the config file, then exit without starting the gateway.
    #[arg(long)]
    pub check_config: bool,
}
