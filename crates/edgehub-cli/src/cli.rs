//! Command-line interface definitions and parsing

use crate::config::ConfigOverrides;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "edgehub", author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Hub address as host:port
    #[arg(long, global = true)]
    pub server: Option<String>,

    /// Identifier of this edge node
    #[arg(long, global = true)]
    pub node_id: Option<String>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Connect to the hub and route messages until interrupted
    Run,
    /// Print the effective configuration as TOML
    Config,
}

impl Cli {
    /// Flag values that override every other configuration layer
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            server: self.server.clone(),
            node_id: self.node_id.clone(),
        }
    }
}
