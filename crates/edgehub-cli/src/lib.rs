//! EdgeHub CLI library
//!
//! Command-line parsing, layered configuration loading and the WebSocket/TLS
//! connection to the hub used by the `edgehub` binary.

pub mod app;
pub mod cli;
pub mod config;
pub mod websocket;

pub use cli::{Cli, Commands};
pub use config::{ConfigError, ConfigOverrides};
pub use websocket::{WebSocketAdapter, WebSocketFactory};
