//! EdgeHub CLI Configuration Management
//!
//! Loads the engine configuration from, in increasing priority:
//! - built-in defaults
//! - a TOML file (`--config`), accepting the legacy option names
//! - environment variables (`EDGEHUB_*`)
//! - command line flags
//!
//! The file layer is resolved on its own first, so a legacy name such as
//! `HeartbeatIntervalSeconds` and its canonical key never meet in one layer.

use edgehub_core::EdgeHubConfig;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use std::path::Path;
use tracing::info;

/// Prefix of environment variables read as configuration
pub const ENV_PREFIX: &str = "EDGEHUB_";

/// Values given on the command line
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigOverrides {
    pub server: Option<String>,
    pub node_id: Option<String>,
}

/// Load and validate the effective configuration
pub fn load(path: Option<&Path>, overrides: &ConfigOverrides) -> Result<EdgeHubConfig, ConfigError> {
    let base = match path {
        Some(path) => load_file(path)?,
        None => {
            info!("No configuration file given, using defaults");
            EdgeHubConfig::default()
        }
    };

    let mut figment = Figment::from(Serialized::defaults(base)).merge(Env::prefixed(ENV_PREFIX));
    if let Some(server) = &overrides.server {
        figment = figment.merge(("server", server));
    }
    if let Some(node_id) = &overrides.node_id {
        figment = figment.merge(("node_id", node_id));
    }

    let config: EdgeHubConfig = figment
        .extract()
        .map_err(|e| ConfigError::Loading(format!("Failed to load configuration: {}", e)))?;

    config
        .validate()
        .map_err(|e| ConfigError::Validation(e.to_string()))?;
    Ok(config)
}

/// Read one TOML file on top of the defaults
pub fn load_file(path: &Path) -> Result<EdgeHubConfig, ConfigError> {
    if !path.is_file() {
        return Err(ConfigError::FileSystem(format!(
            "Configuration file not found: {}",
            path.display()
        )));
    }
    info!("Loading configuration from: {}", path.display());

    Figment::new()
        .merge(Toml::file(path))
        .extract()
        .map_err(|e| ConfigError::Loading(format!("Failed to load from {}: {}", path.display(), e)))
}

/// Render a configuration the way `edgehub config` prints it
pub fn to_toml(config: &EdgeHubConfig) -> Result<String, ConfigError> {
    toml::to_string_pretty(config).map_err(|e| ConfigError::Serialization(e.to_string()))
}

// ----------------------------------------------------------------------------
// Error Types
// ----------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration loading error: {0}")]
    Loading(String),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("File system error: {0}")]
    FileSystem(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;
    use std::path::PathBuf;

    #[test]
    fn test_defaults_without_file() {
        Jail::expect_with(|_jail| {
            let config = load(None, &ConfigOverrides::default()).unwrap();
            assert_eq!(config.heartbeat_interval_secs, 15);
            assert_eq!(config.message_qps, 30.0);
            assert_eq!(config.message_burst, 60);
            Ok(())
        });
    }

    #[test]
    fn test_legacy_names_in_file() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "edgehub.toml",
                r#"
                HeartbeatIntervalSeconds = 20
                MessageQPS = 3
                MessageBurst = 6
                TLSCertFile = "/tmp/edge.crt"
                Server = "hub.example.com:10000"
                "#,
            )?;

            let config = load(Some(Path::new("edgehub.toml")), &ConfigOverrides::default()).unwrap();
            assert_eq!(config.heartbeat_interval_secs, 20);
            assert_eq!(config.message_qps, 3.0);
            assert_eq!(config.message_burst, 6);
            assert_eq!(config.tls_cert_file, PathBuf::from("/tmp/edge.crt"));
            assert_eq!(config.server, "hub.example.com:10000");
            Ok(())
        });
    }

    #[test]
    fn test_layer_priority() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "edgehub.toml",
                r#"
                server = "file.example.com:10000"
                node_id = "from-file"
                message_burst = 10
                "#,
            )?;
            jail.set_env("EDGEHUB_NODE_ID", "from-env");
            jail.set_env("EDGEHUB_MESSAGE_BURST", "12");

            let overrides = ConfigOverrides {
                server: Some("flag.example.com:10000".to_string()),
                node_id: None,
            };
            let config = load(Some(Path::new("edgehub.toml")), &overrides).unwrap();
            assert_eq!(config.server, "flag.example.com:10000");
            assert_eq!(config.node_id, "from-env");
            assert_eq!(config.message_burst, 12);
            Ok(())
        });
    }

    #[test]
    fn test_missing_file_is_an_error() {
        Jail::expect_with(|_jail| {
            let err = load(Some(Path::new("absent.toml")), &ConfigOverrides::default()).unwrap_err();
            assert!(matches!(err, ConfigError::FileSystem(_)));
            Ok(())
        });
    }

    #[test]
    fn test_invalid_values_rejected() {
        Jail::expect_with(|jail| {
            jail.create_file("edgehub.toml", "MessageBurst = 0")?;
            let err = load(Some(Path::new("edgehub.toml")), &ConfigOverrides::default()).unwrap_err();
            assert!(matches!(err, ConfigError::Validation(_)));
            Ok(())
        });
    }

    #[test]
    fn test_printed_config_loads_back() {
        Jail::expect_with(|jail| {
            let mut config = EdgeHubConfig::default();
            config.node_id = "printed".to_string();
            jail.create_file("printed.toml", &to_toml(&config).unwrap())?;

            let loaded = load(Some(Path::new("printed.toml")), &ConfigOverrides::default()).unwrap();
            assert_eq!(loaded.node_id, "printed");
            assert_eq!(loaded.group_routes, config.group_routes);
            Ok(())
        });
    }
}
