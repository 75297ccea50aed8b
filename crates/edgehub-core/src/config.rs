//! Centralized Configuration
//!
//! Configuration consumed by the connectivity agent. Every option is accepted
//! under its snake_case key and under its legacy option name (for example
//! `heartbeat_interval_secs` and `HeartbeatIntervalSeconds`), so existing
//! deployment files keep loading.

use crate::errors::{EdgeHubError, EdgeHubResult};
use crate::modules;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Longest accepted keepalive period (one day)
pub const MAX_HEARTBEAT_SECS: u64 = 24 * 60 * 60;

// ----------------------------------------------------------------------------
// Reconnect Policy
// ----------------------------------------------------------------------------

/// Delay applied between tearing a cycle down and the next connection attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum ReconnectPolicy {
    /// Constant delay. Without an explicit value, two heartbeat periods.
    Fixed {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        delay_ms: Option<u64>,
    },
    /// Exponential backoff, reset once a cycle reaches the connected state
    Exponential {
        initial_ms: u64,
        max_ms: u64,
        multiplier: f64,
    },
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ReconnectPolicy::Fixed { delay_ms: None }
    }
}

impl ReconnectPolicy {
    /// Delay before the next attempt after `consecutive_failures` failed
    /// attempts in a row (the first failure is 1)
    pub fn delay(&self, consecutive_failures: u32, heartbeat: Duration) -> Duration {
        match self {
            ReconnectPolicy::Fixed { delay_ms: Some(ms) } => Duration::from_millis(*ms),
            ReconnectPolicy::Fixed { delay_ms: None } => heartbeat.saturating_mul(2),
            ReconnectPolicy::Exponential {
                initial_ms,
                max_ms,
                multiplier,
            } => {
                let exponent = consecutive_failures.saturating_sub(1).min(32) as i32;
                let delay = (*initial_ms as f64) * multiplier.powi(exponent);
                Duration::from_millis(delay.min(*max_ms as f64) as u64)
            }
        }
    }
}

// ----------------------------------------------------------------------------
// EdgeHub Configuration
// ----------------------------------------------------------------------------

/// Configuration for the hub connection and the routing engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EdgeHubConfig {
    /// Keepalive period, also the response timeout for upstream sync requests
    #[serde(alias = "HeartbeatIntervalSeconds", alias = "heartbeat")]
    pub heartbeat_interval_secs: u64,
    /// Sustained outbound sends per second
    #[serde(alias = "MessageQPS")]
    pub message_qps: f64,
    /// Maximum outbound sends admitted without waiting
    #[serde(alias = "MessageBurst")]
    pub message_burst: u32,
    /// Hub address as `host:port`
    #[serde(alias = "Server")]
    pub server: String,
    #[serde(alias = "ProjectID")]
    pub project_id: String,
    #[serde(alias = "NodeID")]
    pub node_id: String,
    /// Root CA used to verify the hub; re-read on every connection attempt
    #[serde(alias = "TLSCAFile")]
    pub tls_ca_file: PathBuf,
    /// Client certificate; re-read on every connection attempt
    #[serde(alias = "TLSCertFile")]
    pub tls_cert_file: PathBuf,
    /// Client private key; re-read on every connection attempt
    #[serde(alias = "TLSPrivateKeyFile")]
    pub tls_private_key_file: PathBuf,
    #[serde(alias = "HandshakeTimeoutSeconds", alias = "HandshakeTimeout")]
    pub handshake_timeout_secs: u64,
    /// Zero disables the read deadline
    #[serde(alias = "ReadDeadlineSeconds", alias = "ReadDeadline")]
    pub read_deadline_secs: u64,
    /// Zero disables the write deadline
    #[serde(alias = "WriteDeadlineSeconds", alias = "WriteDeadline")]
    pub write_deadline_secs: u64,
    pub reconnect: ReconnectPolicy,
    /// Capacity of each module inbox on the local bus
    pub bus_buffer_size: usize,
    /// Inbound message group to local bus group
    pub group_routes: HashMap<String, String>,
}

impl Default for EdgeHubConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: 15,
            message_qps: 30.0,
            message_burst: 60,
            server: "127.0.0.1:10000".to_string(),
            project_id: "e632aba927ea4ac2b575ec1603d56f10".to_string(),
            node_id: "edge-node".to_string(),
            tls_ca_file: PathBuf::from("/etc/edgehub/ca/rootCA.crt"),
            tls_cert_file: PathBuf::from("/etc/edgehub/certs/server.crt"),
            tls_private_key_file: PathBuf::from("/etc/edgehub/certs/server.key"),
            handshake_timeout_secs: 30,
            read_deadline_secs: 0,
            write_deadline_secs: 15,
            reconnect: ReconnectPolicy::default(),
            bus_buffer_size: 1024,
            group_routes: modules::default_group_routes(),
        }
    }
}

impl EdgeHubConfig {
    /// Create configuration optimized for testing: short periods, generous
    /// rate limits
    pub fn testing() -> Self {
        Self {
            heartbeat_interval_secs: 1,
            message_qps: 1000.0,
            message_burst: 1000,
            handshake_timeout_secs: 1,
            reconnect: ReconnectPolicy::Fixed { delay_ms: Some(10) },
            bus_buffer_size: 128,
            ..Self::default()
        }
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    pub fn read_deadline(&self) -> Option<Duration> {
        (self.read_deadline_secs > 0).then(|| Duration::from_secs(self.read_deadline_secs))
    }

    pub fn write_deadline(&self) -> Option<Duration> {
        (self.write_deadline_secs > 0).then(|| Duration::from_secs(self.write_deadline_secs))
    }

    /// Delay before the next connection attempt
    pub fn reconnect_delay(&self, consecutive_failures: u32) -> Duration {
        self.reconnect
            .delay(consecutive_failures, self.heartbeat_interval())
    }

    /// Hub endpoint for this node
    pub fn endpoint_url(&self) -> String {
        format!(
            "wss://{}/{}/{}/events",
            self.server, self.project_id, self.node_id
        )
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> EdgeHubResult<()> {
        if self.heartbeat_interval_secs == 0 {
            return Err(EdgeHubError::config_error(
                "heartbeat_interval_secs must be greater than zero",
            ));
        }
        if self.heartbeat_interval_secs > MAX_HEARTBEAT_SECS {
            return Err(EdgeHubError::config_error(format!(
                "heartbeat_interval_secs must be at most {}, got {}",
                MAX_HEARTBEAT_SECS, self.heartbeat_interval_secs
            )));
        }
        if !(self.message_qps.is_finite() && self.message_qps > 0.0) {
            return Err(EdgeHubError::config_error(format!(
                "message_qps must be a positive number, got {}",
                self.message_qps
            )));
        }
        if self.message_burst == 0 {
            return Err(EdgeHubError::config_error(
                "message_burst must be at least 1",
            ));
        }
        if self.bus_buffer_size == 0 {
            return Err(EdgeHubError::config_error(
                "bus_buffer_size must be at least 1",
            ));
        }
        if self.node_id.is_empty() {
            return Err(EdgeHubError::config_error("node_id must not be empty"));
        }
        if let ReconnectPolicy::Exponential {
            initial_ms,
            max_ms,
            multiplier,
        } = &self.reconnect
        {
            if *initial_ms == 0 || max_ms < initial_ms || *multiplier < 1.0 {
                return Err(EdgeHubError::config_error(
                    "exponential reconnect requires 0 < initial_ms <= max_ms and multiplier >= 1",
                ));
            }
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EdgeHubConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(15));
        assert_eq!(config.reconnect_delay(1), Duration::from_secs(30));
        assert_eq!(config.group_routes.get("twin").map(String::as_str), Some("twin"));
        assert!(EdgeHubConfig::testing().validate().is_ok());
    }

    #[test]
    fn test_legacy_option_names() {
        let raw = r#"
            HeartbeatIntervalSeconds = 6
            MessageQPS = 3.0
            MessageBurst = 6
            TLSCertFile = "/tmp/edge.crt"
            TLSPrivateKeyFile = "/tmp/edge.key"
        "#;
        let config: EdgeHubConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.heartbeat_interval_secs, 6);
        assert_eq!(config.message_qps, 3.0);
        assert_eq!(config.message_burst, 6);
        assert_eq!(config.tls_cert_file, PathBuf::from("/tmp/edge.crt"));
        assert_eq!(config.tls_private_key_file, PathBuf::from("/tmp/edge.key"));
        // Untouched options keep their defaults
        assert_eq!(config.handshake_timeout_secs, 30);
    }

    #[test]
    fn test_reconnect_policy_table() {
        let raw = r#"
            [reconnect]
            policy = "exponential"
            initial_ms = 100
            max_ms = 1000
            multiplier = 2.0
        "#;
        let config: EdgeHubConfig = toml::from_str(raw).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.reconnect_delay(1), Duration::from_millis(100));
        assert_eq!(config.reconnect_delay(2), Duration::from_millis(200));
        assert_eq!(config.reconnect_delay(4), Duration::from_millis(800));
        assert_eq!(config.reconnect_delay(10), Duration::from_millis(1000));
    }

    #[test]
    fn test_validation_rejects_bad_rates() {
        let mut config = EdgeHubConfig::default();
        config.message_qps = 0.0;
        assert!(config.validate().is_err());

        let mut config = EdgeHubConfig::default();
        config.message_burst = 0;
        assert!(config.validate().is_err());

        let mut config = EdgeHubConfig::default();
        config.heartbeat_interval_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_oversized_heartbeat() {
        let config = EdgeHubConfig {
            heartbeat_interval_secs: u64::MAX,
            ..EdgeHubConfig::default()
        };
        assert!(config.validate().is_err());
        // Delay computation saturates instead of overflowing
        assert_eq!(config.reconnect_delay(1), Duration::MAX);

        let config = EdgeHubConfig {
            heartbeat_interval_secs: MAX_HEARTBEAT_SECS,
            ..EdgeHubConfig::default()
        };
        assert!(config.validate().is_ok());
        assert_eq!(
            config.reconnect_delay(1),
            Duration::from_secs(2 * MAX_HEARTBEAT_SECS)
        );
    }

    #[test]
    fn test_endpoint_url() {
        let config = EdgeHubConfig {
            server: "hub.example.com:10000".to_string(),
            project_id: "p".to_string(),
            node_id: "n1".to_string(),
            ..EdgeHubConfig::default()
        };
        assert_eq!(config.endpoint_url(), "wss://hub.example.com:10000/p/n1/events");
    }
}
