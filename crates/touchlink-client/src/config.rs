//! Client configuration loaded from TOML.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

/// Local identity announced to servers in the control request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    #[serde(default = "default_name")]
    pub name: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
        }
    }
}

/// Discovery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    #[serde(default = "default_service_type")]
    pub service_type: String,
    #[serde(default = "default_resolve_timeout_ms")]
    pub resolve_timeout_ms: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            service_type: default_service_type(),
            resolve_timeout_ms: default_resolve_timeout_ms(),
        }
    }
}

impl DiscoveryConfig {
    #[must_use]
    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_millis(self.resolve_timeout_ms)
    }
}

/// Session establishment and heartbeat tuning.
///
/// The defaults are reference values, not protocol constants; a deployment
/// interoperating with a fixed peer can tune all of them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Bound on a connect attempt.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// How long to wait for an explicit rejection of the control request.
    #[serde(default = "default_accept_grace_ms")]
    pub accept_grace_ms: u64,
    /// Ping cadence while Active or Degraded.
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// How long a ping may remain unanswered before it counts as a miss.
    #[serde(default = "default_pong_window_ms")]
    pub pong_window_ms: u64,
    /// Consecutive misses before the session degrades.
    #[serde(default = "default_degraded_after_misses")]
    pub degraded_after_misses: u32,
    /// Consecutive misses before the session closes.
    #[serde(default = "default_closed_after_misses")]
    pub closed_after_misses: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            accept_grace_ms: default_accept_grace_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            pong_window_ms: default_pong_window_ms(),
            degraded_after_misses: default_degraded_after_misses(),
            closed_after_misses: default_closed_after_misses(),
        }
    }
}

impl SessionConfig {
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    #[must_use]
    pub fn accept_grace(&self) -> Duration {
        Duration::from_millis(self.accept_grace_ms)
    }

    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    #[must_use]
    pub fn pong_window(&self) -> Duration {
        Duration::from_millis(self.pong_window_ms)
    }
}

fn default_name() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "touchlink".to_string())
}

fn default_service_type() -> String {
    "_touchpad._udp.local.".to_string()
}

fn default_resolve_timeout_ms() -> u64 {
    3000
}

fn default_connect_timeout_ms() -> u64 {
    3000
}

fn default_accept_grace_ms() -> u64 {
    300
}

fn default_heartbeat_interval_ms() -> u64 {
    1500
}

fn default_pong_window_ms() -> u64 {
    1500
}

fn default_degraded_after_misses() -> u32 {
    3
}

fn default_closed_after_misses() -> u32 {
    6
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = Config::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("connect_timeout_ms = 3000"));
        assert!(toml_str.contains("_touchpad._udp.local."));
    }

    #[test]
    fn parse_example_config() {
        let toml_str = r#"
[identity]
name = "my-handheld"

[discovery]
service_type = "_touchpad._udp.local."
resolve_timeout_ms = 2000

[session]
connect_timeout_ms = 3000
heartbeat_interval_ms = 1000
degraded_after_misses = 3
closed_after_misses = 6
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.identity.name, "my-handheld");
        assert_eq!(config.discovery.resolve_timeout_ms, 2000);
        assert_eq!(config.session.heartbeat_interval_ms, 1000);
        // Unspecified fields fall back to defaults.
        assert_eq!(config.session.accept_grace_ms, 300);
        assert_eq!(config.session.pong_window_ms, 1500);
    }

    #[test]
    fn closed_budget_extends_past_degraded() {
        let session = SessionConfig::default();
        assert!(session.closed_after_misses > session.degraded_after_misses);
    }
}
