//! Configuration for the DID router
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! environment variables prefixed with `DID_ROUTER__` (for example
//! `DID_ROUTER__LIFECYCLE__CALL_TTL_SECS=120`).

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::error::Result;

/// Main configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    pub database: DatabaseConfig,
    pub routing: RoutingConfig,
    pub lifecycle: LifecycleConfig,
    pub logging: LoggingConfig,
}

/// Persistent store settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub busy_timeout_secs: u64,
}

/// Next-hop trunks and recording location
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    pub forward_next_hop: String,
    pub return_next_hop: String,
    pub recording_dir: String,
}

/// Call time-to-live and reaper cadence
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Lookup window for DID bindings and the reaper's expiry threshold.
    pub call_ttl_secs: u64,
    pub reaper_interval_secs: u64,
}

/// Log output settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
    pub file_info: bool,
}

impl RouterConfig {
    /// Load configuration from an optional file plus the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let settings = builder
            .add_source(
                config::Environment::with_prefix("DID_ROUTER")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        Ok(settings.try_deserialize()?)
    }
}

impl LifecycleConfig {
    pub fn call_ttl(&self) -> Duration {
        Duration::from_secs(self.call_ttl_secs)
    }

    pub fn reaper_interval(&self) -> Duration {
        // A zero period would make the interval timer panic.
        Duration::from_secs(self.reaper_interval_secs.max(1))
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://did_router.db?mode=rwc".to_string(),
            max_connections: 25,
            busy_timeout_secs: 5,
        }
    }
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            forward_next_hop: "trunk-s3".to_string(),
            return_next_hop: "trunk-s4".to_string(),
            recording_dir: "/var/spool/asterisk/recordings".to_string(),
        }
    }
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            call_ttl_secs: 300,
            reaper_interval_secs: 30,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file_info: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_reference_deployment() {
        let config = RouterConfig::default();
        assert_eq!(config.lifecycle.call_ttl(), Duration::from_secs(300));
        assert_eq!(config.lifecycle.reaper_interval(), Duration::from_secs(30));
        assert_eq!(config.routing.forward_next_hop, "trunk-s3");
        assert_eq!(config.routing.return_next_hop, "trunk-s4");
        assert_eq!(config.database.max_connections, 25);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("router.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "[lifecycle]\ncall_ttl_secs = 60\n\n[routing]\nreturn_next_hop = \"trunk-final\"").unwrap();

        let config = RouterConfig::load(Some(&path)).unwrap();
        assert_eq!(config.lifecycle.call_ttl_secs, 60);
        assert_eq!(config.lifecycle.reaper_interval_secs, 30);
        assert_eq!(config.routing.return_next_hop, "trunk-final");
        assert_eq!(config.routing.forward_next_hop, "trunk-s3");
    }

    #[test]
    fn test_zero_reaper_interval_is_clamped() {
        let lifecycle = LifecycleConfig {
            call_ttl_secs: 300,
            reaper_interval_secs: 0,
        };
        assert_eq!(lifecycle.reaper_interval(), Duration::from_secs(1));
    }
}
