//! anchord.toml configuration.
//!
//! Every section and field is optional; absent values take the defaults
//! below, and a missing file means all defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anchor_client::PoolConfig;
use anchor_health::LivenessConfig;
use anchor_orchestrator::{AnchorOptions, DEFAULT_AGENT_PORT};
use serde::Deserialize;
use thiserror::Error;

pub const DEFAULT_PORT: u16 = 48099;
pub const DEFAULT_STORE_PATH: &str = "/var/lib/anchor/anchor.redb";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct AnchorConfig {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub agent: AgentConfig,
    pub liveness: LivenessSection,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: DEFAULT_PORT }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    pub path: PathBuf,
    pub in_memory: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_STORE_PATH),
            in_memory: false,
        }
    }
}

/// Outbound calls to edge agents.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentConfig {
    pub port: u16,
    pub request_timeout_secs: u64,
    pub max_concurrency: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_AGENT_PORT,
            request_timeout_secs: 10,
            max_concurrency: 64,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct LivenessSection {
    pub unit_secs: u64,
    /// Grace added to every ping interval, in units.
    pub max_network_latency: u64,
}

impl Default for LivenessSection {
    fn default() -> Self {
        Self {
            unit_secs: 60,
            max_network_latency: 1,
        }
    }
}

impl AnchorConfig {
    /// Load from `path`; a file that does not exist yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn pool(&self) -> PoolConfig {
        PoolConfig {
            request_timeout: Duration::from_secs(self.agent.request_timeout_secs),
            max_concurrency: self.agent.max_concurrency,
        }
    }

    pub fn options(&self) -> AnchorOptions {
        AnchorOptions {
            agent_port: self.agent.port,
            liveness: LivenessConfig {
                unit: Duration::from_secs(self.liveness.unit_secs),
                max_network_latency: self.liveness.max_network_latency,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AnchorConfig::load(&dir.path().join("absent.toml")).unwrap();

        assert_eq!(config, AnchorConfig::default());
        assert_eq!(config.server.port, 48099);
        assert_eq!(config.agent.port, 48098);
        assert_eq!(config.pool().request_timeout, Duration::from_secs(10));
        assert_eq!(config.options().liveness.unit, Duration::from_secs(60));
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[server]\nport = 9000\n\n[liveness]\nunit_secs = 5\n\n[agent]\nmax_concurrency = 8"
        )
        .unwrap();

        let config = AnchorConfig::load(file.path()).unwrap();

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.liveness.unit_secs, 5);
        assert_eq!(config.liveness.max_network_latency, 1);
        assert_eq!(config.agent.max_concurrency, 8);
        assert_eq!(config.agent.request_timeout_secs, 10);
        assert_eq!(config.store.path, PathBuf::from(DEFAULT_STORE_PATH));
    }

    #[test]
    fn malformed_file_is_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nport = \"not a number\"").unwrap();

        let err = AnchorConfig::load(file.path()).unwrap_err();

        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
