//! Configuration system for Confluence.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $CONFLUENCE_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/confluence/config.toml
//!   3. ~/.config/confluence/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::peer::{parse_peer_list, ParseError, PeerEndpoint};

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Upstream peers as `host:port`. Index 0 is the alignment reference.
    pub peers: Vec<String>,
    pub network: NetworkConfig,
    pub alignment: AlignmentConfig,
    pub buffer: BufferConfig,
    pub playout: PlayoutConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// TCP port the player connects to.
    pub player_port: u16,
    /// Address the player listener binds.
    pub bind_addr: String,
    /// Outbound peer connect timeout.
    pub connect_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignmentConfig {
    /// Leading bytes of the reference stream discarded before matching.
    pub start_offset: usize,
    /// Needle length of the first search.
    pub initial_needle: usize,
    /// Bytes every buffer must hold before a pass starts.
    pub ready_bytes: usize,
    /// How long a pass waits for a buffer to reach `ready_bytes`.
    pub ready_timeout_ms: u64,
    /// Passes attempted before unalignable peers are excluded.
    pub max_attempts: u32,
    /// Pause between passes so buffers can grow.
    pub retry_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Per-peer buffer bound. A full buffer stops reading from its peer.
    pub capacity_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayoutConfig {
    /// Sleep between polls of an empty merge set.
    pub poll_interval_ms: u64,
    /// Recently played chunk digests remembered to drop late duplicates.
    /// 0 = disabled.
    pub replay_history: usize,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            peers: Vec::new(),
            network: NetworkConfig::default(),
            alignment: AlignmentConfig::default(),
            buffer: BufferConfig::default(),
            playout: PlayoutConfig::default(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            player_port: 15000,
            bind_addr: "0.0.0.0".to_string(),
            connect_timeout_ms: 5_000,
        }
    }
}

impl Default for AlignmentConfig {
    fn default() -> Self {
        Self {
            start_offset: 100,
            initial_needle: 6,
            ready_bytes: 16 * 1024,
            ready_timeout_ms: 10_000,
            max_attempts: 5,
            retry_delay_ms: 500,
        }
    }
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            capacity_bytes: 4 * 1024 * 1024,
        }
    }
}

impl Default for PlayoutConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 10,
            replay_history: 0,
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("confluence")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
    #[error("invalid peer list: {0}")]
    Peers(#[from] ParseError),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl RelayConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            RelayConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("CONFLUENCE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&RelayConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply CONFLUENCE_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("CONFLUENCE_NETWORK__PLAYER_PORT") {
            if let Ok(p) = v.parse() {
                self.network.player_port = p;
            }
        }
        if let Ok(v) = std::env::var("CONFLUENCE_NETWORK__BIND_ADDR") {
            self.network.bind_addr = v;
        }
        if let Ok(v) = std::env::var("CONFLUENCE_ALIGNMENT__START_OFFSET") {
            if let Ok(n) = v.parse() {
                self.alignment.start_offset = n;
            }
        }
        if let Ok(v) = std::env::var("CONFLUENCE_PLAYOUT__REPLAY_HISTORY") {
            if let Ok(n) = v.parse() {
                self.playout.replay_history = n;
            }
        }
        if let Ok(v) = std::env::var("CONFLUENCE_PEERS") {
            self.peers = split_peer_list(&v);
        }
    }

    /// Parse and check the configured peers and numeric bounds.
    pub fn validate(&self) -> Result<Vec<PeerEndpoint>, ConfigError> {
        let peers = parse_peer_list(&self.peers)?;
        if self.alignment.initial_needle == 0 {
            return Err(ConfigError::Invalid("alignment.initial_needle must be > 0".into()));
        }
        if self.alignment.max_attempts == 0 {
            return Err(ConfigError::Invalid("alignment.max_attempts must be > 0".into()));
        }
        if self.buffer.capacity_bytes < 2 * crate::CHUNK_SIZE {
            return Err(ConfigError::Invalid(format!(
                "buffer.capacity_bytes must be at least {}",
                2 * crate::CHUNK_SIZE
            )));
        }
        if self.buffer.capacity_bytes < self.alignment.ready_bytes {
            return Err(ConfigError::Invalid(format!(
                "buffer.capacity_bytes ({}) is below alignment.ready_bytes ({})",
                self.buffer.capacity_bytes, self.alignment.ready_bytes
            )));
        }
        if self.alignment.ready_bytes < self.alignment.start_offset + self.alignment.initial_needle
        {
            return Err(ConfigError::Invalid(
                "alignment.ready_bytes must cover start_offset + initial_needle".into(),
            ));
        }
        Ok(peers)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.network.connect_timeout_ms)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.alignment.ready_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.alignment.retry_delay_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.playout.poll_interval_ms)
    }
}

/// Split a comma- or whitespace-separated peer list.
pub fn split_peer_list(raw: &str) -> Vec<String> {
    raw.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
