//! Configuration models for the agent daemon and the manager-side client.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::{Result, StasisError};

/// Which runtime backend the agent drives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeKind {
    /// Real processes, `criu` checkpoints.
    #[default]
    Native,
    /// In-memory process model.
    Simulated,
}

/// Root configuration for the agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Base directory for agent state and default checkpoint roots.
    pub data_dir: PathBuf,
    /// Unix socket the daemon listens on.
    pub socket_path: PathBuf,
    /// Runtime backend selection.
    pub runtime: RuntimeKind,
    /// Capacity of each event subscriber's queue.
    pub event_buffer: usize,
    /// Number of past events retained for `since` replay.
    pub event_history: usize,
    /// cgroup v2 directory under which per-container groups live.
    pub cgroup_root: Option<PathBuf>,
    /// Explicit path to the `criu` binary.
    pub criu_path: Option<PathBuf>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            data_dir: constants::data_dir().clone(),
            socket_path: constants::default_socket_path(),
            runtime: RuntimeKind::default(),
            event_buffer: constants::DEFAULT_EVENT_BUFFER,
            event_history: constants::DEFAULT_EVENT_HISTORY,
            cgroup_root: None,
            criu_path: None,
        }
    }
}

impl AgentConfig {
    /// Creates a configuration rooted at `data_dir`, other fields default.
    #[must_use]
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            socket_path: data_dir.join("stasisd.sock"),
            data_dir,
            ..Self::default()
        }
    }

    /// Loads a configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if a
    /// value is out of range.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| StasisError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks value ranges that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`StasisError::InvalidArgument`] for a zero-capacity queue.
    pub fn validate(&self) -> Result<()> {
        if self.event_buffer == 0 {
            return Err(StasisError::invalid_argument(
                "event_buffer must be at least 1",
            ));
        }
        Ok(())
    }

    /// Returns the default checkpoint root for a container.
    #[must_use]
    pub fn checkpoint_root(&self, container_id: &str) -> PathBuf {
        constants::checkpoint_root(&self.data_dir, container_id)
    }
}

/// Configuration for the manager-side client stub and orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Agent socket to connect to.
    pub socket_path: PathBuf,
    /// Deadline applied to every unary call, in milliseconds.
    pub call_timeout_ms: u64,
    /// Retries for idempotent read calls after a transport failure.
    pub read_retries: u32,
    /// Delay between retries, in milliseconds.
    pub retry_backoff_ms: u64,
    /// Base directory for default checkpoint roots.
    pub data_dir: PathBuf,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            socket_path: constants::default_socket_path(),
            call_timeout_ms: constants::DEFAULT_CALL_TIMEOUT_MS,
            read_retries: constants::DEFAULT_READ_RETRIES,
            retry_backoff_ms: constants::DEFAULT_RETRY_BACKOFF_MS,
            data_dir: constants::data_dir().clone(),
        }
    }
}

impl ClientConfig {
    /// Returns the per-call deadline.
    #[must_use]
    pub const fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    /// Returns the delay between read retries.
    #[must_use]
    pub const fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    /// Returns the default checkpoint root for a container.
    #[must_use]
    pub fn checkpoint_root(&self, container_id: &str) -> PathBuf {
        constants::checkpoint_root(&self.data_dir, container_id)
    }
}
