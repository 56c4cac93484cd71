//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Resource store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Local filesystem storage.
    Filesystem {
        /// Root directory for storage.
        path: PathBuf,
    },
    /// Process-local memory; contents vanish on exit.
    Memory,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Filesystem {
            path: PathBuf::from("./data/pieces"),
        }
    }
}

impl StorageConfig {
    /// Validate storage configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            StorageConfig::Filesystem { path } if path.as_os_str().is_empty() => {
                Err("filesystem storage requires a non-empty path".to_string())
            }
            _ => Ok(()),
        }
    }
}

/// Remote upload configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Base URL of the remote endpoint.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Container new objects are placed in.
    #[serde(default = "default_parent_container")]
    pub parent_container: String,
    /// Shared drive id; takes precedence over `parent_container` when set.
    #[serde(default)]
    pub team_drive: Option<String>,
    /// Bytes read and transferred per unit.
    #[serde(default = "default_window_size")]
    pub window_size: u64,
    /// Units buffered between producer and uploader.
    #[serde(default = "default_handoff_capacity")]
    pub handoff_capacity: usize,
    /// Timeout for each network call, in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Retries of a single range after a transient failure.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Static bearer token.
    /// WARNING: Prefer PIECESTASH_UPLOAD__ACCESS_TOKEN over storing it in a file.
    #[serde(default)]
    pub access_token: Option<String>,
    /// Ask the remote for an object id before opening the session.
    #[serde(default = "default_generate_ids")]
    pub generate_ids: bool,
}

fn default_endpoint() -> String {
    "https://www.googleapis.com".to_string()
}

fn default_parent_container() -> String {
    "root".to_string()
}

fn default_window_size() -> u64 {
    crate::DEFAULT_WINDOW_SIZE
}

fn default_handoff_capacity() -> usize {
    1
}

fn default_request_timeout_secs() -> u64 {
    300
}

fn default_max_retries() -> u32 {
    3
}

fn default_generate_ids() -> bool {
    true
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            parent_container: default_parent_container(),
            team_drive: None,
            window_size: default_window_size(),
            handoff_capacity: default_handoff_capacity(),
            request_timeout_secs: default_request_timeout_secs(),
            max_retries: default_max_retries(),
            access_token: None,
            generate_ids: default_generate_ids(),
        }
    }
}

impl UploadConfig {
    /// Validate upload configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.window_size == 0 || self.window_size % crate::WINDOW_ALIGNMENT != 0 {
            return Err(format!(
                "window_size must be a non-zero multiple of {} bytes, got {}",
                crate::WINDOW_ALIGNMENT,
                self.window_size
            ));
        }
        if usize::try_from(self.window_size).is_err() {
            return Err(format!(
                "window_size {} exceeds platform address space",
                self.window_size
            ));
        }
        if self.handoff_capacity == 0 {
            return Err("handoff_capacity must be at least 1".to_string());
        }
        if self.request_timeout_secs == 0 {
            return Err("request_timeout_secs must be at least 1".to_string());
        }
        if self.endpoint.trim().is_empty() {
            return Err("endpoint must not be empty".to_string());
        }
        Ok(())
    }

    /// The container objects are created in.
    pub fn effective_parent(&self) -> &str {
        self.team_drive
            .as_deref()
            .filter(|d| !d.is_empty())
            .unwrap_or(&self.parent_container)
    }

    /// Get the per-request timeout as a Duration.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Resource store configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Remote upload configuration.
    #[serde(default)]
    pub upload: UploadConfig,
}

impl AppConfig {
    /// Create a test configuration with an in-memory store.
    ///
    /// **For testing only.**
    pub fn for_testing() -> Self {
        Self {
            storage: StorageConfig::Memory,
            upload: UploadConfig::default(),
        }
    }

    /// Validate every section.
    pub fn validate(&self) -> Result<(), String> {
        self.storage.validate()?;
        self.upload.validate()
    }
}
