use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

pub use crate::config::language::LanguageConfig;
use crate::docker::{DEFAULT_SOCKET_PATH, Transport, UnixSocketTransport};
use crate::types::LanguageDefinition;

pub mod language;
mod loader;

/// Example configuration embedded at compile time.
///
/// Library users can access this to generate a starter config file.
pub const EXAMPLE_CONFIG: &str = include_str!("../../cubicle.example.toml");

/// Default file name of the submitted source inside the container
pub const DEFAULT_SOURCE_NAME: &str = "SOURCE_CODE";

/// Default directory receiving the source
pub const DEFAULT_SOURCE_DIR: &str = "/tmp";

/// Default execution timeout in seconds
pub const DEFAULT_EXECUTION_TIMEOUT: f64 = 30.0;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse config: {0}")]
    Parse(#[from] config::ConfigError),

    #[error("language '{0}' not found in configuration")]
    LanguageNotFound(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Config for Cubicle
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Path to the Docker Engine socket.
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,

    /// Engine API version to pin, e.g. `v1.46`. Uses the daemon's default if
    /// not specified.
    #[serde(default)]
    pub api_version: Option<String>,

    /// File name the submitted code is written to inside the container.
    #[serde(default = "default_source_name")]
    pub source_name: String,

    /// Absolute directory inside the container that receives the source file.
    /// Also used as the container's working directory, so run commands can
    /// refer to the source by its bare name.
    #[serde(default = "default_source_dir")]
    pub source_dir: String,

    /// Seconds a program may run before its container is force-removed.
    /// Zero disables the limit.
    #[serde(default = "default_execution_timeout")]
    pub execution_timeout: f64,

    /// Pull an image on first use when it is not present locally
    #[serde(default = "default_pull_missing_images")]
    pub pull_missing_images: bool,

    /// Maximum number of containers running at once. Unbounded if not set.
    #[serde(default)]
    pub max_concurrent_executions: Option<usize>,

    /// Languages keyed by name
    #[serde(default)]
    pub languages: HashMap<String, LanguageConfig>,
}

impl Config {
    /// Create a new config with the embedded example languages
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty config with no languages
    pub fn empty() -> Self {
        Self {
            socket_path: default_socket_path(),
            api_version: None,
            source_name: default_source_name(),
            source_dir: default_source_dir(),
            execution_timeout: default_execution_timeout(),
            pull_missing_images: default_pull_missing_images(),
            max_concurrent_executions: None,
            languages: HashMap::new(),
        }
    }

    /// Get a language by name
    pub fn get_language(&self, name: &str) -> Result<&LanguageConfig, ConfigError> {
        self.languages
            .get(name)
            .ok_or_else(|| ConfigError::LanguageNotFound(name.to_string()))
    }

    /// Registration payloads for every configured language, sorted by name
    pub fn definitions(&self) -> Vec<LanguageDefinition> {
        let mut defs: Vec<_> = self
            .languages
            .iter()
            .map(|(name, lang)| lang.to_definition(name))
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Execution timeout, or `None` when disabled
    pub fn timeout(&self) -> Option<Duration> {
        (self.execution_timeout > 0.0).then(|| Duration::from_secs_f64(self.execution_timeout))
    }

    /// Build a transport connected to the configured socket
    pub fn transport(&self) -> Arc<dyn Transport> {
        Arc::new(UnixSocketTransport::new(
            &self.socket_path,
            self.api_version.as_deref(),
        ))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::parse_toml(EXAMPLE_CONFIG).expect("embedded default config should be valid")
    }
}

fn default_socket_path() -> PathBuf {
    PathBuf::from(DEFAULT_SOCKET_PATH)
}

fn default_source_name() -> String {
    DEFAULT_SOURCE_NAME.to_owned()
}

fn default_source_dir() -> String {
    DEFAULT_SOURCE_DIR.to_owned()
}

fn default_execution_timeout() -> f64 {
    DEFAULT_EXECUTION_TIMEOUT
}

fn default_pull_missing_images() -> bool {
    true
}
