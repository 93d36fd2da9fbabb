//! Configuration file loading for Cubicle
//!
//! Handles loading and parsing configuration files using the config crate.

use std::path::Path;

use config::{Config as ConfigBuilder, File, FileFormat};

use crate::config::{Config, ConfigError};

impl Config {
    /// Load configuration from a file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let config = ConfigBuilder::builder()
            .add_source(File::from(path))
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config = ConfigBuilder::builder()
            .add_source(File::from_str(content, FileFormat::Toml))
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    fn validate(&self) -> Result<(), ConfigError> {
        if self.socket_path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("socket_path is empty".to_owned()));
        }
        if self.source_name.is_empty()
            || self.source_name.contains('/')
            || self.source_name.contains("..")
        {
            return Err(ConfigError::Invalid(format!(
                "source_name must be a plain file name, got '{}'",
                self.source_name
            )));
        }
        if !self.source_dir.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "source_dir must be an absolute path, got '{}'",
                self.source_dir
            )));
        }
        if !self.execution_timeout.is_finite() || self.execution_timeout < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "execution_timeout must be a non-negative number of seconds, got {}",
                self.execution_timeout
            )));
        }
        if self.max_concurrent_executions == Some(0) {
            return Err(ConfigError::Invalid(
                "max_concurrent_executions must be at least 1".to_owned(),
            ));
        }

        for (name, lang) in &self.languages {
            lang.validate(name)?;
        }

        Ok(())
    }
}
