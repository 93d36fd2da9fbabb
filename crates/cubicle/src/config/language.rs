use serde::{Deserialize, Serialize};

use crate::config::ConfigError;
use crate::types::{ImageRef, LanguageDefinition};

/// A language as written in the configuration file
///
/// The language name is the table key, e.g. `[languages.python]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageConfig {
    /// Image tags to install
    #[serde(default)]
    pub versions: Vec<String>,

    /// Argv run inside the container; refers to the source by its file name
    pub cmd: Vec<String>,
}

impl LanguageConfig {
    /// Turn this entry into a registration payload
    pub fn to_definition(&self, name: &str) -> LanguageDefinition {
        LanguageDefinition {
            name: name.to_owned(),
            versions: self.versions.clone(),
            cmd: self.cmd.clone(),
        }
    }

    /// Check whether any argument mentions `source_name`
    pub fn references_source(&self, source_name: &str) -> bool {
        self.cmd.iter().any(|arg| arg.contains(source_name))
    }

    pub(crate) fn validate(&self, name: &str) -> Result<(), ConfigError> {
        if !ImageRef::is_valid_name(name) {
            return Err(ConfigError::Invalid(format!(
                "language '{name}' is not a valid image name"
            )));
        }
        if self.cmd.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "language '{name}' has empty cmd"
            )));
        }
        if let Some(version) = self.versions.iter().find(|v| !ImageRef::is_valid_tag(v)) {
            return Err(ConfigError::Invalid(format!(
                "language '{name}' has invalid version '{version}'"
            )));
        }
        Ok(())
    }
}
