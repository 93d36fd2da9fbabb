use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A registered language and the versions installed for it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Language {
    /// Unique name, also the image repository (e.g. "python")
    pub name: String,

    /// Installed versions, in the order they were added. Each one is an image
    /// tag under `name`.
    pub versions: Vec<String>,

    /// Argv template run inside the container (e.g. `["python3", "SOURCE_CODE"]`)
    pub cmd: Vec<String>,

    /// When the language was registered
    pub created: DateTime<Utc>,

    /// Last time the versions or the command changed
    pub updated: DateTime<Utc>,
}

impl Language {
    /// Build a language from a definition, keeping only `versions`
    pub fn new(name: impl Into<String>, versions: Vec<String>, cmd: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            versions: dedup_versions(versions),
            cmd,
            created: now,
            updated: now,
        }
    }

    /// Check whether `version` is installed
    #[must_use]
    pub fn has_version(&self, version: &str) -> bool {
        self.versions.iter().any(|v| v == version)
    }

    /// Image reference for one of this language's versions
    pub fn image(&self, version: &str) -> ImageRef {
        ImageRef::new(&self.name, version)
    }
}

/// Registration payload for a new language
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageDefinition {
    pub name: String,

    /// Versions to install; failures are reported, not fatal
    #[serde(default)]
    pub versions: Vec<String>,

    pub cmd: Vec<String>,
}

impl LanguageDefinition {
    pub fn new(
        name: impl Into<String>,
        versions: impl IntoIterator<Item = impl Into<String>>,
        cmd: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            name: name.into(),
            versions: versions.into_iter().map(Into::into).collect(),
            cmd: cmd.into_iter().map(Into::into).collect(),
        }
    }

    /// Listed versions with duplicates dropped, first occurrence wins
    pub fn distinct_versions(&self) -> Vec<String> {
        dedup_versions(self.versions.clone())
    }
}

/// Remove duplicate versions while preserving order
fn dedup_versions(versions: Vec<String>) -> Vec<String> {
    let mut seen = Vec::with_capacity(versions.len());
    for version in versions {
        if !seen.contains(&version) {
            seen.push(version);
        }
    }
    seen
}

/// `name:version` reference to a runtime image
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageRef {
    pub name: String,
    pub tag: String,
}

impl ImageRef {
    /// Longest tag the registry accepts
    pub const MAX_TAG_LEN: usize = 128;

    pub fn new(name: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tag: tag.into(),
        }
    }

    /// Check a repository name: lowercase alphanumerics and `.`, `_`, `-`, `/`
    /// separators, starting and ending with an alphanumeric
    pub fn is_valid_name(name: &str) -> bool {
        let is_alnum = |c: char| c.is_ascii_lowercase() || c.is_ascii_digit();
        !name.is_empty()
            && name.starts_with(is_alnum)
            && name.ends_with(is_alnum)
            && name
                .chars()
                .all(|c| is_alnum(c) || matches!(c, '.' | '_' | '-' | '/'))
            && !name.contains("..")
            && !name.contains("//")
    }

    /// Check a tag: `[A-Za-z0-9_][A-Za-z0-9_.-]*`, at most 128 characters
    pub fn is_valid_tag(tag: &str) -> bool {
        let mut chars = tag.chars();
        let Some(first) = chars.next() else {
            return false;
        };
        tag.len() <= Self::MAX_TAG_LEN
            && (first.is_ascii_alphanumeric() || first == '_')
            && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.tag)
    }
}

/// Result of running one piece of code
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Everything the program wrote to stdout
    pub stdout: String,

    /// Everything the program wrote to stderr
    pub stderr: String,

    /// Exit code of the container's main process
    #[serde(rename = "exitCode")]
    pub exit_code: i64,
}

impl ExecutionResult {
    /// Check if the program exited with code 0
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }
}
