//! Error classification shared by every layer
//!
//! Each module keeps its own error enum; they all collapse onto an
//! [`ErrorKind`] so callers (an HTTP layer, the CLI) can map failures onto a
//! protocol status without matching on every variant.

use std::fmt;

use serde::Serialize;

/// Coarse class of a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Language, version, container, image or snippet is absent
    NotFound,

    /// Already exists, version already exists, or image still in use
    Conflict,

    /// Requested version is not installed for the language
    Unsupported,

    /// Input rejected before any work was done
    Invalid,

    /// The container runtime could not be reached
    RuntimeUnavailable,

    /// The container runtime answered with a server fault
    RuntimeInternal,

    /// The runtime accepted a create request but returned no usable id
    CreateFailed,
}

impl ErrorKind {
    /// HTTP-style status class for this kind
    #[must_use]
    pub fn status_code(self) -> u16 {
        match self {
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict => 409,
            ErrorKind::Unsupported => 422,
            ErrorKind::Invalid => 400,
            ErrorKind::RuntimeUnavailable => 503,
            ErrorKind::RuntimeInternal | ErrorKind::CreateFailed => 500,
        }
    }

    /// Whether the failure originated on the server side
    #[must_use]
    pub fn is_server_error(self) -> bool {
        self.status_code() >= 500
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::NotFound => "not found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Unsupported => "unsupported",
            ErrorKind::Invalid => "invalid",
            ErrorKind::RuntimeUnavailable => "runtime unavailable",
            ErrorKind::RuntimeInternal => "runtime internal error",
            ErrorKind::CreateFailed => "create failed",
        };
        f.write_str(name)
    }
}
