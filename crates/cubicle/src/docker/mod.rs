//! Docker Engine client
//!
//! This module talks to the Docker Engine control API over its Unix socket,
//! handling image pulls and removal, the lifecycle of one-shot containers,
//! source injection through tar archives, and demultiplexing of the framed
//! log stream.
//!
//! References for the Engine API:
//! - https://docs.docker.com/reference/api/engine/v1.46/
//! - https://docs.docker.com/reference/api/engine/v1.46/#tag/Container/operation/ContainerAttach

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

pub use crate::docker::archive::{pack_file, unpack_file};
pub use crate::docker::container::{Container, ContainerState};
pub use crate::docker::frame::{Demuxed, FrameError, LogFrame, LogFrameCodec, StreamKind, demux};
pub use crate::docker::image::Images;
pub use crate::docker::transport::{Method, RequestBody, Response, Transport, UnixSocketTransport};
use crate::error::ErrorKind;

mod archive;
mod container;
mod frame;
mod image;
mod transport;

#[cfg(test)]
pub(crate) mod fake;

/// Default location of the Docker Engine socket
pub const DEFAULT_SOCKET_PATH: &str = "/var/run/docker.sock";

/// A container lifecycle step, used to give failures context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Create,
    WriteFile,
    Start,
    Wait,
    Logs,
    Remove,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Step::Create => "create",
            Step::WriteFile => "write file",
            Step::Start => "start",
            Step::Wait => "wait",
            Step::Logs => "logs",
            Step::Remove => "remove",
        };
        f.write_str(name)
    }
}

/// Errors that occur while talking to the container runtime
#[derive(Debug, Error)]
pub enum DockerError {
    #[error("container runtime unavailable at {}: {message}", socket.display())]
    Unavailable { socket: PathBuf, message: String },

    #[error("failed to build request for {path}: {message}")]
    Request { path: String, message: String },

    #[error("image {image} not found")]
    ImageNotFound { image: String },

    #[error("image {image} is in use by a container")]
    ImageInUse { image: String },

    #[error("container {id} not found")]
    ContainerNotFound { id: String },

    #[error("runtime returned no container id for image {image}: {message}")]
    CreateFailed { image: String, message: String },

    #[error("{operation} failed with status {status}: {message}")]
    Internal {
        operation: &'static str,
        status: u16,
        message: String,
    },

    #[error("malformed response to {operation}: {message}")]
    Protocol {
        operation: &'static str,
        message: String,
    },

    #[error("container {id}: cannot {step} while {state}")]
    IllegalTransition {
        id: String,
        step: Step,
        state: ContainerState,
    },

    #[error("malformed log stream: {0}")]
    Frame(#[from] FrameError),

    #[error("failed to build archive: {0}")]
    Archive(#[source] std::io::Error),

    #[error("invalid file name: {0}")]
    InvalidPath(String),

    #[error("{step} failed for container {id}: {source}")]
    Step {
        step: Step,
        id: String,
        #[source]
        source: Box<DockerError>,
    },
}

impl DockerError {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            DockerError::Unavailable { .. } => ErrorKind::RuntimeUnavailable,
            DockerError::ImageNotFound { .. } | DockerError::ContainerNotFound { .. } => {
                ErrorKind::NotFound
            }
            DockerError::ImageInUse { .. } => ErrorKind::Conflict,
            DockerError::CreateFailed { .. } => ErrorKind::CreateFailed,
            DockerError::InvalidPath(_) => ErrorKind::Invalid,
            DockerError::Request { .. }
            | DockerError::Internal { .. }
            | DockerError::Protocol { .. }
            | DockerError::IllegalTransition { .. }
            | DockerError::Frame(_)
            | DockerError::Archive(_) => ErrorKind::RuntimeInternal,
            DockerError::Step { source, .. } => source.kind(),
        }
    }

    /// Innermost error, skipping step context
    pub fn root(&self) -> &DockerError {
        match self {
            DockerError::Step { source, .. } => source.root(),
            other => other,
        }
    }

    /// Attach the failing step and container id
    pub(crate) fn in_step(self, step: Step, id: &str) -> DockerError {
        match self {
            // Already carries the id
            DockerError::IllegalTransition { .. } | DockerError::Step { .. } => self,
            other => DockerError::Step {
                step,
                id: id.to_owned(),
                source: Box::new(other),
            },
        }
    }
}
