//! A library for running untrusted code in throwaway containers.
//!
//! Cubicle provides an async Rust API for executing submitted code inside
//! one-shot Docker containers. It talks to the Docker Engine directly over its
//! Unix socket, keeps a catalog of languages and their installed image
//! versions, and stores executed snippets per user.
//!
//! # Features
//!
//! - **Ephemeral containers** — One container per execution, removed on every exit path.
//! - **Explicit lifecycle** — Container steps are checked against a state machine.
//! - **Language registry** — Install and remove image versions with partial-failure reporting.
//! - **TOML configuration** — Socket, timeouts and seed languages in one file.
//! - **Log demultiplexing** — Framed stdout/stderr streams decoded with a `tokio-util` codec.

pub use config::{Config, ConfigError, EXAMPLE_CONFIG, LanguageConfig};
pub use docker::{
    Container, ContainerState, DockerError, Images, Transport, UnixSocketTransport,
};
pub use error::ErrorKind;
pub use registry::{
    InMemoryStore, LanguageRegistry, LanguageStore, NewLanguage, RegistryError, StoreError,
};
pub use runner::{ExecuteError, ImageLocks, Runner};
pub use snippet::{
    InMemorySnippetStore, Snippet, SnippetError, SnippetPatch, SnippetStore, Snippets,
};
pub use types::{ExecutionResult, ImageRef, Language, LanguageDefinition};

pub mod config;
pub mod docker;
pub mod error;
pub mod registry;
pub mod runner;
pub mod snippet;
pub mod types;
