//! Integration tests for cubicle
//!
//! These tests talk to a real Docker daemon on `/var/run/docker.sock`.
//! Run with: cargo test -p cubicle --features integration-tests
//!
//! Tests that need the daemon (and pull images) are marked `#[ignore]`. To
//! include them:
//!    cargo test -p cubicle --features integration-tests -- --include-ignored

#![cfg(feature = "integration-tests")]

use std::fs;

use cubicle::config::Config;
use cubicle::types::Language;

mod container_lifecycle;
mod execution;

const FIXTURES_PATH: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures");

/// Image used by most daemon tests
pub(crate) const ALPINE_TAG: &str = "3.20";

/// Helper to get fixture file content
pub(crate) fn fixture_source(name: &str) -> String {
    let path = format!("{FIXTURES_PATH}/sources/{name}");
    fs::read_to_string(&path).unwrap_or_else(|e| panic!("Failed to read fixture {path}: {e}"))
}

/// Config pointing at the local daemon with a short timeout
pub(crate) fn test_config() -> Config {
    Config {
        execution_timeout: 20.0,
        ..Config::empty()
    }
}

/// A shell "language" backed by the alpine image
pub(crate) fn alpine() -> Language {
    Language::new(
        "alpine",
        vec![ALPINE_TAG.to_owned()],
        vec!["sh".to_owned(), "SOURCE_CODE".to_owned()],
    )
}
