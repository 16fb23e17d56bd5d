//! Test utilities and fixtures for buildcache
//!
//! This crate provides shared test helpers for the integration tests
//! (tests/ directory) of the workspace crates.

pub mod fixtures;
pub mod mocks;
pub mod project;

use tracing_subscriber::EnvFilter;

/// Install a fmt subscriber for test output.
///
/// Set RUST_LOG=debug to see cache decisions. Safe to call from every test;
/// only the first call installs the subscriber.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
