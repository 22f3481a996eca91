//! Shared test infrastructure for the search crate.

#![allow(dead_code)]

pub mod fixtures;

pub use fixtures::*;

use std::sync::Once;

use helios_search::{SearchCatalog, SearchConfig, SearchIndexEntry, SearchValue};

static TRACING: Once = Once::new();

/// Installs a tracing subscriber honoring `RUST_LOG`, once per test binary.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// A catalog over the built-in definitions with the default configuration.
pub fn default_catalog() -> SearchCatalog {
    init_tracing();
    SearchCatalog::from_config(&SearchConfig::default()).expect("Failed to build search catalog")
}

/// The values extracted for one parameter code.
pub fn values_for<'a>(entries: &'a [SearchIndexEntry], code: &str) -> Vec<&'a SearchValue> {
    entries
        .iter()
        .filter(|e| e.search_parameter.code == code)
        .map(|e| &e.value)
        .collect()
}
