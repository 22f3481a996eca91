//! # helios-search - FHIR search core
//!
//! Search parameter definitions, index extraction and query expression
//! parsing for the Helios FHIR Server. Storage and transport are left to the
//! other crates: this one decides *what* is searchable, turns resources into
//! index entries, and turns query strings into expression trees.
//!
//! ## Components
//!
//! - [`definition`] - SearchParameter validation and the per-type registry
//! - [`compartment`] - CompartmentDefinition lookups
//! - [`indexer`] - Extraction of [`SearchIndexEntry`] values from resources
//! - [`converters`] - Element type to search value conversion
//! - [`expression`] - Query key/value and `_include` parsing
//! - [`navigation`] - The element tree and path evaluator the indexer runs on
//! - [`catalog`] - Wires everything together from a [`SearchConfig`]
//!
//! ## Quick Start
//!
//! ```rust
//! use helios_search::{SearchCatalog, SearchConfig};
//! use serde_json::json;
//!
//! let catalog = SearchCatalog::from_config(&SearchConfig::default()).unwrap();
//!
//! // Write path
//! let entries = catalog.extract(&json!({
//!     "resourceType": "Patient",
//!     "id": "example",
//!     "name": [{ "family": "Chalmers", "given": ["Peter"] }],
//!     "birthDate": "1974-12-25"
//! }));
//! assert!(entries.iter().any(|e| e.search_parameter.code == "family"));
//!
//! // Read path
//! let expression = catalog.parse(&["Patient"], "name:exact", "Chalmers").unwrap();
//! println!("{}", expression);
//! ```
//!
//! ## Inheritance
//!
//! Parameters declared on `Resource` (such as `_id` and `_lastUpdated`)
//! apply to every concrete type. Parameters declared on `DomainResource` are
//! kept on that type only. The registry resolves and memoizes these closures
//! when it is built.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod catalog;
pub mod compartment;
pub mod config;
pub mod converters;
pub mod definition;
pub mod error;
pub mod expression;
pub mod indexer;
pub mod navigation;
pub mod search_values;
pub mod types;

// Re-export commonly used types at crate root
pub use catalog::SearchCatalog;
pub use config::SearchConfig;
pub use definition::{
    SearchParameterDefinitions, SearchParameterInfo, SearchParameterRegistry, SupportStatus,
};
pub use error::{CatalogError, SearchError, SearchResult};
pub use expression::{Expression, ExpressionParser};
pub use indexer::{SearchIndexEntry, SearchIndexer};
pub use search_values::SearchValue;
pub use types::{FhirVersion, SearchParamType};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
