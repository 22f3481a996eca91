//! Search catalog configuration.
//!
//! Configuration is read from JSON (camelCase keys). Every field has a
//! default, so an empty object is a valid configuration.
//!
//! | Key | Default | Description |
//! |-----|---------|-------------|
//! | `fhirVersion` | `R4` | FHIR release the catalog is built for |
//! | `includePartiallySupported` | `false` | Expose partially supported parameters to queries |
//! | `resourceTypes` | bundled R4 list | Override of the known resource type names |
//! | `codeSystemMappings` | none | Element path to code system overrides |
//! | `unsupportedParameters` | none | Parameter URLs to disable or mark partial |
//!
//! # Example
//!
//! ```rust
//! use helios_search::SearchConfig;
//!
//! let config = SearchConfig::from_json_str(r#"{ "fhirVersion": "R5" }"#).unwrap();
//! assert!(config.validate().is_ok());
//! ```

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::definition::UnsupportedSearchParameters;
use crate::error::ConfigError;
use crate::types::{FhirVersion, ResourceModel};

/// Configuration for building a [`SearchCatalog`](crate::SearchCatalog).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchConfig {
    /// FHIR release.
    pub fhir_version: FhirVersion,

    /// When set, partially supported parameters are visible to query parsing.
    pub include_partially_supported: bool,

    /// Replaces the bundled resource type list.
    pub resource_types: Option<Vec<String>>,

    /// Element path (e.g. `Patient.gender`) to code system URL.
    pub code_system_mappings: Option<BTreeMap<String, String>>,

    /// Support overrides applied after the definitions are built.
    pub unsupported_parameters: Option<UnsupportedSearchParameters>,
}

impl SearchConfig {
    /// Parses a configuration from JSON text.
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Reads a configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    /// Builds the resource model this configuration describes.
    pub fn resource_model(&self) -> ResourceModel {
        match &self.resource_types {
            Some(names) => ResourceModel::with_resource_types(self.fhir_version, names.iter().cloned()),
            None => ResourceModel::new(self.fhir_version),
        }
    }

    /// Validates the configuration and returns every problem found.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if let Some(names) = &self.resource_types {
            if names.is_empty() {
                errors.push("resourceTypes cannot be empty when present".to_string());
            }
            if names.iter().any(|name| name.trim().is_empty()) {
                errors.push("resourceTypes cannot contain blank names".to_string());
            }
        }

        if let Some(mappings) = &self.code_system_mappings {
            for (path, system) in mappings {
                if !path.contains('.') {
                    errors.push(format!("code system mapping key '{}' is not an element path", path));
                }
                if system.trim().is_empty() {
                    errors.push(format!("code system mapping for '{}' is empty", path));
                }
            }
        }

        if let Some(overrides) = &self.unsupported_parameters {
            let unsupported: HashSet<&str> =
                overrides.unsupported.iter().map(String::as_str).collect();
            for url in &overrides.partial_support {
                if unsupported.contains(url.as_str()) {
                    errors.push(format!(
                        "search parameter '{}' is listed as both unsupported and partially supported",
                        url
                    ));
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Parses, then validates.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config = Self::from_file(path)?;
        config.validate().map_err(ConfigError::Invalid)?;
        Ok(config)
    }
}
