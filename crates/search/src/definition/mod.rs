//! Search parameter definitions.
//!
//! SearchParameter records are read into [`SearchParameterDescriptor`]s,
//! validated as a whole by the [`SearchParameterDefinitionBuilder`] and held
//! by the [`SearchParameterRegistry`], which resolves the effective set of
//! parameters for every resource type (parameters declared on `Resource`
//! apply to every concrete type).
//!
//! # Example
//!
//! ```rust
//! use helios_search::definition::{SearchParameterLoader, SearchParameterRegistry};
//! use helios_search::types::ResourceModel;
//!
//! let model = ResourceModel::default();
//! let loader = SearchParameterLoader::new(model.version());
//! let registry = SearchParameterRegistry::new(model);
//! registry.build(&loader.load_embedded()).unwrap();
//!
//! let name = registry.get_search_parameter("Patient", "name").unwrap();
//! assert_eq!(name.expression, "Patient.name");
//! // Inherited from Resource.
//! assert!(registry.try_get_search_parameter("Patient", "_id").is_some());
//! ```

mod builder;
mod descriptor;
mod loader;
mod registry;
mod searchable;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::SearchResult;
use crate::types::{ResourceModel, SearchParamType};

pub use builder::{RESOURCE_TYPE_PARAMETER_URL, SearchParameterDefinitionBuilder, StagedDefinitions};
pub use descriptor::{ComponentDescriptor, SearchParameterDescriptor};
pub use loader::{SearchParameterLoader, embedded_core_bundle};
pub use registry::{ParamId, RegistryUpdate, SearchParameterRegistry};
pub use searchable::SearchableDefinitions;

/// Whether a parameter can be used in queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum SupportStatus {
    /// Fully supported.
    #[default]
    Enabled,
    /// Known but not indexed or queryable.
    Disabled,
    /// Indexed, but some values of the parameter cannot be searched.
    PartiallySupported,
}

/// One component of a composite parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentInfo {
    /// URL of the parameter the component refers to.
    pub definition_url: String,
    /// Expression relative to the composite's anchor element.
    pub expression: String,
    /// The referenced parameter, linked once the definition resolves.
    pub resolved: Option<Arc<SearchParameterInfo>>,
}

impl ComponentInfo {
    /// Type of the referenced parameter.
    pub fn resolved_type(&self) -> Option<SearchParamType> {
        self.resolved.as_ref().map(|p| p.param_type)
    }
}

/// A validated search parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchParameterInfo {
    /// Canonical URL.
    pub url: String,
    /// Name used in queries.
    pub code: String,
    /// Computer-friendly name from the definition.
    pub name: Option<String>,
    /// Free text description.
    pub description: Option<String>,
    /// The parameter type.
    pub param_type: SearchParamType,
    /// Path expression selecting the indexed elements. Empty only for the
    /// parameters that are never attached to a resource type.
    pub expression: String,
    /// Types the parameter is declared on.
    pub base_resource_types: Vec<String>,
    /// Types a reference parameter may point at.
    pub target_resource_types: Vec<String>,
    /// Components of a composite parameter, in order.
    pub components: Vec<ComponentInfo>,
    /// Current support state.
    pub status: SupportStatus,
}

impl SearchParameterInfo {
    /// Enabled and fully supported.
    pub fn is_searchable(&self) -> bool {
        self.status == SupportStatus::Enabled
    }

    /// Enabled, possibly with partial support.
    pub fn is_supported(&self) -> bool {
        matches!(
            self.status,
            SupportStatus::Enabled | SupportStatus::PartiallySupported
        )
    }

    /// Enabled with partial support.
    pub fn is_partially_supported(&self) -> bool {
        self.status == SupportStatus::PartiallySupported
    }

    /// Returns true for composite parameters.
    pub fn is_composite(&self) -> bool {
        self.param_type == SearchParamType::Composite
    }

    /// Returns true if the parameter may reference the given type.
    pub fn targets(&self, resource_type: &str) -> bool {
        self.target_resource_types.iter().any(|t| t == resource_type)
    }
}

/// Support overrides, in the format of the bundled
/// `unsupported-search-parameters.json` file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UnsupportedSearchParameters {
    /// URLs of parameters that cannot be searched at all.
    pub unsupported: Vec<String>,
    /// URLs of parameters that are only partially supported.
    pub partial_support: Vec<String>,
}

impl UnsupportedSearchParameters {
    /// Parses the override file format.
    pub fn from_json_str(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Read access to search parameter definitions.
///
/// Implemented by the registry itself and by the filtered
/// [`SearchableDefinitions`] view handed to query parsing.
pub trait SearchParameterDefinitions: Send + Sync {
    /// The resource model the definitions were built for.
    fn resource_model(&self) -> &ResourceModel;

    /// Every parameter applicable to a resource type.
    fn get_search_parameters(&self, resource_type: &str) -> SearchResult<Vec<Arc<SearchParameterInfo>>>;

    /// A parameter by resource type and code.
    fn get_search_parameter(&self, resource_type: &str, code: &str) -> SearchResult<Arc<SearchParameterInfo>>;

    /// A parameter by canonical URL.
    fn get_search_parameter_by_url(&self, url: &str) -> SearchResult<Arc<SearchParameterInfo>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_support_predicates() {
        let mut info = SearchParameterInfo {
            url: "http://example.org/sp".to_string(),
            code: "sp".to_string(),
            name: None,
            description: None,
            param_type: SearchParamType::Token,
            expression: "Patient.sp".to_string(),
            base_resource_types: vec!["Patient".to_string()],
            target_resource_types: Vec::new(),
            components: Vec::new(),
            status: SupportStatus::Enabled,
        };
        assert!(info.is_searchable());
        assert!(info.is_supported());

        info.status = SupportStatus::PartiallySupported;
        assert!(!info.is_searchable());
        assert!(info.is_supported());
        assert!(info.is_partially_supported());

        info.status = SupportStatus::Disabled;
        assert!(!info.is_searchable());
        assert!(!info.is_supported());
    }

    #[test]
    fn test_unsupported_parameters_format() {
        let overrides = UnsupportedSearchParameters::from_json_str(
            r#"{ "unsupported": ["http://a"], "partialSupport": ["http://b"] }"#,
        )
        .unwrap();
        assert_eq!(overrides.unsupported, vec!["http://a".to_string()]);
        assert_eq!(overrides.partial_support, vec!["http://b".to_string()]);

        let empty = UnsupportedSearchParameters::from_json_str("{}").unwrap();
        assert_eq!(empty, UnsupportedSearchParameters::default());
    }
}
