//! Query-facing view of the registry.

use std::sync::Arc;

use super::{SearchParameterDefinitions, SearchParameterInfo, SearchParameterRegistry};
use crate::error::{SearchError, SearchResult};
use crate::types::ResourceModel;

/// Exposes only the parameters that queries may use.
///
/// Disabled parameters are always hidden; partially supported ones are
/// hidden unless `include_partial` is set. Hidden parameters fail lookups
/// with [`SearchError::ParameterNotSupported`].
#[derive(Debug, Clone)]
pub struct SearchableDefinitions {
    registry: Arc<SearchParameterRegistry>,
    include_partial: bool,
}

impl SearchableDefinitions {
    /// Wraps a registry.
    pub fn new(registry: Arc<SearchParameterRegistry>, include_partial: bool) -> Self {
        Self {
            registry,
            include_partial,
        }
    }

    /// The underlying registry.
    pub fn registry(&self) -> &Arc<SearchParameterRegistry> {
        &self.registry
    }

    /// Returns true if partially supported parameters are visible.
    pub fn includes_partial(&self) -> bool {
        self.include_partial
    }

    fn is_visible(&self, param: &SearchParameterInfo) -> bool {
        param.is_searchable() || (self.include_partial && param.is_partially_supported())
    }

    /// Every visible parameter.
    pub fn all_search_parameters(&self) -> Vec<Arc<SearchParameterInfo>> {
        self.registry
            .all_search_parameters()
            .into_iter()
            .filter(|p| self.is_visible(p))
            .collect()
    }

    /// A visible parameter by type and code, or `None`.
    pub fn try_get_search_parameter(&self, resource_type: &str, code: &str) -> Option<Arc<SearchParameterInfo>> {
        self.registry
            .try_get_search_parameter(resource_type, code)
            .filter(|p| self.is_visible(p))
    }
}

impl SearchParameterDefinitions for SearchableDefinitions {
    fn resource_model(&self) -> &ResourceModel {
        self.registry.model()
    }

    fn get_search_parameters(&self, resource_type: &str) -> SearchResult<Vec<Arc<SearchParameterInfo>>> {
        Ok(self
            .registry
            .get_search_parameters(resource_type)?
            .into_iter()
            .filter(|p| self.is_visible(p))
            .collect())
    }

    fn get_search_parameter(&self, resource_type: &str, code: &str) -> SearchResult<Arc<SearchParameterInfo>> {
        self.try_get_search_parameter(resource_type, code)
            .ok_or_else(|| SearchError::parameter_not_supported(resource_type, code))
    }

    fn get_search_parameter_by_url(&self, url: &str) -> SearchResult<Arc<SearchParameterInfo>> {
        self.registry
            .try_get_search_parameter_by_url(url)
            .filter(|p| self.is_visible(p))
            .ok_or_else(|| SearchError::parameter_url_not_supported(url))
    }
}
