//! The assembled search catalog.
//!
//! [`SearchCatalog`] wires the definition and compartment registries, the
//! value converters, the indexer and the expression parser together from a
//! [`SearchConfig`]. The write path (indexing) and the read path (query
//! parsing) share the same registry.

use std::sync::Arc;

use serde_json::Value;
use tracing::info;

use crate::compartment::{CompartmentRegistry, embedded_compartment_bundle};
use crate::config::SearchConfig;
use crate::converters::{CodeSystemResolver, ConverterRegistry};
use crate::definition::{SearchParameterLoader, SearchParameterRegistry, SearchableDefinitions};
use crate::error::{CatalogError, ConfigError, SearchResult};
use crate::expression::{DefaultSearchValueExpressionParser, Expression, ExpressionParser};
use crate::indexer::{SearchIndexEntry, SearchIndexer};
use crate::navigation::{JsonElement, Node};
use crate::search_values::ReferenceSearchValueParser;

/// Everything needed to index resources and parse queries.
#[derive(Debug)]
pub struct SearchCatalog {
    config: SearchConfig,
    registry: Arc<SearchParameterRegistry>,
    compartments: Arc<CompartmentRegistry>,
    definitions: Arc<SearchableDefinitions>,
    indexer: SearchIndexer,
    expression_parser: ExpressionParser,
}

impl SearchCatalog {
    /// Builds a catalog over the built-in search parameters.
    pub fn from_config(config: &SearchConfig) -> Result<Self, CatalogError> {
        let loader = SearchParameterLoader::new(config.fhir_version);
        Self::with_definitions(config, &loader.load_embedded())
    }

    /// Builds a catalog over the given SearchParameter records.
    pub fn with_definitions(config: &SearchConfig, records: &[Node]) -> Result<Self, CatalogError> {
        config.validate().map_err(ConfigError::Invalid)?;

        let model = config.resource_model();
        let registry = Arc::new(SearchParameterRegistry::new(model.clone()));
        registry.build(records)?;
        if let Some(overrides) = &config.unsupported_parameters {
            registry.apply_support_overrides(overrides);
        }

        let compartments = Arc::new(CompartmentRegistry::new());
        let loader = SearchParameterLoader::new(model.version());
        compartments.build(&loader.load_from_json(&embedded_compartment_bundle())?)?;

        let code_systems = CodeSystemResolver::new().with_mappings(
            config
                .code_system_mappings
                .iter()
                .flatten()
                .map(|(path, system)| (path.clone(), system.clone())),
        );
        let reference_parser = ReferenceSearchValueParser::new(&model)?;
        let converters = Arc::new(ConverterRegistry::new(
            model.version(),
            reference_parser.clone(),
            code_systems,
        ));

        let indexer = SearchIndexer::new(Arc::clone(&registry), converters);
        let definitions = Arc::new(SearchableDefinitions::new(
            Arc::clone(&registry),
            config.include_partially_supported,
        ));
        let expression_parser = ExpressionParser::new(
            definitions.clone(),
            Arc::new(DefaultSearchValueExpressionParser::new(reference_parser)),
        );

        info!(
            fhir_version = %model.version(),
            resource_types = model.len(),
            search_parameters = registry.len(),
            include_partial = config.include_partially_supported,
            "Search catalog initialized"
        );

        Ok(Self {
            config: config.clone(),
            registry,
            compartments,
            definitions,
            indexer,
            expression_parser,
        })
    }

    /// The configuration the catalog was built from.
    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Every known parameter, whatever its support state.
    pub fn registry(&self) -> &Arc<SearchParameterRegistry> {
        &self.registry
    }

    /// Compartment membership.
    pub fn compartments(&self) -> &Arc<CompartmentRegistry> {
        &self.compartments
    }

    /// The parameters queries may use.
    pub fn definitions(&self) -> &Arc<SearchableDefinitions> {
        &self.definitions
    }

    /// The write path.
    pub fn indexer(&self) -> &SearchIndexer {
        &self.indexer
    }

    /// The read path.
    pub fn expression_parser(&self) -> &ExpressionParser {
        &self.expression_parser
    }

    /// Extracts the index entries of a JSON resource.
    pub fn extract(&self, resource: &Value) -> Vec<SearchIndexEntry> {
        let node = JsonElement::from_resource(resource.clone()).into_node();
        self.indexer.extract(node.as_ref())
    }

    /// Parses one query parameter.
    pub fn parse(&self, resource_types: &[&str], key: &str, value: &str) -> SearchResult<Expression> {
        self.expression_parser.parse(resource_types, key, value)
    }
}
