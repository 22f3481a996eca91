//! Core types shared by the definition registry, the indexer and the
//! expression parser.

pub mod resource_types;
pub mod search_params;

pub use resource_types::{
    BASE, DOMAIN_RESOURCE, R4_RESOURCE_TYPES, RESOURCE, ResourceModel, TypeNode, is_abstract,
};
pub use search_params::{FhirVersion, SearchModifier, SearchParamType, SearchPrefix};
