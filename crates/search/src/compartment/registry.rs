//! Validation and lookup of compartment definitions.

use std::collections::{BTreeSet, HashMap, HashSet};

use parking_lot::RwLock;
use tracing::debug;
use url::Url;

use super::CompartmentType;
use crate::error::{OperationIssue, SearchError, SearchResult};
use crate::navigation::{ElementNode, Node};

type ParamsByResource = HashMap<(CompartmentType, String), BTreeSet<String>>;
type ResourcesByCompartment = HashMap<CompartmentType, BTreeSet<String>>;

#[derive(Debug, Default)]
struct Lookups {
    params: ParamsByResource,
    resource_types: ResourcesByCompartment,
}

/// Compartment membership lookups.
///
/// Built once from a bundle of CompartmentDefinition records; a rebuild
/// replaces both lookups together.
#[derive(Debug, Default)]
pub struct CompartmentRegistry {
    lookups: RwLock<Lookups>,
}

struct ValidatedCompartment {
    compartment_type: CompartmentType,
    resources: Vec<(String, Vec<String>)>,
}

impl CompartmentRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates every record and replaces the lookups.
    ///
    /// All issues are collected and reported together; on failure the
    /// current lookups are kept.
    pub fn build(&self, records: &[Node]) -> SearchResult<()> {
        let compartments = validate(records)?;

        let mut lookups = Lookups::default();
        for compartment in compartments {
            let mut linked = BTreeSet::new();
            for (resource_type, params) in compartment.resources {
                if !params.is_empty() {
                    linked.insert(resource_type.clone());
                }
                lookups
                    .params
                    .insert((compartment.compartment_type, resource_type), params.into_iter().collect());
            }
            lookups.resource_types.insert(compartment.compartment_type, linked);
        }

        debug!(compartments = lookups.resource_types.len(), "Built compartment definitions");
        *self.lookups.write() = lookups;
        Ok(())
    }

    /// The parameters linking `resource_type` to the compartment, when the
    /// compartment lists the type.
    pub fn try_get_search_params(
        &self,
        resource_type: &str,
        compartment_type: CompartmentType,
    ) -> Option<BTreeSet<String>> {
        self.lookups
            .read()
            .params
            .get(&(compartment_type, resource_type.to_string()))
            .cloned()
    }

    /// Resource types with at least one linking parameter.
    pub fn try_get_resource_types(&self, compartment_type: CompartmentType) -> Option<BTreeSet<String>> {
        self.lookups.read().resource_types.get(&compartment_type).cloned()
    }

    /// Returns true if `code` links the type to the compartment, ignoring
    /// case.
    pub fn is_compartment_param(
        &self,
        resource_type: &str,
        compartment_type: CompartmentType,
        code: &str,
    ) -> bool {
        self.lookups
            .read()
            .params
            .get(&(compartment_type, resource_type.to_string()))
            .is_some_and(|params| params.iter().any(|p| p.eq_ignore_ascii_case(code)))
    }
}

fn validate(records: &[Node]) -> SearchResult<Vec<ValidatedCompartment>> {
    let mut issues = Vec::new();
    let mut seen = HashSet::new();
    let mut compartments = Vec::new();

    for (index, record) in records.iter().enumerate() {
        if record.instance_type() != "CompartmentDefinition" {
            issues.push(OperationIssue::invalid(format!(
                "entry {} is not a CompartmentDefinition",
                index
            )));
            continue;
        }

        let Some(compartment_type) = record
            .child_string("code")
            .and_then(|code| code.parse::<CompartmentType>().ok())
        else {
            issues.push(OperationIssue::invalid(format!(
                "entry {} has an invalid compartment type",
                index
            )));
            continue;
        };

        if !seen.insert(compartment_type) {
            issues.push(OperationIssue::invalid(format!(
                "entry {} duplicates the {} compartment",
                index, compartment_type
            )));
            continue;
        }

        let url = record.child_string("url").unwrap_or_default();
        if url.trim().is_empty() || Url::parse(&url).is_err() {
            issues.push(OperationIssue::invalid(format!(
                "entry {} has an invalid url '{}'",
                index, url
            )));
            continue;
        }

        let resources = resource_entries(record.as_ref());
        let mut names = HashSet::new();
        if !resources.iter().all(|(name, _)| names.insert(name.as_str())) {
            issues.push(OperationIssue::invalid(format!(
                "entry {} lists a resource type more than once",
                index
            )));
            continue;
        }

        compartments.push(ValidatedCompartment {
            compartment_type,
            resources,
        });
    }

    if issues.is_empty() {
        Ok(compartments)
    } else {
        Err(SearchError::DefinitionInvalid {
            message: "compartment definitions are invalid".to_string(),
            issues,
        })
    }
}

fn resource_entries(record: &dyn ElementNode) -> Vec<(String, Vec<String>)> {
    record
        .children("resource")
        .iter()
        .map(|resource| {
            (
                resource.child_string("code").unwrap_or_default(),
                resource.child_strings("param"),
            )
        })
        .collect()
}
