//! Two-pass validation of SearchParameter bundles.
//!
//! Pass 1 reads every record and checks it in isolation (record type, URL,
//! uniqueness). Pass 2 resolves the records against each other: composite
//! components, base types and expressions. Each pass collects every issue it
//! finds; any issue fails the whole bundle with one
//! [`SearchError::DefinitionInvalid`] so the registry never applies half a
//! bundle.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::debug;
use url::Url;

use super::descriptor::SearchParameterDescriptor;
use super::{ComponentInfo, SearchParameterInfo, SupportStatus};
use crate::error::{OperationIssue, SearchError, SearchResult};
use crate::navigation::Node;
use crate::types::{DOMAIN_RESOURCE, FhirVersion, RESOURCE, ResourceModel, SearchParamType};

/// URL of the `_type` parameter injected on `Resource`.
pub const RESOURCE_TYPE_PARAMETER_URL: &str = "http://hl7.org/fhir/SearchParameter/Resource-type";

/// Core R5 definitions that are known to be unusable as published.
const KNOWN_BROKEN_R5: &[&str] = &[
    "http://hl7.org/fhir/SearchParameter/EvidenceVariable-topic",
    "http://hl7.org/fhir/SearchParameter/ImagingStudy-reason",
    "http://hl7.org/fhir/SearchParameter/Medication-form",
    "http://hl7.org/fhir/SearchParameter/MedicationKnowledge-packaging-cost",
    "http://hl7.org/fhir/SearchParameter/MedicationKnowledge-packaging-cost-concept",
    "http://hl7.org/fhir/SearchParameter/Subscription-payload",
    "http://hl7.org/fhir/SearchParameter/Subscription-type",
    "http://hl7.org/fhir/SearchParameter/Subscription-url",
    "http://hl7.org/fhir/SearchParameter/TestScript-scope-artifact-phase",
    "http://hl7.org/fhir/SearchParameter/TestScript-scope-artifact-conformance",
];

/// The result of a successful build: validated parameters and the types
/// each one is declared on.
#[derive(Debug, Clone, Default)]
pub struct StagedDefinitions {
    /// New parameters in bundle order (`_type` last when injected), with
    /// composite components linked to the parameters they refer to.
    pub parameters: Vec<Arc<SearchParameterInfo>>,
    /// (resource type, index into `parameters`) for every declaration.
    pub attachments: Vec<(String, usize)>,
}

/// Validates SearchParameter records against each other and against the
/// parameters already registered.
#[derive(Debug, Clone, Copy)]
pub struct SearchParameterDefinitionBuilder<'a> {
    model: &'a ResourceModel,
}

impl<'a> SearchParameterDefinitionBuilder<'a> {
    /// Creates a builder for a resource model.
    pub fn new(model: &'a ResourceModel) -> Self {
        Self { model }
    }

    /// Validates `records`.
    ///
    /// `existing` looks up an already registered parameter by URL; it is
    /// consulted for duplicate detection and for composite components
    /// defined outside the bundle.
    pub fn build<F>(&self, records: &[Node], existing: F) -> SearchResult<StagedDefinitions>
    where
        F: Fn(&str) -> Option<Arc<SearchParameterInfo>>,
    {
        let mut parameters = self.read_records(records, &existing)?;

        if existing(RESOURCE_TYPE_PARAMETER_URL).is_none()
            && !parameters.iter().any(|p| p.url == RESOURCE_TYPE_PARAMETER_URL)
        {
            parameters.push(resource_type_parameter());
        }

        let attachments = self.resolve(&parameters, &existing)?;
        Ok(StagedDefinitions {
            parameters: link_components(parameters, &existing),
            attachments,
        })
    }

    fn read_records<F>(&self, records: &[Node], existing: &F) -> SearchResult<Vec<SearchParameterInfo>>
    where
        F: Fn(&str) -> Option<Arc<SearchParameterInfo>>,
    {
        let mut issues = Vec::new();
        let mut seen = HashSet::new();
        let mut parameters = Vec::with_capacity(records.len());

        for (index, record) in records.iter().enumerate() {
            let descriptor = match SearchParameterDescriptor::from_element(record.as_ref()) {
                Ok(descriptor) => descriptor,
                Err(message) => {
                    issues.push(OperationIssue::invalid(format!(
                        "invalid resource at entry {}: {}",
                        index, message
                    )));
                    continue;
                }
            };

            if Url::parse(&descriptor.url).is_err() {
                issues.push(OperationIssue::invalid(format!(
                    "invalid definition uri '{}' at entry {}",
                    descriptor.url, index
                )));
                continue;
            }

            if existing(&descriptor.url).is_some() || !seen.insert(descriptor.url.clone()) {
                issues.push(OperationIssue::invalid(format!(
                    "duplicated entry '{}' at entry {}",
                    descriptor.url, index
                )));
                continue;
            }

            parameters.push(into_info(descriptor));
        }

        ensure_no_issues(issues)?;
        Ok(parameters)
    }

    fn resolve<F>(
        &self,
        parameters: &[SearchParameterInfo],
        existing: &F,
    ) -> SearchResult<Vec<(String, usize)>>
    where
        F: Fn(&str) -> Option<Arc<SearchParameterInfo>>,
    {
        let staged_types: HashMap<&str, SearchParamType> = parameters
            .iter()
            .map(|p| (p.url.as_str(), p.param_type))
            .collect();
        let lookup = |url: &str| {
            staged_types
                .get(url)
                .copied()
                .or_else(|| existing(url).map(|p| p.param_type))
        };

        let mut issues = Vec::new();
        let mut attachments = Vec::new();

        for (index, parameter) in parameters.iter().enumerate() {
            let broken = self.is_known_broken(&parameter.url);

            if parameter.is_composite() && !broken {
                issues.extend(component_issues(parameter, &lookup));
            }

            if parameter.base_resource_types.is_empty() {
                issues.push(OperationIssue::invalid(format!(
                    "search parameter '{}' has no base resource types",
                    parameter.url
                )));
                continue;
            }

            for base in &parameter.base_resource_types {
                if broken || self.is_excluded(base, parameter) {
                    continue;
                }
                if parameter.expression.trim().is_empty() {
                    issues.push(OperationIssue::invalid(format!(
                        "search parameter '{}' has no expression for '{}'",
                        parameter.url, base
                    )));
                    continue;
                }
                if !self.model.is_known(base) {
                    debug!(url = %parameter.url, base = %base, "Ignoring unknown base resource type");
                    continue;
                }
                attachments.push((base.clone(), index));
            }
        }

        ensure_no_issues(issues)?;
        Ok(attachments)
    }

    fn is_known_broken(&self, url: &str) -> bool {
        self.model.version() == FhirVersion::R5 && KNOWN_BROKEN_R5.contains(&url)
    }

    /// Parameters without a usable expression that are registered by URL
    /// but never attached to the type.
    fn is_excluded(&self, base: &str, parameter: &SearchParameterInfo) -> bool {
        let named = |names: &[&str]| {
            names.iter().any(|n| {
                parameter.name.as_deref() == Some(*n) || parameter.code == *n
            })
        };
        match base {
            DOMAIN_RESOURCE => named(&["_text"]),
            RESOURCE => named(&["_content", "_query", "_list"]),
            "DataElement" if self.model.version() == FhirVersion::Stu3 => {
                named(&["objectClass", "objectClassProperty"])
            }
            _ => false,
        }
    }
}

fn into_info(descriptor: SearchParameterDescriptor) -> SearchParameterInfo {
    SearchParameterInfo {
        url: descriptor.url,
        code: descriptor.code,
        name: descriptor.name,
        description: descriptor.description,
        param_type: descriptor.param_type,
        expression: descriptor.expression,
        base_resource_types: descriptor.base,
        target_resource_types: descriptor.target,
        components: descriptor
            .components
            .into_iter()
            .map(|c| ComponentInfo {
                definition_url: c.definition_url.unwrap_or_default(),
                expression: c.expression,
                resolved: None,
            })
            .collect(),
        status: SupportStatus::Enabled,
    }
}

fn resource_type_parameter() -> SearchParameterInfo {
    SearchParameterInfo {
        url: RESOURCE_TYPE_PARAMETER_URL.to_string(),
        code: "_type".to_string(),
        name: Some("_type".to_string()),
        description: Some("The type of the resource".to_string()),
        param_type: SearchParamType::Token,
        expression: "Resource.type().name".to_string(),
        base_resource_types: vec![RESOURCE.to_string()],
        target_resource_types: Vec::new(),
        components: Vec::new(),
        status: SupportStatus::Enabled,
    }
}

fn component_issues<L>(parameter: &SearchParameterInfo, lookup: &L) -> Vec<OperationIssue>
where
    L: Fn(&str) -> Option<SearchParamType>,
{
    let mut issues = Vec::new();
    if parameter.components.is_empty() {
        issues.push(OperationIssue::invalid(format!(
            "composite search parameter '{}' has no components",
            parameter.url
        )));
    }

    let mut seen = HashSet::new();
    for (position, component) in parameter.components.iter().enumerate() {
        if !seen.insert(component.definition_url.as_str()) {
            issues.push(OperationIssue::invalid(format!(
                "component {} of '{}' is a duplicate component definition '{}'",
                position, parameter.url, component.definition_url
            )));
            continue;
        }
        match lookup(&component.definition_url) {
            None => issues.push(OperationIssue::invalid(format!(
                "component {} of '{}' refers to unknown definition '{}'",
                position, parameter.url, component.definition_url
            ))),
            Some(SearchParamType::Composite) => issues.push(OperationIssue::invalid(format!(
                "component {} of '{}' refers to composite parameter '{}'",
                position, parameter.url, component.definition_url
            ))),
            Some(_) if component.expression.trim().is_empty() => {
                issues.push(OperationIssue::invalid(format!(
                    "component {} of '{}' has no expression",
                    position, parameter.url
                )))
            }
            Some(_) => {}
        }
    }
    issues
}

/// Shares the validated parameters and points every composite component at
/// the parameter it refers to, staged or already registered. Components are
/// never composite, so the plain parameters are shared first.
fn link_components<F>(parameters: Vec<SearchParameterInfo>, existing: &F) -> Vec<Arc<SearchParameterInfo>>
where
    F: Fn(&str) -> Option<Arc<SearchParameterInfo>>,
{
    let plain: HashMap<String, Arc<SearchParameterInfo>> = parameters
        .iter()
        .filter(|p| !p.is_composite())
        .map(|p| (p.url.clone(), Arc::new(p.clone())))
        .collect();

    parameters
        .into_iter()
        .map(|mut parameter| {
            if let Some(shared) = plain.get(&parameter.url) {
                return Arc::clone(shared);
            }
            for component in &mut parameter.components {
                component.resolved = plain
                    .get(&component.definition_url)
                    .cloned()
                    .or_else(|| existing(&component.definition_url));
            }
            Arc::new(parameter)
        })
        .collect()
}

fn ensure_no_issues(issues: Vec<OperationIssue>) -> SearchResult<()> {
    if issues.is_empty() {
        return Ok(());
    }
    Err(SearchError::DefinitionInvalid {
        message: "search parameter definitions are invalid".to_string(),
        issues,
    })
}
