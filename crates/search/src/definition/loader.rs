//! SearchParameter Loader.
//!
//! Reads SearchParameter records from a Bundle, a JSON array or a single
//! resource, and provides the compact set of core parameters compiled into
//! the crate. Records are returned unvalidated; the builder reports bad
//! entries together with their position in the input.

use std::path::Path;

use serde_json::{Value, json};

use crate::error::LoaderError;
use crate::navigation::{JsonElement, Node};
use crate::types::FhirVersion;

/// Loader for SearchParameter records.
#[derive(Debug, Clone, Copy, Default)]
pub struct SearchParameterLoader {
    fhir_version: FhirVersion,
}

impl SearchParameterLoader {
    /// Creates a new loader for the specified FHIR version.
    pub fn new(fhir_version: FhirVersion) -> Self {
        Self { fhir_version }
    }

    /// Returns the FHIR version.
    pub fn version(&self) -> FhirVersion {
        self.fhir_version
    }

    /// The built-in core parameters.
    pub fn load_embedded(&self) -> Vec<Node> {
        bundle_resources(&embedded_core_bundle(self.fhir_version)).unwrap_or_default()
    }

    /// Loads records from a Bundle, an array or a single resource.
    pub fn load_from_json(&self, json: &Value) -> Result<Vec<Node>, LoaderError> {
        bundle_resources(json)
    }

    /// Parses JSON text, naming `source_name` in errors.
    pub fn load_from_str(&self, source_name: &str, text: &str) -> Result<Vec<Node>, LoaderError> {
        let json: Value = serde_json::from_str(text).map_err(|e| LoaderError::InvalidJson {
            source_name: source_name.to_string(),
            message: e.to_string(),
        })?;
        self.load_from_json(&json)
    }

    /// Loads records from a file.
    pub fn load_from_file(&self, path: &Path) -> Result<Vec<Node>, LoaderError> {
        let content = std::fs::read_to_string(path).map_err(|e| LoaderError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        self.load_from_str(&path.display().to_string(), &content)
    }
}

/// Splits a Bundle, an array or a single resource into resource nodes.
///
/// Bundle entries without a `resource` are kept as empty records so that
/// entry positions stay aligned with the input.
pub(crate) fn bundle_resources(json: &Value) -> Result<Vec<Node>, LoaderError> {
    let items: Vec<Value> = match json {
        Value::Object(object) if object.get("resourceType").and_then(Value::as_str) == Some("Bundle") => {
            object
                .get("entry")
                .and_then(Value::as_array)
                .map(|entries| {
                    entries
                        .iter()
                        .map(|entry| entry.get("resource").cloned().unwrap_or(Value::Null))
                        .collect()
                })
                .unwrap_or_default()
        }
        Value::Object(_) => vec![json.clone()],
        Value::Array(items) => items.clone(),
        other => {
            return Err(LoaderError::UnexpectedResource {
                expected: "Bundle, array or resource".to_string(),
                found: other.to_string(),
            });
        }
    };

    Ok(items
        .into_iter()
        .map(|item| JsonElement::from_resource(item).into_node())
        .collect())
}

/// A compact Bundle of core search parameters.
///
/// Covers the `Resource` level parameters and the common clinical types.
/// STU3 bundles use the `definition.reference` shape for composite
/// components.
pub fn embedded_core_bundle(version: FhirVersion) -> Value {
    let component = |url: &str, expression: &str| {
        if version == FhirVersion::Stu3 {
            json!({ "definition": { "reference": url }, "expression": expression })
        } else {
            json!({ "definition": url, "expression": expression })
        }
    };

    let mut entries = vec![
        sp("Resource-id", "_id", "token", &["Resource"], "Resource.id"),
        sp("Resource-lastUpdated", "_lastUpdated", "date", &["Resource"], "Resource.meta.lastUpdated"),
        sp("Resource-tag", "_tag", "token", &["Resource"], "Resource.meta.tag"),
        sp("Resource-profile", "_profile", "uri", &["Resource"], "Resource.meta.profile"),
        sp("Resource-security", "_security", "token", &["Resource"], "Resource.meta.security"),
        sp("Resource-content", "_content", "string", &["Resource"], ""),
        sp("DomainResource-text", "_text", "string", &["DomainResource"], ""),
        sp("Patient-name", "name", "string", &["Patient"], "Patient.name"),
        sp("Patient-family", "family", "string", &["Patient"], "Patient.name.family"),
        sp("Patient-given", "given", "string", &["Patient"], "Patient.name.given"),
        sp("Patient-birthdate", "birthdate", "date", &["Patient"], "Patient.birthDate"),
        sp("Patient-gender", "gender", "token", &["Patient"], "Patient.gender"),
        sp("Patient-identifier", "identifier", "token", &["Patient"], "Patient.identifier"),
        sp("Patient-telecom", "telecom", "token", &["Patient"], "Patient.telecom"),
        sp("Patient-address", "address", "string", &["Patient"], "Patient.address"),
        reference(
            "Patient-general-practitioner",
            "general-practitioner",
            &["Patient"],
            "Patient.generalPractitioner",
            &["Organization", "Practitioner", "PractitionerRole"],
        ),
        reference(
            "Patient-organization",
            "organization",
            &["Patient"],
            "Patient.managingOrganization",
            &["Organization"],
        ),
        sp("Observation-code", "code", "token", &["Observation"], "Observation.code"),
        sp("Observation-status", "status", "token", &["Observation"], "Observation.status"),
        sp("Observation-date", "date", "date", &["Observation"], "Observation.effective"),
        sp(
            "Observation-value-quantity",
            "value-quantity",
            "quantity",
            &["Observation"],
            "(Observation.value as Quantity)",
        ),
        reference(
            "Observation-subject",
            "subject",
            &["Observation"],
            "Observation.subject",
            &["Patient", "Group", "Device", "Location"],
        ),
        reference(
            "Observation-patient",
            "patient",
            &["Observation"],
            "Observation.subject.where(resolve() is Patient)",
            &["Patient"],
        ),
        reference(
            "Observation-encounter",
            "encounter",
            &["Observation"],
            "Observation.encounter",
            &["Encounter"],
        ),
        reference(
            "Observation-performer",
            "performer",
            &["Observation"],
            "Observation.performer",
            &["Practitioner", "Organization", "Patient", "RelatedPerson"],
        ),
        sp("Encounter-status", "status", "token", &["Encounter"], "Encounter.status"),
        sp("Encounter-date", "date", "date", &["Encounter"], "Encounter.period"),
        reference(
            "Encounter-subject",
            "subject",
            &["Encounter"],
            "Encounter.subject",
            &["Patient", "Group"],
        ),
        reference(
            "Encounter-patient",
            "patient",
            &["Encounter"],
            "Encounter.subject.where(resolve() is Patient)",
            &["Patient"],
        ),
        sp("Practitioner-name", "name", "string", &["Practitioner"], "Practitioner.name"),
        sp("Practitioner-identifier", "identifier", "token", &["Practitioner"], "Practitioner.identifier"),
        sp("Organization-name", "name", "string", &["Organization"], "Organization.name"),
        sp("Location-name", "name", "string", &["Location"], "Location.name"),
        sp("Group-code", "code", "token", &["Group"], "Group.code"),
    ];

    let mut code_value_quantity = sp(
        "Observation-code-value-quantity",
        "code-value-quantity",
        "composite",
        &["Observation"],
        "Observation",
    );
    code_value_quantity["component"] = json!([
        component("http://hl7.org/fhir/SearchParameter/Observation-code", "code"),
        component(
            "http://hl7.org/fhir/SearchParameter/Observation-value-quantity",
            "value.as(Quantity)"
        ),
    ]);
    entries.push(code_value_quantity);

    json!({
        "resourceType": "Bundle",
        "type": "collection",
        "entry": entries
            .into_iter()
            .map(|resource| json!({
                "fullUrl": resource["url"].clone(),
                "resource": resource
            }))
            .collect::<Vec<_>>()
    })
}

fn sp(id: &str, code: &str, kind: &str, base: &[&str], expression: &str) -> Value {
    let mut resource = json!({
        "resourceType": "SearchParameter",
        "id": id,
        "url": format!("http://hl7.org/fhir/SearchParameter/{}", id),
        "name": code,
        "status": "active",
        "code": code,
        "base": base,
        "type": kind,
    });
    if !expression.is_empty() {
        resource["expression"] = json!(expression);
    }
    resource
}

fn reference(id: &str, code: &str, base: &[&str], expression: &str, targets: &[&str]) -> Value {
    let mut resource = sp(id, code, "reference", base, expression);
    resource["target"] = json!(targets);
    resource
}
