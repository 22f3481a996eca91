//! Code systems for bare `code` elements.
//!
//! A `code` element carries no system of its own; the system is fixed by
//! the element definition. The resolver maps element paths such as
//! `Patient.gender` to that system so token values can be fully qualified.

use std::collections::HashMap;

use crate::error::LoaderError;

/// Built-in element path to code system mappings.
const DEFAULT_MAPPINGS: &[(&str, &str)] = &[
    ("Resource.language", "urn:ietf:bcp:47"),
    ("Patient.gender", "http://hl7.org/fhir/administrative-gender"),
    ("Person.gender", "http://hl7.org/fhir/administrative-gender"),
    ("Practitioner.gender", "http://hl7.org/fhir/administrative-gender"),
    ("RelatedPerson.gender", "http://hl7.org/fhir/administrative-gender"),
    ("Patient.link.type", "http://hl7.org/fhir/link-type"),
    ("Observation.status", "http://hl7.org/fhir/observation-status"),
    ("Encounter.status", "http://hl7.org/fhir/encounter-status"),
    ("Condition.verificationStatus", "http://hl7.org/fhir/condition-ver-status"),
    ("AllergyIntolerance.criticality", "http://hl7.org/fhir/allergy-intolerance-criticality"),
    ("AllergyIntolerance.type", "http://hl7.org/fhir/allergy-intolerance-type"),
    ("DiagnosticReport.status", "http://hl7.org/fhir/diagnostic-report-status"),
    ("MedicationRequest.status", "http://hl7.org/fhir/CodeSystem/medicationrequest-status"),
    ("MedicationRequest.intent", "http://hl7.org/fhir/CodeSystem/medicationrequest-intent"),
    ("Procedure.status", "http://hl7.org/fhir/event-status"),
    ("ServiceRequest.status", "http://hl7.org/fhir/request-status"),
    ("ServiceRequest.intent", "http://hl7.org/fhir/request-intent"),
    ("Task.status", "http://hl7.org/fhir/task-status"),
    ("SearchParameter.type", "http://hl7.org/fhir/search-param-type"),
    ("SearchParameter.status", "http://hl7.org/fhir/publication-status"),
    ("Bundle.type", "http://hl7.org/fhir/bundle-type"),
    ("Account.status", "http://hl7.org/fhir/account-status"),
    ("Appointment.status", "http://hl7.org/fhir/appointmentstatus"),
];

/// Resolves the code system of a `code` element from its path.
#[derive(Debug, Clone, Default)]
pub struct CodeSystemResolver {
    mappings: HashMap<String, String>,
}

impl CodeSystemResolver {
    /// A resolver with the built-in mappings.
    pub fn new() -> Self {
        Self::empty().with_mappings(
            DEFAULT_MAPPINGS
                .iter()
                .map(|(path, system)| (path.to_string(), system.to_string())),
        )
    }

    /// A resolver without any mappings.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Reads a JSON object of `path -> system` pairs.
    pub fn from_json_str(source_name: &str, text: &str) -> Result<Self, LoaderError> {
        let mappings: HashMap<String, String> =
            serde_json::from_str(text).map_err(|e| LoaderError::InvalidJson {
                source_name: source_name.to_string(),
                message: e.to_string(),
            })?;
        Ok(Self { mappings })
    }

    /// Adds or replaces mappings.
    pub fn with_mappings<I>(mut self, mappings: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        self.mappings.extend(mappings);
        self
    }

    /// Returns the code system for an element path, ignoring array indexers.
    pub fn resolve_system(&self, path: &str) -> Option<&str> {
        self.mappings
            .get(&normalize_path(path))
            .map(String::as_str)
    }

    /// Number of known paths.
    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    /// Returns true if no paths are mapped.
    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }
}

/// Strips `[n]` indexers from a path: `Patient.link[0].type` → `Patient.link.type`.
pub fn normalize_path(path: &str) -> String {
    let mut normalized = String::with_capacity(path.len());
    let mut rest = path;
    while let Some(open) = rest.find('[') {
        let Some(close) = rest[open..].find(']') else {
            break;
        };
        let inner = &rest[open + 1..open + close];
        normalized.push_str(&rest[..open]);
        if inner.is_empty() || !inner.chars().all(|c| c.is_alphanumeric() || c == '_') {
            normalized.push_str(&rest[open..=open + close]);
        }
        rest = &rest[open + close + 1..];
    }
    normalized.push_str(rest);
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("Patient.link[0].type"), "Patient.link.type");
        assert_eq!(normalize_path("Patient.gender"), "Patient.gender");
        assert_eq!(normalize_path("A.b[12].c[x1]"), "A.b.c");
        assert_eq!(normalize_path("A.b[].c"), "A.b[].c");
        assert_eq!(normalize_path("A.b[0"), "A.b[0");
    }

    #[test]
    fn test_resolve_builtin() {
        let resolver = CodeSystemResolver::new();
        assert_eq!(
            resolver.resolve_system("Patient.gender"),
            Some("http://hl7.org/fhir/administrative-gender")
        );
        assert_eq!(
            resolver.resolve_system("Patient.link[1].type"),
            Some("http://hl7.org/fhir/link-type")
        );
        assert_eq!(resolver.resolve_system("Patient.unknown"), None);
    }

    #[test]
    fn test_from_json_and_override() {
        let resolver = CodeSystemResolver::from_json_str(
            "mappings.json",
            r#"{ "Patient.gender": "http://example.org/gender" }"#,
        )
        .unwrap();
        assert_eq!(resolver.len(), 1);
        assert_eq!(
            resolver.resolve_system("Patient.gender"),
            Some("http://example.org/gender")
        );

        let err = CodeSystemResolver::from_json_str("broken.json", "[").unwrap_err();
        assert!(err.to_string().contains("broken.json"));
    }
}
