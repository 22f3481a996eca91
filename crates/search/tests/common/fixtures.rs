//! Resource fixtures.

use serde_json::{Value, json};

/// Builder for Patient resources.
#[derive(Debug, Clone)]
pub struct PatientFixture {
    id: String,
    family: String,
    given: Vec<String>,
    birth_date: Option<String>,
    gender: Option<String>,
    organization_ref: Option<String>,
}

impl PatientFixture {
    pub fn new(id: impl Into<String>, family: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            family: family.into(),
            given: vec![],
            birth_date: None,
            gender: None,
            organization_ref: None,
        }
    }

    pub fn with_given(mut self, given: &[&str]) -> Self {
        self.given = given.iter().map(|g| g.to_string()).collect();
        self
    }

    pub fn with_birth_date(mut self, date: impl Into<String>) -> Self {
        self.birth_date = Some(date.into());
        self
    }

    pub fn with_gender(mut self, gender: impl Into<String>) -> Self {
        self.gender = Some(gender.into());
        self
    }

    pub fn with_organization(mut self, reference: impl Into<String>) -> Self {
        self.organization_ref = Some(reference.into());
        self
    }

    pub fn to_json(&self) -> Value {
        let mut patient = json!({
            "resourceType": "Patient",
            "id": self.id,
            "name": [{ "family": self.family, "given": self.given }]
        });
        if let Some(date) = &self.birth_date {
            patient["birthDate"] = json!(date);
        }
        if let Some(gender) = &self.gender {
            patient["gender"] = json!(gender);
        }
        if let Some(reference) = &self.organization_ref {
            patient["managingOrganization"] = json!({ "reference": reference });
        }
        patient
    }
}

/// A blood pressure style Observation with one value per component.
pub fn observation_with_components(components: &[(&str, Option<f64>)]) -> Value {
    json!({
        "resourceType": "Observation",
        "id": "bp",
        "status": "final",
        "code": { "coding": [{ "system": "http://loinc.org", "code": "85354-9" }] },
        "subject": { "reference": "Patient/example" },
        "component": components
            .iter()
            .map(|(code, value)| {
                let mut component = json!({
                    "code": { "coding": [{ "system": "http://loinc.org", "code": code }] }
                });
                if let Some(value) = value {
                    component["valueQuantity"] = json!({
                        "value": value,
                        "system": "http://unitsofmeasure.org",
                        "code": "mm[Hg]"
                    });
                }
                component
            })
            .collect::<Vec<_>>()
    })
}

/// A SearchParameter resource under `http://example.org`.
pub fn search_parameter(id: &str, code: &str, kind: &str, base: &[&str], expression: &str) -> Value {
    json!({
        "resourceType": "SearchParameter",
        "id": id,
        "url": format!("http://example.org/SearchParameter/{}", id),
        "name": code,
        "status": "active",
        "code": code,
        "base": base,
        "type": kind,
        "expression": expression
    })
}
