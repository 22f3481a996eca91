//! Compartment definitions.
//!
//! A compartment groups the resources linked to one central resource (a
//! Patient, an Encounter, ...). Each CompartmentDefinition lists, per
//! resource type, the search parameters that link a resource to the
//! compartment owner.

mod registry;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

pub use registry::CompartmentRegistry;

/// The fixed set of compartments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CompartmentType {
    /// `Patient`
    Patient,
    /// `Practitioner`
    Practitioner,
    /// `Encounter`
    Encounter,
    /// `Device`
    Device,
    /// `RelatedPerson`
    RelatedPerson,
}

impl CompartmentType {
    /// All compartment types.
    pub const ALL: [CompartmentType; 5] = [
        CompartmentType::Patient,
        CompartmentType::Practitioner,
        CompartmentType::Encounter,
        CompartmentType::Device,
        CompartmentType::RelatedPerson,
    ];

    /// The code, which is also the name of the owning resource type.
    pub fn as_str(&self) -> &'static str {
        match self {
            CompartmentType::Patient => "Patient",
            CompartmentType::Practitioner => "Practitioner",
            CompartmentType::Encounter => "Encounter",
            CompartmentType::Device => "Device",
            CompartmentType::RelatedPerson => "RelatedPerson",
        }
    }
}

impl fmt::Display for CompartmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompartmentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CompartmentType::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| format!("unknown compartment type: {}", s))
    }
}

/// The compartment owned by a resource type, if it owns one.
pub fn compartment_type_for_resource_type(resource_type: &str) -> Option<CompartmentType> {
    resource_type.parse().ok()
}

/// A small Bundle of Patient, Encounter and Practitioner compartment
/// definitions covering the resource types of the built-in parameters.
pub fn embedded_compartment_bundle() -> Value {
    let definition = |code: &str, resources: Value| {
        json!({
            "resource": {
                "resourceType": "CompartmentDefinition",
                "id": code.to_lowercase(),
                "url": format!("http://hl7.org/fhir/CompartmentDefinition/{}", code.to_lowercase()),
                "name": format!("Base FHIR compartment definition for {}", code),
                "status": "active",
                "code": code,
                "search": true,
                "resource": resources
            }
        })
    };

    json!({
        "resourceType": "Bundle",
        "type": "collection",
        "entry": [
            definition("Patient", json!([
                { "code": "Patient", "param": ["link"] },
                { "code": "Observation", "param": ["subject", "performer"] },
                { "code": "Encounter", "param": ["patient"] },
                { "code": "Practitioner" }
            ])),
            definition("Encounter", json!([
                { "code": "Encounter", "param": ["{def}"] },
                { "code": "Observation", "param": ["encounter"] },
                { "code": "Patient" }
            ])),
            definition("Practitioner", json!([
                { "code": "Practitioner", "param": ["{def}"] },
                { "code": "Observation", "param": ["performer"] },
                { "code": "Patient", "param": ["general-practitioner"] },
                { "code": "Encounter", "param": ["practitioner", "participant"] }
            ]))
        ]
    })
}
