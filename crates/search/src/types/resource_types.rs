//! Resource type names and the abstract type hierarchy.
//!
//! Search parameters declared on the abstract `Resource` type apply to every
//! type below it. Instead of recursing over type names, the hierarchy is a
//! closed [`TypeNode`] with a fixed parent relation: every concrete type
//! inherits from `Resource`, which inherits from the generic root `Base`.
//! `DomainResource` is a node of its own under `Resource`; parameters
//! declared on it stay on its key and are not inherited by concrete types.

use std::collections::BTreeSet;

use super::search_params::FhirVersion;

/// The generic root of the type hierarchy.
pub const BASE: &str = "Base";
/// The resource layer every resource type inherits from.
pub const RESOURCE: &str = "Resource";
/// Abstract resource carrying narrative.
pub const DOMAIN_RESOURCE: &str = "DomainResource";

/// A position in the inheritance hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeNode<'a> {
    /// `Base`.
    Root,
    /// `Resource`.
    Resource,
    /// `DomainResource`.
    DomainResource,
    /// Any other resource type name.
    Concrete(&'a str),
}

impl<'a> TypeNode<'a> {
    /// Classifies a type name.
    pub fn of(name: &'a str) -> Self {
        match name {
            BASE => TypeNode::Root,
            RESOURCE => TypeNode::Resource,
            DOMAIN_RESOURCE => TypeNode::DomainResource,
            other => TypeNode::Concrete(other),
        }
    }

    /// The type this one inherits search parameters from.
    pub fn parent(self) -> Option<TypeNode<'static>> {
        match self {
            TypeNode::Concrete(_) | TypeNode::DomainResource => Some(TypeNode::Resource),
            TypeNode::Resource => Some(TypeNode::Root),
            TypeNode::Root => None,
        }
    }

    /// The type name.
    pub fn name(self) -> &'a str {
        match self {
            TypeNode::Root => BASE,
            TypeNode::Resource => RESOURCE,
            TypeNode::DomainResource => DOMAIN_RESOURCE,
            TypeNode::Concrete(name) => name,
        }
    }
}

/// Resource types of FHIR R4 (4.0.1), including the abstract ones.
pub const R4_RESOURCE_TYPES: &[&str] = &[
    "Account",
    "ActivityDefinition",
    "AdverseEvent",
    "AllergyIntolerance",
    "Appointment",
    "AppointmentResponse",
    "AuditEvent",
    "Basic",
    "Binary",
    "BiologicallyDerivedProduct",
    "BodyStructure",
    "Bundle",
    "CapabilityStatement",
    "CarePlan",
    "CareTeam",
    "CatalogEntry",
    "ChargeItem",
    "ChargeItemDefinition",
    "Claim",
    "ClaimResponse",
    "ClinicalImpression",
    "CodeSystem",
    "Communication",
    "CommunicationRequest",
    "CompartmentDefinition",
    "Composition",
    "ConceptMap",
    "Condition",
    "Consent",
    "Contract",
    "Coverage",
    "CoverageEligibilityRequest",
    "CoverageEligibilityResponse",
    "DetectedIssue",
    "Device",
    "DeviceDefinition",
    "DeviceMetric",
    "DeviceRequest",
    "DeviceUseStatement",
    "DiagnosticReport",
    "DocumentManifest",
    "DocumentReference",
    "DomainResource",
    "EffectEvidenceSynthesis",
    "Encounter",
    "Endpoint",
    "EnrollmentRequest",
    "EnrollmentResponse",
    "EpisodeOfCare",
    "EventDefinition",
    "Evidence",
    "EvidenceVariable",
    "ExampleScenario",
    "ExplanationOfBenefit",
    "FamilyMemberHistory",
    "Flag",
    "Goal",
    "GraphDefinition",
    "Group",
    "GuidanceResponse",
    "HealthcareService",
    "ImagingStudy",
    "Immunization",
    "ImmunizationEvaluation",
    "ImmunizationRecommendation",
    "ImplementationGuide",
    "InsurancePlan",
    "Invoice",
    "Library",
    "Linkage",
    "List",
    "Location",
    "Measure",
    "MeasureReport",
    "Media",
    "Medication",
    "MedicationAdministration",
    "MedicationDispense",
    "MedicationKnowledge",
    "MedicationRequest",
    "MedicationStatement",
    "MedicinalProduct",
    "MedicinalProductAuthorization",
    "MedicinalProductContraindication",
    "MedicinalProductIndication",
    "MedicinalProductIngredient",
    "MedicinalProductInteraction",
    "MedicinalProductManufactured",
    "MedicinalProductPackaged",
    "MedicinalProductPharmaceutical",
    "MedicinalProductUndesirableEffect",
    "MessageDefinition",
    "MessageHeader",
    "MolecularSequence",
    "NamingSystem",
    "NutritionOrder",
    "Observation",
    "ObservationDefinition",
    "OperationDefinition",
    "OperationOutcome",
    "Organization",
    "OrganizationAffiliation",
    "Parameters",
    "Patient",
    "PaymentNotice",
    "PaymentReconciliation",
    "Person",
    "PlanDefinition",
    "Practitioner",
    "PractitionerRole",
    "Procedure",
    "Provenance",
    "Questionnaire",
    "QuestionnaireResponse",
    "RelatedPerson",
    "RequestGroup",
    "ResearchDefinition",
    "ResearchElementDefinition",
    "ResearchStudy",
    "ResearchSubject",
    "Resource",
    "RiskAssessment",
    "RiskEvidenceSynthesis",
    "Schedule",
    "SearchParameter",
    "ServiceRequest",
    "Slot",
    "Specimen",
    "SpecimenDefinition",
    "StructureDefinition",
    "StructureMap",
    "Subscription",
    "Substance",
    "SubstanceNucleicAcid",
    "SubstancePolymer",
    "SubstanceProtein",
    "SubstanceReferenceInformation",
    "SubstanceSourceMaterial",
    "SubstanceSpecification",
    "SupplyDelivery",
    "SupplyRequest",
    "Task",
    "TerminologyCapabilities",
    "TestReport",
    "TestScript",
    "ValueSet",
    "VerificationResult",
    "VisionPrescription",
];

/// The closed set of resource type names known to one FHIR release.
#[derive(Debug, Clone)]
pub struct ResourceModel {
    version: FhirVersion,
    resource_types: BTreeSet<String>,
}

impl ResourceModel {
    /// Creates a model for the given release with the bundled R4 type list.
    pub fn new(version: FhirVersion) -> Self {
        Self::with_resource_types(version, R4_RESOURCE_TYPES.iter().copied())
    }

    /// Creates a model with an explicit list of type names.
    ///
    /// `Resource` and `DomainResource` are always added.
    pub fn with_resource_types<I, S>(version: FhirVersion, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut resource_types: BTreeSet<String> = names.into_iter().map(Into::into).collect();
        resource_types.insert(RESOURCE.to_string());
        resource_types.insert(DOMAIN_RESOURCE.to_string());
        Self {
            version,
            resource_types,
        }
    }

    /// The FHIR release.
    pub fn version(&self) -> FhirVersion {
        self.version
    }

    /// All known type names in sorted order, abstract ones included.
    pub fn resource_type_names(&self) -> impl Iterator<Item = &str> {
        self.resource_types.iter().map(String::as_str)
    }

    /// Concrete (instantiable) type names.
    pub fn concrete_type_names(&self) -> impl Iterator<Item = &str> {
        self.resource_type_names().filter(|name| !is_abstract(name))
    }

    /// Returns true if the name is a known resource type.
    pub fn is_known(&self, name: &str) -> bool {
        self.resource_types.contains(name)
    }

    /// Returns true if the name is an abstract resource type.
    pub fn is_abstract(&self, name: &str) -> bool {
        is_abstract(name)
    }

    /// Number of known type names.
    pub fn len(&self) -> usize {
        self.resource_types.len()
    }

    /// Returns true if no type names are known.
    pub fn is_empty(&self) -> bool {
        self.resource_types.is_empty()
    }
}

impl Default for ResourceModel {
    fn default() -> Self {
        Self::new(FhirVersion::default())
    }
}

/// Returns true for the abstract types that can never be instantiated.
pub fn is_abstract(name: &str) -> bool {
    matches!(name, BASE | RESOURCE | DOMAIN_RESOURCE)
}
