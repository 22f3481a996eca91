//! FHIR search parameter vocabulary.
//!
//! Parameter types, modifiers, comparison prefixes and the FHIR release the
//! catalog is built for.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// FHIR search parameter types.
///
/// See: https://build.fhir.org/search.html#ptypes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchParamType {
    /// A simple string, like a name or description.
    String,
    /// A search against a URI.
    Uri,
    /// A search for a number.
    Number,
    /// A search for a date, dateTime, or period.
    Date,
    /// A quantity, with a number and units.
    Quantity,
    /// A code from a code system or value set.
    Token,
    /// A reference to another resource.
    Reference,
    /// A composite search parameter that combines others.
    Composite,
    /// Special search parameters (_text, _content, near, ...).
    Special,
}

impl fmt::Display for SearchParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchParamType::String => write!(f, "string"),
            SearchParamType::Uri => write!(f, "uri"),
            SearchParamType::Number => write!(f, "number"),
            SearchParamType::Date => write!(f, "date"),
            SearchParamType::Quantity => write!(f, "quantity"),
            SearchParamType::Token => write!(f, "token"),
            SearchParamType::Reference => write!(f, "reference"),
            SearchParamType::Composite => write!(f, "composite"),
            SearchParamType::Special => write!(f, "special"),
        }
    }
}

impl FromStr for SearchParamType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "string" => Ok(SearchParamType::String),
            "uri" => Ok(SearchParamType::Uri),
            "number" => Ok(SearchParamType::Number),
            "date" => Ok(SearchParamType::Date),
            "quantity" => Ok(SearchParamType::Quantity),
            "token" => Ok(SearchParamType::Token),
            "reference" => Ok(SearchParamType::Reference),
            "composite" => Ok(SearchParamType::Composite),
            "special" => Ok(SearchParamType::Special),
            _ => Err(format!("unknown search parameter type: {}", s)),
        }
    }
}

/// Search modifiers that can be applied to search parameters.
///
/// `Type` carries the resource type a reference parameter is restricted to
/// (e.g. `subject:Patient`); it is never produced from a modifier code.
///
/// See: https://build.fhir.org/search.html#modifiers
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchModifier {
    /// Match if value is missing.
    Missing,
    /// Exact string match (string parameters).
    Exact,
    /// Contains substring (string and uri parameters).
    Contains,
    /// Text search (token parameters).
    Text,
    /// Restrict a reference to a resource type.
    Type(String),
    /// Match on identifier (reference parameters).
    Identifier,
    /// Match codes below in hierarchy.
    Below,
    /// Match codes above in hierarchy.
    Above,
    /// Negation - exclude matches.
    Not,
    /// Match codes in a value set.
    In,
    /// Match codes not in a value set.
    NotIn,
    /// Match identifier type and value together.
    OfType,
    /// Text search over code display (R5).
    CodeText,
    /// Advanced text search (R5).
    TextAdvanced,
    /// Iterate through results (_include modifier).
    Iterate,
}

impl fmt::Display for SearchModifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchModifier::Type(t) => write!(f, "{}", t),
            other => write!(f, "{}", other.literal()),
        }
    }
}

impl SearchModifier {
    /// Every modifier code the query grammar accepts.
    pub const CODES: [&'static str; 14] = [
        "missing",
        "exact",
        "contains",
        "text",
        "identifier",
        "below",
        "above",
        "not",
        "in",
        "not-in",
        "ofType",
        "code-text",
        "text-advanced",
        "iterate",
    ];

    /// Parses a modifier code. Matching is exact (case-sensitive), as the
    /// codes are FHIR literals; resource type names are not accepted here.
    pub fn from_literal(s: &str) -> Option<Self> {
        match s {
            "missing" => Some(SearchModifier::Missing),
            "exact" => Some(SearchModifier::Exact),
            "contains" => Some(SearchModifier::Contains),
            "text" => Some(SearchModifier::Text),
            "identifier" => Some(SearchModifier::Identifier),
            "below" => Some(SearchModifier::Below),
            "above" => Some(SearchModifier::Above),
            "not" => Some(SearchModifier::Not),
            "in" => Some(SearchModifier::In),
            "not-in" => Some(SearchModifier::NotIn),
            "ofType" => Some(SearchModifier::OfType),
            "code-text" => Some(SearchModifier::CodeText),
            "text-advanced" => Some(SearchModifier::TextAdvanced),
            "iterate" => Some(SearchModifier::Iterate),
            _ => None,
        }
    }

    /// The FHIR literal for this modifier.
    pub fn literal(&self) -> &str {
        match self {
            SearchModifier::Missing => "missing",
            SearchModifier::Exact => "exact",
            SearchModifier::Contains => "contains",
            SearchModifier::Text => "text",
            SearchModifier::Type(t) => t,
            SearchModifier::Identifier => "identifier",
            SearchModifier::Below => "below",
            SearchModifier::Above => "above",
            SearchModifier::Not => "not",
            SearchModifier::In => "in",
            SearchModifier::NotIn => "not-in",
            SearchModifier::OfType => "ofType",
            SearchModifier::CodeText => "code-text",
            SearchModifier::TextAdvanced => "text-advanced",
            SearchModifier::Iterate => "iterate",
        }
    }

    /// Returns true if this modifier is valid for the given parameter type.
    pub fn is_valid_for(&self, param_type: SearchParamType) -> bool {
        match self {
            SearchModifier::Missing | SearchModifier::Not => true,
            SearchModifier::Exact => param_type == SearchParamType::String,
            SearchModifier::Contains => {
                matches!(param_type, SearchParamType::String | SearchParamType::Uri)
            }
            SearchModifier::Text | SearchModifier::CodeText | SearchModifier::OfType => {
                param_type == SearchParamType::Token
            }
            SearchModifier::TextAdvanced => matches!(
                param_type,
                SearchParamType::Token | SearchParamType::Reference
            ),
            SearchModifier::Above | SearchModifier::Below => matches!(
                param_type,
                SearchParamType::Token | SearchParamType::Uri | SearchParamType::Reference
            ),
            SearchModifier::In | SearchModifier::NotIn => param_type == SearchParamType::Token,
            SearchModifier::Identifier | SearchModifier::Type(_) => {
                param_type == SearchParamType::Reference
            }
            SearchModifier::Iterate => false, // Only for _include/_revinclude
        }
    }
}

/// Comparison prefixes for search parameters.
///
/// See: https://build.fhir.org/search.html#prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SearchPrefix {
    /// Equal (default).
    #[default]
    Eq,
    /// Not equal.
    Ne,
    /// Greater than.
    Gt,
    /// Less than.
    Lt,
    /// Greater than or equal.
    Ge,
    /// Less than or equal.
    Le,
    /// Starts after.
    Sa,
    /// Ends before.
    Eb,
    /// Approximately equal.
    Ap,
}

impl fmt::Display for SearchPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchPrefix::Eq => write!(f, "eq"),
            SearchPrefix::Ne => write!(f, "ne"),
            SearchPrefix::Gt => write!(f, "gt"),
            SearchPrefix::Lt => write!(f, "lt"),
            SearchPrefix::Ge => write!(f, "ge"),
            SearchPrefix::Le => write!(f, "le"),
            SearchPrefix::Sa => write!(f, "sa"),
            SearchPrefix::Eb => write!(f, "eb"),
            SearchPrefix::Ap => write!(f, "ap"),
        }
    }
}

impl FromStr for SearchPrefix {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "eq" => Ok(SearchPrefix::Eq),
            "ne" => Ok(SearchPrefix::Ne),
            "gt" => Ok(SearchPrefix::Gt),
            "lt" => Ok(SearchPrefix::Lt),
            "ge" => Ok(SearchPrefix::Ge),
            "le" => Ok(SearchPrefix::Le),
            "sa" => Ok(SearchPrefix::Sa),
            "eb" => Ok(SearchPrefix::Eb),
            "ap" => Ok(SearchPrefix::Ap),
            _ => Err(format!("unknown search prefix: {}", s)),
        }
    }
}

impl SearchPrefix {
    /// Extracts a prefix from the beginning of a value string.
    ///
    /// Returns the prefix and the remaining value.
    pub fn extract(value: &str) -> (Self, &str) {
        if let Some(prefix) = value.get(..2) {
            if let Ok(p) = prefix.parse() {
                return (p, &value[2..]);
            }
        }
        (SearchPrefix::Eq, value)
    }

    /// Returns true if this prefix is valid for the given parameter type.
    pub fn is_valid_for(&self, param_type: SearchParamType) -> bool {
        match self {
            SearchPrefix::Eq | SearchPrefix::Ne => true,
            SearchPrefix::Gt
            | SearchPrefix::Lt
            | SearchPrefix::Ge
            | SearchPrefix::Le
            | SearchPrefix::Ap => matches!(
                param_type,
                SearchParamType::Number | SearchParamType::Date | SearchParamType::Quantity
            ),
            SearchPrefix::Sa | SearchPrefix::Eb => param_type == SearchParamType::Date,
        }
    }
}

/// FHIR release the catalog is built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum FhirVersion {
    /// FHIR STU3 (3.0.2)
    #[serde(rename = "STU3")]
    Stu3,
    /// FHIR R4 (4.0.1)
    #[default]
    R4,
    /// FHIR R4B (4.3.0)
    R4B,
    /// FHIR R5 (5.0.0)
    R5,
}

impl FhirVersion {
    /// Returns the version string.
    pub fn as_str(&self) -> &'static str {
        match self {
            FhirVersion::Stu3 => "STU3",
            FhirVersion::R4 => "R4",
            FhirVersion::R4B => "R4B",
            FhirVersion::R5 => "R5",
        }
    }

    /// True for R4 and every later release.
    pub fn is_r4_or_later(&self) -> bool {
        !matches!(self, FhirVersion::Stu3)
    }
}

impl fmt::Display for FhirVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FhirVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "STU3" | "R3" => Ok(FhirVersion::Stu3),
            "R4" => Ok(FhirVersion::R4),
            "R4B" => Ok(FhirVersion::R4B),
            "R5" => Ok(FhirVersion::R5),
            _ => Err(format!("unknown FHIR version: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_param_type_round_trip_literals() {
        assert_eq!("token".parse::<SearchParamType>(), Ok(SearchParamType::Token));
        assert_eq!("Reference".parse::<SearchParamType>(), Ok(SearchParamType::Reference));
        assert!("bogus".parse::<SearchParamType>().is_err());
        assert_eq!(SearchParamType::Composite.to_string(), "composite");
    }

    #[test]
    fn test_modifier_codes_are_case_sensitive() {
        assert_eq!(SearchModifier::from_literal("exact"), Some(SearchModifier::Exact));
        assert_eq!(SearchModifier::from_literal("ofType"), Some(SearchModifier::OfType));
        assert_eq!(SearchModifier::from_literal("EXACT"), None);
        assert_eq!(SearchModifier::from_literal("Patient"), None);

        for code in SearchModifier::CODES {
            let modifier = SearchModifier::from_literal(code).unwrap();
            assert_eq!(modifier.literal(), code);
        }
    }

    #[test]
    fn test_modifier_validity() {
        assert!(SearchModifier::Exact.is_valid_for(SearchParamType::String));
        assert!(!SearchModifier::Exact.is_valid_for(SearchParamType::Token));
        assert!(SearchModifier::Type("Patient".into()).is_valid_for(SearchParamType::Reference));
        assert!(SearchModifier::Missing.is_valid_for(SearchParamType::Date));
        assert_eq!(SearchModifier::Type("Patient".into()).to_string(), "Patient");
    }

    #[test]
    fn test_prefix_extract() {
        assert_eq!(SearchPrefix::extract("ge2020-01-01"), (SearchPrefix::Ge, "2020-01-01"));
        assert_eq!(SearchPrefix::extract("2020"), (SearchPrefix::Eq, "2020"));
        assert_eq!(SearchPrefix::extract("5"), (SearchPrefix::Eq, "5"));
        assert!(!SearchPrefix::Sa.is_valid_for(SearchParamType::Number));
    }

    #[test]
    fn test_fhir_version() {
        assert_eq!("r4b".parse::<FhirVersion>(), Ok(FhirVersion::R4B));
        assert!(!FhirVersion::Stu3.is_r4_or_later());
        assert!(FhirVersion::R5.is_r4_or_later());
        assert_eq!(FhirVersion::default(), FhirVersion::R4);
    }
}
