//! Typed search values.
//!
//! Every searchable element of a resource is reduced to one of the
//! [`SearchValue`] variants before it is stored in the index. Dates are
//! always ranges and numbers may be ranges, so range comparison is the common
//! matching primitive.

pub mod date;
pub mod reference;

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use url::Url;

use crate::types::SearchParamType;

pub use date::{DatePrecision, MAX_DATE_TIME, MIN_DATE_TIME, PartialDateTime, parse_instant};
pub use reference::{ReferenceKind, ReferenceSearchValueParser};

/// The value kind a search parameter type is indexed as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SearchValueKind {
    /// `number`
    Number,
    /// `date`
    DateTime,
    /// `string` (and `special`)
    String,
    /// `token`
    Token,
    /// `reference`
    Reference,
    /// `quantity`
    Quantity,
    /// `uri`
    Uri,
    /// `composite`
    Composite,
}

impl SearchValueKind {
    /// The kind values of a parameter type are converted to.
    pub fn for_param_type(param_type: SearchParamType) -> Self {
        match param_type {
            SearchParamType::Number => SearchValueKind::Number,
            SearchParamType::Date => SearchValueKind::DateTime,
            SearchParamType::String | SearchParamType::Special => SearchValueKind::String,
            SearchParamType::Token => SearchValueKind::Token,
            SearchParamType::Reference => SearchValueKind::Reference,
            SearchParamType::Quantity => SearchValueKind::Quantity,
            SearchParamType::Uri => SearchValueKind::Uri,
            SearchParamType::Composite => SearchValueKind::Composite,
        }
    }
}

impl fmt::Display for SearchValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SearchValueKind::Number => "number",
            SearchValueKind::DateTime => "datetime",
            SearchValueKind::String => "string",
            SearchValueKind::Token => "token",
            SearchValueKind::Reference => "reference",
            SearchValueKind::Quantity => "quantity",
            SearchValueKind::Uri => "uri",
            SearchValueKind::Composite => "composite",
        };
        f.write_str(name)
    }
}

/// A value extracted from a resource for indexing.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SearchValue {
    /// A number or numeric range. A single number has `low == high`.
    Number {
        low: Option<Decimal>,
        high: Option<Decimal>,
    },
    /// An inclusive range of instants.
    DateTime {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    /// A string.
    String(String),
    /// A coded value.
    Token {
        system: Option<String>,
        code: Option<String>,
        text: Option<String>,
    },
    /// A reference to another resource.
    Reference {
        kind: ReferenceKind,
        base_uri: Option<Url>,
        resource_type: Option<String>,
        resource_id: String,
    },
    /// A quantity or quantity range.
    Quantity {
        system: Option<String>,
        code: Option<String>,
        low: Option<Decimal>,
        high: Option<Decimal>,
    },
    /// A URI.
    Uri(String),
    /// The values of each component of a composite parameter, in order.
    Composite { components: Vec<Vec<SearchValue>> },
}

impl SearchValue {
    /// A single number.
    pub fn number(value: Decimal) -> Self {
        SearchValue::Number {
            low: Some(value),
            high: Some(value),
        }
    }

    /// A string value.
    pub fn string(value: impl Into<String>) -> Self {
        SearchValue::String(value.into())
    }

    /// A token.
    pub fn token(system: Option<String>, code: Option<String>, text: Option<String>) -> Self {
        SearchValue::Token { system, code, text }
    }

    /// A URI value.
    pub fn uri(value: impl Into<String>) -> Self {
        SearchValue::Uri(value.into())
    }

    /// A single quantity.
    pub fn quantity(system: Option<String>, code: Option<String>, value: Decimal) -> Self {
        SearchValue::Quantity {
            system,
            code,
            low: Some(value),
            high: Some(value),
        }
    }

    /// The range covered by a partial date.
    pub fn date(value: &PartialDateTime) -> Self {
        SearchValue::DateTime {
            start: value.start(),
            end: value.end(),
        }
    }

    /// The kind of this value.
    pub fn kind(&self) -> SearchValueKind {
        match self {
            SearchValue::Number { .. } => SearchValueKind::Number,
            SearchValue::DateTime { .. } => SearchValueKind::DateTime,
            SearchValue::String(_) => SearchValueKind::String,
            SearchValue::Token { .. } => SearchValueKind::Token,
            SearchValue::Reference { .. } => SearchValueKind::Reference,
            SearchValue::Quantity { .. } => SearchValueKind::Quantity,
            SearchValue::Uri(_) => SearchValueKind::Uri,
            SearchValue::Composite { .. } => SearchValueKind::Composite,
        }
    }

    /// Returns true if the value can be one component of a composite.
    ///
    /// A token needs a system or a code; composites never nest.
    pub fn is_valid_as_composite_component(&self) -> bool {
        match self {
            SearchValue::Token { system, code, .. } => system.is_some() || code.is_some(),
            SearchValue::Composite { .. } => false,
            _ => true,
        }
    }

    /// Range overlap for dates, numbers and quantities.
    ///
    /// Quantities must also agree on system and code. Open bounds are
    /// unbounded. Other kinds never overlap.
    pub fn overlaps(&self, other: &SearchValue) -> bool {
        match (self, other) {
            (
                SearchValue::DateTime { start, end },
                SearchValue::DateTime {
                    start: other_start,
                    end: other_end,
                },
            ) => start <= other_end && other_start <= end,
            (
                SearchValue::Number { low, high },
                SearchValue::Number {
                    low: other_low,
                    high: other_high,
                },
            ) => decimal_ranges_overlap(*low, *high, *other_low, *other_high),
            (
                SearchValue::Quantity { low, high, .. },
                SearchValue::Quantity {
                    low: other_low,
                    high: other_high,
                    ..
                },
            ) => {
                self.matches_system_and_code(other)
                    && decimal_ranges_overlap(*low, *high, *other_low, *other_high)
            }
            _ => false,
        }
    }

    /// Exact system and code agreement for tokens and quantities.
    pub fn matches_system_and_code(&self, other: &SearchValue) -> bool {
        match (self, other) {
            (
                SearchValue::Token { system, code, .. },
                SearchValue::Token {
                    system: other_system,
                    code: other_code,
                    ..
                },
            )
            | (
                SearchValue::Quantity { system, code, .. },
                SearchValue::Quantity {
                    system: other_system,
                    code: other_code,
                    ..
                },
            ) => system == other_system && code == other_code,
            _ => false,
        }
    }
}

fn decimal_ranges_overlap(
    low: Option<Decimal>,
    high: Option<Decimal>,
    other_low: Option<Decimal>,
    other_high: Option<Decimal>,
) -> bool {
    let starts_before_other_ends = match (low, other_high) {
        (Some(low), Some(other_high)) => low <= other_high,
        _ => true,
    };
    let other_starts_before_end = match (other_low, high) {
        (Some(other_low), Some(high)) => other_low <= high,
        _ => true,
    };
    starts_before_other_ends && other_starts_before_end
}

fn write_opt<T: fmt::Display>(f: &mut fmt::Formatter<'_>, value: &Option<T>) -> fmt::Result {
    match value {
        Some(value) => write!(f, "{}", value),
        None => Ok(()),
    }
}

impl fmt::Display for SearchValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchValue::Number { low, high } if low == high => write_opt(f, low),
            SearchValue::Number { low, high } => {
                write_opt(f, low)?;
                f.write_str("..")?;
                write_opt(f, high)
            }
            SearchValue::DateTime { start, end } => write!(
                f,
                "{}..{}",
                start.to_rfc3339_opts(SecondsFormat::Millis, true),
                end.to_rfc3339_opts(SecondsFormat::Millis, true)
            ),
            SearchValue::String(value) | SearchValue::Uri(value) => f.write_str(value),
            SearchValue::Token { system, code, text } => {
                write_opt(f, system)?;
                f.write_str("|")?;
                write_opt(f, code)?;
                if let Some(text) = text {
                    write!(f, " ({})", text)?;
                }
                Ok(())
            }
            SearchValue::Reference {
                base_uri,
                resource_type,
                resource_id,
                ..
            } => {
                write_opt(f, base_uri)?;
                if let Some(resource_type) = resource_type {
                    write!(f, "{}/", resource_type)?;
                }
                f.write_str(resource_id)
            }
            SearchValue::Quantity {
                system,
                code,
                low,
                high,
            } => {
                if low == high {
                    write_opt(f, low)?;
                } else {
                    write_opt(f, low)?;
                    f.write_str("..")?;
                    write_opt(f, high)?;
                }
                f.write_str("|")?;
                write_opt(f, system)?;
                f.write_str("|")?;
                write_opt(f, code)
            }
            SearchValue::Composite { components } => {
                for (index, values) in components.iter().enumerate() {
                    if index > 0 {
                        f.write_str("$")?;
                    }
                    let rendered: Vec<String> = values.iter().map(ToString::to_string).collect();
                    f.write_str(&rendered.join(","))?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(text: &str) -> Decimal {
        text.parse().unwrap()
    }

    #[test]
    fn test_kind_for_param_type() {
        assert_eq!(
            SearchValueKind::for_param_type(SearchParamType::Special),
            SearchValueKind::String
        );
        assert_eq!(
            SearchValueKind::for_param_type(SearchParamType::Date),
            SearchValueKind::DateTime
        );
        assert_eq!(SearchValue::uri("http://x").kind(), SearchValueKind::Uri);
    }

    #[test]
    fn test_composite_component_validity() {
        assert!(!SearchValue::token(None, None, Some("text".into())).is_valid_as_composite_component());
        assert!(SearchValue::token(Some("s".into()), None, None).is_valid_as_composite_component());
        assert!(SearchValue::token(None, Some("c".into()), None).is_valid_as_composite_component());
        assert!(SearchValue::string("x").is_valid_as_composite_component());
        assert!(
            !SearchValue::Composite { components: vec![] }.is_valid_as_composite_component()
        );
    }

    #[test]
    fn test_date_overlap() {
        let march = SearchValue::date(&PartialDateTime::parse("2020-03").unwrap());
        let day = SearchValue::date(&PartialDateTime::parse("2020-03-15").unwrap());
        let april = SearchValue::date(&PartialDateTime::parse("2020-04").unwrap());
        assert!(march.overlaps(&day));
        assert!(day.overlaps(&march));
        assert!(!march.overlaps(&april));
        let open = SearchValue::DateTime {
            start: MIN_DATE_TIME,
            end: MAX_DATE_TIME,
        };
        assert!(open.overlaps(&april));
    }

    #[test]
    fn test_number_and_quantity_overlap() {
        let range = SearchValue::Number {
            low: Some(dec("1")),
            high: Some(dec("5")),
        };
        assert!(range.overlaps(&SearchValue::number(dec("5"))));
        assert!(!range.overlaps(&SearchValue::number(dec("5.1"))));
        let open = SearchValue::Number {
            low: Some(dec("10")),
            high: None,
        };
        assert!(open.overlaps(&SearchValue::number(dec("1000"))));

        let mg = |v: &str| SearchValue::quantity(Some("http://unitsofmeasure.org".into()), Some("mg".into()), dec(v));
        let kg = SearchValue::quantity(Some("http://unitsofmeasure.org".into()), Some("kg".into()), dec("5"));
        assert!(mg("5").overlaps(&mg("5.0")));
        assert!(!mg("5").overlaps(&kg));
        assert!(!mg("5").overlaps(&SearchValue::number(dec("5"))));
    }

    #[test]
    fn test_display() {
        assert_eq!(
            SearchValue::token(Some("http://loinc.org".into()), Some("1234-5".into()), None).to_string(),
            "http://loinc.org|1234-5"
        );
        assert_eq!(SearchValue::number(dec("2.5")).to_string(), "2.5");
        let composite = SearchValue::Composite {
            components: vec![
                vec![SearchValue::token(None, Some("a".into()), None)],
                vec![SearchValue::string("b")],
            ],
        };
        assert_eq!(composite.to_string(), "|a$b");
    }
}
