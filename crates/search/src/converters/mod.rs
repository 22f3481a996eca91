//! Element to search value converters.
//!
//! A converter turns one typed element into zero or more [`SearchValue`]s of
//! one kind. Converters are keyed by the element's type name and the value
//! kind of the search parameter being indexed; an element whose type has no
//! converter for that kind is not indexed.
//!
//! Converters never fail: absent or unparseable sub-elements produce no
//! values.

pub mod code_system;

use std::collections::HashMap;
use std::fmt;

use rust_decimal::Decimal;
use tracing::debug;

use crate::navigation::ElementNode;
use crate::search_values::{
    MAX_DATE_TIME, MIN_DATE_TIME, PartialDateTime, ReferenceSearchValueParser, SearchValue,
    SearchValueKind, parse_instant,
};
use crate::types::FhirVersion;

pub use code_system::CodeSystemResolver;

/// System of the tokens produced for `boolean` elements.
pub const SPECIAL_VALUES_SYSTEM: &str = "http://hl7.org/fhir/special-values";
/// System of currency codes.
pub const CURRENCY_SYSTEM: &str = "urn:iso:std:iso:4217";

/// A conversion function.
pub type ConverterFn = fn(&dyn ElementNode, &ConversionContext<'_>) -> Vec<SearchValue>;

/// What a converter may consult besides the element itself.
#[derive(Debug, Clone, Copy)]
pub struct ConversionContext<'a> {
    /// The FHIR release (Money is encoded differently before R4).
    pub version: FhirVersion,
    /// Parser for reference strings.
    pub reference_parser: &'a ReferenceSearchValueParser,
    /// Code systems for bare `code` elements.
    pub code_systems: &'a CodeSystemResolver,
}

/// The closed set of converters, keyed by (element type, value kind).
pub struct ConverterRegistry {
    converters: HashMap<SearchValueKind, HashMap<String, ConverterFn>>,
    version: FhirVersion,
    reference_parser: ReferenceSearchValueParser,
    code_systems: CodeSystemResolver,
}

impl fmt::Debug for ConverterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConverterRegistry")
            .field("version", &self.version)
            .field(
                "converters",
                &self.converters.values().map(HashMap::len).sum::<usize>(),
            )
            .finish()
    }
}

impl ConverterRegistry {
    /// Creates a registry holding every built-in converter.
    pub fn new(
        version: FhirVersion,
        reference_parser: ReferenceSearchValueParser,
        code_systems: CodeSystemResolver,
    ) -> Self {
        let mut registry = Self {
            converters: HashMap::new(),
            version,
            reference_parser,
            code_systems,
        };
        for (type_names, kind, converter) in BUILTIN_CONVERTERS {
            for type_name in type_names.iter() {
                registry.register(type_name, *kind, *converter);
            }
        }
        registry
    }

    /// Adds or replaces a converter.
    pub fn register(&mut self, type_name: &str, kind: SearchValueKind, converter: ConverterFn) {
        self.converters
            .entry(kind)
            .or_default()
            .insert(type_name.to_string(), converter);
    }

    /// Looks up a converter.
    pub fn get(&self, type_name: &str, kind: SearchValueKind) -> Option<ConverterFn> {
        self.converters
            .get(&kind)
            .and_then(|by_type| by_type.get(type_name))
            .copied()
    }

    /// Returns true if elements of the type can be converted to the kind.
    pub fn supports(&self, type_name: &str, kind: SearchValueKind) -> bool {
        self.get(type_name, kind).is_some()
    }

    /// Converts an element, or returns `None` when no converter exists for
    /// its type and the requested kind.
    pub fn convert(&self, element: &dyn ElementNode, kind: SearchValueKind) -> Option<Vec<SearchValue>> {
        let converter = self.get(element.instance_type(), kind)?;
        Some(converter(element, &self.context()))
    }

    /// The context handed to converters.
    pub fn context(&self) -> ConversionContext<'_> {
        ConversionContext {
            version: self.version,
            reference_parser: &self.reference_parser,
            code_systems: &self.code_systems,
        }
    }

    /// The reference parser shared with the indexer.
    pub fn reference_parser(&self) -> &ReferenceSearchValueParser {
        &self.reference_parser
    }
}

type ConverterEntry = (&'static [&'static str], SearchValueKind, ConverterFn);

const BUILTIN_CONVERTERS: &[ConverterEntry] = &[
    (&["boolean"], SearchValueKind::Token, boolean_to_token),
    (&["string"], SearchValueKind::Token, string_to_token),
    (&["string"], SearchValueKind::String, string_to_string),
    (&["code", "id"], SearchValueKind::Token, code_to_token),
    (&["Coding"], SearchValueKind::Token, coding_to_token),
    (&["CodeableConcept"], SearchValueKind::Token, codeable_concept_to_token),
    (&["CodeableReference"], SearchValueKind::Token, codeable_reference_to_token),
    (&["Identifier"], SearchValueKind::Token, identifier_to_token),
    (&["ContactPoint"], SearchValueKind::Token, contact_point_to_token),
    (
        &["integer", "positiveInt", "unsignedInt", "integer64", "decimal"],
        SearchValueKind::Number,
        number_to_number,
    ),
    (&["Range"], SearchValueKind::Number, range_to_number),
    (
        &["Quantity", "Age", "Count", "Distance", "Duration", "SimpleQuantity"],
        SearchValueKind::Quantity,
        quantity_to_quantity,
    ),
    (&["Range"], SearchValueKind::Quantity, range_to_quantity),
    (&["Money"], SearchValueKind::Quantity, money_to_quantity),
    (&["date", "dateTime"], SearchValueKind::DateTime, date_to_date_time),
    (&["instant"], SearchValueKind::DateTime, instant_to_date_time),
    (&["Period"], SearchValueKind::DateTime, period_to_date_time),
    (&["HumanName"], SearchValueKind::String, human_name_to_string),
    (&["Address"], SearchValueKind::String, address_to_string),
    (&["markdown"], SearchValueKind::String, string_to_string),
    (&["uri", "url", "oid", "uuid", "canonical"], SearchValueKind::Uri, uri_to_uri),
    (&["Reference"], SearchValueKind::Reference, reference_to_reference),
];

fn primitive_string(element: &dyn ElementNode) -> Option<String> {
    element.value().map(|value| value.to_string())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

fn boolean_to_token(element: &dyn ElementNode, _ctx: &ConversionContext<'_>) -> Vec<SearchValue> {
    element
        .value()
        .and_then(|value| value.as_bool())
        .map(|flag| {
            SearchValue::token(
                Some(SPECIAL_VALUES_SYSTEM.to_string()),
                Some(flag.to_string()),
                None,
            )
        })
        .into_iter()
        .collect()
}

fn string_to_token(element: &dyn ElementNode, _ctx: &ConversionContext<'_>) -> Vec<SearchValue> {
    non_empty(primitive_string(element))
        .map(|code| SearchValue::token(None, Some(code), None))
        .into_iter()
        .collect()
}

fn string_to_string(element: &dyn ElementNode, _ctx: &ConversionContext<'_>) -> Vec<SearchValue> {
    non_empty(primitive_string(element))
        .map(SearchValue::String)
        .into_iter()
        .collect()
}

fn code_to_token(element: &dyn ElementNode, ctx: &ConversionContext<'_>) -> Vec<SearchValue> {
    let Some(code) = non_empty(primitive_string(element)) else {
        return Vec::new();
    };
    let system = ctx
        .code_systems
        .resolve_system(element.location())
        .map(str::to_string);
    vec![SearchValue::token(system, Some(code), None)]
}

fn coding_to_token(element: &dyn ElementNode, _ctx: &ConversionContext<'_>) -> Vec<SearchValue> {
    let system = non_empty(element.child_string("system"));
    let code = non_empty(element.child_string("code"));
    let display = non_empty(element.child_string("display"));
    if system.is_none() && code.is_none() && display.is_none() {
        return Vec::new();
    }
    vec![SearchValue::token(system, code, display)]
}

fn codeable_concept_to_token(element: &dyn ElementNode, ctx: &ConversionContext<'_>) -> Vec<SearchValue> {
    let mut values: Vec<SearchValue> = element
        .children("coding")
        .iter()
        .flat_map(|coding| coding_to_token(coding.as_ref(), ctx))
        .collect();
    if let Some(text) = non_empty(element.child_string("text")) {
        values.push(SearchValue::token(None, None, Some(text)));
    }
    values
}

fn codeable_reference_to_token(element: &dyn ElementNode, ctx: &ConversionContext<'_>) -> Vec<SearchValue> {
    element
        .children("concept")
        .iter()
        .flat_map(|concept| codeable_concept_to_token(concept.as_ref(), ctx))
        .collect()
}

fn identifier_to_token(element: &dyn ElementNode, _ctx: &ConversionContext<'_>) -> Vec<SearchValue> {
    let system = non_empty(element.child_string("system"));
    let value = non_empty(element.child_string("value"));
    let type_text = element
        .children("type")
        .first()
        .and_then(|identifier_type| non_empty(identifier_type.child_string("text")));
    if system.is_none() && value.is_none() && type_text.is_none() {
        return Vec::new();
    }
    vec![SearchValue::token(system, value, type_text)]
}

fn contact_point_to_token(element: &dyn ElementNode, _ctx: &ConversionContext<'_>) -> Vec<SearchValue> {
    match non_empty(element.child_string("value")) {
        Some(value) => vec![SearchValue::token(
            non_empty(element.child_string("use")),
            Some(value),
            None,
        )],
        None => Vec::new(),
    }
}

fn number_to_number(element: &dyn ElementNode, _ctx: &ConversionContext<'_>) -> Vec<SearchValue> {
    element
        .value()
        .and_then(|value| value.as_decimal())
        .map(SearchValue::number)
        .into_iter()
        .collect()
}

fn range_bound(element: &dyn ElementNode, name: &str) -> Option<Decimal> {
    element
        .children(name)
        .first()
        .and_then(|bound| bound.child_decimal("value"))
}

fn range_to_number(element: &dyn ElementNode, _ctx: &ConversionContext<'_>) -> Vec<SearchValue> {
    let low = range_bound(element, "low");
    let high = range_bound(element, "high");
    if low.is_none() && high.is_none() {
        return Vec::new();
    }
    vec![SearchValue::Number { low, high }]
}

fn quantity_to_quantity(element: &dyn ElementNode, _ctx: &ConversionContext<'_>) -> Vec<SearchValue> {
    let Some(value) = element.child_decimal("value") else {
        return Vec::new();
    };
    let code = non_empty(element.child_string("code")).or_else(|| non_empty(element.child_string("unit")));
    vec![SearchValue::quantity(
        non_empty(element.child_string("system")),
        code,
        value,
    )]
}

fn range_to_quantity(element: &dyn ElementNode, _ctx: &ConversionContext<'_>) -> Vec<SearchValue> {
    let low = element.children("low").into_iter().next();
    let high = element.children("high").into_iter().next();
    let Some(unit_source) = low.as_ref().or(high.as_ref()) else {
        return Vec::new();
    };
    vec![SearchValue::Quantity {
        system: non_empty(unit_source.child_string("system")),
        code: non_empty(unit_source.child_string("code")),
        low: low.as_ref().and_then(|bound| bound.child_decimal("value")),
        high: high.as_ref().and_then(|bound| bound.child_decimal("value")),
    }]
}

fn money_to_quantity(element: &dyn ElementNode, ctx: &ConversionContext<'_>) -> Vec<SearchValue> {
    let Some(value) = element.child_decimal("value") else {
        return Vec::new();
    };
    if ctx.version.is_r4_or_later() {
        match non_empty(element.child_string("currency")) {
            Some(currency) => vec![SearchValue::quantity(
                Some(CURRENCY_SYSTEM.to_string()),
                Some(currency),
                value,
            )],
            None => Vec::new(),
        }
    } else {
        match non_empty(element.child_string("code")) {
            Some(code) => vec![SearchValue::quantity(
                non_empty(element.child_string("system")),
                Some(code),
                value,
            )],
            None => Vec::new(),
        }
    }
}

fn date_to_date_time(element: &dyn ElementNode, _ctx: &ConversionContext<'_>) -> Vec<SearchValue> {
    primitive_string(element)
        .and_then(|text| PartialDateTime::parse(&text).ok())
        .map(|partial| SearchValue::date(&partial))
        .into_iter()
        .collect()
}

fn instant_to_date_time(element: &dyn ElementNode, _ctx: &ConversionContext<'_>) -> Vec<SearchValue> {
    primitive_string(element)
        .and_then(|text| parse_instant(&text).ok())
        .map(|instant| SearchValue::DateTime {
            start: instant,
            end: instant,
        })
        .into_iter()
        .collect()
}

fn period_to_date_time(element: &dyn ElementNode, _ctx: &ConversionContext<'_>) -> Vec<SearchValue> {
    // An absent bound is open; a bound that is present but unparseable
    // invalidates the whole period.
    let bound = |name: &str| match element.child_string(name) {
        None => Ok(None),
        Some(text) => PartialDateTime::parse(&text).map(Some),
    };
    let (Ok(start), Ok(end)) = (bound("start"), bound("end")) else {
        return Vec::new();
    };
    vec![SearchValue::DateTime {
        start: start.map(|s| s.start()).unwrap_or(MIN_DATE_TIME),
        end: end.map(|e| e.end()).unwrap_or(MAX_DATE_TIME),
    }]
}

fn strings_of(element: &dyn ElementNode, names: &[&str]) -> Vec<SearchValue> {
    names
        .iter()
        .flat_map(|name| element.child_strings(name))
        .filter(|value| !value.is_empty())
        .map(SearchValue::String)
        .collect()
}

fn human_name_to_string(element: &dyn ElementNode, _ctx: &ConversionContext<'_>) -> Vec<SearchValue> {
    strings_of(element, &["given", "family", "prefix", "suffix", "text"])
}

fn address_to_string(element: &dyn ElementNode, _ctx: &ConversionContext<'_>) -> Vec<SearchValue> {
    strings_of(
        element,
        &["city", "country", "district", "line", "postalCode", "state", "text"],
    )
}

fn uri_to_uri(element: &dyn ElementNode, _ctx: &ConversionContext<'_>) -> Vec<SearchValue> {
    non_empty(primitive_string(element))
        .map(SearchValue::Uri)
        .into_iter()
        .collect()
}

fn reference_to_reference(element: &dyn ElementNode, ctx: &ConversionContext<'_>) -> Vec<SearchValue> {
    let Some(reference) = non_empty(element.child_string("reference")) else {
        return Vec::new();
    };
    // Contained and bundle-local references are not indexed.
    if reference.starts_with('#') || reference.starts_with("urn:") {
        return Vec::new();
    }
    match ctx.reference_parser.parse(&reference) {
        Ok(value) => vec![value],
        Err(e) => {
            debug!(reference = %reference, error = %e, "Skipping unparseable reference");
            Vec::new()
        }
    }
}
