use std::sync::Arc;

use rust_decimal::Decimal;
use serde_json::{Map, Value};

use super::{ElementNode, EvaluationContext, Node, Primitive, path};
use crate::error::EvaluationError;
use crate::search_values::PartialDateTime;

/// Choice-type suffixes for primitive types, as they appear in JSON keys
/// (`valueDateTime`, `onsetString`, ...).
const PRIMITIVE_SUFFIXES: &[&str] = &[
    "Base64Binary",
    "Boolean",
    "Canonical",
    "Code",
    "Date",
    "DateTime",
    "Decimal",
    "Id",
    "Instant",
    "Integer",
    "Integer64",
    "Markdown",
    "Oid",
    "PositiveInt",
    "String",
    "Time",
    "UnsignedInt",
    "Uri",
    "Url",
    "Uuid",
];

/// Choice-type suffixes for complex types.
const COMPLEX_SUFFIXES: &[&str] = &[
    "Address",
    "Age",
    "Annotation",
    "Attachment",
    "CodeableConcept",
    "CodeableReference",
    "Coding",
    "ContactDetail",
    "ContactPoint",
    "Count",
    "DataRequirement",
    "Distance",
    "Dosage",
    "Duration",
    "Expression",
    "HumanName",
    "Identifier",
    "Meta",
    "Money",
    "ParameterDefinition",
    "Period",
    "Quantity",
    "Range",
    "Ratio",
    "RatioRange",
    "Reference",
    "RelatedArtifact",
    "SampledData",
    "Signature",
    "Timing",
    "TriggerDefinition",
    "UsageContext",
];

const CONTACT_POINT_SYSTEMS: &[&str] = &["phone", "fax", "email", "pager", "url", "sms", "other"];

const ADDRESS_KEYS: &[&str] = &["line", "city", "district", "state", "postalCode", "country"];

/// A resource element backed by a `serde_json::Value`.
///
/// The FHIR type of each element is inferred from its field name, its
/// choice-type suffix and the shape of its value, which is enough for the
/// expressions used by search parameter definitions.
#[derive(Debug, Clone)]
pub struct JsonElement {
    value: Arc<Value>,
    instance_type: String,
    location: String,
}

impl JsonElement {
    /// Wraps a resource; its type and location come from `resourceType`.
    pub fn from_resource(value: Value) -> Self {
        let instance_type = value
            .get("resourceType")
            .and_then(Value::as_str)
            .unwrap_or("Resource")
            .to_string();
        Self {
            location: instance_type.clone(),
            instance_type,
            value: Arc::new(value),
        }
    }

    /// Wraps a value with an explicit type and location.
    pub fn with_type(
        value: Value,
        instance_type: impl Into<String>,
        location: impl Into<String>,
    ) -> Self {
        Self {
            value: Arc::new(value),
            instance_type: instance_type.into(),
            location: location.into(),
        }
    }

    /// The underlying JSON.
    pub fn json(&self) -> &Value {
        &self.value
    }

    /// Converts into a shared node handle.
    pub fn into_node(self) -> Node {
        Arc::new(self)
    }

    fn push_child(&self, nodes: &mut Vec<Node>, key: &str, explicit_type: Option<&str>, child: &Value) {
        match child {
            Value::Array(items) => {
                for (index, item) in items.iter().enumerate() {
                    if item.is_null() {
                        continue;
                    }
                    let location = format!("{}.{}[{}]", self.location, key, index);
                    nodes.push(self.child_node(key, explicit_type, item, location));
                }
            }
            Value::Null => {}
            item => {
                let location = format!("{}.{}", self.location, key);
                nodes.push(self.child_node(key, explicit_type, item, location));
            }
        }
    }

    fn child_node(&self, key: &str, explicit_type: Option<&str>, item: &Value, location: String) -> Node {
        let instance_type = match explicit_type {
            Some(type_name) => type_name.to_string(),
            None => infer_type(key, item),
        };
        Arc::new(JsonElement {
            value: Arc::new(item.clone()),
            instance_type,
            location,
        })
    }
}

impl ElementNode for JsonElement {
    fn instance_type(&self) -> &str {
        &self.instance_type
    }

    fn location(&self) -> &str {
        &self.location
    }

    fn value(&self) -> Option<Primitive> {
        match self.value.as_ref() {
            Value::Bool(b) => Some(Primitive::Boolean(*b)),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Some(Primitive::Integer(i)),
                None => number_to_decimal(n).map(Primitive::Decimal),
            },
            Value::String(s) => Some(Primitive::String(s.clone())),
            _ => None,
        }
    }

    fn children(&self, name: &str) -> Vec<Node> {
        let Some(object) = self.value.as_object() else {
            return Vec::new();
        };

        let mut nodes = Vec::new();
        if let Some(child) = object.get(name) {
            self.push_child(&mut nodes, name, None, child);
            return nodes;
        }

        for (key, child) in object {
            if let Some(type_name) = key.strip_prefix(name).and_then(choice_type_name) {
                self.push_child(&mut nodes, key, Some(type_name.as_str()), child);
            }
        }
        nodes
    }

    fn select(
        &self,
        expression: &str,
        ctx: &EvaluationContext<'_>,
    ) -> Result<Vec<Node>, EvaluationError> {
        path::evaluate(self.clone().into_node(), expression, ctx)
    }
}

fn number_to_decimal(n: &serde_json::Number) -> Option<Decimal> {
    let text = n.to_string();
    text.parse::<Decimal>()
        .ok()
        .or_else(|| Decimal::from_scientific(&text).ok())
}

/// Maps the suffix of a choice-type key to its type name.
fn choice_type_name(suffix: &str) -> Option<String> {
    if PRIMITIVE_SUFFIXES.contains(&suffix) {
        let mut chars = suffix.chars();
        return chars
            .next()
            .map(|first| first.to_ascii_lowercase().to_string() + chars.as_str());
    }
    COMPLEX_SUFFIXES
        .contains(&suffix)
        .then(|| suffix.to_string())
}

fn infer_type(name: &str, value: &Value) -> String {
    match value {
        Value::Bool(_) => "boolean".to_string(),
        Value::Number(n) if n.is_i64() || n.is_u64() => match name {
            "count" | "total" | "rank" => "unsignedInt".to_string(),
            _ => "integer".to_string(),
        },
        Value::Number(_) => "decimal".to_string(),
        Value::String(s) => string_type(name, s).to_string(),
        Value::Object(object) => object_type(name, object),
        _ => "Element".to_string(),
    }
}

fn string_type(name: &str, value: &str) -> &'static str {
    match name {
        "lastUpdated" | "issued" | "recorded" | "instant" => "instant",
        "birthDate" => "date",
        "url" | "uri" | "system" | "source" => "uri",
        "profile" | "canonical" | "derivedFrom" | "instantiatesCanonical" => "canonical",
        "id" => "id",
        "div" => "xhtml",
        "gender" | "status" | "use" | "language" | "code" | "currency" | "intent" | "priority"
        | "mode" | "kind" | "comparator" | "type" | "base" | "target" => "code",
        "value" | "text" | "display" | "family" | "given" | "prefix" | "suffix" | "line"
        | "city" | "district" | "state" | "postalCode" | "country" | "reference" | "unit"
        | "name" | "title" | "version" | "expression" => "string",
        _ => match PartialDateTime::parse(value) {
            Ok(partial) if partial.has_time() => "dateTime",
            Ok(_) => "date",
            Err(_) => "string",
        },
    }
}

fn object_type(name: &str, object: &Map<String, Value>) -> String {
    if let Some(resource_type) = object.get("resourceType").and_then(Value::as_str) {
        return resource_type.to_string();
    }

    let has = |key: &str| object.contains_key(key);
    let type_name = match name {
        "meta" => "Meta",
        "extension" | "modifierExtension" => "Extension",
        "telecom" => "ContactPoint",
        "identifier" if has("value") || has("system") => "Identifier",
        "address" => "Address",
        "tag" | "security" | "coding" => "Coding",
        "text" if has("div") => "Narrative",
        _ if has("concept") => "CodeableReference",
        _ if object.get("reference").is_some_and(Value::is_object) => "CodeableReference",
        _ if has("reference") => "Reference",
        _ if has("coding") => "CodeableConcept",
        _ if has("low") || has("high") => "Range",
        _ if has("numerator") || has("denominator") => "Ratio",
        _ if has("start") || has("end") => "Period",
        _ if has("family") || has("given") => "HumanName",
        _ if ADDRESS_KEYS.iter().any(|key| has(key)) => "Address",
        _ if has("currency") => "Money",
        _ if object.get("value").is_some_and(Value::is_number) => "Quantity",
        _ if object.get("value").is_some_and(Value::is_string) => {
            let system = object.get("system").and_then(Value::as_str);
            if system.is_some_and(|s| CONTACT_POINT_SYSTEMS.contains(&s)) {
                "ContactPoint"
            } else {
                "Identifier"
            }
        }
        _ if has("code") || has("system") || has("display") => "Coding",
        _ if is_text_only(object) && matches!(name, "code" | "category" | "type") => {
            "CodeableConcept"
        }
        _ if is_text_only(object) && name == "name" => "HumanName",
        _ => "BackboneElement",
    };
    type_name.to_string()
}

fn is_text_only(object: &Map<String, Value>) -> bool {
    object.contains_key("text")
        && object
            .keys()
            .all(|key| matches!(key.as_str(), "text" | "id" | "extension"))
}
