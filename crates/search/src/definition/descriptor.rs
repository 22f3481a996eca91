//! Raw SearchParameter records.

use std::str::FromStr;

use crate::navigation::ElementNode;
use crate::types::SearchParamType;

/// A component of a composite parameter as written in the record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentDescriptor {
    /// `component.definition` (STU3: `component.definition.reference`).
    pub definition_url: Option<String>,
    /// `component.expression`.
    pub expression: String,
}

/// The fields of a SearchParameter record, not yet validated against the
/// rest of the bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchParameterDescriptor {
    /// `url`
    pub url: String,
    /// `code`
    pub code: String,
    /// `name`
    pub name: Option<String>,
    /// `description`
    pub description: Option<String>,
    /// `type`
    pub param_type: SearchParamType,
    /// `expression`, empty when absent.
    pub expression: String,
    /// `base`
    pub base: Vec<String>,
    /// `target`
    pub target: Vec<String>,
    /// `component`
    pub components: Vec<ComponentDescriptor>,
}

impl SearchParameterDescriptor {
    /// Reads a descriptor from a SearchParameter element.
    ///
    /// Fails with a description of the problem when the element is not a
    /// SearchParameter or its `type` is not a search parameter type.
    pub fn from_element(element: &dyn ElementNode) -> Result<Self, String> {
        if element.instance_type() != "SearchParameter" {
            return Err(format!(
                "expected a SearchParameter but found '{}'",
                element.instance_type()
            ));
        }

        let url = element.child_string("url").unwrap_or_default();
        let type_code = element
            .child_string("type")
            .ok_or_else(|| format!("search parameter '{}' has no type", url))?;
        let param_type = SearchParamType::from_str(&type_code)
            .map_err(|_| format!("search parameter '{}' has unknown type '{}'", url, type_code))?;

        let components = element
            .children("component")
            .iter()
            .map(|component| ComponentDescriptor {
                definition_url: component_definition(component.as_ref()),
                expression: component.child_string("expression").unwrap_or_default(),
            })
            .collect();

        Ok(Self {
            code: element.child_string("code").unwrap_or_default(),
            name: element.child_string("name"),
            description: element.child_string("description"),
            param_type,
            expression: element.child_string("expression").unwrap_or_default(),
            base: element.child_strings("base"),
            target: element.child_strings("target"),
            components,
            url,
        })
    }
}

fn component_definition(component: &dyn ElementNode) -> Option<String> {
    let definition = component.children("definition").into_iter().next()?;
    match definition.value() {
        Some(value) => Some(value.to_string()),
        None => definition.child_string("reference"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::navigation::JsonElement;
    use serde_json::json;

    #[test]
    fn test_read_reference_parameter() {
        let element = JsonElement::from_resource(json!({
            "resourceType": "SearchParameter",
            "url": "http://hl7.org/fhir/SearchParameter/Observation-subject",
            "name": "subject",
            "code": "subject",
            "type": "reference",
            "base": ["Observation"],
            "target": ["Patient", "Group"],
            "expression": "Observation.subject"
        }));

        let descriptor = SearchParameterDescriptor::from_element(&element).unwrap();
        assert_eq!(descriptor.code, "subject");
        assert_eq!(descriptor.param_type, SearchParamType::Reference);
        assert_eq!(descriptor.base, vec!["Observation"]);
        assert_eq!(descriptor.target, vec!["Patient", "Group"]);
        assert!(descriptor.components.is_empty());
    }

    #[test]
    fn test_component_definition_shapes() {
        let r4 = JsonElement::from_resource(json!({
            "resourceType": "SearchParameter",
            "url": "http://example.org/composite",
            "code": "c",
            "type": "composite",
            "base": ["Observation"],
            "expression": "Observation",
            "component": [
                { "definition": "http://example.org/a", "expression": "code" },
                { "definition": { "reference": "http://example.org/b" }, "expression": "value" },
                { "expression": "status" }
            ]
        }));

        let descriptor = SearchParameterDescriptor::from_element(&r4).unwrap();
        let urls: Vec<_> = descriptor
            .components
            .iter()
            .map(|c| c.definition_url.as_deref())
            .collect();
        assert_eq!(
            urls,
            vec![Some("http://example.org/a"), Some("http://example.org/b"), None]
        );
        assert_eq!(descriptor.components[1].expression, "value");
    }

    #[test]
    fn test_rejects_other_records() {
        let patient = JsonElement::from_resource(json!({ "resourceType": "Patient" }));
        assert!(SearchParameterDescriptor::from_element(&patient).is_err());

        let bad_type = JsonElement::from_resource(json!({
            "resourceType": "SearchParameter",
            "url": "http://example.org/x",
            "type": "geometry"
        }));
        let err = SearchParameterDescriptor::from_element(&bad_type).unwrap_err();
        assert!(err.contains("geometry"));
    }
}
