//! Search index extraction.
//!
//! Evaluates the expression of every supported search parameter of a
//! resource's type and converts the selected elements into
//! [`SearchIndexEntry`] values. Extraction never fails: expressions that
//! cannot be evaluated and elements that cannot be converted are logged and
//! skipped.

use std::hash::{Hash, Hasher};
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::json;
use tracing::{debug, warn};

use crate::converters::ConverterRegistry;
use crate::definition::{SearchParameterInfo, SearchParameterRegistry};
use crate::navigation::{ElementNode, EvaluationContext, JsonElement, Node, ReferenceResolver};
use crate::search_values::{ReferenceSearchValueParser, SearchValue, SearchValueKind};
use crate::types::SearchParamType;

/// Code of the parameter that is never indexed; the type is a property of
/// the stored resource itself.
const RESOURCE_TYPE_CODE: &str = "_type";

/// One extracted value of one search parameter.
#[derive(Debug, Clone)]
pub struct SearchIndexEntry {
    /// The parameter the value was extracted for.
    pub search_parameter: Arc<SearchParameterInfo>,
    /// The extracted value.
    pub value: SearchValue,
}

impl SearchIndexEntry {
    /// Creates an entry.
    pub fn new(search_parameter: Arc<SearchParameterInfo>, value: SearchValue) -> Self {
        Self {
            search_parameter,
            value,
        }
    }
}

impl PartialEq for SearchIndexEntry {
    fn eq(&self, other: &Self) -> bool {
        self.search_parameter.url == other.search_parameter.url
            && self
                .search_parameter
                .code
                .eq_ignore_ascii_case(&other.search_parameter.code)
            && self.value == other.value
    }
}

impl Eq for SearchIndexEntry {}

impl Hash for SearchIndexEntry {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.search_parameter.code.to_ascii_lowercase().hash(state);
        self.search_parameter.url.hash(state);
        self.value.hash(state);
    }
}

/// Resolves references to stub resources carrying only a type and an id.
///
/// Enough for expressions such as `subject.where(resolve() is Patient)`.
#[derive(Debug, Clone)]
pub struct LightweightReferenceResolver {
    parser: ReferenceSearchValueParser,
}

impl LightweightReferenceResolver {
    /// Creates a resolver using the given reference parser.
    pub fn new(parser: ReferenceSearchValueParser) -> Self {
        Self { parser }
    }
}

impl ReferenceResolver for LightweightReferenceResolver {
    fn resolve(&self, reference: &str) -> Option<Node> {
        if reference.trim().is_empty() {
            return None;
        }
        match self.parser.parse(reference) {
            Ok(SearchValue::Reference {
                resource_type: Some(resource_type),
                resource_id,
                ..
            }) => Some(
                JsonElement::from_resource(json!({
                    "resourceType": resource_type,
                    "id": resource_id
                }))
                .into_node(),
            ),
            _ => None,
        }
    }
}

/// Extracts index entries from resources.
pub struct SearchIndexer {
    registry: Arc<SearchParameterRegistry>,
    converters: Arc<ConverterRegistry>,
    resolver: LightweightReferenceResolver,
    /// Allowed reference targets per parameter URL.
    target_types: DashMap<String, Arc<[String]>>,
}

impl SearchIndexer {
    /// Creates an indexer over the registry's parameters.
    pub fn new(registry: Arc<SearchParameterRegistry>, converters: Arc<ConverterRegistry>) -> Self {
        let resolver = LightweightReferenceResolver::new(converters.reference_parser().clone());
        Self {
            registry,
            converters,
            resolver,
            target_types: DashMap::new(),
        }
    }

    /// Extracts every index entry of a resource.
    pub fn extract(&self, resource: &dyn ElementNode) -> Vec<SearchIndexEntry> {
        let parameters = match self.registry.get_search_parameters(resource.instance_type()) {
            Ok(parameters) => parameters,
            Err(e) => {
                warn!(resource_type = %resource.instance_type(), error = %e, "Cannot index resource");
                return Vec::new();
            }
        };

        let ctx = EvaluationContext::with_resolver(&self.resolver);
        let mut entries = Vec::new();

        for parameter in parameters {
            if parameter.code == RESOURCE_TYPE_CODE || !parameter.is_supported() {
                continue;
            }

            if parameter.is_composite() {
                self.extract_composite(&parameter, resource, &ctx, &mut entries);
            } else {
                for value in self.extract_values(
                    &parameter.url,
                    parameter.param_type,
                    &parameter.target_resource_types,
                    resource,
                    &parameter.expression,
                    &ctx,
                ) {
                    entries.push(SearchIndexEntry::new(Arc::clone(&parameter), value));
                }
            }
        }

        debug!(
            resource_type = %resource.instance_type(),
            entries = entries.len(),
            "Extracted search index entries"
        );
        entries
    }

    /// One composite value per anchor element. An anchor where any
    /// component has no valid value is not indexed.
    fn extract_composite(
        &self,
        parameter: &Arc<SearchParameterInfo>,
        resource: &dyn ElementNode,
        ctx: &EvaluationContext<'_>,
        entries: &mut Vec<SearchIndexEntry>,
    ) {
        let anchors = match resource.select(&parameter.expression, ctx) {
            Ok(anchors) => anchors,
            Err(e) => {
                warn!(
                    url = %parameter.url,
                    expression = %parameter.expression,
                    error = %e,
                    "Failed to evaluate composite search parameter"
                );
                return;
            }
        };

        let mut components = Vec::with_capacity(parameter.components.len());
        for component in &parameter.components {
            let Some(resolved) = &component.resolved else {
                warn!(
                    url = %parameter.url,
                    component = %component.definition_url,
                    "Composite component does not resolve"
                );
                return;
            };
            components.push((
                component,
                resolved.param_type,
                resolved.target_resource_types.as_slice(),
            ));
        }

        'anchors: for anchor in anchors {
            let mut values = Vec::with_capacity(components.len());
            for (component, param_type, targets) in &components {
                let extracted: Vec<SearchValue> = self
                    .extract_values(
                        &component.definition_url,
                        *param_type,
                        targets,
                        anchor.as_ref(),
                        &component.expression,
                        ctx,
                    )
                    .into_iter()
                    .filter(SearchValue::is_valid_as_composite_component)
                    .collect();
                if extracted.is_empty() {
                    continue 'anchors;
                }
                values.push(extracted);
            }
            entries.push(SearchIndexEntry::new(
                Arc::clone(parameter),
                SearchValue::Composite { components: values },
            ));
        }
    }

    fn extract_values(
        &self,
        url: &str,
        param_type: SearchParamType,
        targets: &[String],
        element: &dyn ElementNode,
        expression: &str,
        ctx: &EvaluationContext<'_>,
    ) -> Vec<SearchValue> {
        let mut selected = match element.select(expression, ctx) {
            Ok(selected) => selected,
            Err(e) => {
                warn!(
                    expression = %expression,
                    element_type = %element.instance_type(),
                    error = %e,
                    "Failed to extract values"
                );
                return Vec::new();
            }
        };

        let is_reference = param_type == SearchParamType::Reference;
        if is_reference && targets.len() > 1 {
            let allowed = self.allowed_targets(url, targets);
            selected.retain(|node| {
                if node.instance_type() != "Reference" {
                    return true;
                }
                node.child_string("reference")
                    .is_some_and(|reference| allowed.iter().any(|t| reference.contains(t.as_str())))
            });
        }

        let kind = SearchValueKind::for_param_type(param_type);
        let single_target = match targets {
            [only] if is_reference => Some(only),
            _ => None,
        };

        let mut results = Vec::new();
        for node in selected {
            let Some(values) = self.converters.convert(node.as_ref(), kind) else {
                warn!(
                    element_type = %node.instance_type(),
                    kind = %kind,
                    "The element type is not supported"
                );
                continue;
            };
            match single_target {
                Some(target) => results.extend(values.into_iter().map(|v| stamp_type(v, target))),
                None => results.extend(values),
            }
        }
        results
    }

    fn allowed_targets(&self, url: &str, targets: &[String]) -> Arc<[String]> {
        Arc::clone(
            self.target_types
                .entry(url.to_string())
                .or_insert_with(|| targets.into())
                .value(),
        )
    }
}

/// Gives an untyped reference the only type it can have.
fn stamp_type(value: SearchValue, target: &str) -> SearchValue {
    match value {
        SearchValue::Reference {
            kind,
            base_uri,
            resource_type: None,
            resource_id,
        } => SearchValue::Reference {
            kind,
            base_uri,
            resource_type: Some(target.to_string()),
            resource_id,
        },
        other => other,
    }
}

impl std::fmt::Debug for SearchIndexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchIndexer")
            .field("registry", &self.registry)
            .field("cached_target_types", &self.target_types.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::converters::CodeSystemResolver;
    use crate::definition::SearchParameterLoader;
    use crate::search_values::ReferenceKind;
    use crate::types::ResourceModel;
    use rust_decimal::Decimal;

    fn indexer() -> SearchIndexer {
        let model = ResourceModel::default();
        let registry = SearchParameterRegistry::new(model.clone());
        registry
            .build(&SearchParameterLoader::new(model.version()).load_embedded())
            .unwrap();
        let converters = ConverterRegistry::new(
            model.version(),
            ReferenceSearchValueParser::new(&model).unwrap(),
            CodeSystemResolver::new(),
        );
        SearchIndexer::new(Arc::new(registry), Arc::new(converters))
    }

    fn values_of<'a>(entries: &'a [SearchIndexEntry], code: &str) -> Vec<&'a SearchValue> {
        entries
            .iter()
            .filter(|e| e.search_parameter.code == code)
            .map(|e| &e.value)
            .collect()
    }

    fn reference(resource_type: &str, id: &str) -> SearchValue {
        SearchValue::Reference {
            kind: ReferenceKind::InternalOrExternal,
            base_uri: None,
            resource_type: Some(resource_type.to_string()),
            resource_id: id.to_string(),
        }
    }

    #[test]
    fn test_extract_patient() {
        let patient = JsonElement::from_resource(json!({
            "resourceType": "Patient",
            "id": "p1",
            "gender": "female",
            "birthDate": "1974-12",
            "name": [{ "family": "Chalmers", "given": ["Peter", "James"] }],
            "managingOrganization": { "reference": "1" }
        }));

        let entries = indexer().extract(&patient);

        assert!(values_of(&entries, "_type").is_empty());
        assert_eq!(values_of(&entries, "_id"), vec![&SearchValue::token(None, Some("p1".into()), None)]);
        assert_eq!(
            values_of(&entries, "gender"),
            vec![&SearchValue::token(
                Some("http://hl7.org/fhir/administrative-gender".into()),
                Some("female".into()),
                None
            )]
        );
        assert_eq!(values_of(&entries, "given").len(), 2);
        assert!(values_of(&entries, "name").contains(&&SearchValue::string("Chalmers")));
        assert!(matches!(
            values_of(&entries, "birthdate")[0],
            SearchValue::DateTime { .. }
        ));
        // The only possible target type is stamped on an untyped reference.
        assert_eq!(values_of(&entries, "organization"), vec![&reference("Organization", "1")]);
    }

    #[test]
    fn test_reference_targets_filter_and_resolve() {
        let observation = |subject: &str| {
            JsonElement::from_resource(json!({
                "resourceType": "Observation",
                "id": "o1",
                "subject": { "reference": subject }
            }))
        };
        let indexer = indexer();

        let entries = indexer.extract(&observation("Patient/123"));
        assert_eq!(values_of(&entries, "subject"), vec![&reference("Patient", "123")]);
        assert_eq!(values_of(&entries, "patient"), vec![&reference("Patient", "123")]);

        let entries = indexer.extract(&observation("Group/7"));
        assert_eq!(values_of(&entries, "subject"), vec![&reference("Group", "7")]);
        assert!(values_of(&entries, "patient").is_empty());

        let entries = indexer.extract(&observation("Substance/1"));
        assert!(values_of(&entries, "subject").is_empty());
    }

    #[test]
    fn test_composite_one_value_per_anchor() {
        let observation = JsonElement::from_resource(json!({
            "resourceType": "Observation",
            "id": "o1",
            "status": "final",
            "code": {
                "coding": [{ "system": "http://loinc.org", "code": "8480-6" }],
                "text": "Systolic"
            },
            "valueQuantity": {
                "value": 120,
                "unit": "mmHg",
                "system": "http://unitsofmeasure.org",
                "code": "mm[Hg]"
            }
        }));

        let entries = indexer().extract(&observation);
        let composites = values_of(&entries, "code-value-quantity");
        assert_eq!(composites.len(), 1);

        let SearchValue::Composite { components } = composites[0] else {
            panic!("expected a composite value");
        };
        assert_eq!(components.len(), 2);
        // The text-only token has neither system nor code.
        assert_eq!(
            components[0],
            vec![SearchValue::token(
                Some("http://loinc.org".into()),
                Some("8480-6".into()),
                None
            )]
        );
        assert_eq!(
            components[1],
            vec![SearchValue::quantity(
                Some("http://unitsofmeasure.org".into()),
                Some("mm[Hg]".into()),
                Decimal::from(120)
            )]
        );
    }

    #[test]
    fn test_composite_with_empty_component_is_skipped() {
        let observation = JsonElement::from_resource(json!({
            "resourceType": "Observation",
            "code": { "coding": [{ "system": "http://loinc.org", "code": "8480-6" }] },
            "valueString": "high"
        }));

        let entries = indexer().extract(&observation);
        assert!(values_of(&entries, "code-value-quantity").is_empty());
        assert_eq!(values_of(&entries, "code").len(), 1);
    }

    #[test]
    fn test_unknown_resource_type_yields_nothing() {
        let unknown = JsonElement::from_resource(json!({ "resourceType": "Spaceship", "id": "x" }));
        assert!(indexer().extract(&unknown).is_empty());
    }

    #[test]
    fn test_entry_equality_ignores_code_case() {
        let indexer = indexer();
        let patient = JsonElement::from_resource(json!({ "resourceType": "Patient", "id": "p1" }));
        let entry = indexer
            .extract(&patient)
            .into_iter()
            .find(|e| e.search_parameter.code == "_id")
            .unwrap();

        let mut renamed = SearchParameterInfo::clone(&entry.search_parameter);
        renamed.code = "_ID".to_string();
        let other = SearchIndexEntry::new(Arc::new(renamed), entry.value.clone());
        assert_eq!(entry, other);
    }

    #[test]
    fn test_lightweight_resolver() {
        let resolver =
            LightweightReferenceResolver::new(ReferenceSearchValueParser::new(&ResourceModel::default()).unwrap());
        let node = resolver.resolve("http://example.org/fhir/Patient/42").unwrap();
        assert_eq!(node.instance_type(), "Patient");
        assert_eq!(node.child_string("id").as_deref(), Some("42"));

        assert!(resolver.resolve("").is_none());
        assert!(resolver.resolve("just-an-id").is_none());
        assert!(resolver.resolve("Resource/1").is_none());
    }
}
