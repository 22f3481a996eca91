//! Query key parsing.
//!
//! A query key is one of
//!
//! * `_has:Type:param:rest`, a reverse chain: resources of `Type` whose
//!   `param` references the searched resource and that match `rest`,
//! * `param[:Target].rest`, a forward chain through a reference parameter,
//! * `param[:modifier]`, a leaf handed to the value parser.
//!
//! Chains nest, so `rest` is parsed recursively against the types on the
//! far side of the reference.

use std::sync::Arc;

use tracing::debug;

use super::ast::Expression;
use super::value_parser::SearchValueExpressionParser;
use crate::definition::{SearchParameterDefinitions, SearchParameterInfo};
use crate::error::{SearchError, SearchResult};
use crate::types::{SearchModifier, SearchParamType};

const REVERSE_CHAIN_PREFIX: &str = "_has:";
const SPLIT: char = ':';
const CHAIN: char = '.';

/// Compiles query keys and `_include` directives into expression trees.
pub struct ExpressionParser {
    definitions: Arc<dyn SearchParameterDefinitions>,
    value_parser: Arc<dyn SearchValueExpressionParser>,
}

impl ExpressionParser {
    /// Creates a parser resolving parameters through `definitions`.
    pub fn new(
        definitions: Arc<dyn SearchParameterDefinitions>,
        value_parser: Arc<dyn SearchValueExpressionParser>,
    ) -> Self {
        Self {
            definitions,
            value_parser,
        }
    }

    /// Parses `key=value` searched against `resource_types`.
    ///
    /// When more than one resource type is searched, every parameter named
    /// in the key must resolve to the same definition for all of them.
    pub fn parse<S: AsRef<str>>(
        &self,
        resource_types: &[S],
        key: &str,
        value: &str,
    ) -> SearchResult<Expression> {
        if key.trim().is_empty() {
            return Err(SearchError::invalid("the search parameter name cannot be empty"));
        }
        if value.trim().is_empty() {
            return Err(SearchError::invalid(format!(
                "the value of search parameter '{}' cannot be empty",
                key
            )));
        }

        let resource_types = owned(resource_types)?;
        self.parse_key(&resource_types, key, value)
    }

    /// Parses an `_include` (or, when `reversed`, `_revinclude`) value.
    ///
    /// `*` and `Type:*` include everything the Reference parameters of the
    /// searched types can point at; `Source:param[:Target]` follows one
    /// parameter.
    pub fn parse_include<S: AsRef<str>>(
        &self,
        resource_types: &[S],
        value: &str,
        reversed: bool,
        iterate: bool,
    ) -> SearchResult<Expression> {
        let resource_types = owned(resource_types)?;
        let directive = if reversed { "_revinclude" } else { "_include" };

        let model = self.definitions.resource_model();
        if let Some(scoped) = resource_types.iter().find(|t| model.is_abstract(t)) {
            return Err(SearchError::not_supported(format!(
                "{} cannot be used when searching '{}'",
                directive, scoped
            )));
        }

        let (source_type, rest) = if value.trim() == "*" {
            (None, "*")
        } else {
            match value.split_once(SPLIT) {
                Some((source, rest)) if !source.is_empty() => (Some(source), rest),
                _ => {
                    return Err(SearchError::invalid(format!(
                        "{} value '{}' is missing the source resource type",
                        directive, value
                    )));
                }
            }
        };

        if let Some(source) = source_type {
            if model.is_abstract(source) {
                return Err(SearchError::not_supported(format!(
                    "{} cannot use the abstract resource type '{}'",
                    directive, source
                )));
            }
        }

        if rest == "*" {
            let mut referenced_types: Vec<String> = Vec::new();
            for resource_type in &resource_types {
                for parameter in self.definitions.get_search_parameters(resource_type)? {
                    if parameter.param_type != SearchParamType::Reference {
                        continue;
                    }
                    for target in &parameter.target_resource_types {
                        if !referenced_types.contains(target) {
                            referenced_types.push(target.clone());
                        }
                    }
                }
            }

            return Ok(Expression::Include {
                resource_types,
                parameter: None,
                source_type: source_type.map(str::to_string),
                target_type: None,
                referenced_types,
                wildcard: true,
                reversed,
                iterate,
            });
        }

        let (code, target_type) = match rest.split_once(SPLIT) {
            Some((code, target)) => (code, Some(target.to_string())),
            None => (rest, None),
        };
        let source = source_type.unwrap_or_default();
        let parameter = self.definitions.get_search_parameter(source, code)?;

        Ok(Expression::Include {
            resource_types,
            parameter: Some(parameter),
            source_type: Some(source.to_string()),
            target_type,
            referenced_types: Vec::new(),
            wildcard: false,
            reversed,
            iterate,
        })
    }

    fn parse_key(&self, resource_types: &[String], key: &str, value: &str) -> SearchResult<Expression> {
        if let Some(rest) = key.strip_prefix(REVERSE_CHAIN_PREFIX) {
            let (source_type, rest) = split_non_empty(rest)
                .ok_or_else(|| SearchError::invalid("_has is missing the referencing resource type"))?;
            let (code, rest) = split_non_empty(rest)
                .ok_or_else(|| SearchError::invalid("_has is missing the reference search parameter"))?;

            if self.definitions.resource_model().is_abstract(source_type) {
                return Err(SearchError::not_supported(format!(
                    "_has cannot use the abstract resource type '{}'",
                    source_type
                )));
            }

            let parameter = self.definitions.get_search_parameter(source_type, code)?;
            return self.parse_chain(
                &[source_type.to_string()],
                parameter,
                resource_types,
                rest,
                value,
                true,
            );
        }

        if let Some((head, rest)) = key.split_once(CHAIN) {
            let (code, target_types) = match head.split_once(SPLIT) {
                Some((code, target)) => (code, vec![target.to_string()]),
                None => (head, Vec::new()),
            };
            if code.is_empty() {
                return Err(SearchError::parameter_not_supported(&resource_types[0], key));
            }

            let parameter = self.common_parameter(resource_types, code)?;
            let model = self.definitions.resource_model();
            for target in &target_types {
                if !model.is_known(target) {
                    return Err(SearchError::invalid(format!(
                        "resource type '{}' is not supported",
                        target
                    )));
                }
            }
            let candidates = if target_types.is_empty() {
                parameter.target_resource_types.clone()
            } else {
                target_types
            };

            return self.parse_chain(resource_types, parameter, &candidates, rest, value, false);
        }

        let (code, modifier) = match key.split_once(SPLIT) {
            Some((code, modifier)) => (code, Some(modifier)),
            None => (key, None),
        };
        let parameter = self.common_parameter(resource_types, code)?;
        let modifier = modifier
            .map(|text| parse_modifier(&parameter, text))
            .transpose()?;

        self.value_parser.parse(&parameter, modifier.as_ref(), value)
    }

    /// Builds a chain through `parameter`.
    ///
    /// `candidates` are intersected with the parameter's targets. For a
    /// forward chain the rest of the key is parsed against each candidate and
    /// exactly one must accept it. For a reverse chain it is parsed against
    /// the referencing types and every accepting candidate is kept.
    fn parse_chain(
        &self,
        resource_types: &[String],
        parameter: Arc<SearchParameterInfo>,
        candidates: &[String],
        rest: &str,
        value: &str,
        reversed: bool,
    ) -> SearchResult<Expression> {
        if parameter.param_type != SearchParamType::Reference {
            return Err(SearchError::invalid(format!(
                "chained search parameter '{}' must be a reference search parameter",
                parameter.code
            )));
        }
        if rest.is_empty() {
            return Err(SearchError::invalid(format!(
                "chained search through '{}' is missing the target search parameter",
                parameter.code
            )));
        }

        let model = self.definitions.resource_model();
        let mut matched: Option<(Vec<String>, Expression)> = None;

        for candidate in candidates.iter().filter(|c| parameter.targets(c)) {
            if !reversed && model.is_abstract(candidate) {
                return Err(SearchError::not_supported(format!(
                    "chained search through '{}' cannot target the abstract resource type '{}'",
                    parameter.code, candidate
                )));
            }

            let scope = if reversed {
                resource_types.to_vec()
            } else {
                vec![candidate.clone()]
            };
            let child = match self.parse_key(&scope, rest, value) {
                Ok(child) => child,
                Err(e) if e.is_lookup_failure() => {
                    debug!(
                        parameter = %parameter.code,
                        target = %candidate,
                        error = %e,
                        "Skipping chain target"
                    );
                    continue;
                }
                Err(e) => return Err(e),
            };

            match &mut matched {
                None => matched = Some((vec![candidate.clone()], child)),
                Some((targets, _)) if reversed => targets.push(candidate.clone()),
                Some(_) => return Err(ambiguous_chain(&parameter)),
            }
        }

        let (target_resource_types, child) = matched.ok_or_else(|| {
            SearchError::not_supported(format!(
                "no target of '{}' supports the chained search '{}'",
                parameter.code, rest
            ))
        })?;

        Ok(Expression::Chained {
            resource_types: resource_types.to_vec(),
            parameter,
            target_resource_types,
            reversed,
            child: Box::new(child),
        })
    }

    /// Resolves `code` for every searched type and requires one definition.
    fn common_parameter(&self, resource_types: &[String], code: &str) -> SearchResult<Arc<SearchParameterInfo>> {
        let first = self.definitions.get_search_parameter(&resource_types[0], code)?;
        for resource_type in &resource_types[1..] {
            let other = self.definitions.get_search_parameter(resource_type, code)?;
            if other.url != first.url {
                return Err(SearchError::invalid(format!(
                    "search parameter '{}' must be common to '{}' and '{}'",
                    code, resource_types[0], resource_type
                )));
            }
        }
        Ok(first)
    }
}

impl std::fmt::Debug for ExpressionParser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpressionParser").finish_non_exhaustive()
    }
}

/// A modifier code, or the name of one of a reference parameter's targets.
fn parse_modifier(parameter: &SearchParameterInfo, text: &str) -> SearchResult<SearchModifier> {
    if let Some(modifier) = SearchModifier::from_literal(text) {
        return Ok(modifier);
    }

    if parameter.param_type == SearchParamType::Reference {
        if let Some(target) = parameter
            .target_resource_types
            .iter()
            .find(|t| t.eq_ignore_ascii_case(text))
        {
            return Ok(SearchModifier::Type(target.clone()));
        }
    }

    Err(SearchError::invalid(format!(
        "modifier '{}' is not supported for search parameter '{}'",
        text, parameter.code
    )))
}

fn ambiguous_chain(parameter: &SearchParameterInfo) -> SearchError {
    let alternatives: Vec<String> = parameter
        .target_resource_types
        .iter()
        .map(|t| format!("{}:{}", parameter.code, t))
        .collect();
    SearchError::not_supported(format!(
        "the chained search parameter '{}' is ambiguous, specify the target type: {}",
        parameter.name.as_deref().unwrap_or(&parameter.code),
        alternatives.join(" or ")
    ))
}

fn split_non_empty(text: &str) -> Option<(&str, &str)> {
    text.split_once(SPLIT).filter(|(head, _)| !head.is_empty())
}

fn owned<S: AsRef<str>>(resource_types: &[S]) -> SearchResult<Vec<String>> {
    if resource_types.is_empty() {
        return Err(SearchError::invalid("at least one resource type must be searched"));
    }
    Ok(resource_types.iter().map(|t| t.as_ref().to_string()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{SearchParameterLoader, SearchParameterRegistry, SearchableDefinitions};
    use crate::expression::ast::{FieldName, StringOperator};
    use crate::expression::DefaultSearchValueExpressionParser;
    use crate::search_values::ReferenceSearchValueParser;
    use crate::types::ResourceModel;

    fn parser() -> ExpressionParser {
        let model = ResourceModel::default();
        let registry = SearchParameterRegistry::new(model.clone());
        registry
            .build(&SearchParameterLoader::new(model.version()).load_embedded())
            .unwrap();
        let definitions = SearchableDefinitions::new(Arc::new(registry), false);
        let values = DefaultSearchValueExpressionParser::new(
            ReferenceSearchValueParser::new(&model).unwrap(),
        );
        ExpressionParser::new(Arc::new(definitions), Arc::new(values))
    }

    #[test]
    fn test_leaf() {
        let expression = parser().parse(&["Patient"], "name", "Smith").unwrap();
        let Expression::SearchParameter { parameter, child } = expression else {
            panic!("expected a parameter scope");
        };
        assert_eq!(parameter.code, "name");
        assert_eq!(
            *child,
            Expression::string_match_ignore_case(FieldName::String, None, StringOperator::StartsWith, "Smith")
        );
    }

    #[test]
    fn test_leaf_with_exact_modifier() {
        let expression = parser().parse(&["Patient"], "name:exact", "Smith").unwrap();
        assert!(matches!(
            expression.child(),
            Some(Expression::StringMatch {
                op: StringOperator::Equals,
                ignore_case: false,
                ..
            })
        ));
    }

    #[test]
    fn test_unknown_modifier() {
        let err = parser().parse(&["Patient"], "name:fuzzy", "Smith").unwrap_err();
        assert!(matches!(err, SearchError::InvalidSearchOperation { .. }));

        // Target types are only accepted for reference parameters.
        assert!(parser().parse(&["Patient"], "name:Patient", "Smith").is_err());
    }

    #[test]
    fn test_type_modifier_on_reference() {
        let expression = parser()
            .parse(&["Observation"], "subject:patient", "123")
            .unwrap();
        let Some(Expression::Multiary { children, .. }) = expression.child() else {
            panic!("expected an and");
        };
        assert_eq!(
            children[0],
            Expression::string_match(
                FieldName::ReferenceResourceType,
                None,
                StringOperator::Equals,
                "Patient"
            )
        );
    }

    #[test]
    fn test_unknown_parameter() {
        let err = parser().parse(&["Patient"], "shoe-size", "42").unwrap_err();
        assert!(matches!(err, SearchError::ParameterNotSupported { .. }));
    }

    #[test]
    fn test_parameter_must_be_common() {
        // `_id` is the same definition everywhere.
        assert!(parser().parse(&["Patient", "Observation"], "_id", "1").is_ok());

        let err = parser()
            .parse(&["Patient", "Practitioner"], "name", "Smith")
            .unwrap_err();
        assert!(err.to_string().contains("must be common"));
    }

    #[test]
    fn test_forward_chain_with_single_target() {
        let expression = parser().parse(&["Observation"], "patient.name", "Smith").unwrap();
        let Expression::Chained {
            resource_types,
            parameter,
            target_resource_types,
            reversed,
            child,
        } = expression
        else {
            panic!("expected a chain");
        };
        assert_eq!(resource_types, vec!["Observation"]);
        assert_eq!(parameter.code, "patient");
        assert_eq!(target_resource_types, vec!["Patient"]);
        assert!(!reversed);
        assert!(matches!(*child, Expression::SearchParameter { .. }));
    }

    #[test]
    fn test_forward_chain_ambiguous() {
        // Patient and Location both define `name`.
        let err = parser().parse(&["Observation"], "subject.name", "Smith").unwrap_err();
        assert!(matches!(err, SearchError::SearchOperationNotSupported { .. }));
        let message = err.to_string();
        assert!(message.contains("subject:Patient"));
        assert!(message.contains("subject:Location"));

        let scoped = parser()
            .parse(&["Observation"], "subject:Patient.name", "Smith")
            .unwrap();
        assert!(matches!(
            scoped,
            Expression::Chained { ref target_resource_types, .. } if target_resource_types == &["Patient"]
        ));
    }

    #[test]
    fn test_forward_chain_errors() {
        let p = parser();
        assert!(matches!(
            p.parse(&["Observation"], "code.name", "x"),
            Err(SearchError::InvalidSearchOperation { .. })
        ));
        assert!(matches!(
            p.parse(&["Observation"], "subject:Spaceship.name", "x"),
            Err(SearchError::InvalidSearchOperation { .. })
        ));
        // Encounter has no `gender`.
        assert!(matches!(
            p.parse(&["Observation"], "encounter.gender", "male"),
            Err(SearchError::SearchOperationNotSupported { .. })
        ));
        assert!(matches!(
            p.parse(&["Observation"], ".name", "x"),
            Err(SearchError::ParameterNotSupported { .. })
        ));
    }

    #[test]
    fn test_nested_chain() {
        let expression = parser()
            .parse(&["Observation"], "patient.organization.name", "Acme")
            .unwrap();
        let Some(Expression::Chained {
            target_resource_types,
            ..
        }) = expression.child()
        else {
            panic!("expected a nested chain");
        };
        assert_eq!(target_resource_types, &["Organization"]);
    }

    #[test]
    fn test_reverse_chain() {
        let expression = parser()
            .parse(&["Patient"], "_has:Observation:subject:code", "1234-5")
            .unwrap();
        let Expression::Chained {
            resource_types,
            parameter,
            target_resource_types,
            reversed,
            child,
        } = expression
        else {
            panic!("expected a chain");
        };
        assert!(reversed);
        assert_eq!(resource_types, vec!["Observation"]);
        assert_eq!(parameter.url, "http://hl7.org/fhir/SearchParameter/Observation-subject");
        assert_eq!(target_resource_types, vec!["Patient"]);
        let Expression::SearchParameter { parameter, .. } = *child else {
            panic!("expected a parameter scope");
        };
        assert_eq!(parameter.code, "code");
    }

    #[test]
    fn test_reverse_chain_unions_targets() {
        let expression = parser()
            .parse(&["Patient", "Group"], "_has:Observation:subject:code", "1234-5")
            .unwrap();
        assert!(matches!(
            expression,
            Expression::Chained { ref target_resource_types, .. }
                if target_resource_types == &["Patient", "Group"]
        ));
    }

    #[test]
    fn test_reverse_chain_errors() {
        let p = parser();
        assert!(matches!(
            p.parse(&["Patient"], "_has:Observation", "x"),
            Err(SearchError::InvalidSearchOperation { .. })
        ));
        assert!(matches!(
            p.parse(&["Patient"], "_has:Observation:subject", "x"),
            Err(SearchError::InvalidSearchOperation { .. })
        ));
        assert!(matches!(
            p.parse(&["Patient"], "_has:DomainResource:subject:code", "x"),
            Err(SearchError::SearchOperationNotSupported { .. })
        ));
        // Observation.subject cannot point at an Organization.
        assert!(matches!(
            p.parse(&["Organization"], "_has:Observation:subject:code", "x"),
            Err(SearchError::SearchOperationNotSupported { .. })
        ));
    }

    #[test]
    fn test_wildcard_include() {
        let expression = parser().parse_include(&["Patient"], "*", false, false).unwrap();
        let Expression::Include {
            parameter,
            referenced_types,
            wildcard,
            source_type,
            ..
        } = expression
        else {
            panic!("expected an include");
        };
        assert!(wildcard);
        assert!(parameter.is_none());
        assert!(source_type.is_none());
        // general-practitioner then organization, in code order.
        assert_eq!(
            referenced_types,
            vec!["Organization", "Practitioner", "PractitionerRole"]
        );

        let typed = parser().parse_include(&["Patient"], "Patient:*", false, true).unwrap();
        assert!(matches!(typed, Expression::Include { wildcard: true, iterate: true, .. }));
    }

    #[test]
    fn test_explicit_include() {
        let expression = parser()
            .parse_include(&["Observation"], "Observation:subject:Patient", false, false)
            .unwrap();
        let Expression::Include {
            parameter,
            source_type,
            target_type,
            wildcard,
            ..
        } = expression
        else {
            panic!("expected an include");
        };
        assert!(!wildcard);
        assert_eq!(parameter.unwrap().code, "subject");
        assert_eq!(source_type.as_deref(), Some("Observation"));
        assert_eq!(target_type.as_deref(), Some("Patient"));

        let reverse = parser()
            .parse_include(&["Patient"], "Observation:subject", true, false)
            .unwrap();
        assert!(matches!(reverse, Expression::Include { reversed: true, .. }));
    }

    #[test]
    fn test_include_errors() {
        let p = parser();
        assert!(matches!(
            p.parse_include(&["Patient"], "subject", false, false),
            Err(SearchError::InvalidSearchOperation { .. })
        ));
        assert!(matches!(
            p.parse_include(&["DomainResource"], "*", false, false),
            Err(SearchError::SearchOperationNotSupported { .. })
        ));
        assert!(matches!(
            p.parse_include(&["Patient", "Resource"], "*", false, false),
            Err(SearchError::SearchOperationNotSupported { .. })
        ));
        assert!(matches!(
            p.parse_include(&["Patient", "DomainResource"], "Patient:organization", true, false),
            Err(SearchError::SearchOperationNotSupported { .. })
        ));
        assert!(matches!(
            p.parse_include(&["Patient"], "Resource:_id", true, false),
            Err(SearchError::SearchOperationNotSupported { .. })
        ));
        assert!(matches!(
            p.parse_include(&["Patient"], "Observation:nothing", true, false),
            Err(SearchError::ParameterNotSupported { .. })
        ));
    }

    #[test]
    fn test_blank_input() {
        assert!(parser().parse(&["Patient"], " ", "x").is_err());
        assert!(parser().parse(&["Patient"], "name", "").is_err());
        let none: [&str; 0] = [];
        assert!(parser().parse(&none, "name", "x").is_err());
    }
}
