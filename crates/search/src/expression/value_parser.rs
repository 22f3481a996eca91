//! Search value parsing.
//!
//! Turns the value half of `key=value` into leaf expressions for a resolved
//! parameter. Values separated by unescaped commas are alternatives; `\,`,
//! `\|`, `\$` and `\\` escape the separators.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use super::ast::{BinaryOperator, Expression, FieldName, StringOperator};
use crate::definition::SearchParameterInfo;
use crate::error::{SearchError, SearchResult};
use crate::search_values::{PartialDateTime, ReferenceSearchValueParser, SearchValue};
use crate::types::{SearchModifier, SearchParamType, SearchPrefix};

/// Builds the leaf expression for a resolved parameter, modifier and value.
pub trait SearchValueExpressionParser: Send + Sync {
    /// Parses `value` for `parameter`.
    fn parse(
        &self,
        parameter: &Arc<SearchParameterInfo>,
        modifier: Option<&SearchModifier>,
        value: &str,
    ) -> SearchResult<Expression>;
}

/// The standard FHIR value grammar for every parameter type.
#[derive(Debug, Clone)]
pub struct DefaultSearchValueExpressionParser {
    reference_parser: ReferenceSearchValueParser,
}

impl DefaultSearchValueExpressionParser {
    /// Creates a parser that uses `reference_parser` for reference values.
    pub fn new(reference_parser: ReferenceSearchValueParser) -> Self {
        Self { reference_parser }
    }

    fn parse_single(
        &self,
        parameter: &Arc<SearchParameterInfo>,
        modifier: Option<&SearchModifier>,
        text: &str,
    ) -> SearchResult<Expression> {
        match parameter.param_type {
            SearchParamType::Composite => self.composite(parameter, text),
            param_type => self.leaf(param_type, modifier, text, None),
        }
    }

    fn composite(&self, parameter: &Arc<SearchParameterInfo>, text: &str) -> SearchResult<Expression> {
        let parts = split_unescaped(text, '$');
        if parts.len() != parameter.components.len() {
            return Err(SearchError::invalid(format!(
                "composite search parameter '{}' expects {} values separated by '$'",
                parameter.code,
                parameter.components.len()
            )));
        }

        let components = parameter
            .components
            .iter()
            .zip(parts)
            .enumerate()
            .map(|(index, (component, part))| {
                let param_type = component.resolved_type().ok_or_else(|| {
                    SearchError::not_supported(format!(
                        "component {} of '{}' does not resolve to a search parameter",
                        index, parameter.code
                    ))
                })?;
                self.leaf(param_type, None, &part, Some(index))
            })
            .collect::<SearchResult<Vec<_>>>()?;

        Ok(Expression::Composite {
            parameter: Arc::clone(parameter),
            components,
        })
    }

    fn leaf(
        &self,
        param_type: SearchParamType,
        modifier: Option<&SearchModifier>,
        text: &str,
        component_index: Option<usize>,
    ) -> SearchResult<Expression> {
        if text.is_empty() {
            return Err(SearchError::invalid("search values cannot be empty"));
        }

        match param_type {
            SearchParamType::String => {
                let value = unescape(text);
                Ok(match modifier {
                    Some(SearchModifier::Exact) => Expression::string_match(
                        FieldName::String,
                        component_index,
                        StringOperator::Equals,
                        value,
                    ),
                    Some(SearchModifier::Contains) => Expression::string_match_ignore_case(
                        FieldName::String,
                        component_index,
                        StringOperator::Contains,
                        value,
                    ),
                    _ => Expression::string_match_ignore_case(
                        FieldName::String,
                        component_index,
                        StringOperator::StartsWith,
                        value,
                    ),
                })
            }

            SearchParamType::Uri => {
                let op = match modifier {
                    None => StringOperator::Equals,
                    Some(SearchModifier::Below) => StringOperator::StartsWith,
                    Some(SearchModifier::Contains) => StringOperator::Contains,
                    Some(other) => return Err(unsupported_modifier(other, param_type)),
                };
                Ok(Expression::string_match(FieldName::Uri, component_index, op, unescape(text)))
            }

            SearchParamType::Token => match modifier {
                None => token(text, component_index),
                Some(SearchModifier::Text) | Some(SearchModifier::CodeText) => {
                    Ok(Expression::string_match_ignore_case(
                        FieldName::TokenText,
                        component_index,
                        StringOperator::StartsWith,
                        unescape(text),
                    ))
                }
                Some(other) => Err(unsupported_modifier(other, param_type)),
            },

            SearchParamType::Number => {
                let (prefix, number) = SearchPrefix::extract(text);
                check_prefix(prefix, param_type)?;
                number_comparison(FieldName::Number, prefix, parse_decimal(number)?, component_index)
            }

            SearchParamType::Date => {
                let (prefix, date) = SearchPrefix::extract(text);
                check_prefix(prefix, param_type)?;
                Ok(date_comparison(prefix, &PartialDateTime::parse(date)?, component_index))
            }

            SearchParamType::Quantity => quantity(text, component_index),

            SearchParamType::Reference => match modifier {
                None => self.reference(text, component_index),
                Some(SearchModifier::Type(resource_type)) => Ok(Expression::and(vec![
                    Expression::string_match(
                        FieldName::ReferenceResourceType,
                        component_index,
                        StringOperator::Equals,
                        resource_type.clone(),
                    ),
                    Expression::string_match(
                        FieldName::ReferenceResourceId,
                        component_index,
                        StringOperator::Equals,
                        unescape(text),
                    ),
                ])),
                Some(other) => Err(unsupported_modifier(other, param_type)),
            },

            SearchParamType::Composite | SearchParamType::Special => Err(SearchError::not_supported(
                format!("searching {} parameters is not supported", param_type),
            )),
        }
    }

    fn reference(&self, text: &str, component_index: Option<usize>) -> SearchResult<Expression> {
        let SearchValue::Reference {
            base_uri,
            resource_type,
            resource_id,
            ..
        } = self.reference_parser.parse(&unescape(text))?
        else {
            return Err(SearchError::invalid(format!("'{}' is not a valid reference", text)));
        };

        let mut parts = Vec::new();
        if let Some(base_uri) = base_uri {
            parts.push(Expression::string_match(
                FieldName::ReferenceBaseUri,
                component_index,
                StringOperator::Equals,
                base_uri.to_string(),
            ));
        }
        if let Some(resource_type) = resource_type {
            parts.push(Expression::string_match(
                FieldName::ReferenceResourceType,
                component_index,
                StringOperator::Equals,
                resource_type,
            ));
        }
        parts.push(Expression::string_match(
            FieldName::ReferenceResourceId,
            component_index,
            StringOperator::Equals,
            resource_id,
        ));
        Ok(Expression::and(parts))
    }
}

impl SearchValueExpressionParser for DefaultSearchValueExpressionParser {
    fn parse(
        &self,
        parameter: &Arc<SearchParameterInfo>,
        modifier: Option<&SearchModifier>,
        value: &str,
    ) -> SearchResult<Expression> {
        if value.trim().is_empty() {
            return Err(SearchError::invalid(format!(
                "the value of search parameter '{}' cannot be empty",
                parameter.code
            )));
        }

        if let Some(modifier) = modifier {
            if !modifier.is_valid_for(parameter.param_type) {
                return Err(unsupported_modifier(modifier, parameter.param_type));
            }
        }

        match modifier {
            Some(SearchModifier::Missing) => {
                let is_missing = match value {
                    "true" => true,
                    "false" => false,
                    _ => {
                        return Err(SearchError::invalid(format!(
                            "':missing' expects 'true' or 'false' but got '{}'",
                            value
                        )));
                    }
                };
                return Ok(Expression::Missing {
                    parameter: Arc::clone(parameter),
                    is_missing,
                });
            }
            Some(SearchModifier::Not) => {
                return Ok(Expression::not(self.parse(parameter, None, value)?));
            }
            _ => {}
        }

        let alternatives = split_unescaped(value, ',')
            .iter()
            .map(|text| self.parse_single(parameter, modifier, text))
            .collect::<SearchResult<Vec<_>>>()?;

        Ok(Expression::search_parameter(
            Arc::clone(parameter),
            Expression::or(alternatives),
        ))
    }
}

fn unsupported_modifier(modifier: &SearchModifier, param_type: SearchParamType) -> SearchError {
    SearchError::invalid(format!(
        "modifier '{}' is not supported for {} search parameters",
        modifier, param_type
    ))
}

fn check_prefix(prefix: SearchPrefix, param_type: SearchParamType) -> SearchResult<()> {
    if prefix.is_valid_for(param_type) {
        Ok(())
    } else {
        Err(SearchError::invalid(format!(
            "prefix '{}' is not supported for {} search parameters",
            prefix, param_type
        )))
    }
}

fn parse_decimal(text: &str) -> SearchResult<Decimal> {
    text.parse::<Decimal>()
        .or_else(|_| Decimal::from_scientific(text))
        .map_err(|_| SearchError::invalid(format!("'{}' is not a valid number", text)))
}

fn token(text: &str, component_index: Option<usize>) -> SearchResult<Expression> {
    let parts = split_unescaped(text, '|');
    match parts.as_slice() {
        [code] => Ok(Expression::string_match(
            FieldName::TokenCode,
            component_index,
            StringOperator::Equals,
            unescape(code),
        )),
        [system, code] => {
            if system.is_empty() && code.is_empty() {
                return Err(SearchError::invalid("token value '|' has neither system nor code"));
            }
            let mut parts = Vec::with_capacity(2);
            if system.is_empty() {
                parts.push(Expression::MissingField {
                    field: FieldName::TokenSystem,
                    component_index,
                });
            } else {
                parts.push(Expression::string_match(
                    FieldName::TokenSystem,
                    component_index,
                    StringOperator::Equals,
                    unescape(system),
                ));
            }
            if !code.is_empty() {
                parts.push(Expression::string_match(
                    FieldName::TokenCode,
                    component_index,
                    StringOperator::Equals,
                    unescape(code),
                ));
            }
            Ok(Expression::and(parts))
        }
        _ => Err(SearchError::invalid(format!(
            "token value '{}' contains more than one '|'",
            text
        ))),
    }
}

fn quantity(text: &str, component_index: Option<usize>) -> SearchResult<Expression> {
    let parts = split_unescaped(text, '|');
    if parts.len() > 3 {
        return Err(SearchError::invalid(format!(
            "quantity value '{}' has more than three parts",
            text
        )));
    }

    let (prefix, number) = SearchPrefix::extract(&parts[0]);
    check_prefix(prefix, SearchParamType::Quantity)?;
    let mut expressions = vec![number_comparison(
        FieldName::Quantity,
        prefix,
        parse_decimal(number)?,
        component_index,
    )?];

    for (field, part) in [FieldName::QuantitySystem, FieldName::QuantityCode]
        .into_iter()
        .zip(parts.iter().skip(1))
    {
        if !part.is_empty() {
            expressions.push(Expression::string_match(
                field,
                component_index,
                StringOperator::Equals,
                unescape(part),
            ));
        }
    }

    Ok(Expression::and(expressions))
}

fn number_comparison(
    field: FieldName,
    prefix: SearchPrefix,
    value: Decimal,
    component_index: Option<usize>,
) -> SearchResult<Expression> {
    let op = match prefix {
        SearchPrefix::Eq => BinaryOperator::Equal,
        SearchPrefix::Ne => BinaryOperator::NotEqual,
        SearchPrefix::Gt => BinaryOperator::GreaterThan,
        SearchPrefix::Ge => BinaryOperator::GreaterThanOrEqual,
        SearchPrefix::Lt => BinaryOperator::LessThan,
        SearchPrefix::Le => BinaryOperator::LessThanOrEqual,
        SearchPrefix::Ap => {
            // Within 10% of the value.
            let bounds = value.abs().checked_mul(Decimal::new(1, 1)).and_then(|margin| {
                Some((value.checked_sub(margin)?, value.checked_add(margin)?))
            });
            let Some((low, high)) = bounds else {
                return Err(SearchError::invalid(format!(
                    "'{}' is out of range for an approximate comparison",
                    value
                )));
            };
            return Ok(Expression::and(vec![
                Expression::binary(field, component_index, BinaryOperator::GreaterThanOrEqual, low),
                Expression::binary(field, component_index, BinaryOperator::LessThanOrEqual, high),
            ]));
        }
        SearchPrefix::Sa | SearchPrefix::Eb => {
            return Err(SearchError::invalid(format!(
                "prefix '{}' is only supported for dates",
                prefix
            )));
        }
    };
    Ok(Expression::binary(field, component_index, op, value))
}

/// Compares the indexed range `[DateTimeStart, DateTimeEnd]` with the range
/// covered by the partial date.
fn date_comparison(
    prefix: SearchPrefix,
    date: &PartialDateTime,
    component_index: Option<usize>,
) -> Expression {
    use BinaryOperator::*;
    use FieldName::{DateTimeEnd, DateTimeStart};

    let (start, end) = date.range();
    let cmp = |field: FieldName, op: BinaryOperator, value: DateTime<Utc>| {
        Expression::binary(field, component_index, op, value)
    };

    match prefix {
        SearchPrefix::Eq => Expression::and(vec![
            cmp(DateTimeStart, GreaterThanOrEqual, start),
            cmp(DateTimeEnd, LessThanOrEqual, end),
        ]),
        SearchPrefix::Ne => Expression::or(vec![
            cmp(DateTimeStart, LessThan, start),
            cmp(DateTimeEnd, GreaterThan, end),
        ]),
        SearchPrefix::Gt => cmp(DateTimeEnd, GreaterThan, end),
        SearchPrefix::Ge => cmp(DateTimeEnd, GreaterThanOrEqual, start),
        SearchPrefix::Lt => cmp(DateTimeStart, LessThan, start),
        SearchPrefix::Le => cmp(DateTimeStart, LessThanOrEqual, end),
        SearchPrefix::Sa => cmp(DateTimeStart, GreaterThan, end),
        SearchPrefix::Eb => cmp(DateTimeEnd, LessThan, start),
        // Overlaps.
        SearchPrefix::Ap => Expression::and(vec![
            cmp(DateTimeStart, LessThanOrEqual, end),
            cmp(DateTimeEnd, GreaterThanOrEqual, start),
        ]),
    }
}

/// Splits on `separator`, leaving escape sequences in place for later
/// splits.
fn split_unescaped(text: &str, separator: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars();

    while let Some(c) = chars.next() {
        if c == '\\' {
            current.push(c);
            if let Some(escaped) = chars.next() {
                current.push(escaped);
            }
        } else if c == separator {
            parts.push(std::mem::take(&mut current));
        } else {
            current.push(c);
        }
    }
    parts.push(current);
    parts
}

fn unescape(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(&next) = chars.peek() {
                if matches!(next, ',' | '|' | '$' | '\\') {
                    result.push(next);
                    chars.next();
                    continue;
                }
            }
        }
        result.push(c);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{ComponentInfo, SupportStatus};
    use crate::expression::ast::{Literal, MultiaryOperator};
    use crate::types::ResourceModel;
    use chrono::TimeZone;

    fn parser() -> DefaultSearchValueExpressionParser {
        DefaultSearchValueExpressionParser::new(
            ReferenceSearchValueParser::new(&ResourceModel::default()).unwrap(),
        )
    }

    fn param(code: &str, param_type: SearchParamType) -> Arc<SearchParameterInfo> {
        Arc::new(SearchParameterInfo {
            url: format!("http://example.org/SearchParameter/{}", code),
            code: code.to_string(),
            name: None,
            description: None,
            param_type,
            expression: format!("Patient.{}", code),
            base_resource_types: vec!["Patient".to_string()],
            target_resource_types: vec![],
            components: vec![],
            status: SupportStatus::Enabled,
        })
    }

    fn inner(expression: Expression) -> Expression {
        match expression {
            Expression::SearchParameter { child, .. } => *child,
            other => panic!("expected a parameter scope, got {}", other),
        }
    }

    #[test]
    fn test_string_modifiers() {
        let name = param("name", SearchParamType::String);

        let default = inner(parser().parse(&name, None, "Smi").unwrap());
        assert_eq!(
            default,
            Expression::string_match_ignore_case(FieldName::String, None, StringOperator::StartsWith, "Smi")
        );

        let exact = inner(parser().parse(&name, Some(&SearchModifier::Exact), "Smith").unwrap());
        assert_eq!(
            exact,
            Expression::string_match(FieldName::String, None, StringOperator::Equals, "Smith")
        );

        let contains = inner(parser().parse(&name, Some(&SearchModifier::Contains), "mit").unwrap());
        assert!(matches!(
            contains,
            Expression::StringMatch {
                op: StringOperator::Contains,
                ignore_case: true,
                ..
            }
        ));
    }

    #[test]
    fn test_commas_are_alternatives() {
        let gender = param("gender", SearchParamType::Token);
        let expression = inner(parser().parse(&gender, None, r"male,fe\,male").unwrap());

        let Expression::Multiary {
            op: MultiaryOperator::Or,
            children,
        } = expression
        else {
            panic!("expected an or");
        };
        assert_eq!(
            children[1],
            Expression::string_match(FieldName::TokenCode, None, StringOperator::Equals, "fe,male")
        );
    }

    #[test]
    fn test_token_forms() {
        let identifier = param("identifier", SearchParamType::Token);

        let both = inner(parser().parse(&identifier, None, "http://acme.org|123").unwrap());
        assert_eq!(
            both,
            Expression::and(vec![
                Expression::string_match(
                    FieldName::TokenSystem,
                    None,
                    StringOperator::Equals,
                    "http://acme.org"
                ),
                Expression::string_match(FieldName::TokenCode, None, StringOperator::Equals, "123"),
            ])
        );

        let no_system = inner(parser().parse(&identifier, None, "|123").unwrap());
        let Expression::Multiary { children, .. } = no_system else {
            panic!("expected an and");
        };
        assert!(matches!(
            children[0],
            Expression::MissingField {
                field: FieldName::TokenSystem,
                ..
            }
        ));

        let system_only = inner(parser().parse(&identifier, None, "http://acme.org|").unwrap());
        assert!(matches!(
            system_only,
            Expression::StringMatch {
                field: FieldName::TokenSystem,
                ..
            }
        ));

        assert!(parser().parse(&identifier, None, "a|b|c").is_err());
    }

    #[test]
    fn test_missing_and_not() {
        let gender = param("gender", SearchParamType::Token);
        assert!(matches!(
            parser().parse(&gender, Some(&SearchModifier::Missing), "true").unwrap(),
            Expression::Missing { is_missing: true, .. }
        ));
        assert!(parser()
            .parse(&gender, Some(&SearchModifier::Missing), "maybe")
            .is_err());

        let not = parser().parse(&gender, Some(&SearchModifier::Not), "male").unwrap();
        assert!(matches!(not, Expression::Not(ref child) if matches!(**child, Expression::SearchParameter { .. })));
    }

    #[test]
    fn test_invalid_modifier_for_type() {
        let gender = param("gender", SearchParamType::Token);
        let err = parser()
            .parse(&gender, Some(&SearchModifier::Exact), "male")
            .unwrap_err();
        assert!(matches!(err, SearchError::InvalidSearchOperation { .. }));
    }

    #[test]
    fn test_date_prefixes() {
        let birthdate = param("birthdate", SearchParamType::Date);
        let start = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2020, 12, 31, 23, 59, 59).unwrap()
            + chrono::Duration::milliseconds(999);

        assert_eq!(
            inner(parser().parse(&birthdate, None, "2020").unwrap()),
            Expression::and(vec![
                Expression::binary(FieldName::DateTimeStart, None, BinaryOperator::GreaterThanOrEqual, start),
                Expression::binary(FieldName::DateTimeEnd, None, BinaryOperator::LessThanOrEqual, end),
            ])
        );
        assert_eq!(
            inner(parser().parse(&birthdate, None, "sa2020").unwrap()),
            Expression::binary(FieldName::DateTimeStart, None, BinaryOperator::GreaterThan, end)
        );
        assert!(parser().parse(&birthdate, None, "2020-13").is_err());
    }

    #[test]
    fn test_number_and_quantity() {
        let probability = param("probability", SearchParamType::Number);
        assert_eq!(
            inner(parser().parse(&probability, None, "gt0.8").unwrap()),
            Expression::binary(
                FieldName::Number,
                None,
                BinaryOperator::GreaterThan,
                Decimal::new(8, 1)
            )
        );
        assert!(parser().parse(&probability, None, "sa1").is_err());
        assert!(parser().parse(&probability, None, "abc").is_err());

        let approx = inner(parser().parse(&probability, None, "ap100").unwrap());
        let Expression::Multiary { children, .. } = approx else {
            panic!("expected an and");
        };
        assert!(matches!(
            &children[0],
            Expression::Binary { value: Literal::Decimal(d), .. } if *d == Decimal::from(90)
        ));

        let value = param("value-quantity", SearchParamType::Quantity);
        let expression =
            inner(parser().parse(&value, None, "le5.4|http://unitsofmeasure.org|mg").unwrap());
        let Expression::Multiary { children, .. } = expression else {
            panic!("expected an and");
        };
        assert_eq!(children.len(), 3);
        assert_eq!(
            children[2],
            Expression::string_match(FieldName::QuantityCode, None, StringOperator::Equals, "mg")
        );
    }

    #[test]
    fn test_approximate_out_of_range() {
        let value = param("value-quantity", SearchParamType::Quantity);
        let err = parser()
            .parse(&value, None, "ap79228162514264337593543950335")
            .unwrap_err();
        assert!(matches!(err, SearchError::InvalidSearchOperation { .. }));

        let probability = param("probability", SearchParamType::Number);
        assert!(parser()
            .parse(&probability, None, "ap-79228162514264337593543950335")
            .is_err());
    }

    #[test]
    fn test_reference_forms() {
        let mut subject = (*param("subject", SearchParamType::Reference)).clone();
        subject.target_resource_types = vec!["Patient".to_string(), "Group".to_string()];
        let subject = Arc::new(subject);

        let typed = inner(parser().parse(&subject, None, "Patient/123").unwrap());
        assert_eq!(
            typed,
            Expression::and(vec![
                Expression::string_match(
                    FieldName::ReferenceResourceType,
                    None,
                    StringOperator::Equals,
                    "Patient"
                ),
                Expression::string_match(
                    FieldName::ReferenceResourceId,
                    None,
                    StringOperator::Equals,
                    "123"
                ),
            ])
        );

        let bare = inner(parser().parse(&subject, None, "123").unwrap());
        assert!(matches!(
            bare,
            Expression::StringMatch {
                field: FieldName::ReferenceResourceId,
                ..
            }
        ));

        let restricted = inner(
            parser()
                .parse(&subject, Some(&SearchModifier::Type("Group".to_string())), "7")
                .unwrap(),
        );
        let Expression::Multiary { children, .. } = restricted else {
            panic!("expected an and");
        };
        assert_eq!(
            children[0],
            Expression::string_match(
                FieldName::ReferenceResourceType,
                None,
                StringOperator::Equals,
                "Group"
            )
        );
    }

    #[test]
    fn test_composite_components() {
        let mut composite = (*param("code-value-quantity", SearchParamType::Composite)).clone();
        composite.components = vec![
            ComponentInfo {
                definition_url: "http://example.org/code".to_string(),
                expression: "code".to_string(),
                resolved: Some(param("code", SearchParamType::Token)),
            },
            ComponentInfo {
                definition_url: "http://example.org/value".to_string(),
                expression: "value".to_string(),
                resolved: Some(param("value-quantity", SearchParamType::Quantity)),
            },
        ];
        let composite = Arc::new(composite);

        let expression = inner(
            parser()
                .parse(&composite, None, "http://loinc.org|8480-6$gt120")
                .unwrap(),
        );
        let Expression::Composite { components, .. } = expression else {
            panic!("expected a composite");
        };
        assert_eq!(components.len(), 2);
        assert_eq!(
            components[1],
            Expression::binary(
                FieldName::Quantity,
                Some(1),
                BinaryOperator::GreaterThan,
                Decimal::from(120)
            )
        );

        assert!(parser().parse(&composite, None, "8480-6").is_err());
    }

    #[test]
    fn test_split_and_unescape() {
        assert_eq!(split_unescaped(r"a\,b,c", ','), vec![r"a\,b", "c"]);
        assert_eq!(split_unescaped("a$", '$'), vec!["a", ""]);
        assert_eq!(unescape(r"a\,b\\c\d"), r"a,b\c\d");
    }
}
