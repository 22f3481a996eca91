//! The search expression tree.
//!
//! Trees are immutable once built. Leaves compare one indexed field of a
//! search parameter's values; inner nodes combine leaves, scope them to a
//! parameter, or follow references (chains and includes).

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;

use crate::definition::SearchParameterInfo;

/// The part of an indexed value a leaf compares.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldName {
    DateTimeStart,
    DateTimeEnd,
    Number,
    ParamName,
    QuantityCode,
    QuantitySystem,
    Quantity,
    ReferenceBaseUri,
    ReferenceResourceType,
    ReferenceResourceId,
    String,
    TokenCode,
    TokenSystem,
    TokenText,
    Uri,
}

impl fmt::Display for FieldName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Ordered comparisons on numbers and instants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOperator {
    /// `=`
    Equal,
    /// `!=`
    NotEqual,
    /// `>`
    GreaterThan,
    /// `>=`
    GreaterThanOrEqual,
    /// `<`
    LessThan,
    /// `<=`
    LessThanOrEqual,
}

impl BinaryOperator {
    fn symbol(self) -> &'static str {
        match self {
            BinaryOperator::Equal => "eq",
            BinaryOperator::NotEqual => "ne",
            BinaryOperator::GreaterThan => "gt",
            BinaryOperator::GreaterThanOrEqual => "ge",
            BinaryOperator::LessThan => "lt",
            BinaryOperator::LessThanOrEqual => "le",
        }
    }
}

/// String comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StringOperator {
    /// Whole-value match.
    Equals,
    /// Prefix match.
    StartsWith,
    /// Substring match.
    Contains,
}

/// Combinators for child expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MultiaryOperator {
    /// Every child matches.
    And,
    /// At least one child matches.
    Or,
}

/// The right-hand side of a [`Expression::Binary`] comparison.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Literal {
    Decimal(Decimal),
    DateTime(DateTime<Utc>),
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Decimal(d) => write!(f, "{}", d),
            Literal::DateTime(dt) => f.write_str(&dt.to_rfc3339_opts(SecondsFormat::Millis, true)),
        }
    }
}

impl From<Decimal> for Literal {
    fn from(value: Decimal) -> Self {
        Literal::Decimal(value)
    }
}

impl From<DateTime<Utc>> for Literal {
    fn from(value: DateTime<Utc>) -> Self {
        Literal::DateTime(value)
    }
}

/// A node of the search expression tree.
///
/// `component_index` is set on leaves that compare one component of a
/// composite parameter.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// `And` / `Or` over the children.
    Multiary {
        op: MultiaryOperator,
        children: Vec<Expression>,
    },

    /// Ordered comparison of a numeric or instant field.
    Binary {
        field: FieldName,
        component_index: Option<usize>,
        op: BinaryOperator,
        value: Literal,
    },

    /// String comparison of a textual field.
    StringMatch {
        field: FieldName,
        component_index: Option<usize>,
        op: StringOperator,
        value: String,
        ignore_case: bool,
    },

    /// The field has no value (e.g. a token without a system).
    MissingField {
        field: FieldName,
        component_index: Option<usize>,
    },

    /// `param:missing=true|false`.
    Missing {
        parameter: Arc<SearchParameterInfo>,
        is_missing: bool,
    },

    /// Scopes the child to the values of one search parameter.
    SearchParameter {
        parameter: Arc<SearchParameterInfo>,
        child: Box<Expression>,
    },

    /// Follows `parameter` from `resource_types` to `target_resource_types`
    /// (forward), or from referencing `resource_types` back to the searched
    /// types (reversed), and applies the child on the far side.
    Chained {
        resource_types: Vec<String>,
        parameter: Arc<SearchParameterInfo>,
        target_resource_types: Vec<String>,
        reversed: bool,
        child: Box<Expression>,
    },

    /// `_include` / `_revinclude`.
    Include {
        resource_types: Vec<String>,
        parameter: Option<Arc<SearchParameterInfo>>,
        source_type: Option<String>,
        target_type: Option<String>,
        referenced_types: Vec<String>,
        wildcard: bool,
        reversed: bool,
        iterate: bool,
    },

    /// Negation (`:not`).
    Not(Box<Expression>),

    /// One comparison per component, all of which must hold for the same
    /// composite value.
    Composite {
        parameter: Arc<SearchParameterInfo>,
        components: Vec<Expression>,
    },
}

impl Expression {
    /// `And` of the children; a single child is returned as is.
    pub fn and(children: Vec<Expression>) -> Self {
        Self::multiary(MultiaryOperator::And, children)
    }

    /// `Or` of the children; a single child is returned as is.
    pub fn or(children: Vec<Expression>) -> Self {
        Self::multiary(MultiaryOperator::Or, children)
    }

    fn multiary(op: MultiaryOperator, mut children: Vec<Expression>) -> Self {
        if children.len() == 1 {
            if let Some(only) = children.pop() {
                return only;
            }
        }
        Expression::Multiary { op, children }
    }

    /// Ordered comparison leaf.
    pub fn binary(
        field: FieldName,
        component_index: Option<usize>,
        op: BinaryOperator,
        value: impl Into<Literal>,
    ) -> Self {
        Expression::Binary {
            field,
            component_index,
            op,
            value: value.into(),
        }
    }

    /// Case-sensitive string comparison leaf.
    pub fn string_match(
        field: FieldName,
        component_index: Option<usize>,
        op: StringOperator,
        value: impl Into<String>,
    ) -> Self {
        Expression::StringMatch {
            field,
            component_index,
            op,
            value: value.into(),
            ignore_case: false,
        }
    }

    /// Case-insensitive string comparison leaf.
    pub fn string_match_ignore_case(
        field: FieldName,
        component_index: Option<usize>,
        op: StringOperator,
        value: impl Into<String>,
    ) -> Self {
        Expression::StringMatch {
            field,
            component_index,
            op,
            value: value.into(),
            ignore_case: true,
        }
    }

    /// Negates the expression.
    pub fn not(child: Expression) -> Self {
        Expression::Not(Box::new(child))
    }

    /// Scopes `child` to `parameter`.
    pub fn search_parameter(parameter: Arc<SearchParameterInfo>, child: Expression) -> Self {
        Expression::SearchParameter {
            parameter,
            child: Box::new(child),
        }
    }

    /// Returns the child of a scoping, chaining or negating node.
    pub fn child(&self) -> Option<&Expression> {
        match self {
            Expression::SearchParameter { child, .. }
            | Expression::Chained { child, .. }
            | Expression::Not(child) => Some(child),
            _ => None,
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let component = |index: &Option<usize>| match index {
            Some(i) => format!("[{}]", i),
            None => String::new(),
        };

        match self {
            Expression::Multiary { op, children } => {
                write!(f, "({:?}", op)?;
                for child in children {
                    write!(f, " {}", child)?;
                }
                f.write_str(")")
            }
            Expression::Binary {
                field,
                component_index,
                op,
                value,
            } => write!(f, "({} {}{} {})", op.symbol(), field, component(component_index), value),
            Expression::StringMatch {
                field,
                component_index,
                op,
                value,
                ignore_case,
            } => write!(
                f,
                "({:?}{} {}{} '{}')",
                op,
                if *ignore_case { "IgnoreCase" } else { "" },
                field,
                component(component_index),
                value
            ),
            Expression::MissingField {
                field,
                component_index,
            } => write!(f, "(MissingField {}{})", field, component(component_index)),
            Expression::Missing {
                parameter,
                is_missing,
            } => write!(f, "(Missing {} {})", parameter.code, is_missing),
            Expression::SearchParameter { parameter, child } => {
                write!(f, "(Param {} {})", parameter.code, child)
            }
            Expression::Chained {
                resource_types,
                parameter,
                target_resource_types,
                reversed,
                child,
            } => write!(
                f,
                "({} {} {} {} {})",
                if *reversed { "ReverseChain" } else { "Chain" },
                resource_types.join(","),
                parameter.code,
                target_resource_types.join(","),
                child
            ),
            Expression::Include {
                source_type,
                parameter,
                target_type,
                wildcard,
                reversed,
                iterate,
                ..
            } => {
                write!(f, "({}", if *reversed { "RevInclude" } else { "Include" })?;
                if *iterate {
                    f.write_str(":iterate")?;
                }
                if let Some(source) = source_type {
                    write!(f, " {}", source)?;
                }
                if *wildcard {
                    f.write_str(" *")?;
                } else if let Some(parameter) = parameter {
                    write!(f, " {}", parameter.code)?;
                }
                if let Some(target) = target_type {
                    write!(f, " {}", target)?;
                }
                f.write_str(")")
            }
            Expression::Not(child) => write!(f, "(Not {})", child),
            Expression::Composite {
                parameter,
                components,
            } => {
                write!(f, "(Composite {}", parameter.code)?;
                for c in components {
                    write!(f, " {}", c)?;
                }
                f.write_str(")")
            }
        }
    }
}
