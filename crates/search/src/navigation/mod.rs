//! Tree navigation over resource instances.
//!
//! The indexer and the definition builders never look at serialized
//! resources directly. They walk an [`ElementNode`] tree: each node knows its
//! FHIR type, its location in the resource and its primitive value, and can
//! evaluate a path expression relative to itself.
//!
//! [`JsonElement`] is the bundled implementation over `serde_json::Value`,
//! evaluated by the small path engine in [`path`]. A full FHIRPath engine can
//! be plugged in by implementing [`ElementNode`] for its node type.

mod json;
pub mod path;

use std::fmt;
use std::sync::Arc;

use rust_decimal::Decimal;

use crate::error::EvaluationError;

pub use json::JsonElement;

/// Shared handle to a navigable element.
pub type Node = Arc<dyn ElementNode>;

/// A primitive value held by a leaf element.
#[derive(Debug, Clone, PartialEq)]
pub enum Primitive {
    /// `boolean`
    Boolean(bool),
    /// `integer`, `positiveInt`, `unsignedInt`
    Integer(i64),
    /// `decimal`
    Decimal(Decimal),
    /// Every string-based primitive (`string`, `code`, `date`, `uri`, ...).
    String(String),
}

impl Primitive {
    /// The string form, for string-like values only.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Primitive::String(s) => Some(s),
            _ => None,
        }
    }

    /// The numeric value of an integer or decimal.
    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            Primitive::Integer(i) => Some(Decimal::from(*i)),
            Primitive::Decimal(d) => Some(*d),
            _ => None,
        }
    }

    /// The value of a boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Primitive::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Equality as used by the path engine: numbers compare numerically.
    pub fn equivalent(&self, other: &Primitive) -> bool {
        match (self.as_decimal(), other.as_decimal()) {
            (Some(a), Some(b)) => a == b,
            _ => self == other,
        }
    }
}

impl fmt::Display for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Primitive::Boolean(b) => write!(f, "{}", b),
            Primitive::Integer(i) => write!(f, "{}", i),
            Primitive::Decimal(d) => write!(f, "{}", d),
            Primitive::String(s) => f.write_str(s),
        }
    }
}

/// Resolves a reference string to the referenced resource.
///
/// Supplied to the evaluator for the `resolve()` function.
pub trait ReferenceResolver: Send + Sync {
    /// Returns the referenced resource, or `None` when it cannot be resolved.
    fn resolve(&self, reference: &str) -> Option<Node>;
}

/// Per-evaluation settings.
#[derive(Clone, Copy, Default)]
pub struct EvaluationContext<'a> {
    resolver: Option<&'a dyn ReferenceResolver>,
}

impl<'a> EvaluationContext<'a> {
    /// A context without a reference resolver; `resolve()` yields nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// A context that resolves references with the given resolver.
    pub fn with_resolver(resolver: &'a dyn ReferenceResolver) -> Self {
        Self {
            resolver: Some(resolver),
        }
    }

    /// The configured resolver.
    pub fn resolver(&self) -> Option<&'a dyn ReferenceResolver> {
        self.resolver
    }
}

impl fmt::Debug for EvaluationContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvaluationContext")
            .field("resolver", &self.resolver.is_some())
            .finish()
    }
}

/// A typed element of a resource tree.
pub trait ElementNode: Send + Sync + fmt::Debug {
    /// The FHIR type name of the element (`Patient`, `HumanName`, `date`, ...).
    fn instance_type(&self) -> &str;

    /// Dotted location of the element, with array indexers
    /// (`Patient.name[0].given[1]`).
    fn location(&self) -> &str;

    /// The primitive value, if the element is a primitive.
    fn value(&self) -> Option<Primitive>;

    /// Child elements with the given name, expanding arrays and choice types.
    fn children(&self, name: &str) -> Vec<Node>;

    /// Evaluates a path expression with this element as the focus.
    fn select(
        &self,
        expression: &str,
        ctx: &EvaluationContext<'_>,
    ) -> Result<Vec<Node>, EvaluationError>;

    /// Evaluates an expression expected to produce at most one element.
    fn scalar(
        &self,
        expression: &str,
        ctx: &EvaluationContext<'_>,
    ) -> Result<Option<Node>, EvaluationError> {
        let mut nodes = self.select(expression, ctx)?;
        match nodes.len() {
            0 => Ok(None),
            1 => Ok(nodes.pop()),
            count => Err(EvaluationError::NotSingleton {
                expression: expression.to_string(),
                count,
            }),
        }
    }

    /// The string value of the first child with the given name.
    fn child_string(&self, name: &str) -> Option<String> {
        self.children(name)
            .first()
            .and_then(|child| child.value())
            .map(|value| value.to_string())
    }

    /// The numeric value of the first child with the given name.
    fn child_decimal(&self, name: &str) -> Option<Decimal> {
        self.children(name)
            .first()
            .and_then(|child| child.value())
            .and_then(|value| value.as_decimal())
    }

    /// The string values of every child with the given name.
    fn child_strings(&self, name: &str) -> Vec<String> {
        self.children(name)
            .iter()
            .filter_map(|child| child.value())
            .map(|value| value.to_string())
            .collect()
    }
}
