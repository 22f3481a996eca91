//! Query compilation.
//!
//! [`ExpressionParser`] resolves the key of a query parameter against the
//! searchable definitions (following forward and reverse chains) and hands
//! the value to a [`SearchValueExpressionParser`] to build the leaves.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use helios_search::definition::{SearchParameterLoader, SearchParameterRegistry, SearchableDefinitions};
//! use helios_search::expression::{DefaultSearchValueExpressionParser, Expression, ExpressionParser};
//! use helios_search::search_values::ReferenceSearchValueParser;
//! use helios_search::types::ResourceModel;
//!
//! let model = ResourceModel::default();
//! let registry = SearchParameterRegistry::new(model.clone());
//! registry.build(&SearchParameterLoader::new(model.version()).load_embedded()).unwrap();
//!
//! let parser = ExpressionParser::new(
//!     Arc::new(SearchableDefinitions::new(Arc::new(registry), false)),
//!     Arc::new(DefaultSearchValueExpressionParser::new(
//!         ReferenceSearchValueParser::new(&model).unwrap(),
//!     )),
//! );
//!
//! let expression = parser.parse(&["Observation"], "patient.name", "Smith").unwrap();
//! assert!(matches!(expression, Expression::Chained { reversed: false, .. }));
//! ```

mod ast;
mod parser;
mod value_parser;

pub use ast::{
    BinaryOperator, Expression, FieldName, Literal, MultiaryOperator, StringOperator,
};
pub use parser::ExpressionParser;
pub use value_parser::{DefaultSearchValueExpressionParser, SearchValueExpressionParser};
