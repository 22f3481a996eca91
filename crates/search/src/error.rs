//! Error types for the search core.
//!
//! Build-time validation failures aggregate every problem found into a single
//! [`SearchError::DefinitionInvalid`]. Query-time failures are returned as
//! typed errors for the REST layer to translate into an OperationOutcome.
//! Path-evaluation and conversion problems during indexing are logged and
//! never surface as errors.

// Error enum variant fields are self-documenting via their #[error(...)] messages
#![allow(missing_docs)]

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type SearchResult<T> = std::result::Result<T, SearchError>;

/// The primary error type for definition lookups and query parsing.
#[derive(Error, Debug, Clone)]
pub enum SearchError {
    /// A definition bundle failed validation. Carries every issue found.
    #[error("{message}: {}", format_issues(.issues))]
    DefinitionInvalid {
        message: String,
        issues: Vec<OperationIssue>,
    },

    /// The search parameter is not known for the resource type (or URL).
    #[error("{}", describe_parameter(.resource_type.as_deref(), .code.as_deref(), .url.as_deref()))]
    ParameterNotSupported {
        resource_type: Option<String>,
        code: Option<String>,
        url: Option<String>,
    },

    /// The resource type is not known to the resource model.
    #[error("resource type '{resource_type}' is not supported")]
    ResourceTypeNotSupported { resource_type: String },

    /// The query is well formed but not allowed (ambiguous chain, abstract type, ...).
    #[error("search operation not supported: {message}")]
    SearchOperationNotSupported { message: String },

    /// The query key or value does not follow the search grammar.
    #[error("invalid search operation: {message}")]
    InvalidSearchOperation { message: String },

    /// Reading a definition bundle failed.
    #[error(transparent)]
    Loader(#[from] LoaderError),
}

impl SearchError {
    /// Parameter lookup failure by resource type and code.
    pub fn parameter_not_supported(resource_type: impl Into<String>, code: impl Into<String>) -> Self {
        SearchError::ParameterNotSupported {
            resource_type: Some(resource_type.into()),
            code: Some(code.into()),
            url: None,
        }
    }

    /// Parameter lookup failure by canonical URL.
    pub fn parameter_url_not_supported(url: impl Into<String>) -> Self {
        SearchError::ParameterNotSupported {
            resource_type: None,
            code: None,
            url: Some(url.into()),
        }
    }

    pub fn resource_type_not_supported(resource_type: impl Into<String>) -> Self {
        SearchError::ResourceTypeNotSupported {
            resource_type: resource_type.into(),
        }
    }

    pub fn not_supported(message: impl Into<String>) -> Self {
        SearchError::SearchOperationNotSupported {
            message: message.into(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        SearchError::InvalidSearchOperation {
            message: message.into(),
        }
    }

    /// Returns true for the lookup failures a chained search is allowed to skip.
    pub fn is_lookup_failure(&self) -> bool {
        matches!(
            self,
            SearchError::ParameterNotSupported { .. } | SearchError::ResourceTypeNotSupported { .. }
        )
    }

    /// Returns the aggregated issues of a definition failure.
    pub fn issues(&self) -> &[OperationIssue] {
        match self {
            SearchError::DefinitionInvalid { issues, .. } => issues,
            _ => &[],
        }
    }
}

fn describe_parameter(resource_type: Option<&str>, code: Option<&str>, url: Option<&str>) -> String {
    match (resource_type, code, url) {
        (Some(rt), Some(code), _) => {
            format!("search parameter '{}' is not supported for resource type '{}'", code, rt)
        }
        (_, _, Some(url)) => format!("search parameter '{}' is not supported", url),
        _ => "search parameter is not supported".to_string(),
    }
}

fn format_issues(issues: &[OperationIssue]) -> String {
    issues
        .iter()
        .map(|issue| issue.diagnostics.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Severity of a validation issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    Fatal,
    Error,
    Warning,
    Information,
}

/// One problem found while validating a definition bundle.
///
/// Mirrors the shape of an OperationOutcome issue so callers can report it
/// without translation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationIssue {
    pub severity: IssueSeverity,
    /// Issue type code (always `invalid` for definition problems).
    pub code: String,
    pub diagnostics: String,
}

impl OperationIssue {
    /// A fatal `invalid` issue, the kind raised for broken definitions.
    pub fn invalid(diagnostics: impl Into<String>) -> Self {
        Self {
            severity: IssueSeverity::Fatal,
            code: "invalid".to_string(),
            diagnostics: diagnostics.into(),
        }
    }
}

impl fmt::Display for OperationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {}", self.severity, self.diagnostics)
    }
}

/// Errors raised while reading definition bundles.
#[derive(Error, Debug, Clone)]
pub enum LoaderError {
    #[error("invalid JSON in '{source_name}': {message}")]
    InvalidJson { source_name: String, message: String },

    #[error("failed to read '{path}': {message}")]
    Io { path: String, message: String },

    #[error("expected a {expected} but found '{found}'")]
    UnexpectedResource { expected: String, found: String },
}

/// Errors raised by the path evaluator.
///
/// The indexer logs these and skips the affected parameter.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvaluationError {
    #[error("syntax error in '{expression}' at {position}: {message}")]
    Syntax {
        expression: String,
        position: usize,
        message: String,
    },

    #[error("function '{name}' is not supported")]
    UnsupportedFunction { name: String },

    #[error("expected a single value from '{expression}' but got {count}")]
    NotSingleton { expression: String, count: usize },
}

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read configuration '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid configuration: {}", .0.join(", "))]
    Invalid(Vec<String>),
}

/// Errors raised while assembling a [`SearchCatalog`](crate::SearchCatalog).
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Search(#[from] SearchError),

    #[error("failed to compile the reference pattern: {0}")]
    ReferencePattern(#[from] regex::Error),
}

impl From<LoaderError> for CatalogError {
    fn from(err: LoaderError) -> Self {
        CatalogError::Search(SearchError::Loader(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_definition_invalid_lists_every_issue() {
        let err = SearchError::DefinitionInvalid {
            message: "bundle contains invalid entries".to_string(),
            issues: vec![
                OperationIssue::invalid("entry 0 is not a SearchParameter"),
                OperationIssue::invalid("duplicate url http://example.org/sp"),
            ],
        };

        let text = err.to_string();
        assert!(text.contains("entry 0"));
        assert!(text.contains("duplicate url"));
        assert_eq!(err.issues().len(), 2);
    }

    #[test]
    fn test_parameter_not_supported_display() {
        let err = SearchError::parameter_not_supported("Patient", "foo");
        assert!(err.to_string().contains("'foo'"));
        assert!(err.to_string().contains("Patient"));
        assert!(err.is_lookup_failure());

        let err = SearchError::parameter_url_not_supported("http://example.org/sp");
        assert!(err.to_string().contains("http://example.org/sp"));
    }

    #[test]
    fn test_query_errors_are_not_lookup_failures() {
        assert!(!SearchError::invalid("missing type").is_lookup_failure());
        assert!(!SearchError::not_supported("ambiguous").is_lookup_failure());
        assert!(SearchError::resource_type_not_supported("Foo").is_lookup_failure());
    }

    #[test]
    fn test_config_error_joins_messages() {
        let err = ConfigError::Invalid(vec!["a".to_string(), "b".to_string()]);
        assert_eq!(err.to_string(), "invalid configuration: a, b");
    }
}
