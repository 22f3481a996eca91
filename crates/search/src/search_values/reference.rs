//! Reference string parsing.
//!
//! Splits `[base/]Type/id[/_history/version]` into its parts. Anything that
//! does not look like a resource reference is kept as an opaque id.

use regex::Regex;
use url::Url;

use super::SearchValue;
use crate::error::{SearchError, SearchResult};
use crate::types::ResourceModel;

/// Where a referenced resource lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ReferenceKind {
    /// On this server.
    Internal,
    /// On another server.
    External,
    /// Not known until the base URI is compared with the server's own.
    #[default]
    InternalOrExternal,
}

/// Parses reference strings into [`SearchValue::Reference`] values.
#[derive(Debug, Clone)]
pub struct ReferenceSearchValueParser {
    pattern: Regex,
    model: ResourceModel,
}

impl ReferenceSearchValueParser {
    /// Builds the parser for the type names of a resource model.
    pub fn new(model: &ResourceModel) -> Result<Self, regex::Error> {
        let names: Vec<String> = model.resource_type_names().map(regex::escape).collect();
        let pattern = Regex::new(&format!(
            r"(?:^|/)(?P<resourceType>{})/(?P<resourceId>[A-Za-z0-9\-\.]{{1,64}})(?:/_history/[A-Za-z0-9\-\.]{{1,64}})?",
            names.join("|")
        ))?;
        Ok(Self {
            pattern,
            model: model.clone(),
        })
    }

    /// Parses a reference.
    ///
    /// The last `Type/id` occurrence wins. When it starts the string the
    /// reference is relative; otherwise the preceding text must be an
    /// absolute URL or the whole string is kept as an opaque id.
    pub fn parse(&self, text: &str) -> SearchResult<SearchValue> {
        if let Some(captures) = self.pattern.captures_iter(text).last() {
            if let (Some(resource_type), Some(resource_id)) =
                (captures.name("resourceType"), captures.name("resourceId"))
            {
                let type_name = resource_type.as_str();
                if !self.model.is_known(type_name) || self.model.is_abstract(type_name) {
                    return Err(SearchError::resource_type_not_supported(type_name));
                }

                if resource_type.start() == 0 {
                    return Ok(SearchValue::Reference {
                        kind: ReferenceKind::InternalOrExternal,
                        base_uri: None,
                        resource_type: Some(type_name.to_string()),
                        resource_id: resource_id.as_str().to_string(),
                    });
                }

                if let Ok(base_uri) = Url::parse(&text[..resource_type.start()]) {
                    return Ok(SearchValue::Reference {
                        kind: ReferenceKind::InternalOrExternal,
                        base_uri: Some(base_uri),
                        resource_type: Some(type_name.to_string()),
                        resource_id: resource_id.as_str().to_string(),
                    });
                }
            }
        }

        Ok(SearchValue::Reference {
            kind: ReferenceKind::InternalOrExternal,
            base_uri: None,
            resource_type: None,
            resource_id: text.to_string(),
        })
    }
}
