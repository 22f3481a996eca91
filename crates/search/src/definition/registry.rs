//! SearchParameter Registry.
//!
//! Parameters live in a single arena addressed by [`ParamId`]. The URL index
//! and the per-type `code` index both store ids, so a status change made
//! through one lookup is seen through the other. The per-type index holds
//! the resolved closure of each type: its own declarations plus everything
//! inherited through the [`TypeNode`] hierarchy.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use dashmap::DashMap;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::builder::{SearchParameterDefinitionBuilder, StagedDefinitions};
use super::{
    SearchParameterDefinitions, SearchParameterInfo, SupportStatus, UnsupportedSearchParameters,
};
use crate::error::{OperationIssue, SearchError, SearchResult};
use crate::navigation::Node;
use crate::types::{ResourceModel, TypeNode};

/// Stable handle of a parameter in the registry arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParamId(u64);

/// Update notification for registry changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryUpdate {
    /// A parameter was added.
    Added(String),
    /// A parameter was removed.
    Removed(String),
    /// A parameter's support status changed.
    StatusChanged(String, SupportStatus),
    /// The registry was rebuilt from a full bundle.
    Rebuilt,
}

type TypeIndex = HashMap<String, HashMap<String, ParamId>>;

/// In-memory registry of validated search parameters.
pub struct SearchParameterRegistry {
    model: ResourceModel,

    arena: DashMap<ParamId, Arc<SearchParameterInfo>>,

    /// Parameters indexed by canonical URL.
    by_url: DashMap<String, ParamId>,

    /// Parameters declared directly on each type, before inheritance.
    declared: DashMap<String, Vec<ParamId>>,

    /// Resolved parameters of each type, keyed by code.
    by_type: DashMap<String, HashMap<String, ParamId>>,

    hashes: DashMap<String, String>,

    next_id: AtomicU64,

    /// Serializes structural changes; readers never take it.
    write_lock: Mutex<()>,

    update_tx: broadcast::Sender<RegistryUpdate>,
}

impl SearchParameterRegistry {
    /// Creates an empty registry for a resource model.
    pub fn new(model: ResourceModel) -> Self {
        let (update_tx, _) = broadcast::channel(64);
        Self {
            model,
            arena: DashMap::new(),
            by_url: DashMap::new(),
            declared: DashMap::new(),
            by_type: DashMap::new(),
            hashes: DashMap::new(),
            next_id: AtomicU64::new(0),
            write_lock: Mutex::new(()),
            update_tx,
        }
    }

    /// The resource model.
    pub fn model(&self) -> &ResourceModel {
        &self.model
    }

    /// Number of registered parameters, attached or not.
    pub fn len(&self) -> usize {
        self.by_url.len()
    }

    /// Returns true if nothing has been registered.
    pub fn is_empty(&self) -> bool {
        self.by_url.is_empty()
    }

    /// Replaces the contents of the registry with a validated bundle.
    ///
    /// Returns the number of registered parameters. On failure the registry
    /// is left unchanged.
    pub fn build(&self, records: &[Node]) -> SearchResult<usize> {
        let _guard = self.write_lock.lock();

        let staged = SearchParameterDefinitionBuilder::new(&self.model).build(records, |_| None)?;
        let (params, declared) = self.assign_ids(staged, &HashMap::new());
        let type_index = self.resolve_closures(&declared, |id| params.get(&id).cloned())?;

        self.arena.clear();
        self.by_url.clear();
        self.declared.clear();
        for (id, param) in params {
            self.by_url.insert(param.url.clone(), id);
            self.arena.insert(id, param);
        }
        for (type_name, ids) in declared {
            self.declared.insert(type_name, ids);
        }
        self.replace_type_index(type_index);
        self.calculate_hashes();

        debug!(
            parameters = self.by_url.len(),
            resource_types = self.by_type.len(),
            "Rebuilt search parameter registry"
        );
        let _ = self.update_tx.send(RegistryUpdate::Rebuilt);
        Ok(self.by_url.len())
    }

    /// Validates and merges new definitions, recomputing every closure.
    ///
    /// Returns the URLs added. Definitions may refer to registered
    /// parameters as composite components; a URL that is already
    /// registered is a duplicate.
    pub fn add_new_search_parameters(&self, records: &[Node]) -> SearchResult<Vec<String>> {
        let _guard = self.write_lock.lock();

        let staged = SearchParameterDefinitionBuilder::new(&self.model)
            .build(records, |url| self.try_get_search_parameter_by_url(url))?;

        let current: HashMap<String, Vec<ParamId>> = self
            .declared
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        let (params, declared) = self.assign_ids(staged, &current);
        let type_index = self.resolve_closures(&declared, |id| {
            params
                .get(&id)
                .cloned()
                .or_else(|| self.arena.get(&id).map(|p| Arc::clone(p.value())))
        })?;

        let mut added = Vec::with_capacity(params.len());
        for (id, param) in params {
            self.by_url.insert(param.url.clone(), id);
            added.push(param.url.clone());
            self.arena.insert(id, param);
        }
        for (type_name, ids) in declared {
            self.declared.insert(type_name, ids);
        }
        self.replace_type_index(type_index);
        self.calculate_hashes();

        added.sort();
        for url in &added {
            let _ = self.update_tx.send(RegistryUpdate::Added(url.clone()));
        }
        Ok(added)
    }

    /// Removes a parameter from every type it applies to.
    pub fn delete_search_parameter(&self, url: &str) -> SearchResult<()> {
        let _guard = self.write_lock.lock();

        let (_, id) = self
            .by_url
            .remove(url)
            .ok_or_else(|| SearchError::parameter_url_not_supported(url))?;
        self.arena.remove(&id);

        for mut entry in self.declared.iter_mut() {
            entry.value_mut().retain(|declared| *declared != id);
        }
        for mut entry in self.by_type.iter_mut() {
            entry.value_mut().retain(|_, resolved| *resolved != id);
        }
        self.calculate_hashes();

        let _ = self.update_tx.send(RegistryUpdate::Removed(url.to_string()));
        Ok(())
    }

    /// Changes the support status of a parameter.
    pub fn update_status(&self, url: &str, status: SupportStatus) -> SearchResult<()> {
        let _guard = self.write_lock.lock();
        let id = self
            .by_url
            .get(url)
            .map(|entry| *entry.value())
            .ok_or_else(|| SearchError::parameter_url_not_supported(url))?;

        let mut entry = self
            .arena
            .get_mut(&id)
            .ok_or_else(|| SearchError::parameter_url_not_supported(url))?;
        let mut updated = SearchParameterInfo::clone(entry.value());
        updated.status = status;
        *entry.value_mut() = Arc::new(updated);
        drop(entry);

        let _ = self
            .update_tx
            .send(RegistryUpdate::StatusChanged(url.to_string(), status));
        Ok(())
    }

    /// Marks the listed parameters disabled or partially supported.
    ///
    /// Unknown URLs are logged and skipped. Returns the number of parameters
    /// whose status was set.
    pub fn apply_support_overrides(&self, overrides: &UnsupportedSearchParameters) -> usize {
        let updates = overrides
            .unsupported
            .iter()
            .map(|url| (url, SupportStatus::Disabled))
            .chain(
                overrides
                    .partial_support
                    .iter()
                    .map(|url| (url, SupportStatus::PartiallySupported)),
            );

        let mut applied = 0;
        for (url, status) in updates {
            match self.update_status(url, status) {
                Ok(()) => applied += 1,
                Err(_) => warn!(url = %url, "Support override for unknown search parameter"),
            }
        }
        applied
    }

    /// Every parameter applicable to a resource type, sorted by code.
    pub fn get_search_parameters(&self, resource_type: &str) -> SearchResult<Vec<Arc<SearchParameterInfo>>> {
        let index = self
            .by_type
            .get(resource_type)
            .ok_or_else(|| SearchError::resource_type_not_supported(resource_type))?;

        let mut params: Vec<_> = index
            .values()
            .filter_map(|id| self.arena.get(id).map(|p| Arc::clone(p.value())))
            .collect();
        params.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(params)
    }

    /// A parameter by resource type and code.
    pub fn get_search_parameter(&self, resource_type: &str, code: &str) -> SearchResult<Arc<SearchParameterInfo>> {
        self.try_get_search_parameter(resource_type, code)
            .ok_or_else(|| SearchError::parameter_not_supported(resource_type, code))
    }

    pub fn try_get_search_parameter(&self, resource_type: &str, code: &str) -> Option<Arc<SearchParameterInfo>> {
        let id = *self.by_type.get(resource_type)?.get(code)?;
        self.arena.get(&id).map(|p| Arc::clone(p.value()))
    }

    /// A parameter by canonical URL, attached to a type or not.
    pub fn get_search_parameter_by_url(&self, url: &str) -> SearchResult<Arc<SearchParameterInfo>> {
        self.try_get_search_parameter_by_url(url)
            .ok_or_else(|| SearchError::parameter_url_not_supported(url))
    }

    pub fn try_get_search_parameter_by_url(&self, url: &str) -> Option<Arc<SearchParameterInfo>> {
        let id = *self.by_url.get(url)?;
        self.arena.get(&id).map(|p| Arc::clone(p.value()))
    }

    /// Every registered parameter, sorted by URL.
    pub fn all_search_parameters(&self) -> Vec<Arc<SearchParameterInfo>> {
        let mut params: Vec<_> = self
            .arena
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        params.sort_by(|a, b| a.url.cmp(&b.url));
        params
    }

    /// The hash of the parameter set of a resource type.
    pub fn get_search_parameter_hash_for_resource_type(&self, resource_type: &str) -> Option<String> {
        self.hashes.get(resource_type).map(|hash| hash.value().clone())
    }

    /// A snapshot of every stored hash.
    pub fn search_parameter_hash_map(&self) -> BTreeMap<String, String> {
        self.hashes
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Overwrites stored hashes, e.g. with values already known to a store.
    pub fn update_search_parameter_hash_map<I>(&self, hashes: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (resource_type, hash) in hashes {
            self.hashes.insert(resource_type, hash);
        }
    }

    /// Subscribes to registry updates.
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryUpdate> {
        self.update_tx.subscribe()
    }

    fn assign_ids(
        &self,
        staged: StagedDefinitions,
        current: &HashMap<String, Vec<ParamId>>,
    ) -> (HashMap<ParamId, Arc<SearchParameterInfo>>, HashMap<String, Vec<ParamId>>) {
        let ids: Vec<ParamId> = staged
            .parameters
            .iter()
            .map(|_| ParamId(self.next_id.fetch_add(1, Ordering::Relaxed)))
            .collect();

        let mut declared = current.clone();
        for (type_name, index) in staged.attachments {
            declared.entry(type_name).or_default().push(ids[index]);
        }

        let params = ids.into_iter().zip(staged.parameters).collect();
        (params, declared)
    }

    /// Computes the closure of every known type. Two parameters with the
    /// same code in one closure fail the build.
    fn resolve_closures<F>(&self, declared: &HashMap<String, Vec<ParamId>>, param: F) -> SearchResult<TypeIndex>
    where
        F: Fn(ParamId) -> Option<Arc<SearchParameterInfo>>,
    {
        let mut resolved: TypeIndex = HashMap::new();
        let mut issues = Vec::new();

        for type_name in self.model.resource_type_names() {
            resolve_node(TypeNode::of(type_name), declared, &param, &mut resolved, &mut issues);
        }

        if issues.is_empty() {
            Ok(resolved)
        } else {
            Err(SearchError::DefinitionInvalid {
                message: "search parameter codes conflict".to_string(),
                issues,
            })
        }
    }

    fn replace_type_index(&self, type_index: TypeIndex) {
        self.by_type
            .retain(|type_name, _| type_index.contains_key(type_name));
        for (type_name, codes) in type_index {
            self.by_type.insert(type_name, codes);
        }
    }

    fn calculate_hashes(&self) {
        for entry in self.by_type.iter() {
            let mut lines: Vec<String> = entry
                .value()
                .iter()
                .filter_map(|(code, id)| {
                    self.arena
                        .get(id)
                        .map(|p| format!("{}|{}", code, p.value().url))
                })
                .collect();
            lines.sort();

            let digest = Sha256::digest(lines.join("\n").as_bytes());
            self.hashes.insert(entry.key().clone(), STANDARD.encode(digest));
        }
        debug!(resource_types = self.hashes.len(), "Recalculated search parameter hashes");
    }
}

/// Resolves one node of the hierarchy, memoizing into `resolved`.
fn resolve_node<F>(
    node: TypeNode<'_>,
    declared: &HashMap<String, Vec<ParamId>>,
    param: &F,
    resolved: &mut TypeIndex,
    issues: &mut Vec<OperationIssue>,
) where
    F: Fn(ParamId) -> Option<Arc<SearchParameterInfo>>,
{
    if resolved.contains_key(node.name()) {
        return;
    }

    let mut codes = match node.parent() {
        Some(parent) => {
            resolve_node(parent, declared, param, resolved, issues);
            resolved.get(parent.name()).cloned().unwrap_or_default()
        }
        None => HashMap::new(),
    };

    for id in declared.get(node.name()).into_iter().flatten() {
        let Some(info) = param(*id) else {
            continue;
        };
        match codes.get(&info.code) {
            Some(other) if other != id => {
                let other_url = param(*other).map(|p| p.url.clone()).unwrap_or_default();
                issues.push(OperationIssue::invalid(format!(
                    "code '{}' on '{}' is defined by both '{}' and '{}'",
                    info.code,
                    node.name(),
                    other_url,
                    info.url
                )));
            }
            _ => {
                codes.insert(info.code.clone(), *id);
            }
        }
    }

    resolved.insert(node.name().to_string(), codes);
}

impl SearchParameterDefinitions for SearchParameterRegistry {
    fn resource_model(&self) -> &ResourceModel {
        &self.model
    }

    fn get_search_parameters(&self, resource_type: &str) -> SearchResult<Vec<Arc<SearchParameterInfo>>> {
        SearchParameterRegistry::get_search_parameters(self, resource_type)
    }

    fn get_search_parameter(&self, resource_type: &str, code: &str) -> SearchResult<Arc<SearchParameterInfo>> {
        SearchParameterRegistry::get_search_parameter(self, resource_type, code)
    }

    fn get_search_parameter_by_url(&self, url: &str) -> SearchResult<Arc<SearchParameterInfo>> {
        SearchParameterRegistry::get_search_parameter_by_url(self, url)
    }
}

impl std::fmt::Debug for SearchParameterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchParameterRegistry")
            .field("version", &self.model.version())
            .field("params_count", &self.by_url.len())
            .field("resource_types", &self.by_type.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{RESOURCE_TYPE_PARAMETER_URL, SearchParameterLoader};
    use crate::navigation::JsonElement;
    use crate::types::SearchParamType;
    use serde_json::{Value, json};

    fn component_types(registry: &SearchParameterRegistry, url: &str) -> Vec<Option<SearchParamType>> {
        registry
            .get_search_parameter_by_url(url)
            .map(|p| p.components.iter().map(|c| c.resolved_type()).collect())
            .unwrap_or_default()
    }

    fn nodes(values: Vec<Value>) -> Vec<Node> {
        values
            .into_iter()
            .map(|v| JsonElement::from_resource(v).into_node())
            .collect()
    }

    fn param(id: &str, code: &str, kind: &str, base: &[&str], expression: &str) -> Value {
        json!({
            "resourceType": "SearchParameter",
            "url": format!("http://example.org/SearchParameter/{}", id),
            "code": code,
            "type": kind,
            "base": base,
            "expression": expression
        })
    }

    fn core_registry() -> SearchParameterRegistry {
        let model = ResourceModel::default();
        let records = SearchParameterLoader::new(model.version()).load_embedded();
        let registry = SearchParameterRegistry::new(model);
        registry.build(&records).unwrap();
        registry
    }

    #[test]
    fn test_resource_parameters_are_inherited() {
        let registry = core_registry();
        let resource: Vec<String> = registry
            .get_search_parameters("Resource")
            .unwrap()
            .iter()
            .map(|p| p.code.clone())
            .collect();
        assert!(resource.contains(&"_id".to_string()));
        assert!(resource.contains(&"_type".to_string()));

        for type_name in ["Patient", "Observation", "Account"] {
            let codes: Vec<String> = registry
                .get_search_parameters(type_name)
                .unwrap()
                .iter()
                .map(|p| p.code.clone())
                .collect();
            for code in &resource {
                assert!(codes.contains(code), "{} missing {}", type_name, code);
            }
        }
    }

    #[test]
    fn test_lookup_errors() {
        let registry = core_registry();
        assert!(matches!(
            registry.get_search_parameters("Spaceship"),
            Err(SearchError::ResourceTypeNotSupported { .. })
        ));
        assert!(matches!(
            registry.get_search_parameter("Patient", "nope"),
            Err(SearchError::ParameterNotSupported { .. })
        ));
        assert!(registry.get_search_parameter_by_url("http://example.org/none").is_err());
        assert!(registry.try_get_search_parameter("Patient", "nope").is_none());
    }

    #[test]
    fn test_excluded_parameters_are_registered_by_url_only() {
        let registry = core_registry();
        let text = registry
            .get_search_parameter_by_url("http://hl7.org/fhir/SearchParameter/DomainResource-text")
            .unwrap();
        assert_eq!(text.code, "_text");
        assert!(registry.try_get_search_parameter("Patient", "_text").is_none());
        assert!(registry.try_get_search_parameter("DomainResource", "_text").is_none());
    }

    #[test]
    fn test_composite_components_resolved() {
        let registry = core_registry();
        assert_eq!(
            component_types(
                &registry,
                "http://hl7.org/fhir/SearchParameter/Observation-code-value-quantity"
            ),
            vec![Some(SearchParamType::Token), Some(SearchParamType::Quantity)]
        );
    }

    #[test]
    fn test_build_is_idempotent() {
        let model = ResourceModel::default();
        let records = SearchParameterLoader::new(model.version()).load_embedded();
        let registry = SearchParameterRegistry::new(model);

        registry.build(&records).unwrap();
        let first = registry.search_parameter_hash_map();
        let count = registry.len();

        registry.build(&records).unwrap();
        assert_eq!(registry.search_parameter_hash_map(), first);
        assert_eq!(registry.len(), count);
    }

    #[test]
    fn test_failed_build_leaves_registry_unchanged() {
        let registry = core_registry();
        let before = registry.search_parameter_hash_map();

        let err = registry
            .build(&nodes(vec![json!({ "resourceType": "Patient" })]))
            .unwrap_err();
        assert!(matches!(err, SearchError::DefinitionInvalid { .. }));
        assert_eq!(registry.search_parameter_hash_map(), before);
        assert!(registry.try_get_search_parameter("Patient", "name").is_some());
    }

    #[test]
    fn test_add_and_delete_update_hash() {
        let registry = core_registry();
        let mut updates = registry.subscribe();
        let before = registry
            .get_search_parameter_hash_for_resource_type("Patient")
            .unwrap();
        let observation = registry.get_search_parameter_hash_for_resource_type("Observation");

        let added = registry
            .add_new_search_parameters(&nodes(vec![param(
                "Patient-nickname",
                "nickname",
                "string",
                &["Patient"],
                "Patient.name.where(use = 'nickname')",
            )]))
            .unwrap();
        assert_eq!(added, vec!["http://example.org/SearchParameter/Patient-nickname"]);
        assert_eq!(
            updates.try_recv().unwrap(),
            RegistryUpdate::Added("http://example.org/SearchParameter/Patient-nickname".to_string())
        );

        let after_add = registry
            .get_search_parameter_hash_for_resource_type("Patient")
            .unwrap();
        assert_ne!(before, after_add);
        assert_eq!(
            registry.get_search_parameter_hash_for_resource_type("Observation"),
            observation
        );

        registry
            .delete_search_parameter("http://example.org/SearchParameter/Patient-nickname")
            .unwrap();
        assert_eq!(
            registry
                .get_search_parameter_hash_for_resource_type("Patient")
                .unwrap(),
            before
        );
        assert!(registry.try_get_search_parameter("Patient", "nickname").is_none());
        assert!(matches!(updates.try_recv().unwrap(), RegistryUpdate::Removed(_)));
    }

    #[test]
    fn test_delete_removes_inherited_copies() {
        let registry = core_registry();
        registry
            .add_new_search_parameters(&nodes(vec![param(
                "Resource-source",
                "_source",
                "uri",
                &["Resource"],
                "Resource.meta.source",
            )]))
            .unwrap();
        assert!(registry.try_get_search_parameter("Observation", "_source").is_some());

        registry
            .delete_search_parameter("http://example.org/SearchParameter/Resource-source")
            .unwrap();
        for type_name in registry.model().resource_type_names() {
            assert!(registry.try_get_search_parameter(type_name, "_source").is_none());
        }

        assert!(matches!(
            registry.delete_search_parameter("http://example.org/SearchParameter/Resource-source"),
            Err(SearchError::ParameterNotSupported { .. })
        ));
    }

    #[test]
    fn test_conflicting_codes_are_rejected() {
        let registry = core_registry();
        let err = registry
            .add_new_search_parameters(&nodes(vec![param(
                "Patient-name-2",
                "name",
                "string",
                &["Patient"],
                "Patient.name.text",
            )]))
            .unwrap_err();
        assert!(err.to_string().contains("code 'name'"));
        assert!(registry
            .try_get_search_parameter_by_url("http://example.org/SearchParameter/Patient-name-2")
            .is_none());
    }

    #[test]
    fn test_status_change_is_visible_through_both_lookups() {
        let registry = core_registry();
        let url = "http://hl7.org/fhir/SearchParameter/Patient-name";

        registry.update_status(url, SupportStatus::Disabled).unwrap();
        assert_eq!(
            registry.get_search_parameter_by_url(url).unwrap().status,
            SupportStatus::Disabled
        );
        assert_eq!(
            registry.get_search_parameter("Patient", "name").unwrap().status,
            SupportStatus::Disabled
        );
    }

    #[test]
    fn test_support_overrides() {
        let registry = core_registry();
        let applied = registry.apply_support_overrides(&UnsupportedSearchParameters {
            unsupported: vec!["http://hl7.org/fhir/SearchParameter/Patient-family".to_string()],
            partial_support: vec![
                "http://hl7.org/fhir/SearchParameter/Patient-given".to_string(),
                "http://example.org/unknown".to_string(),
            ],
        });
        assert_eq!(applied, 2);
        assert!(!registry.get_search_parameter("Patient", "family").unwrap().is_supported());
        assert!(registry
            .get_search_parameter("Patient", "given")
            .unwrap()
            .is_partially_supported());
    }

    #[test]
    fn test_type_parameter_injected() {
        let registry = SearchParameterRegistry::new(ResourceModel::default());
        registry.build(&[]).unwrap();
        let type_param = registry.get_search_parameter("Patient", "_type").unwrap();
        assert_eq!(type_param.url, RESOURCE_TYPE_PARAMETER_URL);
        assert_eq!(type_param.param_type, SearchParamType::Token);
    }

    #[test]
    fn test_update_hash_map_overwrites() {
        let registry = core_registry();
        registry.update_search_parameter_hash_map([("Patient".to_string(), "stored".to_string())]);
        assert_eq!(
            registry
                .get_search_parameter_hash_for_resource_type("Patient")
                .as_deref(),
            Some("stored")
        );
    }
}
