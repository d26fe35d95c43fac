//! Resource store abstraction: point-get and filtered-list against the
//! backing resource system, plus helpers for reading reference fields.

mod memory;

pub use memory::{InMemoryStore, StoreOp};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StoreResult;
use crate::graph::ResourceRef;

/// A resource instance as returned by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub kind: String,
    pub name: String,
    pub namespace: Option<String>,
    /// Full object body (`metadata`, `spec`, `status`, ...).
    #[serde(default)]
    pub data: Value,
}

/// A reference value read out of a resource's reference field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectReference {
    pub name: String,
    pub namespace: Option<String>,
}

impl Resource {
    pub fn new(kind: &str, name: &str, namespace: Option<&str>, data: Value) -> Self {
        Self {
            kind: kind.to_string(),
            name: name.to_string(),
            namespace: namespace.map(str::to_string),
            data,
        }
    }

    pub fn resource_ref(&self) -> ResourceRef {
        ResourceRef {
            kind: self.kind.clone(),
            name: self.name.clone(),
            namespace: self.namespace.clone(),
        }
    }

    /// Value at a field path, if every segment exists.
    pub fn field(&self, path: &[String]) -> Option<&Value> {
        path.iter().try_fold(&self.data, |value, segment| value.get(segment))
    }

    /// All references held at `field_path`.
    ///
    /// Accepts a `{name, namespace}` object, a bare name string, or an array
    /// of either; array items may nest the object under `ref`.
    pub fn references_at(&self, field_path: &[String]) -> Vec<ObjectReference> {
        let mut out = Vec::new();
        match self.field(field_path) {
            Some(Value::Array(items)) => {
                for item in items {
                    let item = item.get("ref").unwrap_or(item);
                    if let Some(r) = parse_reference(item) {
                        out.push(r);
                    }
                }
            }
            Some(value) => {
                if let Some(r) = parse_reference(value) {
                    out.push(r);
                }
            }
            None => {}
        }
        out
    }

    /// Rough heap footprint of the resource body in bytes.
    pub fn approx_size(&self) -> usize {
        self.kind.len() + self.name.len() + self.namespace.as_ref().map_or(0, String::len) + value_size(&self.data)
    }

    /// Whether the reference field at `field_path` points at `target`.
    ///
    /// A reference without a namespace is taken to mean this resource's own
    /// namespace. A cluster-scoped target matches on name alone.
    pub fn references(&self, field_path: &[String], target: &ResourceRef) -> bool {
        self.references_at(field_path).iter().any(|r| {
            if r.name != target.name {
                return false;
            }
            match target.namespace() {
                None => true,
                Some(ns) => r.namespace.as_deref().or(self.namespace.as_deref()) == Some(ns),
            }
        })
    }
}

fn value_size(value: &Value) -> usize {
    match value {
        Value::Null | Value::Bool(_) => 1,
        Value::Number(_) => 8,
        Value::String(s) => s.len(),
        Value::Array(items) => items.iter().map(|v| 8 + value_size(v)).sum(),
        Value::Object(map) => map.iter().map(|(k, v)| 8 + k.len() + value_size(v)).sum(),
    }
}

fn parse_reference(value: &Value) -> Option<ObjectReference> {
    match value {
        Value::String(name) if !name.is_empty() => Some(ObjectReference {
            name: name.clone(),
            namespace: None,
        }),
        Value::Object(map) => {
            let name = map.get("name")?.as_str()?;
            if name.is_empty() {
                return None;
            }
            Some(ObjectReference {
                name: name.to_string(),
                namespace: map
                    .get("namespace")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            })
        }
        _ => None,
    }
}

/// Server-side narrowing for `list` calls.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ListFilter {
    /// `key=value[,key=value]` matched against `metadata.labels`.
    pub label_selector: Option<String>,
    /// Maximum number of items per page.
    pub limit: Option<usize>,
    /// Token from the previous page's [`ResourcePage::continue_token`].
    pub continue_token: Option<String>,
}

impl ListFilter {
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Default::default()
        }
    }

    /// Same filter, positioned at the page `token` points to.
    pub fn resume(&self, token: impl Into<String>) -> Self {
        Self {
            continue_token: Some(token.into()),
            ..self.clone()
        }
    }

    /// Stable text form used in cache keys. The page position is not part
    /// of it.
    pub fn cache_fragment(&self) -> String {
        format!(
            "sel={};limit={}",
            self.label_selector.as_deref().unwrap_or(""),
            self.limit.map(|l| l.to_string()).unwrap_or_default()
        )
    }

    /// Whether a resource's labels satisfy the selector.
    pub fn matches_labels(&self, resource: &Resource) -> bool {
        let Some(selector) = &self.label_selector else {
            return true;
        };
        let labels = resource.data.get("metadata").and_then(|m| m.get("labels"));
        selector
            .split(',')
            .map(str::trim)
            .filter(|term| !term.is_empty())
            .all(|term| match term.split_once('=') {
                Some((key, expected)) => labels
                    .and_then(|l| l.get(key.trim()))
                    .and_then(Value::as_str)
                    .map(|actual| actual == expected.trim())
                    .unwrap_or(false),
                None => labels.and_then(|l| l.get(term)).is_some(),
            })
    }
}

/// One page of a `list` call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourcePage {
    pub items: Vec<Resource>,
    /// Set when more items remain; pass it back via [`ListFilter::resume`].
    pub continue_token: Option<String>,
}

/// Backing resource system. Implementations must be safe to call from many
/// tasks at once.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Fetch one resource by identity.
    async fn get(&self, kind: &str, name: &str, namespace: Option<&str>) -> StoreResult<Resource>;

    /// List one page of resources of `kind`, optionally within one namespace.
    async fn list(
        &self,
        kind: &str,
        namespace: Option<&str>,
        filter: &ListFilter,
    ) -> StoreResult<ResourcePage>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn path(p: &[&str]) -> Vec<String> {
        p.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_references_at_object() {
        let r = Resource::new(
            "XKubEnv",
            "demo-dev",
            Some("default"),
            json!({"spec": {"kubeClusterRef": {"name": "demo-cluster", "namespace": "infra"}}}),
        );
        let refs = r.references_at(&path(&["spec", "kubeClusterRef"]));
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].name, "demo-cluster");
        assert_eq!(refs[0].namespace.as_deref(), Some("infra"));
    }

    #[test]
    fn test_references_at_array_with_nested_ref() {
        let r = Resource::new(
            "XKubEnv",
            "demo-dev",
            Some("default"),
            json!({"spec": {"qualityGates": [
                {"ref": {"name": "security-scan"}, "required": true},
                {"name": "perf-test"},
                "lint",
                42
            ]}}),
        );
        let names: Vec<_> = r
            .references_at(&path(&["spec", "qualityGates"]))
            .into_iter()
            .map(|o| o.name)
            .collect();
        assert_eq!(names, vec!["security-scan", "perf-test", "lint"]);
    }

    #[test]
    fn test_references_missing_field() {
        let r = Resource::new("XApp", "a", None, json!({"spec": {}}));
        assert!(r.references_at(&path(&["spec", "kubenvRef"])).is_empty());
    }

    #[test]
    fn test_references_namespace_inherited() {
        let r = Resource::new(
            "XApp",
            "art-api",
            Some("default"),
            json!({"spec": {"kubenvRef": {"name": "demo-dev"}}}),
        );
        let field = path(&["spec", "kubenvRef"]);
        assert!(r.references(&field, &ResourceRef::namespaced("XKubEnv", "demo-dev", "default")));
        assert!(!r.references(&field, &ResourceRef::namespaced("XKubEnv", "demo-dev", "other")));
        assert!(r.references(&field, &ResourceRef::new("XKubEnv", "demo-dev", None)));
        assert!(!r.references(&field, &ResourceRef::new("XKubEnv", "demo-prod", None)));
    }

    #[test]
    fn test_label_selector() {
        let r = Resource::new(
            "XApp",
            "a",
            None,
            json!({"metadata": {"labels": {"team": "core", "tier": "api"}}}),
        );
        let mut filter = ListFilter::default();
        assert!(filter.matches_labels(&r));
        filter.label_selector = Some("team=core, tier=api".to_string());
        assert!(filter.matches_labels(&r));
        filter.label_selector = Some("team=edge".to_string());
        assert!(!filter.matches_labels(&r));
        filter.label_selector = Some("tier".to_string());
        assert!(filter.matches_labels(&r));
    }

    #[test]
    fn test_cache_fragment_is_stable() {
        let a = ListFilter::with_limit(100);
        let b = ListFilter::with_limit(100);
        assert_eq!(a.cache_fragment(), b.cache_fragment());
        assert_ne!(a.cache_fragment(), ListFilter::default().cache_fragment());
        // Page position never changes the key
        assert_eq!(a.resume("100").cache_fragment(), a.cache_fragment());
        assert_eq!(a.resume("100").limit, Some(100));
    }

    #[test]
    fn test_approx_size_grows_with_data() {
        let small = Resource::new("XApp", "a", None, json!({"spec": {}}));
        let large = Resource::new("XApp", "a", None, json!({"spec": {"blob": "x".repeat(1000)}}));
        assert!(small.approx_size() < 100);
        assert!(large.approx_size() > 1000);
    }
}
