//! In-memory resource store.
//!
//! Serves seeded resources and can inject per-kind failures and latency, which
//! makes it the store used by tests and local experiments.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, RwLock};
use std::time::Duration;

use super::{ListFilter, Resource, ResourcePage, ResourceStore};
use crate::error::{StoreError, StoreResult};
use crate::graph::ResourceRef;

/// Store operation, used to target injected faults and read call counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Get,
    List,
}

/// Thread-safe in-memory [`ResourceStore`].
#[derive(Default)]
pub struct InMemoryStore {
    resources: RwLock<BTreeMap<ResourceRef, Resource>>,
    failures: Mutex<HashMap<(String, StoreOp), StoreError>>,
    latency: Mutex<HashMap<String, Duration>>,
    calls: Mutex<HashMap<(String, StoreOp), usize>>,
}

fn poisoned(what: &str) -> StoreError {
    StoreError::Other(format!("in-memory store {} lock poisoned", what))
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store pre-populated with `resources`.
    pub fn with_resources(resources: impl IntoIterator<Item = Resource>) -> Self {
        let store = Self::new();
        for resource in resources {
            store.insert(resource);
        }
        store
    }

    /// Insert or replace a resource.
    pub fn insert(&self, resource: Resource) {
        if let Ok(mut map) = self.resources.write() {
            map.insert(resource.resource_ref(), resource);
        }
    }

    pub fn remove(&self, reference: &ResourceRef) -> Option<Resource> {
        self.resources.write().ok()?.remove(reference)
    }

    pub fn len(&self) -> usize {
        self.resources.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Make every `op` call for `kind` fail with `error` until cleared.
    pub fn fail(&self, kind: &str, op: StoreOp, error: StoreError) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.insert((kind.to_string(), op), error);
        }
    }

    pub fn clear_failure(&self, kind: &str, op: StoreOp) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.remove(&(kind.to_string(), op));
        }
    }

    /// Delay every call for `kind` by `delay`.
    pub fn set_latency(&self, kind: &str, delay: Duration) {
        if let Ok(mut latency) = self.latency.lock() {
            latency.insert(kind.to_string(), delay);
        }
    }

    /// Number of `op` calls made for `kind` so far.
    pub fn calls(&self, kind: &str, op: StoreOp) -> usize {
        self.calls
            .lock()
            .ok()
            .and_then(|c| c.get(&(kind.to_string(), op)).copied())
            .unwrap_or(0)
    }

    /// Total number of calls across all kinds and operations.
    pub fn total_calls(&self) -> usize {
        self.calls.lock().map(|c| c.values().sum()).unwrap_or(0)
    }

    async fn enter(&self, kind: &str, op: StoreOp) -> StoreResult<()> {
        {
            let mut calls = self.calls.lock().map_err(|_| poisoned("calls"))?;
            *calls.entry((kind.to_string(), op)).or_insert(0) += 1;
        }

        let delay = self
            .latency
            .lock()
            .map_err(|_| poisoned("latency"))?
            .get(kind)
            .copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let failure = self
            .failures
            .lock()
            .map_err(|_| poisoned("failures"))?
            .get(&(kind.to_string(), op))
            .cloned();
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ResourceStore for InMemoryStore {
    async fn get(&self, kind: &str, name: &str, namespace: Option<&str>) -> StoreResult<Resource> {
        self.enter(kind, StoreOp::Get).await?;

        let key = ResourceRef::new(kind, name, namespace);
        self.resources
            .read()
            .map_err(|_| poisoned("resources"))?
            .get(&key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn list(
        &self,
        kind: &str,
        namespace: Option<&str>,
        filter: &ListFilter,
    ) -> StoreResult<ResourcePage> {
        self.enter(kind, StoreOp::List).await?;

        // The continue token is the offset of the next item
        let offset = match &filter.continue_token {
            Some(token) => token
                .parse::<usize>()
                .map_err(|_| StoreError::Other(format!("invalid continue token: {}", token)))?,
            None => 0,
        };

        let resources = self.resources.read().map_err(|_| poisoned("resources"))?;
        let matching: Vec<&Resource> = resources
            .values()
            .filter(|r| r.kind == kind)
            .filter(|r| namespace.is_none() || r.namespace.as_deref() == namespace)
            .filter(|r| filter.matches_labels(r))
            .collect();

        let items: Vec<Resource> = matching
            .iter()
            .skip(offset)
            .take(filter.limit.unwrap_or(usize::MAX))
            .map(|r| (*r).clone())
            .collect();
        let next = offset + items.len();
        let continue_token = (next < matching.len()).then(|| next.to_string());

        Ok(ResourcePage {
            items,
            continue_token,
        })
    }
}
