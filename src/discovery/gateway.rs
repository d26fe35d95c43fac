//! Guarded access to the resource store.
//!
//! Every store call the engine makes goes through here: memoized in the TTL
//! cache, gated by the kind's circuit breaker, and bounded by a per-call
//! timeout.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::breaker::{CircuitBreakerRegistry, CircuitOpen};
use crate::cache::{keys, TtlCache};
use crate::error::{StoreError, StoreResult};
use crate::graph::{Direction, NamespaceScope, RelationshipEdge, ResourceRef};
use crate::store::{ListFilter, Resource, ResourcePage, ResourceStore};

/// Why an edge expansion (or part of it) produced nothing.
#[derive(Debug, Clone, PartialEq)]
pub enum EdgeFailure {
    CircuitOpen(CircuitOpen),
    Store(StoreError),
}

impl EdgeFailure {
    pub fn is_timeout(&self) -> bool {
        matches!(self, EdgeFailure::Store(StoreError::Timeout(_)))
    }
}

/// Resources one edge led to, and the first failure met along the way.
///
/// A forward edge holding several references can partly succeed, so
/// `resources` may be non-empty even when `failure` is set.
#[derive(Debug, Clone, Default)]
pub struct EdgeExpansion {
    pub resources: Vec<Resource>,
    pub failure: Option<EdgeFailure>,
}

impl EdgeExpansion {
    pub fn failed(failure: EdgeFailure) -> Self {
        Self {
            resources: Vec::new(),
            failure: Some(failure),
        }
    }
}

pub struct StoreGateway {
    store: Arc<dyn ResourceStore>,
    cache: Arc<TtlCache<Vec<Resource>>>,
    breakers: Arc<CircuitBreakerRegistry>,
    ttl: Duration,
    call_timeout: Duration,
    list_filter: ListFilter,
    store_calls: AtomicU64,
    failed_calls: AtomicU64,
}

impl StoreGateway {
    pub fn new(
        store: Arc<dyn ResourceStore>,
        cache: Arc<TtlCache<Vec<Resource>>>,
        breakers: Arc<CircuitBreakerRegistry>,
        ttl: Duration,
        call_timeout: Duration,
        list_filter: ListFilter,
    ) -> Self {
        Self {
            store,
            cache,
            breakers,
            ttl,
            call_timeout,
            list_filter,
            store_calls: AtomicU64::new(0),
            failed_calls: AtomicU64::new(0),
        }
    }

    pub fn cache(&self) -> &Arc<TtlCache<Vec<Resource>>> {
        &self.cache
    }

    pub fn breakers(&self) -> &CircuitBreakerRegistry {
        &self.breakers
    }

    /// Store calls issued (cache hits excluded).
    pub fn store_calls(&self) -> u64 {
        self.store_calls.load(Ordering::Relaxed)
    }

    /// Store calls that failed with an error other than not-found.
    pub fn failed_calls(&self) -> u64 {
        self.failed_calls.load(Ordering::Relaxed)
    }

    pub fn reset_counters(&self) {
        self.store_calls.store(0, Ordering::Relaxed);
        self.failed_calls.store(0, Ordering::Relaxed);
    }

    async fn timed<T, F>(&self, call: F, what: &str) -> StoreResult<T>
    where
        F: Future<Output = StoreResult<T>>,
    {
        self.store_calls.fetch_add(1, Ordering::Relaxed);
        let result = match tokio::time::timeout(self.call_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(format!(
                "{} did not answer within {:?}",
                what, self.call_timeout
            ))),
        };
        if let Err(e) = &result {
            if e.trips_breaker() {
                self.failed_calls.fetch_add(1, Ordering::Relaxed);
            }
        }
        result
    }

    /// Cached point-get that bypasses the breakers. Used for seeds.
    pub async fn get(&self, reference: &ResourceRef) -> StoreResult<Resource> {
        let key = keys::get_key(reference);
        if let Some(hit) = self.cache.get(&key).and_then(|v| v.into_iter().next()) {
            return Ok(hit);
        }
        let resource = self
            .timed(
                self.store
                    .get(&reference.kind, &reference.name, reference.namespace()),
                &format!("get {}", reference),
            )
            .await?;
        self.cache.set(key, vec![resource.clone()], self.ttl);
        Ok(resource)
    }

    /// Cached point-get gated by the breaker for `reference.kind`.
    pub async fn fetch(&self, reference: &ResourceRef) -> Result<Resource, EdgeFailure> {
        let key = keys::get_key(reference);
        if let Some(hit) = self.cache.get(&key).and_then(|v| v.into_iter().next()) {
            return Ok(hit);
        }

        let permit = self
            .breakers
            .acquire(&reference.kind)
            .map_err(EdgeFailure::CircuitOpen)?;
        let result = self
            .timed(
                self.store
                    .get(&reference.kind, &reference.name, reference.namespace()),
                &format!("get {}", reference),
            )
            .await;
        match result {
            Ok(resource) => {
                permit.success();
                self.cache.set(key, vec![resource.clone()], self.ttl);
                Ok(resource)
            }
            Err(e) if e.trips_breaker() => {
                permit.failure();
                Err(EdgeFailure::Store(e))
            }
            Err(e) => {
                permit.success();
                Err(EdgeFailure::Store(e))
            }
        }
    }

    /// Follow `edge` out of `source`.
    ///
    /// Forward edges get every referenced resource; reverse edges list the
    /// target kind page by page and keep the items whose reference field
    /// points back at `source`. Results are ordered by (namespace, name).
    pub async fn expand(&self, source: &Resource, edge: &RelationshipEdge) -> EdgeExpansion {
        let mut expansion = match edge.direction {
            Direction::Forward => self.expand_forward(source, edge).await,
            Direction::Reverse => self.expand_reverse(source, edge).await,
        };
        expansion
            .resources
            .sort_by(|a, b| (&a.namespace, &a.name).cmp(&(&b.namespace, &b.name)));
        expansion
    }

    async fn expand_forward(&self, source: &Resource, edge: &RelationshipEdge) -> EdgeExpansion {
        let mut expansion = EdgeExpansion::default();
        for reference in source.references_at(&edge.field_path) {
            let namespace = reference.namespace.as_deref().or(source.namespace.as_deref());
            let target = ResourceRef::new(&edge.target_kind, &reference.name, namespace);
            match self.fetch(&target).await {
                Ok(resource) => expansion.resources.push(resource),
                Err(EdgeFailure::Store(StoreError::NotFound(_))) => {
                    log::debug!("{} references missing {}", source.resource_ref(), target);
                }
                Err(failure) => {
                    log::debug!("Forward lookup of {} failed: {:?}", target, failure);
                    let open = matches!(failure, EdgeFailure::CircuitOpen(_));
                    expansion.failure.get_or_insert(failure);
                    if open {
                        break;
                    }
                }
            }
        }
        expansion
    }

    async fn expand_reverse(&self, source: &Resource, edge: &RelationshipEdge) -> EdgeExpansion {
        let identity = source.resource_ref();
        let scope = match edge.namespace_scope {
            NamespaceScope::Any => None,
            NamespaceScope::SameAsSource => source.namespace.as_deref(),
        };
        let key = keys::edge_key(
            Direction::Reverse,
            &edge.target_kind,
            &edge.field_path_str(),
            scope,
            &self.list_filter.cache_fragment(),
            &identity,
        );
        if let Some(hit) = self.cache.get(&key) {
            return EdgeExpansion {
                resources: hit,
                failure: None,
            };
        }

        let mut matches = Vec::new();
        let mut filter = self.list_filter.clone();
        loop {
            let page = match self.list_page(&edge.target_kind, scope, &filter).await {
                Ok(page) => page,
                // The kind is not served by this store
                Err(EdgeFailure::Store(StoreError::NotFound(_))) => break,
                Err(failure) => {
                    log::debug!("Reverse lookup {} failed: {:?}", edge, failure);
                    return EdgeExpansion {
                        resources: matches,
                        failure: Some(failure),
                    };
                }
            };
            matches.extend(
                page.items
                    .into_iter()
                    .filter(|item| item.references(&edge.field_path, &identity)),
            );
            match page.continue_token {
                Some(token) if filter.continue_token.as_deref() != Some(token.as_str()) => {
                    filter = filter.resume(token);
                }
                _ => break,
            }
        }

        self.cache.set(key, matches.clone(), self.ttl);
        EdgeExpansion {
            resources: matches,
            failure: None,
        }
    }

    /// One breaker-gated, timed `list` call.
    async fn list_page(
        &self,
        kind: &str,
        namespace: Option<&str>,
        filter: &ListFilter,
    ) -> Result<ResourcePage, EdgeFailure> {
        let permit = self.breakers.acquire(kind).map_err(EdgeFailure::CircuitOpen)?;
        let listed = self
            .timed(self.store.list(kind, namespace, filter), &format!("list {}", kind))
            .await;
        match listed {
            Ok(page) => {
                permit.success();
                Ok(page)
            }
            Err(e) if e.trips_breaker() => {
                permit.failure();
                Err(EdgeFailure::Store(e))
            }
            Err(e) => {
                permit.success();
                Err(EdgeFailure::Store(e))
            }
        }
    }
}
