//! Leveled breadth-first discovery.
//!
//! Each level expands every frontier resource over the edges that can still
//! lead to a requested kind. The expansions of one level run concurrently on
//! a bounded pool; the level ends when all of them finish or the level
//! deadline passes, whichever comes first. Results are merged in a fixed
//! order (frontier order, then declared edge order) so output does not
//! depend on task scheduling.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;

use super::gateway::{EdgeExpansion, EdgeFailure, StoreGateway};
use super::{DiscoveredResource, DiscoveryMethod, DiscoveryRequest, DiscoveryResult};
use crate::breaker::{CircuitBreakerRegistry, CircuitBreakerState};
use crate::cache::{keys, CacheStats, TtlCache};
use crate::config::{CacheConfig, Config, DiscoveryConfig};
use crate::error::StoreError;
use crate::graph::{Direction, RelationshipEdge, RelationshipGraph, ResourceRef};
use crate::store::{ListFilter, Resource, ResourceStore};
use crate::{PlatctxError, Result};

/// Counters and component state for one engine.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStats {
    pub runs: u64,
    pub discovered: u64,
    pub store_calls: u64,
    pub failed_store_calls: u64,
    pub success_rate: f64,
    pub store_cache: CacheStats,
    pub result_cache: CacheStats,
    pub breakers: BTreeMap<String, CircuitBreakerState>,
}

struct FrontierNode {
    resource: Arc<Resource>,
    /// Path from the seed's neighbor to this node; empty for the seed.
    chain: Vec<ResourceRef>,
}

/// Per-run traversal state.
struct Traversal<'a> {
    request: &'a DiscoveryRequest,
    requested: HashSet<String>,
    result: DiscoveryResult,
    visited: HashSet<ResourceRef>,
    per_kind: HashMap<String, usize>,
    saturated: HashSet<String>,
    reach: HashMap<String, Option<usize>>,
    /// Approximate bytes held by admitted resources.
    memory_used: usize,
    memory_exhausted: bool,
}

impl<'a> Traversal<'a> {
    fn new(request: &'a DiscoveryRequest) -> Self {
        Self {
            request,
            requested: request.requested_kinds.iter().cloned().collect(),
            result: DiscoveryResult::for_kinds(&request.requested_kinds),
            visited: HashSet::from([request.seed.clone()]),
            per_kind: HashMap::new(),
            saturated: HashSet::new(),
            reach: HashMap::new(),
            memory_used: 0,
            memory_exhausted: false,
        }
    }

    /// Whether following `edge` with `remaining` levels left can still reach
    /// a requested kind.
    fn is_relevant(&mut self, graph: &RelationshipGraph, edge: &RelationshipEdge, remaining: usize) -> bool {
        if self.requested.contains(&edge.target_kind) {
            return true;
        }
        let requested = &self.requested;
        let bidirectional = self.request.bidirectional;
        let hops = *self
            .reach
            .entry(edge.target_kind.clone())
            .or_insert_with(|| graph.hops_to_any(&edge.target_kind, requested, bidirectional));
        matches!(hops, Some(h) if h < remaining)
    }

    fn record_failure(&mut self, kind: &str, failure: &EdgeFailure) {
        match failure {
            EdgeFailure::Store(StoreError::NotFound(_)) => {}
            EdgeFailure::Store(StoreError::Timeout(_)) => {
                self.result.truncated = true;
            }
            EdgeFailure::CircuitOpen(_)
            | EdgeFailure::Store(StoreError::PermissionDenied(_))
            | EdgeFailure::Store(StoreError::Transient(_))
            | EdgeFailure::Store(StoreError::Other(_)) => {
                if self.result.degraded_kinds.insert(kind.to_string()) {
                    log::warn!("Discovery degraded for {}: {:?}", kind, failure);
                }
            }
        }
    }

    /// Admit one resource reached over `edge`; returns the new frontier node
    /// when it was not seen before and its kind still has budget.
    fn admit(
        &mut self,
        resource: Resource,
        parent: &FrontierNode,
        edge: &RelationshipEdge,
        depth: usize,
    ) -> Option<FrontierNode> {
        let reference = resource.resource_ref();
        if self.visited.contains(&reference) || self.memory_exhausted {
            return None;
        }

        let count = self.per_kind.entry(reference.kind.clone()).or_insert(0);
        if *count >= self.request.max_resources_per_kind {
            self.result.truncated = true;
            if self.saturated.insert(reference.kind.clone()) {
                log::info!(
                    "Budget of {} reached for {}, not expanding further",
                    self.request.max_resources_per_kind,
                    reference.kind
                );
            }
            return None;
        }

        let limit = self.request.memory_limit_bytes;
        let size = resource.approx_size();
        if limit > 0 && self.memory_used.saturating_add(size) > limit {
            self.result.truncated = true;
            self.memory_exhausted = true;
            log::warn!(
                "Memory budget of {} bytes reached ({} bytes held), stopping discovery",
                limit,
                self.memory_used
            );
            return None;
        }
        self.memory_used += size;
        *count += 1;
        self.visited.insert(reference.clone());

        let mut chain = parent.chain.clone();
        chain.push(reference);
        let resource = Arc::new(resource);

        if self.requested.contains(&resource.kind) {
            let method = DiscoveryMethod::at_depth(depth, edge.direction);
            self.result
                .by_kind
                .entry(resource.kind.clone())
                .or_default()
                .push(DiscoveredResource::new(resource.clone(), method, chain.clone()));
        }

        Some(FrontierNode { resource, chain })
    }
}

fn result_key(request: &DiscoveryRequest) -> String {
    keys::result_key(
        &request.seed,
        &request.requested_kinds,
        request.max_depth,
        request.max_resources_per_kind,
        request.memory_limit_bytes,
        request.bidirectional,
    )
}

/// Discovers resources related to a seed by walking the relationship graph.
///
/// Safe to share across tasks; concurrent runs share the caches, breakers
/// and worker pool.
pub struct DiscoveryEngine {
    graph: Arc<RelationshipGraph>,
    gateway: Arc<StoreGateway>,
    results: Arc<TtlCache<DiscoveryResult>>,
    pool: Arc<Semaphore>,
    config: DiscoveryConfig,
    cache_config: CacheConfig,
    runs: AtomicU64,
    discovered: AtomicU64,
}

impl DiscoveryEngine {
    pub fn new(graph: Arc<RelationshipGraph>, store: Arc<dyn ResourceStore>, config: &Config) -> Self {
        let cache_config = config.cache.clone();
        let (store_cache, results) = if cache_config.enabled {
            (
                TtlCache::new(cache_config.max_entries),
                TtlCache::new(cache_config.max_entries),
            )
        } else {
            (TtlCache::disabled(), TtlCache::disabled())
        };

        let gateway = StoreGateway::new(
            store,
            Arc::new(store_cache),
            Arc::new(CircuitBreakerRegistry::new(config.circuit_breaker.clone())),
            cache_config.ttl(),
            config.discovery.store_call_timeout(),
            ListFilter::with_limit(config.discovery.list_page_limit),
        );

        log::debug!(
            "Discovery engine ready: {} kinds, {} edges, {} workers",
            graph.kinds().len(),
            graph.edge_count(),
            config.discovery.worker_pool_size
        );

        Self {
            graph,
            gateway: Arc::new(gateway),
            results: Arc::new(results),
            pool: Arc::new(Semaphore::new(config.discovery.worker_pool_size.max(1))),
            config: config.discovery.clone(),
            cache_config,
            runs: AtomicU64::new(0),
            discovered: AtomicU64::new(0),
        }
    }

    pub fn graph(&self) -> &RelationshipGraph {
        &self.graph
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    pub(crate) fn gateway(&self) -> &StoreGateway {
        &self.gateway
    }

    /// Request for `seed` with this engine's configured budgets.
    pub fn request(&self, seed: ResourceRef, requested_kinds: Vec<String>) -> DiscoveryRequest {
        DiscoveryRequest::from_config(seed, requested_kinds, &self.config)
    }

    /// Run a bounded discovery from `request.seed`.
    ///
    /// Only a missing or unreachable seed is an error. Everything else
    /// (timeouts, budgets, failing kinds) yields a partial result flagged via
    /// `truncated` and `degraded_kinds`.
    pub async fn discover(&self, request: &DiscoveryRequest) -> Result<DiscoveryResult> {
        request.validate()?;
        let started = Instant::now();
        let cache_key = result_key(request);
        if let Some(cached) = self.results.get(&cache_key) {
            log::debug!("Discovery for {} served from result cache", request.seed);
            return Ok(cached);
        }

        let seed = self.fetch_seed(&request.seed, started + request.deadline).await?;
        Ok(self.traverse(request, seed, cache_key, started).await)
    }

    /// Like [`discover`](Self::discover), for a caller that already holds the
    /// seed resource.
    pub(crate) async fn discover_from(&self, request: &DiscoveryRequest, seed: Resource) -> Result<DiscoveryResult> {
        request.validate()?;
        let started = Instant::now();
        let cache_key = result_key(request);
        if let Some(cached) = self.results.get(&cache_key) {
            log::debug!("Discovery for {} served from result cache", request.seed);
            return Ok(cached);
        }
        Ok(self.traverse(request, seed, cache_key, started).await)
    }

    /// Get the seed through the store cache, bounded by `deadline`.
    pub(crate) async fn fetch_seed(&self, seed: &ResourceRef, deadline: Instant) -> Result<Resource> {
        match tokio::time::timeout_at(deadline, self.gateway.get(seed)).await {
            Ok(Ok(resource)) => Ok(resource),
            Ok(Err(source)) => Err(PlatctxError::SeedUnavailable {
                seed: seed.to_string(),
                source,
            }),
            Err(_) => Err(PlatctxError::SeedUnavailable {
                seed: seed.to_string(),
                source: StoreError::Timeout("deadline passed before the seed was fetched".to_string()),
            }),
        }
    }

    async fn traverse(
        &self,
        request: &DiscoveryRequest,
        seed: Resource,
        cache_key: String,
        started: Instant,
    ) -> DiscoveryResult {
        let deadline = started + request.deadline;
        self.runs.fetch_add(1, Ordering::Relaxed);
        log::info!(
            "Discovering {:?} from {} (depth {}, {})",
            request.requested_kinds,
            request.seed,
            request.max_depth,
            if request.bidirectional { "bidirectional" } else { "forward only" }
        );

        let mut run = Traversal::new(request);
        let mut frontier = vec![FrontierNode {
            resource: Arc::new(seed),
            chain: Vec::new(),
        }];

        for depth in 0..request.max_depth {
            if frontier.is_empty() || run.memory_exhausted {
                break;
            }
            let level_start = Instant::now();
            if level_start >= deadline {
                log::warn!("Discovery deadline passed before level {}", depth + 1);
                run.result.truncated = true;
                break;
            }

            let remaining = request.max_depth - depth;
            let mut tasks: Vec<(usize, RelationshipEdge)> = Vec::new();
            for (index, node) in frontier.iter().enumerate() {
                for edge in self.graph.edges_from(&node.resource.kind) {
                    if !request.bidirectional && edge.direction == Direction::Reverse {
                        continue;
                    }
                    if run.saturated.contains(&edge.target_kind) {
                        continue;
                    }
                    if run.is_relevant(&self.graph, edge, remaining) {
                        tasks.push((index, edge.clone()));
                    }
                }
            }
            if tasks.is_empty() {
                break;
            }

            let level_deadline = std::cmp::min(level_start + request.per_level_timeout, deadline);
            log::debug!(
                "Level {}: {} frontier resources, {} edge expansions",
                depth + 1,
                frontier.len(),
                tasks.len()
            );
            let outcomes = self.run_level(&frontier, &tasks, level_deadline).await;

            let mut next = Vec::new();
            for ((index, edge), outcome) in tasks.iter().zip(outcomes) {
                let Some(expansion) = outcome else {
                    run.result.truncated = true;
                    continue;
                };
                if let Some(failure) = &expansion.failure {
                    run.record_failure(&edge.target_kind, failure);
                }
                for resource in expansion.resources {
                    if let Some(node) = run.admit(resource, &frontier[*index], edge, depth) {
                        next.push(node);
                    }
                }
            }
            frontier = next;
        }

        let result = run.result;
        let total = result.total();
        self.discovered.fetch_add(total as u64, Ordering::Relaxed);
        log::info!(
            "Discovered {} resources from {} in {:?} (truncated: {}, degraded: {:?})",
            total,
            request.seed,
            started.elapsed(),
            result.truncated,
            result.degraded_kinds
        );

        if !result.truncated && result.degraded_kinds.is_empty() {
            self.results
                .set(cache_key, result.clone(), self.cache_config.result_ttl());
        }
        result
    }

    /// Expand all `tasks` concurrently, stopping at `level_deadline`.
    ///
    /// Slot `i` of the returned vector holds the outcome of `tasks[i]`, or
    /// `None` if it did not complete in time.
    async fn run_level(
        &self,
        frontier: &[FrontierNode],
        tasks: &[(usize, RelationshipEdge)],
        level_deadline: Instant,
    ) -> Vec<Option<EdgeExpansion>> {
        let mut outcomes: Vec<Option<EdgeExpansion>> = (0..tasks.len()).map(|_| None).collect();
        let mut join_set = JoinSet::new();

        for (slot, (index, edge)) in tasks.iter().enumerate() {
            let gateway = self.gateway.clone();
            let pool = self.pool.clone();
            let source = frontier[*index].resource.clone();
            let edge = edge.clone();
            join_set.spawn(async move {
                let _worker = match pool.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        let failure = EdgeFailure::Store(StoreError::Other("worker pool closed".to_string()));
                        return (slot, EdgeExpansion::failed(failure));
                    }
                };
                (slot, gateway.expand(&source, &edge).await)
            });
        }

        loop {
            match tokio::time::timeout_at(level_deadline, join_set.join_next()).await {
                Ok(Some(Ok((slot, expansion)))) => outcomes[slot] = Some(expansion),
                Ok(Some(Err(e))) => log::warn!("Edge expansion task failed: {}", e),
                Ok(None) => break,
                Err(_) => {
                    log::warn!(
                        "Level timed out with {} edge expansions still running",
                        join_set.len()
                    );
                    join_set.abort_all();
                    break;
                }
            }
        }

        outcomes
    }

    pub fn stats(&self) -> EngineStats {
        let store_calls = self.gateway.store_calls();
        let failed = self.gateway.failed_calls();
        let success_rate = if store_calls == 0 {
            1.0
        } else {
            (store_calls - failed.min(store_calls)) as f64 / store_calls as f64
        };
        EngineStats {
            runs: self.runs.load(Ordering::Relaxed),
            discovered: self.discovered.load(Ordering::Relaxed),
            store_calls,
            failed_store_calls: failed,
            success_rate,
            store_cache: self.gateway.cache().stats(),
            result_cache: self.results.stats(),
            breakers: self.gateway.breakers().snapshot(),
        }
    }

    /// Zero the run and store-call counters. Breakers and caches are kept.
    pub fn reset_stats(&self) {
        self.runs.store(0, Ordering::Relaxed);
        self.discovered.store(0, Ordering::Relaxed);
        self.gateway.reset_counters();
    }

    /// Unhealthy when fewer than half of the store calls succeed or more than
    /// half of the breakers are open.
    pub fn is_healthy(&self) -> bool {
        let stats = self.stats();
        if stats.store_calls > 0 && stats.success_rate < 0.5 {
            return false;
        }
        let open = self.gateway.breakers().open_kinds().len();
        open * 2 <= stats.breakers.len()
    }

    /// Drop every cached store call and result.
    pub fn clear_cache(&self) {
        self.gateway.cache().clear();
        self.results.clear();
        log::info!("Discovery caches cleared");
    }

    pub fn reset_breakers(&self) {
        self.gateway.breakers().reset_all();
    }

    /// Start background sweepers that purge expired cache entries.
    ///
    /// Returns no handles when caching or sweeping is disabled.
    pub fn spawn_cache_sweepers(&self) -> Vec<JoinHandle<()>> {
        if !self.cache_config.enabled || self.cache_config.sweep_interval_secs == 0 {
            return Vec::new();
        }
        let interval = Duration::from_secs(self.cache_config.sweep_interval_secs);
        vec![
            self.gateway.cache().spawn_sweeper(interval),
            self.results.spawn_sweeper(interval),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::fixtures::{self, chain_graph, chain_kinds, chain_store, project, resource, test_config, NS};
    use crate::graph::platform;
    use crate::store::{InMemoryStore, StoreOp};
    use serde_json::json;

    fn engine(store: Arc<InMemoryStore>) -> DiscoveryEngine {
        DiscoveryEngine::new(chain_graph(), store, &test_config())
    }

    fn names(result: &DiscoveryResult, kind: &str) -> Vec<String> {
        result.kind(kind).iter().map(|d| d.reference.name.clone()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_transitive_chain() {
        let engine = engine(chain_store());
        let request = engine.request(project(), chain_kinds());
        let result = engine.discover(&request).await.unwrap();

        assert!(!result.truncated);
        assert!(result.degraded_kinds.is_empty());
        assert_eq!(names(&result, platform::KUBE_CLUSTER), vec!["demo-cluster"]);
        assert_eq!(names(&result, platform::KUBENV), vec!["demo-dev"]);
        assert_eq!(names(&result, platform::APP), vec!["art-api"]);

        let cluster = &result.kind(platform::KUBE_CLUSTER)[0];
        assert_eq!(cluster.discovery_method, DiscoveryMethod::Reverse);
        assert_eq!(cluster.hops, 1);

        let app = &result.kind(platform::APP)[0];
        assert_eq!(app.discovery_method, DiscoveryMethod::Transitive(3));
        assert_eq!(app.hops, 3);
        assert_eq!(
            app.relationship_chain,
            vec![
                ResourceRef::namespaced(platform::KUBE_CLUSTER, "demo-cluster", NS),
                ResourceRef::namespaced(platform::KUBENV, "demo-dev", NS),
                ResourceRef::namespaced(platform::APP, "art-api", NS),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_permission_denied_on_intermediate_kind() {
        let store = chain_store();
        store.fail(
            platform::KUBENV,
            StoreOp::List,
            StoreError::PermissionDenied("forbidden".to_string()),
        );
        let engine = engine(store);
        let result = engine.discover(&engine.request(project(), chain_kinds())).await.unwrap();

        assert_eq!(names(&result, platform::KUBE_CLUSTER), vec!["demo-cluster"]);
        assert!(result.kind(platform::KUBENV).is_empty());
        assert!(result.kind(platform::APP).is_empty());
        assert_eq!(
            result.degraded_kinds.iter().collect::<Vec<_>>(),
            vec![platform::KUBENV]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_kubecore_quality_gate_to_apps() {
        let store = Arc::new(InMemoryStore::with_resources(vec![
            resource(platform::QUALITY_GATE, "security-scan", json!({})),
            resource(
                platform::KUBENV,
                "demo-dev",
                json!({"qualityGates": [{"ref": {"name": "security-scan"}, "required": true}]}),
            ),
            resource(platform::APP, "art-api", json!({"kubenvRef": {"name": "demo-dev"}})),
            resource(
                platform::APP,
                "gated-app",
                json!({"qualityGates": [{"ref": {"name": "security-scan"}}]}),
            ),
        ]));
        let engine = DiscoveryEngine::new(Arc::new(platform::kubecore().unwrap()), store, &test_config());
        let seed = ResourceRef::namespaced(platform::QUALITY_GATE, "security-scan", NS);
        let result = engine
            .discover(&engine.request(seed, vec![platform::APP.to_string()]))
            .await
            .unwrap();

        assert_eq!(names(&result, platform::APP), vec!["gated-app", "art-api"]);
        assert_eq!(result.kind(platform::APP)[0].discovery_method, DiscoveryMethod::Reverse);
        let via_env = &result.kind(platform::APP)[1];
        assert_eq!(via_env.discovery_method, DiscoveryMethod::Transitive(2));
        assert_eq!(via_env.relationship_chain[0].name, "demo-dev");
        assert!(!result.truncated);
        assert!(result.degraded_kinds.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_matches() {
        let store = Arc::new(InMemoryStore::with_resources(vec![resource(
            platform::GITHUB_PROJECT,
            "lonely-project",
            json!({}),
        )]));
        let engine = engine(store);
        let seed = ResourceRef::namespaced(platform::GITHUB_PROJECT, "lonely-project", NS);
        let result = engine.discover(&engine.request(seed, chain_kinds())).await.unwrap();

        assert_eq!(result.by_kind.len(), 3);
        assert_eq!(result.total(), 0);
        assert!(!result.truncated);
        assert!(result.degraded_kinds.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_cache_always_calls_store() {
        let store = chain_store();
        let mut config = test_config();
        config.cache.enabled = false;
        let engine = DiscoveryEngine::new(chain_graph(), store.clone(), &config);
        let request = engine.request(project(), chain_kinds());

        engine.discover(&request).await.unwrap();
        let calls = store.total_calls();
        let result = engine.discover(&request).await.unwrap();

        assert_eq!(store.total_calls(), calls * 2);
        assert_eq!(names(&result, platform::APP), vec!["art-api"]);
        assert_eq!(engine.stats().runs, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_depth_limit() {
        let engine = engine(chain_store());
        let request = engine.request(project(), chain_kinds()).with_max_depth(2);
        let result = engine.discover(&request).await.unwrap();

        assert_eq!(names(&result, platform::KUBENV), vec!["demo-dev"]);
        assert!(result.kind(platform::APP).is_empty());
        assert!(!result.truncated);
        for discovered in result.iter() {
            assert!(discovered.hops <= 2);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_seed_is_error() {
        let engine = engine(chain_store());
        let seed = ResourceRef::namespaced(platform::GITHUB_PROJECT, "nope", NS);
        let err = engine.discover(&engine.request(seed, chain_kinds())).await.unwrap_err();
        assert!(matches!(
            err,
            PlatctxError::SeedUnavailable {
                source: StoreError::NotFound(_),
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_irrelevant_edges_are_pruned() {
        let store = chain_store();
        let engine = engine(store.clone());
        let request = engine.request(project(), vec![platform::KUBE_CLUSTER.to_string()]);
        let result = engine.discover(&request).await.unwrap();

        assert_eq!(names(&result, platform::KUBE_CLUSTER), vec!["demo-cluster"]);
        assert_eq!(store.calls(platform::KUBENV, StoreOp::List), 0);
        assert_eq!(store.calls(platform::APP, StoreOp::List), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_intermediate_kinds_are_not_reported() {
        let engine = engine(chain_store());
        let request = engine.request(project(), vec![platform::APP.to_string()]);
        let result = engine.discover(&request).await.unwrap();

        assert_eq!(result.by_kind.len(), 1);
        assert_eq!(names(&result, platform::APP), vec!["art-api"]);
        assert_eq!(result.kind(platform::APP)[0].hops, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_resource_reported_once_on_shortest_path() {
        // env is reachable directly from the project and through the cluster
        let graph = Arc::new(
            RelationshipGraph::builder()
                .reverse(platform::GITHUB_PROJECT, platform::KUBE_CLUSTER, &["spec", "githubProjectRef"])
                .reverse(platform::GITHUB_PROJECT, platform::KUBENV, &["spec", "githubProjectRef"])
                .reverse(platform::KUBE_CLUSTER, platform::KUBENV, &["spec", "kubeClusterRef"])
                .build()
                .unwrap(),
        );
        let store = Arc::new(InMemoryStore::with_resources(vec![
            resource(platform::GITHUB_PROJECT, "demo-project", json!({})),
            resource(platform::KUBE_CLUSTER, "demo-cluster", json!({"githubProjectRef": {"name": "demo-project"}})),
            resource(
                platform::KUBENV,
                "demo-dev",
                json!({"githubProjectRef": {"name": "demo-project"}, "kubeClusterRef": {"name": "demo-cluster"}}),
            ),
        ]));
        let engine = DiscoveryEngine::new(graph, store, &test_config());
        let request = engine.request(
            project(),
            vec![platform::KUBE_CLUSTER.to_string(), platform::KUBENV.to_string()],
        );
        let result = engine.discover(&request).await.unwrap();

        assert_eq!(result.kind(platform::KUBENV).len(), 1);
        let env = &result.kind(platform::KUBENV)[0];
        assert_eq!(env.hops, 1);
        assert_eq!(env.discovery_method, DiscoveryMethod::Reverse);
        assert_eq!(env.relationship_chain.len(), env.hops);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycles_terminate() {
        let graph = Arc::new(
            RelationshipGraph::builder()
                .forward(platform::APP, platform::KUBENV, &["spec", "kubenvRef"])
                .reverse(platform::KUBENV, platform::APP, &["spec", "kubenvRef"])
                .build()
                .unwrap(),
        );
        let store = Arc::new(InMemoryStore::with_resources(vec![
            resource(platform::KUBENV, "demo-dev", json!({})),
            resource(platform::APP, "a", json!({"kubenvRef": {"name": "demo-dev"}})),
            resource(platform::APP, "b", json!({"kubenvRef": {"name": "demo-dev"}})),
        ]));
        let engine = DiscoveryEngine::new(graph, store, &test_config());
        let seed = ResourceRef::namespaced(platform::APP, "a", NS);
        let request = engine
            .request(seed, vec![platform::APP.to_string(), platform::KUBENV.to_string()])
            .with_max_depth(5);
        let result = engine.discover(&request).await.unwrap();

        // The seed is never reported back
        assert_eq!(names(&result, platform::APP), vec!["b"]);
        assert_eq!(names(&result, platform::KUBENV), vec!["demo-dev"]);
        assert_eq!(result.kind(platform::APP)[0].discovery_method, DiscoveryMethod::Transitive(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_per_kind_budget_truncates() {
        let store = chain_store();
        for i in 0..5 {
            store.insert(resource(
                platform::KUBE_CLUSTER,
                &format!("cluster-{}", i),
                json!({"githubProjectRef": {"name": "demo-project"}}),
            ));
        }
        let engine = engine(store);
        let mut request = engine.request(project(), vec![platform::KUBE_CLUSTER.to_string()]);
        request.max_resources_per_kind = 3;
        let result = engine.discover(&request).await.unwrap();

        assert!(result.truncated);
        // Sorted by name, so the first three win
        assert_eq!(
            names(&result, platform::KUBE_CLUSTER),
            vec!["cluster-0", "cluster-1", "cluster-2"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_smaller_budget_not_served_from_cached_result() {
        let store = chain_store();
        for i in 0..5 {
            store.insert(resource(
                platform::KUBE_CLUSTER,
                &format!("cluster-{}", i),
                json!({"githubProjectRef": {"name": "demo-project"}}),
            ));
        }
        let engine = engine(store);
        let request = engine.request(project(), vec![platform::KUBE_CLUSTER.to_string()]);

        let full = engine.discover(&request).await.unwrap();
        assert!(!full.truncated);
        assert_eq!(full.kind(platform::KUBE_CLUSTER).len(), 6);

        let mut small = request.clone();
        small.max_resources_per_kind = 2;
        let result = engine.discover(&small).await.unwrap();
        assert!(result.truncated);
        assert_eq!(names(&result, platform::KUBE_CLUSTER), vec!["cluster-0", "cluster-1"]);
        assert_eq!(engine.stats().runs, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reverse_lookup_reads_past_first_page() {
        let store = chain_store();
        // Sorted ahead of demo-cluster, so they fill the first pages
        for i in 0..5 {
            store.insert(resource(
                platform::KUBE_CLUSTER,
                &format!("a-noise-{}", i),
                json!({"githubProjectRef": {"name": "other-project"}}),
            ));
        }
        let mut config = test_config();
        config.discovery.list_page_limit = 2;
        let engine = DiscoveryEngine::new(chain_graph(), store.clone(), &config);

        let result = engine.discover(&engine.request(project(), chain_kinds())).await.unwrap();
        assert!(!result.truncated);
        assert_eq!(names(&result, platform::KUBE_CLUSTER), vec!["demo-cluster"]);
        assert_eq!(names(&result, platform::APP), vec!["art-api"]);
        assert_eq!(store.calls(platform::KUBE_CLUSTER, StoreOp::List), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_memory_budget_stops_discovery() {
        let cluster_size = resource(
            platform::KUBE_CLUSTER,
            "demo-cluster",
            json!({"githubProjectRef": {"name": "demo-project"}}),
        )
        .approx_size();
        let engine = engine(chain_store());
        let request = engine
            .request(project(), chain_kinds())
            .with_memory_limit(cluster_size);

        let result = engine.discover(&request).await.unwrap();
        assert!(result.truncated);
        assert_eq!(names(&result, platform::KUBE_CLUSTER), vec!["demo-cluster"]);
        assert!(result.kind(platform::KUBENV).is_empty());
        assert!(result.kind(platform::APP).is_empty());

        let unlimited = engine.request(project(), chain_kinds()).with_memory_limit(0);
        let result = engine.discover(&unlimited).await.unwrap();
        assert!(!result.truncated);
        assert_eq!(result.total(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_level_times_out_with_partial_result() {
        let store = chain_store();
        store.set_latency(platform::APP, Duration::from_secs(3));
        let mut config = test_config();
        config.discovery.store_call_timeout_ms = 10_000;
        let engine = DiscoveryEngine::new(chain_graph(), store, &config);

        let request = engine.request(project(), chain_kinds());
        let result = engine.discover(&request).await.unwrap();

        assert!(result.truncated);
        assert!(result.degraded_kinds.is_empty());
        assert_eq!(names(&result, platform::KUBE_CLUSTER), vec!["demo-cluster"]);
        assert_eq!(names(&result, platform::KUBENV), vec!["demo-dev"]);
        assert!(result.kind(platform::APP).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_overall_deadline() {
        let store = chain_store();
        store.set_latency(platform::KUBENV, Duration::from_millis(900));
        store.set_latency(platform::APP, Duration::from_millis(900));
        let mut config = test_config();
        config.discovery.deadline_ms = 1_500;
        config.discovery.store_call_timeout_ms = 10_000;
        let engine = DiscoveryEngine::new(chain_graph(), store, &config);

        let started = Instant::now();
        let result = engine.discover(&engine.request(project(), chain_kinds())).await.unwrap();

        assert!(started.elapsed() <= Duration::from_millis(1_500));
        assert!(result.truncated);
        assert!(result.kind(platform::APP).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_kind_is_degraded_and_trips_breaker() {
        let store = chain_store();
        store.fail(
            platform::KUBENV,
            StoreOp::List,
            StoreError::PermissionDenied("forbidden".to_string()),
        );
        let engine = engine(store.clone());
        let request = engine.request(project(), chain_kinds());

        // threshold is 3 in the test config
        for _ in 0..3 {
            let result = engine.discover(&request).await.unwrap();
            assert!(result.degraded_kinds.contains(platform::KUBENV));
            assert_eq!(names(&result, platform::KUBE_CLUSTER), vec!["demo-cluster"]);
        }
        assert_eq!(store.calls(platform::KUBENV, StoreOp::List), 3);

        let result = engine.discover(&request).await.unwrap();
        assert!(result.degraded_kinds.contains(platform::KUBENV));
        assert_eq!(store.calls(platform::KUBENV, StoreOp::List), 3);
        assert_eq!(
            engine.stats().breakers[platform::KUBENV].state,
            crate::breaker::BreakerState::Open
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_result_cache_reused() {
        let store = chain_store();
        let engine = engine(store.clone());
        let request = engine.request(project(), chain_kinds());

        let first = engine.discover(&request).await.unwrap();
        let calls = store.total_calls();
        let second = engine.discover(&request).await.unwrap();

        assert_eq!(store.total_calls(), calls);
        assert_eq!(first.total(), second.total());
        assert_eq!(engine.stats().runs, 1);
        assert_eq!(engine.stats().result_cache.hits, 1);

        engine.clear_cache();
        engine.discover(&request).await.unwrap();
        assert!(store.total_calls() > calls);
        assert_eq!(engine.stats().runs, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_results_are_not_cached() {
        let store = chain_store();
        store.fail(platform::APP, StoreOp::List, StoreError::Transient("flaky".to_string()));
        let engine = engine(store.clone());
        let request = engine.request(project(), chain_kinds());

        engine.discover(&request).await.unwrap();
        store.clear_failure(platform::APP, StoreOp::List);
        let result = engine.discover(&request).await.unwrap();

        assert!(result.degraded_kinds.is_empty());
        assert_eq!(names(&result, platform::APP), vec!["art-api"]);
        assert_eq!(engine.stats().runs, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_forward_only_mode_skips_reverse_edges() {
        let store = chain_store();
        let engine = engine(store.clone());
        let request = engine.request(project(), chain_kinds()).with_bidirectional(false);
        let result = engine.discover(&request).await.unwrap();

        assert_eq!(result.total(), 0);
        assert_eq!(store.calls(platform::KUBE_CLUSTER, StoreOp::List), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_namespace_local_reverse_edge() {
        let graph = Arc::new(
            RelationshipGraph::builder()
                .reverse_local(platform::KUBENV, platform::APP, &["spec", "kubenvRef"])
                .build()
                .unwrap(),
        );
        let store = Arc::new(InMemoryStore::with_resources(vec![
            resource(platform::KUBENV, "demo-dev", json!({})),
            resource(platform::APP, "local", json!({"kubenvRef": {"name": "demo-dev"}})),
            Resource::new(
                platform::APP,
                "remote",
                Some("other"),
                json!({"spec": {"kubenvRef": {"name": "demo-dev", "namespace": NS}}}),
            ),
        ]));
        let engine = DiscoveryEngine::new(graph, store, &test_config());
        let seed = ResourceRef::namespaced(platform::KUBENV, "demo-dev", NS);
        let result = engine
            .discover(&engine.request(seed, vec![platform::APP.to_string()]))
            .await
            .unwrap();
        assert_eq!(names(&result, platform::APP), vec!["local"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_health_and_stats() {
        let store = chain_store();
        let engine = engine(store.clone());
        assert!(engine.is_healthy());

        engine.discover(&engine.request(project(), chain_kinds())).await.unwrap();
        let stats = engine.stats();
        assert_eq!(stats.discovered, 3);
        assert!(stats.store_calls > 0);
        assert_eq!(stats.success_rate, 1.0);
        assert!(engine.is_healthy());

        store.fail(platform::KUBE_CLUSTER, StoreOp::List, StoreError::Other("down".to_string()));
        store.fail(platform::KUBENV, StoreOp::List, StoreError::Other("down".to_string()));
        engine.clear_cache();
        engine.reset_stats();
        for _ in 0..3 {
            engine.discover(&engine.request(project(), chain_kinds())).await.unwrap();
        }
        assert!(!engine.is_healthy());

        engine.reset_stats();
        assert_eq!(engine.stats().runs, 0);
        assert_eq!(engine.stats().store_calls, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_runs_share_engine() {
        let engine = Arc::new(engine(chain_store()));
        let mut handles = Vec::new();
        for _ in 0..4 {
            let engine = engine.clone();
            handles.push(tokio::spawn(async move {
                let request = engine.request(fixtures::project(), chain_kinds());
                engine.discover(&request).await
            }));
        }
        for handle in handles {
            let result = handle.await.unwrap().unwrap();
            assert_eq!(names(&result, platform::APP), vec!["art-api"]);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweepers_disabled_in_test_config() {
        let engine = engine(chain_store());
        assert!(engine.spawn_cache_sweepers().is_empty());

        let mut config = test_config();
        config.cache.sweep_interval_secs = 30;
        let engine = DiscoveryEngine::new(chain_graph(), chain_store(), &config);
        let handles = engine.spawn_cache_sweepers();
        assert_eq!(handles.len(), 2);
        for handle in handles {
            handle.abort();
        }
    }
}
