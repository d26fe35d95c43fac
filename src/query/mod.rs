//! Query entry point.
//!
//! Decides whether a request can be answered from the seed's own reference
//! fields or needs a full discovery run, merges direct findings with the
//! engine's, and attaches summaries.

use futures_util::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::DiscoveryConfig;
use crate::discovery::{
    DiscoveredResource, DiscoveryEngine, DiscoveryMethod, DiscoveryRequest, DiscoveryResult,
    EdgeFailure,
};
use crate::error::StoreError;
use crate::graph::{Direction, ResourceRef};
use crate::store::Resource;
use crate::summarize::Summarizer;
use crate::Result;

/// Per-call knobs for [`QueryProcessor::resolve`].
#[derive(Debug, Clone)]
pub struct ResolveOptions {
    pub max_depth: usize,
    pub max_resources_per_kind: usize,
    pub per_level_timeout: Duration,
    pub deadline: Duration,
    /// Approximate bytes of discovered resources kept; 0 means unlimited.
    pub memory_limit_bytes: usize,
    /// Run full discovery even when the seed's forward references cover
    /// every requested kind.
    pub force_bidirectional: bool,
    /// References the caller already knows about; reported as `direct`.
    pub known_references: Vec<ResourceRef>,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self::from_config(&DiscoveryConfig::default())
    }
}

impl ResolveOptions {
    pub fn from_config(config: &DiscoveryConfig) -> Self {
        Self {
            max_depth: config.max_depth,
            max_resources_per_kind: config.max_resources_per_kind,
            per_level_timeout: config.per_level_timeout(),
            deadline: config.deadline(),
            memory_limit_bytes: config.memory_limit_bytes(),
            force_bidirectional: false,
            known_references: Vec::new(),
        }
    }

    pub fn with_known_references(mut self, references: Vec<ResourceRef>) -> Self {
        self.known_references = references;
        self
    }

    pub fn with_force_bidirectional(mut self, force: bool) -> Self {
        self.force_bidirectional = force;
        self
    }
}

/// Accumulates the processor's own findings with global de-duplication and
/// the per-kind budget.
struct Collector {
    result: DiscoveryResult,
    seen: HashSet<ResourceRef>,
    max_per_kind: usize,
}

impl Collector {
    fn new(seed: &ResourceRef, requested_kinds: &[String], max_per_kind: usize) -> Self {
        Self {
            result: DiscoveryResult::for_kinds(requested_kinds),
            seen: HashSet::from([seed.clone()]),
            max_per_kind,
        }
    }

    fn push(&mut self, discovered: DiscoveredResource) {
        if self.seen.contains(&discovered.reference) {
            return;
        }
        let entries = self
            .result
            .by_kind
            .entry(discovered.reference.kind.clone())
            .or_default();
        if entries.len() >= self.max_per_kind {
            self.result.truncated = true;
            return;
        }
        self.seen.insert(discovered.reference.clone());
        entries.push(discovered);
    }

    fn record_failure(&mut self, kind: &str, failure: &EdgeFailure) {
        match failure {
            EdgeFailure::Store(StoreError::NotFound(_)) => {}
            EdgeFailure::Store(StoreError::Timeout(_)) => self.result.truncated = true,
            _ => {
                self.result.degraded_kinds.insert(kind.to_string());
            }
        }
    }

    /// Fold in an engine result. Entries already collected win.
    fn merge(&mut self, other: DiscoveryResult) {
        self.result.truncated |= other.truncated;
        self.result.degraded_kinds.extend(other.degraded_kinds);
        for (_, entries) in other.by_kind {
            for entry in entries {
                self.push(entry);
            }
        }
    }
}

/// Resolves a seed into its related resources for a set of kinds.
pub struct QueryProcessor {
    engine: Arc<DiscoveryEngine>,
    summarizer: Arc<dyn Summarizer>,
}

impl QueryProcessor {
    pub fn new(engine: Arc<DiscoveryEngine>, summarizer: Arc<dyn Summarizer>) -> Self {
        Self { engine, summarizer }
    }

    pub fn engine(&self) -> &DiscoveryEngine {
        &self.engine
    }

    /// Whether every requested kind is a direct forward target of
    /// `seed_kind`, so no traversal is needed.
    pub fn uses_forward_shortcut(&self, seed_kind: &str, requested_kinds: &[String]) -> bool {
        let targets = self.engine.graph().forward_targets(seed_kind);
        requested_kinds.iter().all(|k| targets.contains(k.as_str()))
    }

    /// Find resources of `requested_kinds` related to `seed`.
    ///
    /// Resources named in `known_references` come back as `direct`, the
    /// seed's own forward references as `forward`; everything else comes
    /// from a discovery run. Where both paths find a resource, the direct
    /// or forward entry is kept.
    pub async fn resolve(
        &self,
        seed: &ResourceRef,
        requested_kinds: &[String],
        options: &ResolveOptions,
    ) -> Result<DiscoveryResult> {
        let started = Instant::now();
        let deadline = started + options.deadline;

        let request = DiscoveryRequest {
            seed: seed.clone(),
            requested_kinds: requested_kinds.to_vec(),
            max_depth: options.max_depth,
            max_resources_per_kind: options.max_resources_per_kind,
            per_level_timeout: options.per_level_timeout,
            deadline: options.deadline,
            memory_limit_bytes: options.memory_limit_bytes,
            bidirectional: true,
        };
        request.validate()?;

        let seed_resource = self.engine.fetch_seed(seed, deadline).await?;

        let shortcut =
            !options.force_bidirectional && self.uses_forward_shortcut(&seed.kind, requested_kinds);
        let mut collector = Collector::new(seed, requested_kinds, options.max_resources_per_kind);

        let direct = async {
            self.collect_known(&mut collector, requested_kinds, &options.known_references)
                .await;
            self.collect_forward(&mut collector, &seed_resource, requested_kinds)
                .await;
        };
        if tokio::time::timeout_at(deadline, direct).await.is_err() {
            log::warn!("Deadline passed while reading direct references of {}", seed);
            collector.result.truncated = true;
        }

        if shortcut {
            log::debug!("All of {:?} are forward targets of {}, skipping traversal", requested_kinds, seed.kind);
        } else {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                collector.result.truncated = true;
            } else {
                let per_level_timeout = request.per_level_timeout.min(remaining);
                let request = DiscoveryRequest {
                    deadline: remaining,
                    per_level_timeout,
                    ..request
                };
                let discovered = self.engine.discover_from(&request, seed_resource).await?;
                collector.merge(discovered);
            }
        }

        let mut result = collector.result;
        for entries in result.by_kind.values_mut() {
            for entry in entries.iter_mut() {
                entry.summary = self.summarizer.summarize(entry.resource(), &entry.reference.kind);
            }
        }

        log::debug!(
            "Resolved {} resources for {} in {:?}",
            result.total(),
            seed,
            started.elapsed()
        );
        Ok(result)
    }

    async fn collect_known(
        &self,
        collector: &mut Collector,
        requested_kinds: &[String],
        known: &[ResourceRef],
    ) {
        let wanted: Vec<&ResourceRef> = known
            .iter()
            .filter(|r| requested_kinds.contains(&r.kind))
            .collect();
        let gateway = self.engine.gateway();
        let fetched = join_all(wanted.iter().map(|r| gateway.fetch(r))).await;

        for (reference, outcome) in wanted.into_iter().zip(fetched) {
            match outcome {
                Ok(resource) => {
                    let resource = Arc::new(resource);
                    let chain = vec![reference.clone()];
                    collector.push(DiscoveredResource::new(resource, DiscoveryMethod::Direct, chain));
                }
                Err(failure) => collector.record_failure(&reference.kind, &failure),
            }
        }
    }

    async fn collect_forward(&self, collector: &mut Collector, seed: &Resource, requested_kinds: &[String]) {
        let edges: Vec<_> = self
            .engine
            .graph()
            .edges_from(&seed.kind)
            .iter()
            .filter(|e| e.direction == Direction::Forward && requested_kinds.contains(&e.target_kind))
            .collect();
        let gateway = self.engine.gateway();
        let expansions = join_all(edges.iter().map(|edge| gateway.expand(seed, edge))).await;

        for (edge, expansion) in edges.into_iter().zip(expansions) {
            if let Some(failure) = &expansion.failure {
                collector.record_failure(&edge.target_kind, failure);
            }
            for resource in expansion.resources {
                let resource = Arc::new(resource);
                let chain = vec![resource.resource_ref()];
                collector.push(DiscoveredResource::new(resource, DiscoveryMethod::Forward, chain));
            }
        }
    }
}
