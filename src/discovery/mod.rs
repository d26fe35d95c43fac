//! Relationship discovery: request/result types, the store gateway and the
//! leveled BFS engine.

mod engine;
mod gateway;

pub use engine::{DiscoveryEngine, EngineStats};
pub use gateway::{EdgeExpansion, EdgeFailure, StoreGateway};

use serde::{Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::config::DiscoveryConfig;
use crate::graph::{Direction, ResourceRef};
use crate::store::Resource;
use crate::summarize::Summary;
use crate::{PlatctxError, Result};

/// How a resource was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiscoveryMethod {
    /// Named explicitly by the caller.
    Direct,
    /// Read from a reference field on the seed.
    Forward,
    /// Found by listing a kind that references the seed.
    Reverse,
    /// Reached through intermediate resources, with the hop count.
    Transitive(usize),
}

impl DiscoveryMethod {
    /// Method recorded for a resource first reached at BFS `depth` (0-based)
    /// over an edge with `direction`.
    pub fn at_depth(depth: usize, direction: Direction) -> Self {
        match (depth, direction) {
            (0, Direction::Forward) => DiscoveryMethod::Forward,
            (0, Direction::Reverse) => DiscoveryMethod::Reverse,
            (d, _) => DiscoveryMethod::Transitive(d + 1),
        }
    }
}

impl fmt::Display for DiscoveryMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiscoveryMethod::Direct => f.write_str("direct"),
            DiscoveryMethod::Forward => f.write_str("forward"),
            DiscoveryMethod::Reverse => f.write_str("reverse"),
            DiscoveryMethod::Transitive(hops) => write!(f, "transitive-{}", hops),
        }
    }
}

impl Serialize for DiscoveryMethod {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// One resource in a discovery result.
///
/// `relationship_chain` runs from the seed's neighbor to this resource, so
/// its length always equals `hops`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredResource {
    #[serde(flatten)]
    pub reference: ResourceRef,
    pub discovery_method: DiscoveryMethod,
    pub hops: usize,
    pub relationship_chain: Vec<ResourceRef>,
    pub summary: Summary,
    #[serde(skip_serializing)]
    resource: Arc<Resource>,
}

impl DiscoveredResource {
    pub fn new(
        resource: Arc<Resource>,
        discovery_method: DiscoveryMethod,
        relationship_chain: Vec<ResourceRef>,
    ) -> Self {
        Self {
            reference: resource.resource_ref(),
            discovery_method,
            hops: relationship_chain.len(),
            relationship_chain,
            summary: Summary::Null,
            resource,
        }
    }

    /// The full resource as fetched from the store.
    pub fn resource(&self) -> &Resource {
        &self.resource
    }
}

/// Parameters of one discovery run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryRequest {
    pub seed: ResourceRef,
    pub requested_kinds: Vec<String>,
    pub max_depth: usize,
    pub max_resources_per_kind: usize,
    pub per_level_timeout: Duration,
    /// Overall time budget, measured from the start of the run.
    pub deadline: Duration,
    /// Approximate bytes of discovered resources kept per run; 0 means unlimited.
    pub memory_limit_bytes: usize,
    pub bidirectional: bool,
}

impl DiscoveryRequest {
    /// Request with budgets taken from `config`, traversing both directions.
    pub fn from_config(seed: ResourceRef, requested_kinds: Vec<String>, config: &DiscoveryConfig) -> Self {
        Self {
            seed,
            requested_kinds,
            max_depth: config.max_depth,
            max_resources_per_kind: config.max_resources_per_kind,
            per_level_timeout: config.per_level_timeout(),
            deadline: config.deadline(),
            memory_limit_bytes: config.memory_limit_bytes(),
            bidirectional: true,
        }
    }

    pub fn seed_kind(&self) -> &str {
        &self.seed.kind
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_memory_limit(mut self, bytes: usize) -> Self {
        self.memory_limit_bytes = bytes;
        self
    }

    pub fn with_bidirectional(mut self, bidirectional: bool) -> Self {
        self.bidirectional = bidirectional;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.seed.kind.is_empty() || self.seed.name.is_empty() {
            return Err(PlatctxError::InvalidRequest(format!(
                "seed must have a kind and a name, got {}",
                self.seed
            )));
        }
        if self.max_resources_per_kind == 0 {
            return Err(PlatctxError::InvalidRequest(
                "max_resources_per_kind must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Discovered resources by kind, plus partial-result flags.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryResult {
    pub by_kind: BTreeMap<String, Vec<DiscoveredResource>>,
    /// Some budget (depth aside), deadline or timeout cut the run short.
    pub truncated: bool,
    /// Kinds skipped because of permission errors, failures or open breakers.
    pub degraded_kinds: BTreeSet<String>,
}

impl DiscoveryResult {
    /// Empty result with an (empty) entry for each requested kind.
    pub fn for_kinds(kinds: &[String]) -> Self {
        Self {
            by_kind: kinds.iter().map(|k| (k.clone(), Vec::new())).collect(),
            ..Default::default()
        }
    }

    /// Entries for `kind`; empty when none were found.
    pub fn kind(&self, kind: &str) -> &[DiscoveredResource] {
        self.by_kind.get(kind).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn find(&self, reference: &ResourceRef) -> Option<&DiscoveredResource> {
        self.kind(&reference.kind)
            .iter()
            .find(|d| &d.reference == reference)
    }

    pub fn contains(&self, reference: &ResourceRef) -> bool {
        self.find(reference).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DiscoveredResource> {
        self.by_kind.values().flatten()
    }

    pub fn total(&self) -> usize {
        self.by_kind.values().map(Vec::len).sum()
    }
}
