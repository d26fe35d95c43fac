//! Relationship graph: resource identities and the typed edges between kinds.
//!
//! The graph is built once (by a loader or [`platform::kubecore`]) and is
//! read-only afterwards; the discovery engine shares it behind an `Arc`.

pub mod platform;
mod relationships;

pub use relationships::{RelationshipGraph, RelationshipGraphBuilder};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of one resource instance (kind, name, optional namespace).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceRef {
    pub kind: String,
    pub name: String,
    /// `None` for cluster-scoped resources.
    pub namespace: Option<String>,
}

impl ResourceRef {
    pub fn new(kind: impl Into<String>, name: impl Into<String>, namespace: Option<&str>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            namespace: namespace.map(str::to_string),
        }
    }

    /// Shorthand for a namespaced reference.
    pub fn namespaced(
        kind: impl Into<String>,
        name: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            namespace: Some(namespace.into()),
        }
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}/{}", self.kind, ns, self.name),
            None => write!(f, "{}/{}", self.kind, self.name),
        }
    }
}

/// Which side of the relationship holds the reference field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// The source kind holds a reference field pointing at the target.
    Forward,
    /// The target kind holds a reference field pointing back at the source.
    Reverse,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Forward => "forward",
            Direction::Reverse => "reverse",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Namespace a reverse lookup lists candidates in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NamespaceScope {
    /// Referencing resources may live in any namespace.
    #[default]
    Any,
    /// Referencing resources always live in the source's namespace.
    SameAsSource,
}

/// One declared relationship from `source_kind` to `target_kind`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipEdge {
    pub source_kind: String,
    pub target_kind: String,
    pub direction: Direction,
    /// Forward: path of the reference field on the source.
    /// Reverse: path of the reference field on the target.
    pub field_path: Vec<String>,
    #[serde(default)]
    pub namespace_scope: NamespaceScope,
}

impl RelationshipEdge {
    pub fn new(
        source_kind: impl Into<String>,
        target_kind: impl Into<String>,
        direction: Direction,
        field_path: &[&str],
    ) -> Self {
        Self {
            source_kind: source_kind.into(),
            target_kind: target_kind.into(),
            direction,
            field_path: field_path.iter().map(|s| s.to_string()).collect(),
            namespace_scope: NamespaceScope::Any,
        }
    }

    pub fn with_namespace_scope(mut self, scope: NamespaceScope) -> Self {
        self.namespace_scope = scope;
        self
    }

    /// Dotted form of the field path, e.g. `spec.kubeClusterRef`.
    pub fn field_path_str(&self) -> String {
        self.field_path.join(".")
    }
}

impl fmt::Display for RelationshipEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} --{}({})--> {}",
            self.source_kind,
            self.direction,
            self.field_path_str(),
            self.target_kind
        )
    }
}
