//! Immutable per-kind edge table.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use super::{Direction, NamespaceScope, RelationshipEdge};
use crate::{PlatctxError, Result};

/// Declared relationships, keyed by source kind, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct RelationshipGraph {
    edges: HashMap<String, Vec<RelationshipEdge>>,
}

impl RelationshipGraph {
    pub fn builder() -> RelationshipGraphBuilder {
        RelationshipGraphBuilder::default()
    }

    /// Edges leaving `kind`, in declared order. Unknown kinds have none.
    pub fn edges_from(&self, kind: &str) -> &[RelationshipEdge] {
        self.edges.get(kind).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Kinds reachable from `kind` through a single forward edge.
    pub fn forward_targets(&self, kind: &str) -> BTreeSet<&str> {
        self.edges_from(kind)
            .iter()
            .filter(|e| e.direction == Direction::Forward)
            .map(|e| e.target_kind.as_str())
            .collect()
    }

    /// Every kind that appears as a source or a target.
    pub fn kinds(&self) -> BTreeSet<&str> {
        let mut kinds = BTreeSet::new();
        for (source, edges) in &self.edges {
            kinds.insert(source.as_str());
            for edge in edges {
                kinds.insert(edge.target_kind.as_str());
            }
        }
        kinds
    }

    pub fn edge_count(&self) -> usize {
        self.edges.values().map(Vec::len).sum()
    }

    /// Shortest number of kind-level hops from `from` to any kind in `targets`.
    ///
    /// Returns `Some(0)` when `from` itself is a target. With `bidirectional`
    /// false only forward edges are followed.
    pub fn hops_to_any(
        &self,
        from: &str,
        targets: &HashSet<String>,
        bidirectional: bool,
    ) -> Option<usize> {
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();

        queue.push_back((from, 0usize));
        visited.insert(from);

        while let Some((kind, depth)) = queue.pop_front() {
            if targets.contains(kind) {
                return Some(depth);
            }
            for edge in self.edges_from(kind) {
                if !bidirectional && edge.direction != Direction::Forward {
                    continue;
                }
                if visited.insert(edge.target_kind.as_str()) {
                    queue.push_back((edge.target_kind.as_str(), depth + 1));
                }
            }
        }

        None
    }
}

/// Collects edges and validates them into a [`RelationshipGraph`].
#[derive(Debug, Default)]
pub struct RelationshipGraphBuilder {
    edges: Vec<RelationshipEdge>,
}

impl RelationshipGraphBuilder {
    /// `source` holds a reference to `target` at `field_path`.
    pub fn forward(mut self, source: &str, target: &str, field_path: &[&str]) -> Self {
        self.edges
            .push(RelationshipEdge::new(source, target, Direction::Forward, field_path));
        self
    }

    /// `target` resources reference `source` at `field_path`.
    pub fn reverse(mut self, source: &str, target: &str, field_path: &[&str]) -> Self {
        self.edges
            .push(RelationshipEdge::new(source, target, Direction::Reverse, field_path));
        self
    }

    /// Reverse lookup that only lists in the source's namespace.
    pub fn reverse_local(mut self, source: &str, target: &str, field_path: &[&str]) -> Self {
        self.edges.push(
            RelationshipEdge::new(source, target, Direction::Reverse, field_path)
                .with_namespace_scope(NamespaceScope::SameAsSource),
        );
        self
    }

    pub fn edge(mut self, edge: RelationshipEdge) -> Self {
        self.edges.push(edge);
        self
    }

    pub fn build(self) -> Result<RelationshipGraph> {
        let mut seen = HashSet::new();
        let mut edges: HashMap<String, Vec<RelationshipEdge>> = HashMap::new();

        for edge in self.edges {
            if edge.source_kind.is_empty() || edge.target_kind.is_empty() {
                return Err(PlatctxError::InvalidGraph(format!(
                    "edge with empty kind: {}",
                    edge
                )));
            }
            if edge.field_path.is_empty() || edge.field_path.iter().any(String::is_empty) {
                return Err(PlatctxError::InvalidGraph(format!(
                    "edge with empty field path: {}",
                    edge
                )));
            }
            let key = (
                edge.source_kind.clone(),
                edge.target_kind.clone(),
                edge.direction,
            );
            if !seen.insert(key) {
                return Err(PlatctxError::InvalidGraph(format!(
                    "duplicate relationship declared: {}",
                    edge
                )));
            }
            edges.entry(edge.source_kind.clone()).or_default().push(edge);
        }

        Ok(RelationshipGraph { edges })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain_graph() -> RelationshipGraph {
        RelationshipGraph::builder()
            .reverse("XGitHubProject", "XKubeCluster", &["spec", "githubProjectRef"])
            .reverse("XKubeCluster", "XKubEnv", &["spec", "kubeClusterRef"])
            .reverse("XKubEnv", "XApp", &["spec", "kubenvRef"])
            .forward("XKubEnv", "XKubeCluster", &["spec", "kubeClusterRef"])
            .build()
            .unwrap()
    }

    fn kinds(list: &[&str]) -> HashSet<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_edges_from_preserves_declared_order() {
        let graph = RelationshipGraph::builder()
            .reverse("XKubeCluster", "XKubEnv", &["spec", "kubeClusterRef"])
            .reverse("XKubeCluster", "XKubeSystem", &["spec", "kubeClusterRef"])
            .forward("XKubeCluster", "XKubeNet", &["spec", "kubeNetRef"])
            .build()
            .unwrap();
        let targets: Vec<_> = graph
            .edges_from("XKubeCluster")
            .iter()
            .map(|e| e.target_kind.as_str())
            .collect();
        assert_eq!(targets, vec!["XKubEnv", "XKubeSystem", "XKubeNet"]);
    }

    #[test]
    fn test_unknown_kind_has_no_edges() {
        let graph = chain_graph();
        assert!(graph.edges_from("XNothing").is_empty());
    }

    #[test]
    fn test_forward_targets() {
        let graph = chain_graph();
        let targets = graph.forward_targets("XKubEnv");
        assert_eq!(targets.into_iter().collect::<Vec<_>>(), vec!["XKubeCluster"]);
        assert!(graph.forward_targets("XGitHubProject").is_empty());
    }

    #[test]
    fn test_hops_to_any() {
        let graph = chain_graph();
        assert_eq!(graph.hops_to_any("XGitHubProject", &kinds(&["XApp"]), true), Some(3));
        assert_eq!(graph.hops_to_any("XKubEnv", &kinds(&["XApp"]), true), Some(1));
        assert_eq!(graph.hops_to_any("XApp", &kinds(&["XApp"]), true), Some(0));
        assert_eq!(graph.hops_to_any("XApp", &kinds(&["XGitHubProject"]), true), None);
    }

    #[test]
    fn test_hops_to_any_forward_only() {
        let graph = chain_graph();
        assert_eq!(graph.hops_to_any("XGitHubProject", &kinds(&["XApp"]), false), None);
        assert_eq!(
            graph.hops_to_any("XKubEnv", &kinds(&["XKubeCluster"]), false),
            Some(1)
        );
    }

    #[test]
    fn test_build_rejects_duplicates() {
        let result = RelationshipGraph::builder()
            .reverse("A", "B", &["spec", "aRef"])
            .reverse("A", "B", &["spec", "otherRef"])
            .build();
        assert!(matches!(result, Err(PlatctxError::InvalidGraph(_))));
    }

    #[test]
    fn test_build_rejects_empty_path() {
        let result = RelationshipGraph::builder().forward("A", "B", &[]).build();
        assert!(matches!(result, Err(PlatctxError::InvalidGraph(_))));
    }

    #[test]
    fn test_kinds_and_edge_count() {
        let graph = chain_graph();
        assert_eq!(graph.edge_count(), 4);
        let kinds = graph.kinds();
        assert!(kinds.contains("XApp"));
        assert!(kinds.contains("XGitHubProject"));
        assert_eq!(kinds.len(), 4);
    }
}
