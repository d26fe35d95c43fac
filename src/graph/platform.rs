//! Built-in relationship graph for the KubeCore platform hierarchy.
//!
//! ```text
//! GitHubProvider <- GitHubProject <- KubeCluster <- KubEnv <- App
//! GitHubProject <- GitHubApp, App
//! KubeNet <- KubeCluster <- KubeSystem
//! QualityGate <- KubEnv, App
//! ```
//!
//! Every forward reference is mirrored by a reverse lookup so hub kinds
//! (projects, clusters, gates) can find the resources that point at them.

use super::{RelationshipGraph, RelationshipGraphBuilder};
use crate::Result;

pub const GITHUB_PROVIDER: &str = "XGitHubProvider";
pub const GITHUB_PROJECT: &str = "XGitHubProject";
pub const GITHUB_APP: &str = "XGitHubApp";
pub const KUBE_NET: &str = "XKubeNet";
pub const KUBE_CLUSTER: &str = "XKubeCluster";
pub const KUBE_SYSTEM: &str = "XKubeSystem";
pub const KUBENV: &str = "XKubEnv";
pub const QUALITY_GATE: &str = "XQualityGate";
pub const APP: &str = "XApp";

/// (holder kind, referenced kind, reference field under `spec`)
const REFERENCES: &[(&str, &str, &str)] = &[
    (GITHUB_PROJECT, GITHUB_PROVIDER, "githubProviderRef"),
    (GITHUB_APP, GITHUB_PROJECT, "githubProjectRef"),
    (KUBE_CLUSTER, GITHUB_PROJECT, "githubProjectRef"),
    (KUBE_CLUSTER, KUBE_NET, "kubeNetRef"),
    (KUBE_SYSTEM, KUBE_CLUSTER, "kubeClusterRef"),
    (KUBENV, KUBE_CLUSTER, "kubeClusterRef"),
    (KUBENV, QUALITY_GATE, "qualityGates"),
    (APP, KUBENV, "kubenvRef"),
    (APP, GITHUB_PROJECT, "githubProjectRef"),
    (APP, QUALITY_GATE, "qualityGates"),
];

/// Build the KubeCore relationship graph.
///
/// Forward edges are declared first for each kind, then reverse lookups,
/// both in the order of the table above.
pub fn kubecore() -> Result<RelationshipGraph> {
    let mut builder = RelationshipGraphBuilder::default();
    for (holder, referenced, field) in REFERENCES {
        builder = builder.forward(holder, referenced, &["spec", field]);
    }
    for (holder, referenced, field) in REFERENCES {
        builder = builder.reverse(referenced, holder, &["spec", field]);
    }
    builder.build()
}
