//! Cache key construction.
//!
//! Store-call keys are readable strings; whole-result keys are hashed so the
//! requested kind list does not blow up key length.

use sha2::{Digest, Sha256};

use crate::graph::{Direction, ResourceRef};

/// Key for a point-get of `reference`.
pub fn get_key(reference: &ResourceRef) -> String {
    format!(
        "get|{}|{}|{}",
        reference.kind,
        reference.namespace().unwrap_or("*"),
        reference.name
    )
}

/// Key for one edge expansion: the target kind, direction, reference field,
/// list scope/filter and the identity the reference must match.
pub fn edge_key(
    direction: Direction,
    target_kind: &str,
    field_path: &str,
    scope_namespace: Option<&str>,
    filter_fragment: &str,
    identity: &ResourceRef,
) -> String {
    format!(
        "edge|{}|{}|{}|{}|{}|{}",
        direction,
        target_kind,
        field_path,
        scope_namespace.unwrap_or("*"),
        filter_fragment,
        identity
    )
}

/// Key for a whole discovery result.
///
/// Every request field that bounds the result is part of the key. Requested
/// kinds are sorted first so the key does not depend on their order.
pub fn result_key(
    seed: &ResourceRef,
    requested_kinds: &[String],
    max_depth: usize,
    max_resources_per_kind: usize,
    memory_limit_bytes: usize,
    bidirectional: bool,
) -> String {
    let mut kinds: Vec<&str> = requested_kinds.iter().map(String::as_str).collect();
    kinds.sort_unstable();
    kinds.dedup();

    let mut hasher = Sha256::new();
    hasher.update(seed.to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(kinds.join(",").as_bytes());
    hasher.update(
        format!(
            "|depth:{}|per_kind:{}|memory:{}|bidi:{}",
            max_depth, max_resources_per_kind, memory_limit_bytes, bidirectional
        )
        .as_bytes(),
    );
    format!("result|{:x}", hasher.finalize())
}
