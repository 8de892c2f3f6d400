//! Topology domains as defined by node labels.

use podgrid_types::Node;

fn same_label(a: &Node, b: &Node, key: &str) -> bool {
    match (a.meta.labels.get(key), b.meta.labels.get(key)) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

/// Whether `a` and `b` are in the same domain for `key`.
///
/// An empty key means "any of the failure domains".
pub fn share_topology(a: &Node, b: &Node, key: &str, failure_domains: &[String]) -> bool {
    if key.is_empty() {
        failure_domains.iter().any(|k| same_label(a, b, k))
    } else {
        same_label(a, b, key)
    }
}
