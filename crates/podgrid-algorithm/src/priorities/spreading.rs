//! Spread pods of the same service / controller across nodes and zones.

use std::collections::HashMap;

use podgrid_cache::NodeInfo;
use podgrid_types::Pod;

use super::{HostPriority, MAX_PRIORITY, PriorityFunction, PriorityMetadata, names};

/// Share of the final score taken by the zone component when zones exist.
const ZONE_WEIGHTING: f64 = 2.0 / 3.0;

pub struct SelectorSpread;

impl PriorityFunction for SelectorSpread {
    fn name(&self) -> &'static str {
        names::SELECTOR_SPREAD
    }

    /// Number of pods on the node owned by the same selectors.
    fn map(&self, pod: &Pod, meta: &PriorityMetadata, node: &NodeInfo) -> i64 {
        if meta.spread_selectors.is_empty() {
            return 0;
        }
        node.pods()
            .iter()
            .filter(|p| p.meta.namespace == pod.meta.namespace && p.meta.deletion_timestamp.is_none())
            .filter(|p| meta.spread_selectors.iter().any(|s| s.matches(&p.meta.labels)))
            .count() as i64
    }

    fn reduce(&self, _pod: &Pod, meta: &PriorityMetadata, scores: &mut [HostPriority]) {
        let zone_of = |host: &str| {
            meta.node_infos
                .get(host)
                .and_then(|i| i.node())
                .and_then(|n| n.zone_key())
        };

        let max_by_node = scores.iter().map(|s| s.score).max().unwrap_or(0);
        let mut count_by_zone: HashMap<String, i64> = HashMap::new();
        for s in scores.iter() {
            if let Some(zone) = zone_of(&s.host) {
                *count_by_zone.entry(zone).or_insert(0) += s.score;
            }
        }
        let max_by_zone = count_by_zone.values().copied().max().unwrap_or(0);
        let have_zones = !count_by_zone.is_empty();

        for s in scores.iter_mut() {
            let mut f = MAX_PRIORITY as f64;
            if max_by_node > 0 {
                f = MAX_PRIORITY as f64 * (max_by_node - s.score) as f64 / max_by_node as f64;
            }
            if have_zones {
                if let Some(zone) = zone_of(&s.host) {
                    let mut zone_score = MAX_PRIORITY as f64;
                    if max_by_zone > 0 {
                        let zc = count_by_zone.get(&zone).copied().unwrap_or(0);
                        zone_score = MAX_PRIORITY as f64 * (max_by_zone - zc) as f64 / max_by_zone as f64;
                    }
                    f = f * (1.0 - ZONE_WEIGHTING) + ZONE_WEIGHTING * zone_score;
                }
            }
            s.score = f.round() as i64;
        }
    }
}
