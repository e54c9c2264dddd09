
use std::collections::HashMap;

/// Reciprocal-rank-fusion constant from the original RRF paper.
pub const DEFAULT_RRF_K: f64 = 60.0;

/// A ranked id list with its fusion weight.
pub struct RankedList<'a> {
    pub ids: &'a [String],
    pub weight: f64,
}

/// `score(item) = Σ weight_i / (k + rank_i)` over every list containing
/// the item, rank starting at 1. Output is ordered by fused score,
/// descending, ties broken by first appearance across the input lists.
pub fn fuse(lists: &[RankedList<'_>], k: f64) -> Vec<(String, f64)> {
    let mut scores: HashMap<&str, f64> = HashMap::new();
    let mut order: Vec<&str> = Vec::new();

    for list in lists {
        for (position, id) in list.ids.iter().enumerate() {
            let rank = (position + 1) as f64;
            let entry = scores.entry(id.as_str()).or_insert_with(|| {
                order.push(id.as_str());
                0.0
            });
            *entry += list.weight / (k + rank);
        }
    }

    let mut fused: Vec<(String, f64)> = order
        .iter()
        .map(|id| (id.to_string(), scores[id]))
        .collect();
    fused.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    fused
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_self_fusion_preserves_order() {
        let list = ids(&["a", "b", "c"]);
        let fused = fuse(
            &[
                RankedList { ids: &list, weight: 1.0 },
                RankedList { ids: &list, weight: 1.0 },
            ],
            DEFAULT_RRF_K,
        );
        let order: Vec<&str> = fused.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_agreement_beats_single_list() {
        // "b" is mid-ranked in both lists; "a" and "c" each lead one.
        let fused = fuse(
            &[
                RankedList { ids: &ids(&["a", "b"]), weight: 1.0 },
                RankedList { ids: &ids(&["c", "b"]), weight: 1.0 },
            ],
            DEFAULT_RRF_K,
        );
        assert_eq!(fused[0].0, "b");
    }

    #[test]
    fn test_weights_shift_the_fusion() {
        let fused = fuse(
            &[
                RankedList { ids: &ids(&["a", "b"]), weight: 3.0 },
                RankedList { ids: &ids(&["b", "a"]), weight: 1.0 },
            ],
            DEFAULT_RRF_K,
        );
        assert_eq!(fused[0].0, "a");
    }

    #[test]
    fn test_item_missing_from_one_list() {
        let fused = fuse(
            &[
                RankedList { ids: &ids(&["a", "b"]), weight: 1.0 },
                RankedList { ids: &ids(&["a"]), weight: 1.0 },
            ],
            DEFAULT_RRF_K,
        );
        assert_eq!(fused[0].0, "a");
        assert_eq!(fused.len(), 2);
        assert!(fused[0].1 > fused[1].1);
    }
}
