//! Offline retrieval metrics over ranked id lists.

use std::collections::{HashMap, HashSet};

/// Reciprocal rank of the first relevant id, 0 when none is retrieved.
pub fn mrr(ranked: &[&str], relevant: &HashSet<&str>) -> f64 {
    ranked
        .iter()
        .position(|id| relevant.contains(id))
        .map_or(0.0, |pos| 1.0 / (pos + 1) as f64)
}

pub fn recall_at_k(ranked: &[&str], relevant: &HashSet<&str>, k: usize) -> f64 {
    if relevant.is_empty() {
        return 0.0;
    }
    hits_at_k(ranked, relevant, k) as f64 / relevant.len() as f64
}

pub fn precision_at_k(ranked: &[&str], relevant: &HashSet<&str>, k: usize) -> f64 {
    if k == 0 {
        return 0.0;
    }
    hits_at_k(ranked, relevant, k) as f64 / k as f64
}

/// Normalized DCG with linear gains: `gain / log2(position + 2)`.
///
/// Missing ids have gain 0; binary judgments are gains of 1.
pub fn ndcg_at_k(ranked: &[&str], gains: &HashMap<&str, f64>, k: usize) -> f64 {
    let dcg: f64 = ranked
        .iter()
        .take(k)
        .enumerate()
        .map(|(i, id)| gains.get(id).copied().unwrap_or(0.0) / (i as f64 + 2.0).log2())
        .sum();
    let mut ideal: Vec<f64> = gains.values().copied().filter(|g| *g > 0.0).collect();
    ideal.sort_by(|a, b| b.total_cmp(a));
    let idcg: f64 = ideal.iter().take(k).enumerate().map(|(i, g)| g / (i as f64 + 2.0).log2()).sum();
    if idcg <= 0.0 {
        0.0
    } else {
        dcg / idcg
    }
}

fn hits_at_k(ranked: &[&str], relevant: &HashSet<&str>, k: usize) -> usize {
    let mut seen = HashSet::new();
    ranked.iter().take(k).filter(|id| relevant.contains(*id) && seen.insert(**id)).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set<'a>(ids: &[&'a str]) -> HashSet<&'a str> {
        ids.iter().copied().collect()
    }

    #[test]
    fn mrr_uses_first_relevant_position() {
        assert_eq!(mrr(&["a", "b", "c"], &set(&["c", "b"])), 0.5);
        assert_eq!(mrr(&["a"], &set(&["z"])), 0.0);
    }

    #[test]
    fn recall_and_precision_at_k() {
        let ranked = ["a", "b", "c", "d"];
        let relevant = set(&["a", "d", "x"]);
        assert!((recall_at_k(&ranked, &relevant, 2) - 1.0 / 3.0).abs() < 1e-12);
        assert!((recall_at_k(&ranked, &relevant, 4) - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(precision_at_k(&ranked, &relevant, 2), 0.5);
        assert_eq!(precision_at_k(&ranked, &relevant, 0), 0.0);
    }

    #[test]
    fn ndcg_is_one_for_ideal_order() {
        let gains: HashMap<&str, f64> = [("a", 3.0), ("b", 2.0), ("c", 1.0)].into_iter().collect();
        assert!((ndcg_at_k(&["a", "b", "c"], &gains, 3) - 1.0).abs() < 1e-12);
        let worse = ndcg_at_k(&["c", "b", "a"], &gains, 3);
        assert!(worse < 1.0 && worse > 0.0);
        assert_eq!(ndcg_at_k(&["z"], &HashMap::new(), 3), 0.0);
    }
}
