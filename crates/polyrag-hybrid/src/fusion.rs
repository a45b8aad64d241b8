//! Combining per-modality ranked lists into one ranking.
//!
//! Lists are visited in modality order (text, image, structured) and chunks in
//! list order, so equal fused scores keep that order after the stable sort.

use std::collections::{BTreeMap, HashMap};

use polyrag_core::types::{sort_and_rank, ChunkId, FusionMethod, Modality, ModalityFusionConfig, SearchResult};

pub type ModalityResults = BTreeMap<Modality, Vec<SearchResult>>;

struct Fused {
    base: SearchResult,
    score: f32,
    sources: Vec<Modality>,
    notes: Vec<String>,
}

pub fn fuse(results: &ModalityResults, config: &ModalityFusionConfig) -> Vec<SearchResult> {
    match config.method() {
        FusionMethod::Weighted => weighted_fusion(results, config),
        FusionMethod::ReciprocalRank => rrf_fusion(results, config),
    }
}

/// Weighted score fusion.
///
/// When only one modality produced anything its list is returned as is.
pub fn weighted_fusion(results: &ModalityResults, config: &ModalityFusionConfig) -> Vec<SearchResult> {
    let non_empty: Vec<(Modality, &Vec<SearchResult>)> =
        results.iter().filter(|(_, list)| !list.is_empty()).map(|(m, list)| (*m, list)).collect();
    match non_empty.as_slice() {
        [] => return Vec::new(),
        [(_, only)] => return (*only).clone(),
        _ => {}
    }

    let weights = config.weights();
    let mut acc = Accumulator::default();
    for (modality, list) in non_empty {
        let scores = if config.normalize() { min_max(list) } else { list.iter().map(|r| r.score).collect() };
        let weight = weights.get(modality);
        for (hit, score) in list.iter().zip(scores) {
            let contribution = score * weight;
            acc.add(modality, hit, contribution, format!("{modality}: {score:.4} x {weight:.2}"));
        }
    }

    let fused = acc.finish(|score| score).into_iter().filter(|r| r.score >= config.min_score()).collect();
    let mut ranked = sort_and_rank(fused);
    ranked.truncate(config.max_results());
    ranked
}

/// Reciprocal rank fusion: each hit at 1-based position `r` adds `1 / (k + r)`.
pub fn rrf_fusion(results: &ModalityResults, config: &ModalityFusionConfig) -> Vec<SearchResult> {
    let k = config.rrf_k();
    let mut acc = Accumulator::default();
    for (modality, list) in results {
        for (pos, hit) in list.iter().enumerate() {
            let rank = pos + 1;
            let contribution = 1.0 / (k + rank as f32);
            acc.add(*modality, hit, contribution, format!("{modality}: rrf 1/({k}+{rank})"));
        }
    }
    let mut ranked = sort_and_rank(acc.finish(|score| score.min(1.0)));
    ranked.truncate(config.max_results());
    ranked
}

/// Scores rescaled to [0,1]; a list of equal scores is left alone.
fn min_max(list: &[SearchResult]) -> Vec<f32> {
    let (min, max) = list
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), r| (lo.min(r.score), hi.max(r.score)));
    let span = max - min;
    if !span.is_finite() || span <= f32::EPSILON {
        return list.iter().map(|r| r.score).collect();
    }
    list.iter().map(|r| (r.score - min) / span).collect()
}

#[derive(Default)]
struct Accumulator {
    order: Vec<ChunkId>,
    by_id: HashMap<ChunkId, Fused>,
}

impl Accumulator {
    fn add(&mut self, modality: Modality, hit: &SearchResult, contribution: f32, note: String) {
        match self.by_id.get_mut(hit.id()) {
            Some(entry) => {
                // a chunk listed twice by one modality counts once
                if entry.sources.contains(&modality) {
                    return;
                }
                entry.score += contribution;
                entry.sources.push(modality);
                entry.notes.push(note);
            }
            None => {
                self.order.push(hit.id().to_string());
                self.by_id.insert(
                    hit.id().to_string(),
                    Fused { base: hit.clone(), score: contribution, sources: vec![modality], notes: vec![note] },
                );
            }
        }
    }

    fn finish(mut self, final_score: impl Fn(f32) -> f32) -> Vec<SearchResult> {
        self.order
            .iter()
            .filter_map(|id| self.by_id.remove(id))
            .map(|f| {
                let mut explanation = f.base.explanation.clone();
                explanation.extend(f.notes);
                SearchResult { score: final_score(f.score), sources: f.sources, explanation, ..f.base }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polyrag_core::types::{Chunk, ChunkMetadata, FusionSettings, ModalityWeights};
    use proptest::prelude::*;
    use std::sync::Arc;

    fn hit(id: &str, modality: Modality, score: f32) -> SearchResult {
        let chunk = Chunk::new(id, "doc", id).with_metadata(ChunkMetadata::for_modality(modality));
        SearchResult::new(Arc::new(chunk), score)
    }

    fn list(modality: Modality, hits: &[(&str, f32)]) -> Vec<SearchResult> {
        sort_and_rank(hits.iter().map(|(id, s)| hit(id, modality, *s)).collect())
    }

    fn config(method: FusionMethod, normalize: bool, weights: ModalityWeights) -> ModalityFusionConfig {
        ModalityFusionConfig::new(FusionSettings { method, normalize, weights, max_results: 50, ..Default::default() })
            .expect("valid config")
    }

    fn ids(results: &[SearchResult]) -> Vec<&str> {
        results.iter().map(SearchResult::id).collect()
    }

    #[test]
    fn weighted_sums_evidence_across_modalities() {
        let mut results = ModalityResults::new();
        results.insert(Modality::Text, list(Modality::Text, &[("1", 0.9)]));
        results.insert(Modality::Image, list(Modality::Image, &[("1", 0.6), ("2", 0.5)]));
        let cfg = config(FusionMethod::Weighted, false, ModalityWeights::new(0.5, 0.5, 0.0));

        let fused = weighted_fusion(&results, &cfg);
        assert_eq!(ids(&fused), ["1", "2"]);
        assert!((fused[0].score - 0.75).abs() < 1e-6);
        assert!((fused[1].score - 0.25).abs() < 1e-6);
        assert_eq!(fused[0].sources, vec![Modality::Text, Modality::Image]);
        assert_eq!(fused[1].rank, 2);
    }

    #[test]
    fn rrf_rewards_agreement() {
        let mut results = ModalityResults::new();
        results.insert(Modality::Text, list(Modality::Text, &[("1", 0.9), ("2", 0.8)]));
        results.insert(Modality::Image, list(Modality::Image, &[("2", 0.4)]));
        let cfg = config(FusionMethod::ReciprocalRank, true, ModalityWeights::default());

        let fused = rrf_fusion(&results, &cfg);
        assert_eq!(ids(&fused), ["2", "1"]);
        assert!((fused[0].score - (1.0 / 61.0 + 1.0 / 62.0)).abs() < 1e-6);
        assert!((fused[1].score - 1.0 / 61.0).abs() < 1e-6);
    }

    #[test]
    fn single_modality_is_returned_verbatim() {
        let mut results = ModalityResults::new();
        let text = list(Modality::Text, &[("a", 0.9), ("b", 0.2)]);
        results.insert(Modality::Text, text.clone());
        results.insert(Modality::Image, Vec::new());
        let fused = weighted_fusion(&results, &ModalityFusionConfig::default());
        assert_eq!(ids(&fused), ids(&text));
        assert_eq!(fused[1].score, 0.2);
    }

    #[test]
    fn all_empty_fuses_to_empty() {
        let mut results = ModalityResults::new();
        results.insert(Modality::Text, Vec::new());
        assert!(weighted_fusion(&results, &ModalityFusionConfig::default()).is_empty());
        assert!(rrf_fusion(&results, &ModalityFusionConfig::default()).is_empty());
    }

    #[test]
    fn constant_lists_are_not_normalized_away() {
        let mut results = ModalityResults::new();
        results.insert(Modality::Text, list(Modality::Text, &[("a", 0.4), ("b", 0.4)]));
        results.insert(Modality::Structured, list(Modality::Structured, &[("c", 0.8), ("d", 0.2)]));
        let cfg = config(FusionMethod::Weighted, true, ModalityWeights::new(0.5, 0.0, 0.5));
        let fused = weighted_fusion(&results, &cfg);
        let a = fused.iter().find(|r| r.id() == "a").expect("a present");
        assert!((a.score - 0.2).abs() < 1e-6);
        let d = fused.iter().find(|r| r.id() == "d").expect("d present");
        assert_eq!(d.score, 0.0);
    }

    #[test]
    fn min_score_and_max_results_apply() {
        let mut results = ModalityResults::new();
        results.insert(Modality::Text, list(Modality::Text, &[("a", 0.9), ("b", 0.1), ("c", 0.05)]));
        results.insert(Modality::Image, list(Modality::Image, &[("d", 0.8)]));
        let cfg = ModalityFusionConfig::new(FusionSettings {
            normalize: false,
            min_score: 0.05,
            max_results: 2,
            weights: ModalityWeights::new(0.5, 0.5, 0.0),
            ..Default::default()
        })
        .expect("valid");
        let fused = weighted_fusion(&results, &cfg);
        assert_eq!(ids(&fused), ["a", "d"]);
    }

    fn arb_list(prefix: &'static str) -> impl Strategy<Value = Vec<(String, f32)>> {
        prop::collection::vec((0u8..20, 0.0f32..1.0), 0..12).prop_map(move |items| {
            let mut seen = std::collections::HashSet::new();
            items
                .into_iter()
                .filter(|(n, _)| seen.insert(*n))
                .map(|(n, s)| (format!("{prefix}{n}"), s))
                .collect()
        })
    }

    fn build(modality: Modality, items: &[(String, f32)]) -> Vec<SearchResult> {
        sort_and_rank(items.iter().map(|(id, s)| hit(id, modality, *s)).collect())
    }

    proptest! {
        #[test]
        fn fused_ranks_follow_scores(text in arb_list("c"), image in arb_list("c"), rrf in any::<bool>()) {
            let mut results = ModalityResults::new();
            results.insert(Modality::Text, build(Modality::Text, &text));
            results.insert(Modality::Image, build(Modality::Image, &image));
            let method = if rrf { FusionMethod::ReciprocalRank } else { FusionMethod::Weighted };
            let fused = fuse(&results, &config(method, true, ModalityWeights::default()));
            for (i, r) in fused.iter().enumerate() {
                prop_assert_eq!(r.rank, i + 1);
            }
            for pair in fused.windows(2) {
                prop_assert!(pair[0].score >= pair[1].score);
            }
        }

        #[test]
        fn rrf_keeps_disjoint_lists_whole(text in arb_list("t"), image in arb_list("i")) {
            let mut results = ModalityResults::new();
            results.insert(Modality::Text, build(Modality::Text, &text));
            results.insert(Modality::Image, build(Modality::Image, &image));
            let fused = rrf_fusion(&results, &config(FusionMethod::ReciprocalRank, false, ModalityWeights::default()));
            prop_assert_eq!(fused.len(), text.len() + image.len());
            for r in &fused {
                let expected = if r.id().starts_with('t') { Modality::Text } else { Modality::Image };
                prop_assert_eq!(r.sources.clone(), vec![expected]);
            }
        }

        #[test]
        fn rrf_preserves_single_list_order(text in arb_list("t")) {
            let mut results = ModalityResults::new();
            let input = build(Modality::Text, &text);
            results.insert(Modality::Text, input.clone());
            let fused = rrf_fusion(&results, &config(FusionMethod::ReciprocalRank, false, ModalityWeights::default()));
            prop_assert_eq!(ids(&fused), ids(&input));
        }

        #[test]
        fn rrf_shared_chunk_beats_each_contribution(pos_a in 0usize..5, pos_b in 0usize..5) {
            let text: Vec<(String, f32)> = (0..5).map(|i| (if i == pos_a { "shared".into() } else { format!("t{i}") }, 1.0 - i as f32 * 0.1)).collect();
            let image: Vec<(String, f32)> = (0..5).map(|i| (if i == pos_b { "shared".into() } else { format!("i{i}") }, 1.0 - i as f32 * 0.1)).collect();
            let mut results = ModalityResults::new();
            results.insert(Modality::Text, build(Modality::Text, &text));
            results.insert(Modality::Image, build(Modality::Image, &image));
            let fused = rrf_fusion(&results, &config(FusionMethod::ReciprocalRank, false, ModalityWeights::default()));
            let shared: Vec<_> = fused.iter().filter(|r| r.id() == "shared").collect();
            prop_assert_eq!(shared.len(), 1);
            let a = 1.0 / (60.0 + (pos_a + 1) as f32);
            let b = 1.0 / (60.0 + (pos_b + 1) as f32);
            prop_assert!(shared[0].score >= a && shared[0].score >= b);
        }
    }
}
