use async_trait::async_trait;
use std::collections::HashSet;

use polyrag_core::config::{RerankSettings, RerankStrategy};
use polyrag_core::error::Result;
use polyrag_core::traits::ReRanker;
use polyrag_core::types::{sort_and_rank, SearchResult};

use crate::enhance::content_terms;

pub type ReRankingConfig = RerankSettings;

const RRF_K: f32 = 60.0;

/// Re-scores candidates by query-term overlap with their content.
///
/// Only the first `top_k` candidates scoring at least `score_threshold` are
/// re-scored. The rest keep their score, except under `ReciprocalRank`, where
/// they get the rank-only share `1 / (k + original_rank)`.
pub struct LexicalReRanker {
    config: ReRankingConfig,
}

impl Default for LexicalReRanker {
    fn default() -> Self {
        Self::new(ReRankingConfig::default())
    }
}

impl LexicalReRanker {
    pub fn new(config: ReRankingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ReRankingConfig {
        &self.config
    }

    /// Share of query terms found in `content`, in [0,1].
    pub fn relevance(query_terms: &HashSet<String>, content: &str) -> f32 {
        if query_terms.is_empty() {
            return 0.0;
        }
        let doc = content_terms(content);
        query_terms.iter().filter(|t| doc.contains(*t)).count() as f32 / query_terms.len() as f32
    }

    fn blend(&self, original: f32, relevance: f32) -> f32 {
        let (ow, rw) = (self.config.original_weight, self.config.reranker_weight);
        let total = ow + rw;
        if total <= f32::EPSILON {
            return relevance;
        }
        ((ow * original + rw * relevance) / total).clamp(0.0, 1.0)
    }
}

fn min_max(values: &[f32]) -> Vec<f32> {
    let min = values.iter().copied().fold(f32::INFINITY, f32::min);
    let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let span = max - min;
    if !span.is_finite() || span <= f32::EPSILON {
        return values.to_vec();
    }
    values.iter().map(|v| (v - min) / span).collect()
}

#[async_trait]
impl ReRanker for LexicalReRanker {
    fn name(&self) -> &str {
        "lexical"
    }

    async fn rerank(&self, query: &str, candidates: &[SearchResult]) -> Result<Vec<SearchResult>> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        let terms = content_terms(query);
        let eligible: Vec<usize> = candidates
            .iter()
            .enumerate()
            .take(self.config.top_k)
            .filter(|(_, c)| c.score >= self.config.score_threshold)
            .map(|(i, _)| i)
            .collect();
        let relevances: Vec<f32> =
            eligible.iter().map(|&i| Self::relevance(&terms, &candidates[i].chunk.content)).collect();

        let mut new_scores: Vec<Option<f32>> = vec![None; candidates.len()];
        match self.config.strategy {
            RerankStrategy::Replace => {
                for (&i, &rel) in eligible.iter().zip(&relevances) {
                    new_scores[i] = Some(rel);
                }
            }
            RerankStrategy::Weighted => {
                for (&i, &rel) in eligible.iter().zip(&relevances) {
                    new_scores[i] = Some(self.blend(candidates[i].score, rel));
                }
            }
            RerankStrategy::Normalized => {
                let originals: Vec<f32> = eligible.iter().map(|&i| candidates[i].score).collect();
                let (originals, rels) = if self.config.normalize_scores {
                    (min_max(&originals), min_max(&relevances))
                } else {
                    (originals, relevances.clone())
                };
                for ((&i, o), r) in eligible.iter().zip(originals).zip(rels) {
                    new_scores[i] = Some(self.blend(o, r));
                }
            }
            RerankStrategy::ReciprocalRank => {
                // positions among the eligible set, by relevance; ties keep input order
                let mut by_relevance: Vec<usize> = (0..eligible.len()).collect();
                by_relevance.sort_by(|&a, &b| relevances[b].total_cmp(&relevances[a]));
                let mut relevance_rank = vec![0usize; eligible.len()];
                for (pos, &slot) in by_relevance.iter().enumerate() {
                    relevance_rank[slot] = pos + 1;
                }
                for (i, score) in new_scores.iter_mut().enumerate() {
                    let original = 1.0 / (RRF_K + (i + 1) as f32);
                    let reranked = eligible
                        .iter()
                        .position(|&e| e == i)
                        .map_or(0.0, |slot| 1.0 / (RRF_K + relevance_rank[slot] as f32));
                    *score = Some((original + reranked).min(1.0));
                }
            }
        }

        let strategy = self.config.strategy;
        let rescored = candidates
            .iter()
            .zip(new_scores)
            .map(|(c, score)| match score {
                Some(s) => c.with_score(s).annotated(format!("rerank {strategy:?}: {:.4} -> {s:.4}", c.score)),
                None => c.clone(),
            })
            .collect();
        Ok(sort_and_rank(rescored))
    }
}
