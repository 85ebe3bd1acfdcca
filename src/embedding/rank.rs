//! Hybrid lexical + semantic scoring shared by symbol search and recall.

use std::collections::HashMap;

use crate::config::RetrievalConfig;

/// Blend weights, normalized to sum to 1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Weights {
    pub lexical: f64,
    pub semantic: f64,
}

impl Weights {
    pub fn new(lexical: f64, semantic: f64) -> Self {
        let lexical = lexical.max(0.0);
        let semantic = semantic.max(0.0);
        let sum = lexical + semantic;
        if sum <= f64::EPSILON {
            return Self {
                lexical: 1.0,
                semantic: 0.0,
            };
        }
        Self {
            lexical: lexical / sum,
            semantic: semantic / sum,
        }
    }
}

impl From<&RetrievalConfig> for Weights {
    fn from(config: &RetrievalConfig) -> Self {
        Self::new(config.lexical_weight, config.semantic_weight)
    }
}

/// Map FTS5 `bm25()` ranks (negative, lower is better) onto `(0, 1]`,
/// the best hit scoring 1. The first occurrence of an id wins.
pub fn normalize_lexical(ranked: &[(String, f64)]) -> HashMap<String, f64> {
    let best = ranked.iter().map(|(_, rank)| -rank).fold(0.0_f64, f64::max);
    let mut scores = HashMap::with_capacity(ranked.len());
    for (id, rank) in ranked {
        let score = if best > 0.0 { (-rank / best).clamp(0.0, 1.0) } else { 1.0 };
        scores.entry(id.clone()).or_insert(score);
    }
    scores
}

/// Cosine similarity from the L2 distance between two unit vectors.
pub fn cosine_from_l2(distance: f64) -> f64 {
    (1.0 - distance * distance / 2.0).clamp(-1.0, 1.0)
}

/// Final score for one candidate.
///
/// With both signals the weighted sum applies. A lexical-only candidate keeps
/// its full lexical score, so rows still waiting for a vector are not
/// penalized. A semantic-only candidate gets only the semantic share.
pub fn hybrid(lexical: Option<f64>, semantic: Option<f64>, weights: Weights) -> f64 {
    match (lexical, semantic) {
        (Some(l), Some(s)) => weights.lexical * l + weights.semantic * s.max(0.0),
        (Some(l), None) => l,
        (None, Some(s)) => weights.semantic * s.max(0.0),
        (None, None) => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weights_normalize() {
        let w = Weights::new(3.0, 1.0);
        assert!((w.lexical - 0.75).abs() < 1e-9);
        assert!((w.semantic - 0.25).abs() < 1e-9);
        assert_eq!(Weights::new(0.0, 0.0), Weights { lexical: 1.0, semantic: 0.0 });
    }

    #[test]
    fn best_bm25_rank_scores_one() {
        let ranked = vec![
            ("a".to_string(), -8.0),
            ("b".to_string(), -2.0),
            ("a".to_string(), -1.0),
        ];
        let scores = normalize_lexical(&ranked);
        assert_eq!(scores["a"], 1.0);
        assert!((scores["b"] - 0.25).abs() < 1e-9);
    }

    #[test]
    fn identical_vectors_have_unit_cosine() {
        assert_eq!(cosine_from_l2(0.0), 1.0);
        assert!((cosine_from_l2(std::f64::consts::SQRT_2)).abs() < 1e-9);
        assert_eq!(cosine_from_l2(2.0), -1.0);
    }

    #[test]
    fn hybrid_blends_and_degrades() {
        let w = Weights::new(0.6, 0.4);
        assert!((hybrid(Some(1.0), Some(0.5), w) - 0.8).abs() < 1e-9);
        assert_eq!(hybrid(Some(0.7), None, w), 0.7);
        assert!((hybrid(None, Some(1.0), w) - 0.4).abs() < 1e-9);
        assert_eq!(hybrid(None, Some(-0.5), w), 0.0);
    }
}
