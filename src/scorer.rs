// 🎯 Relevance Scorer - Clamped cosine similarity with term explanations
// Vectors are L2-normalized by the vectorizer, so cosine is their dot
// product. TF-IDF weights are non-negative; any numeric noise below zero is
// clamped rather than surfaced as a meaningless negative similarity.

use serde::{Deserialize, Serialize};

use crate::vectorizer::{DocumentVector, TfidfModel};

// ============================================================================
// SIMILARITY
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Similarity {
    /// Cosine similarity clamped to [0, 1]
    pub score: f64,

    /// Vocabulary terms carrying non-zero weight in both vectors, sorted.
    /// This is the "why did this profile match" explanation.
    pub shared_terms: Vec<String>,
}

// ============================================================================
// RELEVANCE SCORER
// ============================================================================

pub struct RelevanceScorer;

impl RelevanceScorer {
    pub fn new() -> Self {
        RelevanceScorer
    }

    /// Score one profile vector against the requirement vector.
    /// Zero shared terms scores exactly 0.0.
    pub fn score(
        &self,
        model: &TfidfModel,
        requirement: &DocumentVector,
        profile: &DocumentVector,
    ) -> Similarity {
        let raw = requirement.dot(profile);
        let score = raw.clamp(0.0, 1.0);

        let mut shared_terms: Vec<String> = requirement
            .shared_terms(profile)
            .into_iter()
            .filter_map(|index| model.term(index).map(str::to_string))
            .collect();
        shared_terms.sort();

        Similarity {
            score,
            shared_terms,
        }
    }
}

impl Default for RelevanceScorer {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================
