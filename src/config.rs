// ⚙️ Matching Configuration - All tunables in one explicit value
// Thresholds, field weights, and the source-authority ranking are calibration
// inputs, not constants. Each engine receives this at construction; nothing
// is read from ambient process state.

use serde::{Deserialize, Serialize};

use crate::record::SourceType;

// ============================================================================
// RESOLVER CONFIG
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Clustering threshold τ. Pairs scoring strictly above τ merge;
    /// a score of exactly τ does NOT merge (precision over recall).
    pub merge_threshold: f64,

    /// Weight of the best name-variant similarity (Jaro-Winkler)
    pub name_weight: f64,

    /// Weight of exact identifier agreement (same handle or same email)
    pub identifier_weight: f64,

    /// Weight of topic-set overlap (Jaccard)
    pub topic_weight: f64,

    /// Weight of affiliation similarity (Jaro-Winkler)
    pub affiliation_weight: f64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        ResolverConfig {
            merge_threshold: 0.60,
            name_weight: 0.40,
            identifier_weight: 0.30,
            topic_weight: 0.20,
            affiliation_weight: 0.10,
        }
    }
}

// ============================================================================
// MATCHING CONFIG
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchingConfig {
    pub resolver: ResolverConfig,

    /// Source-authority ranking used as the merge tie-breaker after
    /// freshness. Earlier entries win. Sources not listed rank last.
    pub source_authority: Vec<SourceType>,

    /// Per-field confidence decay applied for every conflicting field
    /// during a merge. Must be in (0, 1] so confidence never increases
    /// as disagreement accumulates.
    pub conflict_decay: f64,

    /// Minimum token length kept by the Latin tokenizer
    pub min_token_len: usize,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        MatchingConfig {
            resolver: ResolverConfig::default(),
            // Academic registries carry curated names; code-hosting
            // profiles are self-reported.
            source_authority: vec![
                SourceType::OpenAlex,
                SourceType::Kaken,
                SourceType::GitHub,
                SourceType::Qiita,
            ],
            conflict_decay: 0.85,
            min_token_len: 3,
        }
    }
}

impl MatchingConfig {
    /// Authority rank for a source: position in the configured ranking,
    /// or one past the end when unlisted (lowest authority).
    pub fn authority_rank(&self, source: SourceType) -> usize {
        self.source_authority
            .iter()
            .position(|s| *s == source)
            .unwrap_or(self.source_authority.len())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_weights_sum_to_one() {
        let cfg = ResolverConfig::default();
        let sum = cfg.name_weight + cfg.identifier_weight + cfg.topic_weight
            + cfg.affiliation_weight;
        assert!((sum - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_authority_rank() {
        let cfg = MatchingConfig::default();
        assert_eq!(cfg.authority_rank(SourceType::OpenAlex), 0);
        assert_eq!(cfg.authority_rank(SourceType::Qiita), 3);

        let cfg = MatchingConfig {
            source_authority: vec![SourceType::GitHub],
            ..MatchingConfig::default()
        };
        assert_eq!(cfg.authority_rank(SourceType::GitHub), 0);
        // Unlisted sources rank last
        assert_eq!(cfg.authority_rank(SourceType::Kaken), 1);
    }
}
