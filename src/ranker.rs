// 🏆 Candidate Ranker - Strict total order + cursor pagination
// Primary key descending score, secondary descending recency, tertiary
// ascending identity id. Identity ids are unique, so no two results ever
// compare equal and pages are stable for a fixed snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::merger::ContactField;

// ============================================================================
// MATCH RESULT
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchResult {
    pub profile_id: String,

    /// Content hash of the requirement this result answers
    pub requirement_id: String,

    /// Similarity in [0, 1]
    pub score: f64,

    /// Shared-term explanation from the scorer
    pub matched_terms: Vec<String>,

    pub display_name: String,

    /// Provenance-tagged contact fields for read-only display/copy
    pub contacts: Vec<ContactField>,

    pub needs_review: bool,

    /// Most recent source activity across the profile's member records
    pub last_activity: DateTime<Utc>,
}

impl MatchResult {
    /// The ranking order: score desc, recency desc, id asc
    pub fn ranking_cmp(&self, other: &MatchResult) -> Ordering {
        other
            .score
            .total_cmp(&self.score)
            .then_with(|| other.last_activity.cmp(&self.last_activity))
            .then_with(|| self.profile_id.cmp(&other.profile_id))
    }
}

// ============================================================================
// PAGE
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page {
    pub entries: Vec<MatchResult>,

    /// Cursor naming the last entry of this page; None on the final page.
    /// Feed back into `paginate` to continue without omission or
    /// duplication over the same ranked snapshot.
    pub next_cursor: Option<String>,
}

// ============================================================================
// CANDIDATE RANKER
// ============================================================================

pub struct CandidateRanker;

impl CandidateRanker {
    pub fn new() -> Self {
        CandidateRanker
    }

    /// Impose the strict total order on a set of match results
    pub fn rank(&self, mut results: Vec<MatchResult>) -> Vec<MatchResult> {
        results.sort_by(|a, b| a.ranking_cmp(b));
        results
    }

    /// Serve the next page after `cursor` from an already-ranked snapshot.
    /// A None cursor starts from the top; a cursor that no longer resolves
    /// (stale snapshot) yields an empty final page rather than repeating
    /// or skipping entries.
    pub fn paginate(
        &self,
        ranked: &[MatchResult],
        cursor: Option<&str>,
        page_size: usize,
    ) -> Page {
        if page_size == 0 {
            return Page {
                entries: Vec::new(),
                next_cursor: None,
            };
        }

        let start = match cursor {
            None => 0,
            Some(id) => match ranked.iter().position(|r| r.profile_id == id) {
                Some(position) => position + 1,
                None => {
                    return Page {
                        entries: Vec::new(),
                        next_cursor: None,
                    }
                }
            },
        };

        let end = (start + page_size).min(ranked.len());
        let entries: Vec<MatchResult> = ranked[start..end].to_vec();
        let next_cursor = if end < ranked.len() {
            entries.last().map(|r| r.profile_id.clone())
        } else {
            None
        };

        Page {
            entries,
            next_cursor,
        }
    }
}

impl Default for CandidateRanker {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn result(id: &str, score: f64, day: u32) -> MatchResult {
        MatchResult {
            profile_id: id.to_string(),
            requirement_id: "req-1".to_string(),
            score,
            matched_terms: Vec::new(),
            display_name: id.to_string(),
            contacts: Vec::new(),
            needs_review: false,
            last_activity: Utc.with_ymd_and_hms(2025, 4, day, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_order_score_then_recency_then_id() {
        let ranker = CandidateRanker::new();
        let ranked = ranker.rank(vec![
            result("ident-c", 0.5, 1),
            result("ident-a", 0.5, 9), // same score, fresher
            result("ident-b", 0.9, 1), // highest score
            result("ident-d", 0.5, 1), // ties with c on score+recency, id decides
        ]);

        let ids: Vec<&str> = ranked.iter().map(|r| r.profile_id.as_str()).collect();
        assert_eq!(ids, vec!["ident-b", "ident-a", "ident-c", "ident-d"]);
    }

    #[test]
    fn test_order_is_strict_no_unresolved_ties() {
        let ranker = CandidateRanker::new();
        // Everything identical except the id
        let ranked = ranker.rank(vec![
            result("ident-b", 0.5, 1),
            result("ident-a", 0.5, 1),
        ]);
        assert_eq!(ranked[0].profile_id, "ident-a");
        assert_eq!(
            ranked[0].ranking_cmp(&ranked[1]),
            std::cmp::Ordering::Less
        );
    }

    #[test]
    fn test_pagination_25_by_10_gives_three_pages() {
        let ranker = CandidateRanker::new();
        let ranked = ranker.rank(
            (0..25)
                .map(|i| result(&format!("ident-{:02}", i), 1.0 - i as f64 / 100.0, 1))
                .collect(),
        );

        let mut seen = Vec::new();
        let mut cursor: Option<String> = None;
        let mut page_sizes = Vec::new();
        loop {
            let page = ranker.paginate(&ranked, cursor.as_deref(), 10);
            page_sizes.push(page.entries.len());
            seen.extend(page.entries.iter().map(|r| r.profile_id.clone()));
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        assert_eq!(page_sizes, vec![10, 10, 5]);
        assert_eq!(seen.len(), 25);
        let mut deduped = seen.clone();
        deduped.sort();
        deduped.dedup();
        assert_eq!(deduped.len(), 25, "no id may repeat across pages");
    }

    #[test]
    fn test_stale_cursor_yields_empty_page() {
        let ranker = CandidateRanker::new();
        let ranked = ranker.rank(vec![result("ident-a", 0.5, 1)]);

        let page = ranker.paginate(&ranked, Some("ident-gone"), 10);
        assert!(page.entries.is_empty());
        assert!(page.next_cursor.is_none());
    }
}
