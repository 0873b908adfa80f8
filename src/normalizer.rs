// 🧹 Record Normalizer - Raw payloads → canonical SourceRecords
// NFKC width fold, case fold for matching fields, whitespace collapse, and
// ordered name-variant generation. A record missing its mandatory identifying
// fields is dropped with a MalformedRecord error; siblings continue.

use chrono::{DateTime, Utc};
use unicode_normalization::UnicodeNormalization;

use crate::error::MatchError;
use crate::record::{Field, RawRecord, RecordKey, SourceRecord, SourceType};

// ============================================================================
// TEXT FOLDING
// ============================================================================

/// NFKC fold (full-width → half-width among other compatibility folds) and
/// whitespace collapse. Case is preserved; use for display fields.
pub fn fold_display(text: &str) -> String {
    let folded: String = text.nfkc().collect();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// NFKC fold, lowercase, whitespace collapse. Use for matching fields.
pub fn fold_matching(text: &str) -> String {
    let folded: String = text.nfkc().collect();
    folded
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Handle normalization: separators commonly used in login names become
/// spaces so "taro_yamada", "taro-yamada" and the name "Taro Yamada" all
/// normalize to the same matching form.
pub fn fold_handle(handle: &str) -> String {
    let separated: String = handle
        .chars()
        .map(|c| if c == '_' || c == '-' || c == '.' { ' ' } else { c })
        .collect();
    fold_matching(&separated)
}

fn fold_email(email: &str) -> Option<String> {
    let folded = fold_matching(email).replace(' ', "");
    if folded.contains('@') && !folded.starts_with('@') && !folded.ends_with('@') {
        Some(folded)
    } else {
        None
    }
}

/// Ordered name-variant forms: folded original, reversed token order,
/// separator-free compact form. Later matching compares transliterated or
/// reordered names against ANY variant, so "Yamada Taro" and "Taro Yamada"
/// still meet.
pub fn name_variants(name: &str) -> Vec<String> {
    let folded = fold_matching(name);
    if folded.is_empty() {
        return Vec::new();
    }

    let tokens: Vec<&str> = folded.split(' ').collect();
    let mut variants = vec![folded.clone()];

    if tokens.len() > 1 {
        let reversed: Vec<&str> = tokens.iter().rev().copied().collect();
        variants.push(reversed.join(" "));
        variants.push(tokens.join(""));
    }

    variants.dedup();
    variants
}

// ============================================================================
// RECORD NORMALIZER
// ============================================================================

pub struct RecordNormalizer;

impl RecordNormalizer {
    pub fn new() -> Self {
        RecordNormalizer
    }

    /// Convert one raw per-source payload into the canonical schema.
    ///
    /// Absent fields become `Field::Unknown`, never an empty string.
    /// Re-applying to an already-seen record yields an equivalent
    /// SourceRecord (no hidden state, no wall-clock reads).
    pub fn normalize(&self, raw: &RawRecord) -> Result<SourceRecord, MatchError> {
        let source_code = raw
            .source
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| MatchError::MalformedRecord {
                reason: "missing source identifier".to_string(),
            })?;

        let source = SourceType::from_code(source_code).ok_or_else(|| {
            MatchError::MalformedRecord {
                reason: format!("unrecognized source '{}'", source_code),
            }
        })?;

        let external_id = raw
            .external_id
            .as_deref()
            .map(|s| fold_display(s))
            .filter(|s| !s.is_empty())
            .ok_or_else(|| MatchError::MalformedRecord {
                reason: format!("missing external id for source '{}'", source),
            })?;

        let display_name = Field::from_opt(raw.display_name.as_deref().map(fold_display));

        let variants = match display_name.known() {
            Some(name) => name_variants(name),
            None => Vec::new(),
        };

        let handle = Field::from_opt(raw.handle.as_deref().map(fold_handle));

        let email = Field::from_opt(match raw.email.as_deref() {
            Some(e) => Some(fold_email(e).unwrap_or_default()),
            None => None,
        });

        let affiliation = Field::from_opt(raw.affiliation.as_deref().map(fold_matching));

        let mut urls: Vec<String> = raw
            .urls
            .iter()
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty())
            .collect();
        urls.dedup();

        let mut topics: Vec<String> = raw
            .topics
            .iter()
            .map(|t| fold_matching(t))
            .filter(|t| !t.is_empty())
            .collect();
        topics.sort();
        topics.dedup();

        let summary = Field::from_opt(raw.summary.as_deref().map(fold_display));

        // A missing fetch timestamp maps to the epoch, an explicitly "oldest
        // possible" version, so re-normalization stays deterministic.
        let fetched_at = raw.fetched_at.unwrap_or(DateTime::<Utc>::UNIX_EPOCH);

        Ok(SourceRecord {
            key: RecordKey::new(source, &external_id),
            display_name,
            name_variants: variants,
            handle,
            email,
            affiliation,
            urls,
            topics,
            summary,
            fetched_at,
        })
    }
}

impl Default for RecordNormalizer {
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

    fn raw(source: &str, id: &str) -> RawRecord {
        RawRecord {
            source: Some(source.to_string()),
            external_id: Some(id.to_string()),
            ..RawRecord::default()
        }
    }

    #[test]
    fn test_mandatory_fields() {
        let normalizer = RecordNormalizer::new();

        let missing_source = RawRecord {
            external_id: Some("x".to_string()),
            ..RawRecord::default()
        };
        assert!(matches!(
            normalizer.normalize(&missing_source),
            Err(MatchError::MalformedRecord { .. })
        ));

        let missing_id = RawRecord {
            source: Some("github".to_string()),
            ..RawRecord::default()
        };
        assert!(matches!(
            normalizer.normalize(&missing_id),
            Err(MatchError::MalformedRecord { .. })
        ));

        let unknown_source = raw("myspace", "x");
        assert!(matches!(
            normalizer.normalize(&unknown_source),
            Err(MatchError::MalformedRecord { .. })
        ));
    }

    #[test]
    fn test_width_and_case_fold() {
        // Full-width ASCII folds to half-width, case folds for matching
        assert_eq!(fold_matching("Ｐｙｔｈｏｎ　ＮＬＰ"), "python nlp");
        assert_eq!(fold_display("  Taro   Yamada "), "Taro Yamada");
    }

    #[test]
    fn test_name_variants_ordered() {
        assert_eq!(
            name_variants("Taro Yamada"),
            vec!["taro yamada", "yamada taro", "taroyamada"]
        );
        // Single-token names (e.g. CJK without spaces) get one variant
        assert_eq!(name_variants("山田太郎"), vec!["山田太郎"]);
        assert!(name_variants("   ").is_empty());
    }

    #[test]
    fn test_handle_separator_fold() {
        assert_eq!(fold_handle("taro_yamada"), "taro yamada");
        assert_eq!(fold_handle("Taro-Yamada"), "taro yamada");
        // A handle and a spelled-out name normalize to the same form
        assert_eq!(fold_handle("taro_yamada"), fold_matching("Taro Yamada"));
    }

    #[test]
    fn test_absent_vs_empty_fields() {
        let normalizer = RecordNormalizer::new();

        let record = normalizer.normalize(&raw("github", "octocat")).unwrap();
        assert!(record.email.is_unknown());
        assert!(record.affiliation.is_unknown());

        let mut with_empty = raw("github", "octocat");
        with_empty.email = Some("not-an-email".to_string());
        let record = normalizer.normalize(&with_empty).unwrap();
        // Supplied but unusable: present, empty, and distinguishable from Unknown
        assert!(!record.email.is_unknown());
        assert_eq!(record.email.known(), None);
    }

    #[test]
    fn test_renormalization_is_equivalent() {
        let normalizer = RecordNormalizer::new();
        let mut input = raw("qiita", "taro_yamada");
        input.display_name = Some("山田太郎".to_string());
        input.topics = vec!["NLP-Tools".to_string(), "nlp-tools".to_string()];
        input.fetched_at = Some(Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap());

        let first = normalizer.normalize(&input).unwrap();
        let second = normalizer.normalize(&input).unwrap();
        assert_eq!(first, second);
        // Duplicate topics collapse after folding
        assert_eq!(first.topics, vec!["nlp-tools"]);
    }
}
