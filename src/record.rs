// 📇 Record Schema - Canonical per-source profile fragments
// Heterogeneous raw payloads are converted at the ingestion boundary into one
// fixed canonical schema tagged by source type, so nothing downstream branches
// on ad-hoc shapes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// SOURCE TYPE
// ============================================================================

/// Which public source a profile fragment was fetched from
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum SourceType {
    GitHub,
    Qiita,
    OpenAlex,
    Kaken,
}

impl SourceType {
    /// Human-readable name for display
    pub fn name(&self) -> &str {
        match self {
            SourceType::GitHub => "GitHub",
            SourceType::Qiita => "Qiita",
            SourceType::OpenAlex => "OpenAlex",
            SourceType::Kaken => "KAKEN",
        }
    }

    /// Short code used in record keys and logs
    pub fn code(&self) -> &str {
        match self {
            SourceType::GitHub => "github",
            SourceType::Qiita => "qiita",
            SourceType::OpenAlex => "openalex",
            SourceType::Kaken => "kaken",
        }
    }

    /// Parse a source code as it appears in raw batches
    pub fn from_code(code: &str) -> Option<SourceType> {
        match code.trim().to_lowercase().as_str() {
            "github" => Some(SourceType::GitHub),
            "qiita" => Some(SourceType::Qiita),
            "openalex" => Some(SourceType::OpenAlex),
            "kaken" => Some(SourceType::Kaken),
            _ => None,
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

// ============================================================================
// FIELD - explicit unknown marker
// ============================================================================

/// A canonical attribute value. `Unknown` means the source never supplied
/// the field; `Known("")` means the source supplied it empty. The two are
/// never conflated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Field {
    Known(String),
    Unknown,
}

impl Field {
    pub fn from_opt(value: Option<String>) -> Field {
        match value {
            Some(v) => Field::Known(v),
            None => Field::Unknown,
        }
    }

    /// The value, if present and non-empty
    pub fn known(&self) -> Option<&str> {
        match self {
            Field::Known(v) if !v.is_empty() => Some(v),
            _ => None,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Field::Unknown)
    }
}

// ============================================================================
// RECORD KEY
// ============================================================================

/// Identity of a fetch target: (source, external id). Two fetches of the
/// same key are versions of the same record, never two records.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct RecordKey {
    pub source: SourceType,
    pub external_id: String,
}

impl RecordKey {
    pub fn new(source: SourceType, external_id: &str) -> Self {
        RecordKey {
            source,
            external_id: external_id.to_string(),
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source.code(), self.external_id)
    }
}

// ============================================================================
// RAW RECORD - ingestion-boundary shape
// ============================================================================

/// Loosely-shaped payload as delivered by a collection client, before
/// normalization. Every field is optional; the normalizer decides what is
/// mandatory and what becomes `Field::Unknown`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawRecord {
    pub source: Option<String>,
    pub external_id: Option<String>,
    pub display_name: Option<String>,
    pub handle: Option<String>,
    pub email: Option<String>,
    pub affiliation: Option<String>,
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(default)]
    pub topics: Vec<String>,
    pub summary: Option<String>,
    pub fetched_at: Option<DateTime<Utc>>,
}

// ============================================================================
// SOURCE RECORD - canonical schema
// ============================================================================

/// Canonical, normalized profile fragment. Immutable once produced; a new
/// fetch of the same key yields a new SourceRecord that replaces this one
/// in the working set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub key: RecordKey,

    /// Display name as supplied (whitespace-collapsed, width-folded)
    pub display_name: Field,

    /// Ordered matching forms of the name: folded original, reversed token
    /// order, separator-free compact form. Used for blocking and scoring.
    pub name_variants: Vec<String>,

    /// Normalized handle (lowercased, separators folded to spaces)
    pub handle: Field,

    /// Normalized email (lowercased local@domain)
    pub email: Field,

    pub affiliation: Field,

    pub urls: Vec<String>,

    /// Normalized topic / repository / article-tag tokens
    pub topics: Vec<String>,

    /// Free-text experience summary (the NLP corpus contribution)
    pub summary: Field,

    /// When this version was fetched from the source
    pub fetched_at: DateTime<Utc>,
}

impl SourceRecord {
    /// Most recent activity this record evidences. Ranking recency uses
    /// this; today it is the fetch time.
    pub fn activity_timestamp(&self) -> DateTime<Utc> {
        self.fetched_at
    }
}

// ============================================================================
// TESTS
// ============================================================================
