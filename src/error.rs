// 🚨 Error Taxonomy - Typed failures + structured diagnostics
// One bad record or cluster never aborts the rest of a batch: non-fatal
// conditions are collected as Diagnostics and surfaced to the caller.

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// TYPED ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum MatchError {
    /// Mandatory identifying fields (source, external id) are absent.
    /// The record is dropped; sibling records continue.
    #[error("malformed record: {reason}")]
    MalformedRecord { reason: String },

    /// A record could not be confidently placed in any cluster.
    /// Non-fatal: the record stays an unmerged singleton.
    #[error("resolution ambiguity for {record}: {reason}")]
    ResolutionAmbiguity { record: String, reason: String },

    /// Precedence rules could not pick a single value for a field.
    /// The profile is still produced, flagged needs_review.
    #[error("merge conflict in cluster {cluster_id} on field '{field}'")]
    MergeConflict { cluster_id: String, field: String },

    /// Unsupported or empty text. Callers substitute a zero vector.
    #[error("vectorization failed for {subject}: {reason}")]
    Vectorization { subject: String, reason: String },
}

// ============================================================================
// DIAGNOSTICS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Critical, // Record was dropped or cluster was skipped
    Warning,  // Output produced, but needs review
    Info,     // Informational (e.g. split events)
}

/// Pipeline stage that emitted a diagnostic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    Normalize,
    Resolve,
    Merge,
    Vectorize,
}

/// Structured diagnostic surfaced to the calling layer instead of a panic
/// or an aborted pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub stage: Stage,
    /// Record key or cluster id the diagnostic is about
    pub subject: String,
    pub message: String,
}

impl Diagnostic {
    pub fn critical(stage: Stage, subject: &str, message: String) -> Self {
        Diagnostic {
            severity: Severity::Critical,
            stage,
            subject: subject.to_string(),
            message,
        }
    }

    pub fn warning(stage: Stage, subject: &str, message: String) -> Self {
        Diagnostic {
            severity: Severity::Warning,
            stage,
            subject: subject.to_string(),
            message,
        }
    }

    pub fn info(stage: Stage, subject: &str, message: String) -> Self {
        Diagnostic {
            severity: Severity::Info,
            stage,
            subject: subject.to_string(),
            message,
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
