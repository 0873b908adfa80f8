// Talent Scout - Core Library
// Identity resolution and relevance ranking over multi-source profile
// fragments. Exposes all modules for use in the CLI and tests.

pub mod config;
pub mod error;
pub mod record;
pub mod normalizer;
pub mod resolver;
pub mod merger;
pub mod vectorizer;
pub mod scorer;
pub mod ranker;
pub mod snapshot;
pub mod service;

// Re-export commonly used types
pub use config::{MatchingConfig, ResolverConfig};
pub use error::{Diagnostic, MatchError, Severity, Stage};
pub use record::{Field, RawRecord, RecordKey, SourceRecord, SourceType};
pub use normalizer::RecordNormalizer;
pub use resolver::{CandidateIdentity, IdentityResolver, Resolution, SplitEvent};
pub use merger::{ContactField, MergeOutput, Profile, ProfileMerger, Sourced};
pub use vectorizer::{DocumentVector, TextVectorizer, TfidfModel};
pub use scorer::{RelevanceScorer, Similarity};
pub use ranker::{CandidateRanker, MatchResult, Page};
pub use snapshot::{ProfileSnapshot, SnapshotStore};
pub use service::{
    IngestReport, MatchOutput, PassReport, Requirement, RequirementFilters, ScoutService,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
