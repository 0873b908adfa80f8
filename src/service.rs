// 🧭 Scout Service - Orchestration facade over the matching pipeline
// Batch ingestion with per-record isolation, the resolution/merge pass with
// atomic snapshot publication, and requirement matching over the published
// snapshot. This is the single entry point the collection and presentation
// boundaries talk to.

use chrono::Utc;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::config::MatchingConfig;
use crate::error::{Diagnostic, Stage};
use crate::merger::ProfileMerger;
use crate::normalizer::{fold_matching, RecordNormalizer};
use crate::ranker::{CandidateRanker, MatchResult, Page};
use crate::record::{RawRecord, RecordKey, SourceRecord, SourceType};
use crate::resolver::{IdentityResolver, Resolution, SplitEvent};
use crate::scorer::RelevanceScorer;
use crate::snapshot::{snapshot_id_for, ProfileSnapshot, SnapshotStore};
use crate::vectorizer::{DocumentVector, TextVectorizer};

// ============================================================================
// REQUIREMENT
// ============================================================================

/// A hiring requirement: free text plus optional structured filters.
/// Ephemeral; lives only for the duration of a query.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Requirement {
    pub text: String,

    #[serde(default)]
    pub filters: RequirementFilters,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequirementFilters {
    /// Substring filter over display name, affiliation and corpus
    pub keyword: Option<String>,

    /// When non-empty, a profile must have a member from one of these
    pub sources: Vec<SourceType>,
}

/// Content hash identifying a requirement snapshot inside MatchResults
pub fn requirement_id(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(fold_matching(text).as_bytes());
    let digest = hasher.finalize();
    let mut id = String::from("req-");
    for byte in digest.iter().take(8) {
        id.push_str(&format!("{:02x}", byte));
    }
    id
}

// ============================================================================
// REPORTS
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestReport {
    /// Correlation id for log lines of this batch
    pub batch_id: Uuid,
    pub accepted: usize,
    /// One critical diagnostic per dropped record
    pub dropped: Vec<Diagnostic>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PassReport {
    pub snapshot_id: String,
    pub record_count: usize,
    pub cluster_count: usize,
    pub splits: Vec<SplitEvent>,
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug)]
pub struct MatchOutput {
    pub results: Vec<MatchResult>,
    pub diagnostics: Vec<Diagnostic>,
}

// ============================================================================
// SCOUT SERVICE
// ============================================================================

pub struct ScoutService {
    config: MatchingConfig,
    normalizer: RecordNormalizer,
    resolver: IdentityResolver,
    merger: ProfileMerger,
    scorer: RelevanceScorer,
    ranker: CandidateRanker,
    store: SnapshotStore,

    /// Working set of the latest version of every record, keyed by
    /// (source, external id). Guarded separately from the published
    /// snapshot: ingestion never blocks readers.
    working: Mutex<BTreeMap<RecordKey, SourceRecord>>,
}

impl ScoutService {
    pub fn new(config: MatchingConfig) -> Self {
        ScoutService {
            resolver: IdentityResolver::new(config.resolver.clone()),
            merger: ProfileMerger::new(config.clone()),
            normalizer: RecordNormalizer::new(),
            scorer: RelevanceScorer::new(),
            ranker: CandidateRanker::new(),
            store: SnapshotStore::new(),
            working: Mutex::new(BTreeMap::new()),
            config,
        }
    }

    /// Normalize and admit a batch of raw records.
    ///
    /// Records arrive in no particular order and may duplicate earlier
    /// fetches; the newest fetched_at per key wins. A malformed record is
    /// dropped with a diagnostic and never aborts its siblings.
    pub fn ingest_batch(&self, batch: &[RawRecord]) -> IngestReport {
        let batch_id = Uuid::new_v4();
        let mut accepted = 0usize;
        let mut dropped = Vec::new();

        let mut working = lock(&self.working);
        for raw in batch {
            match self.normalizer.normalize(raw) {
                Ok(record) => {
                    let replace = working
                        .get(&record.key)
                        .map(|existing| record.fetched_at >= existing.fetched_at)
                        .unwrap_or(true);
                    if replace {
                        working.insert(record.key.clone(), record);
                    }
                    accepted += 1;
                }
                Err(err) => {
                    warn!("batch {}: dropping record: {}", batch_id, err);
                    dropped.push(Diagnostic::critical(
                        Stage::Normalize,
                        &raw.external_id.clone().unwrap_or_else(|| "?".to_string()),
                        err.to_string(),
                    ));
                }
            }
        }

        info!(
            "batch {}: accepted {} of {} records",
            batch_id,
            accepted,
            batch.len()
        );
        IngestReport {
            batch_id,
            accepted,
            dropped,
        }
    }

    /// Run one resolution + merge pass over the working set and publish
    /// the result atomically.
    ///
    /// The pass is idempotent: re-running over an unchanged working set
    /// republishes an identical partition and identical profiles. Until
    /// `publish` completes, readers keep the previous snapshot, so a pass
    /// that dies half-way leaves nothing inconsistent behind.
    pub fn rebuild(&self) -> PassReport {
        let records: Vec<SourceRecord> =
            lock(&self.working).values().cloned().collect();

        // The previously published partition, for split reporting
        let published = self.store.load();
        let previous = Resolution {
            identities: published.identities.clone(),
            splits: Vec::new(),
            diagnostics: Vec::new(),
        };

        let resolution = self.resolver.resolve(&records, Some(&previous));
        let mut diagnostics = resolution.diagnostics.clone();

        let record_map: BTreeMap<RecordKey, SourceRecord> = records
            .into_iter()
            .map(|r| (r.key.clone(), r))
            .collect();

        let mut profiles = BTreeMap::new();
        for identity in &resolution.identities {
            match self.merger.merge(identity, &record_map) {
                Some(output) => {
                    diagnostics.extend(output.diagnostics);
                    profiles.insert(identity.cluster_id.clone(), output.profile);
                }
                None => {
                    // Per-cluster isolation: skip, report, keep going
                    diagnostics.push(Diagnostic::critical(
                        Stage::Merge,
                        &identity.cluster_id,
                        "no member records available; cluster skipped".to_string(),
                    ));
                }
            }
        }

        let snapshot = ProfileSnapshot {
            snapshot_id: snapshot_id_for(&resolution.identities),
            created_at: Utc::now(),
            identities: resolution.identities,
            profiles,
            records: record_map,
        };
        let snapshot_id = snapshot.snapshot_id.clone();
        let record_count = snapshot.records.len();
        let cluster_count = snapshot.identities.len();
        self.store.publish(snapshot);

        info!(
            "published snapshot {}: {} records, {} clusters",
            snapshot_id, record_count, cluster_count
        );
        PassReport {
            snapshot_id,
            record_count,
            cluster_count,
            splits: resolution.splits,
            diagnostics,
        }
    }

    /// The currently published snapshot (read-only)
    pub fn snapshot(&self) -> Arc<ProfileSnapshot> {
        self.store.load()
    }

    /// Score and rank the published profiles against a hiring requirement.
    ///
    /// The TF-IDF space is fit fresh over (requirement + filtered profile
    /// corpora), exactly as wide as this query needs; an identical snapshot
    /// and requirement always reproduce identical scores.
    pub fn match_requirements(&self, requirement: &Requirement) -> MatchOutput {
        let mut diagnostics = Vec::new();

        if requirement.text.trim().is_empty() {
            warn!("empty requirement text; nothing to match");
            return MatchOutput {
                results: Vec::new(),
                diagnostics,
            };
        }

        let snapshot = self.store.load();
        let profiles: Vec<_> = snapshot
            .profiles
            .values()
            .filter(|p| passes_filters(p, &requirement.filters))
            .collect();
        if profiles.is_empty() {
            return MatchOutput {
                results: Vec::new(),
                diagnostics,
            };
        }

        let mut corpus: Vec<&str> = Vec::with_capacity(profiles.len() + 1);
        corpus.push(requirement.text.as_str());
        corpus.extend(profiles.iter().map(|p| p.corpus.as_str()));

        let vectorizer = TextVectorizer::new(self.config.min_token_len);
        let model = vectorizer.fit(&corpus);

        let requirement_vector = match model.vectorize("requirement", &requirement.text) {
            Ok(vector) => vector,
            Err(err) => {
                diagnostics.push(Diagnostic::warning(
                    Stage::Vectorize,
                    "requirement",
                    err.to_string(),
                ));
                DocumentVector::zero()
            }
        };

        let req_id = requirement_id(&requirement.text);
        let mut results = Vec::with_capacity(profiles.len());
        for profile in &profiles {
            let vector = match model.vectorize(&profile.identity_id, &profile.corpus) {
                Ok(vector) => vector,
                Err(err) => {
                    diagnostics.push(Diagnostic::warning(
                        Stage::Vectorize,
                        &profile.identity_id,
                        err.to_string(),
                    ));
                    DocumentVector::zero()
                }
            };
            let similarity = self.scorer.score(&model, &requirement_vector, &vector);
            results.push(MatchResult {
                profile_id: profile.identity_id.clone(),
                requirement_id: req_id.clone(),
                score: similarity.score,
                matched_terms: similarity.shared_terms,
                display_name: profile.display_name.value.clone(),
                contacts: profile.contacts.clone(),
                needs_review: profile.needs_review,
                last_activity: profile.last_activity,
            });
        }

        info!(
            "matched requirement {} against {} profiles",
            req_id,
            results.len()
        );
        MatchOutput {
            results: self.ranker.rank(results),
            diagnostics,
        }
    }

    /// One page of ranked matches. Pages computed against the same
    /// published snapshot are exhaustive and disjoint.
    pub fn query_page(
        &self,
        requirement: &Requirement,
        cursor: Option<&str>,
        page_size: usize,
    ) -> Page {
        let output = self.match_requirements(requirement);
        self.ranker.paginate(&output.results, cursor, page_size)
    }
}

/// Structured filters from the requirement, applied before vectorization
fn passes_filters(profile: &crate::merger::Profile, filters: &RequirementFilters) -> bool {
    if !filters.sources.is_empty()
        && !profile
            .members
            .iter()
            .any(|key| filters.sources.contains(&key.source))
    {
        return false;
    }

    if let Some(keyword) = filters.keyword.as_deref() {
        let needle = fold_matching(keyword);
        if needle.is_empty() {
            return true;
        }
        let haystack = fold_matching(&format!(
            "{} {} {}",
            profile.display_name.value,
            profile
                .affiliation
                .as_ref()
                .map(|a| a.value.as_str())
                .unwrap_or(""),
            profile.corpus
        ));
        if !haystack.contains(&needle) {
            return false;
        }
    }

    true
}

fn lock<'a, T>(mutex: &'a Mutex<T>) -> std::sync::MutexGuard<'a, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn raw(
        source: &str,
        id: &str,
        name: Option<&str>,
        topics: &[&str],
        summary: Option<&str>,
    ) -> RawRecord {
        RawRecord {
            source: Some(source.to_string()),
            external_id: Some(id.to_string()),
            display_name: name.map(str::to_string),
            handle: Some(id.to_string()),
            topics: topics.iter().map(|t| t.to_string()).collect(),
            summary: summary.map(str::to_string),
            fetched_at: Some(Utc.with_ymd_and_hms(2025, 5, 10, 9, 0, 0).unwrap()),
            ..RawRecord::default()
        }
    }

    fn service() -> ScoutService {
        ScoutService::new(MatchingConfig::default())
    }

    #[test]
    fn test_ingest_isolates_malformed_records() {
        let service = service();
        let batch = vec![
            raw("github", "taro_yamada", Some("Taro Yamada"), &["nlp-tools"], None),
            RawRecord::default(), // no source, no id
            raw("qiita", "hanako", Some("Hanako Sato"), &[], None),
        ];

        let report = service.ingest_batch(&batch);
        assert_eq!(report.accepted, 2);
        assert_eq!(report.dropped.len(), 1);
        assert_eq!(report.dropped[0].stage, Stage::Normalize);
    }

    #[test]
    fn test_reingest_same_record_is_idempotent() {
        let service = service();
        let batch = vec![raw("github", "taro_yamada", Some("Taro Yamada"), &[], None)];

        service.ingest_batch(&batch);
        let first = service.rebuild();
        service.ingest_batch(&batch);
        let second = service.rebuild();

        assert_eq!(first.snapshot_id, second.snapshot_id);
        assert_eq!(first.cluster_count, second.cluster_count);
        assert!(second.splits.is_empty());
    }

    #[test]
    fn test_cross_source_merge_produces_one_profile_with_provenance() {
        let service = service();
        service.ingest_batch(&[
            raw("github", "taro_yamada", None, &["nlp-tools"], Some("Maintains nlp-tools")),
            raw("qiita", "taro_yamada", Some("山田太郎"), &["nlp-tools"], Some("自然言語処理の記事")),
        ]);
        let report = service.rebuild();
        assert_eq!(report.cluster_count, 1);

        let snapshot = service.snapshot();
        let profile = snapshot.profiles.values().next().unwrap();
        assert_eq!(profile.members.len(), 2);
        let handle_contacts: Vec<_> = profile
            .contacts
            .iter()
            .filter(|c| c.label == "handle")
            .collect();
        assert_eq!(handle_contacts.len(), 2);
    }

    #[test]
    fn test_match_ranks_relevant_profile_first() {
        let service = service();
        service.ingest_batch(&[
            raw(
                "github",
                "nlp_dev",
                Some("Taro Yamada"),
                &[],
                Some("Python, NLTK, Transformers, NLP"),
            ),
            raw(
                "github",
                "infra_dev",
                Some("Alex Chen"),
                &[],
                Some("Go, Kubernetes, infrastructure"),
            ),
        ]);
        service.rebuild();

        let output = service.match_requirements(&Requirement {
            text: "Python NLP engineer".to_string(),
            filters: RequirementFilters::default(),
        });

        assert_eq!(output.results.len(), 2);
        assert_eq!(output.results[0].display_name, "Taro Yamada");
        assert!(output.results[0].score > output.results[1].score);
        assert_eq!(output.results[1].score, 0.0);
        assert!(output.results[0]
            .matched_terms
            .contains(&"python".to_string()));
    }

    #[test]
    fn test_empty_requirement_matches_nothing() {
        let service = service();
        service.ingest_batch(&[raw("github", "dev", Some("Dev"), &[], Some("rust"))]);
        service.rebuild();

        let output = service.match_requirements(&Requirement {
            text: "   ".to_string(),
            filters: RequirementFilters::default(),
        });
        assert!(output.results.is_empty());
    }

    #[test]
    fn test_keyword_filter_narrows_profiles() {
        let service = service();
        service.ingest_batch(&[
            raw("github", "nlp_dev", Some("Taro Yamada"), &[], Some("python nlp")),
            raw("github", "infra_dev", Some("Alex Chen"), &[], Some("go kubernetes")),
        ]);
        service.rebuild();

        let output = service.match_requirements(&Requirement {
            text: "python engineer".to_string(),
            filters: RequirementFilters {
                keyword: Some("kubernetes".to_string()),
                sources: Vec::new(),
            },
        });
        assert_eq!(output.results.len(), 1);
        assert_eq!(output.results[0].display_name, "Alex Chen");
    }

    #[test]
    fn test_pagination_round_trip() {
        let service = service();
        let batch: Vec<RawRecord> = (0..25)
            .map(|i| {
                raw(
                    "github",
                    &format!("dev{:02}", i),
                    Some(&format!("Dev {:02}", i)),
                    &[],
                    Some("rust systems"),
                )
            })
            .collect();
        service.ingest_batch(&batch);
        service.rebuild();

        let requirement = Requirement {
            text: "rust systems".to_string(),
            filters: RequirementFilters::default(),
        };

        let mut seen = Vec::new();
        let mut cursor: Option<String> = None;
        let mut pages = Vec::new();
        loop {
            let page = service.query_page(&requirement, cursor.as_deref(), 10);
            pages.push(page.entries.len());
            seen.extend(page.entries.iter().map(|r| r.profile_id.clone()));
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        assert_eq!(pages, vec![10, 10, 5]);
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), 25);
    }

    #[test]
    fn test_readers_unaffected_by_later_rebuild() {
        let service = service();
        service.ingest_batch(&[raw("github", "dev", Some("Dev"), &[], Some("rust"))]);
        service.rebuild();
        let held = service.snapshot();

        service.ingest_batch(&[raw("qiita", "writer", Some("Writer"), &[], Some("記事"))]);
        service.rebuild();

        // The held snapshot is immutable history
        assert_eq!(held.profile_count(), 1);
        assert_eq!(service.snapshot().profile_count(), 2);
    }
}
