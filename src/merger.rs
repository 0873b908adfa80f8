// 🧬 Profile Merger - Fold a candidate identity into one Profile
// Field precedence: freshest fetch, then source authority, then smallest
// external id. Every selected value carries provenance back to the record
// that supplied it. Merging is a pure function of the membership: unchanged
// membership reproduces a bit-identical Profile.

use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::MatchingConfig;
use crate::error::{Diagnostic, MatchError, Stage};
use crate::normalizer::fold_matching;
use crate::record::{RecordKey, SourceRecord};
use crate::resolver::CandidateIdentity;

// ============================================================================
// PROFILE
// ============================================================================

/// A merged value tagged with the source record that supplied it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sourced {
    pub value: String,
    pub provenance: RecordKey,
}

/// A provenance-tagged contact entry for read-only display/copy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactField {
    /// "email", "handle" or "url"
    pub label: String,
    pub value: String,
    pub provenance: RecordKey,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub identity_id: String,

    pub display_name: Sourced,

    /// Aggregated free text of all members, in sorted member order.
    /// This is the corpus the vectorizer consumes.
    pub corpus: String,

    pub affiliation: Option<Sourced>,

    pub contacts: Vec<ContactField>,

    /// Cohesion degraded per conflicting field; never raised by disagreement
    pub merge_confidence: f64,

    /// Set when precedence rules could not settle a field
    pub needs_review: bool,

    /// Most recent source activity across members (ranking recency key)
    pub last_activity: DateTime<Utc>,

    pub members: Vec<RecordKey>,
}

pub struct MergeOutput {
    pub profile: Profile,
    pub diagnostics: Vec<Diagnostic>,
}

// ============================================================================
// PROFILE MERGER
// ============================================================================

pub struct ProfileMerger {
    config: MatchingConfig,
}

impl ProfileMerger {
    pub fn new(config: MatchingConfig) -> Self {
        ProfileMerger { config }
    }

    /// Merge one candidate identity into one Profile.
    ///
    /// Returns None only when no member record is available at all; a
    /// partially available membership still produces a profile (per-cluster
    /// isolation), with critical diagnostics for the missing members.
    pub fn merge(
        &self,
        identity: &CandidateIdentity,
        records: &BTreeMap<RecordKey, SourceRecord>,
    ) -> Option<MergeOutput> {
        let mut diagnostics = Vec::new();

        let mut members: Vec<&SourceRecord> = Vec::new();
        for key in &identity.members {
            match records.get(key) {
                Some(record) => members.push(record),
                None => {
                    warn!("cluster {} member {} not in working set", identity.cluster_id, key);
                    diagnostics.push(Diagnostic::critical(
                        Stage::Merge,
                        &identity.cluster_id,
                        format!("member {} missing from working set; skipped", key),
                    ));
                }
            }
        }
        if members.is_empty() {
            return None;
        }
        // Canonical member order regardless of map iteration details
        members.sort_by(|a, b| a.key.cmp(&b.key));

        let mut conflicts = 0usize;
        let mut needs_review = false;

        let email = self.select_field(&members, "email", |r| r.email.known());
        let affiliation = self.select_field(&members, "affiliation", |r| r.affiliation.known());
        for selection in [&email, &affiliation] {
            if selection.disagreement {
                conflicts += 1;
            }
            if selection.tied {
                needs_review = true;
                let conflict = MatchError::MergeConflict {
                    cluster_id: identity.cluster_id.clone(),
                    field: selection.field.clone(),
                };
                diagnostics.push(Diagnostic::warning(
                    Stage::Merge,
                    &identity.cluster_id,
                    conflict.to_string(),
                ));
            }
        }

        let display_name = self.select_display_name(&members, &mut conflicts);

        let mut contacts = Vec::new();
        if let Some(sourced) = &email.value {
            contacts.push(ContactField {
                label: "email".to_string(),
                value: sourced.value.clone(),
                provenance: sourced.provenance.clone(),
            });
        }
        for member in &members {
            if let Some(handle) = member.handle.known() {
                contacts.push(ContactField {
                    label: "handle".to_string(),
                    value: handle.to_string(),
                    provenance: member.key.clone(),
                });
            }
            for url in &member.urls {
                contacts.push(ContactField {
                    label: "url".to_string(),
                    value: url.clone(),
                    provenance: member.key.clone(),
                });
            }
        }

        let corpus = build_corpus(&members);

        let last_activity = members
            .iter()
            .map(|r| r.activity_timestamp())
            .max()
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);

        let merge_confidence =
            identity.cohesion * self.config.conflict_decay.powi(conflicts as i32);

        let profile = Profile {
            identity_id: identity.cluster_id.clone(),
            display_name,
            corpus,
            affiliation: affiliation.value,
            contacts,
            merge_confidence,
            needs_review,
            last_activity,
            members: members.iter().map(|r| r.key.clone()).collect(),
        };

        Some(MergeOutput {
            profile,
            diagnostics,
        })
    }

    /// Precedence selection for one attribute: freshest fetch first, then
    /// configured source authority, then lexicographically smallest external
    /// id. A tie across all three keys with disagreeing values flags the
    /// profile for review but still yields the deterministic first value.
    fn select_field(
        &self,
        members: &[&SourceRecord],
        field: &str,
        get: impl Fn(&SourceRecord) -> Option<&str>,
    ) -> FieldSelection {
        let mut candidates: Vec<&SourceRecord> = members
            .iter()
            .copied()
            .filter(|r| get(r).is_some())
            .collect();
        if candidates.is_empty() {
            return FieldSelection::absent(field);
        }

        candidates.sort_by(|a, b| {
            b.fetched_at
                .cmp(&a.fetched_at)
                .then_with(|| {
                    self.config
                        .authority_rank(a.key.source)
                        .cmp(&self.config.authority_rank(b.key.source))
                })
                .then_with(|| a.key.external_id.cmp(&b.key.external_id))
                .then_with(|| a.key.source.cmp(&b.key.source))
        });

        let winner = candidates[0];
        let winner_value = get(winner).unwrap_or_default().to_string();

        let mut distinct: Vec<&str> = candidates.iter().filter_map(|r| get(r)).collect();
        distinct.sort();
        distinct.dedup();
        let disagreement = distinct.len() > 1;

        // Tie on every precedence key with a different value on the other side
        let tied = candidates.get(1).is_some_and(|second| {
            second.fetched_at == winner.fetched_at
                && self.config.authority_rank(second.key.source)
                    == self.config.authority_rank(winner.key.source)
                && second.key.external_id == winner.key.external_id
                && get(second) != get(winner)
        });

        FieldSelection {
            field: field.to_string(),
            value: Some(Sourced {
                value: winner_value,
                provenance: winner.key.clone(),
            }),
            disagreement,
            tied,
        }
    }

    /// Display name: most frequent folded variant wins; ties go to the
    /// earliest-seen source. Falls back to a handle, then the external id,
    /// when no member carries a name.
    fn select_display_name(
        &self,
        members: &[&SourceRecord],
        conflicts: &mut usize,
    ) -> Sourced {
        let mut by_variant: BTreeMap<String, Vec<&SourceRecord>> = BTreeMap::new();
        for member in members {
            if let Some(name) = member.display_name.known() {
                by_variant.entry(fold_matching(name)).or_default().push(member);
            }
        }

        if by_variant.len() > 1 {
            *conflicts += 1;
        }

        if by_variant.is_empty() {
            // No names anywhere: best-effort from the first member with a
            // handle, else its external id
            let fallback = members
                .iter()
                .find_map(|r| r.handle.known().map(|h| (h.to_string(), r.key.clone())))
                .unwrap_or_else(|| {
                    (members[0].key.external_id.clone(), members[0].key.clone())
                });
            return Sourced {
                value: fallback.0,
                provenance: fallback.1,
            };
        }

        // Most suppliers first, then earliest-seen, then variant text
        let mut ranked: Vec<(&String, &Vec<&SourceRecord>)> = by_variant.iter().collect();
        ranked.sort_by(|(va, a), (vb, b)| {
            b.len()
                .cmp(&a.len())
                .then_with(|| earliest_seen(a).cmp(&earliest_seen(b)))
                .then_with(|| va.cmp(vb))
        });
        let suppliers = ranked[0].1;

        let supplier = suppliers
            .iter()
            .min_by_key(|r| (r.fetched_at, r.key.clone()))
            .copied()
            .unwrap_or(members[0]);

        Sourced {
            value: supplier
                .display_name
                .known()
                .unwrap_or(&supplier.key.external_id)
                .to_string(),
            provenance: supplier.key.clone(),
        }
    }
}

fn earliest_seen(suppliers: &[&SourceRecord]) -> DateTime<Utc> {
    suppliers
        .iter()
        .map(|r| r.fetched_at)
        .min()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// Member summaries and topics joined in sorted member order; blank lines
/// separate contributions so provenance of phrasing stays visible.
fn build_corpus(members: &[&SourceRecord]) -> String {
    let mut segments = Vec::new();
    for member in members {
        let mut parts = Vec::new();
        if let Some(summary) = member.summary.known() {
            parts.push(summary.to_string());
        }
        if !member.topics.is_empty() {
            parts.push(member.topics.join(" "));
        }
        if !parts.is_empty() {
            segments.push(parts.join("\n"));
        }
    }
    segments.join("\n\n")
}

struct FieldSelection {
    field: String,
    value: Option<Sourced>,
    disagreement: bool,
    tied: bool,
}

impl FieldSelection {
    fn absent(field: &str) -> Self {
        FieldSelection {
            field: field.to_string(),
            value: None,
            disagreement: false,
            tied: false,
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalizer::RecordNormalizer;
    use crate::record::{RawRecord, SourceType};
    use chrono::TimeZone;

    fn record(
        source: &str,
        id: &str,
        name: Option<&str>,
        email: Option<&str>,
        summary: Option<&str>,
        day: u32,
    ) -> SourceRecord {
        let raw = RawRecord {
            source: Some(source.to_string()),
            external_id: Some(id.to_string()),
            display_name: name.map(str::to_string),
            handle: Some(id.to_string()),
            email: email.map(str::to_string),
            summary: summary.map(str::to_string),
            fetched_at: Some(Utc.with_ymd_and_hms(2025, 3, day, 12, 0, 0).unwrap()),
            ..RawRecord::default()
        };
        RecordNormalizer::new().normalize(&raw).unwrap()
    }

    fn working_set(records: &[SourceRecord]) -> BTreeMap<RecordKey, SourceRecord> {
        records
            .iter()
            .map(|r| (r.key.clone(), r.clone()))
            .collect()
    }

    fn identity_for(records: &[SourceRecord]) -> CandidateIdentity {
        let mut members: Vec<RecordKey> = records.iter().map(|r| r.key.clone()).collect();
        members.sort();
        CandidateIdentity {
            cluster_id: "ident-test".to_string(),
            members,
            cohesion: 1.0,
        }
    }

    fn merger() -> ProfileMerger {
        ProfileMerger::new(MatchingConfig::default())
    }

    #[test]
    fn test_freshest_record_wins_field_precedence() {
        let stale = record("github", "taro", None, Some("old@example.com"), None, 1);
        let fresh = record("qiita", "taro", None, Some("new@example.com"), None, 20);
        let records = [stale, fresh];

        let output = merger()
            .merge(&identity_for(&records), &working_set(&records))
            .unwrap();
        let email = output
            .profile
            .contacts
            .iter()
            .find(|c| c.label == "email")
            .unwrap();
        assert_eq!(email.value, "new@example.com");
        assert_eq!(email.provenance, RecordKey::new(SourceType::Qiita, "taro"));
        // Disagreeing emails lower confidence below cohesion
        assert!(output.profile.merge_confidence < 1.0);
    }

    #[test]
    fn test_authority_breaks_freshness_tie() {
        // Same fetch day: OpenAlex outranks GitHub in the default config
        let gh = record("github", "taro", None, Some("gh@example.com"), None, 5);
        let oa = record("openalex", "A1", None, Some("oa@example.com"), None, 5);
        let records = [gh, oa];

        let output = merger()
            .merge(&identity_for(&records), &working_set(&records))
            .unwrap();
        let email = output
            .profile
            .contacts
            .iter()
            .find(|c| c.label == "email")
            .unwrap();
        assert_eq!(email.value, "oa@example.com");
    }

    #[test]
    fn test_display_name_most_frequent_variant() {
        let a = record("github", "taro", Some("Taro Yamada"), None, None, 1);
        let b = record("qiita", "taro2", Some("Taro Yamada"), None, None, 2);
        let c = record("openalex", "A1", Some("T. Yamada"), None, None, 9);
        let records = [a, b, c];

        let output = merger()
            .merge(&identity_for(&records), &working_set(&records))
            .unwrap();
        // Two suppliers beat one fresher, more authoritative supplier
        assert_eq!(output.profile.display_name.value, "Taro Yamada");
        // Provenance points at the earliest-seen supplier of the variant
        assert_eq!(
            output.profile.display_name.provenance,
            RecordKey::new(SourceType::GitHub, "taro")
        );
    }

    #[test]
    fn test_remerge_is_bit_identical() {
        let records = [
            record("github", "taro", Some("Taro Yamada"), Some("t@example.com"), Some("NLP tooling"), 3),
            record("qiita", "taro", Some("山田太郎"), None, Some("形態素解析の記事"), 7),
        ];
        let identity = identity_for(&records);
        let set = working_set(&records);

        let first = merger().merge(&identity, &set).unwrap();
        let second = merger().merge(&identity, &set).unwrap();

        assert_eq!(first.profile, second.profile);
        // Bit-identical through serialization as well
        assert_eq!(
            serde_json::to_string(&first.profile).unwrap(),
            serde_json::to_string(&second.profile).unwrap()
        );
    }

    #[test]
    fn test_provenance_tagged_contacts_per_member() {
        let records = [
            record("github", "taro_yamada", None, None, Some("repos: nlp-tools"), 1),
            record("qiita", "taro_yamada", Some("山田太郎"), None, Some("NLP記事"), 2),
        ];
        let output = merger()
            .merge(&identity_for(&records), &working_set(&records))
            .unwrap();

        let handles: Vec<&ContactField> = output
            .profile
            .contacts
            .iter()
            .filter(|c| c.label == "handle")
            .collect();
        assert_eq!(handles.len(), 2);
        let provenances: Vec<SourceType> =
            handles.iter().map(|c| c.provenance.source).collect();
        assert!(provenances.contains(&SourceType::GitHub));
        assert!(provenances.contains(&SourceType::Qiita));
    }

    #[test]
    fn test_exact_tie_flags_needs_review() {
        // Same id string on two sources with equal (unconfigured) authority
        // and the same fetch instant: precedence cannot settle the email
        let config = MatchingConfig {
            source_authority: Vec::new(),
            ..MatchingConfig::default()
        };
        let a = record("github", "taro", None, Some("a@example.com"), None, 5);
        let b = record("qiita", "taro", None, Some("b@example.com"), None, 5);
        let records = [a, b];

        let output = ProfileMerger::new(config)
            .merge(&identity_for(&records), &working_set(&records))
            .unwrap();
        assert!(output.profile.needs_review);
        // Still produced with a deterministic best-effort value
        assert!(output
            .profile
            .contacts
            .iter()
            .any(|c| c.label == "email" && c.value == "a@example.com"));
        assert!(!output.diagnostics.is_empty());
    }

    #[test]
    fn test_confidence_non_increasing_with_conflicts() {
        let agreeing = [
            record("github", "taro", Some("Taro Yamada"), Some("t@example.com"), None, 1),
            record("qiita", "taro", Some("Taro Yamada"), Some("t@example.com"), None, 2),
        ];
        let disagreeing = [
            record("github", "taro", Some("Taro Yamada"), Some("t@example.com"), None, 1),
            record("qiita", "taro", Some("別の名前"), Some("other@example.com"), None, 2),
        ];

        let clean = merger()
            .merge(&identity_for(&agreeing), &working_set(&agreeing))
            .unwrap();
        let conflicted = merger()
            .merge(&identity_for(&disagreeing), &working_set(&disagreeing))
            .unwrap();

        assert!(clean.profile.merge_confidence > conflicted.profile.merge_confidence);
    }

    #[test]
    fn test_missing_member_isolated_not_fatal() {
        let present = record("github", "taro", Some("Taro Yamada"), None, None, 1);
        let ghost_key = RecordKey::new(SourceType::Qiita, "ghost");
        let identity = CandidateIdentity {
            cluster_id: "ident-test".to_string(),
            members: vec![present.key.clone(), ghost_key],
            cohesion: 0.8,
        };

        let output = merger()
            .merge(&identity, &working_set(&[present]))
            .unwrap();
        assert_eq!(output.profile.members.len(), 1);
        assert!(output
            .diagnostics
            .iter()
            .any(|d| d.message.contains("missing from working set")));
    }
}
