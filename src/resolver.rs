// 🔍 Identity Resolver - Cluster source records into candidate identities
// Three phases: blocking (bound comparisons below quadratic), pairwise
// weighted scoring, and union-find clustering in canonical score order.
// Ties at the merge threshold do NOT merge: precision over recall.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use strsim::jaro_winkler;

use crate::config::ResolverConfig;
use crate::error::{Diagnostic, MatchError, Stage};
use crate::record::{RecordKey, SourceRecord};

// ============================================================================
// CANDIDATE IDENTITY
// ============================================================================

/// A set of source records believed to describe one real person.
/// The cluster id is a content hash of the sorted member keys, so an
/// unchanged membership always reproduces the same id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateIdentity {
    pub cluster_id: String,

    /// Member record keys, sorted. A record belongs to at most one cluster.
    pub members: Vec<RecordKey>,

    /// Mean pairwise score across scored in-cluster pairs (1.0 for singletons)
    pub cohesion: f64,
}

impl CandidateIdentity {
    pub fn is_singleton(&self) -> bool {
        self.members.len() == 1
    }
}

/// Deterministic cluster id from sorted membership
fn cluster_id_for(members: &[RecordKey]) -> String {
    let mut hasher = Sha256::new();
    for key in members {
        hasher.update(key.to_string().as_bytes());
        hasher.update(b"\n");
    }
    let digest = hasher.finalize();
    let mut id = String::from("ident-");
    for byte in digest.iter().take(8) {
        id.push_str(&format!("{:02x}", byte));
    }
    id
}

// ============================================================================
// RESOLUTION OUTPUT
// ============================================================================

/// A previously published cluster whose members no longer cohere into one
/// cluster. Reported explicitly, never silently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitEvent {
    pub previous_cluster: String,
    pub new_clusters: Vec<String>,
    pub members: Vec<RecordKey>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resolution {
    /// Partition of the working set, sorted by cluster id
    pub identities: Vec<CandidateIdentity>,

    /// "Previously merged, now split" events against the prior partition
    pub splits: Vec<SplitEvent>,

    pub diagnostics: Vec<Diagnostic>,
}

impl Resolution {
    /// Cluster id for a given record key, if present in this partition
    pub fn cluster_of(&self, key: &RecordKey) -> Option<&str> {
        self.identities
            .iter()
            .find(|c| c.members.binary_search(key).is_ok())
            .map(|c| c.cluster_id.as_str())
    }
}

// ============================================================================
// UNION-FIND
// ============================================================================

/// Union-find over arena indices. Records are addressed by their position
/// in the canonically sorted arena, so no pointers alias between a cluster
/// and its members.
struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        UnionFind {
            parent: (0..n).collect(),
            rank: vec![0; n],
        }
    }

    fn find(&mut self, i: usize) -> usize {
        let parent = self.parent[i];
        if parent == i {
            return i;
        }
        let root = self.find(parent);
        self.parent[i] = root;
        root
    }

    fn union(&mut self, i: usize, j: usize) {
        let ri = self.find(i);
        let rj = self.find(j);
        if ri == rj {
            return;
        }
        if self.rank[ri] < self.rank[rj] {
            self.parent[ri] = rj;
        } else if self.rank[ri] > self.rank[rj] {
            self.parent[rj] = ri;
        } else {
            self.parent[rj] = ri;
            self.rank[ri] += 1;
        }
    }
}

// ============================================================================
// IDENTITY RESOLVER
// ============================================================================

pub struct IdentityResolver {
    config: ResolverConfig,
}

impl IdentityResolver {
    pub fn new(config: ResolverConfig) -> Self {
        IdentityResolver { config }
    }

    /// Partition the working set into candidate identities.
    ///
    /// The caller supplies the full working set (one record per key).
    /// When `previous` is given, clusters that broke apart since that
    /// partition are reported as SplitEvents.
    ///
    /// The partition is invariant under permutation of `records`: the
    /// arena is sorted by record key before anything else happens, and
    /// union operations run in canonical (score-descending, then key)
    /// order rather than discovery order.
    pub fn resolve(
        &self,
        records: &[SourceRecord],
        previous: Option<&Resolution>,
    ) -> Resolution {
        let mut diagnostics = Vec::new();

        // Canonical arena order
        let mut arena: Vec<&SourceRecord> = records.iter().collect();
        arena.sort_by(|a, b| a.key.cmp(&b.key));

        // Phase 1: blocking
        let mut blocks: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (idx, record) in arena.iter().enumerate() {
            let keys = blocking_keys(record);
            if keys.is_empty() {
                let ambiguity = MatchError::ResolutionAmbiguity {
                    record: record.key.to_string(),
                    reason: "no usable blocking key; kept as unmerged singleton".to_string(),
                };
                warn!("{}", ambiguity);
                diagnostics.push(Diagnostic::warning(
                    Stage::Resolve,
                    &record.key.to_string(),
                    ambiguity.to_string(),
                ));
                continue;
            }
            for key in keys {
                blocks.entry(key).or_default().push(idx);
            }
        }

        // Phase 2: pairwise scoring (in-block pairs only)
        let mut candidate_pairs: BTreeSet<(usize, usize)> = BTreeSet::new();
        for indices in blocks.values() {
            for i in 0..indices.len() {
                for j in (i + 1)..indices.len() {
                    let a = indices[i].min(indices[j]);
                    let b = indices[i].max(indices[j]);
                    candidate_pairs.insert((a, b));
                }
            }
        }

        let mut scored: BTreeMap<(usize, usize), f64> = BTreeMap::new();
        for &(a, b) in &candidate_pairs {
            scored.insert((a, b), self.score_pair(arena[a], arena[b]));
        }
        debug!(
            "resolver scored {} candidate pairs across {} blocks",
            scored.len(),
            blocks.len()
        );

        // Phase 3: clustering. Pairs at exactly the threshold are
        // non-merging; unions run in canonical score-sorted order.
        let mut mergeable: Vec<((usize, usize), f64)> = scored
            .iter()
            .filter(|(_, &s)| s > self.config.merge_threshold)
            .map(|(&pair, &s)| (pair, s))
            .collect();
        mergeable.sort_by(|(pa, sa), (pb, sb)| {
            sb.total_cmp(sa).then_with(|| pa.cmp(pb))
        });

        let mut uf = UnionFind::new(arena.len());
        for ((a, b), _) in &mergeable {
            uf.union(*a, *b);
        }

        // Collect clusters; arena is key-sorted, so members come out sorted
        let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for idx in 0..arena.len() {
            groups.entry(uf.find(idx)).or_default().push(idx);
        }

        let mut identities: Vec<CandidateIdentity> = groups
            .into_values()
            .map(|indices| {
                let members: Vec<RecordKey> =
                    indices.iter().map(|&i| arena[i].key.clone()).collect();
                let cohesion = cohesion_of(&indices, &scored);
                CandidateIdentity {
                    cluster_id: cluster_id_for(&members),
                    members,
                    cohesion,
                }
            })
            .collect();
        identities.sort_by(|a, b| a.cluster_id.cmp(&b.cluster_id));

        // Phase 4: split detection against the previous partition
        let splits = match previous {
            Some(prev) => detect_splits(prev, &identities, &mut diagnostics),
            None => Vec::new(),
        };

        info!(
            "resolution pass: {} records -> {} clusters ({} splits)",
            arena.len(),
            identities.len(),
            splits.len()
        );

        Resolution {
            identities,
            splits,
            diagnostics,
        }
    }

    /// Weighted pairwise similarity in [0,1].
    ///
    /// Field similarities are each normalized to [0,1] and the weighted sum
    /// is divided by the weight of the fields actually comparable on this
    /// pair, so a pair with no affiliation on either side is not punished
    /// for it. Two records from the same source with different external ids
    /// score 0: one account per person per source.
    pub fn score_pair(&self, a: &SourceRecord, b: &SourceRecord) -> f64 {
        if a.key.source == b.key.source && a.key.external_id != b.key.external_id {
            return 0.0;
        }

        let cfg = &self.config;
        let mut weighted = 0.0;
        let mut weight_total = 0.0;

        if let Some(sim) = identifier_similarity(a, b) {
            weighted += cfg.identifier_weight * sim;
            weight_total += cfg.identifier_weight;
        }
        if let Some(sim) = name_similarity(a, b) {
            weighted += cfg.name_weight * sim;
            weight_total += cfg.name_weight;
        }
        if let Some(sim) = topic_similarity(a, b) {
            weighted += cfg.topic_weight * sim;
            weight_total += cfg.topic_weight;
        }
        if let Some(sim) = affiliation_similarity(a, b) {
            weighted += cfg.affiliation_weight * sim;
            weight_total += cfg.affiliation_weight;
        }

        if weight_total == 0.0 {
            0.0
        } else {
            weighted / weight_total
        }
    }
}

// ============================================================================
// FIELD SIMILARITIES
// ============================================================================

/// Blocking keys: normalized handle and name variants share the "name:"
/// namespace, so a login like "taro yamada" blocks with the spelled-out
/// name "Taro Yamada" from another source.
fn blocking_keys(record: &SourceRecord) -> Vec<String> {
    let mut keys = Vec::new();
    if let Some(handle) = record.handle.known() {
        keys.push(format!("name:{}", handle));
    }
    if let Some(email) = record.email.known() {
        keys.push(format!("email:{}", email));
    }
    for variant in &record.name_variants {
        keys.push(format!("name:{}", variant));
    }
    keys.sort();
    keys.dedup();
    keys
}

/// Exact agreement on a shared external identifier (handle or email).
/// None when neither identifier is comparable on this pair.
fn identifier_similarity(a: &SourceRecord, b: &SourceRecord) -> Option<f64> {
    let mut comparable = false;
    if let (Some(ha), Some(hb)) = (a.handle.known(), b.handle.known()) {
        if ha == hb {
            return Some(1.0);
        }
        comparable = true;
    }
    if let (Some(ea), Some(eb)) = (a.email.known(), b.email.known()) {
        if ea == eb {
            return Some(1.0);
        }
        comparable = true;
    }
    if comparable {
        Some(0.0)
    } else {
        None
    }
}

/// Best Jaro-Winkler over the cross product of name forms. The handle
/// participates as a name form so a transliterated login can meet a
/// spelled-out name.
fn name_similarity(a: &SourceRecord, b: &SourceRecord) -> Option<f64> {
    let forms_a = name_forms(a);
    let forms_b = name_forms(b);
    if forms_a.is_empty() || forms_b.is_empty() {
        return None;
    }
    let mut best: f64 = 0.0;
    for fa in &forms_a {
        for fb in &forms_b {
            best = best.max(jaro_winkler(fa, fb));
        }
    }
    Some(best)
}

fn name_forms(record: &SourceRecord) -> Vec<&str> {
    let mut forms: Vec<&str> = record.name_variants.iter().map(String::as_str).collect();
    if let Some(handle) = record.handle.known() {
        forms.push(handle);
    }
    forms
}

/// Jaccard overlap on normalized topic sets
fn topic_similarity(a: &SourceRecord, b: &SourceRecord) -> Option<f64> {
    if a.topics.is_empty() || b.topics.is_empty() {
        return None;
    }
    let set_a: BTreeSet<&str> = a.topics.iter().map(String::as_str).collect();
    let set_b: BTreeSet<&str> = b.topics.iter().map(String::as_str).collect();
    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.union(&set_b).count();
    Some(intersection as f64 / union as f64)
}

fn affiliation_similarity(a: &SourceRecord, b: &SourceRecord) -> Option<f64> {
    match (a.affiliation.known(), b.affiliation.known()) {
        (Some(fa), Some(fb)) => Some(jaro_winkler(fa, fb)),
        _ => None,
    }
}

/// Mean score over scored in-cluster pairs; singletons cohere trivially.
/// More disagreement inside a cluster can only lower this, never raise it.
fn cohesion_of(indices: &[usize], scored: &BTreeMap<(usize, usize), f64>) -> f64 {
    if indices.len() < 2 {
        return 1.0;
    }
    let mut total = 0.0;
    let mut count = 0usize;
    for i in 0..indices.len() {
        for j in (i + 1)..indices.len() {
            let pair = (indices[i].min(indices[j]), indices[i].max(indices[j]));
            if let Some(score) = scored.get(&pair) {
                total += score;
                count += 1;
            }
        }
    }
    if count == 0 {
        0.0
    } else {
        total / count as f64
    }
}

// ============================================================================
// SPLIT DETECTION
// ============================================================================

fn detect_splits(
    previous: &Resolution,
    current: &[CandidateIdentity],
    diagnostics: &mut Vec<Diagnostic>,
) -> Vec<SplitEvent> {
    let mut current_cluster: BTreeMap<&RecordKey, &str> = BTreeMap::new();
    for identity in current {
        for member in &identity.members {
            current_cluster.insert(member, identity.cluster_id.as_str());
        }
    }

    let mut splits = Vec::new();
    for prev in &previous.identities {
        if prev.members.len() < 2 {
            continue;
        }
        let mut new_ids: BTreeSet<&str> = BTreeSet::new();
        let mut surviving = Vec::new();
        for member in &prev.members {
            if let Some(&id) = current_cluster.get(member) {
                new_ids.insert(id);
                surviving.push(member.clone());
            }
        }
        if new_ids.len() > 1 {
            let event = SplitEvent {
                previous_cluster: prev.cluster_id.clone(),
                new_clusters: new_ids.iter().map(|s| s.to_string()).collect(),
                members: surviving,
            };
            info!(
                "previously merged, now split: {} -> {:?}",
                event.previous_cluster, event.new_clusters
            );
            diagnostics.push(Diagnostic::info(
                Stage::Resolve,
                &event.previous_cluster,
                format!(
                    "previously merged, now split into {} clusters",
                    event.new_clusters.len()
                ),
            ));
            splits.push(event);
        }
    }
    splits
}

// ============================================================================
// TESTS
// ============================================================================
