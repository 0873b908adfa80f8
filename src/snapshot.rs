// 📸 Profile Snapshot - Published, consistent view of merged profiles
// A resolution pass builds a complete new snapshot off to the side and swaps
// it in under a brief write lock. Readers clone the Arc and keep the previous
// snapshot until the swap completes; nobody ever observes a partially-merged
// state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use crate::merger::Profile;
use crate::record::{RecordKey, SourceRecord};
use crate::resolver::CandidateIdentity;

// ============================================================================
// PROFILE SNAPSHOT
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileSnapshot {
    /// Content hash over the partition, so an unchanged working set
    /// republishes under the same id
    pub snapshot_id: String,

    pub created_at: DateTime<Utc>,

    /// The partition this snapshot was merged from, sorted by cluster id
    pub identities: Vec<CandidateIdentity>,

    /// Merged profiles keyed by identity id
    pub profiles: BTreeMap<String, Profile>,

    /// The working set the pass ran over, for provenance lookups
    pub records: BTreeMap<RecordKey, SourceRecord>,
}

impl ProfileSnapshot {
    pub fn empty() -> Self {
        ProfileSnapshot {
            snapshot_id: snapshot_id_for(&[]),
            created_at: DateTime::<Utc>::UNIX_EPOCH,
            identities: Vec::new(),
            profiles: BTreeMap::new(),
            records: BTreeMap::new(),
        }
    }

    pub fn profile_count(&self) -> usize {
        self.profiles.len()
    }
}

/// Deterministic snapshot id from the sorted cluster ids of the partition
pub fn snapshot_id_for(identities: &[CandidateIdentity]) -> String {
    let mut hasher = Sha256::new();
    for identity in identities {
        hasher.update(identity.cluster_id.as_bytes());
        hasher.update(b"\n");
    }
    let digest = hasher.finalize();
    let mut id = String::from("snap-");
    for byte in digest.iter().take(8) {
        id.push_str(&format!("{:02x}", byte));
    }
    id
}

// ============================================================================
// SNAPSHOT STORE
// ============================================================================

/// Single-writer / multiple-reader holder for the current snapshot.
/// `load` is cheap (Arc clone); `publish` is the exclusive phase guarding
/// the swap.
pub struct SnapshotStore {
    current: RwLock<Arc<ProfileSnapshot>>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        SnapshotStore {
            current: RwLock::new(Arc::new(ProfileSnapshot::empty())),
        }
    }

    /// The most recently published snapshot. Readers hold it as long as
    /// they like; later publishes do not disturb it.
    pub fn load(&self) -> Arc<ProfileSnapshot> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Swap in a fully-built snapshot. Returns the published Arc.
    pub fn publish(&self, snapshot: ProfileSnapshot) -> Arc<ProfileSnapshot> {
        let published = Arc::new(snapshot);
        match self.current.write() {
            Ok(mut guard) => *guard = Arc::clone(&published),
            Err(poisoned) => *poisoned.into_inner() = Arc::clone(&published),
        }
        published
    }
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================
