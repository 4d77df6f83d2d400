//! Rotation pool, blacklist and per-sequence attempt matrices
//!
//! The credential matrix is immutable after construction. Mutable state (the
//! blacklist and the attempt matrix of every live sequence) sits behind one
//! `std::sync::Mutex` per pool. The lock is only taken inside the synchronous
//! methods below, so it is never held across an upstream call.
//!
//! Ban expiry is checked at selection time: an entry whose expiry has passed
//! no longer blocks its supplier even before the sweep removes it.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use provider::ModelCredential;
use serde::Deserialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Identifies one retry chain's attempt matrix.
pub type SequenceId = Uuid;

/// What to do when a fresh sequence finds every credential blocked by bans.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LivenessPolicy {
    /// Lift the ban on the supplier banned longest ago, then rescan.
    #[default]
    EvictOldest,
    /// Clear the whole blacklist, then rescan.
    EvictAll,
    /// Report exhaustion.
    Disabled,
}

impl LivenessPolicy {
    pub fn label(&self) -> &'static str {
        match self {
            LivenessPolicy::EvictOldest => "evict_oldest",
            LivenessPolicy::EvictAll => "evict_all",
            LivenessPolicy::Disabled => "disabled",
        }
    }
}

#[derive(Debug, Clone)]
struct Ban {
    supplier: String,
    until: Instant,
}

impl Ban {
    fn active(&self, now: Instant) -> bool {
        self.until > now
    }
}

/// Tried flags shaped like the credential matrix.
type AttemptMatrix = Vec<Vec<bool>>;

#[derive(Debug, Default)]
struct PoolState {
    /// Insertion order is ban order; the front is the oldest ban.
    blacklist: VecDeque<Ban>,
    sequences: HashMap<SequenceId, AttemptMatrix>,
}

impl PoolState {
    fn is_banned(&self, supplier: &str, now: Instant) -> bool {
        self.blacklist
            .iter()
            .any(|ban| ban.supplier == supplier && ban.active(now))
    }

    /// Remove every entry for the supplier with the oldest still-active ban.
    fn evict_oldest(&mut self, now: Instant) -> Vec<String> {
        let Some(oldest) = self
            .blacklist
            .iter()
            .find(|ban| ban.active(now))
            .map(|ban| ban.supplier.clone())
        else {
            return Vec::new();
        };
        self.blacklist.retain(|ban| ban.supplier != oldest);
        vec![oldest]
    }

    fn evict_all(&mut self) -> Vec<String> {
        let mut evicted: Vec<String> = Vec::new();
        for ban in self.blacklist.drain(..) {
            if !evicted.contains(&ban.supplier) {
                evicted.push(ban.supplier);
            }
        }
        evicted
    }
}

/// Tiered credential pool for one request classification.
pub struct RotationPool {
    name: String,
    tiers: Vec<Vec<ModelCredential>>,
    liveness: LivenessPolicy,
    state: Mutex<PoolState>,
}

impl RotationPool {
    /// Create a pool from priority tiers (highest priority first).
    pub fn new(
        name: impl Into<String>,
        tiers: Vec<Vec<ModelCredential>>,
        liveness: LivenessPolicy,
    ) -> Self {
        let name = name.into();
        let credentials: usize = tiers.iter().map(Vec::len).sum();
        info!(
            pool = %name,
            tiers = tiers.len(),
            credentials,
            liveness = liveness.label(),
            "rotation pool initialized"
        );
        Self {
            name,
            tiers,
            liveness,
            state: Mutex::new(PoolState::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Total number of credentials across all tiers.
    pub fn len(&self) -> usize {
        self.tiers.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Register a new sequence and return its pull handle.
    pub fn begin(self: &Arc<Self>) -> Sequence {
        let id = Uuid::new_v4();
        self.lock().sequences.insert(id, self.fresh_matrix());
        debug!(pool = %self.name, sequence = %id, "sequence started");
        Sequence {
            pool: Arc::clone(self),
            id,
        }
    }

    /// Next untried, non-banned credential for the sequence, marking it tried.
    ///
    /// `None` means the sequence is exhausted. An unknown id gets a fresh
    /// matrix. When nothing is available and the sequence has not tried
    /// anything yet, the liveness policy may lift bans and the scan runs once
    /// more.
    pub fn next(&self, id: &SequenceId) -> Option<ModelCredential> {
        let now = Instant::now();
        let mut guard = self.lock();
        let state = &mut *guard;

        if !state.sequences.contains_key(id) {
            state.sequences.insert(*id, self.fresh_matrix());
        }

        if let Some(found) = self.scan(state, id, now) {
            return Some(found);
        }

        let untouched = state
            .sequences
            .get(id)
            .is_some_and(|matrix| matrix.iter().flatten().all(|tried| !tried));
        if !untouched {
            return None;
        }

        let evicted = match self.liveness {
            LivenessPolicy::EvictOldest => state.evict_oldest(now),
            LivenessPolicy::EvictAll => state.evict_all(),
            LivenessPolicy::Disabled => Vec::new(),
        };
        if evicted.is_empty() {
            return None;
        }
        warn!(
            pool = %self.name,
            sequence = %id,
            policy = self.liveness.label(),
            evicted = ?evicted,
            "every credential banned, lifting bans to keep the pool live"
        );
        self.scan(state, id, now)
    }

    /// Ban a supplier until `until`. Effective immediately for every sequence.
    pub fn ban(&self, supplier: &str, until: Instant) {
        let remaining = until.saturating_duration_since(Instant::now());
        self.lock().blacklist.push_back(Ban {
            supplier: supplier.to_string(),
            until,
        });
        metrics::counter!(
            "gateway_supplier_bans_total",
            "pool" => self.name.clone(),
            "supplier" => supplier.to_string()
        )
        .increment(1);
        info!(
            pool = %self.name,
            supplier,
            ban_secs = remaining.as_secs(),
            "supplier banned"
        );
    }

    pub fn ban_for(&self, supplier: &str, duration: Duration) {
        self.ban(supplier, Instant::now() + duration);
    }

    pub fn is_banned(&self, supplier: &str) -> bool {
        self.lock().is_banned(supplier, Instant::now())
    }

    /// Blacklist entries, expired ones included until swept.
    pub fn blacklist_len(&self) -> usize {
        self.lock().blacklist.len()
    }

    pub fn active_sequences(&self) -> usize {
        self.lock().sequences.len()
    }

    /// Remove exactly the entries expired at `now`, preserving the order of
    /// the survivors. Returns how many were removed.
    pub fn sweep(&self, now: Instant) -> usize {
        let mut state = self.lock();
        let before = state.blacklist.len();
        state.blacklist.retain(|ban| ban.active(now));
        before - state.blacklist.len()
    }

    /// Pool health summary for the health endpoint.
    ///
    /// Status mapping: no supplier banned → healthy, some credentials
    /// reachable → degraded, none reachable → unhealthy.
    pub fn health(&self) -> serde_json::Value {
        let now = Instant::now();
        let state = self.lock();

        let total = self.len();
        let available = self
            .tiers
            .iter()
            .flatten()
            .filter(|c| !state.is_banned(c.supplier_name(), now))
            .count();

        let banned: Vec<serde_json::Value> = state
            .blacklist
            .iter()
            .filter(|ban| ban.active(now))
            .map(|ban| {
                serde_json::json!({
                    "supplier": ban.supplier,
                    "remaining_secs": ban.until.saturating_duration_since(now).as_secs()
                })
            })
            .collect();

        let status = if available == total && total > 0 {
            "healthy"
        } else if available > 0 {
            "degraded"
        } else {
            "unhealthy"
        };

        serde_json::json!({
            "pool": self.name,
            "status": status,
            "tiers": self.tiers.len(),
            "credentials_total": total,
            "credentials_available": available,
            "banned": banned,
            "active_sequences": state.sequences.len(),
            "liveness": self.liveness.label()
        })
    }

    fn release(&self, id: &SequenceId) {
        self.lock().sequences.remove(id);
        debug!(pool = %self.name, sequence = %id, "sequence released");
    }

    fn fresh_matrix(&self) -> AttemptMatrix {
        self.tiers.iter().map(|tier| vec![false; tier.len()]).collect()
    }

    fn scan(&self, state: &mut PoolState, id: &SequenceId, now: Instant) -> Option<ModelCredential> {
        for (t, tier) in self.tiers.iter().enumerate() {
            for (i, credential) in tier.iter().enumerate() {
                let tried = state
                    .sequences
                    .get(id)
                    .is_none_or(|matrix| matrix[t][i]);
                if tried || state.is_banned(credential.supplier_name(), now) {
                    continue;
                }
                if let Some(matrix) = state.sequences.get_mut(id) {
                    matrix[t][i] = true;
                }
                return Some(credential.clone());
            }
        }
        None
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Pull handle for one retry chain. Deregisters itself when dropped.
pub struct Sequence {
    pool: Arc<RotationPool>,
    id: SequenceId,
}

impl Sequence {
    pub fn id(&self) -> SequenceId {
        self.id
    }

    pub fn pool(&self) -> &Arc<RotationPool> {
        &self.pool
    }
}

impl Iterator for Sequence {
    type Item = ModelCredential;

    fn next(&mut self) -> Option<ModelCredential> {
        self.pool.next(&self.id)
    }
}

impl Drop for Sequence {
    fn drop(&mut self) {
        self.pool.release(&self.id);
    }
}

impl std::fmt::Debug for Sequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sequence")
            .field("pool", &self.pool.name)
            .field("id", &self.id)
            .finish()
    }
}
