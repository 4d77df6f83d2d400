//! Explicit pool registry owned by the composition root

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::pool::RotationPool;

/// Request classifications that draw credentials from a rotation pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PoolKind {
    Chat,
    DeepSearch,
    FastEdit,
    SlowEdit,
    Midjourney,
}

impl PoolKind {
    pub const ALL: [PoolKind; 5] = [
        PoolKind::Chat,
        PoolKind::DeepSearch,
        PoolKind::FastEdit,
        PoolKind::SlowEdit,
        PoolKind::Midjourney,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            PoolKind::Chat => "chat",
            PoolKind::DeepSearch => "deep_search",
            PoolKind::FastEdit => "fast_edit",
            PoolKind::SlowEdit => "slow_edit",
            PoolKind::Midjourney => "midjourney",
        }
    }
}

impl fmt::Display for PoolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for PoolKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        PoolKind::ALL
            .into_iter()
            .find(|kind| kind.label() == s)
            .ok_or_else(|| Error::InvalidKind(s.to_string()))
    }
}

/// The set of configured pools, keyed by kind.
#[derive(Default)]
pub struct PoolSet {
    pools: HashMap<PoolKind, Arc<RotationPool>>,
}

impl PoolSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, kind: PoolKind, pool: Arc<RotationPool>) {
        self.pools.insert(kind, pool);
    }

    pub fn get(&self, kind: PoolKind) -> Result<Arc<RotationPool>> {
        self.pools
            .get(&kind)
            .cloned()
            .ok_or(Error::UnknownPool(kind))
    }

    /// Pools in a stable order (by kind).
    pub fn iter(&self) -> impl Iterator<Item = (PoolKind, &Arc<RotationPool>)> {
        let mut entries: Vec<_> = self.pools.iter().map(|(k, p)| (*k, p)).collect();
        entries.sort_by_key(|(k, _)| *k);
        entries.into_iter()
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    /// Health of every pool, keyed by kind label.
    pub fn health(&self) -> serde_json::Value {
        let map: serde_json::Map<String, serde_json::Value> = self
            .iter()
            .map(|(kind, pool)| (kind.label().to_string(), pool.health()))
            .collect();
        serde_json::Value::Object(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LivenessPolicy;

    #[test]
    fn kind_round_trips_through_label() {
        for kind in PoolKind::ALL {
            assert_eq!(kind.label().parse::<PoolKind>().unwrap(), kind);
        }
        assert!(matches!(
            "images".parse::<PoolKind>(),
            Err(Error::InvalidKind(s)) if s == "images"
        ));
    }

    #[test]
    fn get_unconfigured_pool_fails() {
        let mut set = PoolSet::new();
        set.insert(
            PoolKind::Chat,
            Arc::new(RotationPool::new("chat", vec![], LivenessPolicy::default())),
        );
        assert_eq!(set.get(PoolKind::Chat).unwrap().name(), "chat");
        let err = set.get(PoolKind::Midjourney).err().unwrap();
        assert!(matches!(err, Error::UnknownPool(PoolKind::Midjourney)));
        assert_eq!(err.to_string(), "no rotation pool configured for midjourney");
    }

    #[test]
    fn health_keys_by_kind() {
        let mut set = PoolSet::new();
        for kind in [PoolKind::SlowEdit, PoolKind::Chat] {
            set.insert(
                kind,
                Arc::new(RotationPool::new(kind.label(), vec![], LivenessPolicy::default())),
            );
        }
        let health = set.health();
        assert_eq!(health["chat"]["pool"], "chat");
        assert_eq!(health["slow_edit"]["status"], "unhealthy");
        let kinds: Vec<PoolKind> = set.iter().map(|(k, _)| k).collect();
        assert_eq!(kinds, vec![PoolKind::Chat, PoolKind::SlowEdit]);
    }
}
