//! Versioned key-value store behind the beacon state.
//!
//! Each committed beacon height is an immutable version; historical heights
//! stay readable for RPC and cross-shard proofs while the next producer pass
//! runs. Writes are buffered in a [`WriteBatch`] and committed atomically.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::errors::{ChainError, ChainResult};
use crate::state::merkle::compute_merkle_root;

/// Buffered writes of one processor pass. A `None` value is a delete.
#[derive(Clone, Debug, Default)]
pub struct WriteBatch {
    ops: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.ops.insert(key, Some(value));
    }

    pub fn delete(&mut self, key: Vec<u8>) {
        self.ops.insert(key, None);
    }

    /// Fold another batch in; the other batch's ops win on key collisions.
    pub fn merge(&mut self, other: WriteBatch) {
        self.ops.extend(other.ops);
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }
}

pub trait StateStore: Send + Sync {
    /// Read `key` at the newest version not exceeding `height`.
    fn get(&self, height: u64, key: &[u8]) -> ChainResult<Option<Vec<u8>>>;

    /// Apply `batch` on top of the latest version and seal it as `height`.
    fn commit(&self, height: u64, batch: WriteBatch) -> ChainResult<[u8; 32]>;

    /// All entries under a one-byte prefix at the newest version not
    /// exceeding `height`, key-sorted.
    fn scan_prefix(&self, height: u64, prefix: u8) -> ChainResult<Vec<(Vec<u8>, Vec<u8>)>>;

    /// State root sealed at `height`, if that height was committed.
    fn root(&self, height: u64) -> Option<[u8; 32]>;

    fn latest_height(&self) -> Option<u64>;
}

type VersionMap = Arc<BTreeMap<Vec<u8>, Vec<u8>>>;

#[derive(Default)]
struct Versions {
    committed: BTreeMap<u64, (VersionMap, [u8; 32])>,
}

/// In-memory [`StateStore`]. Every commit clones the latest version map, so
/// readers holding an earlier height never observe later writes.
#[derive(Default)]
pub struct MemoryStateStore {
    inner: RwLock<Versions>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state_root(map: &BTreeMap<Vec<u8>, Vec<u8>>) -> [u8; 32] {
        let mut leaves = map
            .iter()
            .map(|(key, value)| {
                let mut hasher = blake3::Hasher::new();
                hasher.update(&(key.len() as u64).to_le_bytes());
                hasher.update(key);
                hasher.update(value);
                *hasher.finalize().as_bytes()
            })
            .collect::<Vec<_>>();
        compute_merkle_root(&mut leaves)
    }
}

impl StateStore for MemoryStateStore {
    fn get(&self, height: u64, key: &[u8]) -> ChainResult<Option<Vec<u8>>> {
        let inner = self.inner.read();
        let version = inner
            .committed
            .range(..=height)
            .next_back()
            .map(|(_, (map, _))| Arc::clone(map));
        Ok(version.and_then(|map| map.get(key).cloned()))
    }

    fn commit(&self, height: u64, batch: WriteBatch) -> ChainResult<[u8; 32]> {
        let mut inner = self.inner.write();
        if let Some((latest, _)) = inner.committed.iter().next_back() {
            if *latest >= height {
                return Err(ChainError::Storage(format!(
                    "commit height {height} is not after latest {latest}"
                )));
            }
        }
        let mut map = inner
            .committed
            .iter()
            .next_back()
            .map(|(_, (map, _))| map.as_ref().clone())
            .unwrap_or_default();
        for (key, value) in batch.ops {
            match value {
                Some(value) => {
                    map.insert(key, value);
                }
                None => {
                    map.remove(&key);
                }
            }
        }
        let root = Self::state_root(&map);
        inner.committed.insert(height, (Arc::new(map), root));
        Ok(root)
    }

    fn scan_prefix(&self, height: u64, prefix: u8) -> ChainResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let inner = self.inner.read();
        let Some((_, (map, _))) = inner.committed.range(..=height).next_back() else {
            return Ok(Vec::new());
        };
        Ok(map
            .range(vec![prefix]..)
            .take_while(|(key, _)| key.first() == Some(&prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }

    fn root(&self, height: u64) -> Option<[u8; 32]> {
        self.inner.read().committed.get(&height).map(|(_, root)| *root)
    }

    fn latest_height(&self) -> Option<u64> {
        self.inner.read().committed.keys().next_back().copied()
    }
}
