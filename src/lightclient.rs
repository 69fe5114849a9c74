//! Read-only interface onto the external-chain light client.
//!
//! The core never maintains the external chain itself; it asks whether a
//! header is known and confirmed, and delegates script-level address decoding
//! to the client. Calls carry no cancellation — the pipeline is synchronous
//! and a slow client surfaces as `ChainError::LightClient`.

use std::collections::BTreeMap;

use parking_lot::RwLock;

use crate::errors::{ChainError, ChainResult};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeaderInfo {
    /// Merkle root committed by the header, internal byte order.
    pub merkle_root: [u8; 32],
    pub height: u64,
    /// Number of confirmed descendants, the header itself included.
    pub confirmed_depth: u32,
}

pub trait ExternalLightClient: Send + Sync {
    /// Look up a header by its display (reversed-hex) block hash.
    fn get_header(&self, block_hash: &str) -> ChainResult<Option<HeaderInfo>>;

    /// Decode the payment address a script pays to, if the script form is
    /// recognised.
    fn extract_payment_addr_from_script(&self, script: &[u8]) -> Option<String>;
}

/// Header and script registry backed by in-process maps. Serves as the seam
/// implementation for deterministic tests and local simulation.
#[derive(Default)]
pub struct InMemoryLightClient {
    headers: RwLock<BTreeMap<String, HeaderInfo>>,
    script_addrs: RwLock<BTreeMap<Vec<u8>, String>>,
}

impl InMemoryLightClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_header(&self, block_hash: impl Into<String>, header: HeaderInfo) {
        self.headers.write().insert(block_hash.into(), header);
    }

    pub fn map_script(&self, script: Vec<u8>, address: impl Into<String>) {
        self.script_addrs.write().insert(script, address.into());
    }
}

impl ExternalLightClient for InMemoryLightClient {
    fn get_header(&self, block_hash: &str) -> ChainResult<Option<HeaderInfo>> {
        if block_hash.is_empty() {
            return Err(ChainError::LightClient("empty block hash".into()));
        }
        Ok(self.headers.read().get(block_hash).cloned())
    }

    fn extract_payment_addr_from_script(&self, script: &[u8]) -> Option<String> {
        self.script_addrs.read().get(script).cloned()
    }
}
