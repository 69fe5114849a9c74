use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::state::keys::hash_parts;

/// A burn request awaiting inclusion in an unshield batch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitingUnshield {
    pub remote_address: String,
    /// Burned amount in ptoken nano units, fee not yet subtracted.
    pub amount_ptoken: u64,
    pub unshield_id: String,
    pub beacon_height_requested: u64,
}

pub fn waiting_unshield_key(token_id: &str, unshield_id: &str) -> String {
    hex::encode(hash_parts(&[token_id.as_bytes(), unshield_id.as_bytes()]))
}

/// Per-token queue of waiting burn requests. Iteration is key-sorted so every
/// node drains the queue in the same order; removal happens when a request is
/// included in a batch.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnshieldQueue {
    waiting: BTreeMap<String, WaitingUnshield>,
}

impl UnshieldQueue {
    pub fn insert(&mut self, token_id: &str, request: WaitingUnshield) -> bool {
        let key = waiting_unshield_key(token_id, &request.unshield_id);
        if self.waiting.contains_key(&key) {
            return false;
        }
        self.waiting.insert(key, request);
        true
    }

    pub fn remove(&mut self, key: &str) -> Option<WaitingUnshield> {
        self.waiting.remove(key)
    }

    pub fn contains(&self, token_id: &str, unshield_id: &str) -> bool {
        self.waiting
            .contains_key(&waiting_unshield_key(token_id, unshield_id))
    }

    pub fn get(&self, token_id: &str, unshield_id: &str) -> Option<&WaitingUnshield> {
        self.waiting.get(&waiting_unshield_key(token_id, unshield_id))
    }

    pub fn len(&self) -> usize {
        self.waiting.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiting.is_empty()
    }

    /// Deterministic drain order for the batching engine.
    pub fn ordered(&self) -> Vec<(String, WaitingUnshield)> {
        self.waiting
            .iter()
            .map(|(key, request)| (key.clone(), request.clone()))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &WaitingUnshield)> {
        self.waiting.iter()
    }
}
