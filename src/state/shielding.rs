use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::state::keys::hash_parts;

/// Anti-replay record for an accepted shielding proof.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShieldingRecord {
    pub external_tx_hash: String,
    pub inc_address: String,
    /// Credited amount in external units.
    pub amount: u64,
}

pub fn shielding_key(token_id: &str, external_tx_hash: &str) -> String {
    hex::encode(hash_parts(&[token_id.as_bytes(), external_tx_hash.as_bytes()]))
}

/// Per-token set of external tx hashes that already minted.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShieldingRegistry {
    records: BTreeMap<String, ShieldingRecord>,
}

impl ShieldingRegistry {
    pub fn contains_tx(&self, token_id: &str, external_tx_hash: &str) -> bool {
        self.records
            .contains_key(&shielding_key(token_id, external_tx_hash))
    }

    pub fn insert(&mut self, token_id: &str, record: ShieldingRecord) {
        let key = shielding_key(token_id, &record.external_tx_hash);
        self.records.insert(key, record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ShieldingRecord)> {
        self.records.iter()
    }

    pub fn total_amount(&self) -> u64 {
        self.records.values().map(|record| record.amount).sum()
    }
}
