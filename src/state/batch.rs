use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::state::keys::hash_parts;
use crate::state::utxo::Utxo;

/// One payout line of a batch's external transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchOutput {
    pub remote_address: String,
    /// Payout amount in external units, unshield fee already subtracted.
    pub amount_external: u64,
}

/// A batch of unshield requests bound to one raw external transaction that is
/// out for signing. Retired when a confirming external tx proof is submitted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedUnshieldBatch {
    pub batch_id: String,
    pub unshield_ids: Vec<String>,
    /// Spent pool outputs, grouped by holding wallet.
    pub utxos_spent: BTreeMap<String, Vec<Utxo>>,
    /// Payout plan in request order; one line per batched unshield.
    pub outputs: Vec<BatchOutput>,
    /// Sum of the batched requests in ptoken nano units, for the burned-supply
    /// counter when the batch retires.
    pub total_unshield_ptoken: u64,
    /// Replacement history: beacon height -> external fee. Sorted, so the
    /// newest entry is the latest fee.
    pub external_fees: BTreeMap<u64, u64>,
}

impl ProcessedUnshieldBatch {
    pub fn latest_fee(&self) -> Option<(u64, u64)> {
        self.external_fees
            .iter()
            .next_back()
            .map(|(height, fee)| (*height, *fee))
    }

    pub fn record_fee(&mut self, beacon_height: u64, fee: u64) {
        self.external_fees.insert(beacon_height, fee);
    }

    pub fn spent_amount(&self) -> u64 {
        self.utxos_spent
            .values()
            .flatten()
            .map(|utxo| utxo.amount_satoshi)
            .sum()
    }

    pub fn output_amount(&self) -> u64 {
        self.outputs.iter().map(|output| output.amount_external).sum()
    }
}

/// Batch id binds the producing height to the exact request set.
pub fn batch_id(beacon_height: u64, unshield_ids: &[String]) -> String {
    let mut parts: Vec<&[u8]> = Vec::with_capacity(unshield_ids.len() + 1);
    let height_bytes = beacon_height.to_be_bytes();
    parts.push(&height_bytes);
    for id in unshield_ids {
        parts.push(id.as_bytes());
    }
    hex::encode(hash_parts(&parts))
}

pub fn batch_key(token_id: &str, batch_id: &str) -> String {
    hex::encode(hash_parts(&[token_id.as_bytes(), batch_id.as_bytes()]))
}

/// Per-token set of in-flight batches.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSet {
    batches: BTreeMap<String, ProcessedUnshieldBatch>,
}

impl BatchSet {
    pub fn insert(&mut self, token_id: &str, batch: ProcessedUnshieldBatch) {
        let key = batch_key(token_id, &batch.batch_id);
        self.batches.insert(key, batch);
    }

    pub fn remove(&mut self, token_id: &str, batch_id: &str) -> Option<ProcessedUnshieldBatch> {
        self.batches.remove(&batch_key(token_id, batch_id))
    }

    pub fn get(&self, token_id: &str, batch_id: &str) -> Option<&ProcessedUnshieldBatch> {
        self.batches.get(&batch_key(token_id, batch_id))
    }

    pub fn get_mut(
        &mut self,
        token_id: &str,
        batch_id: &str,
    ) -> Option<&mut ProcessedUnshieldBatch> {
        self.batches.get_mut(&batch_key(token_id, batch_id))
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ProcessedUnshieldBatch)> {
        self.batches.iter()
    }
}
