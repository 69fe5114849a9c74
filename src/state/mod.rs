pub mod batch;
pub mod keys;
pub mod merkle;
pub mod shielding;
pub mod unshield;
pub mod utxo;

pub use batch::{batch_id, BatchSet, ProcessedUnshieldBatch};
pub use shielding::{ShieldingRecord, ShieldingRegistry};
pub use unshield::{UnshieldQueue, WaitingUnshield};
pub use utxo::{Utxo, UtxoPool};

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::errors::ChainResult;
use crate::state::keys::{
    state_key, PORTAL_PROCESSED_UNSHIELD_PREFIX, PORTAL_SHIELDING_PREFIX, PORTAL_STATUS_PREFIX,
    PORTAL_SUPPLY_PREFIX, PORTAL_UTXO_PREFIX, PORTAL_WAITING_UNSHIELD_PREFIX,
};
use crate::store::{StateStore, WriteBatch};
use crate::types::{InstructionStatus, MetadataType, TokenId};

/// Terminal status of a user request, indexed by its tx req id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestStatus {
    pub tx_req_id: String,
    pub metadata_type: MetadataType,
    pub status: InstructionStatus,
}

/// Everything the portal tracks for one bridge token.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenState {
    pub utxos: UtxoPool,
    pub shielding: ShieldingRegistry,
    pub waiting: UnshieldQueue,
    pub batches: BatchSet,
    /// Minted ptoken supply in nano units.
    pub minted_supply: u64,
    /// Burned ptoken supply in nano units, advanced at batch retirement.
    pub burned_supply: u64,
    /// External units that left the multisig wallet across retired batches.
    pub paid_out_external: u64,
}

impl TokenState {
    /// External units currently locked inside in-flight batches.
    pub fn in_flight_external(&self) -> u64 {
        self.batches
            .iter()
            .map(|(_, batch)| batch.spent_amount())
            .sum()
    }

    /// Conservation: pool + in-flight == credited − paid out, external units.
    pub fn conservation_holds(&self) -> bool {
        let credited: u64 = self.shielding.total_amount();
        self.utxos.total_amount() + self.in_flight_external()
            == credited.saturating_sub(self.paid_out_external)
    }
}

/// In-memory snapshot of the whole portal state.
///
/// The producer pass works against a clone; the processor pass mutates the
/// authoritative copy and the pipeline commits the diff against the previous
/// snapshot atomically.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortalState {
    tokens: BTreeMap<TokenId, TokenState>,
    statuses: BTreeMap<String, RequestStatus>,
}

impl PortalState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn token(&self, token_id: &str) -> Option<&TokenState> {
        self.tokens.get(token_id)
    }

    pub fn token_mut(&mut self, token_id: &str) -> &mut TokenState {
        self.tokens.entry(token_id.to_string()).or_default()
    }

    pub fn tokens(&self) -> impl Iterator<Item = (&TokenId, &TokenState)> {
        self.tokens.iter()
    }

    pub fn status_of(&self, tx_req_id: &str) -> Option<&RequestStatus> {
        self.statuses.get(tx_req_id)
    }

    pub fn record_status(&mut self, status: RequestStatus) {
        self.statuses.insert(status.tx_req_id.clone(), status);
    }

    /// Serialize the snapshot into its persisted key/value form.
    ///
    /// Record granularity follows the prefix layout of [`keys`]: one entry per
    /// UTXO, shielding record, waiting request, batch, per-token supply
    /// counter and per-request status.
    pub fn flatten(&self) -> ChainResult<BTreeMap<Vec<u8>, Vec<u8>>> {
        let mut flat = BTreeMap::new();
        for (token_id, token) in &self.tokens {
            for (_, utxo) in token.utxos.iter() {
                let key = state_key(
                    PORTAL_UTXO_PREFIX,
                    &[
                        token_id.as_bytes(),
                        utxo.wallet_address.as_bytes(),
                        utxo.external_tx_hash.as_bytes(),
                        &utxo.output_index.to_be_bytes(),
                    ],
                );
                flat.insert(key, serde_json::to_vec(&(token_id, utxo))?);
            }
            for (_, record) in token.shielding.iter() {
                let key = state_key(
                    PORTAL_SHIELDING_PREFIX,
                    &[token_id.as_bytes(), record.external_tx_hash.as_bytes()],
                );
                flat.insert(key, serde_json::to_vec(&(token_id, record))?);
            }
            for (_, request) in token.waiting.iter() {
                let key = state_key(
                    PORTAL_WAITING_UNSHIELD_PREFIX,
                    &[token_id.as_bytes(), request.unshield_id.as_bytes()],
                );
                flat.insert(key, serde_json::to_vec(&(token_id, request))?);
            }
            for (_, batch) in token.batches.iter() {
                let key = state_key(
                    PORTAL_PROCESSED_UNSHIELD_PREFIX,
                    &[token_id.as_bytes(), batch.batch_id.as_bytes()],
                );
                flat.insert(key, serde_json::to_vec(&(token_id, batch))?);
            }
            let supply_key = state_key(PORTAL_SUPPLY_PREFIX, &[token_id.as_bytes()]);
            let counters = (
                token_id,
                token.minted_supply,
                token.burned_supply,
                token.paid_out_external,
            );
            flat.insert(supply_key, serde_json::to_vec(&counters)?);
        }
        for (tx_req_id, status) in &self.statuses {
            let key = state_key(PORTAL_STATUS_PREFIX, &[tx_req_id.as_bytes()]);
            flat.insert(key, serde_json::to_vec(status)?);
        }
        Ok(flat)
    }

    /// Buffered writes turning `previous`'s persisted form into `self`'s.
    pub fn write_diff(&self, previous: &PortalState) -> ChainResult<WriteBatch> {
        let prev = previous.flatten()?;
        let next = self.flatten()?;
        let mut batch = WriteBatch::new();
        for (key, value) in &next {
            if prev.get(key) != Some(value) {
                batch.put(key.clone(), value.clone());
            }
        }
        for key in prev.keys() {
            if !next.contains_key(key) {
                batch.delete(key.clone());
            }
        }
        Ok(batch)
    }

    /// Rebuild a snapshot from the store at `height`.
    pub fn load(store: &dyn StateStore, height: u64) -> ChainResult<Self> {
        let mut state = PortalState::new();
        for (_, value) in store.scan_prefix(height, PORTAL_UTXO_PREFIX)? {
            let (token_id, utxo): (TokenId, Utxo) = serde_json::from_slice(&value)?;
            state.token_mut(&token_id).utxos.insert(&token_id, utxo);
        }
        for (_, value) in store.scan_prefix(height, PORTAL_SHIELDING_PREFIX)? {
            let (token_id, record): (TokenId, ShieldingRecord) = serde_json::from_slice(&value)?;
            state.token_mut(&token_id).shielding.insert(&token_id, record);
        }
        for (_, value) in store.scan_prefix(height, PORTAL_WAITING_UNSHIELD_PREFIX)? {
            let (token_id, request): (TokenId, WaitingUnshield) = serde_json::from_slice(&value)?;
            state.token_mut(&token_id).waiting.insert(&token_id, request);
        }
        for (_, value) in store.scan_prefix(height, PORTAL_PROCESSED_UNSHIELD_PREFIX)? {
            let (token_id, batch): (TokenId, ProcessedUnshieldBatch) =
                serde_json::from_slice(&value)?;
            state.token_mut(&token_id).batches.insert(&token_id, batch);
        }
        for (_, value) in store.scan_prefix(height, PORTAL_SUPPLY_PREFIX)? {
            let (token_id, minted, burned, paid_out): (TokenId, u64, u64, u64) =
                serde_json::from_slice(&value)?;
            let token = state.token_mut(&token_id);
            token.minted_supply = minted;
            token.burned_supply = burned;
            token.paid_out_external = paid_out;
        }
        for (_, value) in store.scan_prefix(height, PORTAL_STATUS_PREFIX)? {
            let status: RequestStatus = serde_json::from_slice(&value)?;
            state.statuses.insert(status.tx_req_id.clone(), status);
        }
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStateStore;

    fn sample_state() -> PortalState {
        let mut state = PortalState::new();
        let token = state.token_mut("btc");
        token.utxos.insert(
            "btc",
            Utxo {
                wallet_address: "multisig".into(),
                external_tx_hash: "aa".into(),
                output_index: 0,
                amount_satoshi: 200,
            },
        );
        token.shielding.insert(
            "btc",
            ShieldingRecord {
                external_tx_hash: "aa".into(),
                inc_address: "12S5Lrs".into(),
                amount: 200,
            },
        );
        token.minted_supply = 2_000;
        state.record_status(RequestStatus {
            tx_req_id: "req-1".into(),
            metadata_type: MetadataType::PortalShieldingRequest,
            status: InstructionStatus::Accepted,
        });
        state
    }

    #[test]
    fn persist_and_reload_round_trip() {
        let store = MemoryStateStore::new();
        let state = sample_state();
        let batch = state.write_diff(&PortalState::new()).expect("diff");
        store.commit(1, batch).expect("commit");
        let reloaded = PortalState::load(&store, 1).expect("load");
        assert_eq!(reloaded, state);
    }

    #[test]
    fn diff_emits_deletes_for_removed_records() {
        let state = sample_state();
        let mut next = state.clone();
        let key = next
            .token("btc")
            .unwrap()
            .utxos
            .iter()
            .next()
            .map(|(key, _)| key.clone())
            .unwrap();
        next.token_mut("btc").utxos.remove(&key);
        let diff = next.write_diff(&state).expect("diff");
        assert!(!diff.is_empty());

        let store = MemoryStateStore::new();
        store
            .commit(1, state.write_diff(&PortalState::new()).expect("diff"))
            .expect("commit");
        store.commit(2, diff).expect("commit");
        let reloaded = PortalState::load(&store, 2).expect("load");
        assert_eq!(reloaded, next);
    }

    #[test]
    fn conservation_accounts_for_in_flight_batches() {
        let state = sample_state();
        assert!(state.token("btc").unwrap().conservation_holds());
    }
}
