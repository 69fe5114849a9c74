use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::errors::ChainResult;
use crate::state::keys::{state_key, COMMITTEE_STATE_PREFIX, STAKER_INFO_PREFIX};
use crate::store::{StateStore, WriteBatch};
use crate::types::{CommitteePublicKey, ShardId, TokenId};

/// Collateral and identity record for a staked validator. Back references
/// from instructions are plain public-key strings resolved through lookups.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakerInfo {
    pub incognito_address: String,
    pub total_collateral: u64,
    pub free_collateral: u64,
    pub locked_by_token: BTreeMap<TokenId, u64>,
    pub remote_addresses: BTreeMap<TokenId, String>,
    pub auto_stake: bool,
    pub staking_tx_id: String,
}

/// Where a public key currently sits in the committee structure.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Membership {
    BeaconCommittee,
    ShardCommittee(ShardId),
    ShardSubstitute(ShardId),
    CommonPool,
}

/// Full committee structure for the beacon and every shard.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitteeState {
    pub beacon_committee: Vec<CommitteePublicKey>,
    pub shard_committee: BTreeMap<ShardId, Vec<CommitteePublicKey>>,
    pub shard_substitute: BTreeMap<ShardId, Vec<CommitteePublicKey>>,
    pub shard_common_pool: Vec<CommitteePublicKey>,
    /// Prefix of the common pool snapshotted at random time, assigned at the
    /// epoch's assign offset.
    pub number_of_assigned_candidates: usize,
    pub auto_stake: BTreeMap<CommitteePublicKey, bool>,
    pub reward_receiver: BTreeMap<CommitteePublicKey, String>,
    pub staking_tx: BTreeMap<CommitteePublicKey, String>,
    pub stakers: BTreeMap<CommitteePublicKey, StakerInfo>,
}

impl CommitteeState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn membership(&self, key: &str) -> Option<Membership> {
        if self.beacon_committee.iter().any(|k| k == key) {
            return Some(Membership::BeaconCommittee);
        }
        for (shard, committee) in &self.shard_committee {
            if committee.iter().any(|k| k == key) {
                return Some(Membership::ShardCommittee(*shard));
            }
        }
        for (shard, substitute) in &self.shard_substitute {
            if substitute.iter().any(|k| k == key) {
                return Some(Membership::ShardSubstitute(*shard));
            }
        }
        if self.shard_common_pool.iter().any(|k| k == key) {
            return Some(Membership::CommonPool);
        }
        None
    }

    /// Number of sets the key appears in. Must never exceed one.
    pub fn occurrences(&self, key: &str) -> usize {
        let mut count = usize::from(self.beacon_committee.iter().any(|k| k == key));
        count += self
            .shard_committee
            .values()
            .filter(|committee| committee.iter().any(|k| k == key))
            .count();
        count += self
            .shard_substitute
            .values()
            .filter(|substitute| substitute.iter().any(|k| k == key))
            .count();
        count += usize::from(self.shard_common_pool.iter().any(|k| k == key));
        count
    }

    /// Drop every per-key record of a validator leaving the system.
    pub fn forget(&mut self, key: &str) {
        self.auto_stake.remove(key);
        self.reward_receiver.remove(key);
        self.staking_tx.remove(key);
        self.stakers.remove(key);
    }

    pub fn committee_of_mut(&mut self, shard: ShardId) -> &mut Vec<CommitteePublicKey> {
        self.shard_committee.entry(shard).or_default()
    }

    pub fn substitute_of_mut(&mut self, shard: ShardId) -> &mut Vec<CommitteePublicKey> {
        self.shard_substitute.entry(shard).or_default()
    }

    pub fn flatten(&self) -> ChainResult<BTreeMap<Vec<u8>, Vec<u8>>> {
        let mut flat = BTreeMap::new();
        // Membership and per-key maps persist as one document; staker
        // collateral records persist individually under their own prefix.
        let mut trimmed = self.clone();
        let stakers = std::mem::take(&mut trimmed.stakers);
        flat.insert(
            state_key(COMMITTEE_STATE_PREFIX, &[b"committee"]),
            serde_json::to_vec(&trimmed)?,
        );
        for (key, staker) in &stakers {
            flat.insert(
                state_key(STAKER_INFO_PREFIX, &[key.as_bytes()]),
                serde_json::to_vec(&(key, staker))?,
            );
        }
        Ok(flat)
    }

    pub fn write_diff(&self, previous: &CommitteeState) -> ChainResult<WriteBatch> {
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

    pub fn load(store: &dyn StateStore, height: u64) -> ChainResult<Self> {
        let mut state = CommitteeState::new();
        if let Some(value) =
            store.get(height, &state_key(COMMITTEE_STATE_PREFIX, &[b"committee"]))?
        {
            state = serde_json::from_slice(&value)?;
        }
        for (_, value) in store.scan_prefix(height, STAKER_INFO_PREFIX)? {
            let (key, staker): (CommitteePublicKey, StakerInfo) = serde_json::from_slice(&value)?;
            state.stakers.insert(key, staker);
        }
        Ok(state)
    }
}
