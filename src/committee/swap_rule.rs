//! Epoch-boundary swap decisions: who enters a shard committee from the
//! substitute list, who rotates out, who is slashed.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::config::CommitteeParams;
use crate::errors::ChainResult;
use crate::types::{CommitteePublicKey, ShardId};

/// Instruction content of a swap-shard decision.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapShardContent {
    pub shard_id: ShardId,
    pub epoch: u64,
    pub swap_rule_version: u8,
    pub in_public_keys: Vec<CommitteePublicKey>,
    pub out_public_keys: Vec<CommitteePublicKey>,
    pub slashed_public_keys: Vec<CommitteePublicKey>,
}

impl SwapShardContent {
    pub fn encode(&self) -> ChainResult<String> {
        Ok(BASE64.encode(serde_json::to_vec(self)?))
    }

    pub fn decode(content: &str) -> ChainResult<Self> {
        let bytes = BASE64.decode(content)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Consensus comparison is by key set, not by ordering.
    pub fn same_key_sets(&self, other: &SwapShardContent) -> bool {
        let sorted = |keys: &[CommitteePublicKey]| {
            let mut keys = keys.to_vec();
            keys.sort();
            keys
        };
        self.shard_id == other.shard_id
            && sorted(&self.in_public_keys) == sorted(&other.in_public_keys)
            && sorted(&self.out_public_keys) == sorted(&other.out_public_keys)
            && sorted(&self.slashed_public_keys) == sorted(&other.slashed_public_keys)
    }
}

/// Full outcome of one shard's swap decision.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SwapDecision {
    pub content: SwapShardContent,
    pub new_committee: Vec<CommitteePublicKey>,
    pub new_substitute: Vec<CommitteePublicKey>,
}

/// Swap strategy in force, selected once per block by epoch comparison.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SwapRule {
    V1,
    V2,
    V3,
}

impl SwapRule {
    pub fn for_epoch(params: &CommitteeParams, epoch: u64) -> Self {
        match params.swap_rule_version(epoch) {
            3 => SwapRule::V3,
            2 => SwapRule::V2,
            _ => SwapRule::V1,
        }
    }

    pub fn version(self) -> u8 {
        match self {
            SwapRule::V1 => 1,
            SwapRule::V2 => 2,
            SwapRule::V3 => 3,
        }
    }

    /// Decide one shard's swap. The first `fixed_count` members never leave;
    /// slashing picks members whose penalty exceeds `slash_threshold`, at
    /// most `max_slash`; swap-ins fill toward `max_size`.
    #[allow(clippy::too_many_arguments)]
    pub fn process(
        self,
        shard_id: ShardId,
        epoch: u64,
        committee: &[CommitteePublicKey],
        substitute: &[CommitteePublicKey],
        max_size: usize,
        fixed_count: usize,
        penalties: &BTreeMap<CommitteePublicKey, u64>,
        slash_threshold: u64,
        max_slash: usize,
    ) -> SwapDecision {
        let fixed_count = fixed_count.min(committee.len());
        let (fixed, rotating) = committee.split_at(fixed_count);

        let slashed: Vec<CommitteePublicKey> = match self {
            SwapRule::V1 => Vec::new(),
            SwapRule::V2 | SwapRule::V3 => rotating
                .iter()
                .filter(|key| {
                    penalties.get(*key).copied().unwrap_or_default() > slash_threshold
                })
                .take(max_slash)
                .cloned()
                .collect(),
        };
        let survivors: Vec<CommitteePublicKey> = rotating
            .iter()
            .filter(|key| !slashed.contains(key))
            .cloned()
            .collect();
        let after_slash_len = fixed.len() + survivors.len();

        // Contract: swap-in count is min(|substitute|, max − fixed).
        let mut in_count = substitute.len().min(max_size.saturating_sub(fixed_count));
        // Normal swap-out makes room for the ins without exceeding max.
        let mut out_count = (after_slash_len + in_count).saturating_sub(max_size);
        if self == SwapRule::V3 {
            // Churn bound: rotate at most a third of the surviving committee.
            let churn_cap = (after_slash_len / 3).max(1);
            if out_count > churn_cap {
                out_count = churn_cap;
                in_count = max_size.saturating_sub(after_slash_len - out_count);
            }
        }
        let out_count = out_count.min(survivors.len());
        let in_count = in_count.min(substitute.len());

        let normal_out: Vec<CommitteePublicKey> = survivors[..out_count].to_vec();
        let swapped_in: Vec<CommitteePublicKey> = substitute[..in_count].to_vec();

        let mut new_committee = fixed.to_vec();
        new_committee.extend(survivors[out_count..].iter().cloned());
        new_committee.extend(swapped_in.iter().cloned());
        let new_substitute = substitute[in_count..].to_vec();

        SwapDecision {
            content: SwapShardContent {
                shard_id,
                epoch,
                swap_rule_version: self.version(),
                in_public_keys: swapped_in,
                out_public_keys: normal_out,
                slashed_public_keys: slashed,
            },
            new_committee,
            new_substitute,
        }
    }
}
