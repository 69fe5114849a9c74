//! Per-token reward split between the DAO, custodians and committees.

use std::collections::BTreeMap;

use crate::committee::state::CommitteeState;
use crate::config::CommitteeParams;
use crate::types::ShardId;

/// Outcome of splitting one token's reward total. Shares always sum back to
/// the input total; truncation remainders accrue to the DAO.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RewardSplit {
    pub dao: u64,
    pub custodian: u64,
    pub beacon: u64,
    pub per_shard: BTreeMap<ShardId, u64>,
}

impl RewardSplit {
    pub fn total(&self) -> u64 {
        self.dao
            + self.custodian
            + self.beacon
            + self.per_shard.values().sum::<u64>()
    }
}

/// Split `total` for one token. The validator share is divided among the
/// beacon and shard committees weighted by committee size, with the beacon
/// weighted `2·len(beacon_committee) / active_shards`. All divisions truncate
/// toward zero.
pub fn split_reward(
    total: u64,
    params: &CommitteeParams,
    committee: &CommitteeState,
) -> RewardSplit {
    let mut dao = (u128::from(params.dao_percent) * u128::from(total) / 100) as u64;
    let mut custodian = 0u64;
    if params.is_split_reward_for_custodian {
        custodian = (u128::from(params.percent_custodian_reward) * u128::from(dao) / 100) as u64;
        dao -= custodian;
    }
    let validator_share = total - dao - custodian;

    let beacon_weight =
        2 * committee.beacon_committee.len() as u128 / u128::from(params.active_shards);
    let shard_weights: BTreeMap<ShardId, u128> = committee
        .shard_committee
        .iter()
        .map(|(shard, members)| (*shard, members.len() as u128))
        .collect();
    let total_weight = beacon_weight + shard_weights.values().sum::<u128>();

    let mut split = RewardSplit {
        dao,
        custodian,
        ..RewardSplit::default()
    };
    if total_weight == 0 {
        split.dao += validator_share;
        return split;
    }

    let mut allocated = 0u64;
    for (shard, weight) in &shard_weights {
        let share = (u128::from(validator_share) * weight / total_weight) as u64;
        split.per_shard.insert(*shard, share);
        allocated += share;
    }
    split.beacon = (u128::from(validator_share) * beacon_weight / total_weight) as u64;
    allocated += split.beacon;
    split.dao += validator_share - allocated;
    split
}
