//! Committee rotation: stake intake, random assignment, swap application and
//! unstake handling, with return-stake emission.
//!
//! Producer and processor share the apply functions, so a producer applying
//! its own instructions to a working clone lands on the same committee state
//! the processor later recomputes.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::committee::assign::assign_v2;
use crate::committee::state::{CommitteeState, Membership, StakerInfo};
use crate::committee::swap_rule::{SwapRule, SwapShardContent};
use crate::config::CommitteeParams;
use crate::errors::{ChainError, ChainResult};
use crate::types::{
    Action, ActionEnvelope, CommitteePublicKey, Instruction, InstructionStatus, MetadataType,
    ShardId, BEACON_SHARD_ID,
};

fn encode_content<T: Serialize>(content: &T) -> ChainResult<String> {
    Ok(BASE64.encode(serde_json::to_vec(content)?))
}

fn decode_content<T: serde::de::DeserializeOwned>(content: &str) -> ChainResult<T> {
    let bytes = BASE64.decode(content)?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// User-signed stake request carried in a shard block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakeMeta {
    pub committee_public_key: CommitteePublicKey,
    pub incognito_address: String,
    pub reward_receiver: String,
    pub auto_stake: bool,
    pub stake_amount: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakeContent {
    pub committee_public_key: CommitteePublicKey,
    pub incognito_address: String,
    pub reward_receiver: String,
    pub auto_stake: bool,
    pub stake_amount: u64,
    /// Shard tx that funded the stake; repaid on return-stake.
    pub staking_tx_id: String,
    pub shard_id: ShardId,
}

impl StakeContent {
    pub fn decode(content: &str) -> ChainResult<Self> {
        decode_content(content)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnstakeMeta {
    pub committee_public_key: CommitteePublicKey,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnstakeContent {
    pub committee_public_key: CommitteePublicKey,
    pub tx_req_id: String,
    pub shard_id: ShardId,
}

impl UnstakeContent {
    pub fn decode(content: &str) -> ChainResult<Self> {
        decode_content(content)
    }
}

/// Content of a `ReturnStake` instruction; consumed by shard chains to repay
/// the original staking transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnStakeContent {
    pub committee_public_key: CommitteePublicKey,
    pub staking_tx_id: String,
}

impl ReturnStakeContent {
    pub fn decode(content: &str) -> ChainResult<Self> {
        decode_content(content)
    }
}

fn return_stake_instruction(
    key: &str,
    staking_tx_id: String,
) -> ChainResult<Instruction> {
    let content = ReturnStakeContent {
        committee_public_key: key.to_string(),
        staking_tx_id,
    };
    Ok(Instruction::new(
        MetadataType::ReturnStake,
        BEACON_SHARD_ID,
        InstructionStatus::Accepted,
        Some(encode_content(&content)?),
    ))
}

/// Producer side of a stake action.
pub fn produce_stake(action: &Action, state: &CommitteeState) -> ChainResult<Option<Instruction>> {
    let envelope: ActionEnvelope<StakeMeta> = match action.decode() {
        Ok(envelope) => envelope,
        Err(err) => {
            debug!(%err, "undecodable stake action skipped");
            return Ok(None);
        }
    };
    let meta = &envelope.meta;
    let content = StakeContent {
        committee_public_key: meta.committee_public_key.clone(),
        incognito_address: meta.incognito_address.clone(),
        reward_receiver: meta.reward_receiver.clone(),
        auto_stake: meta.auto_stake,
        stake_amount: meta.stake_amount,
        staking_tx_id: envelope.tx_req_id.clone(),
        shard_id: envelope.shard_id,
    };
    let status = if meta.committee_public_key.is_empty() {
        InstructionStatus::Rejected
    } else if state.occurrences(&meta.committee_public_key) > 0
        || state.stakers.contains_key(&meta.committee_public_key)
    {
        debug!(key = %meta.committee_public_key, "duplicate stake rejected");
        InstructionStatus::DuplicateKey
    } else {
        InstructionStatus::Accepted
    };
    Ok(Some(Instruction::new(
        MetadataType::Stake,
        envelope.shard_id,
        status,
        Some(encode_content(&content)?),
    )))
}

/// Processor side of a stake instruction: accepted keys join the common pool.
pub fn apply_stake(instruction: &Instruction, state: &mut CommitteeState) -> ChainResult<()> {
    if instruction.status != InstructionStatus::Accepted {
        return Ok(());
    }
    let content: StakeContent = instruction
        .content
        .as_deref()
        .ok_or_else(|| ChainError::ConsensusFault("stake instruction without content".into()))
        .and_then(decode_content)?;
    let key = content.committee_public_key.clone();
    state.shard_common_pool.push(key.clone());
    state.auto_stake.insert(key.clone(), content.auto_stake);
    state
        .reward_receiver
        .insert(key.clone(), content.reward_receiver.clone());
    state
        .staking_tx
        .insert(key.clone(), content.staking_tx_id.clone());
    state.stakers.insert(
        key.clone(),
        StakerInfo {
            incognito_address: content.incognito_address,
            total_collateral: content.stake_amount,
            free_collateral: content.stake_amount,
            locked_by_token: BTreeMap::new(),
            remote_addresses: BTreeMap::new(),
            auto_stake: content.auto_stake,
            staking_tx_id: content.staking_tx_id,
        },
    );
    info!(key = %key, "staked into common pool");
    Ok(())
}

/// At random time, freeze the pool prefix that the assign step will consume.
pub fn snapshot_assignment_prefix(
    params: &CommitteeParams,
    beacon_height: u64,
    state: &mut CommitteeState,
) {
    if params.height_in_epoch(beacon_height) == params.random_time_offset {
        state.number_of_assigned_candidates = state.shard_common_pool.len();
        debug!(
            candidates = state.number_of_assigned_candidates,
            "snapshotted assignment prefix"
        );
    }
}

/// At the assign offset, distribute the frozen candidate prefix across shard
/// substitute lists. Deterministic in the epoch random number; both passes
/// run it directly, no instruction is exchanged.
pub fn process_assignment(
    params: &CommitteeParams,
    beacon_height: u64,
    random_number: Option<u64>,
    state: &mut CommitteeState,
) -> ChainResult<()> {
    if !params.is_assign_height(beacon_height) || state.number_of_assigned_candidates == 0 {
        return Ok(());
    }
    let Some(random_number) = random_number else {
        warn!(beacon_height, "assign height without a random number, deferring");
        return Ok(());
    };
    let count = state.number_of_assigned_candidates.min(state.shard_common_pool.len());
    let candidates: Vec<CommitteePublicKey> = state.shard_common_pool.drain(..count).collect();
    state.number_of_assigned_candidates = 0;

    let mut pending: BTreeMap<ShardId, usize> = BTreeMap::new();
    for shard in 0..params.active_shards {
        pending.insert(shard, state.shard_substitute.get(&shard).map_or(0, Vec::len));
    }
    let assigned = assign_v2(&candidates, &pending, random_number);
    for (shard, keys) in assigned {
        info!(shard, count = keys.len(), "assigned candidates to substitute");
        state.substitute_of_mut(shard).extend(keys);
    }
    Ok(())
}

fn decide_swap(
    params: &CommitteeParams,
    epoch: u64,
    shard: ShardId,
    penalties: &BTreeMap<CommitteePublicKey, u64>,
    state: &CommitteeState,
) -> crate::committee::swap_rule::SwapDecision {
    let committee = state.shard_committee.get(&shard).cloned().unwrap_or_default();
    let substitute = state.shard_substitute.get(&shard).cloned().unwrap_or_default();
    SwapRule::for_epoch(params, epoch).process(
        shard,
        epoch,
        &committee,
        &substitute,
        params.max_shard_committee_size,
        params.number_of_fixed_shard_validators,
        penalties,
        params.slash_penalty_threshold,
        params.max_slash_per_epoch,
    )
}

/// Produce one swap-shard instruction per active shard at an epoch boundary.
pub fn generate_swap_instructions(
    params: &CommitteeParams,
    epoch: u64,
    penalties: &BTreeMap<CommitteePublicKey, u64>,
    state: &CommitteeState,
) -> ChainResult<Vec<Instruction>> {
    let mut instructions = Vec::new();
    for shard in 0..params.active_shards {
        let decision = decide_swap(params, epoch, shard, penalties, state);
        if decision.content.in_public_keys.is_empty()
            && decision.content.out_public_keys.is_empty()
            && decision.content.slashed_public_keys.is_empty()
        {
            continue;
        }
        instructions.push(Instruction::new(
            MetadataType::SwapShard,
            shard,
            InstructionStatus::Accepted,
            Some(decision.content.encode()?),
        ));
    }
    Ok(instructions)
}

/// Apply a swap-shard instruction. The proposed key sets must match the ones
/// recomputed from local state for the running epoch; a stale epoch or a
/// key-set mismatch invalidates the block. Returns the `ReturnStake`
/// instructions owed to departing validators.
pub fn apply_swap(
    instruction: &Instruction,
    params: &CommitteeParams,
    epoch: u64,
    penalties: &BTreeMap<CommitteePublicKey, u64>,
    state: &mut CommitteeState,
) -> ChainResult<Vec<Instruction>> {
    let proposed: SwapShardContent = instruction
        .content
        .as_deref()
        .ok_or_else(|| ChainError::ConsensusFault("swap instruction without content".into()))
        .and_then(SwapShardContent::decode)?;
    if proposed.epoch != epoch {
        return Err(ChainError::ConsensusFault(format!(
            "swap instruction for epoch {} applied in epoch {}",
            proposed.epoch, epoch
        )));
    }
    let decision = decide_swap(params, epoch, proposed.shard_id, penalties, state);
    if !decision.content.same_key_sets(&proposed) {
        return Err(ChainError::ConsensusFault(format!(
            "swap instruction mismatch for shard {}",
            proposed.shard_id
        )));
    }

    *state.committee_of_mut(proposed.shard_id) = decision.new_committee;
    *state.substitute_of_mut(proposed.shard_id) = decision.new_substitute;

    let mut returns = Vec::new();
    for key in &decision.content.out_public_keys {
        if state.auto_stake.get(key).copied().unwrap_or(false) {
            state.shard_common_pool.push(key.clone());
        } else {
            let staking_tx = state.staking_tx.get(key).cloned().unwrap_or_default();
            state.forget(key);
            returns.push(return_stake_instruction(key, staking_tx)?);
        }
    }
    // Slashed members lose their slot unconditionally; stake still returns.
    for key in &decision.content.slashed_public_keys {
        let staking_tx = state.staking_tx.get(key).cloned().unwrap_or_default();
        state.forget(key);
        returns.push(return_stake_instruction(key, staking_tx)?);
    }
    if !decision.content.slashed_public_keys.is_empty() {
        info!(
            shard = proposed.shard_id,
            slashed = decision.content.slashed_public_keys.len(),
            "slashed committee members"
        );
    }
    Ok(returns)
}

/// Producer side of an unstake action.
pub fn produce_unstake(
    action: &Action,
    state: &CommitteeState,
) -> ChainResult<Option<Instruction>> {
    let envelope: ActionEnvelope<UnstakeMeta> = match action.decode() {
        Ok(envelope) => envelope,
        Err(err) => {
            debug!(%err, "undecodable unstake action skipped");
            return Ok(None);
        }
    };
    let key = &envelope.meta.committee_public_key;
    let status = if state.membership(key).is_none() {
        debug!(key = %key, "unstake for unknown validator rejected");
        InstructionStatus::ItemNotFound
    } else {
        InstructionStatus::Accepted
    };
    let content = UnstakeContent {
        committee_public_key: key.clone(),
        tx_req_id: envelope.tx_req_id.clone(),
        shard_id: envelope.shard_id,
    };
    Ok(Some(Instruction::new(
        MetadataType::Unstake,
        envelope.shard_id,
        status,
        Some(encode_content(&content)?),
    )))
}

/// Apply an unstake instruction. A pooled candidate leaves immediately with
/// a `ReturnStake`; a serving or substitute validator only flips auto-stake
/// off, so the return fires on its next swap-out.
pub fn apply_unstake(
    instruction: &Instruction,
    state: &mut CommitteeState,
) -> ChainResult<Option<Instruction>> {
    if instruction.status != InstructionStatus::Accepted {
        return Ok(None);
    }
    let content: UnstakeContent = instruction
        .content
        .as_deref()
        .ok_or_else(|| ChainError::ConsensusFault("unstake instruction without content".into()))
        .and_then(decode_content)?;
    let key = &content.committee_public_key;
    match state.membership(key) {
        Some(Membership::CommonPool) => {
            let position = state
                .shard_common_pool
                .iter()
                .position(|k| k == key)
                .expect("membership says common pool");
            state.shard_common_pool.remove(position);
            // Keep the frozen prefix aligned when an assigned candidate leaves.
            if position < state.number_of_assigned_candidates {
                state.number_of_assigned_candidates -= 1;
            }
            let staking_tx = state.staking_tx.get(key).cloned().unwrap_or_default();
            state.forget(key);
            Ok(Some(return_stake_instruction(key, staking_tx)?))
        }
        Some(_) => {
            state.auto_stake.insert(key.clone(), false);
            if let Some(staker) = state.stakers.get_mut(key) {
                staker.auto_stake = false;
            }
            Ok(None)
        }
        None => Ok(None),
    }
}
