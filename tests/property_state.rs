//! Property tests over the batching selector, the committee partition
//! invariant, the reward split and the instruction wire form.

use std::collections::{BTreeMap, BTreeSet};

use proptest::prelude::*;

use portal_chain::committee::assign::assign_v2;
use portal_chain::committee::engine::{
    apply_stake, apply_swap, apply_unstake, generate_swap_instructions, produce_stake,
    produce_unstake, StakeMeta, UnstakeMeta,
};
use portal_chain::committee::reward::split_reward;
use portal_chain::committee::CommitteeState;
use portal_chain::config::{CommitteeParams, TokenConfig};
use portal_chain::portal::batch::choose_unshield_ids_from_candidates;
use portal_chain::state::{PortalState, Utxo, WaitingUnshield};
use portal_chain::types::{
    Action, ActionEnvelope, Instruction, InstructionStatus, MetadataType,
};

fn proptest_config() -> ProptestConfig {
    let cases = std::env::var("PROPTEST_CASES")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(64);
    ProptestConfig {
        cases,
        ..ProptestConfig::default()
    }
}

fn token_config() -> TokenConfig {
    TokenConfig {
        chain_id: "testnet".into(),
        min_token_amount: 10,
        fee_unshield: 100_000,
        multisig_address: "multisig-wallet".into(),
        multisig_script_hex: "a914dead".into(),
        external_decimal_divisor: 1000,
    }
}

fn committee_params() -> CommitteeParams {
    CommitteeParams {
        active_shards: 2,
        min_shard_committee_size: 1,
        max_shard_committee_size: 4,
        number_of_fixed_shard_validators: 1,
        epoch_length: 20,
        assign_offset: 10,
        random_time_offset: 5,
        swap_rule_v2_epoch: 1,
        swap_rule_v3_epoch: 1_000,
        max_slash_per_epoch: 2,
        slash_penalty_threshold: 50,
        dao_percent: 10,
        is_split_reward_for_custodian: false,
        percent_custodian_reward: 0,
    }
}

fn portal_state_with(utxo_amounts: &[u64], request_amounts: &[u64]) -> PortalState {
    let mut state = PortalState::new();
    let token = state.token_mut("btc");
    for (index, amount) in utxo_amounts.iter().enumerate() {
        token.utxos.insert(
            "btc",
            Utxo {
                wallet_address: "multisig-wallet".into(),
                external_tx_hash: format!("{:064x}", index + 1),
                output_index: 0,
                amount_satoshi: *amount,
            },
        );
    }
    for (index, amount) in request_amounts.iter().enumerate() {
        token.waiting.insert(
            "btc",
            WaitingUnshield {
                remote_address: format!("remote-{index}"),
                amount_ptoken: *amount,
                unshield_id: format!("unshield-{index}"),
                beacon_height_requested: 1,
            },
        );
    }
    state
}

proptest! {
    #![proptest_config(proptest_config())]
    #[test]
    fn batching_selection_is_a_covered_partition(
        utxo_amounts in prop::collection::vec(1u64..5_000_000, 0..12),
        request_amounts in prop::collection::vec(100_001u64..6_000_000_000, 0..20),
    ) {
        let token = token_config();
        let state = portal_state_with(&utxo_amounts, &request_amounts);
        let groups = choose_unshield_ids_from_candidates("btc", &token, &state);

        let mut served_requests = BTreeSet::new();
        let mut spent_utxos = BTreeSet::new();
        for group in &groups {
            let spent: u64 = group.utxos_chosen.iter().map(|(_, u)| u.amount_satoshi).sum();
            let required: u64 = group
                .requests
                .iter()
                .map(|(_, r)| token.inc_to_external(r.amount_ptoken))
                .sum();
            // Chosen UTXOs always cover the converted burn amounts.
            prop_assert!(spent >= required);
            for (key, _) in &group.requests {
                // No request lands in two groups.
                prop_assert!(served_requests.insert(key.clone()));
            }
            for (key, _) in &group.utxos_chosen {
                // No UTXO is spent twice.
                prop_assert!(spent_utxos.insert(key.clone()));
            }
        }
    }
}

proptest! {
    #![proptest_config(proptest_config())]
    #[test]
    fn assign_places_every_candidate_exactly_once(
        count in 0usize..24,
        sizes in prop::collection::btree_map(0u8..6, 0usize..8, 1..6),
        random_number in any::<u64>(),
    ) {
        let candidates: Vec<String> = (0..count).map(|i| format!("cand-{i:02}")).collect();
        let assigned = assign_v2(&candidates, &sizes, random_number);
        let mut placed: Vec<String> = assigned.values().flatten().cloned().collect();
        placed.sort();
        let mut expected = candidates.clone();
        expected.sort();
        prop_assert_eq!(placed, expected);
        for shard in assigned.keys() {
            prop_assert!(sizes.contains_key(shard));
        }
    }
}

proptest! {
    #![proptest_config(proptest_config())]
    #[test]
    fn reward_split_conserves_the_total(
        total in any::<u64>(),
        dao_percent in 0u64..=100,
        custodian_split in any::<bool>(),
        percent_custodian in 0u64..=100,
        beacon in 0usize..16,
        shard_sizes in prop::collection::vec(0usize..16, 0..4),
    ) {
        let mut params = committee_params();
        params.dao_percent = dao_percent;
        params.is_split_reward_for_custodian = custodian_split;
        params.percent_custodian_reward = percent_custodian;
        let mut committee = CommitteeState::new();
        committee.beacon_committee = (0..beacon).map(|i| format!("b{i}")).collect();
        for (shard, size) in shard_sizes.iter().enumerate() {
            let members = (0..*size).map(|i| format!("s{shard}-{i}")).collect();
            committee.shard_committee.insert(shard as u8, members);
        }
        let split = split_reward(total, &params, &committee);
        prop_assert_eq!(split.total(), total);
    }
}

#[derive(Clone, Debug)]
enum CommitteeOp {
    Stake(u8),
    Unstake(u8),
    EpochBoundary,
}

fn committee_op() -> impl Strategy<Value = CommitteeOp> {
    prop_oneof![
        (0u8..20).prop_map(CommitteeOp::Stake),
        (0u8..20).prop_map(CommitteeOp::Unstake),
        Just(CommitteeOp::EpochBoundary),
    ]
}

fn stake_action(index: u8) -> Action {
    Action::encode(
        MetadataType::Stake,
        &ActionEnvelope {
            meta: StakeMeta {
                committee_public_key: format!("validator-{index:02}"),
                incognito_address: format!("addr-{index:02}"),
                reward_receiver: format!("rr-{index:02}"),
                auto_stake: index % 2 == 0,
                stake_amount: 1_750,
            },
            tx_req_id: format!("stake-{index:02}"),
            shard_id: 0,
        },
    )
    .expect("encode")
}

fn unstake_action(index: u8) -> Action {
    Action::encode(
        MetadataType::Unstake,
        &ActionEnvelope {
            meta: UnstakeMeta {
                committee_public_key: format!("validator-{index:02}"),
            },
            tx_req_id: format!("unstake-{index:02}"),
            shard_id: 0,
        },
    )
    .expect("encode")
}

proptest! {
    #![proptest_config(proptest_config())]
    #[test]
    fn committee_membership_stays_a_partition(
        ops in prop::collection::vec(committee_op(), 1..40),
        random_number in any::<u64>(),
    ) {
        let params = committee_params();
        let mut state = CommitteeState::new();
        *state.committee_of_mut(0) = vec!["fixed-0".into()];
        *state.committee_of_mut(1) = vec!["fixed-1".into()];
        let mut epoch = 1u64;

        for op in &ops {
            match op {
                CommitteeOp::Stake(index) => {
                    let produced = produce_stake(&stake_action(*index), &state).unwrap().unwrap();
                    apply_stake(&produced, &mut state).unwrap();
                }
                CommitteeOp::Unstake(index) => {
                    let produced =
                        produce_unstake(&unstake_action(*index), &state).unwrap().unwrap();
                    apply_unstake(&produced, &mut state).unwrap();
                }
                CommitteeOp::EpochBoundary => {
                    // Freeze, assign and swap as one boundary crossing.
                    state.number_of_assigned_candidates = state.shard_common_pool.len();
                    portal_chain::committee::engine::process_assignment(
                        &params,
                        (epoch - 1) * params.epoch_length + params.assign_offset,
                        Some(random_number),
                        &mut state,
                    )
                    .unwrap();
                    epoch += 1;
                    let swaps =
                        generate_swap_instructions(&params, epoch, &BTreeMap::new(), &state)
                            .unwrap();
                    for swap in &swaps {
                        apply_swap(swap, &params, epoch, &BTreeMap::new(), &mut state).unwrap();
                    }
                }
            }
            for index in 0u8..20 {
                let key = format!("validator-{index:02}");
                prop_assert!(state.occurrences(&key) <= 1, "key {} duplicated", key);
            }
            prop_assert!(
                state.number_of_assigned_candidates <= state.shard_common_pool.len()
            );
        }
    }
}

proptest! {
    #![proptest_config(proptest_config())]
    #[test]
    fn instruction_wire_form_is_stable(
        code_index in 0usize..10,
        shard_id in any::<u8>(),
        status_index in 0usize..9,
        content in prop::option::of("[A-Za-z0-9+/=]{0,64}"),
    ) {
        let codes = [63u32, 95, 210, 353, 260, 261, 262, 263, 265, 266];
        let statuses = [
            InstructionStatus::Accepted,
            InstructionStatus::Rejected,
            InstructionStatus::Refund,
            InstructionStatus::Waiting,
            InstructionStatus::DuplicateKey,
            InstructionStatus::LoadDataFailed,
            InstructionStatus::ItemNotFound,
            InstructionStatus::PortingFeesNotEnough,
            InstructionStatus::ExchangeRatesSuccess,
        ];
        let instruction = Instruction::new(
            MetadataType::from_code(codes[code_index]).expect("registry code"),
            shard_id,
            statuses[status_index],
            content,
        );
        let wire = instruction.to_strings();
        let decoded = Instruction::from_strings(&wire).expect("decode");
        prop_assert_eq!(decoded, instruction);
    }
}
