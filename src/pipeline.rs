//! Beacon-block pipeline: the producer pass turning shard actions into
//! instructions, and the processor pass replaying instructions onto the
//! authoritative snapshot.
//!
//! Both passes run single-threaded against a clone of the committed snapshot.
//! The producer applies every instruction it emits to its working clone, so a
//! later action in the same block observes earlier effects exactly as the
//! processor will. Instructions are ordered `(metadata_type, shard_id, index)`
//! and the processor replays them strictly in that order.

use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::committee::engine;
use crate::committee::CommitteeState;
use crate::config::NodeParams;
use crate::errors::{ChainError, ChainResult};
use crate::lightclient::ExternalLightClient;
use crate::portal::{batch, fee, shield, submit, unshield};
use crate::state::{PortalState, RequestStatus};
use crate::store::{StateStore, WriteBatch};
use crate::types::{
    Action, CommitteePublicKey, Instruction, InstructionStatus, MetadataType,
};

/// Per-block inputs fed by the surrounding consensus engine.
#[derive(Clone, Debug, Default)]
pub struct BeaconEnv {
    pub beacon_height: u64,
    pub epoch: u64,
    /// Epoch random number; present only once random time has passed.
    pub random_number: Option<u64>,
    /// Accumulated missing-signature penalties for the running epoch.
    pub missing_signature_penalty: BTreeMap<CommitteePublicKey, u64>,
}

/// Portal and committee snapshots moved through the pipeline together.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BeaconView {
    pub portal: PortalState,
    pub committee: CommitteeState,
}

impl BeaconView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(store: &dyn StateStore, height: u64) -> ChainResult<Self> {
        Ok(Self {
            portal: PortalState::load(store, height)?,
            committee: CommitteeState::load(store, height)?,
        })
    }

    pub fn write_diff(&self, previous: &BeaconView) -> ChainResult<WriteBatch> {
        let mut diff = self.portal.write_diff(&previous.portal)?;
        diff.merge(self.committee.write_diff(&previous.committee)?);
        Ok(diff)
    }
}

/// Committee requests resolve by tx req id through the same status index the
/// portal instructions use.
fn record_committee_status(
    portal: &mut PortalState,
    instruction: &Instruction,
) -> ChainResult<()> {
    let Some(content) = instruction.content.as_deref() else {
        return Ok(());
    };
    let tx_req_id = match instruction.metadata_type {
        MetadataType::Stake => engine::StakeContent::decode(content)?.staking_tx_id,
        MetadataType::Unstake => engine::UnstakeContent::decode(content)?.tx_req_id,
        _ => return Ok(()),
    };
    portal.record_status(RequestStatus {
        tx_req_id,
        metadata_type: instruction.metadata_type,
        status: instruction.status,
    });
    Ok(())
}

/// One beacon node's view of the producer/processor protocol.
pub struct BeaconPipeline<'a> {
    params: &'a NodeParams,
    light_client: &'a dyn ExternalLightClient,
}

impl<'a> BeaconPipeline<'a> {
    pub fn new(params: &'a NodeParams, light_client: &'a dyn ExternalLightClient) -> Self {
        Self {
            params,
            light_client,
        }
    }

    /// Producer pass: turn this block's shard actions into instructions.
    ///
    /// Returns the instructions in block order together with the working view
    /// they produce, which a proposer reuses as its post-state.
    pub fn produce_block(
        &self,
        env: &BeaconEnv,
        snapshot: &BeaconView,
        actions: &[Action],
    ) -> ChainResult<(Vec<Instruction>, BeaconView)> {
        let mut working = snapshot.clone();
        let mut instructions: Vec<Instruction> = Vec::new();
        let mut return_stakes: Vec<Instruction> = Vec::new();

        let mut ordered: Vec<&Action> = actions.iter().collect();
        ordered.sort_by_key(|action| action.metadata_type.code());

        for action in ordered {
            let produced = match action.metadata_type {
                MetadataType::Stake => {
                    let produced = engine::produce_stake(action, &working.committee)?;
                    if let Some(instruction) = &produced {
                        engine::apply_stake(instruction, &mut working.committee)?;
                        record_committee_status(&mut working.portal, instruction)?;
                    }
                    produced
                }
                MetadataType::Unstake => {
                    let produced = engine::produce_unstake(action, &working.committee)?;
                    if let Some(instruction) = &produced {
                        if let Some(returned) =
                            engine::apply_unstake(instruction, &mut working.committee)?
                        {
                            return_stakes.push(returned);
                        }
                        record_committee_status(&mut working.portal, instruction)?;
                    }
                    produced
                }
                MetadataType::PortalShieldingRequest => {
                    let produced = shield::produce(
                        action,
                        &self.params.portal,
                        &working.portal,
                        self.light_client,
                    )?;
                    if let Some(instruction) = &produced {
                        shield::apply(instruction, &mut working.portal)?;
                    }
                    produced
                }
                MetadataType::PortalBurnPToken => {
                    let produced = unshield::produce(
                        action,
                        &self.params.portal,
                        env.beacon_height,
                        &working.portal,
                    )?;
                    if let Some(instruction) = &produced {
                        unshield::apply(instruction, &self.params.portal, &mut working.portal)?;
                    }
                    produced
                }
                MetadataType::PortalReplacementFeeRequest => {
                    let produced = fee::produce(
                        action,
                        &self.params.portal,
                        env.beacon_height,
                        &working.portal,
                    )?;
                    if let Some(instruction) = &produced {
                        fee::apply(instruction, &mut working.portal)?;
                    }
                    produced
                }
                MetadataType::PortalSubmitConfirmedTx => {
                    let produced = submit::produce(
                        action,
                        &self.params.portal,
                        &working.portal,
                        self.light_client,
                    )?;
                    if let Some(instruction) = &produced {
                        submit::apply(instruction, &mut working.portal)?;
                    }
                    produced
                }
                other => {
                    debug!(metadata = %other, "action without a producer skipped");
                    None
                }
            };
            instructions.extend(produced);
        }

        // Committee housekeeping runs after the action-driven instructions.
        engine::snapshot_assignment_prefix(
            &self.params.committee,
            env.beacon_height,
            &mut working.committee,
        );
        engine::process_assignment(
            &self.params.committee,
            env.beacon_height,
            env.random_number,
            &mut working.committee,
        )?;

        if self.params.committee.is_first_height_of_epoch(env.beacon_height) {
            let swaps = engine::generate_swap_instructions(
                &self.params.committee,
                env.epoch,
                &env.missing_signature_penalty,
                &working.committee,
            )?;
            for swap in &swaps {
                return_stakes.extend(engine::apply_swap(
                    swap,
                    &self.params.committee,
                    env.epoch,
                    &env.missing_signature_penalty,
                    &mut working.committee,
                )?);
            }
            instructions.extend(swaps);
        }

        // Batching drains the queue only after this block's burns landed.
        for batching in batch::produce(&self.params.portal, env.beacon_height, &working.portal)? {
            batch::apply(&batching, &mut working.portal)?;
            instructions.push(batching);
        }

        instructions.extend(return_stakes);
        instructions.sort_by_key(|instruction| {
            (instruction.metadata_type.code(), instruction.shard_id)
        });
        info!(
            beacon_height = env.beacon_height,
            instructions = instructions.len(),
            "produced beacon block"
        );
        Ok((instructions, working))
    }

    /// Processor pass: replay a proposed block onto the committed snapshot.
    ///
    /// Swap instructions sort to the end of a well-formed block, so the
    /// committee housekeeping the producer ran between actions and swaps is
    /// replayed at the same point here. Proposed return-stake instructions
    /// must match the set this pass re-derives.
    pub fn process_block(
        &self,
        env: &BeaconEnv,
        snapshot: &BeaconView,
        instructions: &[Instruction],
    ) -> ChainResult<BeaconView> {
        let mut working = snapshot.clone();
        let mut proposed_returns: Vec<&Instruction> = Vec::new();
        let mut expected_returns: Vec<Instruction> = Vec::new();
        let mut swaps: Vec<&Instruction> = Vec::new();

        for instruction in instructions {
            match instruction.metadata_type {
                MetadataType::Stake => {
                    engine::apply_stake(instruction, &mut working.committee)?;
                    record_committee_status(&mut working.portal, instruction)?;
                }
                MetadataType::ReturnStake => proposed_returns.push(instruction),
                MetadataType::Unstake => {
                    if let Some(returned) =
                        engine::apply_unstake(instruction, &mut working.committee)?
                    {
                        expected_returns.push(returned);
                    }
                    record_committee_status(&mut working.portal, instruction)?;
                }
                MetadataType::SwapShard => {
                    // Swaps are only valid on the first height of an epoch;
                    // a replayed swap must not rotate committees off-schedule.
                    if !self.params.committee.is_first_height_of_epoch(env.beacon_height) {
                        return Err(ChainError::ConsensusFault(format!(
                            "swap instruction outside the epoch boundary at height {}",
                            env.beacon_height
                        )));
                    }
                    swaps.push(instruction);
                }
                MetadataType::PortalShieldingRequest => {
                    shield::apply(instruction, &mut working.portal)?
                }
                MetadataType::PortalBurnPToken => {
                    unshield::apply(instruction, &self.params.portal, &mut working.portal)?
                }
                MetadataType::PortalUnshieldBatching => {
                    batch::apply(instruction, &mut working.portal)?
                }
                MetadataType::PortalReplacementFeeRequest => {
                    fee::apply(instruction, &mut working.portal)?
                }
                MetadataType::PortalSubmitConfirmedTx => {
                    submit::apply(instruction, &mut working.portal)?
                }
                other => {
                    if instruction.status == InstructionStatus::Accepted {
                        return Err(ChainError::ConsensusFault(format!(
                            "accepted instruction with unhandled metadata type {other}"
                        )));
                    }
                }
            }
        }

        engine::snapshot_assignment_prefix(
            &self.params.committee,
            env.beacon_height,
            &mut working.committee,
        );
        engine::process_assignment(
            &self.params.committee,
            env.beacon_height,
            env.random_number,
            &mut working.committee,
        )?;
        for swap in swaps {
            expected_returns.extend(engine::apply_swap(
                swap,
                &self.params.committee,
                env.epoch,
                &env.missing_signature_penalty,
                &mut working.committee,
            )?);
        }

        let mut proposed: Vec<Option<&String>> = proposed_returns
            .iter()
            .map(|instruction| instruction.content.as_ref())
            .collect();
        proposed.sort();
        let mut expected: Vec<Option<&String>> = expected_returns
            .iter()
            .map(|instruction| instruction.content.as_ref())
            .collect();
        expected.sort();
        if proposed != expected {
            return Err(ChainError::ConsensusFault(format!(
                "return-stake mismatch: proposed {}, derived {}",
                proposed.len(),
                expected.len()
            )));
        }

        Ok(working)
    }

    /// Seal the processed view at `beacon_height`, returning the state root.
    pub fn commit_block(
        &self,
        store: &dyn StateStore,
        beacon_height: u64,
        previous: &BeaconView,
        next: &BeaconView,
    ) -> ChainResult<[u8; 32]> {
        let diff = next.write_diff(previous)?;
        debug!(beacon_height, writes = diff.len(), "committing beacon block");
        store.commit(beacon_height, diff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::committee::engine::{StakeMeta, UnstakeMeta};
    use crate::exttx::{ExternalTx, TxInput, TxOutput};
    use crate::lightclient::{HeaderInfo, InMemoryLightClient};
    use crate::portal::proof::{build_merkle_tree, shielding_memo, ShieldingProof};
    use crate::portal::shield::ShieldingRequestMeta;
    use crate::portal::unshield::{BurnPTokenMeta, UnshieldRequestContent};
    use crate::store::MemoryStateStore;
    use crate::types::ActionEnvelope;

    fn sample_params() -> NodeParams {
        NodeParams::from_toml(
            r#"
            [portal]
            portal_replacement_address = "operator"
            max_fee_for_each_step = 500
            time_space_for_fee_replacement_secs = 200
            block_interval_secs = 40
            batch_num_blocks = 10
            min_confirmations = 6

            [portal.portal_tokens.btc]
            chain_id = "testnet"
            min_token_amount = 10
            fee_unshield = 100
            multisig_address = "multisig-wallet"
            multisig_script_hex = "a914dead"
            external_decimal_divisor = 10

            [committee]
            active_shards = 2
            min_shard_committee_size = 1
            max_shard_committee_size = 4
            number_of_fixed_shard_validators = 1
            epoch_length = 20
            assign_offset = 10
            random_time_offset = 5
            swap_rule_v2_epoch = 1
            swap_rule_v3_epoch = 1000
            max_slash_per_epoch = 2
            slash_penalty_threshold = 50
            dao_percent = 10
            is_split_reward_for_custodian = false
            percent_custodian_reward = 0
            "#,
        )
        .expect("params")
    }

    fn multisig_script() -> Vec<u8> {
        vec![0xa9, 0x14, 0xde, 0xad]
    }

    fn light_client_with(header_root: [u8; 32]) -> InMemoryLightClient {
        let client = InMemoryLightClient::new();
        client.insert_header(
            "block-1",
            HeaderInfo {
                merkle_root: header_root,
                height: 800_000,
                confirmed_depth: 6,
            },
        );
        client.map_script(multisig_script(), "multisig-wallet");
        client
    }

    fn shield_action(inc_address: &str, amount: u64) -> (Action, InMemoryLightClient) {
        let memo = shielding_memo(inc_address);
        let tx = ExternalTx::new(
            vec![TxInput::outpoint([3u8; 32], 0)],
            vec![
                TxOutput::op_return(memo.as_bytes()),
                TxOutput {
                    value_sat: amount,
                    script_pubkey: multisig_script(),
                },
            ],
        );
        let (root, paths) = build_merkle_tree(&[tx.txid()]);
        let proof = ShieldingProof {
            merkle_proofs: paths[0].clone(),
            btc_tx: tx.encode(),
            block_hash: "block-1".into(),
        };
        let action = Action::encode(
            MetadataType::PortalShieldingRequest,
            &ActionEnvelope {
                meta: ShieldingRequestMeta {
                    token_id: "btc".into(),
                    inc_address: inc_address.into(),
                    shielding_proof: proof.encode().expect("encode"),
                },
                tx_req_id: "shield-req-1".into(),
                shard_id: 0,
            },
        )
        .expect("encode");
        (action, light_client_with(root))
    }

    fn burn_action(tx_req_id: &str, amount: u64) -> Action {
        Action::encode(
            MetadataType::PortalBurnPToken,
            &ActionEnvelope {
                meta: BurnPTokenMeta {
                    token_id: "btc".into(),
                    remote_address: "bc1q-user".into(),
                    burn_amount: amount,
                },
                tx_req_id: tx_req_id.into(),
                shard_id: 1,
            },
        )
        .expect("encode")
    }

    fn stake_action(key: &str) -> Action {
        Action::encode(
            MetadataType::Stake,
            &ActionEnvelope {
                meta: StakeMeta {
                    committee_public_key: key.into(),
                    incognito_address: format!("addr-{key}"),
                    reward_receiver: format!("rr-{key}"),
                    auto_stake: true,
                    stake_amount: 1_750,
                },
                tx_req_id: format!("stake-{key}"),
                shard_id: 0,
            },
        )
        .expect("encode")
    }

    #[test]
    fn producer_and_processor_agree_on_portal_flow() {
        let params = sample_params();
        let (shield, client) = shield_action("12S5Lrs", 5_000);
        let pipeline = BeaconPipeline::new(&params, &client);
        let genesis = BeaconView::new();

        let env = BeaconEnv {
            beacon_height: 1,
            epoch: 1,
            ..BeaconEnv::default()
        };
        let actions = vec![burn_action("burn-1", 2_000), shield.clone()];
        let (instructions, produced) =
            pipeline.produce_block(&env, &genesis, &actions).expect("produce");

        // Shield (260) sorts before burn (262) regardless of submission order.
        assert_eq!(
            instructions
                .iter()
                .map(|i| i.metadata_type)
                .collect::<Vec<_>>(),
            vec![
                MetadataType::PortalShieldingRequest,
                MetadataType::PortalBurnPToken
            ]
        );
        let processed = pipeline
            .process_block(&env, &genesis, &instructions)
            .expect("process");
        assert_eq!(processed, produced);

        let token = processed.portal.token("btc").expect("token");
        assert_eq!(token.minted_supply, 50_000);
        assert_eq!(token.utxos.total_amount(), 5_000);
        assert!(token.waiting.contains("btc", "burn-1"));
    }

    #[test]
    fn batching_height_drains_queue_and_roots_match() {
        let params = sample_params();
        let (shield, client) = shield_action("12S5Lrs", 5_000);
        let pipeline = BeaconPipeline::new(&params, &client);
        let store = MemoryStateStore::new();
        let genesis = BeaconView::new();

        let env_1 = BeaconEnv {
            beacon_height: 1,
            epoch: 1,
            ..BeaconEnv::default()
        };
        let (instructions, view_1) = pipeline
            .produce_block(&env_1, &genesis, &[shield, burn_action("burn-1", 2_000)])
            .expect("produce");
        let processed_1 = pipeline
            .process_block(&env_1, &genesis, &instructions)
            .expect("process");
        assert_eq!(processed_1, view_1);
        let root_1 = pipeline
            .commit_block(&store, 1, &genesis, &processed_1)
            .expect("commit");
        assert_eq!(store.root(1), Some(root_1));

        // Height 10 is a batching height; the queue drains into one batch.
        let env_10 = BeaconEnv {
            beacon_height: 10,
            epoch: 1,
            ..BeaconEnv::default()
        };
        let reloaded = BeaconView::load(&store, 1).expect("load");
        assert_eq!(reloaded, processed_1);
        let (instructions, view_10) =
            pipeline.produce_block(&env_10, &reloaded, &[]).expect("produce");
        assert_eq!(instructions.len(), 1);
        assert_eq!(
            instructions[0].metadata_type,
            MetadataType::PortalUnshieldBatching
        );
        let processed_10 = pipeline
            .process_block(&env_10, &reloaded, &instructions)
            .expect("process");
        assert_eq!(processed_10, view_10);
        let token = processed_10.portal.token("btc").expect("token");
        assert!(token.waiting.ordered().is_empty());
        assert_eq!(token.batches.iter().count(), 1);
        pipeline
            .commit_block(&store, 10, &reloaded, &processed_10)
            .expect("commit");
    }

    #[test]
    fn committee_epoch_flow_swaps_and_returns() {
        let params = sample_params();
        let client = InMemoryLightClient::new();
        let pipeline = BeaconPipeline::new(&params, &client);
        let mut view = BeaconView::new();
        *view.committee.committee_of_mut(0) = vec!["f0".into(), "old0".into()];
        *view.committee.committee_of_mut(1) = vec!["f1".into()];
        view.committee.auto_stake.insert("old0".into(), false);
        view.committee.staking_tx.insert("old0".into(), "tx-old0".into());

        // Stakes land in the pool before random time at height 5.
        let env_5 = BeaconEnv {
            beacon_height: 5,
            epoch: 1,
            random_number: Some(77),
            ..BeaconEnv::default()
        };
        let actions: Vec<Action> = ["v1", "v2", "v3", "v4"]
            .iter()
            .map(|key| stake_action(key))
            .collect();
        let (instructions, produced) =
            pipeline.produce_block(&env_5, &view, &actions).expect("produce");
        let view_5 = pipeline
            .process_block(&env_5, &view, &instructions)
            .expect("process");
        assert_eq!(view_5, produced);
        assert_eq!(view_5.committee.number_of_assigned_candidates, 4);

        // Assign height distributes the frozen prefix across substitutes.
        let env_10 = BeaconEnv {
            beacon_height: 10,
            epoch: 1,
            random_number: Some(77),
            ..BeaconEnv::default()
        };
        let (instructions, _) = pipeline.produce_block(&env_10, &view_5, &[]).expect("produce");
        let view_10 = pipeline
            .process_block(&env_10, &view_5, &instructions)
            .expect("process");
        assert!(view_10.committee.shard_common_pool.is_empty());
        let substitutes: usize = view_10.committee.shard_substitute.values().map(Vec::len).sum();
        assert_eq!(substitutes, 4);

        // First height of epoch 2 generates and applies swaps.
        let env_21 = BeaconEnv {
            beacon_height: 21,
            epoch: 2,
            random_number: None,
            ..BeaconEnv::default()
        };
        let (instructions, produced) =
            pipeline.produce_block(&env_21, &view_10, &[]).expect("produce");
        assert!(instructions
            .iter()
            .any(|i| i.metadata_type == MetadataType::SwapShard));
        let view_21 = pipeline
            .process_block(&env_21, &view_10, &instructions)
            .expect("process");
        assert_eq!(view_21, produced);
        // Substitutes moved into committees; the non-auto-stake leaver got a
        // ReturnStake that the processor accepted as matching.
        if view_21.committee.membership("old0").is_none() {
            assert!(instructions
                .iter()
                .any(|i| i.metadata_type == MetadataType::ReturnStake));
        }
    }

    #[test]
    fn forged_return_stake_is_consensus_fatal() {
        let params = sample_params();
        let client = InMemoryLightClient::new();
        let pipeline = BeaconPipeline::new(&params, &client);
        let genesis = BeaconView::new();
        let env = BeaconEnv {
            beacon_height: 2,
            epoch: 1,
            ..BeaconEnv::default()
        };
        let forged = Instruction::new(
            MetadataType::ReturnStake,
            crate::types::BEACON_SHARD_ID,
            InstructionStatus::Accepted,
            Some("e30=".into()),
        );
        let err = pipeline.process_block(&env, &genesis, &[forged]).unwrap_err();
        assert!(matches!(err, ChainError::ConsensusFault(_)));
    }

    #[test]
    fn forged_underfee_burn_is_consensus_fatal() {
        let params = sample_params();
        let client = InMemoryLightClient::new();
        let pipeline = BeaconPipeline::new(&params, &client);
        let genesis = BeaconView::new();
        let env = BeaconEnv {
            beacon_height: 1,
            epoch: 1,
            ..BeaconEnv::default()
        };
        // Burn below the flat fee; only a dishonest proposer marks it accepted.
        let content = UnshieldRequestContent {
            token_id: "btc".into(),
            remote_address: "bc1q-user".into(),
            burn_amount: 50,
            unshield_id: "burn-low".into(),
            beacon_height: 1,
            tx_req_id: "burn-low".into(),
            shard_id: 1,
        };
        let forged = Instruction::new(
            MetadataType::PortalBurnPToken,
            1,
            InstructionStatus::Accepted,
            Some(content.encode().expect("encode")),
        );
        let err = pipeline.process_block(&env, &genesis, &[forged]).unwrap_err();
        assert!(matches!(err, ChainError::ConsensusFault(_)));
    }

    #[test]
    fn mid_epoch_swap_is_consensus_fatal() {
        let params = sample_params();
        let client = InMemoryLightClient::new();
        let pipeline = BeaconPipeline::new(&params, &client);
        let mut view = BeaconView::new();
        *view.committee.committee_of_mut(0) = vec!["f0".into(), "old0".into()];
        *view.committee.substitute_of_mut(0) = vec!["s1".into()];
        view.committee.auto_stake.insert("old0".into(), true);

        // The swap decision is deterministic, so a replay carries key sets
        // that still match local state. Height 42 is not an epoch boundary.
        let swaps = engine::generate_swap_instructions(
            &params.committee,
            3,
            &BTreeMap::new(),
            &view.committee,
        )
        .expect("gen");
        assert!(!swaps.is_empty());
        let env = BeaconEnv {
            beacon_height: 42,
            epoch: 3,
            ..BeaconEnv::default()
        };
        let err = pipeline.process_block(&env, &view, &swaps).unwrap_err();
        assert!(matches!(err, ChainError::ConsensusFault(_)));
    }

    fn unstake_action(key: &str, tx_req_id: &str) -> Action {
        Action::encode(
            MetadataType::Unstake,
            &ActionEnvelope {
                meta: UnstakeMeta {
                    committee_public_key: key.into(),
                },
                tx_req_id: tx_req_id.into(),
                shard_id: 0,
            },
        )
        .expect("encode")
    }

    #[test]
    fn committee_requests_resolve_by_tx_req_id() {
        let params = sample_params();
        let client = InMemoryLightClient::new();
        let pipeline = BeaconPipeline::new(&params, &client);
        let genesis = BeaconView::new();

        let env_1 = BeaconEnv {
            beacon_height: 1,
            epoch: 1,
            ..BeaconEnv::default()
        };
        let (instructions, _) = pipeline
            .produce_block(&env_1, &genesis, &[stake_action("v1")])
            .expect("produce");
        let view_1 = pipeline
            .process_block(&env_1, &genesis, &instructions)
            .expect("process");
        assert_eq!(
            view_1.portal.status_of("stake-v1").map(|s| s.status),
            Some(InstructionStatus::Accepted)
        );

        let env_2 = BeaconEnv {
            beacon_height: 2,
            epoch: 1,
            ..BeaconEnv::default()
        };
        let actions = vec![
            unstake_action("v1", "unstake-v1"),
            unstake_action("ghost", "unstake-ghost"),
        ];
        let (instructions, produced) =
            pipeline.produce_block(&env_2, &view_1, &actions).expect("produce");
        let view_2 = pipeline
            .process_block(&env_2, &view_1, &instructions)
            .expect("process");
        assert_eq!(view_2, produced);
        assert_eq!(
            view_2.portal.status_of("unstake-v1").map(|s| s.status),
            Some(InstructionStatus::Accepted)
        );
        assert_eq!(
            view_2.portal.status_of("unstake-ghost").map(|s| s.status),
            Some(InstructionStatus::ItemNotFound)
        );
    }

    #[test]
    fn unstake_return_matches_between_passes() {
        let params = sample_params();
        let client = InMemoryLightClient::new();
        let pipeline = BeaconPipeline::new(&params, &client);
        let genesis = BeaconView::new();

        let env_1 = BeaconEnv {
            beacon_height: 1,
            epoch: 1,
            ..BeaconEnv::default()
        };
        let (instructions, _) = pipeline
            .produce_block(&env_1, &genesis, &[stake_action("v1")])
            .expect("produce");
        let view_1 = pipeline
            .process_block(&env_1, &genesis, &instructions)
            .expect("process");

        let env_2 = BeaconEnv {
            beacon_height: 2,
            epoch: 1,
            ..BeaconEnv::default()
        };
        let unstake = unstake_action("v1", "unstake-v1");
        let (instructions, produced) =
            pipeline.produce_block(&env_2, &view_1, &[unstake]).expect("produce");
        assert!(instructions
            .iter()
            .any(|i| i.metadata_type == MetadataType::ReturnStake));
        let view_2 = pipeline
            .process_block(&env_2, &view_1, &instructions)
            .expect("process");
        assert_eq!(view_2, produced);
        assert!(view_2.committee.shard_common_pool.is_empty());
    }
}
