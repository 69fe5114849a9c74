//! Unshield batching: drain the waiting queue into one external transaction
//! per multisig wallet, spending pool UTXOs greedily.
//!
//! Runs after every action-driven instruction in the pass, gated to heights
//! divisible by `batch_num_blocks`. All inputs are key-sorted so every node
//! derives the same groups, the same raw transaction and the same batch id.

use std::collections::{BTreeMap, BTreeSet};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{PortalParams, TokenConfig};
use crate::errors::{ChainError, ChainResult};
use crate::exttx::{txid_from_hex, ExternalTx, TxInput, TxOutput};
use crate::state::batch::{batch_id, BatchOutput};
use crate::state::{PortalState, ProcessedUnshieldBatch, RequestStatus, Utxo, WaitingUnshield};
use crate::types::{Instruction, InstructionStatus, MetadataType, BEACON_SHARD_ID};

/// Cap on requests per external tx, bounding tx size.
pub const MAX_UNSHIELDS_PER_BATCH: usize = 100;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchContent {
    pub token_id: String,
    pub batch_id: String,
    pub raw_tx_hex: String,
    pub utxos_spent: BTreeMap<String, Vec<Utxo>>,
    pub unshield_ids: Vec<String>,
    pub outputs: Vec<BatchOutput>,
    pub total_unshield_ptoken: u64,
    /// `{producing_height: total_fee}`; grows by replacement.
    pub external_fees: BTreeMap<u64, u64>,
}

impl BatchContent {
    pub fn encode(&self) -> ChainResult<String> {
        Ok(BASE64.encode(serde_json::to_vec(self)?))
    }

    pub fn decode(content: &str) -> ChainResult<Self> {
        let bytes = BASE64.decode(content)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// One selected group: UTXOs of a single wallet servicing a run of requests.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BroadcastTx {
    pub wallet: String,
    pub utxos_chosen: Vec<(String, Utxo)>,
    pub requests: Vec<(String, WaitingUnshield)>,
}

/// Placeholder pay-to-address script embedding the remote address bytes.
/// Deterministic framing only; real script construction lives wallet-side.
pub fn payout_script(remote_address: &str) -> Vec<u8> {
    let bytes = remote_address.as_bytes();
    let mut script = Vec::with_capacity(bytes.len() + 4);
    script.push(0x76);
    script.push(0xa9);
    script.push(bytes.len() as u8);
    script.extend_from_slice(bytes);
    script.push(0x88);
    script.push(0xac);
    script
}

/// Greedy selection: walk the key-sorted queue, covering each request from
/// the running change plus further UTXOs of the current wallet. A request no
/// remaining funds can cover is skipped and stays queued.
pub fn choose_unshield_ids_from_candidates(
    token_id: &str,
    token: &TokenConfig,
    state: &PortalState,
) -> Vec<BroadcastTx> {
    let Some(token_state) = state.token(token_id) else {
        return Vec::new();
    };
    let waiting = token_state.waiting.ordered();
    if waiting.is_empty() {
        return Vec::new();
    }

    // UTXOs per wallet in selection order (amount desc, key asc).
    let mut by_wallet: BTreeMap<String, Vec<(String, Utxo)>> = BTreeMap::new();
    for (key, utxo) in token_state.utxos.ordered_for_selection() {
        by_wallet
            .entry(utxo.wallet_address.clone())
            .or_default()
            .push((key, utxo));
    }

    let mut served: BTreeSet<String> = BTreeSet::new();
    let mut groups = Vec::new();
    for (wallet, mut utxos) in by_wallet {
        utxos.reverse(); // pop() yields selection order
        let mut group = BroadcastTx {
            wallet: wallet.clone(),
            ..BroadcastTx::default()
        };
        let mut available = 0u64;
        let mut committed = 0u64;
        for (key, request) in &waiting {
            if served.contains(key) {
                continue;
            }
            // Full converted burn amount: payout plus external fee headroom.
            let required = token.inc_to_external(request.amount_ptoken);
            let mut taken = Vec::new();
            let mut sum = available;
            while sum < committed + required {
                let Some(entry) = utxos.pop() else { break };
                sum += entry.1.amount_satoshi;
                taken.push(entry);
            }
            if sum < committed + required {
                // Unservable now; restore tentatively taken UTXOs in order.
                while let Some(entry) = taken.pop() {
                    utxos.push(entry);
                }
                continue;
            }
            available = sum;
            committed += required;
            group.utxos_chosen.extend(taken);
            group.requests.push((key.clone(), request.clone()));
            served.insert(key.clone());
            if group.requests.len() == MAX_UNSHIELDS_PER_BATCH {
                groups.push(std::mem::take(&mut group));
                group.wallet = wallet.clone();
                // Change of a closed group is not reusable; it rides the tx.
                available = 0;
                committed = 0;
            }
        }
        if !group.requests.is_empty() {
            groups.push(group);
        }
    }
    groups
}

/// Build the raw external tx for a group: one payout per request, the batch
/// id memo, then change back to the multisig when positive.
pub fn build_batch_tx(
    token: &TokenConfig,
    utxos: &[(String, Utxo)],
    outputs: &[BatchOutput],
    memo: &str,
    fee_external: u64,
) -> ChainResult<(ExternalTx, u64)> {
    let mut inputs = Vec::with_capacity(utxos.len());
    for (_, utxo) in utxos {
        inputs.push(TxInput::outpoint(
            txid_from_hex(&utxo.external_tx_hash)?,
            utxo.output_index,
        ));
    }
    let mut tx_outputs = Vec::with_capacity(outputs.len() + 2);
    for output in outputs {
        tx_outputs.push(TxOutput {
            value_sat: output.amount_external,
            script_pubkey: payout_script(&output.remote_address),
        });
    }
    tx_outputs.push(TxOutput::op_return(memo.as_bytes()));
    let spent: u64 = utxos.iter().map(|(_, utxo)| utxo.amount_satoshi).sum();
    let paid: u64 = outputs.iter().map(|output| output.amount_external).sum();
    let change = spent
        .checked_sub(paid)
        .and_then(|rest| rest.checked_sub(fee_external))
        .ok_or_else(|| {
            ChainError::Transaction("batch outputs plus fee exceed spent inputs".into())
        })?;
    if change > 0 {
        tx_outputs.push(TxOutput {
            value_sat: change,
            script_pubkey: token.multisig_script()?,
        });
    }
    Ok((ExternalTx::new(inputs, tx_outputs), change))
}

/// Batching producer, invoked once per qualifying beacon block per token.
pub fn produce(
    params: &PortalParams,
    beacon_height: u64,
    state: &PortalState,
) -> ChainResult<Vec<Instruction>> {
    if beacon_height % params.batch_num_blocks != 0 {
        return Ok(Vec::new());
    }
    let mut instructions = Vec::new();
    for (token_id, token) in &params.portal_tokens {
        for group in choose_unshield_ids_from_candidates(token_id, token, state) {
            let unshield_ids: Vec<String> = group
                .requests
                .iter()
                .map(|(_, request)| request.unshield_id.clone())
                .collect();
            let id = batch_id(beacon_height, &unshield_ids);
            let outputs: Vec<BatchOutput> = group
                .requests
                .iter()
                .map(|(_, request)| BatchOutput {
                    remote_address: request.remote_address.clone(),
                    amount_external: token
                        .inc_to_external(request.amount_ptoken - token.fee_unshield),
                })
                .collect();
            let fee_external: u64 = group
                .requests
                .iter()
                .map(|_| token.inc_to_external(token.fee_unshield))
                .sum();
            let (tx, _change) =
                build_batch_tx(token, &group.utxos_chosen, &outputs, &id, fee_external)?;
            let total_unshield_ptoken = group
                .requests
                .iter()
                .map(|(_, request)| request.amount_ptoken)
                .sum();
            let mut utxos_spent: BTreeMap<String, Vec<Utxo>> = BTreeMap::new();
            utxos_spent.insert(
                group.wallet.clone(),
                group.utxos_chosen.iter().map(|(_, utxo)| utxo.clone()).collect(),
            );
            let content = BatchContent {
                token_id: token_id.clone(),
                batch_id: id.clone(),
                raw_tx_hex: hex::encode(tx.encode()),
                utxos_spent,
                unshield_ids,
                outputs,
                total_unshield_ptoken,
                external_fees: BTreeMap::from([(beacon_height, fee_external)]),
            };
            info!(
                token = %token_id,
                batch = %id,
                requests = content.unshield_ids.len(),
                "produced unshield batch"
            );
            instructions.push(Instruction::new(
                MetadataType::PortalUnshieldBatching,
                BEACON_SHARD_ID,
                InstructionStatus::Accepted,
                Some(content.encode()?),
            ));
        }
    }
    Ok(instructions)
}

/// Processor side: spend the UTXOs, drain the requests, open the batch.
pub fn apply(instruction: &Instruction, state: &mut PortalState) -> ChainResult<()> {
    if instruction.status != InstructionStatus::Accepted {
        return Ok(());
    }
    let content = instruction
        .content
        .as_deref()
        .ok_or_else(|| ChainError::ConsensusFault("batch instruction without content".into()))
        .and_then(BatchContent::decode)?;

    let token = state.token_mut(&content.token_id);
    for utxos in content.utxos_spent.values() {
        for utxo in utxos {
            let key = utxo.key(&content.token_id);
            if token.utxos.remove(&key).is_none() {
                return Err(ChainError::ConsensusFault(format!(
                    "batch {} spends unknown utxo {}:{}",
                    content.batch_id, utxo.external_tx_hash, utxo.output_index
                )));
            }
        }
    }
    for unshield_id in &content.unshield_ids {
        let key = crate::state::unshield::waiting_unshield_key(&content.token_id, unshield_id);
        if token.waiting.remove(&key).is_none() {
            return Err(ChainError::ConsensusFault(format!(
                "batch {} drains unknown unshield {unshield_id}",
                content.batch_id
            )));
        }
    }
    token.batches.insert(
        &content.token_id,
        ProcessedUnshieldBatch {
            batch_id: content.batch_id.clone(),
            unshield_ids: content.unshield_ids.clone(),
            utxos_spent: content.utxos_spent.clone(),
            outputs: content.outputs.clone(),
            total_unshield_ptoken: content.total_unshield_ptoken,
            external_fees: content.external_fees.clone(),
        },
    );
    for unshield_id in &content.unshield_ids {
        state.record_status(RequestStatus {
            tx_req_id: unshield_id.clone(),
            metadata_type: MetadataType::PortalBurnPToken,
            status: InstructionStatus::Accepted,
        });
    }
    debug!(batch = %content.batch_id, "batch opened");
    Ok(())
}
