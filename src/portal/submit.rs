//! Confirmed-tx ingestion: a proof that a batch's external transaction
//! cleared retires the batch and credits its change back to the pool.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::PortalParams;
use crate::errors::{ChainError, ChainResult};
use crate::exttx::txid_from_hex;
use crate::lightclient::ExternalLightClient;
use crate::portal::proof::{verify_inclusion, InclusionOutcome};
use crate::state::{PortalState, RequestStatus, Utxo};
use crate::types::{Action, ActionEnvelope, Instruction, InstructionStatus, MetadataType, ShardId};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitConfirmedTxMeta {
    pub token_id: String,
    pub batch_id: String,
    /// base64 of the SPV proof for the confirming external tx.
    pub unshield_proof: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitConfirmedTxContent {
    pub token_id: String,
    pub batch_id: String,
    pub external_tx_hash: String,
    /// Change outputs paying the multisig, to re-enter the pool.
    pub change_utxos: Vec<Utxo>,
    pub tx_req_id: String,
    pub shard_id: ShardId,
}

impl SubmitConfirmedTxContent {
    pub fn encode(&self) -> ChainResult<String> {
        Ok(BASE64.encode(serde_json::to_vec(self)?))
    }

    pub fn decode(content: &str) -> ChainResult<Self> {
        let bytes = BASE64.decode(content)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

pub fn produce(
    action: &Action,
    params: &PortalParams,
    state: &PortalState,
    light_client: &dyn ExternalLightClient,
) -> ChainResult<Option<Instruction>> {
    let envelope: ActionEnvelope<SubmitConfirmedTxMeta> = match action.decode() {
        Ok(envelope) => envelope,
        Err(err) => {
            warn!(%err, "undecodable submit-confirmed action, skipping");
            return Ok(None);
        }
    };
    let meta = &envelope.meta;
    let mut content = SubmitConfirmedTxContent {
        token_id: meta.token_id.clone(),
        batch_id: meta.batch_id.clone(),
        external_tx_hash: String::new(),
        change_utxos: Vec::new(),
        tx_req_id: envelope.tx_req_id.clone(),
        shard_id: envelope.shard_id,
    };
    let reply = |content: &SubmitConfirmedTxContent,
                 status: InstructionStatus|
     -> ChainResult<Option<Instruction>> {
        Ok(Some(Instruction::new(
            MetadataType::PortalSubmitConfirmedTx,
            envelope.shard_id,
            status,
            Some(content.encode()?),
        )))
    };

    let Some(token) = params.token(&meta.token_id) else {
        return reply(&content, InstructionStatus::Rejected);
    };
    let Some(batch) = state
        .token(&meta.token_id)
        .and_then(|t| t.batches.get(&meta.token_id, &meta.batch_id))
    else {
        debug!(batch = %meta.batch_id, "confirmation for unknown batch");
        return reply(&content, InstructionStatus::ItemNotFound);
    };

    let tx = match verify_inclusion(&meta.unshield_proof, params.min_confirmations, light_client) {
        Ok(InclusionOutcome::Included(tx)) => tx,
        Ok(InclusionOutcome::Invalid(reason)) => {
            debug!(%reason, batch = %meta.batch_id, "confirmation proof rejected");
            return reply(&content, InstructionStatus::Rejected);
        }
        Err(ChainError::LightClient(err)) => {
            warn!(%err, "light client unavailable, skipping submit-confirmed action");
            return Ok(None);
        }
        Err(err) => return Err(err),
    };

    // The memo binds the confirming tx to this batch.
    if tx.memo().as_deref() != Some(meta.batch_id.as_bytes()) {
        return reply(&content, InstructionStatus::Rejected);
    }
    // Source check: every input must spend one of the batch's chosen UTXOs,
    // proving the multisig wallet funded this tx.
    for input in &tx.inputs {
        let known = batch.utxos_spent.values().flatten().any(|utxo| {
            txid_from_hex(&utxo.external_tx_hash)
                .map(|id| id == input.prev_txid && utxo.output_index == input.prev_vout)
                .unwrap_or(false)
        });
        if !known {
            debug!(batch = %meta.batch_id, "confirming tx spends foreign outpoint");
            return reply(&content, InstructionStatus::Rejected);
        }
    }

    let tx_hash = tx.txid_hex();
    for (index, output) in tx.outputs.iter().enumerate() {
        let Some(address) = light_client.extract_payment_addr_from_script(&output.script_pubkey)
        else {
            continue;
        };
        if address == token.multisig_address {
            content.change_utxos.push(Utxo {
                wallet_address: address,
                external_tx_hash: tx_hash.clone(),
                output_index: index as u32,
                amount_satoshi: output.value_sat,
            });
        }
    }
    content.external_tx_hash = tx_hash;
    reply(&content, InstructionStatus::Accepted)
}

/// Processor side: retire the batch, credit change, advance burned supply.
pub fn apply(instruction: &Instruction, state: &mut PortalState) -> ChainResult<()> {
    let content = instruction
        .content
        .as_deref()
        .ok_or_else(|| {
            ChainError::ConsensusFault("submit-confirmed instruction without content".into())
        })
        .and_then(SubmitConfirmedTxContent::decode)?;

    if instruction.status == InstructionStatus::Accepted {
        let token = state.token_mut(&content.token_id);
        let batch = token
            .batches
            .remove(&content.token_id, &content.batch_id)
            .ok_or_else(|| {
                ChainError::ConsensusFault(format!(
                    "confirmation retires unknown batch {}",
                    content.batch_id
                ))
            })?;
        let mut change_credited = 0u64;
        for utxo in &content.change_utxos {
            change_credited = change_credited.saturating_add(utxo.amount_satoshi);
            token.utxos.insert(&content.token_id, utxo.clone());
        }
        token.burned_supply = token
            .burned_supply
            .saturating_add(batch.total_unshield_ptoken);
        token.paid_out_external = token
            .paid_out_external
            .saturating_add(batch.spent_amount().saturating_sub(change_credited));
        for unshield_id in &batch.unshield_ids {
            state.record_status(RequestStatus {
                tx_req_id: unshield_id.clone(),
                metadata_type: MetadataType::PortalBurnPToken,
                status: InstructionStatus::Accepted,
            });
        }
        info!(batch = %content.batch_id, "batch retired");
    }
    state.record_status(RequestStatus {
        tx_req_id: content.tx_req_id,
        metadata_type: MetadataType::PortalSubmitConfirmedTx,
        status: instruction.status,
    });
    Ok(())
}
