//! Fee replacement: the configured operator re-issues a stuck batch with a
//! higher external fee, rate-limited in beacon heights.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::PortalParams;
use crate::errors::{ChainError, ChainResult};
use crate::portal::batch::build_batch_tx;
use crate::state::{PortalState, RequestStatus};
use crate::types::{Action, ActionEnvelope, Instruction, InstructionStatus, MetadataType, ShardId};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplacementFeeMeta {
    pub inc_address: String,
    pub token_id: String,
    pub batch_id: String,
    /// Proposed total fee in external units.
    pub new_fee: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplacementFeeContent {
    pub token_id: String,
    pub batch_id: String,
    pub new_fee: u64,
    /// Raw tx re-derived with the replacement fee; empty on rejection.
    pub raw_tx_hex: String,
    pub beacon_height: u64,
    pub tx_req_id: String,
    pub shard_id: ShardId,
}

impl ReplacementFeeContent {
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
    beacon_height: u64,
    state: &PortalState,
) -> ChainResult<Option<Instruction>> {
    let envelope: ActionEnvelope<ReplacementFeeMeta> = match action.decode() {
        Ok(envelope) => envelope,
        Err(err) => {
            warn!(%err, "undecodable fee replacement action, skipping");
            return Ok(None);
        }
    };
    let meta = &envelope.meta;
    let mut content = ReplacementFeeContent {
        token_id: meta.token_id.clone(),
        batch_id: meta.batch_id.clone(),
        new_fee: meta.new_fee,
        raw_tx_hex: String::new(),
        beacon_height,
        tx_req_id: envelope.tx_req_id.clone(),
        shard_id: envelope.shard_id,
    };
    let rejected = |content: &ReplacementFeeContent,
                    status: InstructionStatus|
     -> ChainResult<Option<Instruction>> {
        Ok(Some(Instruction::new(
            MetadataType::PortalReplacementFeeRequest,
            envelope.shard_id,
            status,
            Some(content.encode()?),
        )))
    };

    // Validation order is part of the consensus surface; see the status the
    // user reads back for each failure.
    if meta.inc_address != params.portal_replacement_address {
        debug!(sender = %meta.inc_address, "fee replacement from non-operator");
        return rejected(&content, InstructionStatus::Rejected);
    }
    let Some(token) = params.token(&meta.token_id) else {
        return rejected(&content, InstructionStatus::Rejected);
    };
    let Some(batch) = state
        .token(&meta.token_id)
        .and_then(|t| t.batches.get(&meta.token_id, &meta.batch_id))
    else {
        return rejected(&content, InstructionStatus::ItemNotFound);
    };
    let Some((latest_height, latest_fee)) = batch.latest_fee() else {
        return rejected(&content, InstructionStatus::LoadDataFailed);
    };
    if meta.new_fee <= latest_fee || meta.new_fee - latest_fee > params.max_fee_for_each_step {
        debug!(
            latest_fee,
            new_fee = meta.new_fee,
            "fee replacement outside allowed step"
        );
        return rejected(&content, InstructionStatus::Rejected);
    }
    if beacon_height.saturating_sub(latest_height) < params.time_space_in_heights {
        debug!(
            latest_height,
            beacon_height, "fee replacement inside rate-limit window"
        );
        return rejected(&content, InstructionStatus::Rejected);
    }
    // The new fee must still leave non-negative change on the same plan.
    if batch.output_amount().saturating_add(meta.new_fee) > batch.spent_amount() {
        return rejected(&content, InstructionStatus::Rejected);
    }

    let utxos: Vec<(String, crate::state::Utxo)> = batch
        .utxos_spent
        .iter()
        .flat_map(|(_, utxos)| utxos.iter().cloned())
        .map(|utxo| (utxo.key(&meta.token_id), utxo))
        .collect();
    let (tx, _change) = build_batch_tx(token, &utxos, &batch.outputs, &batch.batch_id, meta.new_fee)?;
    content.raw_tx_hex = hex::encode(tx.encode());
    Ok(Some(Instruction::new(
        MetadataType::PortalReplacementFeeRequest,
        envelope.shard_id,
        InstructionStatus::Accepted,
        Some(content.encode()?),
    )))
}

/// Processor side: append the replacement to the batch's fee history.
pub fn apply(instruction: &Instruction, state: &mut PortalState) -> ChainResult<()> {
    let content = instruction
        .content
        .as_deref()
        .ok_or_else(|| {
            ChainError::ConsensusFault("fee replacement instruction without content".into())
        })
        .and_then(ReplacementFeeContent::decode)?;

    if instruction.status == InstructionStatus::Accepted {
        let batch = state
            .token_mut(&content.token_id)
            .batches
            .get_mut(&content.token_id, &content.batch_id)
            .ok_or_else(|| {
                ChainError::ConsensusFault(format!(
                    "fee replacement for unknown batch {}",
                    content.batch_id
                ))
            })?;
        batch.record_fee(content.beacon_height, content.new_fee);
    }
    state.record_status(RequestStatus {
        tx_req_id: content.tx_req_id,
        metadata_type: MetadataType::PortalReplacementFeeRequest,
        status: instruction.status,
    });
    Ok(())
}
