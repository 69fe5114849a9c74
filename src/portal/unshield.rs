//! Burn (unshield) requests: validated burns enter the per-token waiting
//! queue until the batching engine drains them.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::PortalParams;
use crate::errors::{ChainError, ChainResult};
use crate::state::{PortalState, RequestStatus, WaitingUnshield};
use crate::types::{Action, ActionEnvelope, Instruction, InstructionStatus, MetadataType, ShardId};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BurnPTokenMeta {
    pub token_id: String,
    pub remote_address: String,
    /// Burned amount in ptoken nano units.
    pub burn_amount: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnshieldRequestContent {
    pub token_id: String,
    pub remote_address: String,
    pub burn_amount: u64,
    /// Identifier the batching engine keys on; equals the burn tx req id.
    pub unshield_id: String,
    pub beacon_height: u64,
    pub tx_req_id: String,
    pub shard_id: ShardId,
}

impl UnshieldRequestContent {
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
    let envelope: ActionEnvelope<BurnPTokenMeta> = match action.decode() {
        Ok(envelope) => envelope,
        Err(err) => {
            warn!(%err, "undecodable unshield action, skipping");
            return Ok(None);
        }
    };
    let meta = &envelope.meta;
    let content = UnshieldRequestContent {
        token_id: meta.token_id.clone(),
        remote_address: meta.remote_address.clone(),
        burn_amount: meta.burn_amount,
        unshield_id: envelope.tx_req_id.clone(),
        beacon_height,
        tx_req_id: envelope.tx_req_id.clone(),
        shard_id: envelope.shard_id,
    };
    let instruction = |status: InstructionStatus| -> ChainResult<Option<Instruction>> {
        Ok(Some(Instruction::new(
            MetadataType::PortalBurnPToken,
            envelope.shard_id,
            status,
            Some(content.encode()?),
        )))
    };

    let Some(token) = params.token(&meta.token_id) else {
        debug!(token = %meta.token_id, "unshield for unsupported token");
        return instruction(InstructionStatus::Rejected);
    };
    if meta.remote_address.is_empty() {
        return instruction(InstructionStatus::Rejected);
    }
    // The payout after fee must survive the external unit conversion.
    if meta.burn_amount <= token.fee_unshield
        || token.inc_to_external(meta.burn_amount - token.fee_unshield) == 0
    {
        debug!(amount = meta.burn_amount, "unshield below payable threshold");
        return instruction(InstructionStatus::Rejected);
    }
    let duplicate = state
        .token(&meta.token_id)
        .map(|t| t.waiting.contains(&meta.token_id, &envelope.tx_req_id))
        .unwrap_or(false);
    if duplicate {
        return instruction(InstructionStatus::Rejected);
    }

    instruction(InstructionStatus::Accepted)
}

/// Processor side. An accepted burn re-checks the payable-threshold bound
/// before joining the queue; the batching engine subtracts the fee from every
/// queued amount, so an under-fee entry would corrupt the batch arithmetic.
pub fn apply(
    instruction: &Instruction,
    params: &PortalParams,
    state: &mut PortalState,
) -> ChainResult<()> {
    let content = instruction
        .content
        .as_deref()
        .ok_or_else(|| ChainError::ConsensusFault("unshield instruction without content".into()))
        .and_then(UnshieldRequestContent::decode)?;

    let user_status = if instruction.status == InstructionStatus::Accepted {
        let Some(token) = params.token(&content.token_id) else {
            return Err(ChainError::ConsensusFault(format!(
                "accepted unshield {} for unsupported token {}",
                content.unshield_id, content.token_id
            )));
        };
        if content.burn_amount <= token.fee_unshield
            || token.inc_to_external(content.burn_amount - token.fee_unshield) == 0
        {
            return Err(ChainError::ConsensusFault(format!(
                "accepted unshield {} below the payable threshold",
                content.unshield_id
            )));
        }
        state.token_mut(&content.token_id).waiting.insert(
            &content.token_id,
            WaitingUnshield {
                remote_address: content.remote_address.clone(),
                amount_ptoken: content.burn_amount,
                unshield_id: content.unshield_id.clone(),
                beacon_height_requested: content.beacon_height,
            },
        );
        // User-visible phase: queued until a batch picks it up.
        InstructionStatus::Waiting
    } else {
        instruction.status
    };
    state.record_status(RequestStatus {
        tx_req_id: content.tx_req_id,
        metadata_type: MetadataType::PortalBurnPToken,
        status: user_status,
    });
    Ok(())
}
