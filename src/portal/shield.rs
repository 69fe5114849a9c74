//! Shielding: verify an inbound external-chain proof and mint ptoken.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::PortalParams;
use crate::errors::{ChainError, ChainResult};
use crate::lightclient::ExternalLightClient;
use crate::portal::proof::{shielding_memo, verify_proof, ProofOutcome};
use crate::state::{PortalState, RequestStatus, ShieldingRecord, Utxo};
use crate::types::{Action, ActionEnvelope, Instruction, InstructionStatus, MetadataType, ShardId};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShieldingRequestMeta {
    pub token_id: String,
    pub inc_address: String,
    /// base64 of the SPV proof document.
    pub shielding_proof: String,
}

/// Instruction content for both accepted and rejected shieldings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShieldingRequestContent {
    pub token_id: String,
    pub inc_address: String,
    pub proof_tx_hash: String,
    /// Empty on rejection.
    pub shielding_utxos: Vec<Utxo>,
    /// Minted amount in ptoken nano units; zero on rejection.
    pub minted_amount: u64,
    pub tx_req_id: String,
    pub shard_id: ShardId,
}

impl ShieldingRequestContent {
    pub fn encode(&self) -> ChainResult<String> {
        Ok(BASE64.encode(serde_json::to_vec(self)?))
    }

    pub fn decode(content: &str) -> ChainResult<Self> {
        let bytes = BASE64.decode(content)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Producer side. Reads the working snapshot only; the pipeline applies the
/// returned instruction to keep within-block replay visible to later actions.
///
/// Returns `None` when the action is skipped (undecodable payload or light
/// client outage); skipped actions are retried by the user next block.
pub fn produce(
    action: &Action,
    params: &PortalParams,
    state: &PortalState,
    light_client: &dyn ExternalLightClient,
) -> ChainResult<Option<Instruction>> {
    let envelope: ActionEnvelope<ShieldingRequestMeta> = match action.decode() {
        Ok(envelope) => envelope,
        Err(err) => {
            warn!(%err, "undecodable shielding action, skipping");
            return Ok(None);
        }
    };
    let meta = &envelope.meta;
    let rejected = |content: ShieldingRequestContent| -> ChainResult<Option<Instruction>> {
        Ok(Some(Instruction::new(
            MetadataType::PortalShieldingRequest,
            envelope.shard_id,
            InstructionStatus::Rejected,
            Some(content.encode()?),
        )))
    };
    let base_content = ShieldingRequestContent {
        token_id: meta.token_id.clone(),
        inc_address: meta.inc_address.clone(),
        proof_tx_hash: String::new(),
        shielding_utxos: Vec::new(),
        minted_amount: 0,
        tx_req_id: envelope.tx_req_id.clone(),
        shard_id: envelope.shard_id,
    };

    let Some(token) = params.token(&meta.token_id) else {
        debug!(token = %meta.token_id, "shielding for unsupported token");
        return rejected(base_content);
    };

    let expected_memo = shielding_memo(&meta.inc_address);
    let outcome = match verify_proof(
        &meta.shielding_proof,
        &expected_memo,
        token,
        params.min_confirmations,
        light_client,
    ) {
        Ok(outcome) => outcome,
        Err(ChainError::LightClient(err)) => {
            warn!(%err, "light client unavailable, skipping shielding action");
            return Ok(None);
        }
        Err(err) => return Err(err),
    };
    let output = match outcome {
        ProofOutcome::Valid(output) => output,
        ProofOutcome::Invalid(reason) => {
            debug!(%reason, tx_req_id = %envelope.tx_req_id, "shielding proof rejected");
            return rejected(base_content);
        }
    };

    // Cross-block and within-block replay both resolve against the working
    // snapshot: accepted instructions are applied before the next action runs.
    let seen = state
        .token(&meta.token_id)
        .map(|t| t.shielding.contains_tx(&meta.token_id, &output.external_tx_hash))
        .unwrap_or(false);
    if seen {
        debug!(tx = %output.external_tx_hash, "replayed shielding proof");
        return rejected(ShieldingRequestContent {
            proof_tx_hash: output.external_tx_hash,
            ..base_content
        });
    }

    let minted_amount = output.total_amount.saturating_mul(token.external_decimal_divisor);
    let content = ShieldingRequestContent {
        proof_tx_hash: output.external_tx_hash,
        shielding_utxos: output.utxos,
        minted_amount,
        ..base_content
    };
    Ok(Some(Instruction::new(
        MetadataType::PortalShieldingRequest,
        envelope.shard_id,
        InstructionStatus::Accepted,
        Some(content.encode()?),
    )))
}

/// Processor side: commit an accepted shielding into the snapshot.
pub fn apply(instruction: &Instruction, state: &mut PortalState) -> ChainResult<()> {
    let content = instruction
        .content
        .as_deref()
        .ok_or_else(|| ChainError::ConsensusFault("shielding instruction without content".into()))
        .and_then(ShieldingRequestContent::decode)?;

    if instruction.status == InstructionStatus::Accepted {
        let token = state.token_mut(&content.token_id);
        for utxo in &content.shielding_utxos {
            token.utxos.insert(&content.token_id, utxo.clone());
        }
        token.shielding.insert(
            &content.token_id,
            ShieldingRecord {
                external_tx_hash: content.proof_tx_hash.clone(),
                inc_address: content.inc_address.clone(),
                amount: content
                    .shielding_utxos
                    .iter()
                    .map(|utxo| utxo.amount_satoshi)
                    .sum(),
            },
        );
        token.minted_supply = token.minted_supply.saturating_add(content.minted_amount);
    }
    state.record_status(RequestStatus {
        tx_req_id: content.tx_req_id,
        metadata_type: MetadataType::PortalShieldingRequest,
        status: instruction.status,
    });
    Ok(())
}
