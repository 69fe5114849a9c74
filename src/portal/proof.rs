//! External-chain shielding/confirmation proof verification.
//!
//! A proof binds one external transaction to a confirmed header via a Merkle
//! path and binds the transaction's OP_RETURN memo to an intent (the shielding
//! address digest, or a batch id for confirmations).

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::config::TokenConfig;
use crate::errors::{ChainResult, ProofError};
use crate::exttx::{double_sha256, ExternalTx};
use crate::lightclient::ExternalLightClient;
use crate::state::Utxo;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleStep {
    #[serde(with = "hex::serde")]
    pub hash: [u8; 32],
    /// Whether the sibling sits on the left of the running hash.
    pub is_left: bool,
}

/// Wire form of a proof: base64 of this JSON document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShieldingProof {
    #[serde(rename = "MerkleProofs")]
    pub merkle_proofs: Vec<MerkleStep>,
    #[serde(rename = "BTCTx", with = "hex::serde")]
    pub btc_tx: Vec<u8>,
    #[serde(rename = "BlockHash")]
    pub block_hash: String,
}

impl ShieldingProof {
    pub fn encode(&self) -> ChainResult<String> {
        Ok(BASE64.encode(serde_json::to_vec(self)?))
    }
}

/// Successful verification: the outputs paying the multisig wallet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProofOutput {
    pub utxos: Vec<Utxo>,
    pub total_amount: u64,
    pub external_tx_hash: String,
}

/// Verification verdict. `Invalid` is a terminal rejection, never an IO error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProofOutcome {
    Valid(ProofOutput),
    Invalid(ProofError),
}

/// Memo a shielding proof must carry: `base64(sha256(json({PortingIncAddress})))`.
pub fn shielding_memo(inc_address: &str) -> String {
    #[derive(Serialize)]
    struct Intent<'a> {
        #[serde(rename = "PortingIncAddress")]
        inc_address: &'a str,
    }
    let json = serde_json::to_vec(&Intent { inc_address }).expect("serialize memo intent");
    BASE64.encode(Sha256::digest(json))
}

/// Confirmed-inclusion verdict for a proof, before any intent binding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InclusionOutcome {
    Included(ExternalTx),
    Invalid(ProofError),
}

/// Decode a proof and verify its transaction is included under a header
/// confirmed to `min_confirmations`. Fails `Err` only on light-client IO.
pub fn verify_inclusion(
    proof_b64: &str,
    min_confirmations: u32,
    light_client: &dyn ExternalLightClient,
) -> ChainResult<InclusionOutcome> {
    let Ok(raw) = BASE64.decode(proof_b64) else {
        return Ok(InclusionOutcome::Invalid(ProofError::InvalidProof));
    };
    let Ok(proof) = serde_json::from_slice::<ShieldingProof>(&raw) else {
        return Ok(InclusionOutcome::Invalid(ProofError::InvalidProof));
    };

    let Some(header) = light_client.get_header(&proof.block_hash)? else {
        return Ok(InclusionOutcome::Invalid(ProofError::HeaderNotConfirmed));
    };
    if header.confirmed_depth < min_confirmations {
        debug!(
            block_hash = %proof.block_hash,
            depth = header.confirmed_depth,
            required = min_confirmations,
            "proof header below confirmation depth"
        );
        return Ok(InclusionOutcome::Invalid(ProofError::HeaderNotConfirmed));
    }

    let Ok(tx) = ExternalTx::decode(&proof.btc_tx) else {
        return Ok(InclusionOutcome::Invalid(ProofError::InvalidProof));
    };
    let root = fold_merkle_path(tx.txid(), &proof.merkle_proofs);
    if root != header.merkle_root {
        return Ok(InclusionOutcome::Invalid(ProofError::InvalidProof));
    }
    Ok(InclusionOutcome::Included(tx))
}

/// Verify a proof against a confirmed header, an expected memo and the
/// token's multisig wallet. Fails `Err` only on light-client IO; every
/// malformed or unbound proof is an `Invalid` verdict.
pub fn verify_proof(
    proof_b64: &str,
    expected_memo: &str,
    token: &TokenConfig,
    min_confirmations: u32,
    light_client: &dyn ExternalLightClient,
) -> ChainResult<ProofOutcome> {
    let tx = match verify_inclusion(proof_b64, min_confirmations, light_client)? {
        InclusionOutcome::Included(tx) => tx,
        InclusionOutcome::Invalid(reason) => return Ok(ProofOutcome::Invalid(reason)),
    };

    match tx.memo() {
        Some(memo) if memo == expected_memo.as_bytes() => {}
        _ => return Ok(ProofOutcome::Invalid(ProofError::MemoMismatch)),
    }

    let tx_hash = tx.txid_hex();
    let mut utxos = Vec::new();
    let mut total_amount = 0u64;
    for (index, output) in tx.outputs.iter().enumerate() {
        let Some(address) = light_client.extract_payment_addr_from_script(&output.script_pubkey)
        else {
            continue;
        };
        if address != token.multisig_address {
            continue;
        }
        total_amount = total_amount.saturating_add(output.value_sat);
        utxos.push(Utxo {
            wallet_address: address,
            external_tx_hash: tx_hash.clone(),
            output_index: index as u32,
            amount_satoshi: output.value_sat,
        });
    }
    if total_amount < token.min_token_amount {
        return Ok(ProofOutcome::Invalid(ProofError::DustAmount));
    }

    Ok(ProofOutcome::Valid(ProofOutput {
        utxos,
        total_amount,
        external_tx_hash: tx_hash,
    }))
}

fn fold_merkle_path(txid: [u8; 32], path: &[MerkleStep]) -> [u8; 32] {
    let mut running = txid;
    for step in path {
        let mut data = Vec::with_capacity(64);
        if step.is_left {
            data.extend_from_slice(&step.hash);
            data.extend_from_slice(&running);
        } else {
            data.extend_from_slice(&running);
            data.extend_from_slice(&step.hash);
        }
        running = double_sha256(&data);
    }
    running
}

/// Build the Merkle root and per-leaf inclusion paths over a block's tx ids,
/// duplicating the trailing element of odd levels. Used by tooling and tests
/// to fabricate provable headers.
pub fn build_merkle_tree(txids: &[[u8; 32]]) -> ([u8; 32], Vec<Vec<MerkleStep>>) {
    if txids.is_empty() {
        return ([0u8; 32], Vec::new());
    }
    let mut paths: Vec<Vec<MerkleStep>> = vec![Vec::new(); txids.len()];
    let mut level: Vec<[u8; 32]> = txids.to_vec();
    // Tracks which original leaves feed each node of the current level.
    let mut members: Vec<Vec<usize>> = (0..txids.len()).map(|index| vec![index]).collect();
    while level.len() > 1 {
        let mut next_level = Vec::with_capacity((level.len() + 1) / 2);
        let mut next_members = Vec::with_capacity((level.len() + 1) / 2);
        for pair in 0..(level.len() + 1) / 2 {
            let left = pair * 2;
            let right = if left + 1 < level.len() { left + 1 } else { left };
            for &leaf in &members[left] {
                paths[leaf].push(MerkleStep {
                    hash: level[right],
                    is_left: false,
                });
            }
            if right != left {
                for &leaf in &members[right] {
                    paths[leaf].push(MerkleStep {
                        hash: level[left],
                        is_left: true,
                    });
                }
            }
            let mut data = Vec::with_capacity(64);
            data.extend_from_slice(&level[left]);
            data.extend_from_slice(&level[right]);
            next_level.push(double_sha256(&data));
            let mut merged = members[left].clone();
            if right != left {
                merged.extend_from_slice(&members[right]);
            }
            next_members.push(merged);
        }
        level = next_level;
        members = next_members;
    }
    (level[0], paths)
}
