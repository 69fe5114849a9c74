//! Threshold-signature share derivation.
//!
//! Every beacon validator re-derives the raw external tx of each accepted
//! batching or fee-replacement instruction and signs each input against the
//! token's redeem script. RFC6979 ECDSA makes the share a pure function of
//! the instruction and the validator key, so replaying past instructions
//! reproduces identical shares. Share assembly into a final transaction is
//! external to the core.

use secp256k1::ecdsa::Signature;
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::PortalParams;
use crate::errors::{ChainError, ChainResult};
use crate::exttx::ExternalTx;
use crate::portal::batch::BatchContent;
use crate::portal::fee::ReplacementFeeContent;
use crate::types::{Instruction, InstructionStatus, MetadataType};

/// One validator's signature over one input of a batch transaction, keyed by
/// `(token_id, raw_tx_hash, txin_index)` in the beacon block's share section.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureShare {
    pub token_id: String,
    /// Display tx id of the raw external tx being signed.
    pub raw_tx_hash: String,
    pub txin_index: u32,
    #[serde(with = "hex::serde")]
    pub signature_der: Vec<u8>,
    #[serde(with = "hex::serde")]
    pub public_key: Vec<u8>,
}

/// Sign every input of `tx` against `redeem_script`.
pub fn sign_all(
    token_id: &str,
    tx: &ExternalTx,
    redeem_script: &[u8],
    secret_key: &SecretKey,
) -> ChainResult<Vec<SignatureShare>> {
    let secp = Secp256k1::new();
    let public_key = PublicKey::from_secret_key(&secp, secret_key);
    let raw_tx_hash = tx.txid_hex();
    let mut shares = Vec::with_capacity(tx.inputs.len());
    for txin_index in 0..tx.inputs.len() {
        let digest = tx.sighash(txin_index, redeem_script)?;
        let message = Message::from_digest(digest);
        let signature = secp.sign_ecdsa(&message, secret_key);
        shares.push(SignatureShare {
            token_id: token_id.to_string(),
            raw_tx_hash: raw_tx_hash.clone(),
            txin_index: txin_index as u32,
            signature_der: signature.serialize_der().to_vec(),
            public_key: public_key.serialize().to_vec(),
        });
    }
    Ok(shares)
}

/// Verify a peer's share against the re-derived sighash.
pub fn verify_share(
    tx: &ExternalTx,
    redeem_script: &[u8],
    share: &SignatureShare,
) -> ChainResult<bool> {
    let digest = tx.sighash(share.txin_index as usize, redeem_script)?;
    let message = Message::from_digest(digest);
    let signature = Signature::from_der(&share.signature_der)
        .map_err(|err| ChainError::Crypto(format!("malformed share signature: {err}")))?;
    let public_key = PublicKey::from_slice(&share.public_key)
        .map_err(|err| ChainError::Crypto(format!("malformed share public key: {err}")))?;
    let secp = Secp256k1::verification_only();
    Ok(secp.verify_ecdsa(&message, &signature, &public_key).is_ok())
}

/// Derive this validator's shares for every accepted batching or
/// fee-replacement instruction in a beacon block.
pub fn shares_for_block(
    instructions: &[Instruction],
    params: &PortalParams,
    secret_key: &SecretKey,
) -> ChainResult<Vec<SignatureShare>> {
    let mut shares = Vec::new();
    for instruction in instructions {
        if instruction.status != InstructionStatus::Accepted {
            continue;
        }
        let (token_id, raw_tx_hex) = match instruction.metadata_type {
            MetadataType::PortalUnshieldBatching => {
                let content = instruction
                    .content
                    .as_deref()
                    .ok_or_else(|| {
                        ChainError::ConsensusFault("batch instruction without content".into())
                    })
                    .and_then(BatchContent::decode)?;
                (content.token_id, content.raw_tx_hex)
            }
            MetadataType::PortalReplacementFeeRequest => {
                let content = instruction
                    .content
                    .as_deref()
                    .ok_or_else(|| {
                        ChainError::ConsensusFault(
                            "fee replacement instruction without content".into(),
                        )
                    })
                    .and_then(ReplacementFeeContent::decode)?;
                (content.token_id, content.raw_tx_hex)
            }
            _ => continue,
        };
        let Some(token) = params.token(&token_id) else {
            return Err(ChainError::ConsensusFault(format!(
                "accepted batch instruction for unknown token {token_id}"
            )));
        };
        let tx = ExternalTx::decode(&hex::decode(&raw_tx_hex)?)?;
        let redeem_script = token.multisig_script()?;
        let derived = sign_all(&token_id, &tx, &redeem_script, secret_key)?;
        debug!(
            token = %token_id,
            tx = %tx.txid_hex(),
            inputs = derived.len(),
            "derived signature shares"
        );
        shares.extend(derived);
    }
    Ok(shares)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exttx::{TxInput, TxOutput};

    fn sample_key(byte: u8) -> SecretKey {
        SecretKey::from_slice(&[byte; 32]).expect("valid key")
    }

    fn sample_tx() -> ExternalTx {
        ExternalTx::new(
            vec![
                TxInput::outpoint([1u8; 32], 0),
                TxInput::outpoint([2u8; 32], 3),
            ],
            vec![TxOutput {
                value_sat: 700,
                script_pubkey: vec![0xac],
            }],
        )
    }

    #[test]
    fn shares_are_deterministic_per_input() {
        let key = sample_key(7);
        let tx = sample_tx();
        let script = vec![0x52, 0x21];
        let first = sign_all("btc", &tx, &script, &key).expect("sign");
        let second = sign_all("btc", &tx, &script, &key).expect("sign");
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
        assert_ne!(first[0].signature_der, first[1].signature_der);
    }

    #[test]
    fn shares_verify_and_reject_wrong_script() {
        let key = sample_key(9);
        let tx = sample_tx();
        let script = vec![0x52, 0x21];
        let shares = sign_all("btc", &tx, &script, &key).expect("sign");
        assert!(verify_share(&tx, &script, &shares[0]).expect("verify"));
        assert!(!verify_share(&tx, &[0x53], &shares[0]).expect("verify"));
    }
}
