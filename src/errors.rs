use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("storage error: {0}")]
    Storage(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("encoding error: {0}")]
    Encoding(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("cryptography error: {0}")]
    Crypto(String),
    #[error("transaction rejected: {0}")]
    Transaction(String),
    #[error("invalid proof: {0}")]
    InvalidProof(String),
    #[error("light client unavailable: {0}")]
    LightClient(String),
    #[error("consensus fault: {0}")]
    ConsensusFault(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

pub type ChainResult<T> = Result<T, ChainError>;

impl From<hex::FromHexError> for ChainError {
    fn from(err: hex::FromHexError) -> Self {
        ChainError::Encoding(err.to_string())
    }
}

impl From<base64::DecodeError> for ChainError {
    fn from(err: base64::DecodeError) -> Self {
        ChainError::Encoding(err.to_string())
    }
}

/// Reasons a shielding or confirmed-tx proof fails verification.
///
/// These never abort a producer pass; they map onto `rejected` instruction
/// statuses so every action reaches a terminal state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProofError {
    #[error("proof is malformed or merkle path does not reach the header root")]
    InvalidProof,
    #[error("external header not confirmed to required depth")]
    HeaderNotConfirmed,
    #[error("memo does not bind to the expected intent")]
    MemoMismatch,
    #[error("total amount paid to the multisig is below the dust threshold")]
    DustAmount,
}
