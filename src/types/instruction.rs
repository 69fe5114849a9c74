use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::{ChainError, ChainResult};
use crate::types::ShardId;

/// Shard id carried by instructions the beacon emits for itself.
pub const BEACON_SHARD_ID: ShardId = ShardId::MAX;

/// Stable integer codes for the instruction/action registry. Codes are frozen
/// at genesis; new codes append.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum MetadataType {
    Stake,
    ReturnStake,
    Unstake,
    SwapShard,
    PortalShieldingRequest,
    PortalUserRequestPToken,
    PortalBurnPToken,
    PortalUnshieldBatching,
    PortalReplacementFeeRequest,
    PortalSubmitConfirmedTx,
}

impl MetadataType {
    pub fn code(self) -> u32 {
        match self {
            MetadataType::Stake => 63,
            MetadataType::ReturnStake => 95,
            MetadataType::Unstake => 210,
            MetadataType::SwapShard => 353,
            MetadataType::PortalShieldingRequest => 260,
            MetadataType::PortalUserRequestPToken => 261,
            MetadataType::PortalBurnPToken => 262,
            MetadataType::PortalUnshieldBatching => 263,
            MetadataType::PortalReplacementFeeRequest => 265,
            MetadataType::PortalSubmitConfirmedTx => 266,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            63 => MetadataType::Stake,
            95 => MetadataType::ReturnStake,
            210 => MetadataType::Unstake,
            353 => MetadataType::SwapShard,
            260 => MetadataType::PortalShieldingRequest,
            261 => MetadataType::PortalUserRequestPToken,
            262 => MetadataType::PortalBurnPToken,
            263 => MetadataType::PortalUnshieldBatching,
            265 => MetadataType::PortalReplacementFeeRequest,
            266 => MetadataType::PortalSubmitConfirmedTx,
            _ => return None,
        })
    }
}

impl TryFrom<u32> for MetadataType {
    type Error = String;

    fn try_from(code: u32) -> Result<Self, Self::Error> {
        MetadataType::from_code(code).ok_or_else(|| format!("unknown metadata type {code}"))
    }
}

impl From<MetadataType> for u32 {
    fn from(meta: MetadataType) -> Self {
        meta.code()
    }
}

impl fmt::Display for MetadataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// The closed set of instruction status strings embedded in beacon blocks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstructionStatus {
    Accepted,
    Rejected,
    Refund,
    Waiting,
    DuplicateKey,
    LoadDataFailed,
    ItemNotFound,
    PortingFeesNotEnough,
    ExchangeRatesSuccess,
}

impl InstructionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            InstructionStatus::Accepted => "accepted",
            InstructionStatus::Rejected => "rejected",
            InstructionStatus::Refund => "refund",
            InstructionStatus::Waiting => "waiting",
            InstructionStatus::DuplicateKey => "duplicate-key",
            InstructionStatus::LoadDataFailed => "load-data-failed",
            InstructionStatus::ItemNotFound => "item-not-found",
            InstructionStatus::PortingFeesNotEnough => "porting-fees-not-enough",
            InstructionStatus::ExchangeRatesSuccess => "exchange-rates-success",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Some(match value {
            "accepted" => InstructionStatus::Accepted,
            "rejected" => InstructionStatus::Rejected,
            "refund" => InstructionStatus::Refund,
            "waiting" => InstructionStatus::Waiting,
            "duplicate-key" => InstructionStatus::DuplicateKey,
            "load-data-failed" => InstructionStatus::LoadDataFailed,
            "item-not-found" => InstructionStatus::ItemNotFound,
            "porting-fees-not-enough" => InstructionStatus::PortingFeesNotEnough,
            "exchange-rates-success" => InstructionStatus::ExchangeRatesSuccess,
            _ => return None,
        })
    }
}

/// A beacon-block instruction: `[metadata_type, shard_id, status, content?]`.
///
/// `content` is the base64-encoded JSON of the producing component's content
/// struct; its presence depends on the metadata type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    pub metadata_type: MetadataType,
    pub shard_id: ShardId,
    pub status: InstructionStatus,
    pub content: Option<String>,
}

impl Instruction {
    pub fn new(
        metadata_type: MetadataType,
        shard_id: ShardId,
        status: InstructionStatus,
        content: Option<String>,
    ) -> Self {
        Self {
            metadata_type,
            shard_id,
            status,
            content,
        }
    }

    /// Wire form: an ordered array of strings.
    pub fn to_strings(&self) -> Vec<String> {
        let mut parts = vec![
            self.metadata_type.code().to_string(),
            self.shard_id.to_string(),
            self.status.as_str().to_string(),
        ];
        if let Some(content) = &self.content {
            parts.push(content.clone());
        }
        parts
    }

    pub fn from_strings(parts: &[String]) -> ChainResult<Self> {
        if parts.len() < 3 || parts.len() > 4 {
            return Err(ChainError::Encoding(format!(
                "instruction must carry 3 or 4 fields, got {}",
                parts.len()
            )));
        }
        let code: u32 = parts[0]
            .parse()
            .map_err(|_| ChainError::Encoding(format!("bad metadata type `{}`", parts[0])))?;
        let metadata_type = MetadataType::from_code(code)
            .ok_or_else(|| ChainError::Encoding(format!("unknown metadata type {code}")))?;
        let shard_id: ShardId = parts[1]
            .parse()
            .map_err(|_| ChainError::Encoding(format!("bad shard id `{}`", parts[1])))?;
        let status = InstructionStatus::parse(&parts[2])
            .ok_or_else(|| ChainError::Encoding(format!("unknown status `{}`", parts[2])))?;
        Ok(Self {
            metadata_type,
            shard_id,
            status,
            content: parts.get(3).cloned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_round_trip_is_identity() {
        let instruction = Instruction::new(
            MetadataType::PortalShieldingRequest,
            3,
            InstructionStatus::Accepted,
            Some("eyJhIjoxfQ==".into()),
        );
        let wire = instruction.to_strings();
        let decoded = Instruction::from_strings(&wire).expect("decode");
        assert_eq!(decoded, instruction);
        assert_eq!(decoded.to_strings(), wire);
    }

    #[test]
    fn rejects_unknown_code_and_status() {
        let bad_code = vec!["9999".to_string(), "0".into(), "accepted".into()];
        assert!(Instruction::from_strings(&bad_code).is_err());
        let bad_status = vec!["260".to_string(), "0".into(), "maybe".into()];
        assert!(Instruction::from_strings(&bad_status).is_err());
    }

    #[test]
    fn registry_codes_are_stable() {
        for meta in [
            MetadataType::Stake,
            MetadataType::ReturnStake,
            MetadataType::Unstake,
            MetadataType::SwapShard,
            MetadataType::PortalShieldingRequest,
            MetadataType::PortalUserRequestPToken,
            MetadataType::PortalBurnPToken,
            MetadataType::PortalUnshieldBatching,
            MetadataType::PortalReplacementFeeRequest,
            MetadataType::PortalSubmitConfirmedTx,
        ] {
            assert_eq!(MetadataType::from_code(meta.code()), Some(meta));
        }
    }
}
