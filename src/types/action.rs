use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::errors::{ChainError, ChainResult};
use crate::types::{MetadataType, ShardId};

/// Decoded payload of a shard-block action: the user's metadata, the request
/// tx id it is looked up by, and the shard the request originated on.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionEnvelope<M> {
    #[serde(rename = "Meta")]
    pub meta: M,
    #[serde(rename = "TxReqID")]
    pub tx_req_id: String,
    #[serde(rename = "ShardID")]
    pub shard_id: ShardId,
}

/// A shard-block action: `[metadata_type, base64(json(envelope))]`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub metadata_type: MetadataType,
    pub payload: String,
}

impl Action {
    pub fn encode<M: Serialize>(
        metadata_type: MetadataType,
        envelope: &ActionEnvelope<M>,
    ) -> ChainResult<Self> {
        let json = serde_json::to_vec(envelope)?;
        Ok(Self {
            metadata_type,
            payload: BASE64.encode(json),
        })
    }

    pub fn decode<M: DeserializeOwned>(&self) -> ChainResult<ActionEnvelope<M>> {
        let bytes = BASE64.decode(&self.payload)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn to_strings(&self) -> Vec<String> {
        vec![self.metadata_type.code().to_string(), self.payload.clone()]
    }

    pub fn from_strings(parts: &[String]) -> ChainResult<Self> {
        if parts.len() != 2 {
            return Err(ChainError::Encoding(format!(
                "action must carry 2 fields, got {}",
                parts.len()
            )));
        }
        let code: u32 = parts[0]
            .parse()
            .map_err(|_| ChainError::Encoding(format!("bad metadata type `{}`", parts[0])))?;
        let metadata_type = MetadataType::from_code(code)
            .ok_or_else(|| ChainError::Encoding(format!("unknown metadata type {code}")))?;
        Ok(Self {
            metadata_type,
            payload: parts[1].clone(),
        })
    }
}
