use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::errors::{ChainError, ChainResult};
use crate::types::TokenId;

pub const DEFAULT_BLOCK_INTERVAL_SECS: u64 = 40;
pub const DEFAULT_MIN_CONFIRMATIONS: u32 = 6;
/// Upper bound on ancestor walks when probing confirmation depth.
pub const MAX_CONFIRMATION_WALK: u32 = 16;

fn parse_toml<T: DeserializeOwned>(content: &str, label: &str) -> ChainResult<T> {
    toml::from_str(content).map_err(|err| ChainError::Config(format!("{label}: {err}")))
}

/// Per-token portal configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenConfig {
    pub chain_id: String,
    /// Dust threshold for shielding, in external units.
    pub min_token_amount: u64,
    /// Flat unshield fee, in ptoken nano units.
    pub fee_unshield: u64,
    pub multisig_address: String,
    pub multisig_script_hex: String,
    /// Divisor taking ptoken nano units to external units.
    pub external_decimal_divisor: u64,
}

impl TokenConfig {
    pub fn multisig_script(&self) -> ChainResult<Vec<u8>> {
        hex::decode(&self.multisig_script_hex)
            .map_err(|err| ChainError::Config(format!("multisig_script_hex: {err}")))
    }

    /// Convert a ptoken nano amount into external units (truncating).
    pub fn inc_to_external(&self, nano: u64) -> u64 {
        nano / self.external_decimal_divisor
    }

    fn validate(&self, token: &TokenId) -> ChainResult<()> {
        if self.external_decimal_divisor == 0 {
            return Err(ChainError::Config(format!(
                "token {token}: external_decimal_divisor must be non-zero"
            )));
        }
        if self.multisig_address.is_empty() {
            return Err(ChainError::Config(format!(
                "token {token}: multisig_address must be set"
            )));
        }
        self.multisig_script().map(|_| ())
    }
}

/// Portal-wide knobs shared by every token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortalParams {
    /// Only this address may request a batch fee replacement.
    pub portal_replacement_address: String,
    /// Largest allowed fee increase per replacement, in external units.
    pub max_fee_for_each_step: u64,
    /// Minimum wall-clock spacing between replacements, in seconds.
    pub time_space_for_fee_replacement_secs: u64,
    #[serde(default = "default_block_interval")]
    pub block_interval_secs: u64,
    /// Beacon blocks between batching passes.
    pub batch_num_blocks: u64,
    #[serde(default = "default_min_confirmations")]
    pub min_confirmations: u32,
    /// Resolved once at load: the replacement window in beacon heights.
    #[serde(skip)]
    pub time_space_in_heights: u64,
    pub portal_tokens: BTreeMap<TokenId, TokenConfig>,
}

fn default_block_interval() -> u64 {
    DEFAULT_BLOCK_INTERVAL_SECS
}

fn default_min_confirmations() -> u32 {
    DEFAULT_MIN_CONFIRMATIONS
}

impl PortalParams {
    pub fn validate(&mut self) -> ChainResult<()> {
        if self.block_interval_secs == 0 {
            return Err(ChainError::Config("block_interval_secs must be non-zero".into()));
        }
        if self.batch_num_blocks == 0 {
            return Err(ChainError::Config("batch_num_blocks must be non-zero".into()));
        }
        if self.min_confirmations == 0 || self.min_confirmations > MAX_CONFIRMATION_WALK {
            return Err(ChainError::Config(format!(
                "min_confirmations must be within 1..={MAX_CONFIRMATION_WALK}"
            )));
        }
        if self.portal_replacement_address.is_empty() {
            return Err(ChainError::Config(
                "portal_replacement_address must be set".into(),
            ));
        }
        for (token, config) in &self.portal_tokens {
            config.validate(token)?;
        }
        // Reified once so producers compare plain height deltas.
        self.time_space_in_heights =
            (self.time_space_for_fee_replacement_secs / self.block_interval_secs).max(1);
        Ok(())
    }

    pub fn token(&self, token: &str) -> Option<&TokenConfig> {
        self.portal_tokens.get(token)
    }
}

/// Committee sizing, epoch geometry and slashing thresholds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitteeParams {
    pub active_shards: u8,
    pub min_shard_committee_size: usize,
    pub max_shard_committee_size: usize,
    pub number_of_fixed_shard_validators: usize,
    pub epoch_length: u64,
    /// Height offset within an epoch at which candidate assignment runs.
    pub assign_offset: u64,
    /// Height offset within an epoch after which the epoch random number is
    /// considered valid.
    pub random_time_offset: u64,
    pub swap_rule_v2_epoch: u64,
    pub swap_rule_v3_epoch: u64,
    pub max_slash_per_epoch: usize,
    /// Missing-signature penalty above which a member is slashed.
    pub slash_penalty_threshold: u64,
    pub dao_percent: u64,
    pub is_split_reward_for_custodian: bool,
    pub percent_custodian_reward: u64,
}

impl CommitteeParams {
    pub fn validate(&self) -> ChainResult<()> {
        if self.active_shards == 0 {
            return Err(ChainError::Config("active_shards must be non-zero".into()));
        }
        if self.epoch_length == 0 {
            return Err(ChainError::Config("epoch_length must be non-zero".into()));
        }
        if self.min_shard_committee_size > self.max_shard_committee_size {
            return Err(ChainError::Config(
                "min_shard_committee_size exceeds max_shard_committee_size".into(),
            ));
        }
        if self.number_of_fixed_shard_validators > self.min_shard_committee_size {
            return Err(ChainError::Config(
                "fixed validators exceed min_shard_committee_size".into(),
            ));
        }
        if self.assign_offset >= self.epoch_length || self.random_time_offset >= self.epoch_length {
            return Err(ChainError::Config(
                "epoch offsets must fall inside the epoch".into(),
            ));
        }
        if self.dao_percent > 100 || self.percent_custodian_reward > 100 {
            return Err(ChainError::Config("percentages must be within 0..=100".into()));
        }
        Ok(())
    }

    pub fn epoch_of(&self, beacon_height: u64) -> u64 {
        if beacon_height == 0 {
            return 0;
        }
        (beacon_height - 1) / self.epoch_length + 1
    }

    pub fn height_in_epoch(&self, beacon_height: u64) -> u64 {
        if beacon_height == 0 {
            return 0;
        }
        (beacon_height - 1) % self.epoch_length + 1
    }

    pub fn is_first_height_of_epoch(&self, beacon_height: u64) -> bool {
        self.height_in_epoch(beacon_height) == 1
    }

    pub fn is_assign_height(&self, beacon_height: u64) -> bool {
        self.height_in_epoch(beacon_height) == self.assign_offset
    }

    pub fn is_random_time_passed(&self, beacon_height: u64) -> bool {
        self.height_in_epoch(beacon_height) >= self.random_time_offset
    }

    /// Swap rule version in force for `epoch`.
    pub fn swap_rule_version(&self, epoch: u64) -> u8 {
        if epoch >= self.swap_rule_v3_epoch {
            3
        } else if epoch >= self.swap_rule_v2_epoch {
            2
        } else {
            1
        }
    }
}

/// Root configuration document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeParams {
    pub portal: PortalParams,
    pub committee: CommitteeParams,
}

impl NodeParams {
    pub fn load(path: &Path) -> ChainResult<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> ChainResult<Self> {
        let mut params: NodeParams = parse_toml(content, "node params")?;
        params.portal.validate()?;
        params.committee.validate()?;
        Ok(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_toml() -> &'static str {
        r#"
            [portal]
            portal_replacement_address = "12RxahVABnAVCGP3LGwCn8jkQxgw7z1x14wztHzn455TTVpi1wBq9YGwkRMQg3J4e657AbAnCvYCJSdA9czBUNuCKwGSRQt55Xwz8WA"
            max_fee_for_each_step = 500
            time_space_for_fee_replacement_secs = 200
            block_interval_secs = 40
            batch_num_blocks = 45

            [portal.portal_tokens.btc]
            chain_id = "mainnet"
            min_token_amount = 10
            fee_unshield = 100000
            multisig_address = "bc1q-multisig"
            multisig_script_hex = "5221aa21bb52ae"
            external_decimal_divisor = 10

            [committee]
            active_shards = 2
            min_shard_committee_size = 4
            max_shard_committee_size = 8
            number_of_fixed_shard_validators = 2
            epoch_length = 100
            assign_offset = 50
            random_time_offset = 40
            swap_rule_v2_epoch = 10
            swap_rule_v3_epoch = 100
            max_slash_per_epoch = 3
            slash_penalty_threshold = 50
            dao_percent = 10
            is_split_reward_for_custodian = false
            percent_custodian_reward = 0
        "#
    }

    #[test]
    fn loads_and_derives_replacement_window() {
        let params = NodeParams::from_toml(sample_toml()).expect("load");
        assert_eq!(params.portal.time_space_in_heights, 5);
        assert_eq!(params.portal.token("btc").unwrap().inc_to_external(1_000), 100);
    }

    #[test]
    fn rejects_zero_divisor() {
        let bad = sample_toml().replace("external_decimal_divisor = 10", "external_decimal_divisor = 0");
        assert!(NodeParams::from_toml(&bad).is_err());
    }

    #[test]
    fn epoch_geometry() {
        let params = NodeParams::from_toml(sample_toml()).expect("load");
        let committee = &params.committee;
        assert_eq!(committee.epoch_of(1), 1);
        assert_eq!(committee.epoch_of(100), 1);
        assert_eq!(committee.epoch_of(101), 2);
        assert!(committee.is_first_height_of_epoch(101));
        assert!(committee.is_assign_height(150));
        assert!(committee.is_random_time_passed(145));
        assert!(!committee.is_random_time_passed(120));
        assert_eq!(committee.swap_rule_version(5), 1);
        assert_eq!(committee.swap_rule_version(10), 2);
        assert_eq!(committee.swap_rule_version(100), 3);
    }
}
