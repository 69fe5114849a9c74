pub mod action;
pub mod instruction;

pub use action::{Action, ActionEnvelope};
pub use instruction::{Instruction, InstructionStatus, MetadataType, BEACON_SHARD_ID};

pub type TokenId = String;
pub type ShardId = u8;
pub type BeaconHeight = u64;
pub type Epoch = u64;

/// Committee membership is keyed by the validator's serialized public key.
pub type CommitteePublicKey = String;
