pub mod assign;
pub mod engine;
pub mod reward;
pub mod state;
pub mod swap_rule;

pub use state::{CommitteeState, Membership, StakerInfo};
pub use swap_rule::{SwapDecision, SwapRule, SwapShardContent};
