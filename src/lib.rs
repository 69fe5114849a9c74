//! Deterministic beacon-side core of the Portal v4 cross-chain bridge.
//!
//! The crate is organised around the instruction producer/processor protocol:
//! shard blocks carry user actions, the beacon [`pipeline`] turns them into
//! instructions against a cloned snapshot and replays them onto the
//! authoritative one. The [`portal`] modules cover shielding proofs, unshield
//! batching, fee replacement, confirmed-tx ingestion and signature shares;
//! [`committee`] hosts the rotation, slashing and assignment engine that
//! shares the same protocol. Persistence is a versioned key-value [`store`]
//! with per-height state roots.
//!
//! Consumers typically load [`config::NodeParams`], implement or reuse a
//! [`lightclient::ExternalLightClient`], and drive a
//! [`pipeline::BeaconPipeline`] per beacon block.

pub mod committee;
pub mod config;
pub mod errors;
pub mod exttx;
pub mod lightclient;
pub mod pipeline;
pub mod portal;
pub mod state;
pub mod store;
pub mod types;

pub use errors::{ChainError, ChainResult};
pub use pipeline::{BeaconEnv, BeaconPipeline, BeaconView};
