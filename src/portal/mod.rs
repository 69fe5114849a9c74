pub mod batch;
pub mod fee;
pub mod proof;
pub mod shield;
pub mod signer;
pub mod submit;
pub mod unshield;
