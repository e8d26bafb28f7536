//! Active-participants proof pipeline for a decentralized inference chain.
//!
//! At every epoch boundary the chain commits the set of inference providers
//! for the next epoch. This crate lets anyone re-verify those commitments
//! without trusting a single node: the [`store`] module persists the
//! per-epoch snapshots, [`header`] and [`merkle`] recompute the block-header
//! hash and the state proof, and [`keeper`] ties the checks together into
//! the on-chain message handler. Off-chain, [`observer`] streams block
//! events into the dispatch queue and [`assembler`] rebuilds missing proofs
//! from an archive node, exposed over the [`api`] admin surface.

pub mod api;
pub mod assembler;
pub mod canonical;
pub mod config;
pub mod crypto;
pub mod errors;
pub mod header;
pub mod keeper;
pub mod merkle;
pub mod observer;
pub mod status;
pub mod store;
pub mod types;

pub use config::{NodeConfig, QuorumRule, ValidationParams};
pub use errors::{ChainError, ChainResult};
pub use keeper::Keeper;
pub use store::SnapshotStore;
