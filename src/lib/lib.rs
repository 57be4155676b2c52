//! Commitment-tree and nullifier indexer for an EVM shielded pool.
//!
//! The indexer replays `Deposit` / `Withdrawal` events from the pool contract into a
//! local incremental Merkle tree and nullifier set that stay bit-for-bit in step with
//! the on-chain state, and serves Merkle paths, roots and spend status to proof
//! generators and relayers.

pub mod adapters;
pub mod config;
pub mod crypto;
pub mod domain;
pub mod pool;
pub mod ports;
pub mod registry;
pub mod server;
pub mod sync;
