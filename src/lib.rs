// src/lib.rs

//! A peer-to-peer blockchain node: signed transactions, gossip, a periodic
//! validator that mints blocks, and an in-memory account-balance ledger
//! with a minimal NFT registry.
//!
//! ## Core modules
//!
//! - [`hash`] / [`crypto`]: shared value types and Ed25519 primitives.
//! - [`codec`]: the canonical binary encoding used for hashing and wire
//!   transport.
//! - [`vm`]: the stack machine transactions execute against shared state.
//! - [`tx`] / [`block`]: the transaction and block data model.
//! - [`storage`]: the storage interface and its in-memory implementation.
//! - [`chain`]: the append-only ledger engine.
//! - [`mempool`]: the multi-stage transaction pool.
//! - [`network`] / [`gossip`]: the transport and the gossip protocol it
//!   carries.
//! - [`server`]: wires the above together and runs the validator loop.
//! - [`config`]: node configuration.
//! - [`account_export`]: the account-export helper.

pub mod account_export;
pub mod block;
pub mod chain;
pub mod codec;
pub mod config;
pub mod crypto;
pub mod gossip;
pub mod hash;
pub mod mempool;
pub mod network;
pub mod server;
pub mod storage;
pub mod tx;
pub mod vm;
