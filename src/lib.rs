//! `ark-gateway`: a gateway relay that brokers off-chain Ark transfers,
//! bridges Lightning payments into and out of off-chain asset balances, and
//! periodically settles spent virtual outputs to the base chain.
//!
//! The module layout mirrors the component table in DESIGN.md: storage and
//! adapters at the bottom, the three core subsystems (balances, vtxos,
//! sessions/challenges/transactions/orchestrator, lightning bridge) in the
//! middle, and [`bootstrap::GatewayHandles`] wiring everything together for
//! the binary in `main.rs`.

pub mod adapters;
pub mod admin;
pub mod balance;
pub mod bootstrap;
pub mod bridge;
pub mod challenge;
pub mod config;
pub mod domain;
pub mod error;
pub mod events;
pub mod jobs;
pub mod orchestrator;
pub mod retry;
pub mod session;
pub mod store;
pub mod transaction;
pub mod vtxo;
