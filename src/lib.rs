//! Batching faucet for colored on-chain assets.
//!
//! Requests move through a small state machine (`New` to `Pending` or
//! `Waiting`, then `Processing`, then `Served` or `Unmet`); a periodic
//! scheduler groups pending requests into batched wallet sends and resolves
//! random-mode request windows; a boot-time migration engine re-points
//! retired asset ids at their successors.

pub mod asset_migration;
pub mod config;
pub mod eligibility;
pub mod entities;
pub mod http;
pub mod identity;
pub mod rng;
pub mod scheduler;
pub mod state;
pub mod store;
pub mod wallet;
