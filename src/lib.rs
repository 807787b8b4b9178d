//! Round-trip bridge between a remote agent and a local workspace.
//!
//! The agent issues batches of command calls over a webhook. The bridge
//! executes them in order against a [`tools::CommandCatalog`], snapshots
//! files before they change, and posts the results back to the agent,
//! which answers on the same webhook.

pub mod channels;
pub mod config;
pub mod engine;
pub mod error;
pub mod tools;
