//! SMS Autopilot — scripted lead-qualification conversations.
//!
//! Inbound seller replies are classified into a small intent set,
//! walked through a four-stage qualification script, answered from
//! deterministic template pools, and gated by quiet hours. Prospects
//! who signal real interest are promoted to leads.

pub mod classify;
pub mod compose;
pub mod config;
pub mod engine;
pub mod error;
pub mod intake;
pub mod model;
pub mod promote;
pub mod quiet;
pub mod score;
pub mod stage;
pub mod store;
pub mod transport;
