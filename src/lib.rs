//! Switchyard edge cache node.
//!
//! Sits between flag-evaluating SDKs and the management server: serves
//! per-environment feature snapshots from memory, keeps them fresh from the
//! change-event stream, and falls back to passthrough reads whenever the
//! stream cannot vouch for freshness.

pub mod cache;
pub mod config;
pub mod domain;
pub mod events;
pub mod infra;
pub mod upstream;
