//! # stasis-common
//!
//! Shared identifiers, the error taxonomy, configuration models, and
//! constants used by both sides of the Stasis control protocol.
//!
//! This crate is the leaf of the dependency graph. The agent, the
//! transport, and the manager-side client all build on it.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod config;
pub mod constants;
pub mod error;
pub mod types;
