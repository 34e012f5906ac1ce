//! # stasis-agent
//!
//! The agent side of the Stasis control protocol. [`Agent`] implements
//! [`stasis_api::ControlService`] against live container state: it
//! drives a [`runtime::Runtime`] backend, persists checkpoints through a
//! [`store::CheckpointStore`], and fans lifecycle events out through an
//! [`events::EventHub`].
//!
//! Mutating calls on one container are serialized by that container's
//! operation lock; calls on different containers proceed in parallel.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod agent;
pub mod container;
pub mod events;
pub mod metrics;
pub mod runtime;
pub mod store;

pub use agent::Agent;
