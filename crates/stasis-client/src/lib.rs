//! # stasis-client
//!
//! Manager side of the Stasis control protocol.
//!
//! - [`Client`](stub::Client): the client stub. Implements
//!   [`stasis_api::ControlService`] by forwarding every call over a
//!   [`stasis_transport::Transport`]; `events` yields a pull-based
//!   [`EventStream`](stasis_api::stream::EventStream).
//! - [`CheckpointOrchestrator`](orchestrator::CheckpointOrchestrator):
//!   validates identifiers, resolves storage locations and produces
//!   checkpoint records.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use stasis_api::messages::CheckpointOptions;
//! use stasis_client::{CheckpointOrchestrator, Client};
//! use stasis_common::config::ClientConfig;
//! use stasis_common::types::ContainerId;
//!
//! # async fn run() -> stasis_common::error::Result<()> {
//! let config = ClientConfig::default();
//! let client = Client::connect(&config).await?;
//! let checkpoints = CheckpointOrchestrator::new(Arc::new(client), &config);
//! let record = checkpoints
//!     .create(&ContainerId::new("c1"), "snap-1", CheckpointOptions::default(), None)
//!     .await?;
//! println!("{} at {}", record.name, record.location.display());
//! # Ok(())
//! # }
//! ```

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod orchestrator;
pub mod stub;

pub use orchestrator::CheckpointOrchestrator;
pub use stub::Client;
