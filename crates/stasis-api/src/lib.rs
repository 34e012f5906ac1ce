//! # stasis-api
//!
//! The wire contract between the manager and the agent.
//!
//! - [`method`]: the method catalogue and its `types.API.<Method>` names.
//! - [`messages`]: strongly typed request/response pairs.
//! - [`event`]: the event message delivered by `Events`.
//! - [`status`]: error statuses as carried on the wire.
//! - [`frame`]: newline-delimited JSON frames multiplexed by call id.
//! - [`stream`]: the bounded, cancellable event channel.
//! - [`service`]: the [`ControlService`](service::ControlService) trait
//!   implemented by both the agent and the client stub.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod event;
pub mod frame;
pub mod messages;
pub mod method;
pub mod service;
pub mod status;
pub mod stream;

pub use service::ControlService;
