//! # stasis-transport
//!
//! Moves control-protocol calls between the manager and the agent.
//!
//! - [`Dispatcher`] maps namespaced method names onto a
//!   [`stasis_api::ControlService`] and encodes results.
//! - [`UnixServer`] serves a dispatcher on a Unix socket, one task per
//!   call, with streaming calls cancellable per call id.
//! - [`UnixTransport`] is the matching client connection.
//! - [`LocalTransport`] runs calls in-process through the same frames.
//!
//! Frames are newline-delimited JSON (see [`stasis_api::frame`]).

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod client;
pub mod dispatch;
pub mod local;
pub mod server;
pub mod transport;

pub use client::UnixTransport;
pub use dispatch::Dispatcher;
pub use local::LocalTransport;
pub use server::UnixServer;
pub use transport::Transport;
