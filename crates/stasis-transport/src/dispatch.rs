//! Routes wire method names onto a [`ControlService`].

use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use stasis_api::ControlService;
use stasis_api::frame::{decode_request, encode_message};
use stasis_api::method::Method;
use stasis_api::status::Status;
use stasis_api::stream::EventStream;
use stasis_common::error::{ErrorKind, Result, StasisError};

/// Decodes requests, invokes the service, and encodes responses.
#[derive(Clone)]
pub struct Dispatcher {
    service: Arc<dyn ControlService>,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher").finish_non_exhaustive()
    }
}

fn resolve(name: &str) -> std::result::Result<Method, Status> {
    Method::from_full_name(name).ok_or_else(|| {
        Status::new(
            ErrorKind::InvalidArgument,
            format!("unknown method {name}"),
        )
    })
}

impl Dispatcher {
    /// Wraps a service implementation.
    #[must_use]
    pub fn new(service: Arc<dyn ControlService>) -> Self {
        Self { service }
    }

    /// Runs a unary call.
    ///
    /// # Errors
    ///
    /// Returns the status of a failed call, including unknown or
    /// streaming method names.
    pub async fn call(&self, name: &str, params: Value) -> std::result::Result<Value, Status> {
        let method = resolve(name)?;
        if method.is_streaming() {
            return Err(Status::new(
                ErrorKind::InvalidArgument,
                format!("{method} is a streaming method"),
            ));
        }
        self.invoke(method, params).await.map_err(|e| {
            tracing::debug!(method = %method, error = %e, "call failed");
            Status::from(&e)
        })
    }

    /// Opens a server-streaming call.
    ///
    /// # Errors
    ///
    /// Returns the status of a failed subscription, including unknown
    /// or unary method names.
    pub async fn open_stream(
        &self,
        name: &str,
        params: Value,
    ) -> std::result::Result<EventStream, Status> {
        let method = resolve(name)?;
        if !method.is_streaming() {
            return Err(Status::new(
                ErrorKind::InvalidArgument,
                format!("{method} is not a streaming method"),
            ));
        }
        let request = decode_request(name, params).map_err(|e| Status::from(&e))?;
        self.service
            .events(request)
            .await
            .map_err(|e| Status::from(&e))
    }

    async fn invoke(&self, method: Method, params: Value) -> Result<Value> {
        let name = method.full_name();
        let service = &self.service;
        match method {
            Method::GetServerVersion => {
                encode_message(&service.get_server_version(decode_request(&name, params)?).await?)
            }
            Method::CreateContainer => {
                encode_message(&service.create_container(decode_request(&name, params)?).await?)
            }
            Method::UpdateContainer => {
                encode_message(&service.update_container(decode_request(&name, params)?).await?)
            }
            Method::Signal => encode_message(&service.signal(decode_request(&name, params)?).await?),
            Method::UpdateProcess => {
                encode_message(&service.update_process(decode_request(&name, params)?).await?)
            }
            Method::AddProcess => {
                encode_message(&service.add_process(decode_request(&name, params)?).await?)
            }
            Method::CreateCheckpoint => {
                encode_message(&service.create_checkpoint(decode_request(&name, params)?).await?)
            }
            Method::DeleteCheckpoint => {
                encode_message(&service.delete_checkpoint(decode_request(&name, params)?).await?)
            }
            Method::ListCheckpoint => {
                encode_message(&service.list_checkpoint(decode_request(&name, params)?).await?)
            }
            Method::State => encode_message(&service.state(decode_request(&name, params)?).await?),
            Method::Stats => encode_message(&service.stats(decode_request(&name, params)?).await?),
            Method::Events => Err(StasisError::invalid_argument(format!(
                "{name} is a streaming method"
            ))),
        }
    }
}
