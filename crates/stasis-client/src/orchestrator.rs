//! Manager-side checkpoint workflow.
//!
//! The orchestrator rejects malformed identifiers before any call leaves
//! the process, picks the storage location, and turns agent responses
//! into [`CheckpointRecord`]s. Every failure names the container it
//! concerns.

use std::fmt;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use stasis_api::ControlService;
use stasis_api::messages::{
    CheckpointOptions, CheckpointRecord, ContainerSnapshot, CreateCheckpointRequest,
    CreateContainerRequest, DeleteCheckpointRequest, ListCheckpointRequest,
};
use stasis_common::config::ClientConfig;
use stasis_common::error::{Result, StasisError};
use stasis_common::types::{CheckpointId, ContainerId};

/// Drives checkpoint creation, listing, deletion and restore through a
/// [`ControlService`].
///
/// Every request carries an explicit `checkpoint_dir`, so the returned
/// records name the directory the agent actually used. The default root
/// is derived from [`ClientConfig::data_dir`], which must therefore match
/// the agent's own `data_dir` for the two sides to agree on where a
/// container's checkpoints live by default.
#[derive(Clone)]
pub struct CheckpointOrchestrator {
    service: Arc<dyn ControlService>,
    data_dir: PathBuf,
}

impl fmt::Debug for CheckpointOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CheckpointOrchestrator")
            .field("data_dir", &self.data_dir)
            .finish_non_exhaustive()
    }
}

fn io_error(path: &Path, source: std::io::Error) -> StasisError {
    StasisError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// The outermost directory on the way to `path`, `path` included, that
/// does not exist yet.
fn first_missing_ancestor(path: &Path) -> Option<PathBuf> {
    path.ancestors()
        .take_while(|dir| !dir.as_os_str().is_empty() && !dir.exists())
        .last()
        .map(Path::to_path_buf)
}

impl CheckpointOrchestrator {
    /// Creates an orchestrator. Default checkpoint roots resolve under
    /// `config.data_dir`, which should be the agent's data directory.
    #[must_use]
    pub fn new(service: Arc<dyn ControlService>, config: &ClientConfig) -> Self {
        Self {
            service,
            data_dir: config.data_dir.clone(),
        }
    }

    /// Returns the storage location for `container`: `location` when
    /// given and non-empty, the container's default root otherwise.
    #[must_use]
    pub fn resolve_location(&self, container: &ContainerId, location: Option<&Path>) -> PathBuf {
        match location {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => stasis_common::constants::checkpoint_root(&self.data_dir, container.as_str()),
        }
    }

    /// Checkpoints `container` as `name`.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for a malformed identifier (no call is made),
    /// otherwise whatever the agent reports, annotated with the container.
    pub async fn create(
        &self,
        container: &ContainerId,
        name: &str,
        options: CheckpointOptions,
        location: Option<&Path>,
    ) -> Result<CheckpointRecord> {
        let context = || format!("cannot checkpoint container {container}");
        container.validate().map_err(|e| e.context(context()))?;
        let checkpoint = CheckpointId::parse(name).map_err(|e| e.context(context()))?;
        let location = self.resolve_location(container, location);

        let response = self
            .service
            .create_checkpoint(CreateCheckpointRequest {
                id: container.clone(),
                name: checkpoint.to_string(),
                options,
                checkpoint_dir: Some(location.clone()),
            })
            .await
            .map_err(|e| e.context(context()))?;

        tracing::info!(
            id = %container,
            checkpoint = %checkpoint,
            location = %location.display(),
            "checkpoint created"
        );
        Ok(CheckpointRecord {
            name: checkpoint.to_string(),
            container: container.clone(),
            location,
            options,
            stat: response.stat,
        })
    }

    /// Lists the checkpoints of `container`, creating the storage
    /// location first if it does not exist. If the listing then fails,
    /// every directory created for it is removed again.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown container, or an I/O error if the
    /// location cannot be created.
    pub async fn list(
        &self,
        container: &ContainerId,
        location: Option<&Path>,
    ) -> Result<Vec<CheckpointRecord>> {
        let context = || format!("cannot list checkpoints of container {container}");
        container.validate().map_err(|e| e.context(context()))?;
        let location = self.resolve_location(container, location);

        let created = first_missing_ancestor(&location);
        if created.is_some() {
            std::fs::create_dir_all(&location)
                .map_err(|e| io_error(&location, e).context(context()))?;
            tracing::debug!(id = %container, location = %location.display(), "created checkpoint location");
        }

        let listed = self
            .service
            .list_checkpoint(ListCheckpointRequest {
                id: container.clone(),
                checkpoint_dir: Some(location.clone()),
            })
            .await;
        match listed {
            Ok(response) => Ok(response.checkpoints),
            Err(e) => {
                if let Some(created) = created {
                    if let Err(cleanup) = std::fs::remove_dir_all(&created) {
                        tracing::debug!(location = %created.display(), error = %cleanup, "left checkpoint location behind");
                    }
                }
                Err(e.context(context()))
            }
        }
    }

    /// Deletes checkpoint `name` of `container`. Deleting an absent
    /// checkpoint succeeds.
    ///
    /// The agent removes the entry, then any files left under
    /// `location/name` are removed locally. Nothing outside that subtree
    /// is touched.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for a malformed identifier (no call is made),
    /// otherwise whatever the agent reports, annotated with the container.
    pub async fn delete(
        &self,
        container: &ContainerId,
        name: &str,
        location: Option<&Path>,
    ) -> Result<()> {
        let context = || format!("cannot delete checkpoint {name} of container {container}");
        container.validate().map_err(|e| e.context(context()))?;
        let checkpoint = CheckpointId::parse(name).map_err(|e| e.context(context()))?;
        let location = self.resolve_location(container, location);

        let _ = self
            .service
            .delete_checkpoint(DeleteCheckpointRequest {
                id: container.clone(),
                name: checkpoint.to_string(),
                checkpoint_dir: Some(location.clone()),
            })
            .await
            .map_err(|e| e.context(context()))?;

        let leftover = location.join(checkpoint.as_str());
        match std::fs::remove_dir_all(&leftover) {
            Ok(()) => tracing::debug!(path = %leftover.display(), "removed leftover checkpoint files"),
            Err(e) if e.kind() == IoErrorKind::NotFound => {}
            Err(e) => return Err(io_error(&leftover, e).context(context())),
        }
        tracing::info!(id = %container, checkpoint = %checkpoint, "checkpoint deleted");
        Ok(())
    }

    /// Creates the container described by `request` from checkpoint
    /// `name` instead of starting it fresh.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for a malformed identifier (no call is made),
    /// `NotFound` if the checkpoint does not exist, otherwise whatever
    /// the agent reports.
    pub async fn restore(
        &self,
        mut request: CreateContainerRequest,
        name: &str,
        location: Option<&Path>,
    ) -> Result<ContainerSnapshot> {
        let container = request.id.clone();
        let context = || format!("cannot restore container {container} from {name}");
        container.validate().map_err(|e| e.context(context()))?;
        let checkpoint = CheckpointId::parse(name).map_err(|e| e.context(context()))?;

        request.checkpoint_dir = Some(self.resolve_location(&container, location));
        request.checkpoint = Some(checkpoint.to_string());
        let response = self
            .service
            .create_container(request)
            .await
            .map_err(|e| e.context(context()))?;
        tracing::info!(id = %container, checkpoint = %checkpoint, "container restored");
        Ok(response.container)
    }
}
