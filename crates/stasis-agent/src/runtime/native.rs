//! Host-process runtime backed by `criu` and cgroup v2.
//!
//! Processes are plain children of the agent started with
//! `tokio::process`. Checkpoints shell out to `criu dump` and
//! `criu restore`; the binary is resolved once from the configured path
//! or `$PATH`. When a cgroup root is configured every container gets a
//! group `<root>/<container>` that its processes join and its limits are
//! written to.

use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use stasis_api::messages::{CheckpointOptions, ProcessSpec};
use stasis_common::error::{Result, StasisError};
use stasis_common::types::{ContainerId, ResourceLimits};
use tokio::process::Command;

use super::{Runtime, SpawnedProcess, StdinPipe, UNKNOWN_EXIT_STATUS, exit_channel};
use crate::metrics::{self, ProcessUsage};

/// `PATH` given to processes whose environment does not set one.
const DEFAULT_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// How often a restored (non-child) process is checked for liveness.
const RESTORED_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Runtime that drives real host processes.
#[derive(Debug)]
pub struct NativeRuntime {
    criu_path: Option<PathBuf>,
    cgroup_root: Option<PathBuf>,
    criu: OnceLock<std::result::Result<PathBuf, String>>,
}

impl NativeRuntime {
    /// Creates the runtime. `criu_path` overrides the `$PATH` lookup and
    /// `cgroup_root` enables per-container cgroups.
    #[must_use]
    pub const fn new(criu_path: Option<PathBuf>, cgroup_root: Option<PathBuf>) -> Self {
        Self {
            criu_path,
            cgroup_root,
            criu: OnceLock::new(),
        }
    }

    fn criu(&self) -> Result<&Path> {
        let resolved = self.criu.get_or_init(|| match &self.criu_path {
            Some(path) => Ok(path.clone()),
            None => which::which("criu").map_err(|e| e.to_string()),
        });
        resolved
            .as_deref()
            .map_err(|e| StasisError::internal(format!("checkpointing unavailable: criu: {e}")))
    }

    async fn run_criu(&self, args: &[String]) -> Result<()> {
        let criu = self.criu()?;
        tracing::debug!(criu = %criu.display(), args = ?args, "running criu");
        let output = Command::new(criu)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| StasisError::Io {
                path: criu.to_path_buf(),
                source: e,
            })?;
        if !output.status.success() {
            return Err(StasisError::internal(format!(
                "criu {} failed ({}): {}",
                args.first().map_or("", String::as_str),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }

    fn cgroup_dir(&self, container: &ContainerId) -> Option<PathBuf> {
        self.cgroup_root
            .as_ref()
            .map(|root| root.join(container.as_str()))
    }

    fn join_cgroup(&self, container: &ContainerId, system_pid: u32) -> Result<()> {
        let Some(dir) = self.cgroup_dir(container) else {
            return Ok(());
        };
        std::fs::create_dir_all(&dir).map_err(|e| StasisError::Io {
            path: dir.clone(),
            source: e,
        })?;
        write_control(&dir, "cgroup.procs", &system_pid.to_string())
    }
}

#[async_trait]
impl Runtime for NativeRuntime {
    fn name(&self) -> &'static str {
        "native"
    }

    async fn spawn(
        &self,
        container: &ContainerId,
        bundle: &Path,
        process: &ProcessSpec,
    ) -> Result<SpawnedProcess> {
        if process.terminal {
            return Err(StasisError::invalid_argument(
                "terminal processes are not supported by the native runtime",
            ));
        }
        let (program, args) = process
            .args
            .split_first()
            .ok_or_else(|| StasisError::invalid_argument("process args must not be empty"))?;

        let mut command = Command::new(program);
        let _ = command
            .args(args)
            .current_dir(resolve_cwd(bundle, process.cwd.as_deref()))
            .env_clear()
            .envs(parse_env(&process.env))
            .stdin(if process.open_stdin {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(output_sink(process.stdout.as_deref())?)
            .stderr(output_sink(process.stderr.as_deref())?);

        let mut child = command.spawn().map_err(|e| StasisError::Io {
            path: PathBuf::from(program),
            source: e,
        })?;
        let system_pid = child
            .id()
            .ok_or_else(|| StasisError::internal(format!("{program} exited before it was tracked")))?;
        let stdin = child.stdin.take().map(StdinPipe::new);

        if let Err(e) = self.join_cgroup(container, system_pid) {
            let _ = child.start_kill();
            return Err(e);
        }

        let (notifier, exit) = exit_channel();
        let _ = tokio::spawn(async move {
            let status = match child.wait().await {
                Ok(status) => exit_code(status),
                Err(e) => {
                    tracing::warn!(pid = system_pid, error = %e, "failed to reap process");
                    UNKNOWN_EXIT_STATUS
                }
            };
            notifier.notify(status);
        });

        tracing::info!(id = %container, pid = system_pid, program = %program, "process spawned");
        Ok(SpawnedProcess {
            system_pid,
            exit,
            stdin,
        })
    }

    async fn checkpoint(
        &self,
        container: &ContainerId,
        system_pid: u32,
        images_dir: &Path,
        options: &CheckpointOptions,
    ) -> Result<()> {
        let mut args = vec![
            "dump".to_string(),
            "--tree".to_string(),
            system_pid.to_string(),
            "--images-dir".to_string(),
            images_dir.display().to_string(),
            "--log-file".to_string(),
            "dump.log".to_string(),
        ];
        if !options.exit {
            args.push("--leave-running".to_string());
        }
        args.extend(criu_flags(options));
        tracing::info!(id = %container, pid = system_pid, dir = %images_dir.display(), "dumping process tree");
        self.run_criu(&args).await
    }

    async fn restore(
        &self,
        container: &ContainerId,
        bundle: &Path,
        images_dir: &Path,
        options: &CheckpointOptions,
    ) -> Result<SpawnedProcess> {
        let pidfile = std::env::temp_dir().join(format!("stasis-restore-{}.pid", uuid::Uuid::new_v4()));
        let mut args = vec![
            "restore".to_string(),
            "--images-dir".to_string(),
            images_dir.display().to_string(),
            "--work-dir".to_string(),
            bundle.display().to_string(),
            "--restore-detached".to_string(),
            "--pidfile".to_string(),
            pidfile.display().to_string(),
        ];
        args.extend(criu_flags(options));
        self.run_criu(&args).await?;

        let content = std::fs::read_to_string(&pidfile).map_err(|e| StasisError::Io {
            path: pidfile.clone(),
            source: e,
        })?;
        let _ = std::fs::remove_file(&pidfile);
        let system_pid: u32 = content.trim().parse().map_err(|_| {
            StasisError::internal(format!("criu wrote an invalid pid: {}", content.trim()))
        })?;
        self.join_cgroup(container, system_pid)?;

        // Restored trees are not our children, so liveness is polled.
        let (notifier, exit) = exit_channel();
        let _ = tokio::spawn(async move {
            let proc_dir = PathBuf::from(format!("/proc/{system_pid}"));
            let mut interval = tokio::time::interval(RESTORED_POLL_INTERVAL);
            while proc_dir.exists() {
                let _ = interval.tick().await;
            }
            notifier.notify(UNKNOWN_EXIT_STATUS);
        });

        tracing::info!(id = %container, pid = system_pid, dir = %images_dir.display(), "process tree restored");
        Ok(SpawnedProcess {
            system_pid,
            exit,
            stdin: None,
        })
    }

    fn signal(&self, system_pid: u32, signal: i32) -> Result<()> {
        let sig = Signal::try_from(signal).map_err(|_| {
            StasisError::invalid_argument(format!(
                "signal {signal} is not supported by the native runtime"
            ))
        })?;
        let pid = i32::try_from(system_pid)
            .map_err(|_| StasisError::internal(format!("pid {system_pid} out of range")))?;
        kill(Pid::from_raw(pid), sig).map_err(|errno| match errno {
            Errno::ESRCH => {
                StasisError::invalid_state(system_pid.to_string(), "process has exited")
            }
            _ => StasisError::internal(format!("failed to send {sig} to {system_pid}: {errno}")),
        })?;
        tracing::debug!(pid = system_pid, signal = %sig, "signal delivered");
        Ok(())
    }

    fn resize(&self, system_pid: u32, _width: u32, _height: u32) -> Result<()> {
        Err(StasisError::internal(format!(
            "process {system_pid} has no terminal on the native runtime"
        )))
    }

    fn usage(&self, system_pid: u32) -> Result<ProcessUsage> {
        metrics::read_proc_usage(system_pid)
    }

    fn update_resources(&self, container: &ContainerId, limits: &ResourceLimits) -> Result<()> {
        let Some(dir) = self.cgroup_dir(container) else {
            tracing::debug!(id = %container, "no cgroup root configured, limits recorded only");
            return Ok(());
        };
        std::fs::create_dir_all(&dir).map_err(|e| StasisError::Io {
            path: dir.clone(),
            source: e,
        })?;
        if let Some(weight) = limits.cpu_weight {
            write_control(&dir, "cpu.weight", &weight.to_string())?;
        }
        if let Some(bytes) = limits.memory_bytes {
            write_control(&dir, "memory.max", &bytes.to_string())?;
        }
        if let Some(weight) = limits.io_weight {
            write_control(&dir, "io.weight", &format!("default {weight}"))?;
        }
        tracing::info!(id = %container, cgroup = %dir.display(), "resource limits applied");
        Ok(())
    }
}

fn write_control(dir: &Path, file: &str, value: &str) -> Result<()> {
    let path = dir.join(file);
    std::fs::write(&path, value).map_err(|e| StasisError::Io { path, source: e })
}

fn criu_flags(options: &CheckpointOptions) -> Vec<String> {
    let mut flags = Vec::new();
    if options.tcp {
        flags.push("--tcp-established".to_string());
    }
    if options.unix_sockets {
        flags.push("--ext-unix-sk".to_string());
    }
    if options.shell {
        flags.push("--shell-job".to_string());
    }
    flags
}

/// Maps an exit status to the conventional shell encoding: the exit code,
/// or `128 + signal` for a signal death.
fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|sig| 128 + sig))
        .unwrap_or(UNKNOWN_EXIT_STATUS)
}

fn resolve_cwd(bundle: &Path, cwd: Option<&Path>) -> PathBuf {
    match cwd {
        Some(dir) if dir.is_absolute() => dir.to_path_buf(),
        Some(dir) => bundle.join(dir),
        None => bundle.to_path_buf(),
    }
}

/// Splits `KEY=value` entries; entries without `=` set an empty value.
/// A default `PATH` is added when none is given.
fn parse_env(env: &[String]) -> Vec<(String, String)> {
    let mut vars: Vec<(String, String)> = env
        .iter()
        .map(|entry| match entry.split_once('=') {
            Some((key, value)) => (key.to_string(), value.to_string()),
            None => (entry.clone(), String::new()),
        })
        .collect();
    if !vars.iter().any(|(key, _)| key == "PATH") {
        vars.push(("PATH".to_string(), DEFAULT_PATH.to_string()));
    }
    vars
}

fn output_sink(path: Option<&Path>) -> Result<Stdio> {
    let Some(path) = path else {
        return Ok(Stdio::null());
    };
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| StasisError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
    Ok(Stdio::from(file))
}
