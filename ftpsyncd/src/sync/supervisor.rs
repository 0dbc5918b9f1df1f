//! Lifecycle of the optional helper process (tunnel, gateway, mount) the
//! remote endpoint depends on.

use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime};

use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::watch;

const HELPER_LOG_TARGET: &str = "ftpsyncd::helper";
const DEFAULT_TERMINATE_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("failed to launch helper `{command}`: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },
    #[error("helper exited before reporting a pid")]
    MissingPid,
    #[error("failed to signal helper {pid}: {source}")]
    Signal { pid: u32, source: nix::Error },
}

/// A shell command line, run through `sh -c` in its own process group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelperCommand {
    pub name: String,
    pub command_line: String,
}

impl HelperCommand {
    pub fn new(command_line: impl Into<String>) -> Self {
        let command_line = command_line.into();
        let name = command_line
            .split_whitespace()
            .next()
            .and_then(|program| program.rsplit('/').next())
            .unwrap_or("helper")
            .to_string();
        Self { name, command_line }
    }
}

#[derive(Debug, Clone)]
pub struct DependentProcessHandle {
    pub pid: u32,
    pub alive_since: SystemTime,
    generation: u64,
    exited: watch::Receiver<Option<ExitStatus>>,
}

impl DependentProcessHandle {
    /// Also true when the exit watcher is gone without reporting a status.
    pub fn has_exited(&self) -> bool {
        self.exited.borrow().is_some() || self.exited.has_changed().is_err()
    }
}

pub struct ProcessSupervisor {
    command: Option<HelperCommand>,
    handle: Mutex<Option<DependentProcessHandle>>,
    generation: AtomicU64,
    dependency_lost: Arc<AtomicBool>,
    terminate_grace: Duration,
}

impl ProcessSupervisor {
    pub fn new(command: Option<HelperCommand>) -> Arc<Self> {
        Arc::new(Self {
            command,
            handle: Mutex::new(None),
            generation: AtomicU64::new(0),
            dependency_lost: Arc::new(AtomicBool::new(false)),
            terminate_grace: DEFAULT_TERMINATE_GRACE,
        })
    }

    pub fn disabled() -> Arc<Self> {
        Self::new(None)
    }

    pub fn is_configured(&self) -> bool {
        self.command.is_some()
    }

    pub fn current(&self) -> Option<DependentProcessHandle> {
        self.lock_handle().clone()
    }

    /// True once per unexpected helper exit; the connection manager treats
    /// it as "the current connection is no longer valid".
    pub fn take_dependency_lost(&self) -> bool {
        self.dependency_lost.swap(false, Ordering::SeqCst)
    }

    /// Makes sure the helper is running, launching it if needed.
    pub async fn ensure_ready(self: &Arc<Self>) -> Result<(), SupervisorError> {
        let Some(command) = self.command.clone() else {
            return Ok(());
        };
        {
            let mut handle = self.lock_handle();
            match handle.as_ref() {
                Some(current) if !current.has_exited() => return Ok(()),
                Some(current) => {
                    tracing::info!(pid = current.pid, "helper {} is gone, relaunching", command.name);
                    *handle = None;
                }
                None => {}
            }
        }
        self.launch(&command)
    }

    fn launch(self: &Arc<Self>, command: &HelperCommand) -> Result<(), SupervisorError> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&command.command_line)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true);
        let mut child = cmd.spawn().map_err(|source| SupervisorError::Spawn {
            command: command.command_line.clone(),
            source,
        })?;
        let pid = child.id().ok_or(SupervisorError::MissingPid)?;
        spawn_output_logger(child.stdout.take(), &command.name, false);
        spawn_output_logger(child.stderr.take(), &command.name, true);

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (exit_tx, exit_rx) = watch::channel(None);
        *self.lock_handle() = Some(DependentProcessHandle {
            pid,
            alive_since: SystemTime::now(),
            generation,
            exited: exit_rx,
        });
        tracing::info!(pid, "helper {} started", command.name);

        let supervisor = Arc::clone(self);
        let name = command.name.clone();
        tokio::spawn(async move {
            supervisor.wait_for_exit(child, generation, exit_tx, name).await;
        });
        Ok(())
    }

    async fn wait_for_exit(
        &self,
        mut child: Child,
        generation: u64,
        exit_tx: watch::Sender<Option<ExitStatus>>,
        name: String,
    ) {
        let outcome = match child.wait().await {
            Ok(status) => {
                let _ = exit_tx.send(Some(status));
                status.to_string()
            }
            Err(err) => {
                drop(exit_tx);
                format!("wait failed: {err}")
            }
        };
        self.record_exit(generation, &name, &outcome);
    }

    fn record_exit(&self, generation: u64, name: &str, outcome: &str) {
        let mut handle = self.lock_handle();
        let still_current = handle
            .as_ref()
            .is_some_and(|current| current.generation == generation);
        if still_current {
            *handle = None;
            self.dependency_lost.store(true, Ordering::SeqCst);
            tracing::warn!("helper {name} exited unexpectedly ({outcome}), connection invalidated");
        } else {
            tracing::info!("helper {name} exited ({outcome})");
        }
    }

    /// Stops the helper: SIGTERM to its process group, SIGKILL after the
    /// grace period. A no-op when nothing is running.
    pub async fn terminate(&self) {
        let Some(handle) = self.lock_handle().take() else {
            return;
        };
        if handle.has_exited() {
            return;
        }
        if let Err(err) = signal_group(handle.pid, Signal::SIGTERM) {
            tracing::warn!("{err}");
            return;
        }
        tracing::info!(pid = handle.pid, "helper terminating");

        let mut exited = handle.exited;
        let finished = tokio::time::timeout(
            self.terminate_grace,
            exited.wait_for(|status| status.is_some()),
        )
        .await;
        if finished.is_err() {
            tracing::warn!(pid = handle.pid, "helper ignored SIGTERM, killing");
            if let Err(err) = signal_group(handle.pid, Signal::SIGKILL) {
                tracing::warn!("{err}");
            }
        }
    }

    fn lock_handle(&self) -> MutexGuard<'_, Option<DependentProcessHandle>> {
        self.handle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn signal_group(pid: u32, signal: Signal) -> Result<(), SupervisorError> {
    let raw = i32::try_from(pid).map_err(|_| SupervisorError::Signal {
        pid,
        source: nix::Error::EINVAL,
    })?;
    killpg(Pid::from_raw(raw), signal).map_err(|source| SupervisorError::Signal { pid, source })
}

fn spawn_output_logger<R>(stream: Option<R>, name: &str, is_stderr: bool)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let Some(stream) = stream else {
        return;
    };
    let name = name.to_string();
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if is_stderr {
                tracing::warn!(target: HELPER_LOG_TARGET, "[{name}] {line}");
            } else {
                tracing::info!(target: HELPER_LOG_TARGET, "[{name}] {line}");
            }
        }
    });
}

#[cfg(test)]
impl ProcessSupervisor {
    fn with_grace(command: HelperCommand, grace: Duration) -> Arc<Self> {
        Arc::new(Self {
            command: Some(command),
            handle: Mutex::new(None),
            generation: AtomicU64::new(0),
            dependency_lost: Arc::new(AtomicBool::new(false)),
            terminate_grace: grace,
        })
    }

    pub(crate) fn mark_dependency_lost(&self) {
        self.dependency_lost.store(true, Ordering::SeqCst);
    }
}
