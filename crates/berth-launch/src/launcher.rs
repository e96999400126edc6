use crate::entrypoint;
use berth_core::{ProcessState, RuntimeEnv};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::time::Duration;
use tokio::process::{Child, Command};

/// Time a stopped process gets to exit before it is killed.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(10);

/// Starts the web process with the runtime variables and follows it until it
/// ends. One launcher runs one process; it never restarts.
pub struct Launcher {
    env: RuntimeEnv,
    workdir: PathBuf,
    command: Vec<String>,
    grace: Duration,
    state: ProcessState,
}

impl Launcher {
    pub fn new(env: RuntimeEnv, workdir: impl Into<PathBuf>, command: Vec<String>) -> Self {
        Self {
            env,
            workdir: workdir.into(),
            command,
            grace: DEFAULT_GRACE_PERIOD,
            state: ProcessState::NotStarted,
        }
    }

    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn env(&self) -> &RuntimeEnv {
        &self.env
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    /// Check that the entrypoint exists and the port can be bound.
    ///
    /// Returns the resolved entrypoint path.
    pub fn preflight(&self) -> Result<PathBuf, LaunchError> {
        let resolved = entrypoint::resolve(&self.workdir, &self.env.entrypoint).ok_or_else(|| {
            LaunchError::MissingEntrypoint {
                entrypoint: self.env.entrypoint.clone(),
                workdir: self.workdir.clone(),
            }
        })?;
        tracing::debug!(entrypoint = %resolved.display(), "entrypoint found");

        check_port(&self.env.host, self.env.port)?;
        tracing::debug!(host = %self.env.host, port = self.env.port, "port is free");

        Ok(resolved)
    }

    /// Preflight, spawn, and wait for the process or a Ctrl-C / SIGTERM.
    pub async fn launch(&mut self) -> Result<ProcessState, LaunchError> {
        self.launch_until(shutdown_signal()).await
    }

    /// Like [`launch`](Self::launch), stopping the process when `shutdown`
    /// completes.
    pub async fn launch_until<F>(&mut self, shutdown: F) -> Result<ProcessState, LaunchError>
    where
        F: Future<Output = ()>,
    {
        let started = match self.preflight() {
            Ok(_) => self.spawn(),
            Err(e) => Err(e),
        };
        let mut child = match started {
            Ok(child) => child,
            Err(e) => {
                tracing::error!(error = %e, "process failed to start");
                self.transition(ProcessState::Crashed { code: None });
                return Err(e);
            }
        };
        self.transition(ProcessState::Running);

        tokio::pin!(shutdown);
        let outcome = tokio::select! {
            status = child.wait() => Outcome::Exited(status),
            () = &mut shutdown => Outcome::ShutdownRequested,
        };

        let state = match outcome {
            Outcome::Exited(status) => {
                let status = status.map_err(|source| LaunchError::Wait { source })?;
                ProcessState::from_exit(status.code(), false)
            }
            Outcome::ShutdownRequested => {
                tracing::info!("shutdown requested, stopping process");
                let status = terminate(&mut child, self.grace).await?;
                ProcessState::from_exit(status.code(), true)
            }
        };
        self.transition(state);
        Ok(state)
    }

    fn spawn(&self) -> Result<Child, LaunchError> {
        let Some((program, args)) = self.command.split_first() else {
            return Err(LaunchError::EmptyCommand);
        };

        tracing::info!(
            program = %program,
            ?args,
            workdir = %self.workdir.display(),
            mode = %self.env.mode,
            "starting process"
        );
        let spawned = Command::new(program)
            .args(args)
            .current_dir(&self.workdir)
            .envs(self.env.to_pairs())
            .kill_on_drop(true)
            .spawn();

        spawned.map_err(|source| LaunchError::Spawn {
            program: program.clone(),
            source,
        })
    }

    fn transition(&mut self, next: ProcessState) {
        debug_assert!(
            self.state.can_transition_to(&next),
            "invalid transition {} -> {}",
            self.state,
            next
        );
        tracing::info!(from = %self.state, to = %next, "process state");
        self.state = next;
    }
}

enum Outcome {
    Exited(std::io::Result<ExitStatus>),
    ShutdownRequested,
}

/// Bind and release `host:port`.
pub fn check_port(host: &str, port: u16) -> Result<(), LaunchError> {
    match std::net::TcpListener::bind((host, port)) {
        Ok(listener) => {
            drop(listener);
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => Err(LaunchError::PortInUse {
            host: host.to_owned(),
            port,
        }),
        Err(source) => Err(LaunchError::Bind {
            host: host.to_owned(),
            port,
            source,
        }),
    }
}

/// Load `<workdir>/.env` without overriding variables already set.
///
/// Returns whether a file was loaded.
pub fn load_dotenv(workdir: &Path) -> Result<bool, LaunchError> {
    let path = workdir.join(".env");
    if !path.is_file() {
        return Ok(false);
    }
    dotenvy::from_path(&path).map_err(|source| LaunchError::DotEnv {
        path: path.clone(),
        source,
    })?;
    tracing::debug!(path = %path.display(), ".env loaded");
    Ok(true)
}

async fn terminate(child: &mut Child, grace: Duration) -> Result<ExitStatus, LaunchError> {
    if request_stop(child) {
        match tokio::time::timeout(grace, child.wait()).await {
            Ok(status) => return status.map_err(|source| LaunchError::Wait { source }),
            Err(elapsed) => {
                tracing::warn!(%elapsed, grace_ms = grace.as_millis() as u64, "process ignored SIGTERM, killing");
            }
        }
    }
    child
        .kill()
        .await
        .map_err(|source| LaunchError::Wait { source })?;
    child
        .wait()
        .await
        .map_err(|source| LaunchError::Wait { source })
}

#[cfg(unix)]
fn request_stop(child: &Child) -> bool {
    let Some(pid) = child.id() else {
        return false;
    };
    // SAFETY: `pid` belongs to a child that has not been reaped yet.
    let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    rc == 0
}

#[cfg(not(unix))]
fn request_stop(_child: &Child) -> bool {
    false
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("entrypoint {entrypoint:?} not found under {workdir}")]
    MissingEntrypoint { entrypoint: String, workdir: PathBuf },

    #[error("port {port} on {host} is already in use")]
    PortInUse { host: String, port: u16 },

    #[error("cannot bind {host}:{port}")]
    Bind {
        host: String,
        port: u16,
        source: std::io::Error,
    },

    #[error("no command to launch")]
    EmptyCommand,

    #[error("failed to start {program}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("failed while waiting for the process")]
    Wait { source: std::io::Error },

    #[error("failed to load {path}")]
    DotEnv {
        path: PathBuf,
        source: dotenvy::Error,
    },
}
