use crate::docker::EngineError;
use crate::executor::{EngineExecutor, RealExecutor};
use berth_core::{ProcessState, RuntimeEnv};
use std::fmt;
use std::path::Path;

/// Engine stderr fragments that mean the host port is taken.
const PORT_IN_USE_MARKERS: &[&str] = &["port is already allocated", "address already in use"];

/// Engine stderr fragments that mean the image does not exist.
const IMAGE_MISSING_MARKERS: &[&str] = &["Unable to find image", "No such image", "pull access denied"];

/// Container engine client, parameterized over the executor for testability.
pub struct EngineClient<E: EngineExecutor = RealExecutor> {
    executor: E,
}

impl EngineClient<RealExecutor> {
    pub fn new() -> Self {
        Self {
            executor: RealExecutor::from_env(),
        }
    }
}

impl Default for EngineClient<RealExecutor> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: EngineExecutor> EngineClient<E> {
    pub fn with_executor(executor: E) -> Self {
        Self { executor }
    }

    // ── Preflight ──

    pub async fn check_prerequisites(&self) -> Result<PreflightReport, PreflightError> {
        let mut report = PreflightReport::default();

        // 1. Engine CLI available
        match self
            .executor
            .exec(&args(["version", "--format", "{{.Client.Version}}"]))
            .await
        {
            Ok(version) => report.client_version = Some(version.trim().to_owned()),
            Err(EngineError::NotFound { .. }) => return Err(PreflightError::EngineNotInstalled),
            Err(e) => {
                tracing::debug!(error = %e, "engine version check failed");
                return Err(PreflightError::DaemonUnreachable(e.stderr().trim().to_owned()));
            }
        }

        // 2. Daemon reachable
        match self
            .executor
            .exec(&args(["info", "--format", "{{.ServerVersion}}"]))
            .await
        {
            Ok(version) => report.server_version = Some(version.trim().to_owned()),
            Err(e) => {
                return Err(PreflightError::DaemonUnreachable(e.stderr().trim().to_owned()));
            }
        }

        Ok(report)
    }

    // ── Doctor ──

    /// Run the engine checks without early return.
    /// Project checks are filled in by the caller.
    pub async fn doctor(&self) -> DoctorReport {
        let mut report = DoctorReport::default();

        // 1. Engine CLI
        match self
            .executor
            .exec(&args(["version", "--format", "{{.Client.Version}}"]))
            .await
        {
            Ok(v) if !v.trim().is_empty() => report.engine = CheckResult::ok(v.trim()),
            Ok(_) => report.engine = CheckResult::ok("installed"),
            Err(EngineError::NotFound { program, .. }) => {
                report.engine = CheckResult::fail(&format!("{program} not found"));
                report.daemon = CheckResult::fail("skipped");
                return report;
            }
            // version exits non-zero when only the daemon is missing
            Err(e) => report.engine = CheckResult::ok(&first_line(e.stderr())),
        }

        // 2. Daemon
        match self
            .executor
            .exec(&args(["info", "--format", "{{.ServerVersion}}"]))
            .await
        {
            Ok(v) => report.daemon = CheckResult::ok(&format!("server {}", v.trim())),
            Err(e) => report.daemon = CheckResult::fail(&first_line(e.stderr())),
        }

        report
    }

    // ── Images ──

    /// Build `context` (which must contain a Dockerfile) and tag it.
    ///
    /// `capture`: when `true`, build output is captured and returned.
    ///            when `false`, output is streamed to the terminal.
    ///
    /// A non-zero engine exit is a [`BuildError`]; the engine does not tag
    /// a partially built image, so nothing usable is left behind.
    pub async fn build_image(
        &self,
        context: &Path,
        tag: &str,
        capture: bool,
    ) -> Result<Option<String>, BuildError> {
        let context_str = context
            .to_str()
            .ok_or_else(|| BuildError::InvalidPath(context.to_path_buf()))?;

        let build_args = args(["build", "--tag", tag, context_str]);
        tracing::info!(tag, context = context_str, "building image");

        if capture {
            let output = self
                .executor
                .exec(&build_args)
                .await
                .map_err(|e| BuildError::Failed {
                    tag: tag.to_owned(),
                    source: e,
                })?;
            Ok(Some(output))
        } else {
            self.executor
                .exec_streaming(&build_args)
                .await
                .map_err(|e| BuildError::Failed {
                    tag: tag.to_owned(),
                    source: e,
                })?;
            Ok(None)
        }
    }

    pub async fn image_exists(&self, tag: &str) -> Result<bool, EngineError> {
        match self
            .executor
            .exec(&args(["image", "inspect", "--format", "{{.Id}}", tag]))
            .await
        {
            Ok(id) => Ok(!id.trim().is_empty()),
            Err(EngineError::CommandFailed { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub async fn remove_image(&self, tag: &str) -> Result<(), EngineError> {
        self.executor
            .exec(&args(["image", "rm", tag]))
            .await
            .map(|_| ())
    }

    // ── Containers ──

    /// Start a detached container and return its id.
    pub async fn run_detached(&self, spec: &RunSpec) -> Result<String, RunError> {
        let output = self
            .executor
            .exec(&spec.to_args())
            .await
            .map_err(|e| classify_run_failure(e, spec))?;
        let id = output.trim();
        if id.is_empty() {
            return Err(RunError::Failed {
                source: EngineError::UnexpectedOutput {
                    program: "engine".to_owned(),
                    output,
                },
            });
        }
        tracing::info!(container = id, image = %spec.image, "container started");
        Ok(id.to_owned())
    }

    /// Run a container in the foreground until it exits.
    ///
    /// The engine forwards the container's exit code; a non-zero code is
    /// reported as [`RunError::Exited`].
    pub async fn run_foreground(&self, spec: &RunSpec) -> Result<(), RunError> {
        self.executor
            .exec_streaming(&spec.to_args())
            .await
            .map_err(|e| match e {
                EngineError::CommandFailed {
                    status: Some(code), ..
                } if code != 125 => RunError::Exited { code },
                other => classify_run_failure(other, spec),
            })
    }

    pub async fn inspect_state(&self, container: &str) -> Result<ProcessState, EngineError> {
        let output = self
            .executor
            .exec(&args([
                "container",
                "inspect",
                "--format",
                "{{.State.Status}} {{.State.ExitCode}}",
                container,
            ]))
            .await?;
        parse_state(&output)
    }

    pub async fn stop_container(&self, container: &str) -> Result<(), EngineError> {
        self.executor
            .exec(&args(["container", "stop", container]))
            .await
            .map(|_| ())
    }
}

/// Parse `"<status> <exit code>"` as printed by `container inspect`.
///
/// Signal exit codes ([`berth_core::runtime::SIGNAL_EXIT_CODES`]) count as
/// a stop, not a crash.
pub fn parse_state(output: &str) -> Result<ProcessState, EngineError> {
    let mut parts = output.split_whitespace();
    let status = parts.next().unwrap_or_default();
    // arch-lint: allow(no-silent-result-drop) reason="a missing or garbled exit code is reported as unknown"
    let code = parts.next().and_then(|c| c.parse::<i32>().ok());

    let state = match status {
        "created" => ProcessState::NotStarted,
        "running" | "paused" | "restarting" => ProcessState::Running,
        "exited" => ProcessState::from_container_exit(code),
        "dead" => ProcessState::Crashed { code },
        _ => {
            return Err(EngineError::UnexpectedOutput {
                program: "engine".to_owned(),
                output: output.to_owned(),
            });
        }
    };
    Ok(state)
}

fn classify_run_failure(err: EngineError, spec: &RunSpec) -> RunError {
    let stderr = err.stderr();
    if PORT_IN_USE_MARKERS.iter().any(|m| stderr.contains(m)) {
        return RunError::PortInUse {
            port: spec.host_port,
        };
    }
    if IMAGE_MISSING_MARKERS.iter().any(|m| stderr.contains(m)) {
        return RunError::ImageNotFound {
            image: spec.image.clone(),
        };
    }
    RunError::Failed { source: err }
}

fn first_line(s: &str) -> String {
    s.lines().next().unwrap_or("unavailable").trim().to_owned()
}

// ── Helper ──

fn args<const N: usize>(a: [&str; N]) -> Vec<String> {
    a.iter().map(|s| (*s).to_owned()).collect()
}

// ── Run spec ──

/// Everything needed to start one container from a built image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSpec {
    pub image: String,
    pub name: Option<String>,
    /// Host port published to the container port
    pub host_port: u16,
    /// Port the process binds inside the container
    pub container_port: u16,
    /// Runtime variables injected at start
    pub env: Vec<(String, String)>,
    pub detach: bool,
}

impl RunSpec {
    /// Spec for `image` with the effective runtime environment.
    ///
    /// The container port follows `FLASK_RUN_PORT`; the host port defaults to
    /// the same number.
    pub fn new(image: &str, runtime: &RuntimeEnv, host_port: Option<u16>) -> Self {
        Self {
            image: image.to_owned(),
            name: None,
            host_port: host_port.unwrap_or(runtime.port),
            container_port: runtime.port,
            env: runtime
                .to_pairs()
                .into_iter()
                .map(|(k, v)| (k.to_owned(), v))
                .collect(),
            detach: false,
        }
    }

    pub fn to_args(&self) -> Vec<String> {
        let mut cmd: Vec<String> = vec!["run".to_owned(), "--restart".to_owned(), "no".to_owned()];
        if self.detach {
            cmd.push("--detach".to_owned());
        } else {
            cmd.push("--rm".to_owned());
            cmd.push("--init".to_owned());
        }
        if let Some(name) = &self.name {
            cmd.push("--name".to_owned());
            cmd.push(name.clone());
        }
        cmd.push("--publish".to_owned());
        cmd.push(format!("{}:{}", self.host_port, self.container_port));
        for (key, value) in &self.env {
            cmd.push("--env".to_owned());
            cmd.push(format!("{key}={value}"));
        }
        cmd.push(self.image.clone());
        cmd
    }
}

// ── Report types ──

#[derive(Debug, Default)]
pub struct PreflightReport {
    pub client_version: Option<String>,
    pub server_version: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum PreflightError {
    #[error("container engine CLI not installed; install Docker or set BERTH_ENGINE")]
    EngineNotInstalled,

    #[error("container engine daemon is not reachable: {0}")]
    DaemonUnreachable(String),
}

// ── Doctor types ──

#[derive(Debug, Default)]
pub struct DoctorReport {
    pub engine: CheckResult,
    pub daemon: CheckResult,
    pub config_file: CheckResult,
    pub manifest: CheckResult,
    pub entrypoint: CheckResult,
}

impl DoctorReport {
    pub fn all_passed(&self) -> bool {
        self.engine.passed
            && self.daemon.passed
            && self.config_file.passed
            && self.manifest.passed
            && self.entrypoint.passed
    }
}

impl fmt::Display for DoctorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rows = [
            ("Engine CLI", &self.engine),
            ("Engine daemon", &self.daemon),
            ("berth.toml", &self.config_file),
            ("Dependency manifest", &self.manifest),
            ("Entrypoint", &self.entrypoint),
        ];
        for (label, check) in rows {
            writeln!(f, "  [{}] {label:<20} {}", check.icon(), check.detail)?;
        }
        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct CheckResult {
    pub passed: bool,
    pub detail: String,
}

impl CheckResult {
    pub fn ok(detail: &str) -> Self {
        Self {
            passed: true,
            detail: detail.to_owned(),
        }
    }

    pub fn fail(detail: &str) -> Self {
        Self {
            passed: false,
            detail: detail.to_owned(),
        }
    }

    pub fn icon(&self) -> &'static str {
        if self.passed { "OK" } else { "NG" }
    }
}

// ── Error types ──

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("build context path is not valid UTF-8: {0}")]
    InvalidPath(std::path::PathBuf),

    #[error("image build failed for {tag}; no image was produced")]
    Failed { tag: String, source: EngineError },
}

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("host port {port} is already in use; stop the other instance or publish a different port")]
    PortInUse { port: u16 },

    #[error("image {image} not found; run `berth build` first")]
    ImageNotFound { image: String },

    #[error("container exited with code {code}")]
    Exited { code: i32 },

    #[error("failed to start container")]
    Failed { source: EngineError },
}
