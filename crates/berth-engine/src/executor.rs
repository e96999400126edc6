use crate::docker::EngineError;

/// Environment variable selecting the engine CLI (`docker`, `podman`, …).
pub const ENGINE_ENV: &str = "BERTH_ENGINE";

const DEFAULT_ENGINE: &str = "docker";

/// Abstraction over container engine CLI execution for testability.
///
/// Production code uses [`RealExecutor`], tests use mockall-generated mocks.
#[allow(async_fn_in_trait)]
pub trait EngineExecutor: Send + Sync {
    /// Execute an engine command and capture stdout.
    async fn exec(&self, args: &[String]) -> Result<String, EngineError>;

    /// Execute an engine command, streaming output to the terminal.
    async fn exec_streaming(&self, args: &[String]) -> Result<(), EngineError>;
}

/// Real engine CLI executor.
pub struct RealExecutor {
    program: String,
}

impl RealExecutor {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Use `$BERTH_ENGINE`, falling back to `docker`.
    pub fn from_env() -> Self {
        let program = match std::env::var(ENGINE_ENV) {
            Ok(p) if !p.trim().is_empty() => p,
            _ => DEFAULT_ENGINE.to_owned(),
        };
        Self::new(program)
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    fn not_found(&self, source: std::io::Error) -> EngineError {
        EngineError::NotFound {
            program: self.program.clone(),
            source,
        }
    }
}

impl EngineExecutor for RealExecutor {
    async fn exec(&self, args: &[String]) -> Result<String, EngineError> {
        use std::process::Stdio;

        tracing::debug!(program = %self.program, ?args, "exec");
        let output = tokio::process::Command::new(&self.program)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| self.not_found(e))?;

        if output.status.success() {
            String::from_utf8(output.stdout).map_err(|e| EngineError::InvalidUtf8 {
                program: self.program.clone(),
                source: e,
            })
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            Err(EngineError::CommandFailed {
                program: self.program.clone(),
                args: args.to_vec(),
                status: output.status.code(),
                stderr,
            })
        }
    }

    async fn exec_streaming(&self, args: &[String]) -> Result<(), EngineError> {
        use std::process::Stdio;

        tracing::debug!(program = %self.program, ?args, "exec (streaming)");
        let status = tokio::process::Command::new(&self.program)
            .args(args)
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await
            .map_err(|e| self.not_found(e))?;

        if status.success() {
            Ok(())
        } else {
            Err(EngineError::CommandFailed {
                program: self.program.clone(),
                args: args.to_vec(),
                status: status.code(),
                stderr: format!("exit code: {status}"),
            })
        }
    }
}
