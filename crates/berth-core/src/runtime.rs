//! Runtime environment contract between the image and the launcher.
//!
//! The image bakes four variables in with `ENV`; the launcher reads them back
//! once at process start. Deployers override values at container start by
//! injecting the same variable names, never through command-line flags.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::BerthConfig;

/// Entrypoint module.
pub const FLASK_APP: &str = "FLASK_APP";
/// Bind host.
pub const FLASK_RUN_HOST: &str = "FLASK_RUN_HOST";
/// Bind port.
pub const FLASK_RUN_PORT: &str = "FLASK_RUN_PORT";
/// Execution mode.
pub const FLASK_ENV: &str = "FLASK_ENV";

/// All runtime variables, in the order they are emitted.
pub const VARIABLES: [&str; 4] = [FLASK_APP, FLASK_RUN_HOST, FLASK_RUN_PORT, FLASK_ENV];

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 5000;

/// Development vs production behavior of the wrapped framework.
///
/// berth only carries the value; what each mode changes is up to the
/// application framework.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    #[default]
    Production,
    Development,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Production => "production",
            Self::Development => "development",
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionMode {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Ok(Self::Production),
            "development" | "dev" => Ok(Self::Development),
            _ => Err("expected `production` or `development`"),
        }
    }
}

/// Validated view of the four runtime variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeEnv {
    pub entrypoint: String,
    pub host: String,
    pub port: u16,
    pub mode: ExecutionMode,
}

impl RuntimeEnv {
    /// Values baked into the image for the given configuration.
    pub fn from_config(config: &BerthConfig) -> Self {
        Self {
            entrypoint: config.app.entrypoint.clone(),
            host: config.runtime.host.clone(),
            port: config.runtime.port,
            mode: config.runtime.mode,
        }
    }

    /// Read the variables from the process environment.
    ///
    /// `FLASK_APP` is required; host, port and mode fall back to the
    /// image defaults.
    pub fn from_env() -> crate::Result<Self> {
        // arch-lint: allow(no-silent-result-drop) reason="an unset or non-UTF-8 variable falls back to its default"
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable lookup.
    pub fn from_lookup<F>(lookup: F) -> crate::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let entrypoint = lookup(FLASK_APP)
            .filter(|v| !v.trim().is_empty())
            .ok_or(crate::Error::MissingEnvVar(FLASK_APP))?;

        let host = match lookup(FLASK_RUN_HOST) {
            Some(h) if h.trim().is_empty() => {
                return Err(invalid_var(FLASK_RUN_HOST, &h, "must not be empty"));
            }
            Some(h) => h,
            None => DEFAULT_HOST.to_owned(),
        };

        let port = match lookup(FLASK_RUN_PORT) {
            Some(raw) => parse_port(&raw)?,
            None => DEFAULT_PORT,
        };

        let mode = match lookup(FLASK_ENV) {
            Some(raw) => raw
                .parse()
                .map_err(|reason| invalid_var(FLASK_ENV, &raw, reason))?,
            None => ExecutionMode::default(),
        };

        Ok(Self {
            entrypoint,
            host,
            port,
            mode,
        })
    }

    /// Apply start-time overrides (`KEY=VALUE` pairs already split).
    ///
    /// Only the four runtime variables are accepted; values are validated
    /// the same way [`from_lookup`](Self::from_lookup) validates them.
    pub fn with_overrides(&self, overrides: &[(String, String)]) -> crate::Result<Self> {
        if let Some((key, _)) = overrides
            .iter()
            .find(|(k, _)| !VARIABLES.contains(&k.as_str()))
        {
            return Err(crate::Error::UnknownOverride(key.clone()));
        }
        let base = self.to_pairs();
        Self::from_lookup(|key| {
            overrides
                .iter()
                .rev()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
                .or_else(|| {
                    base.iter()
                        .find(|(k, _)| *k == key)
                        .map(|(_, v)| v.clone())
                })
        })
    }

    /// `(name, value)` pairs in emission order.
    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        vec![
            (FLASK_APP, self.entrypoint.clone()),
            (FLASK_RUN_HOST, self.host.clone()),
            (FLASK_RUN_PORT, self.port.to_string()),
            (FLASK_ENV, self.mode.to_string()),
        ]
    }
}

/// Split a `KEY=VALUE` override.
pub fn parse_override(raw: &str) -> crate::Result<(String, String)> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_owned(), value.to_owned()))
        }
        _ => Err(invalid_var(raw, raw, "expected KEY=VALUE")),
    }
}

fn parse_port(raw: &str) -> crate::Result<u16> {
    match raw.trim().parse::<u16>() {
        Ok(0) => Err(invalid_var(FLASK_RUN_PORT, raw, "port 0 is not bindable")),
        Ok(port) => Ok(port),
        Err(_) => Err(invalid_var(
            FLASK_RUN_PORT,
            raw,
            "expected an integer between 1 and 65535",
        )),
    }
}

fn invalid_var(key: &str, value: &str, reason: &'static str) -> crate::Error {
    crate::Error::InvalidEnvVar {
        key: key.to_owned(),
        value: value.to_owned(),
        reason,
    }
}

/// Exit codes of a process ended by SIGINT, SIGKILL or SIGTERM from outside
/// (`128 + signal`). A container reporting one of these was stopped.
pub const SIGNAL_EXIT_CODES: [i32; 3] = [130, 137, 143];

/// Lifecycle of the launched process (or the container wrapping it).
///
/// `NotStarted → Running → Stopped | Crashed`. Terminal states are final;
/// nothing here restarts a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ProcessState {
    NotStarted,
    Running,
    /// Terminated by a stop signal or exited cleanly
    Stopped { code: Option<i32> },
    /// Exited non-zero on its own
    Crashed { code: Option<i32> },
}

impl ProcessState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped { .. } | Self::Crashed { .. })
    }

    pub fn can_transition_to(&self, next: &ProcessState) -> bool {
        matches!(
            (self, next),
            (Self::NotStarted, Self::Running)
                | (Self::NotStarted, Self::Crashed { .. })
                | (Self::Running, Self::Stopped { .. })
                | (Self::Running, Self::Crashed { .. })
        )
    }

    /// Classify a process exit. `stopped` is set when berth (or the host)
    /// asked the process to terminate.
    pub fn from_exit(code: Option<i32>, stopped: bool) -> Self {
        if stopped || code == Some(0) {
            Self::Stopped { code }
        } else {
            Self::Crashed { code }
        }
    }

    /// Classify an exit reported by the container engine, where a stop
    /// signal only shows up as a [`SIGNAL_EXIT_CODES`] status.
    pub fn from_container_exit(code: Option<i32>) -> Self {
        let signalled = code.is_some_and(|c| SIGNAL_EXIT_CODES.contains(&c));
        Self::from_exit(code, signalled)
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Stopped { code } | Self::Crashed { code } => *code,
            _ => None,
        }
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotStarted => f.write_str("not started"),
            Self::Running => f.write_str("running"),
            Self::Stopped { code: Some(c) } => write!(f, "stopped (exit {c})"),
            Self::Stopped { code: None } => f.write_str("stopped (signal)"),
            Self::Crashed { code: Some(c) } => write!(f, "crashed (exit {c})"),
            Self::Crashed { code: None } => f.write_str("crashed (signal)"),
        }
    }
}
