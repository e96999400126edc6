use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::runtime::{self, ExecutionMode};

/// berth.toml configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BerthConfig {
    #[serde(default)]
    pub app: AppConfig,
    #[serde(default)]
    pub build: BuildConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Image name (defaults to the project directory name)
    pub name: Option<String>,
    /// Entrypoint module exported as FLASK_APP
    #[serde(default = "default_entrypoint")]
    pub entrypoint: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Interpreter base image
    #[serde(default = "default_base_image")]
    pub base_image: String,
    /// OS packages installed via apt-get before the dependency layer
    #[serde(default = "default_system_packages")]
    pub system_packages: Vec<String>,
    /// Dependency manifest, relative to the project root
    #[serde(default = "default_manifest")]
    pub manifest: String,
    /// Working directory inside the image
    #[serde(default = "default_workdir")]
    pub workdir: String,
    /// Additional static environment variables baked into the image.
    /// Must not shadow the runtime variables.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Bind host exported as FLASK_RUN_HOST
    #[serde(default = "default_host")]
    pub host: String,
    /// Bind port exported as FLASK_RUN_PORT; also the EXPOSE'd port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Execution mode exported as FLASK_ENV
    #[serde(default)]
    pub mode: ExecutionMode,
    /// Foreground command run when the container starts
    #[serde(default = "default_command")]
    pub command: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: None,
            entrypoint: default_entrypoint(),
        }
    }
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            base_image: default_base_image(),
            system_packages: default_system_packages(),
            manifest: default_manifest(),
            workdir: default_workdir(),
            env: BTreeMap::new(),
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            mode: ExecutionMode::default(),
            command: default_command(),
        }
    }
}

impl BerthConfig {
    /// Load from berth.toml at the given path, or return defaults if not found.
    ///
    /// The loaded config is validated before it is returned.
    pub fn load(project_dir: &Path) -> crate::Result<Self> {
        let config_path = project_dir.join("berth.toml");
        let config = if config_path.exists() {
            let content =
                std::fs::read_to_string(&config_path).map_err(|e| crate::Error::ConfigLoad {
                    path: config_path.clone(),
                    source: e,
                })?;
            toml::from_str(&content).map_err(|e| crate::Error::ConfigParse {
                path: config_path,
                source: e,
            })?
        } else {
            tracing::debug!(dir = %project_dir.display(), "no berth.toml, using defaults");
            Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.app.entrypoint.trim().is_empty() {
            return Err(invalid("app.entrypoint", "must not be empty"));
        }
        if self.build.base_image.trim().is_empty() {
            return Err(invalid("build.base_image", "must not be empty"));
        }
        if self.build.manifest.trim().is_empty() {
            return Err(invalid("build.manifest", "must not be empty"));
        }
        if !self.build.workdir.starts_with('/') {
            return Err(invalid("build.workdir", "must be an absolute path"));
        }
        if self.runtime.host.trim().is_empty() {
            return Err(invalid("runtime.host", "must not be empty"));
        }
        if self.runtime.port == 0 {
            return Err(invalid("runtime.port", "must be between 1 and 65535"));
        }
        if self.runtime.command.is_empty() || self.runtime.command[0].trim().is_empty() {
            return Err(invalid("runtime.command", "must name a program"));
        }
        if let Some(key) = self
            .build
            .env
            .keys()
            .find(|k| runtime::VARIABLES.contains(&k.as_str()))
        {
            return Err(crate::Error::ReservedEnvVar { key: key.clone() });
        }
        if self.build.env.values().any(|v| v.contains(['\n', '\r'])) {
            return Err(invalid("build.env", "values must be a single line"));
        }
        Ok(())
    }

    /// Image name: `[app].name`, or the project directory name lowercased.
    pub fn image_name(&self, project_dir: &Path) -> String {
        if let Some(name) = &self.app.name {
            return name.clone();
        }
        let resolved = match project_dir.canonicalize() {
            Ok(path) => path,
            Err(e) => {
                tracing::debug!(error = %e, dir = %project_dir.display(), "cannot resolve project dir");
                project_dir.to_path_buf()
            }
        };
        let dir_name = resolved
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "app".to_owned());
        sanitize_image_name(&dir_name)
    }
}

/// Lowercases and replaces characters Docker rejects in repository names.
fn sanitize_image_name(raw: &str) -> String {
    let cleaned: String = raw
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '-'
            }
        })
        .collect();
    let trimmed = cleaned.trim_matches(|c: char| !c.is_ascii_alphanumeric());
    if trimmed.is_empty() {
        "app".to_owned()
    } else {
        trimmed.to_owned()
    }
}

fn invalid(field: &'static str, reason: &str) -> crate::Error {
    crate::Error::InvalidConfig {
        field,
        reason: reason.to_owned(),
    }
}

fn default_entrypoint() -> String {
    "app.py".to_owned()
}

fn default_base_image() -> String {
    "python:3.11-slim".to_owned()
}

fn default_system_packages() -> Vec<String> {
    vec!["gcc".to_owned(), "sqlite3".to_owned()]
}

fn default_manifest() -> String {
    "requirements.txt".to_owned()
}

fn default_workdir() -> String {
    "/app".to_owned()
}

fn default_host() -> String {
    "0.0.0.0".to_owned()
}

fn default_port() -> u16 {
    5000
}

fn default_command() -> Vec<String> {
    vec!["flask".to_owned(), "run".to_owned()]
}
