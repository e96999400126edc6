use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to load config from {path}")]
    ConfigLoad {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config at {path}")]
    ConfigParse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid config value for `{field}`: {reason}")]
    InvalidConfig { field: &'static str, reason: String },

    #[error(
        "[build.env] must not set {key}; runtime variables are derived from [app] and [runtime]"
    )]
    ReservedEnvVar { key: String },

    // ── Dependency manifest ──
    #[error("failed to read dependency manifest at {path}")]
    ManifestRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{path}: {source}")]
    ManifestInvalid {
        path: PathBuf,
        source: crate::manifest::ManifestError,
    },

    // ── Runtime environment ──
    #[error("required environment variable {0} is not set")]
    MissingEnvVar(&'static str),

    #[error("environment variable {key} has invalid value {value:?}: {reason}")]
    InvalidEnvVar {
        key: String,
        value: String,
        reason: &'static str,
    },

    #[error("unknown runtime variable {0}; only FLASK_APP, FLASK_RUN_HOST, FLASK_RUN_PORT and FLASK_ENV may be overridden")]
    UnknownOverride(String),
}
