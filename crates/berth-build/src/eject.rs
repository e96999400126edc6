//! Ejected Dockerfile at `.berth/Dockerfile`.
//!
//! Ejecting hands the Dockerfile to the project: `berth build` then uses the
//! file as written instead of rendering one from the plan. The first line is
//! a stamp with the image key of the plan it was rendered from, so a build can
//! tell when `berth.toml` or the manifest changed after the eject.
//!
//! Edits are free-form, but an ejected file must still start from a base
//! image and expose the port the runtime configuration binds.

use std::path::{Path, PathBuf};

use crate::plan::ImagePlan;

const STAMP_PREFIX: &str = "# berth eject: plan ";

/// Location of the ejected Dockerfile inside `project_dir`.
pub fn ejected_path(project_dir: &Path) -> PathBuf {
    project_dir.join(".berth").join("Dockerfile")
}

/// Writes `dockerfile` to `.berth/Dockerfile`, stamped with the plan's
/// image key. Refuses to overwrite an earlier eject.
pub fn eject(project_dir: &Path, plan: &ImagePlan, dockerfile: &str) -> Result<PathBuf, EjectError> {
    let dockerfile_path = ejected_path(project_dir);
    if dockerfile_path.exists() {
        return Err(EjectError::AlreadyEjected(dockerfile_path));
    }

    let berth_dir = project_dir.join(".berth");
    std::fs::create_dir_all(&berth_dir).map_err(|e| EjectError::CreateDir {
        path: berth_dir.clone(),
        source: e,
    })?;

    let content = format!("{STAMP_PREFIX}{}\n{dockerfile}", plan.image_key());
    std::fs::write(&dockerfile_path, content).map_err(|e| EjectError::Write {
        path: dockerfile_path.clone(),
        source: e,
    })?;

    tracing::info!(path = %dockerfile_path.display(), key = plan.image_key(), "ejected Dockerfile");
    Ok(dockerfile_path)
}

/// Check if the project has an ejected Dockerfile.
pub fn is_ejected(project_dir: &Path) -> bool {
    ejected_path(project_dir).exists()
}

/// An ejected Dockerfile checked against the current plan.
#[derive(Debug, Clone)]
pub struct EjectedDockerfile {
    pub content: String,
    /// Plan key from the stamp line; `None` when the stamp was removed
    pub stamped_key: Option<String>,
    /// Whether the current plan differs from the one that was ejected
    pub stale: bool,
}

/// Load `.berth/Dockerfile` and check it against `plan`.
///
/// Fails when the file has no `FROM` or exposes a port other than the one
/// the plan binds. A missing or outdated stamp only marks it stale.
pub fn load_ejected(project_dir: &Path, plan: &ImagePlan) -> Result<EjectedDockerfile, EjectError> {
    let path = ejected_path(project_dir);
    let content = std::fs::read_to_string(&path).map_err(|e| EjectError::Read {
        path: path.clone(),
        source: e,
    })?;

    if !instructions(&content).any(|(op, _)| op == "FROM") {
        return Err(EjectError::NoBaseImage { path });
    }

    if let Some(port) = plan.exposed_port() {
        let exposed = exposed_ports(&content);
        if let Some(other) = exposed.iter().find(|p| **p != port) {
            return Err(EjectError::PortMismatch {
                path,
                exposed: *other,
                port,
            });
        }
        if exposed.is_empty() {
            tracing::warn!(port, "ejected Dockerfile does not EXPOSE the application port");
        }
    }

    let stamped_key = content
        .lines()
        .next()
        .and_then(|line| line.strip_prefix(STAMP_PREFIX))
        .map(|key| key.trim().to_owned());
    let stale = stamped_key.as_deref() != Some(plan.image_key());

    Ok(EjectedDockerfile {
        content,
        stamped_key,
        stale,
    })
}

/// `(KEYWORD, arguments)` for each instruction line, comments skipped.
fn instructions(content: &str) -> impl Iterator<Item = (String, &str)> {
    content.lines().filter_map(|line| {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return None;
        }
        let (op, args) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        Some((op.to_ascii_uppercase(), args.trim()))
    })
}

/// Numeric ports named by `EXPOSE` lines (`5000`, `5000/tcp`). Ports given
/// through build arguments cannot be checked and are skipped.
fn exposed_ports(content: &str) -> Vec<u16> {
    instructions(content)
        .filter(|(op, _)| op == "EXPOSE")
        .flat_map(|(_, args)| args.split_whitespace())
        .filter_map(|word| {
            let port = word.split('/').next().unwrap_or(word);
            match port.parse::<u16>() {
                Ok(port) => Some(port),
                Err(e) => {
                    tracing::debug!(word, error = %e, "skipping non-numeric EXPOSE");
                    None
                }
            }
        })
        .collect()
}

#[derive(Debug, thiserror::Error)]
pub enum EjectError {
    #[error("failed to create .berth directory at {path}")]
    CreateDir {
        path: std::path::PathBuf,
        source: std::io::Error,
    },
    #[error("Dockerfile already ejected at {0}; edit it directly or delete it to re-eject")]
    AlreadyEjected(std::path::PathBuf),
    #[error("failed to write {path}")]
    Write {
        path: std::path::PathBuf,
        source: std::io::Error,
    },
    #[error("failed to read ejected Dockerfile at {path}")]
    Read {
        path: std::path::PathBuf,
        source: std::io::Error,
    },
    #[error("ejected Dockerfile {path} has no FROM instruction")]
    NoBaseImage { path: std::path::PathBuf },
    #[error(
        "ejected Dockerfile {path} exposes port {exposed} but [runtime].port is {port}; \
         update EXPOSE or the port so they agree"
    )]
    PortMismatch {
        path: std::path::PathBuf,
        exposed: u16,
        port: u16,
    },
}
