use std::path::{Path, PathBuf};
use std::process::Command;

use walkdir::WalkDir;

/// Files/directories that berth always excludes from bundles,
/// regardless of .gitignore content.
const BERTH_EXCLUDES: &[&str] = &[".berth-bundle", ".berth", ".git"];

/// Paths berth writes into the project on every build.
const GENERATED_STATE: &[&str] = &[".berth-bundle/", ".berth/layers.json"];

/// Root-level files the bundle writes itself.
const GENERATED: &[&str] = &["Dockerfile", ".dockerignore"];

/// Directory and file names skipped when the project is not a git
/// repository and there is no .gitignore to consult.
const WALK_SKIP_DIRS: &[&str] = &["__pycache__", ".venv", "venv", ".pytest_cache", ".mypy_cache"];
const WALK_SKIP_EXTS: &[&str] = &["pyc", "pyo"];

/// Lists the files that make up the build context, relative to `project_dir`.
///
/// Inside a git repository this is `git ls-files` (tracked plus untracked
/// files that are not ignored). Otherwise the directory is walked, skipping
/// interpreter caches and virtualenvs. The result is sorted.
pub fn bundle_files(project_dir: &Path) -> Result<Vec<PathBuf>, BundleError> {
    let mut files = if is_git_repo(project_dir) {
        git_ls_files(project_dir)?
    } else {
        walk_files(project_dir)?
    };

    files.retain(|relative_path| {
        !BERTH_EXCLUDES
            .iter()
            .any(|ex| relative_path.starts_with(ex))
            && !GENERATED.iter().any(|g| relative_path == Path::new(g))
            && project_dir.join(relative_path).is_file()
    });
    files.sort();
    files.dedup();

    tracing::debug!(count = files.len(), "collected build context files");
    Ok(files)
}

/// Bundles project files into `.berth-bundle/` as the engine build context.
///
/// The generated Dockerfile and .dockerignore are written into the bundle.
pub fn create_bundle(
    project_dir: &Path,
    files: &[PathBuf],
    dockerfile_content: &str,
    dockerignore_content: &str,
) -> Result<PathBuf, BundleError> {
    let bundle_dir = project_dir.join(".berth-bundle");

    // Clean previous bundle
    if bundle_dir.exists() {
        std::fs::remove_dir_all(&bundle_dir).map_err(|e| BundleError::Cleanup {
            path: bundle_dir.clone(),
            source: e,
        })?;
    }
    std::fs::create_dir_all(&bundle_dir).map_err(|e| BundleError::Create {
        path: bundle_dir.clone(),
        source: e,
    })?;

    for relative_path in files {
        let src = project_dir.join(relative_path);
        let dst = bundle_dir.join(relative_path);

        if let Some(parent) = dst.parent() {
            std::fs::create_dir_all(parent).map_err(|e| BundleError::Create {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        std::fs::copy(&src, &dst).map_err(|e| BundleError::CopyFile {
            path: src,
            source: e,
        })?;
    }

    for (name, content) in [
        ("Dockerfile", dockerfile_content),
        (".dockerignore", dockerignore_content),
    ] {
        let path = bundle_dir.join(name);
        std::fs::write(&path, content).map_err(|e| BundleError::WriteGenerated {
            path: path.clone(),
            source: e,
        })?;
    }

    tracing::debug!(dir = %bundle_dir.display(), files = files.len(), "bundle created");
    Ok(bundle_dir)
}

/// Removes `.berth-bundle/` if present. Returns whether anything was removed.
pub fn remove_bundle(project_dir: &Path) -> Result<bool, BundleError> {
    let bundle_dir = project_dir.join(".berth-bundle");
    if !bundle_dir.exists() {
        return Ok(false);
    }
    std::fs::remove_dir_all(&bundle_dir).map_err(|e| BundleError::Cleanup {
        path: bundle_dir,
        source: e,
    })?;
    Ok(true)
}

pub fn is_git_repo(project_dir: &Path) -> bool {
    project_dir.join(".git").exists()
}

/// Returns the list of files git considers part of the project:
/// tracked files + untracked files that are not .gitignored.
fn git_ls_files(project_dir: &Path) -> Result<Vec<PathBuf>, BundleError> {
    let output = Command::new("git")
        .args(["ls-files", "-z", "--cached", "--others", "--exclude-standard"])
        .current_dir(project_dir)
        .output()
        .map_err(|e| BundleError::GitCommand {
            detail: "failed to execute git ls-files".to_owned(),
            source: e,
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(BundleError::GitFailed {
            detail: format!(
                "git ls-files exited with {}: {}",
                output.status,
                stderr.trim()
            ),
        });
    }

    // NUL-separated so non-ASCII names come through unquoted
    let files: Vec<PathBuf> = output
        .stdout
        .split(|b| *b == 0)
        .filter(|entry| !entry.is_empty())
        .map(|entry| PathBuf::from(String::from_utf8_lossy(entry).into_owned()))
        .collect();

    Ok(files)
}

fn walk_files(project_dir: &Path) -> Result<Vec<PathBuf>, BundleError> {
    let mut files = Vec::new();
    let walker = WalkDir::new(project_dir).into_iter().filter_entry(|entry| {
        let name = entry.file_name().to_string_lossy();
        !(entry.depth() > 0
            && entry.file_type().is_dir()
            && WALK_SKIP_DIRS.contains(&name.as_ref()))
    });

    for entry in walker {
        let entry = entry.map_err(|e| BundleError::Walk {
            path: project_dir.to_path_buf(),
            source: e,
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let skipped_ext = entry
            .path()
            .extension()
            .is_some_and(|ext| WALK_SKIP_EXTS.iter().any(|s| ext == *s));
        if skipped_ext {
            continue;
        }
        match entry.path().strip_prefix(project_dir) {
            Ok(relative) => files.push(relative.to_path_buf()),
            Err(e) => {
                tracing::warn!(path = %entry.path().display(), error = %e, "skipping file outside project");
            }
        }
    }
    Ok(files)
}

/// Checks whether the git working tree has uncommitted changes.
///
/// berth's own outputs (the bundle and the layer ledger) do not count.
pub fn is_dirty(project_dir: &Path) -> Result<bool, BundleError> {
    let output = Command::new("git")
        .args(["status", "--porcelain", "--untracked-files=all"])
        .current_dir(project_dir)
        .output()
        .map_err(|e| BundleError::GitCommand {
            detail: "failed to execute git status".to_owned(),
            source: e,
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(BundleError::GitFailed {
            detail: format!(
                "git status exited with {}: {}",
                output.status,
                stderr.trim()
            ),
        });
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let dirty = stdout
        .lines()
        .filter_map(|line| line.get(3..))
        .any(|path| !GENERATED_STATE.iter().any(|g| path.starts_with(g)));
    Ok(dirty)
}

#[derive(Debug, thiserror::Error)]
pub enum BundleError {
    #[error("failed to clean up bundle directory {path}")]
    Cleanup {
        path: std::path::PathBuf,
        source: std::io::Error,
    },
    #[error("failed to create directory {path}")]
    Create {
        path: std::path::PathBuf,
        source: std::io::Error,
    },
    #[error("failed to copy file {path}")]
    CopyFile {
        path: std::path::PathBuf,
        source: std::io::Error,
    },
    #[error("failed to write {path}")]
    WriteGenerated {
        path: std::path::PathBuf,
        source: std::io::Error,
    },
    #[error("failed to walk project directory {path}")]
    Walk {
        path: std::path::PathBuf,
        source: walkdir::Error,
    },
    #[error("git command failed: {detail}")]
    GitCommand {
        detail: String,
        source: std::io::Error,
    },
    #[error("git failed: {detail}")]
    GitFailed { detail: String },
}
