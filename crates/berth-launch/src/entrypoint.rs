use std::path::{Path, PathBuf};

/// Resolve a `FLASK_APP` value to the file or package it names.
///
/// Accepted forms: a script path (`app.py`, `src/app.py`), a module
/// (`app`, `shop.web`), or either followed by `:factory`. A module resolves to
/// `<module>.py` first, then to a package directory.
pub fn resolve(workdir: &Path, flask_app: &str) -> Option<PathBuf> {
    let target = match flask_app.split_once(':') {
        Some((target, _attr)) => target,
        None => flask_app,
    }
    .trim();

    if target.is_empty() {
        return None;
    }

    if target.ends_with(".py") || target.contains('/') {
        let path = workdir.join(target);
        return path.is_file().then_some(path);
    }

    let relative: PathBuf = target.split('.').collect();
    let module = workdir.join(&relative).with_extension("py");
    if module.is_file() {
        return Some(module);
    }
    let package = workdir.join(&relative);
    package.is_dir().then_some(package)
}
