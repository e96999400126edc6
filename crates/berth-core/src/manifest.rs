//! Dependency manifest (`requirements.txt`) parsing.
//!
//! The manifest is the only input of the dependency-install layer, so berth
//! parses it up front: a malformed or self-conflicting manifest fails the
//! build before any container engine work starts. Resolution against the
//! package index is still the installer's job inside the image.
//!
//! Supported line forms:
//!
//! ```text
//! flask==3.0.3               # pinned
//! requests>=2.31,<3          # ranged
//! uvicorn[standard]~=0.30    # extras
//! pywin32 ; sys_platform == "win32"
//! mypkg @ https://example.com/mypkg.whl
//! flask==3.0.3 --hash=sha256:…  # per-requirement options
//! ./vendor/mypkg-1.0-py3-none-any.whl
//! -r base.txt                # installer options are kept verbatim
//! ```

use std::path::Path;

use sha2::{Digest, Sha256};

/// Version comparison operators accepted in a constraint clause,
/// longest first so `===` is not read as `==`.
const OPERATORS: &[&str] = &["===", "==", "~=", "!=", ">=", "<=", ">", "<"];

/// One library dependency declared in the manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    /// Package name as written
    pub name: String,
    /// Optional extras, e.g. `["standard"]` for `uvicorn[standard]`
    pub extras: Vec<String>,
    /// Version constraint (`>=2.31,<3`) or direct reference (`@ https://…`)
    pub constraint: Option<String>,
    /// Environment marker after `;`
    pub marker: Option<String>,
    /// Per-requirement installer options (`--hash=…`), kept verbatim
    pub options: Vec<String>,
    /// 1-based line number of the requirement's first physical line
    pub line: usize,
}

impl Requirement {
    /// Name normalized for comparison: lowercase, runs of `-_.` become `-`.
    pub fn normalized_name(&self) -> String {
        normalize(&self.name)
    }
}

/// Parsed dependency manifest, in file order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub requirements: Vec<Requirement>,
    /// Installer option lines (`-r`, `--index-url`, …) and bare path or
    /// URL requirements, kept verbatim
    pub options: Vec<String>,
    digest: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ManifestError {
    #[error("line {line}: invalid package name in {text:?}")]
    InvalidName { line: usize, text: String },

    #[error("line {line}: unterminated extras list")]
    UnclosedExtras { line: usize },

    #[error("line {line}: invalid version constraint {clause:?}")]
    InvalidConstraint { line: usize, clause: String },

    #[error("line {line}: {name} is already required on line {first}")]
    Duplicate {
        name: String,
        first: usize,
        line: usize,
    },
}

impl Manifest {
    /// Read and parse the manifest at `path`.
    pub fn load(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| crate::Error::ManifestRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::parse(&content).map_err(|e| crate::Error::ManifestInvalid {
            path: path.to_path_buf(),
            source: e,
        })
    }

    pub fn parse(content: &str) -> Result<Self, ManifestError> {
        let mut requirements: Vec<Requirement> = Vec::new();
        let mut options = Vec::new();

        for (line_no, logical) in logical_lines(content) {
            let text = strip_comment(&logical).trim();
            if text.is_empty() {
                continue;
            }
            if text.starts_with('-') || is_path_or_url(text) {
                options.push(text.to_owned());
                continue;
            }

            let requirement = parse_requirement(text, line_no)?;
            let normalized = requirement.normalized_name();
            if let Some(first) = requirements
                .iter()
                .find(|r| r.normalized_name() == normalized)
            {
                return Err(ManifestError::Duplicate {
                    name: requirement.name,
                    first: first.line,
                    line: line_no,
                });
            }
            requirements.push(requirement);
        }

        tracing::debug!(
            requirements = requirements.len(),
            options = options.len(),
            "parsed dependency manifest"
        );

        Ok(Self {
            requirements,
            options,
            digest: sha256_hex(content.as_bytes()),
        })
    }

    /// SHA-256 of the raw manifest bytes, hex encoded.
    ///
    /// This is the only content input of the dependency-install layer's
    /// cache key.
    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty() && self.options.is_empty()
    }
}

/// Joins backslash-continued physical lines, yielding each logical line with
/// the number of its first physical line.
fn logical_lines(content: &str) -> Vec<(usize, String)> {
    let mut out = Vec::new();
    let mut pending: Option<(usize, String)> = None;

    for (idx, raw) in content.lines().enumerate() {
        let (start, mut buf) = pending.take().unwrap_or((idx + 1, String::new()));
        match raw.strip_suffix('\\') {
            Some(head) => {
                buf.push_str(head);
                pending = Some((start, buf));
            }
            None => {
                buf.push_str(raw);
                out.push((start, buf));
            }
        }
    }
    if let Some(last) = pending {
        out.push(last);
    }
    out
}

/// A `#` starts a comment at line start or after whitespace; inside a URL
/// fragment (`…whl#sha256=`) it does not.
fn strip_comment(line: &str) -> &str {
    if line.trim_start().starts_with('#') {
        return "";
    }
    let bytes = line.as_bytes();
    for (i, b) in bytes.iter().enumerate() {
        if *b == b'#' && i > 0 && bytes[i - 1].is_ascii_whitespace() {
            return &line[..i];
        }
    }
    line
}

/// Lines pip installs from a local path or URL instead of by name.
fn is_path_or_url(text: &str) -> bool {
    let head = text.split_whitespace().next().unwrap_or_default();
    head.starts_with('.')
        || head.starts_with('/')
        || head.starts_with('~')
        || head.contains("://")
        || head.starts_with("file:")
        || (!head.contains('@') && head.contains('/'))
        || [".whl", ".tar.gz", ".zip"].iter().any(|ext| head.ends_with(ext))
}

/// Splits `flask==3.0.3 --hash=sha256:…` at the first whitespace-led `--`.
fn split_options(text: &str) -> (&str, Vec<String>) {
    let bytes = text.as_bytes();
    let start = (1..bytes.len())
        .find(|&i| bytes[i - 1].is_ascii_whitespace() && text[i..].starts_with("--"));
    match start {
        Some(i) => (
            text[..i].trim_end(),
            text[i..].split_whitespace().map(str::to_owned).collect(),
        ),
        None => (text, Vec::new()),
    }
}

fn parse_requirement(text: &str, line: usize) -> Result<Requirement, ManifestError> {
    let (text, options) = split_options(text);
    let (spec, marker) = match text.split_once(';') {
        Some((spec, marker)) => (spec.trim(), Some(marker.trim().to_owned())),
        None => (text, None),
    };

    let name_len = spec
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-'))
        .unwrap_or(spec.len());
    let name = &spec[..name_len];
    if !is_valid_name(name) {
        return Err(ManifestError::InvalidName {
            line,
            text: text.to_owned(),
        });
    }

    let mut rest = spec[name_len..].trim_start();
    let mut extras = Vec::new();
    if let Some(after) = rest.strip_prefix('[') {
        let close = after
            .find(']')
            .ok_or(ManifestError::UnclosedExtras { line })?;
        for extra in after[..close].split(',').map(str::trim) {
            if !is_valid_name(extra) {
                return Err(ManifestError::InvalidName {
                    line,
                    text: text.to_owned(),
                });
            }
            extras.push(extra.to_owned());
        }
        rest = after[close + 1..].trim_start();
    }

    let constraint = if rest.is_empty() {
        None
    } else if let Some(url) = rest.strip_prefix('@') {
        let url = url.trim();
        if url.is_empty() {
            return Err(ManifestError::InvalidConstraint {
                line,
                clause: rest.to_owned(),
            });
        }
        Some(format!("@ {url}"))
    } else {
        Some(parse_constraint(rest, line)?)
    };

    Ok(Requirement {
        name: name.to_owned(),
        extras,
        constraint,
        marker,
        options,
        line,
    })
}

/// Validates each comma-separated clause and returns the constraint with
/// interior whitespace removed, e.g. `>= 2.31 , <3` becomes `>=2.31,<3`.
fn parse_constraint(raw: &str, line: usize) -> Result<String, ManifestError> {
    // Legacy parenthesized form: `name (>=1.0)`
    let raw = raw
        .strip_prefix('(')
        .and_then(|r| r.strip_suffix(')'))
        .unwrap_or(raw);

    let mut clauses = Vec::new();
    for clause in raw.split(',') {
        let clause = clause.trim();
        let op = OPERATORS
            .iter()
            .find(|op| clause.starts_with(**op))
            .ok_or_else(|| ManifestError::InvalidConstraint {
                line,
                clause: clause.to_owned(),
            })?;
        let version = clause[op.len()..].trim();
        let version_ok = !version.is_empty()
            && version
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '*' | '+' | '!' | '-' | '_'));
        if !version_ok {
            return Err(ManifestError::InvalidConstraint {
                line,
                clause: clause.to_owned(),
            });
        }
        clauses.push(format!("{op}{version}"));
    }
    Ok(clauses.join(","))
}

fn is_valid_name(name: &str) -> bool {
    let bytes = name.as_bytes();
    match (bytes.first(), bytes.last()) {
        (Some(first), Some(last)) => {
            first.is_ascii_alphanumeric()
                && last.is_ascii_alphanumeric()
                && bytes
                    .iter()
                    .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'))
        }
        _ => false,
    }
}

fn normalize(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut in_sep = false;
    for c in name.chars() {
        if matches!(c, '-' | '_' | '.') {
            if !in_sep {
                out.push('-');
            }
            in_sep = true;
        } else {
            out.push(c.to_ascii_lowercase());
            in_sep = false;
        }
    }
    out
}

pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_separator_runs() {
        assert_eq!(normalize("Flask_SQLAlchemy"), "flask-sqlalchemy");
        assert_eq!(normalize("zope..interface"), "zope-interface");
    }

    #[test]
    fn splits_per_requirement_options() {
        let (text, options) = split_options("flask==3.0.3   --hash=sha256:aa --hash=sha256:bb");
        assert_eq!(text, "flask==3.0.3");
        assert_eq!(options, vec!["--hash=sha256:aa", "--hash=sha256:bb"]);

        let (text, options) = split_options("flask-login>=0.6");
        assert_eq!(text, "flask-login>=0.6");
        assert!(options.is_empty());
    }

    #[test]
    fn recognizes_path_and_url_lines() {
        assert!(is_path_or_url("./vendor/mypkg-1.0-py3-none-any.whl"));
        assert!(is_path_or_url("vendor/mypkg.tar.gz"));
        assert!(is_path_or_url("https://example.com/mypkg.zip"));
        assert!(is_path_or_url("git+https://github.com/org/repo.git#egg=repo"));
        assert!(!is_path_or_url("mypkg @ https://example.com/mypkg.whl"));
        assert!(!is_path_or_url("Flask==3.0.3"));
    }

    #[test]
    fn comment_after_url_fragment_is_kept() {
        assert_eq!(
            strip_comment("pkg @ https://x/pkg.whl#sha256=abc  # note"),
            "pkg @ https://x/pkg.whl#sha256=abc  "
        );
    }

    mod proptests {
        use super::super::*;
        use proptest::prelude::*;

        fn package_name() -> impl Strategy<Value = String> {
            "[a-zA-Z][a-zA-Z0-9_.-]{0,20}[a-zA-Z0-9]"
        }

        fn version() -> impl Strategy<Value = String> {
            "[0-9]{1,3}(\\.[0-9]{1,3}){0,2}"
        }

        proptest! {
            #[test]
            fn pinned_requirement_keeps_name_and_version(
                name in package_name(),
                version in version(),
            ) {
                let manifest = Manifest::parse(&format!("{name}=={version}\n")).unwrap();
                prop_assert_eq!(manifest.requirements.len(), 1);
                prop_assert_eq!(&manifest.requirements[0].name, &name);
                let expected = format!("=={version}");
                prop_assert_eq!(manifest.requirements[0].constraint.as_deref(), Some(expected.as_str()));
            }

            #[test]
            fn digest_tracks_content(a in "[a-z]{1,10}", b in "[a-z]{1,10}") {
                let left = Manifest::parse(&a).unwrap();
                let right = Manifest::parse(&b).unwrap();
                prop_assert_eq!(left.digest() == right.digest(), a == b);
            }
        }
    }
}
