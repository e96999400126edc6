//! Ordered layer plan with per-layer cache keys.
//!
//! Each layer's key is `sha256(parent key, instruction text, input digest)`,
//! which mirrors how the container engine decides whether a cached layer can
//! be reused: a changed layer invalidates itself and everything above it,
//! nothing below it.
//!
//! The dependency manifest is the only content input of the install layer,
//! so editing application source leaves [`ImagePlan::dependency_key`]
//! unchanged while editing the manifest changes it.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

use berth_core::{BerthConfig, Manifest, RuntimeEnv};
use serde::Serialize;
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerKind {
    Base,
    Workdir,
    SystemPackages,
    ManifestCopy,
    DependencyInstall,
    SourceCopy,
    Env,
    Expose,
    Command,
}

impl fmt::Display for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Base => "base runtime",
            Self::Workdir => "working directory",
            Self::SystemPackages => "system dependencies",
            Self::ManifestCopy => "dependency manifest",
            Self::DependencyInstall => "language dependencies",
            Self::SourceCopy => "application source",
            Self::Env => "runtime configuration",
            Self::Expose => "exposed port",
            Self::Command => "launch command",
        };
        f.write_str(label)
    }
}

/// One build instruction. `Display` renders the Dockerfile text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Instruction {
    From { image: String },
    Workdir { path: String },
    /// Shell steps chained with `&&` in a single `RUN`
    Run { steps: Vec<String> },
    /// One `COPY <path> <path>` per file, relative to the working directory
    CopyFiles { paths: Vec<String> },
    CopyAll,
    Env { vars: Vec<(String, String)> },
    Expose { port: u16 },
    Cmd { argv: Vec<String> },
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::From { image } => write!(f, "FROM {image}"),
            Self::Workdir { path } => write!(f, "WORKDIR {path}"),
            Self::Run { steps } => write!(f, "RUN {}", steps.join(" \\\n    && ")),
            Self::CopyFiles { paths } => {
                let lines: Vec<String> = paths.iter().map(|p| copy_line(p)).collect();
                f.write_str(&lines.join("\n"))
            }
            Self::CopyAll => f.write_str("COPY . ."),
            Self::Env { vars } => {
                let pairs: Vec<String> = vars
                    .iter()
                    .map(|(k, v)| format!("{k}={}", quote_env_value(v)))
                    .collect();
                write!(f, "ENV {}", pairs.join(" \\\n    "))
            }
            Self::Expose { port } => write!(f, "EXPOSE {port}"),
            Self::Cmd { argv } => {
                let quoted: Vec<String> = argv.iter().map(|a| json_string(a)).collect();
                write!(f, "CMD [{}]", quoted.join(", "))
            }
        }
    }
}

fn copy_line(path: &str) -> String {
    if path.chars().any(char::is_whitespace) {
        format!("COPY [{src}, {src}]", src = json_string(path))
    } else {
        format!("COPY {path} {path}")
    }
}

/// Quotes an `ENV` value so the engine stores it verbatim: inside double
/// quotes `$` would still expand, so it is escaped along with `"` and `\`.
fn quote_env_value(value: &str) -> String {
    let plain = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '/' | ':' | ','));
    if plain {
        return value.to_owned();
    }
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        if matches!(c, '"' | '\\' | '$') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

/// Single-quotes a word for the `RUN` shell unless it is safe bare.
fn shell_quote(word: &str) -> String {
    let plain = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '/' | '+' | '=' | ':'));
    if plain {
        word.to_owned()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

fn json_string(value: &str) -> String {
    serde_json::Value::String(value.to_owned()).to_string()
}

/// A planned layer, before keys are assigned.
#[derive(Debug, Clone)]
pub struct LayerSpec {
    pub kind: LayerKind,
    pub instruction: Instruction,
    /// Digest of the content this layer reads from the build context
    pub input_digest: Option<String>,
}

impl LayerSpec {
    pub fn new(kind: LayerKind, instruction: Instruction) -> Self {
        Self {
            kind,
            instruction,
            input_digest: None,
        }
    }

    pub fn with_input(mut self, digest: impl Into<String>) -> Self {
        self.input_digest = Some(digest.into());
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Layer {
    pub kind: LayerKind,
    pub instruction: Instruction,
    pub input_digest: Option<String>,
    pub cache_key: String,
}

/// Whether the engine can reuse a layer from the previous build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerStatus {
    Cached,
    Rebuild,
}

/// Manifest file set copied ahead of the source: the manifest itself plus
/// any files it pulls in with `-r` / `-c`.
#[derive(Debug, Clone)]
pub struct DependencyInputs {
    pub manifest: Manifest,
    /// `(path relative to project root, sha256)` in copy order
    pub files: Vec<(String, String)>,
}

impl DependencyInputs {
    /// Load the manifest at `manifest_rel` and every file it references.
    ///
    /// Fails when any of them is missing or malformed, so a broken manifest
    /// stops the pipeline before the engine is involved.
    pub fn collect(project_dir: &Path, manifest_rel: &str) -> Result<Self, PlanError> {
        let mut files = Vec::new();
        let mut visited = BTreeSet::new();
        let root = PathBuf::from(manifest_rel);
        let manifest = load_manifest_tree(project_dir, &root, &mut visited, &mut files)?;
        tracing::debug!(
            manifest = manifest_rel,
            files = files.len(),
            "collected dependency inputs"
        );
        Ok(Self { manifest, files })
    }

    pub fn paths(&self) -> Vec<String> {
        self.files.iter().map(|(p, _)| p.clone()).collect()
    }

    /// Combined digest over every manifest file's path and content digest.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for (path, digest) in &self.files {
            hasher.update(path.as_bytes());
            hasher.update([0u8]);
            hasher.update(digest.as_bytes());
            hasher.update([0u8]);
        }
        format!("{:x}", hasher.finalize())
    }
}

fn load_manifest_tree(
    project_dir: &Path,
    rel: &Path,
    visited: &mut BTreeSet<PathBuf>,
    files: &mut Vec<(String, String)>,
) -> Result<Manifest, PlanError> {
    let normalized = normalize_relative(rel).ok_or_else(|| PlanError::ManifestOutsideProject {
        path: rel.to_path_buf(),
    })?;
    let full = project_dir.join(&normalized);
    if !full.is_file() {
        return Err(PlanError::ManifestMissing { path: full });
    }

    let manifest = Manifest::load(&full)?;
    visited.insert(normalized.clone());
    files.push((to_slash(&normalized), manifest.digest().to_owned()));

    let base = normalized.parent().map(Path::to_path_buf).unwrap_or_default();
    for option in &manifest.options {
        if let Some(target) = referenced_file(option) {
            let nested = base.join(target);
            let nested_norm = normalize_relative(&nested).ok_or_else(|| {
                PlanError::ManifestOutsideProject {
                    path: nested.clone(),
                }
            })?;
            if visited.contains(&nested_norm) {
                continue;
            }
            load_manifest_tree(project_dir, &nested_norm, visited, files)?;
        } else if let Some(artifact) = local_artifact(option) {
            let nested = base.join(artifact);
            let nested_norm = normalize_relative(&nested).ok_or_else(|| {
                PlanError::ManifestOutsideProject {
                    path: nested.clone(),
                }
            })?;
            let full = project_dir.join(&nested_norm);
            if full.is_dir() {
                tracing::warn!(
                    path = %full.display(),
                    "local package directory is installed before the source is copied"
                );
                continue;
            }
            if !full.is_file() {
                return Err(PlanError::ArtifactMissing { path: full });
            }
            let content = std::fs::read(&full).map_err(|e| PlanError::SourceRead {
                path: full.clone(),
                source: e,
            })?;
            if visited.insert(nested_norm.clone()) {
                files.push((
                    to_slash(&nested_norm),
                    format!("{:x}", Sha256::digest(&content)),
                ));
            }
        }
    }
    Ok(manifest)
}

/// Local archive or directory installed by a bare path requirement line.
fn local_artifact(option: &str) -> Option<&str> {
    let head = option.split_whitespace().next()?;
    if head.starts_with('-') || head.contains("://") || head.starts_with('~') {
        return None;
    }
    let head = head.strip_prefix("file:").unwrap_or(head);
    (!head.is_empty()).then_some(head)
}

/// File referenced by a `-r` / `-c` style option line.
fn referenced_file(option: &str) -> Option<&str> {
    for flag in ["--requirement", "--constraint"] {
        if let Some(rest) = option.strip_prefix(flag) {
            let rest = rest.strip_prefix('=').unwrap_or(rest).trim();
            return (!rest.is_empty()).then_some(rest);
        }
    }
    for flag in ["-r", "-c"] {
        if let Some(rest) = option.strip_prefix(flag) {
            let rest = rest.trim();
            return (!rest.is_empty()).then_some(rest);
        }
    }
    None
}

/// Resolve `.` and `..` lexically; `None` if the path escapes the root or is
/// absolute.
fn normalize_relative(path: &Path) -> Option<PathBuf> {
    use std::path::Component;

    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    return None;
                }
            }
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    (!out.as_os_str().is_empty()).then_some(out)
}

fn to_slash(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Digest of the build-context files copied by the source layer.
///
/// Paths are sorted so the digest does not depend on listing order.
pub fn source_digest(project_dir: &Path, files: &[PathBuf]) -> Result<String, PlanError> {
    let mut sorted: Vec<&PathBuf> = files.iter().collect();
    sorted.sort();

    let mut hasher = Sha256::new();
    for rel in sorted {
        let full = project_dir.join(rel);
        let content = std::fs::read(&full).map_err(|e| PlanError::SourceRead {
            path: full.clone(),
            source: e,
        })?;
        hasher.update(to_slash(rel).as_bytes());
        hasher.update([0u8]);
        hasher.update((content.len() as u64).to_le_bytes());
        hasher.update(&content);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// The full, validated build pipeline for one image.
#[derive(Debug, Clone, Serialize)]
pub struct ImagePlan {
    layers: Vec<Layer>,
}

impl ImagePlan {
    /// Plan the image for `config`.
    ///
    /// Layer order: base, workdir, system packages, manifest copy,
    /// dependency install, source copy, env, expose, command.
    pub fn build(
        config: &BerthConfig,
        deps: &DependencyInputs,
        source_digest: &str,
    ) -> Result<Self, PlanError> {
        let runtime = RuntimeEnv::from_config(config);
        let mut specs = vec![
            LayerSpec::new(
                LayerKind::Base,
                Instruction::From {
                    image: config.build.base_image.clone(),
                },
            ),
            LayerSpec::new(
                LayerKind::Workdir,
                Instruction::Workdir {
                    path: config.build.workdir.clone(),
                },
            ),
        ];

        if !config.build.system_packages.is_empty() {
            specs.push(LayerSpec::new(
                LayerKind::SystemPackages,
                Instruction::Run {
                    steps: vec![
                        "apt-get update".to_owned(),
                        format!(
                            "DEBIAN_FRONTEND=noninteractive apt-get install -y --no-install-recommends {}",
                            config.build.system_packages.join(" ")
                        ),
                        "rm -rf /var/lib/apt/lists/*".to_owned(),
                    ],
                },
            ));
        }

        let manifest_rel = deps
            .files
            .first()
            .map(|(p, _)| p.clone())
            .unwrap_or_else(|| config.build.manifest.clone());

        specs.push(
            LayerSpec::new(
                LayerKind::ManifestCopy,
                Instruction::CopyFiles {
                    paths: deps.paths(),
                },
            )
            .with_input(deps.digest()),
        );
        specs.push(LayerSpec::new(
            LayerKind::DependencyInstall,
            Instruction::Run {
                steps: vec![format!(
                    "pip install --no-cache-dir -r {}",
                    shell_quote(&manifest_rel)
                )],
            },
        ));
        specs.push(
            LayerSpec::new(LayerKind::SourceCopy, Instruction::CopyAll).with_input(source_digest),
        );

        let mut vars: Vec<(String, String)> = runtime
            .to_pairs()
            .into_iter()
            .map(|(k, v)| (k.to_owned(), v))
            .collect();
        vars.extend(config.build.env.iter().map(|(k, v)| (k.clone(), v.clone())));
        specs.push(LayerSpec::new(LayerKind::Env, Instruction::Env { vars }));
        specs.push(LayerSpec::new(
            LayerKind::Expose,
            Instruction::Expose {
                port: config.runtime.port,
            },
        ));
        specs.push(LayerSpec::new(
            LayerKind::Command,
            Instruction::Cmd {
                argv: config.runtime.command.clone(),
            },
        ));

        Self::from_specs(specs)
    }

    /// Validate ordering and assign chained cache keys.
    pub fn from_specs(specs: Vec<LayerSpec>) -> Result<Self, PlanError> {
        validate_order(&specs)?;

        let mut parent = String::new();
        let layers = specs
            .into_iter()
            .map(|spec| {
                let key = layer_key(&parent, &spec);
                parent = key.clone();
                Layer {
                    kind: spec.kind,
                    instruction: spec.instruction,
                    input_digest: spec.input_digest,
                    cache_key: key,
                }
            })
            .collect();

        Ok(Self { layers })
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn layer(&self, kind: LayerKind) -> Option<&Layer> {
        self.layers.iter().find(|l| l.kind == kind)
    }

    /// Cache key of the dependency-install layer.
    pub fn dependency_key(&self) -> &str {
        self.layer(LayerKind::DependencyInstall)
            .map(|l| l.cache_key.as_str())
            .unwrap_or_default()
    }

    /// Key of the top layer; identifies the whole image.
    pub fn image_key(&self) -> &str {
        self.layers
            .last()
            .map(|l| l.cache_key.as_str())
            .unwrap_or_default()
    }

    pub fn exposed_port(&self) -> Option<u16> {
        self.layers.iter().find_map(|l| match l.instruction {
            Instruction::Expose { port } => Some(port),
            _ => None,
        })
    }

    /// Compare against the keys recorded for a previous build.
    pub fn diff(&self, previous: &[String]) -> Vec<(LayerKind, LayerStatus)> {
        self.layers
            .iter()
            .enumerate()
            .map(|(i, layer)| {
                let status = if previous.get(i) == Some(&layer.cache_key) {
                    LayerStatus::Cached
                } else {
                    LayerStatus::Rebuild
                };
                (layer.kind, status)
            })
            .collect()
    }
}

fn layer_key(parent: &str, spec: &LayerSpec) -> String {
    let mut hasher = Sha256::new();
    hasher.update(parent.as_bytes());
    hasher.update([0u8]);
    hasher.update(spec.instruction.to_string().as_bytes());
    hasher.update([0u8]);
    if let Some(digest) = &spec.input_digest {
        hasher.update(digest.as_bytes());
    }
    format!("sha256:{:x}", hasher.finalize())
}

fn validate_order(specs: &[LayerSpec]) -> Result<(), PlanError> {
    match specs.first() {
        Some(first) if first.kind == LayerKind::Base => {}
        _ => return Err(PlanError::BaseNotFirst),
    }
    if specs.last().map(|s| s.kind) != Some(LayerKind::Command) {
        return Err(PlanError::CommandNotLast);
    }

    let position = |kind: LayerKind| -> Result<Option<usize>, PlanError> {
        let mut found = specs.iter().enumerate().filter(|(_, s)| s.kind == kind);
        let first = found.next().map(|(i, _)| i);
        if found.next().is_some() {
            return Err(PlanError::DuplicateLayer(kind));
        }
        Ok(first)
    };

    let require = |kind: LayerKind| -> Result<usize, PlanError> {
        position(kind)?.ok_or(PlanError::MissingLayer(kind))
    };

    position(LayerKind::Base)?;
    position(LayerKind::Command)?;
    let manifest = require(LayerKind::ManifestCopy)?;
    let install = require(LayerKind::DependencyInstall)?;
    let source = require(LayerKind::SourceCopy)?;

    let mut must_precede = vec![
        (LayerKind::ManifestCopy, manifest, LayerKind::DependencyInstall, install),
        (LayerKind::DependencyInstall, install, LayerKind::SourceCopy, source),
    ];
    if let Some(system) = position(LayerKind::SystemPackages)? {
        must_precede.push((LayerKind::SystemPackages, system, LayerKind::ManifestCopy, manifest));
    }

    for (earlier, earlier_at, later, later_at) in must_precede {
        if earlier_at > later_at {
            return Err(PlanError::LayerOrder { earlier, later });
        }
    }
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("dependency manifest not found at {path}")]
    ManifestMissing { path: PathBuf },

    #[error("dependency manifest path {path} points outside the project")]
    ManifestOutsideProject { path: PathBuf },

    #[error("local package {path} referenced by the manifest was not found")]
    ArtifactMissing { path: PathBuf },

    #[error(transparent)]
    Core(#[from] berth_core::Error),

    #[error("failed to read source file {path}")]
    SourceRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("the first layer must be the base image")]
    BaseNotFirst,

    #[error("the launch command must be the last layer")]
    CommandNotLast,

    #[error("plan has no {0} layer")]
    MissingLayer(LayerKind),

    #[error("plan has more than one {0} layer")]
    DuplicateLayer(LayerKind),

    #[error("{earlier} layer must come before {later} layer")]
    LayerOrder { earlier: LayerKind, later: LayerKind },
}
