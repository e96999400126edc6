//! Layer planning, Dockerfile generation, source bundling, and eject for berth.
//!
//! # Build pipeline
//!
//! ```text
//! berth build
//!   1. Dirty check  ── git status --porcelain (skip with --allow-dirty)
//!   2. Manifest     ── DependencyInputs::collect() (fails fast on bad lines)
//!   3. Context      ── bundle_files() → source_digest()
//!   4. Plan         ── ImagePlan::build() (ordered layers + cache keys)
//!   5. Dockerfile   ── DockerfileGenerator::render()
//!   6. Bundle       ── .berth-bundle/
//!   7. Engine build ── docker build .berth-bundle/
//!   8. Ledger       ── .berth/layers.json
//! ```
//!
//! # Layer order
//!
//! Slow-changing layers come first so source edits never invalidate them:
//!
//! ```text
//! FROM base → WORKDIR → RUN apt-get … → COPY manifest → RUN pip install
//!   → COPY . . → ENV → EXPOSE → CMD
//! ```
//!
//! # Bundle strategy
//!
//! The bundle mirrors the git repository state when there is one:
//! - All tracked and untracked (non-ignored) files via `git ls-files`
//! - Outside git, a directory walk that skips interpreter caches
//! - `.berth-bundle/`, `.berth/`, `.git/` are always excluded

pub mod bundle;
pub mod cache;
pub mod dockerfile;
pub mod eject;
pub mod plan;

pub use cache::CacheLedger;
pub use dockerfile::DockerfileGenerator;
pub use plan::{DependencyInputs, ImagePlan, Layer, LayerKind, LayerStatus, PlanError};
