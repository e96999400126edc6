use berth_build::bundle;
use berth_build::dockerfile::DockerfileGenerator;
use berth_build::plan::{self, DependencyInputs, ImagePlan};
use berth_core::BerthConfig;
use std::path::{Path, PathBuf};

/// Everything derived from the project before the engine is involved.
pub(crate) struct Prepared {
    pub config: BerthConfig,
    pub image_name: String,
    pub plan: ImagePlan,
    /// Build context files, relative to the project root
    pub files: Vec<PathBuf>,
    pub dockerfile: String,
    pub dockerignore: String,
}

/// Load config → collect manifest inputs → list context → plan → render.
///
/// A malformed manifest or config fails here, before any build starts.
pub(crate) fn prepare(project_dir: &Path) -> anyhow::Result<Prepared> {
    let config = BerthConfig::load(project_dir)?;
    let deps = DependencyInputs::collect(project_dir, &config.build.manifest)?;
    tracing::debug!(
        requirements = deps.manifest.requirements.len(),
        "dependency manifest parsed"
    );

    let files = bundle::bundle_files(project_dir)?;
    if let Some(missing) = deps
        .paths()
        .into_iter()
        .find(|p| !files.iter().any(|f| f == Path::new(p)))
    {
        anyhow::bail!(
            "{missing} is excluded from the build context (check .gitignore); \
             the dependency layer cannot be built without it"
        );
    }

    let source = plan::source_digest(project_dir, &files)?;
    let plan = ImagePlan::build(&config, &deps, &source)?;

    let generator = DockerfileGenerator::new(&plan);
    let dockerfile = generator.render();
    let dockerignore = generator.render_dockerignore();
    let image_name = config.image_name(project_dir);

    Ok(Prepared {
        config,
        image_name,
        plan,
        files,
        dockerfile,
        dockerignore,
    })
}
