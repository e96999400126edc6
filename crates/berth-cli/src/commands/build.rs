use super::pipeline;
use berth_build::plan::LayerStatus;
use berth_build::{CacheLedger, LayerKind, bundle, eject as eject_mod};
use berth_engine::EngineClient;
use std::path::PathBuf;

/// Build the image: dirty check → plan → bundle → engine build → ledger.
pub async fn build(tag: Option<String>, allow_dirty: bool) -> anyhow::Result<()> {
    let project_dir = PathBuf::from(".");

    // Dirty check: only meaningful inside a git repository
    if !allow_dirty && bundle::is_git_repo(&project_dir) && bundle::is_dirty(&project_dir)? {
        anyhow::bail!(
            "uncommitted changes detected.\n\
             Commit your changes, or use `berth build --allow-dirty` to build anyway."
        );
    }

    let prepared = pipeline::prepare(&project_dir)?;
    let image = super::image_ref(&prepared.image_name, tag.as_deref());

    // An ejected Dockerfile is checked against the plan before the engine runs
    let ejected = if eject_mod::is_ejected(&project_dir) {
        Some(eject_mod::load_ejected(&project_dir, &prepared.plan)?)
    } else {
        None
    };

    // Pre-flight checks
    println!("Running pre-flight checks...");
    let client = EngineClient::new();
    client.check_prerequisites().await?;

    let dockerfile = if let Some(ejected) = &ejected {
        println!("Using ejected Dockerfile from .berth/Dockerfile");
        if ejected.stale {
            println!(
                "  Note: berth.toml or the manifest changed since the eject; \
                 the ejected file does not reflect it"
            );
        }
        ejected.content.clone()
    } else {
        if let Some(previous) = CacheLedger::load(&project_dir)? {
            let deps = prepared
                .plan
                .diff(&previous.layers)
                .into_iter()
                .find(|(kind, _)| *kind == LayerKind::DependencyInstall)
                .map(|(_, status)| status);
            if deps == Some(LayerStatus::Cached) {
                println!("Dependency manifest unchanged; the install layer will be reused");
            } else {
                println!("Dependency manifest changed; dependencies will be reinstalled");
            }
        }
        prepared.dockerfile.clone()
    };

    // Bundle source
    println!("Bundling source ({} files)...", prepared.files.len());
    let bundle_dir = bundle::create_bundle(
        &project_dir,
        &prepared.files,
        &dockerfile,
        &prepared.dockerignore,
    )?;

    // Engine build
    println!("Building {image}...");
    client.build_image(&bundle_dir, &image, false).await?;

    // Keys only describe the generated Dockerfile
    if ejected.is_some() {
        CacheLedger::clear(&project_dir)?;
    } else {
        CacheLedger::from_plan(&image, &prepared.plan).save(&project_dir)?;
    }
    tracing::info!(image = %image, key = prepared.plan.image_key(), "build recorded");

    println!();
    println!("Built: {image}");
    println!("Run it with: berth run");

    Ok(())
}
