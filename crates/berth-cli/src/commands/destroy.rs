use berth_build::{CacheLedger, bundle, eject as eject_mod};
use berth_core::BerthConfig;
use berth_engine::EngineClient;
use std::io::Write;
use std::path::PathBuf;

/// Delete the built image, the local bundle and the layer ledger.
pub async fn destroy(skip_confirm: bool, tag: Option<String>) -> anyhow::Result<()> {
    let project_dir = PathBuf::from(".");
    let config = BerthConfig::load(&project_dir)?;
    let image = super::image_ref(&config.image_name(&project_dir), tag.as_deref());

    if !skip_confirm {
        println!("This will delete:");
        println!("  - Image '{image}'");
        println!("  - Local .berth-bundle/");
        println!("  - Layer ledger .berth/layers.json");
        println!();
        print!("Are you sure? [y/N] ");
        std::io::stdout().flush()?;

        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;

        if !confirmed(&input) {
            println!("Aborted.");
            return Ok(());
        }
    }

    // 1. Delete image
    println!("Deleting image '{image}'...");
    let client = EngineClient::new();
    match client.remove_image(&image).await {
        Ok(()) => println!("  Deleted."),
        Err(e) => println!("  Skipped ({})", e.to_string().lines().next().unwrap_or_default()),
    }

    // 2. Clean local bundle
    if bundle::remove_bundle(&project_dir)? {
        println!("Removed local .berth-bundle/");
    }

    // 3. Forget recorded layer keys
    if CacheLedger::clear(&project_dir)? {
        println!("Removed .berth/layers.json");
    }

    println!();
    println!("Destroy complete.");

    if eject_mod::is_ejected(&project_dir) {
        println!();
        println!("Note: .berth/Dockerfile was kept. Delete it to go back to the generated one.");
    }

    Ok(())
}

fn confirmed(input: &str) -> bool {
    matches!(input.trim(), "y" | "Y" | "yes" | "YES")
}
