use super::pipeline;
use std::path::PathBuf;

pub async fn eject() -> anyhow::Result<()> {
    let project_dir = PathBuf::from(".");
    let prepared = pipeline::prepare(&project_dir)?;

    berth_build::eject::eject(&project_dir, &prepared.plan, &prepared.dockerfile)?;

    println!("Ejected build config to .berth/Dockerfile");
    println!("You can now edit it directly. berth build will use this file.");
    Ok(())
}
