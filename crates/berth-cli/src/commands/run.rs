use berth_core::runtime::{SIGNAL_EXIT_CODES, parse_override};
use berth_core::{BerthConfig, RuntimeEnv};
use berth_engine::{EngineClient, RunError, RunSpec};
use std::path::PathBuf;

pub struct RunArgs {
    pub tag: Option<String>,
    pub publish: Option<u16>,
    pub env: Vec<String>,
    pub detach: bool,
    pub name: Option<String>,
}

/// Start a container from the built image with the runtime variables injected.
pub async fn run(args: RunArgs) -> anyhow::Result<()> {
    let project_dir = PathBuf::from(".");
    let config = BerthConfig::load(&project_dir)?;
    let image = super::image_ref(&config.image_name(&project_dir), args.tag.as_deref());

    let overrides = args
        .env
        .iter()
        .map(|raw| parse_override(raw))
        .collect::<Result<Vec<_>, _>>()?;
    let runtime = RuntimeEnv::from_config(&config).with_overrides(&overrides)?;

    let client = EngineClient::new();
    client.check_prerequisites().await?;
    if !client.image_exists(&image).await? {
        anyhow::bail!("image {image} not found; run `berth build` first");
    }

    let mut spec = RunSpec::new(&image, &runtime, args.publish);
    spec.name = args.name;
    spec.detach = args.detach;

    println!(
        "Starting {image} ({} mode) on http://localhost:{}",
        runtime.mode, spec.host_port
    );

    if spec.detach {
        let id = client.run_detached(&spec).await?;
        let handle = spec.name.as_deref().unwrap_or(&id);
        println!("Container: {id}");
        println!("  Status: berth status {handle}");
        println!("  Stop:   berth stop {handle}");
        return Ok(());
    }

    match client.run_foreground(&spec).await {
        Ok(()) => println!("Stopped."),
        Err(RunError::Exited { code }) if SIGNAL_EXIT_CODES.contains(&code) => {
            println!("Stopped (exit {code}).");
        }
        Err(RunError::Exited { code }) => {
            anyhow::bail!("application crashed with exit code {code}; it was not restarted");
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}
