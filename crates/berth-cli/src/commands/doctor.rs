use berth_build::DependencyInputs;
use berth_core::BerthConfig;
use berth_engine::{CheckResult, EngineClient};
use std::path::Path;

pub async fn doctor() -> anyhow::Result<()> {
    let project_dir = Path::new(".");

    let client = EngineClient::new();
    let mut report = client.doctor().await;

    // Config file check; doctor keeps going with defaults when it is broken
    let config = match BerthConfig::load(project_dir) {
        Ok(config) => {
            report.config_file = if project_dir.join("berth.toml").exists() {
                CheckResult::ok("Found")
            } else {
                CheckResult::ok("Not found, using defaults")
            };
            config
        }
        Err(e) => {
            report.config_file = CheckResult::fail(&e.to_string());
            BerthConfig::default()
        }
    };

    report.manifest = match DependencyInputs::collect(project_dir, &config.build.manifest) {
        Ok(deps) => CheckResult::ok(&format!(
            "{} ({} requirements)",
            config.build.manifest,
            deps.manifest.requirements.len()
        )),
        Err(e) => CheckResult::fail(&e.to_string()),
    };

    report.entrypoint = match berth_launch::entrypoint::resolve(project_dir, &config.app.entrypoint)
    {
        Some(_) => CheckResult::ok(&config.app.entrypoint),
        None => CheckResult::fail(&format!("{} not found", config.app.entrypoint)),
    };

    println!();
    println!("{report}");

    if !report.all_passed() {
        anyhow::bail!("some checks failed; see above for details");
    }

    Ok(())
}
