use super::pipeline;
use berth_build::plan::{Layer, LayerStatus};
use berth_build::{CacheLedger, LayerKind};
use serde::Serialize;
use std::path::PathBuf;

/// Length of `sha256:` plus the first 12 hex digits.
const SHORT_KEY_LEN: usize = 19;

#[derive(Serialize)]
struct PlanReport<'a> {
    image: String,
    image_key: &'a str,
    dependency_key: &'a str,
    layers: Vec<LayerReport<'a>>,
}

#[derive(Serialize)]
struct LayerReport<'a> {
    kind: LayerKind,
    instruction: String,
    cache_key: &'a str,
    input_digest: Option<&'a str>,
    /// `None` when no previous build was recorded
    status: Option<LayerStatus>,
}

/// Show the ordered layers, their cache keys and the predicted reuse.
pub async fn plan(json: bool, show_dockerfile: bool) -> anyhow::Result<()> {
    let project_dir = PathBuf::from(".");
    let prepared = pipeline::prepare(&project_dir)?;
    let image = super::image_ref(&prepared.image_name, None);

    let statuses: Vec<Option<LayerStatus>> = match CacheLedger::load(&project_dir)? {
        Some(previous) => prepared
            .plan
            .diff(&previous.layers)
            .into_iter()
            .map(|(_, status)| Some(status))
            .collect(),
        None => vec![None; prepared.plan.layers().len()],
    };

    let report = PlanReport {
        image,
        image_key: prepared.plan.image_key(),
        dependency_key: prepared.plan.dependency_key(),
        layers: prepared
            .plan
            .layers()
            .iter()
            .zip(statuses)
            .map(|(layer, status)| layer_report(layer, status))
            .collect(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Image: {}", report.image);
    println!();
    for (i, layer) in report.layers.iter().enumerate() {
        let summary = layer.instruction.lines().next().unwrap_or_default();
        println!(
            "  {:>2}. {:<22} {:<8} {}  {}",
            i + 1,
            layer.kind.to_string(),
            status_label(layer.status),
            short_key(layer.cache_key),
            summary
        );
    }

    if show_dockerfile {
        println!();
        println!("{}", prepared.dockerfile);
    }

    Ok(())
}

fn layer_report(layer: &Layer, status: Option<LayerStatus>) -> LayerReport<'_> {
    LayerReport {
        kind: layer.kind,
        instruction: layer.instruction.to_string(),
        cache_key: &layer.cache_key,
        input_digest: layer.input_digest.as_deref(),
        status,
    }
}

fn status_label(status: Option<LayerStatus>) -> &'static str {
    match status {
        Some(LayerStatus::Cached) => "cached",
        Some(LayerStatus::Rebuild) => "rebuild",
        None => "new",
    }
}

fn short_key(key: &str) -> &str {
    key.get(..SHORT_KEY_LEN).unwrap_or(key)
}
