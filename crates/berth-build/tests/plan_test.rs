use std::path::Path;

use berth_build::bundle::bundle_files;
use berth_build::plan::{
    DependencyInputs, ImagePlan, Instruction, LayerKind, LayerSpec, LayerStatus, PlanError,
    source_digest,
};
use berth_core::BerthConfig;
use tempfile::TempDir;

/// Write a minimal Flask project (no git).
fn write_project(dir: &Path) {
    std::fs::create_dir_all(dir.join("templates")).unwrap();
    std::fs::write(dir.join("app.py"), "from flask import Flask\napp = Flask(__name__)\n").unwrap();
    std::fs::write(dir.join("requirements.txt"), "Flask==3.0.3\npytest==8.2.0\n").unwrap();
    std::fs::write(dir.join("templates/index.html"), "<h1>catalog</h1>").unwrap();
}

fn plan_for(dir: &Path, config: &BerthConfig) -> ImagePlan {
    let deps = DependencyInputs::collect(dir, &config.build.manifest).unwrap();
    let files = bundle_files(dir).unwrap();
    let digest = source_digest(dir, &files).unwrap();
    ImagePlan::build(config, &deps, &digest).unwrap()
}

fn kinds(plan: &ImagePlan) -> Vec<LayerKind> {
    plan.layers().iter().map(|l| l.kind).collect()
}

// ── Layer order ──

#[test]
fn default_plan_orders_slow_layers_first() {
    let tmp = TempDir::new().unwrap();
    write_project(tmp.path());

    let plan = plan_for(tmp.path(), &BerthConfig::default());

    assert_eq!(
        kinds(&plan),
        vec![
            LayerKind::Base,
            LayerKind::Workdir,
            LayerKind::SystemPackages,
            LayerKind::ManifestCopy,
            LayerKind::DependencyInstall,
            LayerKind::SourceCopy,
            LayerKind::Env,
            LayerKind::Expose,
            LayerKind::Command,
        ]
    );
    assert_eq!(plan.exposed_port(), Some(5000));
}

#[test]
fn no_system_layer_without_packages() {
    let tmp = TempDir::new().unwrap();
    write_project(tmp.path());
    let mut config = BerthConfig::default();
    config.build.system_packages.clear();

    let plan = plan_for(tmp.path(), &config);
    assert!(plan.layer(LayerKind::SystemPackages).is_none());
}

#[test]
fn env_layer_carries_all_runtime_variables() {
    let tmp = TempDir::new().unwrap();
    write_project(tmp.path());

    let plan = plan_for(tmp.path(), &BerthConfig::default());
    let env = plan.layer(LayerKind::Env).unwrap();

    match &env.instruction {
        Instruction::Env { vars } => {
            let names: Vec<&str> = vars.iter().map(|(k, _)| k.as_str()).collect();
            assert_eq!(
                names,
                vec!["FLASK_APP", "FLASK_RUN_HOST", "FLASK_RUN_PORT", "FLASK_ENV"]
            );
            assert_eq!(vars[2].1, "5000");
        }
        other => panic!("expected ENV, got {other:?}"),
    }
}

#[test]
fn bind_port_matches_exposed_port() {
    let tmp = TempDir::new().unwrap();
    write_project(tmp.path());
    let mut config = BerthConfig::default();
    config.runtime.port = 8000;

    let plan = plan_for(tmp.path(), &config);
    let env = plan.layer(LayerKind::Env).unwrap().instruction.to_string();

    assert_eq!(plan.exposed_port(), Some(8000));
    assert!(env.contains("FLASK_RUN_PORT=8000"));
}

// ── Cache keys ──

#[test]
fn identical_inputs_give_identical_keys() {
    let tmp = TempDir::new().unwrap();
    write_project(tmp.path());
    let config = BerthConfig::default();

    let first = plan_for(tmp.path(), &config);
    let second = plan_for(tmp.path(), &config);

    let keys = |p: &ImagePlan| -> Vec<String> {
        p.layers().iter().map(|l| l.cache_key.clone()).collect()
    };
    assert_eq!(keys(&first), keys(&second));
    assert_eq!(first.image_key(), second.image_key());
}

#[test]
fn source_edit_keeps_dependency_key() {
    let tmp = TempDir::new().unwrap();
    write_project(tmp.path());
    let config = BerthConfig::default();

    let before = plan_for(tmp.path(), &config);
    std::fs::write(tmp.path().join("app.py"), "# changed\n").unwrap();
    let after = plan_for(tmp.path(), &config);

    assert_eq!(before.dependency_key(), after.dependency_key());
    assert_ne!(
        before.layer(LayerKind::SourceCopy).unwrap().cache_key,
        after.layer(LayerKind::SourceCopy).unwrap().cache_key
    );
    assert_ne!(before.image_key(), after.image_key());
}

#[test]
fn manifest_edit_changes_dependency_key() {
    let tmp = TempDir::new().unwrap();
    write_project(tmp.path());
    let config = BerthConfig::default();

    let before = plan_for(tmp.path(), &config);
    std::fs::write(tmp.path().join("requirements.txt"), "Flask==3.0.2\n").unwrap();
    let after = plan_for(tmp.path(), &config);

    assert_ne!(before.dependency_key(), after.dependency_key());
    assert_eq!(
        before.layer(LayerKind::SystemPackages).unwrap().cache_key,
        after.layer(LayerKind::SystemPackages).unwrap().cache_key
    );
}

#[test]
fn diff_marks_layers_above_first_change_for_rebuild() {
    let tmp = TempDir::new().unwrap();
    write_project(tmp.path());
    let config = BerthConfig::default();

    let before = plan_for(tmp.path(), &config);
    let recorded: Vec<String> = before.layers().iter().map(|l| l.cache_key.clone()).collect();

    std::fs::write(tmp.path().join("templates/index.html"), "<h1>v2</h1>").unwrap();
    let after = plan_for(tmp.path(), &config);
    let diff = after.diff(&recorded);

    let status = |kind: LayerKind| diff.iter().find(|(k, _)| *k == kind).unwrap().1;
    assert_eq!(status(LayerKind::Base), LayerStatus::Cached);
    assert_eq!(status(LayerKind::DependencyInstall), LayerStatus::Cached);
    assert_eq!(status(LayerKind::SourceCopy), LayerStatus::Rebuild);
    assert_eq!(status(LayerKind::Command), LayerStatus::Rebuild);
}

#[test]
fn diff_without_history_rebuilds_everything() {
    let tmp = TempDir::new().unwrap();
    write_project(tmp.path());

    let plan = plan_for(tmp.path(), &BerthConfig::default());
    assert!(plan.diff(&[]).iter().all(|(_, s)| *s == LayerStatus::Rebuild));
}

// ── Manifest inputs ──

#[test]
fn missing_manifest_fails_fast() {
    let tmp = TempDir::new().unwrap();
    std::fs::write(tmp.path().join("app.py"), "").unwrap();

    let result = DependencyInputs::collect(tmp.path(), "requirements.txt");
    assert!(matches!(result, Err(PlanError::ManifestMissing { .. })));
}

#[test]
fn malformed_manifest_fails_fast() {
    let tmp = TempDir::new().unwrap();
    std::fs::write(tmp.path().join("requirements.txt"), "Flask=>3\n").unwrap();

    let result = DependencyInputs::collect(tmp.path(), "requirements.txt");
    assert!(matches!(result, Err(PlanError::Core(_))));
}

#[test]
fn referenced_manifests_are_copied_with_the_manifest() {
    let tmp = TempDir::new().unwrap();
    std::fs::create_dir_all(tmp.path().join("requirements")).unwrap();
    std::fs::write(
        tmp.path().join("requirements/prod.txt"),
        "-r base.txt\ngunicorn==22.0\n",
    )
    .unwrap();
    std::fs::write(tmp.path().join("requirements/base.txt"), "Flask==3.0.3\n").unwrap();

    let deps = DependencyInputs::collect(tmp.path(), "requirements/prod.txt").unwrap();
    assert_eq!(
        deps.paths(),
        vec!["requirements/prod.txt", "requirements/base.txt"]
    );

    let before = deps.digest();
    std::fs::write(tmp.path().join("requirements/base.txt"), "Flask==3.0.2\n").unwrap();
    let after = DependencyInputs::collect(tmp.path(), "requirements/prod.txt")
        .unwrap()
        .digest();
    assert_ne!(before, after);
}

#[test]
fn local_wheels_are_copied_with_the_manifest() {
    let tmp = TempDir::new().unwrap();
    std::fs::create_dir_all(tmp.path().join("vendor")).unwrap();
    std::fs::write(tmp.path().join("vendor/shop-1.0-py3-none-any.whl"), b"wheel").unwrap();
    std::fs::write(
        tmp.path().join("requirements.txt"),
        "./vendor/shop-1.0-py3-none-any.whl\nFlask==3.0.3 --hash=sha256:abc\n",
    )
    .unwrap();

    let deps = DependencyInputs::collect(tmp.path(), "requirements.txt").unwrap();
    assert_eq!(
        deps.paths(),
        vec!["requirements.txt", "vendor/shop-1.0-py3-none-any.whl"]
    );

    let before = deps.digest();
    std::fs::write(tmp.path().join("vendor/shop-1.0-py3-none-any.whl"), b"rebuilt").unwrap();
    let after = DependencyInputs::collect(tmp.path(), "requirements.txt")
        .unwrap()
        .digest();
    assert_ne!(before, after);
}

#[test]
fn missing_local_wheel_fails_fast() {
    let tmp = TempDir::new().unwrap();
    std::fs::write(tmp.path().join("requirements.txt"), "./vendor/gone.whl\n").unwrap();

    let result = DependencyInputs::collect(tmp.path(), "requirements.txt");
    assert!(matches!(result, Err(PlanError::ArtifactMissing { .. })));
}

#[test]
fn reference_cycles_terminate() {
    let tmp = TempDir::new().unwrap();
    std::fs::write(tmp.path().join("a.txt"), "-r b.txt\nflask\n").unwrap();
    std::fs::write(tmp.path().join("b.txt"), "-r a.txt\npytest\n").unwrap();

    let deps = DependencyInputs::collect(tmp.path(), "a.txt").unwrap();
    assert_eq!(deps.paths(), vec!["a.txt", "b.txt"]);
}

#[test]
fn manifest_outside_project_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let result = DependencyInputs::collect(tmp.path(), "../requirements.txt");
    assert!(matches!(
        result,
        Err(PlanError::ManifestOutsideProject { .. })
    ));
}

// ── Ordering validation ──

fn spec(kind: LayerKind) -> LayerSpec {
    let instruction = match kind {
        LayerKind::Base => Instruction::From {
            image: "python:3.11-slim".to_owned(),
        },
        LayerKind::ManifestCopy => Instruction::CopyFiles {
            paths: vec!["requirements.txt".to_owned()],
        },
        LayerKind::SourceCopy => Instruction::CopyAll,
        LayerKind::Command => Instruction::Cmd {
            argv: vec!["flask".to_owned(), "run".to_owned()],
        },
        _ => Instruction::Run {
            steps: vec!["true".to_owned()],
        },
    };
    LayerSpec::new(kind, instruction)
}

#[test]
fn source_before_install_is_rejected() {
    let result = ImagePlan::from_specs(vec![
        spec(LayerKind::Base),
        spec(LayerKind::ManifestCopy),
        spec(LayerKind::SourceCopy),
        spec(LayerKind::DependencyInstall),
        spec(LayerKind::Command),
    ]);
    assert!(matches!(
        result,
        Err(PlanError::LayerOrder {
            earlier: LayerKind::DependencyInstall,
            later: LayerKind::SourceCopy,
        })
    ));
}

#[test]
fn install_before_manifest_copy_is_rejected() {
    let result = ImagePlan::from_specs(vec![
        spec(LayerKind::Base),
        spec(LayerKind::DependencyInstall),
        spec(LayerKind::ManifestCopy),
        spec(LayerKind::SourceCopy),
        spec(LayerKind::Command),
    ]);
    assert!(matches!(result, Err(PlanError::LayerOrder { .. })));
}

#[test]
fn base_must_be_first_and_command_last() {
    let no_base = ImagePlan::from_specs(vec![
        spec(LayerKind::ManifestCopy),
        spec(LayerKind::Base),
        spec(LayerKind::Command),
    ]);
    assert!(matches!(no_base, Err(PlanError::BaseNotFirst)));

    let command_early = ImagePlan::from_specs(vec![
        spec(LayerKind::Base),
        spec(LayerKind::Command),
        spec(LayerKind::SourceCopy),
    ]);
    assert!(matches!(command_early, Err(PlanError::CommandNotLast)));
}

#[test]
fn missing_and_duplicate_layers_are_rejected() {
    let missing = ImagePlan::from_specs(vec![
        spec(LayerKind::Base),
        spec(LayerKind::ManifestCopy),
        spec(LayerKind::DependencyInstall),
        spec(LayerKind::Command),
    ]);
    assert!(matches!(
        missing,
        Err(PlanError::MissingLayer(LayerKind::SourceCopy))
    ));

    let duplicate = ImagePlan::from_specs(vec![
        spec(LayerKind::Base),
        spec(LayerKind::ManifestCopy),
        spec(LayerKind::DependencyInstall),
        spec(LayerKind::SourceCopy),
        spec(LayerKind::SourceCopy),
        spec(LayerKind::Command),
    ]);
    assert!(matches!(
        duplicate,
        Err(PlanError::DuplicateLayer(LayerKind::SourceCopy))
    ));
}
