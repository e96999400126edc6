use std::path::{Path, PathBuf};
use std::process::Command;

use berth_build::CacheLedger;
use berth_build::bundle::{bundle_files, create_bundle, is_dirty, is_git_repo, remove_bundle};
use berth_build::eject::{EjectError, eject, is_ejected, load_ejected};
use berth_build::plan::{DependencyInputs, ImagePlan};
use berth_core::BerthConfig;
use tempfile::TempDir;

fn git(dir: &Path, args: &[&str]) {
    Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap();
}

/// Initialize a git repo with a minimal Flask project and an initial commit.
fn init_git_project(dir: &Path) {
    std::fs::create_dir_all(dir.join("services")).unwrap();
    std::fs::write(dir.join("app.py"), "from flask import Flask\n").unwrap();
    std::fs::write(dir.join("requirements.txt"), "Flask==3.0.3\n").unwrap();
    std::fs::write(dir.join("services/library_service.py"), "def add_book(): ...\n").unwrap();

    git(dir, &["init"]);
    git(dir, &["config", "user.email", "test@test.com"]);
    git(dir, &["config", "user.name", "Test"]);
    git(dir, &["add", "."]);
    git(dir, &["commit", "-m", "init"]);
}

fn bundle(project: &Path, dockerfile: &str) -> PathBuf {
    let files = bundle_files(project).unwrap();
    create_bundle(project, &files, dockerfile, "Dockerfile\n.dockerignore\n").unwrap()
}

// ── Bundle Tests ──

#[test]
fn bundle_creates_expected_structure() {
    let tmp = TempDir::new().unwrap();
    let project = tmp.path();
    init_git_project(project);

    let bundle_dir = bundle(project, "FROM python:3.11-slim\n");

    assert!(bundle_dir.join("Dockerfile").exists());
    assert!(bundle_dir.join(".dockerignore").exists());
    assert!(bundle_dir.join("app.py").exists());
    assert!(bundle_dir.join("requirements.txt").exists());
    assert!(bundle_dir.join("services/library_service.py").exists());

    let dockerfile = std::fs::read_to_string(bundle_dir.join("Dockerfile")).unwrap();
    assert_eq!(dockerfile, "FROM python:3.11-slim\n");
}

#[test]
fn bundle_respects_gitignore() {
    let tmp = TempDir::new().unwrap();
    let project = tmp.path();
    std::fs::create_dir_all(project.join("instance")).unwrap();
    std::fs::write(project.join("instance/library.db"), "sqlite").unwrap();
    std::fs::write(project.join(".gitignore"), "instance/\n").unwrap();
    init_git_project(project);

    let bundle_dir = bundle(project, "FROM python\n");

    // .gitignored files should NOT be in the bundle
    assert!(!bundle_dir.join("instance").exists());
    // Tracked files should be
    assert!(bundle_dir.join("app.py").exists());
    assert!(bundle_dir.join(".gitignore").exists());
}

#[test]
fn bundle_excludes_berth_dirs() {
    let tmp = TempDir::new().unwrap();
    let project = tmp.path();
    std::fs::create_dir_all(project.join(".berth")).unwrap();
    std::fs::write(project.join(".berth/Dockerfile"), "custom").unwrap();
    init_git_project(project);

    let files = bundle_files(project).unwrap();
    assert!(!files.iter().any(|f| f.starts_with(".berth")));

    let bundle_dir = bundle(project, "FROM python\n");
    assert!(!bundle_dir.join(".berth").exists());
    assert!(bundle_dir.join("app.py").exists());
}

#[test]
fn bundle_files_skip_project_dockerfile() {
    let tmp = TempDir::new().unwrap();
    let project = tmp.path();
    std::fs::write(project.join("Dockerfile"), "FROM old\n").unwrap();
    init_git_project(project);

    let files = bundle_files(project).unwrap();
    assert!(!files.contains(&PathBuf::from("Dockerfile")));

    // generated Dockerfile wins in the bundle
    let bundle_dir = bundle(project, "FROM new\n");
    let content = std::fs::read_to_string(bundle_dir.join("Dockerfile")).unwrap();
    assert_eq!(content, "FROM new\n");
}

#[test]
fn bundle_cleans_previous_bundle() {
    let tmp = TempDir::new().unwrap();
    let project = tmp.path();
    init_git_project(project);

    let bundle1 = bundle(project, "FROM python:3.10\n");
    assert!(bundle1.join("Dockerfile").exists());

    let bundle2 = bundle(project, "FROM python:3.11\n");
    let content = std::fs::read_to_string(bundle2.join("Dockerfile")).unwrap();
    assert_eq!(content, "FROM python:3.11\n");
}

#[test]
fn bundle_files_walk_without_git() {
    let tmp = TempDir::new().unwrap();
    let project = tmp.path();
    std::fs::create_dir_all(project.join("__pycache__")).unwrap();
    std::fs::create_dir_all(project.join(".venv/lib")).unwrap();
    std::fs::write(project.join("app.py"), "").unwrap();
    std::fs::write(project.join("database.py"), "").unwrap();
    std::fs::write(project.join("stale.pyc"), "").unwrap();
    std::fs::write(project.join("__pycache__/app.cpython-311.pyc"), "").unwrap();
    std::fs::write(project.join(".venv/lib/site.py"), "").unwrap();

    assert!(!is_git_repo(project));
    let files = bundle_files(project).unwrap();

    assert_eq!(
        files,
        vec![PathBuf::from("app.py"), PathBuf::from("database.py")]
    );
}

#[test]
fn bundle_files_keep_non_ascii_names() {
    let tmp = TempDir::new().unwrap();
    let project = tmp.path();
    init_git_project(project);
    std::fs::write(project.join("café.py"), "MENU = []\n").unwrap();
    std::fs::write(project.join("services/überblick.py"), "").unwrap();

    let files = bundle_files(project).unwrap();
    assert!(files.contains(&PathBuf::from("café.py")));
    assert!(files.contains(&PathBuf::from("services/überblick.py")));

    let bundle_dir = bundle(project, "FROM python\n");
    assert!(bundle_dir.join("café.py").exists());
}

#[test]
fn remove_bundle_reports_whether_removed() {
    let tmp = TempDir::new().unwrap();
    let project = tmp.path();
    init_git_project(project);

    assert!(!remove_bundle(project).unwrap());
    bundle(project, "FROM python\n");
    assert!(remove_bundle(project).unwrap());
    assert!(!project.join(".berth-bundle").exists());
}

// ── Dirty Check Tests ──

#[test]
fn is_dirty_clean_repo() {
    let tmp = TempDir::new().unwrap();
    let project = tmp.path();
    init_git_project(project);

    assert!(!is_dirty(project).unwrap());
}

#[test]
fn is_dirty_with_uncommitted_changes() {
    let tmp = TempDir::new().unwrap();
    let project = tmp.path();
    init_git_project(project);

    std::fs::write(project.join("app.py"), "# dirty\n").unwrap();

    assert!(is_dirty(project).unwrap());
}

#[test]
fn is_dirty_with_untracked_file() {
    let tmp = TempDir::new().unwrap();
    let project = tmp.path();
    init_git_project(project);

    std::fs::write(project.join("notes.txt"), "hello").unwrap();

    assert!(is_dirty(project).unwrap());
}

#[test]
fn is_dirty_ignores_build_outputs() {
    let tmp = TempDir::new().unwrap();
    let project = tmp.path();
    init_git_project(project);

    bundle(project, "FROM python:3.11-slim\n");
    CacheLedger {
        image: "shop:latest".to_owned(),
        layers: vec!["sha256:00".to_owned()],
    }
    .save(project)
    .unwrap();

    assert!(!is_dirty(project).unwrap());

    let plan = plan_in(project, &BerthConfig::default());
    eject(project, &plan, EJECTED).unwrap();
    assert!(is_dirty(project).unwrap());
}

// ── Eject Tests ──

fn plan_in(project: &Path, config: &BerthConfig) -> ImagePlan {
    if !project.join("requirements.txt").exists() {
        std::fs::write(project.join("requirements.txt"), "Flask==3.0.3\n").unwrap();
    }
    let deps = DependencyInputs::collect(project, "requirements.txt").unwrap();
    ImagePlan::build(config, &deps, "abc").unwrap()
}

const EJECTED: &str = "FROM python:3.11-slim\nWORKDIR /app\nCOPY . .\nEXPOSE 5000\n";

#[test]
fn eject_creates_berth_dir_with_dockerfile() {
    let tmp = TempDir::new().unwrap();
    let project = tmp.path();
    let plan = plan_in(project, &BerthConfig::default());

    assert!(!is_ejected(project));

    let path = eject(project, &plan, EJECTED).unwrap();

    assert!(is_ejected(project));
    assert_eq!(path, project.join(".berth/Dockerfile"));
}

#[test]
fn eject_stamps_plan_key_and_keeps_content() {
    let tmp = TempDir::new().unwrap();
    let project = tmp.path();
    let plan = plan_in(project, &BerthConfig::default());

    eject(project, &plan, EJECTED).unwrap();

    let loaded = load_ejected(project, &plan).unwrap();
    assert!(loaded.content.ends_with(EJECTED));
    assert_eq!(loaded.stamped_key.as_deref(), Some(plan.image_key()));
    assert!(!loaded.stale);
}

#[test]
fn ejected_dockerfile_goes_stale_when_plan_changes() {
    let tmp = TempDir::new().unwrap();
    let project = tmp.path();
    let plan = plan_in(project, &BerthConfig::default());
    eject(project, &plan, EJECTED).unwrap();

    std::fs::write(project.join("requirements.txt"), "Flask==3.0.2\n").unwrap();
    let changed = plan_in(project, &BerthConfig::default());

    assert!(load_ejected(project, &changed).unwrap().stale);
}

#[test]
fn ejected_dockerfile_without_stamp_is_stale() {
    let tmp = TempDir::new().unwrap();
    let project = tmp.path();
    let plan = plan_in(project, &BerthConfig::default());
    std::fs::create_dir_all(project.join(".berth")).unwrap();
    std::fs::write(project.join(".berth/Dockerfile"), EJECTED).unwrap();

    let loaded = load_ejected(project, &plan).unwrap();
    assert!(loaded.stamped_key.is_none());
    assert!(loaded.stale);
}

#[test]
fn ejected_dockerfile_must_expose_runtime_port() {
    let tmp = TempDir::new().unwrap();
    let project = tmp.path();
    let plan = plan_in(project, &BerthConfig::default());
    eject(project, &plan, EJECTED).unwrap();

    let mut config = BerthConfig::default();
    config.runtime.port = 8080;
    let moved = plan_in(project, &config);

    let err = load_ejected(project, &moved).unwrap_err();
    assert!(matches!(
        err,
        EjectError::PortMismatch {
            exposed: 5000,
            port: 8080,
            ..
        }
    ));
}

#[test]
fn ejected_dockerfile_needs_base_image() {
    let tmp = TempDir::new().unwrap();
    let project = tmp.path();
    let plan = plan_in(project, &BerthConfig::default());
    eject(project, &plan, "COPY . .\nEXPOSE 5000\n").unwrap();

    let err = load_ejected(project, &plan).unwrap_err();
    assert!(matches!(err, EjectError::NoBaseImage { .. }));
}

#[test]
fn eject_fails_if_already_ejected() {
    let tmp = TempDir::new().unwrap();
    let project = tmp.path();
    let plan = plan_in(project, &BerthConfig::default());

    eject(project, &plan, EJECTED).unwrap();
    let result = eject(project, &plan, "FROM python:3.12-slim\n");

    assert!(result.is_err());
    let err = result.unwrap_err().to_string();
    assert!(err.contains("already ejected"));
}

// ── Ledger Tests ──

#[test]
fn ledger_round_trips_through_berth_dir() {
    let tmp = TempDir::new().unwrap();
    let project = tmp.path();
    std::fs::write(project.join("requirements.txt"), "Flask==3.0.3\n").unwrap();

    let deps = DependencyInputs::collect(project, "requirements.txt").unwrap();
    let plan = ImagePlan::build(&BerthConfig::default(), &deps, "abc").unwrap();
    let ledger = CacheLedger::from_plan("library:latest", &plan);

    assert!(CacheLedger::load(project).unwrap().is_none());
    ledger.save(project).unwrap();

    let loaded = CacheLedger::load(project).unwrap().unwrap();
    assert_eq!(loaded, ledger);
    assert_eq!(loaded.layers.len(), plan.layers().len());

    assert!(CacheLedger::clear(project).unwrap());
    assert!(CacheLedger::load(project).unwrap().is_none());
}

#[test]
fn ledger_rejects_malformed_file() {
    let tmp = TempDir::new().unwrap();
    let project = tmp.path();
    std::fs::create_dir_all(project.join(".berth")).unwrap();
    std::fs::write(project.join(".berth/layers.json"), "{not json").unwrap();

    let err = CacheLedger::load(project).unwrap_err();
    assert!(err.to_string().contains("malformed"));
}
