use std::path::Path;

const BERTH_TOML: &str = r#"[app]
# name = "my-app"
# entrypoint = "app.py"

[build]
# base_image = "python:3.11-slim"
# system_packages = ["gcc", "sqlite3"]
# manifest = "requirements.txt"
# workdir = "/app"

[build.env]
# PYTHONUNBUFFERED = "1"

[runtime]
# host = "0.0.0.0"
# port = 5000
# mode = "production"
# command = ["flask", "run"]
"#;

/// Lines berth needs in .gitignore so its outputs never enter a bundle
/// or mark the tree dirty.
const GITIGNORE_ENTRIES: &[&str] = &[".berth-bundle/", ".berth/layers.json"];

/// Initialize berth in an existing Flask project.
pub async fn init_project() -> anyhow::Result<()> {
    let mut created = Vec::new();

    // berth.toml
    let berth_toml_path = Path::new("berth.toml");
    if berth_toml_path.exists() {
        eprintln!("berth.toml already exists, skipping");
    } else {
        std::fs::write(berth_toml_path, BERTH_TOML)?;
        created.push("berth.toml");
    }

    // .gitignore
    let gitignore_path = Path::new(".gitignore");
    let existing = if gitignore_path.exists() {
        std::fs::read_to_string(gitignore_path)?
    } else {
        String::new()
    };
    let missing = missing_gitignore_entries(&existing);
    if !missing.is_empty() {
        let mut content = existing;
        if !content.is_empty() && !content.ends_with('\n') {
            content.push('\n');
        }
        for entry in &missing {
            content.push_str(entry);
            content.push('\n');
        }
        std::fs::write(gitignore_path, content)?;
        created.push(".gitignore entries");
    }

    if created.is_empty() {
        println!("Nothing to create; already initialized.");
    } else {
        for f in &created {
            println!("Created {f}");
        }
    }

    if !Path::new("requirements.txt").exists() {
        eprintln!("Warning: requirements.txt not found; set [build].manifest in berth.toml");
    }
    if !Path::new("app.py").exists() {
        eprintln!("Warning: app.py not found; set [app].entrypoint in berth.toml");
    }

    println!();
    println!("Next steps:");
    println!();
    println!("  1. Check the setup:");
    println!("     berth doctor");
    println!();
    println!("  2. Build the image:");
    println!("     berth build");
    println!();
    println!("  3. Run it:");
    println!("     berth run");

    Ok(())
}

fn missing_gitignore_entries(existing: &str) -> Vec<&'static str> {
    GITIGNORE_ENTRIES
        .iter()
        .copied()
        .filter(|entry| !existing.lines().any(|line| line.trim() == *entry))
        .collect()
}
