use crate::plan::{ImagePlan, LayerKind};

/// Files the source layer must not pick up from the bundle.
const DOCKER_IGNORE: &[&str] = &["Dockerfile", ".dockerignore"];

/// Renders an [`ImagePlan`] as a single-stage Dockerfile.
pub struct DockerfileGenerator<'a> {
    plan: &'a ImagePlan,
}

impl<'a> DockerfileGenerator<'a> {
    pub fn new(plan: &'a ImagePlan) -> Self {
        Self { plan }
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        let mut current: Option<&'static str> = None;

        for layer in self.plan.layers() {
            let section = section_title(layer.kind);
            if current != Some(section) {
                if current.is_some() {
                    out.push('\n');
                }
                out.push_str(&format!("# === {section} ===\n"));
                current = Some(section);
            }
            out.push_str(&layer.instruction.to_string());
            out.push('\n');
        }
        out
    }

    pub fn render_dockerignore(&self) -> String {
        let mut out = DOCKER_IGNORE.join("\n");
        out.push('\n');
        out
    }
}

fn section_title(kind: LayerKind) -> &'static str {
    match kind {
        LayerKind::Base | LayerKind::Workdir => "Base runtime",
        LayerKind::SystemPackages => "System dependencies",
        LayerKind::ManifestCopy | LayerKind::DependencyInstall => {
            "Language dependencies (keyed on the manifest only)"
        }
        LayerKind::SourceCopy => "Application source",
        LayerKind::Env | LayerKind::Expose => "Runtime configuration",
        LayerKind::Command => "Launch",
    }
}
