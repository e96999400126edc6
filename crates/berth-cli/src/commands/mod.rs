mod build;
mod destroy;
mod doctor;
mod eject;
mod init;
mod launch;
mod pipeline;
mod plan;
mod run;
mod status;
mod stop;

/// Tag used when `--tag` is not given.
pub(crate) const DEFAULT_TAG: &str = "latest";

pub use build::build;
pub use destroy::destroy;
pub use doctor::doctor;
pub use eject::eject;
pub use init::init_project;
pub use launch::launch;
pub use plan::plan;
pub use run::{RunArgs, run};
pub use status::status;
pub use stop::stop;

/// `<image name>:<tag>`, or `tag` itself when it already names an image.
pub(crate) fn image_ref(image_name: &str, tag: Option<&str>) -> String {
    match tag {
        Some(t) if t.contains(':') || t.contains('/') => t.to_owned(),
        Some(t) => format!("{image_name}:{t}"),
        None => format!("{image_name}:{DEFAULT_TAG}"),
    }
}
