//! Runs inside the image as the container's main process.
//!
//! The runtime variables are read once at start. The launcher checks that the
//! entrypoint exists and the port is free before spawning, then follows the
//! process through `NotStarted → Running → Stopped | Crashed`. A crash is
//! reported, never retried.

pub mod entrypoint;
pub mod launcher;

pub use launcher::{DEFAULT_GRACE_PERIOD, LaunchError, Launcher, check_port, load_dotenv};
