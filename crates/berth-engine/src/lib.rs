pub mod client;
pub mod docker;
pub mod executor;

pub use client::{
    BuildError, CheckResult, DoctorReport, EngineClient, PreflightError, PreflightReport,
    RunError, RunSpec,
};
pub use executor::{EngineExecutor, RealExecutor};
