//! Core types and configuration for berth.
//!
//! This crate defines the `berth.toml` schema ([`BerthConfig`]), the
//! `requirements.txt` model ([`Manifest`]), the runtime environment contract
//! ([`RuntimeEnv`]) shared by the image and the launcher, and shared error
//! types.

pub mod config;
pub mod error;
pub mod manifest;
pub mod runtime;

pub use config::{AppConfig, BerthConfig, BuildConfig, RuntimeConfig};
pub use error::{Error, Result};
pub use manifest::{Manifest, ManifestError, Requirement};
pub use runtime::{ExecutionMode, ProcessState, RuntimeEnv};
