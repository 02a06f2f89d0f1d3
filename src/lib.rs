//! acme-converge library
//!
//! Idempotent lifecycle management for acme.sh and the certificates it
//! issues: install the tool, decide between issue, renew and no-op for each
//! certificate, and report what happened in a form an orchestration layer
//! can consume.

pub mod config;
pub mod models;
pub mod services;
pub mod utils;

pub use config::AppConfig;
pub use models::{CertificateSpec, ConvergenceResult, ToolReport};
pub use utils::{ConvergeError, ConvergeResult};
