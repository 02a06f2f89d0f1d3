//! Business logic services

pub mod acme_sh;
pub mod convergence;
pub mod output;
pub mod process;
pub mod system;
pub mod tool;

pub use acme_sh::{AcmeShClient, Registration};
pub use convergence::{decide, CertificateOperator, CertificateReconciler, OperationOutcome};
pub use output::{InfoReport, Operation, MARKERS};
pub use process::{CommandOutput, ExternalCommand, ProcessRunner, TokioProcessRunner};
pub use system::{HostSystem, SystemOps, UserAccount};
pub use tool::{ToolManager, ToolReconciler};
