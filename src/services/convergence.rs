//! Certificate convergence
//!
//! Given a [`CertificateSpec`] and the certificate's current state, decide
//! whether to issue, renew or do nothing, then carry the decision out through
//! a [`CertificateOperator`].
//!
//! The decision itself is the pure function [`decide`]. Status is fetched
//! fresh on every call and nothing is cached between invocations, so the
//! check-then-act sequence is best-effort: an external change between the
//! status query and the issue or renew call is not detected.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::models::{
    CertificateAction, CertificateSpec, CertificateStatus, CertificateTarget, ConvergenceResult,
    Notice, PathBundle,
};
use crate::utils::error::{ConvergeError, ConvergeResult};

/// Non-error result of an issue or renew call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationOutcome {
    /// Certificate files were written
    Completed(PathBundle),
    /// acme.sh declined with a recognised condition
    Notice(Notice),
}

/// Certificate operations against an ACME client.
///
/// Every call is slow, may block on the network and fails independently.
/// There is no atomicity across calls.
#[async_trait]
pub trait CertificateOperator: Send + Sync {
    /// Path of the client binary for `user`, or `ToolNotFound`
    fn locate_binary(&self, user: &str) -> ConvergeResult<PathBuf>;

    async fn get_status(&self, target: &CertificateTarget) -> ConvergeResult<CertificateStatus>;

    async fn issue(&self, spec: &CertificateSpec) -> ConvergeResult<OperationOutcome>;

    async fn renew(&self, target: &CertificateTarget, force: bool)
        -> ConvergeResult<OperationOutcome>;
}

/// Select the action for a certificate.
///
/// `force` is evaluated before the renewal time, and a renewal time equal to
/// `now` does not renew. An existing certificate with no known renewal time
/// is left alone.
pub fn decide(
    spec: &CertificateSpec,
    status: &CertificateStatus,
    now: DateTime<Utc>,
) -> CertificateAction {
    if !status.exists || spec.force {
        return CertificateAction::Issue;
    }

    match status.next_renew_time {
        Some(next) if now > next => CertificateAction::Renew,
        _ => CertificateAction::None,
    }
}

/// Drives one certificate toward its desired state
pub struct CertificateReconciler {
    operator: Arc<dyn CertificateOperator>,
}

impl CertificateReconciler {
    pub fn new(operator: Arc<dyn CertificateOperator>) -> Self {
        Self { operator }
    }

    pub async fn converge(
        &self,
        spec: &CertificateSpec,
        dry_run: bool,
    ) -> ConvergeResult<ConvergenceResult> {
        self.converge_at(spec, Utc::now(), dry_run).await
    }

    /// Converge using `now` as the current time
    pub async fn converge_at(
        &self,
        spec: &CertificateSpec,
        now: DateTime<Utc>,
        dry_run: bool,
    ) -> ConvergeResult<ConvergenceResult> {
        spec.validate()?;

        let name = spec.common_name.as_str();
        let binary = self.operator.locate_binary(&spec.user)?;
        debug!(domain = %name, "Using acme.sh at {:?}", binary);

        let target = spec.target();
        let status = match self.operator.get_status(&target).await {
            Ok(status) => status,
            Err(err) => return failure(name, err),
        };

        let action = decide(spec, &status, now);
        debug!(
            domain = %name,
            exists = status.exists,
            next_renew_time = ?status.next_renew_time,
            force = spec.force,
            action = ?action,
            "Decided certificate action"
        );

        if action == CertificateAction::None {
            return Ok(ConvergenceResult::up_to_date(name));
        }

        if dry_run {
            info!(domain = %name, action = ?action, "Dry-run, not executing");
            return Ok(ConvergenceResult::would(name, action));
        }

        let outcome = if action == CertificateAction::Issue {
            self.operator.issue(spec).await
        } else {
            self.operator.renew(&target, spec.force).await
        };

        match outcome {
            Ok(OperationOutcome::Completed(paths)) => {
                info!(domain = %name, "Certificate {}", action.verb());
                Ok(ConvergenceResult::completed(name, action, &paths))
            }
            Ok(OperationOutcome::Notice(notice)) => {
                Ok(ConvergenceResult::informational(name, &notice))
            }
            Err(err) => failure(name, err),
        }
    }
}

/// Operation errors become failed results carrying the raw output;
/// everything else propagates
fn failure(name: &str, err: ConvergeError) -> ConvergeResult<ConvergenceResult> {
    match err {
        ConvergeError::OperationError { ref output, .. } => {
            warn!(domain = %name, "{}", err);
            Ok(ConvergenceResult::failed(name, err.to_string(), output))
        }
        other => Err(other),
    }
}
