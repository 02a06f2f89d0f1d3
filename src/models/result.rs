//! Reconciliation result models

use serde::{Deserialize, Serialize};

use super::certificate::PathBundle;
use crate::services::process::CommandOutput;

/// Tri-state result of a reconciliation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Failure,
    /// Dry-run: nothing was attempted
    Indeterminate,
}

/// What the decision procedure selected
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CertificateAction {
    Issue,
    Renew,
    None,
}

impl CertificateAction {
    pub fn verb(&self) -> &'static str {
        match self {
            CertificateAction::Issue => "issued",
            CertificateAction::Renew => "renewed",
            CertificateAction::None => "left unchanged",
        }
    }
}

/// What a certificate reconciliation actually did
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ActionTaken {
    None,
    Installed,
    Issued,
    Renewed,
    Failed,
}

/// Recognised informational conditions from acme.sh output
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notice {
    /// Issue refused because the current certificate is still valid
    AlreadyValid { next_renewal: Option<String> },
    /// The ACME account must be registered first
    RegistrationRequired,
    /// acme.sh has no record of the domain
    NotIssued,
    /// Renew skipped because the renewal time has not been reached
    RenewalNotDue { next_renewal: Option<String> },
}

impl Notice {
    pub fn message(&self, common_name: &str) -> String {
        match self {
            Notice::AlreadyValid { next_renewal } => match next_renewal {
                Some(when) => format!(
                    "Certificate for {} is already valid (next renewal time is {}), re-run with force=True to reissue",
                    common_name, when
                ),
                None => format!(
                    "Certificate for {} is already valid, re-run with force=True to reissue",
                    common_name
                ),
            },
            Notice::RegistrationRequired => format!(
                "An ACME account must be registered before {} can be issued, run the register action first",
                common_name
            ),
            Notice::NotIssued => format!("{} is not an issued domain", common_name),
            Notice::RenewalNotDue { next_renewal } => match next_renewal {
                Some(when) => format!("Next renewal time for {} is {}", common_name, when),
                None => format!("Renewal of {} is not due yet", common_name),
            },
        }
    }
}

/// Result descriptor returned to the orchestration layer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConvergenceResult {
    /// Common name of the certificate
    pub name: String,
    pub action_taken: ActionTaken,
    pub changed: bool,
    pub result: Outcome,
    pub message: String,
    /// Action a dry-run would have taken
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending: Option<CertificateAction>,
    /// Paths on success, raw failure payload on error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
}

impl ConvergenceResult {
    pub fn up_to_date(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            message: format!("Certificate for {} is already up-to-date", name),
            name,
            action_taken: ActionTaken::None,
            changed: false,
            result: Outcome::Success,
            pending: None,
            detail: None,
        }
    }

    pub fn would(name: impl Into<String>, action: CertificateAction) -> Self {
        let name = name.into();
        Self {
            message: format!("Certificate for {} would be {}", name, action.verb()),
            name,
            action_taken: ActionTaken::None,
            changed: false,
            result: Outcome::Indeterminate,
            pending: Some(action),
            detail: None,
        }
    }

    pub fn completed(name: impl Into<String>, action: CertificateAction, paths: &PathBundle) -> Self {
        let name = name.into();
        let action_taken = match action {
            CertificateAction::Issue => ActionTaken::Issued,
            CertificateAction::Renew => ActionTaken::Renewed,
            CertificateAction::None => ActionTaken::None,
        };
        Self {
            message: format!("Certificate for {} has been {}", name, action.verb()),
            name,
            action_taken,
            changed: action_taken != ActionTaken::None,
            result: Outcome::Success,
            pending: None,
            detail: serde_json::to_value(paths).ok(),
        }
    }

    pub fn informational(name: impl Into<String>, notice: &Notice) -> Self {
        let name = name.into();
        Self {
            message: notice.message(&name),
            detail: serde_json::to_value(notice).ok(),
            name,
            action_taken: ActionTaken::None,
            changed: false,
            result: Outcome::Success,
            pending: None,
        }
    }

    pub fn failed(name: impl Into<String>, message: impl Into<String>, output: &CommandOutput) -> Self {
        Self {
            name: name.into(),
            action_taken: ActionTaken::Failed,
            changed: false,
            result: Outcome::Failure,
            message: message.into(),
            pending: None,
            detail: serde_json::to_value(output).ok(),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.result == Outcome::Failure
    }
}
