//! acme.sh installation models

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::result::Outcome;
use crate::utils::error::{ConvergeError, ConvergeResult};
use crate::utils::validation::{validate_email, validate_username};

/// Directory used for system-wide installs
pub const SYSTEM_HOME: &str = "/opt/acme.sh";

/// Where and for whom acme.sh is installed
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstallContext {
    /// Account email registered with the CA
    pub email: String,
    pub user: String,
    /// Install to `/opt/acme.sh` instead of the user's home
    #[serde(default)]
    pub system: bool,
    /// Custom acme.sh home
    #[serde(default)]
    pub home: Option<PathBuf>,
}

impl InstallContext {
    pub fn new(email: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            user: user.into(),
            system: false,
            home: None,
        }
    }

    pub fn validate(&self) -> ConvergeResult<()> {
        if self.system && self.user != "root" {
            return Err(ConvergeError::invalid(
                "specify either a non-root user or a system installation, not both",
            ));
        }
        if !validate_username(&self.user) {
            return Err(ConvergeError::invalid(format!("invalid user '{}'", self.user)));
        }
        if !validate_email(&self.email) {
            return Err(ConvergeError::invalid(format!(
                "invalid account email '{}'",
                self.email
            )));
        }
        if let Some(home) = &self.home {
            if !home.is_absolute() {
                return Err(ConvergeError::invalid(format!(
                    "home must be absolute: {}",
                    home.display()
                )));
            }
        }
        Ok(())
    }

    /// Name of the temporary clone directory
    pub fn clone_name(&self) -> String {
        if self.system {
            "acme.sh-global".to_string()
        } else {
            format!("acme.sh-{}", self.user)
        }
    }

    /// Explicit `--home` for the installer, if any
    pub fn install_home(&self) -> Option<PathBuf> {
        match (&self.home, self.system) {
            (Some(home), _) => Some(home.clone()),
            (None, true) => Some(PathBuf::from(SYSTEM_HOME)),
            (None, false) => None,
        }
    }
}

/// Desired state of the acme.sh installation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolRequest {
    pub context: InstallContext,
    pub force: bool,
    pub upgrade: bool,
}

/// What the tool reconciler did, or would do in a dry-run
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ToolAction {
    Installed,
    Reinstalled,
    Upgraded,
    AlreadyUpToDate,
    AlreadyInstalled,
}

/// Result of reconciling the acme.sh installation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolReport {
    pub name: String,
    pub action: ToolAction,
    pub changed: bool,
    pub result: Outcome,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changes: Option<serde_json::Value>,
}

impl ToolReport {
    pub fn unchanged(name: impl Into<String>, action: ToolAction, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            action,
            changed: false,
            result: Outcome::Success,
            message: message.into(),
            changes: None,
        }
    }

    pub fn changed(
        name: impl Into<String>,
        action: ToolAction,
        message: impl Into<String>,
        changes: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            action,
            changed: true,
            result: Outcome::Success,
            message: message.into(),
            changes: Some(changes),
        }
    }

    pub fn would(name: impl Into<String>, action: ToolAction, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            action,
            changed: false,
            result: Outcome::Indeterminate,
            message: message.into(),
            changes: None,
        }
    }
}
