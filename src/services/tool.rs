//! acme.sh presence reconciliation
//!
//! Makes sure the acme.sh script is installed for a user and, on request,
//! reinstalled or upgraded. Installation is the only branch that writes to
//! disk; version checks are read-only.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use crate::models::{InstallContext, ToolAction, ToolReport, ToolRequest};
use crate::utils::error::ConvergeResult;

/// Installs and inspects the acme.sh script
#[async_trait]
pub trait ToolManager: Send + Sync {
    /// Where the script lives for this context
    fn binary_path(&self, context: &InstallContext) -> ConvergeResult<PathBuf>;

    fn binary_exists(&self, path: &Path) -> bool;

    /// Install (or reinstall with `force`) and return the install directory
    async fn install(&self, context: &InstallContext, force: bool) -> ConvergeResult<PathBuf>;

    async fn version(&self, context: &InstallContext) -> ConvergeResult<Option<String>>;

    async fn upgrade(&self, context: &InstallContext) -> ConvergeResult<()>;
}

/// Drives the acme.sh installation toward the requested state
pub struct ToolReconciler {
    manager: Arc<dyn ToolManager>,
}

impl ToolReconciler {
    pub fn new(manager: Arc<dyn ToolManager>) -> Self {
        Self { manager }
    }

    /// Reconcile the installation.
    ///
    /// In dry-run mode every branch returns before its first mutating call
    /// with an indeterminate result describing what would happen.
    pub async fn reconcile(&self, request: &ToolRequest, dry_run: bool) -> ConvergeResult<ToolReport> {
        let context = &request.context;
        context.validate()?;

        let path = self.manager.binary_path(context)?;
        let name = path.display().to_string();

        if !self.manager.binary_exists(&path) {
            if dry_run {
                return Ok(ToolReport::would(
                    name,
                    ToolAction::Installed,
                    "acme.sh would be installed",
                ));
            }

            let dir = self.manager.install(context, false).await?;
            info!(user = %context.user, "acme.sh installed in {:?}", dir);
            return Ok(ToolReport::changed(
                name,
                ToolAction::Installed,
                format!("acme.sh has been installed in {}", dir.display()),
                json!({ "acme_sh": "Installed", "home": dir }),
            ));
        }

        if request.force {
            if dry_run {
                return Ok(ToolReport::would(
                    name,
                    ToolAction::Reinstalled,
                    "acme.sh would be reinstalled",
                ));
            }

            let dir = self.manager.install(context, true).await?;
            info!(user = %context.user, "acme.sh reinstalled in {:?}", dir);
            return Ok(ToolReport::changed(
                name,
                ToolAction::Reinstalled,
                "acme.sh has been reinstalled",
                json!({ "acme_sh": "Reinstalled", "home": dir }),
            ));
        }

        if request.upgrade {
            if dry_run {
                return Ok(ToolReport::would(
                    name,
                    ToolAction::Upgraded,
                    "acme.sh would be upgraded",
                ));
            }

            let before = self.manager.version(context).await?;
            self.manager.upgrade(context).await?;
            let after = self.manager.version(context).await?;

            if before == after {
                return Ok(ToolReport::unchanged(
                    name,
                    ToolAction::AlreadyUpToDate,
                    "acme.sh is already up-to-date",
                ));
            }

            info!(user = %context.user, old = ?before, new = ?after, "acme.sh upgraded");
            return Ok(ToolReport::changed(
                name,
                ToolAction::Upgraded,
                "acme.sh has been upgraded",
                json!({ "acme_sh": { "old": before, "new": after } }),
            ));
        }

        Ok(ToolReport::unchanged(
            name,
            ToolAction::AlreadyInstalled,
            "acme.sh is already installed",
        ))
    }
}
