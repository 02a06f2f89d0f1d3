//! acme.sh integration
//!
//! Provides the concrete tool manager and certificate operator on top of the
//! acme.sh shell script. Every call is a separate acme.sh process run as the
//! owning user; results are parsed by [`super::output`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::SecondsFormat;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::convergence::{CertificateOperator, OperationOutcome};
use super::output::{self, Operation};
use super::process::{CommandOutput, ExternalCommand, ProcessRunner};
use super::system::{SystemOps, UserAccount};
use super::tool::ToolManager;
use crate::config::AcmeShConfig;
use crate::models::{
    CertificateSpec, CertificateStatus, CertificateTarget, InstallContext, Notice, ValidationMode,
};
use crate::utils::error::{ConvergeError, ConvergeResult};

/// Location of the acme.sh script inside its home
pub fn binary_path(acme_home: &Path) -> PathBuf {
    acme_home.join("acme.sh")
}

/// Outcome of `--register-account`
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Registration {
    pub user: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbprint: Option<String>,
}

/// acme.sh client
pub struct AcmeShClient {
    config: AcmeShConfig,
    runner: Arc<dyn ProcessRunner>,
    system: Arc<dyn SystemOps>,
}

impl AcmeShClient {
    /// Create a new acme.sh client with the given configuration
    pub fn new(
        config: AcmeShConfig,
        runner: Arc<dyn ProcessRunner>,
        system: Arc<dyn SystemOps>,
    ) -> Self {
        Self {
            config,
            runner,
            system,
        }
    }

    pub fn config(&self) -> &AcmeShConfig {
        &self.config
    }

    /// The installation context described by the configuration
    pub fn install_context(&self) -> InstallContext {
        InstallContext {
            email: self.config.email.clone(),
            user: self.config.user.clone(),
            system: self.config.system,
            home: self.config.home.clone(),
        }
    }

    /// acme.sh home for a resolved account under the configured layout
    fn acme_home(&self, context: &InstallContext, account: &UserAccount) -> PathBuf {
        context
            .install_home()
            .unwrap_or_else(|| account.home.join(".acme.sh"))
    }

    /// Binary plus `--home` when acme.sh lives outside `~/.acme.sh`
    fn base_command(&self, context: &InstallContext, account: &UserAccount) -> ExternalCommand {
        let acme_home = self.acme_home(context, account);
        let mut cmd = ExternalCommand::new(binary_path(&acme_home).to_string_lossy().to_string())
            .run_as(account.clone());
        if context.install_home().is_some() {
            cmd = cmd.arg("--home").arg(acme_home.to_string_lossy().to_string());
        }
        cmd
    }

    /// Context for certificate operations owned by `user`
    fn context_for(&self, user: &str) -> InstallContext {
        InstallContext {
            user: user.to_string(),
            ..self.install_context()
        }
    }

    fn server_for<'a>(&'a self, requested: Option<&'a str>) -> Option<&'a str> {
        requested.or(self.config.server.as_deref())
    }

    async fn run(&self, cmd: &ExternalCommand) -> ConvergeResult<CommandOutput> {
        self.runner.run_external(cmd).await
    }

    /// Register the ACME account for a user
    pub async fn register_account(
        &self,
        context: &InstallContext,
        server: Option<&str>,
    ) -> ConvergeResult<Registration> {
        context.validate()?;
        let account = self.system.resolve_user(&context.user)?;
        let binary = binary_path(&self.acme_home(context, &account));
        if !self.system.binary_exists(&binary) {
            return Err(ConvergeError::ToolNotFound(binary.display().to_string()));
        }

        let server = self.server_for(server);
        let mut cmd = self
            .base_command(context, &account)
            .args(["--register-account", "-m", context.email.as_str()]);
        if let Some(server) = server {
            cmd = cmd.args(["--server", server]);
        }

        info!(user = %context.user, email = %context.email, "Registering ACME account");
        let output = self.run(&cmd).await?;
        if !output.success() {
            return Err(ConvergeError::OperationError {
                operation: Operation::Register.as_str().to_string(),
                output,
            });
        }

        Ok(Registration {
            user: context.user.clone(),
            email: context.email.clone(),
            server: server.map(String::from),
            thumbprint: output::parse_account_thumbprint(&output.stdout),
        })
    }

    fn issue_command(
        &self,
        spec: &CertificateSpec,
        account: &UserAccount,
    ) -> ExternalCommand {
        let context = self.context_for(&spec.user);
        let paths = spec.target().paths();

        let mut cmd = self
            .base_command(&context, account)
            .args(["--issue", "-d", spec.common_name.as_str()]);
        for alias in spec.extra_names() {
            cmd = cmd.args(["-d", alias]);
        }
        cmd = cmd.args(["--keylength", spec.key_algorithm.keylength()]);

        if let Some(server) = self.server_for(spec.server.as_deref()) {
            cmd = cmd.args(["--server", server]);
        }

        match spec.validation_mode {
            ValidationMode::Webroot => {
                if let Some(webroot) = &spec.webroot_path {
                    cmd = cmd.arg("-w").arg(webroot.to_string_lossy().to_string());
                }
            }
            ValidationMode::Standalone => {
                cmd = cmd.arg("--standalone");
                if let Some(port) = spec.http_port {
                    cmd = cmd.arg("--httpport").arg(port.to_string());
                }
            }
            ValidationMode::StandaloneTlsAlpn => {
                cmd = cmd.arg("--alpn");
                if let Some(port) = spec.tls_port {
                    cmd = cmd.arg("--tlsport").arg(port.to_string());
                }
            }
            ValidationMode::Dns => {
                if let Some(plugin) = &spec.dns_plugin {
                    cmd = cmd.args(["--dns", plugin.as_str()]);
                }
                cmd = cmd.envs(&spec.dns_credentials);
            }
        }

        if let Some(window) = &spec.validity_window {
            cmd = cmd
                .arg("--valid-from")
                .arg(window.not_before.to_rfc3339_opts(SecondsFormat::Secs, true))
                .arg("--valid-to")
                .arg(window.not_after.to_rfc3339_opts(SecondsFormat::Secs, true));
        }

        if spec.force {
            cmd = cmd.arg("--force");
        }

        cmd.arg("--cert-file")
            .arg(paths.certificate.to_string_lossy().to_string())
            .arg("--key-file")
            .arg(paths.private_key.to_string_lossy().to_string())
            .arg("--fullchain-file")
            .arg(paths.fullchain.to_string_lossy().to_string())
            .arg("--ca-file")
            .arg(paths.ca.to_string_lossy().to_string())
    }

    /// Turn a failed run into a notice or an operation error
    fn interpret_failure(
        &self,
        operation: Operation,
        common_name: &str,
        output: CommandOutput,
    ) -> ConvergeResult<OperationOutcome> {
        match output::classify_failure(operation, &output) {
            Some(notice) => {
                info!(
                    domain = %common_name,
                    "acme.sh {} reported: {}",
                    operation.as_str(),
                    notice.message(common_name)
                );
                Ok(OperationOutcome::Notice(notice))
            }
            None => {
                warn!(
                    domain = %common_name,
                    exit_code = ?output.exit_code,
                    "acme.sh {} failed",
                    operation.as_str()
                );
                Err(ConvergeError::OperationError {
                    operation: operation.as_str().to_string(),
                    output,
                })
            }
        }
    }
}

#[async_trait]
impl ToolManager for AcmeShClient {
    fn binary_path(&self, context: &InstallContext) -> ConvergeResult<PathBuf> {
        let acme_home = match context.install_home() {
            Some(home) => home,
            None => self.system.resolve_home(&context.user)?.join(".acme.sh"),
        };
        Ok(binary_path(&acme_home))
    }

    fn binary_exists(&self, path: &Path) -> bool {
        self.system.binary_exists(path)
    }

    async fn install(&self, context: &InstallContext, force: bool) -> ConvergeResult<PathBuf> {
        context.validate()?;
        let account = self.system.resolve_user(&context.user)?;
        let clone_name = context.clone_name();

        if !self
            .system
            .clone_source(&self.config.clone_dir, &self.config.repo_url, &clone_name)
        {
            return Err(ConvergeError::ToolInstallError {
                message: "Failed to clone the acme.sh repository".to_string(),
                output: None,
            });
        }

        let workdir = self.config.clone_dir.join(&clone_name);
        let mut cmd = ExternalCommand::new(binary_path(&workdir).to_string_lossy().to_string())
            .args(["--install", "--accountemail", context.email.as_str(), "--nocron"])
            .current_dir(workdir.clone())
            .run_as(account.clone());
        if force {
            cmd = cmd.arg("--force");
        }
        if let Some(home) = context.install_home() {
            cmd = cmd.arg("--home").arg(home.to_string_lossy().to_string());
        }

        let result = self.run(&cmd).await;

        if let Err(e) = self.system.remove_path(&workdir) {
            warn!("Failed to remove installer checkout {:?}: {}", workdir, e);
        }

        let output = result?;
        if !output.success() {
            return Err(ConvergeError::ToolInstallError {
                message: "installer exited non-zero, see logs for details".to_string(),
                output: Some(output),
            });
        }

        let install_dir = self.acme_home(context, &account);
        debug!("acme.sh successfully installed in {:?}", install_dir);
        Ok(install_dir)
    }

    async fn version(&self, context: &InstallContext) -> ConvergeResult<Option<String>> {
        let account = self.system.resolve_user(&context.user)?;
        let cmd = self.base_command(context, &account).arg("--version");
        let output = self.run(&cmd).await?;
        if !output.success() {
            return Err(ConvergeError::OperationError {
                operation: "version".to_string(),
                output,
            });
        }
        Ok(output::parse_version(&output.stdout))
    }

    async fn upgrade(&self, context: &InstallContext) -> ConvergeResult<()> {
        let account = self.system.resolve_user(&context.user)?;
        let cmd = self.base_command(context, &account).arg("--upgrade");
        let output = self.run(&cmd).await?;
        if !output.success() {
            return Err(ConvergeError::OperationError {
                operation: "upgrade".to_string(),
                output,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl CertificateOperator for AcmeShClient {
    fn locate_binary(&self, user: &str) -> ConvergeResult<PathBuf> {
        let context = self.context_for(user);
        let path = ToolManager::binary_path(self, &context)?;
        if self.system.binary_exists(&path) {
            Ok(path)
        } else {
            Err(ConvergeError::ToolNotFound(path.display().to_string()))
        }
    }

    async fn get_status(&self, target: &CertificateTarget) -> ConvergeResult<CertificateStatus> {
        if !self.system.directory_exists(&target.cert_path) {
            debug!(domain = %target.common_name, "Certificate path {:?} does not exist", target.cert_path);
            return Ok(CertificateStatus::absent());
        }
        if !self.system.directory_exists(&target.directory()) {
            debug!(domain = %target.common_name, "Certificate directory {:?} does not exist", target.directory());
            return Ok(CertificateStatus::absent());
        }
        if !self.system.file_exists(&target.paths().certificate) {
            debug!(domain = %target.common_name, "Certificate file is missing");
            return Ok(CertificateStatus::absent());
        }

        let context = self.context_for(&target.user);
        let account = self.system.resolve_user(&target.user)?;
        let cmd = self
            .base_command(&context, &account)
            .args(["--info", "-d", target.common_name.as_str()]);
        let output = self.run(&cmd).await?;

        if !output.success() {
            return match output::classify_failure(Operation::Info, &output) {
                Some(Notice::NotIssued) => Ok(CertificateStatus::absent()),
                _ => Err(ConvergeError::OperationError {
                    operation: Operation::Info.as_str().to_string(),
                    output,
                }),
            };
        }

        let report = output::parse_info(&output.stdout);
        if !report.issued() {
            return Ok(CertificateStatus::absent());
        }

        Ok(CertificateStatus::issued(target, report.next_renew_time))
    }

    async fn issue(&self, spec: &CertificateSpec) -> ConvergeResult<OperationOutcome> {
        let account = self.system.resolve_user(&spec.user)?;
        let target = spec.target();
        self.system
            .create_dir_all(&target.directory(), Some(&account))?;

        let cmd = self.issue_command(spec, &account);
        info!(domain = %spec.common_name, mode = ?spec.validation_mode, "Issuing certificate");
        let output = self.run(&cmd).await?;

        if output.success() {
            Ok(OperationOutcome::Completed(target.paths()))
        } else {
            self.interpret_failure(Operation::Issue, &spec.common_name, output)
        }
    }

    async fn renew(
        &self,
        target: &CertificateTarget,
        force: bool,
    ) -> ConvergeResult<OperationOutcome> {
        let context = self.context_for(&target.user);
        let account = self.system.resolve_user(&target.user)?;
        let mut cmd = self
            .base_command(&context, &account)
            .args(["--renew", "-d", target.common_name.as_str()]);
        if force {
            cmd = cmd.arg("--force");
        }

        info!(domain = %target.common_name, "Renewing certificate");
        let output = self.run(&cmd).await?;

        if output.success() {
            Ok(OperationOutcome::Completed(target.paths()))
        } else {
            self.interpret_failure(Operation::Renew, &target.common_name, output)
        }
    }
}
