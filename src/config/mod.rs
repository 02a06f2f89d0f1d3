//! Configuration management
//!
//! This module provides YAML-based configuration management with support for:
//! - Environment variable overrides
//! - Multiple configuration file locations
//! - Default values for all settings
//! - Certificate definitions applied by `acme-converge apply`

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::models::CertificateSpec;
use crate::utils::error::{ConvergeError, ConvergeResult};

/// Main application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub acme_sh: AcmeShConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Report what would change without changing anything
    #[serde(default)]
    pub dry_run: bool,
    /// Certificates converged by `apply`
    #[serde(default)]
    pub certificates: Vec<CertificateSpec>,
}

/// acme.sh installation and invocation settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AcmeShConfig {
    /// User owning the installation
    #[serde(default = "default_user")]
    pub user: String,
    /// Account email passed to the installer and to account registration
    #[serde(default)]
    pub email: String,
    /// Install to /opt/acme.sh instead of the user's home
    #[serde(default)]
    pub system: bool,
    /// Custom acme.sh home directory
    #[serde(default)]
    pub home: Option<PathBuf>,
    /// Repository cloned by the installer
    #[serde(default = "default_repo_url")]
    pub repo_url: String,
    /// Where the installer checkout is placed
    #[serde(default = "default_clone_dir")]
    pub clone_dir: PathBuf,
    /// Hard limit for a single acme.sh invocation
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    /// Default ACME server (letsencrypt, zerossl, or a directory URL)
    #[serde(default)]
    pub server: Option<String>,
}

impl AcmeShConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

fn default_user() -> String {
    "root".to_string()
}

fn default_repo_url() -> String {
    "https://github.com/acmesh-official/acme.sh".to_string()
}

fn default_clone_dir() -> PathBuf {
    PathBuf::from("/tmp")
}

fn default_timeout_seconds() -> u64 {
    600
}

impl Default for AcmeShConfig {
    fn default() -> Self {
        Self {
            user: default_user(),
            email: String::new(),
            system: false,
            home: None,
            repo_url: default_repo_url(),
            clone_dir: default_clone_dir(),
            timeout_seconds: default_timeout_seconds(),
            server: None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    /// Log output target (console or file)
    #[serde(default = "default_log_target")]
    pub target: LogTarget,
    /// Directory for log files (used when target is "file" or "both")
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// Log file name prefix (default: "acme-converge")
    #[serde(default = "default_log_prefix")]
    pub log_prefix: String,
    /// Enable daily log rotation
    #[serde(default = "default_log_rotation")]
    pub daily_rotation: bool,
}

/// Log output target
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogTarget {
    /// Log to stderr
    #[default]
    Console,
    /// Log to file with optional rotation
    File,
    /// Log to both stderr and file
    Both,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Compact,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> LogFormat {
    LogFormat::Pretty
}

fn default_log_target() -> LogTarget {
    LogTarget::Console
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("/var/log/acme-converge")
}

fn default_log_prefix() -> String {
    "acme-converge".to_string()
}

fn default_log_rotation() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            target: default_log_target(),
            log_dir: default_log_dir(),
            log_prefix: default_log_prefix(),
            daily_rotation: default_log_rotation(),
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl AppConfig {
    /// Load configuration from file and environment variables
    ///
    /// Configuration is loaded in the following order (later overrides earlier):
    /// 1. Default values
    /// 2. Configuration file (YAML), `path` if given, else the first one found
    /// 3. Environment variables (prefixed with ACME_CONVERGE_)
    pub fn load(path: Option<&Path>) -> Result<Self> {
        // Try to load .env file if it exists
        let _ = dotenvy::dotenv();

        let config_path = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var("ACME_CONVERGE_CONFIG").map(PathBuf::from).ok())
            .or_else(Self::find_config_file);

        let mut config = match config_path {
            Some(ref path) => Self::from_file(path)?,
            None => AppConfig::default(),
        };

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Parse a configuration file without overrides or validation
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        Self::from_yaml(&contents)
            .with_context(|| format!("Failed to parse config file: {:?}", path))
    }

    pub fn from_yaml(contents: &str) -> Result<Self> {
        Ok(serde_norway::from_str(contents)?)
    }

    /// Find the configuration file in standard locations
    fn find_config_file() -> Option<PathBuf> {
        let paths = [
            // Current directory
            PathBuf::from("acme-converge.yaml"),
            PathBuf::from("config/acme-converge.yaml"),
            // System config directory
            PathBuf::from("/etc/acme-converge/config.yaml"),
            // User config directory
            dirs::config_dir()
                .map(|p| p.join("acme-converge/config.yaml"))
                .unwrap_or_default(),
        ];

        paths.into_iter().find(|p| p.is_file())
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        // acme.sh overrides
        if let Some(user) = var("ACME_CONVERGE_USER") {
            self.acme_sh.user = user;
        }
        if let Some(email) = var("ACME_CONVERGE_EMAIL") {
            self.acme_sh.email = email;
        }
        if let Some(home) = var("ACME_CONVERGE_HOME") {
            self.acme_sh.home = Some(PathBuf::from(home));
        }
        if let Some(timeout) = var("ACME_CONVERGE_TIMEOUT") {
            if let Ok(secs) = timeout.parse() {
                self.acme_sh.timeout_seconds = secs;
            }
        }
        if let Some(dry_run) = var("ACME_CONVERGE_DRY_RUN").as_deref().and_then(parse_bool) {
            self.dry_run = dry_run;
        }

        // Logging overrides
        if let Some(level) = var("RUST_LOG") {
            self.logging.level = level;
        }
        if let Some(format) = var("ACME_CONVERGE_LOG_FORMAT") {
            self.logging.format = match format.to_lowercase().as_str() {
                "json" => LogFormat::Json,
                "compact" => LogFormat::Compact,
                _ => LogFormat::Pretty,
            };
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> ConvergeResult<()> {
        if self.acme_sh.timeout_seconds == 0 {
            return Err(ConvergeError::Config(
                "acme_sh.timeout_seconds cannot be 0".to_string(),
            ));
        }

        if self.acme_sh.repo_url.is_empty() {
            return Err(ConvergeError::Config(
                "acme_sh.repo_url cannot be empty".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for cert in &self.certificates {
            if !seen.insert(cert.common_name.as_str()) {
                return Err(ConvergeError::Config(format!(
                    "Duplicate certificate common_name: {}",
                    cert.common_name
                )));
            }
            if !cert.cert_path.is_absolute() {
                return Err(ConvergeError::Config(format!(
                    "cert_path for {} must be absolute: {:?}",
                    cert.common_name, cert.cert_path
                )));
            }
        }

        Ok(())
    }

    /// Configured certificate by common name
    pub fn certificate(&self, common_name: &str) -> Option<&CertificateSpec> {
        self.certificates
            .iter()
            .find(|c| c.common_name == common_name)
    }
}
