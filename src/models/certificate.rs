//! Certificate desired-state and observed-state models

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::utils::error::{ConvergeError, ConvergeResult};
use crate::utils::validation::{
    validate_dns_plugin, validate_domain, validate_env_name, validate_username,
};

/// How the CA validates domain ownership
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ValidationMode {
    /// HTTP-01 through an existing web root
    Webroot,
    /// HTTP-01 through acme.sh's own listener
    Standalone,
    /// TLS-ALPN-01 through acme.sh's own listener
    StandaloneTlsAlpn,
    /// DNS-01 through an acme.sh DNS plugin
    Dns,
}

/// Private key algorithm
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum KeyAlgorithm {
    #[default]
    Ec256,
    Ec384,
    Ec521,
    Rsa2048,
    Rsa3072,
    Rsa4096,
}

impl KeyAlgorithm {
    /// Value for acme.sh `--keylength`
    pub fn keylength(&self) -> &'static str {
        match self {
            KeyAlgorithm::Ec256 => "ec-256",
            KeyAlgorithm::Ec384 => "ec-384",
            KeyAlgorithm::Ec521 => "ec-521",
            KeyAlgorithm::Rsa2048 => "2048",
            KeyAlgorithm::Rsa3072 => "3072",
            KeyAlgorithm::Rsa4096 => "4096",
        }
    }
}

/// Requested certificate validity
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidityWindow {
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
}

fn default_user() -> String {
    "root".to_string()
}

/// Desired state for one certificate
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CertificateSpec {
    /// Primary domain, unique key for the certificate
    pub common_name: String,
    /// Additional subject names, kept sorted so the command line is stable
    #[serde(default)]
    pub aliases: BTreeSet<String>,
    pub validation_mode: ValidationMode,
    #[serde(default)]
    pub webroot_path: Option<PathBuf>,
    #[serde(default)]
    pub dns_plugin: Option<String>,
    /// Passed to acme.sh as environment variables, never written to disk
    #[serde(default)]
    pub dns_credentials: BTreeMap<String, String>,
    #[serde(default)]
    pub http_port: Option<u16>,
    #[serde(default)]
    pub tls_port: Option<u16>,
    #[serde(default)]
    pub key_algorithm: KeyAlgorithm,
    #[serde(default)]
    pub validity_window: Option<ValidityWindow>,
    #[serde(default)]
    pub force: bool,
    /// User owning the acme.sh installation
    #[serde(default = "default_user")]
    pub user: String,
    /// Deploy directory; files land in `{cert_path}/{common_name}/`
    pub cert_path: PathBuf,
    /// ACME server (acme.sh `--server`)
    #[serde(default)]
    pub server: Option<String>,
}

impl CertificateSpec {
    /// Create a spec with defaults for everything but the required fields
    pub fn new(
        common_name: impl Into<String>,
        validation_mode: ValidationMode,
        cert_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            common_name: common_name.into(),
            aliases: BTreeSet::new(),
            validation_mode,
            webroot_path: None,
            dns_plugin: None,
            dns_credentials: BTreeMap::new(),
            http_port: None,
            tls_port: None,
            key_algorithm: KeyAlgorithm::default(),
            validity_window: None,
            force: false,
            user: default_user(),
            cert_path: cert_path.into(),
            server: None,
        }
    }

    /// Check the mode preconditions and field syntax.
    ///
    /// Runs before any external call; a failure here never reaches acme.sh.
    pub fn validate(&self) -> ConvergeResult<()> {
        match self.validation_mode {
            ValidationMode::Webroot => {
                if self.webroot_path.is_none() {
                    return Err(ConvergeError::invalid(
                        "validation_mode webroot requires webroot_path",
                    ));
                }
            }
            ValidationMode::Dns => {
                let plugin = self.dns_plugin.as_deref().ok_or_else(|| {
                    ConvergeError::invalid("validation_mode dns requires dns_plugin")
                })?;
                if !validate_dns_plugin(plugin) {
                    return Err(ConvergeError::invalid(format!(
                        "invalid dns_plugin '{}', expected a name like dns_cf",
                        plugin
                    )));
                }
                if self.dns_credentials.is_empty() {
                    return Err(ConvergeError::invalid(
                        "validation_mode dns requires non-empty dns_credentials",
                    ));
                }
                if let Some(key) = self.dns_credentials.keys().find(|k| !validate_env_name(k)) {
                    return Err(ConvergeError::invalid(format!(
                        "dns_credentials key '{}' is not a valid environment variable name",
                        key
                    )));
                }
            }
            ValidationMode::Standalone | ValidationMode::StandaloneTlsAlpn => {}
        }

        let allow_wildcard = self.validation_mode == ValidationMode::Dns;
        if !validate_domain(&self.common_name, allow_wildcard) {
            return Err(ConvergeError::invalid(format!(
                "invalid common_name '{}'",
                self.common_name
            )));
        }
        if let Some(alias) = self
            .aliases
            .iter()
            .find(|a| !validate_domain(a, allow_wildcard))
        {
            return Err(ConvergeError::invalid(format!("invalid alias '{}'", alias)));
        }

        if !self.cert_path.is_absolute() {
            return Err(ConvergeError::invalid(format!(
                "cert_path must be absolute: {}",
                self.cert_path.display()
            )));
        }

        if !validate_username(&self.user) {
            return Err(ConvergeError::invalid(format!("invalid user '{}'", self.user)));
        }

        if let Some(window) = &self.validity_window {
            if window.not_before >= window.not_after {
                return Err(ConvergeError::invalid(
                    "validity_window.not_before must be earlier than not_after",
                ));
            }
        }

        Ok(())
    }

    /// Subject names after the common name, without duplicates of it
    pub fn extra_names(&self) -> impl Iterator<Item = &str> {
        self.aliases
            .iter()
            .map(String::as_str)
            .filter(move |alias| *alias != self.common_name)
    }

    pub fn target(&self) -> CertificateTarget {
        CertificateTarget {
            common_name: self.common_name.clone(),
            user: self.user.clone(),
            cert_path: self.cert_path.clone(),
        }
    }
}

/// The key an operator needs to locate a certificate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateTarget {
    pub common_name: String,
    pub user: String,
    pub cert_path: PathBuf,
}

impl CertificateTarget {
    pub fn new(
        common_name: impl Into<String>,
        user: impl Into<String>,
        cert_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            common_name: common_name.into(),
            user: user.into(),
            cert_path: cert_path.into(),
        }
    }

    /// `{cert_path}/{common_name}`
    pub fn directory(&self) -> PathBuf {
        self.cert_path.join(&self.common_name)
    }

    pub fn paths(&self) -> PathBundle {
        PathBundle::for_domain(&self.cert_path, &self.common_name)
    }
}

/// Deployed certificate files
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PathBundle {
    pub certificate: PathBuf,
    pub private_key: PathBuf,
    pub fullchain: PathBuf,
    pub ca: PathBuf,
}

impl PathBundle {
    /// Paths follow `{cert_path}/{common_name}/{filename}`
    pub fn for_domain(cert_path: &Path, common_name: &str) -> Self {
        let dir = cert_path.join(common_name);
        Self {
            certificate: dir.join(format!("{}.cer", common_name)),
            private_key: dir.join(format!("{}.key", common_name)),
            fullchain: dir.join("fullchain.cer"),
            ca: dir.join("ca.cer"),
        }
    }
}

/// Observed certificate state, fetched fresh for every reconciliation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CertificateStatus {
    pub exists: bool,
    pub next_renew_time: Option<DateTime<Utc>>,
    pub paths: Option<PathBundle>,
}

impl CertificateStatus {
    /// Never issued, or no longer known to acme.sh
    pub fn absent() -> Self {
        Self {
            exists: false,
            next_renew_time: None,
            paths: None,
        }
    }

    pub fn issued(target: &CertificateTarget, next_renew_time: Option<DateTime<Utc>>) -> Self {
        Self {
            exists: true,
            next_renew_time,
            paths: Some(target.paths()),
        }
    }
}
