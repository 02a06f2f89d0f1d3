//! Test world for Cucumber scenarios

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use cucumber::World;

use acme_converge::models::{
    CertificateSpec, CertificateStatus, CertificateTarget, InstallContext, ToolRequest,
};
use acme_converge::services::{
    CertificateOperator, CertificateReconciler, OperationOutcome, ToolManager, ToolReconciler,
};
use acme_converge::utils::ErrorResponse;
use acme_converge::{ConvergeError, ConvergeResult};

/// Shared state of the scripted collaborators
#[derive(Debug, Default)]
pub struct Script {
    pub tool_present: bool,
    pub status: Option<CertificateStatus>,
    /// Reply to the next issue or renew, success with paths when unset
    pub outcome: Option<ConvergeResult<OperationOutcome>>,
    /// Versions reported before and after an upgrade
    pub versions: Vec<String>,
    pub calls: Vec<String>,
}

/// Certificate operator and tool manager answering from a [`Script`]
#[derive(Debug, Clone, Default)]
pub struct Scripted(pub Arc<Mutex<Script>>);

impl Scripted {
    fn record(&self, call: &str) {
        self.0.lock().unwrap().calls.push(call.to_string());
    }

    fn next_outcome(&self, target: &CertificateTarget) -> ConvergeResult<OperationOutcome> {
        self.0
            .lock()
            .unwrap()
            .outcome
            .take()
            .unwrap_or_else(|| Ok(OperationOutcome::Completed(target.paths())))
    }
}

#[async_trait]
impl CertificateOperator for Scripted {
    fn locate_binary(&self, user: &str) -> ConvergeResult<PathBuf> {
        self.record("locate_binary");
        let path = PathBuf::from(format!("/home/{}/.acme.sh/acme.sh", user));
        if self.0.lock().unwrap().tool_present {
            Ok(path)
        } else {
            Err(ConvergeError::ToolNotFound(path.display().to_string()))
        }
    }

    async fn get_status(&self, _target: &CertificateTarget) -> ConvergeResult<CertificateStatus> {
        self.record("get_status");
        Ok(self
            .0
            .lock()
            .unwrap()
            .status
            .clone()
            .unwrap_or_else(CertificateStatus::absent))
    }

    async fn issue(&self, spec: &CertificateSpec) -> ConvergeResult<OperationOutcome> {
        self.record("issue");
        self.next_outcome(&spec.target())
    }

    async fn renew(
        &self,
        target: &CertificateTarget,
        _force: bool,
    ) -> ConvergeResult<OperationOutcome> {
        self.record("renew");
        self.next_outcome(target)
    }
}

#[async_trait]
impl ToolManager for Scripted {
    fn binary_path(&self, context: &InstallContext) -> ConvergeResult<PathBuf> {
        Ok(PathBuf::from(format!("/home/{}/.acme.sh/acme.sh", context.user)))
    }

    fn binary_exists(&self, _path: &Path) -> bool {
        self.0.lock().unwrap().tool_present
    }

    async fn install(&self, context: &InstallContext, _force: bool) -> ConvergeResult<PathBuf> {
        self.record("install");
        Ok(PathBuf::from(format!("/home/{}/.acme.sh", context.user)))
    }

    async fn version(&self, _context: &InstallContext) -> ConvergeResult<Option<String>> {
        self.record("version");
        let mut script = self.0.lock().unwrap();
        if script.versions.is_empty() {
            return Ok(None);
        }
        Ok(Some(script.versions.remove(0)))
    }

    async fn upgrade(&self, _context: &InstallContext) -> ConvergeResult<()> {
        self.record("upgrade");
        Ok(())
    }
}

/// Test world that maintains state across scenario steps
#[derive(Debug, World)]
#[world(init = Self::new)]
pub struct TestWorld {
    pub collaborators: Scripted,

    /// Certificate under test
    pub spec: Option<CertificateSpec>,

    /// Installation under test
    pub tool_request: ToolRequest,

    pub now: DateTime<Utc>,
    pub dry_run: bool,

    /// Serialized result of the last reconciliation
    pub last_result: Option<serde_json::Value>,

    /// Serialized error of the last reconciliation
    pub last_error: Option<serde_json::Value>,
}

impl TestWorld {
    pub fn new() -> Self {
        Self {
            collaborators: Scripted::default(),
            spec: None,
            tool_request: ToolRequest {
                context: InstallContext::new("admin@example.com", "vagrant"),
                force: false,
                upgrade: false,
            },
            now: Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap(),
            dry_run: false,
            last_result: None,
            last_error: None,
        }
    }

    pub fn script(&self) -> std::sync::MutexGuard<'_, Script> {
        self.collaborators.0.lock().unwrap()
    }

    pub fn spec_mut(&mut self) -> &mut CertificateSpec {
        self.spec.as_mut().expect("no certificate defined")
    }

    pub fn calls(&self) -> Vec<String> {
        self.script().calls.clone()
    }

    fn record<T: serde::Serialize>(&mut self, result: ConvergeResult<T>) {
        match result {
            Ok(value) => {
                self.last_result = Some(serde_json::to_value(value).unwrap());
                self.last_error = None;
            }
            Err(err) => {
                self.last_result = None;
                self.last_error = Some(serde_json::to_value(ErrorResponse::from(&err)).unwrap());
            }
        }
    }

    pub async fn converge(&mut self) {
        let spec = self.spec.clone().expect("no certificate defined");
        let reconciler = CertificateReconciler::new(Arc::new(self.collaborators.clone()));
        let result = reconciler.converge_at(&spec, self.now, self.dry_run).await;
        self.record(result);
    }

    pub async fn reconcile_tool(&mut self) {
        let reconciler = ToolReconciler::new(Arc::new(self.collaborators.clone()));
        let result = reconciler.reconcile(&self.tool_request, self.dry_run).await;
        self.record(result);
    }

    /// A field of the last result
    pub fn field(&self, name: &str) -> serde_json::Value {
        let result = self
            .last_result
            .as_ref()
            .unwrap_or_else(|| panic!("no result available, error: {:?}", self.last_error));
        result.get(name).cloned().unwrap_or(serde_json::Value::Null)
    }
}

impl Default for TestWorld {
    fn default() -> Self {
        Self::new()
    }
}
