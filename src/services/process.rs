//! External process execution
//!
//! Runs acme.sh (and its installer) as a child process, optionally as another
//! user, with a hard timeout. Environment overrides carry DNS credentials to
//! the child without writing them to disk; only their names are logged.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, error, info};

use super::system::UserAccount;
use crate::utils::error::{ConvergeError, ConvergeResult};

/// Raw result of an external invocation, passed through unmodified on failure
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` when the process was killed by a signal or timed out
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// stdout and stderr joined, for marker scanning
    pub fn combined(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// A command line plus its execution context
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExternalCommand {
    pub argv: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub run_as: Option<UserAccount>,
    pub env_overrides: BTreeMap<String, String>,
}

impl ExternalCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            argv: vec![program.into()],
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.argv.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.argv.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn run_as(mut self, account: UserAccount) -> Self {
        self.run_as = Some(account);
        self
    }

    pub fn envs(mut self, vars: &BTreeMap<String, String>) -> Self {
        self.env_overrides
            .extend(vars.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    pub fn program(&self) -> &str {
        self.argv.first().map(String::as_str).unwrap_or_default()
    }

    /// Command line for logs
    pub fn display(&self) -> String {
        self.argv.join(" ")
    }

    pub fn has_arg(&self, arg: &str) -> bool {
        self.argv.iter().any(|a| a == arg)
    }

    /// Value following `flag`, if present
    pub fn arg_value(&self, flag: &str) -> Option<&str> {
        self.argv
            .iter()
            .position(|a| a == flag)
            .and_then(|i| self.argv.get(i + 1))
            .map(String::as_str)
    }
}

/// Synchronous-from-the-caller's-view process execution
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run_external(&self, command: &ExternalCommand) -> ConvergeResult<CommandOutput>;
}

fn default_timeout() -> Duration {
    Duration::from_secs(600)
}

/// Runs commands with tokio, killing them when the timeout expires
#[derive(Debug, Clone)]
pub struct TokioProcessRunner {
    timeout: Duration,
}

impl Default for TokioProcessRunner {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
        }
    }
}

impl TokioProcessRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run_external(&self, command: &ExternalCommand) -> ConvergeResult<CommandOutput> {
        let command_str = command.display();
        let program = command.program();
        if program.is_empty() {
            return Err(ConvergeError::Internal("empty command line".to_string()));
        }

        let current_uid = unsafe { libc::getuid() };
        let env_names: Vec<&str> = command.env_overrides.keys().map(String::as_str).collect();

        info!(
            run_as = command.run_as.as_ref().map(|a| a.name.as_str()).unwrap_or("(current)"),
            uid = current_uid,
            env = ?env_names,
            "Executing: {}",
            command_str
        );

        let mut cmd = Command::new(program);
        cmd.args(&command.argv[1..])
            .envs(&command.env_overrides)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &command.working_dir {
            cmd.current_dir(dir);
        }

        if let Some(account) = &command.run_as {
            cmd.env("HOME", &account.home)
                .env("USER", &account.name)
                .env("LOGNAME", &account.name);

            #[cfg(unix)]
            if account.uid != current_uid {
                cmd.gid(account.gid).uid(account.uid);
            }
        }

        let mut child = cmd.spawn().map_err(|e| {
            error!("Failed to spawn '{}': {}", command_str, e);
            ConvergeError::Io(e)
        })?;

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| ConvergeError::Internal("child stdout not captured".to_string()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| ConvergeError::Internal("child stderr not captured".to_string()))?;

        let result = timeout(self.timeout, async {
            let mut stdout_buf = Vec::new();
            let mut stderr_buf = Vec::new();

            let (stdout_read, stderr_read, status) = tokio::join!(
                stdout.read_to_end(&mut stdout_buf),
                stderr.read_to_end(&mut stderr_buf),
                child.wait()
            );
            stdout_read?;
            stderr_read?;

            Ok::<_, std::io::Error>((
                String::from_utf8_lossy(&stdout_buf).into_owned(),
                String::from_utf8_lossy(&stderr_buf).into_owned(),
                status?,
            ))
        })
        .await;

        match result {
            Ok(Ok((stdout_str, stderr_str, exit_status))) => {
                let output = CommandOutput {
                    exit_code: exit_status.code(),
                    stdout: stdout_str,
                    stderr: stderr_str,
                };

                if output.success() {
                    debug!(
                        stdout_len = output.stdout.len(),
                        stderr_len = output.stderr.len(),
                        "Command succeeded: {}",
                        command_str
                    );
                } else {
                    debug!(
                        exit_code = ?output.exit_code,
                        "Command exited non-zero: {}\nstdout:\n{}\nstderr:\n{}",
                        command_str,
                        output.stdout,
                        output.stderr
                    );
                }

                Ok(output)
            }
            Ok(Err(e)) => {
                error!("Command execution error: command='{}', error='{}'", command_str, e);
                Err(ConvergeError::Io(e))
            }
            Err(_) => {
                error!(
                    "Command TIMEOUT after {}s: command='{}'",
                    self.timeout.as_secs(),
                    command_str
                );
                let _ = child.kill().await;

                Ok(CommandOutput {
                    exit_code: None,
                    stdout: String::new(),
                    stderr: format!(
                        "Command timed out after {} seconds",
                        self.timeout.as_secs()
                    ),
                })
            }
        }
    }
}
