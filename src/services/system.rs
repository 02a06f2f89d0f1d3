//! Host system operations
//!
//! User lookup, file checks, and the clone/remove steps of the acme.sh
//! installer. Kept behind a trait so the reconcilers can be exercised
//! without touching the real filesystem.

use std::path::{Path, PathBuf};
use std::process::Command;

use git2::build::RepoBuilder;
use tracing::{debug, info, warn};

use crate::utils::error::{ConvergeError, ConvergeResult};

/// A local account resolved from the passwd database
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserAccount {
    pub name: String,
    pub uid: u32,
    pub gid: u32,
    pub home: PathBuf,
}

/// Filesystem and account collaborators
pub trait SystemOps: Send + Sync {
    fn resolve_user(&self, user: &str) -> ConvergeResult<UserAccount>;

    fn resolve_home(&self, user: &str) -> ConvergeResult<PathBuf> {
        Ok(self.resolve_user(user)?.home)
    }

    fn binary_exists(&self, path: &Path) -> bool;

    fn directory_exists(&self, path: &Path) -> bool;

    fn file_exists(&self, path: &Path) -> bool;

    /// Create `path` and its parents, handing ownership to `owner` if given
    fn create_dir_all(&self, path: &Path, owner: Option<&UserAccount>) -> ConvergeResult<()>;

    /// Clone `repo_url` into `{dest_dir}/{name}`; false on any failure
    fn clone_source(&self, dest_dir: &Path, repo_url: &str, name: &str) -> bool;

    fn remove_path(&self, path: &Path) -> ConvergeResult<()>;
}

/// Parse one `getent passwd` line: `name:x:uid:gid:gecos:home:shell`
pub fn parse_passwd_entry(line: &str) -> Option<UserAccount> {
    let fields: Vec<&str> = line.trim_end().split(':').collect();
    if fields.len() < 7 {
        return None;
    }

    Some(UserAccount {
        name: fields[0].to_string(),
        uid: fields[2].parse().ok()?,
        gid: fields[3].parse().ok()?,
        home: PathBuf::from(fields[5]),
    })
}

/// The real host
#[derive(Debug, Clone, Default)]
pub struct HostSystem;

impl HostSystem {
    pub fn new() -> Self {
        Self
    }
}

impl SystemOps for HostSystem {
    fn resolve_user(&self, user: &str) -> ConvergeResult<UserAccount> {
        let output = Command::new("getent")
            .args(["passwd", user])
            .output()
            .map_err(|e| {
                ConvergeError::Internal(format!("Failed to run getent for '{}': {}", user, e))
            })?;

        if !output.status.success() {
            return Err(ConvergeError::invalid(format!("unknown user '{}'", user)));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let account = stdout
            .lines()
            .next()
            .and_then(parse_passwd_entry)
            .ok_or_else(|| {
                ConvergeError::Internal(format!("Unparseable passwd entry for '{}'", user))
            })?;

        debug!(user = %account.name, uid = account.uid, home = ?account.home, "Resolved user");
        Ok(account)
    }

    fn binary_exists(&self, path: &Path) -> bool {
        match std::fs::metadata(path) {
            Ok(meta) if meta.is_file() => {
                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    meta.permissions().mode() & 0o111 != 0
                }
                #[cfg(not(unix))]
                {
                    true
                }
            }
            _ => false,
        }
    }

    fn directory_exists(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn file_exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn create_dir_all(&self, path: &Path, owner: Option<&UserAccount>) -> ConvergeResult<()> {
        std::fs::create_dir_all(path)?;

        #[cfg(unix)]
        if let Some(account) = owner {
            std::os::unix::fs::chown(path, Some(account.uid), Some(account.gid))?;
        }
        #[cfg(not(unix))]
        let _ = owner;

        Ok(())
    }

    fn clone_source(&self, dest_dir: &Path, repo_url: &str, name: &str) -> bool {
        let path = dest_dir.join(name);

        if path.exists() {
            debug!("Removing stale clone at {:?}", path);
            if let Err(e) = self.remove_path(&path) {
                warn!("Failed to remove stale clone {:?}: {}", path, e);
                return false;
            }
        }

        info!("Cloning {} to {:?}", repo_url, path);
        match RepoBuilder::new().clone(repo_url, &path) {
            Ok(_) => true,
            Err(e) => {
                warn!("Failed to clone {}: {}", repo_url, e.message());
                false
            }
        }
    }

    fn remove_path(&self, path: &Path) -> ConvergeResult<()> {
        match std::fs::symlink_metadata(path) {
            Ok(meta) if meta.is_dir() => std::fs::remove_dir_all(path)?,
            Ok(_) => std::fs::remove_file(path)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }
}
