use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use tokio::process::Command as TokioCommand;
use uuid::Uuid;
use walkdir::WalkDir;

use super::{
    CommandOutput, EnvironmentSource, SandboxBackend, SandboxCommand, SandboxEnvironment,
    SnapshotInfo,
};
use crate::error::SandboxError;

struct LiveEnvironment {
    dir: PathBuf,
    deadline: Instant,
    lifetime: Duration,
}

/// Runs environments as directories on the host.
///
/// Each environment gets `<root>/environments/<id>`; commands run there with
/// a cleared environment (only `PATH` and `HOME` are set) and are killed
/// when the environment's lifetime runs out. Snapshots are directory copies
/// under `<root>/snapshots`. There is no privilege separation, so `sudo`
/// steps run as the current user.
pub struct LocalSandboxBackend {
    root: PathBuf,
    snapshot_ttl: chrono::Duration,
    live: Mutex<HashMap<String, LiveEnvironment>>,
}

impl LocalSandboxBackend {
    pub fn new(root: impl Into<PathBuf>, snapshot_ttl: chrono::Duration) -> Self {
        Self {
            root: root.into(),
            snapshot_ttl,
            live: Mutex::new(HashMap::new()),
        }
    }

    fn environments_dir(&self) -> PathBuf {
        self.root.join("environments")
    }

    fn snapshots_dir(&self) -> PathBuf {
        self.root.join("snapshots")
    }

    fn lookup(&self, env: &SandboxEnvironment) -> Result<(PathBuf, Instant, Duration), SandboxError> {
        self.live
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&env.id)
            .map(|live| (live.dir.clone(), live.deadline, live.lifetime))
            .ok_or_else(|| SandboxError::UnknownEnvironment(env.id.clone()))
    }

    async fn copy_tree_blocking(src: PathBuf, dst: PathBuf) -> Result<(), SandboxError> {
        tokio::task::spawn_blocking(move || copy_tree(&src, &dst))
            .await
            .map_err(|e| SandboxError::Snapshot(format!("copy task failed: {}", e)))?
    }
}

/// Joins a relative sandbox path onto the environment directory, refusing
/// anything that could escape it.
fn resolve_inside(dir: &Path, relative: &str) -> Result<PathBuf, SandboxError> {
    let path = Path::new(relative);
    let escapes = path.components().any(|c| {
        matches!(
            c,
            Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    });
    if escapes {
        return Err(SandboxError::InvalidPath(relative.to_string()));
    }
    Ok(dir.join(path))
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> SandboxError + '_ {
    move |source| SandboxError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn copy_tree(src: &Path, dst: &Path) -> Result<(), SandboxError> {
    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry.map_err(|e| SandboxError::Snapshot(e.to_string()))?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|_| SandboxError::InvalidPath(entry.path().display().to_string()))?;
        let target = dst.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            std::fs::create_dir_all(&target).map_err(io_error(&target))?;
        } else if file_type.is_file() {
            std::fs::copy(entry.path(), &target).map_err(io_error(&target))?;
        } else {
            log::debug!("Skipping non-regular file {}", entry.path().display());
        }
    }
    Ok(())
}

#[async_trait]
impl SandboxBackend for LocalSandboxBackend {
    async fn provision(
        &self,
        source: &EnvironmentSource,
        lifetime: Duration,
    ) -> Result<SandboxEnvironment, SandboxError> {
        let deadline = Instant::now().checked_add(lifetime).ok_or_else(|| {
            SandboxError::Provision(format!(
                "lifetime of {} seconds is out of range",
                lifetime.as_secs()
            ))
        })?;
        let id = format!("sbx_{}", Uuid::new_v4().simple());
        let dir = self.environments_dir().join(&id);

        let (runtime, snapshot_id) = match source {
            EnvironmentSource::Runtime(runtime) => {
                tokio::fs::create_dir_all(&dir)
                    .await
                    .map_err(io_error(&dir))?;
                (runtime.clone(), None)
            }
            EnvironmentSource::Snapshot(snapshot_id) => {
                let snapshot_dir = self.snapshots_dir().join(snapshot_id);
                if !snapshot_dir.is_dir() {
                    return Err(SandboxError::Provision(format!(
                        "snapshot {} not found",
                        snapshot_id
                    )));
                }
                Self::copy_tree_blocking(snapshot_dir, dir.clone()).await?;
                ("snapshot".to_string(), Some(snapshot_id.clone()))
            }
        };

        self.live
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(
                id.clone(),
                LiveEnvironment {
                    dir,
                    deadline,
                    lifetime,
                },
            );

        log::debug!("Provisioned sandbox {}", id);
        Ok(SandboxEnvironment {
            id,
            runtime,
            snapshot_id,
        })
    }

    async fn run(
        &self,
        env: &SandboxEnvironment,
        command: &SandboxCommand,
    ) -> Result<CommandOutput, SandboxError> {
        let (dir, deadline, lifetime) = self.lookup(env)?;
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(SandboxError::Timeout(lifetime.as_secs()));
        }

        let cwd = match &command.cwd {
            Some(cwd) => resolve_inside(&dir, cwd)?,
            None => dir.clone(),
        };

        let mut cmd = TokioCommand::new(&command.program);
        cmd.args(&command.args)
            .current_dir(&cwd)
            .env_clear()
            .env("HOME", &dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(path) = std::env::var_os("PATH") {
            cmd.env("PATH", path);
        }

        let output = match tokio::time::timeout(remaining, cmd.output()).await {
            Ok(result) => result.map_err(|e| SandboxError::Command {
                command: command.to_string(),
                reason: e.to_string(),
            })?,
            Err(_) => return Err(SandboxError::Timeout(lifetime.as_secs())),
        };

        Ok(CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn write_file(
        &self,
        env: &SandboxEnvironment,
        path: &str,
        bytes: Vec<u8>,
    ) -> Result<(), SandboxError> {
        let (dir, _, _) = self.lookup(env)?;
        let target = resolve_inside(&dir, path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(io_error(parent))?;
        }
        tokio::fs::write(&target, bytes)
            .await
            .map_err(io_error(&target))
    }

    async fn make_dir(&self, env: &SandboxEnvironment, path: &str) -> Result<(), SandboxError> {
        let (dir, _, _) = self.lookup(env)?;
        let target = resolve_inside(&dir, path)?;
        tokio::fs::create_dir_all(&target)
            .await
            .map_err(io_error(&target))
    }

    async fn snapshot(&self, env: &SandboxEnvironment) -> Result<SnapshotInfo, SandboxError> {
        let (dir, _, _) = self.lookup(env)?;
        let expires_at = Utc::now()
            .checked_add_signed(self.snapshot_ttl)
            .ok_or_else(|| SandboxError::Snapshot("snapshot TTL is out of range".to_string()))?;
        let snapshot_id = format!("snap_{}", Uuid::new_v4().simple());
        let target = self.snapshots_dir().join(&snapshot_id);

        Self::copy_tree_blocking(dir, target).await?;
        self.stop(env).await?;

        Ok(SnapshotInfo {
            snapshot_id,
            expires_at,
        })
    }

    async fn stop(&self, env: &SandboxEnvironment) -> Result<(), SandboxError> {
        let live = self
            .live
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&env.id)
            .ok_or_else(|| SandboxError::UnknownEnvironment(env.id.clone()))?;

        match tokio::fs::remove_dir_all(&live.dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(SandboxError::Io {
                path: live.dir,
                source,
            }),
        }
    }
}
