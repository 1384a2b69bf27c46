//! Ephemeral execution environments for submissions.
//!
//! An environment is provisioned from a bare runtime or a cached snapshot,
//! commands run inside it one attempt at a time, and it is torn down on
//! every exit path. Languages whose toolchain is not part of the base
//! runtime are bootstrapped once and snapshotted; the snapshot id is cached
//! per language in the database until it expires.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::Instrument;

use crate::db::{snapshot_repo, Database};
use crate::error::SandboxError;

pub mod local;

pub use local::LocalSandboxBackend;

/// Total lifetime of one environment unless configured otherwise.
pub const DEFAULT_LIFETIME: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootstrapStep {
    pub program: &'static str,
    pub args: &'static [&'static str],
    pub sudo: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SandboxProfile {
    pub language: &'static str,
    pub runtime: &'static str,
    pub needs_bootstrap: bool,
    pub bootstrap_steps: &'static [BootstrapStep],
}

const PROFILES: &[SandboxProfile] = &[
    SandboxProfile {
        language: "typescript",
        runtime: "node22",
        needs_bootstrap: false,
        bootstrap_steps: &[],
    },
    SandboxProfile {
        language: "node",
        runtime: "node22",
        needs_bootstrap: false,
        bootstrap_steps: &[],
    },
    SandboxProfile {
        language: "go",
        runtime: "node22",
        needs_bootstrap: true,
        bootstrap_steps: &[
            BootstrapStep {
                program: "dnf",
                args: &["install", "-y", "golang"],
                sudo: true,
            },
            BootstrapStep {
                program: "go",
                args: &["version"],
                sudo: false,
            },
        ],
    },
];

/// Looks up the execution profile for a language. Unknown languages run
/// with the TypeScript profile.
pub fn resolve_profile(language: &str) -> SandboxProfile {
    let wanted = language.trim().to_ascii_lowercase();
    *PROFILES
        .iter()
        .find(|p| p.language == wanted)
        .unwrap_or(&PROFILES[0])
}

/// A command to run inside an environment. `cwd` is relative to the
/// environment root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxCommand {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<String>,
    pub sudo: bool,
}

impl SandboxCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            sudo: false,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn sudo(mut self, sudo: bool) -> Self {
        self.sudo = sudo;
        self
    }

    /// `bash -lc <script>`.
    pub fn shell(script: impl Into<String>) -> Self {
        Self::new("bash").arg("-lc").arg(script)
    }
}

impl From<&BootstrapStep> for SandboxCommand {
    fn from(step: &BootstrapStep) -> Self {
        SandboxCommand::new(step.program)
            .args(step.args.iter().copied())
            .sudo(step.sudo)
    }
}

impl fmt::Display for SandboxCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.sudo {
            write!(f, "sudo ")?;
        }
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Result of one command. A nonzero exit code is data, not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvironmentSource {
    Runtime(String),
    Snapshot(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxEnvironment {
    pub id: String,
    pub runtime: String,
    pub snapshot_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotInfo {
    pub snapshot_id: String,
    pub expires_at: DateTime<Utc>,
}

/// The isolated execution provider.
#[async_trait]
pub trait SandboxBackend: Send + Sync {
    async fn provision(
        &self,
        source: &EnvironmentSource,
        lifetime: Duration,
    ) -> Result<SandboxEnvironment, SandboxError>;

    async fn run(
        &self,
        env: &SandboxEnvironment,
        command: &SandboxCommand,
    ) -> Result<CommandOutput, SandboxError>;

    async fn write_file(
        &self,
        env: &SandboxEnvironment,
        path: &str,
        bytes: Vec<u8>,
    ) -> Result<(), SandboxError>;

    async fn make_dir(&self, env: &SandboxEnvironment, path: &str) -> Result<(), SandboxError>;

    /// Captures the environment's filesystem. The environment is stopped
    /// afterwards and must not be used again.
    async fn snapshot(&self, env: &SandboxEnvironment) -> Result<SnapshotInfo, SandboxError>;

    async fn stop(&self, env: &SandboxEnvironment) -> Result<(), SandboxError>;
}

/// Drives a [`SandboxBackend`] and keeps the per-language snapshot cache.
#[derive(Clone)]
pub struct SandboxExecutor {
    backend: Arc<dyn SandboxBackend>,
    db: Database,
    lifetime: Duration,
}

impl SandboxExecutor {
    pub fn new(backend: Arc<dyn SandboxBackend>, db: Database, lifetime: Duration) -> Self {
        Self {
            backend,
            db,
            lifetime,
        }
    }

    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    /// Returns a usable snapshot id for the profile, bootstrapping and
    /// caching a new one when the cached row is absent or expired.
    /// `None` for profiles without bootstrap steps.
    pub async fn ensure_snapshot(
        &self,
        profile: &SandboxProfile,
    ) -> Result<Option<String>, SandboxError> {
        if !profile.needs_bootstrap {
            return Ok(None);
        }

        if let Some(row) = snapshot_repo::find_live(&self.db, profile.language)? {
            log::debug!(
                "Reusing snapshot {} for {}",
                row.snapshot_id,
                profile.language
            );
            return Ok(Some(row.snapshot_id));
        }

        let span = tracing::info_span!("sandbox.bootstrap", language = profile.language);
        self.bootstrap(profile).instrument(span).await.map(Some)
    }

    async fn bootstrap(&self, profile: &SandboxProfile) -> Result<String, SandboxError> {
        log::info!(
            "Bootstrapping {} environment on {}",
            profile.language,
            profile.runtime
        );
        let env = self
            .backend
            .provision(
                &EnvironmentSource::Runtime(profile.runtime.to_string()),
                self.lifetime,
            )
            .await?;

        for step in profile.bootstrap_steps {
            let command = SandboxCommand::from(step);
            let result = match self.backend.run(&env, &command).await {
                Ok(output) if output.success() => Ok(()),
                Ok(output) => Err(SandboxError::Bootstrap {
                    step: command.to_string(),
                    exit_code: output.exit_code,
                    stderr: crate::sanitize::truncate(&output.stderr, 2_000),
                }),
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                self.teardown(&env).await;
                return Err(e);
            }
        }

        let info = match self.backend.snapshot(&env).await {
            Ok(info) => info,
            Err(e) => {
                self.teardown(&env).await;
                return Err(e);
            }
        };

        snapshot_repo::upsert(
            &self.db,
            profile.language,
            profile.runtime,
            &info.snapshot_id,
            info.expires_at,
        )?;
        log::info!(
            "Cached snapshot {} for {} until {}",
            info.snapshot_id,
            profile.language,
            info.expires_at
        );
        Ok(info.snapshot_id)
    }

    /// Provisions an environment for the profile, from its snapshot when it
    /// needs one.
    pub async fn create_environment(
        &self,
        profile: &SandboxProfile,
    ) -> Result<SandboxEnvironment, SandboxError> {
        let source = match self.ensure_snapshot(profile).await? {
            Some(snapshot_id) => EnvironmentSource::Snapshot(snapshot_id),
            None => EnvironmentSource::Runtime(profile.runtime.to_string()),
        };
        self.backend.provision(&source, self.lifetime).await
    }

    pub async fn run_command(
        &self,
        env: &SandboxEnvironment,
        command: &SandboxCommand,
    ) -> Result<CommandOutput, SandboxError> {
        log::debug!("[{}] $ {}", env.id, command);
        self.backend.run(env, command).await
    }

    pub async fn write_file(
        &self,
        env: &SandboxEnvironment,
        path: &str,
        bytes: Vec<u8>,
    ) -> Result<(), SandboxError> {
        self.backend.write_file(env, path, bytes).await
    }

    pub async fn make_dir(&self, env: &SandboxEnvironment, path: &str) -> Result<(), SandboxError> {
        self.backend.make_dir(env, path).await
    }

    /// Stops the environment. Failures are logged and swallowed.
    pub async fn teardown(&self, env: &SandboxEnvironment) {
        if let Err(e) = self.backend.stop(env).await {
            log::warn!("Failed to stop sandbox {}: {}", env.id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_profile() {
        assert_eq!(resolve_profile("go").runtime, "node22");
        assert!(resolve_profile(" Go ").needs_bootstrap);
        assert_eq!(resolve_profile("node").language, "node");
        assert_eq!(resolve_profile("cobol").language, "typescript");
        assert!(!resolve_profile("").needs_bootstrap);
    }

    #[test]
    fn test_go_bootstrap_steps() {
        let steps = resolve_profile("go").bootstrap_steps;
        assert_eq!(steps.len(), 2);
        assert_eq!(
            SandboxCommand::from(&steps[0]).to_string(),
            "sudo dnf install -y golang"
        );
        assert_eq!(SandboxCommand::from(&steps[1]).to_string(), "go version");
    }

    #[test]
    fn test_shell_command() {
        let cmd = SandboxCommand::shell("cd workspace && go test ./...");
        assert_eq!(cmd.program, "bash");
        assert_eq!(cmd.args, ["-lc", "cd workspace && go test ./..."]);
        assert!(cmd.cwd.is_none());
    }
}
