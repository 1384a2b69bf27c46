//! Scripted stand-ins for the external providers.
//!
//! Both doubles record every call so tests can assert on what the pipelines
//! asked for, not only on the records they left behind.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use reprolab::error::{ModelError, SandboxError};
use reprolab::model::{FileRef, GenerateRequest, ModelClient};
use reprolab::sandbox::{
    CommandOutput, EnvironmentSource, SandboxBackend, SandboxCommand, SandboxEnvironment,
    SnapshotInfo,
};

/// A bundle the generator accepts as-is.
pub const VALID_BUNDLE: &str = r#"{
  "tasks": ["Implement the attention layer", "Write tests"],
  "files": [
    {"path": "README.md", "language": "markdown", "value": "Reproduce the paper."},
    {"path": "main.go", "language": "go", "value": "package main\n\nfunc main() {}\n"}
  ]
}"#;

/// Valid JSON that fails the README requirement.
pub const BUNDLE_WITHOUT_README: &str = r#"{
  "tasks": ["Do the work"],
  "files": [{"path": "main.go", "language": "go", "value": "package main"}]
}"#;

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Model client answering from a queue of scripted responses.
#[derive(Default)]
pub struct ScriptedModel {
    responses: Mutex<VecDeque<Result<String, String>>>,
    fail_uploads: bool,
    pub generate_calls: AtomicUsize,
    pub upload_calls: AtomicUsize,
    pub prompts: Mutex<Vec<String>>,
    pub attached: Mutex<Vec<Option<FileRef>>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(self, text: &str) -> Self {
        lock(&self.responses).push_back(Ok(text.to_string()));
        self
    }

    pub fn fail(self, message: &str) -> Self {
        lock(&self.responses).push_back(Err(message.to_string()));
        self
    }

    pub fn failing_uploads(mut self) -> Self {
        self.fail_uploads = true;
        self
    }

    pub fn generate_count(&self) -> usize {
        self.generate_calls.load(Ordering::SeqCst)
    }

    pub fn upload_count(&self) -> usize {
        self.upload_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    async fn upload_file(
        &self,
        display_name: &str,
        _bytes: Vec<u8>,
        mime_type: &str,
    ) -> Result<FileRef, ModelError> {
        let n = self.upload_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_uploads {
            return Err(ModelError::Status {
                status: 503,
                body: "upload unavailable".to_string(),
            });
        }
        Ok(FileRef {
            uri: format!("files/{}-{}", display_name, n),
            mime_type: mime_type.to_string(),
        })
    }

    async fn generate_json(&self, request: GenerateRequest<'_>) -> Result<String, ModelError> {
        self.generate_calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.prompts).push(request.prompt.to_string());
        lock(&self.attached).push(request.file.cloned());
        match lock(&self.responses).pop_front() {
            Some(Ok(text)) => Ok(text),
            Some(Err(message)) => Err(ModelError::Transport(message)),
            None => Err(ModelError::Transport("no scripted response".to_string())),
        }
    }
}

/// Sandbox backend that records commands and answers with scripted outputs.
///
/// Commands are matched by substring against their display form; the first
/// matching rule wins and unmatched commands exit 0 with no output.
#[derive(Default)]
pub struct ScriptedSandbox {
    rules: Mutex<Vec<(String, CommandOutput)>>,
    counter: AtomicUsize,
    pub provisions: Mutex<Vec<EnvironmentSource>>,
    pub commands: Mutex<Vec<String>>,
    pub files: Mutex<Vec<(String, usize)>>,
    pub stopped: Mutex<Vec<String>>,
    pub snapshots: AtomicUsize,
    fail_provision: bool,
}

impl ScriptedSandbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(self, pattern: &str, exit_code: i32, stdout: &str, stderr: &str) -> Self {
        lock(&self.rules).push((
            pattern.to_string(),
            CommandOutput {
                exit_code,
                stdout: stdout.to_string(),
                stderr: stderr.to_string(),
            },
        ));
        self
    }

    pub fn failing_provision(mut self) -> Self {
        self.fail_provision = true;
        self
    }

    pub fn commands(&self) -> Vec<String> {
        lock(&self.commands).clone()
    }

    pub fn provisions(&self) -> Vec<EnvironmentSource> {
        lock(&self.provisions).clone()
    }

    pub fn stopped(&self) -> Vec<String> {
        lock(&self.stopped).clone()
    }

    pub fn snapshot_count(&self) -> usize {
        self.snapshots.load(Ordering::SeqCst)
    }

    /// Count of recorded commands containing `pattern`.
    pub fn ran(&self, pattern: &str) -> usize {
        lock(&self.commands)
            .iter()
            .filter(|c| c.contains(pattern))
            .count()
    }
}

#[async_trait]
impl SandboxBackend for ScriptedSandbox {
    async fn provision(
        &self,
        source: &EnvironmentSource,
        _lifetime: Duration,
    ) -> Result<SandboxEnvironment, SandboxError> {
        if self.fail_provision {
            return Err(SandboxError::Provision("capacity exhausted".to_string()));
        }
        lock(&self.provisions).push(source.clone());
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let (runtime, snapshot_id) = match source {
            EnvironmentSource::Runtime(runtime) => (runtime.clone(), None),
            EnvironmentSource::Snapshot(id) => ("node22".to_string(), Some(id.clone())),
        };
        Ok(SandboxEnvironment {
            id: format!("sbx_{}", n),
            runtime,
            snapshot_id,
        })
    }

    async fn run(
        &self,
        _env: &SandboxEnvironment,
        command: &SandboxCommand,
    ) -> Result<CommandOutput, SandboxError> {
        let line = command.to_string();
        lock(&self.commands).push(line.clone());
        let output = lock(&self.rules)
            .iter()
            .find(|(pattern, _)| line.contains(pattern.as_str()))
            .map(|(_, output)| output.clone());
        Ok(output.unwrap_or(CommandOutput {
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
        }))
    }

    async fn write_file(
        &self,
        _env: &SandboxEnvironment,
        path: &str,
        bytes: Vec<u8>,
    ) -> Result<(), SandboxError> {
        lock(&self.files).push((path.to_string(), bytes.len()));
        Ok(())
    }

    async fn make_dir(&self, _env: &SandboxEnvironment, _path: &str) -> Result<(), SandboxError> {
        Ok(())
    }

    async fn snapshot(&self, env: &SandboxEnvironment) -> Result<SnapshotInfo, SandboxError> {
        let n = self.snapshots.fetch_add(1, Ordering::SeqCst);
        lock(&self.stopped).push(env.id.clone());
        Ok(SnapshotInfo {
            snapshot_id: format!("snap_{}", n),
            expires_at: Utc::now() + chrono::Duration::days(7),
        })
    }

    async fn stop(&self, env: &SandboxEnvironment) -> Result<(), SandboxError> {
        lock(&self.stopped).push(env.id.clone());
        Ok(())
    }
}
