//! In-memory process backend returning canned output

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

use super::command::ProcessRequest;
use super::control::ProcessControl;
use super::error::{ProcessError, Result};
use super::record::{ProcessInfo, ProcessOutput};

/// Exit code reported for a killed mock process
pub const MOCK_KILLED_EXIT_CODE: i32 = 130;

#[derive(Debug, Clone)]
struct MockProcess {
    command: String,
    args: Vec<String>,
    cwd: Option<PathBuf>,
    created_at: DateTime<Utc>,
    output: ProcessOutput,
    running: bool,
    exit_code: Option<i32>,
}

/// Fake backend for tests. Nothing is spawned; each start looks up its
/// output by full command line, then by bare command, then falls back to
/// the default.
pub struct MockProcessManager {
    default_output: ProcessOutput,
    command_outputs: HashMap<String, ProcessOutput>,
    processes: Mutex<HashMap<String, MockProcess>>,
}

impl Default for MockProcessManager {
    fn default() -> Self {
        Self::new(ProcessOutput {
            exit_code: Some(0),
            ..ProcessOutput::default()
        })
    }
}

impl MockProcessManager {
    pub fn new(default_output: ProcessOutput) -> Self {
        Self {
            default_output,
            command_outputs: HashMap::new(),
            processes: Mutex::new(HashMap::new()),
        }
    }

    /// Register output for a command, either `"git status"` or `"git"`
    pub fn with_output(mut self, command: impl Into<String>, output: ProcessOutput) -> Self {
        self.command_outputs.insert(command.into(), output);
        self
    }

    fn table(&self) -> MutexGuard<'_, HashMap<String, MockProcess>> {
        self.processes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_process<T>(
        &self,
        process_id: &str,
        f: impl FnOnce(&mut MockProcess) -> T,
    ) -> Result<T> {
        self.table()
            .get_mut(process_id)
            .map(f)
            .ok_or_else(|| ProcessError::NotFound(process_id.to_string()))
    }
}

#[async_trait]
impl ProcessControl for MockProcessManager {
    async fn start_process(&self, request: ProcessRequest) -> Result<String> {
        request.validate()?;
        let id = format!("mock_{}", &Uuid::new_v4().simple().to_string()[..8]);
        let full = request.command.display();
        let command = request.command.command().to_string();
        let output = self
            .command_outputs
            .get(&full)
            .or_else(|| self.command_outputs.get(&command))
            .unwrap_or(&self.default_output)
            .clone();

        self.table().insert(
            id.clone(),
            MockProcess {
                command,
                args: request.command.args().to_vec(),
                cwd: request.cwd,
                created_at: Utc::now(),
                output,
                running: true,
                exit_code: None,
            },
        );
        Ok(id)
    }

    async fn get_output(&self, process_id: &str) -> Result<ProcessOutput> {
        self.with_process(process_id, |p| p.output.clone())
    }

    async fn wait_for_exit(&self, process_id: &str) -> Result<i32> {
        self.with_process(process_id, |p| {
            if p.running {
                p.running = false;
                p.exit_code = Some(p.output.exit_code.unwrap_or(0));
            }
            p.exit_code.unwrap_or(0)
        })
    }

    async fn kill_process(&self, process_id: &str) -> Result<()> {
        self.with_process(process_id, |p| {
            if p.running {
                p.running = false;
                p.exit_code = Some(MOCK_KILLED_EXIT_CODE);
            }
        })
    }

    async fn release_process(&self, process_id: &str) -> Result<()> {
        self.table()
            .remove(process_id)
            .map(|_| ())
            .ok_or_else(|| ProcessError::NotFound(process_id.to_string()))
    }

    async fn list_processes(&self) -> Vec<String> {
        let table = self.table();
        let mut entries: Vec<_> = table
            .iter()
            .map(|(id, p)| (p.created_at, id.clone()))
            .collect();
        entries.sort();
        entries.into_iter().map(|(_, id)| id).collect()
    }

    async fn get_process_info(&self, process_id: &str) -> Result<ProcessInfo> {
        self.with_process(process_id, |p| ProcessInfo {
            process_id: process_id.to_string(),
            command: p.command.clone(),
            args: p.args.clone(),
            cwd: p.cwd.clone(),
            created_at: p.created_at,
            is_running: p.running,
            exit_code: p.exit_code,
            signal: None,
            pid: None,
        })
    }

    async fn cleanup(&self) {
        self.table().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(stdout: &str, code: i32) -> ProcessOutput {
        ProcessOutput {
            stdout: stdout.to_string(),
            combined: stdout.to_string(),
            exit_code: Some(code),
            ..ProcessOutput::default()
        }
    }

    #[tokio::test]
    async fn test_lookup_prefers_full_command_line() {
        let mock = MockProcessManager::default()
            .with_output("git", output("generic", 0))
            .with_output("git status", output("clean", 0));

        let exact = mock
            .start_process(ProcessRequest::new("git").args(["status"]))
            .await
            .unwrap();
        let generic = mock
            .start_process(ProcessRequest::new("git").args(["log"]))
            .await
            .unwrap();
        let fallback = mock.start_process(ProcessRequest::new("ls")).await.unwrap();

        assert!(exact.starts_with("mock_"));
        assert_eq!(mock.get_output(&exact).await.unwrap().stdout, "clean");
        assert_eq!(mock.get_output(&generic).await.unwrap().stdout, "generic");
        assert_eq!(mock.get_output(&fallback).await.unwrap().stdout, "");
    }

    #[tokio::test]
    async fn test_wait_and_kill() {
        let mock = MockProcessManager::default().with_output("fail", output("", 2));

        let failing = mock.start_process(ProcessRequest::new("fail")).await.unwrap();
        assert_eq!(mock.wait_for_exit(&failing).await.unwrap(), 2);
        assert_eq!(mock.wait_for_exit(&failing).await.unwrap(), 2);

        let killed = mock.start_process(ProcessRequest::new("sleep")).await.unwrap();
        assert!(mock.get_process_info(&killed).await.unwrap().is_running);
        mock.kill_process(&killed).await.unwrap();
        let info = mock.get_process_info(&killed).await.unwrap();
        assert!(!info.is_running);
        assert_eq!(info.exit_code, Some(MOCK_KILLED_EXIT_CODE));
        assert_eq!(mock.wait_for_exit(&killed).await.unwrap(), MOCK_KILLED_EXIT_CODE);
    }

    #[tokio::test]
    async fn test_unknown_ids_are_not_found() {
        let mock = MockProcessManager::default();
        assert!(matches!(
            mock.get_output("nonexistent").await,
            Err(ProcessError::NotFound(_))
        ));
        assert!(mock.kill_process("nonexistent").await.is_err());
        assert!(mock.release_process("nonexistent").await.is_err());
    }

    #[tokio::test]
    async fn test_release_and_cleanup() {
        let mock = MockProcessManager::default();
        let a = mock.start_process(ProcessRequest::new("a")).await.unwrap();
        let b = mock.start_process(ProcessRequest::new("b")).await.unwrap();
        assert_eq!(mock.list_processes().await.len(), 2);

        mock.release_process(&a).await.unwrap();
        assert_eq!(mock.list_processes().await, vec![b]);

        mock.cleanup().await;
        assert!(mock.list_processes().await.is_empty());
    }
}
