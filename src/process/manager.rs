//! Process manager - owns the table of tracked processes

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::collector::OutputCollector;
use super::command::{ProcessRequest, ShellSpec};
use super::error::{ProcessError, Result};
use super::record::{ProcessInfo, ProcessOutput, ProcessRecord};
use crate::config::ManagerConfig;

/// A tracked process and the task draining it. Kept together so a record
/// can never outlive, or be tracked without, its collector.
struct Tracked {
    record: Arc<ProcessRecord>,
    collector: JoinHandle<()>,
}

/// Spawns, tracks, signals and releases child processes.
///
/// The table lock is only held for lookups and inserts/removals, never
/// across an await point.
pub struct ProcessManager {
    processes: Mutex<HashMap<String, Tracked>>,
    shell: ShellSpec,
    config: ManagerConfig,
}

impl Default for ProcessManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessManager {
    pub fn new() -> Self {
        Self::with_config(ManagerConfig::default())
    }

    pub fn with_config(config: ManagerConfig) -> Self {
        let shell = config
            .shell
            .as_deref()
            .and_then(ShellSpec::parse)
            .unwrap_or_default();
        Self {
            processes: Mutex::new(HashMap::new()),
            shell,
            config,
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    fn table(&self) -> MutexGuard<'_, HashMap<String, Tracked>> {
        self.processes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn generate_id() -> String {
        format!("proc_{}", Uuid::new_v4().simple())
    }

    /// Spawn a process and start collecting its output. Returns as soon as
    /// the OS process exists.
    pub async fn start_process(&self, mut request: ProcessRequest) -> Result<String> {
        request.validate()?;
        if request.output_limit.is_none() {
            request.output_limit = self.config.default_output_limit;
        }

        let mut cmd = request.command.to_command(&self.shell);
        if let Some(cwd) = &request.cwd {
            cmd.current_dir(cwd);
        }
        cmd.envs(&request.env);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let child = cmd.spawn().map_err(|source| ProcessError::Spawn {
            command: request.command.display(),
            source,
        })?;

        let id = Self::generate_id();
        let pid = child.id();
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = watch::channel(false);

        tracing::info!(id = %id, pid = ?pid, command = %request.command.display(), "Started process");

        let record = Arc::new(ProcessRecord::new(
            id.clone(),
            request,
            pid,
            control_tx,
            done_rx,
        ));
        let collector = OutputCollector {
            child,
            record: Arc::clone(&record),
            control: control_rx,
            done: done_tx,
            drain_timeout: Duration::from_millis(self.config.drain_timeout_ms),
        }
        .spawn();

        self.table()
            .insert(id.clone(), Tracked { record, collector });
        Ok(id)
    }

    /// Shared handle to a tracked record
    pub fn process(&self, process_id: &str) -> Result<Arc<ProcessRecord>> {
        self.table()
            .get(process_id)
            .map(|t| Arc::clone(&t.record))
            .ok_or_else(|| ProcessError::NotFound(process_id.to_string()))
    }

    pub fn get_output(&self, process_id: &str) -> Result<ProcessOutput> {
        Ok(self.process(process_id)?.get_output())
    }

    /// Wait for the process to exit and its output to be drained. Calling
    /// again returns the stored code.
    pub async fn wait_for_exit(&self, process_id: &str) -> Result<i32> {
        let record = self.process(process_id)?;
        Ok(record.wait().await?.exit_code)
    }

    /// Send a hard kill. Does not wait for death.
    pub async fn kill_process(&self, process_id: &str) -> Result<()> {
        let record = self.process(process_id)?;
        tracing::info!(id = %process_id, "Killing process");
        record.kill().await
    }

    /// Ask the process to exit (SIGTERM on Unix).
    pub async fn terminate_process(&self, process_id: &str) -> Result<()> {
        let record = self.process(process_id)?;
        tracing::info!(id = %process_id, "Terminating process");
        record.terminate().await
    }

    /// Stop tracking a process. A still-running process keeps running.
    pub fn release_process(&self, process_id: &str) -> Result<()> {
        let tracked = self
            .table()
            .remove(process_id)
            .ok_or_else(|| ProcessError::NotFound(process_id.to_string()))?;
        tracked.collector.abort();
        tracing::info!(id = %process_id, "Released process");
        Ok(())
    }

    /// Tracked ids, oldest first
    pub fn list_processes(&self) -> Vec<String> {
        let table = self.table();
        let mut entries: Vec<_> = table
            .iter()
            .map(|(id, t)| (t.record.created_at(), id.clone()))
            .collect();
        entries.sort();
        entries.into_iter().map(|(_, id)| id).collect()
    }

    pub fn get_process_info(&self, process_id: &str) -> Result<ProcessInfo> {
        let record = self.process(process_id)?;
        let exit = record.exit_state();
        Ok(ProcessInfo {
            process_id: record.id().to_string(),
            command: record.command().to_string(),
            args: record.args().to_vec(),
            cwd: record.cwd().map(|p| p.to_path_buf()),
            created_at: record.created_at(),
            is_running: record.is_running(),
            exit_code: exit.as_ref().map(|e| e.exit_code),
            signal: exit.and_then(|e| e.signal),
            pid: record.pid(),
        })
    }

    /// Kill, briefly wait for, and release every tracked process.
    /// Per-process failures are logged and skipped.
    pub async fn cleanup(&self) {
        let records: Vec<Arc<ProcessRecord>> = self
            .table()
            .values()
            .map(|t| Arc::clone(&t.record))
            .collect();
        let grace = Duration::from_millis(self.config.cleanup_grace_ms);

        for record in &records {
            if let Err(e) = record.kill().await {
                tracing::warn!(id = %record.id(), "Cleanup kill failed: {e}");
            }
        }

        for record in &records {
            if tokio::time::timeout(grace, record.wait()).await.is_err() {
                if record.exit_state().is_some() {
                    tracing::debug!(id = %record.id(), "Process exited, pipes still held open at cleanup");
                } else {
                    tracing::warn!(id = %record.id(), "Process did not exit within cleanup grace period");
                }
            }
            // Released concurrently by another caller: nothing left to do
            let _ = self.release_process(record.id());
        }

        tracing::debug!(count = records.len(), "Cleanup finished");
    }
}

impl Drop for ProcessManager {
    fn drop(&mut self) {
        let table = self.processes.get_mut().unwrap_or_else(PoisonError::into_inner);
        for (id, tracked) in table.drain() {
            if tracked.record.is_running() {
                if let Some(pid) = tracked.record.pid() {
                    tracing::debug!(id = %id, pid, "Killing process on manager drop");
                    kill_pid(pid);
                }
            }
            tracked.collector.abort();
        }
    }
}

#[cfg(unix)]
fn kill_pid(pid: u32) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;
    let _ = kill(Pid::from_raw(pid as i32), Signal::SIGKILL);
}

#[cfg(not(unix))]
fn kill_pid(_pid: u32) {}
