//! Per-process state: launch parameters, captured output, exit status

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, oneshot, watch};

use super::buffer::CappedBuffer;
use super::collector::Control;
use super::command::{CommandLine, ProcessRequest};
use super::error::{ProcessError, Result};

/// Snapshot of a process's captured output
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    /// stdout and stderr interleaved in arrival order. Capped at the same
    /// per-buffer limit as each stream, so it can fill up while neither
    /// stream has lost a byte.
    pub combined: String,
    /// True once any of stdout, stderr or combined hit the limit,
    /// including the combined view alone.
    pub truncated: bool,
    pub exit_code: Option<i32>,
    /// Terminating signal name; authoritative over `exit_code` when set
    pub signal: Option<String>,
}

/// Read-only projection of a tracked process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub process_id: String,
    pub command: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub created_at: DateTime<Utc>,
    pub is_running: bool,
    pub exit_code: Option<i32>,
    pub signal: Option<String>,
    pub pid: Option<u32>,
}

/// How a process ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitState {
    /// Exit code, or `-signo` when killed by a signal
    pub exit_code: i32,
    pub signal: Option<String>,
}

impl ExitState {
    pub(crate) fn from_status(status: std::process::ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return Self {
                exit_code: code,
                signal: None,
            };
        }

        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signo) = status.signal() {
                return Self {
                    exit_code: -signo,
                    signal: Some(signal_name(signo)),
                };
            }
        }

        Self {
            exit_code: -1,
            signal: None,
        }
    }

    /// Exit could not be observed (wait itself failed)
    pub(crate) fn unknown() -> Self {
        Self {
            exit_code: -1,
            signal: None,
        }
    }
}

#[cfg(unix)]
fn signal_name(signo: i32) -> String {
    use nix::sys::signal::Signal;
    Signal::try_from(signo)
        .map(|s| s.as_str().to_string())
        .unwrap_or_else(|_| format!("signal {signo}"))
}

#[derive(Debug)]
struct RecordState {
    stdout: CappedBuffer,
    stderr: CappedBuffer,
    combined: CappedBuffer,
    exit: Option<ExitState>,
}

/// In-memory state for one spawned process.
///
/// Buffers and exit status sit behind a mutex that is never held across an
/// await point; the output collector is the only writer of output.
#[derive(Debug)]
pub struct ProcessRecord {
    id: String,
    command: CommandLine,
    cwd: Option<PathBuf>,
    env: HashMap<String, String>,
    created_at: DateTime<Utc>,
    output_limit: Option<usize>,
    pid: Option<u32>,
    state: Mutex<RecordState>,
    control: mpsc::UnboundedSender<Control>,
    done: watch::Receiver<bool>,
}

impl ProcessRecord {
    pub(crate) fn new(
        id: String,
        request: ProcessRequest,
        pid: Option<u32>,
        control: mpsc::UnboundedSender<Control>,
        done: watch::Receiver<bool>,
    ) -> Self {
        let limit = request.output_limit;
        Self {
            id,
            command: request.command,
            cwd: request.cwd,
            env: request.env,
            created_at: Utc::now(),
            output_limit: limit,
            pid,
            state: Mutex::new(RecordState {
                stdout: CappedBuffer::new(limit),
                stderr: CappedBuffer::new(limit),
                combined: CappedBuffer::new(limit),
                exit: None,
            }),
            control,
            done,
        }
    }

    fn state(&self) -> MutexGuard<'_, RecordState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn command(&self) -> &str {
        self.command.command()
    }

    pub fn args(&self) -> &[String] {
        self.command.args()
    }

    pub fn command_line(&self) -> &CommandLine {
        &self.command
    }

    pub fn cwd(&self) -> Option<&Path> {
        self.cwd.as_deref()
    }

    pub fn env(&self) -> &HashMap<String, String> {
        &self.env
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn output_limit(&self) -> Option<usize> {
        self.output_limit
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Append a chunk to each stream and to the combined view. Returns true
    /// if anything was cut by the output limit.
    pub fn add_output(&self, stdout: &[u8], stderr: &[u8]) -> bool {
        let mut state = self.state();
        let mut cut = state.stdout.push(stdout);
        cut |= state.stderr.push(stderr);
        cut |= state.combined.push(stdout);
        cut |= state.combined.push(stderr);
        if cut {
            tracing::trace!(id = %self.id, "output truncated");
        }
        cut
    }

    pub fn get_output(&self) -> ProcessOutput {
        let state = self.state();
        ProcessOutput {
            stdout: state.stdout.to_text(),
            stderr: state.stderr.to_text(),
            combined: state.combined.to_text(),
            truncated: state.stdout.is_truncated()
                || state.stderr.is_truncated()
                || state.combined.is_truncated(),
            exit_code: state.exit.as_ref().map(|e| e.exit_code),
            signal: state.exit.as_ref().and_then(|e| e.signal.clone()),
        }
    }

    pub fn exit_state(&self) -> Option<ExitState> {
        self.state().exit.clone()
    }

    /// First write wins
    pub(crate) fn set_exit(&self, exit: ExitState) {
        let mut state = self.state();
        if state.exit.is_none() {
            state.exit = Some(exit);
        }
    }

    /// Live check: false once the OS has reported termination, or once the
    /// pid no longer exists.
    pub fn is_running(&self) -> bool {
        if self.state().exit.is_some() {
            return false;
        }
        self.pid.map(pid_alive).unwrap_or(false)
    }

    /// Exit recorded but the collector is still reading pipes, usually
    /// because a grandchild inherited them.
    pub fn is_draining(&self) -> bool {
        self.exit_state().is_some() && !*self.done.borrow()
    }

    /// Wait until the process has exited and the collector has drained
    /// its trailing output.
    pub async fn wait(&self) -> Result<ExitState> {
        let mut done = self.done.clone();
        done.wait_for(|finished| *finished)
            .await
            .map_err(|_| ProcessError::Released(self.id.clone()))?;
        self.exit_state()
            .ok_or_else(|| ProcessError::Released(self.id.clone()))
    }

    /// Hard kill. No-op once the process has exited.
    pub async fn kill(&self) -> Result<()> {
        self.send_control(Control::Kill).await
    }

    /// Graceful termination (SIGTERM on Unix). No-op once exited.
    pub async fn terminate(&self) -> Result<()> {
        self.send_control(Control::Terminate).await
    }

    async fn send_control(
        &self,
        make: fn(oneshot::Sender<std::io::Result<()>>) -> Control,
    ) -> Result<()> {
        if self.exit_state().is_some() {
            return Ok(());
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        if self.control.send(make(reply_tx)).is_err() {
            // Collector already finished: the process is gone
            return Ok(());
        }

        match reply_rx.await {
            Ok(result) => result.map_err(|source| ProcessError::Kill {
                id: self.id.clone(),
                source,
            }),
            Err(_) => Ok(()),
        }
    }
}

#[cfg(unix)]
pub(crate) fn pid_alive(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    match kill(Pid::from_raw(pid as i32), None) {
        Ok(()) => true,
        Err(Errno::ESRCH) => false,
        // EPERM: exists but belongs to someone else
        Err(_) => true,
    }
}

#[cfg(not(unix))]
pub(crate) fn pid_alive(_pid: u32) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detached_record(limit: Option<usize>) -> ProcessRecord {
        let (control, _control_rx) = mpsc::unbounded_channel();
        let (_done_tx, done_rx) = watch::channel(false);
        let mut request = ProcessRequest::new("echo").args(["hi"]);
        request.output_limit = limit;
        ProcessRecord::new("proc_test".to_string(), request, None, control, done_rx)
    }

    #[test]
    fn test_add_output_fills_all_buffers() {
        let record = detached_record(None);
        record.add_output(b"manual", b"error");
        record.add_output(b"!", b"");

        let output = record.get_output();
        assert_eq!(output.stdout, "manual!");
        assert_eq!(output.stderr, "error");
        assert_eq!(output.combined, "manualerror!");
        assert!(!output.truncated);
        assert_eq!(output.exit_code, None);
    }

    #[test]
    fn test_add_output_respects_limit() {
        let record = detached_record(Some(4));
        assert!(record.add_output(b"abcdef", b""));
        assert!(record.add_output(b"gh", b""));

        let output = record.get_output();
        assert!(output.truncated);
        assert_eq!(output.stdout, "abcd");
        assert_eq!(output.combined, "abcd");
    }

    #[test]
    fn test_combined_cap_alone_marks_truncated() {
        let record = detached_record(Some(100));
        record.add_output(&[b'o'; 60], &[]);
        record.add_output(&[], &[b'e'; 60]);

        let output = record.get_output();
        assert_eq!(output.stdout.len(), 60);
        assert_eq!(output.stderr.len(), 60);
        assert_eq!(output.combined.len(), 100);
        assert!(output.truncated);
    }

    #[test]
    fn test_exit_is_set_once() {
        let record = detached_record(None);
        record.set_exit(ExitState {
            exit_code: 3,
            signal: None,
        });
        record.set_exit(ExitState {
            exit_code: 9,
            signal: None,
        });
        assert_eq!(record.exit_state().unwrap().exit_code, 3);
        assert!(!record.is_running());
        assert_eq!(record.get_output().exit_code, Some(3));
    }

    #[tokio::test]
    async fn test_wait_reports_released_when_collector_gone() {
        let record = detached_record(None);
        let err = record.wait().await.unwrap_err();
        assert!(matches!(err, ProcessError::Released(id) if id == "proc_test"));
    }

    #[tokio::test]
    async fn test_kill_after_exit_is_noop() {
        let record = detached_record(None);
        record.set_exit(ExitState::unknown());
        assert!(record.kill().await.is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn test_exit_state_from_signal() {
        use std::os::unix::process::ExitStatusExt;
        let state = ExitState::from_status(std::process::ExitStatus::from_raw(9));
        assert_eq!(state.exit_code, -9);
        assert_eq!(state.signal.as_deref(), Some("SIGKILL"));

        let state = ExitState::from_status(std::process::ExitStatus::from_raw(42 << 8));
        assert_eq!(state.exit_code, 42);
        assert_eq!(state.signal, None);
    }

    #[cfg(unix)]
    #[test]
    fn test_own_pid_is_alive() {
        assert!(pid_alive(std::process::id()));
    }
}
