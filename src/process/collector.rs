//! Background task draining a child's stdout/stderr into its record

use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Child;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use super::record::{ExitState, ProcessRecord};

const CHUNK_SIZE: usize = 4096;

/// Requests delivered to the task that owns the child handle
#[derive(Debug)]
pub(crate) enum Control {
    Kill(oneshot::Sender<io::Result<()>>),
    Terminate(oneshot::Sender<io::Result<()>>),
}

/// Everything the collector needs, moved into its task
pub(crate) struct OutputCollector {
    pub child: Child,
    pub record: Arc<ProcessRecord>,
    pub control: mpsc::UnboundedReceiver<Control>,
    pub done: watch::Sender<bool>,
    /// How long to keep draining after the child exits
    pub drain_timeout: Duration,
}

impl OutputCollector {
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        let id = self.record.id().to_string();
        let mut stdout = self.child.stdout.take();
        let mut stderr = self.child.stderr.take();
        let mut out_buf = vec![0u8; CHUNK_SIZE];
        let mut err_buf = vec![0u8; CHUNK_SIZE];
        let mut exited = false;
        let mut control_open = true;

        let drain_deadline = tokio::time::sleep(Duration::MAX);
        tokio::pin!(drain_deadline);

        loop {
            if exited && stdout.is_none() && stderr.is_none() {
                break;
            }

            tokio::select! {
                n = read_chunk(&mut stdout, &mut out_buf), if stdout.is_some() => {
                    match n {
                        Some(n) => {
                            tracing::trace!(id = %id, bytes = n, "stdout chunk");
                            self.record.add_output(&out_buf[..n], &[]);
                        }
                        None => stdout = None,
                    }
                }
                n = read_chunk(&mut stderr, &mut err_buf), if stderr.is_some() => {
                    match n {
                        Some(n) => {
                            tracing::trace!(id = %id, bytes = n, "stderr chunk");
                            self.record.add_output(&[], &err_buf[..n]);
                        }
                        None => stderr = None,
                    }
                }
                status = self.child.wait(), if !exited => {
                    let exit = match status {
                        Ok(status) => ExitState::from_status(status),
                        Err(e) => {
                            tracing::warn!(id = %id, "Failed to wait for process: {e}");
                            ExitState::unknown()
                        }
                    };
                    tracing::debug!(id = %id, code = exit.exit_code, signal = ?exit.signal, "process exited");
                    self.record.set_exit(exit);
                    exited = true;
                    drain_deadline
                        .as_mut()
                        .reset(tokio::time::Instant::now() + self.drain_timeout);
                }
                request = self.control.recv(), if control_open => {
                    match request {
                        Some(request) => self.handle_control(request, exited),
                        None => control_open = false,
                    }
                }
                _ = &mut drain_deadline, if exited => {
                    tracing::debug!(id = %id, "pipes still open after exit, giving up on drain");
                    break;
                }
            }
        }

        tracing::debug!(id = %id, "output collector finished");
        self.done.send_replace(true);
    }

    fn handle_control(&mut self, request: Control, exited: bool) {
        match request {
            Control::Kill(reply) => {
                let result = if exited { Ok(()) } else { self.child.start_kill() };
                let _ = reply.send(result);
            }
            Control::Terminate(reply) => {
                let result = if exited { Ok(()) } else { self.terminate() };
                let _ = reply.send(result);
            }
        }
    }

    #[cfg(unix)]
    fn terminate(&mut self) -> io::Result<()> {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let Some(pid) = self.child.id() else {
            return Ok(());
        };
        kill(Pid::from_raw(pid as i32), Signal::SIGTERM).map_err(io::Error::from)
    }

    #[cfg(not(unix))]
    fn terminate(&mut self) -> io::Result<()> {
        self.child.start_kill()
    }
}

/// Read one chunk. `None` means the stream is closed; read errors count as
/// closed too.
async fn read_chunk<R>(stream: &mut Option<R>, buf: &mut [u8]) -> Option<usize>
where
    R: AsyncRead + Unpin,
{
    let reader = stream.as_mut()?;
    match reader.read(buf).await {
        Ok(0) => None,
        Ok(n) => Some(n),
        Err(e) => {
            tracing::warn!("Stream read failed, treating as closed: {e}");
            None
        }
    }
}
