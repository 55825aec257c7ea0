//! Process management for background child processes

pub mod buffer;
mod collector;
pub mod command;
pub mod control;
pub mod error;
pub mod manager;
pub mod mock;
pub mod record;

pub use buffer::CappedBuffer;
pub use command::{CommandLine, ProcessRequest, ShellSpec};
pub use control::ProcessControl;
pub use error::{ProcessError, Result};
pub use manager::ProcessManager;
pub use mock::MockProcessManager;
pub use record::{ExitState, ProcessInfo, ProcessOutput, ProcessRecord};
