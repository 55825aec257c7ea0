//! bgproc library - async manager for background child processes

pub mod config;
pub mod process;

// Re-export commonly used types
pub use config::{Config, ManagerConfig};
pub use process::{
    CommandLine, MockProcessManager, ProcessControl, ProcessError, ProcessInfo, ProcessManager,
    ProcessOutput, ProcessRequest,
};
