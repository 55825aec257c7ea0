//! Command lines and start requests

use std::collections::HashMap;
use std::path::PathBuf;
use tokio::process::Command;

use super::error::{ProcessError, Result};

/// How a process gets launched.
///
/// A shell line goes through the platform shell and is subject to its
/// parsing; an argv command is executed directly with no interpretation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandLine {
    /// Full command line handed to the platform shell
    Shell(String),
    /// Executable plus a discrete argument vector
    Argv { program: String, args: Vec<String> },
}

impl CommandLine {
    /// Empty `args` means `command` is a full shell line.
    pub fn from_parts(command: impl Into<String>, args: Vec<String>) -> Self {
        let command = command.into();
        if args.is_empty() {
            CommandLine::Shell(command)
        } else {
            CommandLine::Argv {
                program: command,
                args,
            }
        }
    }

    /// The command string as given by the caller
    pub fn command(&self) -> &str {
        match self {
            CommandLine::Shell(line) => line,
            CommandLine::Argv { program, .. } => program,
        }
    }

    /// The argument vector; empty for shell lines
    pub fn args(&self) -> &[String] {
        match self {
            CommandLine::Shell(_) => &[],
            CommandLine::Argv { args, .. } => args,
        }
    }

    pub fn is_shell(&self) -> bool {
        matches!(self, CommandLine::Shell(_))
    }

    /// Single-line rendering, used for logs and mock lookups
    pub fn display(&self) -> String {
        match self {
            CommandLine::Shell(line) => line.clone(),
            CommandLine::Argv { program, args } => {
                let mut out = program.clone();
                for arg in args {
                    out.push(' ');
                    out.push_str(arg);
                }
                out
            }
        }
    }

    /// Build the OS command, wrapping shell lines in `shell`
    pub(crate) fn to_command(&self, shell: &ShellSpec) -> Command {
        match self {
            CommandLine::Shell(line) => {
                let mut cmd = Command::new(&shell.program);
                cmd.args(&shell.args);
                cmd.arg(line);
                cmd
            }
            CommandLine::Argv { program, args } => {
                let mut cmd = Command::new(program);
                cmd.args(args);
                cmd
            }
        }
    }
}

/// Shell used to run `CommandLine::Shell` lines
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl ShellSpec {
    /// Parse an override such as `"bash -c"` or `"pwsh -Command"`
    pub fn parse(spec: &str) -> Option<Self> {
        let mut parts = spec.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self {
            program,
            args: parts.collect(),
        })
    }
}

impl Default for ShellSpec {
    #[cfg(windows)]
    fn default() -> Self {
        Self {
            program: "cmd".to_string(),
            args: vec!["/C".to_string()],
        }
    }

    #[cfg(not(windows))]
    fn default() -> Self {
        Self {
            program: "sh".to_string(),
            args: vec!["-c".to_string()],
        }
    }
}

/// Everything needed to start one process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessRequest {
    pub command: CommandLine,
    pub cwd: Option<PathBuf>,
    /// Merged over the inherited environment
    pub env: HashMap<String, String>,
    /// Per-stream byte cap; `None` is unbounded
    pub output_limit: Option<usize>,
}

impl ProcessRequest {
    /// Start building a request. With no `args` added, `command` runs in
    /// shell mode.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: CommandLine::Shell(command.into()),
            cwd: None,
            env: HashMap::new(),
            output_limit: None,
        }
    }

    /// Explicit shell-mode request
    pub fn shell(line: impl Into<String>) -> Self {
        Self::new(line)
    }

    /// Explicit argv request, even with zero arguments
    pub fn exec<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: CommandLine::Argv {
                program: program.into(),
                args: args.into_iter().map(Into::into).collect(),
            },
            ..Self::new(String::new())
        }
    }

    /// Append arguments, switching a shell request into argv mode
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let extra: Vec<String> = args.into_iter().map(Into::into).collect();
        if extra.is_empty() {
            return self;
        }
        self.command = match self.command {
            CommandLine::Shell(program) => CommandLine::Argv {
                program,
                args: extra,
            },
            CommandLine::Argv { program, mut args } => {
                args.extend(extra);
                CommandLine::Argv { program, args }
            }
        };
        self
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn envs(mut self, vars: HashMap<String, String>) -> Self {
        self.env.extend(vars);
        self
    }

    pub fn output_limit(mut self, limit: usize) -> Self {
        self.output_limit = Some(limit);
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.command.command().trim().is_empty() {
            return Err(ProcessError::InvalidRequest(
                "command must not be empty".to_string(),
            ));
        }
        if self.output_limit == Some(0) {
            return Err(ProcessError::InvalidRequest(
                "output limit must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_args_means_shell() {
        let line = CommandLine::from_parts("echo hello && echo world", vec![]);
        assert!(line.is_shell());
        assert_eq!(line.command(), "echo hello && echo world");
        assert!(line.args().is_empty());
    }

    #[test]
    fn test_args_mean_argv() {
        let line = CommandLine::from_parts("echo", vec!["hello".to_string()]);
        assert_eq!(
            line,
            CommandLine::Argv {
                program: "echo".to_string(),
                args: vec!["hello".to_string()],
            }
        );
        assert_eq!(line.display(), "echo hello");
    }

    #[test]
    fn test_builder_switches_to_argv() {
        let req = ProcessRequest::new("echo").args(["a", "b"]).args(["c"]);
        assert_eq!(req.command.args(), ["a", "b", "c"]);
        assert!(!req.command.is_shell());

        let req = ProcessRequest::new("ls -la").args(Vec::<String>::new());
        assert!(req.command.is_shell());
    }

    #[test]
    fn test_exec_without_args_stays_argv() {
        let req = ProcessRequest::exec("true", Vec::<String>::new());
        assert!(!req.command.is_shell());
        assert_eq!(req.command.command(), "true");
    }

    #[test]
    fn test_validate_rejects_bad_requests() {
        assert!(ProcessRequest::new("  ").validate().is_err());
        assert!(ProcessRequest::new("echo").output_limit(0).validate().is_err());
        assert!(ProcessRequest::new("echo").output_limit(1).validate().is_ok());
    }

    #[test]
    fn test_shell_spec_parse() {
        let shell = ShellSpec::parse("bash -c").unwrap();
        assert_eq!(shell.program, "bash");
        assert_eq!(shell.args, vec!["-c".to_string()]);
        assert!(ShellSpec::parse("   ").is_none());
    }
}
