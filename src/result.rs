//! Spawn result: how the child ended and what went wrong, if anything

use nix::sys::signal::Signal;
use nix::unistd::Pid;
use std::fmt;

use crate::errors::{Result, SpawnError};
use crate::execution::channel::ChannelMessage;
use crate::utils::errno_code_name;

/// Exit status reported when no child could be created
pub const NOT_STARTED_STATUS: i32 = 127;

/// How the run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// Child exited on its own with this code
    Exited(i32),
    /// Child was terminated by a signal
    Signaled { name: String, number: i32 },
    /// No child process was ever created
    NotStarted,
}

impl Termination {
    /// Classify a signal number
    pub fn signaled(number: i32) -> Self {
        Termination::Signaled {
            name: signal_name(number),
            number,
        }
    }

    /// Signal name if the child was signaled
    pub fn signal_name(&self) -> Option<&str> {
        match self {
            Termination::Signaled { name, .. } => Some(name),
            _ => None,
        }
    }
}

/// Name for a signal number, e.g. `SIGTERM`
pub fn signal_name(number: i32) -> String {
    match Signal::try_from(number) {
        Ok(signal) => signal.as_str().to_string(),
        Err(_) => format!("SIG{}", number),
    }
}

/// Result of one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnResult {
    /// Child process ID, `None` when no child was created
    pub pid: Option<Pid>,
    /// Exit code, or `128 + signal` when signaled
    pub exit_code: i32,
    /// Termination state
    pub termination: Termination,
    /// Whether the kill signal was sent because the timeout expired
    pub timed_out: bool,
    /// Setup or exec failure message (`"<errno> <context>"`)
    pub error_message: Option<String>,
}

impl SpawnResult {
    /// Result for a run where no child was created
    pub fn not_started(message: String) -> Self {
        Self {
            pid: None,
            exit_code: NOT_STARTED_STATUS,
            termination: Termination::NotStarted,
            timed_out: false,
            error_message: Some(message),
        }
    }

    /// Whether the child exited normally with status 0 and no failure was reported
    pub fn success(&self) -> bool {
        self.termination == Termination::Exited(0) && self.error_message.is_none()
    }

    /// Caller-facing failure for this run.
    ///
    /// A channel message takes precedence over a timeout.
    pub fn failure(&self) -> Option<SpawnFailure> {
        if let Some(message) = &self.error_message {
            return Some(match ChannelMessage::parse(message) {
                Some(parsed) => SpawnFailure::new(parsed.os_code, parsed.context),
                None => SpawnFailure::new(libc::ENFILE, "could not create pipe".to_string()),
            });
        }

        if self.timed_out {
            return Some(SpawnFailure::new(libc::ETIMEDOUT, String::new()));
        }

        None
    }

    /// Fail unless the run succeeded; `command` is used in the error message
    pub fn check(&self, command: &str) -> Result<&SpawnResult> {
        if self.failure().is_some() || self.exit_code != 0 {
            return Err(SpawnError::CommandFailed {
                command: command.to_string(),
                status: self.exit_code,
                message: format!("Command failed: `{}`", command),
            });
        }
        Ok(self)
    }
}

/// Caller-level description of why a run failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnFailure {
    /// OS error number
    pub errno: i32,
    /// Symbolic errno name (`ENOENT`), empty if unknown
    pub code: String,
    /// What was being done: a path, a program name, `dup`, `setuid`, ...
    pub context: String,
}

impl SpawnFailure {
    pub fn new(errno: i32, context: String) -> Self {
        Self {
            errno,
            code: errno_code_name(errno),
            context,
        }
    }

    /// Name of the failing call as seen by callers
    pub fn syscall(&self) -> &'static str {
        "spawnSync"
    }
}

impl fmt::Display for SpawnFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.syscall(), self.code)?;
        if !self.context.is_empty() {
            write!(f, " {}", self.context)?;
        }
        Ok(())
    }
}

impl std::error::Error for SpawnFailure {}
