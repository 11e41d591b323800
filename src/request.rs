//! Spawn request: what to run and how to set up the child

use nix::sys::signal::Signal;
use std::os::unix::io::RawFd;
use std::path::PathBuf;
use std::time::Duration;

/// Where one child descriptor slot is bound before exec
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StdioTarget {
    /// Bind a descriptor the caller already has open
    Inherit(RawFd),
    /// Bind the canonical terminal device for the given slot (slots >= 3 bind the same fd number)
    InheritStandard(u32),
    /// Bind the null device
    Ignore,
    /// Open a path: read-only for slot 0, write (create, truncate) for every other slot
    OpenPath(PathBuf),
}

/// Spawn request configuration
#[derive(Debug, Clone)]
pub struct SpawnRequest {
    /// Program to execute, looked up through PATH when it has no `/`
    pub program: String,
    /// Full argv, index 0 included
    pub arguments: Vec<String>,
    /// `KEY=VALUE` strings applied in order over the inherited environment
    pub environment_pairs: Vec<String>,
    /// Working directory for the child
    pub working_directory: Option<PathBuf>,
    /// UID to run as
    pub uid: Option<u32>,
    /// GID to run as
    pub gid: Option<u32>,
    /// One target per descriptor slot, slot number = index
    pub stdio: Vec<StdioTarget>,
    /// Wall-clock limit; `None` waits indefinitely
    pub timeout: Option<Duration>,
    /// Signal sent when the timeout expires
    pub kill_signal: Signal,
}

impl Default for SpawnRequest {
    fn default() -> Self {
        Self {
            program: String::new(),
            arguments: Vec::new(),
            environment_pairs: Vec::new(),
            working_directory: None,
            uid: None,
            gid: None,
            stdio: vec![
                StdioTarget::Inherit(0),
                StdioTarget::Inherit(1),
                StdioTarget::Inherit(2),
            ],
            timeout: None,
            kill_signal: Signal::SIGTERM,
        }
    }
}

impl SpawnRequest {
    /// Request for `program` with argv `[program]`
    pub fn new(program: impl Into<String>) -> Self {
        let program = program.into();
        Self {
            arguments: vec![program.clone()],
            program,
            ..Default::default()
        }
    }

    /// Append one argument
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.arguments.push(arg.into());
        self
    }

    /// Append arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.arguments.extend(args.into_iter().map(Into::into));
        self
    }

    /// Append a `KEY=VALUE` environment pair
    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.environment_pairs.push(format!("{}={}", key, value));
        self
    }

    /// Append a raw environment entry, installed verbatim
    pub fn env_pair(mut self, pair: impl Into<String>) -> Self {
        self.environment_pairs.push(pair.into());
        self
    }

    /// Set working directory
    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    /// Set UID to run as
    pub fn uid(mut self, uid: u32) -> Self {
        self.uid = Some(uid);
        self
    }

    /// Set GID to run as
    pub fn gid(mut self, gid: u32) -> Self {
        self.gid = Some(gid);
        self
    }

    /// Replace all stdio slots
    pub fn stdio(mut self, targets: Vec<StdioTarget>) -> Self {
        self.stdio = targets;
        self
    }

    /// Set the target for one slot, padding intermediate slots with `Ignore`
    pub fn slot(mut self, slot: usize, target: StdioTarget) -> Self {
        if self.stdio.len() <= slot {
            self.stdio.resize(slot + 1, StdioTarget::Ignore);
        }
        self.stdio[slot] = target;
        self
    }

    /// Set timeout
    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }

    /// Set timeout in milliseconds; negative disables it
    pub fn timeout_millis(mut self, millis: i64) -> Self {
        self.timeout = u64::try_from(millis).ok().map(Duration::from_millis);
        self
    }

    /// Set the signal sent on timeout
    pub fn kill_signal(mut self, signal: Signal) -> Self {
        self.kill_signal = signal;
        self
    }

    /// Working directory if one is set and non-empty
    pub(crate) fn effective_cwd(&self) -> Option<&PathBuf> {
        self.working_directory
            .as_ref()
            .filter(|dir| !dir.as_os_str().is_empty())
    }
}
