//! JSON boundary: option objects in, result objects out
//!
//! Callers that drive the runner from a scripting host pass an options object
//! and get back a plain result object. Conversion into a [`SpawnRequest`] is
//! where stdio shorthands and signal names are resolved.

use nix::sys::signal::Signal;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::errors::{Result, SpawnError};
use crate::execution::SpawnRunner;
use crate::request::{SpawnRequest, StdioTarget};
use crate::result::{SpawnResult, Termination};
use crate::utils::parse_signal;

/// One environment entry: `["KEY", "VALUE"]` or a raw `"KEY=VALUE"` string
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum EnvEntry {
    Pair(String, String),
    Raw(String),
}

impl EnvEntry {
    fn into_pair(self) -> String {
        match self {
            EnvEntry::Pair(key, value) => format!("{}={}", key, value),
            EnvEntry::Raw(raw) => raw,
        }
    }
}

/// Descriptor slot as written in an options object
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum StdioEntry {
    Fd(i32),
    Name(String),
    Path { path: PathBuf },
}

/// `"inherit"` / `"ignore"` for all three standard slots, or one entry per slot
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum StdioOption {
    Shorthand(String),
    Slots(Vec<Option<StdioEntry>>),
}

/// Signal given by name or number
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum SignalOption {
    Number(i32),
    Name(String),
}

impl SignalOption {
    /// Unknown signals fall back to SIGTERM
    fn resolve(&self) -> Signal {
        let parsed = match self {
            SignalOption::Number(number) => Signal::try_from(*number).ok(),
            SignalOption::Name(name) => parse_signal(name),
        };
        parsed.unwrap_or_else(|| {
            log::debug!("Unknown kill signal {:?}, using SIGTERM", self);
            Signal::SIGTERM
        })
    }
}

/// Options object accepted at the boundary
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpawnOptions {
    pub cwd: Option<PathBuf>,
    pub env: Option<Vec<EnvEntry>>,
    pub stdio: Option<StdioOption>,
    /// Milliseconds; negative disables the timeout
    pub timeout: Option<i64>,
    pub kill_signal: Option<SignalOption>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
}

impl SpawnOptions {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| SpawnError::InvalidOptions(e.to_string()))
    }

    /// Build a request running `file` with argv `[file, args...]`
    pub fn into_request(self, file: &str, args: &[String]) -> Result<SpawnRequest> {
        let mut request = SpawnRequest::new(file).args(args.iter().cloned());

        if let Some(cwd) = self.cwd {
            if !cwd.as_os_str().is_empty() {
                request = request.cwd(cwd);
            }
        }

        for entry in self.env.unwrap_or_default() {
            request = request.env_pair(entry.into_pair());
        }

        if let Some(stdio) = self.stdio {
            request = request.stdio(resolve_stdio(stdio)?);
        }

        if let Some(timeout) = self.timeout {
            request = request.timeout_millis(timeout);
        }

        if let Some(signal) = self.kill_signal {
            request = request.kill_signal(signal.resolve());
        }

        if let Some(uid) = self.uid {
            request = request.uid(uid);
        }
        if let Some(gid) = self.gid {
            request = request.gid(gid);
        }

        Ok(request)
    }
}

fn invalid_stdio(value: &str) -> SpawnError {
    SpawnError::InvalidOptions(format!("Invalid stdio option '{}'", value))
}

fn resolve_stdio(option: StdioOption) -> Result<Vec<StdioTarget>> {
    let mut targets = match option {
        StdioOption::Shorthand(name) => match name.as_str() {
            "inherit" => (0..3).map(StdioTarget::Inherit).collect(),
            "ignore" => vec![StdioTarget::Ignore; 3],
            other => return Err(invalid_stdio(other)),
        },
        StdioOption::Slots(slots) => slots
            .into_iter()
            .enumerate()
            .map(|(slot, entry)| match entry {
                None => Ok(StdioTarget::Ignore),
                Some(StdioEntry::Fd(fd)) => Ok(StdioTarget::Inherit(fd)),
                Some(StdioEntry::Path { path }) => Ok(StdioTarget::OpenPath(path)),
                Some(StdioEntry::Name(name)) => match name.as_str() {
                    "inherit" => Ok(StdioTarget::Inherit(slot as i32)),
                    "ignore" => Ok(StdioTarget::Ignore),
                    other => Err(invalid_stdio(other)),
                },
            })
            .collect::<Result<Vec<_>>>()?,
    };

    while targets.len() < 3 {
        targets.push(StdioTarget::Ignore);
    }
    Ok(targets)
}

/// Result object returned at the boundary
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpawnOutput {
    pub pid: i32,
    pub status: i32,
    pub signal: Option<String>,
    pub file: String,
    pub args: Vec<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub timed_out: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl SpawnOutput {
    pub fn from_result(result: &SpawnResult, file: &str, args: &[String]) -> Self {
        let signal = match &result.termination {
            Termination::Signaled { name, .. } => Some(name.clone()),
            _ => None,
        };

        Self {
            pid: result.pid.map(|pid| pid.as_raw()).unwrap_or(0),
            status: result.exit_code,
            signal,
            file: file.to_string(),
            args: args.to_vec(),
            timed_out: result.timed_out,
            error_message: result.error_message.clone(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| SpawnError::InvalidOptions(e.to_string()))
    }
}

/// Run `file` with the given options and produce the result object.
///
/// `args` excludes argv[0]; the echoed `args` field includes it.
pub fn run_with_options(
    runner: &SpawnRunner,
    file: &str,
    args: &[String],
    options: SpawnOptions,
) -> Result<SpawnOutput> {
    let request = options.into_request(file, args)?;
    let result = runner.run(&request)?;
    Ok(SpawnOutput::from_result(&result, file, &request.arguments))
}
