//! Process launcher: fork, set up the child, exec, supervise
//!
//! Everything the child needs is prepared in the parent as an [`ExecPlan`]
//! before forking. After the fork the child only performs async-signal-safe
//! syscalls and leaves through `_exit`, either by a successful exec or after
//! writing one message to the error channel.

use log::{debug, warn};
use nix::errno::Errno;
use nix::unistd::{fork, ForkResult};
use std::ffi::CString;
use std::os::unix::io::RawFd;

use crate::config::{RunnerBuilder, RunnerConfig};
use crate::errors::{Result, SpawnError};
use crate::execution::assemble::assemble;
use crate::execution::channel::{
    ChannelMessage, ChannelWriter, ChildError, ChildErrorKind, ErrorChannel,
};
use crate::execution::environment::EnvironmentPlan;
use crate::execution::privilege::PrivilegePlan;
use crate::execution::stdio::StdioPlan;
use crate::execution::supervisor::TimeoutSupervisor;
use crate::request::SpawnRequest;
use crate::result::SpawnResult;

/// Exit status of a child whose setup or exec failed
pub const CHILD_FAILURE_STATUS: i32 = 127;

/// Search path used when the child environment has no PATH
pub const DEFAULT_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// Interpreter for executables without a recognized header (`ENOEXEC`)
pub const SCRIPT_SHELL: &str = "/bin/sh";

/// Owned C-string arena for one fork/exec cycle
pub struct ExecPlan {
    program: CString,
    candidates: Vec<CString>,
    shell: CString,
    _argv: Vec<CString>,
    argv_ptrs: Vec<*const libc::c_char>,
    /// Per candidate: `[sh, candidate, argv[1..]..., NULL]`
    script_argv_ptrs: Vec<Vec<*const libc::c_char>>,
    envp_ptrs: Vec<*const libc::c_char>,
    environment: EnvironmentPlan,
    stdio: StdioPlan,
    privileges: PrivilegePlan,
}

impl ExecPlan {
    /// Convert a request into C strings and resolved stdio sources
    pub fn prepare(request: &SpawnRequest, config: &RunnerConfig) -> Result<Self> {
        let program = CString::new(request.program.as_bytes()).map_err(|_| {
            SpawnError::InvalidRequest("program name contains nul byte".to_string())
        })?;

        let argv = request
            .arguments
            .iter()
            .map(|arg| {
                CString::new(arg.as_bytes()).map_err(|_| {
                    SpawnError::InvalidRequest(format!("argument contains nul byte: {:?}", arg))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let environment = EnvironmentPlan::prepare(request)?;
        let candidates = search_candidates(&request.program, environment.get(b"PATH"))?;
        let stdio = StdioPlan::prepare(&request.stdio, &config.devices)?;

        let shell = CString::new(SCRIPT_SHELL).map_err(|_| {
            SpawnError::InvalidRequest("shell path contains nul byte".to_string())
        })?;
        let argv_ptrs = null_terminated(&argv);
        let envp_ptrs = null_terminated(environment.entries());
        let script_argv_ptrs: Vec<Vec<*const libc::c_char>> = candidates
            .iter()
            .map(|candidate| {
                [shell.as_ptr(), candidate.as_ptr()]
                    .into_iter()
                    .chain(argv.iter().skip(1).map(|arg| arg.as_ptr()))
                    .chain(std::iter::once(std::ptr::null()))
                    .collect::<Vec<_>>()
            })
            .collect();

        Ok(Self {
            program,
            candidates,
            shell,
            _argv: argv,
            argv_ptrs,
            script_argv_ptrs,
            envp_ptrs,
            environment,
            stdio,
            privileges: PrivilegePlan::new(request.uid, request.gid),
        })
    }

    /// Paths that exec will try, in order
    pub fn candidates(&self) -> &[CString] {
        &self.candidates
    }

    /// Child branch. Never returns.
    fn run_child(&mut self, read_fd: RawFd, write_fd: RawFd) -> ! {
        // Ignored dispositions survive exec; the Rust runtime ignores SIGPIPE
        unsafe {
            libc::signal(libc::SIGPIPE, libc::SIG_DFL);
        }

        let mut channel = ChannelWriter::in_child(read_fd, write_fd);

        let error = match self.claim_descriptors(&mut channel) {
            Err(error) => error,
            Ok(()) => match self.setup() {
                Err(error) => error,
                Ok(()) => self.exec(),
            },
        };

        channel.report(&error);
        unsafe { libc::_exit(CHILD_FAILURE_STATUS) }
    }

    /// Keep the channel and inherited sources clear of the slot numbers
    fn claim_descriptors(
        &mut self,
        channel: &mut ChannelWriter,
    ) -> std::result::Result<(), ChildError<'static>> {
        channel
            .relocate_above(self.stdio.len() as RawFd)
            .map_err(|code| ChildError::new(ChildErrorKind::Dup, code, b"dup"))?;
        self.stdio.relocate_inherited()
    }

    /// stdio, then workspace, then identity
    fn setup(&self) -> std::result::Result<(), ChildError<'_>> {
        self.stdio.bind()?;
        self.environment.enter_workspace()?;
        self.privileges.apply()?;
        Ok(())
    }

    /// Try each candidate like `execvp`; only returns on failure.
    ///
    /// A candidate the kernel rejects with `ENOEXEC` is run as a script
    /// through [`SCRIPT_SHELL`] and the search stops there.
    fn exec(&self) -> ChildError<'_> {
        let mut saw_eacces = false;
        let mut last = libc::ENOENT;

        for (candidate, script_argv) in self.candidates.iter().zip(&self.script_argv_ptrs) {
            unsafe {
                libc::execve(
                    candidate.as_ptr(),
                    self.argv_ptrs.as_ptr(),
                    self.envp_ptrs.as_ptr(),
                );
            }
            match Errno::last() as i32 {
                libc::EACCES => {
                    saw_eacces = true;
                    last = libc::EACCES;
                }
                code @ (libc::ENOENT | libc::ENOTDIR) => last = code,
                libc::ENOEXEC => {
                    unsafe {
                        libc::execve(
                            self.shell.as_ptr(),
                            script_argv.as_ptr(),
                            self.envp_ptrs.as_ptr(),
                        );
                    }
                    return ChildError::last(ChildErrorKind::Exec, self.program.as_bytes());
                }
                code => return ChildError::new(ChildErrorKind::Exec, code, self.program.as_bytes()),
            }
        }

        let code = if saw_eacces { libc::EACCES } else { last };
        ChildError::new(ChildErrorKind::Exec, code, self.program.as_bytes())
    }
}

fn null_terminated(strings: &[CString]) -> Vec<*const libc::c_char> {
    strings
        .iter()
        .map(|s| s.as_ptr())
        .chain(std::iter::once(std::ptr::null()))
        .collect()
}

/// Executable lookup: a name with `/` is used as-is, otherwise every PATH entry
fn search_candidates(program: &str, path_var: Option<&[u8]>) -> Result<Vec<CString>> {
    if program.is_empty() {
        return Ok(Vec::new());
    }

    let to_cstring = |bytes: Vec<u8>| {
        CString::new(bytes)
            .map_err(|_| SpawnError::InvalidRequest("search path contains nul byte".to_string()))
    };

    if program.contains('/') {
        return Ok(vec![to_cstring(program.as_bytes().to_vec())?]);
    }

    let path_var = path_var.unwrap_or(DEFAULT_PATH.as_bytes());
    path_var
        .split(|&b| b == b':')
        .map(|dir| {
            let dir: &[u8] = if dir.is_empty() { b"." } else { dir };
            let mut candidate = dir.to_vec();
            if !candidate.ends_with(b"/") {
                candidate.push(b'/');
            }
            candidate.extend_from_slice(program.as_bytes());
            to_cstring(candidate)
        })
        .collect()
}

/// Blocking process runner
#[derive(Debug, Clone)]
pub struct SpawnRunner {
    config: RunnerConfig,
    supervisor: TimeoutSupervisor,
}

impl Default for SpawnRunner {
    fn default() -> Self {
        Self::new(RunnerConfig::default())
    }
}

impl SpawnRunner {
    pub fn new(config: RunnerConfig) -> Self {
        let supervisor = TimeoutSupervisor::new(config.poll_interval);
        Self { config, supervisor }
    }

    pub fn builder() -> RunnerBuilder {
        RunnerBuilder::new()
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Run the request to completion.
    ///
    /// Pipe and fork failures come back as `NotStarted` results; setup and
    /// exec failures as `Exited(127)` with an error message. `Err` means the
    /// request could not be prepared or waiting on the child failed.
    pub fn run(&self, request: &SpawnRequest) -> Result<SpawnResult> {
        let mut plan = ExecPlan::prepare(request, &self.config)?;
        debug!(
            "Prepared {} with {} exec candidate(s) and {} stdio slot(s)",
            request.program,
            plan.candidates.len(),
            plan.stdio.len()
        );

        let channel = match ErrorChannel::open() {
            Ok(channel) => channel,
            Err(e) => {
                warn!("Failed to create error channel: {}", e);
                return Ok(SpawnResult::not_started(ChannelMessage::format(
                    e as i32, "pipe",
                )));
            }
        };
        let (read_fd, write_fd) = channel.raw_fds();

        match unsafe { fork() } {
            Ok(ForkResult::Child) => plan.run_child(read_fd, write_fd),
            Ok(ForkResult::Parent { child }) => {
                let reader = channel.into_reader();
                debug!("Spawned {} as pid {}", request.program, child);

                let supervision =
                    match self
                        .supervisor
                        .supervise(child, request.timeout, request.kill_signal)
                    {
                        Ok(supervision) => supervision,
                        Err(e) => {
                            reader.close();
                            return Err(e);
                        }
                    };

                let result = assemble(supervision, child, reader);
                debug!(
                    "pid {} finished: {:?} (exit code {}, timed out: {})",
                    child, result.termination, result.exit_code, result.timed_out
                );
                Ok(result)
            }
            Err(e) => {
                drop(channel);
                warn!("fork failed for {}: {}", request.program, e);
                Ok(SpawnResult::not_started(ChannelMessage::format(
                    e as i32, "fork",
                )))
            }
        }
    }

    /// Run and fail unless the child exited 0 without a reported failure
    pub fn run_checked(&self, request: &SpawnRequest) -> Result<SpawnResult> {
        let result = self.run(request)?;
        result.check(&request.arguments.join(" "))?;
        Ok(result)
    }
}

/// Run one request with the default runner configuration
pub fn spawn_sync(request: &SpawnRequest) -> Result<SpawnResult> {
    SpawnRunner::default().run(request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::StdioTarget;
    use crate::result::Termination;
    use crate::test_support::serial_guard;
    use nix::sys::signal::Signal;
    use std::os::unix::fs::PermissionsExt;
    use std::time::Duration;

    fn quiet(request: SpawnRequest) -> SpawnRequest {
        request.stdio(vec![
            StdioTarget::Ignore,
            StdioTarget::Ignore,
            StdioTarget::Ignore,
        ])
    }

    fn candidate_strings(plan: &ExecPlan) -> Vec<String> {
        plan.candidates()
            .iter()
            .map(|c| c.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn candidates_follow_request_path() {
        let request = SpawnRequest::new("ls").env("PATH", "/opt/bin::/usr/bin/");
        let plan = ExecPlan::prepare(&request, &RunnerConfig::default()).unwrap();
        assert_eq!(
            candidate_strings(&plan),
            vec!["/opt/bin/ls", "./ls", "/usr/bin/ls"]
        );
    }

    #[test]
    fn candidates_use_program_with_slash_verbatim() {
        let request = SpawnRequest::new("./bin/tool").env("PATH", "/opt/bin");
        let plan = ExecPlan::prepare(&request, &RunnerConfig::default()).unwrap();
        assert_eq!(candidate_strings(&plan), vec!["./bin/tool"]);
    }

    #[test]
    fn candidates_default_path_without_path_var() {
        let candidates = search_candidates("ls", None).unwrap();
        assert_eq!(candidates.len(), DEFAULT_PATH.split(':').count());
        assert_eq!(candidates[0].to_str().unwrap(), "/usr/local/sbin/ls");
    }

    #[test]
    fn empty_program_has_no_candidates() {
        assert!(search_candidates("", Some(b"/bin")).unwrap().is_empty());
    }

    #[test]
    fn prepare_rejects_nul_in_argument() {
        let request = SpawnRequest::new("echo").arg("bad\0arg");
        let result = ExecPlan::prepare(&request, &RunnerConfig::default());
        assert!(matches!(result, Err(SpawnError::InvalidRequest(_))));
    }

    #[test]
    fn argv_and_envp_are_null_terminated() {
        let request = SpawnRequest::new("echo").arg("hi");
        let plan = ExecPlan::prepare(&request, &RunnerConfig::default()).unwrap();
        assert_eq!(plan.argv_ptrs.len(), 3);
        assert!(plan.argv_ptrs[2].is_null());
        assert!(plan.envp_ptrs.last().unwrap().is_null());
    }

    #[test]
    fn script_argv_runs_candidate_through_shell() {
        let request = SpawnRequest::new("tool")
            .args(["--flag", "value"])
            .env("PATH", "/opt/bin:/usr/bin");
        let plan = ExecPlan::prepare(&request, &RunnerConfig::default()).unwrap();

        assert_eq!(plan.script_argv_ptrs.len(), plan.candidates().len());
        let argv = &plan.script_argv_ptrs[1];
        assert_eq!(argv.len(), 5);
        assert_eq!(argv[0], plan.shell.as_ptr());
        assert_eq!(argv[1], plan.candidates()[1].as_ptr());
        assert_eq!(argv[2], plan.argv_ptrs[1]);
        assert_eq!(argv[3], plan.argv_ptrs[2]);
        assert!(argv[4].is_null());
    }

    #[test]
    fn headerless_script_runs_through_shell() {
        let _guard = serial_guard();
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("plain-script");
        let out = dir.path().join("out.txt");
        std::fs::write(&script, "echo \"ran with $1\"\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let request = SpawnRequest::new(script.to_str().unwrap())
            .arg("first")
            .stdio(vec![
                StdioTarget::Ignore,
                StdioTarget::OpenPath(out.clone()),
                StdioTarget::Ignore,
            ]);
        let result = SpawnRunner::default().run(&request).unwrap();

        assert!(result.success(), "{:?}", result);
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "ran with first\n");
    }

    #[test]
    fn runs_program_to_completion() {
        let _guard = serial_guard();
        let result = SpawnRunner::default()
            .run(&quiet(SpawnRequest::new("true")))
            .unwrap();
        assert!(result.pid.is_some());
        assert_eq!(result.termination, Termination::Exited(0));
        assert_eq!(result.exit_code, 0);
        assert!(!result.timed_out);
        assert!(result.error_message.is_none());
        assert!(result.success());
    }

    #[test]
    fn reports_nonzero_exit_without_message() {
        let _guard = serial_guard();
        let request = quiet(SpawnRequest::new("sh").args(["-c", "exit 3"]));
        let result = spawn_sync(&request).unwrap();
        assert_eq!(result.termination, Termination::Exited(3));
        assert!(result.error_message.is_none());
        assert!(result.failure().is_none());
    }

    #[test]
    fn missing_program_reports_exec_failure() {
        let _guard = serial_guard();
        let result = SpawnRunner::default()
            .run(&quiet(SpawnRequest::new("not_exists_exe")))
            .unwrap();
        assert_eq!(result.exit_code, CHILD_FAILURE_STATUS);
        assert_eq!(result.termination, Termination::Exited(127));
        assert_eq!(
            result.error_message.as_deref(),
            Some(format!("{} not_exists_exe", libc::ENOENT).as_str())
        );
    }

    #[test]
    fn non_executable_file_reports_eacces() {
        let _guard = serial_guard();
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("plain.txt");
        std::fs::write(&script, "not a program").unwrap();

        let request = quiet(SpawnRequest::new(script.to_str().unwrap()));
        let result = SpawnRunner::default().run(&request).unwrap();
        assert_eq!(result.exit_code, 127);
        assert_eq!(result.failure().unwrap().code, "EACCES");
    }

    #[test]
    fn timeout_kills_child() {
        let _guard = serial_guard();
        let runner = SpawnRunner::builder()
            .poll_interval(Duration::from_millis(5))
            .build()
            .unwrap();
        let request = quiet(SpawnRequest::new("sleep").arg("5"))
            .timeout(Duration::from_millis(50))
            .kill_signal(Signal::SIGKILL);

        let result = runner.run(&request).unwrap();
        assert!(result.timed_out);
        assert_eq!(result.termination, Termination::signaled(libc::SIGKILL));
        assert_eq!(result.exit_code, 128 + libc::SIGKILL);
        assert!(result.error_message.is_none());
    }

    #[test]
    fn run_checked_fails_on_nonzero_status() {
        let _guard = serial_guard();
        let request = quiet(SpawnRequest::new("false"));
        let err = SpawnRunner::default().run_checked(&request).unwrap_err();
        assert_eq!(err.to_string(), "Command failed: `false`");
    }
}
