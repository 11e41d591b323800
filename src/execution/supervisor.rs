//! Timeout supervisor: waits for the child, killing it once the deadline passes

use log::{debug, warn};
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use std::thread;
use std::time::{Duration, Instant};

use crate::errors::{Result, SpawnError};

/// How a reaped child ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildExit {
    Exited(i32),
    Signaled(Signal),
}

impl ChildExit {
    /// Terminal wait statuses only; stop/continue reports are `None`
    pub fn from_wait_status(status: WaitStatus) -> Option<Self> {
        match status {
            WaitStatus::Exited(_, code) => Some(ChildExit::Exited(code)),
            WaitStatus::Signaled(_, signal, _) => Some(ChildExit::Signaled(signal)),
            _ => None,
        }
    }
}

/// Reaped child plus whether the kill signal was sent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Supervision {
    pub exit: ChildExit,
    pub timed_out: bool,
}

/// Parent-side wait loop
#[derive(Debug, Clone, Copy)]
pub struct TimeoutSupervisor {
    poll_interval: Duration,
}

impl TimeoutSupervisor {
    pub fn new(poll_interval: Duration) -> Self {
        Self { poll_interval }
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Wait until `pid` terminates.
    ///
    /// Without a timeout this is one blocking wait. With one, the child is
    /// polled every `poll_interval`; once the deadline is exceeded the kill
    /// signal is sent a single time and polling continues until the child is
    /// reaped.
    pub fn supervise(
        &self,
        pid: Pid,
        timeout: Option<Duration>,
        kill_signal: Signal,
    ) -> Result<Supervision> {
        match timeout {
            None => Ok(Supervision {
                exit: wait_blocking(pid)?,
                timed_out: false,
            }),
            Some(timeout) => self.poll_with_deadline(pid, timeout, kill_signal),
        }
    }

    fn poll_with_deadline(
        &self,
        pid: Pid,
        timeout: Duration,
        kill_signal: Signal,
    ) -> Result<Supervision> {
        let start = Instant::now();
        let mut timed_out = false;

        loop {
            if let Some(exit) = poll_outcome(waitpid(pid, Some(WaitPidFlag::WNOHANG)))? {
                return Ok(Supervision { exit, timed_out });
            }

            thread::sleep(self.poll_interval);

            if !timed_out && start.elapsed() > timeout {
                warn!(
                    "Timeout of {}ms exceeded for pid {}, sending {}",
                    timeout.as_millis(),
                    pid,
                    kill_signal
                );
                if let Err(e) = kill(pid, kill_signal) {
                    // Child may already be a zombie waiting to be reaped
                    debug!("kill({}, {}) failed: {}", pid, kill_signal, e);
                }
                timed_out = true;
            }
        }
    }
}

/// Blocking wait, retried on EINTR
fn wait_blocking(pid: Pid) -> Result<ChildExit> {
    loop {
        match waitpid(pid, None) {
            Ok(status) => match ChildExit::from_wait_status(status) {
                Some(exit) => return Ok(exit),
                None => continue,
            },
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(wait_failed(e)),
        }
    }
}

/// One non-blocking poll. `None` while the child is running or when the
/// poll was interrupted; the caller polls again after its sleep.
fn poll_outcome(outcome: nix::Result<WaitStatus>) -> Result<Option<ChildExit>> {
    match outcome {
        Ok(status) => Ok(ChildExit::from_wait_status(status)),
        Err(Errno::EINTR) => Ok(None),
        Err(e) => Err(wait_failed(e)),
    }
}

fn wait_failed(e: Errno) -> SpawnError {
    SpawnError::Syscall(format!("waitpid failed: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::serial_guard;
    use nix::unistd::{fork, ForkResult};

    fn spawn_child(body: fn() -> !) -> Pid {
        match unsafe { fork() } {
            Ok(ForkResult::Child) => body(),
            Ok(ForkResult::Parent { child }) => child,
            Err(e) => panic!("fork failed: {}", e),
        }
    }

    fn exit_42() -> ! {
        unsafe { libc::_exit(42) }
    }

    fn sleep_long() -> ! {
        unsafe {
            libc::sleep(10);
            libc::_exit(0)
        }
    }

    fn supervisor() -> TimeoutSupervisor {
        TimeoutSupervisor::new(Duration::from_millis(10))
    }

    #[test]
    fn blocking_wait_returns_exit_status() {
        let _guard = serial_guard();
        let child = spawn_child(exit_42);
        let outcome = supervisor()
            .supervise(child, None, Signal::SIGTERM)
            .unwrap();
        assert!(!outcome.timed_out);
        assert_eq!(outcome.exit, ChildExit::Exited(42));
    }

    #[test]
    fn polling_wait_returns_before_deadline() {
        let _guard = serial_guard();
        let child = spawn_child(exit_42);
        let outcome = supervisor()
            .supervise(child, Some(Duration::from_secs(5)), Signal::SIGTERM)
            .unwrap();
        assert!(!outcome.timed_out);
        assert_eq!(outcome.exit, ChildExit::Exited(42));
    }

    #[test]
    fn deadline_sends_kill_signal() {
        let _guard = serial_guard();
        let child = spawn_child(sleep_long);
        let start = Instant::now();
        let outcome = supervisor()
            .supervise(child, Some(Duration::from_millis(50)), Signal::SIGKILL)
            .unwrap();
        assert!(outcome.timed_out);
        assert_eq!(outcome.exit, ChildExit::Signaled(Signal::SIGKILL));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn zero_timeout_still_reaps_child() {
        let _guard = serial_guard();
        let child = spawn_child(sleep_long);
        let outcome = supervisor()
            .supervise(child, Some(Duration::ZERO), Signal::SIGTERM)
            .unwrap();
        assert!(outcome.timed_out);
        assert_eq!(outcome.exit, ChildExit::Signaled(Signal::SIGTERM));
    }

    #[test]
    fn interrupted_poll_is_retried_on_next_tick() {
        assert_eq!(poll_outcome(Err(Errno::EINTR)).unwrap(), None);
        assert_eq!(poll_outcome(Ok(WaitStatus::StillAlive)).unwrap(), None);
        assert!(matches!(
            poll_outcome(Err(Errno::ECHILD)),
            Err(SpawnError::Syscall(_))
        ));
    }

    #[test]
    fn only_terminal_statuses_classify() {
        let pid = Pid::from_raw(10);
        assert_eq!(
            ChildExit::from_wait_status(WaitStatus::Exited(pid, 3)),
            Some(ChildExit::Exited(3))
        );
        assert_eq!(
            ChildExit::from_wait_status(WaitStatus::Signaled(pid, Signal::SIGTERM, false)),
            Some(ChildExit::Signaled(Signal::SIGTERM))
        );
        assert_eq!(
            ChildExit::from_wait_status(WaitStatus::Stopped(pid, Signal::SIGSTOP)),
            None
        );
        assert_eq!(ChildExit::from_wait_status(WaitStatus::StillAlive), None);
    }

    #[test]
    fn waiting_on_unknown_pid_fails() {
        let result = supervisor().supervise(Pid::from_raw(i32::MAX), None, Signal::SIGTERM);
        assert!(matches!(result, Err(SpawnError::Syscall(_))));
    }
}
