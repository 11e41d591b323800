//! Identity drop inside the child

use crate::execution::channel::{ChildError, ChildErrorKind};

/// Group and user the child should assume before exec
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrivilegePlan {
    pub uid: Option<u32>,
    pub gid: Option<u32>,
}

impl PrivilegePlan {
    pub fn new(uid: Option<u32>, gid: Option<u32>) -> Self {
        Self { uid, gid }
    }

    /// Whether any identity change was requested
    pub fn is_noop(&self) -> bool {
        self.uid.is_none() && self.gid.is_none()
    }

    /// Child branch: group first, a dropped uid may no longer be allowed to setgid
    pub fn apply(&self) -> Result<(), ChildError<'static>> {
        if let Some(gid) = self.gid {
            if unsafe { libc::setgid(gid) } != 0 {
                return Err(ChildError::last_for(ChildErrorKind::Setgid));
            }
        }

        if let Some(uid) = self.uid {
            if unsafe { libc::setuid(uid) } != 0 {
                return Err(ChildError::last_for(ChildErrorKind::Setuid));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::serial_guard;
    use crate::utils;
    use nix::sys::wait::{waitpid, WaitStatus};
    use nix::unistd::{fork, ForkResult};

    fn run_in_child(plan: PrivilegePlan) -> i32 {
        match unsafe { fork() } {
            Ok(ForkResult::Child) => unsafe {
                match plan.apply() {
                    Ok(()) => libc::_exit(0),
                    Err(e) if e.kind == ChildErrorKind::Setgid => libc::_exit(10),
                    Err(e) if e.kind == ChildErrorKind::Setuid => libc::_exit(11),
                    Err(_) => libc::_exit(12),
                }
            },
            Ok(ForkResult::Parent { child }) => {
                match waitpid(child, None) {
                    Ok(WaitStatus::Exited(_, code)) => code,
                    other => panic!("unexpected wait result: {:?}", other),
                }
            }
            Err(e) => panic!("fork failed: {}", e),
        }
    }

    #[test]
    fn empty_plan_is_noop() {
        let plan = PrivilegePlan::default();
        assert!(plan.is_noop());
        assert!(plan.apply().is_ok());
    }

    #[test]
    fn assuming_current_identity_succeeds() {
        let _guard = serial_guard();
        let plan = PrivilegePlan::new(Some(utils::get_uid()), Some(utils::get_gid()));
        assert!(!plan.is_noop());
        assert_eq!(run_in_child(plan), 0);
    }

    #[test]
    fn setuid_root_fails_without_privileges() {
        if utils::is_root() {
            return;
        }
        let _guard = serial_guard();
        assert_eq!(run_in_child(PrivilegePlan::new(Some(0), None)), 11);
    }

    #[test]
    fn setgid_is_attempted_before_setuid() {
        if utils::is_root() || utils::get_gid() == 0 {
            return;
        }
        let _guard = serial_guard();
        assert_eq!(run_in_child(PrivilegePlan::new(Some(0), Some(0))), 10);
    }
}
