//! Utility functions for spawn operations

use nix::errno::Errno;
use nix::sys::signal::Signal;
use std::str::FromStr;

/// Check if running as root
pub fn is_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}

/// Get current UID
pub fn get_uid() -> u32 {
    unsafe { libc::geteuid() }
}

/// Get current GID
pub fn get_gid() -> u32 {
    unsafe { libc::getegid() }
}

/// Symbolic name for an errno value (`2` -> `"ENOENT"`), empty if unknown
pub fn errno_code_name(errno: i32) -> String {
    match Errno::from_raw(errno) {
        Errno::UnknownErrno => String::new(),
        known => format!("{:?}", known),
    }
}

/// Parse a signal given by name (`"SIGKILL"`, `"KILL"`) or number (`"9"`)
pub fn parse_signal(value: &str) -> Option<Signal> {
    let value = value.trim();
    if let Ok(number) = value.parse::<i32>() {
        return Signal::try_from(number).ok();
    }

    let upper = value.to_ascii_uppercase();
    if upper.starts_with("SIG") {
        Signal::from_str(&upper).ok()
    } else {
        Signal::from_str(&format!("SIG{}", upper)).ok()
    }
}
