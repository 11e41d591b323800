//! runsync: blocking child-process execution
//!
//! Runs one program to completion with per-slot stdio redirection, an
//! environment built on top of the parent's, an optional working directory,
//! optional uid/gid switch and an optional wall-clock timeout. Failures
//! inside the child between fork and exec are reported back through a
//! close-on-exec pipe as `"<errno> <context>"`.
//!
//! # Modules
//!
//! - **request**: What to run and how to set up the child
//! - **execution**: Fork, child setup, exec and supervision
//! - **result**: Termination state and caller-facing failures
//! - **config**: Runner settings (poll interval, device paths)
//! - **marshal**: JSON options and result objects
//!
//! # Example
//!
//! ```ignore
//! use runsync::{SpawnRequest, SpawnRunner, StdioTarget};
//! use std::time::Duration;
//!
//! let request = SpawnRequest::new("echo")
//!     .arg("hello world")
//!     .slot(1, StdioTarget::OpenPath("/tmp/out.txt".into()))
//!     .timeout(Duration::from_secs(5));
//!
//! let result = SpawnRunner::default().run(&request)?;
//! println!("Exit code: {}", result.exit_code);
//! ```

#![cfg(unix)]

// Core modules
pub mod errors;
pub mod utils;

pub mod config;
pub mod request;
pub mod result;

pub mod execution;
pub mod marshal;

// Public API
pub use config::{DevicePaths, RunnerBuilder, RunnerConfig};
pub use errors::{Result, SpawnError};
pub use execution::{spawn_sync, SpawnRunner};
pub use marshal::{run_with_options, SpawnOptions, SpawnOutput};
pub use request::{SpawnRequest, StdioTarget};
pub use result::{SpawnFailure, SpawnResult, Termination};

#[cfg(test)]
mod tests {
    use crate::{SpawnRequest, SpawnRunner};

    #[test]
    fn test_module_imports() {
        // Verify core API is accessible
        let _runner = SpawnRunner::default();
        let _request = SpawnRequest::new("true");
    }
}

#[cfg(test)]
pub mod test_support {
    use std::sync::{Mutex, MutexGuard, OnceLock};

    pub fn serial_guard() -> MutexGuard<'static, ()> {
        static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        LOCK.get_or_init(|| Mutex::new(()))
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }
}
