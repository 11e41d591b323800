//! Execution layer: fork, child setup, exec and supervision
//!
//! This module turns a [`SpawnRequest`](crate::SpawnRequest) into a finished
//! child process and a [`SpawnResult`](crate::SpawnResult).
//!
//! # Features
//!
//! - **Stdio binding**: Inherit, null device or opened paths per descriptor slot
//! - **Environment**: Ordered overrides on top of the parent environment
//! - **Credential switching**: GID then UID before exec
//! - **Error channel**: Child setup failures reported as `"<errno> <context>"`
//! - **Timeouts**: Polling supervisor that sends a configurable kill signal
//!
//! # Examples
//!
//! ```ignore
//! use runsync::{SpawnRequest, SpawnRunner};
//! use std::time::Duration;
//!
//! let request = SpawnRequest::new("sleep")
//!     .arg("10")
//!     .timeout(Duration::from_millis(100));
//! let result = SpawnRunner::default().run(&request)?;
//! assert!(result.timed_out);
//! ```

pub mod assemble;
pub mod channel;
pub mod environment;
pub mod privilege;
pub mod process;
pub mod stdio;
pub mod supervisor;

pub use assemble::assemble;
pub use channel::{ChannelMessage, ChildErrorKind, MAX_MESSAGE_LEN};
pub use process::{spawn_sync, ExecPlan, SpawnRunner, CHILD_FAILURE_STATUS, DEFAULT_PATH};
pub use supervisor::{ChildExit, Supervision, TimeoutSupervisor};
