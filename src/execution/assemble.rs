//! Result assembler: classify the reaped child and collect the channel message

use log::debug;
use nix::unistd::Pid;

use crate::execution::channel::ChannelReader;
use crate::execution::supervisor::{ChildExit, Supervision};
use crate::result::{SpawnResult, Termination};

/// Build the result of one run. Consumes (and so closes) the channel reader.
pub fn assemble(supervision: Supervision, pid: Pid, channel: ChannelReader) -> SpawnResult {
    let (exit_code, termination, error_message) = match supervision.exit {
        ChildExit::Signaled(signal) => {
            // A signaled child has nothing useful to report; do not read.
            channel.close();
            let number = signal as i32;
            (128 + number, Termination::signaled(number), None)
        }
        ChildExit::Exited(code) => {
            let message = channel.drain();
            if let Some(message) = &message {
                debug!("Child {} reported setup failure: {}", pid, message);
            }
            (code, Termination::Exited(code), message)
        }
    };

    SpawnResult {
        pid: Some(pid),
        exit_code,
        termination,
        timed_out: supervision.timed_out,
        error_message,
    }
}
