//! Error channel between the forked child and the supervising parent
//!
//! The child writes at most one NUL-terminated `"<errno> <context>"` message
//! before it terminates. The write end is close-on-exec, so a successful exec
//! closes it without writing and the parent reads nothing.
//!
//! Everything on the child side here is async-signal-safe: no allocation, no
//! locks, raw `write(2)` only.

use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::unistd::read;
use std::fmt::{self, Write};
use std::os::fd::{AsRawFd, OwnedFd};
use std::os::unix::io::RawFd;

/// Longest message carried by the channel, excluding the trailing NUL
pub const MAX_MESSAGE_LEN: usize = 1023;

const BUF_LEN: usize = MAX_MESSAGE_LEN + 1;

/// What the child was doing when setup failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildErrorKind {
    /// Opening a stdio path or device
    Open,
    /// Binding a descriptor to its slot
    Dup,
    /// Changing into the working directory
    Chdir,
    Setgid,
    Setuid,
    /// Replacing the process image
    Exec,
}

/// Failure observed in the child branch, serialized only when written to the pipe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildError<'a> {
    pub kind: ChildErrorKind,
    pub os_code: i32,
    pub context: &'a [u8],
}

impl<'a> ChildError<'a> {
    pub fn new(kind: ChildErrorKind, os_code: i32, context: &'a [u8]) -> Self {
        Self {
            kind,
            os_code,
            context,
        }
    }

    /// Capture `errno` right after a failed call
    pub fn last(kind: ChildErrorKind, context: &'a [u8]) -> Self {
        Self::new(kind, Errno::last() as i32, context)
    }

    /// Error for a fixed-context step (`dup`, `setgid`, `setuid`)
    pub fn last_for(kind: ChildErrorKind) -> Self {
        let context: &'static [u8] = match kind {
            ChildErrorKind::Dup => b"dup",
            ChildErrorKind::Setgid => b"setgid",
            ChildErrorKind::Setuid => b"setuid",
            ChildErrorKind::Chdir => b"chdir",
            ChildErrorKind::Open => b"open",
            ChildErrorKind::Exec => b"exec",
        };
        Self::last(kind, context)
    }

    /// Encode into the wire format
    pub fn encode(&self, buf: &mut MessageBuf) {
        buf.clear();
        let _ = write!(buf, "{} ", self.os_code);
        buf.push_bytes(self.context);
    }
}

/// Fixed-size stack buffer for one wire message
pub struct MessageBuf {
    bytes: [u8; BUF_LEN],
    len: usize,
}

impl Default for MessageBuf {
    fn default() -> Self {
        Self {
            bytes: [0; BUF_LEN],
            len: 0,
        }
    }
}

impl MessageBuf {
    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Append bytes, silently truncating at [`MAX_MESSAGE_LEN`]
    pub fn push_bytes(&mut self, data: &[u8]) {
        let room = MAX_MESSAGE_LEN - self.len;
        let take = data.len().min(room);
        self.bytes[self.len..self.len + take].copy_from_slice(&data[..take]);
        self.len += take;
    }

    /// Message bytes without the terminator
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    /// Message bytes including the NUL terminator
    fn as_wire(&mut self) -> &[u8] {
        self.bytes[self.len] = 0;
        &self.bytes[..=self.len]
    }
}

impl Write for MessageBuf {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.push_bytes(s.as_bytes());
        Ok(())
    }
}

/// Parsed channel message on the parent side
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMessage {
    pub os_code: i32,
    pub context: String,
}

impl ChannelMessage {
    /// Parse `"<errno> <context>"`
    pub fn parse(message: &str) -> Option<Self> {
        let (code, context) = message.split_once(' ')?;
        if code.is_empty() || !code.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        Some(Self {
            os_code: code.parse().ok()?,
            context: context.to_string(),
        })
    }

    /// Render in the wire format (without terminator)
    pub fn format(os_code: i32, context: &str) -> String {
        format!("{} {}", os_code, context)
    }
}

/// Freshly created channel, both ends still open
pub struct ErrorChannel {
    read: OwnedFd,
    write: OwnedFd,
}

impl ErrorChannel {
    /// Create the pipe. Both ends are close-on-exec, the read end is non-blocking.
    pub fn open() -> nix::Result<Self> {
        let (read, write) = cloexec_pipe()?;
        set_nonblocking(read.as_raw_fd())?;
        Ok(Self { read, write })
    }

    /// Raw descriptor numbers, for use in the child branch
    pub fn raw_fds(&self) -> (RawFd, RawFd) {
        (self.read.as_raw_fd(), self.write.as_raw_fd())
    }

    /// Parent branch: close the write end, keep the read end
    pub fn into_reader(self) -> ChannelReader {
        drop(self.write);
        ChannelReader { fd: self.read }
    }
}

/// Child-side handle on the write end
pub struct ChannelWriter {
    fd: RawFd,
}

impl ChannelWriter {
    /// Child branch: close the read end and keep the write end
    pub fn in_child(read_fd: RawFd, write_fd: RawFd) -> Self {
        unsafe {
            libc::close(read_fd);
        }
        Self::from_raw_fd(write_fd)
    }

    /// Wrap a write end without taking ownership
    pub fn from_raw_fd(fd: RawFd) -> Self {
        Self { fd }
    }

    pub fn raw_fd(&self) -> RawFd {
        self.fd
    }

    /// Move the write end to a descriptor number >= `min_fd` so binding
    /// stdio slots below `min_fd` cannot clobber it
    pub fn relocate_above(&mut self, min_fd: RawFd) -> Result<(), i32> {
        if self.fd >= min_fd {
            return Ok(());
        }
        let moved = unsafe { libc::fcntl(self.fd, libc::F_DUPFD_CLOEXEC, min_fd) };
        if moved < 0 {
            return Err(Errno::last() as i32);
        }
        unsafe {
            libc::close(self.fd);
        }
        self.fd = moved;
        Ok(())
    }

    /// Write one message in a single call
    pub fn report(&self, error: &ChildError<'_>) {
        let mut buf = MessageBuf::default();
        error.encode(&mut buf);
        let wire = buf.as_wire();
        unsafe {
            libc::write(self.fd, wire.as_ptr() as *const libc::c_void, wire.len());
        }
    }
}

/// Parent-side handle on the read end; closing happens on drop
pub struct ChannelReader {
    fd: OwnedFd,
}

impl ChannelReader {
    /// Bounded single read, then close
    pub fn drain(self) -> Option<String> {
        let mut buf = [0u8; BUF_LEN];
        let len = match read(self.fd.as_raw_fd(), &mut buf) {
            Ok(0) | Err(_) => return None,
            Ok(n) => n,
        };

        let data = &buf[..len];
        let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
        if end == 0 {
            return None;
        }
        Some(String::from_utf8_lossy(&data[..end]).into_owned())
    }

    /// Close without reading
    pub fn close(self) {}
}

#[cfg(any(
    target_os = "linux",
    target_os = "android",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly"
))]
fn cloexec_pipe() -> nix::Result<(OwnedFd, OwnedFd)> {
    nix::unistd::pipe2(OFlag::O_CLOEXEC)
}

#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly"
)))]
fn cloexec_pipe() -> nix::Result<(OwnedFd, OwnedFd)> {
    let (read, write) = nix::unistd::pipe()?;
    for fd in [read.as_raw_fd(), write.as_raw_fd()] {
        fcntl(fd, FcntlArg::F_SETFD(nix::fcntl::FdFlag::FD_CLOEXEC))?;
    }
    Ok((read, write))
}

fn set_nonblocking(fd: RawFd) -> nix::Result<()> {
    let flags = OFlag::from_bits_truncate(fcntl(fd, FcntlArg::F_GETFL)?);
    fcntl(fd, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))?;
    Ok(())
}
