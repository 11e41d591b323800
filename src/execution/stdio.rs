//! Stdio resolver
//!
//! Targets are turned into a [`StdioPlan`] in the parent (paths become C
//! strings, devices are picked, open flags decided). The child then only
//! opens and binds, using raw syscalls.

use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::RawFd;
use std::path::Path;

use crate::config::DevicePaths;
use crate::errors::{Result, SpawnError};
use crate::execution::channel::{ChildError, ChildErrorKind};
use crate::request::StdioTarget;

const CREATE_MODE: libc::c_uint = 0o666;

/// Resolved source for one slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotSource {
    /// Already-open descriptor
    Fd(RawFd),
    /// Path opened in the child with these flags
    Open { path: CString, flags: libc::c_int },
}

/// Slot bindings for one run, slot number = index
#[derive(Debug, Clone, Default)]
pub struct StdioPlan {
    slots: Vec<SlotSource>,
}

impl StdioPlan {
    /// Resolve every target against the configured devices
    pub fn prepare(targets: &[StdioTarget], devices: &DevicePaths) -> Result<Self> {
        let slots = targets
            .iter()
            .enumerate()
            .map(|(slot, target)| resolve(slot, target, devices))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { slots })
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slots(&self) -> &[SlotSource] {
        &self.slots
    }

    /// Child branch: open and bind every slot in order. Call
    /// [`relocate_inherited`](Self::relocate_inherited) first.
    pub fn bind(&self) -> std::result::Result<(), ChildError<'_>> {
        for (slot, source) in self.slots.iter().enumerate() {
            let slot = slot as RawFd;
            match source {
                SlotSource::Fd(fd) => bind_fd(*fd, slot)?,
                SlotSource::Open { path, flags } => {
                    let fd = unsafe { libc::open(path.as_ptr(), *flags, CREATE_MODE) };
                    if fd < 0 {
                        return Err(ChildError::last(
                            ChildErrorKind::Open,
                            path.as_bytes(),
                        ));
                    }
                    bind_fd(fd, slot)?;
                    if fd != slot {
                        unsafe {
                            libc::close(fd);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Child branch: move inherited descriptors numbered inside the slot
    /// range above it, so binding a lower slot cannot overwrite a source a
    /// later slot needs
    pub fn relocate_inherited(&mut self) -> std::result::Result<(), ChildError<'static>> {
        let min_fd = self.slots.len() as RawFd;
        for (slot, source) in self.slots.iter_mut().enumerate() {
            if let SlotSource::Fd(fd) = source {
                if *fd < min_fd && *fd != slot as RawFd {
                    let moved = unsafe { libc::fcntl(*fd, libc::F_DUPFD_CLOEXEC, min_fd) };
                    if moved < 0 {
                        return Err(ChildError::last_for(ChildErrorKind::Dup));
                    }
                    *fd = moved;
                }
            }
        }
        Ok(())
    }
}

fn resolve(slot: usize, target: &StdioTarget, devices: &DevicePaths) -> Result<SlotSource> {
    let access = if slot == 0 {
        libc::O_RDONLY
    } else {
        libc::O_WRONLY
    };

    let source = match target {
        StdioTarget::Inherit(fd) => SlotSource::Fd(*fd),
        StdioTarget::InheritStandard(standard) => match devices.standard(*standard) {
            Some(device) => open_source(device, access)?,
            None => SlotSource::Fd(*standard as RawFd),
        },
        StdioTarget::Ignore => open_source(&devices.null, access)?,
        StdioTarget::OpenPath(path) => {
            let flags = if slot == 0 {
                access
            } else {
                access | libc::O_CREAT | libc::O_TRUNC
            };
            open_source(path, flags)?
        }
    };
    Ok(source)
}

fn open_source(path: &Path, flags: libc::c_int) -> Result<SlotSource> {
    let path = CString::new(path.as_os_str().as_bytes()).map_err(|_| {
        SpawnError::InvalidRequest(format!(
            "stdio path contains nul byte: {}",
            path.display()
        ))
    })?;
    Ok(SlotSource::Open {
        path,
        flags: flags | libc::O_CLOEXEC,
    })
}

/// Make `fd` available as `slot` across exec
fn bind_fd(fd: RawFd, slot: RawFd) -> std::result::Result<(), ChildError<'static>> {
    let ok = if fd == slot {
        unsafe { libc::fcntl(fd, libc::F_SETFD, 0) >= 0 }
    } else {
        unsafe { libc::dup2(fd, slot) >= 0 }
    };
    if ok {
        Ok(())
    } else {
        Err(ChildError::last_for(ChildErrorKind::Dup))
    }
}
