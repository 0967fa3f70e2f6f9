//! Detaching the server from its controlling terminal
//!
//! Must run before the async runtime is built: `fork` only carries the
//! calling thread into the child.

use crate::{PacketLogError, Result};
#[cfg(unix)]
use std::ffi::CString;

/// Which side of the fork the caller is on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForkOutcome {
    /// The calling process; it should exit successfully
    Parent,
    /// The detached child; it should keep running the server
    Child,
}

/// Fork, start a new session in the child, move it to `/` and point its
/// standard streams at `/dev/null`.
#[cfg(unix)]
pub fn daemonize() -> Result<ForkOutcome> {
    // SAFETY: called before any other thread exists
    match unsafe { libc::fork() } {
        -1 => return Err(last_error("Failed to fork for daemon")),
        0 => {}
        _ => return Ok(ForkOutcome::Parent),
    }

    // SAFETY: plain syscalls on the child's own process state
    unsafe {
        if libc::setsid() < 0 {
            return Err(last_error("Failed to setsid"));
        }

        let root = CString::new("/").map_err(|e| PacketLogError::Server(e.to_string()))?;
        if libc::chdir(root.as_ptr()) < 0 {
            return Err(last_error("Failed to change directory"));
        }

        let dev_null = CString::new("/dev/null").map_err(|e| PacketLogError::Server(e.to_string()))?;
        let fd = libc::open(dev_null.as_ptr(), libc::O_RDWR);
        if fd < 0 {
            return Err(last_error("Failed to open /dev/null"));
        }
        for target in [libc::STDIN_FILENO, libc::STDOUT_FILENO, libc::STDERR_FILENO] {
            if libc::dup2(fd, target) < 0 {
                return Err(last_error("Failed to redirect standard streams"));
            }
        }
        if fd > libc::STDERR_FILENO {
            libc::close(fd);
        }
    }

    Ok(ForkOutcome::Child)
}

/// Daemon mode is only available on unix
#[cfg(not(unix))]
pub fn daemonize() -> Result<ForkOutcome> {
    Err(PacketLogError::Config(
        "Daemon mode is not supported on this platform".to_string(),
    ))
}

#[cfg(unix)]
fn last_error(context: &str) -> PacketLogError {
    PacketLogError::Server(format!("{}: {}", context, std::io::Error::last_os_error()))
}
