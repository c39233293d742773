//! Pseudo-terminal plumbing for the encoder's output.
//!
//! HandBrakeCLI only writes incremental progress when stdout is a terminal,
//! and it redraws its progress line with bare carriage returns.

use std::io;
use std::os::fd::{FromRawFd, OwnedFd};

/// Open a PTY pair. The master end is close-on-exec.
pub fn open_pty() -> io::Result<(OwnedFd, OwnedFd)> {
    let mut master: libc::c_int = -1;
    let mut slave: libc::c_int = -1;

    // SAFETY: both out-pointers are valid; name, termios and winsize may be null.
    let rc = unsafe {
        libc::openpty(
            &mut master,
            &mut slave,
            std::ptr::null_mut(),
            std::ptr::null(),
            std::ptr::null(),
        )
    };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }

    // SAFETY: openpty succeeded, so both descriptors are open and owned by us.
    let (master, slave) = unsafe { (OwnedFd::from_raw_fd(master), OwnedFd::from_raw_fd(slave)) };

    set_cloexec(&master)?;
    Ok((master, slave))
}

fn set_cloexec(fd: &OwnedFd) -> io::Result<()> {
    use std::os::fd::AsRawFd;

    // SAFETY: fd is a valid open descriptor for the duration of these calls.
    unsafe {
        let flags = libc::fcntl(fd.as_raw_fd(), libc::F_GETFD);
        if flags < 0 {
            return Err(io::Error::last_os_error());
        }
        if libc::fcntl(fd.as_raw_fd(), libc::F_SETFD, flags | libc::FD_CLOEXEC) < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

/// Reassembles terminal output into lines, splitting on `\r` and `\n`.
///
/// Empty lines (such as the gap in `\r\n`) are dropped.
#[derive(Debug, Default)]
pub struct LineAssembler {
    buf: Vec<u8>,
}

impl LineAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push one byte; returns a line when the byte terminates one.
    pub fn push(&mut self, byte: u8) -> Option<String> {
        if byte == b'\n' || byte == b'\r' {
            if self.buf.is_empty() {
                return None;
            }
            let line = String::from_utf8_lossy(&self.buf).into_owned();
            self.buf.clear();
            Some(line)
        } else {
            self.buf.push(byte);
            None
        }
    }

    /// Push a chunk, collecting every completed line.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        bytes.iter().filter_map(|&b| self.push(b)).collect()
    }

    /// Whatever is left once the stream ends.
    pub fn finish(self) -> Option<String> {
        (!self.buf.is_empty()).then(|| String::from_utf8_lossy(&self.buf).into_owned())
    }
}

/// True for the read error a PTY master reports once every slave is closed.
pub fn is_pty_eof(err: &io::Error) -> bool {
    err.raw_os_error() == Some(libc::EIO)
}
