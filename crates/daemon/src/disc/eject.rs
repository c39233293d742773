//! Media eject.

use std::fs::OpenOptions;
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::Path;
use tokio::process::Command;
use tracing::{debug, info};

/// `CDROMEJECT` ioctl request from linux/cdrom.h
const CDROMEJECT: libc::c_ulong = 0x5309;

/// Eject the media in `device`.
///
/// Tries the system `eject` utility first and falls back to the cdrom ioctl
/// when the utility is missing or fails.
pub async fn eject(device: &Path) -> io::Result<()> {
    match Command::new("eject").arg(device).status().await {
        Ok(status) if status.success() => {
            info!(device = %device.display(), "Ejected disc");
            return Ok(());
        }
        Ok(status) => {
            debug!(device = %device.display(), %status, "eject utility failed, falling back to ioctl");
        }
        Err(e) => {
            debug!(device = %device.display(), error = %e, "eject utility unavailable, falling back to ioctl");
        }
    }

    let device = device.to_path_buf();
    tokio::task::spawn_blocking(move || eject_via_ioctl(&device))
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?
}

fn eject_via_ioctl(device: &Path) -> io::Result<()> {
    let file = OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_NONBLOCK)
        .open(device)?;

    // SAFETY: the fd is valid for the lifetime of `file` and the request takes no pointer.
    let rc = unsafe { libc::ioctl(file.as_raw_fd(), CDROMEJECT as _, 0) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    info!(device = %device.display(), "Ejected disc via ioctl");
    Ok(())
}
