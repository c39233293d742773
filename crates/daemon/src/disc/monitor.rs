//! Drive monitor that turns drive status polling into disc insertion events.
//!
//! The drive is polled on a fixed interval. A transition from any non-ready
//! status to ready is only trusted after a settle delay and a second query,
//! which filters out the transient states drives report while spinning up.

use super::DetectedDisc;
use std::fs::OpenOptions;
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// `CDROM_DRIVE_STATUS` ioctl request from linux/cdrom.h
const CDROM_DRIVE_STATUS: libc::c_ulong = 0x5326;

/// Status reported by the drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveStatus {
    NoInfo,
    NoDisc,
    TrayOpen,
    NotReady,
    DiscOk,
}

impl DriveStatus {
    /// Map a raw `CDS_*` value to a status.
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            1 => DriveStatus::NoDisc,
            2 => DriveStatus::TrayOpen,
            3 => DriveStatus::NotReady,
            4 => DriveStatus::DiscOk,
            _ => DriveStatus::NoInfo,
        }
    }

    pub fn is_ready(self) -> bool {
        self == DriveStatus::DiscOk
    }
}

/// Source of drive status readings.
pub trait DriveProbe: Send + Sync + 'static {
    fn status(&self) -> io::Result<DriveStatus>;
}

/// Reads drive status through the Linux cdrom ioctl.
#[derive(Debug, Clone)]
pub struct IoctlProbe {
    device: PathBuf,
}

impl IoctlProbe {
    pub fn new(device: impl Into<PathBuf>) -> Self {
        Self {
            device: device.into(),
        }
    }

    pub fn device(&self) -> &Path {
        &self.device
    }
}

impl DriveProbe for IoctlProbe {
    fn status(&self) -> io::Result<DriveStatus> {
        let file = OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(&self.device)?;

        // SAFETY: the fd is valid for the lifetime of `file` and the request takes no pointer.
        let raw = unsafe { libc::ioctl(file.as_raw_fd(), CDROM_DRIVE_STATUS as _, 0) };
        if raw < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(DriveStatus::from_raw(raw))
    }
}

/// True when a poll moved the drive from any non-ready status to ready.
pub fn is_insertion(previous: DriveStatus, current: DriveStatus) -> bool {
    !previous.is_ready() && current.is_ready()
}

/// Polls a drive and emits one event per physical insertion.
pub struct DiscMonitor<P: DriveProbe> {
    probe: Arc<P>,
    device: PathBuf,
    poll_interval: Duration,
    settle_delay: Duration,
}

impl<P: DriveProbe> DiscMonitor<P> {
    pub fn new(
        probe: P,
        device: impl Into<PathBuf>,
        poll_interval: Duration,
        settle_delay: Duration,
    ) -> Self {
        Self {
            probe: Arc::new(probe),
            device: device.into(),
            poll_interval,
            settle_delay,
        }
    }

    /// Start polling in a background task.
    ///
    /// The returned channel holds at most one pending event; the monitor waits
    /// for the consumer to take it before it looks at the drive again. The
    /// channel closes when `cancel` fires.
    pub fn start(self, cancel: CancellationToken) -> mpsc::Receiver<DetectedDisc> {
        let (tx, rx) = mpsc::channel(1);
        tokio::spawn(self.run(tx, cancel));
        rx
    }

    /// Query the drive off the async runtime; the ioctl can block while the
    /// drive spins up.
    async fn query(&self) -> io::Result<DriveStatus> {
        let probe = Arc::clone(&self.probe);
        tokio::task::spawn_blocking(move || probe.status())
            .await
            .unwrap_or_else(|e| Err(io::Error::new(io::ErrorKind::Other, e)))
    }

    async fn run(self, tx: mpsc::Sender<DetectedDisc>, cancel: CancellationToken) {
        // A disc already in the drive at startup is not an insertion.
        let mut last = self.query().await.unwrap_or(DriveStatus::NoDisc);
        if last.is_ready() {
            info!(device = %self.device.display(), "Disc already present at startup, waiting for next insertion");
        }

        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {}
            }

            let status = match self.query().await {
                Ok(status) => status,
                Err(e) => {
                    debug!(device = %self.device.display(), error = %e, "Drive status query failed");
                    continue;
                }
            };

            if !is_insertion(last, status) {
                last = status;
                continue;
            }

            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = sleep(self.settle_delay) => {}
            }

            last = self.query().await.unwrap_or(DriveStatus::NoInfo);
            if !last.is_ready() {
                debug!(device = %self.device.display(), status = ?last, "Ready state did not survive settle delay");
                continue;
            }

            info!(device = %self.device.display(), "Disc inserted");
            tokio::select! {
                _ = cancel.cancelled() => return,
                sent = tx.send(DetectedDisc::new(self.device.clone())) => {
                    if sent.is_err() {
                        return;
                    }
                }
            }
        }
    }
}
