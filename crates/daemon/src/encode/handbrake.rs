//! HandBrakeCLI encoder.
//!
//! Builds the command line from the per-disc-kind profile, runs the encoder
//! with its output on a pseudo-terminal and parses progress from the
//! redrawn status line. The encoder runs in its own process group so that
//! pause, resume and cancel reach every process it starts.

use super::encoder::{EncodeError, EncodeUpdate, Encoder};
use super::pty::{is_pty_eof, open_pty, LineAssembler};
use super::queue::QueueItem;
use crate::disc::DiscKind;
use async_trait::async_trait;
use parking_lot::Mutex;
use regex::Regex;
use ripline_config::{HandBrakeConfig, HandBrakeProfile};
use std::fs::File;
use std::io::{self, Read};
use std::os::unix::process::ExitStatusExt;
use std::process::Stdio;
use std::sync::LazyLock;
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

static PROGRESS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:Encoding:|Progress:).*?(\d+\.\d+)\s*%").unwrap());

/// Percentage carried by an encoder status line, if any.
pub fn parse_encode_progress(line: &str) -> Option<f64> {
    PROGRESS_RE
        .captures(line)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Status lines are progress redraws and are not worth logging.
fn is_status_line(line: &str) -> bool {
    line.starts_with("Encoding:") || line.starts_with("Progress:")
}

/// Build a HandBrakeCLI command for one queue item.
///
/// Creates a Command configured with:
/// - Input and output paths
/// - Preset file (resolved against `presets_dir`) and optional preset name
/// - Audio language list, restricted to the first matching track
/// - Subtitle language list
/// - Encoder thread count when non-zero
pub fn build_handbrake_command(config: &HandBrakeConfig, item: &QueueItem) -> Command {
    let profile: &HandBrakeProfile = match item.disc_kind {
        DiscKind::BluRay => &config.bluray,
        DiscKind::Dvd => &config.dvd,
    };

    let mut cmd = Command::new(&config.binary_path);
    cmd.arg("-i").arg(&item.source_path);
    cmd.arg("-o").arg(&item.dest_path);

    if let Some(preset_file) = profile.preset_file.as_deref().filter(|f| !f.is_empty()) {
        let preset_path = match &config.presets_dir {
            Some(dir) => dir.join(preset_file),
            None => preset_file.into(),
        };
        cmd.arg("--preset-import-file").arg(preset_path);

        if let Some(name) = profile.preset_name.as_deref().filter(|n| !n.is_empty()) {
            cmd.arg("--preset").arg(name);
        }
    }

    if !profile.audio_languages.is_empty() {
        cmd.arg("--audio-lang-list")
            .arg(profile.audio_languages.join(","));
        cmd.arg("--first-audio");
    }

    if !profile.subtitle_languages.is_empty() {
        cmd.arg("--subtitle-lang-list")
            .arg(profile.subtitle_languages.join(","));
    }

    if config.threads > 0 {
        cmd.arg("--encopts").arg(format!("threads={}", config.threads));
    }

    cmd
}

#[derive(Debug, Clone, Copy)]
struct ActiveProcess {
    pid: u32,
    paused: bool,
}

/// Supervises HandBrakeCLI processes, one at a time.
#[derive(Debug)]
pub struct HandBrakeSupervisor {
    config: HandBrakeConfig,
    active: Mutex<Option<ActiveProcess>>,
}

impl HandBrakeSupervisor {
    pub fn new(config: HandBrakeConfig) -> Self {
        Self {
            config,
            active: Mutex::new(None),
        }
    }

    /// Process id of the running encoder, if any.
    pub fn active_pid(&self) -> Option<u32> {
        self.active.lock().map(|a| a.pid)
    }

    pub fn is_paused(&self) -> bool {
        self.active.lock().map(|a| a.paused).unwrap_or(false)
    }

    fn clear_active(&self, pid: u32) {
        let mut active = self.active.lock();
        if active.map(|a| a.pid) == Some(pid) {
            *active = None;
        }
    }
}

/// Send `signal` to the process group led by `pid`. A group that is
/// already gone is not an error.
fn signal_group(pid: u32, signal: libc::c_int) -> io::Result<()> {
    // SAFETY: kill has no memory-safety preconditions.
    let rc = unsafe { libc::kill(-(pid as libc::pid_t), signal) };
    if rc == 0 {
        return Ok(());
    }
    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        Ok(())
    } else {
        Err(err)
    }
}

/// Read the PTY master until every slave is closed, forwarding lines.
fn pump_pty(master: File, lines: mpsc::Sender<String>) {
    let mut master = master;
    let mut assembler = LineAssembler::new();
    let mut buf = [0u8; 4096];

    loop {
        match master.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                for line in assembler.feed(&buf[..n]) {
                    if lines.blocking_send(line).is_err() {
                        return;
                    }
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if is_pty_eof(&e) => break,
            Err(e) => {
                let _ = lines.blocking_send(format!("[pty error] {}", e));
                break;
            }
        }
    }

    if let Some(rest) = assembler.finish() {
        let _ = lines.blocking_send(rest);
    }
}

#[async_trait]
impl Encoder for HandBrakeSupervisor {
    async fn encode(&self, item: &QueueItem, updates: mpsc::Sender<EncodeUpdate>) -> Result<(), EncodeError> {
        if let Some(parent) = item.dest_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let (master, slave) = open_pty().map_err(EncodeError::Pty)?;
        let slave_err = slave.try_clone().map_err(EncodeError::Pty)?;

        let mut cmd = build_handbrake_command(&self.config, item);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::from(slave))
            .stderr(Stdio::from(slave_err))
            .process_group(0)
            .kill_on_drop(true);

        let spawned = cmd.spawn();
        // The command holds our copies of the slave; the master only sees
        // end-of-file once they are closed.
        drop(cmd);
        let mut child = spawned?;
        let pid = child.id().ok_or_else(|| {
            EncodeError::Io(io::Error::new(io::ErrorKind::Other, "encoder exited before it was tracked"))
        })?;
        *self.active.lock() = Some(ActiveProcess { pid, paused: false });
        info!(id = %item.id, pid, source = %item.source_path.display(), "Started HandBrakeCLI");

        let (line_tx, mut line_rx) = mpsc::channel::<String>(256);
        let reader = tokio::task::spawn_blocking(move || pump_pty(File::from(master), line_tx));

        while let Some(line) = line_rx.recv().await {
            if let Some(pct) = parse_encode_progress(&line) {
                let _ = updates.send(EncodeUpdate::Progress(pct)).await;
            }
            if !is_status_line(&line) {
                let _ = updates.try_send(EncodeUpdate::Log(line));
            }
        }

        let status = child.wait().await;
        let _ = reader.await;
        self.clear_active(pid);
        let status = status?;

        if status.success() {
            let _ = updates.send(EncodeUpdate::Progress(100.0)).await;
            info!(id = %item.id, "HandBrakeCLI finished");
            return Ok(());
        }

        match (status.code(), status.signal()) {
            (Some(code), _) => {
                warn!(id = %item.id, code, "HandBrakeCLI failed");
                Err(EncodeError::Failed(code))
            }
            (None, Some(signal)) => {
                info!(id = %item.id, signal, "HandBrakeCLI terminated");
                Err(EncodeError::Terminated(signal))
            }
            (None, None) => Err(EncodeError::Terminated(0)),
        }
    }

    fn pause(&self) -> io::Result<()> {
        let mut active = self.active.lock();
        match active.as_mut() {
            Some(process) if !process.paused => {
                signal_group(process.pid, libc::SIGSTOP)?;
                process.paused = true;
                debug!(pid = process.pid, "Encoder suspended");
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn resume(&self) -> io::Result<()> {
        let mut active = self.active.lock();
        match active.as_mut() {
            Some(process) if process.paused => {
                signal_group(process.pid, libc::SIGCONT)?;
                process.paused = false;
                debug!(pid = process.pid, "Encoder resumed");
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn cancel(&self) -> io::Result<()> {
        let active = self.active.lock();
        match active.as_ref() {
            Some(process) => {
                info!(pid = process.pid, "Killing encoder");
                signal_group(process.pid, libc::SIGKILL)
            }
            None => Ok(()),
        }
    }
}
