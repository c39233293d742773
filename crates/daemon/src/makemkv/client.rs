//! makemkvcon process supervision.
//!
//! Runs the `info` scan and per-title `mkv` extraction, streaming their
//! robot-mode output through the parser. Both operations honour a
//! cancellation token; cancelling kills the child and yields
//! [`RipError::Cancelled`].

use super::parser::{parse_progress, parse_status_message, InfoParser, ScanResult};
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Error type for ripping operations
#[derive(Debug, Error)]
pub enum RipError {
    /// The ripping tool could not be started
    #[error("failed to start {binary}: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: io::Error,
    },

    /// The information scan exited unsuccessfully
    #[error("disc scan failed ({status}): {stderr}")]
    Scan { status: String, stderr: String },

    /// A title extraction exited unsuccessfully
    #[error("rip of title {title} failed ({status})")]
    Rip { title: u32, status: String },

    /// Extraction finished but left no output file behind
    #[error("no ripped file found in {0}")]
    NoOutput(PathBuf),

    /// The owning scope was cancelled
    #[error("operation cancelled")]
    Cancelled,

    /// IO error while talking to the tool
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl RipError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RipError::Cancelled)
    }
}

/// Live output from a title extraction.
#[derive(Debug, Clone, PartialEq)]
pub enum RipUpdate {
    /// Percentage complete, 0-100
    Progress(f64),
    /// Free-text status from a PRGC/PRGT record
    Status(String),
    /// Raw output line
    Log(String),
}

/// Client for the makemkvcon command line tool.
#[derive(Debug, Clone)]
pub struct MakeMkvClient {
    binary: PathBuf,
}

impl MakeMkvClient {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// `makemkvcon -r --progress=-stdout info dev:<device>`
    pub fn build_scan_command(&self, device: &Path) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("-r")
            .arg("--progress=-stdout")
            .arg("info")
            .arg(drive_arg(device));
        cmd
    }

    /// `makemkvcon -r --progress=-stdout mkv dev:<device> <title> <output_dir>`
    pub fn build_rip_command(&self, device: &Path, title_id: u32, output_dir: &Path) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("-r")
            .arg("--progress=-stdout")
            .arg("mkv")
            .arg(drive_arg(device))
            .arg(title_id.to_string())
            .arg(output_dir);
        cmd
    }

    fn spawn(&self, mut cmd: Command) -> Result<Child, RipError> {
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd.spawn().map_err(|source| RipError::Spawn {
            binary: self.binary.display().to_string(),
            source,
        })
    }

    /// Scan the disc in `device`.
    ///
    /// Status messages seen during the scan are offered to `status` without
    /// blocking; they are dropped if the receiver lags.
    pub async fn scan(
        &self,
        device: &Path,
        status: Option<mpsc::Sender<String>>,
        cancel: &CancellationToken,
    ) -> Result<ScanResult, RipError> {
        info!(device = %device.display(), "Scanning disc");
        let mut child = self.spawn(self.build_scan_command(device))?;

        let outcome = tokio::select! {
            res = collect_scan(&mut child, status) => res,
            _ = cancel.cancelled() => Err(RipError::Cancelled),
        };
        if matches!(outcome, Err(RipError::Cancelled)) {
            let _ = child.kill().await;
            info!(device = %device.display(), "Scan cancelled");
        }

        let result = outcome?;
        info!(
            device = %device.display(),
            disc_name = %result.disc_name,
            kind = %result.kind,
            titles = result.titles.len(),
            "Scan complete"
        );
        Ok(result)
    }

    /// Rip one title into `output_dir`.
    ///
    /// Progress, status and raw output lines go to `updates`. A final 100%
    /// progress value is sent after a clean exit.
    pub async fn rip_title(
        &self,
        device: &Path,
        title_id: u32,
        output_dir: &Path,
        updates: mpsc::Sender<RipUpdate>,
        cancel: &CancellationToken,
    ) -> Result<(), RipError> {
        info!(device = %device.display(), title_id, output_dir = %output_dir.display(), "Ripping title");
        let mut child = self.spawn(self.build_rip_command(device, title_id, output_dir))?;

        let outcome = tokio::select! {
            res = collect_rip(&mut child, updates.clone()) => res,
            _ = cancel.cancelled() => Err(RipError::Cancelled),
        };

        match outcome {
            Ok(status) if status.success() => {
                let _ = updates.send(RipUpdate::Progress(100.0)).await;
                info!(title_id, "Rip complete");
                Ok(())
            }
            Ok(status) => {
                warn!(title_id, %status, "Rip failed");
                Err(RipError::Rip {
                    title: title_id,
                    status: status.to_string(),
                })
            }
            Err(RipError::Cancelled) => {
                let _ = child.kill().await;
                info!(title_id, "Rip cancelled");
                Err(RipError::Cancelled)
            }
            Err(e) => Err(e),
        }
    }
}

/// makemkvcon addresses a drive by its device node as `dev:<path>`.
fn drive_arg(device: &Path) -> String {
    format!("dev:{}", device.display())
}

async fn collect_scan(
    child: &mut Child,
    status: Option<mpsc::Sender<String>>,
) -> Result<ScanResult, RipError> {
    let stdout = take_pipe(child.stdout.take(), "stdout")?;
    let stderr = take_pipe(child.stderr.take(), "stderr")?;

    let read_stdout = async {
        let mut parser = InfoParser::new();
        let mut lines = BufReader::new(stdout).lines();
        while let Some(line) = lines.next_line().await? {
            if let (Some(tx), Some(msg)) = (&status, parse_status_message(&line)) {
                let _ = tx.try_send(msg);
            }
            parser.feed(&line);
        }
        Ok::<_, io::Error>(parser)
    };
    let (parser, stderr_lines) = tokio::join!(read_stdout, collect_lines(stderr));
    let parser = parser?;

    let exit = child.wait().await?;
    if !exit.success() {
        return Err(RipError::Scan {
            status: exit.to_string(),
            stderr: stderr_lines.join("\n"),
        });
    }
    Ok(parser.finish())
}

async fn collect_rip(child: &mut Child, updates: mpsc::Sender<RipUpdate>) -> Result<ExitStatus, RipError> {
    let stdout = take_pipe(child.stdout.take(), "stdout")?;
    let stderr = take_pipe(child.stderr.take(), "stderr")?;

    let read_stdout = async {
        let mut lines = BufReader::new(stdout).lines();
        while let Some(line) = lines.next_line().await? {
            if let Some(progress) = parse_progress(&line) {
                let _ = updates.try_send(RipUpdate::Progress(progress.percentage()));
                continue;
            }
            if let Some(msg) = parse_status_message(&line) {
                let _ = updates.try_send(RipUpdate::Status(msg));
            }
            let _ = updates.try_send(RipUpdate::Log(line));
        }
        Ok::<_, io::Error>(())
    };
    let read_stderr = async {
        for line in collect_lines(stderr).await {
            let _ = updates.try_send(RipUpdate::Log(line));
        }
    };
    let (stdout_res, ()) = tokio::join!(read_stdout, read_stderr);
    stdout_res?;

    Ok(child.wait().await?)
}

async fn collect_lines<R: AsyncRead + Unpin>(reader: R) -> Vec<String> {
    let mut out = Vec::new();
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        out.push(line);
    }
    out
}

fn take_pipe<T>(pipe: Option<T>, name: &str) -> Result<T, RipError> {
    pipe.ok_or_else(|| RipError::Io(io::Error::new(io::ErrorKind::BrokenPipe, format!("{} not captured", name))))
}

/// Most recently modified `.mkv` file directly inside `dir`.
///
/// The ripping tool picks its own output names, so this is how the caller
/// learns what a rip produced.
pub fn find_newest_mkv(dir: &Path) -> io::Result<Option<PathBuf>> {
    let mut newest: Option<(std::time::SystemTime, PathBuf)> = None;

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let is_mkv = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("mkv"))
            .unwrap_or(false);
        if !is_mkv {
            continue;
        }
        let metadata = entry.metadata()?;
        if !metadata.is_file() {
            continue;
        }
        let modified = metadata.modified()?;
        if newest.as_ref().map(|(t, _)| modified > *t).unwrap_or(true) {
            newest = Some((modified, path));
        }
    }

    if let Some((_, path)) = &newest {
        debug!(path = %path.display(), "Newest ripped file");
    }
    Ok(newest.map(|(_, path)| path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disc::DiscKind;
    use std::os::unix::fs::PermissionsExt;
    use std::time::Duration;
    use tempfile::TempDir;

    fn get_command_args(cmd: &Command) -> Vec<String> {
        cmd.as_std()
            .get_args()
            .map(|a| a.to_string_lossy().to_string())
            .collect()
    }

    /// Write an executable shell script standing in for makemkvcon.
    fn fake_tool(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("makemkvcon");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    async fn drain(mut rx: mpsc::Receiver<RipUpdate>) -> Vec<RipUpdate> {
        let mut out = Vec::new();
        while let Some(u) = rx.recv().await {
            out.push(u);
        }
        out
    }

    #[test]
    fn test_scan_command_args() {
        let client = MakeMkvClient::new("makemkvcon");
        let cmd = client.build_scan_command(Path::new("/dev/sr0"));
        assert_eq!(cmd.as_std().get_program(), "makemkvcon");
        assert_eq!(
            get_command_args(&cmd),
            vec!["-r", "--progress=-stdout", "info", "dev:/dev/sr0"]
        );
    }

    #[test]
    fn test_rip_command_args() {
        let client = MakeMkvClient::new("/opt/makemkv/bin/makemkvcon");
        let cmd = client.build_rip_command(Path::new("/dev/sr1"), 7, Path::new("/media/Disc/raw"));
        assert_eq!(
            get_command_args(&cmd),
            vec!["-r", "--progress=-stdout", "mkv", "dev:/dev/sr1", "7", "/media/Disc/raw"]
        );
    }

    #[tokio::test]
    async fn test_scan_parses_tool_output() {
        let temp_dir = TempDir::new().unwrap();
        let tool = fake_tool(
            temp_dir.path(),
            r#"echo 'PRGT:5018,0,"Scanning CD-ROM devices"'
echo 'CINFO:1,6209,"Blu-ray disc"'
echo 'CINFO:2,0,"MY_DISC"'
echo 'TINFO:0,2,0,"Feature"'
echo 'TINFO:0,9,0,"1:30:00"'
echo 'TINFO:1,9,0,"0:00:00"'"#,
        );
        let client = MakeMkvClient::new(tool);
        let (tx, mut rx) = mpsc::channel(8);

        let result = client
            .scan(Path::new("/dev/sr0"), Some(tx), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.disc_name, "MY_DISC");
        assert_eq!(result.kind, DiscKind::BluRay);
        assert_eq!(result.titles.len(), 1);
        assert_eq!(rx.recv().await.as_deref(), Some("Scanning CD-ROM devices"));
    }

    #[tokio::test]
    async fn test_scan_nonzero_exit_is_error() {
        let temp_dir = TempDir::new().unwrap();
        let tool = fake_tool(temp_dir.path(), "echo 'no disc' >&2\nexit 3");
        let client = MakeMkvClient::new(tool);

        let err = client
            .scan(Path::new("/dev/sr0"), None, &CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            RipError::Scan { stderr, .. } => assert!(stderr.contains("no disc")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_scan_cancellation_is_distinct() {
        let temp_dir = TempDir::new().unwrap();
        let tool = fake_tool(temp_dir.path(), "sleep 30");
        let client = MakeMkvClient::new(tool);
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let err = tokio::time::timeout(
            Duration::from_secs(5),
            client.scan(Path::new("/dev/sr0"), None, &cancel),
        )
        .await
        .expect("cancellation should stop the scan")
        .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let client = MakeMkvClient::new("/nonexistent/makemkvcon");
        let err = client
            .scan(Path::new("/dev/sr0"), None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RipError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_rip_streams_progress_and_finishes_at_100() {
        let temp_dir = TempDir::new().unwrap();
        let tool = fake_tool(
            temp_dir.path(),
            r#"echo 'PRGC:5017,0,"Saving to MKV file"'
echo 'PRGV:0,0,200'
echo 'PRGV:100,50,200'
echo 'MSG:5036,0,1,"Copy complete"'"#,
        );
        let client = MakeMkvClient::new(tool);
        let (tx, rx) = mpsc::channel(32);

        client
            .rip_title(Path::new("/dev/sr0"), 0, temp_dir.path(), tx, &CancellationToken::new())
            .await
            .unwrap();
        let updates = drain(rx).await;

        assert!(updates.contains(&RipUpdate::Status("Saving to MKV file".to_string())));
        assert!(updates.contains(&RipUpdate::Progress(0.0)));
        assert!(updates.contains(&RipUpdate::Progress(50.0)));
        assert!(updates
            .iter()
            .any(|u| matches!(u, RipUpdate::Log(l) if l.contains("Copy complete"))));
        assert_eq!(updates.last(), Some(&RipUpdate::Progress(100.0)));
    }

    #[tokio::test]
    async fn test_rip_failure_reports_title() {
        let temp_dir = TempDir::new().unwrap();
        let tool = fake_tool(temp_dir.path(), "exit 1");
        let client = MakeMkvClient::new(tool);
        let (tx, rx) = mpsc::channel(8);

        let err = client
            .rip_title(Path::new("/dev/sr0"), 4, temp_dir.path(), tx, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RipError::Rip { title: 4, .. }));
        assert!(!drain(rx).await.contains(&RipUpdate::Progress(100.0)));
    }

    #[tokio::test]
    async fn test_rip_cancellation_kills_tool() {
        let temp_dir = TempDir::new().unwrap();
        let tool = fake_tool(temp_dir.path(), "echo 'PRGV:1,1,100'\nsleep 30");
        let client = MakeMkvClient::new(tool);
        let cancel = CancellationToken::new();
        let (tx, _rx) = mpsc::channel(8);

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let err = tokio::time::timeout(
            Duration::from_secs(5),
            client.rip_title(Path::new("/dev/sr0"), 0, temp_dir.path(), tx, &cancel),
        )
        .await
        .expect("cancellation should stop the rip")
        .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[test]
    fn test_find_newest_mkv() {
        let temp_dir = TempDir::new().unwrap();
        assert_eq!(find_newest_mkv(temp_dir.path()).unwrap(), None);

        let old = temp_dir.path().join("title_t00.mkv");
        let new = temp_dir.path().join("title_t01.MKV");
        std::fs::write(&old, b"a").unwrap();
        std::fs::write(temp_dir.path().join("notes.txt"), b"x").unwrap();
        std::fs::write(&new, b"b").unwrap();

        let past = std::time::SystemTime::now() - Duration::from_secs(3600);
        std::fs::File::options()
            .write(true)
            .open(&old)
            .unwrap()
            .set_modified(past)
            .unwrap();

        assert_eq!(find_newest_mkv(temp_dir.path()).unwrap(), Some(new));
    }

    #[test]
    fn test_find_newest_mkv_missing_dir() {
        let temp_dir = TempDir::new().unwrap();
        assert!(find_newest_mkv(&temp_dir.path().join("missing")).is_err());
    }
}
