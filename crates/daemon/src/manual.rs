//! Queue a single file by hand, outside the disc pipeline.

use crate::daemon::queue_path;
use crate::disc::DiscKind;
use crate::encode::{EncodeQueue, QueueError, QueueItem};
use crate::lock::{InstanceLock, LockError};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

/// Disc name recorded on hand-added items.
pub const MANUAL_DISC_NAME: &str = "Manual";

/// Error type for manual queue additions
#[derive(Debug, Error)]
pub enum AddError {
    #[error("source file does not exist: {0}")]
    SourceMissing(PathBuf),

    #[error("the daemon is running (pid {0}); stop it before adding files")]
    DaemonRunning(u32),

    #[error("lock error: {0}")]
    Lock(LockError),

    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// `<dir>/<stem>_encoded.<ext>` next to `source`.
pub fn default_output_path(source: &Path) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match source.extension() {
        Some(ext) => format!("{}_encoded.{}", stem, ext.to_string_lossy()),
        None => format!("{}_encoded", stem),
    };
    source.with_file_name(name)
}

/// Append `source` to the persisted queue in `state_dir`.
///
/// `kind` of `None` infers the kind from the file size. Refuses to touch the
/// queue while a daemon holds the instance lock, since the daemon would
/// overwrite the change with its own snapshot.
pub fn add_to_queue(
    state_dir: &Path,
    source: &Path,
    kind: Option<DiscKind>,
    output: Option<&Path>,
) -> Result<QueueItem, AddError> {
    let source = match std::fs::canonicalize(source) {
        Ok(path) => path,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(AddError::SourceMissing(source.to_path_buf())),
        Err(e) => return Err(e.into()),
    };
    let metadata = std::fs::metadata(&source)?;
    if !metadata.is_file() {
        return Err(AddError::SourceMissing(source));
    }

    let kind = kind.unwrap_or_else(|| DiscKind::from_file_size(metadata.len()));
    let dest = match output {
        Some(path) => std::path::absolute(path)?,
        None => default_output_path(&source),
    };

    let _lock = InstanceLock::acquire(state_dir).map_err(|e| match e {
        LockError::Held(pid) => AddError::DaemonRunning(pid),
        other => AddError::Lock(other),
    })?;

    let queue = EncodeQueue::open(queue_path(state_dir))?;
    let title_name = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let item = QueueItem::new(source, dest, kind, MANUAL_DISC_NAME, title_name);
    queue.add(item.clone())?;

    info!(id = %item.id, source = %item.source_path.display(), %kind, "Added file to queue");
    Ok(item)
}
