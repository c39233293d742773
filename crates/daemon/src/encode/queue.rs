//! Durable encode queue.
//!
//! An ordered list of [`QueueItem`]s behind a single reader/writer lock.
//! Every mutation rewrites the full snapshot while the write lock is held,
//! so snapshots on disk are never interleaved.

use super::state::StatePersistence;
use crate::disc::DiscKind;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

/// Error type for queue operations
#[derive(Debug, Error)]
pub enum QueueError {
    /// Reading or writing the snapshot failed
    #[error("queue state I/O error: {0}")]
    Io(#[from] io::Error),

    /// No item with this id
    #[error("queue item not found: {0}")]
    NotFound(String),

    /// Another item already holds the encoding slot
    #[error("item {0} is already encoding")]
    EncoderBusy(String),

    /// The item is being encoded and must be stopped first
    #[error("item {0} is being encoded")]
    ItemActive(String),
}

/// Status of a queue item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    /// Waiting for the worker.
    Queued,
    /// Held by the worker.
    Encoding,
    /// Held by the worker with the encoder suspended.
    Paused,
    /// Encoded successfully.
    Complete,
    /// Encode failed or was stopped.
    Failed,
}

impl Default for ItemStatus {
    fn default() -> Self {
        Self::Queued
    }
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ItemStatus::Queued => write!(f, "queued"),
            ItemStatus::Encoding => write!(f, "encoding"),
            ItemStatus::Paused => write!(f, "paused"),
            ItemStatus::Complete => write!(f, "complete"),
            ItemStatus::Failed => write!(f, "failed"),
        }
    }
}

impl ItemStatus {
    /// True while the worker holds the item.
    pub fn is_active(self) -> bool {
        matches!(self, ItemStatus::Encoding | ItemStatus::Paused)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ItemStatus::Complete | ItemStatus::Failed)
    }
}

/// One unit of encode work.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueItem {
    /// Unique item identifier (UUID).
    pub id: String,
    /// Ripped file to encode.
    pub source_path: PathBuf,
    /// Where the encoded file goes.
    pub dest_path: PathBuf,
    /// Media the source came from; picks the encoder profile.
    pub disc_kind: DiscKind,
    pub disc_name: String,
    pub title_name: String,
    pub status: ItemStatus,
    /// Percent complete, 0-100.
    pub progress: f64,
    /// Unix timestamp (milliseconds).
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QueueItem {
    /// Create a fresh queued item with a new id.
    pub fn new(
        source_path: PathBuf,
        dest_path: PathBuf,
        disc_kind: DiscKind,
        disc_name: impl Into<String>,
        title_name: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            source_path,
            dest_path,
            disc_kind,
            disc_name: disc_name.into(),
            title_name: title_name.into(),
            status: ItemStatus::Queued,
            progress: 0.0,
            created_at: current_timestamp_ms(),
            started_at: None,
            completed_at: None,
            error: None,
        }
    }

    fn reset(&mut self) {
        self.status = ItemStatus::Queued;
        self.progress = 0.0;
        self.error = None;
        self.started_at = None;
        self.completed_at = None;
    }
}

/// Get current timestamp in milliseconds since Unix epoch.
pub(crate) fn current_timestamp_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Thread-safe, durable encode queue.
#[derive(Debug)]
pub struct EncodeQueue {
    items: RwLock<Vec<QueueItem>>,
    persistence: StatePersistence,
}

impl EncodeQueue {
    /// Create an empty queue backed by `state_path`. Nothing is read yet.
    pub fn new(state_path: impl Into<PathBuf>) -> Self {
        Self {
            items: RwLock::new(Vec::new()),
            persistence: StatePersistence::new(state_path),
        }
    }

    /// Create a queue and load its persisted state.
    pub fn open(state_path: impl Into<PathBuf>) -> Result<Self, QueueError> {
        let queue = Self::new(state_path);
        queue.load_state()?;
        Ok(queue)
    }

    pub fn state_path(&self) -> &Path {
        self.persistence.path()
    }

    /// Load the snapshot from disk, replacing the in-memory list.
    ///
    /// Items left active by an interrupted session are reset to queued and
    /// the cleaned snapshot is written back. Returns how many were reset.
    pub fn load_state(&self) -> Result<usize, QueueError> {
        let mut items = self.items.write();
        let mut loaded = self.persistence.load()?;

        let mut recovered = 0;
        for item in loaded.iter_mut().filter(|i| i.status.is_active()) {
            item.status = ItemStatus::Queued;
            item.progress = 0.0;
            item.started_at = None;
            recovered += 1;
        }
        if recovered > 0 {
            info!(recovered, "Requeued items interrupted mid-encode");
        }

        self.persistence.save(&loaded)?;
        *items = loaded;
        Ok(recovered)
    }

    /// Write the current snapshot.
    pub fn save_state(&self) -> Result<(), QueueError> {
        // Write lock: saves share one temp path.
        let items = self.items.write();
        self.persistence.save(&items)?;
        Ok(())
    }

    /// Apply `f` to a copy of the list and keep the copy only once it is on
    /// disk, so a failed save leaves memory matching the file.
    fn mutate<T>(&self, f: impl FnOnce(&mut Vec<QueueItem>) -> Result<T, QueueError>) -> Result<T, QueueError> {
        let mut items = self.items.write();
        let mut next = items.clone();
        let out = f(&mut next)?;
        self.persistence.save(&next)?;
        *items = next;
        Ok(out)
    }

    fn with_item<T>(&self, id: &str, f: impl FnOnce(&mut QueueItem) -> T) -> Result<T, QueueError> {
        self.mutate(|items| {
            let item = items
                .iter_mut()
                .find(|i| i.id == id)
                .ok_or_else(|| QueueError::NotFound(id.to_string()))?;
            Ok(f(item))
        })
    }

    /// Append an item. No duplicate check.
    pub fn add(&self, item: QueueItem) -> Result<(), QueueError> {
        debug!(id = %item.id, source = %item.source_path.display(), "Queueing item");
        self.mutate(|items| {
            items.push(item);
            Ok(())
        })
    }

    /// True if any item, in any status, has this source path.
    pub fn has_source_path(&self, path: &Path) -> bool {
        self.items.read().iter().any(|i| i.source_path == path)
    }

    /// First queued item in insertion order.
    pub fn get_next(&self) -> Option<QueueItem> {
        self.items
            .read()
            .iter()
            .find(|i| i.status == ItemStatus::Queued)
            .cloned()
    }

    /// Atomically take the next queued item and mark it encoding.
    ///
    /// Returns `None` when nothing is queued or another item is already
    /// active.
    pub fn claim_next(&self) -> Result<Option<QueueItem>, QueueError> {
        let mut items = self.items.write();
        if items.iter().any(|i| i.status.is_active()) {
            return Ok(None);
        }
        let Some(item) = items.iter_mut().find(|i| i.status == ItemStatus::Queued) else {
            return Ok(None);
        };
        item.status = ItemStatus::Encoding;
        item.started_at = Some(current_timestamp_ms());
        let claimed = item.clone();
        self.persistence.save(&items)?;
        Ok(Some(claimed))
    }

    /// Record progress, clamped to 0-100.
    pub fn update_progress(&self, id: &str, progress: f64) -> Result<(), QueueError> {
        let progress = if progress.is_nan() { 0.0 } else { progress.clamp(0.0, 100.0) };
        self.with_item(id, |item| item.progress = progress)
    }

    /// Set an item's status, stamping start time on entry to encoding and
    /// completion time on entry to complete or failed.
    ///
    /// Refuses to start encoding an item while a different item is active.
    pub fn set_status(&self, id: &str, status: ItemStatus) -> Result<(), QueueError> {
        self.mutate(|items| {
            if status == ItemStatus::Encoding {
                if let Some(other) = items.iter().find(|i| i.id != id && i.status.is_active()) {
                    return Err(QueueError::EncoderBusy(other.id.clone()));
                }
            }
            let item = items
                .iter_mut()
                .find(|i| i.id == id)
                .ok_or_else(|| QueueError::NotFound(id.to_string()))?;

            let now = current_timestamp_ms();
            match status {
                ItemStatus::Encoding if item.status != ItemStatus::Paused => item.started_at = Some(now),
                ItemStatus::Complete | ItemStatus::Failed => item.completed_at = Some(now),
                _ => {}
            }
            item.status = status;
            Ok(())
        })
    }

    pub fn complete(&self, id: &str) -> Result<(), QueueError> {
        self.with_item(id, |item| {
            item.status = ItemStatus::Complete;
            item.progress = 100.0;
            item.completed_at = Some(current_timestamp_ms());
        })
    }

    /// Mark an item failed with a reason.
    pub fn fail(&self, id: &str, reason: &str) -> Result<(), QueueError> {
        self.with_item(id, |item| {
            item.status = ItemStatus::Failed;
            item.error = Some(reason.to_string());
            item.completed_at = Some(current_timestamp_ms());
        })
    }

    /// Put an interrupted item back in line.
    pub fn requeue(&self, id: &str) -> Result<(), QueueError> {
        self.with_item(id, QueueItem::reset)
    }

    /// Drop every complete and failed item. Returns how many were removed.
    pub fn clear_completed(&self) -> Result<usize, QueueError> {
        self.mutate(|items| {
            let before = items.len();
            items.retain(|i| !i.status.is_terminal());
            Ok(before - items.len())
        })
    }

    /// Reset every failed or encoding item to queued. Returns how many were reset.
    pub fn retry_failed(&self) -> Result<usize, QueueError> {
        self.mutate(|items| {
            let mut count = 0;
            for item in items
                .iter_mut()
                .filter(|i| matches!(i.status, ItemStatus::Failed | ItemStatus::Encoding))
            {
                item.reset();
                count += 1;
            }
            Ok(count)
        })
    }

    /// Remove an item that the worker does not hold.
    pub fn remove(&self, id: &str) -> Result<(), QueueError> {
        self.mutate(|items| {
            let pos = items
                .iter()
                .position(|i| i.id == id)
                .ok_or_else(|| QueueError::NotFound(id.to_string()))?;
            if items[pos].status.is_active() {
                return Err(QueueError::ItemActive(id.to_string()));
            }
            items.remove(pos);
            Ok(())
        })
    }

    /// Remove an item regardless of status. Used by the worker once the
    /// encoder for a deleted item is gone.
    pub(crate) fn discard(&self, id: &str) -> Result<(), QueueError> {
        self.mutate(|items| {
            items.retain(|i| i.id != id);
            Ok(())
        })
    }

    pub fn get(&self, id: &str) -> Option<QueueItem> {
        self.items.read().iter().find(|i| i.id == id).cloned()
    }

    /// Snapshot of all items in order.
    pub fn items(&self) -> Vec<QueueItem> {
        self.items.read().clone()
    }

    /// The item the worker currently holds, if any.
    pub fn current(&self) -> Option<QueueItem> {
        self.items
            .read()
            .iter()
            .find(|i| i.status.is_active())
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }
}
