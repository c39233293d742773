//! Atomic JSON persistence for the encode queue.

use super::queue::QueueItem;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Reads and writes the queue snapshot file.
///
/// Writes go to `<path>.tmp` first and are renamed into place, so a reader
/// never sees a partially written snapshot.
#[derive(Debug, Clone)]
pub struct StatePersistence {
    path: PathBuf,
}

impl StatePersistence {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".tmp");
        PathBuf::from(name)
    }

    /// Write the full ordered item list.
    pub fn save(&self, items: &[QueueItem]) -> Result<(), io::Error> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let json = serde_json::to_string_pretty(items)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        let tmp = self.tmp_path();
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)
    }

    /// Read the item list. A missing file is an empty queue; an unparseable
    /// one is an `InvalidData` error.
    pub fn load(&self) -> Result<Vec<QueueItem>, io::Error> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        serde_json::from_str(&content).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}
