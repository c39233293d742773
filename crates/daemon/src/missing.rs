//! Re-queue raw rips whose encode never happened.
//!
//! Walks `<output_dir>/<disc>/raw/*.mkv` and queues every file that has no
//! counterpart in the disc's `encoded` folder and is not already queued.

use crate::disc::DiscKind;
use crate::encode::{EncodeQueue, QueueError, QueueItem};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// A raw rip with no encoded output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingEncode {
    pub source: PathBuf,
    pub dest: PathBuf,
    pub disc_name: String,
    pub size_bytes: u64,
}

/// List raw rips under `output_dir` lacking an encoded counterpart.
///
/// Unreadable entries are skipped.
pub fn find_missing_encodes(output_dir: &Path) -> Vec<MissingEncode> {
    let mut missing = Vec::new();

    let discs = WalkDir::new(output_dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir());

    for disc in discs {
        let raw = disc.path().join("raw");
        if !raw.is_dir() {
            continue;
        }
        let encoded = disc.path().join("encoded");
        let disc_name = disc.file_name().to_string_lossy().into_owned();

        let files = WalkDir::new(&raw)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file() && is_mkv(e.path()));

        for file in files {
            let dest = encoded.join(file.file_name());
            if dest.exists() {
                continue;
            }
            let size_bytes = match file.metadata() {
                Ok(m) => m.len(),
                Err(e) => {
                    warn!(path = %file.path().display(), error = %e, "Skipping unreadable raw file");
                    continue;
                }
            };
            missing.push(MissingEncode {
                source: file.path().to_path_buf(),
                dest,
                disc_name: disc_name.clone(),
                size_bytes,
            });
        }
    }

    missing
}

fn is_mkv(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("mkv"))
        .unwrap_or(false)
}

/// Queue every missing encode not already in `queue`. Returns how many were added.
pub fn scan_for_missing(output_dir: &Path, queue: &EncodeQueue) -> Result<usize, QueueError> {
    let mut added = 0;

    for m in find_missing_encodes(output_dir) {
        if queue.has_source_path(&m.source) {
            debug!(path = %m.source.display(), "Already queued");
            continue;
        }
        let title_name = m
            .source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let kind = DiscKind::from_file_size(m.size_bytes);
        info!(path = %m.source.display(), %kind, "Queueing missing encode");
        queue.add(QueueItem::new(m.source, m.dest, kind, m.disc_name, title_name))?;
        added += 1;
    }

    Ok(added)
}
