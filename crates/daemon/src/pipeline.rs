//! Per-disc processing: scan, pick titles, rip each one and queue its encode.
//!
//! Each inserted disc lands in `<output_dir>/<disc name>/raw`, with encodes
//! destined for the sibling `encoded` folder. Ejecting the disc afterwards is
//! left to the caller so it happens on every outcome.

use crate::disc::{sanitize_filename, DetectedDisc, DiscKind};
use crate::encode::{EncodeQueue, QueueItem};
use crate::events::{EventBus, PipelineEvent};
use crate::makemkv::{find_newest_mkv, select_titles, MakeMkvClient, RipError, RipUpdate, ScanResult, Title};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Capacity of the channels carrying live tool output.
const UPDATE_BUFFER: usize = 64;

/// How a disc's processing ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscOutcome {
    /// Titles were ripped; this many were queued for encoding.
    Queued(usize),
    /// The operator declined to pick any titles.
    Skipped,
    /// Processing was cancelled. Not an error.
    Cancelled,
    /// A failure already reported on the event bus.
    Failed,
}

/// Raw and encoded folders for one disc.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscFolders {
    pub raw: PathBuf,
    pub encoded: PathBuf,
}

impl DiscFolders {
    pub fn new(output_dir: &Path, disc_name: &str) -> Self {
        let root = output_dir.join(sanitize_filename(disc_name));
        Self {
            raw: root.join("raw"),
            encoded: root.join("encoded"),
        }
    }

    pub fn create(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.raw)?;
        std::fs::create_dir_all(&self.encoded)
    }
}

/// Runs one disc at a time through scan, selection and rip.
pub struct DiscProcessor {
    client: MakeMkvClient,
    queue: Arc<EncodeQueue>,
    events: EventBus,
    output_dir: PathBuf,
    movie_threshold: Duration,
    episode_threshold: Duration,
}

impl DiscProcessor {
    pub fn new(
        client: MakeMkvClient,
        queue: Arc<EncodeQueue>,
        events: EventBus,
        output_dir: impl Into<PathBuf>,
        movie_threshold: Duration,
        episode_threshold: Duration,
    ) -> Self {
        Self {
            client,
            queue,
            events,
            output_dir: output_dir.into(),
            movie_threshold,
            episode_threshold,
        }
    }

    /// Process a freshly inserted disc.
    ///
    /// When automatic selection finds nothing, the title list is published
    /// and the next message on `selections` decides what to rip.
    pub async fn process(
        &self,
        mut disc: DetectedDisc,
        selections: &mut mpsc::Receiver<Vec<u32>>,
        cancel: &CancellationToken,
    ) -> DiscOutcome {
        info!(device = %disc.device.display(), "Processing disc");
        self.events.publish(PipelineEvent::DiscInserted {
            device: disc.device.clone(),
        });

        let scan = match self.scan(&disc.device, cancel).await {
            Ok(scan) => scan,
            Err(RipError::Cancelled) => return DiscOutcome::Cancelled,
            Err(e) => {
                warn!(device = %disc.device.display(), error = %e, "Disc scan failed");
                self.events.error("Disc Scan", e.to_string());
                return DiscOutcome::Failed;
            }
        };
        disc.name = Some(scan.disc_name.clone());
        disc.kind = Some(scan.kind);
        debug!(?disc, "Disc identified");

        let auto = select_titles(&scan.titles, self.movie_threshold, self.episode_threshold);
        self.events.publish(PipelineEvent::ScanComplete {
            disc_name: scan.disc_name.clone(),
            kind: scan.kind,
            titles: scan.titles.clone(),
            selected: auto.iter().map(|t| t.id).collect(),
        });

        let selected = if !auto.is_empty() {
            auto
        } else if scan.titles.is_empty() {
            self.events.error("Disc Scan", "no titles found on disc");
            return DiscOutcome::Failed;
        } else {
            match self.await_selection(&scan.disc_name, &scan.titles, selections, cancel).await {
                Some(titles) if titles.is_empty() => {
                    self.events.error("Title Selection", "no titles selected");
                    return DiscOutcome::Skipped;
                }
                Some(titles) => titles,
                None => return DiscOutcome::Cancelled,
            }
        };

        let folders = DiscFolders::new(&self.output_dir, &scan.disc_name);
        if let Err(e) = folders.create() {
            self.events
                .error("Create Folders", format!("{}: {}", folders.raw.display(), e));
            return DiscOutcome::Failed;
        }

        let queued = self
            .rip_titles(&disc.device, &selected, &folders, &scan.disc_name, scan.kind, cancel)
            .await;

        if cancel.is_cancelled() {
            info!(disc_name = %scan.disc_name, queued, "Disc processing cancelled");
            return DiscOutcome::Cancelled;
        }
        if queued == 0 {
            return DiscOutcome::Failed;
        }

        info!(disc_name = %scan.disc_name, queued, "Disc ripped");
        self.events.publish(PipelineEvent::RipComplete {
            disc_name: scan.disc_name,
            titles: queued,
            kind: scan.kind,
        });
        DiscOutcome::Queued(queued)
    }

    async fn scan(&self, device: &Path, cancel: &CancellationToken) -> Result<ScanResult, RipError> {
        let (tx, mut rx) = mpsc::channel(UPDATE_BUFFER);
        let forward = async {
            while let Some(msg) = rx.recv().await {
                self.events.publish(PipelineEvent::ScanStatus(msg));
            }
        };
        let (result, ()) = tokio::join!(self.client.scan(device, Some(tx), cancel), forward);
        result
    }

    /// Publish the title list and wait for the operator's pick.
    ///
    /// Returns `None` if cancelled or if nobody can answer any more.
    async fn await_selection(
        &self,
        disc_name: &str,
        titles: &[Title],
        selections: &mut mpsc::Receiver<Vec<u32>>,
        cancel: &CancellationToken,
    ) -> Option<Vec<Title>> {
        // Answers meant for an earlier disc
        while selections.try_recv().is_ok() {}

        info!(disc_name, titles = titles.len(), "Waiting for manual title selection");
        self.events.publish(PipelineEvent::TitleSelectionRequired {
            disc_name: disc_name.to_string(),
            titles: titles.to_vec(),
        });

        let ids = tokio::select! {
            ids = selections.recv() => ids?,
            _ = cancel.cancelled() => return None,
        };

        let picked: Vec<Title> = ids
            .iter()
            .filter_map(|id| {
                let title = titles.iter().find(|t| t.id == *id);
                if title.is_none() {
                    warn!(title_id = id, "Ignoring unknown title id");
                }
                title.cloned()
            })
            .collect();
        Some(picked)
    }

    /// Rip `titles` in order, queueing an encode for each success.
    async fn rip_titles(
        &self,
        device: &Path,
        titles: &[Title],
        folders: &DiscFolders,
        disc_name: &str,
        kind: DiscKind,
        cancel: &CancellationToken,
    ) -> usize {
        let count = titles.len();
        let mut queued = 0;

        for (i, title) in titles.iter().enumerate() {
            if cancel.is_cancelled() {
                break;
            }
            let index = i + 1;
            self.events
                .log(format!("Preparing to rip title {} of {}", index, count));
            self.publish_rip_progress(title.id, index, count, 0.0);

            match self.rip_one(device, title, index, count, &folders.raw, cancel).await {
                Ok(()) => {}
                Err(RipError::Cancelled) => break,
                Err(e) => {
                    warn!(title_id = title.id, error = %e, "Rip failed");
                    self.events.error("Disc Rip", format!("title {}: {}", title.id, e));
                    continue;
                }
            }

            let source = match find_newest_mkv(&folders.raw) {
                Ok(Some(path)) => path,
                Ok(None) => {
                    self.events.error(
                        "Disc Rip",
                        format!("title {}: {}", title.id, RipError::NoOutput(folders.raw.clone())),
                    );
                    continue;
                }
                Err(e) => {
                    self.events
                        .error("Disc Rip", format!("title {}: {}", title.id, e));
                    continue;
                }
            };

            let Some(file_name) = source.file_name() else {
                continue;
            };
            let dest = folders.encoded.join(file_name);
            let item = QueueItem::new(source.clone(), dest, kind, disc_name, title.name.clone());
            if let Err(e) = self.queue.add(item) {
                self.events
                    .error("Queue", format!("{}: {}", source.display(), e));
                continue;
            }
            self.events
                .log(format!("Queued for encoding: {}", file_name.to_string_lossy()));
            queued += 1;
        }

        queued
    }

    async fn rip_one(
        &self,
        device: &Path,
        title: &Title,
        index: usize,
        count: usize,
        raw_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), RipError> {
        let (tx, mut rx) = mpsc::channel(UPDATE_BUFFER);
        let forward = async {
            while let Some(update) = rx.recv().await {
                match update {
                    RipUpdate::Progress(percent) => self.publish_rip_progress(title.id, index, count, percent),
                    RipUpdate::Status(msg) => self.events.publish(PipelineEvent::ScanStatus(msg)),
                    RipUpdate::Log(line) => self.events.log(line),
                }
            }
        };
        let (result, ()) = tokio::join!(
            self.client.rip_title(device, title.id, raw_dir, tx, cancel),
            forward
        );
        debug!(title_id = title.id, ok = result.is_ok(), "Rip finished");
        result
    }

    fn publish_rip_progress(&self, title_id: u32, index: usize, count: usize, percent: f64) {
        self.events.publish(PipelineEvent::RipProgress {
            title_id,
            index,
            count,
            percent,
        });
    }
}
