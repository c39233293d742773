//! Single-consumer encode loop.
//!
//! Ticks on a fixed interval, claims the next queued item and drives it
//! through the [`Encoder`] before looking at the queue again. Control
//! commands are handled at any time, including mid-encode.

use super::encoder::{EncodeError, EncodeUpdate, Encoder};
use super::queue::{EncodeQueue, ItemStatus, QueueItem};
use crate::events::{EventBus, PipelineEvent};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Reason recorded on an item stopped by the operator.
pub const CANCELLED_BY_USER: &str = "cancelled by user";

/// How often a requested kill is repeated until the encode returns. The
/// encoder may not have a process to signal yet when the first one lands.
const KILL_RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Control commands for the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerControl {
    Pause,
    Resume,
    /// Kill the current encode; the item is marked failed and can be retried.
    Stop,
    /// Kill the current encode and remove the item.
    Delete,
}

/// Drives queued items through an encoder one at a time.
pub struct EncodeWorker {
    queue: Arc<EncodeQueue>,
    encoder: Arc<dyn Encoder>,
    events: EventBus,
    tick_interval: Duration,
    paused: bool,
    delete_current: bool,
    kill_requested: bool,
}

impl EncodeWorker {
    pub fn new(
        queue: Arc<EncodeQueue>,
        encoder: Arc<dyn Encoder>,
        events: EventBus,
        tick_interval: Duration,
    ) -> Self {
        Self {
            queue,
            encoder,
            events,
            tick_interval,
            paused: false,
            delete_current: false,
            kill_requested: false,
        }
    }

    /// Run until `cancel` fires or the control channel closes.
    ///
    /// An encode in flight at shutdown is killed and its item requeued.
    pub async fn run(mut self, mut control: mpsc::Receiver<WorkerControl>, cancel: CancellationToken) {
        let mut ticker = interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("Encode worker started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                ctrl = control.recv() => match ctrl {
                    Some(ctrl) => self.handle_control(ctrl, None),
                    None => break,
                },
                _ = ticker.tick() => {
                    if self.paused {
                        continue;
                    }
                    match self.queue.claim_next() {
                        Ok(Some(item)) => self.encode_item(item, &mut control, &cancel).await,
                        Ok(None) => {}
                        Err(e) => error!(error = %e, "Failed to claim next queue item"),
                    }
                }
            }
        }

        info!("Encode worker stopped");
    }

    fn handle_control(&mut self, ctrl: WorkerControl, current: Option<&QueueItem>) {
        debug!(?ctrl, "Worker control");
        let result: io::Result<()> = match ctrl {
            WorkerControl::Pause => {
                self.paused = true;
                if let Some(item) = current {
                    self.mark(item, ItemStatus::Paused);
                }
                self.encoder.pause()
            }
            WorkerControl::Resume => {
                self.paused = false;
                if let Some(item) = current {
                    self.mark(item, ItemStatus::Encoding);
                }
                self.encoder.resume()
            }
            WorkerControl::Stop => {
                self.delete_current = false;
                self.kill_requested = current.is_some();
                self.encoder.cancel()
            }
            WorkerControl::Delete => {
                self.delete_current = true;
                self.kill_requested = current.is_some();
                self.encoder.cancel()
            }
        };
        if let Err(e) = result {
            warn!(?ctrl, error = %e, "Encoder control failed");
        }
    }

    fn mark(&self, item: &QueueItem, status: ItemStatus) {
        if let Err(e) = self.queue.set_status(&item.id, status) {
            debug!(id = %item.id, %status, error = %e, "Could not update item status");
        }
    }

    fn handle_update(&self, item: &QueueItem, update: EncodeUpdate) {
        match update {
            EncodeUpdate::Progress(percent) => {
                if let Err(e) = self.queue.update_progress(&item.id, percent) {
                    debug!(id = %item.id, error = %e, "Could not record progress");
                }
                self.events.publish(PipelineEvent::EncodeProgress {
                    id: item.id.clone(),
                    name: item.title_name.clone(),
                    percent,
                });
            }
            EncodeUpdate::Log(line) => self.events.log(line),
        }
    }

    async fn encode_item(
        &mut self,
        item: QueueItem,
        control: &mut mpsc::Receiver<WorkerControl>,
        cancel: &CancellationToken,
    ) {
        info!(id = %item.id, title = %item.title_name, kind = %item.disc_kind, "Encoding");
        self.delete_current = false;
        self.kill_requested = false;
        self.events.publish(PipelineEvent::EncodeProgress {
            id: item.id.clone(),
            name: item.title_name.clone(),
            percent: 0.0,
        });

        let (tx, mut rx) = mpsc::channel(64);
        let encoder = Arc::clone(&self.encoder);
        let job = item.clone();
        let mut handle = tokio::spawn(async move { encoder.encode(&job, tx).await });

        let mut updates_open = true;
        let mut control_open = true;
        let mut shutting_down = false;
        let mut kill_retry = interval_at(Instant::now() + KILL_RETRY_INTERVAL, KILL_RETRY_INTERVAL);
        kill_retry.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let joined = loop {
            tokio::select! {
                res = &mut handle => break res,
                update = rx.recv(), if updates_open => match update {
                    Some(update) => self.handle_update(&item, update),
                    None => updates_open = false,
                },
                ctrl = control.recv(), if control_open => match ctrl {
                    Some(ctrl) => self.handle_control(ctrl, Some(&item)),
                    None => control_open = false,
                },
                _ = cancel.cancelled(), if !shutting_down => {
                    shutting_down = true;
                    self.kill_requested = true;
                    if let Err(e) = self.encoder.cancel() {
                        warn!(error = %e, "Failed to stop encoder for shutdown");
                    }
                }
                _ = kill_retry.tick(), if self.kill_requested => {
                    if let Err(e) = self.encoder.cancel() {
                        debug!(error = %e, "Repeated encoder kill failed");
                    }
                }
            }
        };
        while let Ok(update) = rx.try_recv() {
            self.handle_update(&item, update);
        }

        let outcome = joined.unwrap_or_else(|e| {
            Err(EncodeError::Io(io::Error::new(io::ErrorKind::Other, e.to_string())))
        });
        self.finish_item(&item, outcome, shutting_down);
        self.delete_current = false;
        self.kill_requested = false;
    }

    fn finish_item(&self, item: &QueueItem, outcome: Result<(), EncodeError>, shutting_down: bool) {
        let result = match outcome {
            Ok(()) => {
                info!(id = %item.id, title = %item.title_name, "Encode complete");
                let res = self.queue.complete(&item.id);
                self.events.publish(PipelineEvent::EncodeComplete {
                    id: item.id.clone(),
                    name: item.title_name.clone(),
                    kind: item.disc_kind,
                });
                res
            }
            Err(e) if e.is_terminated() && shutting_down => {
                info!(id = %item.id, "Encode interrupted by shutdown, requeueing");
                self.queue.requeue(&item.id)
            }
            Err(e) if e.is_terminated() && self.delete_current => {
                self.events.log(format!("Encoding cancelled and removed: {}", item.title_name));
                self.queue.discard(&item.id)
            }
            Err(e) if e.is_terminated() => {
                self.events.log(format!("Encoding cancelled: {}", item.title_name));
                self.queue.fail(&item.id, CANCELLED_BY_USER)
            }
            Err(e) => {
                warn!(id = %item.id, error = %e, "Encode failed");
                let res = self.queue.fail(&item.id, &e.to_string());
                self.events.error("encode", format!("{}: {}", item.title_name, e));
                res
            }
        };

        if let Err(e) = result {
            error!(id = %item.id, error = %e, "Failed to record encode outcome");
        }
    }
}
