//! Pipeline events and operator commands.
//!
//! Everything the engine reports goes out as a [`PipelineEvent`] on a
//! broadcast [`EventBus`]; the console, the log consumer and the notifier
//! each hold their own subscription. Operator input comes back as
//! [`Command`]s on a single channel into the daemon.

use crate::disc::DiscKind;
use crate::makemkv::Title;
use std::path::PathBuf;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Default capacity of the broadcast bus.
pub const EVENT_BUS_CAPACITY: usize = 1024;

/// Something the pipeline wants observers to know about.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    DiscInserted {
        device: PathBuf,
    },
    /// Free-text status from the ripping tool.
    ScanStatus(String),
    ScanComplete {
        disc_name: String,
        kind: DiscKind,
        titles: Vec<Title>,
        /// Ids picked by the selector; empty means manual selection follows.
        selected: Vec<u32>,
    },
    /// Automatic selection found nothing; a `SelectTitles` command is awaited.
    TitleSelectionRequired {
        disc_name: String,
        titles: Vec<Title>,
    },
    RipProgress {
        title_id: u32,
        /// 1-based position within this disc's selection.
        index: usize,
        count: usize,
        percent: f64,
    },
    RipComplete {
        disc_name: String,
        titles: usize,
        kind: DiscKind,
    },
    EncodeProgress {
        id: String,
        name: String,
        percent: f64,
    },
    EncodeComplete {
        id: String,
        name: String,
        kind: DiscKind,
    },
    Error {
        operation: String,
        message: String,
    },
    /// A line of external tool output or engine narration.
    LogLine(String),
}

/// Operator commands accepted by the daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Answer to `TitleSelectionRequired`. An empty list skips the disc.
    SelectTitles(Vec<u32>),
    Pause,
    Resume,
    /// Stop the current encode and mark it failed.
    Stop,
    /// Stop the current encode and drop it from the queue.
    Delete,
    ClearCompleted,
    RetryFailed,
    ScanForMissing,
    /// Abort the disc being processed and eject it.
    CancelAndEject,
}

/// Broadcast fan-out for [`PipelineEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PipelineEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EVENT_BUS_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }

    /// Publish an event. Having no subscribers is fine.
    pub fn publish(&self, event: PipelineEvent) {
        if self.tx.send(event).is_err() {
            debug!("Event dropped, no subscribers");
        }
    }

    pub fn log(&self, line: impl Into<String>) {
        self.publish(PipelineEvent::LogLine(line.into()));
    }

    pub fn error(&self, operation: impl Into<String>, message: impl Into<String>) {
        self.publish(PipelineEvent::Error {
            operation: operation.into(),
            message: message.into(),
        });
    }
}

/// Re-emit `LogLine` events through tracing so tool output lands in the log
/// file. Runs until the bus closes.
pub async fn run_log_consumer(mut rx: broadcast::Receiver<PipelineEvent>) {
    loop {
        match rx.recv().await {
            Ok(PipelineEvent::LogLine(line)) => info!(target: "ripline::tool", "{}", line),
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(n)) => {
                info!(target: "ripline::tool", "[{} log lines skipped]", n);
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_every_subscriber_sees_every_event() {
        let bus = EventBus::new(16);
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        bus.log("hello");
        bus.error("rip", "drive went away");

        for rx in [&mut a, &mut b] {
            assert_eq!(rx.recv().await.unwrap(), PipelineEvent::LogLine("hello".to_string()));
            assert_eq!(
                rx.recv().await.unwrap(),
                PipelineEvent::Error {
                    operation: "rip".to_string(),
                    message: "drive went away".to_string()
                }
            );
        }
    }

    #[test]
    fn test_publish_without_subscribers_is_ok() {
        let bus = EventBus::default();
        bus.publish(PipelineEvent::ScanStatus("idle".to_string()));
    }

    #[tokio::test]
    async fn test_log_consumer_stops_when_bus_closes() {
        let bus = EventBus::new(4);
        let rx = bus.subscribe();
        let consumer = tokio::spawn(run_log_consumer(rx));

        bus.log("line");
        drop(bus);

        tokio::time::timeout(std::time::Duration::from_secs(1), consumer)
            .await
            .expect("consumer should exit once the bus is gone")
            .unwrap();
    }
}
