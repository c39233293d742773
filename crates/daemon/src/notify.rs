//! Operator notifications.
//!
//! Three things are worth telling someone who is not watching the console:
//! a disc finished ripping, an encode finished, or something failed. The
//! [`Notifier`] trait is the seam for delivery; [`LogNotifier`] is the
//! built-in sink and writes through tracing.

use crate::disc::DiscKind;
use crate::events::PipelineEvent;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Something worth telling the operator about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    RipComplete {
        disc_name: String,
        titles: usize,
        kind: DiscKind,
    },
    EncodeComplete {
        name: String,
        kind: DiscKind,
    },
    Error {
        operation: String,
        message: String,
    },
}

impl Notification {
    /// Map a bus event to a notification, if it warrants one.
    pub fn from_event(event: &PipelineEvent) -> Option<Self> {
        match event {
            PipelineEvent::RipComplete {
                disc_name,
                titles,
                kind,
            } => Some(Notification::RipComplete {
                disc_name: disc_name.clone(),
                titles: *titles,
                kind: *kind,
            }),
            PipelineEvent::EncodeComplete { name, kind, .. } => Some(Notification::EncodeComplete {
                name: name.clone(),
                kind: *kind,
            }),
            PipelineEvent::Error { operation, message } => Some(Notification::Error {
                operation: operation.clone(),
                message: message.clone(),
            }),
            _ => None,
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Notification::RipComplete { .. } => "Rip Complete",
            Notification::EncodeComplete { .. } => "Encode Complete",
            Notification::Error { .. } => "Error",
        }
    }

    pub fn body(&self) -> String {
        match self {
            Notification::RipComplete {
                disc_name,
                titles,
                kind,
            } => format!(
                "{} ({}): {} title(s) ripped and queued for encoding",
                disc_name, kind, titles
            ),
            Notification::EncodeComplete { name, kind } => format!("{} (profile: {})", name, kind),
            Notification::Error { operation, message } => format!("{} failed: {}", operation, message),
        }
    }
}

/// Delivery seam for notifications.
#[async_trait]
pub trait Notifier: Send + Sync + 'static {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Error returned by a notifier that could not deliver.
#[derive(Debug, thiserror::Error)]
#[error("notification delivery failed: {0}")]
pub struct NotifyError(pub String);

/// Writes notifications to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        match notification {
            Notification::Error { .. } => {
                error!(target: "ripline::notify", "{}: {}", notification.title(), notification.body())
            }
            _ => info!(target: "ripline::notify", "{}: {}", notification.title(), notification.body()),
        }
        Ok(())
    }
}

/// Forward notification-worthy bus events to `notifier` until the bus closes.
///
/// Delivery failures are logged and otherwise ignored.
pub async fn run_notification_listener(mut rx: broadcast::Receiver<PipelineEvent>, notifier: Arc<dyn Notifier>) {
    loop {
        match rx.recv().await {
            Ok(event) => {
                let Some(notification) = Notification::from_event(&event) else {
                    continue;
                };
                if let Err(e) = notifier.notify(&notification).await {
                    warn!(error = %e, "Failed to deliver notification");
                }
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                debug!(skipped = n, "Notification listener lagged");
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use parking_lot::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingNotifier {
        seen: Mutex<Vec<Notification>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
            self.seen.lock().push(notification.clone());
            Ok(())
        }
    }

    #[test]
    fn test_progress_events_are_not_notifications() {
        assert_eq!(Notification::from_event(&PipelineEvent::LogLine("x".into())), None);
        assert_eq!(
            Notification::from_event(&PipelineEvent::EncodeProgress {
                id: "a".into(),
                name: "b".into(),
                percent: 10.0
            }),
            None
        );
    }

    #[test]
    fn test_bodies() {
        let rip = Notification::RipComplete {
            disc_name: "SHOW_S1_D1".into(),
            titles: 4,
            kind: DiscKind::BluRay,
        };
        assert_eq!(rip.body(), "SHOW_S1_D1 (Blu-ray): 4 title(s) ripped and queued for encoding");

        let err = Notification::Error {
            operation: "Disc Scan".into(),
            message: "exit status: 1".into(),
        };
        assert_eq!(err.title(), "Error");
        assert_eq!(err.body(), "Disc Scan failed: exit status: 1");
    }

    #[tokio::test]
    async fn test_listener_forwards_completions_and_errors() {
        let bus = EventBus::new(16);
        let recorder = Arc::new(RecordingNotifier::default());
        let listener = tokio::spawn(run_notification_listener(bus.subscribe(), recorder.clone()));

        bus.publish(PipelineEvent::ScanStatus("Scanning".into()));
        bus.publish(PipelineEvent::EncodeComplete {
            id: "1".into(),
            name: "title_t00.mkv".into(),
            kind: DiscKind::Dvd,
        });
        bus.error("encode", "encoder failed with exit code: 3");
        drop(bus);

        tokio::time::timeout(Duration::from_secs(1), listener)
            .await
            .unwrap()
            .unwrap();

        let seen = recorder.seen.lock().clone();
        assert_eq!(
            seen,
            vec![
                Notification::EncodeComplete {
                    name: "title_t00.mkv".into(),
                    kind: DiscKind::Dvd
                },
                Notification::Error {
                    operation: "encode".into(),
                    message: "encoder failed with exit code: 3".into()
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_log_notifier_never_fails() {
        let n = LogNotifier;
        assert!(n
            .notify(&Notification::EncodeComplete {
                name: "a.mkv".into(),
                kind: DiscKind::Dvd
            })
            .await
            .is_ok());
    }
}
