//! Encoder abstraction driven by the worker.

use super::queue::QueueItem;
use async_trait::async_trait;
use std::io;
use thiserror::Error;
use tokio::sync::mpsc;

/// Error type for encoding operations
#[derive(Debug, Error)]
pub enum EncodeError {
    /// Encoder exited with non-zero status
    #[error("encoder failed with exit code: {0}")]
    Failed(i32),

    /// Encoder was terminated by a signal (includes user stop/delete)
    #[error("encoder was terminated by signal {0}")]
    Terminated(i32),

    /// The pseudo-terminal could not be set up
    #[error("failed to set up pseudo-terminal: {0}")]
    Pty(#[source] io::Error),

    /// IO error during encoding
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl EncodeError {
    /// True when the encoder was killed rather than failing on its own.
    pub fn is_terminated(&self) -> bool {
        matches!(self, EncodeError::Terminated(_))
    }
}

/// Live output from an encode.
#[derive(Debug, Clone, PartialEq)]
pub enum EncodeUpdate {
    /// Percentage complete, 0-100
    Progress(f64),
    /// Non-progress output line
    Log(String),
}

/// Runs one encode at a time and exposes process control over it.
///
/// Control calls are no-ops when nothing is running.
#[async_trait]
pub trait Encoder: Send + Sync + 'static {
    /// Encode `item`, streaming updates until the encoder exits.
    async fn encode(&self, item: &QueueItem, updates: mpsc::Sender<EncodeUpdate>) -> Result<(), EncodeError>;

    /// Suspend the running encode.
    fn pause(&self) -> io::Result<()>;

    /// Continue a suspended encode.
    fn resume(&self) -> io::Result<()>;

    /// Kill the running encode.
    fn cancel(&self) -> io::Result<()>;
}
