//! Encoding: the durable queue, the HandBrake supervisor and the worker
//! that connects them.

pub mod encoder;
pub mod handbrake;
pub mod pty;
pub mod queue;
pub mod state;
pub mod worker;

pub use encoder::{EncodeError, EncodeUpdate, Encoder};
pub use handbrake::{build_handbrake_command, parse_encode_progress, HandBrakeSupervisor};
pub use queue::{EncodeQueue, ItemStatus, QueueError, QueueItem};
pub use state::StatePersistence;
pub use worker::{EncodeWorker, WorkerControl, CANCELLED_BY_USER};
