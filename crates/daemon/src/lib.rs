//! ripline
//!
//! Optical disc ripping and encoding engine: watches the drive, rips the
//! interesting titles with MakeMKV and feeds them through a durable queue
//! into HandBrake.

pub mod daemon;
pub mod disc;
pub mod encode;
pub mod events;
pub mod lock;
pub mod makemkv;
pub mod manual;
pub mod missing;
pub mod notify;
pub mod pipeline;
pub mod startup;

pub use daemon::{queue_path, Daemon, DaemonError, QUEUE_FILE_NAME};
pub use disc::{eject, sanitize_filename, DetectedDisc, DiscKind, DiscMonitor, DriveProbe, DriveStatus, IoctlProbe};
pub use encode::{
    build_handbrake_command, parse_encode_progress, EncodeError, EncodeQueue, EncodeUpdate, EncodeWorker, Encoder,
    HandBrakeSupervisor, ItemStatus, QueueError, QueueItem, StatePersistence, WorkerControl, CANCELLED_BY_USER,
};
pub use events::{run_log_consumer, Command, EventBus, PipelineEvent};
pub use lock::{InstanceLock, LockError};
pub use makemkv::{
    calculate_percentage, find_newest_mkv, parse_info, select_titles, MakeMkvClient, RipError, RipUpdate, ScanResult,
    SelectionMode, Title,
};
pub use manual::{add_to_queue, default_output_path, AddError};
pub use missing::{find_missing_encodes, scan_for_missing, MissingEncode};
pub use notify::{LogNotifier, Notification, Notifier, NotifyError};
pub use pipeline::{DiscFolders, DiscOutcome, DiscProcessor};
pub use ripline_config as config;
pub use ripline_config::Config;
pub use startup::{resolve_tool, run_startup_checks, StartupError};
