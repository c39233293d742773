//! Daemon startup and main loop for ripline
//!
//! Owns every long-lived collaborator and wires the background loops
//! together: disc monitor, disc processing, encode worker, log consumer,
//! notifier and the operator command dispatch.

use crate::config::{Config, ConfigError};
use crate::disc::{eject, DetectedDisc, DiscMonitor, IoctlProbe};
use crate::encode::{EncodeQueue, EncodeWorker, HandBrakeSupervisor, QueueError, WorkerControl};
use crate::events::{run_log_consumer, Command, EventBus, PipelineEvent};
use crate::lock::{InstanceLock, LockError};
use crate::makemkv::MakeMkvClient;
use crate::missing::scan_for_missing;
use crate::notify::{run_notification_listener, LogNotifier, Notifier};
use crate::pipeline::DiscProcessor;
use crate::startup::{run_startup_checks, StartupError};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const QUEUE_FILE_NAME: &str = "queue.json";

/// Error type for daemon operations
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Startup check failed
    #[error("Startup check failed: {0}")]
    Startup(#[from] StartupError),

    /// Another instance holds the lock
    #[error("{0}")]
    Lock(#[from] LockError),

    /// Queue could not be loaded
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),
}

/// Path of the persisted queue inside `state_dir`.
pub fn queue_path(state_dir: &Path) -> PathBuf {
    state_dir.join(QUEUE_FILE_NAME)
}

/// Daemon state containing all runtime components
pub struct Daemon {
    /// Configuration loaded from file and environment
    pub config: Config,
    /// Durable encode queue, crash-recovered at construction
    pub queue: Arc<EncodeQueue>,
    events: EventBus,
    encoder: Arc<HandBrakeSupervisor>,
    client: MakeMkvClient,
    notifier: Arc<dyn Notifier>,
    _lock: InstanceLock,
}

impl Daemon {
    /// Initialize the daemon with configuration from file
    ///
    /// This performs the full startup sequence:
    /// 1. Load and validate config, applying environment overrides
    /// 2. Take the instance lock
    /// 3. Run startup checks (makemkvcon, HandBrakeCLI)
    /// 4. Load the queue, resetting interrupted items
    pub fn new<P: AsRef<Path>>(config_path: P) -> Result<Self, DaemonError> {
        let config = Config::load(config_path)?;
        Self::with_config(config)
    }

    /// Initialize the daemon with an existing configuration
    pub fn with_config(config: Config) -> Result<Self, DaemonError> {
        Self::build(config, true)
    }

    /// Initialize the daemon without running startup checks
    ///
    /// Useful for testing when the external tools are not installed.
    pub fn new_without_checks(config: Config) -> Result<Self, DaemonError> {
        Self::build(config, false)
    }

    /// Initialize the daemon under a lock the caller already holds
    ///
    /// The lock must have been taken in the configured state directory.
    pub fn with_lock(config: Config, lock: InstanceLock, checks: bool) -> Result<Self, DaemonError> {
        Self::assemble(config, lock, checks)
    }

    fn build(config: Config, checks: bool) -> Result<Self, DaemonError> {
        let lock = InstanceLock::acquire(&config.resolved_state_dir())?;
        Self::assemble(config, lock, checks)
    }

    fn assemble(config: Config, lock: InstanceLock, checks: bool) -> Result<Self, DaemonError> {
        let state_dir = config.resolved_state_dir();

        if checks {
            run_startup_checks(&config)?;
        }

        let queue = EncodeQueue::new(queue_path(&state_dir));
        let recovered = queue.load_state()?;
        info!(
            path = %queue.state_path().display(),
            items = queue.len(),
            recovered,
            "Queue loaded"
        );

        Ok(Self {
            queue: Arc::new(queue),
            events: EventBus::default(),
            encoder: Arc::new(HandBrakeSupervisor::new(config.handbrake.clone())),
            client: MakeMkvClient::new(config.makemkv.binary_path.clone()),
            notifier: Arc::new(LogNotifier),
            _lock: lock,
            config,
        })
    }

    /// Replace the default log notifier.
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Subscribe to pipeline events. Subscribe before calling [`Daemon::run`]
    /// to see everything.
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.events.subscribe()
    }

    /// Run every background loop until `shutdown` fires.
    ///
    /// `commands` closing only stops command handling; the daemon keeps
    /// running until shutdown.
    pub async fn run(self, mut commands: mpsc::Receiver<Command>, shutdown: CancellationToken) -> Result<(), DaemonError> {
        let Daemon {
            config,
            queue,
            events,
            encoder,
            client,
            notifier,
            _lock,
        } = self;

        let log_task = tokio::spawn(run_log_consumer(events.subscribe()));
        let notify_task = tokio::spawn(run_notification_listener(events.subscribe(), notifier));

        let (control_tx, control_rx) = mpsc::channel(16);
        let worker = EncodeWorker::new(
            queue.clone(),
            encoder,
            events.clone(),
            Duration::from_millis(config.worker.tick_interval_ms),
        );
        let worker_task = tokio::spawn(worker.run(control_rx, shutdown.child_token()));

        let device = config.drive.path.clone();
        let discs = DiscMonitor::new(
            IoctlProbe::new(device.clone()),
            device.clone(),
            Duration::from_secs(config.drive.poll_interval_secs),
            Duration::from_secs(config.drive.settle_delay_secs),
        )
        .start(shutdown.child_token());

        let (selection_tx, selection_rx) = mpsc::channel(4);
        let current_disc: Arc<Mutex<Option<CancellationToken>>> = Arc::new(Mutex::new(None));
        let processor = DiscProcessor::new(
            client,
            queue.clone(),
            events.clone(),
            config.output_dir.clone(),
            config.thresholds.movie(),
            config.thresholds.episode(),
        );
        let disc_task = tokio::spawn(run_disc_loop(
            processor,
            discs,
            selection_rx,
            current_disc.clone(),
            events.clone(),
            shutdown.clone(),
        ));

        info!(
            device = %device.display(),
            output_dir = %config.output_dir.display(),
            "Daemon running"
        );

        let dispatcher = Dispatcher {
            queue,
            events: events.clone(),
            control: control_tx,
            selections: selection_tx,
            current_disc,
            output_dir: config.output_dir.clone(),
            device,
        };
        let mut commands_open = true;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                cmd = commands.recv(), if commands_open => match cmd {
                    Some(cmd) => dispatcher.dispatch(cmd).await,
                    None => {
                        debug!("Command channel closed");
                        commands_open = false;
                    }
                },
            }
        }

        info!("Shutting down");
        drop(dispatcher);
        if let Err(e) = worker_task.await {
            warn!(error = %e, "Encode worker task failed");
        }
        if let Err(e) = disc_task.await {
            warn!(error = %e, "Disc task failed");
        }

        // Listeners end once the last bus handle is gone
        drop(events);
        let _ = log_task.await;
        let _ = notify_task.await;
        Ok(())
    }
}

/// Take discs from the monitor one at a time, ejecting each when done.
async fn run_disc_loop(
    processor: DiscProcessor,
    mut discs: mpsc::Receiver<DetectedDisc>,
    mut selections: mpsc::Receiver<Vec<u32>>,
    current: Arc<Mutex<Option<CancellationToken>>>,
    events: EventBus,
    shutdown: CancellationToken,
) {
    loop {
        let disc = tokio::select! {
            _ = shutdown.cancelled() => break,
            disc = discs.recv() => match disc {
                Some(disc) => disc,
                None => break,
            },
        };

        let token = shutdown.child_token();
        *current.lock() = Some(token.clone());
        let outcome = processor.process(disc.clone(), &mut selections, &token).await;
        *current.lock() = None;
        info!(device = %disc.device.display(), ?outcome, "Disc finished");

        if shutdown.is_cancelled() {
            break;
        }
        if let Err(e) = eject(&disc.device).await {
            warn!(device = %disc.device.display(), error = %e, "Eject failed");
            events.error("Eject", e.to_string());
        }
    }
    debug!("Disc loop stopped");
}

/// Applies operator commands.
struct Dispatcher {
    queue: Arc<EncodeQueue>,
    events: EventBus,
    control: mpsc::Sender<WorkerControl>,
    selections: mpsc::Sender<Vec<u32>>,
    current_disc: Arc<Mutex<Option<CancellationToken>>>,
    output_dir: PathBuf,
    device: PathBuf,
}

impl Dispatcher {
    async fn dispatch(&self, cmd: Command) {
        debug!(?cmd, "Command received");
        match cmd {
            Command::SelectTitles(ids) => {
                if self.selections.try_send(ids).is_err() {
                    warn!("Title selection not delivered");
                }
            }
            Command::Pause => self.send_control(WorkerControl::Pause).await,
            Command::Resume => self.send_control(WorkerControl::Resume).await,
            Command::Stop => self.send_control(WorkerControl::Stop).await,
            Command::Delete => self.send_control(WorkerControl::Delete).await,
            Command::ClearCompleted => match self.queue.clear_completed() {
                Ok(n) => self.events.log(format!("Cleared {} finished item(s)", n)),
                Err(e) => self.events.error("Clear Completed", e.to_string()),
            },
            Command::RetryFailed => match self.queue.retry_failed() {
                Ok(n) => self.events.log(format!("Requeued {} item(s)", n)),
                Err(e) => self.events.error("Retry Failed", e.to_string()),
            },
            Command::ScanForMissing => self.scan_for_missing().await,
            Command::CancelAndEject => self.cancel_and_eject().await,
        }
    }

    async fn send_control(&self, ctrl: WorkerControl) {
        if self.control.send(ctrl).await.is_err() {
            warn!(?ctrl, "Encode worker is not running");
        }
    }

    async fn scan_for_missing(&self) {
        self.events.log("Scanning for missing encodes...");
        let queue = self.queue.clone();
        let output_dir = self.output_dir.clone();
        let result = tokio::task::spawn_blocking(move || scan_for_missing(&output_dir, &queue)).await;

        match result {
            Ok(Ok(0)) => self.events.log("No missing encodes found"),
            Ok(Ok(n)) => self.events.log(format!("Added {} item(s) to encoding queue", n)),
            Ok(Err(e)) => self.events.error("Scan For Missing", e.to_string()),
            Err(e) => self.events.error("Scan For Missing", e.to_string()),
        }
    }

    async fn cancel_and_eject(&self) {
        let token = self.current_disc.lock().clone();
        match token {
            Some(token) => {
                self.events.log("Cancelling disc processing...");
                // The disc loop ejects once processing unwinds
                token.cancel();
            }
            None => {
                if let Err(e) = eject(&self.device).await {
                    self.events.error("Eject", e.to_string());
                }
            }
        }
    }
}
