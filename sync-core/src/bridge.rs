// sync-core/src/bridge.rs
//! C3: the source-host bridge — liveness/attach state machine and the
//! single-threaded-apartment affinitised worker that hosts every call
//! into the source automation surface.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::error::SyncError;

/// One raw appointment as handed back by the source, before recurrence
/// expansion or normalization.
#[derive(Debug, Clone)]
pub struct RawAppointment {
    pub global_id: String,
    pub subject: String,
    pub body: String,
    pub location: String,
    pub start_local: Option<chrono::NaiveDateTime>,
    pub end_local: Option<chrono::NaiveDateTime>,
    pub start_utc: Option<DateTime<Utc>>,
    pub end_utc: Option<DateTime<Utc>>,
    pub is_all_day_flag: bool,
    pub is_recurring: bool,
    pub series: Option<crate::recurrence::SeriesDescriptor>,
    pub is_cancelled: bool,
}

/// What the affinitised worker actually does once attached: fetch a
/// window of raw appointments. A production implementation drives real
/// automation calls from inside [`AffinitizedWorker::run`]; tests plug
/// in a fake that returns canned data.
#[async_trait]
pub trait SourceBridge: Send + Sync {
    async fn fetch_appointments(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<RawAppointment>, SyncError>;
}

/// Probes and launches the host process. Implemented against
/// `std::process::Command` in the binary crate; faked in tests.
pub trait HostProcess: Send + Sync {
    fn probe_running(&self) -> bool;
    fn launch(&self) -> Result<(), String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachState {
    Ready,
    Failed,
}

/// Runs the attach state machine from `§4.3`: probe, launch if needed,
/// wait for process-up, then a caller-supplied `create_instance` attempt
/// (retried up to 3x on a named transient failure), then one final
/// probe.
pub struct AttachSequence<'a> {
    pub host: &'a dyn HostProcess,
}

impl<'a> AttachSequence<'a> {
    pub fn new(host: &'a dyn HostProcess) -> Self {
        Self { host }
    }

    /// Runs one attach attempt. `create_instance` models the automation
    /// call that actually connects to the running host; it returns
    /// `Err(true)` for the retryable "server execution failed" case and
    /// `Err(false)` for anything else (treated as immediate failure).
    pub async fn attach(&self, create_instance: impl Fn() -> Result<(), bool>) -> AttachState {
        if !self.host.probe_running() {
            if let Err(e) = self.host.launch() {
                warn!(error = %e, "failed to launch source host");
                return AttachState::Failed;
            }
            if !self.wait_process_up().await {
                warn!("source host did not come up within the wait window");
                return AttachState::Failed;
            }
        }

        let mut attempts = 0;
        loop {
            match create_instance() {
                Ok(()) => break,
                Err(true) if attempts < 3 => {
                    attempts += 1;
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
                Err(_) => return AttachState::Failed,
            }
        }

        if self.host.probe_running() {
            AttachState::Ready
        } else {
            AttachState::Failed
        }
    }

    async fn wait_process_up(&self) -> bool {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
        while tokio::time::Instant::now() < deadline {
            if self.host.probe_running() {
                return true;
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        self.host.probe_running()
    }
}

/// Retries the whole attach sequence up to five times with 10s waits,
/// as specified for the call layer in `§4.3`.
pub async fn attach_with_retry(
    host: &dyn HostProcess,
    create_instance: impl Fn() -> Result<(), bool>,
) -> Result<(), SyncError> {
    let sequence = AttachSequence::new(host);
    for attempt in 0..5 {
        if sequence.attach(&create_instance).await == AttachState::Ready {
            return Ok(());
        }
        debug!(attempt, "attach attempt failed, waiting before retry");
        if attempt < 4 {
            tokio::time::sleep(Duration::from_secs(10)).await;
        }
    }
    Err(SyncError::HostUnavailable)
}

type Call = Box<dyn FnOnce() + Send>;

/// A dedicated OS thread running a single-threaded tokio runtime, used
/// to model single-threaded-apartment affinity for the source
/// automation surface: every call that must run on "the" apartment
/// thread is enqueued here and awaited from the supervisor.
pub struct AffinitizedWorker {
    sender: mpsc::UnboundedSender<Call>,
    _thread: std::thread::JoinHandle<()>,
}

impl AffinitizedWorker {
    pub fn spawn() -> Arc<Self> {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Call>();

        let thread = std::thread::Builder::new()
            .name("source-apartment".into())
            .spawn(move || {
                let rt = tokio::runtime::Builder::new_current_thread()
                    .enable_time()
                    .build()
                    .expect("failed to start affinitised worker runtime");
                rt.block_on(async move {
                    while let Some(call) = receiver.recv().await {
                        call();
                    }
                });
            })
            .expect("failed to spawn affinitised worker thread");

        Arc::new(Self {
            sender,
            _thread: thread,
        })
    }

    /// Runs `f` on the apartment thread and awaits its result.
    pub async fn run<F, R>(&self, f: F) -> Result<R, SyncError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let call: Call = Box::new(move || {
            let result = f();
            let _ = tx.send(result);
        });
        self.sender
            .send(call)
            .map_err(|_| SyncError::HostUnavailable)?;
        rx.await.map_err(|_| SyncError::HostUnavailable)
    }
}
