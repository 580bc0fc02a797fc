// sync-core/src/supervisor.rs
//! C9: the periodic sync loop — owns the mutual-exclusion lock and the
//! per-cycle cancellation scope, triggers the first-run wipe and manual
//! full resyncs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use caldav_proto::CalDavTransport;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::{CancelReason, SyncError};
use crate::reconciler::{DesiredSet, Reconciler};
use crate::tray::{TrayHandle, TrayPhase};

pub struct SupervisorConfig {
    pub initial_wait_seconds: u64,
    pub sync_interval_minutes: u64,
}

/// Hosts the periodic loop described in `§4.1`. Generic over the
/// transport so tests can drive it against a fake CalDAV backend.
pub struct Supervisor<T: CalDavTransport> {
    config: SupervisorConfig,
    reconciler: Arc<Reconciler<T>>,
    tray: Arc<dyn TrayHandle>,
    service_cancel: CancellationToken,
    cycle_lock: Mutex<()>,
    /// The in-flight cycle's cancellation scope, if any. `TriggerFullResync`
    /// cancels *this* child token rather than `service_cancel` itself —
    /// cancelling the service-level token would end the whole supervisor
    /// loop, not just the current cycle.
    current_cycle: Mutex<Option<CancellationToken>>,
    first_run_done: AtomicBool,
}

/// What the supervisor asks the materialization pipeline for each
/// cycle; kept as a trait so the supervisor doesn't depend on C3/C4/C5
/// concretely.
#[async_trait::async_trait]
pub trait DesiredSetProvider: Send + Sync {
    async fn materialize(&self, cancel: &CancellationToken) -> DesiredSet;
}

impl<T: CalDavTransport + 'static> Supervisor<T> {
    pub fn new(
        config: SupervisorConfig,
        reconciler: Arc<Reconciler<T>>,
        tray: Arc<dyn TrayHandle>,
        service_cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            reconciler,
            tray,
            service_cancel,
            cycle_lock: Mutex::new(()),
            current_cycle: Mutex::new(None),
            first_run_done: AtomicBool::new(false),
        }
    }

    /// Runs forever until the service-level cancellation fires.
    pub async fn run(&self, provider: &dyn DesiredSetProvider) {
        if cancellable_sleep(Duration::from_secs(self.config.initial_wait_seconds), &self.service_cancel)
            .await
            .is_err()
        {
            return;
        }

        loop {
            if self.service_cancel.is_cancelled() {
                info!("service stop requested, exiting supervisor loop");
                return;
            }

            let per_cycle = self.service_cancel.child_token();
            *self.current_cycle.lock().await = Some(per_cycle.clone());
            let _permit = self.cycle_lock.lock().await;

            if let Err(e) = self.run_one_cycle(provider, &per_cycle).await {
                match e {
                    SyncError::Cancelled(CancelReason::ServiceStop) => {
                        info!("cycle cancelled by service stop");
                        return;
                    }
                    SyncError::Cancelled(CancelReason::PerCycle) => {
                        info!("cycle cancelled, a new cycle (likely a triggered resync) will begin");
                    }
                    SyncError::AuthFailure => {
                        error!("authentication failure, surfacing to UI and ending this cycle");
                        self.tray.update_text("Authentication failed");
                    }
                    other => {
                        warn!(error = %other, "cycle failed, will retry after the normal interval");
                    }
                }
            }

            drop(_permit);

            if cancellable_sleep(
                Duration::from_secs(self.config.sync_interval_minutes * 60),
                &self.service_cancel,
            )
            .await
            .is_err()
            {
                return;
            }
        }
    }

    async fn run_one_cycle(
        &self,
        provider: &dyn DesiredSetProvider,
        cancel: &CancellationToken,
    ) -> Result<(), SyncError> {
        if !self.first_run_done.swap(true, Ordering::SeqCst) {
            info!("first cycle since process start, performing filtered wipe");
            self.reconciler.first_cycle_wipe(cancel).await?;
        }

        let desired = provider.materialize(cancel).await;

        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled(CancelReason::PerCycle));
        }

        self.reconciler.reconcile(desired, cancel).await?;
        self.tray.set_phase(TrayPhase::Idle);
        Ok(())
    }

    /// Callable from the UI collaborator: cancels any in-flight cycle,
    /// waits for the lock, then runs a filtered-wipe-disabled full
    /// resync under a fresh scope (still a child of `service_cancel`, so
    /// a service stop during the manual resync still takes effect).
    pub async fn trigger_full_resync(&self, provider: &dyn DesiredSetProvider) -> Result<(), SyncError> {
        if let Some(in_flight) = self.current_cycle.lock().await.clone() {
            in_flight.cancel();
        }
        let _permit = self.cycle_lock.lock().await;

        let scope = self.service_cancel.child_token();
        *self.current_cycle.lock().await = Some(scope.clone());

        self.reconciler.full_resync_wipe(&scope).await?;
        let desired = provider.materialize(&scope).await;
        self.reconciler.reconcile(desired, &scope).await?;
        Ok(())
    }
}

/// Sleeps for `duration` unless `cancel` fires first, in which case it
/// returns early with `Err(())`. Pacing sleeps elsewhere in the engine
/// use the same pattern so cancellation has liveness within one pacing
/// interval (`P7`).
pub async fn cancellable_sleep(duration: Duration, cancel: &CancellationToken) -> Result<(), ()> {
    tokio::select! {
        _ = tokio::time::sleep(duration) => Ok(()),
        _ = cancel.cancelled() => Err(()),
    }
}
