//! Manila Controller - detects Manila and keeps its StorageClasses in place
//!
//! Each sync:
//! 1. Does nothing unless the operator is Managed.
//! 2. Probes OpenStack for Manila share types. No Manila, or Manila
//!    without share types, marks the operator Disabled.
//! 3. Starts the CSI driver controllers the first time share types show up.
//! 4. Creates or replaces one StorageClass per share type.
//! 5. Marks the operator Available once every StorageClass is in place.
//!
//! CSI drivers are not uninstalled and StorageClasses are not deleted when
//! Manila disappears or stops offering a share type; Manila may just be
//! under maintenance.

use crate::controlplane::launcher::ControllerLauncher;
use crate::controlplane::metrics::ControllerMetrics;
use crate::controlplane::status::OperatorStatus;
use crate::controlplane::storage_class::{ReconcileAction, StorageClassConfig, StorageClassReconciler};
use crate::crd::ManagementState;
use crate::domain::ports::{
    OperatorStatusStoreRef, RunnableRef, ShareTypeListing, ShareTypeSourceRef, StorageClassStoreRef,
};
use crate::error::{Error, ErrorAction, Result};
use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use futures::stream::BoxStream;
use futures::{FutureExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

// =============================================================================
// Configuration
// =============================================================================

/// Minimal interval between resyncs. New share types get their
/// StorageClass at least this often.
pub const RESYNC_INTERVAL: Duration = Duration::from_secs(60);

/// Shortest accepted resync interval
pub const MIN_RESYNC_INTERVAL: Duration = Duration::from_secs(1);

/// Disabled message when the cloud has no share service
pub const MSG_NOT_SUPPORTED: &str = "This OpenStack does not provide Manila service";

/// Disabled message when Manila offers no share types
pub const MSG_NO_SHARE_TYPES: &str = "Manila does not provide any share types";

/// Configuration for the Manila controller
#[derive(Debug, Clone)]
pub struct ManilaControllerConfig {
    /// Periodic resync interval
    pub resync_interval: Duration,
    /// First retry delay after a failed sync
    pub initial_retry: Duration,
    /// Upper bound of the retry delay
    pub max_retry: Duration,
    /// Desired StorageClass inputs
    pub storage_class: StorageClassConfig,
}

impl Default for ManilaControllerConfig {
    fn default() -> Self {
        Self {
            resync_interval: RESYNC_INTERVAL,
            initial_retry: Duration::from_secs(1),
            max_retry: Duration::from_secs(60),
            storage_class: StorageClassConfig::default(),
        }
    }
}

impl ManilaControllerConfig {
    /// Reject settings the runner cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.resync_interval < MIN_RESYNC_INTERVAL {
            return Err(Error::Configuration(format!(
                "resync interval must be at least {:?}, got {:?}",
                MIN_RESYNC_INTERVAL, self.resync_interval
            )));
        }
        if self.initial_retry.is_zero() || self.max_retry < self.initial_retry {
            return Err(Error::Configuration(format!(
                "invalid retry range {:?}..{:?}",
                self.initial_retry, self.max_retry
            )));
        }
        Ok(())
    }

    fn retry_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_retry)
            .with_max_interval(self.max_retry)
            .with_max_elapsed_time(None)
            .build()
    }
}

// =============================================================================
// Sync Outcome
// =============================================================================

/// What a successful sync ended up doing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The operator is not Managed; nothing was touched
    Skipped(ManagementState),
    /// Manila is missing or has no share types
    Disabled { message: String },
    /// Manila is present and every StorageClass is in place
    Enabled {
        storage_classes: Vec<(String, ReconcileAction)>,
    },
}

impl SyncOutcome {
    fn metric_label(&self) -> &'static str {
        match self {
            SyncOutcome::Skipped(_) => "skipped",
            SyncOutcome::Disabled { .. } => "disabled",
            SyncOutcome::Enabled { .. } => "enabled",
        }
    }
}

// =============================================================================
// Manila Controller
// =============================================================================

/// Sync driver for Manila detection and StorageClass management
pub struct ManilaController {
    config: ManilaControllerConfig,
    status: OperatorStatus,
    share_types: ShareTypeSourceRef,
    reconciler: StorageClassReconciler,
    launcher: ControllerLauncher,
    metrics: Arc<ControllerMetrics>,
    synced: AtomicBool,
}

impl ManilaController {
    /// Create a new controller
    pub fn new(
        config: ManilaControllerConfig,
        status_store: OperatorStatusStoreRef,
        share_types: ShareTypeSourceRef,
        storage_classes: StorageClassStoreRef,
        csi_controllers: Vec<RunnableRef>,
        metrics: Arc<ControllerMetrics>,
    ) -> Self {
        let reconciler = StorageClassReconciler::new(
            storage_classes,
            config.storage_class.clone(),
            metrics.clone(),
        );
        Self {
            config,
            status: OperatorStatus::new(status_store),
            share_types,
            reconciler,
            launcher: ControllerLauncher::new(csi_controllers),
            metrics,
            synced: AtomicBool::new(false),
        }
    }

    /// Whether at least one sync completed without error
    pub fn has_synced(&self) -> bool {
        self.synced.load(Ordering::Acquire)
    }

    /// Whether the CSI driver controllers were started
    pub fn controllers_running(&self) -> bool {
        self.launcher.is_started()
    }

    /// One pass of the Manila state machine.
    ///
    /// `cancel` is handed to the CSI driver controllers when they are
    /// started.
    #[instrument(skip(self, cancel))]
    pub async fn sync(&self, cancel: &CancellationToken) -> Result<SyncOutcome> {
        debug!("Manila sync started");

        let state = self.status.management_state().await?;
        if state != ManagementState::Managed {
            debug!("Operator is {}, skipping sync", state);
            return Ok(SyncOutcome::Skipped(state));
        }

        let share_types = match self.share_types.list_share_types().await? {
            ShareTypeListing::NotSupported => return self.disable(MSG_NOT_SUPPORTED).await,
            ShareTypeListing::Available(types) if types.is_empty() => {
                debug!("Manila does not provide any share types");
                return self.disable(MSG_NO_SHARE_TYPES).await;
            }
            ShareTypeListing::Available(types) => types,
        };

        if self.launcher.start_once(cancel) {
            info!("Manila detected with {} share types", share_types.len());
        }

        let storage_classes = self.reconciler.reconcile(&share_types).await?;

        self.status.set_enabled().await?;
        self.metrics.set_enabled(true);

        debug!("Manila sync finished");
        Ok(SyncOutcome::Enabled { storage_classes })
    }

    async fn disable(&self, message: &str) -> Result<SyncOutcome> {
        self.status.set_disabled(message).await?;
        self.metrics.set_enabled(false);
        Ok(SyncOutcome::Disabled {
            message: message.to_string(),
        })
    }

    /// Run one sync, abort it on cancellation, and report the result as
    /// the Degraded condition.
    pub async fn sync_and_report(&self, cancel: &CancellationToken) -> Result<SyncOutcome> {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            result = self.sync(cancel) => result,
        };

        match &result {
            Ok(outcome) => {
                self.synced.store(true, Ordering::Release);
                self.metrics.record_sync(outcome.metric_label());
                if matches!(outcome, SyncOutcome::Skipped(_)) {
                    return result;
                }
                if let Err(err) = self.status.clear_degraded().await {
                    warn!("Failed to clear degraded condition: {}", err);
                }
            }
            Err(Error::Cancelled) => {
                debug!("Manila sync cancelled");
            }
            Err(err) => {
                warn!("Manila sync failed: {}", err);
                self.metrics.record_sync("error");
                if let Err(report_err) = self.status.set_degraded(err).await {
                    warn!("Failed to report degraded condition: {}", report_err);
                }
            }
        }

        result
    }

    /// Sync on every resync tick and trigger until cancelled.
    ///
    /// Bursts of triggers collapse into a single sync. Failed syncs are
    /// retried according to `Error::action`.
    pub async fn run(self: Arc<Self>, triggers: BoxStream<'static, ()>, cancel: CancellationToken) {
        if let Err(err) = self.config.validate() {
            error!("Manila controller not started: {}", err);
            return;
        }
        info!(
            "Starting Manila controller (resync every {:?})",
            self.config.resync_interval
        );

        let mut triggers = triggers.fuse();
        let mut ticker = tokio::time::interval(self.config.resync_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut backoff = self.config.retry_backoff();
        let mut retry_at: Option<Instant> = None;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => debug!("Resync interval elapsed"),
                Some(()) = triggers.next() => {
                    while let Some(Some(())) = triggers.next().now_or_never() {}
                    debug!("Watch event received");
                }
                _ = sleep_until(retry_at) => debug!("Retrying failed sync"),
            }
            retry_at = None;

            match self.sync_and_report(&cancel).await {
                Ok(_) => backoff.reset(),
                Err(Error::Cancelled) => break,
                Err(err) => {
                    if !err.is_retryable() {
                        warn!("Not retrying, waiting for the next trigger: {}", err);
                    }
                    let delay = match err.action() {
                        ErrorAction::RequeueWithBackoff => backoff.next_backoff(),
                        ErrorAction::RequeueAfter(delay) => Some(delay),
                        ErrorAction::NoRequeue => None,
                    };
                    if let Some(delay) = delay {
                        debug!("Retrying in {:?}", delay);
                        retry_at = Some(Instant::now() + delay);
                    }
                }
            }
        }

        info!("Manila controller stopped");
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
