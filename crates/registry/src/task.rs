//! Per-registration health-check task.
//!
//! A task polls its service at half the configured interval until the
//! first `Up` classification, then settles into polling at the full
//! interval. Every probe result is written back through the store.

use crate::metrics::RegistryMetrics;
use crate::probe::HealthProbe;
use crate::storage::RegistrationStore;
use crate::types::{Registration, Status};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Interval used when a stored registration carries an unusable interval.
pub const FALLBACK_INTERVAL: Duration = Duration::from_secs(10);

/// Shortest period a ticker is ever created with.
const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Polling phase of a health-check task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Waiting for the first `Up`, polling at half the interval
    PreUp,
    /// Service seen up, polling at the full interval
    SteadyState,
    /// Terminal
    Stopped,
}

/// Shared dependencies handed to every task
#[derive(Clone)]
pub struct TaskContext {
    pub probe: Arc<dyn HealthProbe>,
    pub store: Arc<dyn RegistrationStore>,
    /// Process-wide shutdown signal
    pub shutdown: CancellationToken,
    pub metrics: Option<Arc<RegistryMetrics>>,
    live: Arc<AtomicUsize>,
}

impl TaskContext {
    pub fn new(
        probe: Arc<dyn HealthProbe>,
        store: Arc<dyn RegistrationStore>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            probe,
            store,
            shutdown,
            metrics: None,
            live: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<RegistryMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Number of spawned tasks that have not exited yet
    pub fn live_tasks(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

/// Counts a task as live from spawn until its future is dropped.
struct LiveGuard {
    live: Arc<AtomicUsize>,
    metrics: Option<Arc<RegistryMetrics>>,
}

impl LiveGuard {
    fn new(context: &TaskContext) -> Self {
        context.live.fetch_add(1, Ordering::SeqCst);
        if let Some(ref m) = context.metrics {
            m.task_started();
        }
        Self {
            live: context.live.clone(),
            metrics: context.metrics.clone(),
        }
    }
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
        if let Some(ref m) = self.metrics {
            m.task_stopped();
        }
    }
}

/// Handle to a running task, owned by the registry table
pub struct TaskHandle {
    service_id: String,
    done: CancellationToken,
    join: JoinHandle<()>,
}

impl TaskHandle {
    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    /// Signal the task to stop. Safe to call any number of times.
    pub fn stop(&self) {
        self.done.cancel();
    }

    pub fn is_stopping(&self) -> bool {
        self.done.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the task to exit
    pub async fn join(self) {
        if let Err(e) = self.join.await {
            error!(service_id = %self.service_id, error = %e, "Health check task ended abnormally");
        }
    }
}

/// Health-check task for one registration
pub struct HealthCheckTask {
    registration: Registration,
    context: TaskContext,
    done: CancellationToken,
}

impl HealthCheckTask {
    pub fn new(registration: Registration, context: TaskContext) -> Self {
        Self {
            registration,
            context,
            done: CancellationToken::new(),
        }
    }

    pub fn service_id(&self) -> &str {
        &self.registration.service_id
    }

    /// Spawn the task onto the tokio runtime
    pub fn spawn(self) -> TaskHandle {
        let service_id = self.registration.service_id.clone();
        let done = self.done.clone();
        let guard = LiveGuard::new(&self.context);

        let join = tokio::spawn(async move {
            let _guard = guard;
            self.run().await;
        });

        TaskHandle {
            service_id,
            done,
            join,
        }
    }

    /// Configured interval, or the fallback when it cannot be used
    fn interval(&self) -> Duration {
        match self.registration.health_check.parse_interval() {
            Ok(interval) => interval,
            Err(e) => {
                error!(
                    service_id = %self.registration.service_id,
                    error = %e,
                    fallback = ?FALLBACK_INTERVAL,
                    "Unusable health check interval, using fallback"
                );
                FALLBACK_INTERVAL
            }
        }
    }

    /// Run until deregistered or shut down
    pub async fn run(mut self) {
        let interval = self.interval();
        info!(
            service_id = %self.registration.service_id,
            interval = ?interval,
            "Health check task started"
        );

        let mut phase = Phase::PreUp;
        while phase != Phase::Stopped {
            phase = match phase {
                Phase::PreUp => self.poll(Phase::PreUp, (interval / 2).max(MIN_PERIOD)).await,
                Phase::SteadyState => self.poll(Phase::SteadyState, interval.max(MIN_PERIOD)).await,
                Phase::Stopped => Phase::Stopped,
            };
        }
    }

    /// Poll at `period` and return the phase to move to next.
    async fn poll(&mut self, phase: Phase, period: Duration) -> Phase {
        debug!(service_id = %self.registration.service_id, ?phase, ?period, "Entering polling phase");

        // First tick fires one full period from now, not immediately.
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = self.done.cancelled() => {
                    info!(service_id = %self.registration.service_id, "Health check task deregistered");
                    return Phase::Stopped;
                }
                _ = self.context.shutdown.cancelled() => {
                    debug!(service_id = %self.registration.service_id, "Health check task stopping for shutdown");
                    return Phase::Stopped;
                }
                _ = ticker.tick() => {
                    match self.check().await {
                        Some(Status::Up) if phase == Phase::PreUp => return Phase::SteadyState,
                        // An interrupted check is picked up by the next select.
                        _ => {}
                    }
                }
            }
        }
    }

    /// Probe once and persist the result. Returns `None` when a stop
    /// signal interrupted the probe.
    async fn check(&mut self) -> Option<Status> {
        let status = tokio::select! {
            biased;

            _ = self.done.cancelled() => return None,
            _ = self.context.shutdown.cancelled() => return None,
            status = self.context.probe.probe(&self.registration) => status,
        };

        let previous = self.registration.status;
        if status != previous {
            info!(
                service_id = %self.registration.service_id,
                from = %previous,
                to = %status,
                "Health status changed"
            );
        }

        self.registration.status = status;
        if let Err(e) = self
            .context
            .store
            .update_registration(self.registration.clone())
            .await
        {
            warn!(
                service_id = %self.registration.service_id,
                error = %e,
                "Failed to persist health status"
            );
            if let Some(ref m) = self.context.metrics {
                m.record_status_write_failure();
            }
        }

        Some(status)
    }
}
