//! Worker loops: claim, process, sleep.
//!
//! Each loop is sequential within itself; multiple loops (or multiple
//! processes) are safe against one store because the claim primitive
//! skips locked rows. Shutdown is cooperative: the token is checked
//! between events, so the current finalization always completes.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use sluice_core::ports::{ClaimedEvent, EngineStore};
use sluice_core::EventState;

use crate::broadcast::EventBroadcaster;
use crate::engine::RuleEngine;
use crate::metrics::EngineMetrics;

/// Timing knobs for one worker loop.
#[derive(Debug, Clone, Copy)]
pub struct WorkerConfig {
    /// Sleep between empty polls.
    pub poll_interval: Duration,
    /// Per-event wall-clock budget.
    pub processing_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            processing_timeout: Duration::from_secs(60),
        }
    }
}

/// One long-running claim loop.
pub struct Worker {
    id: usize,
    store: Arc<dyn EngineStore>,
    engine: Arc<RuleEngine>,
    broadcaster: EventBroadcaster,
    config: WorkerConfig,
    shutdown: CancellationToken,
    metrics: EngineMetrics,
}

impl Worker {
    /// Creates a worker loop.
    #[must_use]
    pub fn new(
        id: usize,
        store: Arc<dyn EngineStore>,
        engine: Arc<RuleEngine>,
        broadcaster: EventBroadcaster,
        config: WorkerConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            id,
            store,
            engine,
            broadcaster,
            config,
            shutdown,
            metrics: EngineMetrics::new(),
        }
    }

    /// Runs until the shutdown token fires. Never returns an error;
    /// unhandled faults are logged and the loop continues.
    pub async fn run(self) {
        tracing::info!(worker = self.id, "worker started");
        loop {
            if self.shutdown.is_cancelled() {
                break;
            }
            match self.store.claim_next().await {
                Ok(Some(claimed)) => {
                    self.metrics.record_claim("claimed");
                    self.handle(claimed).await;
                }
                Ok(None) => {
                    self.metrics.record_claim("empty");
                    if !self.idle().await {
                        break;
                    }
                }
                Err(e) => {
                    self.metrics.record_claim("error");
                    tracing::warn!(worker = self.id, error = %e, "claim failed");
                    if !self.idle().await {
                        break;
                    }
                }
            }
        }
        tracing::info!(worker = self.id, "worker stopped");
    }

    /// Processes one claim inside the per-event budget.
    async fn handle(&self, claimed: ClaimedEvent) {
        let event_id = claimed.event.id;
        let attempt_id = claimed.attempt_id;
        tracing::debug!(worker = self.id, event_id, attempt_id, "claimed event");

        let started = Instant::now();
        match tokio::time::timeout(
            self.config.processing_timeout,
            self.engine.process(&claimed),
        )
        .await
        {
            Ok(Ok(())) => {
                self.metrics.observe_processing_duration(started.elapsed());
            }
            Ok(Err(e)) => {
                // The engine already finalized the attempt as failed.
                tracing::error!(worker = self.id, event_id, error = %e, "processing faulted");
            }
            Err(_elapsed) => {
                self.metrics.record_event_processed("timeout");
                let message = format!(
                    "Processing exceeded timeout of {}s",
                    self.config.processing_timeout.as_secs()
                );
                tracing::warn!(worker = self.id, event_id, attempt_id, "{message}");
                match self
                    .store
                    .release_timed_out(event_id, attempt_id, &message)
                    .await
                {
                    Ok(()) => self.broadcaster.publish(event_id, EventState::Pending),
                    Err(e) => tracing::error!(
                        worker = self.id,
                        event_id,
                        error = %e,
                        "failed to release timed-out event; stuck recovery will reclaim it"
                    ),
                }
            }
        }
    }

    /// Sleeps one poll interval. Returns false when shutdown fired.
    async fn idle(&self) -> bool {
        tokio::select! {
            () = self.shutdown.cancelled() => false,
            () = tokio::time::sleep(self.config.poll_interval) => true,
        }
    }
}

/// Periodic backstop for leases that expired without finalization
/// (worker crash, host reset). Runs until the shutdown token fires.
pub async fn run_stuck_sweeper(
    store: Arc<dyn EngineStore>,
    broadcaster: EventBroadcaster,
    interval: Duration,
    threshold_seconds: i64,
    shutdown: CancellationToken,
) {
    let metrics = EngineMetrics::new();
    tracing::info!(
        interval_secs = interval.as_secs(),
        threshold_seconds,
        "stuck-event sweeper started"
    );
    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            () = tokio::time::sleep(interval) => {}
        }
        match store.requeue_stuck(threshold_seconds).await {
            Ok(events) if events.is_empty() => {}
            Ok(events) => {
                metrics.record_stuck_recovered(events.len() as u64);
                tracing::warn!(count = events.len(), "requeued stuck events");
                for event in events {
                    broadcaster.publish(event.id, EventState::Pending);
                }
            }
            Err(e) => tracing::error!(error = %e, "stuck sweep failed"),
        }
    }
    tracing::info!("stuck-event sweeper stopped");
}
