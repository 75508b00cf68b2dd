//! Async event loop that owns all route store writes.
//!
//! Event sources call back from whatever thread their SDK uses. The
//! [`RouteTracker`] forwards every event through a channel into a single
//! tokio task, so the reconciler only ever sees one event at a time and two
//! events can never race to open or close routes.
//!
//! Store writes and observer callbacks run on tokio's blocking pool, one
//! event at a time, so a slow disk or a slow observer never stalls the
//! runtime's worker threads.
//!
//! Shutdown drains queued events, then finalizes open routes. The last
//! known location lookup runs on a blocking thread under
//! [`TrackerConfig::finalize_timeout_ms`]; if it does not answer in time the
//! routes are left open for the next launch to close. Dropping a tracker
//! without calling [`RouteTracker::shutdown`] unsubscribes it but does not
//! finalize.
//!
//! [`TrackerConfig::finalize_timeout_ms`]: crate::TrackerConfig::finalize_timeout_ms

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use log::{debug, error, info, warn};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::reconciler::RouteReconciler;
use crate::source::{EventSource, SubscriptionId};
use crate::store::{RouteStore, StoreError};
use crate::ActivityEvent;

/// Running tracker. Must be started inside a tokio runtime.
pub struct RouteTracker<S: RouteStore + 'static, E: EventSource + 'static> {
    reconciler: Arc<RouteReconciler<S, E>>,
    // Taken by `shutdown`; still set on drop means shutdown never ran
    subscription: Option<SubscriptionId>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    worker: Option<JoinHandle<()>>,
    processed: Arc<AtomicU32>,
    failed: Arc<AtomicU32>,
}

impl<S: RouteStore + 'static, E: EventSource + 'static> RouteTracker<S, E> {
    /// Subscribe to the reconciler's event source and start the writer task.
    pub fn start(reconciler: RouteReconciler<S, E>) -> Self {
        let reconciler = Arc::new(reconciler);
        let (event_tx, event_rx) = mpsc::unbounded_channel::<ActivityEvent>();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let subscription = reconciler.source().subscribe(Arc::new(move |event: ActivityEvent| {
            if event_tx.send(event).is_err() {
                debug!("[RouteTracker] Dropping event, tracker stopped");
            }
        }));

        let processed = Arc::new(AtomicU32::new(0));
        let failed = Arc::new(AtomicU32::new(0));

        let worker = tokio::spawn(run_worker(
            Arc::clone(&reconciler),
            event_rx,
            shutdown_rx,
            Arc::clone(&processed),
            Arc::clone(&failed),
        ));

        info!("[RouteTracker] Started (subscription {})", subscription);

        Self {
            reconciler,
            subscription: Some(subscription),
            shutdown_tx: Some(shutdown_tx),
            worker: Some(worker),
            processed,
            failed,
        }
    }

    /// Shared reconciler, for queries from the presentation layer.
    pub fn reconciler(&self) -> &Arc<RouteReconciler<S, E>> {
        &self.reconciler
    }

    /// Events applied to the store so far (including failed ones).
    pub fn processed_events(&self) -> u32 {
        self.processed.load(Ordering::Relaxed)
    }

    /// Events whose store write failed.
    pub fn failed_events(&self) -> u32 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Stop receiving events, apply the ones already queued, and finalize
    /// open routes. Returns how many routes were closed by finalization.
    pub async fn shutdown(mut self) -> Result<usize, StoreError> {
        if let Some(subscription) = self.subscription.take() {
            self.reconciler.source().unsubscribe(subscription);
        }
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            // The worker may already have exited; nothing to signal then
            let _ = shutdown_tx.send(());
        }
        if let Some(worker) = self.worker.take() {
            if let Err(e) = worker.await {
                error!("[RouteTracker] Writer task failed: {}", e);
            }
        }

        info!(
            "[RouteTracker] Stopped after {} events ({} failed), finalizing",
            self.processed_events(),
            self.failed_events()
        );

        let timeout = self.reconciler.config().finalize_timeout();
        let source = Arc::clone(self.reconciler.source());
        let lookup = tokio::task::spawn_blocking(move || source.last_known_location());

        let last_known = match tokio::time::timeout(timeout, lookup).await {
            Ok(Ok(location)) => location,
            Ok(Err(e)) => {
                warn!("[RouteTracker] Last known location lookup failed: {}", e);
                None
            }
            Err(_) => {
                warn!("[RouteTracker] Last known location lookup timed out after {:?}", timeout);
                None
            }
        };

        let reconciler = Arc::clone(&self.reconciler);
        match tokio::task::spawn_blocking(move || reconciler.finalize_with(last_known)).await {
            Ok(result) => result,
            Err(e) => Err(StoreError::WriteFailed(format!("finalize task failed: {}", e))),
        }
    }
}

impl<S: RouteStore + 'static, E: EventSource + 'static> Drop for RouteTracker<S, E> {
    fn drop(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            warn!(
                "[RouteTracker] Dropped without shutdown, open routes were not finalized (subscription {})",
                subscription
            );
            self.reconciler.source().unsubscribe(subscription);
        }
        // Dropping the sender also stops the worker
    }
}

async fn run_worker<S: RouteStore + 'static, E: EventSource + 'static>(
    reconciler: Arc<RouteReconciler<S, E>>,
    mut events: mpsc::UnboundedReceiver<ActivityEvent>,
    mut shutdown: oneshot::Receiver<()>,
    processed: Arc<AtomicU32>,
    failed: Arc<AtomicU32>,
) {
    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => break,
            event = events.recv() => match event {
                Some(event) => apply_event(&reconciler, event, &processed, &failed).await,
                None => break,
            },
        }
    }

    // Apply whatever arrived before the source was unsubscribed
    let mut drained = 0;
    while let Ok(event) = events.try_recv() {
        apply_event(&reconciler, event, &processed, &failed).await;
        drained += 1;
    }
    if drained > 0 {
        debug!("[RouteTracker] Drained {} queued events on shutdown", drained);
    }
}

/// Apply one event on the blocking pool and wait for it, so events still
/// reach the store strictly in order.
async fn apply_event<S: RouteStore + 'static, E: EventSource + 'static>(
    reconciler: &Arc<RouteReconciler<S, E>>,
    event: ActivityEvent,
    processed: &AtomicU32,
    failed: &AtomicU32,
) {
    processed.fetch_add(1, Ordering::Relaxed);

    let reconciler = Arc::clone(reconciler);
    let result = tokio::task::spawn_blocking(move || reconciler.handle(&event)).await;

    let error = match result {
        Ok(Ok(_)) => return,
        Ok(Err(e)) => e.to_string(),
        Err(e) => format!("apply task failed: {}", e),
    };
    failed.fetch_add(1, Ordering::Relaxed);
    error!("[RouteTracker] Failed to apply {} event: {}", event.event_type(), error);
}

// ============================================================================
// Tests
// ============================================================================
