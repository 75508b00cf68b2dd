//! Activity event sources.
//!
//! The reconciler never talks to a vendor SDK directly. Whatever detects
//! rides implements [`EventSource`]: it pushes [`ActivityEvent`]s to
//! subscribers and answers location queries.
//!
//! [`SimulatedEventSource`] is a complete in-process implementation used by
//! the demos, the tests, and the app's developer "simulate ride" action.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use log::{debug, info};
use thiserror::Error;

use crate::{ActivityEvent, Location};

/// Callback invoked for every event the source emits.
pub type EventCallback = Arc<dyn Fn(ActivityEvent) + Send + Sync>;

/// Handle returned by [`EventSource::subscribe`].
pub type SubscriptionId = u64;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SourceError {
    #[error("location history unavailable: {0}")]
    Unavailable(String),
}

/// Producer of ride start/end events and location history.
pub trait EventSource: Send + Sync {
    /// Register a callback for future events.
    fn subscribe(&self, callback: EventCallback) -> SubscriptionId;

    /// Stop delivering events to a callback. Unknown ids are ignored.
    fn unsubscribe(&self, id: SubscriptionId);

    /// Most recent fix the source knows about, if any.
    fn last_known_location(&self) -> Option<Location>;

    /// Recorded fixes with `from <= timestamp <= to`, newest first.
    fn history(&self, from: i64, to: i64) -> Result<Vec<Location>, SourceError>;
}

#[derive(Default)]
struct SimulatedState {
    history: Vec<Location>,
    last_location: Option<Location>,
    subscribers: HashMap<SubscriptionId, EventCallback>,
}

/// In-process event source that records every fix it sees.
#[derive(Default)]
pub struct SimulatedEventSource {
    state: Mutex<SimulatedState>,
    next_subscription: AtomicU64,
    unavailable: AtomicBool,
}

impl SimulatedEventSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a plain GPS fix (no start/end signal).
    pub fn record_location(&self, location: Location) {
        if let Ok(mut state) = self.state.lock() {
            Self::remember(&mut state, location);
        }
    }

    /// Record the event's fix and deliver the event to every subscriber.
    pub fn emit(&self, event: ActivityEvent) {
        // Snapshot subscribers so callbacks may (un)subscribe re-entrantly
        let subscribers: Vec<EventCallback> = match self.state.lock() {
            Ok(mut state) => {
                Self::remember(&mut state, event.location);
                state.subscribers.values().cloned().collect()
            }
            Err(_) => return,
        };

        debug!(
            "[EventSource] Emitting {} event at ({:.5}, {:.5}) to {} subscribers",
            event.event_type(),
            event.location.latitude,
            event.location.longitude,
            subscribers.len()
        );

        for callback in subscribers {
            callback(event);
        }
    }

    /// Simulate a complete ride: a start event at `origin` followed by an
    /// end event at `destination`.
    pub fn simulate_ride(&self, origin: Location, destination: Location) {
        info!(
            "[EventSource] Simulating ride ({:.5}, {:.5}) -> ({:.5}, {:.5})",
            origin.latitude, origin.longitude, destination.latitude, destination.longitude
        );
        self.emit(ActivityEvent::start(origin));
        self.emit(ActivityEvent::end(destination));
    }

    /// Make history queries fail, as a crashed location backend would.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Override the last known fix (`None` simulates a cold GPS).
    pub fn set_last_known_location(&self, location: Option<Location>) {
        if let Ok(mut state) = self.state.lock() {
            state.last_location = location;
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.state.lock().map(|s| s.subscribers.len()).unwrap_or(0)
    }

    fn remember(state: &mut SimulatedState, location: Location) {
        state.history.push(location);
        let newer = state
            .last_location
            .map_or(true, |last| location.timestamp >= last.timestamp);
        if newer {
            state.last_location = Some(location);
        }
    }
}

impl EventSource for SimulatedEventSource {
    fn subscribe(&self, callback: EventCallback) -> SubscriptionId {
        let id = self.next_subscription.fetch_add(1, Ordering::Relaxed) + 1;
        if let Ok(mut state) = self.state.lock() {
            state.subscribers.insert(id, callback);
        }
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        if let Ok(mut state) = self.state.lock() {
            state.subscribers.remove(&id);
        }
    }

    fn last_known_location(&self) -> Option<Location> {
        self.state.lock().ok().and_then(|s| s.last_location)
    }

    fn history(&self, from: i64, to: i64) -> Result<Vec<Location>, SourceError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(SourceError::Unavailable("simulated backend offline".to_string()));
        }
        let state = self
            .state
            .lock()
            .map_err(|e| SourceError::Unavailable(format!("lock poisoned: {}", e)))?;

        let mut locations: Vec<Location> = state
            .history
            .iter()
            .filter(|l| l.timestamp >= from && l.timestamp <= to)
            .copied()
            .collect();
        locations.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(locations)
    }
}

// ============================================================================
// Tests
// ============================================================================
