//! FFI exports for the mobile app (UniFFI).
//!
//! The app owns the activity-detection SDK. It forwards each SDK event to
//! [`FfiRideTracker::on_activity_event`] and answers location queries
//! through a [`LocationProvider`] callback.
//!
//! Routes live either in memory, seeded by the app with the routes it saved
//! last time ([`FfiRideTracker::new`]), or, with the `persistence` feature,
//! in a JSON file the tracker keeps up to date itself
//! ([`FfiRideTracker::open`]).

use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, info};

use crate::reconciler::{HandleOutcome, RouteReconciler, RouteTrack};
use crate::source::{EventCallback, EventSource, SourceError, SubscriptionId};
use crate::store::{InMemoryRouteStore, RouteStore, RouteUpdate, StoreError};
use crate::{init_logging, ActivityEvent, Location, NewRoute, Route, RouteId, SystemClock, TrackerConfig};

#[cfg(feature = "persistence")]
use crate::persistence::FileRouteStore;

// ========================================================================
// Callback Interfaces (implemented in Kotlin/Swift)
// ========================================================================

/// Location queries answered by the host SDK.
#[uniffi::export(callback_interface)]
pub trait LocationProvider: Send + Sync {
    /// Most recent fix, or None if the SDK has none.
    fn last_known_location(&self) -> Option<Location>;

    /// Fixes between `from` and `to` (ms since epoch). None on failure.
    fn location_history(&self, from: i64, to: i64) -> Option<Vec<Location>>;
}

/// Notified after every ride end event so the map can redraw.
#[uniffi::export(callback_interface)]
pub trait RouteFinishedListener: Send + Sync {
    fn on_route_finished(&self);
}

#[derive(Debug, thiserror::Error, uniffi::Error)]
pub enum FfiTrackerError {
    #[error("store write failed: {msg}")]
    StoreWriteFailed { msg: String },
    #[error("store read failed: {msg}")]
    StoreReadFailed { msg: String },
    #[error("route {id} not found")]
    RouteNotFound { id: u64 },
    #[error("tracker lock poisoned")]
    Poisoned,
}

impl From<StoreError> for FfiTrackerError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::WriteFailed(msg) => FfiTrackerError::StoreWriteFailed { msg },
            StoreError::ReadFailed(msg) => FfiTrackerError::StoreReadFailed { msg },
            StoreError::NotFound(id) => FfiTrackerError::RouteNotFound { id },
        }
    }
}

/// Event source backed by the host app. Events are pushed through
/// [`FfiRideTracker::on_activity_event`], so subscriptions never fire.
struct HostEventSource {
    provider: Box<dyn LocationProvider>,
}

impl EventSource for HostEventSource {
    fn subscribe(&self, _callback: EventCallback) -> SubscriptionId {
        debug!("[RideTrackerRust] Host source ignores subscriptions");
        0
    }

    fn unsubscribe(&self, _id: SubscriptionId) {}

    fn last_known_location(&self) -> Option<Location> {
        self.provider.last_known_location()
    }

    fn history(&self, from: i64, to: i64) -> Result<Vec<Location>, SourceError> {
        self.provider
            .location_history(from, to)
            .ok_or_else(|| SourceError::Unavailable("host returned no history".to_string()))
    }
}

/// The store behind an [`FfiRideTracker`].
enum TrackerStore {
    Memory(InMemoryRouteStore),
    #[cfg(feature = "persistence")]
    File(FileRouteStore),
}

impl TrackerStore {
    fn inner(&self) -> &dyn RouteStore {
        match self {
            TrackerStore::Memory(store) => store,
            #[cfg(feature = "persistence")]
            TrackerStore::File(store) => store,
        }
    }
}

impl RouteStore for TrackerStore {
    fn add(&self, route: NewRoute) -> Result<Route, StoreError> {
        self.inner().add(route)
    }

    fn update(&self, id: RouteId, update: RouteUpdate) -> Result<Route, StoreError> {
        self.inner().update(id, update)
    }

    fn start_route(
        &self,
        route: NewRoute,
        closes: Vec<(RouteId, RouteUpdate)>,
    ) -> Result<(Route, Vec<Route>), StoreError> {
        self.inner().start_route(route, closes)
    }

    fn get(&self, id: RouteId) -> Result<Option<Route>, StoreError> {
        self.inner().get(id)
    }

    fn open_routes(&self) -> Result<Vec<Route>, StoreError> {
        self.inner().open_routes()
    }

    fn all_routes(&self) -> Result<Vec<Route>, StoreError> {
        self.inner().all_routes()
    }

    fn routes_overlapping(&self, from: i64, to: i64) -> Result<Vec<Route>, StoreError> {
        self.inner().routes_overlapping(from, to)
    }

    fn delete_all(&self) -> Result<usize, StoreError> {
        self.inner().delete_all()
    }
}

/// Route tracker handle exposed to Kotlin/Swift.
#[derive(uniffi::Object)]
pub struct FfiRideTracker {
    reconciler: RouteReconciler<TrackerStore, HostEventSource>,
    // Serializes store writes; queries go straight to the store
    writer: Mutex<()>,
}

impl FfiRideTracker {
    fn with_store(store: TrackerStore, provider: Box<dyn LocationProvider>, config: TrackerConfig) -> Self {
        let source = Arc::new(HostEventSource { provider });
        Self {
            reconciler: RouteReconciler::with_clock(Arc::new(store), source, Arc::new(SystemClock), config),
            writer: Mutex::new(()),
        }
    }

    fn write_lock(&self) -> Result<MutexGuard<'_, ()>, FfiTrackerError> {
        self.writer.lock().map_err(|_| FfiTrackerError::Poisoned)
    }
}

#[uniffi::export]
impl FfiRideTracker {
    /// Create a tracker seeded with previously persisted routes.
    #[uniffi::constructor]
    pub fn new(
        provider: Box<dyn LocationProvider>,
        config: TrackerConfig,
        routes: Vec<Route>,
    ) -> Arc<Self> {
        init_logging();
        info!("[RideTrackerRust] 🦀 Tracker created with {} restored routes", routes.len());

        let store = TrackerStore::Memory(InMemoryRouteStore::with_routes(routes));
        Arc::new(Self::with_store(store, provider, config))
    }

    /// Replace the route-finished listener.
    pub fn set_route_finished_listener(&self, listener: Box<dyn RouteFinishedListener>) {
        self.reconciler.clear_observers();
        self.reconciler
            .add_observer(Arc::new(move || listener.on_route_finished()));
    }

    /// Apply one SDK event. Returns the id of the route it opened or closed.
    pub fn on_activity_event(&self, event: ActivityEvent) -> Result<Option<u64>, FfiTrackerError> {
        let _guard = self.write_lock()?;
        let outcome = self.reconciler.handle(&event)?;
        Ok(match outcome {
            HandleOutcome::Opened { route, .. } => Some(route.id),
            HandleOutcome::Closed { route } => Some(route.id),
            HandleOutcome::DanglingEnd => None,
        })
    }

    /// Close open routes at the last known fix. Call on app termination.
    pub fn finalize(&self) -> Result<u32, FfiTrackerError> {
        let _guard = self.write_lock()?;
        Ok(self.reconciler.finalize()? as u32)
    }

    pub fn all_routes(&self) -> Result<Vec<Route>, FfiTrackerError> {
        Ok(self.reconciler.all_routes()?)
    }

    pub fn latest_route(&self) -> Result<Option<Route>, FfiTrackerError> {
        Ok(self.reconciler.latest_route()?)
    }

    pub fn locations_between(&self, from: i64, to: i64) -> Vec<Location> {
        self.reconciler.locations_between(from, to)
    }

    pub fn route_track(&self, route: Route) -> RouteTrack {
        self.reconciler.route_track(&route)
    }

    pub fn rename_route(&self, id: u64, name: String) -> Result<Route, FfiTrackerError> {
        let _guard = self.write_lock()?;
        Ok(self.reconciler.rename_route(id, name)?)
    }

    pub fn clear_all(&self) -> Result<u32, FfiTrackerError> {
        let _guard = self.write_lock()?;
        Ok(self.reconciler.clear_all()? as u32)
    }
}

#[cfg(feature = "persistence")]
#[uniffi::export]
impl FfiRideTracker {
    /// Open a tracker whose routes are kept in the JSON file at `path`.
    /// Routes left open by a killed process are closed by the next start.
    #[uniffi::constructor]
    pub fn open(
        path: String,
        provider: Box<dyn LocationProvider>,
        config: TrackerConfig,
    ) -> Result<Arc<Self>, FfiTrackerError> {
        init_logging();
        let store = FileRouteStore::open(&path)?;
        info!("[RideTrackerRust] 🦀 Tracker opened at {}", path);

        Ok(Arc::new(Self::with_store(TrackerStore::File(store), provider, config)))
    }
}

/// Get default tracker configuration.
#[uniffi::export]
pub fn default_tracker_config() -> TrackerConfig {
    init_logging();
    TrackerConfig::default()
}

// ============================================================================
// Tests
// ============================================================================
