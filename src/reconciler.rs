//! # Route Reconciler
//!
//! Turns a stream of ride start/end events into stored routes.
//!
//! The reconciler keeps no state of its own between calls: everything lives
//! in the [`RouteStore`], so a crash loses at most the event being handled.
//! Calls must be serialized by the caller (one logical writer); readers may
//! query the store concurrently.
//!
//! ## State machine
//!
//! | State | Event | Action | Next state |
//! |-------|-------|--------|------------|
//! | no open route | start | create open route | one open route |
//! | one open route | start | orphan-close it, create open route | one open route (new) |
//! | one open route | end | close it, notify | no open route |
//! | no open route | end | nothing, notify anyway | no open route |
//! | any | finalize | close open routes at last known fix | no open route |
//!
//! Route boundaries use the reconciliation clock, not the event timestamp,
//! so events delivered out of order still produce ordered start/end times.
//! The event's own timestamp survives inside the stored [`Location`].

use std::sync::{Arc, RwLock};

use log::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::TrackerConfig;
use crate::source::EventSource;
use crate::store::{RouteStore, RouteUpdate, StoreError};
use crate::{geo_utils, ActivityEvent, Bounds, Location, NewRoute, Route, RouteId};

/// Observer notified when an end event has been processed. No payload:
/// observers re-query [`RouteReconciler::latest_route`].
pub type RouteFinishedCallback = Arc<dyn Fn() + Send + Sync>;

/// What a single [`RouteReconciler::handle`] call did to the store.
#[derive(Debug, Clone, PartialEq)]
pub enum HandleOutcome {
    /// A start event opened `route`, closing any routes left open.
    Opened { route: Route, orphan_closed: Vec<RouteId> },
    /// An end event closed `route`.
    Closed { route: Route },
    /// An end event arrived with no open route. The store is unchanged.
    DanglingEnd,
}

/// The recorded track of a route, ready for drawing.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct RouteTrack {
    pub route_id: RouteId,
    /// Fixes recorded during the route, newest first
    pub locations: Vec<Location>,
    /// Polyline length in meters
    pub distance_meters: f64,
    /// Viewport for the track, `None` when nothing was recorded
    pub bounds: Option<Bounds>,
    /// Earliest fix (start marker)
    pub first: Option<Location>,
    /// Latest fix (end marker)
    pub last: Option<Location>,
    /// Track length over the route's duration so far, `None` for a zero-length interval
    pub average_speed_mps: Option<f64>,
}

/// Applies activity events to a route store.
pub struct RouteReconciler<S: RouteStore, E: EventSource> {
    store: Arc<S>,
    source: Arc<E>,
    clock: Arc<dyn Clock>,
    config: TrackerConfig,
    observers: RwLock<Vec<RouteFinishedCallback>>,
}

impl<S: RouteStore, E: EventSource> RouteReconciler<S, E> {
    /// Create a reconciler using the wall clock and default configuration.
    pub fn new(store: Arc<S>, source: Arc<E>) -> Self {
        Self::with_clock(store, source, Arc::new(SystemClock), TrackerConfig::default())
    }

    pub fn with_clock(
        store: Arc<S>,
        source: Arc<E>,
        clock: Arc<dyn Clock>,
        config: TrackerConfig,
    ) -> Self {
        Self {
            store,
            source,
            clock,
            config,
            observers: RwLock::new(Vec::new()),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn source(&self) -> &Arc<E> {
        &self.source
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Register an observer for the route-finished notification.
    pub fn add_observer(&self, observer: RouteFinishedCallback) {
        match self.observers.write() {
            Ok(mut observers) => observers.push(observer),
            Err(e) => warn!("[RouteTracker] Observer not registered: {}", e),
        }
    }

    pub fn clear_observers(&self) {
        match self.observers.write() {
            Ok(mut observers) => observers.clear(),
            Err(e) => warn!("[RouteTracker] Observers not cleared: {}", e),
        }
    }

    // ========================================================================
    // Event handling
    // ========================================================================

    /// Apply one event to the store.
    ///
    /// Never rejects an event for its position in the stream: repeated
    /// starts orphan-close the previous route, and an end with nothing open
    /// is a no-op. Each event is one store transaction, so a store failure
    /// leaves the store exactly as it was before the event.
    ///
    /// The stored fix is tagged from `is_start`, whatever tag it arrived with.
    pub fn handle(&self, event: &ActivityEvent) -> Result<HandleOutcome, StoreError> {
        let location = event.location.with_event_type(event.event_type());
        if !location.is_valid() {
            warn!(
                "[RouteTracker] {} event with invalid coordinates ({}, {})",
                event.event_type(),
                location.latitude,
                location.longitude
            );
        }

        if event.is_start {
            self.handle_start(location)
        } else {
            let outcome = self.handle_end(location)?;
            if outcome != HandleOutcome::DanglingEnd || self.config.notify_on_dangling_end {
                self.notify_route_finished();
            }
            Ok(outcome)
        }
    }

    fn handle_start(&self, location: Location) -> Result<HandleOutcome, StoreError> {
        let open = self.store.open_routes()?;
        if open.len() > 1 {
            warn!("[RouteTracker] Found {} open routes on start, closing all", open.len());
        }

        let now = self.clock.now_millis();
        let closes = open
            .iter()
            .map(|route| (route.id, self.close_update(route, location, now)))
            .collect();

        // Closing the orphans and opening the new route commit together
        let (route, closed) = self.store.start_route(NewRoute::new(location, now), closes)?;
        let orphan_closed: Vec<RouteId> = closed.iter().map(|r| r.id).collect();
        for id in &orphan_closed {
            info!("[RouteTracker] Orphan-closed route {} (start without matching end)", id);
        }
        info!(
            "[RouteTracker] Opened route {} at ({:.5}, {:.5})",
            route.id, location.latitude, location.longitude
        );

        Ok(HandleOutcome::Opened { route, orphan_closed })
    }

    fn handle_end(&self, location: Location) -> Result<HandleOutcome, StoreError> {
        let earliest = self
            .store
            .open_routes()?
            .into_iter()
            .min_by_key(|r| (r.start_time, r.id));

        match earliest {
            Some(route) => {
                let closed = self.close_route(&route, location, self.clock.now_millis())?;
                info!(
                    "[RouteTracker] Closed route {} after {}ms",
                    closed.id,
                    closed.duration_ms().unwrap_or(0)
                );
                Ok(HandleOutcome::Closed { route: closed })
            }
            None => {
                warn!("[RouteTracker] End event with no open route, ignoring");
                Ok(HandleOutcome::DanglingEnd)
            }
        }
    }

    fn close_route(&self, route: &Route, destination: Location, end_time: i64) -> Result<Route, StoreError> {
        self.store
            .update(route.id, self.close_update(route, destination, end_time))
    }

    fn close_update(&self, route: &Route, destination: Location, end_time: i64) -> RouteUpdate {
        let end_time = if self.config.clamp_end_to_start && end_time < route.start_time {
            debug!(
                "[RouteTracker] Clamping end time of route {} from {} to start {}",
                route.id, end_time, route.start_time
            );
            route.start_time
        } else {
            end_time
        };
        RouteUpdate::close(destination, end_time)
    }

    fn notify_route_finished(&self) {
        // Clone out of the lock so observers may register others
        let observers: Vec<RouteFinishedCallback> = match self.observers.read() {
            Ok(observers) => observers.clone(),
            Err(e) => {
                warn!("[RouteTracker] Skipping route finished notification: {}", e);
                return;
            }
        };
        debug!("[RouteTracker] Notifying {} observers of finished route", observers.len());
        for observer in observers {
            observer();
        }
    }

    // ========================================================================
    // Shutdown
    // ========================================================================

    /// Close every open route at the source's last known fix.
    ///
    /// Best effort: without a last known fix nothing changes and the routes
    /// stay open until the next start event closes them. Returns how many
    /// routes were closed.
    pub fn finalize(&self) -> Result<usize, StoreError> {
        self.finalize_with(self.source.last_known_location())
    }

    /// [`finalize`](Self::finalize) with a fix the caller already fetched.
    ///
    /// The closing time is the fix's own timestamp.
    pub fn finalize_with(&self, last_known: Option<Location>) -> Result<usize, StoreError> {
        let location = match last_known {
            Some(location) => location,
            None => {
                info!("[RouteTracker] Finalize skipped: no last known location");
                return Ok(0);
            }
        };

        let open = self.store.open_routes()?;
        for route in &open {
            self.close_route(route, location, location.timestamp)?;
        }

        if !open.is_empty() {
            info!("[RouteTracker] Finalized {} open routes at shutdown", open.len());
        }
        Ok(open.len())
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Recorded fixes with `from <= timestamp <= to`, newest first.
    ///
    /// Backend failures yield an empty list.
    pub fn locations_between(&self, from: i64, to: i64) -> Vec<Location> {
        match self.source.history(from, to) {
            Ok(mut locations) => {
                locations.retain(|l| l.timestamp >= from && l.timestamp <= to);
                locations.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
                locations
            }
            Err(e) => {
                warn!("[RouteTracker] Location history query failed: {}", e);
                Vec::new()
            }
        }
    }

    /// All stored routes in insertion order.
    pub fn all_routes(&self) -> Result<Vec<Route>, StoreError> {
        self.store.all_routes()
    }

    /// The most recently created route.
    pub fn latest_route(&self) -> Result<Option<Route>, StoreError> {
        Ok(self.store.all_routes()?.pop())
    }

    /// Fixes recorded while `route` was active. Open routes run until now.
    pub fn route_track(&self, route: &Route) -> RouteTrack {
        let to = route.effective_end(self.clock.now_millis());
        let locations = self.locations_between(route.start_time, to);

        // Newest first, so the polyline is walked backwards; length is the same
        let distance_meters = geo_utils::polyline_length(&locations);

        RouteTrack {
            route_id: route.id,
            bounds: Bounds::from_locations(&locations),
            first: locations.last().copied(),
            last: locations.first().copied(),
            average_speed_mps: geo_utils::average_speed_mps(distance_meters, to - route.start_time),
            distance_meters,
            locations,
        }
    }

    /// Give a route a display name. Start, end and endpoints are untouched.
    pub fn rename_route(&self, id: RouteId, name: impl Into<String>) -> Result<Route, StoreError> {
        let route = self.store.update(id, RouteUpdate::rename(name))?;
        debug!("[RouteTracker] Renamed route {} to {:?}", id, route.name);
        Ok(route)
    }

    /// Delete every stored route.
    pub fn clear_all(&self) -> Result<usize, StoreError> {
        let removed = self.store.delete_all()?;
        info!("[RouteTracker] Cleared {} routes", removed);
        Ok(removed)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::source::SimulatedEventSource;
    use crate::store::InMemoryRouteStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Harness {
        reconciler: RouteReconciler<InMemoryRouteStore, SimulatedEventSource>,
        store: Arc<InMemoryRouteStore>,
        source: Arc<SimulatedEventSource>,
        clock: Arc<ManualClock>,
        notifications: Arc<AtomicUsize>,
    }

    fn harness_with(config: TrackerConfig) -> Harness {
        let store = Arc::new(InMemoryRouteStore::new());
        let source = Arc::new(SimulatedEventSource::new());
        let clock = Arc::new(ManualClock::new(1_000));
        let reconciler = RouteReconciler::with_clock(
            Arc::clone(&store),
            Arc::clone(&source),
            clock.clone(),
            config,
        );

        let notifications = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&notifications);
        reconciler.add_observer(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        Harness { reconciler, store, source, clock, notifications }
    }

    fn harness() -> Harness {
        harness_with(TrackerConfig::default())
    }

    fn fix(lat: f64, ts: i64) -> Location {
        Location::new(lat, -0.1278, ts)
    }

    impl Harness {
        fn start(&self, location: Location) -> HandleOutcome {
            self.clock.advance(1_000);
            self.reconciler.handle(&ActivityEvent::start(location)).unwrap()
        }

        fn end(&self, location: Location) -> HandleOutcome {
            self.clock.advance(1_000);
            self.reconciler.handle(&ActivityEvent::end(location)).unwrap()
        }

        fn open_count(&self) -> usize {
            self.store.open_routes().unwrap().len()
        }

        fn notified(&self) -> usize {
            self.notifications.load(Ordering::SeqCst)
        }
    }

    #[test]
    fn test_start_then_end() {
        let h = harness();
        let a = fix(51.50, 10);
        let b = fix(51.52, 20);

        h.start(a);
        assert_eq!(h.open_count(), 1);
        assert_eq!(h.notified(), 0);

        h.end(b);
        let routes = h.store.all_routes().unwrap();
        assert_eq!(routes.len(), 1);
        let route = &routes[0];
        assert_eq!(route.origin, a.with_event_type(crate::EventType::Start));
        assert_eq!(route.destination, Some(b.with_event_type(crate::EventType::End)));
        assert_eq!(route.start_time, 2_000);
        assert_eq!(route.end_time, Some(3_000));
        assert_eq!(h.notified(), 1);
    }

    #[test]
    fn test_double_start_orphan_closes() {
        let h = harness();
        let a = fix(51.50, 10);
        let b = fix(51.52, 20);

        h.start(a);
        let outcome = h.start(b);

        match outcome {
            HandleOutcome::Opened { route, orphan_closed } => {
                assert_eq!(orphan_closed, vec![1]);
                assert_eq!(route.origin.latitude, 51.52);
                assert!(route.is_open());
            }
            other => panic!("expected Opened, got {:?}", other),
        }

        let routes = h.store.all_routes().unwrap();
        assert_eq!(routes.len(), 2);
        assert_eq!(routes[0].destination.map(|d| d.latitude), Some(51.52));
        assert_eq!(routes[0].end_time, Some(3_000));
        assert!(routes[1].is_open());
        assert_eq!(h.notified(), 0);
    }

    #[test]
    fn test_dangling_end_notifies_without_creating() {
        let h = harness();
        let outcome = h.end(fix(51.50, 10));

        assert_eq!(outcome, HandleOutcome::DanglingEnd);
        assert!(h.store.is_empty());
        assert_eq!(h.notified(), 1);
    }

    #[test]
    fn test_dangling_end_silent_when_configured() {
        let h = harness_with(TrackerConfig {
            notify_on_dangling_end: false,
            ..TrackerConfig::default()
        });
        h.end(fix(51.50, 10));
        assert_eq!(h.notified(), 0);

        h.start(fix(51.50, 20));
        h.end(fix(51.51, 30));
        assert_eq!(h.notified(), 1);
    }

    #[test]
    fn test_duplicate_end_is_noop() {
        let h = harness();
        h.start(fix(51.50, 10));
        h.end(fix(51.51, 20));
        let before = h.store.all_routes().unwrap();

        let outcome = h.end(fix(51.52, 30));
        assert_eq!(outcome, HandleOutcome::DanglingEnd);
        assert_eq!(h.store.all_routes().unwrap(), before);
        assert_eq!(h.notified(), 2);
    }

    #[test]
    fn test_end_closes_earliest_open_route() {
        let h = harness();
        // Two open routes can only come from outside the reconciler
        h.store.add(NewRoute::new(fix(51.0, 0), 500)).unwrap();
        h.store.add(NewRoute::new(fix(52.0, 0), 100)).unwrap();

        match h.end(fix(53.0, 10)) {
            HandleOutcome::Closed { route } => assert_eq!(route.id, 2),
            other => panic!("expected Closed, got {:?}", other),
        }
        let open = h.store.open_routes().unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].id, 1);
    }

    #[test]
    fn test_end_tie_break_on_equal_start_uses_id() {
        let h = harness();
        h.store.add(NewRoute::new(fix(51.0, 0), 100)).unwrap();
        h.store.add(NewRoute::new(fix(52.0, 0), 100)).unwrap();

        match h.end(fix(53.0, 10)) {
            HandleOutcome::Closed { route } => assert_eq!(route.id, 1),
            other => panic!("expected Closed, got {:?}", other),
        }
    }

    #[test]
    fn test_start_closes_every_open_route() {
        let h = harness();
        h.store.add(NewRoute::new(fix(51.0, 0), 100)).unwrap();
        h.store.add(NewRoute::new(fix(52.0, 0), 200)).unwrap();

        match h.start(fix(53.0, 10)) {
            HandleOutcome::Opened { orphan_closed, .. } => assert_eq!(orphan_closed, vec![1, 2]),
            other => panic!("expected Opened, got {:?}", other),
        }
        assert_eq!(h.open_count(), 1);
    }

    #[test]
    fn test_at_most_one_open_route_after_any_sequence() {
        let h = harness();
        // Deterministic pseudo-random start/end pattern
        let mut seed: u32 = 0x2545_f491;
        for i in 0..500 {
            seed ^= seed << 13;
            seed ^= seed >> 17;
            seed ^= seed << 5;
            let location = fix(51.0 + (i as f64) * 1e-4, i);
            if seed % 3 == 0 {
                h.end(location);
            } else {
                h.start(location);
            }
            assert!(h.open_count() <= 1, "step {}: {} open routes", i, h.open_count());
        }

        for route in h.store.all_routes().unwrap() {
            if let Some(end) = route.end_time {
                assert!(route.start_time <= end);
            }
        }
    }

    #[test]
    fn test_finalize_closes_open_route() {
        let h = harness();
        h.start(fix(51.50, 10));
        let last = fix(51.60, 50_000);
        h.source.set_last_known_location(Some(last));

        assert_eq!(h.reconciler.finalize().unwrap(), 1);
        let route = &h.store.all_routes().unwrap()[0];
        assert_eq!(route.destination, Some(last));
        assert_eq!(route.end_time, Some(50_000));

        // Nothing left to close
        assert_eq!(h.reconciler.finalize().unwrap(), 0);
        assert_eq!(h.store.all_routes().unwrap()[0].end_time, Some(50_000));
    }

    #[test]
    fn test_finalize_without_location_is_noop() {
        let h = harness();
        h.start(fix(51.50, 10));
        h.source.set_last_known_location(None);

        assert_eq!(h.reconciler.finalize().unwrap(), 0);
        assert_eq!(h.open_count(), 1);
    }

    #[test]
    fn test_finalize_clamps_stale_fix_to_start() {
        let h = harness();
        h.start(fix(51.50, 10));

        // Fix taken long before the route was opened at t=2000
        h.reconciler.finalize_with(Some(fix(51.60, 5))).unwrap();
        let route = &h.store.all_routes().unwrap()[0];
        assert_eq!(route.end_time, Some(route.start_time));
    }

    #[test]
    fn test_finalize_without_clamp_keeps_fix_time() {
        let h = harness_with(TrackerConfig {
            clamp_end_to_start: false,
            ..TrackerConfig::default()
        });
        h.start(fix(51.50, 10));
        h.reconciler.finalize_with(Some(fix(51.60, 5))).unwrap();
        assert_eq!(h.store.all_routes().unwrap()[0].end_time, Some(5));
    }

    #[test]
    fn test_locations_between() {
        let h = harness();
        for ts in [100, 300, 200, 400] {
            h.source.record_location(fix(51.5, ts));
        }

        let stamps: Vec<i64> = h
            .reconciler
            .locations_between(150, 400)
            .iter()
            .map(|l| l.timestamp)
            .collect();
        assert_eq!(stamps, vec![400, 300, 200]);

        h.source.set_unavailable(true);
        assert!(h.reconciler.locations_between(0, 1_000).is_empty());
    }

    #[test]
    fn test_route_track_of_open_route_runs_until_now() {
        let h = harness();
        h.source.record_location(fix(51.500, 2_000));
        h.start(fix(51.500, 2_000));
        h.source.record_location(fix(51.505, 2_500));
        h.clock.set(10_000);
        h.source.record_location(fix(51.510, 9_000));
        h.source.record_location(fix(51.999, 20_000)); // after "now"

        let route = h.reconciler.latest_route().unwrap().unwrap();
        let track = h.reconciler.route_track(&route);

        assert_eq!(track.route_id, route.id);
        assert_eq!(track.locations.len(), 3);
        assert_eq!(track.first.map(|l| l.timestamp), Some(2_000));
        assert_eq!(track.last.map(|l| l.timestamp), Some(9_000));
        assert!(track.distance_meters > 1_000.0);
        assert_eq!(track.bounds.map(|b| b.max_lat), Some(51.510));
        // Route opened at 2000 and is still running at 10000
        let speed = track.average_speed_mps.unwrap();
        assert!((speed - track.distance_meters / 8.0).abs() < 1e-9);
    }

    #[test]
    fn test_poisoned_observer_list_does_not_block_events() {
        let h = harness();
        std::thread::scope(|scope| {
            let _ = scope
                .spawn(|| {
                    let _guard = h.reconciler.observers.write().unwrap();
                    panic!("observer registration crashed");
                })
                .join();
        });

        // Registration is refused and events are still applied
        h.reconciler.add_observer(Arc::new(|| {}));
        h.start(fix(51.50, 10));
        assert!(matches!(h.end(fix(51.51, 20)), HandleOutcome::Closed { .. }));
        assert_eq!(h.notified(), 0);
    }

    #[test]
    fn test_rename_route() {
        let h = harness();
        h.start(fix(51.50, 10));

        let renamed = h.reconciler.rename_route(1, "Morning commute").unwrap();
        assert_eq!(renamed.name, "Morning commute");
        assert!(renamed.is_open());
        assert_eq!(
            h.reconciler.rename_route(7, "missing").unwrap_err(),
            StoreError::NotFound(7)
        );
    }

    #[test]
    fn test_stored_fix_tag_follows_event_kind() {
        let h = harness();
        h.start(fix(51.50, 10));

        // End event carrying a start-tagged fix, as a host app might send it
        let event = ActivityEvent {
            location: fix(51.51, 20).with_event_type(crate::EventType::Start),
            is_start: false,
        };
        h.reconciler.handle(&event).unwrap();

        let route = &h.store.all_routes().unwrap()[0];
        assert_eq!(route.destination.map(|d| d.event_type), Some(crate::EventType::End));
    }

    #[test]
    fn test_latest_route_and_clear_all() {
        let h = harness();
        assert!(h.reconciler.latest_route().unwrap().is_none());

        h.start(fix(51.50, 10));
        h.end(fix(51.51, 20));
        h.start(fix(51.52, 30));
        assert_eq!(h.reconciler.latest_route().unwrap().map(|r| r.id), Some(2));

        assert_eq!(h.reconciler.clear_all().unwrap(), 2);
        assert!(h.reconciler.all_routes().unwrap().is_empty());
    }

    struct FailingStore;

    impl RouteStore for FailingStore {
        fn add(&self, _route: NewRoute) -> Result<Route, StoreError> {
            Err(StoreError::WriteFailed("disk full".to_string()))
        }
        fn update(&self, _id: RouteId, _update: RouteUpdate) -> Result<Route, StoreError> {
            Err(StoreError::WriteFailed("disk full".to_string()))
        }
        fn start_route(
            &self,
            _route: NewRoute,
            _closes: Vec<(RouteId, RouteUpdate)>,
        ) -> Result<(Route, Vec<Route>), StoreError> {
            Err(StoreError::WriteFailed("disk full".to_string()))
        }
        fn get(&self, _id: RouteId) -> Result<Option<Route>, StoreError> {
            Ok(None)
        }
        fn open_routes(&self) -> Result<Vec<Route>, StoreError> {
            Ok(Vec::new())
        }
        fn all_routes(&self) -> Result<Vec<Route>, StoreError> {
            Ok(Vec::new())
        }
        fn delete_all(&self) -> Result<usize, StoreError> {
            Ok(0)
        }
    }

    #[test]
    fn test_store_write_failure_is_returned() {
        let reconciler = RouteReconciler::new(
            Arc::new(FailingStore),
            Arc::new(SimulatedEventSource::new()),
        );
        let err = reconciler
            .handle(&ActivityEvent::start(fix(51.5, 10)))
            .unwrap_err();
        assert!(matches!(err, StoreError::WriteFailed(_)));

        // The default routes_overlapping goes through all_routes
        assert!(reconciler.store().routes_overlapping(0, 10).unwrap().is_empty());
    }

    /// Store that can still update existing routes but can no longer add any.
    struct NoInsertStore {
        inner: InMemoryRouteStore,
    }

    impl RouteStore for NoInsertStore {
        fn add(&self, _route: NewRoute) -> Result<Route, StoreError> {
            Err(StoreError::WriteFailed("quota exceeded".to_string()))
        }
        fn update(&self, id: RouteId, update: RouteUpdate) -> Result<Route, StoreError> {
            self.inner.update(id, update)
        }
        fn start_route(
            &self,
            _route: NewRoute,
            _closes: Vec<(RouteId, RouteUpdate)>,
        ) -> Result<(Route, Vec<Route>), StoreError> {
            Err(StoreError::WriteFailed("quota exceeded".to_string()))
        }
        fn get(&self, id: RouteId) -> Result<Option<Route>, StoreError> {
            self.inner.get(id)
        }
        fn open_routes(&self) -> Result<Vec<Route>, StoreError> {
            self.inner.open_routes()
        }
        fn all_routes(&self) -> Result<Vec<Route>, StoreError> {
            self.inner.all_routes()
        }
        fn delete_all(&self) -> Result<usize, StoreError> {
            self.inner.delete_all()
        }
    }

    #[test]
    fn test_rejected_start_leaves_open_route_untouched() {
        let inner = InMemoryRouteStore::new();
        inner.add(NewRoute::new(fix(51.50, 10), 100)).unwrap();
        let store = Arc::new(NoInsertStore { inner });
        let reconciler = RouteReconciler::new(Arc::clone(&store), Arc::new(SimulatedEventSource::new()));

        let err = reconciler
            .handle(&ActivityEvent::start(fix(52.0, 20)))
            .unwrap_err();
        assert!(matches!(err, StoreError::WriteFailed(_)));

        let routes = store.all_routes().unwrap();
        assert_eq!(routes.len(), 1);
        assert!(routes[0].is_open());
        assert_eq!(routes[0].destination, None);
    }
}
