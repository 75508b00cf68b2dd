//! # Ride Tracker
//!
//! Route tracking core for a mobile ride-detection app.
//!
//! An activity-detection SDK emits discrete "ride started" / "ride ended"
//! events, each carrying a GPS fix. This library turns that stream into a
//! consistent set of stored routes, tolerating duplicate or out-of-order
//! events, and closes whatever is still open when the app shuts down.
//!
//! This library provides:
//! - The [`RouteReconciler`] state machine that applies events to a route store
//! - The [`RouteStore`] and [`EventSource`] contracts it depends on
//! - An in-memory store, a simulated event source and a JSON file store
//! - An async single-writer event loop and mobile FFI bindings
//!
//! ## Features
//!
//! - **`runtime`** - Enable the tokio based [`tracker::RouteTracker`] event loop
//! - **`serde`** - Enable serde derives on the data model
//! - **`persistence`** - Enable the JSON file backed route store
//! - **`ffi`** - Enable FFI bindings for mobile platforms (iOS/Android)
//! - **`full`** - Enable all features
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use ride_tracker::{
//!     ActivityEvent, InMemoryRouteStore, Location, RouteReconciler, SimulatedEventSource,
//! };
//!
//! let store = Arc::new(InMemoryRouteStore::new());
//! let source = Arc::new(SimulatedEventSource::new());
//! let reconciler = RouteReconciler::new(store.clone(), source);
//!
//! reconciler.handle(&ActivityEvent::start(Location::new(51.5074, -0.1278, 1_000))).unwrap();
//! reconciler.handle(&ActivityEvent::end(Location::new(51.5155, -0.1410, 900_000))).unwrap();
//!
//! let routes = reconciler.all_routes().unwrap();
//! assert_eq!(routes.len(), 1);
//! assert!(!routes[0].is_open());
//! ```

use std::fmt;

pub mod clock;
pub use clock::{Clock, ManualClock, SystemClock};

pub mod config;
pub use config::TrackerConfig;

pub mod geo_utils;

pub mod store;
pub use store::{InMemoryRouteStore, RouteStore, RouteUpdate, StoreError};

pub mod source;
pub use source::{EventCallback, EventSource, SimulatedEventSource, SourceError, SubscriptionId};

pub mod reconciler;
pub use reconciler::{HandleOutcome, RouteFinishedCallback, RouteReconciler, RouteTrack};

// JSON snapshot store
#[cfg(feature = "persistence")]
pub mod persistence;

#[cfg(feature = "persistence")]
pub use persistence::FileRouteStore;

// Async single-writer event loop
#[cfg(feature = "runtime")]
pub mod tracker;

#[cfg(feature = "runtime")]
pub use tracker::RouteTracker;

#[cfg(feature = "ffi")]
pub mod ffi;

#[cfg(feature = "ffi")]
uniffi::setup_scaffolding!();

/// Initialize logging for Android (only used in FFI)
#[cfg(all(feature = "ffi", target_os = "android"))]
pub(crate) fn init_logging() {
    use android_logger::Config;
    use log::LevelFilter;

    android_logger::init_once(
        Config::default()
            .with_max_level(LevelFilter::Debug)
            .with_tag("RideTrackerRust")
    );
}

#[cfg(all(feature = "ffi", not(target_os = "android")))]
pub(crate) fn init_logging() {
    // No-op on non-Android platforms
}

// ============================================================================
// Core Types
// ============================================================================

/// Whether a location was captured at the start or the end of a ride.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum EventType {
    Start,
    End,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventType::Start => write!(f, "start"),
            EventType::End => write!(f, "end"),
        }
    }
}

/// A GPS fix reported by the event source.
///
/// Immutable once created; routes copy it into their endpoints.
///
/// # Example
/// ```
/// use ride_tracker::Location;
/// let fix = Location::new(51.5074, -0.1278, 1_700_000_000_000); // London
/// assert!(fix.is_valid());
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    /// Milliseconds since the Unix epoch (UTC)
    pub timestamp: i64,
    pub event_type: EventType,
}

impl Location {
    /// Create a plain GPS fix. The event type defaults to `Start`; use
    /// [`Location::with_event_type`] when the fix belongs to an end event.
    pub fn new(latitude: f64, longitude: f64, timestamp: i64) -> Self {
        Self {
            latitude,
            longitude,
            timestamp,
            event_type: EventType::Start,
        }
    }

    pub fn with_event_type(mut self, event_type: EventType) -> Self {
        self.event_type = event_type;
        self
    }

    /// Check if the fix has valid coordinates.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude >= -90.0
            && self.latitude <= 90.0
            && self.longitude >= -180.0
            && self.longitude <= 180.0
    }
}

/// A start or end signal from the activity-detection SDK.
///
/// Ephemeral: consumed exactly once by the reconciler, never stored.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct ActivityEvent {
    pub location: Location,
    pub is_start: bool,
}

impl ActivityEvent {
    /// A "ride started" event at the given fix.
    pub fn start(location: Location) -> Self {
        Self {
            location: location.with_event_type(EventType::Start),
            is_start: true,
        }
    }

    /// A "ride ended" event at the given fix.
    pub fn end(location: Location) -> Self {
        Self {
            location: location.with_event_type(EventType::End),
            is_start: false,
        }
    }

    pub fn event_type(&self) -> EventType {
        if self.is_start {
            EventType::Start
        } else {
            EventType::End
        }
    }
}

/// Store-assigned route identity. Ids grow with insertion order.
pub type RouteId = u64;

/// A route that has not been stored yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRoute {
    pub origin: Location,
    /// Milliseconds since the Unix epoch
    pub start_time: i64,
    pub name: String,
}

impl NewRoute {
    pub fn new(origin: Location, start_time: i64) -> Self {
        Self {
            origin,
            start_time,
            name: String::new(),
        }
    }
}

/// One closed or currently-open ride interval.
///
/// A route is open while `end_time` is `None`. `destination` and `end_time`
/// are set together, exactly once, when the route closes.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct Route {
    pub id: RouteId,
    /// User-facing label (empty unless the app sets one)
    pub name: String,
    pub origin: Location,
    pub destination: Option<Location>,
    /// Milliseconds since the Unix epoch
    pub start_time: i64,
    /// Milliseconds since the Unix epoch, `None` while the route is open
    pub end_time: Option<i64>,
}

impl Route {
    pub fn is_open(&self) -> bool {
        self.end_time.is_none()
    }

    /// End time for display: open routes are "ongoing" and end at `now`.
    pub fn effective_end(&self, now: i64) -> i64 {
        self.end_time.unwrap_or(now)
    }

    /// Duration in milliseconds, `None` while the route is open.
    pub fn duration_ms(&self) -> Option<i64> {
        self.end_time.map(|end| end - self.start_time)
    }

    /// Great-circle distance from origin to destination in meters.
    ///
    /// Returns `None` while the route is open or if either endpoint is invalid.
    pub fn straight_line_distance(&self) -> Option<f64> {
        let destination = self.destination.as_ref()?;
        if !self.origin.is_valid() || !destination.is_valid() {
            return None;
        }
        Some(geo_utils::haversine_distance(&self.origin, destination))
    }

    /// Whether `[start_time, end_time or +inf]` intersects `[from, to]`.
    pub fn overlaps(&self, from: i64, to: i64) -> bool {
        let end = self.end_time.unwrap_or(i64::MAX);
        self.start_time <= to && end >= from
    }
}

/// Bounding box of a set of fixes, used to fit the map viewport.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Bounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl Bounds {
    /// Create bounds from fixes. Returns `None` for an empty slice.
    pub fn from_locations(locations: &[Location]) -> Option<Self> {
        if locations.is_empty() {
            return None;
        }
        let mut min_lat = f64::MAX;
        let mut max_lat = f64::MIN;
        let mut min_lng = f64::MAX;
        let mut max_lng = f64::MIN;

        for l in locations {
            min_lat = min_lat.min(l.latitude);
            max_lat = max_lat.max(l.latitude);
            min_lng = min_lng.min(l.longitude);
            max_lng = max_lng.max(l.longitude);
        }

        Some(Self { min_lat, max_lat, min_lng, max_lng })
    }

    /// Get the center point of the bounds as `(latitude, longitude)`.
    pub fn center(&self) -> (f64, f64) {
        (
            (self.min_lat + self.max_lat) / 2.0,
            (self.min_lng + self.max_lng) / 2.0,
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
