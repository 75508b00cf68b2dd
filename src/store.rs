//! Route storage.
//!
//! [`RouteStore`] is the contract the reconciler writes through. Every method
//! is one transaction: a store either applies all fields of a call or none,
//! and readers never observe a half-updated route.
//!
//! [`InMemoryRouteStore`] keeps routes in insertion order behind a `RwLock`.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use log::{debug, warn};
use thiserror::Error;

use crate::{Location, NewRoute, Route, RouteId};

/// Errors raised by a route store.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    /// The write transaction did not commit. The store is unchanged.
    #[error("route store write failed: {0}")]
    WriteFailed(String),

    #[error("route store read failed: {0}")]
    ReadFailed(String),

    #[error("route {0} not found")]
    NotFound(RouteId),
}

/// Field-level update of a stored route. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RouteUpdate {
    pub destination: Option<Location>,
    pub end_time: Option<i64>,
    pub name: Option<String>,
}

impl RouteUpdate {
    /// Close a route: destination and end time are written together.
    pub fn close(destination: Location, end_time: i64) -> Self {
        Self {
            destination: Some(destination),
            end_time: Some(end_time),
            name: None,
        }
    }

    pub fn rename(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub(crate) fn apply(self, route: &mut Route) {
        if let Some(destination) = self.destination {
            route.destination = Some(destination);
        }
        if let Some(end_time) = self.end_time {
            route.end_time = Some(end_time);
        }
        if let Some(name) = self.name {
            route.name = name;
        }
    }
}

/// A mutable collection of routes keyed by store-assigned id.
pub trait RouteStore: Send + Sync {
    /// Store a new route and return it with its assigned id.
    fn add(&self, route: NewRoute) -> Result<Route, StoreError>;

    /// Apply an update to an existing route and return the updated route.
    fn update(&self, id: RouteId, update: RouteUpdate) -> Result<Route, StoreError>;

    /// Apply `closes` to existing routes and store `route`, all in one
    /// transaction. Returns the new route followed by the closed ones. If
    /// any id is unknown or the write fails, nothing changes.
    fn start_route(
        &self,
        route: NewRoute,
        closes: Vec<(RouteId, RouteUpdate)>,
    ) -> Result<(Route, Vec<Route>), StoreError>;

    fn get(&self, id: RouteId) -> Result<Option<Route>, StoreError>;

    /// Routes whose end time is absent, in insertion order.
    fn open_routes(&self) -> Result<Vec<Route>, StoreError>;

    /// All routes, in insertion order.
    fn all_routes(&self) -> Result<Vec<Route>, StoreError>;

    /// Routes whose `[start_time, end_time]` interval intersects `[from, to]`.
    /// Open routes extend to infinity.
    fn routes_overlapping(&self, from: i64, to: i64) -> Result<Vec<Route>, StoreError> {
        Ok(self
            .all_routes()?
            .into_iter()
            .filter(|r| r.overlaps(from, to))
            .collect())
    }

    /// Delete every route and return how many were removed.
    fn delete_all(&self) -> Result<usize, StoreError>;
}

// ============================================================================
// In-memory store
// ============================================================================

#[derive(Debug, Clone, Default)]
pub(crate) struct StoreState {
    pub(crate) next_id: RouteId,
    pub(crate) routes: Vec<Route>,
}

impl StoreState {
    pub(crate) fn from_routes(routes: Vec<Route>) -> Self {
        let next_id = routes.iter().map(|r| r.id).max().unwrap_or(0);
        Self { next_id, routes }
    }

    pub(crate) fn insert(&mut self, route: NewRoute) -> Route {
        self.next_id += 1;
        let stored = Route {
            id: self.next_id,
            name: route.name,
            origin: route.origin,
            destination: None,
            start_time: route.start_time,
            end_time: None,
        };
        self.routes.push(stored.clone());
        stored
    }

    pub(crate) fn update(&mut self, id: RouteId, update: RouteUpdate) -> Result<Route, StoreError> {
        let route = self
            .routes
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(StoreError::NotFound(id))?;
        update.apply(route);
        Ok(route.clone())
    }

    /// Checks every id before touching anything, so a `NotFound` leaves the
    /// state as it was.
    pub(crate) fn start_route(
        &mut self,
        route: NewRoute,
        closes: Vec<(RouteId, RouteUpdate)>,
    ) -> Result<(Route, Vec<Route>), StoreError> {
        if let Some(&(id, _)) = closes
            .iter()
            .find(|(id, _)| !self.routes.iter().any(|r| r.id == *id))
        {
            return Err(StoreError::NotFound(id));
        }

        let mut closed = Vec::with_capacity(closes.len());
        for (id, update) in closes {
            closed.push(self.update(id, update)?);
        }
        Ok((self.insert(route), closed))
    }
}

/// Thread-safe in-memory route store.
#[derive(Debug, Default)]
pub struct InMemoryRouteStore {
    state: RwLock<StoreState>,
}

impl InMemoryRouteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with routes, e.g. restored from disk.
    /// New ids continue after the largest existing id.
    pub fn with_routes(routes: Vec<Route>) -> Self {
        Self {
            state: RwLock::new(StoreState::from_routes(routes)),
        }
    }

    /// Number of stored routes. Reports 0 if the lock is poisoned.
    pub fn len(&self) -> usize {
        match self.read() {
            Ok(state) => state.routes.len(),
            Err(e) => {
                warn!("[RouteStore] {}", e);
                0
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert a route with explicit fields, bypassing the reconciler.
    #[cfg(test)]
    pub(crate) fn insert_raw(&self, route: NewRoute, end: Option<(Location, i64)>) -> Result<Route, StoreError> {
        let mut state = self.write()?;
        let stored = state.insert(route);
        match end {
            Some((destination, end_time)) => {
                state.update(stored.id, RouteUpdate::close(destination, end_time))
            }
            None => Ok(stored),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, StoreState>, StoreError> {
        self.state
            .read()
            .map_err(|e| StoreError::ReadFailed(format!("lock poisoned: {}", e)))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, StoreState>, StoreError> {
        self.state
            .write()
            .map_err(|e| StoreError::WriteFailed(format!("lock poisoned: {}", e)))
    }
}

impl RouteStore for InMemoryRouteStore {
    fn add(&self, route: NewRoute) -> Result<Route, StoreError> {
        let stored = self.write()?.insert(route);
        debug!("[RouteStore] Added route {} starting at {}", stored.id, stored.start_time);
        Ok(stored)
    }

    fn update(&self, id: RouteId, update: RouteUpdate) -> Result<Route, StoreError> {
        let updated = self.write()?.update(id, update)?;
        debug!("[RouteStore] Updated route {} (open: {})", id, updated.is_open());
        Ok(updated)
    }

    fn start_route(
        &self,
        route: NewRoute,
        closes: Vec<(RouteId, RouteUpdate)>,
    ) -> Result<(Route, Vec<Route>), StoreError> {
        let (stored, closed) = self.write()?.start_route(route, closes)?;
        debug!(
            "[RouteStore] Added route {} starting at {}, closed {} open routes",
            stored.id,
            stored.start_time,
            closed.len()
        );
        Ok((stored, closed))
    }

    fn get(&self, id: RouteId) -> Result<Option<Route>, StoreError> {
        Ok(self.read()?.routes.iter().find(|r| r.id == id).cloned())
    }

    fn open_routes(&self) -> Result<Vec<Route>, StoreError> {
        Ok(self
            .read()?
            .routes
            .iter()
            .filter(|r| r.is_open())
            .cloned()
            .collect())
    }

    fn all_routes(&self) -> Result<Vec<Route>, StoreError> {
        Ok(self.read()?.routes.clone())
    }

    fn routes_overlapping(&self, from: i64, to: i64) -> Result<Vec<Route>, StoreError> {
        Ok(self
            .read()?
            .routes
            .iter()
            .filter(|r| r.overlaps(from, to))
            .cloned()
            .collect())
    }

    fn delete_all(&self) -> Result<usize, StoreError> {
        let mut state = self.write()?;
        let removed = state.routes.len();
        state.routes.clear();
        debug!("[RouteStore] Deleted {} routes", removed);
        Ok(removed)
    }
}

// ============================================================================
// Tests
// ============================================================================
