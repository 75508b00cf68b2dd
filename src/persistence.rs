//! # JSON File Route Store
//!
//! Route store that survives app restarts by writing a JSON snapshot after
//! every committed change.
//!
//! Each mutating call builds the next state on a copy, writes it to
//! `<path>.tmp`, renames that over `<path>`, and only then swaps it in. A
//! failed write returns [`StoreError::WriteFailed`] and leaves both the file
//! and the in-memory state as they were. The write lock is held across the
//! flush so readers never observe uncommitted routes.
//!
//! Routes still open when the file is loaded are expected: the previous
//! process may have been killed before it could finalize them. The next
//! start event closes them.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::store::{RouteStore, RouteUpdate, StoreError, StoreState};
use crate::{NewRoute, Route, RouteId};

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Snapshot {
    version: u32,
    next_id: RouteId,
    routes: Vec<Route>,
}

/// Route store persisted to a single JSON file.
#[derive(Debug)]
pub struct FileRouteStore {
    path: PathBuf,
    state: RwLock<StoreState>,
}

impl FileRouteStore {
    /// Open the store at `path`. A missing file yields an empty store; an
    /// unreadable or corrupt file is an error.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();

        let state = if path.exists() {
            let bytes = fs::read(&path)
                .map_err(|e| StoreError::ReadFailed(format!("{}: {}", path.display(), e)))?;
            let snapshot: Snapshot = serde_json::from_slice(&bytes)
                .map_err(|e| StoreError::ReadFailed(format!("{}: {}", path.display(), e)))?;
            if snapshot.version != SNAPSHOT_VERSION {
                return Err(StoreError::ReadFailed(format!(
                    "{}: unsupported snapshot version {}",
                    path.display(),
                    snapshot.version
                )));
            }

            let mut state = StoreState::from_routes(snapshot.routes);
            state.next_id = state.next_id.max(snapshot.next_id);
            let open = state.routes.iter().filter(|r| r.is_open()).count();
            info!(
                "[RouteStore] Loaded {} routes ({} open) from {}",
                state.routes.len(),
                open,
                path.display()
            );
            state
        } else {
            debug!("[RouteStore] No snapshot at {}, starting empty", path.display());
            StoreState::default()
        };

        Ok(Self {
            path,
            state: RwLock::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `mutate` on a copy of the state, persist it, then commit.
    fn transact<T>(
        &self,
        mutate: impl FnOnce(&mut StoreState) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut state = self
            .state
            .write()
            .map_err(|e| StoreError::WriteFailed(format!("lock poisoned: {}", e)))?;

        let mut next = state.clone();
        let result = mutate(&mut next)?;
        self.flush(&next)?;
        *state = next;
        Ok(result)
    }

    fn flush(&self, state: &StoreState) -> Result<(), StoreError> {
        let snapshot = Snapshot {
            version: SNAPSHOT_VERSION,
            next_id: state.next_id,
            routes: state.routes.clone(),
        };
        let bytes = serde_json::to_vec_pretty(&snapshot)
            .map_err(|e| StoreError::WriteFailed(format!("serialize: {}", e)))?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        fs::write(&tmp, &bytes).map_err(|e| {
            warn!("[RouteStore] Failed to write {}: {}", tmp.display(), e);
            StoreError::WriteFailed(format!("{}: {}", tmp.display(), e))
        })?;
        fs::rename(&tmp, &self.path).map_err(|e| {
            warn!("[RouteStore] Failed to replace {}: {}", self.path.display(), e);
            StoreError::WriteFailed(format!("{}: {}", self.path.display(), e))
        })?;

        debug!("[RouteStore] Flushed {} routes ({} bytes)", state.routes.len(), bytes.len());
        Ok(())
    }

    fn read<T>(&self, f: impl FnOnce(&StoreState) -> T) -> Result<T, StoreError> {
        let state = self
            .state
            .read()
            .map_err(|e| StoreError::ReadFailed(format!("lock poisoned: {}", e)))?;
        Ok(f(&state))
    }
}

impl RouteStore for FileRouteStore {
    fn add(&self, route: NewRoute) -> Result<Route, StoreError> {
        self.transact(|state| Ok(state.insert(route)))
    }

    fn update(&self, id: RouteId, update: RouteUpdate) -> Result<Route, StoreError> {
        self.transact(|state| state.update(id, update))
    }

    fn start_route(
        &self,
        route: NewRoute,
        closes: Vec<(RouteId, RouteUpdate)>,
    ) -> Result<(Route, Vec<Route>), StoreError> {
        self.transact(|state| state.start_route(route, closes))
    }

    fn get(&self, id: RouteId) -> Result<Option<Route>, StoreError> {
        self.read(|state| state.routes.iter().find(|r| r.id == id).cloned())
    }

    fn open_routes(&self) -> Result<Vec<Route>, StoreError> {
        self.read(|state| state.routes.iter().filter(|r| r.is_open()).cloned().collect())
    }

    fn all_routes(&self) -> Result<Vec<Route>, StoreError> {
        self.read(|state| state.routes.clone())
    }

    fn delete_all(&self) -> Result<usize, StoreError> {
        self.transact(|state| {
            let removed = state.routes.len();
            state.routes.clear();
            Ok(removed)
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
