//! Store engine - owns the persistent store and its open lifecycle.

use crate::error::{StoreError, StoreOpenError, StoreResult};
use crate::handle::StoreHandle;
use crate::migrations;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Where the store lives.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreLocation {
    /// A private in-memory database, gone when the process exits.
    #[default]
    InMemory,
    /// A database file; parent directories are created on open.
    Path(PathBuf),
}

impl StoreLocation {
    fn open_connection(&self) -> StoreResult<Connection> {
        match self {
            Self::InMemory => Ok(Connection::open_in_memory()?),
            Self::Path(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent)?;
                }
                Ok(Connection::open(path)?)
            }
        }
    }
}

type OpenWaiter = oneshot::Sender<Result<StoreHandle, StoreOpenError>>;

enum OpenState {
    Closed,
    Opening(Vec<OpenWaiter>),
    Open(StoreHandle),
    Failed(StoreOpenError),
}

struct EngineInner {
    location: StoreLocation,
    state: Mutex<OpenState>,
    opens: AtomicUsize,
}

/// Opens the persistent store exactly once and shares the result.
///
/// - While open, [`open`](Self::open) returns the existing handle.
/// - While an open is in flight, callers queue on it; no second open starts.
/// - After a failure the engine stays failed. Calling `open` again is an
///   explicit retry by the caller, typically after
///   [`destroy_storage`](Self::destroy_storage).
#[derive(Clone)]
pub struct StoreEngine {
    inner: Arc<EngineInner>,
}

impl StoreEngine {
    /// Creates an engine for the given location. Does not touch storage.
    pub fn new(location: StoreLocation) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                location,
                state: Mutex::new(OpenState::Closed),
                opens: AtomicUsize::new(0),
            }),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, OpenState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn location(&self) -> &StoreLocation {
        &self.inner.location
    }

    /// Number of physical open attempts performed so far.
    pub fn open_count(&self) -> usize {
        self.inner.opens.load(Ordering::SeqCst)
    }

    pub fn is_open(&self) -> bool {
        matches!(*self.lock_state(), OpenState::Open(_))
    }

    /// The error of the last failed open, if the engine is failed.
    pub fn last_error(&self) -> Option<StoreOpenError> {
        match &*self.lock_state() {
            OpenState::Failed(err) => Some(err.clone()),
            _ => None,
        }
    }

    /// The open handle, without waiting.
    pub fn handle(&self) -> Option<StoreHandle> {
        match &*self.lock_state() {
            OpenState::Open(handle) => Some(handle.clone()),
            _ => None,
        }
    }

    /// Opens the store, or joins an open already in progress.
    ///
    /// The work runs on the blocking pool; the open completes even if the
    /// returned future is dropped. Must be called within a Tokio runtime.
    pub async fn open(&self) -> Result<StoreHandle, StoreOpenError> {
        let (waiter, rx) = oneshot::channel();
        {
            let mut state = self.lock_state();
            match &mut *state {
                OpenState::Open(handle) => return Ok(handle.clone()),
                OpenState::Opening(waiters) => {
                    debug!("store open in progress; queueing caller");
                    waiters.push(waiter);
                }
                OpenState::Closed | OpenState::Failed(_) => {
                    *state = OpenState::Opening(vec![waiter]);
                    self.spawn_open();
                }
            }
        }

        rx.await.unwrap_or_else(|_| {
            Err(StoreOpenError::Unavailable(
                "store open ended without a result".to_string(),
            ))
        })
    }

    fn spawn_open(&self) {
        let engine = self.clone();
        let attempt = self.inner.opens.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::spawn(async move {
            let location = engine.inner.location.clone();
            info!(?location, attempt, "opening store");
            let result = match tokio::task::spawn_blocking(move || open_blocking(location)).await {
                Ok(Ok(handle)) => Ok(handle),
                Ok(Err(e)) => Err(StoreOpenError::from(e)),
                Err(join) => Err(StoreOpenError::Unavailable(format!(
                    "store open task failed: {join}"
                ))),
            };
            engine.finish_open(result);
        });
    }

    fn finish_open(&self, result: Result<StoreHandle, StoreOpenError>) {
        let waiters = {
            let mut state = self.lock_state();
            let next = match &result {
                Ok(handle) => OpenState::Open(handle.clone()),
                Err(err) => OpenState::Failed(err.clone()),
            };
            match std::mem::replace(&mut *state, next) {
                OpenState::Opening(waiters) => waiters,
                _ => Vec::new(),
            }
        };

        match &result {
            Ok(_) => info!(waiters = waiters.len(), "store opened"),
            Err(err) => error!(waiters = waiters.len(), error = %err, "store open failed"),
        }
        for waiter in waiters {
            let _ = waiter.send(result.clone());
        }
    }

    /// Removes the on-disk store files so a later `open` starts fresh.
    ///
    /// Only allowed while the engine is closed or failed.
    pub fn destroy_storage(&self) -> StoreResult<()> {
        let mut state = self.lock_state();
        match &*state {
            OpenState::Open(_) => return Err(StoreError::InUse("store is open".into())),
            OpenState::Opening(_) => return Err(StoreError::InUse("store is opening".into())),
            OpenState::Closed | OpenState::Failed(_) => {}
        }
        if let StoreLocation::Path(path) = &self.inner.location {
            for file in store_files(path) {
                match std::fs::remove_file(&file) {
                    Ok(()) => warn!(file = %file.display(), "removed store file"),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }
        *state = OpenState::Closed;
        Ok(())
    }
}

/// Connection settings applied before the schema is touched.
pub(crate) fn configure(conn: &Connection) -> StoreResult<()> {
    conn.pragma_update(None, "foreign_keys", true)?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    Ok(())
}

fn open_blocking(location: StoreLocation) -> StoreResult<StoreHandle> {
    let mut conn = location.open_connection()?;
    configure(&conn)?;
    migrations::migrate(&mut conn)?;
    Ok(StoreHandle::from_connection(conn, location))
}

fn store_files(path: &Path) -> Vec<PathBuf> {
    let mut files = vec![path.to_path_buf()];
    for suffix in ["-wal", "-shm", "-journal"] {
        let mut name = path.as_os_str().to_owned();
        name.push(suffix);
        files.push(PathBuf::from(name));
    }
    files
}

impl std::fmt::Debug for StoreEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &*self.lock_state() {
            OpenState::Closed => "closed",
            OpenState::Opening(_) => "opening",
            OpenState::Open(_) => "open",
            OpenState::Failed(_) => "failed",
        };
        f.debug_struct("StoreEngine")
            .field("location", &self.inner.location)
            .field("state", &state)
            .finish()
    }
}
