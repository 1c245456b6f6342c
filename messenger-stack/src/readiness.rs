//! Readiness gate - the data stack's lifecycle state machine.

use messenger_store::StoreOpenError;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Lifecycle state of a data stack.
///
/// `Uninitialized -> Initializing -> Ready`, or `-> Failed`. Both `Ready`
/// and `Failed` are terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackState {
    /// Created, startup not begun.
    Uninitialized,
    /// Opening the store and wiring the write path.
    Initializing,
    /// Store open; contexts and sync available.
    Ready,
    /// Startup failed.
    Failed(StoreOpenError),
}

impl StackState {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ready | Self::Failed(_))
    }
}

impl fmt::Display for StackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "uninitialized"),
            Self::Initializing => write!(f, "initializing"),
            Self::Ready => write!(f, "ready"),
            Self::Failed(err) => write!(f, "failed ({err})"),
        }
    }
}

type ReadyObserver = Box<dyn FnOnce() + Send>;

struct GateInner {
    state: StackState,
    observers: Vec<ReadyObserver>,
}

/// Guards the data stack's lifecycle and announces readiness exactly once.
///
/// The state sits behind a lock so that [`initialized`](Self::initialized)
/// is safe to poll from any thread. Entering `Ready` publishes the new state
/// on a watch channel and bumps the broadcast counter under that same lock,
/// then runs the registered observers.
pub struct ReadinessGate {
    inner: Mutex<GateInner>,
    watch: watch::Sender<StackState>,
    broadcasts: AtomicUsize,
}

impl Default for ReadinessGate {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadinessGate {
    pub fn new() -> Self {
        let (watch, _) = watch::channel(StackState::Uninitialized);
        Self {
            inner: Mutex::new(GateInner {
                state: StackState::Uninitialized,
                observers: Vec::new(),
            }),
            watch,
            broadcasts: AtomicUsize::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, GateInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current state.
    pub fn state(&self) -> StackState {
        self.lock().state.clone()
    }

    /// True once the gate is `Ready`. Never reverts.
    pub fn initialized(&self) -> bool {
        self.lock().state == StackState::Ready
    }

    /// How many ready broadcasts were sent. At most one.
    pub fn ready_broadcasts(&self) -> usize {
        self.broadcasts.load(Ordering::SeqCst)
    }

    /// A receiver that observes every state change.
    pub fn subscribe(&self) -> watch::Receiver<StackState> {
        self.watch.subscribe()
    }

    /// `Uninitialized -> Initializing`. Returns false if startup already began.
    pub fn begin(&self) -> bool {
        let mut inner = self.lock();
        if inner.state != StackState::Uninitialized {
            warn!(state = %inner.state, "startup already begun");
            return false;
        }
        self.transition(&mut inner, StackState::Initializing);
        true
    }

    /// `Initializing -> Ready`, then runs the ready observers.
    ///
    /// Returns false, doing nothing, from any other state.
    pub fn mark_ready(&self) -> bool {
        let observers = {
            let mut inner = self.lock();
            if inner.state != StackState::Initializing {
                warn!(state = %inner.state, "ignoring ready transition");
                return false;
            }
            self.broadcasts.fetch_add(1, Ordering::SeqCst);
            self.transition(&mut inner, StackState::Ready);
            std::mem::take(&mut inner.observers)
        };

        info!(observers = observers.len(), "data stack ready");
        for observer in observers {
            fire(observer);
        }
        true
    }

    /// `Initializing -> Failed`. Pending ready observers are dropped without
    /// being called.
    ///
    /// Returns false, doing nothing, from any other state.
    pub fn mark_failed(&self, err: StoreOpenError) -> bool {
        let mut inner = self.lock();
        if inner.state != StackState::Initializing {
            warn!(state = %inner.state, error = %err, "ignoring failed transition");
            return false;
        }
        error!(error = %err, "data stack failed");
        inner.observers.clear();
        self.transition(&mut inner, StackState::Failed(err));
        true
    }

    /// Registers a callback for the ready transition.
    ///
    /// Called exactly once: on the transition, or right away on the calling
    /// thread if the gate is already ready. Never called if startup fails.
    pub fn on_ready(&self, observer: impl FnOnce() + Send + 'static) {
        let mut inner = self.lock();
        if inner.state == StackState::Ready {
            drop(inner);
            fire(Box::new(observer));
        } else if matches!(inner.state, StackState::Failed(_)) {
            debug!("ready observer dropped: stack failed");
        } else {
            inner.observers.push(Box::new(observer));
        }
    }

    /// Waits until the gate reaches a terminal state.
    ///
    /// Has no timeout of its own.
    pub async fn wait_ready(&self) -> Result<(), StoreOpenError> {
        let mut rx = self.watch.subscribe();
        let state = rx
            .wait_for(StackState::is_terminal)
            .await
            .map(|state| state.clone())
            .map_err(|_| StoreOpenError::Unavailable("readiness gate dropped".to_string()))?;
        match state {
            StackState::Failed(err) => Err(err),
            _ => Ok(()),
        }
    }

    fn transition(&self, inner: &mut GateInner, next: StackState) {
        debug!(from = %inner.state, to = %next, "stack state transition");
        inner.state = next.clone();
        self.watch.send_replace(next);
    }
}

impl fmt::Debug for ReadinessGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("ReadinessGate")
            .field("state", &inner.state)
            .field("observers", &inner.observers.len())
            .field("broadcasts", &self.ready_broadcasts())
            .finish()
    }
}

fn fire(observer: ReadyObserver) {
    if panic::catch_unwind(AssertUnwindSafe(observer)).is_err() {
        warn!("ready observer panicked");
    }
}
