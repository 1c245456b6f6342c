//! Write context - the single serialized mutation path.

use crate::error::{MutationError, StoreResult};
use crate::handle::StoreHandle;
use crate::txn::StoreTxn;
use messenger_model::SchemaRegistry;
use messenger_types::Timestamp;
use rusqlite::Connection;
use std::any::Any;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Runs a mutation against the locked connection and returns the delivery
/// of its outcome, which the worker calls once the connection is released.
type Job = Box<dyn FnOnce(&mut Connection, &mut Timestamp, &SchemaRegistry) -> Delivery + Send>;
type Delivery = Box<dyn FnOnce() + Send>;

struct ContextInner {
    sender: RwLock<Option<mpsc::UnboundedSender<Job>>>,
    store: StoreHandle,
    schemas: Arc<SchemaRegistry>,
    submitted: AtomicU64,
}

/// The serialized mutation surface of a store.
///
/// Mutations are closures over a [`StoreTxn`]. They run one at a time, in
/// submission order, on a dedicated worker thread. Each runs in its own
/// transaction which is saved (validated and committed) when the closure
/// returns `Ok` and rolled back otherwise. Failures are reported to the
/// submitter only; the worker keeps serving the queue.
///
/// Cloning yields another handle to the same queue.
#[derive(Clone)]
pub struct WriteContext {
    inner: Arc<ContextInner>,
}

impl WriteContext {
    /// Binds a new write context to an open store and starts its worker.
    pub fn new(store: StoreHandle, schemas: Arc<SchemaRegistry>) -> StoreResult<Self> {
        let clock = store.latest_timestamp()?.unwrap_or(Timestamp::ZERO);
        let (tx, rx) = mpsc::unbounded_channel();

        let worker_store = store.clone();
        let worker_schemas = schemas.clone();
        std::thread::Builder::new()
            .name("messenger-write-context".into())
            .spawn(move || run_loop(worker_store, worker_schemas, clock, rx))?;

        info!(location = ?store.location(), "write context started");
        Ok(Self {
            inner: Arc::new(ContextInner {
                sender: RwLock::new(Some(tx)),
                store,
                schemas,
                submitted: AtomicU64::new(0),
            }),
        })
    }

    /// The store this context writes to.
    pub fn store(&self) -> &StoreHandle {
        &self.inner.store
    }

    /// The schemas validated at save time.
    pub fn schemas(&self) -> &Arc<SchemaRegistry> {
        &self.inner.schemas
    }

    /// Number of mutations submitted so far.
    pub fn submitted(&self) -> u64 {
        self.inner.submitted.load(Ordering::SeqCst)
    }

    /// Queues a mutation and returns immediately.
    ///
    /// The returned [`Completion`] resolves once the mutation has been saved
    /// or rolled back. Dropping it does not cancel the mutation.
    pub fn enqueue<T, F>(&self, mutation: F) -> Completion<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut StoreTxn<'_>) -> Result<T, MutationError> + Send + 'static,
    {
        let (reply, rx) = oneshot::channel();
        self.submit(mutation, move |outcome| {
            let _ = reply.send(outcome);
        });
        Completion { rx }
    }

    /// Queues a mutation whose outcome is handed to `on_complete` on the
    /// worker thread, right after the save or rollback.
    ///
    /// The store is unlocked by then, so the callback may read through a
    /// [`StoreHandle`]. The next mutation starts only after it returns.
    /// If the context is closed, `on_complete` is not called.
    pub fn enqueue_with_callback<T, F, C>(&self, mutation: F, on_complete: C)
    where
        T: Send + 'static,
        F: FnOnce(&mut StoreTxn<'_>) -> Result<T, MutationError> + Send + 'static,
        C: FnOnce(Result<T, MutationError>) + Send + 'static,
    {
        self.submit(mutation, on_complete);
    }

    fn submit<T, F, C>(&self, mutation: F, on_complete: C)
    where
        T: Send + 'static,
        F: FnOnce(&mut StoreTxn<'_>) -> Result<T, MutationError> + Send + 'static,
        C: FnOnce(Result<T, MutationError>) + Send + 'static,
    {
        let seq = self.inner.submitted.fetch_add(1, Ordering::SeqCst) + 1;
        let job: Job = Box::new(
            move |conn: &mut Connection,
                  clock: &mut Timestamp,
                  schemas: &SchemaRegistry|
                  -> Delivery {
                let outcome = run_mutation(conn, clock, schemas, mutation);
                match &outcome {
                    Ok(_) => debug!(seq, "mutation committed"),
                    Err(err) => warn!(seq, error = %err, "mutation rolled back"),
                }
                Box::new(move || {
                    if panic::catch_unwind(AssertUnwindSafe(|| on_complete(outcome))).is_err() {
                        warn!(seq, "completion callback panicked");
                    }
                })
            },
        );

        let sender = self.inner.sender.read().unwrap_or_else(PoisonError::into_inner);
        let sent = sender.as_ref().map(|tx| tx.send(job).is_ok()).unwrap_or(false);
        if !sent {
            debug!(seq, "write context closed; mutation dropped");
        }
    }

    /// Stops accepting new mutations. Already queued ones still run.
    pub fn shutdown(&self) {
        let mut sender = self.inner.sender.write().unwrap_or_else(PoisonError::into_inner);
        if sender.take().is_some() {
            info!("write context shutting down");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner
            .sender
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_none_or(|tx| tx.is_closed())
    }
}

impl std::fmt::Debug for WriteContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteContext")
            .field("store", &self.inner.store)
            .field("submitted", &self.submitted())
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn run_loop(
    store: StoreHandle,
    schemas: Arc<SchemaRegistry>,
    mut clock: Timestamp,
    mut rx: mpsc::UnboundedReceiver<Job>,
) {
    while let Some(job) = rx.blocking_recv() {
        let deliver = {
            let mut conn = store.lock();
            job(&mut *conn, &mut clock, schemas.as_ref())
        };
        deliver();
    }
    debug!("write context worker exiting");
}

fn run_mutation<T, F>(
    conn: &mut Connection,
    clock: &mut Timestamp,
    schemas: &SchemaRegistry,
    mutation: F,
) -> Result<T, MutationError>
where
    F: FnOnce(&mut StoreTxn<'_>) -> Result<T, MutationError>,
{
    let mut txn = StoreTxn::begin(conn, clock, schemas)?;
    match panic::catch_unwind(AssertUnwindSafe(|| mutation(&mut txn))) {
        Ok(Ok(value)) => {
            txn.save()?;
            Ok(value)
        }
        Ok(Err(err)) => Err(err),
        Err(payload) => Err(MutationError::Panicked(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Resolves to the outcome of one queued mutation.
#[must_use = "a Completion reports whether the mutation was saved"]
pub struct Completion<T> {
    rx: oneshot::Receiver<Result<T, MutationError>>,
}

impl<T> Completion<T> {
    /// Waits for the outcome on a thread outside any async runtime.
    pub fn blocking_wait(self) -> Result<T, MutationError> {
        self.rx.blocking_recv().unwrap_or(Err(MutationError::Closed))
    }
}

impl<T> Future for Completion<T> {
    type Output = Result<T, MutationError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(MutationError::Closed)))
    }
}
