//! The data stack - owns the store, its write path and cloud sync.

use crate::config::DataStackConfig;
use crate::error::{StackError, StackResult};
use crate::readiness::{ReadinessGate, StackState};
use messenger_store::{StoreEngine, StoreHandle, StoreOpenError, WriteContext};
use messenger_sync::{CloudContainer, SyncBridge};
use std::sync::{Arc, OnceLock};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{info, warn};

struct StackParts {
    store: StoreHandle,
    context: WriteContext,
    bridge: SyncBridge,
}

struct StackInner {
    config: DataStackConfig,
    engine: StoreEngine,
    container: Arc<dyn CloudContainer>,
    gate: ReadinessGate,
    parts: OnceLock<StackParts>,
}

/// Coordinator owning the local store and its sync lifecycle.
///
/// [`start`](Self::start) returns at once with the stack `initializing`;
/// the store opens in the background. Everything that needs an open store
/// is reachable only once the stack is ready. Cloning yields another handle
/// to the same stack.
#[derive(Clone)]
pub struct DataStack {
    inner: Arc<StackInner>,
}

impl DataStack {
    /// Begins startup on `runtime` and returns immediately.
    pub fn start(
        config: DataStackConfig,
        container: Arc<dyn CloudContainer>,
        runtime: &Handle,
    ) -> Self {
        let stack = Self {
            inner: Arc::new(StackInner {
                engine: StoreEngine::new(config.store.clone()),
                config,
                container,
                gate: ReadinessGate::new(),
                parts: OnceLock::new(),
            }),
        };

        stack.inner.gate.begin();
        info!(
            store = ?stack.inner.config.store,
            container = %stack.inner.config.container_identifier,
            "starting data stack"
        );
        let starting = stack.clone();
        runtime.spawn(async move { starting.initialize().await });
        stack
    }

    async fn initialize(&self) {
        match self.bring_up().await {
            Ok(parts) => {
                if self.inner.parts.set(parts).is_err() {
                    warn!("data stack parts already set");
                }
                self.inner.gate.mark_ready();
            }
            Err(err) => {
                self.inner.gate.mark_failed(err);
            }
        }
    }

    async fn bring_up(&self) -> Result<StackParts, StoreOpenError> {
        let expected = &self.inner.config.container_identifier;
        let actual = self.inner.container.identifier();
        if actual != expected {
            return Err(StoreOpenError::Unavailable(format!(
                "cloud container {actual:?} does not match configured {expected:?}"
            )));
        }

        let store = self.inner.engine.open().await?;
        let schemas = Arc::new(self.inner.config.schemas.clone());
        let context = WriteContext::new(store.clone(), schemas).map_err(StoreOpenError::from)?;
        let bridge = SyncBridge::new(
            context.clone(),
            self.inner.container.clone(),
            self.inner.config.bridge.clone(),
        );
        if self.inner.config.subscribe_on_start {
            bridge.subscribe().await.map_err(|e| {
                StoreOpenError::Unavailable(format!("cloud subscription failed: {e}"))
            })?;
        }

        Ok(StackParts { store, context, bridge })
    }

    fn parts(&self) -> Option<&StackParts> {
        if self.inner.gate.initialized() {
            self.inner.parts.get()
        } else {
            None
        }
    }

    pub fn config(&self) -> &DataStackConfig {
        &self.inner.config
    }

    /// The store engine, available in every state.
    pub fn engine(&self) -> &StoreEngine {
        &self.inner.engine
    }

    pub fn state(&self) -> StackState {
        self.inner.gate.state()
    }

    /// True once the stack is ready. Never reverts.
    pub fn initialized(&self) -> bool {
        self.inner.gate.initialized()
    }

    /// The serialized write path.
    pub fn background_context(&self) -> Option<WriteContext> {
        self.parts().map(|p| p.context.clone())
    }

    pub fn cloud_container(&self) -> Option<Arc<dyn CloudContainer>> {
        self.parts().map(|_| self.inner.container.clone())
    }

    pub fn sync_bridge(&self) -> Option<SyncBridge> {
        self.parts().map(|p| p.bridge.clone())
    }

    /// Read access to committed data.
    pub fn store(&self) -> Option<StoreHandle> {
        self.parts().map(|p| p.store.clone())
    }

    /// Waits for startup to finish. Wrap in a timeout if needed.
    pub async fn wait_until_ready(&self) -> StackResult<()> {
        self.inner.gate.wait_ready().await.map_err(StackError::Failed)
    }

    /// Registers a callback for the one-time ready broadcast.
    ///
    /// Runs immediately if the stack is already ready.
    pub fn on_ready(&self, callback: impl FnOnce() + Send + 'static) {
        self.inner.gate.on_ready(callback);
    }

    /// Number of ready broadcasts sent so far.
    pub fn ready_broadcasts(&self) -> usize {
        self.inner.gate.ready_broadcasts()
    }

    /// A receiver observing every lifecycle state change.
    pub fn subscribe_state(&self) -> watch::Receiver<StackState> {
        self.inner.gate.subscribe()
    }

    /// Stops remote merging and closes the write path to new work.
    pub fn shutdown(&self) -> StackResult<()> {
        let parts = self.parts().ok_or(StackError::NotReady)?;
        parts.bridge.unsubscribe();
        parts.context.shutdown();
        info!("data stack shut down");
        Ok(())
    }

    /// True if both handles refer to the same stack.
    pub fn ptr_eq(&self, other: &DataStack) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for DataStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataStack")
            .field("state", &self.state())
            .field("engine", &self.inner.engine)
            .field("container", &self.inner.container.identifier())
            .finish()
    }
}
