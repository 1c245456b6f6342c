//! Shared registry - exactly one data stack per registry.

use crate::config::DataStackConfig;
use crate::error::{StackError, StackResult};
use crate::stack::DataStack;
use messenger_sync::CloudContainer;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::runtime::Handle;
use tracing::info;

static GLOBAL: OnceLock<SharedRegistry> = OnceLock::new();

/// Hands out the one [`DataStack`] built from its configuration.
///
/// The first call to [`shared_instance`](Self::shared_instance) constructs
/// the stack and starts its store open without waiting for it. Concurrent
/// first calls block briefly on the construction and all receive the same
/// stack. Dependents take a `&SharedRegistry` (or an `Arc` of one); the
/// [`install`](Self::install)/[`global`](Self::global) pair offers a
/// process-wide slot on top.
pub struct SharedRegistry {
    config: DataStackConfig,
    container: Arc<dyn CloudContainer>,
    runtime: Handle,
    instance: OnceLock<DataStack>,
    constructions: AtomicUsize,
}

impl SharedRegistry {
    /// `runtime` runs the stack's startup; the registry itself may be used
    /// from any thread.
    pub fn new(
        config: DataStackConfig,
        container: Arc<dyn CloudContainer>,
        runtime: Handle,
    ) -> Self {
        Self {
            config,
            container,
            runtime,
            instance: OnceLock::new(),
            constructions: AtomicUsize::new(0),
        }
    }

    /// The shared data stack, constructed on first use.
    pub fn shared_instance(&self) -> DataStack {
        self.instance
            .get_or_init(|| {
                self.constructions.fetch_add(1, Ordering::SeqCst);
                info!("constructing shared data stack");
                DataStack::start(self.config.clone(), self.container.clone(), &self.runtime)
            })
            .clone()
    }

    /// The shared data stack if it was constructed already.
    pub fn get(&self) -> Option<DataStack> {
        self.instance.get().cloned()
    }

    /// How many stacks this registry constructed. At most one.
    pub fn constructions(&self) -> usize {
        self.constructions.load(Ordering::SeqCst)
    }

    /// Places this registry in the process-wide slot.
    pub fn install(self) -> StackResult<&'static SharedRegistry> {
        GLOBAL.set(self).map_err(|_| StackError::AlreadyInstalled)?;
        info!("shared registry installed");
        Self::global()
    }

    /// The registry in the process-wide slot.
    pub fn global() -> StackResult<&'static SharedRegistry> {
        GLOBAL.get().ok_or(StackError::NotInstalled)
    }
}

impl std::fmt::Debug for SharedRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedRegistry")
            .field("config", &self.config)
            .field("constructed", &self.instance.get().is_some())
            .finish()
    }
}
