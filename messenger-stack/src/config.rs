use messenger_model::SchemaRegistry;
use messenger_store::StoreLocation;
use messenger_sync::BridgeConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default cloud container identifier.
pub const DEFAULT_CONTAINER: &str = "iCloud.messenger";

/// Configuration for a [`DataStack`](crate::DataStack).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataStackConfig {
    /// Where the persistent store lives.
    pub store: StoreLocation,
    /// Identifier the cloud container must report.
    pub container_identifier: String,
    /// Record schemas validated on every save.
    pub schemas: SchemaRegistry,
    /// Sync bridge tuning.
    pub bridge: BridgeConfig,
    /// Start merging remote notifications as part of startup.
    pub subscribe_on_start: bool,
}

impl Default for DataStackConfig {
    fn default() -> Self {
        Self {
            store: StoreLocation::InMemory,
            container_identifier: DEFAULT_CONTAINER.to_string(),
            schemas: SchemaRegistry::default(),
            bridge: BridgeConfig::default(),
            subscribe_on_start: true,
        }
    }
}

impl DataStackConfig {
    /// Default configuration backed by a database file.
    pub fn at_path(path: impl Into<PathBuf>) -> Self {
        Self {
            store: StoreLocation::Path(path.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_container(mut self, identifier: impl Into<String>) -> Self {
        self.container_identifier = identifier.into();
        self
    }
}
