//! Full node implementation

use crate::api::start_api_server;
use crate::runtime::NodeRuntime;
use mosaic_core::{MosaicResult, NodeConfig};
use mosaic_crypto::keys::KeyPair;
use mosaic_state::{MemorySnapshotStore, PersistentSnapshotStore, SnapshotStore};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

/// Full Mosaic node
pub struct MosaicNode {
    runtime: Arc<NodeRuntime>,
}

impl MosaicNode {
    /// Create a node over an existing snapshot store
    pub async fn open(
        config: NodeConfig,
        keypair: KeyPair,
        store: Arc<dyn SnapshotStore>,
    ) -> MosaicResult<Self> {
        let runtime = Arc::new(NodeRuntime::open(config, keypair, store).await?);
        Ok(Self { runtime })
    }

    /// Start the node
    pub async fn start(&self) -> anyhow::Result<()> {
        info!("Starting Mosaic node {}...", self.runtime.config().name);

        let api_handle = if self.runtime.config().api.enabled {
            let api_runtime = self.runtime.clone();
            let api_addr = self.runtime.config().api.listen_addr.clone();
            Some(tokio::spawn(async move {
                if let Err(e) = start_api_server(api_runtime, &api_addr).await {
                    error!("API server error: {}", e);
                }
            }))
        } else {
            None
        };

        let core = self.runtime.core_view();
        info!("Node started successfully");
        info!("Orchestrator: {}", self.runtime.orchestrator());
        info!(
            "Core {}: {:?} at kernel height {}",
            core.core_id, core.status, core.open_kernel_height
        );

        // Wait for shutdown signal
        match signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown signal received, stopping node...");
            }
            Err(e) => {
                error!("Error waiting for shutdown signal: {}", e);
            }
        }

        if let Some(handle) = api_handle {
            handle.abort();
        }

        info!("Node stopped");

        Ok(())
    }

    /// Get runtime reference
    pub fn runtime(&self) -> &Arc<NodeRuntime> {
        &self.runtime
    }
}

/// Node builder for easier configuration
pub struct NodeBuilder {
    config: NodeConfig,
    keypair: Option<KeyPair>,
    ephemeral: bool,
}

impl NodeBuilder {
    pub fn new() -> Self {
        Self {
            config: NodeConfig::default(),
            keypair: None,
            ephemeral: false,
        }
    }

    pub fn config(mut self, config: NodeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn keypair(mut self, keypair: KeyPair) -> Self {
        self.keypair = Some(keypair);
        self
    }

    pub fn api_addr(mut self, addr: &str) -> Self {
        self.config.api.listen_addr = addr.to_string();
        self
    }

    pub fn data_dir(mut self, dir: impl Into<std::path::PathBuf>) -> Self {
        self.config.data_dir = dir.into();
        self
    }

    /// Keep snapshots in memory instead of under the data directory
    pub fn ephemeral(mut self) -> Self {
        self.ephemeral = true;
        self
    }

    pub async fn build(self) -> MosaicResult<MosaicNode> {
        let keypair = self.keypair.unwrap_or_else(KeyPair::generate);
        let store: Arc<dyn SnapshotStore> = if self.ephemeral {
            Arc::new(MemorySnapshotStore::new())
        } else {
            let path = self.config.data_dir.join("snapshots");
            info!("Opening snapshot store at {}", path.display());
            Arc::new(PersistentSnapshotStore::open(path)?)
        };
        MosaicNode::open(self.config, keypair, store).await
    }
}

impl Default for NodeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mosaic_core::{Address, CoreConfig, Hash};
    use tempfile::TempDir;

    fn config() -> NodeConfig {
        NodeConfig {
            core: CoreConfig {
                metachain_id: Hash([1u8; 32]),
                core_id: Address([2u8; 32]),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_builder_persists_under_data_dir() {
        let dir = TempDir::new().unwrap();
        let keypair = KeyPair::from_seed(&[0xaa; 32]);
        let node = NodeBuilder::new()
            .config(config())
            .keypair(keypair.clone())
            .data_dir(dir.path())
            .build()
            .await
            .unwrap();
        assert_eq!(node.runtime().orchestrator(), keypair.address());
        assert!(dir.path().join("snapshots").exists());
    }

    #[tokio::test]
    async fn test_builder_rejects_invalid_core_config() {
        let result = NodeBuilder::new().ephemeral().build().await;
        assert!(result.is_err());
    }
}
