use std::sync::Arc;

use dedup_store::DedupStore;
use tokio::net::TcpListener;

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::router::build_router;
use crate::state::AppState;

/// HTTP front end for a durable [`DedupStore`].
pub struct DedupServer {
    config: ServerConfig,
    store: Arc<DedupStore>,
}

impl DedupServer {
    /// Open the store under `config.data_dir`.
    pub fn open(config: ServerConfig) -> ServerResult<Self> {
        let store = DedupStore::open(&config.data_dir, config.store.clone())?;
        Ok(Self::with_store(config, Arc::new(store)))
    }

    /// Serve an already-open store.
    pub fn with_store(config: ServerConfig, store: Arc<DedupStore>) -> Self {
        Self { config, store }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<DedupStore> {
        &self.store
    }

    /// Build the router (useful for testing).
    pub fn router(&self) -> axum::Router {
        let state = AppState::new(self.store.clone(), self.config.max_upload_size);
        build_router(state, self.config.allow_any_origin)
    }

    /// Start serving requests.
    pub async fn serve(self) -> ServerResult<()> {
        let app = self.router();
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        tracing::info!(
            addr = %self.config.bind_addr,
            data_dir = %self.config.data_dir.display(),
            "dedup server listening"
        );
        axum::serve(listener, app)
            .await
            .map_err(|e| ServerError::Internal(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dedup_store::StoreConfig;

    #[test]
    fn open_creates_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig {
            data_dir: dir.path().join("store"),
            ..ServerConfig::default()
        };
        let server = DedupServer::open(config).unwrap();
        assert!(dir.path().join("store").join("objects").is_dir());
        assert_eq!(server.store().compute_stats().unwrap().object_count, 0);
    }

    #[test]
    fn router_builds() {
        let store = Arc::new(DedupStore::in_memory(StoreConfig::default()));
        let server = DedupServer::with_store(ServerConfig::default(), store);
        assert_eq!(server.config().bind_addr.port(), 8000);
        let _router = server.router();
    }
}
