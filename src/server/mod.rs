//! Server wiring: opens both stores, builds the versioned file store, and serves the
//! HTTP boundary until shutdown.

use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::api::{self, AppState};
use crate::storage::backend::{Backend, BackendConfig};
use crate::storage::{FsContentStore, MetadataIndex};
use crate::store::VersionedFileStore;

/// Main server holding the store and its configuration.
pub struct FileStoreServer {
    config: ServerConfig,
    backend: Arc<Backend>,
    store: Arc<VersionedFileStore>,
}

/// Configuration for the file store server.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Directory holding the metadata database.
    pub data_dir: PathBuf,

    /// Root of the content medium. Defaults to `<data_dir>/blobs`.
    pub storage_root: Option<PathBuf>,

    /// Address to listen on, `host:port` or `http://host:port`.
    pub listen_addr: String,

    /// Base for download links. Defaults to `http://<bound address>`.
    pub public_url: Option<String>,

    /// Metadata page cache size in megabytes.
    pub cache_size_mb: u64,

    /// Largest accepted upload body.
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("verstore.data"),
            storage_root: None,
            listen_addr: "127.0.0.1:8080".to_string(),
            public_url: None,
            cache_size_mb: 64,
            max_upload_bytes: 64 * 1024 * 1024,
        }
    }
}

impl ServerConfig {
    pub fn metadata_dir(&self) -> PathBuf {
        self.data_dir.join("metadata")
    }

    pub fn storage_root(&self) -> PathBuf {
        self.storage_root
            .clone()
            .unwrap_or_else(|| self.data_dir.join("blobs"))
    }
}

impl FileStoreServer {
    /// Opens the metadata database and the content root (creating both if absent).
    pub fn new(config: ServerConfig) -> anyhow::Result<Self> {
        info!(
            data_dir = %config.data_dir.display(),
            storage_root = %config.storage_root().display(),
            "Initializing file store server"
        );

        let backend = Backend::new(BackendConfig {
            data_dir: config.metadata_dir(),
            cache_size_mb: config.cache_size_mb,
            flush_interval_ms: 500,
        })
        .map_err(|e| anyhow::anyhow!("Failed to initialize metadata backend: {}", e))?;
        info!("Metadata backend initialized");

        let content = FsContentStore::open(config.storage_root())
            .map_err(|e| anyhow::anyhow!("Failed to initialize content store: {}", e))?;
        info!("Content store initialized");

        let index = Arc::new(MetadataIndex::new(backend.clone()));
        let store = Arc::new(VersionedFileStore::new(index, Arc::new(content)));

        Ok(Self {
            config,
            backend,
            store,
        })
    }

    /// Binds the configured address and serves until `shutdown` resolves.
    pub async fn run(
        self,
        shutdown: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let addr = parse_listen_addr(&self.config.listen_addr)?;
        let listener = TcpListener::bind(addr).await?;
        self.serve(listener, shutdown).await
    }

    /// Serves on an already-bound listener until `shutdown` resolves.
    pub async fn serve(
        self,
        listener: TcpListener,
        shutdown: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let local_addr = listener.local_addr()?;
        let public_url = self
            .config
            .public_url
            .clone()
            .unwrap_or_else(|| format!("http://{}", local_addr));

        let state = AppState::new(self.store.clone(), &public_url);
        let app = api::router(state, self.config.max_upload_bytes);

        info!("File store listening on {}", local_addr);
        info!("Download links use base {}", public_url);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("File store shutting down");
        if let Err(e) = self.backend.flush() {
            warn!(error = %e, "Final metadata flush failed");
        }
        Ok(())
    }

    pub fn store(&self) -> Arc<VersionedFileStore> {
        self.store.clone()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// Parses `host:port` or `http://host:port` into a socket address.
fn parse_listen_addr(url: &str) -> anyhow::Result<SocketAddr> {
    let addr = url
        .strip_prefix("http://")
        .or_else(|| url.strip_prefix("https://"))
        .unwrap_or(url)
        .trim_end_matches('/');

    addr.to_socket_addrs()
        .map_err(|e| anyhow::anyhow!("Invalid listen address {}: {}", url, e))?
        .next()
        .ok_or_else(|| anyhow::anyhow!("Listen address {} resolved to nothing", url))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_listen_addr() {
        let addr = parse_listen_addr("http://0.0.0.0:8080").unwrap();
        assert_eq!(addr.port(), 8080);

        let addr = parse_listen_addr("127.0.0.1:9000/").unwrap();
        assert_eq!(addr.port(), 9000);

        assert!(parse_listen_addr("not an address").is_err());
    }

    #[test]
    fn test_storage_root_defaults_under_data_dir() {
        let config = ServerConfig {
            data_dir: PathBuf::from("/srv/files"),
            ..ServerConfig::default()
        };
        assert_eq!(config.storage_root(), PathBuf::from("/srv/files/blobs"));
        assert_eq!(config.metadata_dir(), PathBuf::from("/srv/files/metadata"));

        let config = ServerConfig {
            storage_root: Some(PathBuf::from("/mnt/blobs")),
            ..config
        };
        assert_eq!(config.storage_root(), PathBuf::from("/mnt/blobs"));
    }

    #[test]
    fn test_new_creates_directories() {
        let temp_dir = TempDir::new().unwrap();
        let config = ServerConfig {
            data_dir: temp_dir.path().join("data"),
            ..ServerConfig::default()
        };
        let server = FileStoreServer::new(config).unwrap();
        assert!(server.config().metadata_dir().is_dir());
        assert!(server.config().storage_root().is_dir());
        assert!(server.store().list().unwrap().is_empty());
    }
}
