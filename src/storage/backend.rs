//! Sled-backed persistent storage for the metadata index.
//!
//! The backend owns the sled database and the logical trees the index is built on:
//! - `files`: normalized file name → encoded File record
//! - `versions`: `{file_id_be}{version_be}` → encoded Version record
//!
//! Big-endian keys in `versions` make every File's Versions a contiguous prefix range,
//! ordered by version number, so "latest version" is the last key of the range.

use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Backend storage errors.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Sled error: {0}")]
    SledError(#[from] sled::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Configuration for the backend storage.
#[derive(Clone, Debug)]
pub struct BackendConfig {
    /// Directory where sled stores its files.
    pub data_dir: PathBuf,

    /// Maximum page cache size in megabytes.
    pub cache_size_mb: u64,

    /// How often sled flushes dirty pages to disk, in milliseconds.
    pub flush_interval_ms: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./verstore.data/metadata"),
            cache_size_mb: 64,
            flush_interval_ms: 500,
        }
    }
}

/// The persistent storage backend using sled.
pub struct Backend {
    db: sled::Db,

    /// File name → File record
    files_tree: sled::Tree,

    /// Version arena keyed by `{file_id}{version}`
    versions_tree: sled::Tree,
}

impl Backend {
    /// Opens (or creates) the database under `config.data_dir`.
    pub fn new(config: BackendConfig) -> BackendResult<Arc<Self>> {
        debug!("Initializing metadata backend at {:?}", config.data_dir);

        std::fs::create_dir_all(&config.data_dir)?;

        let db = sled::Config::new()
            .path(&config.data_dir)
            .cache_capacity(config.cache_size_mb * 1024 * 1024)
            .flush_every_ms(Some(config.flush_interval_ms))
            .open()
            .map_err(|e| BackendError::ConfigError(format!("Failed to open sled database: {}", e)))?;

        let files_tree = db.open_tree("files")?;
        let versions_tree = db.open_tree("versions")?;

        info!(
            "Metadata backend initialized with cache_size={}MB, flush_interval={}ms",
            config.cache_size_mb, config.flush_interval_ms
        );

        Ok(Arc::new(Self {
            db,
            files_tree,
            versions_tree,
        }))
    }

    pub fn files(&self) -> &sled::Tree {
        &self.files_tree
    }

    pub fn versions(&self) -> &sled::Tree {
        &self.versions_tree
    }

    /// Returns a new, never-before-returned id. Used as the File identity in the version arena.
    pub fn generate_id(&self) -> BackendResult<u64> {
        Ok(self.db.generate_id()?)
    }

    /// Flushes all pending writes to disk.
    pub fn flush(&self) -> BackendResult<()> {
        self.db.flush()?;
        Ok(())
    }
}
