//! Storage layer for the versioned file store.
//!
//! Two independent stores live here, plus the glue that keeps their keys in agreement:
//!
//! 1. **Metadata index** (`index`): sled-backed map of file name → File record → ordered
//!    Version records. Multi-tree mutations are committed in one sled transaction.
//! 2. **Content store** (`content`): opaque address → bytes on a physical medium.
//! 3. **Addressing** (`address`): name normalization and the `{version}/{escaped name}` derivation
//!    both stores share.
//! 4. **Allocation** (`allocator`): next-version computation and the per-name lock table
//!    that serializes it.
//!
//! The orchestration protocol across the two stores lives in [`crate::store`].

pub mod address;
pub mod allocator;
pub mod backend;
pub mod content;
pub mod index;

pub use address::{normalize_name, BlobAddress, VersionNumber};
pub use allocator::{NameGuard, NameLocks, VersionAllocator};
pub use backend::{Backend, BackendConfig, BackendError, BackendResult};
pub use content::{Blob, ContentError, ContentResult, ContentStore, FsContentStore, MemoryContentStore};
pub use index::{FileRecord, FileSummary, MetadataIndex, VersionRecord};

use thiserror::Error;

/// Metadata index errors.
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] bincode::Error),

    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

impl From<sled::transaction::TransactionError<IndexError>> for IndexError {
    fn from(err: sled::transaction::TransactionError<IndexError>) -> Self {
        match err {
            sled::transaction::TransactionError::Abort(inner) => inner,
            sled::transaction::TransactionError::Storage(e) => IndexError::Sled(e),
        }
    }
}

pub type IndexResult<T> = Result<T, IndexError>;
