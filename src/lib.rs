//! # verstore: a versioned file store
//!
//! Clients upload named artifacts; every upload becomes a new immutable version that can
//! be listed, fetched (latest or by number), overwritten in place, or deleted.
//!
//! - **Metadata index**: sled-backed map of file name → versions with timestamps
//! - **Content store**: raw bytes on disk, addressed by `{version}/{escaped name}`
//! - **Version allocation**: serialized per file name so concurrent uploads never collide
//! - **Orchestration**: content is written before metadata commits and removed before
//!   metadata drops, so a failure leaves extra bytes, never a dangling version
//!
//! # Usage
//!
//! ```bash
//! verstore --data-dir /var/lib/verstore --listen-addr 0.0.0.0:8080
//! ```

pub mod api;
pub mod server;
pub mod storage;
pub mod store;

pub use server::{FileStoreServer, ServerConfig};
pub use storage::{ContentStore, FsContentStore, MemoryContentStore, MetadataIndex};
pub use store::{FetchedFile, SaveOutcome, StoreError, StoreResult, VersionedFileStore};
