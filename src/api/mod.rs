//! HTTP boundary for the versioned file store.
//!
//! Handlers only translate between HTTP and [`crate::store::VersionedFileStore`]; every
//! invariant lives in the store. Store calls do blocking I/O and may wait on a name lock,
//! so they run on the blocking pool.

pub mod error;
pub mod file_service;

pub use error::ApiError;
pub use file_service::{download_link, router, AppState};
