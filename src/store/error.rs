use thiserror::Error;

use crate::storage::{ContentError, IndexError};

/// Failures surfaced by [`super::VersionedFileStore`]. None are retried internally.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Empty name, or a name with a parent-directory segment.
    #[error("The file name {0:?} is not a valid path")]
    InvalidName(String),

    /// File, Version, or blob absent when required to exist.
    #[error("The file {0} cannot be found")]
    NotFound(String),

    /// Content write failed during save or update; no metadata was committed.
    #[error("An error has occurred while persisting the file: {0}")]
    PersistFailure(#[source] ContentError),

    /// Content removal failed during delete; metadata was left intact.
    #[error("An error has occurred while deleting the file: {0}")]
    DeletingFailure(#[source] ContentError),

    /// Content read failed during fetch.
    #[error("An error has occurred while reading the file: {0}")]
    ReadFailure(#[source] ContentError),

    #[error("Metadata index error: {0}")]
    Metadata(#[from] IndexError),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
