//! The versioned file store: composes the metadata index, the content store and the
//! version allocator into save/update/delete/fetch/list.
//!
//! Ordering across the two stores is the same for every mutation: content is written
//! before its metadata is committed, and content is removed before its metadata is
//! dropped. A crash between the two steps leaves an unreferenced blob, never a Version
//! record pointing at missing bytes.
//!
//! Every mutation holds the file name's [`NameGuard`](crate::storage::NameGuard) for its
//! whole duration. Reads take no lock.

mod error;

pub use error::{StoreError, StoreResult};

use std::io::Read;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::storage::{
    normalize_name, Blob, BlobAddress, ContentStore, FileSummary, MetadataIndex, NameLocks,
    VersionAllocator, VersionNumber, VersionRecord,
};

/// Result of a successful save or update.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SaveOutcome {
    pub name: String,
    pub version: VersionNumber,
    pub content_type: Option<String>,
    /// Bytes written to the content store.
    pub size: u64,
}

/// A resolved blob ready to hand to the download layer.
#[derive(Debug)]
pub struct FetchedFile {
    pub name: String,
    pub version: VersionNumber,
    /// Where the bytes live, for error reporting while they are read.
    pub address: BlobAddress,
    pub blob: Blob,
}

pub struct VersionedFileStore {
    index: Arc<MetadataIndex>,
    content: Arc<dyn ContentStore>,
    allocator: VersionAllocator,
    locks: NameLocks,
}

impl VersionedFileStore {
    pub fn new(index: Arc<MetadataIndex>, content: Arc<dyn ContentStore>) -> Self {
        let allocator = VersionAllocator::new(index.clone());
        info!("Versioned file store initialized");
        Self {
            index,
            content,
            allocator,
            locks: NameLocks::new(),
        }
    }

    pub fn index(&self) -> &Arc<MetadataIndex> {
        &self.index
    }

    fn validate(name: &str) -> StoreResult<String> {
        normalize_name(name).ok_or_else(|| StoreError::InvalidName(name.to_string()))
    }

    /// One summary per File that still has Versions.
    pub fn list(&self) -> StoreResult<Vec<FileSummary>> {
        Ok(self.index.list_summaries()?)
    }

    /// Every Version of `name`, ascending.
    pub fn list_versions(&self, name: &str) -> StoreResult<Vec<VersionRecord>> {
        let name = Self::validate(name)?;
        let file = self
            .index
            .find_file_by_name(&name)?
            .ok_or_else(|| StoreError::NotFound(name.clone()))?;
        Ok(self.index.versions_of(&file)?)
    }

    /// Stores `source` as a new Version of `name` and returns the allocated number.
    pub fn save(
        &self,
        name: &str,
        source: &mut dyn Read,
        content_type: Option<&str>,
    ) -> StoreResult<SaveOutcome> {
        let name = Self::validate(name)?;
        let _guard = self.locks.lock(&name);

        let version = self.allocator.next_version(&name)?;
        let address = BlobAddress::new(&name, version);

        let size = self.content.put(&address, source).map_err(|e| {
            warn!(name = %name, version = version, error = %e, "Content write failed, nothing committed");
            StoreError::PersistFailure(e)
        })?;

        if let Err(e) = self.index.commit_new_version(&name, version, Utc::now()) {
            warn!(name = %name, version = version, error = %e, "Metadata commit failed after content write");
            if let Err(cleanup) = self.content.delete(&address) {
                warn!(address = %address, error = %cleanup, "Could not remove unreferenced blob");
            }
            return Err(e.into());
        }

        debug!(name = %name, version = version, size = size, "File saved");
        Ok(SaveOutcome {
            name,
            version,
            content_type: content_type.map(str::to_string),
            size,
        })
    }

    /// Overwrites the content of an existing Version and refreshes its timestamp.
    /// Never creates a Version.
    pub fn update_version(
        &self,
        name: &str,
        source: &mut dyn Read,
        version: VersionNumber,
        content_type: Option<&str>,
    ) -> StoreResult<SaveOutcome> {
        let name = Self::validate(name)?;
        let _guard = self.locks.lock(&name);

        if self.index.find_version(&name, version)?.is_none() {
            return Err(StoreError::NotFound(format!("{} with version {}", name, version)));
        }

        let address = BlobAddress::new(&name, version);
        let size = self.content.put(&address, source).map_err(|e| {
            warn!(name = %name, version = version, error = %e, "Content overwrite failed");
            StoreError::PersistFailure(e)
        })?;

        if self.index.touch_version(&name, version, Utc::now())?.is_none() {
            return Err(StoreError::NotFound(format!("{} with version {}", name, version)));
        }

        debug!(name = %name, version = version, size = size, "Version updated");
        Ok(SaveOutcome {
            name,
            version,
            content_type: content_type.map(str::to_string),
            size,
        })
    }

    /// Removes every Version's blob, then the File and all its Versions.
    ///
    /// Removal is attempted for every blob. If any fails, the metadata is left untouched
    /// and the first failure is returned, so the call can simply be repeated.
    pub fn delete(&self, name: &str) -> StoreResult<()> {
        let name = Self::validate(name)?;
        let _guard = self.locks.lock(&name);

        let file = self
            .index
            .find_file_by_name(&name)?
            .ok_or_else(|| StoreError::NotFound(name.clone()))?;
        let versions = self.index.versions_of(&file)?;

        let mut first_failure = None;
        for record in &versions {
            let address = BlobAddress::new(&name, record.version);
            if let Err(e) = self.content.delete(&address) {
                warn!(address = %address, error = %e, "Blob removal failed");
                if first_failure.is_none() {
                    first_failure = Some(e);
                }
            }
        }
        if let Some(e) = first_failure {
            return Err(StoreError::DeletingFailure(e));
        }

        self.index.delete_file(&file)?;
        debug!(name = %name, versions = versions.len(), "File deleted");
        Ok(())
    }

    /// Removes one Version. The File record survives even when this was its last Version.
    pub fn delete_version(&self, name: &str, version: VersionNumber) -> StoreResult<()> {
        let name = Self::validate(name)?;
        let _guard = self.locks.lock(&name);

        let file = self
            .index
            .find_file_by_name(&name)?
            .ok_or_else(|| StoreError::NotFound(name.clone()))?;
        let record = self
            .index
            .find_version(&name, version)?
            .ok_or_else(|| StoreError::NotFound(format!("{} with version {}", name, version)))?;

        let address = BlobAddress::new(&name, version);
        self.content
            .delete(&address)
            .map_err(StoreError::DeletingFailure)?;

        self.index.delete_version(&record)?;
        self.index.upsert_file(&file)?;
        debug!(name = %name, version = version, "Version deleted");
        Ok(())
    }

    /// Resolves `(name, version)`, or the latest Version when `version` is `None`.
    pub fn fetch(&self, name: &str, version: Option<VersionNumber>) -> StoreResult<FetchedFile> {
        let name = Self::validate(name)?;

        if self.index.find_file_by_name(&name)?.is_none() {
            return Err(StoreError::NotFound(name));
        }

        let version = match version {
            Some(v) => {
                if self.index.find_version(&name, v)?.is_none() {
                    return Err(StoreError::NotFound(format!("{} with version {}", name, v)));
                }
                v
            }
            None => self
                .index
                .latest_version_number(&name)?
                .ok_or_else(|| StoreError::NotFound(format!("{} with latest version", name)))?,
        };

        let address = BlobAddress::new(&name, version);
        match self.content.get(&address).map_err(StoreError::ReadFailure)? {
            Some(blob) => Ok(FetchedFile {
                name,
                version,
                address,
                blob,
            }),
            None => {
                warn!(address = %address, "Version record has no blob");
                Err(StoreError::NotFound(address.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{Backend, BackendConfig, FsContentStore, MemoryContentStore};
    use tempfile::TempDir;

    fn memory_store() -> (VersionedFileStore, Arc<MemoryContentStore>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let backend = Backend::new(BackendConfig {
            data_dir: temp_dir.path().to_path_buf(),
            ..Default::default()
        })
        .unwrap();
        let content = Arc::new(MemoryContentStore::new());
        let store = VersionedFileStore::new(Arc::new(MetadataIndex::new(backend)), content.clone());
        (store, content, temp_dir)
    }

    fn fetch_bytes(store: &VersionedFileStore, name: &str, version: Option<u64>) -> Vec<u8> {
        store.fetch(name, version).unwrap().blob.into_bytes().unwrap()
    }

    #[test]
    fn test_save_then_fetch_latest_and_specific() {
        let (store, _content, _dir) = memory_store();

        let first = store.save("a.txt", &mut &b"x"[..], Some("text/plain")).unwrap();
        assert_eq!(first.version, 1);
        assert_eq!(first.size, 1);
        assert_eq!(first.content_type.as_deref(), Some("text/plain"));

        let second = store.save("a.txt", &mut &b"y"[..], None).unwrap();
        assert_eq!(second.version, 2);

        let listed = store.list().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "a.txt");
        assert_eq!(listed[0].latest_version, 2);

        assert_eq!(fetch_bytes(&store, "a.txt", None), b"y");
        assert_eq!(fetch_bytes(&store, "a.txt", Some(1)), b"x");
    }

    #[test]
    fn test_delete_version_keeps_others() {
        let (store, _content, _dir) = memory_store();
        store.save("a.txt", &mut &b"x"[..], None).unwrap();
        store.save("a.txt", &mut &b"y"[..], None).unwrap();

        store.delete_version("a.txt", 1).unwrap();
        assert!(store.fetch("a.txt", Some(1)).unwrap_err().is_not_found());
        assert_eq!(fetch_bytes(&store, "a.txt", Some(2)), b"y");
    }

    #[test]
    fn test_invalid_names_fail_before_io() {
        let (store, content, _dir) = memory_store();

        for bad in ["", "  ", "../secret", "dir/../../secret"] {
            let err = store.save(bad, &mut &b"data"[..], None).unwrap_err();
            assert!(matches!(err, StoreError::InvalidName(_)), "{bad:?} -> {err}");
        }
        assert!(content.is_empty());
        assert!(store.list().unwrap().is_empty());

        assert!(matches!(store.fetch("../secret", None), Err(StoreError::InvalidName(_))));
        assert!(matches!(store.delete("../x"), Err(StoreError::InvalidName(_))));
    }

    #[test]
    fn test_whole_file_delete_resets_numbering() {
        let (store, content, _dir) = memory_store();
        store.save("a.txt", &mut &b"x"[..], None).unwrap();
        store.save("a.txt", &mut &b"y"[..], None).unwrap();
        assert_eq!(content.len(), 2);

        store.delete("a.txt").unwrap();
        assert!(content.is_empty());
        assert!(store.index().find_file_by_name("a.txt").unwrap().is_none());
        assert!(store.list().unwrap().is_empty());

        let again = store.save("a.txt", &mut &b"z"[..], None).unwrap();
        assert_eq!(again.version, 1);
        assert_eq!(fetch_bytes(&store, "a.txt", None), b"z");
    }

    #[test]
    fn test_deleting_last_version_keeps_file_row() {
        let (store, _content, _dir) = memory_store();
        store.save("a.txt", &mut &b"x"[..], None).unwrap();

        store.delete_version("a.txt", 1).unwrap();
        assert!(store.list().unwrap().is_empty());
        assert!(store.index().find_file_by_name("a.txt").unwrap().is_some());
        assert!(store.fetch("a.txt", None).unwrap_err().is_not_found());

        let next = store.save("a.txt", &mut &b"y"[..], None).unwrap();
        assert_eq!(next.version, 2);
    }

    #[test]
    fn test_update_never_creates() {
        let (store, content, _dir) = memory_store();
        let err = store.update_version("a.txt", &mut &b"x"[..], 1, None).unwrap_err();
        assert!(err.is_not_found());
        assert!(content.is_empty());
        assert!(store.index().find_file_by_name("a.txt").unwrap().is_none());

        store.save("a.txt", &mut &b"x"[..], None).unwrap();
        let err = store.update_version("a.txt", &mut &b"y"[..], 5, None).unwrap_err();
        assert!(err.is_not_found());
        assert!(store.index().find_version("a.txt", 5).unwrap().is_none());
        assert_eq!(content.len(), 1);
    }

    #[test]
    fn test_update_overwrites_and_refreshes_timestamp() {
        let (store, _content, _dir) = memory_store();
        store.save("a.txt", &mut &b"old"[..], None).unwrap();
        let before = store.index().find_version("a.txt", 1).unwrap().unwrap().last_modified;

        std::thread::sleep(std::time::Duration::from_millis(5));
        let outcome = store
            .update_version("a.txt", &mut &b"new content"[..], 1, Some("text/plain"))
            .unwrap();
        assert_eq!(outcome.version, 1);
        assert_eq!(outcome.size, 11);

        let after = store.index().find_version("a.txt", 1).unwrap().unwrap().last_modified;
        assert!(after > before);
        assert_eq!(fetch_bytes(&store, "a.txt", Some(1)), b"new content");
        assert_eq!(store.list_versions("a.txt").unwrap().len(), 1);
    }

    #[test]
    fn test_missing_targets_are_not_found() {
        let (store, _content, _dir) = memory_store();
        assert!(store.delete("nope").unwrap_err().is_not_found());
        assert!(store.delete_version("nope", 1).unwrap_err().is_not_found());
        assert!(store.fetch("nope", None).unwrap_err().is_not_found());
        assert!(store.list_versions("nope").unwrap_err().is_not_found());

        store.save("a.txt", &mut &b"x"[..], None).unwrap();
        assert!(store.delete_version("a.txt", 2).unwrap_err().is_not_found());
        assert!(store.fetch("a.txt", Some(2)).unwrap_err().is_not_found());
    }

    #[test]
    fn test_missing_blob_is_surfaced() {
        let (store, content, _dir) = memory_store();
        store.save("a.txt", &mut &b"x"[..], None).unwrap();
        content.delete(&BlobAddress::new("a.txt", 1)).unwrap();

        let err = store.fetch("a.txt", Some(1)).unwrap_err();
        assert!(err.is_not_found());
        // Not healed: the Version record is still there.
        assert!(store.index().find_version("a.txt", 1).unwrap().is_some());
    }

    #[test]
    fn test_names_with_shared_prefixes_keep_separate_content() {
        let temp_dir = TempDir::new().unwrap();
        let backend = Backend::new(BackendConfig {
            data_dir: temp_dir.path().join("metadata"),
            ..Default::default()
        })
        .unwrap();
        let content = FsContentStore::open(temp_dir.path().join("blobs")).unwrap();
        let store = VersionedFileStore::new(Arc::new(MetadataIndex::new(backend)), Arc::new(content));

        for i in 0..11 {
            store.save("a", &mut format!("a{}", i + 1).as_bytes(), None).unwrap();
        }
        store.save("1a", &mut &b"other"[..], None).unwrap();
        assert_eq!(fetch_bytes(&store, "a", Some(11)), b"a11");

        store.delete("1a").unwrap();
        assert_eq!(fetch_bytes(&store, "a", Some(11)), b"a11");

        // A name nested under another name, saved in both orders.
        store.save("x/y", &mut &b"inner"[..], None).unwrap();
        store.save("x", &mut &b"outer"[..], None).unwrap();
        store.save("p", &mut &b"outer"[..], None).unwrap();
        store.save("p/q", &mut &b"inner"[..], None).unwrap();
        assert_eq!(fetch_bytes(&store, "x", None), b"outer");
        assert_eq!(fetch_bytes(&store, "x/y", None), b"inner");
        assert_eq!(fetch_bytes(&store, "p", None), b"outer");
        assert_eq!(fetch_bytes(&store, "p/q", None), b"inner");

        store.delete("x").unwrap();
        assert_eq!(fetch_bytes(&store, "x/y", None), b"inner");
    }

    #[test]
    fn test_names_are_normalized_consistently() {
        let (store, content, _dir) = memory_store();
        store.save("dir\\a.txt", &mut &b"x"[..], None).unwrap();
        assert!(content.contains(&BlobAddress::new("dir/a.txt", 1)));
        assert_eq!(fetch_bytes(&store, "./dir/a.txt", None), b"x");
        assert_eq!(store.list().unwrap()[0].name, "dir/a.txt");
    }

    #[test]
    fn test_fs_backed_store_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let backend = Backend::new(BackendConfig {
            data_dir: temp_dir.path().join("metadata"),
            ..Default::default()
        })
        .unwrap();
        let content = Arc::new(FsContentStore::open(temp_dir.path().join("blobs")).unwrap());
        let store = VersionedFileStore::new(Arc::new(MetadataIndex::new(backend)), content);

        store.save("report.csv", &mut &b"a,b\n1,2\n"[..], Some("text/csv")).unwrap();
        assert!(temp_dir.path().join("blobs").join("1").join("report.csv").exists());
        assert_eq!(fetch_bytes(&store, "report.csv", None), b"a,b\n1,2\n");

        store.delete("report.csv").unwrap();
        assert!(!temp_dir.path().join("blobs").join("1").exists());
    }
}
