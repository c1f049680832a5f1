//! Metadata index: file name → File record → ordered Version records.
//!
//! Files live in the `files` tree keyed by normalized name. Versions live in an arena
//! (`versions` tree) keyed by `{file_id_be}{version_be}`, so each File owns one
//! contiguous, ascending key range. Deleting a File removes its whole range in the same
//! sled transaction that removes the File record.
//!
//! The index does not serialize concurrent allocations on its own; callers hold the
//! per-name guard from [`crate::storage::allocator::NameLocks`] around read-then-write
//! sequences. Each individual mutation below is atomic.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::Transactional;
use tracing::debug;

use crate::storage::address::VersionNumber;
use crate::storage::{Backend, IndexError, IndexResult};

/// A named logical entity grouping its Versions.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Arena identity; prefix of every owned Version key.
    pub id: u64,
    pub name: String,
    pub created_at: DateTime<Utc>,
    /// Highest version number ever allocated for this File. Survives version deletes.
    pub highest_version: VersionNumber,
}

/// One upload of a File's content.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRecord {
    /// Back-reference to the owning File.
    pub file_id: u64,
    pub version: VersionNumber,
    pub last_modified: DateTime<Utc>,
}

/// Aggregate row returned by [`MetadataIndex::list_summaries`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileSummary {
    pub name: String,
    pub latest_version: VersionNumber,
    pub last_modified: DateTime<Utc>,
}

fn version_key(file_id: u64, version: VersionNumber) -> [u8; 16] {
    let mut key = [0u8; 16];
    key[..8].copy_from_slice(&file_id.to_be_bytes());
    key[8..].copy_from_slice(&version.to_be_bytes());
    key
}

fn encode<T: Serialize>(value: &T) -> IndexResult<Vec<u8>> {
    Ok(bincode::serialize(value)?)
}

fn decode<'a, T: Deserialize<'a>>(bytes: &'a [u8]) -> IndexResult<T> {
    Ok(bincode::deserialize(bytes)?)
}

fn abort(err: impl Into<IndexError>) -> ConflictableTransactionError<IndexError> {
    ConflictableTransactionError::Abort(err.into())
}

/// The metadata index over the sled backend.
pub struct MetadataIndex {
    backend: Arc<Backend>,
}

impl MetadataIndex {
    pub fn new(backend: Arc<Backend>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &Arc<Backend> {
        &self.backend
    }

    pub fn find_file_by_name(&self, name: &str) -> IndexResult<Option<FileRecord>> {
        match self.backend.files().get(name.as_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// All Versions of `file`, ascending by version number.
    pub fn versions_of(&self, file: &FileRecord) -> IndexResult<Vec<VersionRecord>> {
        let mut out = Vec::new();
        for item in self.backend.versions().scan_prefix(file.id.to_be_bytes()) {
            let (_k, v) = item?;
            out.push(decode(&v)?);
        }
        Ok(out)
    }

    fn latest_of(&self, file: &FileRecord) -> IndexResult<Option<VersionRecord>> {
        match self.backend.versions().scan_prefix(file.id.to_be_bytes()).next_back() {
            Some(item) => {
                let (_k, v) = item?;
                Ok(Some(decode(&v)?))
            }
            None => Ok(None),
        }
    }

    /// Maximum version number among the File's existing Versions.
    pub fn latest_version_number(&self, name: &str) -> IndexResult<Option<VersionNumber>> {
        match self.find_file_by_name(name)? {
            Some(file) => Ok(self.latest_of(&file)?.map(|v| v.version)),
            None => Ok(None),
        }
    }

    /// Highest number ever handed out for `name`: the larger of the File's recorded
    /// high-water mark and its latest existing Version. `None` when no File exists.
    pub fn highest_allocated(&self, name: &str) -> IndexResult<Option<VersionNumber>> {
        match self.find_file_by_name(name)? {
            Some(file) => {
                let latest = self.latest_of(&file)?.map(|v| v.version).unwrap_or(0);
                Ok(Some(file.highest_version.max(latest)))
            }
            None => Ok(None),
        }
    }

    pub fn find_version(&self, name: &str, version: VersionNumber) -> IndexResult<Option<VersionRecord>> {
        let file = match self.find_file_by_name(name)? {
            Some(file) => file,
            None => return Ok(None),
        };
        match self.backend.versions().get(version_key(file.id, version))? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// One summary per File with at least one Version. Files whose Versions were all
    /// deleted are skipped.
    pub fn list_summaries(&self) -> IndexResult<Vec<FileSummary>> {
        let mut summaries = Vec::new();
        for item in self.backend.files().iter() {
            let (_k, v) = item?;
            let file: FileRecord = decode(&v)?;
            let versions = self.versions_of(&file)?;
            let latest = match versions.last() {
                Some(latest) => latest.version,
                None => continue,
            };
            let last_modified = versions
                .iter()
                .map(|v| v.last_modified)
                .max()
                .unwrap_or(file.created_at);
            summaries.push(FileSummary {
                name: file.name,
                latest_version: latest,
                last_modified,
            });
        }
        Ok(summaries)
    }

    /// Inserts or replaces the File record under its name.
    pub fn upsert_file(&self, file: &FileRecord) -> IndexResult<()> {
        self.backend.files().insert(file.name.as_bytes(), encode(file)?)?;
        Ok(())
    }

    /// Inserts or replaces one Version record. The owning File must already exist.
    pub fn save_version(&self, version: &VersionRecord) -> IndexResult<()> {
        self.backend
            .versions()
            .insert(version_key(version.file_id, version.version), encode(version)?)?;
        Ok(())
    }

    pub fn delete_version(&self, version: &VersionRecord) -> IndexResult<()> {
        self.backend
            .versions()
            .remove(version_key(version.file_id, version.version))?;
        Ok(())
    }

    /// Removes the File record and every Version it owns in one transaction.
    pub fn delete_file(&self, file: &FileRecord) -> IndexResult<()> {
        let mut version_keys = Vec::new();
        for item in self.backend.versions().scan_prefix(file.id.to_be_bytes()) {
            let (k, _v) = item?;
            version_keys.push(k);
        }

        let result: Result<(), TransactionError<IndexError>> =
            (self.backend.files(), self.backend.versions()).transaction(|(files, versions)| {
                files.remove(file.name.as_bytes())?;
                for key in &version_keys {
                    versions.remove(key.clone())?;
                }
                Ok(())
            });
        result?;

        debug!(name = %file.name, versions = version_keys.len(), "File deleted from index");
        Ok(())
    }

    /// Creates the File if absent, inserts the Version, and raises the File's
    /// high-water mark, all in one transaction. Fails if the Version already exists.
    pub fn commit_new_version(
        &self,
        name: &str,
        version: VersionNumber,
        timestamp: DateTime<Utc>,
    ) -> IndexResult<(FileRecord, VersionRecord)> {
        let fresh_id = self.backend.generate_id()?;

        let result: Result<(FileRecord, VersionRecord), TransactionError<IndexError>> =
            (self.backend.files(), self.backend.versions()).transaction(|(files, versions)| {
                let mut file = match files.get(name.as_bytes())? {
                    Some(bytes) => decode::<FileRecord>(&bytes).map_err(abort)?,
                    None => FileRecord {
                        id: fresh_id,
                        name: name.to_string(),
                        created_at: timestamp,
                        highest_version: 0,
                    },
                };

                let key = version_key(file.id, version);
                if versions.get(key)?.is_some() {
                    return Err(abort(IndexError::Corrupt(format!(
                        "version {} of {} already exists",
                        version, name
                    ))));
                }

                let record = VersionRecord {
                    file_id: file.id,
                    version,
                    last_modified: timestamp,
                };
                file.highest_version = file.highest_version.max(version);

                versions.insert(&key[..], encode(&record).map_err(abort)?)?;
                files.insert(name.as_bytes(), encode(&file).map_err(abort)?)?;
                Ok((file, record))
            });

        let (file, record) = result?;
        debug!(name = %name, version = version, file_id = file.id, "Version committed to index");
        Ok((file, record))
    }

    /// Sets the timestamp of an existing Version. Returns `None` if it does not exist.
    pub fn touch_version(
        &self,
        name: &str,
        version: VersionNumber,
        timestamp: DateTime<Utc>,
    ) -> IndexResult<Option<VersionRecord>> {
        let mut record = match self.find_version(name, version)? {
            Some(record) => record,
            None => return Ok(None),
        };
        record.last_modified = timestamp;
        self.save_version(&record)?;
        Ok(Some(record))
    }
}
