//! Content store: opaque address → bytes on a physical medium.
//!
//! Implementations know nothing about files or versions. `delete` is idempotent and
//! `get` reports a missing blob as `Ok(None)` so callers decide what absence means.

use std::collections::HashMap;
use std::fs;
use std::io::{self, Cursor, Read};
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use thiserror::Error;
use tracing::{debug, info, trace};

use crate::storage::address::BlobAddress;

/// Content store errors.
#[derive(Error, Debug)]
pub enum ContentError {
    #[error("IO error at {address}: {source}")]
    Io {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("Storage root unavailable: {0}")]
    Root(String),
}

impl ContentError {
    fn io(address: &BlobAddress, source: io::Error) -> Self {
        ContentError::Io {
            address: address.to_string(),
            source,
        }
    }
}

pub type ContentResult<T> = Result<T, ContentError>;

/// An open handle on a stored blob.
pub struct Blob {
    /// Length in bytes.
    pub len: u64,
    reader: Box<dyn Read + Send>,
}

impl Blob {
    pub fn new(len: u64, reader: Box<dyn Read + Send>) -> Self {
        Self { len, reader }
    }

    /// Reads the whole blob into memory.
    pub fn into_bytes(mut self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.len as usize);
        self.reader.read_to_end(&mut buf)?;
        Ok(buf)
    }

    /// Hands over the underlying reader for streaming.
    pub fn into_reader(self) -> Box<dyn Read + Send> {
        self.reader
    }
}

impl std::fmt::Debug for Blob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Blob").field("len", &self.len).finish_non_exhaustive()
    }
}

/// Key-value put/get/delete over raw bytes.
pub trait ContentStore: Send + Sync {
    /// Writes all of `source` at `address`, replacing anything already there.
    /// Returns the number of bytes written.
    fn put(&self, address: &BlobAddress, source: &mut dyn Read) -> ContentResult<u64>;

    /// Opens the blob at `address`, or `None` if nothing is stored there.
    fn get(&self, address: &BlobAddress) -> ContentResult<Option<Blob>>;

    /// Removes the blob at `address`. Removing a missing blob is not an error.
    fn delete(&self, address: &BlobAddress) -> ContentResult<()>;
}

/// Filesystem content store: each address is a file under `root`.
pub struct FsContentStore {
    root: PathBuf,
}

impl FsContentStore {
    /// Opens the store, creating `root` if it does not exist yet.
    pub fn open(root: impl AsRef<Path>) -> ContentResult<Self> {
        let root = root.as_ref();
        fs::create_dir_all(root)
            .map_err(|e| ContentError::Root(format!("{}: {}", root.display(), e)))?;
        let root = fs::canonicalize(root)
            .map_err(|e| ContentError::Root(format!("{}: {}", root.display(), e)))?;
        info!("Content store rooted at {}", root.display());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ContentStore for FsContentStore {
    fn put(&self, address: &BlobAddress, source: &mut dyn Read) -> ContentResult<u64> {
        let path = address.resolve(&self.root);
        let parent = path.parent().unwrap_or(&self.root);

        // Stream into a sibling temp file, then rename over the address. Escaped names
        // never contain a bare `%t`, so the temp name cannot shadow a blob.
        let tmp = parent.join(format!("%tmp-{}", uuid::Uuid::new_v4()));
        let written = (|| -> io::Result<u64> {
            let mut file = create_in_dir(parent, &tmp)?;
            let n = io::copy(source, &mut file)?;
            file.sync_all()?;
            fs::rename(&tmp, &path)?;
            Ok(n)
        })();

        match written {
            Ok(n) => {
                debug!(address = %address, bytes = n, "Blob written");
                Ok(n)
            }
            Err(e) => {
                let _ = fs::remove_file(&tmp);
                Err(ContentError::io(address, e))
            }
        }
    }

    fn get(&self, address: &BlobAddress) -> ContentResult<Option<Blob>> {
        let path = address.resolve(&self.root);
        match fs::File::open(&path) {
            Ok(file) => {
                let len = file.metadata().map_err(|e| ContentError::io(address, e))?.len();
                Ok(Some(Blob::new(len, Box::new(file))))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ContentError::io(address, e)),
        }
    }

    fn delete(&self, address: &BlobAddress) -> ContentResult<()> {
        let path = address.resolve(&self.root);
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(address = %address, "Blob removed");
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(ContentError::io(address, e)),
        }

        // Drop the version directory once its last blob is gone. Fails harmlessly while
        // other names still hold blobs at this version.
        if let Some(parent) = path.parent().filter(|p| *p != self.root.as_path()) {
            if fs::remove_dir(parent).is_ok() {
                trace!(dir = %parent.display(), "Removed empty version directory");
            }
        }
        Ok(())
    }
}

/// Creates `file` inside `dir`, creating `dir` first. A concurrent delete may remove the
/// directory once it empties, so creation is retried a few times.
fn create_in_dir(dir: &Path, file: &Path) -> io::Result<fs::File> {
    let mut attempts = 0;
    loop {
        fs::create_dir_all(dir)?;
        match fs::File::create(file) {
            Err(e) if e.kind() == io::ErrorKind::NotFound && attempts < 3 => attempts += 1,
            other => return other,
        }
    }
}

/// In-memory content store.
#[derive(Default)]
pub struct MemoryContentStore {
    blobs: RwLock<HashMap<BlobAddress, Vec<u8>>>,
}

impl MemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of blobs currently held.
    pub fn len(&self) -> usize {
        self.blobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.read().is_empty()
    }

    pub fn contains(&self, address: &BlobAddress) -> bool {
        self.blobs.read().contains_key(address)
    }
}

impl ContentStore for MemoryContentStore {
    fn put(&self, address: &BlobAddress, source: &mut dyn Read) -> ContentResult<u64> {
        let mut buf = Vec::new();
        source
            .read_to_end(&mut buf)
            .map_err(|e| ContentError::io(address, e))?;
        let n = buf.len() as u64;
        self.blobs.write().insert(address.clone(), buf);
        Ok(n)
    }

    fn get(&self, address: &BlobAddress) -> ContentResult<Option<Blob>> {
        Ok(self
            .blobs
            .read()
            .get(address)
            .map(|bytes| Blob::new(bytes.len() as u64, Box::new(Cursor::new(bytes.clone())))))
    }

    fn delete(&self, address: &BlobAddress) -> ContentResult<()> {
        self.blobs.write().remove(address);
        Ok(())
    }
}
