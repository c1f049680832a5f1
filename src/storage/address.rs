//! File name normalization and blob address derivation.
//!
//! The content store never sees file names or version numbers, only the address
//! `{version}/{escaped name}`. Both the write path and the read path derive it through
//! [`BlobAddress::new`], so the two stores cannot drift apart on how a Version maps to bytes.
//!
//! The name is percent-escaped into a single path segment. Escaping is one-to-one and the
//! version is fenced off by the separator, so distinct `(name, version)` pairs never share
//! an address: `("1a", 1)` and `("a", 11)` land at `1/1a` and `11/a`, and `x` never
//! collides with the directory of `x/y`.

use std::fmt;
use std::path::{Path, PathBuf};

/// Version numbers start at 1 and are never reused within a File.
pub type VersionNumber = u64;

/// Cleans a client-supplied file name into the key used by both stores.
///
/// Backslashes become `/`, empty and `.` segments are dropped, and surrounding
/// whitespace is trimmed. Returns `None` when the name is empty after cleaning,
/// contains a `..` segment, or contains a NUL byte.
pub fn normalize_name(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.contains('\0') {
        return None;
    }

    let unified = trimmed.replace('\\', "/");
    let mut segments = Vec::new();
    for segment in unified.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return None,
            s => segments.push(s),
        }
    }

    if segments.is_empty() {
        return None;
    }
    Some(segments.join("/"))
}

/// The derived key under which one Version's blob is stored.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct BlobAddress(String);

impl BlobAddress {
    /// Derives the address for `(name, version)`. `name` must already be normalized.
    pub fn new(name: &str, version: VersionNumber) -> Self {
        Self(format!("{}/{}", version, urlencoding::encode(name)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Resolves the address to a location under `root`.
    pub fn resolve(&self, root: &Path) -> PathBuf {
        root.join(&self.0)
    }
}

impl fmt::Display for BlobAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_plain_name() {
        assert_eq!(normalize_name("a.txt"), Some("a.txt".to_string()));
        assert_eq!(normalize_name("  report.pdf "), Some("report.pdf".to_string()));
    }

    #[test]
    fn test_normalize_cleans_separators() {
        assert_eq!(normalize_name("dir\\sub\\a.txt"), Some("dir/sub/a.txt".to_string()));
        assert_eq!(normalize_name("./dir//a.txt"), Some("dir/a.txt".to_string()));
        assert_eq!(normalize_name("/abs/a.txt"), Some("abs/a.txt".to_string()));
    }

    #[test]
    fn test_normalize_rejects_traversal() {
        assert_eq!(normalize_name("../secret"), None);
        assert_eq!(normalize_name("dir/../../etc/passwd"), None);
        assert_eq!(normalize_name("..\\secret"), None);
        assert_eq!(normalize_name(".."), None);
    }

    #[test]
    fn test_normalize_allows_dots_inside_segment() {
        assert_eq!(normalize_name("archive..tar"), Some("archive..tar".to_string()));
        assert_eq!(normalize_name(".hidden"), Some(".hidden".to_string()));
    }

    #[test]
    fn test_normalize_rejects_empty() {
        assert_eq!(normalize_name(""), None);
        assert_eq!(normalize_name("   "), None);
        assert_eq!(normalize_name("/./"), None);
        assert_eq!(normalize_name("a\0b"), None);
    }

    #[test]
    fn test_address_derivation() {
        assert_eq!(BlobAddress::new("a.txt", 1).as_str(), "1/a.txt");
        assert_eq!(BlobAddress::new("a.txt", 12).to_string(), "12/a.txt");
        assert_eq!(
            BlobAddress::new("dir/a.txt", 3).resolve(Path::new("/root")),
            PathBuf::from("/root/3/dir%2Fa.txt")
        );
    }

    #[test]
    fn test_address_is_unique_across_names() {
        // Leading digits in the name must not merge with the version number.
        assert_ne!(BlobAddress::new("1a", 1), BlobAddress::new("a", 11));
        assert_ne!(BlobAddress::new("12", 3), BlobAddress::new("2", 31));

        // A name and a name nested under it stay separate leaves.
        let outer = BlobAddress::new("x", 1);
        let inner = BlobAddress::new("x/y", 1);
        assert_ne!(outer, inner);
        assert!(!inner.as_str().starts_with(&format!("{}/", outer.as_str())));

        // Escaped names cannot forge a separator or an escape of another name.
        assert_ne!(BlobAddress::new("x%2Fy", 1), inner);
        assert_eq!(BlobAddress::new("dir/a.txt", 2).as_str().matches('/').count(), 1);
    }
}
