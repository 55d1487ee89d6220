//! Mapping from remote video URLs to cache keys and local paths.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Suffix of in-progress downloads.
pub const PARTIAL_SUFFIX: &str = "part";

/// Length of a key in hex characters (SHA-256).
pub const KEY_LEN: usize = 64;

/// Lowercase hex SHA-256 digest of a video URL.
///
/// Doubles as the file name of the cached video.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Parse a file name back into a key.
    ///
    /// Returns `None` for anything that is not exactly 64 lowercase hex characters.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        let valid = name.len() == KEY_LEN
            && name
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        valid.then(|| Self(name.to_string()))
    }

    /// The key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Compute the cache key for a remote URL.
///
/// # Errors
///
/// Returns [`Error::InvalidArgument`] if the URL is empty or only whitespace.
pub fn resolve(url: &str) -> Result<CacheKey> {
    if url.trim().is_empty() {
        return Err(Error::invalid_argument("video URL must not be empty"));
    }

    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    Ok(CacheKey(format!("{:x}", hasher.finalize())))
}

/// Final location of the cached video for `key`.
#[must_use]
pub fn path_for(cache_dir: &Path, key: &CacheKey) -> PathBuf {
    cache_dir.join(key.as_str())
}

/// Location a download for `key` is written to before it is moved into place.
#[must_use]
pub fn partial_path_for(cache_dir: &Path, key: &CacheKey) -> PathBuf {
    cache_dir.join(format!("{key}.{PARTIAL_SUFFIX}"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_is_deterministic() {
        let url = "https://cdn.example.com/reels/42.mp4";
        assert_eq!(resolve(url).unwrap(), resolve(url).unwrap());
    }

    #[test]
    fn test_resolve_known_digest() {
        // sha256("abc")
        let key = resolve("abc").unwrap();
        assert_eq!(
            key.as_str(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_distinct_urls_distinct_keys() {
        let a = resolve("https://cdn.example.com/reels/1.mp4").unwrap();
        let b = resolve("https://cdn.example.com/reels/1.mp4?").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_resolve_rejects_empty() {
        assert!(matches!(resolve(""), Err(Error::InvalidArgument(_))));
        assert!(matches!(resolve("   "), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_key_is_filesystem_safe() {
        let key = resolve("https://cdn.example.com/a b/ü?x=1&y=../../etc").unwrap();
        assert_eq!(key.as_str().len(), KEY_LEN);
        assert!(CacheKey::parse(key.as_str()).is_some());
    }

    #[test]
    fn test_parse_rejects_foreign_names() {
        assert!(CacheKey::parse("notes.txt").is_none());
        assert!(CacheKey::parse(&"A".repeat(KEY_LEN)).is_none());
        let key = resolve("abc").unwrap();
        assert!(CacheKey::parse(&format!("{key}.part")).is_none());
    }

    #[test]
    fn test_paths() {
        let dir = Path::new("/cache/video-cache");
        let key = resolve("abc").unwrap();
        assert_eq!(path_for(dir, &key), dir.join(key.as_str()));
        assert!(
            partial_path_for(dir, &key)
                .to_string_lossy()
                .ends_with(".part")
        );
    }
}
