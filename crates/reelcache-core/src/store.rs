//! On-disk storage for cached videos.
//!
//! The [`CacheStore`] is the only component that reads, writes or deletes
//! files in the cache directory. The directory is flat: one file per video,
//! named by its [`CacheKey`], plus transient `<key>.part` files while a
//! download is running. There is no manifest; size and freshness come from
//! filesystem metadata alone.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use reelcache_core::{CacheConfig, CacheStore, HttpFetcher, key, request_headers};
//!
//! let store = CacheStore::new(CacheConfig::default(), Arc::new(HttpFetcher::new()?));
//! let key = key::resolve("https://cdn.example.com/reels/42.mp4")?;
//!
//! if !store.is_fresh(&key).await? {
//!     let headers = request_headers(Some("token"));
//!     store.write(&key, "https://cdn.example.com/reels/42.mp4", &headers).await?;
//! }
//! ```

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::CacheConfig;
use crate::error::{Error, Result};
use crate::fetch::{RequestHeaders, VideoFetcher};
use crate::key::{self, CacheKey, PARTIAL_SUFFIX};

/// A cached video as seen on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Cache key (also the file name).
    pub key: CacheKey,
    /// Absolute path to the cached file.
    pub path: PathBuf,
    /// Size of the cached file in bytes.
    pub size_bytes: u64,
    /// File modification time; used both as freshness and recency signal.
    pub last_modified: SystemTime,
}

impl CacheEntry {
    /// Age of this entry at `now`. A modification time in the future counts as zero.
    #[must_use]
    pub fn age(&self, now: SystemTime) -> Duration {
        now.duration_since(self.last_modified)
            .unwrap_or(Duration::ZERO)
    }

    /// Check if this entry is older than `max_age` at `now`.
    #[must_use]
    pub fn is_expired(&self, max_age: Duration, now: SystemTime) -> bool {
        self.age(now) > max_age
    }
}

/// Statistics from a cleanup, eviction or clear pass.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct CacheCleanupStats {
    /// Number of entries removed.
    pub entries_removed: usize,
    /// Bytes freed by cleanup.
    pub bytes_freed: u64,
    /// Number of expired entries removed.
    pub expired_entries: usize,
    /// Number of entries removed for space.
    pub space_reclaimed_entries: usize,
    /// Number of deletes that failed and were skipped.
    pub failures: usize,
    /// Total size of the entries left behind.
    pub remaining_bytes: u64,
    /// Duration of the cleanup operation.
    pub duration_ms: u64,
}

/// Statistics about the current cache state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheStats {
    /// Total number of entries in cache.
    pub total_entries: usize,
    /// Total size in bytes.
    pub total_size_bytes: u64,
    /// Maximum allowed size in bytes.
    pub max_size_bytes: u64,
    /// Usage percentage (0.0 - 1.0).
    pub usage_percentage: f64,
    /// Whether caching is enabled.
    pub enabled: bool,
}

/// Filesystem-backed video cache directory.
pub struct CacheStore {
    config: CacheConfig,
    cache_dir: PathBuf,
    clock: Arc<dyn Clock>,
    fetcher: Arc<dyn VideoFetcher>,
}

impl CacheStore {
    /// Create a store for the directory named by `config`.
    ///
    /// Nothing is touched on disk until the first operation.
    #[must_use]
    pub fn new(config: CacheConfig, fetcher: Arc<dyn VideoFetcher>) -> Self {
        let cache_dir = config.cache_dir();
        Self {
            config,
            cache_dir,
            clock: Arc::new(SystemClock),
            fetcher,
        }
    }

    /// Replace the time source.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Get the cache directory path.
    #[must_use]
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Get the cache configuration.
    #[must_use]
    pub const fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Current time according to the store's clock.
    #[must_use]
    pub fn now(&self) -> SystemTime {
        self.clock.now()
    }

    /// Final path of the cached video for `key`.
    #[must_use]
    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        key::path_for(&self.cache_dir, key)
    }

    /// Create the cache directory (and parents) if it does not exist.
    pub async fn ensure_directory(&self) -> Result<()> {
        fs::create_dir_all(&self.cache_dir)
            .await
            .map_err(|e| Error::storage(&self.cache_dir, &e))
    }

    /// Stat a single entry. Returns `None` if nothing is cached under `key`.
    pub async fn entry(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        let path = self.path_for(key);
        let metadata = match fs::metadata(&path).await {
            Ok(m) => m,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::storage(&path, &e)),
        };
        if !metadata.is_file() {
            return Ok(None);
        }
        let last_modified = metadata.modified().map_err(|e| Error::storage(&path, &e))?;

        Ok(Some(CacheEntry {
            key: key.clone(),
            path,
            size_bytes: metadata.len(),
            last_modified,
        }))
    }

    /// Whether a fresh copy of `key` is on disk.
    ///
    /// A stale copy is deleted as a side effect and reported as not fresh.
    /// The entry is stat'ed again right before the delete so a download that
    /// replaced it in the meantime is kept. The stat and the delete are not
    /// atomic: a rename landing between them still loses the new file, which
    /// the next lookup downloads again.
    pub async fn is_fresh(&self, key: &CacheKey) -> Result<bool> {
        let max_age = self.config.max_age();
        let Some(entry) = self.entry(key).await? else {
            return Ok(false);
        };
        if !entry.is_expired(max_age, self.now()) {
            return Ok(true);
        }

        match self.entry(key).await? {
            Some(current) if !current.is_expired(max_age, self.now()) => {
                debug!("Cache entry {} was replaced while expiring it", key);
                Ok(true)
            }
            Some(_) => {
                debug!("Expiring stale cache entry {}", key);
                if let Err(e) = self.delete(key).await {
                    warn!("Failed to remove stale cache entry {}: {}", key, e);
                }
                Ok(false)
            }
            None => Ok(false),
        }
    }

    /// Download `url` into the cache under `key` and return the local path.
    ///
    /// The body is written to `<key>.part` and only renamed to its final name
    /// once it is known to be larger than `min_valid_bytes`, so a partial
    /// download is never visible as a cache entry. Must not be called twice
    /// concurrently for the same key; go through
    /// [`VideoCacheManager`](crate::preload::VideoCacheManager) instead.
    pub async fn write(
        &self,
        key: &CacheKey,
        url: &str,
        headers: &RequestHeaders,
    ) -> Result<PathBuf> {
        self.ensure_directory().await?;

        let partial = key::partial_path_for(&self.cache_dir, key);
        let final_path = self.path_for(key);

        info!("Downloading {} into cache entry {}", url, key);

        let size = match self.fetcher.fetch_to(url, headers, &partial).await {
            Ok(_) => fs::metadata(&partial)
                .await
                .map(|m| m.len())
                .map_err(|e| Error::storage(&partial, &e)),
            Err(e) => Err(e),
        };

        let size = match size {
            Ok(size) => size,
            Err(e) => {
                self.discard_partial(&partial).await;
                return Err(e);
            }
        };

        if size <= self.config.min_valid_bytes {
            self.discard_partial(&partial).await;
            return Err(Error::download_incomplete(
                url,
                format!(
                    "received {size} bytes, expected more than {}",
                    self.config.min_valid_bytes
                ),
            ));
        }

        if let Err(e) = fs::rename(&partial, &final_path).await {
            self.discard_partial(&partial).await;
            return Err(Error::storage(&final_path, &e));
        }

        info!("Cached {} ({} bytes)", key, size);
        Ok(final_path)
    }

    /// Remove the cached file for `key`. Missing files are not an error.
    pub async fn delete(&self, key: &CacheKey) -> Result<()> {
        remove_if_exists(&self.path_for(key)).await
    }

    /// Snapshot of every entry in the cache directory.
    ///
    /// Partial downloads and files whose name is not a cache key are skipped.
    /// Entries removed while listing are silently dropped from the result.
    pub async fn list_entries(&self) -> Result<Vec<CacheEntry>> {
        let mut dir = match fs::read_dir(&self.cache_dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::storage(&self.cache_dir, &e)),
        };

        let mut entries = Vec::new();
        while let Some(item) = dir
            .next_entry()
            .await
            .map_err(|e| Error::storage(&self.cache_dir, &e))?
        {
            let Some(key) = item.file_name().to_str().and_then(CacheKey::parse) else {
                continue;
            };
            let Ok(metadata) = item.metadata().await else {
                continue;
            };
            if !metadata.is_file() {
                continue;
            }
            let Ok(last_modified) = metadata.modified() else {
                continue;
            };

            entries.push(CacheEntry {
                key,
                path: item.path(),
                size_bytes: metadata.len(),
                last_modified,
            });
        }

        Ok(entries)
    }

    /// Get cache statistics.
    pub async fn stats(&self) -> Result<CacheStats> {
        let entries = self.list_entries().await?;
        let total_size_bytes = entries.iter().map(|e| e.size_bytes).sum();

        let usage_percentage = if self.config.max_size_bytes > 0 {
            total_size_bytes as f64 / self.config.max_size_bytes as f64
        } else {
            0.0
        };

        Ok(CacheStats {
            total_entries: entries.len(),
            total_size_bytes,
            max_size_bytes: self.config.max_size_bytes,
            usage_percentage,
            enabled: self.config.enabled,
        })
    }

    /// Remove every cached video.
    pub async fn clear(&self) -> Result<CacheCleanupStats> {
        let start = std::time::Instant::now();
        let mut stats = CacheCleanupStats::default();

        for entry in self.list_entries().await? {
            match self.delete(&entry.key).await {
                Ok(()) => {
                    stats.entries_removed += 1;
                    stats.bytes_freed += entry.size_bytes;
                }
                Err(e) => {
                    warn!("Failed to remove {}: {}", entry.path.display(), e);
                    stats.failures += 1;
                    stats.remaining_bytes += entry.size_bytes;
                }
            }
        }

        stats.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "Cache cleared: {} entries, {} bytes",
            stats.entries_removed, stats.bytes_freed
        );
        Ok(stats)
    }

    /// Delete `.part` files left behind by an interrupted run.
    ///
    /// Only safe while no download is in flight, i.e. at start-up.
    pub async fn remove_partial_files(&self) -> Result<usize> {
        let mut dir = match fs::read_dir(&self.cache_dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(Error::storage(&self.cache_dir, &e)),
        };

        let mut removed = 0;
        while let Some(item) = dir
            .next_entry()
            .await
            .map_err(|e| Error::storage(&self.cache_dir, &e))?
        {
            let path = item.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(PARTIAL_SUFFIX) {
                continue;
            }
            match remove_if_exists(&path).await {
                Ok(()) => {
                    removed += 1;
                    debug!("Removed leftover partial download {}", path.display());
                }
                Err(e) => warn!("{}", e),
            }
        }

        Ok(removed)
    }

    async fn discard_partial(&self, partial: &Path) {
        if let Err(e) = remove_if_exists(partial).await {
            warn!("Failed to remove partial download: {}", e);
        }
    }
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("cache_dir", &self.cache_dir)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

async fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::storage(path, &e)),
    }
}
