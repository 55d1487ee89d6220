//! Video cache configuration.
//!
//! Thresholds are fixed when the cache is constructed. The struct is
//! serializable so host applications can embed it in their own settings.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default maximum cache size in bytes (500 MiB).
pub const DEFAULT_MAX_CACHE_SIZE: u64 = 500 * 1024 * 1024;

/// Default maximum entry age in seconds (7 days).
pub const DEFAULT_MAX_AGE_SECS: u64 = 7 * 24 * 60 * 60;

/// Default low-water mark (80%).
/// Eviction shrinks the cache to this fraction of the maximum size.
pub const DEFAULT_LOW_WATER_RATIO: f64 = 0.80;

/// Downloads at or below this many bytes are treated as broken.
pub const DEFAULT_MIN_VALID_BYTES: u64 = 100;

/// Default number of feed items warmed ahead of the visible one.
pub const DEFAULT_LOOKAHEAD: usize = 3;

/// Minimum allowed lookahead.
pub const MIN_LOOKAHEAD: usize = 1;

/// Maximum allowed lookahead.
pub const MAX_LOOKAHEAD: usize = 8;

/// Name of the cache directory under the platform cache root.
pub const VIDEO_CACHE_DIR: &str = "video-cache";

/// Video cache configuration options.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheConfig {
    /// Whether caching is enabled. When disabled every source is remote.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Maximum total cache size in bytes.
    #[serde(default = "default_max_size")]
    pub max_size_bytes: u64,

    /// Maximum age of a cached video in seconds.
    #[serde(default = "default_max_age")]
    pub max_age_secs: u64,

    /// Low-water mark (0.0 - 1.0) eviction shrinks the cache to.
    #[serde(default = "default_low_water_ratio")]
    pub low_water_ratio: f64,

    /// Smallest download size (exclusive) accepted as a real video.
    #[serde(default = "default_min_valid_bytes")]
    pub min_valid_bytes: u64,

    /// Number of items after the visible one to preload.
    #[serde(default = "default_lookahead")]
    pub lookahead: usize,

    /// Optional TCP connect timeout for downloads, in seconds.
    /// Downloads themselves have no overall timeout.
    #[serde(default)]
    pub connect_timeout_secs: Option<u64>,

    /// Custom cache directory path (optional).
    /// If not set, uses default platform-specific location.
    #[serde(default)]
    pub custom_cache_dir: Option<PathBuf>,
}

const fn default_true() -> bool {
    true
}

const fn default_max_size() -> u64 {
    DEFAULT_MAX_CACHE_SIZE
}

const fn default_max_age() -> u64 {
    DEFAULT_MAX_AGE_SECS
}

const fn default_low_water_ratio() -> f64 {
    DEFAULT_LOW_WATER_RATIO
}

const fn default_min_valid_bytes() -> u64 {
    DEFAULT_MIN_VALID_BYTES
}

const fn default_lookahead() -> usize {
    DEFAULT_LOOKAHEAD
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_size_bytes: DEFAULT_MAX_CACHE_SIZE,
            max_age_secs: DEFAULT_MAX_AGE_SECS,
            low_water_ratio: DEFAULT_LOW_WATER_RATIO,
            min_valid_bytes: DEFAULT_MIN_VALID_BYTES,
            lookahead: DEFAULT_LOOKAHEAD,
            connect_timeout_secs: None,
            custom_cache_dir: None,
        }
    }
}

impl CacheConfig {
    /// Create a new cache configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum cache size.
    #[must_use]
    pub const fn with_max_size(mut self, max_size_bytes: u64) -> Self {
        self.max_size_bytes = max_size_bytes;
        self
    }

    /// Set the maximum entry age.
    #[must_use]
    pub const fn with_max_age(mut self, max_age_secs: u64) -> Self {
        self.max_age_secs = max_age_secs;
        self
    }

    /// Set the lookahead window size.
    #[must_use]
    pub const fn with_lookahead(mut self, lookahead: usize) -> Self {
        self.lookahead = lookahead;
        self
    }

    /// Set the minimum accepted download size.
    #[must_use]
    pub const fn with_min_valid_bytes(mut self, min_valid_bytes: u64) -> Self {
        self.min_valid_bytes = min_valid_bytes;
        self
    }

    /// Set the cache directory.
    #[must_use]
    pub fn with_cache_dir(mut self, path: PathBuf) -> Self {
        self.custom_cache_dir = Some(path);
        self
    }

    /// Disable caching entirely.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    /// Clamp out-of-range values.
    pub fn validate(&mut self) {
        self.lookahead = self.lookahead.clamp(MIN_LOOKAHEAD, MAX_LOOKAHEAD);
        if !(self.low_water_ratio > 0.0 && self.low_water_ratio <= 1.0) {
            self.low_water_ratio = DEFAULT_LOW_WATER_RATIO;
        }
    }

    /// Maximum entry age as a [`Duration`].
    #[must_use]
    pub const fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }

    /// Size eviction shrinks the cache to once it overflows.
    #[must_use]
    pub fn low_water_bytes(&self) -> u64 {
        (self.max_size_bytes as f64 * self.low_water_ratio) as u64
    }

    /// Resolved cache directory.
    #[must_use]
    pub fn cache_dir(&self) -> PathBuf {
        self.custom_cache_dir
            .clone()
            .unwrap_or_else(default_cache_directory)
    }
}

/// Get the default cache directory path.
#[must_use]
pub fn default_cache_directory() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| dirs::data_local_dir().unwrap_or_else(|| PathBuf::from(".")))
        .join("reelcache")
        .join(VIDEO_CACHE_DIR)
}
