//! `Reelcache` Core Library
//!
//! This crate provides a local video cache for a vertically scrolling
//! short-video feed:
//! - Content-addressed storage of downloaded videos keyed by URL digest
//! - Playback source resolution that never blocks on the network
//! - Background preloading of the next feed items with per-key deduplication
//! - Size and age based eviction down to a low-water mark
//! - Release of playback resources that scrolled out of view
//!
//! # Error Handling
//!
//! Cache faults are soft: they are logged and playback falls back to the
//! remote URL. See the [`error`] module for the error kinds.
//!
//! ```rust,ignore
//! use reelcache_core::{CacheConfig, VideoCacheManager, VideoDescriptor};
//!
//! let manager = VideoCacheManager::http(CacheConfig::default()).await?;
//! let video = VideoDescriptor::new("reel-1", "https://cdn.example.com/reels/1.mp4");
//! let source = manager.playback_source(&video).await?;
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod eviction;
pub mod fetch;
pub mod key;
pub mod logging;
pub mod preload;
pub mod store;
pub mod window;

pub use clock::{Clock, SystemClock};
pub use config::{
    CacheConfig, DEFAULT_LOOKAHEAD, DEFAULT_LOW_WATER_RATIO, DEFAULT_MAX_AGE_SECS,
    DEFAULT_MAX_CACHE_SIZE, DEFAULT_MIN_VALID_BYTES, MAX_LOOKAHEAD, MIN_LOOKAHEAD,
    VIDEO_CACHE_DIR, default_cache_directory,
};
pub use error::{Error, Result};
pub use eviction::{EvictionPlan, EvictionPolicy};
pub use fetch::{HttpFetcher, RequestHeaders, VIDEO_ACCEPT, VideoFetcher, request_headers};
pub use key::{CacheKey, resolve};
pub use logging::{LogRotation, LoggingConfig, LoggingError, LoggingGuard, init as init_logging};
pub use preload::{DownloadState, PlaybackSource, VideoCacheManager, VideoDescriptor};
pub use store::{CacheCleanupStats, CacheEntry, CacheStats, CacheStore};
pub use window::{PlaybackHandle, ResourceRegistry, VisibleWindow};
