//! Preload orchestration between the scrolling feed and the cache store.
//!
//! [`VideoCacheManager`] is constructed once at start-up and cloned into
//! whatever needs it. It:
//! - hands the player a [`PlaybackSource`] without waiting on the network
//! - starts at most one background download per cache key
//! - warms the next few feed items as the user scrolls
//! - unloads playback resources that scrolled out of the active window
//! - runs eviction after each completed download
//!
//! Cache faults never reach the player: on any storage or download error the
//! source falls back to the remote URL.
//!
//! All methods that start background work must be called from within a
//! Tokio runtime.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::CacheConfig;
use crate::error::{Error, Result};
use crate::eviction::EvictionPolicy;
use crate::fetch::{HttpFetcher, RequestHeaders, VideoFetcher, request_headers};
use crate::key::{self, CacheKey};
use crate::store::{CacheCleanupStats, CacheStats, CacheStore};
use crate::window::{PlaybackHandle, ResourceRegistry, VisibleWindow};

/// A feed item as supplied by the feed layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoDescriptor {
    /// Stable feed identifier.
    pub id: String,
    /// Remote URL of the video.
    pub video_url: String,
}

impl VideoDescriptor {
    /// Create a new descriptor.
    pub fn new(id: impl Into<String>, video_url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            video_url: video_url.into(),
        }
    }
}

/// Where the player should read a video from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PlaybackSource {
    /// A complete, fresh copy in the cache directory.
    Local {
        /// Path to the cached file.
        path: PathBuf,
    },
    /// Stream from the network.
    Remote {
        /// Remote URL.
        url: String,
        /// Headers the player must send (authorization, accept).
        headers: RequestHeaders,
    },
}

impl PlaybackSource {
    /// Whether this source points at a cached file.
    #[must_use]
    pub const fn is_local(&self) -> bool {
        matches!(self, Self::Local { .. })
    }
}

/// Cache state of a single video.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadState {
    /// Not on disk and not being downloaded.
    Uncached,
    /// A background download is running.
    Downloading,
    /// A fresh copy is on disk.
    Cached(PathBuf),
    /// The last download attempt failed; the next access retries.
    Failed(String),
}

impl std::fmt::Display for DownloadState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Uncached => write!(f, "Uncached"),
            Self::Downloading => write!(f, "Downloading"),
            Self::Cached(path) => write!(f, "Cached at {}", path.display()),
            Self::Failed(msg) => write!(f, "Failed: {msg}"),
        }
    }
}

/// Mutable state shared by all clones of the manager.
struct ManagerState {
    /// Downloads in progress, one per key.
    in_flight: HashMap<CacheKey, watch::Receiver<DownloadState>>,
    /// Keys known to be on disk, for quick re-reads.
    resolved: HashMap<CacheKey, PathBuf>,
    /// Playback handles bound to feed items.
    registry: ResourceRegistry,
    /// Visible item and lookahead.
    window: VisibleWindow,
    /// Bearer token for the video host.
    auth_token: Option<String>,
}

/// Result of [`VideoCacheManager::start_download`].
enum Download {
    /// A fresh copy is already on disk.
    Ready(PathBuf),
    /// A download is running; resolves to the final state.
    Pending(watch::Receiver<DownloadState>),
}

struct Inner {
    store: CacheStore,
    eviction: EvictionPolicy,
    /// Validated number of items warmed ahead of the visible one.
    lookahead: usize,
    state: Mutex<ManagerState>,
    /// Set once the cache directory proved unusable; the rest of the session streams.
    storage_unavailable: AtomicBool,
}

/// Process-wide video cache front end.
#[derive(Clone)]
pub struct VideoCacheManager {
    inner: Arc<Inner>,
}

impl VideoCacheManager {
    /// Create a manager that downloads over HTTP(S).
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub async fn http(config: CacheConfig) -> Result<Self> {
        let connect_timeout = config
            .connect_timeout_secs
            .map(std::time::Duration::from_secs);
        let fetcher = HttpFetcher::with_connect_timeout(connect_timeout)?;
        Ok(Self::new(config, Arc::new(fetcher)).await)
    }

    /// Create a manager with a custom fetcher.
    pub async fn new(mut config: CacheConfig, fetcher: Arc<dyn VideoFetcher>) -> Self {
        config.validate();
        Self::from_store(CacheStore::new(config, fetcher)).await
    }

    /// Create a manager around an existing store.
    ///
    /// Prepares the cache directory and removes partial downloads left by a
    /// previous run. Failures here are not fatal: the manager then streams
    /// everything from the network. Out-of-range settings in the store's
    /// config are clamped for the manager's own use.
    pub async fn from_store(store: CacheStore) -> Self {
        let mut config = store.config().clone();
        config.validate();
        let manager = Self {
            inner: Arc::new(Inner {
                eviction: EvictionPolicy::from_config(&config),
                lookahead: config.lookahead,
                state: Mutex::new(ManagerState {
                    in_flight: HashMap::new(),
                    resolved: HashMap::new(),
                    registry: ResourceRegistry::new(),
                    window: VisibleWindow::new(config.lookahead),
                    auth_token: None,
                }),
                storage_unavailable: AtomicBool::new(false),
                store,
            }),
        };

        if !config.enabled {
            debug!("Video cache is disabled");
            return manager;
        }

        let store = &manager.inner.store;
        if let Err(e) = store.ensure_directory().await {
            manager.note_failure(&e);
            return manager;
        }
        match store.remove_partial_files().await {
            Ok(0) => {}
            Ok(n) => info!("Removed {} partial downloads from a previous run", n),
            Err(e) => warn!("Failed to clean partial downloads: {}", e),
        }

        info!("Video cache initialized at {}", store.cache_dir().display());
        manager
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &CacheStore {
        &self.inner.store
    }

    /// Whether the cache is currently used at all.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.inner.store.config().enabled
            && !self.inner.storage_unavailable.load(Ordering::Acquire)
    }

    /// Set or clear the bearer token used for downloads and remote sources.
    pub async fn set_auth_token(&self, token: Option<String>) {
        let mut state = self.inner.state.lock().await;
        state.auth_token = token;
    }

    /// Resolve where the player should read `video` from.
    ///
    /// Returns the cached file when a fresh copy exists. Otherwise starts a
    /// background download (unless one is already running) and returns the
    /// remote URL immediately; a later call picks up the cached file.
    ///
    /// # Errors
    ///
    /// Only [`Error::InvalidArgument`] for an empty URL. Cache faults degrade
    /// to a remote source.
    pub async fn playback_source(&self, video: &VideoDescriptor) -> Result<PlaybackSource> {
        let key = key::resolve(&video.video_url)?;
        let headers = self.current_headers().await;

        if !self.is_active() {
            return Ok(remote_source(video, headers));
        }

        match self.inner.store.is_fresh(&key).await {
            Ok(true) => {
                let path = self.inner.store.path_for(&key);
                debug!("Cache hit for {} ({})", video.id, key);
                let mut state = self.inner.state.lock().await;
                state.resolved.insert(key, path.clone());
                return Ok(PlaybackSource::Local { path });
            }
            Ok(false) => debug!("Cache miss for {} ({})", video.id, key),
            Err(e) => {
                self.note_failure(&e);
                return Ok(remote_source(video, headers));
            }
        }

        match self
            .start_download(key, video.video_url.clone(), headers.clone())
            .await
        {
            Ok(Download::Ready(path)) => Ok(PlaybackSource::Local { path }),
            Ok(Download::Pending(_)) => Ok(remote_source(video, headers)),
            Err(e) => {
                self.note_failure(&e);
                Ok(remote_source(video, headers))
            }
        }
    }

    /// Wait until `video` is cached and return its local path.
    ///
    /// Joins the running download for the key if there is one, so concurrent
    /// waiters share a single transfer and observe the same outcome.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache is inactive or the download fails.
    pub async fn wait_for_download(&self, video: &VideoDescriptor) -> Result<PathBuf> {
        let key = key::resolve(&video.video_url)?;
        if !self.is_active() {
            return Err(Error::StorageUnavailable {
                path: self.inner.store.cache_dir().to_path_buf(),
                reason: "video cache is disabled or unavailable".to_string(),
            });
        }

        if self.inner.store.is_fresh(&key).await? {
            return Ok(self.inner.store.path_for(&key));
        }

        let headers = self.current_headers().await;
        let mut rx = match self
            .start_download(key, video.video_url.clone(), headers)
            .await?
        {
            Download::Ready(path) => return Ok(path),
            Download::Pending(rx) => rx,
        };

        let outcome = rx
            .wait_for(|s| !matches!(s, DownloadState::Downloading))
            .await
            .map(|s| (*s).clone())
            .map_err(|_| {
                Error::download_incomplete(&video.video_url, "download task ended without a result")
            })?;

        match outcome {
            DownloadState::Cached(path) => Ok(path),
            DownloadState::Failed(reason) => {
                Err(Error::download_incomplete(&video.video_url, reason))
            }
            other => Err(Error::download_incomplete(
                &video.video_url,
                format!("unexpected download state: {other}"),
            )),
        }
    }

    /// Current cache state of `video`.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is empty.
    pub async fn download_state(&self, video: &VideoDescriptor) -> Result<DownloadState> {
        let key = key::resolve(&video.video_url)?;
        {
            let state = self.inner.state.lock().await;
            if state.in_flight.contains_key(&key) {
                return Ok(DownloadState::Downloading);
            }
        }

        if !self.is_active() {
            return Ok(DownloadState::Uncached);
        }

        match self.inner.store.is_fresh(&key).await {
            Ok(true) => Ok(DownloadState::Cached(self.inner.store.path_for(&key))),
            Ok(false) => Ok(DownloadState::Uncached),
            Err(e) => {
                self.note_failure(&e);
                Ok(DownloadState::Uncached)
            }
        }
    }

    /// Last known local path for `video`, without touching the disk.
    ///
    /// Set when a download completes or a fresh copy is found, cleared on a
    /// miss. The file may have been evicted since; use
    /// [`playback_source`](Self::playback_source) when in doubt.
    pub async fn resolved_path(&self, video: &VideoDescriptor) -> Option<PathBuf> {
        let key = key::resolve(&video.video_url).ok()?;
        let state = self.inner.state.lock().await;
        state.resolved.get(&key).cloned()
    }

    /// Warm the cache for the items following `current_index`.
    ///
    /// Runs in the background; the returned handle may be dropped.
    pub fn preload(&self, current_index: usize, items: &[VideoDescriptor]) -> JoinHandle<()> {
        let lookahead = self.inner.lookahead;
        let targets: Vec<VideoDescriptor> = items
            .iter()
            .skip(current_index.saturating_add(1))
            .take(lookahead)
            .cloned()
            .collect();

        let manager = self.clone();
        tokio::spawn(async move { manager.warm(targets).await })
    }

    /// React to the visible item changing to `index`.
    ///
    /// Moves the window, unloads playback handles that fell out of it, and
    /// preloads the lookahead. Runs in the background.
    pub fn on_visible_index_changed(
        &self,
        index: usize,
        items: &[VideoDescriptor],
    ) -> JoinHandle<()> {
        let items = items.to_vec();
        let manager = self.clone();

        tokio::spawn(async move {
            let targets = {
                let mut state = manager.inner.state.lock().await;
                state.window.set_current(index);
                let window = state.window;
                let released = state.registry.release_outside(&window);
                if !released.is_empty() {
                    debug!("Released playback resources for items {:?}", released);
                }
                items[window.lookahead_range(items.len())].to_vec()
            };
            manager.warm(targets).await;
        })
    }

    /// Bind a playback handle to feed item `index`.
    pub async fn attach(&self, index: usize, handle: Box<dyn PlaybackHandle>) {
        let mut state = self.inner.state.lock().await;
        state.registry.attach(index, handle);
    }

    /// Unload the playback handle bound to `index`, if any.
    pub async fn release(&self, index: usize) -> bool {
        let mut state = self.inner.state.lock().await;
        state.registry.release(index)
    }

    /// Feed indices that currently hold a playback handle.
    pub async fn attached_indices(&self) -> Vec<usize> {
        let state = self.inner.state.lock().await;
        state.registry.attached_indices()
    }

    /// Index of the visible feed item.
    pub async fn current_index(&self) -> usize {
        let state = self.inner.state.lock().await;
        state.window.current_index()
    }

    /// Run an eviction pass now, sparing keys with a download in flight.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache directory cannot be listed.
    pub async fn run_eviction(&self) -> Result<CacheCleanupStats> {
        let protected = self.in_flight_keys().await;
        self.inner.eviction.run(&self.inner.store, &protected).await
    }

    /// Get cache statistics.
    pub async fn stats(&self) -> Result<CacheStats> {
        self.inner.store.stats().await
    }

    /// Remove every cached video.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache directory cannot be listed.
    pub async fn clear(&self) -> Result<CacheCleanupStats> {
        let stats = self.inner.store.clear().await?;
        let mut state = self.inner.state.lock().await;
        state.resolved.clear();
        Ok(stats)
    }

    async fn warm(&self, targets: Vec<VideoDescriptor>) {
        for video in targets {
            if let Err(e) = self.playback_source(&video).await {
                warn!("Skipping preload of {}: {}", video.id, e);
            }
        }
    }

    async fn current_headers(&self) -> RequestHeaders {
        let state = self.inner.state.lock().await;
        request_headers(state.auth_token.as_deref())
    }

    async fn in_flight_keys(&self) -> HashSet<CacheKey> {
        let state = self.inner.state.lock().await;
        state.in_flight.keys().cloned().collect()
    }

    /// Register a download for `key`, or join the one already running.
    ///
    /// Freshness is checked again under the state lock: a download that
    /// finished since the caller's check has already left `in_flight`.
    async fn start_download(
        &self,
        key: CacheKey,
        url: String,
        headers: RequestHeaders,
    ) -> Result<Download> {
        let mut state = self.inner.state.lock().await;
        if let Some(rx) = state.in_flight.get(&key) {
            debug!("Joining in-flight download for {}", key);
            return Ok(Download::Pending(rx.clone()));
        }

        if self.inner.store.is_fresh(&key).await? {
            let path = self.inner.store.path_for(&key);
            state.resolved.insert(key, path.clone());
            return Ok(Download::Ready(path));
        }
        state.resolved.remove(&key);

        let (tx, rx) = watch::channel(DownloadState::Downloading);
        state.in_flight.insert(key.clone(), rx.clone());
        drop(state);

        let manager = self.clone();
        tokio::spawn(async move { manager.run_download(key, url, headers, tx).await });
        Ok(Download::Pending(rx))
    }

    async fn run_download(
        &self,
        key: CacheKey,
        url: String,
        headers: RequestHeaders,
        tx: watch::Sender<DownloadState>,
    ) {
        let outcome = match self.inner.store.write(&key, &url, &headers).await {
            Ok(path) => {
                let mut protected = self.in_flight_keys().await;
                protected.insert(key.clone());
                if let Err(e) = self.inner.eviction.run(&self.inner.store, &protected).await {
                    warn!("Eviction after download of {} failed: {}", key, e);
                }
                DownloadState::Cached(path)
            }
            Err(e) => {
                warn!("Caching {} failed, playback stays remote: {}", url, e);
                self.note_failure(&e);
                DownloadState::Failed(e.to_string())
            }
        };

        {
            let mut state = self.inner.state.lock().await;
            state.in_flight.remove(&key);
            match &outcome {
                DownloadState::Cached(path) => {
                    state.resolved.insert(key, path.clone());
                }
                _ => {
                    state.resolved.remove(&key);
                }
            }
        }

        tx.send_replace(outcome);
    }

    fn note_failure(&self, err: &Error) {
        if matches!(err, Error::StorageUnavailable { .. })
            && !self.inner.storage_unavailable.swap(true, Ordering::AcqRel)
        {
            warn!("Video cache storage unavailable, streaming for this session: {}", err);
        }
    }
}

impl std::fmt::Debug for VideoCacheManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoCacheManager")
            .field("store", &self.inner.store)
            .finish_non_exhaustive()
    }
}

fn remote_source(video: &VideoDescriptor, headers: RequestHeaders) -> PlaybackSource {
    PlaybackSource::Remote {
        url: video.video_url.clone(),
        headers,
    }
}
