//! On-disk conversion cache.
//!
//! Maps the canonical key of a [`ConversionRequest`] to a converted artifact
//! on disk. Artifacts are computed on demand, at most once per key at a time,
//! and are bounded by entry count, total bytes and age. The cache owns every
//! artifact it indexes: evicted, expired and invalidated artifacts are deleted.
//!
//! The index and the in-flight map share one mutex which is never held
//! across an `.await`. Files are deleted after the lock is released.

mod flight;

use gifforge_common::{ConversionRequest, Error, Result};
use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, trace, warn};
use utoipa::ToSchema;

use self::flight::InFlight;
use crate::config::CacheConfig;
use crate::conversion::Convert;
use crate::scratch;

/// Bounds and expiry behaviour of a [`ConversionCache`].
#[derive(Debug, Clone)]
pub struct CacheSettings {
    /// Maximum number of indexed artifacts.
    pub max_files: usize,
    /// Maximum total size of indexed artifacts.
    pub max_bytes: u64,
    /// Artifact lifetime, `None` for no expiry.
    pub ttl: Option<Duration>,
    /// Serve expired artifacts while they are recomputed in the background.
    pub allow_stale: bool,
    /// Size charged for an artifact that cannot be stat'ed.
    pub fallback_entry_bytes: u64,
}

impl CacheSettings {
    pub fn from_config(config: &CacheConfig) -> Self {
        Self {
            max_files: config.max_files,
            max_bytes: config.max_size_bytes,
            ttl: config.ttl(),
            allow_stale: config.allow_stale,
            fallback_entry_bytes: config.fallback_entry_bytes(),
        }
    }
}

/// Point-in-time view of the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct CacheStats {
    /// Indexed artifacts, including expired ones not yet removed.
    pub entries: usize,
    /// Total size of indexed artifacts in bytes.
    pub total_bytes: u64,
    /// Conversions currently running.
    pub in_flight: usize,
    pub max_files: usize,
    pub max_bytes: u64,
}

struct CacheEntry {
    path: PathBuf,
    size: u64,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

struct CacheState {
    index: LruCache<String, CacheEntry>,
    total_bytes: u64,
    in_flight: HashMap<String, Arc<InFlight>>,
}

impl CacheState {
    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.index.pop(key)?;
        self.total_bytes = self.total_bytes.saturating_sub(entry.size);
        Some(entry)
    }

    fn over_capacity(&self, settings: &CacheSettings) -> bool {
        self.index.len() > settings.max_files || self.total_bytes > settings.max_bytes
    }
}

enum Lookup {
    Hit(PathBuf),
    Stale(PathBuf),
    Wait(Arc<InFlight>),
}

struct Inner {
    state: Mutex<CacheState>,
    converter: Arc<dyn Convert>,
    settings: CacheSettings,
}

/// Single-flight, LRU, size and TTL bounded cache of converted artifacts.
#[derive(Clone)]
pub struct ConversionCache {
    inner: Arc<Inner>,
}

impl ConversionCache {
    /// Create an empty cache that converts misses with `converter`.
    pub fn new(converter: Arc<dyn Convert>, settings: CacheSettings) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(CacheState {
                    index: LruCache::unbounded(),
                    total_bytes: 0,
                    in_flight: HashMap::new(),
                }),
                converter,
                settings,
            }),
        }
    }

    /// Path of the artifact for `request`, converting it if needed.
    ///
    /// Concurrent calls for the same request share one conversion. The
    /// conversion runs in its own task and is not cancelled when callers go
    /// away. Failures are returned to every waiter and are not cached.
    pub async fn get(&self, request: &ConversionRequest) -> Result<PathBuf> {
        let key = request.canonical_key();
        let mut expired = None;

        let lookup = {
            let mut state = self.inner.state.lock();
            let now = Instant::now();
            let status = state
                .index
                .get(&key)
                .map(|entry| (entry.path.clone(), entry.is_expired(now)));

            match status {
                Some((path, false)) => Lookup::Hit(path),
                Some((path, true)) if self.inner.settings.allow_stale => {
                    self.inner.join_or_start(&mut state, &key, request);
                    Lookup::Stale(path)
                }
                Some((_, true)) => {
                    expired = state.remove(&key);
                    Lookup::Wait(self.inner.join_or_start(&mut state, &key, request))
                }
                None => Lookup::Wait(self.inner.join_or_start(&mut state, &key, request)),
            }
        };

        if let Some(entry) = expired {
            debug!(%key, "Artifact expired");
            scratch::dispose(&entry.path);
        }

        match lookup {
            Lookup::Hit(path) => {
                trace!(%key, "Cache hit");
                Ok(path)
            }
            Lookup::Stale(path) => {
                debug!(%key, "Serving stale artifact while refreshing");
                Ok(path)
            }
            Lookup::Wait(flight) => flight.wait().await,
        }
    }

    /// Like [`get`](Self::get), but repairs an entry whose file has vanished.
    ///
    /// A missing file is dropped from the index and converted again once. If
    /// the fresh artifact is missing as well the cache is considered corrupt.
    pub async fn get_verified(&self, request: &ConversionRequest) -> Result<PathBuf> {
        let path = self.get(request).await?;
        if file_exists(&path).await {
            return Ok(path);
        }

        let key = request.canonical_key();
        warn!(%key, path = %path.display(), "Cached artifact is missing, converting again");
        self.inner.remove_missing(&key, &path);

        let path = self.get(request).await?;
        if file_exists(&path).await {
            return Ok(path);
        }

        error!(%key, path = %path.display(), "Artifact missing right after conversion");
        Err(Error::cache_corrupt(key))
    }

    /// Drop the entry for `request` and delete its artifact.
    ///
    /// Returns whether an entry was removed. Running conversions are not
    /// affected.
    pub fn invalidate(&self, request: &ConversionRequest) -> bool {
        let key = request.canonical_key();
        let removed = self.inner.state.lock().remove(&key);

        match removed {
            Some(entry) => {
                debug!(%key, "Invalidated artifact");
                scratch::dispose(&entry.path);
                true
            }
            None => false,
        }
    }

    /// Whether a live artifact is indexed for `request`. Does not touch recency.
    pub fn contains(&self, request: &ConversionRequest) -> bool {
        let key = request.canonical_key();
        let state = self.inner.state.lock();
        state
            .index
            .peek(&key)
            .is_some_and(|entry| !entry.is_expired(Instant::now()))
    }

    /// Remove every expired entry, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let expired: Vec<(String, CacheEntry)> = {
            let mut state = self.inner.state.lock();
            let now = Instant::now();
            let keys: Vec<String> = state
                .index
                .iter()
                .filter(|(_, entry)| entry.is_expired(now))
                .map(|(key, _)| key.clone())
                .collect();

            keys.into_iter()
                .filter_map(|key| state.remove(&key).map(|entry| (key, entry)))
                .collect()
        };

        for (key, entry) in &expired {
            debug!(%key, "Purging expired artifact");
            scratch::dispose(&entry.path);
        }
        expired.len()
    }

    /// Remove every entry and delete every artifact.
    ///
    /// Conversions still running are detached: their artifacts are deleted
    /// when they finish and their waiters receive an error.
    pub fn clear(&self) -> usize {
        let entries: Vec<CacheEntry> = {
            let mut state = self.inner.state.lock();
            state.in_flight.clear();
            state.total_bytes = 0;

            let mut entries = Vec::with_capacity(state.index.len());
            while let Some((_, entry)) = state.index.pop_lru() {
                entries.push(entry);
            }
            entries
        };

        for entry in &entries {
            scratch::dispose(&entry.path);
        }
        entries.len()
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.inner.state.lock();
        CacheStats {
            entries: state.index.len(),
            total_bytes: state.total_bytes,
            in_flight: state.in_flight.len(),
            max_files: self.inner.settings.max_files,
            max_bytes: self.inner.settings.max_bytes,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Inner {
    /// Return the running conversion for `key`, starting one if there is none.
    fn join_or_start(
        self: &Arc<Self>,
        state: &mut CacheState,
        key: &str,
        request: &ConversionRequest,
    ) -> Arc<InFlight> {
        if let Some(flight) = state.in_flight.get(key) {
            trace!(%key, "Joining running conversion");
            return Arc::clone(flight);
        }

        let flight = Arc::new(InFlight::new());
        state.in_flight.insert(key.to_string(), Arc::clone(&flight));

        let inner = Arc::clone(self);
        let key = key.to_string();
        let request = request.clone();
        let task_flight = Arc::clone(&flight);
        tokio::spawn(async move {
            inner.run(key, request, task_flight).await;
        });

        flight
    }

    async fn run(self: Arc<Self>, key: String, request: ConversionRequest, flight: Arc<InFlight>) {
        debug!(%request, "Starting conversion");

        // A panicking converter must still release the waiters.
        let converter = Arc::clone(&self.converter);
        let task = tokio::spawn(async move { converter.execute(&request).await });
        let result = match task.await {
            Ok(result) => result,
            Err(e) => Err(Error::internal(format!("conversion task failed: {}", e))),
        };

        let result = match result {
            Ok(path) => {
                let size = self.entry_size(&path).await;
                Ok((path, size))
            }
            Err(e) => Err(e),
        };

        self.complete(&key, &flight, result);
    }

    async fn entry_size(&self, path: &Path) -> u64 {
        match tokio::fs::metadata(path).await {
            Ok(meta) => meta.len(),
            Err(e) => {
                let fallback = self.settings.fallback_entry_bytes;
                warn!(
                    path = %path.display(),
                    error = %e,
                    fallback,
                    "Unable to stat artifact, charging fallback size"
                );
                fallback
            }
        }
    }

    fn complete(&self, key: &str, flight: &Arc<InFlight>, result: Result<(PathBuf, u64)>) {
        let mut to_dispose = Vec::new();

        let outcome = {
            let mut state = self.state.lock();
            let current = state
                .in_flight
                .get(key)
                .is_some_and(|running| Arc::ptr_eq(running, flight));
            if current {
                state.in_flight.remove(key);
            }

            match result {
                Ok((path, size)) if current => {
                    self.insert(&mut state, key, path.clone(), size, &mut to_dispose);
                    Ok(path)
                }
                Ok((path, _)) => {
                    to_dispose.push(path);
                    Err(Error::internal("conversion cache was cleared during conversion"))
                }
                Err(e) => Err(e),
            }
        };

        for path in &to_dispose {
            scratch::dispose(path);
        }

        if let Err(e) = &outcome {
            warn!(%key, error = %e, "Conversion failed");
        }
        flight.set_result(outcome);
    }

    /// Index a finished artifact and evict least recently used entries until
    /// both bounds hold again. The new entry itself is never evicted.
    fn insert(
        &self,
        state: &mut CacheState,
        key: &str,
        path: PathBuf,
        size: u64,
        to_dispose: &mut Vec<PathBuf>,
    ) {
        let entry = CacheEntry {
            path: path.clone(),
            size,
            expires_at: self.settings.ttl.map(|ttl| Instant::now() + ttl),
        };

        if let Some(replaced) = state.index.put(key.to_string(), entry) {
            state.total_bytes = state.total_bytes.saturating_sub(replaced.size);
            if replaced.path != path {
                to_dispose.push(replaced.path);
            }
        }
        state.total_bytes += size;
        debug!(%key, size, total_bytes = state.total_bytes, "Cached artifact");

        // The entry just inserted is the most recent, so pop_lru only reaches
        // it when it is alone.
        while state.over_capacity(&self.settings) && state.index.len() > 1 {
            let Some((evicted, entry)) = state.index.pop_lru() else {
                break;
            };
            state.total_bytes = state.total_bytes.saturating_sub(entry.size);
            debug!(key = %evicted, size = entry.size, "Evicting artifact");
            to_dispose.push(entry.path);
        }
    }

    /// Drop `key` if it still points at `path`.
    fn remove_missing(&self, key: &str, path: &Path) {
        let mut state = self.state.lock();
        if state.index.peek(key).is_some_and(|entry| entry.path == path) {
            state.remove(key);
        }
    }
}

async fn file_exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

/// Start a background task that removes expired artifacts every `resolution`.
pub fn start_purge_task(cache: ConversionCache, resolution: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(resolution);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            interval.tick().await;
            let removed = cache.purge_expired();
            if removed > 0 {
                debug!(removed, "Purged expired artifacts");
            }
        }
    })
}
