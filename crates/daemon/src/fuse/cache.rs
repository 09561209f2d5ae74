//! Size-bounded TTL cache for transcoded file contents
//!
//! Buffers are keyed by real path. A miss spawns one production task per key;
//! every caller that misses while it runs awaits the same shared result, so a
//! file is transcoded at most once per miss window no matter how many kernel
//! reads race for it.
//!
//! Expiry is checked lazily on lookup. Admission evicts the least recently
//! populated entries until the new buffer fits under the ceiling; a buffer
//! larger than the whole ceiling is rejected.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use common::transcoder::{Transcoder, TranscoderError};
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    #[error("{0}")]
    Transcode(Arc<TranscoderError>),

    #[error("output of {size} bytes exceeds the cache ceiling of {ceiling} bytes")]
    CapacityExceeded { size: u64, ceiling: u64 },

    #[error("production task aborted: {0}")]
    Aborted(String),
}

/// Configuration for the transcode cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranscodeCacheConfig {
    /// Ceiling on the summed size of all cached buffers
    pub max_bytes: u64,
    /// Age after which an entry is treated as absent
    pub ttl: Duration,
}

impl Default for TranscodeCacheConfig {
    fn default() -> Self {
        Self::from_basic(512, 60)
    }
}

impl TranscodeCacheConfig {
    /// Create config from megabytes and seconds
    pub fn from_basic(max_size_mb: u32, ttl_secs: u32) -> Self {
        Self {
            max_bytes: max_size_mb as u64 * 1024 * 1024,
            ttl: Duration::from_secs(ttl_secs as u64),
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    data: Bytes,
    created_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.created_at) >= self.ttl
    }
}

type SharedProduction = Shared<BoxFuture<'static, Result<Bytes, CacheError>>>;

struct Pending {
    /// Distinguishes this production from a later one for the same key
    /// started after a release
    generation: u64,
    production: SharedProduction,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<PathBuf, CacheEntry>,
    /// Keys in population order, oldest first
    order: VecDeque<PathBuf>,
    pending: HashMap<PathBuf, Pending>,
    current_size: u64,
    next_generation: u64,
}

impl CacheState {
    fn lookup(&mut self, key: &Path, now: Instant) -> Option<Bytes> {
        let expired = self.entries.get(key)?.is_expired(now);
        if expired {
            tracing::debug!(path = %key.display(), "cache entry expired");
            self.remove(key);
            return None;
        }
        self.entries.get(key).map(|e| e.data.clone())
    }

    /// Drop the pending marker for `key` if it still belongs to
    /// `generation`; returns whether it did
    fn forget_pending(&mut self, key: &Path, generation: u64) -> bool {
        let current = self
            .pending
            .get(key)
            .map_or(false, |p| p.generation == generation);
        if current {
            self.pending.remove(key);
        }
        current
    }

    fn remove(&mut self, key: &Path) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.current_size -= entry.size();
        self.order.retain(|k| k != key);
        Some(entry)
    }

    fn purge_expired(&mut self, now: Instant) {
        let expired: Vec<PathBuf> = self
            .entries
            .iter()
            .filter(|(_, e)| e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in expired {
            self.remove(&key);
        }
    }

    /// Install a buffer, evicting oldest entries as needed. Returns how many
    /// entries were evicted.
    fn admit(
        &mut self,
        key: PathBuf,
        entry: CacheEntry,
        max_bytes: u64,
    ) -> Result<u64, CacheError> {
        let size = entry.size();
        if size > max_bytes {
            return Err(CacheError::CapacityExceeded {
                size,
                ceiling: max_bytes,
            });
        }

        self.remove(&key);
        self.purge_expired(entry.created_at);

        let mut evicted = 0;
        while self.current_size + size > max_bytes {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            if let Some(old) = self.entries.remove(&oldest) {
                self.current_size -= old.size();
                evicted += 1;
                tracing::debug!(path = %oldest.display(), size = old.size(), "evicted cache entry");
            }
        }

        self.current_size += size;
        self.order.push_back(key.clone());
        self.entries.insert(key, entry);
        Ok(evicted)
    }
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    productions: AtomicU64,
    evictions: AtomicU64,
}

/// Transcoded-content cache with at-most-once production per key
#[derive(Clone)]
pub struct TranscodeCache {
    state: Arc<Mutex<CacheState>>,
    counters: Arc<Counters>,
    config: TranscodeCacheConfig,
}

impl TranscodeCache {
    pub fn new(config: TranscodeCacheConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(CacheState::default())),
            counters: Arc::new(Counters::default()),
            config,
        }
    }

    pub fn config(&self) -> TranscodeCacheConfig {
        self.config
    }

    /// Cached buffer for `key`, if present and unexpired
    pub fn get(&self, key: &Path) -> Option<Bytes> {
        self.state.lock().lookup(key, Instant::now())
    }

    /// Exact length of the cached buffer, if present and unexpired
    pub fn cached_len(&self, key: &Path) -> Option<u64> {
        self.get(key).map(|data| data.len() as u64)
    }

    /// Return the cached buffer or produce it with a transcoder from
    /// `factory`.
    ///
    /// Callers that miss while a production for `key` is running join it
    /// instead of starting another; all of them see the same outcome.
    pub async fn populate<F>(&self, key: &Path, factory: F) -> Result<Bytes, CacheError>
    where
        F: FnOnce() -> Transcoder + Send + 'static,
    {
        let production = {
            let mut state = self.state.lock();
            if let Some(data) = state.lookup(key, Instant::now()) {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(data);
            }
            self.counters.misses.fetch_add(1, Ordering::Relaxed);

            let in_flight = state.pending.get(key).map(|p| p.production.clone());
            match in_flight {
                Some(production) => {
                    tracing::trace!(path = %key.display(), "joining in-flight production");
                    production
                }
                None => {
                    let generation = state.next_generation;
                    state.next_generation += 1;

                    // The task needs the lock to finish, so it cannot complete
                    // before its pending marker is in place.
                    let cache = self.clone();
                    let owned_key = key.to_path_buf();
                    let handle = tokio::spawn({
                        let cache = cache.clone();
                        let owned_key = owned_key.clone();
                        async move { cache.run_production(owned_key, generation, factory).await }
                    });
                    // A panicked or cancelled task never clears its own marker
                    let production = async move {
                        match handle.await {
                            Ok(result) => result,
                            Err(e) => {
                                tracing::error!(path = %owned_key.display(), error = %e, "transcode task aborted");
                                cache.state.lock().forget_pending(&owned_key, generation);
                                Err(CacheError::Aborted(e.to_string()))
                            }
                        }
                    }
                    .boxed()
                    .shared();

                    state.pending.insert(
                        key.to_path_buf(),
                        Pending {
                            generation,
                            production: production.clone(),
                        },
                    );
                    production
                }
            }
        };

        production.await
    }

    async fn run_production<F>(
        &self,
        key: PathBuf,
        generation: u64,
        factory: F,
    ) -> Result<Bytes, CacheError>
    where
        F: FnOnce() -> Transcoder,
    {
        self.counters.productions.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(path = %key.display(), "starting transcode");

        let mut transcoder = factory();
        let produced = match transcoder.initialize().await {
            Ok(()) => transcoder.produce().await,
            Err(e) => Err(e),
        };

        let mut state = self.state.lock();
        let current = state.forget_pending(&key, generation);

        let data = match produced {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!(path = %key.display(), error = %e, "transcode failed");
                return Err(CacheError::Transcode(Arc::new(e)));
            }
        };

        if !current {
            tracing::debug!(
                path = %key.display(),
                "released during production, discarding buffer"
            );
            return Ok(data);
        }

        let entry = CacheEntry {
            data: data.clone(),
            created_at: Instant::now(),
            ttl: self.config.ttl,
        };
        match state.admit(key.clone(), entry, self.config.max_bytes) {
            Ok(evicted) => {
                self.counters.evictions.fetch_add(evicted, Ordering::Relaxed);
                tracing::debug!(
                    path = %key.display(),
                    size = data.len(),
                    cached_bytes = state.current_size,
                    "cached transcode"
                );
                Ok(data)
            }
            Err(e) => {
                tracing::warn!(path = %key.display(), error = %e, "transcode not cacheable");
                Err(e)
            }
        }
    }

    /// Evict `key` and forget any in-flight production for it.
    ///
    /// A production that is still running completes for the callers already
    /// waiting on it, but its buffer is not installed.
    pub fn release(&self, key: &Path) {
        let mut state = self.state.lock();
        let removed = state.remove(key).is_some();
        let abandoned = state.pending.remove(key).is_some();
        if removed || abandoned {
            tracing::debug!(path = %key.display(), removed, abandoned, "released cache entry");
        }
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        CacheStats {
            entries: state.entries.len() as u64,
            bytes: state.current_size,
            max_bytes: self.config.max_bytes,
            in_flight: state.pending.len() as u64,
            ttl_secs: self.config.ttl.as_secs(),
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            productions: self.counters.productions.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for TranscodeCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("TranscodeCache")
            .field("config", &self.config)
            .field("entries", &state.entries.len())
            .field("bytes", &state.current_size)
            .field("in_flight", &state.pending.len())
            .finish()
    }
}

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: u64,
    pub bytes: u64,
    pub max_bytes: u64,
    pub in_flight: u64,
    pub ttl_secs: u64,
    pub hits: u64,
    pub misses: u64,
    pub productions: u64,
    pub evictions: u64,
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use common::codec::CodecSet;
    use common::testing::{FakeDecoder, FakeEncoder};
    use common::transcoder::{OutputSettings, TranscoderSelector};

    use super::*;

    struct Fixture {
        dir: tempfile::TempDir,
        decoder: Arc<FakeDecoder>,
        selector: TranscoderSelector,
    }

    impl Fixture {
        fn new(decoder: FakeDecoder, encoder: FakeEncoder) -> Self {
            let dir = tempfile::tempdir().unwrap();
            for name in ["a.flac", "b.flac", "c.flac"] {
                std::fs::write(dir.path().join(name), b"fLaC").unwrap();
            }
            let decoder = Arc::new(decoder);
            let codecs = CodecSet::new(decoder.clone(), Arc::new(encoder));
            Self {
                dir,
                decoder,
                selector: TranscoderSelector::new(OutputSettings::default(), codecs),
            }
        }

        fn path(&self, name: &str) -> PathBuf {
            self.dir.path().join(name)
        }

        async fn populate(&self, cache: &TranscodeCache, name: &str) -> Result<Bytes, CacheError> {
            let path = self.path(name);
            let selector = self.selector.clone();
            let target = path.clone();
            cache.populate(&path, move || selector.select(&target)).await
        }
    }

    fn cache(max_bytes: u64, ttl_secs: u64) -> TranscodeCache {
        TranscodeCache::new(TranscodeCacheConfig {
            max_bytes,
            ttl: Duration::from_secs(ttl_secs),
        })
    }

    #[test]
    fn test_config_from_basic() {
        let config = TranscodeCacheConfig::from_basic(2, 30);
        assert_eq!(config.max_bytes, 2 * 1024 * 1024);
        assert_eq!(config.ttl, Duration::from_secs(30));
        assert_eq!(TranscodeCacheConfig::default().max_bytes, 512 * 1024 * 1024);
    }

    #[tokio::test]
    async fn test_populate_then_hit() {
        let fixture = Fixture::new(FakeDecoder::default(), FakeEncoder::with_len(1000));
        let cache = cache(1 << 20, 60);

        assert!(cache.get(&fixture.path("a.flac")).is_none());
        let first = fixture.populate(&cache, "a.flac").await.unwrap();
        let second = fixture.populate(&cache, "a.flac").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(cache.get(&fixture.path("a.flac")), Some(first.clone()));
        assert_eq!(cache.cached_len(&fixture.path("a.flac")), Some(first.len() as u64));
        assert_eq!(fixture.decoder.decode_count(), 1);

        let stats = cache.stats();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.bytes, first.len() as u64);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.productions, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_misses_produce_once() {
        let fixture = Arc::new(Fixture::new(
            FakeDecoder::default().with_delay(Duration::from_millis(50)),
            FakeEncoder::with_len(1000),
        ));
        let cache = cache(1 << 20, 60);

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let fixture = fixture.clone();
                let cache = cache.clone();
                tokio::spawn(async move { fixture.populate(&cache, "a.flac").await })
            })
            .collect();

        let mut results = Vec::new();
        for task in tasks {
            results.push(task.await.unwrap().unwrap());
        }

        assert_eq!(fixture.decoder.decode_count(), 1);
        assert!(results.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(cache.stats().productions, 1);
        assert_eq!(cache.stats().in_flight, 0);
    }

    #[tokio::test]
    async fn test_release_forces_fresh_production() {
        let fixture = Fixture::new(FakeDecoder::default(), FakeEncoder::with_len(1000));
        let cache = cache(1 << 20, 60);

        fixture.populate(&cache, "a.flac").await.unwrap();
        cache.release(&fixture.path("a.flac"));
        assert!(cache.get(&fixture.path("a.flac")).is_none());
        assert_eq!(cache.stats().bytes, 0);

        fixture.populate(&cache, "a.flac").await.unwrap();
        assert_eq!(fixture.decoder.decode_count(), 2);
    }

    #[tokio::test]
    async fn test_release_during_production_discards_buffer() {
        let fixture = Arc::new(Fixture::new(
            FakeDecoder::default().with_delay(Duration::from_millis(50)),
            FakeEncoder::with_len(1000),
        ));
        let cache = cache(1 << 20, 60);

        let waiter = {
            let fixture = fixture.clone();
            let cache = cache.clone();
            tokio::spawn(async move { fixture.populate(&cache, "a.flac").await })
        };
        while cache.stats().in_flight == 0 {
            tokio::task::yield_now().await;
        }
        cache.release(&fixture.path("a.flac"));

        // The waiter still gets its bytes, but nothing is installed
        assert!(waiter.await.unwrap().is_ok());
        assert!(cache.get(&fixture.path("a.flac")).is_none());
        assert_eq!(cache.stats().entries, 0);

        fixture.populate(&cache, "a.flac").await.unwrap();
        assert_eq!(fixture.decoder.decode_count(), 2);
        assert!(cache.get(&fixture.path("a.flac")).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_is_never_a_hit() {
        let fixture = Fixture::new(FakeDecoder::default(), FakeEncoder::with_len(1000));
        let cache = cache(1 << 20, 60);

        fixture.populate(&cache, "a.flac").await.unwrap();
        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(cache.get(&fixture.path("a.flac")).is_some());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(cache.get(&fixture.path("a.flac")).is_none());
        assert_eq!(cache.stats().bytes, 0);

        fixture.populate(&cache, "a.flac").await.unwrap();
        assert_eq!(fixture.decoder.decode_count(), 2);
    }

    #[tokio::test]
    async fn test_eviction_keeps_total_under_ceiling() {
        let fixture = Fixture::new(FakeDecoder::default(), FakeEncoder::with_len(1000));
        let probe = cache(1 << 20, 60);
        let entry_size = fixture.populate(&probe, "a.flac").await.unwrap().len() as u64;

        // Room for two entries, not three
        let cache = cache(entry_size * 2 + entry_size / 2, 60);
        for name in ["a.flac", "b.flac", "c.flac"] {
            fixture.populate(&cache, name).await.unwrap();
            assert!(cache.stats().bytes <= cache.config().max_bytes);
        }

        assert!(cache.get(&fixture.path("a.flac")).is_none());
        assert!(cache.get(&fixture.path("b.flac")).is_some());
        assert!(cache.get(&fixture.path("c.flac")).is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_oversized_output_rejected_for_every_waiter() {
        let fixture = Arc::new(Fixture::new(
            FakeDecoder::default().with_delay(Duration::from_millis(20)),
            FakeEncoder::with_len(4096),
        ));
        let cache = cache(1024, 60);

        let tasks: Vec<_> = (0..3)
            .map(|_| {
                let fixture = fixture.clone();
                let cache = cache.clone();
                tokio::spawn(async move { fixture.populate(&cache, "a.flac").await })
            })
            .collect();
        for task in tasks {
            let err = task.await.unwrap().unwrap_err();
            assert!(matches!(
                err,
                CacheError::CapacityExceeded { ceiling: 1024, .. }
            ));
        }

        assert_eq!(fixture.decoder.decode_count(), 1);
        assert_eq!(cache.stats().entries, 0);
        assert_eq!(cache.stats().bytes, 0);
    }

    #[tokio::test]
    async fn test_failure_is_not_cached() {
        let fixture = Fixture::new(
            FakeDecoder::default().failing_decode(),
            FakeEncoder::with_len(1000),
        );
        let cache = cache(1 << 20, 60);

        let err = fixture.populate(&cache, "a.flac").await.unwrap_err();
        assert!(matches!(err, CacheError::Transcode(_)));
        assert_eq!(cache.stats().entries, 0);
        assert_eq!(cache.stats().in_flight, 0);

        // The next miss retries rather than replaying the failure
        assert!(fixture.populate(&cache, "a.flac").await.is_err());
        assert_eq!(fixture.decoder.decode_count(), 2);
    }

    #[tokio::test]
    async fn test_panicked_production_does_not_wedge_key() {
        let fixture = Fixture::new(FakeDecoder::default(), FakeEncoder::with_len(1000));
        let cache = cache(1 << 20, 60);
        let path = fixture.path("a.flac");

        let err = cache
            .populate(&path, || -> Transcoder { panic!("factory blew up") })
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::Aborted(_)));
        assert_eq!(cache.stats().in_flight, 0);

        let data = fixture.populate(&cache, "a.flac").await.unwrap();
        assert_eq!(data.len() as u64, cache.cached_len(&path).unwrap());
        assert_eq!(cache.stats().in_flight, 0);
        assert_eq!(fixture.decoder.decode_count(), 1);
    }
}
