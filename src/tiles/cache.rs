use std::sync::Arc;
use std::time::{Duration, Instant};

use fxhash::FxHashMap;
use image::RgbaImage;

use super::id::{Area, TileId};
use super::loader::{HttpFetcher, TileEvent, TileFetcher, TileLoader};
use super::source::validate_source;
use super::stats::SourceStats;
use crate::core::config::TileLoaderConfig;
use crate::runtime::async_delay;
use crate::Result;

/// A decoded tile, RGBA8
#[derive(Debug, Clone)]
pub struct TileImage {
    pub width: u32,
    pub height: u32,
    pub pixels: RgbaImage,
}

impl TileImage {
    pub fn from_rgba(pixels: RgbaImage) -> Self {
        Self {
            width: pixels.width(),
            height: pixels.height(),
            pixels,
        }
    }

    pub fn byte_len(&self) -> usize {
        self.pixels.as_raw().len()
    }
}

/// Shared, immutable handle to a decoded tile
pub type TileHandle = Arc<TileImage>;

/// Why a tile ended up failed and when
#[derive(Debug, Clone)]
pub struct FailureInfo {
    pub error: String,
    /// Consecutive failed attempts for this identity
    pub retries: u32,
    pub failed_at: Instant,
}

#[derive(Debug, Clone)]
pub enum TileState {
    /// Queued behind the bounded worker pool
    Pending,
    /// A worker is fetching or decoding it
    Loading,
    Ready(TileHandle),
    Failed(FailureInfo),
}

impl TileState {
    pub fn is_ready(&self) -> bool {
        matches!(self, TileState::Ready(_))
    }

    pub fn is_in_flight(&self) -> bool {
        matches!(self, TileState::Pending | TileState::Loading)
    }
}

#[derive(Debug)]
struct TileEntry {
    state: TileState,
    /// Stamp of the dispatch that owns this entry
    generation: u64,
    retries: u32,
}

/// Snapshot counters of a [`TileCache`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub pending: usize,
    pub loading: usize,
    pub ready: usize,
    pub failed: usize,
    /// Fetches dispatched over the cache's lifetime
    pub dispatched: u64,
}

/// Tiles around the vehicle, fetched in the background.
///
/// The cache is owned by a single control context. Every method returns
/// without waiting on the network; fetch results are folded in whenever the
/// owner calls [`TileCache::process_results`] (implicitly done by
/// `request`, `purge` and `guard`).
pub struct TileCache {
    entries: FxHashMap<TileId, TileEntry>,
    sources: FxHashMap<Arc<str>, SourceStats>,
    loader: TileLoader,
    config: TileLoaderConfig,
    next_generation: u64,
    /// Fetches still running for entries dropped by `clear`
    orphans: FxHashMap<TileId, TileEntry>,
    dispatched: u64,
}

impl TileCache {
    /// Cache fetching over HTTP. Must be created inside a tokio runtime.
    pub fn new(config: TileLoaderConfig) -> Result<Self> {
        config.validate()?;
        let fetcher = Arc::new(HttpFetcher::new(&config)?);
        Self::with_fetcher(config, fetcher)
    }

    pub fn with_fetcher(config: TileLoaderConfig, fetcher: Arc<dyn TileFetcher>) -> Result<Self> {
        config.validate()?;
        let loader = TileLoader::new(&config, fetcher)?;
        Ok(Self {
            entries: FxHashMap::default(),
            sources: FxHashMap::default(),
            loader,
            config,
            next_generation: 0,
            orphans: FxHashMap::default(),
            dispatched: 0,
        })
    }

    pub fn config(&self) -> &TileLoaderConfig {
        &self.config
    }

    /// Make sure every tile of `area` is cached or on its way.
    ///
    /// Tiles that are ready or in flight are left alone. Failed tiles are
    /// dispatched again once their backoff has run out. Returns the number of
    /// fetches dispatched.
    pub fn request(&mut self, area: &Area) -> Result<usize> {
        validate_source(&area.center.source)?;
        self.process_results();

        let mut dispatched = 0;
        for id in area.tiles_by_distance() {
            // a fetch from before `clear` is still running, take it over
            if let Some(entry) = self.orphans.remove(&id) {
                self.entries.insert(id, entry);
                continue;
            }
            let retries = match self.entries.get(&id).map(|entry| &entry.state) {
                None => 0,
                Some(TileState::Failed(info)) => {
                    if info.failed_at.elapsed() < self.config.retry_delay(info.retries) {
                        continue;
                    }
                    info.retries
                }
                Some(_) => continue,
            };

            let ring = area.ring(&id);
            let generation = self.next_generation;
            self.next_generation += 1;
            self.loader.dispatch(id.clone(), ring, generation)?;
            self.entries.insert(
                id,
                TileEntry {
                    state: TileState::Pending,
                    generation,
                    retries,
                },
            );
            dispatched += 1;
        }

        if dispatched > 0 {
            self.dispatched += dispatched as u64;
            log::debug!(
                "Requested {} tiles around {} (radius {})",
                dispatched,
                area.center,
                area.radius
            );
        }
        Ok(dispatched)
    }

    /// Fold finished fetches into the cache. Returns how many landed.
    pub fn process_results(&mut self) -> usize {
        let mut landed = 0;
        for event in self.loader.try_recv_events() {
            match event {
                TileEvent::Started { id, generation } => {
                    let entry = self
                        .entries
                        .get_mut(&id)
                        .or_else(|| self.orphans.get_mut(&id));
                    if let Some(entry) = entry {
                        if entry.generation == generation && matches!(entry.state, TileState::Pending) {
                            entry.state = TileState::Loading;
                        }
                    }
                }
                TileEvent::Finished {
                    id,
                    generation,
                    result,
                } => {
                    if self.orphans.get(&id).map(|entry| entry.generation) == Some(generation) {
                        self.orphans.remove(&id);
                        log::debug!("Dropping tile {} fetched before the cache was cleared", id);
                        continue;
                    }

                    let window = self.config.error_window;
                    self.sources
                        .entry(Arc::clone(&id.source))
                        .or_insert_with(|| SourceStats::new(window))
                        .record(result.is_ok());

                    let Some(entry) = self.entries.get_mut(&id) else {
                        continue;
                    };
                    if entry.generation != generation {
                        continue;
                    }
                    entry.state = match result {
                        Ok(handle) => {
                            entry.retries = 0;
                            TileState::Ready(handle)
                        }
                        Err(e) => {
                            entry.retries += 1;
                            TileState::Failed(FailureInfo {
                                error: e.to_string(),
                                retries: entry.retries,
                                failed_at: Instant::now(),
                            })
                        }
                    };
                    landed += 1;
                }
            }
        }
        landed
    }

    /// Handle to a ready tile, `None` while pending, loading or failed.
    ///
    /// Only sees results already folded in; call [`TileCache::process_results`]
    /// first, or read through [`TileCache::guard`].
    pub fn ready(&self, id: &TileId) -> Option<TileHandle> {
        match self.entries.get(id).map(|entry| &entry.state) {
            Some(TileState::Ready(handle)) => Some(Arc::clone(handle)),
            _ => None,
        }
    }

    pub fn state(&self, id: &TileId) -> Option<&TileState> {
        self.entries.get(id).map(|entry| &entry.state)
    }

    /// Evict everything outside `area` that is not in flight.
    ///
    /// In-flight tiles land normally and go on the next purge.
    pub fn purge(&mut self, area: &Area) -> usize {
        self.process_results();
        let before = self.entries.len();
        self.entries
            .retain(|id, entry| area.contains(id) || entry.state.is_in_flight());
        let evicted = before - self.entries.len();
        if evicted > 0 {
            log::debug!("Evicted {} tiles outside {} (radius {})", evicted, area.center, area.radius);
        }
        evicted
    }

    /// Recent failure ratio for `source` in [0, 1]; 0 without attempts
    pub fn error_rate(&self, source: &str) -> f64 {
        self.sources
            .get(source)
            .map(SourceStats::error_rate)
            .unwrap_or(0.0)
    }

    pub fn source_stats(&self, source: &str) -> Option<&SourceStats> {
        self.sources.get(source)
    }

    /// Fold in finished fetches and borrow the cache for reading
    pub fn guard(&mut self) -> CacheGuard<'_> {
        self.process_results();
        self.view()
    }

    /// Borrow the cache for reading as it is now
    pub fn view(&self) -> CacheGuard<'_> {
        CacheGuard { cache: self }
    }

    /// Number of tiles pending or loading
    pub fn in_flight(&self) -> usize {
        self.entries
            .values()
            .filter(|entry| entry.state.is_in_flight())
            .count()
    }

    /// Poll until nothing is in flight. Returns false if `timeout` ran out first.
    pub async fn wait_idle(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            self.process_results();
            if self.in_flight() == 0 {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            async_delay(Duration::from_millis(5)).await;
        }
    }

    /// Forget every tile and source statistic.
    ///
    /// Fetches still in flight are remembered until they complete so the same
    /// tile is never fetched twice at once. A `request` covering such a tile
    /// takes the running fetch over; otherwise its result is dropped.
    pub fn clear(&mut self) {
        for (id, entry) in self.entries.drain() {
            if entry.state.is_in_flight() {
                self.orphans.insert(id, entry);
            }
        }
        self.sources.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        let mut stats = CacheStats {
            entries: self.entries.len(),
            dispatched: self.dispatched,
            ..CacheStats::default()
        };
        for entry in self.entries.values() {
            match entry.state {
                TileState::Pending => stats.pending += 1,
                TileState::Loading => stats.loading += 1,
                TileState::Ready(_) => stats.ready += 1,
                TileState::Failed(_) => stats.failed += 1,
            }
        }
        stats
    }
}

/// Read-only view of a [`TileCache`].
///
/// Holds a shared borrow, so the cache cannot insert or evict while tiles
/// are being iterated.
pub struct CacheGuard<'a> {
    cache: &'a TileCache,
}

impl<'a> CacheGuard<'a> {
    pub fn ready(&self, id: &TileId) -> Option<&'a TileHandle> {
        match self.cache.entries.get(id).map(|entry| &entry.state) {
            Some(TileState::Ready(handle)) => Some(handle),
            _ => None,
        }
    }

    pub fn state(&self, id: &TileId) -> Option<&'a TileState> {
        self.cache.state(id)
    }

    pub fn iter_ready(&self) -> impl Iterator<Item = (&'a TileId, &'a TileHandle)> + 'a {
        self.cache
            .entries
            .iter()
            .filter_map(|(id, entry)| match &entry.state {
                TileState::Ready(handle) => Some((id, handle)),
                _ => None,
            })
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::geo::TileIndex;
    use crate::AerialMapError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    const SOURCE: &str = "https://tiles.test/{z}/{x}/{y}.png";

    fn png_bytes() -> Vec<u8> {
        let img = image::RgbaImage::from_pixel(4, 4, image::Rgba([10, 20, 30, 255]));
        let mut buf = std::io::Cursor::new(Vec::new());
        image::DynamicImage::ImageRgba8(img)
            .write_to(&mut buf, image::ImageOutputFormat::Png)
            .unwrap();
        buf.into_inner()
    }

    struct MockFetcher {
        calls: AtomicUsize,
        fail: AtomicBool,
        delay: Duration,
        payload: Vec<u8>,
    }

    impl MockFetcher {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail: AtomicBool::new(false),
                delay,
                payload: png_bytes(),
            })
        }

        fn with_payload(payload: Vec<u8>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail: AtomicBool::new(false),
                delay: Duration::ZERO,
                payload,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TileFetcher for MockFetcher {
        async fn fetch(&self, url: &str) -> crate::Result<Vec<u8>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(AerialMapError::FetchFailed(format!("HTTP 503 for {}", url)));
            }
            Ok(self.payload.clone())
        }
    }

    /// Tracks how many fetches of the same URL run at once
    #[derive(Default)]
    struct OverlapFetcher {
        running: Mutex<FxHashMap<String, usize>>,
        peak: AtomicUsize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TileFetcher for OverlapFetcher {
        async fn fetch(&self, url: &str) -> crate::Result<Vec<u8>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            {
                let mut running = self.running.lock().unwrap();
                let count = running.entry(url.to_string()).or_insert(0);
                *count += 1;
                self.peak.fetch_max(*count, Ordering::SeqCst);
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
            if let Some(count) = self.running.lock().unwrap().get_mut(url) {
                *count -= 1;
            }
            Ok(png_bytes())
        }
    }

    fn area(x: i64, y: i64, radius: u32) -> Area {
        Area::new(TileId::new(SOURCE, TileIndex::new(x, y), 16), radius)
    }

    fn cache(fetcher: Arc<MockFetcher>) -> TileCache {
        TileCache::with_fetcher(TileLoaderConfig::for_testing(), fetcher).unwrap()
    }

    const SETTLE: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_request_fetches_every_tile_once() {
        let fetcher = MockFetcher::new(Duration::ZERO);
        let mut cache = cache(fetcher.clone());
        let area = area(1000, 2000, 1);

        assert_eq!(cache.request(&area).unwrap(), 9);
        assert!(cache.wait_idle(SETTLE).await);

        assert_eq!(fetcher.calls(), 9);
        for id in area.tiles() {
            let tile = cache.ready(&id).expect("tile should be ready");
            assert_eq!((tile.width, tile.height), (4, 4));
        }
        assert_eq!(cache.error_rate(SOURCE), 0.0);
        assert_eq!(cache.stats().ready, 9);
    }

    #[tokio::test]
    async fn test_duplicate_requests_are_folded() {
        let fetcher = MockFetcher::new(Duration::from_millis(50));
        let mut cache = cache(fetcher.clone());
        let area = area(10, 10, 1);

        assert_eq!(cache.request(&area).unwrap(), 9);
        assert_eq!(cache.request(&area).unwrap(), 0);
        assert!(cache.wait_idle(SETTLE).await);
        assert_eq!(cache.request(&area).unwrap(), 0);

        assert_eq!(fetcher.calls(), 9);
        assert_eq!(cache.stats().dispatched, 9);
    }

    #[tokio::test]
    async fn test_bounded_pool_keeps_tiles_pending() {
        let fetcher = MockFetcher::new(Duration::from_millis(300));
        let config = TileLoaderConfig {
            max_concurrent: 1,
            ..TileLoaderConfig::for_testing()
        };
        let mut cache = TileCache::with_fetcher(config, fetcher).unwrap();
        let area = area(10, 10, 1);
        cache.request(&area).unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        cache.process_results();
        let stats = cache.stats();
        assert_eq!(stats.loading, 1);
        assert_eq!(stats.pending, 8);
        // center ring goes first
        assert!(matches!(cache.state(&area.center), Some(TileState::Loading)));
    }

    #[tokio::test]
    async fn test_invalid_source_rejected() {
        let mut cache = cache(MockFetcher::new(Duration::ZERO));
        let empty = Area::new(TileId::new("", TileIndex::new(0, 0), 1), 0);
        assert!(matches!(
            cache.request(&empty),
            Err(AerialMapError::InvalidSource(_))
        ));
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_purge_keeps_area_and_evicts_rest() {
        let mut cache = cache(MockFetcher::new(Duration::ZERO));
        let wide = area(500, 500, 2);
        cache.request(&wide).unwrap();
        assert!(cache.wait_idle(SETTLE).await);
        assert_eq!(cache.len(), 25);

        let narrow = area(500, 500, 1);
        assert_eq!(cache.purge(&narrow), 16);
        assert_eq!(cache.len(), 9);
        for id in narrow.tiles() {
            assert!(cache.ready(&id).is_some());
        }
        assert!(cache.ready(&wide.center.offset(2, 2)).is_none());
    }

    #[tokio::test]
    async fn test_in_flight_tiles_land_then_evict() {
        let mut cache = cache(MockFetcher::new(Duration::from_millis(50)));
        let old = area(100, 100, 1);
        cache.request(&old).unwrap();

        let elsewhere = area(300, 300, 0);
        assert_eq!(cache.purge(&elsewhere), 0);
        assert!(cache.wait_idle(SETTLE).await);
        assert_eq!(cache.stats().ready, 9);

        assert_eq!(cache.purge(&elsewhere), 9);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_failures_feed_error_rate_and_retry_on_request() {
        let fetcher = MockFetcher::new(Duration::ZERO);
        fetcher.fail.store(true, Ordering::SeqCst);
        let mut cache = cache(fetcher.clone());
        let area = area(7, 7, 1);

        cache.request(&area).unwrap();
        assert!(cache.wait_idle(SETTLE).await);
        assert_eq!(cache.error_rate(SOURCE), 1.0);
        assert_eq!(cache.stats().failed, 9);
        match cache.state(&area.center) {
            Some(TileState::Failed(info)) => {
                assert_eq!(info.retries, 1);
                assert!(info.error.contains("503"));
            }
            other => panic!("unexpected state {:?}", other),
        }

        // no background retries
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fetcher.calls(), 9);

        fetcher.fail.store(false, Ordering::SeqCst);
        assert_eq!(cache.request(&area).unwrap(), 9);
        assert!(cache.wait_idle(SETTLE).await);
        assert_eq!(cache.stats().ready, 9);
        assert!((cache.error_rate(SOURCE) - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_backoff_delays_retry() {
        let fetcher = MockFetcher::new(Duration::ZERO);
        fetcher.fail.store(true, Ordering::SeqCst);
        let config = TileLoaderConfig {
            retry_backoff_ms: 60_000,
            max_retry_backoff_ms: 60_000,
            ..TileLoaderConfig::for_testing()
        };
        let mut cache = TileCache::with_fetcher(config, fetcher.clone()).unwrap();
        let area = area(7, 7, 0);

        cache.request(&area).unwrap();
        assert!(cache.wait_idle(SETTLE).await);
        assert_eq!(cache.request(&area).unwrap(), 0);
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_payload_fails_decode() {
        let mut cache = cache(MockFetcher::with_payload(b"<html>503</html>".to_vec()));
        let area = area(1, 1, 0);
        cache.request(&area).unwrap();
        assert!(cache.wait_idle(SETTLE).await);

        assert!(cache.ready(&area.center).is_none());
        match cache.state(&area.center) {
            Some(TileState::Failed(info)) => assert!(info.error.contains("decode")),
            other => panic!("unexpected state {:?}", other),
        }
        assert_eq!(cache.error_rate(SOURCE), 1.0);
    }

    #[tokio::test]
    async fn test_clear_discards_late_completions() {
        let mut cache = cache(MockFetcher::new(Duration::from_millis(50)));
        cache.request(&area(3, 3, 1)).unwrap();
        cache.clear();

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(cache.process_results(), 0);
        assert!(cache.is_empty());
        assert_eq!(cache.error_rate(SOURCE), 0.0);
    }

    #[tokio::test]
    async fn test_request_after_clear_reuses_running_fetch() {
        let fetcher = Arc::new(OverlapFetcher::default());
        let mut cache = TileCache::with_fetcher(TileLoaderConfig::for_testing(), fetcher.clone()).unwrap();
        let area = area(3, 3, 0);

        cache.request(&area).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        cache.clear();
        assert!(cache.is_empty());

        assert_eq!(cache.request(&area).unwrap(), 0);
        assert!(cache.state(&area.center).unwrap().is_in_flight());
        assert!(cache.wait_idle(SETTLE).await);

        assert_eq!(fetcher.peak.load(Ordering::SeqCst), 1);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert!(cache.ready(&area.center).is_some());
        assert_eq!(cache.error_rate(SOURCE), 0.0);
        assert_eq!(cache.source_stats(SOURCE).unwrap().attempted(), 1);

        // nothing left over once the fetch was taken over
        cache.clear();
        assert_eq!(cache.request(&area).unwrap(), 1);
        assert!(cache.wait_idle(SETTLE).await);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_source_change_is_a_different_tile() {
        let mut cache = cache(MockFetcher::new(Duration::ZERO));
        let a = area(42, 42, 0);
        cache.request(&a).unwrap();
        assert!(cache.wait_idle(SETTLE).await);

        let other = Area::new(
            TileId::new("https://other.test/{z}/{x}/{y}.jpg", a.center.index, 16),
            0,
        );
        assert!(cache.ready(&other.center).is_none());
        assert_eq!(cache.request(&other).unwrap(), 1);
        assert!(cache.wait_idle(SETTLE).await);
        assert_eq!(cache.purge(&other), 1);
        assert!(cache.ready(&a.center).is_none());
    }

    #[tokio::test]
    async fn test_ready_sees_only_folded_results() {
        let mut cache = cache(MockFetcher::new(Duration::ZERO));
        let area = area(11, 11, 0);
        cache.request(&area).unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(cache.ready(&area.center).is_none());
        assert!(cache.guard().ready(&area.center).is_some());
        assert!(cache.ready(&area.center).is_some());
    }

    #[tokio::test]
    async fn test_guard_iterates_ready_tiles() {
        let mut cache = cache(MockFetcher::new(Duration::ZERO));
        let area = area(9, 9, 1);
        cache.request(&area).unwrap();
        assert!(cache.wait_idle(SETTLE).await);

        let guard = cache.guard();
        assert_eq!(guard.len(), 9);
        assert_eq!(guard.iter_ready().count(), 9);
        assert!(guard.ready(&area.center).is_some());
        assert!(guard.ready(&area.center.offset(5, 5)).is_none());
    }
}
