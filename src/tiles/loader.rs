use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use crossbeam_channel::{unbounded, Receiver, Sender};
use tokio::sync::{mpsc, Semaphore};

use super::cache::{TileHandle, TileImage};
use super::id::TileId;
use crate::core::config::TileLoaderConfig;
use crate::runtime::{execute_blocking, AsyncHandle};
use crate::{AerialMapError, Result};

/// Source of raw tile payloads.
///
/// [`HttpFetcher`] is the production implementation; anything else (an
/// on-disk mirror, an in-memory test server) can be plugged into
/// [`TileCache::with_fetcher`](super::cache::TileCache::with_fetcher).
#[async_trait]
pub trait TileFetcher: Send + Sync + 'static {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// Fetches tiles over HTTP(S) with a pooled `reqwest` client
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(config: &TileLoaderConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(config.request_timeout())
            .tcp_keepalive(Duration::from_secs(30))
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(config.max_concurrent)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl TileFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AerialMapError::FetchFailed(format!("{}: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(AerialMapError::FetchFailed(format!(
                "HTTP {} for {}",
                response.status(),
                url
            )));
        }

        let data = response
            .bytes()
            .await
            .map_err(|e| AerialMapError::FetchFailed(format!("{}: {}", url, e)))?;
        Ok(data.to_vec())
    }
}

/// A queued fetch
#[derive(Debug, Clone)]
pub struct TileTask {
    pub id: TileId,
    pub url: String,
    /// Chebyshev distance from the requested center
    pub ring: u32,
    /// Sequence number for tie-breaking (lower = earlier)
    pub sequence: u64,
    pub generation: u64,
}

impl PartialEq for TileTask {
    fn eq(&self, other: &Self) -> bool {
        self.ring == other.ring && self.sequence == other.sequence
    }
}

impl Eq for TileTask {}

impl PartialOrd for TileTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TileTask {
    fn cmp(&self, other: &Self) -> Ordering {
        // Inner rings first, then earlier sequence number
        other
            .ring
            .cmp(&self.ring)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

/// Progress reported by the worker pool back to the cache
#[derive(Debug)]
pub enum TileEvent {
    /// A worker picked the task up
    Started { id: TileId, generation: u64 },
    /// Fetch and decode finished, one way or the other
    Finished {
        id: TileId,
        generation: u64,
        result: Result<TileHandle>,
    },
}

/// Front end of the fetch worker pool.
///
/// Tasks go out over a tokio channel to a single scheduling worker that
/// orders them by ring and starts at most `max_concurrent` at a time; events
/// come back over a crossbeam channel so the owner can poll without an
/// executor.
pub struct TileLoader {
    task_tx: mpsc::UnboundedSender<TileTask>,
    event_rx: Receiver<TileEvent>,
    sequence_counter: AtomicU64,
    worker: Box<dyn AsyncHandle>,
}

impl TileLoader {
    /// Start the worker pool. Needs to be called from within a tokio runtime.
    pub fn new(config: &TileLoaderConfig, fetcher: Arc<dyn TileFetcher>) -> Result<Self> {
        tokio::runtime::Handle::try_current().map_err(|e| {
            AerialMapError::Runtime(format!("tile loader needs a tokio runtime: {}", e))
        })?;

        let (task_tx, task_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = unbounded();

        let worker = TileWorker {
            task_rx,
            event_tx,
            fetcher,
            semaphore: Arc::new(Semaphore::new(config.max_concurrent)),
            request_timeout: config.request_timeout(),
            task_queue: BinaryHeap::new(),
        };
        log::debug!(
            "Starting tile worker with max_concurrent: {}",
            config.max_concurrent
        );
        let worker = crate::runtime::spawn(worker.run());

        Ok(Self {
            task_tx,
            event_rx,
            sequence_counter: AtomicU64::new(0),
            worker,
        })
    }

    /// Queue one tile for fetching
    pub fn dispatch(&self, id: TileId, ring: u32, generation: u64) -> Result<()> {
        let sequence = self.sequence_counter.fetch_add(1, AtomicOrdering::Relaxed);
        let task = TileTask {
            url: id.url(),
            id,
            ring,
            sequence,
            generation,
        };
        self.task_tx
            .send(task)
            .map_err(|e| AerialMapError::Runtime(format!("Failed to queue tile: {}", e)))
    }

    /// Try to receive worker events (non-blocking)
    pub fn try_recv_events(&self) -> Vec<TileEvent> {
        self.event_rx.try_iter().collect()
    }
}

impl Drop for TileLoader {
    fn drop(&mut self) {
        self.worker.cancel();
    }
}

struct TileWorker {
    task_rx: mpsc::UnboundedReceiver<TileTask>,
    event_tx: Sender<TileEvent>,
    fetcher: Arc<dyn TileFetcher>,
    /// Limits concurrent downloads
    semaphore: Arc<Semaphore>,
    request_timeout: Duration,
    /// Priority queue of waiting tasks
    task_queue: BinaryHeap<TileTask>,
}

impl TileWorker {
    async fn run(mut self) {
        loop {
            if self.task_queue.is_empty() {
                match self.task_rx.recv().await {
                    Some(task) => self.task_queue.push(task),
                    None => break,
                }
            }

            let permit = match Arc::clone(&self.semaphore).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };

            // Anything queued while we waited competes for this slot too
            while let Ok(task) = self.task_rx.try_recv() {
                self.task_queue.push(task);
            }
            let Some(task) = self.task_queue.pop() else {
                continue;
            };

            log::debug!("Starting download for tile {}", task.id);
            let _ = self.event_tx.send(TileEvent::Started {
                id: task.id.clone(),
                generation: task.generation,
            });

            let event_tx = self.event_tx.clone();
            let fetcher = Arc::clone(&self.fetcher);
            let request_timeout = self.request_timeout;
            crate::runtime::spawn(async move {
                let result = Self::load_tile(fetcher.as_ref(), &task.url, request_timeout).await;
                if let Err(e) = &result {
                    log::warn!("Tile {} failed: {}", task.id, e);
                }
                let _ = event_tx.send(TileEvent::Finished {
                    id: task.id,
                    generation: task.generation,
                    result,
                });
                drop(permit);
            });
        }
        log::debug!("Tile worker exiting, channel disconnected");
    }

    async fn load_tile(
        fetcher: &dyn TileFetcher,
        url: &str,
        request_timeout: Duration,
    ) -> Result<TileHandle> {
        let data = tokio::time::timeout(request_timeout, fetcher.fetch(url))
            .await
            .map_err(|_| {
                AerialMapError::FetchFailed(format!(
                    "{} timed out after {} ms",
                    url,
                    request_timeout.as_millis()
                ))
            })??;

        execute_blocking(move || decode_tile(&data)).await
    }
}

/// Decode a fetched payload into RGBA pixels
pub fn decode_tile(data: &[u8]) -> Result<TileHandle> {
    if data.is_empty() {
        return Err(AerialMapError::DecodeFailed("empty payload".to_string()));
    }
    let image = image::load_from_memory(data)
        .map_err(|e| AerialMapError::DecodeFailed(e.to_string()))?;
    Ok(Arc::new(TileImage::from_rgba(image.to_rgba8())))
}
