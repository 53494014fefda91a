//! Cache for decoded tiles.
//!
//! Neighbouring chunk halos overlap, and so do the tiles covering them. The
//! cache keeps decoded tiles (already converted to the slide's pixel format)
//! so a tile shared by two halos is fetched and decoded once.
//!
//! Capacity is expressed in bytes of decoded samples; least-recently-used
//! tiles are evicted once the total exceeds it. Concurrent misses on the same
//! tile share one load through [`TileCache::get_or_load`].

use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use tokio::sync::RwLock;
use tracing::trace;

use crate::error::DecodeError;
use crate::io::{Flight, SingleFlight};

/// Default capacity: 64MB of decoded samples
pub const DEFAULT_TILE_CACHE_BYTES: usize = 64 * 1024 * 1024;

/// Bound on the number of entries, independent of their size
const MAX_ENTRIES: usize = 16_384;

/// Identifies a tile of one image of one slide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileKey {
    /// Index of the IFD the tile belongs to
    pub ifd_index: usize,
    /// Row-major tile index in that IFD
    pub tile_index: u32,
}

/// A decoded tile, clipped to the image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedTile {
    pub width: u32,
    pub height: u32,
    /// Interleaved samples, `width * height * channels` bytes
    pub data: Vec<u8>,
}

struct Entries {
    lru: LruCache<TileKey, Arc<DecodedTile>>,
    bytes: usize,
}

/// Byte-bounded LRU of decoded tiles, shared across tasks.
pub struct TileCache {
    entries: RwLock<Entries>,
    in_flight: SingleFlight<TileKey>,
    max_bytes: usize,
}

impl TileCache {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_TILE_CACHE_BYTES)
    }

    /// Cache holding at most `max_bytes` of decoded samples.
    ///
    /// A capacity of zero disables caching.
    pub fn with_capacity(max_bytes: usize) -> Self {
        Self {
            entries: RwLock::new(Entries {
                lru: LruCache::new(NonZeroUsize::new(MAX_ENTRIES).unwrap_or(NonZeroUsize::MIN)),
                bytes: 0,
            }),
            in_flight: SingleFlight::new(),
            max_bytes,
        }
    }

    pub async fn get(&self, key: &TileKey) -> Option<Arc<DecodedTile>> {
        self.entries.write().await.lru.get(key).cloned()
    }

    /// Cached tile for `key`, or the result of `load` stored in the cache.
    ///
    /// While one caller runs `load`, others asking for the same key wait for
    /// it and then read the cache. If the load fails or its caller is
    /// cancelled, a waiting caller runs its own `load`.
    pub async fn get_or_load<F, Fut>(
        &self,
        key: TileKey,
        load: F,
    ) -> Result<Arc<DecodedTile>, DecodeError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<DecodedTile, DecodeError>>,
    {
        loop {
            if let Some(tile) = self.get(&key).await {
                trace!(tile = key.tile_index, "tile cache hit");
                return Ok(tile);
            }

            let guard = match self.in_flight.join(key) {
                Flight::Leader(guard) => guard,
                Flight::Follower(notify) => {
                    self.in_flight.wait(key, notify).await;
                    continue;
                }
            };

            let tile = Arc::new(load().await?);
            self.put(key, tile.clone()).await;
            drop(guard);
            return Ok(tile);
        }
    }

    /// Insert a tile, evicting old tiles until the cache fits its capacity.
    ///
    /// Tiles larger than the whole capacity are not stored.
    pub async fn put(&self, key: TileKey, tile: Arc<DecodedTile>) {
        let size = tile.data.len();
        if size > self.max_bytes {
            return;
        }

        let mut entries = self.entries.write().await;
        if let Some(old) = entries.lru.put(key, tile) {
            entries.bytes = entries.bytes.saturating_sub(old.data.len());
        }
        entries.bytes += size;

        while entries.bytes > self.max_bytes {
            match entries.lru.pop_lru() {
                Some((_, evicted)) => {
                    entries.bytes = entries.bytes.saturating_sub(evicted.data.len());
                }
                None => break,
            }
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.lru.len()
    }

    /// Bytes of decoded samples currently held.
    pub async fn size(&self) -> usize {
        self.entries.read().await.bytes
    }

    pub fn capacity(&self) -> usize {
        self.max_bytes
    }
}

impl Default for TileCache {
    fn default() -> Self {
        Self::new()
    }
}
