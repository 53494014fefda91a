use std::num::NonZeroUsize;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use lru::LruCache;
use tokio::sync::RwLock;
use tracing::trace;

use super::range_reader::check_range;
use super::single_flight::{Flight, SingleFlight};
use super::RangeReader;
use crate::error::IoError;

/// Default block size: 256KB
pub const DEFAULT_BLOCK_SIZE: usize = 256 * 1024;

/// Default cache capacity in number of blocks.
/// 100 blocks * 256KB = 25.6MB default cache size.
pub const DEFAULT_BLOCK_CACHE_CAPACITY: usize = 100;

/// Block-based caching layer that wraps any RangeReader.
///
/// TIFF parsing issues many small reads at scattered offsets (IFD entries,
/// offset tables), and neighbouring chunk halos fetch the same tiles. The
/// cache turns these into a few block-sized reads.
///
/// - Fixed-size blocks, LRU eviction
/// - Singleflight: concurrent requests for the same block share one fetch
/// - Reads spanning several blocks are stitched together
pub struct BlockCache<R> {
    inner: Arc<R>,
    block_size: usize,
    cache: RwLock<LruCache<u64, Bytes>>,
    in_flight: SingleFlight<u64>,
}

impl<R: RangeReader> BlockCache<R> {
    /// Wrap `inner` with the default block size and capacity.
    pub fn new(inner: R) -> Self {
        Self::with_capacity(inner, DEFAULT_BLOCK_SIZE, DEFAULT_BLOCK_CACHE_CAPACITY)
    }

    /// Wrap `inner`, caching up to `capacity` blocks of `block_size` bytes.
    pub fn with_capacity(inner: R, block_size: usize, capacity: usize) -> Self {
        Self {
            inner: Arc::new(inner),
            block_size: block_size.max(1),
            cache: RwLock::new(LruCache::new(
                NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN),
            )),
            in_flight: SingleFlight::new(),
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    async fn get_block(&self, block_idx: u64) -> Result<Bytes, IoError> {
        loop {
            if let Some(data) = self.cache.write().await.get(&block_idx) {
                return Ok(data.clone());
            }

            let guard = match self.in_flight.join(block_idx) {
                Flight::Leader(guard) => guard,
                Flight::Follower(notify) => {
                    self.in_flight.wait(block_idx, notify).await;
                    continue;
                }
            };

            let result = self.fetch_block(block_idx).await;
            if let Ok(ref data) = result {
                self.cache.write().await.put(block_idx, data.clone());
            }
            // Followers retry once the block is cached or the fetch failed
            drop(guard);

            return result;
        }
    }

    async fn fetch_block(&self, block_idx: u64) -> Result<Bytes, IoError> {
        let offset = block_idx * self.block_size as u64;
        let size = self.inner.size();
        let remaining = size.saturating_sub(offset);
        if remaining == 0 {
            return Err(IoError::RangeOutOfBounds {
                offset,
                requested: self.block_size as u64,
                size,
            });
        }

        let len = remaining.min(self.block_size as u64) as usize;
        trace!(block = block_idx, len, source = self.inner.identifier(), "fetching block");
        self.inner.read_exact_at(offset, len).await
    }

    #[inline]
    fn block_for_offset(&self, offset: u64) -> u64 {
        offset / self.block_size as u64
    }

    #[inline]
    fn offset_within_block(&self, offset: u64) -> usize {
        (offset % self.block_size as u64) as usize
    }
}

#[async_trait]
impl<R: RangeReader + 'static> RangeReader for BlockCache<R> {
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        check_range(offset, len, self.inner.size())?;
        if len == 0 {
            return Ok(Bytes::new());
        }

        let first = self.block_for_offset(offset);
        let last = self.block_for_offset(offset + len as u64 - 1);

        if first == last {
            let block = self.get_block(first).await?;
            let start = self.offset_within_block(offset);
            return Ok(block.slice(start..start + len));
        }

        let mut out = BytesMut::with_capacity(len);
        let mut position = offset;
        for block_idx in first..=last {
            let block = self.get_block(block_idx).await?;
            let start = self.offset_within_block(position);
            let take = (block.len() - start).min(len - out.len());
            out.extend_from_slice(&block[start..start + take]);
            position += take as u64;
        }
        Ok(out.freeze())
    }

    fn size(&self) -> u64 {
        self.inner.size()
    }

    fn identifier(&self) -> &str {
        self.inner.identifier()
    }
}
