//! The region-addressable image source trait.

use async_trait::async_trait;
use serde::Serialize;

use crate::error::ReadError;
use crate::pixel::{ImageMetadata, MemoryImage, PixelBuffer};
use crate::region::Region;

/// A decoder that serves arbitrary regions of one image.
///
/// Metadata is read when the source is opened and never changes afterwards.
/// `read_region` may be called repeatedly, in any order and from several
/// tasks at once.
#[async_trait]
pub trait ImageSource<const D: usize>: Send + Sync {
    /// Geometry and pixel format of the image.
    fn metadata(&self) -> &ImageMetadata<D>;

    /// Samples of `region`, row-major.
    ///
    /// Fails with [`ReadError::OutOfBounds`] when `region` is not inside
    /// `metadata().bounds()`.
    async fn read_region(&self, region: &Region<D>) -> Result<PixelBuffer<D>, ReadError>;

    /// Name used in log messages.
    fn identifier(&self) -> &str;
}

/// Which image of a slide a [`TiffSlide`](super::TiffSlide) serves.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadTarget {
    /// A pyramid level, 0 being the full resolution
    Level(usize),
    /// The level best suited for a downsample factor
    Downsample(f64),
    /// A named associated image (`label`, `macro`, `thumbnail`)
    Associated(String),
}

impl Default for ReadTarget {
    fn default() -> Self {
        ReadTarget::Level(0)
    }
}

/// Snapshot of one pyramid level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LevelInfo {
    pub level: usize,
    pub width: u32,
    pub height: u32,
    pub tile_width: u32,
    pub tile_height: u32,
    /// Downsample factor relative to level 0
    pub downsample: f64,
    /// Micrometres per pixel on x and y
    pub spacing: [f64; 2],
}

/// Snapshot of one associated image.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssociatedImageInfo {
    pub name: String,
    pub width: u32,
    pub height: u32,
}

#[async_trait]
impl<const D: usize> ImageSource<D> for MemoryImage<D> {
    fn metadata(&self) -> &ImageMetadata<D> {
        MemoryImage::metadata(self)
    }

    async fn read_region(&self, region: &Region<D>) -> Result<PixelBuffer<D>, ReadError> {
        Ok(self.buffer().extract(region)?)
    }

    fn identifier(&self) -> &str {
        "memory"
    }
}
