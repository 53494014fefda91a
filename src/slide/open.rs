//! Opening an input file as an image source.

use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::error::DecodeError;
use crate::format::is_tiff_header;
use crate::format::tiff::BIGTIFF_HEADER_SIZE;
use crate::io::{
    BlockCache, LocalFileReader, RangeReader, DEFAULT_BLOCK_CACHE_CAPACITY, DEFAULT_BLOCK_SIZE,
};
use crate::pixel::PixelFormat;

use super::raster::RasterImage;
use super::source::{ImageSource, ReadTarget};
use super::tiff_slide::{SlideOptions, TiffSlide};
use super::tile_cache::DEFAULT_TILE_CACHE_BYTES;

/// A slide file read through the block cache.
pub type FileSlide = TiffSlide<BlockCache<LocalFileReader>>;

/// Everything needed to open an input file.
#[derive(Debug, Clone)]
pub struct SourceOptions {
    /// Block size of the file cache in bytes
    pub block_size: usize,
    /// Number of blocks the file cache holds
    pub cache_blocks: usize,
    /// Capacity of the decoded-tile cache in bytes
    pub tile_cache_bytes: usize,
    pub pixel_format: PixelFormat,
    pub target: ReadTarget,
}

impl Default for SourceOptions {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            cache_blocks: DEFAULT_BLOCK_CACHE_CAPACITY,
            tile_cache_bytes: DEFAULT_TILE_CACHE_BYTES,
            pixel_format: PixelFormat::default(),
            target: ReadTarget::default(),
        }
    }
}

impl SourceOptions {
    pub fn slide_options(&self) -> SlideOptions {
        SlideOptions {
            target: self.target.clone(),
            pixel_format: self.pixel_format,
            tile_cache_bytes: self.tile_cache_bytes,
        }
    }
}

/// Open a TIFF-based slide file.
pub async fn open_slide(
    path: impl AsRef<Path>,
    options: &SourceOptions,
) -> Result<FileSlide, DecodeError> {
    let reader = LocalFileReader::open(path.as_ref()).await?;
    let cached = BlockCache::with_capacity(reader, options.block_size, options.cache_blocks);
    TiffSlide::open(Arc::new(cached), options.slide_options()).await
}

/// Open `path` as a slide when it has a TIFF header, otherwise as a raster
/// image the `image` crate can decode.
pub async fn open_source(
    path: impl AsRef<Path>,
    options: &SourceOptions,
) -> Result<Box<dyn ImageSource<2>>, DecodeError> {
    let path = path.as_ref();
    let reader = LocalFileReader::open(path).await?;
    let probe_len = (BIGTIFF_HEADER_SIZE as u64).min(reader.size()) as usize;
    let probe = reader.read_exact_at(0, probe_len).await?;

    if is_tiff_header(&probe) {
        let cached = BlockCache::with_capacity(reader, options.block_size, options.cache_blocks);
        let slide = TiffSlide::open(Arc::new(cached), options.slide_options()).await?;
        info!(
            path = %path.display(),
            format = slide.format().name(),
            levels = slide.level_count(),
            "opened slide"
        );
        return Ok(Box::new(slide));
    }

    let known_raster = image::ImageFormat::from_path(path).is_ok()
        || image::guess_format(&probe).is_ok();
    if !known_raster {
        return Err(DecodeError::UnsupportedFormat(format!(
            "{} is neither a TIFF slide nor a raster image",
            path.display()
        )));
    }

    match &options.target {
        ReadTarget::Level(level) if *level > 0 => {
            return Err(DecodeError::UnknownLevel {
                level: *level,
                count: 1,
            })
        }
        ReadTarget::Associated(name) => {
            return Err(DecodeError::UnknownAssociatedImage(name.clone()))
        }
        _ => {}
    }

    let raster = RasterImage::open(path, options.pixel_format).await?;
    info!(path = %path.display(), "opened raster image");
    Ok(Box::new(raster))
}
