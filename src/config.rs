//! Command-line configuration for the `slide-stream` and `slide-info` binaries.
//!
//! Options are parsed with clap. Every option (not the positional arguments)
//! can also be set through an environment variable:
//!
//! - `SLIDE_STREAM_DIVISIONS` - Number of stream divisions (default: 3)
//! - `SLIDE_STREAM_MAX_IN_FLIGHT` - Chunks processed concurrently (default: 1)
//! - `SLIDE_STREAM_LEVEL` - Pyramid level to read
//! - `SLIDE_STREAM_DOWNSAMPLE` - Read the level best suited to this downsample
//! - `SLIDE_STREAM_ASSOCIATED` - Read an associated image (label, macro, thumbnail)
//! - `SLIDE_STREAM_PIXEL_FORMAT` - gray8, rgb8 or rgba8 (default: gray8)
//! - `SLIDE_STREAM_BLOCK_SIZE` - Block size of the file cache (default: 256 KiB)
//! - `SLIDE_STREAM_CACHE_BLOCKS` - Blocks held by the file cache (default: 100)
//! - `SLIDE_STREAM_TILE_CACHE_MB` - Decoded tile cache in MiB (default: 64)
//! - `SLIDE_INFO_MAX_IMAGE_BYTES` - Largest image `slide-info` writes (default: 100 MiB)
//!
//! Values are checked by `validate()` and then translated once into the
//! component configurations ([`SourceOptions`], [`WriterConfig`]).

use std::path::PathBuf;

use clap::Parser;

use crate::error::ArgumentError;
use crate::io::{DEFAULT_BLOCK_CACHE_CAPACITY, DEFAULT_BLOCK_SIZE};
use crate::pixel::PixelFormat;
use crate::slide::{ReadTarget, SourceOptions};
use crate::stream::{WriterConfig, DEFAULT_DIVISIONS, DEFAULT_MAX_IN_FLIGHT};

// =============================================================================
// Default Values
// =============================================================================

/// Default decoded-tile cache size in MiB.
pub const DEFAULT_TILE_CACHE_MB: usize = 64;

/// Default limit on images written by `slide-info` (100 MiB).
pub const DEFAULT_MAX_IMAGE_BYTES: u64 = 100 * 1024 * 1024;

/// Smallest accepted block size.
pub const MIN_BLOCK_SIZE: usize = 1024;

/// Largest accepted block size.
pub const MAX_BLOCK_SIZE: usize = 16 * 1024 * 1024;

// =============================================================================
// slide-stream
// =============================================================================

/// Median-filter a slide or image chunk by chunk, never holding the whole
/// image in memory.
#[derive(Parser, Debug, Clone)]
#[command(name = "slide-stream")]
#[command(author, version, about, long_about = None)]
#[command(allow_negative_numbers = true)]
pub struct StreamConfig {
    /// Input slide (SVS, TIFF) or raster image (PNG, JPEG, PNM).
    pub input: PathBuf,

    /// Output image; the extension selects the format (pgm, ppm, pam, pnm, png, jpg).
    pub output: PathBuf,

    /// Median filter radius in pixels, applied on both axes.
    pub radius: String,

    // =========================================================================
    // Streaming
    // =========================================================================
    /// Number of chunks the output is split into.
    ///
    /// Zero, or more chunks than the output has elements, is rejected by the
    /// partitioner rather than here.
    #[arg(long, default_value_t = DEFAULT_DIVISIONS, env = "SLIDE_STREAM_DIVISIONS")]
    pub divisions: usize,

    /// Number of chunks processed at the same time.
    #[arg(long, default_value_t = DEFAULT_MAX_IN_FLIGHT, env = "SLIDE_STREAM_MAX_IN_FLIGHT")]
    pub max_in_flight: usize,

    // =========================================================================
    // Input Selection
    // =========================================================================
    /// Pyramid level to read (0 is full resolution).
    #[arg(long, env = "SLIDE_STREAM_LEVEL")]
    pub level: Option<usize>,

    /// Read the level best suited to this downsample factor.
    #[arg(long, env = "SLIDE_STREAM_DOWNSAMPLE")]
    pub downsample: Option<f64>,

    /// Read an associated image instead of a pyramid level.
    #[arg(long, env = "SLIDE_STREAM_ASSOCIATED")]
    pub associated: Option<String>,

    /// Pixel format samples are converted to.
    #[arg(long, value_enum, default_value_t = PixelFormat::Gray8, env = "SLIDE_STREAM_PIXEL_FORMAT")]
    pub pixel_format: PixelFormat,

    // =========================================================================
    // Cache Configuration
    // =========================================================================
    /// Block size in bytes for the file block cache.
    #[arg(long, default_value_t = DEFAULT_BLOCK_SIZE, env = "SLIDE_STREAM_BLOCK_SIZE")]
    pub block_size: usize,

    /// Maximum number of blocks held by the file cache.
    #[arg(long, default_value_t = DEFAULT_BLOCK_CACHE_CAPACITY, env = "SLIDE_STREAM_CACHE_BLOCKS")]
    pub cache_blocks: usize,

    /// Decoded tile cache size in MiB.
    #[arg(long, default_value_t = DEFAULT_TILE_CACHE_MB, env = "SLIDE_STREAM_TILE_CACHE_MB")]
    pub tile_cache_mb: usize,

    // =========================================================================
    // Logging Configuration
    // =========================================================================
    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl StreamConfig {
    /// Check every value; the first problem found is returned.
    pub fn validate(&self) -> Result<(), ArgumentError> {
        self.radius()?;

        if self.max_in_flight == 0 {
            return Err(invalid("max-in-flight", "must be at least 1"));
        }
        if self.block_size < MIN_BLOCK_SIZE || self.block_size > MAX_BLOCK_SIZE {
            return Err(invalid("block-size", "must be between 1KB and 16MB"));
        }
        if self.cache_blocks == 0 {
            return Err(invalid("cache-blocks", "must be at least 1"));
        }
        if self.tile_cache_mb == 0 {
            return Err(invalid("tile-cache-mb", "must be at least 1"));
        }
        if let Some(downsample) = self.downsample {
            if !downsample.is_finite() || downsample <= 0.0 {
                return Err(invalid("downsample", "must be a positive number"));
            }
        }

        let targets = [
            self.level.is_some(),
            self.downsample.is_some(),
            self.associated.is_some(),
        ];
        if targets.iter().filter(|&&set| set).count() > 1 {
            return Err(ArgumentError::Conflict(
                "--level, --downsample and --associated are mutually exclusive".to_string(),
            ));
        }
        Ok(())
    }

    /// The filter radius as a positive integer.
    pub fn radius(&self) -> Result<u32, ArgumentError> {
        let radius: u32 = self
            .radius
            .trim()
            .parse()
            .map_err(|_| invalid("RADIUS", format!("'{}' is not a positive integer", self.radius)))?;
        if radius == 0 {
            return Err(invalid("RADIUS", "must be at least 1"));
        }
        Ok(radius)
    }

    pub fn read_target(&self) -> ReadTarget {
        read_target(self.level, self.downsample, self.associated.as_deref())
    }

    pub fn source_options(&self) -> SourceOptions {
        SourceOptions {
            block_size: self.block_size,
            cache_blocks: self.cache_blocks,
            tile_cache_bytes: self.tile_cache_mb.saturating_mul(1024 * 1024),
            pixel_format: self.pixel_format,
            target: self.read_target(),
        }
    }

    pub fn writer_config(&self) -> WriterConfig {
        WriterConfig {
            divisions: self.divisions,
            max_in_flight: self.max_in_flight,
        }
    }
}

// =============================================================================
// slide-info
// =============================================================================

/// Print what a slide contains: levels, metadata and associated images.
#[derive(Parser, Debug, Clone)]
#[command(name = "slide-info")]
#[command(author, version, about, long_about = None)]
pub struct InfoConfig {
    /// Slide (SVS, TIFF) or raster image to describe.
    pub slide: PathBuf,

    /// Print the information as JSON.
    #[arg(long, default_value_t = false)]
    pub json: bool,

    /// Write every pyramid level as DIR/level-<n>.png.
    #[arg(long, value_name = "DIR")]
    pub write_levels: Option<PathBuf>,

    /// Write every associated image as DIR/<name>.png.
    #[arg(long, value_name = "DIR")]
    pub write_associated: Option<PathBuf>,

    /// Skip images larger than this many bytes when writing.
    #[arg(long, default_value_t = DEFAULT_MAX_IMAGE_BYTES, env = "SLIDE_INFO_MAX_IMAGE_BYTES")]
    pub max_image_bytes: u64,

    /// Pixel format used for the reported pixel type and written images.
    #[arg(long, value_enum, default_value_t = PixelFormat::Rgb8)]
    pub pixel_format: PixelFormat,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl InfoConfig {
    pub fn validate(&self) -> Result<(), ArgumentError> {
        if self.max_image_bytes == 0 {
            return Err(invalid("max-image-bytes", "must be at least 1"));
        }
        Ok(())
    }

    pub fn source_options(&self) -> SourceOptions {
        SourceOptions {
            pixel_format: self.pixel_format,
            ..SourceOptions::default()
        }
    }
}

fn read_target(level: Option<usize>, downsample: Option<f64>, associated: Option<&str>) -> ReadTarget {
    match (level, downsample, associated) {
        (Some(level), _, _) => ReadTarget::Level(level),
        (_, Some(downsample), _) => ReadTarget::Downsample(downsample),
        (_, _, Some(name)) => ReadTarget::Associated(name.to_string()),
        _ => ReadTarget::default(),
    }
}

fn invalid(name: &'static str, message: impl Into<String>) -> ArgumentError {
    ArgumentError::InvalidValue {
        name,
        message: message.into(),
    }
}

// =============================================================================
// Tests
// =============================================================================
