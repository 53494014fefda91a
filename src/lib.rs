//! # slide-stream
//!
//! Bounded-memory filtering of whole-slide microscopy images.
//!
//! Slides are far larger than memory. This library reads them region by
//! region straight from the file and pushes them through a neighborhood
//! filter one chunk at a time, so peak memory depends on the chunk size and
//! never on the image size.
//!
//! ## Features
//!
//! - **Region reads**: Only the tiles a region touches are fetched and decoded
//! - **Format support**: Native parsers for Aperio SVS and pyramidal TIFF (classic and BigTIFF)
//! - **Halo-correct chunking**: Each chunk reads the margin its filter needs, so the
//!   streamed result equals filtering the whole image at once
//! - **Streamed output**: PNM outputs are written chunk by chunk at their final offsets
//!
//! ## Architecture
//!
//! - [`io`] - Byte-range readers and the block cache
//! - [`mod@format`] - TIFF/SVS parsers and JPEG handling
//! - [`slide`] - Region-addressable image sources
//! - [`stream`] - Partitioning, filtering, output containers and the streaming writer
//! - [`region`] and [`pixel`] - N-dimensional regions and pixel buffers
//! - [`config`] - CLI configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use slide_stream::{
//!     open_source, create_output, MedianFilter, SourceOptions, StreamingFilterPipeline,
//!     StreamingWriter, WriterConfig,
//! };
//!
//! # async fn example() -> Result<(), slide_stream::PipelineError> {
//! let source: Arc<dyn slide_stream::ImageSource<2>> =
//!     Arc::from(open_source("slide.svs", &SourceOptions::default()).await?);
//! let metadata = source.metadata().clone();
//! let pipeline = Arc::new(StreamingFilterPipeline::new(source, MedianFilter::isotropic(2)));
//! let output = create_output("filtered.pgm", metadata).await?;
//!
//! let summary = StreamingWriter::new(pipeline, output, WriterConfig::default())
//!     .run()
//!     .await?;
//! println!("wrote {} chunks", summary.chunks);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod format;
pub mod io;
pub mod logging;
pub mod pixel;
pub mod region;
pub mod slide;
pub mod stream;

// Re-export commonly used types
pub use config::{InfoConfig, StreamConfig};
pub use error::{
    ArgumentError, DecodeError, FilterError, FormatError, IoError, PartitionError, PipelineError,
    ReadError, RegionError, TiffError, WriteError,
};
pub use format::{is_tiff_header, SlideFormat, SvsMetadata};
pub use io::{BlockCache, LocalFileReader, MemoryReader, RangeReader};
pub use pixel::{ImageMetadata, MemoryImage, PixelBuffer, PixelFormat};
pub use region::Region;
pub use slide::{
    open_slide, open_source, AssociatedImageInfo, FileSlide, ImageSource, LevelInfo, RasterImage,
    ReadTarget, SlideOptions, SourceOptions, TiffSlide,
};
pub use stream::{
    create_output, partition, CancellationFlag, Chunk, MedianFilter, NeighborhoodFilter,
    OutputContainer, Passthrough, StreamSummary, StreamingFilterPipeline, StreamingWriter,
    WriterConfig,
};
