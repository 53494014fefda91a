//! Region-addressable image sources.
//!
//! Everything the streaming pipeline reads from implements [`ImageSource`]:
//!
//! ```text
//!                 ┌──────────────────────┐
//!                 │  ImageSource<D>      │
//!                 │  metadata()          │
//!                 │  read_region(region) │
//!                 └──────────┬───────────┘
//!          ┌─────────────────┼──────────────────┐
//!          ▼                 ▼                  ▼
//!   ┌─────────────┐   ┌─────────────┐   ┌──────────────┐
//!   │  TiffSlide  │   │ RasterImage │   │ MemoryImage  │
//!   │ (SVS, TIFF) │   │ (PNG, JPEG) │   │   (tests)    │
//!   └──────┬──────┘   └─────────────┘   └──────────────┘
//!          │ tiles
//!          ▼
//!   TileCache ─► TileDecoder ─► RangeReader (BlockCache ─► file)
//! ```
//!
//! [`open_source`] picks the right implementation for a file.

mod decode;
mod open;
mod raster;
mod source;
mod tiff_slide;
mod tile_cache;

pub use decode::TileDecoder;
pub use open::{open_slide, open_source, FileSlide, SourceOptions};
pub use raster::RasterImage;
pub use source::{AssociatedImageInfo, ImageSource, LevelInfo, ReadTarget};
pub use tiff_slide::{SlideOptions, TiffSlide};
pub use tile_cache::{DecodedTile, TileCache, TileKey, DEFAULT_TILE_CACHE_BYTES};
