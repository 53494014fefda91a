//! Slide file formats.
//!
//! TIFF structure parsing lives in [`tiff`]; the other modules add what the
//! TIFF layer does not know about: JPEG table merging, Aperio metadata and
//! format classification.

pub mod detect;
pub mod jpeg;
pub mod svs;
pub mod tiff;

pub use detect::{is_tiff_header, SlideFormat};
pub use jpeg::{is_abbreviated_stream, merge_jpeg_tables, prepare_tile_jpeg};
pub use svs::{is_aperio, SvsMetadata};
