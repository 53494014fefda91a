//! TIFF and BigTIFF structure parsing.
//!
//! - **Byte order**: declared in the header (II / MM); every multi-byte value
//!   is read through [`ByteOrder`].
//! - **Classic vs BigTIFF**: 32-bit vs 64-bit offsets, handled transparently.
//! - **IFD**: one directory per stored image. Slides hold pyramid levels plus
//!   label, macro and thumbnail images.
//! - **Inline vs offset values**: small values live in the entry, arrays are
//!   fetched from the file by [`ValueReader`].

mod parser;
mod pyramid;
mod tags;
mod values;

pub use parser::{ByteOrder, Ifd, IfdEntry, TiffHeader, BIGTIFF_HEADER_SIZE, TIFF_HEADER_SIZE};
pub use pyramid::{DirectoryImage, PyramidLevel, TiffPyramid, TileData, TileGrid};
pub use tags::{Compression, FieldType, TiffTag};
pub use values::{parse_u64_array, ValueReader};
