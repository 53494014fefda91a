//! Byte-range I/O for slide files.
//!
//! [`RangeReader`] is the seam between the TIFF parser and storage. Slides on
//! disk are opened with [`LocalFileReader`] and wrapped in a [`BlockCache`];
//! [`MemoryReader`] serves bytes that are already in memory.

mod block_cache;
mod file_reader;
mod range_reader;
mod single_flight;

pub use block_cache::{BlockCache, DEFAULT_BLOCK_CACHE_CAPACITY, DEFAULT_BLOCK_SIZE};
pub use file_reader::LocalFileReader;
pub use range_reader::{check_range, MemoryReader, RangeReader};
pub(crate) use single_flight::{Flight, SingleFlight};
