//! Chunked filtering of images that do not fit in memory.
//!
//! A run flows through four stages:
//!
//! ```text
//!   partition ──► halo read ──► filter ──► write
//!   (Chunk)      (ImageSource)  (blocking)  (OutputContainer)
//! ```
//!
//! Only one chunk and its halo are resident per in-flight task.

mod filter;
mod output;
mod partition;
mod pipeline;
mod writer;

pub use filter::{MedianFilter, NeighborhoodFilter, Passthrough};
pub use output::{
    create_output, EncodedFormat, EncodedImageContainer, OutputContainer, PnmContainer,
    JPEG_QUALITY,
};
pub use partition::{partition, split_axis, Chunk};
pub use pipeline::StreamingFilterPipeline;
pub use writer::{
    CancellationFlag, StreamSummary, StreamingWriter, WriterConfig, DEFAULT_DIVISIONS,
    DEFAULT_MAX_IN_FLIGHT,
};
