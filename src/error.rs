use thiserror::Error;

/// I/O errors that can occur when reading slide bytes
#[derive(Debug, Clone, Error)]
pub enum IoError {
    /// Requested range exceeds resource bounds
    #[error("Range out of bounds: requested {requested} bytes at offset {offset}, size is {size}")]
    RangeOutOfBounds {
        offset: u64,
        requested: u64,
        size: u64,
    },

    /// File could not be found or opened
    #[error("File not found: {0}")]
    NotFound(String),

    /// Operating system read failure
    #[error("Read error: {0}")]
    Read(String),
}

impl From<std::io::Error> for IoError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => IoError::NotFound(err.to_string()),
            _ => IoError::Read(err.to_string()),
        }
    }
}

/// Errors related to format detection
#[derive(Debug, Clone, Error)]
pub enum FormatError {
    /// I/O error while reading the file
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// TIFF parsing error
    #[error("TIFF error: {0}")]
    Tiff(#[from] TiffError),

    /// File format is not supported
    #[error("Unsupported format: {reason}")]
    UnsupportedFormat { reason: String },
}

/// Errors that can occur when parsing TIFF files
#[derive(Debug, Clone, Error)]
pub enum TiffError {
    /// I/O error while reading the file
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// Invalid TIFF magic bytes (not II or MM)
    #[error("Invalid TIFF magic bytes: expected 0x4949 (II) or 0x4D4D (MM), got 0x{0:04X}")]
    InvalidMagic(u16),

    /// Invalid TIFF version number
    #[error("Invalid TIFF version: expected 42 (TIFF) or 43 (BigTIFF), got {0}")]
    InvalidVersion(u16),

    /// Invalid BigTIFF offset byte size (must be 8)
    #[error("Invalid BigTIFF offset byte size: expected 8, got {0}")]
    InvalidBigTiffOffsetSize(u16),

    /// File is too small to contain a valid TIFF header
    #[error("File too small: need at least {required} bytes, got {actual}")]
    FileTooSmall { required: u64, actual: u64 },

    /// IFD offset points outside the file
    #[error("Invalid IFD offset: {0}")]
    InvalidIfdOffset(u64),

    /// Required tag is missing from IFD
    #[error("Missing required tag: {0}")]
    MissingTag(&'static str),

    /// Tag has unexpected type or count
    #[error("Invalid tag value for {tag}: {message}")]
    InvalidTagValue { tag: &'static str, message: String },

    /// Unknown field type in IFD entry
    #[error("Unknown field type: {0}")]
    UnknownFieldType(u16),

    /// File has no tiled image usable as a pyramid level
    #[error("No pyramid levels found")]
    NoPyramidLevels,
}

/// Errors raised by region arithmetic and buffer access
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegionError {
    /// A region extent component was zero
    #[error("Region has an empty extent on axis {axis}")]
    EmptyExtent { axis: usize },

    /// Region is not fully contained in the bounds it was checked against
    #[error("Region {region} is outside bounds {bounds}")]
    OutOfBounds { region: String, bounds: String },

    /// Sample vector length does not match region and pixel format
    #[error("Buffer length mismatch: expected {expected} bytes, got {actual}")]
    BufferLength { expected: usize, actual: usize },

    /// Two buffers with different pixel formats were combined
    #[error("Pixel format mismatch: expected {expected}, got {actual}")]
    FormatMismatch {
        expected: &'static str,
        actual: &'static str,
    },
}

/// Errors raised while opening or decoding an image source
#[derive(Debug, Clone, Error)]
pub enum DecodeError {
    /// I/O error while reading the source
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// TIFF structure error
    #[error("TIFF error: {0}")]
    Tiff(#[from] TiffError),

    /// Format detection failed
    #[error("{0}")]
    Format(#[from] FormatError),

    /// Tile compression the decoder cannot handle
    #[error("Unsupported compression: {0} (only JPEG and uncompressed data are supported)")]
    UnsupportedCompression(String),

    /// Sample layout the decoder cannot handle
    #[error("Unsupported sample layout: {0}")]
    UnsupportedLayout(String),

    /// Input is neither a slide nor a raster image
    #[error("Unsupported input format: {0}")]
    UnsupportedFormat(String),

    /// Requested pyramid level does not exist
    #[error("Level {level} does not exist (slide has {count} levels)")]
    UnknownLevel { level: usize, count: usize },

    /// Requested associated image does not exist
    #[error("Associated image '{0}' does not exist")]
    UnknownAssociatedImage(String),

    /// Tile index has no offset/byte count entry
    #[error("Tile {index} has no data")]
    MissingTile { index: u32 },

    /// Decoded tile does not have the geometry the TIFF tags promise
    #[error("Tile {index} decoded to {width}x{height}, expected at least {expected_width}x{expected_height}")]
    TileGeometry {
        index: u32,
        width: u32,
        height: u32,
        expected_width: u32,
        expected_height: u32,
    },

    /// Image codec failure
    #[error("Image decode error: {message}")]
    Image { message: String },
}

/// Errors returned by region reads
#[derive(Debug, Clone, Error)]
pub enum ReadError {
    /// Requested region is not inside the image
    #[error("{0}")]
    OutOfBounds(#[from] RegionError),

    /// Underlying read or decode failure
    #[error("{0}")]
    Decode(#[from] DecodeError),
}

/// Errors raised by the chunk partitioner
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PartitionError {
    /// Zero chunks were requested
    #[error("Chunk count must be at least 1")]
    ZeroChunks,

    /// More chunks than units along the split axis
    #[error("Cannot split axis {axis} of extent {extent} into {count} non-empty chunks")]
    TooManyChunks { count: usize, axis: usize, extent: u32 },
}

/// Errors raised while applying a neighborhood filter
#[derive(Debug, Clone, Error)]
pub enum FilterError {
    /// Buffer geometry error
    #[error("{0}")]
    Region(#[from] RegionError),

    /// Worker thread running the filter failed
    #[error("Filter worker failed: {message}")]
    Worker { message: String },
}

/// Errors raised by output containers
#[derive(Debug, Clone, Error)]
pub enum WriteError {
    /// Operating system write failure
    #[error("I/O error: {0}")]
    Io(String),

    /// Chunk does not fit in the output image
    #[error("{0}")]
    OutOfBounds(#[from] RegionError),

    /// Chunk pixel format differs from the container's
    #[error("Pixel format mismatch: container is {expected}, chunk is {actual}")]
    FormatMismatch {
        expected: &'static str,
        actual: &'static str,
    },

    /// No encoder for the requested output
    #[error("Unsupported output format: {0}")]
    UnsupportedFormat(String),

    /// Encoder failure
    #[error("Encode error: {message}")]
    Encode { message: String },
}

impl From<std::io::Error> for WriteError {
    fn from(err: std::io::Error) -> Self {
        WriteError::Io(err.to_string())
    }
}

/// Invalid command-line or configuration values
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArgumentError {
    /// A value failed validation
    #[error("invalid value for {name}: {message}")]
    InvalidValue { name: &'static str, message: String },

    /// Options that cannot be combined
    #[error("{0}")]
    Conflict(String),
}

/// Run-level error naming the stage that failed.
///
/// Every variant is fatal; the run stops at the first one.
#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    #[error("{0}")]
    Argument(#[from] ArgumentError),

    #[error("{0}")]
    Decode(#[from] DecodeError),

    #[error("{0}")]
    RegionOutOfBounds(#[from] RegionError),

    #[error("{0}")]
    Partition(#[from] PartitionError),

    #[error("{0}")]
    Filter(#[from] FilterError),

    #[error("{0}")]
    Write(#[from] WriteError),

    #[error("cancelled after {written} of {total} chunks")]
    Cancelled { written: usize, total: usize },
}

impl PipelineError {
    /// Name of the stage that produced this error.
    pub fn stage(&self) -> &'static str {
        match self {
            PipelineError::Argument(_) => "argument parsing",
            PipelineError::Decode(_) => "decode",
            PipelineError::RegionOutOfBounds(_) => "region",
            PipelineError::Partition(_) => "partition",
            PipelineError::Filter(_) => "filter",
            PipelineError::Write(_) => "write",
            PipelineError::Cancelled { .. } => "cancel",
        }
    }
}

impl From<ReadError> for PipelineError {
    fn from(err: ReadError) -> Self {
        match err {
            ReadError::OutOfBounds(e) => PipelineError::RegionOutOfBounds(e),
            ReadError::Decode(e) => PipelineError::Decode(e),
        }
    }
}
