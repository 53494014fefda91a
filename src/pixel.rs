//! Pixel formats, image metadata and owned pixel buffers.
//!
//! Every buffer stores 8-bit samples in row-major order (axis 0 fastest) with
//! channels interleaved, so a 2-D RGB buffer is laid out as
//! `r g b r g b ...` row after row.

use serde::Serialize;

use crate::error::RegionError;
use crate::region::Region;

// =============================================================================
// PixelFormat
// =============================================================================

/// Sample layout of a pixel, resolved once when a source is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// One 8-bit luminance channel
    #[default]
    Gray8,
    /// Three 8-bit channels
    Rgb8,
    /// Four 8-bit channels, alpha last
    Rgba8,
}

impl PixelFormat {
    /// Number of interleaved channels.
    pub const fn channels(self) -> usize {
        match self {
            PixelFormat::Gray8 => 1,
            PixelFormat::Rgb8 => 3,
            PixelFormat::Rgba8 => 4,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            PixelFormat::Gray8 => "gray8",
            PixelFormat::Rgb8 => "rgb8",
            PixelFormat::Rgba8 => "rgba8",
        }
    }

    /// Pixel type label in the vocabulary of image toolkits.
    pub const fn pixel_type(self) -> &'static str {
        match self {
            PixelFormat::Gray8 => "scalar",
            PixelFormat::Rgb8 => "rgb",
            PixelFormat::Rgba8 => "rgba",
        }
    }

    /// Convert a decoded image into this format's sample layout.
    pub fn samples_from(self, image: image::DynamicImage) -> Vec<u8> {
        match self {
            PixelFormat::Gray8 => image.into_luma8().into_raw(),
            PixelFormat::Rgb8 => image.into_rgb8().into_raw(),
            PixelFormat::Rgba8 => image.into_rgba8().into_raw(),
        }
    }
}

// =============================================================================
// ImageMetadata
// =============================================================================

/// Whole-image description, read once when a source is opened.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageMetadata<const D: usize> {
    #[serde(with = "array_serde")]
    dimensions: [u32; D],
    pixel_format: PixelFormat,
    #[serde(with = "array_serde")]
    spacing: [f64; D],
    #[serde(with = "array_serde")]
    origin: [f64; D],
    #[serde(skip)]
    bounds: Region<D>,
}

impl<const D: usize> ImageMetadata<D> {
    /// Metadata with unit spacing and zero origin.
    pub fn new(dimensions: [u32; D], pixel_format: PixelFormat) -> Result<Self, RegionError> {
        Ok(Self {
            dimensions,
            pixel_format,
            spacing: [1.0; D],
            origin: [0.0; D],
            bounds: Region::from_dimensions(dimensions)?,
        })
    }

    pub fn with_spacing(mut self, spacing: [f64; D]) -> Self {
        self.spacing = spacing;
        self
    }

    pub fn dimensions(&self) -> [u32; D] {
        self.dimensions
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    pub fn spacing(&self) -> [f64; D] {
        self.spacing
    }

    pub fn origin(&self) -> [f64; D] {
        self.origin
    }

    /// The region covering the whole image.
    pub fn bounds(&self) -> Region<D> {
        self.bounds
    }

    pub fn size_in_bytes(&self) -> u64 {
        self.bounds.num_pixels() * self.pixel_format.channels() as u64
    }
}

mod array_serde {
    use serde::{Serialize, Serializer};

    pub fn serialize<S, T, const D: usize>(value: &[T; D], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        T: Serialize,
    {
        value.as_slice().serialize(serializer)
    }
}

// =============================================================================
// PixelBuffer
// =============================================================================

/// Owned samples for exactly one region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer<const D: usize> {
    region: Region<D>,
    format: PixelFormat,
    data: Vec<u8>,
}

impl<const D: usize> PixelBuffer<D> {
    /// Buffer with every sample set to zero.
    pub fn zeroed(region: Region<D>, format: PixelFormat) -> Self {
        Self::filled(region, format, 0)
    }

    /// Buffer with every sample set to `value`.
    pub fn filled(region: Region<D>, format: PixelFormat, value: u8) -> Self {
        let len = region.num_pixels() as usize * format.channels();
        Self {
            region,
            format,
            data: vec![value; len],
        }
    }

    /// Wrap existing samples, checking the length against the region.
    pub fn from_vec(
        region: Region<D>,
        format: PixelFormat,
        data: Vec<u8>,
    ) -> Result<Self, RegionError> {
        let expected = region.num_pixels() as usize * format.channels();
        if data.len() != expected {
            return Err(RegionError::BufferLength {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            region,
            format,
            data,
        })
    }

    pub fn region(&self) -> &Region<D> {
        &self.region
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Channels of the pixel at `point`, in image coordinates.
    pub fn pixel(&self, point: &[u32; D]) -> Option<&[u8]> {
        if !self.region.contains_point(point) {
            return None;
        }
        let channels = self.format.channels();
        let start = self.region.linear_index(point) * channels;
        Some(&self.data[start..start + channels])
    }

    /// Copy out the samples of `sub`, which must lie inside this buffer.
    pub fn extract(&self, sub: &Region<D>) -> Result<PixelBuffer<D>, RegionError> {
        sub.check_within(&self.region)?;
        let channels = self.format.channels();
        let line_len = sub.extent()[0] as usize * channels;
        let mut data = Vec::with_capacity(sub.num_pixels() as usize * channels);
        for start in sub.line_starts() {
            let from = self.region.linear_index(&start) * channels;
            data.extend_from_slice(&self.data[from..from + line_len]);
        }
        Ok(PixelBuffer {
            region: *sub,
            format: self.format,
            data,
        })
    }

    /// Copy `other` into its place inside this buffer.
    pub fn paste(&mut self, other: &PixelBuffer<D>) -> Result<(), RegionError> {
        if other.format != self.format {
            return Err(RegionError::FormatMismatch {
                expected: self.format.name(),
                actual: other.format.name(),
            });
        }
        other.region.check_within(&self.region)?;
        let channels = self.format.channels();
        let line_len = other.region.extent()[0] as usize * channels;
        for (line, start) in other.region.line_starts().enumerate() {
            let to = self.region.linear_index(&start) * channels;
            let from = line * line_len;
            self.data[to..to + line_len].copy_from_slice(&other.data[from..from + line_len]);
        }
        Ok(())
    }
}

// =============================================================================
// MemoryImage
// =============================================================================

/// A whole image held in memory.
///
/// Serves as an image source for small inputs and tests, and as an output
/// container that assembles chunks.
#[derive(Debug, Clone)]
pub struct MemoryImage<const D: usize> {
    metadata: ImageMetadata<D>,
    buffer: PixelBuffer<D>,
}

impl<const D: usize> MemoryImage<D> {
    /// Zero-filled image described by `metadata`.
    pub fn new(metadata: ImageMetadata<D>) -> Self {
        let buffer = PixelBuffer::zeroed(metadata.bounds(), metadata.pixel_format());
        Self { metadata, buffer }
    }

    /// Image built from existing samples covering `metadata.bounds()`.
    pub fn from_samples(metadata: ImageMetadata<D>, data: Vec<u8>) -> Result<Self, RegionError> {
        let buffer = PixelBuffer::from_vec(metadata.bounds(), metadata.pixel_format(), data)?;
        Ok(Self { metadata, buffer })
    }

    pub fn metadata(&self) -> &ImageMetadata<D> {
        &self.metadata
    }

    pub fn buffer(&self) -> &PixelBuffer<D> {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut PixelBuffer<D> {
        &mut self.buffer
    }

    pub fn into_buffer(self) -> PixelBuffer<D> {
        self.buffer
    }
}
