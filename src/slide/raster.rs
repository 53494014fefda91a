//! Plain raster images (PNG, JPEG, PNM) as image sources.
//!
//! These formats have no random access, so the whole image is decoded when
//! it is opened and regions are cut from memory.

use std::path::Path;

use async_trait::async_trait;
use image::{ImageError, ImageReader};
use tracing::debug;

use crate::error::{DecodeError, IoError, ReadError};
use crate::pixel::{ImageMetadata, MemoryImage, PixelBuffer, PixelFormat};
use crate::region::Region;

use super::source::ImageSource;

/// A raster file decoded into memory.
pub struct RasterImage {
    image: MemoryImage<2>,
    identifier: String,
}

impl RasterImage {
    /// Decode the file at `path`, converting it to `pixel_format`.
    pub async fn open(path: impl AsRef<Path>, pixel_format: PixelFormat) -> Result<Self, DecodeError> {
        let path = path.as_ref().to_path_buf();
        let identifier = path.display().to_string();

        let image = tokio::task::spawn_blocking(move || decode_file(&path, pixel_format))
            .await
            .map_err(|e| DecodeError::Image {
                message: format!("decoder task failed: {}", e),
            })??;

        debug!(
            source = %identifier,
            width = image.metadata().dimensions()[0],
            height = image.metadata().dimensions()[1],
            "decoded raster image"
        );
        Ok(Self { image, identifier })
    }

    /// Wrap an image already in memory.
    pub fn from_memory(image: MemoryImage<2>, identifier: impl Into<String>) -> Self {
        Self {
            image,
            identifier: identifier.into(),
        }
    }
}

fn decode_file(path: &Path, pixel_format: PixelFormat) -> Result<MemoryImage<2>, DecodeError> {
    let decoded = ImageReader::open(path)
        .map_err(IoError::from)?
        .with_guessed_format()
        .map_err(IoError::from)?
        .decode()
        .map_err(|e| match e {
            ImageError::Unsupported(e) => DecodeError::UnsupportedFormat(e.to_string()),
            ImageError::IoError(e) => DecodeError::Io(e.into()),
            e => DecodeError::Image {
                message: e.to_string(),
            },
        })?;

    let metadata = ImageMetadata::new([decoded.width(), decoded.height()], pixel_format)
        .map_err(|e| DecodeError::Image {
            message: e.to_string(),
        })?;
    MemoryImage::from_samples(metadata, pixel_format.samples_from(decoded)).map_err(|e| {
        DecodeError::Image {
            message: e.to_string(),
        }
    })
}

#[async_trait]
impl ImageSource<2> for RasterImage {
    fn metadata(&self) -> &ImageMetadata<2> {
        self.image.metadata()
    }

    async fn read_region(&self, region: &Region<2>) -> Result<PixelBuffer<2>, ReadError> {
        Ok(self.image.buffer().extract(region)?)
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}
