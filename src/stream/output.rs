//! Output containers that receive filtered chunks.
//!
//! | Extension                  | Container                  | Memory      |
//! |----------------------------|----------------------------|-------------|
//! | `pgm`, `ppm`, `pam`, `pnm` | [`PnmContainer`]           | one chunk   |
//! | `png`, `jpg`, `jpeg`       | [`EncodedImageContainer`]  | whole image |
//!
//! PNM files are written region by region at their final byte offsets. PNG
//! and JPEG cannot be, so their container assembles the image in memory and
//! encodes it when finished.

use std::fs::File as StdFile;
use std::io::{BufWriter, SeekFrom};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder};
use tokio::fs::File;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, warn};

use crate::error::WriteError;
use crate::pixel::{ImageMetadata, MemoryImage, PixelBuffer, PixelFormat};

/// JPEG quality for encoded outputs.
pub const JPEG_QUALITY: u8 = 95;

/// Destination of a streamed image.
///
/// Chunks may arrive in any order; each must lie inside `metadata().bounds()`
/// and use the container's pixel format.
#[async_trait]
pub trait OutputContainer<const D: usize>: Send {
    fn metadata(&self) -> &ImageMetadata<D>;

    /// Store `buffer` at its region.
    async fn write_region(&mut self, buffer: &PixelBuffer<D>) -> Result<(), WriteError>;

    /// Complete the output. No writes may follow.
    async fn finish(&mut self) -> Result<(), WriteError>;
}

fn check_chunk<const D: usize>(
    metadata: &ImageMetadata<D>,
    buffer: &PixelBuffer<D>,
) -> Result<(), WriteError> {
    if buffer.format() != metadata.pixel_format() {
        return Err(WriteError::FormatMismatch {
            expected: metadata.pixel_format().name(),
            actual: buffer.format().name(),
        });
    }
    buffer.region().check_within(&metadata.bounds())?;
    Ok(())
}

#[async_trait]
impl<const D: usize> OutputContainer<D> for MemoryImage<D> {
    fn metadata(&self) -> &ImageMetadata<D> {
        MemoryImage::metadata(self)
    }

    async fn write_region(&mut self, buffer: &PixelBuffer<D>) -> Result<(), WriteError> {
        check_chunk(MemoryImage::metadata(self), buffer)?;
        self.buffer_mut().paste(buffer)?;
        Ok(())
    }

    async fn finish(&mut self) -> Result<(), WriteError> {
        Ok(())
    }
}

#[async_trait]
impl<const D: usize, T> OutputContainer<D> for Box<T>
where
    T: OutputContainer<D> + ?Sized,
{
    fn metadata(&self) -> &ImageMetadata<D> {
        (**self).metadata()
    }

    async fn write_region(&mut self, buffer: &PixelBuffer<D>) -> Result<(), WriteError> {
        (**self).write_region(buffer).await
    }

    async fn finish(&mut self) -> Result<(), WriteError> {
        (**self).finish().await
    }
}

// =============================================================================
// PNM
// =============================================================================

/// Binary PGM / PPM / PAM file written in place, one region at a time.
pub struct PnmContainer {
    file: File,
    metadata: ImageMetadata<2>,
    header_len: u64,
    path: PathBuf,
}

impl PnmContainer {
    /// Create the file, write its header and size it for the full image.
    pub async fn create(
        path: impl AsRef<Path>,
        metadata: ImageMetadata<2>,
    ) -> Result<Self, WriteError> {
        let path = path.as_ref().to_path_buf();
        let header = pnm_header(&metadata);

        let mut file = File::create(&path).await?;
        file.write_all(header.as_bytes()).await?;
        file.set_len(header.len() as u64 + metadata.size_in_bytes())
            .await?;

        debug!(path = %path.display(), bytes = metadata.size_in_bytes(), "created PNM output");
        Ok(Self {
            file,
            metadata,
            header_len: header.len() as u64,
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn pnm_header(metadata: &ImageMetadata<2>) -> String {
    let [width, height] = metadata.dimensions();
    match metadata.pixel_format() {
        PixelFormat::Gray8 => format!("P5\n{} {}\n255\n", width, height),
        PixelFormat::Rgb8 => format!("P6\n{} {}\n255\n", width, height),
        PixelFormat::Rgba8 => format!(
            "P7\nWIDTH {}\nHEIGHT {}\nDEPTH 4\nMAXVAL 255\nTUPLTYPE RGB_ALPHA\nENDHDR\n",
            width, height
        ),
    }
}

#[async_trait]
impl OutputContainer<2> for PnmContainer {
    fn metadata(&self) -> &ImageMetadata<2> {
        &self.metadata
    }

    async fn write_region(&mut self, buffer: &PixelBuffer<2>) -> Result<(), WriteError> {
        check_chunk(&self.metadata, buffer)?;

        let channels = self.metadata.pixel_format().channels() as u64;
        let image_width = self.metadata.dimensions()[0] as u64;
        let [x, y0] = buffer.region().offset();
        let [width, height] = buffer.region().extent();
        let row_len = width as usize * channels as usize;

        for (row, line) in buffer.data().chunks_exact(row_len).enumerate() {
            let y = y0 as u64 + row as u64;
            let offset = self.header_len + (y * image_width + x as u64) * channels;
            self.file.seek(SeekFrom::Start(offset)).await?;
            self.file.write_all(line).await?;
        }
        // Written chunks stay on disk if a later chunk fails
        self.file.flush().await?;
        debug!(region = %buffer.region(), rows = height, "wrote PNM region");
        Ok(())
    }

    async fn finish(&mut self) -> Result<(), WriteError> {
        self.file.flush().await?;
        self.file.sync_all().await?;
        Ok(())
    }
}

// =============================================================================
// PNG / JPEG
// =============================================================================

/// Encoded image format of an [`EncodedImageContainer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodedFormat {
    Png,
    Jpeg,
}

/// PNG or JPEG output, assembled in memory and encoded on `finish`.
pub struct EncodedImageContainer {
    path: PathBuf,
    format: EncodedFormat,
    metadata: ImageMetadata<2>,
    /// Taken by `finish`
    image: Option<MemoryImage<2>>,
}

impl EncodedImageContainer {
    pub fn new(
        path: impl AsRef<Path>,
        format: EncodedFormat,
        metadata: ImageMetadata<2>,
    ) -> Result<Self, WriteError> {
        if format == EncodedFormat::Jpeg && metadata.pixel_format() == PixelFormat::Rgba8 {
            return Err(WriteError::UnsupportedFormat(
                "JPEG output cannot store an alpha channel".to_string(),
            ));
        }
        let path = path.as_ref().to_path_buf();
        warn!(
            path = %path.display(),
            bytes = metadata.size_in_bytes(),
            "{:?} output is encoded from a full in-memory image",
            format
        );
        Ok(Self {
            path,
            format,
            image: Some(MemoryImage::new(metadata.clone())),
            metadata,
        })
    }
}

#[async_trait]
impl OutputContainer<2> for EncodedImageContainer {
    fn metadata(&self) -> &ImageMetadata<2> {
        &self.metadata
    }

    async fn write_region(&mut self, buffer: &PixelBuffer<2>) -> Result<(), WriteError> {
        match self.image.as_mut() {
            Some(image) => image.write_region(buffer).await,
            None => Err(finished_error(&self.path)),
        }
    }

    async fn finish(&mut self) -> Result<(), WriteError> {
        let image = self.image.take().ok_or_else(|| finished_error(&self.path))?;
        let path = self.path.clone();
        let format = self.format;

        tokio::task::spawn_blocking(move || encode_to_file(&path, format, &image))
            .await
            .map_err(|e| WriteError::Encode {
                message: e.to_string(),
            })?
    }
}

fn finished_error(path: &Path) -> WriteError {
    WriteError::Io(format!("{} is already finished", path.display()))
}

fn encode_to_file(
    path: &Path,
    format: EncodedFormat,
    image: &MemoryImage<2>,
) -> Result<(), WriteError> {
    let [width, height] = image.metadata().dimensions();
    let color = match image.metadata().pixel_format() {
        PixelFormat::Gray8 => ExtendedColorType::L8,
        PixelFormat::Rgb8 => ExtendedColorType::Rgb8,
        PixelFormat::Rgba8 => ExtendedColorType::Rgba8,
    };
    let writer = BufWriter::new(StdFile::create(path)?);
    let data = image.buffer().data();

    let result = match format {
        EncodedFormat::Png => PngEncoder::new(writer).write_image(data, width, height, color),
        EncodedFormat::Jpeg => {
            JpegEncoder::new_with_quality(writer, JPEG_QUALITY).write_image(data, width, height, color)
        }
    };
    result.map_err(|e| WriteError::Encode {
        message: e.to_string(),
    })
}

/// Pick an output container from the extension of `path`.
pub async fn create_output(
    path: impl AsRef<Path>,
    metadata: ImageMetadata<2>,
) -> Result<Box<dyn OutputContainer<2>>, WriteError> {
    let path = path.as_ref();
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    match extension.as_str() {
        "pgm" | "ppm" | "pam" | "pnm" => Ok(Box::new(PnmContainer::create(path, metadata).await?)),
        "png" => Ok(Box::new(EncodedImageContainer::new(
            path,
            EncodedFormat::Png,
            metadata,
        )?)),
        "jpg" | "jpeg" => Ok(Box::new(EncodedImageContainer::new(
            path,
            EncodedFormat::Jpeg,
            metadata,
        )?)),
        _ => Err(WriteError::UnsupportedFormat(format!(
            "cannot write '{}': expected one of pgm, ppm, pam, pnm, png, jpg",
            path.display()
        ))),
    }
}
