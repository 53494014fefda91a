//! Tile decoding.
//!
//! Turns the stored bytes of one tile (or strip) into samples of the slide's
//! pixel format, cropped to the part of the tile that lies inside the image.
//! JPEG tiles go through the `image` crate's decoder after their tables are
//! restored; uncompressed 8-bit tiles are wrapped as image buffers directly.

use std::io::Cursor;

use bytes::Bytes;
use image::{DynamicImage, ImageBuffer, ImageReader};

use crate::error::DecodeError;
use crate::format::prepare_tile_jpeg;
use crate::format::tiff::{Compression, Ifd, TileGrid};
use crate::pixel::PixelFormat;

use super::tile_cache::DecodedTile;

/// PhotometricInterpretation value for inverted grayscale
const PHOTOMETRIC_MIN_IS_WHITE: u32 = 0;

/// PlanarConfiguration value for interleaved samples
const PLANAR_CHUNKY: u32 = 1;

#[derive(Debug, Clone)]
enum TileCodec {
    Jpeg { tables: Option<Bytes> },
    Raw { samples_per_pixel: u32, min_is_white: bool },
}

/// Decoder for the tiles of one TIFF image.
#[derive(Debug, Clone)]
pub struct TileDecoder {
    codec: TileCodec,
    pixel_format: PixelFormat,
}

impl TileDecoder {
    /// Check that the tiles of `ifd` can be decoded and build a decoder.
    ///
    /// `bits_per_sample` holds the BitsPerSample values (empty when the tag
    /// is absent).
    pub fn for_image(
        grid: &TileGrid,
        ifd: &Ifd,
        bits_per_sample: &[u64],
        jpeg_tables: Option<Bytes>,
        pixel_format: PixelFormat,
    ) -> Result<Self, DecodeError> {
        let codec = match Compression::from_u16(grid.compression) {
            Some(Compression::Jpeg) => TileCodec::Jpeg {
                tables: jpeg_tables,
            },
            Some(Compression::None) => {
                if bits_per_sample.iter().any(|&bits| bits != 8) {
                    return Err(DecodeError::UnsupportedLayout(format!(
                        "{:?} bits per sample",
                        bits_per_sample
                    )));
                }
                if !(1..=4).contains(&grid.samples_per_pixel) {
                    return Err(DecodeError::UnsupportedLayout(format!(
                        "{} samples per pixel",
                        grid.samples_per_pixel
                    )));
                }
                if grid.samples_per_pixel > 1 && ifd.planar_configuration() != PLANAR_CHUNKY {
                    return Err(DecodeError::UnsupportedLayout(
                        "planar sample configuration".to_string(),
                    ));
                }
                TileCodec::Raw {
                    samples_per_pixel: grid.samples_per_pixel,
                    min_is_white: ifd.photometric() == Some(PHOTOMETRIC_MIN_IS_WHITE),
                }
            }
            _ => {
                return Err(DecodeError::UnsupportedCompression(Compression::describe(
                    grid.compression,
                )))
            }
        };

        Ok(Self {
            codec,
            pixel_format,
        })
    }

    /// Decode one tile.
    ///
    /// `stride` is the stored width of the tile in pixels; `width` x `height`
    /// is the part of it inside the image.
    pub fn decode(
        &self,
        index: u32,
        raw: Bytes,
        stride: u32,
        width: u32,
        height: u32,
    ) -> Result<DecodedTile, DecodeError> {
        let image = match &self.codec {
            TileCodec::Jpeg { tables } => {
                let data = prepare_tile_jpeg(tables.as_deref(), raw);
                ImageReader::with_format(Cursor::new(data), image::ImageFormat::Jpeg)
                    .decode()
                    .map_err(|e| DecodeError::Image {
                        message: format!("tile {}: {}", index, e),
                    })?
            }
            TileCodec::Raw {
                samples_per_pixel,
                min_is_white,
            } => raw_image(index, &raw, *samples_per_pixel, *min_is_white, stride, height)?,
        };

        if image.width() < width || image.height() < height {
            return Err(DecodeError::TileGeometry {
                index,
                width: image.width(),
                height: image.height(),
                expected_width: width,
                expected_height: height,
            });
        }
        let image = if image.width() > width || image.height() > height {
            image.crop_imm(0, 0, width, height)
        } else {
            image
        };

        Ok(DecodedTile {
            width,
            height,
            data: self.pixel_format.samples_from(image),
        })
    }
}

fn raw_image(
    index: u32,
    raw: &[u8],
    samples_per_pixel: u32,
    min_is_white: bool,
    stride: u32,
    height: u32,
) -> Result<DynamicImage, DecodeError> {
    let needed = stride as usize * height as usize * samples_per_pixel as usize;
    if raw.len() < needed {
        return Err(DecodeError::Image {
            message: format!(
                "tile {}: {} bytes stored, {} needed for {}x{} pixels",
                index,
                raw.len(),
                needed,
                stride,
                height
            ),
        });
    }
    let samples = raw[..needed].to_vec();

    let image = match samples_per_pixel {
        1 => ImageBuffer::from_raw(stride, height, samples).map(DynamicImage::ImageLuma8),
        2 => ImageBuffer::from_raw(stride, height, samples).map(DynamicImage::ImageLumaA8),
        3 => ImageBuffer::from_raw(stride, height, samples).map(DynamicImage::ImageRgb8),
        _ => ImageBuffer::from_raw(stride, height, samples).map(DynamicImage::ImageRgba8),
    };
    let mut image = image.ok_or(DecodeError::Image {
        message: format!("tile {}: sample buffer does not match its size", index),
    })?;

    if min_is_white {
        image.invert();
    }
    Ok(image)
}
