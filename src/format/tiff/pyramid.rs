//! Pyramid level identification and tile lookup.
//!
//! A slide file holds several IFDs. The tiled ones whose sizes shrink in a
//! consistent ratio form the resolution pyramid; everything else (label,
//! macro, thumbnail) is kept aside as an associated image candidate.
//!
//! # Identification
//!
//! 1. Tiled IFDs with image and tile dimensions are candidates, unless their
//!    ImageDescription names them a label or macro.
//! 2. Candidates are sorted by area; the largest is level 0.
//! 3. A candidate becomes the next level when it is strictly smaller than the
//!    previous level and its x and y downsamples agree within 20%.
//! 4. A file with no tiled candidate has a single level: its first
//!    strip-organised image that is not a label or macro.
//!
//! Strip-organised IFDs are read through the same [`TileGrid`] by treating
//! each strip as a tile spanning the full image width.

use bytes::Bytes;
use tracing::debug;

use crate::error::TiffError;
use crate::io::RangeReader;

use super::parser::{Ifd, TiffHeader, BIGTIFF_HEADER_SIZE};
use super::tags::TiffTag;
use super::values::ValueReader;

// =============================================================================
// Constants
// =============================================================================

/// Maximum number of IFDs to follow (guards against offset loops)
const MAX_IFDS: usize = 256;

/// Maximum entries in a single IFD
const MAX_IFD_ENTRIES: u64 = 4096;

/// Allowed disagreement between x and y downsample of a level
const DOWNSAMPLE_ASPECT_TOLERANCE: f64 = 0.2;

// =============================================================================
// TileGrid
// =============================================================================

/// Block layout of one image: tiles, or strips seen as full-width tiles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileGrid {
    pub width: u32,
    pub height: u32,
    pub tile_width: u32,
    pub tile_height: u32,
    pub tiles_x: u32,
    pub tiles_y: u32,
    pub compression: u16,
    pub samples_per_pixel: u32,
    /// True for TileOffsets/TileByteCounts, false for strips
    pub is_tiled: bool,
}

impl TileGrid {
    /// Describe the block layout of `ifd`.
    pub fn from_ifd(ifd: &Ifd) -> Result<Self, TiffError> {
        let width = ifd.require_u32(TiffTag::ImageWidth)?;
        let height = ifd.require_u32(TiffTag::ImageLength)?;
        if width == 0 || height == 0 {
            return Err(TiffError::InvalidTagValue {
                tag: "ImageWidth",
                message: format!("empty image {}x{}", width, height),
            });
        }

        let (tile_width, tile_height, is_tiled) = if ifd.is_tiled() {
            (
                ifd.require_u32(TiffTag::TileWidth)?,
                ifd.require_u32(TiffTag::TileLength)?,
                true,
            )
        } else if ifd.is_stripped() {
            let rows = ifd.rows_per_strip().unwrap_or(height).min(height);
            (width, rows, false)
        } else {
            return Err(TiffError::MissingTag("TileOffsets"));
        };
        if tile_width == 0 || tile_height == 0 {
            return Err(TiffError::InvalidTagValue {
                tag: "TileWidth",
                message: format!("empty tile {}x{}", tile_width, tile_height),
            });
        }

        Ok(TileGrid {
            width,
            height,
            tile_width,
            tile_height,
            tiles_x: width.div_ceil(tile_width),
            tiles_y: height.div_ceil(tile_height),
            compression: ifd.compression(),
            samples_per_pixel: ifd.samples_per_pixel(),
            is_tiled,
        })
    }

    pub fn tile_count(&self) -> u32 {
        self.tiles_x * self.tiles_y
    }

    /// Row-major tile index, `None` outside the grid.
    pub fn tile_index(&self, tile_x: u32, tile_y: u32) -> Option<u32> {
        if tile_x >= self.tiles_x || tile_y >= self.tiles_y {
            return None;
        }
        Some(tile_y * self.tiles_x + tile_x)
    }

    /// Pixels of the image covered by a tile (edge tiles are clipped).
    pub fn tile_dimensions(&self, tile_x: u32, tile_y: u32) -> Option<(u32, u32)> {
        self.tile_index(tile_x, tile_y)?;
        let x0 = tile_x * self.tile_width;
        let y0 = tile_y * self.tile_height;
        Some((
            self.tile_width.min(self.width - x0),
            self.tile_height.min(self.height - y0),
        ))
    }

    /// Tags holding the block offsets and byte counts.
    pub fn data_tags(&self) -> (TiffTag, TiffTag) {
        if self.is_tiled {
            (TiffTag::TileOffsets, TiffTag::TileByteCounts)
        } else {
            (TiffTag::StripOffsets, TiffTag::StripByteCounts)
        }
    }
}

// =============================================================================
// Directory images
// =============================================================================

/// An IFD together with its position in the chain and its description.
#[derive(Debug, Clone)]
pub struct DirectoryImage {
    pub ifd_index: usize,
    pub ifd: Ifd,
    pub description: Option<String>,
}

impl DirectoryImage {
    /// Whether the description names this image a label or macro.
    pub fn is_named_associated(&self) -> bool {
        self.description
            .as_deref()
            .map(|d| {
                let lower = d.to_ascii_lowercase();
                lower.contains("label") || lower.contains("macro")
            })
            .unwrap_or(false)
    }
}

// =============================================================================
// PyramidLevel
// =============================================================================

/// One resolution of the pyramid; level 0 is the largest.
#[derive(Debug, Clone)]
pub struct PyramidLevel {
    pub level_index: usize,
    pub ifd_index: usize,
    pub grid: TileGrid,
    /// Base width / level width, averaged over both axes
    pub downsample: f64,
    pub ifd: Ifd,
    pub description: Option<String>,
}

impl PyramidLevel {
    pub fn width(&self) -> u32 {
        self.grid.width
    }

    pub fn height(&self) -> u32 {
        self.grid.height
    }
}

// =============================================================================
// TiffPyramid
// =============================================================================

/// All IFDs of a file, split into pyramid levels and other images.
#[derive(Debug, Clone)]
pub struct TiffPyramid {
    pub header: TiffHeader,
    pub levels: Vec<PyramidLevel>,
    pub other_images: Vec<DirectoryImage>,
}

impl TiffPyramid {
    /// Read the header and every IFD in chain order, with descriptions.
    pub async fn read_directories<R: RangeReader + ?Sized>(
        reader: &R,
    ) -> Result<(TiffHeader, Vec<DirectoryImage>), TiffError> {
        let header_len = (BIGTIFF_HEADER_SIZE as u64).min(reader.size()) as usize;
        let header_bytes = reader.read_exact_at(0, header_len).await?;
        let header = TiffHeader::parse(&header_bytes, reader.size())?;
        let images = Self::parse_all_ifds(reader, &header).await?;
        Ok((header, images))
    }

    async fn parse_all_ifds<R: RangeReader + ?Sized>(
        reader: &R,
        header: &TiffHeader,
    ) -> Result<Vec<DirectoryImage>, TiffError> {
        let values = ValueReader::new(reader, header);
        let mut images = Vec::new();
        let mut offset = header.first_ifd_offset;

        while offset != 0 && images.len() < MAX_IFDS {
            if offset >= reader.size() {
                return Err(TiffError::InvalidIfdOffset(offset));
            }
            let count_bytes = reader.read_exact_at(offset, header.ifd_count_size()).await?;
            let entry_count = header.read_ifd_count(&count_bytes)?;
            if entry_count > MAX_IFD_ENTRIES {
                return Err(TiffError::InvalidTagValue {
                    tag: "IFD",
                    message: format!("{} entries at offset {}", entry_count, offset),
                });
            }
            let size = Ifd::calculate_size(entry_count, header)
                .ok_or(TiffError::InvalidIfdOffset(offset))?;
            let ifd_bytes = reader.read_exact_at(offset, size).await?;
            let ifd = Ifd::parse(&ifd_bytes, header)?;

            let description = match ifd.get_entry_by_tag(TiffTag::ImageDescription) {
                Some(entry) => Some(values.read_string(entry).await?),
                None => None,
            };

            offset = ifd.next_ifd_offset;
            images.push(DirectoryImage {
                ifd_index: images.len(),
                ifd,
                description,
            });
        }

        Ok(images)
    }

    /// Split parsed IFDs into levels and other images.
    pub fn build(header: TiffHeader, images: Vec<DirectoryImage>) -> Result<Self, TiffError> {
        let mut candidates: Vec<(TileGrid, DirectoryImage)> = Vec::new();
        let mut other_images = Vec::new();

        for image in images {
            let grid = if image.ifd.is_tiled() && !image.is_named_associated() {
                TileGrid::from_ifd(&image.ifd).ok()
            } else {
                None
            };
            match grid {
                Some(grid) => candidates.push((grid, image)),
                None => other_images.push(image),
            }
        }

        // Largest first; the sort is stable so ties keep file order.
        candidates.sort_by_key(|(grid, _)| {
            std::cmp::Reverse(grid.width as u64 * grid.height as u64)
        });

        let mut levels: Vec<PyramidLevel> = Vec::new();
        for (grid, image) in candidates {
            let accepted = match (levels.first(), levels.last()) {
                (Some(base), Some(previous)) => {
                    let dx = base.width() as f64 / grid.width as f64;
                    let dy = base.height() as f64 / grid.height as f64;
                    let shrinks = grid.width < previous.width() && grid.height < previous.height();
                    let consistent =
                        (dx - dy).abs() / dx.max(dy) <= DOWNSAMPLE_ASPECT_TOLERANCE;
                    shrinks && consistent
                }
                _ => true,
            };

            if !accepted {
                other_images.push(image);
                continue;
            }

            let downsample = match levels.first() {
                Some(base) => {
                    (base.width() as f64 / grid.width as f64
                        + base.height() as f64 / grid.height as f64)
                        / 2.0
                }
                None => 1.0,
            };
            levels.push(PyramidLevel {
                level_index: levels.len(),
                ifd_index: image.ifd_index,
                grid,
                downsample,
                ifd: image.ifd,
                description: image.description,
            });
        }

        other_images.sort_by_key(|image| image.ifd_index);
        if levels.is_empty() {
            // A file without tiled images is read from its first strip image
            let first = other_images
                .iter()
                .position(|image| image.ifd.is_stripped() && !image.is_named_associated())
                .ok_or(TiffError::NoPyramidLevels)?;
            let image = other_images.remove(first);
            let grid = TileGrid::from_ifd(&image.ifd)?;
            levels.push(PyramidLevel {
                level_index: 0,
                ifd_index: image.ifd_index,
                grid,
                downsample: 1.0,
                ifd: image.ifd,
                description: image.description,
            });
        }
        debug!(
            levels = levels.len(),
            others = other_images.len(),
            "identified pyramid levels"
        );

        Ok(TiffPyramid {
            header,
            levels,
            other_images,
        })
    }

    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    pub fn get_level(&self, level: usize) -> Option<&PyramidLevel> {
        self.levels.get(level)
    }

    /// Base level dimensions.
    pub fn dimensions(&self) -> (u32, u32) {
        let base = &self.levels[0];
        (base.width(), base.height())
    }

    /// The level with the smallest downsample that is >= `downsample`
    /// (1% tolerance), or the lowest resolution when none is.
    pub fn best_level_for_downsample(&self, downsample: f64) -> &PyramidLevel {
        self.levels
            .iter()
            .filter(|l| l.downsample >= downsample * 0.99)
            .min_by(|a, b| a.downsample.total_cmp(&b.downsample))
            .unwrap_or(&self.levels[self.levels.len() - 1])
    }
}

// =============================================================================
// TileData
// =============================================================================

/// Offset tables and JPEG tables of one image.
#[derive(Debug, Clone)]
pub struct TileData {
    pub offsets: Vec<u64>,
    pub byte_counts: Vec<u64>,
    pub jpeg_tables: Option<Bytes>,
}

impl TileData {
    /// Load the offset tables of `ifd`, laid out as `grid`.
    pub async fn load<R: RangeReader + ?Sized>(
        reader: &R,
        header: &TiffHeader,
        ifd: &Ifd,
        grid: &TileGrid,
    ) -> Result<Self, TiffError> {
        let values = ValueReader::new(reader, header);
        let (offsets_tag, counts_tag) = grid.data_tags();

        let offsets_entry = ifd
            .get_entry_by_tag(offsets_tag)
            .ok_or(TiffError::MissingTag(offsets_tag.name()))?;
        let counts_entry = ifd
            .get_entry_by_tag(counts_tag)
            .ok_or(TiffError::MissingTag(counts_tag.name()))?;

        let offsets = values.read_u64_array(offsets_entry).await?;
        let byte_counts = values.read_u64_array(counts_entry).await?;
        if offsets.len() < grid.tile_count() as usize || byte_counts.len() < offsets.len() {
            return Err(TiffError::InvalidTagValue {
                tag: offsets_tag.name(),
                message: format!(
                    "{} offsets and {} byte counts for {} blocks",
                    offsets.len(),
                    byte_counts.len(),
                    grid.tile_count()
                ),
            });
        }

        let jpeg_tables = match ifd.get_entry_by_tag(TiffTag::JpegTables) {
            Some(entry) => Some(values.read_bytes(entry).await?),
            None => None,
        };

        Ok(TileData {
            offsets,
            byte_counts,
            jpeg_tables,
        })
    }

    /// Offset and size of a tile, `None` for unknown or empty tiles.
    pub fn tile_location(&self, tile_index: u32) -> Option<(u64, u64)> {
        let idx = tile_index as usize;
        let offset = *self.offsets.get(idx)?;
        let size = *self.byte_counts.get(idx)?;
        (size > 0).then_some((offset, size))
    }
}
