//! Region reads from TIFF-based slides.
//!
//! [`TiffSlide`] is the decoder adapter for Aperio SVS and generic pyramidal
//! TIFF files. It parses the directory chain once, picks the image to serve
//! (a pyramid level or an associated image) and assembles requested regions
//! from the tiles that cover them.
//!
//! # Associated images
//!
//! - `label` / `macro`: any non-level directory whose ImageDescription names
//!   it so
//! - `thumbnail`: in SVS files, the second directory
//!
//! # Properties
//!
//! The property dictionary uses dotted keys: `slide.*` for values derived by
//! this crate (vendor, level geometry, resolution), `tiff.*` for raw TIFF
//! text fields and `aperio.*` for the key/value pairs of an SVS description.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{DecodeError, ReadError, TiffError};
use crate::format::tiff::{
    DirectoryImage, Ifd, TiffHeader, TiffPyramid, TiffTag, TileData, TileGrid, ValueReader,
};
use crate::format::{SlideFormat, SvsMetadata};
use crate::io::RangeReader;
use crate::pixel::{ImageMetadata, PixelBuffer, PixelFormat};
use crate::region::Region;

use super::decode::TileDecoder;
use super::source::{AssociatedImageInfo, ImageSource, LevelInfo, ReadTarget};
use super::tile_cache::{DecodedTile, TileCache, TileKey, DEFAULT_TILE_CACHE_BYTES};

/// Micrometres per resolution unit, keyed by ResolutionUnit value
const MICRONS_PER_INCH: f64 = 25_400.0;
const MICRONS_PER_CENTIMETRE: f64 = 10_000.0;

/// Index of the thumbnail directory in SVS files
const SVS_THUMBNAIL_IFD: usize = 1;

/// How a slide is opened.
#[derive(Debug, Clone)]
pub struct SlideOptions {
    pub target: ReadTarget,
    pub pixel_format: PixelFormat,
    /// Capacity of the decoded-tile cache in bytes
    pub tile_cache_bytes: usize,
}

impl Default for SlideOptions {
    fn default() -> Self {
        Self {
            target: ReadTarget::default(),
            pixel_format: PixelFormat::default(),
            tile_cache_bytes: DEFAULT_TILE_CACHE_BYTES,
        }
    }
}

#[derive(Debug, Clone)]
struct AssociatedImage {
    name: String,
    image: DirectoryImage,
    grid: TileGrid,
}

/// The image whose regions are served.
struct SelectedImage {
    ifd_index: usize,
    grid: TileGrid,
    tiles: TileData,
    decoder: TileDecoder,
}

/// A TIFF or SVS slide opened for region reads.
pub struct TiffSlide<R: RangeReader + ?Sized> {
    reader: Arc<R>,
    options: SlideOptions,
    format: SlideFormat,
    pyramid: TiffPyramid,
    associated: Vec<AssociatedImage>,
    base_spacing: [f64; 2],
    properties: BTreeMap<String, String>,
    selected: SelectedImage,
    metadata: ImageMetadata<2>,
    tile_cache: TileCache,
}

impl<R: RangeReader + ?Sized> TiffSlide<R> {
    /// Parse the slide behind `reader` and prepare the target image.
    pub async fn open(reader: Arc<R>, options: SlideOptions) -> Result<Self, DecodeError> {
        let (header, mut images) = TiffPyramid::read_directories(&*reader).await?;

        let first_description = images.first().and_then(|i| i.description.clone());
        let format = SlideFormat::from_description(first_description.as_deref());
        let svs = match format {
            SlideFormat::AperioSvs => first_description.as_deref().map(SvsMetadata::parse),
            SlideFormat::GenericTiff => None,
        };
        let software = match images.first() {
            Some(first) => read_text(&*reader, &header, &first.ifd, TiffTag::Software).await?,
            None => None,
        };

        let thumbnail = if format == SlideFormat::AperioSvs
            && images.len() > SVS_THUMBNAIL_IFD
            && !images[SVS_THUMBNAIL_IFD].is_named_associated()
        {
            Some(images.remove(SVS_THUMBNAIL_IFD))
        } else {
            None
        };

        let mut pyramid = TiffPyramid::build(header, images)?;
        let others = std::mem::take(&mut pyramid.other_images);
        let associated = name_associated_images(others, thumbnail);

        let base_spacing = match svs.as_ref().and_then(|m| m.mpp) {
            Some(mpp) => [mpp, mpp],
            None => resolution_spacing(&*reader, &pyramid.header, &pyramid.levels[0].ifd)
                .await
                .unwrap_or([1.0, 1.0]),
        };

        let properties = build_properties(
            format,
            &pyramid,
            svs.as_ref(),
            first_description.as_deref(),
            software.as_deref(),
            base_spacing,
        );

        let (selected, spacing) =
            select_image(&*reader, &pyramid, &associated, base_spacing, &options).await?;
        let metadata = ImageMetadata::new(
            [selected.grid.width, selected.grid.height],
            options.pixel_format,
        )
        .map_err(|e| DecodeError::Image {
            message: e.to_string(),
        })?
        .with_spacing(spacing);

        debug!(
            source = reader.identifier(),
            format = format.name(),
            levels = pyramid.level_count(),
            associated = associated.len(),
            ifd = selected.ifd_index,
            width = selected.grid.width,
            height = selected.grid.height,
            "opened slide"
        );

        Ok(Self {
            tile_cache: TileCache::with_capacity(options.tile_cache_bytes),
            reader,
            options,
            format,
            pyramid,
            associated,
            base_spacing,
            properties,
            selected,
            metadata,
        })
    }

    /// Open the same slide again, serving a different image.
    ///
    /// The reader (and any cache behind it) is shared with `self`.
    pub async fn select(&self, target: ReadTarget) -> Result<Self, DecodeError> {
        let options = SlideOptions {
            target,
            ..self.options.clone()
        };
        Self::open(self.reader.clone(), options).await
    }

    pub fn format(&self) -> SlideFormat {
        self.format
    }

    /// Vendor identifier (`aperio`, `generic-tiff`).
    pub fn vendor(&self) -> &'static str {
        self.format.vendor()
    }

    pub fn level_count(&self) -> usize {
        self.pyramid.level_count()
    }

    pub fn level_info(&self, level: usize) -> Option<LevelInfo> {
        let l = self.pyramid.get_level(level)?;
        Some(LevelInfo {
            level,
            width: l.width(),
            height: l.height(),
            tile_width: l.grid.tile_width,
            tile_height: l.grid.tile_height,
            downsample: l.downsample,
            spacing: [
                self.base_spacing[0] * l.downsample,
                self.base_spacing[1] * l.downsample,
            ],
        })
    }

    /// Names of the associated images, in file order.
    pub fn associated_image_names(&self) -> Vec<&str> {
        self.associated.iter().map(|a| a.name.as_str()).collect()
    }

    pub fn associated_image_info(&self, name: &str) -> Option<AssociatedImageInfo> {
        self.associated
            .iter()
            .find(|a| a.name == name)
            .map(|a| AssociatedImageInfo {
                name: a.name.clone(),
                width: a.grid.width,
                height: a.grid.height,
            })
    }

    /// Sorted key/value metadata of the slide.
    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    /// Decoded tile at grid position `(tile_x, tile_y)`, from cache if present.
    async fn tile(&self, tile_x: u32, tile_y: u32) -> Result<Arc<DecodedTile>, DecodeError> {
        let grid = &self.selected.grid;
        let index = grid
            .tile_index(tile_x, tile_y)
            .ok_or(DecodeError::MissingTile {
                index: tile_y.saturating_mul(grid.tiles_x).saturating_add(tile_x),
            })?;
        let key = TileKey {
            ifd_index: self.selected.ifd_index,
            tile_index: index,
        };
        self.tile_cache
            .get_or_load(key, || self.load_tile(index, tile_x, tile_y))
            .await
    }

    /// Fetch and decode one tile, bypassing the cache.
    async fn load_tile(
        &self,
        index: u32,
        tile_x: u32,
        tile_y: u32,
    ) -> Result<DecodedTile, DecodeError> {
        let grid = &self.selected.grid;
        let (offset, length) = self
            .selected
            .tiles
            .tile_location(index)
            .ok_or(DecodeError::MissingTile { index })?;
        let (width, height) = grid
            .tile_dimensions(tile_x, tile_y)
            .ok_or(DecodeError::MissingTile { index })?;
        let length = usize::try_from(length).map_err(|_| DecodeError::MissingTile { index })?;

        debug!(tile = index, offset, length, "fetching tile");
        let raw = self.reader.read_exact_at(offset, length).await?;

        let decoder = self.selected.decoder.clone();
        let stride = grid.tile_width;
        tokio::task::spawn_blocking(move || decoder.decode(index, raw, stride, width, height))
            .await
            .map_err(|e| DecodeError::Image {
                message: format!("tile {} decoder task failed: {}", index, e),
            })?
    }
}

#[async_trait]
impl<R: RangeReader + ?Sized + 'static> ImageSource<2> for TiffSlide<R> {
    fn metadata(&self) -> &ImageMetadata<2> {
        &self.metadata
    }

    async fn read_region(&self, region: &Region<2>) -> Result<PixelBuffer<2>, ReadError> {
        region.check_within(&self.metadata.bounds())?;

        let grid = &self.selected.grid;
        let [x0, y0] = region.offset();
        let [x_end, y_end] = [region.end(0) as u32, region.end(1) as u32];
        let channels = self.options.pixel_format.channels();
        let mut out = PixelBuffer::zeroed(*region, self.options.pixel_format);

        for tile_y in y0 / grid.tile_height..=(y_end - 1) / grid.tile_height {
            for tile_x in x0 / grid.tile_width..=(x_end - 1) / grid.tile_width {
                let tile = self.tile(tile_x, tile_y).await?;
                let tile_origin = [tile_x * grid.tile_width, tile_y * grid.tile_height];
                let tile_region = Region::new(tile_origin, [tile.width, tile.height])?;
                let Some(overlap) = region.intersect(&tile_region) else {
                    continue;
                };

                let [ox, oy] = overlap.offset();
                let line_len = overlap.extent()[0] as usize * channels;
                for y in oy..overlap.end(1) as u32 {
                    let src = ((y - tile_origin[1]) as usize * tile.width as usize
                        + (ox - tile_origin[0]) as usize)
                        * channels;
                    let dst = region.linear_index(&[ox, y]) * channels;
                    out.data_mut()[dst..dst + line_len]
                        .copy_from_slice(&tile.data[src..src + line_len]);
                }
            }
        }

        Ok(out)
    }

    fn identifier(&self) -> &str {
        self.reader.identifier()
    }
}

/// Resolve the read target to an image and its spacing.
async fn select_image<R: RangeReader + ?Sized>(
    reader: &R,
    pyramid: &TiffPyramid,
    associated: &[AssociatedImage],
    base_spacing: [f64; 2],
    options: &SlideOptions,
) -> Result<(SelectedImage, [f64; 2]), DecodeError> {
    let (ifd_index, ifd, grid, spacing) = match &options.target {
        ReadTarget::Level(n) => {
            let level = pyramid.get_level(*n).ok_or(DecodeError::UnknownLevel {
                level: *n,
                count: pyramid.level_count(),
            })?;
            let spacing = base_spacing.map(|s| s * level.downsample);
            (level.ifd_index, &level.ifd, level.grid.clone(), spacing)
        }
        ReadTarget::Downsample(factor) => {
            let level = pyramid.best_level_for_downsample(*factor);
            let spacing = base_spacing.map(|s| s * level.downsample);
            (level.ifd_index, &level.ifd, level.grid.clone(), spacing)
        }
        ReadTarget::Associated(name) => {
            let image = associated
                .iter()
                .find(|a| &a.name == name)
                .ok_or_else(|| DecodeError::UnknownAssociatedImage(name.clone()))?;
            (image.image.ifd_index, &image.image.ifd, image.grid.clone(), [1.0, 1.0])
        }
    };

    let header = &pyramid.header;
    let tiles = TileData::load(reader, header, ifd, &grid).await?;
    let bits_per_sample = match ifd.get_entry_by_tag(TiffTag::BitsPerSample) {
        Some(entry) => ValueReader::new(reader, header).read_u64_array(entry).await?,
        None => Vec::new(),
    };
    let decoder = TileDecoder::for_image(
        &grid,
        ifd,
        &bits_per_sample,
        tiles.jpeg_tables.clone(),
        options.pixel_format,
    )?;

    Ok((
        SelectedImage {
            ifd_index,
            grid,
            tiles,
            decoder,
        },
        spacing,
    ))
}

/// Give names to the non-level directories that have one.
fn name_associated_images(
    others: Vec<DirectoryImage>,
    thumbnail: Option<DirectoryImage>,
) -> Vec<AssociatedImage> {
    let mut named: Vec<(String, DirectoryImage)> = Vec::new();
    if let Some(image) = thumbnail {
        named.push(("thumbnail".to_string(), image));
    }
    for image in others {
        let lower = image
            .description
            .as_deref()
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        let name = if lower.contains("label") {
            "label"
        } else if lower.contains("macro") {
            "macro"
        } else {
            continue;
        };
        if named.iter().all(|(n, _)| n != name) {
            named.push((name.to_string(), image));
        }
    }
    named.sort_by_key(|(_, image)| image.ifd_index);

    named
        .into_iter()
        .filter_map(|(name, image)| match TileGrid::from_ifd(&image.ifd) {
            Ok(grid) => Some(AssociatedImage { name, image, grid }),
            Err(e) => {
                debug!(name = %name, ifd = image.ifd_index, error = %e, "skipping associated image");
                None
            }
        })
        .collect()
}

/// Spacing in micrometres from XResolution/YResolution, when usable.
async fn resolution_spacing<R: RangeReader + ?Sized>(
    reader: &R,
    header: &TiffHeader,
    ifd: &Ifd,
) -> Option<[f64; 2]> {
    let microns_per_unit = match ifd.get_u32(TiffTag::ResolutionUnit).unwrap_or(2) {
        2 => MICRONS_PER_INCH,
        3 => MICRONS_PER_CENTIMETRE,
        _ => return None,
    };
    let values = ValueReader::new(reader, header);
    let mut spacing = [1.0; 2];
    for (axis, tag) in [TiffTag::XResolution, TiffTag::YResolution].into_iter().enumerate() {
        let entry = ifd.get_entry_by_tag(tag)?;
        match values.read_rational(entry).await {
            Ok(resolution) if resolution > 0.0 => spacing[axis] = microns_per_unit / resolution,
            Ok(_) => return None,
            Err(e) => {
                debug!(tag = tag.name(), error = %e, "ignoring unreadable resolution");
                return None;
            }
        }
    }
    Some(spacing)
}

async fn read_text<R: RangeReader + ?Sized>(
    reader: &R,
    header: &TiffHeader,
    ifd: &Ifd,
    tag: TiffTag,
) -> Result<Option<String>, TiffError> {
    match ifd.get_entry_by_tag(tag) {
        Some(entry) => Ok(Some(ValueReader::new(reader, header).read_string(entry).await?)),
        None => Ok(None),
    }
}

fn build_properties(
    format: SlideFormat,
    pyramid: &TiffPyramid,
    svs: Option<&SvsMetadata>,
    description: Option<&str>,
    software: Option<&str>,
    base_spacing: [f64; 2],
) -> BTreeMap<String, String> {
    let mut properties = BTreeMap::new();
    properties.insert("slide.vendor".to_string(), format.vendor().to_string());
    properties.insert("slide.format".to_string(), format.name().to_string());
    properties.insert(
        "slide.level-count".to_string(),
        pyramid.level_count().to_string(),
    );
    for level in &pyramid.levels {
        let prefix = format!("slide.level[{}]", level.level_index);
        properties.insert(format!("{}.width", prefix), level.width().to_string());
        properties.insert(format!("{}.height", prefix), level.height().to_string());
        properties.insert(format!("{}.downsample", prefix), level.downsample.to_string());
        properties.insert(
            format!("{}.tile-width", prefix),
            level.grid.tile_width.to_string(),
        );
        properties.insert(
            format!("{}.tile-height", prefix),
            level.grid.tile_height.to_string(),
        );
    }
    properties.insert("slide.mpp-x".to_string(), base_spacing[0].to_string());
    properties.insert("slide.mpp-y".to_string(), base_spacing[1].to_string());

    if let Some(text) = description {
        properties.insert("tiff.ImageDescription".to_string(), text.to_string());
    }
    if let Some(text) = software {
        properties.insert("tiff.Software".to_string(), text.to_string());
    }
    if let Some(svs) = svs {
        if let Some(power) = svs.objective_power {
            properties.insert("slide.objective-power".to_string(), power.to_string());
        }
        for (key, value) in &svs.properties {
            properties.insert(format!("aperio.{}", key), value.clone());
        }
    }
    properties
}
