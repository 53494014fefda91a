//! Test utilities for integration tests.
//!
//! This module builds TIFF files in memory (classic or BigTIFF, either byte
//! order, tiled or stripped, raw or JPEG tiles) and provides image sources
//! that record how they are read.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;

use slide_stream::error::{DecodeError, ReadError};
use slide_stream::io::MemoryReader;
use slide_stream::pixel::{ImageMetadata, MemoryImage, PixelBuffer, PixelFormat};
use slide_stream::region::Region;
use slide_stream::slide::{ImageSource, SlideOptions, TiffSlide};

// =============================================================================
// Pixel Patterns
// =============================================================================

/// Deterministic, non-smooth samples so filters and crops are easy to tell apart.
pub fn noise(width: u32, height: u32, samples: u32) -> Vec<u8> {
    (0..width * height * samples)
        .map(|i| (i.wrapping_mul(2_654_435_761) >> 24) as u8)
        .collect()
}

/// Each `tile` x `tile` block has one gray value; JPEG keeps flat blocks
/// almost exact.
pub fn flat_blocks(width: u32, height: u32, tile: u32) -> Vec<u8> {
    let tiles_x = width.div_ceil(tile);
    let mut data = Vec::with_capacity((width * height) as usize);
    for y in 0..height {
        for x in 0..width {
            let block = (y / tile) * tiles_x + x / tile;
            data.push((40 + block * 25) as u8);
        }
    }
    data
}

/// Gray image with a reference copy of its samples.
pub fn gray_image(width: u32, height: u32, data: Vec<u8>) -> MemoryImage<2> {
    let metadata = ImageMetadata::new([width, height], PixelFormat::Gray8).unwrap();
    MemoryImage::from_samples(metadata, data).unwrap()
}

pub fn write_file(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, data).unwrap();
    path
}

// =============================================================================
// TIFF Builder
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    Tiled { tile_width: u32, tile_height: u32 },
    Stripped { rows_per_strip: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    Raw,
    /// Every tile is a complete JPEG stream
    Jpeg,
    /// Tiles are abbreviated streams; tables live in the JPEGTables tag
    JpegSharedTables,
}

/// One image (IFD) of a TIFF file.
#[derive(Debug, Clone)]
pub struct TiffImage {
    width: u32,
    height: u32,
    samples: u16,
    pixels: Vec<u8>,
    layout: Layout,
    codec: Codec,
    compression_tag: Option<u16>,
    description: Option<String>,
    software: Option<String>,
    resolution: Option<(u32, u16)>,
}

impl TiffImage {
    pub fn gray(width: u32, height: u32, pixels: Vec<u8>) -> Self {
        Self::new(width, height, 1, pixels)
    }

    pub fn rgb(width: u32, height: u32, pixels: Vec<u8>) -> Self {
        Self::new(width, height, 3, pixels)
    }

    fn new(width: u32, height: u32, samples: u16, pixels: Vec<u8>) -> Self {
        assert_eq!(pixels.len(), (width * height * samples as u32) as usize);
        Self {
            width,
            height,
            samples,
            pixels,
            layout: Layout::Tiled {
                tile_width: 16,
                tile_height: 16,
            },
            codec: Codec::Raw,
            compression_tag: None,
            description: None,
            software: None,
            resolution: None,
        }
    }

    pub fn tiled(mut self, tile_width: u32, tile_height: u32) -> Self {
        self.layout = Layout::Tiled {
            tile_width,
            tile_height,
        };
        self
    }

    pub fn stripped(mut self, rows_per_strip: u32) -> Self {
        self.layout = Layout::Stripped { rows_per_strip };
        self
    }

    pub fn codec(mut self, codec: Codec) -> Self {
        self.codec = codec;
        self
    }

    /// Store raw samples but declare another Compression value.
    pub fn compression_tag(mut self, value: u16) -> Self {
        self.compression_tag = Some(value);
        self
    }

    pub fn description(mut self, text: &str) -> Self {
        self.description = Some(text.to_string());
        self
    }

    pub fn software(mut self, text: &str) -> Self {
        self.software = Some(text.to_string());
        self
    }

    /// Pixels per centimetre on both axes.
    pub fn pixels_per_cm(mut self, resolution: u32) -> Self {
        self.resolution = Some((resolution, 3));
        self
    }

    /// Stored blocks in row-major order, plus the shared JPEG tables.
    fn blocks(&self) -> (Vec<Vec<u8>>, Option<Vec<u8>>) {
        let spp = self.samples as usize;
        let (block_width, block_height, blocks_x, blocks_y) = match self.layout {
            Layout::Tiled {
                tile_width,
                tile_height,
            } => (
                tile_width,
                tile_height,
                self.width.div_ceil(tile_width),
                self.height.div_ceil(tile_height),
            ),
            Layout::Stripped { rows_per_strip } => (
                self.width,
                rows_per_strip,
                1,
                self.height.div_ceil(rows_per_strip),
            ),
        };

        let mut blocks = Vec::new();
        let mut tables = None;
        for by in 0..blocks_y {
            for bx in 0..blocks_x {
                // Tiles are always full size; the last strip is cut short
                let rows = match self.layout {
                    Layout::Tiled { .. } => block_height,
                    Layout::Stripped { .. } => block_height.min(self.height - by * block_height),
                };
                let mut block = vec![0u8; block_width as usize * rows as usize * spp];
                for y in 0..rows {
                    let iy = by * block_height + y;
                    if iy >= self.height {
                        break;
                    }
                    for x in 0..block_width {
                        let ix = bx * block_width + x;
                        if ix >= self.width {
                            break;
                        }
                        let src = (iy as usize * self.width as usize + ix as usize) * spp;
                        let dst = (y as usize * block_width as usize + x as usize) * spp;
                        block[dst..dst + spp].copy_from_slice(&self.pixels[src..src + spp]);
                    }
                }

                let block = match self.codec {
                    Codec::Raw => block,
                    Codec::Jpeg => encode_jpeg(&block, block_width, rows, self.samples),
                    Codec::JpegSharedTables => {
                        let full = encode_jpeg(&block, block_width, rows, self.samples);
                        let (shared, abbreviated) = split_jpeg_tables(&full);
                        tables.get_or_insert(shared);
                        abbreviated
                    }
                };
                blocks.push(block);
            }
        }
        (blocks, tables)
    }
}

pub fn encode_jpeg(samples: &[u8], width: u32, height: u32, spp: u16) -> Vec<u8> {
    let color = if spp == 1 {
        ExtendedColorType::L8
    } else {
        ExtendedColorType::Rgb8
    };
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, 95)
        .encode(samples, width, height, color)
        .unwrap();
    buf
}

/// Move the DQT and DHT segments of a JPEG stream into a tables-only stream.
pub fn split_jpeg_tables(jpeg: &[u8]) -> (Vec<u8>, Vec<u8>) {
    let mut tables = vec![0xFF, 0xD8];
    let mut image = vec![0xFF, 0xD8];
    let mut pos = 2;
    while pos + 4 <= jpeg.len() {
        let marker = jpeg[pos + 1];
        if marker == 0xDA {
            image.extend_from_slice(&jpeg[pos..]);
            break;
        }
        let length = u16::from_be_bytes([jpeg[pos + 2], jpeg[pos + 3]]) as usize;
        let segment = &jpeg[pos..pos + 2 + length];
        if marker == 0xDB || marker == 0xC4 {
            tables.extend_from_slice(segment);
        } else {
            image.extend_from_slice(segment);
        }
        pos += 2 + length;
    }
    tables.extend_from_slice(&[0xFF, 0xD9]);
    (tables, image)
}

struct Entry {
    tag: u16,
    field_type: u16,
    count: u64,
    data: Vec<u8>,
}

/// Builder for TIFF files; images are written in the order they are added.
pub struct TiffBuilder {
    big_endian: bool,
    bigtiff: bool,
    images: Vec<TiffImage>,
}

impl TiffBuilder {
    pub fn new() -> Self {
        Self {
            big_endian: false,
            bigtiff: false,
            images: Vec::new(),
        }
    }

    pub fn big_endian(mut self) -> Self {
        self.big_endian = true;
        self
    }

    pub fn bigtiff(mut self) -> Self {
        self.bigtiff = true;
        self
    }

    pub fn image(mut self, image: TiffImage) -> Self {
        self.images.push(image);
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(if self.big_endian { b"MM" } else { b"II" });
        if self.bigtiff {
            buf.extend(self.u16s(&[43, 8, 0]));
        } else {
            buf.extend(self.u16s(&[42]));
        }
        let mut next_pointer = buf.len();
        self.put_offset(&mut buf, 0);

        for image in &self.images {
            let (blocks, tables) = image.blocks();
            let mut offsets = Vec::new();
            let mut counts = Vec::new();
            for block in blocks {
                offsets.push(buf.len() as u64);
                counts.push(block.len() as u64);
                buf.extend(block);
            }

            let entries = self.entries(image, &offsets, &counts, tables);
            if buf.len() % 2 == 1 {
                buf.push(0);
            }
            let ifd_pos = buf.len() as u64;
            self.patch_offset(&mut buf, next_pointer, ifd_pos);
            next_pointer = self.write_ifd(&mut buf, entries);
        }
        buf
    }

    fn entries(
        &self,
        image: &TiffImage,
        offsets: &[u64],
        counts: &[u64],
        tables: Option<Vec<u8>>,
    ) -> Vec<Entry> {
        let long = |tag, value: u32| Entry {
            tag,
            field_type: 4,
            count: 1,
            data: self.u32s(&[value]),
        };
        let short = |tag, value: u16| Entry {
            tag,
            field_type: 3,
            count: 1,
            data: self.u16s(&[value]),
        };
        let ascii = |tag, text: &str| {
            let mut data = text.as_bytes().to_vec();
            data.push(0);
            Entry {
                tag,
                field_type: 2,
                count: data.len() as u64,
                data,
            }
        };

        let is_jpeg = image.codec != Codec::Raw;
        let compression = image
            .compression_tag
            .unwrap_or(if is_jpeg { 7 } else { 1 });
        let photometric = match (image.samples, is_jpeg) {
            (1, _) => 1,
            (_, true) => 6,
            (_, false) => 2,
        };

        let mut entries = vec![
            long(256, image.width),
            long(257, image.height),
            Entry {
                tag: 258,
                field_type: 3,
                count: image.samples as u64,
                data: self.u16s(&vec![8; image.samples as usize]),
            },
            short(259, compression),
            short(262, photometric),
            short(277, image.samples),
            short(284, 1),
        ];
        if let Some(text) = &image.description {
            entries.push(ascii(270, text));
        }
        if let Some(text) = &image.software {
            entries.push(ascii(305, text));
        }
        if let Some((resolution, unit)) = image.resolution {
            for tag in [282, 283] {
                entries.push(Entry {
                    tag,
                    field_type: 5,
                    count: 1,
                    data: self.u32s(&[resolution, 1]),
                });
            }
            entries.push(short(296, unit));
        }

        let (offset_tag, count_tag) = match image.layout {
            Layout::Tiled {
                tile_width,
                tile_height,
            } => {
                entries.push(long(322, tile_width));
                entries.push(long(323, tile_height));
                (324, 325)
            }
            Layout::Stripped { rows_per_strip } => {
                entries.push(long(278, rows_per_strip));
                (273, 279)
            }
        };
        entries.push(self.offsets_entry(offset_tag, offsets));
        entries.push(self.offsets_entry(count_tag, counts));

        if let Some(tables) = tables {
            entries.push(Entry {
                tag: 347,
                field_type: 7,
                count: tables.len() as u64,
                data: tables,
            });
        }

        entries.sort_by_key(|e| e.tag);
        entries
    }

    fn offsets_entry(&self, tag: u16, values: &[u64]) -> Entry {
        if self.bigtiff {
            Entry {
                tag,
                field_type: 16,
                count: values.len() as u64,
                data: self.u64s(values),
            }
        } else {
            let values: Vec<u32> = values.iter().map(|&v| v as u32).collect();
            Entry {
                tag,
                field_type: 4,
                count: values.len() as u64,
                data: self.u32s(&values),
            }
        }
    }

    /// Write an IFD and its out-of-line values; returns the position of its
    /// next-IFD pointer.
    fn write_ifd(&self, buf: &mut Vec<u8>, entries: Vec<Entry>) -> usize {
        let inline = if self.bigtiff { 8 } else { 4 };
        let table_len = if self.bigtiff {
            8 + 20 * entries.len() + 8
        } else {
            2 + 12 * entries.len() + 4
        };
        let external_start = buf.len() + table_len;
        let mut external = Vec::new();

        if self.bigtiff {
            buf.extend(self.u64s(&[entries.len() as u64]));
        } else {
            buf.extend(self.u16s(&[entries.len() as u16]));
        }
        for entry in &entries {
            buf.extend(self.u16s(&[entry.tag, entry.field_type]));
            if self.bigtiff {
                buf.extend(self.u64s(&[entry.count]));
            } else {
                buf.extend(self.u32s(&[entry.count as u32]));
            }
            if entry.data.len() <= inline {
                buf.extend_from_slice(&entry.data);
                buf.extend(std::iter::repeat(0).take(inline - entry.data.len()));
            } else {
                self.put_offset(buf, (external_start + external.len()) as u64);
                external.extend_from_slice(&entry.data);
                if external.len() % 2 == 1 {
                    external.push(0);
                }
            }
        }
        let next_pointer = buf.len();
        self.put_offset(buf, 0);
        buf.extend(external);
        next_pointer
    }

    fn put_offset(&self, buf: &mut Vec<u8>, value: u64) {
        if self.bigtiff {
            buf.extend(self.u64s(&[value]));
        } else {
            buf.extend(self.u32s(&[value as u32]));
        }
    }

    fn patch_offset(&self, buf: &mut [u8], pos: usize, value: u64) {
        let bytes = if self.bigtiff {
            self.u64s(&[value])
        } else {
            self.u32s(&[value as u32])
        };
        buf[pos..pos + bytes.len()].copy_from_slice(&bytes);
    }

    fn u16s(&self, values: &[u16]) -> Vec<u8> {
        values
            .iter()
            .flat_map(|v| if self.big_endian { v.to_be_bytes() } else { v.to_le_bytes() })
            .collect()
    }

    fn u32s(&self, values: &[u32]) -> Vec<u8> {
        values
            .iter()
            .flat_map(|v| if self.big_endian { v.to_be_bytes() } else { v.to_le_bytes() })
            .collect()
    }

    fn u64s(&self, values: &[u64]) -> Vec<u8> {
        values
            .iter()
            .flat_map(|v| if self.big_endian { v.to_be_bytes() } else { v.to_le_bytes() })
            .collect()
    }
}

impl Default for TiffBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// SVS Fixture
// =============================================================================

pub const SVS_DESCRIPTION: &str = "Aperio Image Library v12.0.15 \r\n\
     64x48 [0,0 64x48] (16x16) JPEG/RGB Q=70|AppMag = 20|MPP = 0.5|Filename = fixture";

/// A small Aperio-style slide:
///
/// | IFD | Image                 |
/// |-----|-----------------------|
/// | 0   | level 0, 64x48 tiled  |
/// | 1   | thumbnail, 32x24      |
/// | 2   | level 1, 32x24 tiled  |
/// | 3   | label, 20x10          |
/// | 4   | macro, 40x16          |
pub struct SvsFixture {
    pub bytes: Vec<u8>,
    pub level0: Vec<u8>,
    pub level1: Vec<u8>,
    pub label: Vec<u8>,
}

pub fn svs_fixture() -> SvsFixture {
    let level0 = noise(64, 48, 1);
    let level1: Vec<u8> = noise(32, 24, 1).iter().map(|v| v / 2).collect();
    let thumbnail = vec![128; 32 * 24];
    let label = flat_blocks(20, 10, 5);
    let macro_image = vec![200; 40 * 16];

    let bytes = TiffBuilder::new()
        .image(
            TiffImage::gray(64, 48, level0.clone())
                .tiled(16, 16)
                .description(SVS_DESCRIPTION)
                .software("Aperio Image Library"),
        )
        .image(TiffImage::gray(32, 24, thumbnail).stripped(8))
        .image(
            TiffImage::gray(32, 24, level1.clone())
                .tiled(16, 16)
                .description("Aperio Image Library v12.0.15 \r\n64x48 -> 32x24 - |AppMag = 20|MPP = 0.5"),
        )
        .image(
            TiffImage::gray(20, 10, label.clone())
                .stripped(10)
                .description("Aperio Image Library v12.0.15\r\nlabel 20x10"),
        )
        .image(
            TiffImage::gray(40, 16, macro_image)
                .stripped(16)
                .description("Aperio Image Library v12.0.15\r\nmacro 40x16"),
        )
        .build();

    SvsFixture {
        bytes,
        level0,
        level1,
        label,
    }
}

pub async fn open_memory_slide(
    bytes: Vec<u8>,
    options: SlideOptions,
) -> Result<TiffSlide<MemoryReader>, DecodeError> {
    TiffSlide::open(Arc::new(MemoryReader::new(bytes, "memory://slide")), options).await
}

// =============================================================================
// Recording Source
// =============================================================================

/// An in-memory source that records every region read and how many reads
/// overlapped.
pub struct RecordingSource {
    image: MemoryImage<2>,
    reads: Mutex<Vec<Region<2>>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    delay: Option<Duration>,
    fail_at: Option<usize>,
}

impl RecordingSource {
    pub fn new(image: MemoryImage<2>) -> Self {
        Self {
            image,
            reads: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            delay: None,
            fail_at: None,
        }
    }

    /// Hold every read open for `delay` so concurrent reads overlap.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fail the read with this position (0-based).
    pub fn failing_at(mut self, read: usize) -> Self {
        self.fail_at = Some(read);
        self
    }

    pub fn reads(&self) -> Vec<Region<2>> {
        self.reads.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageSource<2> for RecordingSource {
    fn metadata(&self) -> &ImageMetadata<2> {
        self.image.metadata()
    }

    async fn read_region(&self, region: &Region<2>) -> Result<PixelBuffer<2>, ReadError> {
        let position = {
            let mut reads = self.reads.lock().unwrap();
            reads.push(*region);
            reads.len() - 1
        };
        if self.fail_at == Some(position) {
            return Err(DecodeError::MissingTile { index: 0 }.into());
        }

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        self.image.read_region(region).await
    }

    fn identifier(&self) -> &str {
        "recording"
    }
}
