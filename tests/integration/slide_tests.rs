//! Slide decoding tests.
//!
//! Synthetic TIFF, BigTIFF and SVS files are read back through
//! [`TiffSlide`] and compared against the pixels they were built from.

use std::sync::Arc;

use slide_stream::error::{DecodeError, ReadError};
use slide_stream::format::SlideFormat;
use slide_stream::pixel::PixelFormat;
use slide_stream::region::Region;
use slide_stream::slide::{open_slide, open_source, ImageSource, ReadTarget, SlideOptions, SourceOptions};

use super::test_utils::{
    flat_blocks, noise, open_memory_slide, svs_fixture, write_file, Codec, TiffBuilder, TiffImage,
};

async fn read_all<S: ImageSource<2> + ?Sized>(source: &S) -> Vec<u8> {
    source
        .read_region(&source.metadata().bounds())
        .await
        .unwrap()
        .into_data()
}

fn assert_close(actual: &[u8], expected: &[u8], tolerance: u8) {
    assert_eq!(actual.len(), expected.len());
    for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
        assert!(
            a.abs_diff(*e) <= tolerance,
            "sample {} is {}, expected {} (tolerance {})",
            i,
            a,
            e,
            tolerance
        );
    }
}

// =============================================================================
// Raw Tiles and Strips
// =============================================================================

#[tokio::test]
async fn test_tiled_little_endian_gray() {
    let pixels = noise(40, 30, 1);
    let bytes = TiffBuilder::new()
        .image(TiffImage::gray(40, 30, pixels.clone()).tiled(16, 16))
        .build();

    let slide = open_memory_slide(bytes, SlideOptions::default()).await.unwrap();

    assert_eq!(slide.format(), SlideFormat::GenericTiff);
    assert_eq!(slide.vendor(), "generic-tiff");
    assert_eq!(slide.level_count(), 1);
    assert_eq!(slide.metadata().dimensions(), [40, 30]);
    assert_eq!(read_all(&slide).await, pixels);
}

#[tokio::test]
async fn test_bigtiff_big_endian_rgb() {
    let pixels = noise(20, 12, 3);
    let bytes = TiffBuilder::new()
        .big_endian()
        .bigtiff()
        .image(TiffImage::rgb(20, 12, pixels.clone()).tiled(8, 8))
        .build();

    let options = SlideOptions {
        pixel_format: PixelFormat::Rgb8,
        ..SlideOptions::default()
    };
    let slide = open_memory_slide(bytes, options).await.unwrap();

    assert_eq!(slide.metadata().pixel_format(), PixelFormat::Rgb8);
    assert_eq!(read_all(&slide).await, pixels);
}

#[tokio::test]
async fn test_stripped_image_is_single_level() {
    let pixels = noise(30, 20, 1);
    let bytes = TiffBuilder::new()
        .image(TiffImage::gray(30, 20, pixels.clone()).stripped(7))
        .build();

    let slide = open_memory_slide(bytes, SlideOptions::default()).await.unwrap();

    assert_eq!(slide.level_count(), 1);
    let level = slide.level_info(0).unwrap();
    assert_eq!((level.width, level.height), (30, 20));
    assert_eq!((level.tile_width, level.tile_height), (30, 7));
    assert_eq!(read_all(&slide).await, pixels);
}

#[tokio::test]
async fn test_region_across_tiles_matches_full_read() {
    let pixels = noise(48, 40, 1);
    let bytes = TiffBuilder::new()
        .image(TiffImage::gray(48, 40, pixels).tiled(16, 16))
        .build();
    let slide = open_memory_slide(bytes, SlideOptions::default()).await.unwrap();

    let full = slide.read_region(&slide.metadata().bounds()).await.unwrap();
    let region = Region::new([10, 5], [25, 30]).unwrap();
    let part = slide.read_region(&region).await.unwrap();

    assert_eq!(part.region(), &region);
    assert_eq!(part, full.extract(&region).unwrap());
}

#[tokio::test]
async fn test_gray_tiles_convert_to_rgb() {
    let pixels = noise(16, 16, 1);
    let bytes = TiffBuilder::new()
        .image(TiffImage::gray(16, 16, pixels.clone()).tiled(16, 16))
        .build();

    let options = SlideOptions {
        pixel_format: PixelFormat::Rgb8,
        ..SlideOptions::default()
    };
    let slide = open_memory_slide(bytes, options).await.unwrap();
    let data = read_all(&slide).await;

    assert_eq!(data.len(), pixels.len() * 3);
    for (pixel, gray) in data.chunks(3).zip(&pixels) {
        assert_eq!(pixel, [*gray; 3]);
    }
}

#[tokio::test]
async fn test_concurrent_reads_agree() {
    let pixels = noise(64, 64, 1);
    let bytes = TiffBuilder::new()
        .image(TiffImage::gray(64, 64, pixels).tiled(16, 16))
        .build();
    let slide = Arc::new(open_memory_slide(bytes, SlideOptions::default()).await.unwrap());
    let full = slide.read_region(&slide.metadata().bounds()).await.unwrap();

    let mut tasks = tokio::task::JoinSet::new();
    for i in 0..8u32 {
        let slide = slide.clone();
        tasks.spawn(async move {
            let region = Region::new([i * 4, 8], [20, 30]).unwrap();
            (region, slide.read_region(&region).await.unwrap())
        });
    }
    while let Some(result) = tasks.join_next().await {
        let (region, buffer) = result.unwrap();
        assert_eq!(buffer, full.extract(&region).unwrap());
    }
}

// =============================================================================
// JPEG Tiles
// =============================================================================

#[tokio::test]
async fn test_jpeg_tiles() {
    let pixels = flat_blocks(32, 32, 16);
    let bytes = TiffBuilder::new()
        .image(
            TiffImage::gray(32, 32, pixels.clone())
                .tiled(16, 16)
                .codec(Codec::Jpeg),
        )
        .build();

    let slide = open_memory_slide(bytes, SlideOptions::default()).await.unwrap();

    assert_close(&read_all(&slide).await, &pixels, 3);
}

#[tokio::test]
async fn test_jpeg_tiles_with_shared_tables() {
    let pixels = flat_blocks(48, 32, 16);
    let bytes = TiffBuilder::new()
        .image(
            TiffImage::gray(48, 32, pixels.clone())
                .tiled(16, 16)
                .codec(Codec::JpegSharedTables),
        )
        .build();

    let slide = open_memory_slide(bytes, SlideOptions::default()).await.unwrap();

    assert_close(&read_all(&slide).await, &pixels, 3);
}

#[tokio::test]
async fn test_rgb_jpeg_with_shared_tables_in_bigtiff() {
    let gray = flat_blocks(32, 16, 16);
    let pixels: Vec<u8> = gray.iter().flat_map(|&v| [v, v, v]).collect();
    let bytes = TiffBuilder::new()
        .bigtiff()
        .image(
            TiffImage::rgb(32, 16, pixels.clone())
                .tiled(16, 16)
                .codec(Codec::JpegSharedTables),
        )
        .build();

    let options = SlideOptions {
        pixel_format: PixelFormat::Rgb8,
        ..SlideOptions::default()
    };
    let slide = open_memory_slide(bytes, options).await.unwrap();

    assert_close(&read_all(&slide).await, &pixels, 4);
}

#[tokio::test]
async fn test_unsupported_compression() {
    let bytes = TiffBuilder::new()
        .image(
            TiffImage::gray(16, 16, noise(16, 16, 1))
                .tiled(16, 16)
                .compression_tag(5),
        )
        .build();

    let result = open_memory_slide(bytes, SlideOptions::default()).await;

    assert!(matches!(result, Err(DecodeError::UnsupportedCompression(_))));
}

// =============================================================================
// SVS Structure
// =============================================================================

#[tokio::test]
async fn test_svs_levels_and_metadata() {
    let fixture = svs_fixture();
    let slide = open_memory_slide(fixture.bytes, SlideOptions::default()).await.unwrap();

    assert_eq!(slide.format(), SlideFormat::AperioSvs);
    assert_eq!(slide.vendor(), "aperio");
    assert_eq!(slide.level_count(), 2);

    let level0 = slide.level_info(0).unwrap();
    assert_eq!((level0.width, level0.height), (64, 48));
    assert_eq!(level0.downsample, 1.0);
    assert_eq!(level0.spacing, [0.5, 0.5]);

    let level1 = slide.level_info(1).unwrap();
    assert_eq!((level1.width, level1.height), (32, 24));
    assert_eq!(level1.downsample, 2.0);
    assert_eq!(level1.spacing, [1.0, 1.0]);
    assert!(slide.level_info(2).is_none());

    assert_eq!(slide.metadata().spacing(), [0.5, 0.5]);
    assert_eq!(read_all(&slide).await, fixture.level0);
}

#[tokio::test]
async fn test_svs_properties() {
    let slide = open_memory_slide(svs_fixture().bytes, SlideOptions::default())
        .await
        .unwrap();
    let properties = slide.properties();

    assert_eq!(properties["slide.vendor"], "aperio");
    assert_eq!(properties["slide.level-count"], "2");
    assert_eq!(properties["slide.level[1].downsample"], "2");
    assert_eq!(properties["slide.objective-power"], "20");
    assert_eq!(properties["slide.mpp-x"], "0.5");
    assert_eq!(properties["aperio.AppMag"], "20");
    assert_eq!(properties["aperio.Filename"], "fixture");
    assert_eq!(properties["tiff.Software"], "Aperio Image Library");
    assert!(properties["tiff.ImageDescription"].starts_with("Aperio Image Library"));
}

#[tokio::test]
async fn test_svs_associated_images() {
    let fixture = svs_fixture();
    let slide = open_memory_slide(fixture.bytes, SlideOptions::default()).await.unwrap();

    assert_eq!(slide.associated_image_names(), vec!["thumbnail", "label", "macro"]);
    let info = slide.associated_image_info("macro").unwrap();
    assert_eq!((info.width, info.height), (40, 16));
    assert!(slide.associated_image_info("overview").is_none());

    let label = slide
        .select(ReadTarget::Associated("label".to_string()))
        .await
        .unwrap();
    assert_eq!(label.metadata().dimensions(), [20, 10]);
    assert_eq!(label.metadata().spacing(), [1.0, 1.0]);
    assert_eq!(read_all(&label).await, fixture.label);

    let thumbnail = slide
        .select(ReadTarget::Associated("thumbnail".to_string()))
        .await
        .unwrap();
    assert_eq!(read_all(&thumbnail).await, vec![128; 32 * 24]);
}

#[tokio::test]
async fn test_select_level() {
    let fixture = svs_fixture();
    let slide = open_memory_slide(fixture.bytes, SlideOptions::default()).await.unwrap();

    let level = slide.select(ReadTarget::Level(1)).await.unwrap();

    assert_eq!(level.metadata().dimensions(), [32, 24]);
    assert_eq!(level.metadata().spacing(), [1.0, 1.0]);
    assert_eq!(read_all(&level).await, fixture.level1);
}

#[tokio::test]
async fn test_select_by_downsample() {
    let slide = open_memory_slide(svs_fixture().bytes, SlideOptions::default())
        .await
        .unwrap();

    for (factor, dimensions) in [(1.0, [64, 48]), (1.5, [32, 24]), (2.0, [32, 24]), (8.0, [32, 24])] {
        let level = slide.select(ReadTarget::Downsample(factor)).await.unwrap();
        assert_eq!(level.metadata().dimensions(), dimensions, "downsample {}", factor);
    }
}

#[tokio::test]
async fn test_unknown_targets() {
    let fixture = svs_fixture();

    let options = SlideOptions {
        target: ReadTarget::Level(5),
        ..SlideOptions::default()
    };
    let result = open_memory_slide(fixture.bytes.clone(), options).await;
    assert!(matches!(
        result,
        Err(DecodeError::UnknownLevel { level: 5, count: 2 })
    ));

    let options = SlideOptions {
        target: ReadTarget::Associated("overview".to_string()),
        ..SlideOptions::default()
    };
    let result = open_memory_slide(fixture.bytes, options).await;
    assert!(matches!(result, Err(DecodeError::UnknownAssociatedImage(name)) if name == "overview"));
}

#[tokio::test]
async fn test_region_outside_image() {
    let slide = open_memory_slide(svs_fixture().bytes, SlideOptions::default())
        .await
        .unwrap();

    let region = Region::new([60, 40], [10, 10]).unwrap();

    assert!(matches!(
        slide.read_region(&region).await,
        Err(ReadError::OutOfBounds(_))
    ));
}

#[tokio::test]
async fn test_spacing_from_resolution_tags() {
    let bytes = TiffBuilder::new()
        .image(
            TiffImage::gray(16, 16, noise(16, 16, 1))
                .tiled(16, 16)
                .pixels_per_cm(2000),
        )
        .build();

    let slide = open_memory_slide(bytes, SlideOptions::default()).await.unwrap();

    assert_eq!(slide.metadata().spacing(), [5.0, 5.0]);
    assert_eq!(slide.properties()["slide.mpp-x"], "5");
}

#[tokio::test]
async fn test_spacing_defaults_to_one() {
    let bytes = TiffBuilder::new()
        .image(TiffImage::gray(16, 16, noise(16, 16, 1)).tiled(16, 16))
        .build();

    let slide = open_memory_slide(bytes, SlideOptions::default()).await.unwrap();

    assert_eq!(slide.metadata().spacing(), [1.0, 1.0]);
}

// =============================================================================
// Opening Files
// =============================================================================

#[tokio::test]
async fn test_open_slide_through_block_cache() {
    let dir = tempfile::tempdir().unwrap();
    let fixture = svs_fixture();
    let path = write_file(dir.path(), "fixture.svs", &fixture.bytes);

    let options = SourceOptions {
        block_size: 1024,
        cache_blocks: 4,
        ..SourceOptions::default()
    };
    let slide = open_slide(&path, &options).await.unwrap();

    assert_eq!(slide.level_count(), 2);
    assert_eq!(read_all(&slide).await, fixture.level0);
}

#[tokio::test]
async fn test_open_source_dispatches_on_content() {
    let dir = tempfile::tempdir().unwrap();
    let fixture = svs_fixture();
    // The extension does not decide the format
    let tiff_path = write_file(dir.path(), "fixture.bin", &fixture.bytes);

    let options = SourceOptions {
        target: ReadTarget::Level(1),
        ..SourceOptions::default()
    };
    let source = open_source(&tiff_path, &options).await.unwrap();
    assert_eq!(source.metadata().dimensions(), [32, 24]);
    assert_eq!(read_all(&*source).await, fixture.level1);

    let png_path = dir.path().join("plain.png");
    image::GrayImage::from_raw(4, 3, (0..12).collect())
        .unwrap()
        .save(&png_path)
        .unwrap();
    let source = open_source(&png_path, &SourceOptions::default()).await.unwrap();
    assert_eq!(read_all(&*source).await, (0..12).collect::<Vec<u8>>());
}

#[tokio::test]
async fn test_open_source_rejects_corrupt_tiff() {
    let dir = tempfile::tempdir().unwrap();
    let mut bytes = svs_fixture().bytes;
    // Point the first IFD past the end of the file
    bytes[4..8].copy_from_slice(&u32::MAX.to_le_bytes());
    let path = write_file(dir.path(), "broken.svs", &bytes);

    let result = open_source(&path, &SourceOptions::default()).await;

    assert!(result.is_err());
}
