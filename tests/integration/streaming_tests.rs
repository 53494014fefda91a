//! Streaming writer tests.
//!
//! The central property: whatever the chunking and concurrency, the streamed
//! output equals filtering the whole image at once.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use proptest::prelude::*;

use slide_stream::error::{PipelineError, WriteError};
use slide_stream::pixel::{ImageMetadata, MemoryImage, PixelBuffer, PixelFormat};
use slide_stream::region::Region;
use slide_stream::slide::{open_source, ImageSource, SourceOptions};
use slide_stream::stream::{
    CancellationFlag, MedianFilter, NeighborhoodFilter, OutputContainer, PnmContainer,
    StreamSummary, StreamingFilterPipeline, StreamingWriter, WriterConfig,
};

use super::test_utils::{gray_image, noise, svs_fixture, write_file, RecordingSource};

fn reference_median(image: &MemoryImage<2>, radius: u32) -> PixelBuffer<2> {
    MedianFilter::isotropic(radius).apply(image.buffer()).unwrap()
}

fn config(divisions: usize, max_in_flight: usize) -> WriterConfig {
    WriterConfig {
        divisions,
        max_in_flight,
    }
}

/// Pixel samples of a binary PGM file.
fn pgm_samples(path: &std::path::Path, width: u32, height: u32) -> Vec<u8> {
    let bytes = std::fs::read(path).unwrap();
    let header = format!("P5\n{} {}\n255\n", width, height);
    assert!(bytes.starts_with(header.as_bytes()), "unexpected PGM header");
    bytes[header.len()..].to_vec()
}

/// Delegates to a PNM container but fails the write with position `fail_at`.
struct FailingWrites {
    inner: PnmContainer,
    writes: usize,
    fail_at: usize,
    finished: bool,
}

#[async_trait]
impl OutputContainer<2> for FailingWrites {
    fn metadata(&self) -> &ImageMetadata<2> {
        self.inner.metadata()
    }

    async fn write_region(&mut self, buffer: &PixelBuffer<2>) -> Result<(), WriteError> {
        let position = self.writes;
        self.writes += 1;
        if position == self.fail_at {
            return Err(WriteError::Io("disk full".to_string()));
        }
        self.inner.write_region(buffer).await
    }

    async fn finish(&mut self) -> Result<(), WriteError> {
        self.finished = true;
        self.inner.finish().await
    }
}

// =============================================================================
// Chunking
// =============================================================================

#[tokio::test]
async fn test_chunk_boundaries_read_halos() {
    let image = gray_image(10, 10, noise(10, 10, 1));
    let expected = reference_median(&image, 1);
    let source = Arc::new(RecordingSource::new(image.clone()));
    let pipeline = Arc::new(StreamingFilterPipeline::new(
        source.clone(),
        MedianFilter::isotropic(1),
    ));

    let mut writer = StreamingWriter::new(
        pipeline,
        MemoryImage::new(image.metadata().clone()),
        config(3, 1),
    );
    let summary = writer.run().await.unwrap();

    assert_eq!(
        source.reads(),
        vec![
            Region::new([0, 0], [10, 5]).unwrap(),
            Region::new([0, 3], [10, 5]).unwrap(),
            Region::new([0, 6], [10, 4]).unwrap(),
        ]
    );
    assert_eq!(
        summary,
        StreamSummary {
            chunks: 3,
            pixels_written: 100,
            max_halo_pixels: 50,
        }
    );
    assert_eq!(writer.into_container().into_buffer(), expected);
}

#[tokio::test]
async fn test_wide_image_splits_columns() {
    let image = gray_image(12, 4, noise(12, 4, 1));
    let source = Arc::new(RecordingSource::new(image.clone()));
    let pipeline = Arc::new(StreamingFilterPipeline::new(
        source.clone(),
        MedianFilter::isotropic(2),
    ));

    let mut writer = StreamingWriter::new(
        pipeline,
        MemoryImage::new(image.metadata().clone()),
        config(2, 1),
    );
    writer.run().await.unwrap();

    assert_eq!(
        source.reads(),
        vec![
            Region::new([0, 0], [8, 4]).unwrap(),
            Region::new([4, 0], [8, 4]).unwrap(),
        ]
    );
    assert_eq!(
        writer.into_container().into_buffer(),
        reference_median(&image, 2)
    );
}

#[tokio::test]
async fn test_invalid_division_count() {
    let image = gray_image(5, 5, noise(5, 5, 1));

    for divisions in [0, 6] {
        let source = Arc::new(RecordingSource::new(image.clone()));
        let pipeline = Arc::new(StreamingFilterPipeline::new(
            source.clone(),
            MedianFilter::isotropic(1),
        ));
        let mut writer = StreamingWriter::new(
            pipeline,
            MemoryImage::new(image.metadata().clone()),
            config(divisions, 1),
        );

        let err = writer.run().await.unwrap_err();

        assert_eq!(err.stage(), "partition", "divisions {}", divisions);
        assert!(source.reads().is_empty());
    }
}

fn stream_case() -> impl Strategy<Value = (u32, u32, u32, usize, usize, PixelFormat)> {
    (
        1u32..24,
        1u32..24,
        0u32..4,
        1usize..4,
        prop_oneof![Just(PixelFormat::Gray8), Just(PixelFormat::Rgb8)],
    )
        .prop_flat_map(|(width, height, radius, max_in_flight, format)| {
            let longest = width.max(height).min(6) as usize;
            (
                Just(width),
                Just(height),
                Just(radius),
                1..=longest,
                Just(max_in_flight),
                Just(format),
            )
        })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn streamed_median_matches_whole_image(
        (width, height, radius, divisions, max_in_flight, format) in stream_case()
    ) {
        let metadata = ImageMetadata::new([width, height], format).unwrap();
        let samples = noise(width, height, format.channels() as u32);
        let image = MemoryImage::from_samples(metadata.clone(), samples).unwrap();
        let expected = reference_median(&image, radius);

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let output = runtime.block_on(async {
            let pipeline = Arc::new(StreamingFilterPipeline::new(
                Arc::new(image),
                MedianFilter::isotropic(radius),
            ));
            let mut writer = StreamingWriter::new(
                pipeline,
                MemoryImage::new(metadata),
                config(divisions, max_in_flight),
            );
            let summary = writer.run().await.unwrap();
            assert_eq!(summary.chunks, divisions);
            writer.into_container().into_buffer()
        });

        prop_assert_eq!(output, expected);
    }
}

// =============================================================================
// Concurrency
// =============================================================================

#[tokio::test]
async fn test_in_flight_chunks_are_capped() {
    let image = gray_image(64, 64, noise(64, 64, 1));
    let expected = reference_median(&image, 2);
    let source = Arc::new(RecordingSource::new(image.clone()).with_delay(Duration::from_millis(20)));
    let pipeline = Arc::new(StreamingFilterPipeline::new(
        source.clone(),
        MedianFilter::isotropic(2),
    ));

    let mut writer = StreamingWriter::new(
        pipeline,
        MemoryImage::new(image.metadata().clone()),
        config(8, 3),
    );
    let summary = writer.run().await.unwrap();

    assert_eq!(summary.chunks, 8);
    assert_eq!(source.reads().len(), 8);
    assert!(source.max_in_flight() <= 3);
    assert!(source.max_in_flight() >= 2);
    assert_eq!(writer.into_container().into_buffer(), expected);
}

#[tokio::test]
async fn test_default_config_is_sequential() {
    let image = gray_image(32, 32, noise(32, 32, 1));
    let source = Arc::new(RecordingSource::new(image.clone()).with_delay(Duration::from_millis(5)));
    let pipeline = Arc::new(StreamingFilterPipeline::new(
        source.clone(),
        MedianFilter::isotropic(1),
    ));

    let mut writer = StreamingWriter::new(
        pipeline,
        MemoryImage::new(image.metadata().clone()),
        WriterConfig::default(),
    );
    writer.run().await.unwrap();

    assert_eq!(source.reads().len(), 3);
    assert_eq!(source.max_in_flight(), 1);
}

// =============================================================================
// Failures
// =============================================================================

#[tokio::test]
async fn test_decode_failure_keeps_written_chunks() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.pgm");
    let image = gray_image(8, 9, noise(8, 9, 1));
    let expected = reference_median(&image, 1);
    let source = Arc::new(RecordingSource::new(image.clone()).failing_at(1));
    let pipeline = Arc::new(StreamingFilterPipeline::new(
        source.clone(),
        MedianFilter::isotropic(1),
    ));
    let container = PnmContainer::create(&path, image.metadata().clone())
        .await
        .unwrap();

    let mut writer = StreamingWriter::new(pipeline, container, config(3, 1));
    let err = writer.run().await.unwrap_err();
    drop(writer);

    assert_eq!(err.stage(), "decode");
    assert_eq!(source.reads().len(), 2);

    // Rows 0..3 are the first chunk; the rest were never written
    let samples = pgm_samples(&path, 8, 9);
    assert_eq!(&samples[..24], &expected.data()[..24]);
    assert!(samples[24..].iter().all(|&v| v == 0));
}

#[tokio::test]
async fn test_write_failure_stops_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.pgm");
    let image = gray_image(8, 9, noise(8, 9, 1));
    let expected = reference_median(&image, 1);
    let source = Arc::new(RecordingSource::new(image.clone()));
    let pipeline = Arc::new(StreamingFilterPipeline::new(
        source.clone(),
        MedianFilter::isotropic(1),
    ));
    let container = FailingWrites {
        inner: PnmContainer::create(&path, image.metadata().clone())
            .await
            .unwrap(),
        writes: 0,
        fail_at: 1,
        finished: false,
    };

    let mut writer = StreamingWriter::new(pipeline, container, config(3, 1));
    let err = writer.run().await.unwrap_err();

    assert_eq!(err.stage(), "write");
    assert!(matches!(err, PipelineError::Write(WriteError::Io(_))));
    assert_eq!(source.reads().len(), 2);
    let container = writer.into_container();
    assert!(!container.finished);
    drop(container);

    let samples = pgm_samples(&path, 8, 9);
    assert_eq!(&samples[..24], &expected.data()[..24]);
}

#[tokio::test]
async fn test_cancelled_before_start() {
    let image = gray_image(9, 9, noise(9, 9, 1));
    let source = Arc::new(RecordingSource::new(image.clone()));
    let pipeline = Arc::new(StreamingFilterPipeline::new(
        source.clone(),
        MedianFilter::isotropic(1),
    ));
    let flag = CancellationFlag::new();
    flag.cancel();

    let mut writer = StreamingWriter::new(
        pipeline,
        MemoryImage::new(image.metadata().clone()),
        config(3, 1),
    )
    .with_cancellation(flag);
    let err = writer.run().await.unwrap_err();

    assert!(matches!(
        err,
        PipelineError::Cancelled {
            written: 0,
            total: 3
        }
    ));
    assert_eq!(err.stage(), "cancel");
    assert!(source.reads().is_empty());
}

// =============================================================================
// End to End
// =============================================================================

#[tokio::test]
async fn test_slide_to_pgm() {
    let dir = tempfile::tempdir().unwrap();
    let fixture = svs_fixture();
    let input = write_file(dir.path(), "fixture.svs", &fixture.bytes);
    let output = dir.path().join("filtered.pgm");

    let source: Arc<dyn ImageSource<2>> =
        Arc::from(open_source(&input, &SourceOptions::default()).await.unwrap());
    let metadata = source.metadata().clone();
    let pipeline = Arc::new(StreamingFilterPipeline::new(
        source,
        MedianFilter::isotropic(2),
    ));
    let container = PnmContainer::create(&output, metadata).await.unwrap();

    let summary = StreamingWriter::new(pipeline, container, config(4, 2))
        .run()
        .await
        .unwrap();

    assert_eq!(summary.chunks, 4);
    assert_eq!(summary.pixels_written, 64 * 48);
    let expected = reference_median(&gray_image(64, 48, fixture.level0), 2);
    assert_eq!(pgm_samples(&output, 64, 48), expected.data());
}
