//! Driving a pipeline chunk by chunk into an output container.
//!
//! The writer partitions the output extent, runs [`StreamingFilterPipeline::process`]
//! for each chunk on its own task and writes every finished chunk at its
//! offset. At most `max_in_flight` chunks are processed at once; with the
//! default of one, chunk `i + 1` starts only after chunk `i` is written.
//!
//! A failure stops the run. Chunks already written stay in the container and
//! chunks still in flight are aborted.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{debug, info};

use crate::error::{ArgumentError, FilterError, PipelineError};
use crate::pixel::PixelBuffer;
use crate::slide::ImageSource;

use super::filter::NeighborhoodFilter;
use super::output::OutputContainer;
use super::partition::{partition, Chunk};
use super::pipeline::StreamingFilterPipeline;

/// Default number of stream divisions.
pub const DEFAULT_DIVISIONS: usize = 3;

/// Default number of chunks processed concurrently.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 1;

/// Writer settings, fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriterConfig {
    /// Number of chunks the output is split into
    pub divisions: usize,

    /// Chunks processed at the same time
    pub max_in_flight: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            divisions: DEFAULT_DIVISIONS,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
        }
    }
}

/// Shared flag that stops a run before its next chunk starts.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag {
    cancelled: Arc<AtomicBool>,
}

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

/// Outcome of a completed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSummary {
    /// Chunks written
    pub chunks: usize,

    /// Output pixels written across all chunks
    pub pixels_written: u64,

    /// Largest halo read for a single chunk, in pixels
    pub max_halo_pixels: u64,
}

/// Streams a filtered image into an output container.
pub struct StreamingWriter<S: ?Sized, F, C, const D: usize> {
    pipeline: Arc<StreamingFilterPipeline<S, F, D>>,
    container: C,
    config: WriterConfig,
    cancellation: CancellationFlag,
}

impl<S, F, C, const D: usize> StreamingWriter<S, F, C, D>
where
    S: ImageSource<D> + ?Sized + 'static,
    F: NeighborhoodFilter<D>,
    C: OutputContainer<D>,
{
    pub fn new(
        pipeline: Arc<StreamingFilterPipeline<S, F, D>>,
        container: C,
        config: WriterConfig,
    ) -> Self {
        Self {
            pipeline,
            container,
            config,
            cancellation: CancellationFlag::new(),
        }
    }

    /// Use `flag` to cancel the run from elsewhere.
    pub fn with_cancellation(mut self, flag: CancellationFlag) -> Self {
        self.cancellation = flag;
        self
    }

    pub fn container(&self) -> &C {
        &self.container
    }

    pub fn into_container(self) -> C {
        self.container
    }

    /// Process and write every chunk, then finish the container.
    pub async fn run(&mut self) -> Result<StreamSummary, PipelineError> {
        if self.config.max_in_flight == 0 {
            return Err(ArgumentError::InvalidValue {
                name: "max-in-flight",
                message: "must be at least 1".to_string(),
            }
            .into());
        }
        let (output, input) = (self.container.metadata(), self.pipeline.metadata());
        if output.dimensions() != input.dimensions() || output.pixel_format() != input.pixel_format() {
            return Err(ArgumentError::Conflict(
                "output metadata does not match the filtered image".to_string(),
            )
            .into());
        }

        let extent = self.pipeline.metadata().bounds();
        let mut pending: VecDeque<Chunk<D>> = partition(&extent, self.config.divisions)?.into();
        let total = pending.len();
        debug!(
            extent = %extent,
            chunks = total,
            max_in_flight = self.config.max_in_flight,
            "partitioned output"
        );

        let mut summary = StreamSummary {
            chunks: 0,
            pixels_written: 0,
            max_halo_pixels: 0,
        };
        let mut cancelled = false;
        // Dropping `tasks` on an early return aborts the chunks still in flight
        let mut tasks: JoinSet<(Chunk<D>, Result<PixelBuffer<D>, PipelineError>)> = JoinSet::new();

        loop {
            while !cancelled && tasks.len() < self.config.max_in_flight && !pending.is_empty() {
                if self.cancellation.is_cancelled() {
                    cancelled = true;
                    break;
                }
                let Some(chunk) = pending.pop_front() else {
                    break;
                };

                let halo = self.pipeline.halo_region(&chunk.region)?;
                summary.max_halo_pixels = summary.max_halo_pixels.max(halo.num_pixels());

                let pipeline = Arc::clone(&self.pipeline);
                tasks.spawn(async move {
                    let result = pipeline.process(&chunk.region).await;
                    (chunk, result)
                });
            }

            let Some(joined) = tasks.join_next().await else {
                break;
            };
            let (chunk, result) = joined.map_err(|e| FilterError::Worker {
                message: e.to_string(),
            })?;
            let buffer = result?;

            self.container.write_region(&buffer).await?;
            summary.chunks += 1;
            summary.pixels_written += chunk.region.num_pixels();
            debug!(index = chunk.index, region = %chunk.region, "wrote chunk");
        }

        if cancelled {
            info!(written = summary.chunks, total, "run cancelled");
            return Err(PipelineError::Cancelled {
                written: summary.chunks,
                total,
            });
        }

        self.container.finish().await?;
        info!(
            source = self.pipeline.source().identifier(),
            filter = self.pipeline.filter().name(),
            chunks = summary.chunks,
            pixels = summary.pixels_written,
            max_halo_pixels = summary.max_halo_pixels,
            "stream complete"
        );
        Ok(summary)
    }
}
