//! Filtering one chunk at a time.
//!
//! For each chunk the pipeline reads only the chunk's halo from the source,
//! filters it on a blocking worker thread and crops the result back to the
//! chunk. The output of [`StreamingFilterPipeline::process`] equals the same
//! region cut from the filter applied to the whole image.

use std::sync::Arc;

use tracing::debug;

use crate::error::{FilterError, PipelineError, RegionError};
use crate::pixel::{ImageMetadata, PixelBuffer};
use crate::region::Region;
use crate::slide::ImageSource;

use super::filter::NeighborhoodFilter;

/// A source paired with the filter applied to it.
pub struct StreamingFilterPipeline<S: ?Sized, F, const D: usize> {
    source: Arc<S>,
    filter: F,
}

impl<S, F, const D: usize> StreamingFilterPipeline<S, F, D>
where
    S: ImageSource<D> + ?Sized + 'static,
    F: NeighborhoodFilter<D>,
{
    pub fn new(source: Arc<S>, filter: F) -> Self {
        Self { source, filter }
    }

    /// Metadata of the filtered image, identical to the source's.
    pub fn metadata(&self) -> &ImageMetadata<D> {
        self.source.metadata()
    }

    pub fn filter(&self) -> &F {
        &self.filter
    }

    pub fn source(&self) -> &Arc<S> {
        &self.source
    }

    /// Input region needed to produce `chunk`: dilated by the filter radius
    /// and clipped to the image.
    pub fn halo_region(&self, chunk: &Region<D>) -> Result<Region<D>, RegionError> {
        chunk.dilate_within(self.filter.radius(), &self.metadata().bounds())
    }

    /// Filtered pixels of `chunk`.
    pub async fn process(&self, chunk: &Region<D>) -> Result<PixelBuffer<D>, PipelineError> {
        let halo = self.halo_region(chunk)?;
        debug!(
            source = self.source.identifier(),
            filter = self.filter.name(),
            chunk = %chunk,
            halo = %halo,
            "processing chunk"
        );

        let input = self.source.read_region(&halo).await?;

        let filter = self.filter.clone();
        let filtered = tokio::task::spawn_blocking(move || filter.apply(&input))
            .await
            .map_err(|e| FilterError::Worker {
                message: e.to_string(),
            })??;

        Ok(filtered.extract(chunk)?)
    }
}
