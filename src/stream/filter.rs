//! Neighborhood filters.
//!
//! A neighborhood filter computes each output pixel from the input pixels
//! within `radius` of it. At the edges of the input buffer the neighborhood
//! is clipped, never padded, so filtering a halo and cropping gives the same
//! pixels as filtering the whole image.

use crate::error::FilterError;
use crate::pixel::PixelBuffer;
use crate::region::Region;

/// A filter whose output pixel depends on a bounded neighborhood.
pub trait NeighborhoodFilter<const D: usize>: Send + Sync + Clone + 'static {
    /// Neighborhood radius per axis.
    fn radius(&self) -> [u32; D];

    fn name(&self) -> &'static str;

    /// Filter `input`, producing a buffer with the same region and format.
    fn apply(&self, input: &PixelBuffer<D>) -> Result<PixelBuffer<D>, FilterError>;
}

/// Per-channel median over a box neighborhood.
///
/// When a clipped neighborhood holds an even number of samples the upper
/// median (index `n / 2` of the sorted samples) is taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MedianFilter<const D: usize> {
    radius: [u32; D],
}

impl<const D: usize> MedianFilter<D> {
    pub fn new(radius: [u32; D]) -> Self {
        Self { radius }
    }

    /// Same radius on every axis.
    pub fn isotropic(radius: u32) -> Self {
        Self::new([radius; D])
    }
}

impl<const D: usize> NeighborhoodFilter<D> for MedianFilter<D> {
    fn radius(&self) -> [u32; D] {
        self.radius
    }

    fn name(&self) -> &'static str {
        "median"
    }

    fn apply(&self, input: &PixelBuffer<D>) -> Result<PixelBuffer<D>, FilterError> {
        let region = *input.region();
        let channels = input.format().channels();
        let data = input.data();

        let mut output = Vec::with_capacity(data.len());
        let mut window = Vec::new();
        for point in region.points() {
            let neighborhood = Region::new(point, [1; D])?.dilate_within(self.radius, &region)?;
            // Span in the interleaved data of one neighborhood line, one channel
            let line_span = (neighborhood.extent()[0] as usize - 1) * channels + 1;

            for channel in 0..channels {
                window.clear();
                for start in neighborhood.line_starts() {
                    let first = region.linear_index(&start) * channels + channel;
                    window.extend(data[first..first + line_span].iter().step_by(channels));
                }
                let middle = window.len() / 2;
                let (_, median, _) = window.select_nth_unstable(middle);
                output.push(*median);
            }
        }

        Ok(PixelBuffer::from_vec(region, input.format(), output)?)
    }
}

/// Identity filter with radius zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Passthrough<const D: usize>;

impl<const D: usize> NeighborhoodFilter<D> for Passthrough<D> {
    fn radius(&self) -> [u32; D] {
        [0; D]
    }

    fn name(&self) -> &'static str {
        "passthrough"
    }

    fn apply(&self, input: &PixelBuffer<D>) -> Result<PixelBuffer<D>, FilterError> {
        Ok(input.clone())
    }
}
