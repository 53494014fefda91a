//! Axis-aligned regions in image index space.
//!
//! A [`Region`] is an offset plus a strictly positive extent per axis. Axis 0
//! is the fastest-varying axis (columns for 2-D images) and axis `D - 1` the
//! slowest (rows), which is also the memory order of every pixel buffer in
//! this crate.
//!
//! # Halo
//!
//! A filter with radius `r` needs `r` extra samples on every side of the
//! region it produces. The halo of a chunk is the chunk dilated by `r` and
//! clipped to the image bounds:
//!
//! ```text
//!   +--------------------------+  image bounds
//!   |      +------------+      |
//!   |      |  +------+  |      |
//!   |      |  |chunk |  |      |
//!   |      |  +------+  |      |
//!   |      +------------+ halo |
//!   +--------------------------+
//! ```

use std::fmt;

use crate::error::RegionError;

/// An axis-aligned box: `offset[a] .. offset[a] + extent[a]` on every axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Region<const D: usize> {
    offset: [u32; D],
    extent: [u32; D],
}

impl<const D: usize> Region<D> {
    /// Create a region, rejecting zero extents.
    pub fn new(offset: [u32; D], extent: [u32; D]) -> Result<Self, RegionError> {
        if let Some(axis) = extent.iter().position(|&e| e == 0) {
            return Err(RegionError::EmptyExtent { axis });
        }
        Ok(Self { offset, extent })
    }

    /// Region starting at the origin covering `dimensions`.
    pub fn from_dimensions(dimensions: [u32; D]) -> Result<Self, RegionError> {
        Self::new([0; D], dimensions)
    }

    /// Region spanning `lo` (inclusive) to `hi` (exclusive).
    pub fn from_bounds(lo: [u32; D], hi: [u32; D]) -> Result<Self, RegionError> {
        let mut extent = [0u32; D];
        for axis in 0..D {
            extent[axis] = hi[axis].saturating_sub(lo[axis]);
        }
        Self::new(lo, extent)
    }

    pub fn offset(&self) -> [u32; D] {
        self.offset
    }

    pub fn extent(&self) -> [u32; D] {
        self.extent
    }

    /// Exclusive end coordinate along `axis`.
    #[inline]
    pub fn end(&self, axis: usize) -> u64 {
        self.offset[axis] as u64 + self.extent[axis] as u64
    }

    /// Total number of pixels.
    pub fn num_pixels(&self) -> u64 {
        self.extent.iter().map(|&e| e as u64).product()
    }

    /// Whether `point` lies inside this region.
    pub fn contains_point(&self, point: &[u32; D]) -> bool {
        (0..D).all(|a| point[a] >= self.offset[a] && (point[a] as u64) < self.end(a))
    }

    /// Whether `other` lies entirely inside this region.
    pub fn contains(&self, other: &Region<D>) -> bool {
        (0..D).all(|a| other.offset[a] >= self.offset[a] && other.end(a) <= self.end(a))
    }

    /// Fail with [`RegionError::OutOfBounds`] unless this region lies inside `bounds`.
    pub fn check_within(&self, bounds: &Region<D>) -> Result<(), RegionError> {
        if bounds.contains(self) {
            Ok(())
        } else {
            Err(RegionError::OutOfBounds {
                region: self.to_string(),
                bounds: bounds.to_string(),
            })
        }
    }

    /// Overlap of two regions, `None` when they are disjoint.
    pub fn intersect(&self, other: &Region<D>) -> Option<Region<D>> {
        let mut offset = [0u32; D];
        let mut extent = [0u32; D];
        for axis in 0..D {
            let lo = self.offset[axis].max(other.offset[axis]);
            let hi = self.end(axis).min(other.end(axis));
            if hi <= lo as u64 {
                return None;
            }
            offset[axis] = lo;
            extent[axis] = (hi - lo as u64) as u32;
        }
        Some(Region { offset, extent })
    }

    /// Grow by `radius` on both sides of every axis.
    ///
    /// The low side saturates at zero; the high side is not clipped, use
    /// [`Region::dilate_within`] for that.
    pub fn dilate(&self, radius: [u32; D]) -> Region<D> {
        let mut offset = [0u32; D];
        let mut extent = [0u32; D];
        for axis in 0..D {
            let lo = self.offset[axis].saturating_sub(radius[axis]);
            let hi = (self.end(axis) + radius[axis] as u64).min(u32::MAX as u64);
            offset[axis] = lo;
            extent[axis] = (hi - lo as u64) as u32;
        }
        Region { offset, extent }
    }

    /// Dilate by `radius` and clip to `bounds`: the halo of this region.
    pub fn dilate_within(
        &self,
        radius: [u32; D],
        bounds: &Region<D>,
    ) -> Result<Region<D>, RegionError> {
        self.check_within(bounds)?;
        // A region inside `bounds` always overlaps its own dilation.
        self.dilate(radius)
            .intersect(bounds)
            .ok_or_else(|| RegionError::OutOfBounds {
                region: self.to_string(),
                bounds: bounds.to_string(),
            })
    }

    /// This region expressed in the coordinate frame of `outer`.
    pub fn relative_to(&self, outer: &Region<D>) -> Result<Region<D>, RegionError> {
        self.check_within(outer)?;
        let mut offset = [0u32; D];
        for axis in 0..D {
            offset[axis] = self.offset[axis] - outer.offset[axis];
        }
        Ok(Region {
            offset,
            extent: self.extent,
        })
    }

    /// Element strides of a row-major buffer covering this region.
    pub fn strides(&self) -> [usize; D] {
        let mut strides = [1usize; D];
        for axis in 1..D {
            strides[axis] = strides[axis - 1] * self.extent[axis - 1] as usize;
        }
        strides
    }

    /// Position of `point` in a row-major buffer covering this region.
    ///
    /// `point` must lie inside the region.
    #[inline]
    pub fn linear_index(&self, point: &[u32; D]) -> usize {
        let strides = self.strides();
        (0..D)
            .map(|a| (point[a] - self.offset[a]) as usize * strides[a])
            .sum()
    }

    /// Every point of the region in memory order.
    pub fn points(&self) -> PointIter<D> {
        PointIter::new(*self, 0)
    }

    /// The first point of every axis-0 line, in memory order.
    ///
    /// Each line is `extent[0]` samples long and contiguous in a buffer
    /// covering the region.
    pub fn line_starts(&self) -> PointIter<D> {
        PointIter::new(*self, 1)
    }
}

impl<const D: usize> fmt::Display for Region<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}+{:?}", self.offset, self.extent)
    }
}

/// Row-major iterator over the points of a region.
///
/// Axes below `first_axis` stay pinned at the region offset.
#[derive(Debug, Clone)]
pub struct PointIter<const D: usize> {
    region: Region<D>,
    first_axis: usize,
    next: Option<[u32; D]>,
}

impl<const D: usize> PointIter<D> {
    fn new(region: Region<D>, first_axis: usize) -> Self {
        Self {
            region,
            first_axis,
            next: Some(region.offset),
        }
    }
}

impl<const D: usize> Iterator for PointIter<D> {
    type Item = [u32; D];

    fn next(&mut self) -> Option<[u32; D]> {
        let current = self.next?;
        let mut point = current;
        let mut axis = self.first_axis;
        loop {
            if axis >= D {
                self.next = None;
                break;
            }
            point[axis] += 1;
            if (point[axis] as u64) < self.region.end(axis) {
                self.next = Some(point);
                break;
            }
            point[axis] = self.region.offset[axis];
            axis += 1;
        }
        Some(current)
    }
}
