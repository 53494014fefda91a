//! Splitting an image extent into stream divisions.
//!
//! The extent is cut along one axis into `N` contiguous bands. The axis is
//! the longest one; on ties the slowest-varying (highest) axis wins, so a
//! square image is cut into row bands that map to contiguous memory.
//!
//! With `E` units on the split axis, the first `E mod N` chunks are one unit
//! longer than the rest.

use crate::error::PartitionError;
use crate::region::Region;

/// One stream division.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk<const D: usize> {
    /// Position in `0..N`
    pub index: usize,
    pub region: Region<D>,
}

/// The axis an extent is split along.
pub fn split_axis<const D: usize>(extent: &Region<D>) -> usize {
    let sizes = extent.extent();
    (0..D)
        .rev()
        .max_by_key(|&axis| (sizes[axis], axis))
        .unwrap_or(0)
}

/// Cut `extent` into `count` disjoint chunks that cover it exactly.
pub fn partition<const D: usize>(
    extent: &Region<D>,
    count: usize,
) -> Result<Vec<Chunk<D>>, PartitionError> {
    if count == 0 {
        return Err(PartitionError::ZeroChunks);
    }
    let axis = split_axis(extent);
    let length = extent.extent()[axis];
    if count as u64 > length as u64 {
        return Err(PartitionError::TooManyChunks {
            count,
            axis,
            extent: length,
        });
    }

    // count <= length <= u32::MAX here
    let n = count as u32;
    let base = length / n;
    let remainder = length % n;

    let mut chunks = Vec::with_capacity(count);
    let mut position = extent.offset()[axis];
    for index in 0..n {
        let size = base + u32::from(index < remainder);
        let mut offset = extent.offset();
        let mut sizes = extent.extent();
        offset[axis] = position;
        sizes[axis] = size;
        let region = Region::new(offset, sizes).map_err(|_| PartitionError::TooManyChunks {
            count,
            axis,
            extent: length,
        })?;
        chunks.push(Chunk {
            index: index as usize,
            region,
        });
        position += size;
    }
    Ok(chunks)
}
