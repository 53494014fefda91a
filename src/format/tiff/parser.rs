//! TIFF header and IFD parsing.
//!
//! # Layout
//!
//! ```text
//! Classic TIFF header (8 bytes)       BigTIFF header (16 bytes)
//!   0..2  byte order (II / MM)          0..2   byte order
//!   2..4  version 42                    2..4   version 43
//!   4..8  first IFD offset (u32)        4..6   offset size (8)
//!                                       6..8   reserved
//!                                       8..16  first IFD offset (u64)
//!
//! IFD
//!   count                   u16 (TIFF) / u64 (BigTIFF)
//!   count x entry           12 bytes   / 20 bytes
//!     tag u16, type u16, count u32/u64, value-or-offset 4/8 bytes
//!   next IFD offset         u32        / u64 (0 terminates the chain)
//! ```
//!
//! Values that fit in the value field are stored inline; larger values live
//! at the offset stored there and are fetched by
//! [`ValueReader`](super::ValueReader).

use crate::error::TiffError;

use super::tags::{FieldType, TiffTag};

// =============================================================================
// Constants
// =============================================================================

const BYTE_ORDER_LITTLE_ENDIAN: [u8; 2] = *b"II";
const BYTE_ORDER_BIG_ENDIAN: [u8; 2] = *b"MM";

const VERSION_TIFF: u16 = 42;
const VERSION_BIGTIFF: u16 = 43;

/// Size of classic TIFF header in bytes
pub const TIFF_HEADER_SIZE: usize = 8;

/// Size of BigTIFF header in bytes
pub const BIGTIFF_HEADER_SIZE: usize = 16;

// =============================================================================
// ByteOrder
// =============================================================================

/// Endianness declared by the first two header bytes.
///
/// The `read_*` helpers take a slice that is at least as long as the value;
/// callers check lengths first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    /// "II"
    LittleEndian,
    /// "MM"
    BigEndian,
}

impl ByteOrder {
    #[inline]
    pub fn read_u16(self, bytes: &[u8]) -> u16 {
        let raw = [bytes[0], bytes[1]];
        match self {
            ByteOrder::LittleEndian => u16::from_le_bytes(raw),
            ByteOrder::BigEndian => u16::from_be_bytes(raw),
        }
    }

    #[inline]
    pub fn read_u32(self, bytes: &[u8]) -> u32 {
        let raw = [bytes[0], bytes[1], bytes[2], bytes[3]];
        match self {
            ByteOrder::LittleEndian => u32::from_le_bytes(raw),
            ByteOrder::BigEndian => u32::from_be_bytes(raw),
        }
    }

    #[inline]
    pub fn read_u64(self, bytes: &[u8]) -> u64 {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&bytes[..8]);
        match self {
            ByteOrder::LittleEndian => u64::from_le_bytes(raw),
            ByteOrder::BigEndian => u64::from_be_bytes(raw),
        }
    }
}

// =============================================================================
// TiffHeader
// =============================================================================

/// Parsed file header: byte order, variant, and where the IFD chain starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TiffHeader {
    pub byte_order: ByteOrder,
    pub is_bigtiff: bool,
    pub first_ifd_offset: u64,
}

impl TiffHeader {
    /// Parse the header from the first bytes of a file of `file_size` bytes.
    ///
    /// Pass at least [`BIGTIFF_HEADER_SIZE`] bytes when available.
    pub fn parse(bytes: &[u8], file_size: u64) -> Result<Self, TiffError> {
        if bytes.len() < TIFF_HEADER_SIZE {
            return Err(TiffError::FileTooSmall {
                required: TIFF_HEADER_SIZE as u64,
                actual: bytes.len() as u64,
            });
        }

        let byte_order = match [bytes[0], bytes[1]] {
            BYTE_ORDER_LITTLE_ENDIAN => ByteOrder::LittleEndian,
            BYTE_ORDER_BIG_ENDIAN => ByteOrder::BigEndian,
            _ => return Err(TiffError::InvalidMagic(u16::from_le_bytes([bytes[0], bytes[1]]))),
        };

        let (is_bigtiff, first_ifd_offset) = match byte_order.read_u16(&bytes[2..4]) {
            VERSION_TIFF => (false, byte_order.read_u32(&bytes[4..8]) as u64),
            VERSION_BIGTIFF => {
                if bytes.len() < BIGTIFF_HEADER_SIZE {
                    return Err(TiffError::FileTooSmall {
                        required: BIGTIFF_HEADER_SIZE as u64,
                        actual: bytes.len() as u64,
                    });
                }
                let offset_size = byte_order.read_u16(&bytes[4..6]);
                if offset_size != 8 {
                    return Err(TiffError::InvalidBigTiffOffsetSize(offset_size));
                }
                (true, byte_order.read_u64(&bytes[8..16]))
            }
            other => return Err(TiffError::InvalidVersion(other)),
        };

        if first_ifd_offset >= file_size {
            return Err(TiffError::InvalidIfdOffset(first_ifd_offset));
        }

        Ok(TiffHeader {
            byte_order,
            is_bigtiff,
            first_ifd_offset,
        })
    }

    /// 12 bytes (TIFF) or 20 bytes (BigTIFF).
    #[inline]
    pub const fn ifd_entry_size(&self) -> usize {
        if self.is_bigtiff {
            20
        } else {
            12
        }
    }

    /// Width of the IFD entry-count field.
    #[inline]
    pub const fn ifd_count_size(&self) -> usize {
        if self.is_bigtiff {
            8
        } else {
            2
        }
    }

    /// Width of offsets: next-IFD pointers and entry value fields.
    #[inline]
    pub const fn offset_size(&self) -> usize {
        if self.is_bigtiff {
            8
        } else {
            4
        }
    }

    /// Read an entry count from the start of an IFD.
    pub fn read_ifd_count(&self, bytes: &[u8]) -> Result<u64, TiffError> {
        let need = self.ifd_count_size();
        if bytes.len() < need {
            return Err(TiffError::FileTooSmall {
                required: need as u64,
                actual: bytes.len() as u64,
            });
        }
        Ok(if self.is_bigtiff {
            self.byte_order.read_u64(bytes)
        } else {
            self.byte_order.read_u16(bytes) as u64
        })
    }

    /// Read an offset-sized value (u32 or u64).
    #[inline]
    pub fn read_offset(&self, bytes: &[u8]) -> u64 {
        if self.is_bigtiff {
            self.byte_order.read_u64(bytes)
        } else {
            self.byte_order.read_u32(bytes) as u64
        }
    }
}

// =============================================================================
// IfdEntry
// =============================================================================

/// One 12- or 20-byte IFD entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IfdEntry {
    pub tag_id: u16,
    /// `None` when the type code is not modelled
    pub field_type: Option<FieldType>,
    pub field_type_raw: u16,
    pub count: u64,
    /// Raw value field (4 or 8 bytes, file byte order)
    pub value_field: Vec<u8>,
    /// Whether `value_field` holds the values themselves
    pub is_inline: bool,
}

impl IfdEntry {
    fn parse(bytes: &[u8], header: &TiffHeader) -> Self {
        let bo = header.byte_order;
        let tag_id = bo.read_u16(&bytes[0..2]);
        let field_type_raw = bo.read_u16(&bytes[2..4]);
        let field_type = FieldType::from_u16(field_type_raw);
        let (count, value_field) = if header.is_bigtiff {
            (bo.read_u64(&bytes[4..12]), bytes[12..20].to_vec())
        } else {
            (bo.read_u32(&bytes[4..8]) as u64, bytes[8..12].to_vec())
        };
        let is_inline = field_type
            .map(|t| t.fits_inline(count, header.is_bigtiff))
            .unwrap_or(false);

        IfdEntry {
            tag_id,
            field_type,
            field_type_raw,
            count,
            value_field,
            is_inline,
        }
    }

    pub fn tag(&self) -> Option<TiffTag> {
        TiffTag::from_u16(self.tag_id)
    }

    /// Total size of the values in bytes, `None` for unknown types.
    pub fn value_byte_size(&self) -> Option<u64> {
        self.field_type
            .and_then(|t| (t.size_in_bytes() as u64).checked_mul(self.count))
    }

    /// File offset of out-of-line values.
    pub fn value_offset(&self, byte_order: ByteOrder) -> u64 {
        if self.value_field.len() == 8 {
            byte_order.read_u64(&self.value_field)
        } else {
            byte_order.read_u32(&self.value_field) as u64
        }
    }

    /// First value when it is an inline SHORT, LONG or LONG8.
    pub fn inline_u64(&self, byte_order: ByteOrder) -> Option<u64> {
        if !self.is_inline || self.count == 0 {
            return None;
        }
        match self.field_type? {
            FieldType::Short => Some(byte_order.read_u16(&self.value_field) as u64),
            FieldType::Long => Some(byte_order.read_u32(&self.value_field) as u64),
            FieldType::Long8 => Some(byte_order.read_u64(&self.value_field)),
            _ => None,
        }
    }

    /// [`IfdEntry::inline_u64`] narrowed to u32.
    pub fn inline_u32(&self, byte_order: ByteOrder) -> Option<u32> {
        self.inline_u64(byte_order)
            .and_then(|v| u32::try_from(v).ok())
    }
}

// =============================================================================
// Ifd
// =============================================================================

/// A parsed Image File Directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ifd {
    pub entries: Vec<IfdEntry>,
    /// Offset of the next IFD, 0 at the end of the chain
    pub next_ifd_offset: u64,
    byte_order: ByteOrder,
}

impl Ifd {
    /// An IFD without entries.
    pub fn empty(byte_order: ByteOrder) -> Self {
        Ifd {
            entries: Vec::new(),
            next_ifd_offset: 0,
            byte_order,
        }
    }

    /// Byte size of an IFD with `entry_count` entries, including the count
    /// and next-offset fields.
    pub fn calculate_size(entry_count: u64, header: &TiffHeader) -> Option<usize> {
        let entries = usize::try_from(entry_count)
            .ok()?
            .checked_mul(header.ifd_entry_size())?;
        entries.checked_add(header.ifd_count_size() + header.offset_size())
    }

    /// Parse an IFD from bytes starting at its count field.
    pub fn parse(bytes: &[u8], header: &TiffHeader) -> Result<Self, TiffError> {
        let count = header.read_ifd_count(bytes)?;
        let size = Ifd::calculate_size(count, header).ok_or(TiffError::InvalidTagValue {
            tag: "IFD",
            message: format!("entry count {} is too large", count),
        })?;
        if bytes.len() < size {
            return Err(TiffError::FileTooSmall {
                required: size as u64,
                actual: bytes.len() as u64,
            });
        }

        let entry_size = header.ifd_entry_size();
        let start = header.ifd_count_size();
        let entries = (0..count as usize)
            .map(|i| {
                let at = start + i * entry_size;
                IfdEntry::parse(&bytes[at..at + entry_size], header)
            })
            .collect();
        let next_ifd_offset = header.read_offset(&bytes[size - header.offset_size()..size]);

        Ok(Ifd {
            entries,
            next_ifd_offset,
            byte_order: header.byte_order,
        })
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    pub fn get_entry_by_tag(&self, tag: TiffTag) -> Option<&IfdEntry> {
        let id = tag.as_u16();
        self.entries.iter().find(|e| e.tag_id == id)
    }

    /// First inline value of `tag`.
    pub fn get_u32(&self, tag: TiffTag) -> Option<u32> {
        self.get_entry_by_tag(tag)?.inline_u32(self.byte_order)
    }

    /// Like [`Ifd::get_u32`] but fails with [`TiffError::MissingTag`].
    pub fn require_u32(&self, tag: TiffTag) -> Result<u32, TiffError> {
        self.get_u32(tag).ok_or(TiffError::MissingTag(tag.name()))
    }

    pub fn image_width(&self) -> Option<u32> {
        self.get_u32(TiffTag::ImageWidth)
    }

    pub fn image_height(&self) -> Option<u32> {
        self.get_u32(TiffTag::ImageLength)
    }

    pub fn tile_width(&self) -> Option<u32> {
        self.get_u32(TiffTag::TileWidth)
    }

    pub fn tile_height(&self) -> Option<u32> {
        self.get_u32(TiffTag::TileLength)
    }

    /// Compression code, 1 (none) when the tag is absent.
    pub fn compression(&self) -> u16 {
        self.get_u32(TiffTag::Compression).unwrap_or(1) as u16
    }

    /// Samples per pixel, 1 when the tag is absent.
    pub fn samples_per_pixel(&self) -> u32 {
        self.get_u32(TiffTag::SamplesPerPixel).unwrap_or(1)
    }

    /// Rows per strip, the whole image when the tag is absent.
    pub fn rows_per_strip(&self) -> Option<u32> {
        self.get_u32(TiffTag::RowsPerStrip).or_else(|| self.image_height())
    }

    pub fn photometric(&self) -> Option<u32> {
        self.get_u32(TiffTag::PhotometricInterpretation)
    }

    /// Planar configuration, 1 (chunky) when the tag is absent.
    pub fn planar_configuration(&self) -> u32 {
        self.get_u32(TiffTag::PlanarConfiguration).unwrap_or(1)
    }

    pub fn is_tiled(&self) -> bool {
        self.get_entry_by_tag(TiffTag::TileWidth).is_some()
            && self.get_entry_by_tag(TiffTag::TileOffsets).is_some()
    }

    pub fn is_stripped(&self) -> bool {
        !self.is_tiled() && self.get_entry_by_tag(TiffTag::StripOffsets).is_some()
    }
}
