//! Reading IFD entry values.
//!
//! Small values sit inline in the entry; arrays such as `TileOffsets` live
//! elsewhere in the file and are fetched with one range read each.

use bytes::Bytes;

use crate::error::TiffError;
use crate::io::RangeReader;

use super::parser::{ByteOrder, IfdEntry, TiffHeader};
use super::tags::FieldType;

/// Upper bound for a single out-of-line value (offset tables, descriptions,
/// JPEG tables). Anything larger is treated as corruption.
const MAX_VALUE_BYTES: u64 = 256 * 1024 * 1024;

/// Reads entry values through a [`RangeReader`] using the file's byte order.
pub struct ValueReader<'a, R: RangeReader + ?Sized> {
    reader: &'a R,
    header: &'a TiffHeader,
}

impl<'a, R: RangeReader + ?Sized> ValueReader<'a, R> {
    pub fn new(reader: &'a R, header: &'a TiffHeader) -> Self {
        Self { reader, header }
    }

    #[inline]
    pub fn byte_order(&self) -> ByteOrder {
        self.header.byte_order
    }

    /// Raw value bytes, inline or fetched from the file.
    pub async fn read_bytes(&self, entry: &IfdEntry) -> Result<Bytes, TiffError> {
        let size = entry
            .value_byte_size()
            .ok_or(TiffError::UnknownFieldType(entry.field_type_raw))?;

        if entry.is_inline {
            return Ok(Bytes::copy_from_slice(&entry.value_field[..size as usize]));
        }
        if size > MAX_VALUE_BYTES {
            return Err(TiffError::InvalidTagValue {
                tag: tag_name(entry),
                message: format!("value of {} bytes is too large", size),
            });
        }

        let offset = entry.value_offset(self.header.byte_order);
        Ok(self.reader.read_exact_at(offset, size as usize).await?)
    }

    /// All values of a SHORT, LONG or LONG8 entry widened to u64.
    pub async fn read_u64_array(&self, entry: &IfdEntry) -> Result<Vec<u64>, TiffError> {
        let field_type = integer_type(entry)?;
        let bytes = self.read_bytes(entry).await?;
        Ok(parse_u64_array(
            &bytes,
            entry.count as usize,
            field_type,
            self.byte_order(),
        ))
    }

    /// All values of a SHORT or LONG entry.
    pub async fn read_u32_array(&self, entry: &IfdEntry) -> Result<Vec<u32>, TiffError> {
        self.read_u64_array(entry)
            .await?
            .into_iter()
            .map(|v| {
                u32::try_from(v).map_err(|_| TiffError::InvalidTagValue {
                    tag: tag_name(entry),
                    message: format!("value {} does not fit in 32 bits", v),
                })
            })
            .collect()
    }

    /// First value of an integer entry.
    pub async fn read_u64(&self, entry: &IfdEntry) -> Result<u64, TiffError> {
        if let Some(value) = entry.inline_u64(self.byte_order()) {
            return Ok(value);
        }
        self.read_u64_array(entry)
            .await?
            .first()
            .copied()
            .ok_or(TiffError::InvalidTagValue {
                tag: tag_name(entry),
                message: "entry has no values".to_string(),
            })
    }

    /// ASCII value with trailing NULs removed.
    pub async fn read_string(&self, entry: &IfdEntry) -> Result<String, TiffError> {
        let bytes = self.read_bytes(entry).await?;
        let text = String::from_utf8_lossy(&bytes);
        Ok(text.trim_end_matches('\0').to_string())
    }

    /// First value of a RATIONAL entry as a float.
    pub async fn read_rational(&self, entry: &IfdEntry) -> Result<f64, TiffError> {
        if entry.field_type != Some(FieldType::Rational) || entry.count == 0 {
            return Err(TiffError::InvalidTagValue {
                tag: tag_name(entry),
                message: format!("expected RATIONAL, got type {}", entry.field_type_raw),
            });
        }
        let bytes = self.read_bytes(entry).await?;
        let numerator = self.byte_order().read_u32(&bytes[0..4]);
        let denominator = self.byte_order().read_u32(&bytes[4..8]);
        if denominator == 0 {
            return Err(TiffError::InvalidTagValue {
                tag: tag_name(entry),
                message: "zero denominator".to_string(),
            });
        }
        Ok(numerator as f64 / denominator as f64)
    }
}

fn tag_name(entry: &IfdEntry) -> &'static str {
    entry.tag().map(|t| t.name()).unwrap_or("unknown tag")
}

fn integer_type(entry: &IfdEntry) -> Result<FieldType, TiffError> {
    match entry.field_type {
        Some(t @ (FieldType::Short | FieldType::Long | FieldType::Long8)) => Ok(t),
        Some(_) => Err(TiffError::InvalidTagValue {
            tag: tag_name(entry),
            message: format!("expected an integer type, got type {}", entry.field_type_raw),
        }),
        None => Err(TiffError::UnknownFieldType(entry.field_type_raw)),
    }
}

/// Decode `count` integers of `field_type` from `bytes`.
///
/// Stops early if `bytes` is shorter than `count` values.
pub fn parse_u64_array(
    bytes: &[u8],
    count: usize,
    field_type: FieldType,
    byte_order: ByteOrder,
) -> Vec<u64> {
    let width = field_type.size_in_bytes();
    bytes
        .chunks_exact(width)
        .take(count)
        .filter_map(|chunk| match field_type {
            FieldType::Short => Some(byte_order.read_u16(chunk) as u64),
            FieldType::Long => Some(byte_order.read_u32(chunk) as u64),
            FieldType::Long8 => Some(byte_order.read_u64(chunk)),
            _ => None,
        })
        .collect()
}
