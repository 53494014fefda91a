//! TIFF field types, tag IDs and compression codes.

// =============================================================================
// Field Types
// =============================================================================

/// How the values of an IFD entry are encoded.
///
/// Only the types that occur in slide files are modelled; entries with any
/// other type keep their raw type code and are skipped by value readers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum FieldType {
    Byte = 1,
    Ascii = 2,
    Short = 3,
    Long = 4,
    /// Two LONGs: numerator, denominator
    Rational = 5,
    Undefined = 7,
    /// BigTIFF only
    Long8 = 16,
}

impl FieldType {
    /// Bytes per value.
    #[inline]
    pub const fn size_in_bytes(self) -> usize {
        match self {
            FieldType::Byte | FieldType::Ascii | FieldType::Undefined => 1,
            FieldType::Short => 2,
            FieldType::Long => 4,
            FieldType::Rational | FieldType::Long8 => 8,
        }
    }

    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(FieldType::Byte),
            2 => Some(FieldType::Ascii),
            3 => Some(FieldType::Short),
            4 => Some(FieldType::Long),
            5 => Some(FieldType::Rational),
            7 => Some(FieldType::Undefined),
            16 => Some(FieldType::Long8),
            _ => None,
        }
    }

    /// Whether `count` values fit in the entry's value field
    /// (4 bytes in classic TIFF, 8 in BigTIFF).
    #[inline]
    pub fn fits_inline(self, count: u64, is_bigtiff: bool) -> bool {
        let limit = if is_bigtiff { 8 } else { 4 };
        (self.size_in_bytes() as u64).saturating_mul(count) <= limit
    }
}

// =============================================================================
// Tags
// =============================================================================

/// Tag IDs the slide reader looks at. Everything else is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum TiffTag {
    NewSubfileType = 254,
    ImageWidth = 256,
    ImageLength = 257,
    BitsPerSample = 258,
    Compression = 259,
    PhotometricInterpretation = 262,
    /// Free text; Aperio stores its key/value metadata here
    ImageDescription = 270,
    StripOffsets = 273,
    SamplesPerPixel = 277,
    RowsPerStrip = 278,
    StripByteCounts = 279,
    XResolution = 282,
    YResolution = 283,
    PlanarConfiguration = 284,
    /// 1 = none, 2 = inch, 3 = centimetre
    ResolutionUnit = 296,
    Software = 305,
    TileWidth = 322,
    TileLength = 323,
    TileOffsets = 324,
    TileByteCounts = 325,
    /// Shared quantization/Huffman tables for abbreviated JPEG tiles
    JpegTables = 347,
}

impl TiffTag {
    pub fn from_u16(value: u16) -> Option<Self> {
        let tag = match value {
            254 => TiffTag::NewSubfileType,
            256 => TiffTag::ImageWidth,
            257 => TiffTag::ImageLength,
            258 => TiffTag::BitsPerSample,
            259 => TiffTag::Compression,
            262 => TiffTag::PhotometricInterpretation,
            270 => TiffTag::ImageDescription,
            273 => TiffTag::StripOffsets,
            277 => TiffTag::SamplesPerPixel,
            278 => TiffTag::RowsPerStrip,
            279 => TiffTag::StripByteCounts,
            282 => TiffTag::XResolution,
            283 => TiffTag::YResolution,
            284 => TiffTag::PlanarConfiguration,
            296 => TiffTag::ResolutionUnit,
            305 => TiffTag::Software,
            322 => TiffTag::TileWidth,
            323 => TiffTag::TileLength,
            324 => TiffTag::TileOffsets,
            325 => TiffTag::TileByteCounts,
            347 => TiffTag::JpegTables,
            _ => return None,
        };
        Some(tag)
    }

    #[inline]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    /// Tag name as used in error messages and metadata keys.
    pub const fn name(self) -> &'static str {
        match self {
            TiffTag::NewSubfileType => "NewSubfileType",
            TiffTag::ImageWidth => "ImageWidth",
            TiffTag::ImageLength => "ImageLength",
            TiffTag::BitsPerSample => "BitsPerSample",
            TiffTag::Compression => "Compression",
            TiffTag::PhotometricInterpretation => "PhotometricInterpretation",
            TiffTag::ImageDescription => "ImageDescription",
            TiffTag::StripOffsets => "StripOffsets",
            TiffTag::SamplesPerPixel => "SamplesPerPixel",
            TiffTag::RowsPerStrip => "RowsPerStrip",
            TiffTag::StripByteCounts => "StripByteCounts",
            TiffTag::XResolution => "XResolution",
            TiffTag::YResolution => "YResolution",
            TiffTag::PlanarConfiguration => "PlanarConfiguration",
            TiffTag::ResolutionUnit => "ResolutionUnit",
            TiffTag::Software => "Software",
            TiffTag::TileWidth => "TileWidth",
            TiffTag::TileLength => "TileLength",
            TiffTag::TileOffsets => "TileOffsets",
            TiffTag::TileByteCounts => "TileByteCounts",
            TiffTag::JpegTables => "JPEGTables",
        }
    }
}

// =============================================================================
// Compression
// =============================================================================

/// Compression codes seen in slide files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Compression {
    None = 1,
    Lzw = 5,
    OldJpeg = 6,
    Jpeg = 7,
    Deflate = 8,
    AdobeDeflate = 32946,
    /// Aperio JPEG 2000, YCbCr
    Jpeg2000YCbCr = 33003,
    /// Aperio JPEG 2000, RGB
    Jpeg2000Rgb = 33005,
}

impl Compression {
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(Compression::None),
            5 => Some(Compression::Lzw),
            6 => Some(Compression::OldJpeg),
            7 => Some(Compression::Jpeg),
            8 => Some(Compression::Deflate),
            32946 => Some(Compression::AdobeDeflate),
            33003 => Some(Compression::Jpeg2000YCbCr),
            33005 => Some(Compression::Jpeg2000Rgb),
            _ => None,
        }
    }

    /// Whether tiles with this compression can be decoded.
    #[inline]
    pub const fn is_supported(self) -> bool {
        matches!(self, Compression::None | Compression::Jpeg)
    }

    pub const fn name(self) -> &'static str {
        match self {
            Compression::None => "None",
            Compression::Lzw => "LZW",
            Compression::OldJpeg => "Old JPEG",
            Compression::Jpeg => "JPEG",
            Compression::Deflate => "Deflate",
            Compression::AdobeDeflate => "Adobe Deflate",
            Compression::Jpeg2000YCbCr => "JPEG 2000 (YCbCr)",
            Compression::Jpeg2000Rgb => "JPEG 2000 (RGB)",
        }
    }

    /// Display name for a raw compression code, known or not.
    pub fn describe(value: u16) -> String {
        match Compression::from_u16(value) {
            Some(c) => c.name().to_string(),
            None => format!("unknown ({})", value),
        }
    }
}
