//! Input format detection.
//!
//! TIFF-based slides are recognised by their magic bytes and classified by
//! the first ImageDescription:
//!
//! - **Aperio SVS**: the description contains "Aperio"
//! - **Generic pyramidal TIFF**: anything else with a TIFF or BigTIFF header

use super::svs::is_aperio;
use super::tiff::{ByteOrder, TIFF_HEADER_SIZE};

/// Slide flavour of a TIFF file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlideFormat {
    /// Aperio SVS (JPEGTables, key/value description)
    AperioSvs,
    /// Any other tiled or stripped TIFF
    GenericTiff,
}

impl SlideFormat {
    /// Classify a slide from the ImageDescription of its first IFD.
    pub fn from_description(description: Option<&str>) -> Self {
        match description {
            Some(text) if is_aperio(text) => SlideFormat::AperioSvs,
            _ => SlideFormat::GenericTiff,
        }
    }

    /// Human-readable name.
    pub const fn name(&self) -> &'static str {
        match self {
            SlideFormat::AperioSvs => "Aperio SVS",
            SlideFormat::GenericTiff => "Generic Pyramidal TIFF",
        }
    }

    /// Vendor identifier reported in slide properties.
    pub const fn vendor(&self) -> &'static str {
        match self {
            SlideFormat::AperioSvs => "aperio",
            SlideFormat::GenericTiff => "generic-tiff",
        }
    }
}

/// Whether `bytes` start with a classic TIFF or BigTIFF header.
pub fn is_tiff_header(bytes: &[u8]) -> bool {
    if bytes.len() < TIFF_HEADER_SIZE {
        return false;
    }
    let byte_order = match &bytes[0..2] {
        b"II" => ByteOrder::LittleEndian,
        b"MM" => ByteOrder::BigEndian,
        _ => return false,
    };
    matches!(byte_order.read_u16(&bytes[2..4]), 42 | 43)
}
