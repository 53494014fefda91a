//! Abbreviated JPEG streams.
//!
//! JPEG-compressed TIFF tiles often leave out their quantization and Huffman
//! tables. The tables are stored once per image in the `JPEGTables` tag, as a
//! stream of its own (`SOI tables EOI`). A decodable tile is the tables
//! stream without its `EOI` followed by the tile stream without its `SOI`.

use bytes::{Bytes, BytesMut};

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];

const MARKER_DHT: u8 = 0xC4;
const MARKER_DQT: u8 = 0xDB;
const MARKER_SOS: u8 = 0xDA;

/// What the header segments of a stream contain, up to the first scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamTables {
    /// DQT or DHT found before the first scan
    Present,
    /// Scan starts without any table segment
    Missing,
    /// Not a JPEG stream, or no scan found
    Unknown,
}

fn scan_tables(data: &[u8]) -> StreamTables {
    if !data.starts_with(&SOI) {
        return StreamTables::Unknown;
    }

    let mut pos = SOI.len();
    while pos + 1 < data.len() {
        if data[pos] != 0xFF {
            pos += 1;
            continue;
        }
        match data[pos + 1] {
            MARKER_DQT | MARKER_DHT => return StreamTables::Present,
            MARKER_SOS => return StreamTables::Missing,
            // Fill bytes and standalone markers carry no length
            0xFF => pos += 1,
            0x00 | 0x01 | 0xD0..=0xD9 => pos += 2,
            _ => {
                if pos + 3 >= data.len() {
                    break;
                }
                let length = u16::from_be_bytes([data[pos + 2], data[pos + 3]]) as usize;
                pos += 2 + length.max(2);
            }
        }
    }
    StreamTables::Unknown
}

/// Whether `data` starts a scan without defining any tables first.
pub fn is_abbreviated_stream(data: &[u8]) -> bool {
    scan_tables(data) == StreamTables::Missing
}

/// Whether `data` defines its own tables.
pub fn has_tables(data: &[u8]) -> bool {
    scan_tables(data) == StreamTables::Present
}

/// Splice a `JPEGTables` stream in front of an abbreviated tile stream.
pub fn merge_jpeg_tables(tables: &[u8], tile: &[u8]) -> Bytes {
    if tables.is_empty() {
        return Bytes::copy_from_slice(tile);
    }
    let tables = tables.strip_suffix(&EOI).unwrap_or(tables);
    let tile = tile.strip_prefix(&SOI).unwrap_or(tile);

    let mut merged = BytesMut::with_capacity(tables.len() + tile.len());
    merged.extend_from_slice(tables);
    merged.extend_from_slice(tile);
    merged.freeze()
}

/// Tile bytes ready for a JPEG decoder.
///
/// Tables are only merged into tiles that lack them; complete tiles and
/// tiles of images without `JPEGTables` pass through untouched.
pub fn prepare_tile_jpeg(tables: Option<&[u8]>, tile: Bytes) -> Bytes {
    match tables {
        Some(tables) if is_abbreviated_stream(&tile) => merge_jpeg_tables(tables, &tile),
        _ => tile,
    }
}
