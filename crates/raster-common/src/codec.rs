//! Tile BLOB codec.
//!
//! A tile is stored as one or two BLOBs. Base-level tiles are split into an
//! "odd" BLOB holding rows 0, 2, 4, ... and an "even" BLOB holding rows
//! 1, 3, 5, ..., so a 1:2 read only needs the odd half. Pyramid tiles keep
//! every row in a single odd BLOB.
//!
//! Layout of each BLOB (integers little-endian):
//!
//! ```text
//! 0x00 | marker | flags | compression | sample | pixel | bands
//! width:u16 | height:u16 | rows:u16
//! payload_len:u32 | payload
//! mask_len:u32 | deflated mask (0 bytes when unmasked)
//! crc32:u32 | 0xC8
//! ```

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression as DeflateLevel;
use image::codecs::png::PngEncoder;
use image::{ColorType, GenericImageView, ImageEncoder, ImageFormat};
use tracing::trace;

use crate::error::{RasterError, Result};
use crate::raster::Raster;
use crate::types::{Compression, PixelType, SampleType, Scale};

const TILE_START: u8 = 0x00;
const ODD_MARKER: u8 = 0xC9;
const EVEN_MARKER: u8 = 0xDA;
const TILE_END: u8 = 0xC8;

const FLAG_SPLIT: u8 = 0x01;
const FLAG_MASK: u8 = 0x02;

const HEADER_LEN: usize = 17;

/// The pair of BLOBs stored for one tile.
#[derive(Debug, Clone, PartialEq)]
pub struct TileBlobs {
    pub odd: Vec<u8>,
    pub even: Option<Vec<u8>>,
}

/// Which half of a tile a BLOB carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileHalf {
    Odd,
    Even,
}

/// Parsed header of a tile BLOB.
#[derive(Debug, Clone, PartialEq)]
pub struct TileHeader {
    pub half: TileHalf,
    pub split: bool,
    pub has_mask: bool,
    pub compression: Compression,
    pub sample_type: SampleType,
    pub pixel_type: PixelType,
    pub num_bands: u8,
    pub width: u16,
    pub height: u16,
    pub rows: u16,
}

impl TileHeader {
    fn bytes_per_pixel(&self) -> usize {
        self.num_bands as usize * self.sample_type.bytes_per_sample()
    }

    fn same_layout(&self, other: &TileHeader) -> bool {
        self.split == other.split
            && self.compression == other.compression
            && self.sample_type == other.sample_type
            && self.pixel_type == other.pixel_type
            && self.num_bands == other.num_bands
            && self.width == other.width
            && self.height == other.height
    }
}

/// What a coverage expects of every tile it stores.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileFormat {
    pub tile_width: u32,
    pub tile_height: u32,
    pub sample_type: SampleType,
    pub pixel_type: PixelType,
    pub num_bands: u8,
    pub compression: Compression,
}

/// Encode a raster as tile BLOBs.
///
/// With `split` the rows are divided between an odd and an even BLOB;
/// otherwise a single odd BLOB holds the whole tile.
pub fn encode_tile(raster: &Raster, compression: Compression, split: bool) -> Result<TileBlobs> {
    if !compression.supports(raster.sample_type(), raster.num_bands()) {
        return Err(RasterError::UnsupportedCompression {
            compression: compression.to_string(),
            layout: format!("{} x{}", raster.sample_type(), raster.num_bands()),
        });
    }
    if raster.width() > u16::MAX as u32 || raster.height() > u16::MAX as u32 {
        return Err(RasterError::invalid_format("tile dimensions exceed 65535"));
    }
    if split && raster.height() < 2 {
        return Err(RasterError::invalid_format("a split tile needs at least two rows"));
    }

    let stride = raster.row_stride();
    let width = raster.width() as usize;
    let gather = |start: usize, step: usize| -> (Vec<u8>, Option<Vec<u8>>, u16) {
        let mut pixels = Vec::new();
        let mut mask = raster.mask().map(|_| Vec::new());
        let mut rows = 0u16;
        for row in (start..raster.height() as usize).step_by(step) {
            pixels.extend_from_slice(&raster.buffer()[row * stride..(row + 1) * stride]);
            if let (Some(dst), Some(src)) = (mask.as_mut(), raster.mask()) {
                dst.extend_from_slice(&src[row * width..(row + 1) * width]);
            }
            rows += 1;
        }
        (pixels, mask, rows)
    };

    if split {
        let (odd_px, odd_mask, odd_rows) = gather(0, 2);
        let (even_px, even_mask, even_rows) = gather(1, 2);
        let odd = write_blob(
            raster,
            compression,
            TileHalf::Odd,
            true,
            odd_rows,
            &odd_px,
            odd_mask.as_deref(),
        )?;
        let even = write_blob(
            raster,
            compression,
            TileHalf::Even,
            true,
            even_rows,
            &even_px,
            even_mask.as_deref(),
        )?;
        trace!(odd = odd.len(), even = even.len(), "Encoded split tile");
        Ok(TileBlobs {
            odd,
            even: Some(even),
        })
    } else {
        let odd = write_blob(
            raster,
            compression,
            TileHalf::Odd,
            false,
            raster.height() as u16,
            raster.buffer(),
            raster.mask(),
        )?;
        Ok(TileBlobs { odd, even: None })
    }
}

fn write_blob(
    raster: &Raster,
    compression: Compression,
    half: TileHalf,
    split: bool,
    rows: u16,
    pixels: &[u8],
    mask: Option<&[u8]>,
) -> Result<Vec<u8>> {
    let payload = compress(
        pixels,
        compression,
        raster.width(),
        rows as u32,
        raster.num_bands(),
    )?;
    let mask_payload = match mask {
        Some(m) => deflate(m)?,
        None => Vec::new(),
    };

    let mut flags = 0u8;
    if split {
        flags |= FLAG_SPLIT;
    }
    if mask.is_some() {
        flags |= FLAG_MASK;
    }

    let mut blob = Vec::with_capacity(HEADER_LEN + payload.len() + mask_payload.len() + 9);
    blob.push(TILE_START);
    blob.push(match half {
        TileHalf::Odd => ODD_MARKER,
        TileHalf::Even => EVEN_MARKER,
    });
    blob.push(flags);
    blob.push(compression.code());
    blob.push(raster.sample_type().code());
    blob.push(raster.pixel_type().code());
    blob.push(raster.num_bands());
    blob.extend_from_slice(&(raster.width() as u16).to_le_bytes());
    blob.extend_from_slice(&(raster.height() as u16).to_le_bytes());
    blob.extend_from_slice(&rows.to_le_bytes());
    blob.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    blob.extend_from_slice(&payload);
    blob.extend_from_slice(&(mask_payload.len() as u32).to_le_bytes());
    blob.extend_from_slice(&mask_payload);
    let crc = crc32fast::hash(&blob);
    blob.extend_from_slice(&crc.to_le_bytes());
    blob.push(TILE_END);
    Ok(blob)
}

fn compress(data: &[u8], compression: Compression, width: u32, rows: u32, bands: u8) -> Result<Vec<u8>> {
    match compression {
        Compression::None => Ok(data.to_vec()),
        Compression::Deflate => deflate(data),
        Compression::Png => {
            let color = png_color(bands)?;
            let mut out = Vec::new();
            PngEncoder::new(&mut out).write_image(data, width, rows, color)?;
            Ok(out)
        }
        other => Err(RasterError::UnsupportedCompression {
            compression: other.to_string(),
            layout: format!("{} band(s)", bands),
        }),
    }
}

fn decompress(header: &TileHeader, payload: &[u8]) -> Result<Vec<u8>> {
    let expected = header.width as usize * header.rows as usize * header.bytes_per_pixel();
    let data = match header.compression {
        Compression::None => payload.to_vec(),
        Compression::Deflate => inflate(payload)?,
        Compression::Png => {
            let img = image::load_from_memory_with_format(payload, ImageFormat::Png)?;
            if img.dimensions() != (header.width as u32, header.rows as u32) {
                return Err(RasterError::malformed("tile", "PNG dimensions disagree with header"));
            }
            if img.color() != png_color(header.num_bands)? {
                return Err(RasterError::malformed("tile", "PNG color type disagrees with header"));
            }
            img.into_bytes()
        }
        other => {
            return Err(RasterError::UnsupportedCompression {
                compression: other.to_string(),
                layout: format!("{} x{}", header.sample_type, header.num_bands),
            })
        }
    };
    if data.len() != expected {
        return Err(RasterError::BufferSize {
            expected,
            actual: data.len(),
        });
    }
    Ok(data)
}

fn png_color(bands: u8) -> Result<ColorType> {
    match bands {
        1 => Ok(ColorType::L8),
        2 => Ok(ColorType::La8),
        3 => Ok(ColorType::Rgb8),
        4 => Ok(ColorType::Rgba8),
        n => Err(RasterError::UnsupportedCompression {
            compression: Compression::Png.to_string(),
            layout: format!("{} band(s)", n),
        }),
    }
}

fn deflate(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), DeflateLevel::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

fn inflate(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

/// Parse and checksum a tile BLOB's framing, returning its header together
/// with the raw payload and mask sections.
fn parse_blob(blob: &[u8]) -> Result<(TileHeader, &[u8], &[u8])> {
    let bad = |reason: &str| RasterError::malformed("tile", reason);

    if blob.len() < HEADER_LEN + 9 || blob[0] != TILE_START {
        return Err(bad("missing start marker"));
    }
    if blob[blob.len() - 1] != TILE_END {
        return Err(bad("missing end marker"));
    }
    let crc_at = blob.len() - 5;
    let crc = u32::from_le_bytes([blob[crc_at], blob[crc_at + 1], blob[crc_at + 2], blob[crc_at + 3]]);
    if crc32fast::hash(&blob[..crc_at]) != crc {
        return Err(bad("checksum mismatch"));
    }

    let half = match blob[1] {
        ODD_MARKER => TileHalf::Odd,
        EVEN_MARKER => TileHalf::Even,
        _ => return Err(bad("unknown half marker")),
    };
    let flags = blob[2];
    let compression = Compression::from_code(blob[3]).ok_or_else(|| bad("compression"))?;
    let sample_type = SampleType::from_code(blob[4]).ok_or_else(|| bad("sample type"))?;
    let pixel_type = PixelType::from_code(blob[5]).ok_or_else(|| bad("pixel type"))?;
    let u16_at = |at: usize| u16::from_le_bytes([blob[at], blob[at + 1]]);
    let header = TileHeader {
        half,
        split: flags & FLAG_SPLIT != 0,
        has_mask: flags & FLAG_MASK != 0,
        compression,
        sample_type,
        pixel_type,
        num_bands: blob[6],
        width: u16_at(7),
        height: u16_at(9),
        rows: u16_at(11),
    };

    let body = &blob[..crc_at];
    let u32_at = |at: usize| -> Option<usize> {
        body.get(at..at + 4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as usize)
    };
    let payload_len = u32_at(13).ok_or_else(|| bad("truncated payload length"))?;
    let payload_end = HEADER_LEN + payload_len;
    let payload = body
        .get(HEADER_LEN..payload_end)
        .ok_or_else(|| bad("truncated payload"))?;
    let mask_len = u32_at(payload_end).ok_or_else(|| bad("truncated mask length"))?;
    let mask_start = payload_end + 4;
    if mask_start + mask_len != body.len() {
        return Err(bad("unexpected length"));
    }
    let mask = &body[mask_start..];
    if header.has_mask == mask.is_empty() {
        return Err(bad("mask flag disagrees with mask section"));
    }
    Ok((header, payload, mask))
}

/// Read the header of a tile BLOB, verifying its framing and checksum.
pub fn read_header(blob: &[u8]) -> Result<TileHeader> {
    parse_blob(blob).map(|(header, _, _)| header)
}

struct Half {
    header: TileHeader,
    pixels: Vec<u8>,
    mask: Option<Vec<u8>>,
}

fn decode_half(blob: &[u8]) -> Result<Half> {
    let (header, payload, mask) = parse_blob(blob)?;
    let pixels = decompress(&header, payload)?;
    let mask = if header.has_mask {
        let m = inflate(mask)?;
        if m.len() != header.width as usize * header.rows as usize {
            return Err(RasterError::malformed("tile", "mask size disagrees with header"));
        }
        Some(m)
    } else {
        None
    };
    Ok(Half {
        header,
        pixels,
        mask,
    })
}

/// Decode a tile at the requested scale.
///
/// A split tile read at 1:1 needs both halves; any coarser scale reads the
/// odd half only. The result is `ceil(width / s) x ceil(height / s)`.
pub fn decode_tile(odd: &[u8], even: Option<&[u8]>, scale: Scale) -> Result<Raster> {
    let odd = decode_half(odd)?;
    let h = odd.header.clone();
    if h.half != TileHalf::Odd {
        return Err(RasterError::malformed("tile", "first BLOB is not an odd half"));
    }
    let width = h.width as usize;
    let height = h.height as usize;
    let bpp = h.bytes_per_pixel();
    let s = scale.factor() as usize;

    // (pixels, mask, source rows, row step)
    let (pixels, mask, rows, row_step) = if h.split {
        if scale == Scale::Full {
            let even_blob = even.ok_or_else(|| {
                RasterError::malformed("tile", "even half required for a 1:1 read")
            })?;
            let even = decode_half(even_blob)?;
            if even.header.half != TileHalf::Even || !even.header.same_layout(&h) {
                return Err(RasterError::mismatch("odd and even halves disagree"));
            }
            if h.rows as usize != height.div_ceil(2) || even.header.rows as usize != height / 2 {
                return Err(RasterError::malformed("tile", "row counts disagree with height"));
            }
            let (pixels, mask) = interleave(&odd, &even, width, height, bpp);
            (pixels, mask, height, 1)
        } else {
            (odd.pixels, odd.mask, h.rows as usize, s / 2)
        }
    } else {
        if h.rows != h.height {
            return Err(RasterError::malformed("tile", "unsplit tile must hold every row"));
        }
        (odd.pixels, odd.mask, height, s)
    };

    let out_w = width.div_ceil(s);
    let out_h = rows.div_ceil(row_step);
    let (buffer, out_mask) = if row_step == 1 && s == 1 {
        (pixels, mask)
    } else {
        let mut buffer = Vec::with_capacity(out_w * out_h * bpp);
        let mut out_mask = mask.as_ref().map(|_| Vec::with_capacity(out_w * out_h));
        for r in (0..rows).step_by(row_step) {
            for c in (0..width).step_by(s) {
                let at = (r * width + c) * bpp;
                buffer.extend_from_slice(&pixels[at..at + bpp]);
                if let (Some(dst), Some(src)) = (out_mask.as_mut(), mask.as_ref()) {
                    dst.push(src[r * width + c]);
                }
            }
        }
        (buffer, out_mask)
    };

    Raster::new(
        out_w as u32,
        out_h as u32,
        h.sample_type,
        h.pixel_type,
        h.num_bands,
        buffer,
        out_mask,
    )
}

fn interleave(odd: &Half, even: &Half, width: usize, height: usize, bpp: usize) -> (Vec<u8>, Option<Vec<u8>>) {
    let stride = width * bpp;
    let mut pixels = Vec::with_capacity(height * stride);
    let want_mask = odd.mask.is_some() || even.mask.is_some();
    let mut mask = if want_mask {
        Some(Vec::with_capacity(height * width))
    } else {
        None
    };
    for row in 0..height {
        let (half, idx) = if row % 2 == 0 { (odd, row / 2) } else { (even, row / 2) };
        pixels.extend_from_slice(&half.pixels[idx * stride..(idx + 1) * stride]);
        if let Some(dst) = mask.as_mut() {
            match &half.mask {
                Some(src) => dst.extend_from_slice(&src[idx * width..(idx + 1) * width]),
                None => dst.extend(std::iter::repeat(1u8).take(width)),
            }
        }
    }
    (pixels, mask)
}

/// Check a stored tile against the coverage format it belongs to.
///
/// Only framing, checksums and header fields are inspected; payloads are
/// not decompressed. The even half must be present exactly when the tile
/// belongs to pyramid level 0.
pub fn validate_tile(odd: &[u8], even: Option<&[u8]>, level: i32, format: &TileFormat) -> Result<()> {
    let h = read_header(odd)?;
    if h.half != TileHalf::Odd {
        return Err(RasterError::mismatch("first BLOB is not an odd half"));
    }
    if h.compression != format.compression
        || h.sample_type != format.sample_type
        || h.pixel_type != format.pixel_type
        || h.num_bands != format.num_bands
    {
        return Err(RasterError::mismatch(format!(
            "tile is {}/{}/{} bands/{}, coverage expects {}/{}/{} bands/{}",
            h.sample_type,
            h.pixel_type,
            h.num_bands,
            h.compression,
            format.sample_type,
            format.pixel_type,
            format.num_bands,
            format.compression
        )));
    }
    if h.width as u32 != format.tile_width || h.height as u32 != format.tile_height {
        return Err(RasterError::mismatch(format!(
            "tile is {}x{}, coverage expects {}x{}",
            h.width, h.height, format.tile_width, format.tile_height
        )));
    }

    match (level, even) {
        (0, Some(even)) => {
            let e = read_header(even)?;
            if !h.split || e.half != TileHalf::Even || !e.same_layout(&h) {
                return Err(RasterError::mismatch("odd and even halves disagree"));
            }
            if h.rows as u32 != format.tile_height.div_ceil(2) || e.rows as u32 != format.tile_height / 2 {
                return Err(RasterError::mismatch("split row counts disagree with tile height"));
            }
            Ok(())
        }
        (0, None) => Err(RasterError::mismatch("level 0 tiles need an even half")),
        (_, Some(_)) => Err(RasterError::mismatch("pyramid tiles carry no even half")),
        (_, None) => {
            if h.split || h.rows as u32 != format.tile_height {
                return Err(RasterError::mismatch("pyramid tile must hold every row"));
            }
            Ok(())
        }
    }
}

/// Boolean form of [`validate_tile`].
pub fn is_valid_tile(odd: &[u8], even: Option<&[u8]>, level: i32, format: &TileFormat) -> bool {
    validate_tile(odd, even, level, format).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gray(width: u32, height: u32) -> Raster {
        let buffer = (0..width * height).map(|v| (v % 251) as u8).collect();
        Raster::new(width, height, SampleType::UInt8, PixelType::Grayscale, 1, buffer, None)
            .unwrap()
    }

    fn format(w: u32, h: u32, compression: Compression) -> TileFormat {
        TileFormat {
            tile_width: w,
            tile_height: h,
            sample_type: SampleType::UInt8,
            pixel_type: PixelType::Grayscale,
            num_bands: 1,
            compression,
        }
    }

    #[test]
    fn test_split_full_scale_roundtrip() {
        let raster = gray(16, 16);
        for compression in [Compression::None, Compression::Deflate, Compression::Png] {
            let blobs = encode_tile(&raster, compression, true).unwrap();
            assert!(blobs.even.is_some());
            let decoded = decode_tile(&blobs.odd, blobs.even.as_deref(), Scale::Full).unwrap();
            assert_eq!(decoded, raster, "{}", compression);
        }
    }

    #[test]
    fn test_split_full_scale_requires_even() {
        let blobs = encode_tile(&gray(16, 16), Compression::None, true).unwrap();
        assert!(decode_tile(&blobs.odd, None, Scale::Full).is_err());
    }

    #[test]
    fn test_split_decimated_reads_odd_only() {
        let raster = gray(16, 16);
        let blobs = encode_tile(&raster, Compression::Deflate, true).unwrap();
        for scale in [Scale::Half, Scale::Quarter, Scale::Eighth] {
            let s = scale.factor();
            let out = decode_tile(&blobs.odd, None, scale).unwrap();
            assert_eq!((out.width(), out.height()), (16 / s, 16 / s));
            for r in 0..out.height() {
                for c in 0..out.width() {
                    assert_eq!(out.pixel_bytes(r, c), raster.pixel_bytes(r * s, c * s));
                }
            }
        }
    }

    #[test]
    fn test_unsplit_decimation_rounds_up() {
        let raster = gray(10, 10);
        let blobs = encode_tile(&raster, Compression::None, false).unwrap();
        assert!(blobs.even.is_none());
        let out = decode_tile(&blobs.odd, None, Scale::Quarter).unwrap();
        assert_eq!((out.width(), out.height()), (3, 3));
        assert_eq!(out.pixel_bytes(2, 2), raster.pixel_bytes(8, 8));
    }

    #[test]
    fn test_mask_survives_split() {
        let raster = gray(4, 4).window(0, 0, 6, 6, None).unwrap();
        let blobs = encode_tile(&raster, Compression::Deflate, true).unwrap();
        let decoded = decode_tile(&blobs.odd, blobs.even.as_deref(), Scale::Full).unwrap();
        assert_eq!(decoded.mask(), raster.mask());
        assert!(!decoded.is_opaque(5, 0));
        assert!(decoded.is_opaque(3, 3));
    }

    #[test]
    fn test_multiband_uint16_deflate() {
        let buffer: Vec<u8> = (0..8 * 8 * 4).flat_map(|v: u16| (v * 37).to_le_bytes()).collect();
        let raster =
            Raster::new(8, 8, SampleType::UInt16, PixelType::Multiband, 4, buffer, None).unwrap();
        let blobs = encode_tile(&raster, Compression::Deflate, true).unwrap();
        let decoded = decode_tile(&blobs.odd, blobs.even.as_deref(), Scale::Full).unwrap();
        assert_eq!(decoded, raster);
        assert!(encode_tile(&raster, Compression::Png, true).is_err());
    }

    #[test]
    fn test_corruption_detected() {
        let blobs = encode_tile(&gray(16, 16), Compression::None, true).unwrap();
        let mut odd = blobs.odd.clone();
        odd[HEADER_LEN + 3] ^= 0xff;
        assert!(read_header(&odd).is_err());
        assert!(decode_tile(&odd, blobs.even.as_deref(), Scale::Full).is_err());
    }

    #[test]
    fn test_validate_tile_levels() {
        let raster = gray(16, 16);
        let fmt = format(16, 16, Compression::Deflate);
        let base = encode_tile(&raster, Compression::Deflate, true).unwrap();
        assert!(is_valid_tile(&base.odd, base.even.as_deref(), 0, &fmt));
        assert!(!is_valid_tile(&base.odd, None, 0, &fmt));
        assert!(!is_valid_tile(&base.odd, base.even.as_deref(), 1, &fmt));

        let pyramid = encode_tile(&raster, Compression::Deflate, false).unwrap();
        assert!(is_valid_tile(&pyramid.odd, None, 2, &fmt));
        assert!(!is_valid_tile(&pyramid.odd, None, 0, &fmt));
    }

    #[test]
    fn test_validate_tile_format_mismatch() {
        let blobs = encode_tile(&gray(16, 16), Compression::Deflate, true).unwrap();
        let wrong_size = format(32, 32, Compression::Deflate);
        assert!(validate_tile(&blobs.odd, blobs.even.as_deref(), 0, &wrong_size).is_err());
        let wrong_codec = format(16, 16, Compression::Png);
        assert!(validate_tile(&blobs.odd, blobs.even.as_deref(), 0, &wrong_codec).is_err());
        // swapped halves
        let even = blobs.even.unwrap();
        assert!(validate_tile(&even, Some(&blobs.odd), 0, &format(16, 16, Compression::Deflate)).is_err());
    }
}
