//! In-memory raster buffers.
//!
//! Samples are stored band-interleaved, row-major, top row first. Multi-byte
//! samples are little-endian; sub-byte samples take a whole byte each. The
//! optional mask holds one byte per pixel: `0` is transparent, anything else
//! is opaque.

use crate::error::{RasterError, Result};
use crate::palette::Palette;
use crate::pixel::{Pixel, SampleValue};
use crate::types::{validate_format, PixelType, SampleType};

#[derive(Debug, Clone, PartialEq)]
pub struct Raster {
    width: u32,
    height: u32,
    sample_type: SampleType,
    pixel_type: PixelType,
    num_bands: u8,
    buffer: Vec<u8>,
    mask: Option<Vec<u8>>,
    no_data: Option<Pixel>,
    palette: Option<Palette>,
}

impl Raster {
    /// Wrap an existing pixel buffer, checking its size and sample ranges.
    pub fn new(
        width: u32,
        height: u32,
        sample_type: SampleType,
        pixel_type: PixelType,
        num_bands: u8,
        buffer: Vec<u8>,
        mask: Option<Vec<u8>>,
    ) -> Result<Self> {
        validate_format(sample_type, pixel_type, num_bands)?;
        if width == 0 || height == 0 {
            return Err(RasterError::invalid_format("raster dimensions must be > 0"));
        }

        let pixels = width as usize * height as usize;
        let expected = pixels * num_bands as usize * sample_type.bytes_per_sample();
        if buffer.len() != expected {
            return Err(RasterError::BufferSize {
                expected,
                actual: buffer.len(),
            });
        }
        if let Some(mask) = &mask {
            if mask.len() != pixels {
                return Err(RasterError::BufferSize {
                    expected: pixels,
                    actual: mask.len(),
                });
            }
        }
        if let Some(max) = sample_type.sub_byte_max() {
            if let Some(v) = buffer.iter().find(|&&v| v > max) {
                return Err(RasterError::invalid_sample(format!(
                    "{} exceeds {} range",
                    v, sample_type
                )));
            }
        }

        Ok(Self {
            width,
            height,
            sample_type,
            pixel_type,
            num_bands,
            buffer,
            mask,
            no_data: None,
            palette: None,
        })
    }

    /// A raster with every pixel set to `fill` (or zero when `None`).
    pub fn filled(
        width: u32,
        height: u32,
        sample_type: SampleType,
        pixel_type: PixelType,
        num_bands: u8,
        fill: Option<&Pixel>,
    ) -> Result<Self> {
        let bpp = num_bands as usize * sample_type.bytes_per_sample();
        let pixel_bytes = match fill {
            Some(p) => {
                if !p.matches(sample_type, pixel_type, num_bands) {
                    return Err(RasterError::mismatch("fill pixel does not match raster"));
                }
                p.to_le_bytes()
            }
            None => vec![0u8; bpp],
        };
        let pixels = width as usize * height as usize;
        let mut buffer = Vec::with_capacity(pixels * bpp);
        for _ in 0..pixels {
            buffer.extend_from_slice(&pixel_bytes);
        }
        Self::new(width, height, sample_type, pixel_type, num_bands, buffer, None)
    }

    /// Attach a no-data pixel; it must match the raster layout.
    pub fn with_no_data(mut self, no_data: Option<Pixel>) -> Result<Self> {
        if let Some(p) = &no_data {
            if !p.matches(self.sample_type, self.pixel_type, self.num_bands) {
                return Err(RasterError::mismatch(
                    "no-data pixel does not match raster layout",
                ));
            }
        }
        self.no_data = no_data;
        Ok(self)
    }

    /// Attach a palette; only PALETTE rasters accept one and every index must resolve.
    pub fn with_palette(mut self, palette: Palette) -> Result<Self> {
        if self.pixel_type != PixelType::Palette {
            return Err(RasterError::InvalidPalette(format!(
                "{} rasters do not take a palette",
                self.pixel_type
            )));
        }
        if !palette.fits(self.sample_type) {
            return Err(RasterError::InvalidPalette(format!(
                "{} entries exceed {} range",
                palette.len(),
                self.sample_type
            )));
        }
        if let Some(idx) = self.buffer.iter().find(|&&i| i as usize >= palette.len()) {
            return Err(RasterError::InvalidPalette(format!(
                "pixel index {} has no palette entry",
                idx
            )));
        }
        self.palette = Some(palette);
        Ok(self)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn sample_type(&self) -> SampleType {
        self.sample_type
    }

    pub fn pixel_type(&self) -> PixelType {
        self.pixel_type
    }

    pub fn num_bands(&self) -> u8 {
        self.num_bands
    }

    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.buffer
    }

    pub fn into_buffer(self) -> Vec<u8> {
        self.buffer
    }

    pub fn mask(&self) -> Option<&[u8]> {
        self.mask.as_deref()
    }

    pub fn no_data(&self) -> Option<&Pixel> {
        self.no_data.as_ref()
    }

    pub fn palette(&self) -> Option<&Palette> {
        self.palette.as_ref()
    }

    /// Bytes occupied by one pixel.
    pub fn bytes_per_pixel(&self) -> usize {
        self.num_bands as usize * self.sample_type.bytes_per_sample()
    }

    /// Bytes occupied by one row.
    pub fn row_stride(&self) -> usize {
        self.width as usize * self.bytes_per_pixel()
    }

    /// Raw bytes of one pixel.
    pub fn pixel_bytes(&self, row: u32, col: u32) -> &[u8] {
        let bpp = self.bytes_per_pixel();
        let start = (row as usize * self.width as usize + col as usize) * bpp;
        &self.buffer[start..start + bpp]
    }

    /// Mutable raw bytes of one pixel.
    pub fn pixel_bytes_mut(&mut self, row: u32, col: u32) -> &mut [u8] {
        let bpp = self.bytes_per_pixel();
        let start = (row as usize * self.width as usize + col as usize) * bpp;
        &mut self.buffer[start..start + bpp]
    }

    /// Whether the mask (if any) marks the pixel as opaque.
    pub fn is_opaque(&self, row: u32, col: u32) -> bool {
        match &self.mask {
            Some(mask) => mask[row as usize * self.width as usize + col as usize] != 0,
            None => true,
        }
    }

    /// Typed value of one pixel.
    pub fn get_pixel(&self, row: u32, col: u32) -> Result<Pixel> {
        if row >= self.height || col >= self.width {
            return Err(RasterError::invalid_sample(format!(
                "pixel ({}, {}) outside {}x{} raster",
                row, col, self.width, self.height
            )));
        }
        let bps = self.sample_type.bytes_per_sample();
        let samples = self
            .pixel_bytes(row, col)
            .chunks_exact(bps)
            .map(|b| SampleValue::read_le(self.sample_type, b))
            .collect();
        let mut pixel = Pixel::with_samples(self.sample_type, self.pixel_type, samples)?;
        pixel.set_transparent(!self.is_opaque(row, col));
        Ok(pixel)
    }

    /// Sample of one band as `f64`.
    pub fn sample_f64(&self, row: u32, col: u32, band: usize) -> f64 {
        let bps = self.sample_type.bytes_per_sample();
        let px = self.pixel_bytes(row, col);
        SampleValue::read_le(self.sample_type, &px[band * bps..(band + 1) * bps]).as_f64()
    }

    /// Copy a window into a new raster of `width` x `height`.
    ///
    /// Cells outside this raster are filled with `fill` (or zero) and masked
    /// transparent; the source mask is carried over for cells inside.
    pub fn window(
        &self,
        row: u32,
        col: u32,
        width: u32,
        height: u32,
        fill: Option<&Pixel>,
    ) -> Result<Raster> {
        let mut out = Raster::filled(
            width,
            height,
            self.sample_type,
            self.pixel_type,
            self.num_bands,
            fill,
        )?;
        let mut mask = vec![0u8; width as usize * height as usize];
        let mut padded = false;
        let bpp = self.bytes_per_pixel();

        for r in 0..height {
            let src_row = row + r;
            if src_row >= self.height {
                padded = true;
                continue;
            }
            let cols = width.min(self.width.saturating_sub(col));
            if cols < width {
                padded = true;
            }
            if cols == 0 {
                continue;
            }
            let src_start = (src_row as usize * self.width as usize + col as usize) * bpp;
            let dst_start = r as usize * width as usize * bpp;
            let len = cols as usize * bpp;
            out.buffer[dst_start..dst_start + len]
                .copy_from_slice(&self.buffer[src_start..src_start + len]);
            for c in 0..cols {
                mask[r as usize * width as usize + c as usize] =
                    u8::from(self.is_opaque(src_row, col + c));
            }
        }

        if padded || self.mask.is_some() {
            out.mask = Some(mask);
        }
        out.no_data = self.no_data.clone();
        out.palette = self.palette.clone();
        Ok(out)
    }
}
