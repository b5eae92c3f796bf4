//! Output buffer allocation and priming.

use raster_common::{Pixel, PixelType, Raster, SampleType, SampleValue};

use crate::error::{Result, StoreError};

/// Value written to NDVI cells that have no valid input.
pub const NDVI_NO_DATA: f32 = -9999.0;

/// Layout of the assembled output raster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputFormat {
    pub sample_type: SampleType,
    pub pixel_type: PixelType,
    pub num_bands: u8,
}

impl OutputFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        self.num_bands as usize * self.sample_type.bytes_per_sample()
    }

    pub fn accepts(&self, pixel: &Pixel) -> bool {
        pixel.matches(self.sample_type, self.pixel_type, self.num_bands)
    }
}

/// Project a coverage pixel onto the bands selected for the output.
pub(crate) fn project_pixel(
    pixel: &Pixel,
    bands: &[usize],
    format: &OutputFormat,
) -> Result<Pixel> {
    let samples = bands
        .iter()
        .map(|&b| pixel.sample(b))
        .collect::<raster_common::Result<Vec<_>>>()?;
    Ok(Pixel::with_samples(
        format.sample_type,
        format.pixel_type,
        samples,
    )?)
}

/// The fill value for NDVI output.
pub(crate) fn ndvi_no_data() -> Result<Pixel> {
    Ok(Pixel::with_samples(
        SampleType::Float,
        PixelType::DataGrid,
        vec![SampleValue::Float(NDVI_NO_DATA)],
    )?)
}

/// Allocate a `width` x `height` raster and fill every cell with `fill`
/// (zero when `None`).
///
/// Allocation failure is reported instead of aborting the process.
pub(crate) fn prime_raster(
    width: u32,
    height: u32,
    format: &OutputFormat,
    fill: Option<&Pixel>,
) -> Result<Raster> {
    let bpp = format.bytes_per_pixel();
    let pixels = width as usize * height as usize;
    let len = pixels
        .checked_mul(bpp)
        .ok_or_else(|| StoreError::resource(format!("{}x{} output is too large", width, height)))?;
    let mut buffer: Vec<u8> = Vec::new();
    buffer.try_reserve_exact(len).map_err(|e| {
        StoreError::resource(format!("cannot allocate {} byte output buffer: {}", len, e))
    })?;

    if let Some(p) = fill {
        if !format.accepts(p) {
            return Err(StoreError::invalid_argument(format!(
                "background pixel is not {} {} x{}",
                format.sample_type, format.pixel_type, format.num_bands
            )));
        }
    }

    match format.pixel_type {
        // single sub-byte index per cell
        PixelType::Monochrome | PixelType::Palette => {
            let index = match fill {
                Some(p) => p.sample(0)?.as_f64() as u8,
                None => 0,
            };
            buffer.resize(len, index);
        }
        _ => match fill {
            Some(p) => {
                let bytes = p.to_le_bytes();
                for _ in 0..pixels {
                    buffer.extend_from_slice(&bytes);
                }
            }
            None => buffer.resize(len, 0),
        },
    }

    Ok(Raster::new(
        width,
        height,
        format.sample_type,
        format.pixel_type,
        format.num_bands,
        buffer,
        None,
    )?)
}
