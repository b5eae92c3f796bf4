//! Downsampling used to build pyramid levels.
//!
//! Reduces a raster by an integer factor, ignoring transparent and no-data
//! cells inside each block. Blocks with no valid cell become transparent
//! no-data cells in the output.

use serde::{Deserialize, Serialize};

use crate::error::{RasterError, Result};
use crate::pixel::SampleValue;
use crate::raster::Raster;
use crate::types::PixelType;

/// Method used to reduce each block of cells to one cell.
///
/// - **Mean**: continuous data (imagery, elevation)
/// - **Max**: peak preserving
/// - **Nearest**: first valid cell of the block, required for palette
///   indices and monochrome bits where averaging is meaningless
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DownsampleMethod {
    #[default]
    Mean,
    Max,
    Nearest,
}

impl std::str::FromStr for DownsampleMethod {
    type Err = RasterError;

    /// Case-insensitive "mean", "max" or "nearest".
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "mean" => Ok(Self::Mean),
            "max" => Ok(Self::Max),
            "nearest" => Ok(Self::Nearest),
            other => Err(RasterError::invalid_format(format!(
                "unknown downsample method {:?}",
                other
            ))),
        }
    }
}

impl DownsampleMethod {
    /// The method actually usable for a pixel type.
    pub fn for_pixel_type(self, pixel: PixelType) -> Self {
        match pixel {
            PixelType::Palette | PixelType::Monochrome => Self::Nearest,
            _ => self,
        }
    }
}

/// Downsample `raster` by `factor` in both directions.
///
/// Output dimensions are rounded up so partial blocks at the right and
/// bottom edges still produce a cell.
pub fn downsample(raster: &Raster, factor: u32, method: DownsampleMethod) -> Result<Raster> {
    if factor < 2 {
        return Err(RasterError::invalid_format("downsample factor must be >= 2"));
    }
    let method = method.for_pixel_type(raster.pixel_type());
    let out_w = raster.width().div_ceil(factor);
    let out_h = raster.height().div_ceil(factor);
    let bands = raster.num_bands() as usize;
    let sample = raster.sample_type();
    let bps = sample.bytes_per_sample();
    let no_data = raster.no_data().map(|p| p.to_le_bytes());

    let mut out = Raster::filled(
        out_w,
        out_h,
        sample,
        raster.pixel_type(),
        raster.num_bands(),
        raster.no_data(),
    )?;
    let mut mask = vec![0u8; out_w as usize * out_h as usize];
    let mut any_transparent = false;
    let mut acc = vec![0.0f64; bands];

    for oy in 0..out_h {
        for ox in 0..out_w {
            let row_end = ((oy + 1) * factor).min(raster.height());
            let col_end = ((ox + 1) * factor).min(raster.width());
            acc.iter_mut().for_each(|a| {
                *a = match method {
                    DownsampleMethod::Max => f64::MIN,
                    _ => 0.0,
                }
            });
            let mut count = 0usize;
            let mut nearest: Option<(u32, u32)> = None;

            'block: for r in oy * factor..row_end {
                for c in ox * factor..col_end {
                    if !raster.is_opaque(r, c) {
                        continue;
                    }
                    if no_data.as_deref() == Some(raster.pixel_bytes(r, c)) {
                        continue;
                    }
                    count += 1;
                    match method {
                        DownsampleMethod::Nearest => {
                            nearest = Some((r, c));
                            break 'block;
                        }
                        DownsampleMethod::Mean => {
                            for (b, a) in acc.iter_mut().enumerate() {
                                *a += raster.sample_f64(r, c, b);
                            }
                        }
                        DownsampleMethod::Max => {
                            for (b, a) in acc.iter_mut().enumerate() {
                                *a = a.max(raster.sample_f64(r, c, b));
                            }
                        }
                    }
                }
            }

            if count == 0 {
                any_transparent = true;
                continue;
            }
            mask[oy as usize * out_w as usize + ox as usize] = 1;

            let dst = out.pixel_bytes_mut(oy, ox);
            match (method, nearest) {
                (DownsampleMethod::Nearest, Some((r, c))) => {
                    dst.copy_from_slice(raster.pixel_bytes(r, c));
                }
                _ => {
                    for (b, a) in acc.iter().enumerate() {
                        let v = match method {
                            DownsampleMethod::Mean => a / count as f64,
                            _ => *a,
                        };
                        SampleValue::from_f64(sample, v).write_le(&mut dst[b * bps..(b + 1) * bps]);
                    }
                }
            }
        }
    }

    let mask = if any_transparent { Some(mask) } else { None };
    let mut result = Raster::new(
        out_w,
        out_h,
        sample,
        raster.pixel_type(),
        raster.num_bands(),
        out.into_buffer(),
        mask,
    )?
    .with_no_data(raster.no_data().cloned())?;
    if let Some(palette) = raster.palette() {
        result = result.with_palette(palette.clone())?;
    }
    Ok(result)
}
