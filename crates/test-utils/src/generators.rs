//! Synthetic rasters with predictable, verifiable pixel patterns.

use raster_common::{Palette, PixelType, Raster, SampleType};

/// RGB UINT8 gradient that never produces a black pixel.
///
/// Pixel at (row, col) is `(col % 256, row % 256, (col + row) % 255 + 1)`,
/// so a black no-data pixel never hides imported data.
///
/// # Example
///
/// ```
/// use test_utils::rgb_gradient;
///
/// let raster = rgb_gradient(300, 2);
/// assert_eq!(raster.pixel_bytes(1, 257), &[1, 1, 4]);
/// ```
pub fn rgb_gradient(width: u32, height: u32) -> Raster {
    let mut data = Vec::with_capacity(width as usize * height as usize * 3);
    for row in 0..height {
        for col in 0..width {
            data.push((col % 256) as u8);
            data.push((row % 256) as u8);
            data.push(((col + row) % 255 + 1) as u8);
        }
    }
    Raster::new(width, height, SampleType::UInt8, PixelType::Rgb, 3, data, None)
        .expect("valid RGB raster")
}

/// MULTIBAND UINT8 raster where band `b` of (row, col) is
/// `(col + row + 40 * b) % 200 + 10`, never zero.
pub fn multiband(width: u32, height: u32, bands: u8) -> Raster {
    let mut data = Vec::with_capacity(width as usize * height as usize * bands as usize);
    for row in 0..height {
        for col in 0..width {
            for b in 0..bands as u32 {
                data.push(((col + row + 40 * b) % 200 + 10) as u8);
            }
        }
    }
    Raster::new(width, height, SampleType::UInt8, PixelType::Multiband, bands, data, None)
        .expect("valid multiband raster")
}

/// FLOAT elevation grid where each cell is `col * 1000 + row`.
pub fn dem_grid(width: u32, height: u32) -> Raster {
    let mut data = Vec::with_capacity(width as usize * height as usize * 4);
    for row in 0..height {
        for col in 0..width {
            data.extend_from_slice(&((col * 1000 + row) as f32).to_le_bytes());
        }
    }
    Raster::new(width, height, SampleType::Float, PixelType::DataGrid, 1, data, None)
        .expect("valid DEM raster")
}

/// A palette of `entries` gray levels.
pub fn gray_palette(entries: usize) -> Palette {
    let step = 255 / entries.max(2).saturating_sub(1);
    let colors: Vec<(u8, u8, u8)> = (0..entries)
        .map(|i| {
            let v = (i * step).min(255) as u8;
            (v, v, v)
        })
        .collect();
    Palette::from_colors(&colors).expect("valid palette")
}

/// UINT8 PALETTE raster with indices `(row + col) % entries`.
pub fn palette_raster(width: u32, height: u32, entries: usize) -> Raster {
    let data = (0..height)
        .flat_map(|row| (0..width).map(move |col| ((row + col) as usize % entries) as u8))
        .collect();
    Raster::new(width, height, SampleType::UInt8, PixelType::Palette, 1, data, None)
        .and_then(|r| r.with_palette(gray_palette(entries)))
        .expect("valid palette raster")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rgb_gradient_never_black() {
        let raster = rgb_gradient(600, 300);
        assert!(raster.buffer().chunks(3).all(|p| p != [0, 0, 0]));
    }

    #[test]
    fn test_dem_grid_values() {
        let raster = dem_grid(10, 5);
        assert_eq!(raster.sample_f64(0, 1, 0), 1000.0);
        assert_eq!(raster.sample_f64(1, 0, 0), 1.0);
    }

    #[test]
    fn test_palette_raster() {
        let raster = palette_raster(8, 8, 4);
        assert_eq!(raster.palette().map(|p| p.len()), Some(4));
        assert!(raster.buffer().iter().all(|&i| i < 4));
    }

    #[test]
    fn test_multiband_never_zero() {
        let raster = multiband(50, 50, 4);
        assert!(raster.buffer().iter().all(|&v| v >= 10));
    }
}
