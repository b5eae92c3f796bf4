//! Compositing decoded tiles into the output raster.

use raster_common::{BoundingBox, Raster, SampleType, SampleValue};

/// How source pixels become output pixels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Routine {
    /// All bands as stored.
    Copy,
    /// Three source bands into an RGB pixel.
    Triple([usize; 3]),
    /// One source band into a grayscale pixel.
    Single(usize),
    /// `(nir - red) / (nir + red)` as a FLOAT sample.
    Ndvi { red: usize, nir: usize },
}

impl Routine {
    /// Source bands read by this routine, or `None` for all of them.
    pub(crate) fn source_bands(&self) -> Option<Vec<usize>> {
        match self {
            Self::Copy => None,
            Self::Triple(bands) => Some(bands.to_vec()),
            Self::Single(band) => Some(vec![*band]),
            Self::Ndvi { red, nir } => Some(vec![*red, *nir]),
        }
    }
}

/// Where the output window sits and how finely it is sampled.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Placement {
    pub bbox: BoundingBox,
    pub x_res: f64,
    pub y_res: f64,
}

impl Placement {
    /// Output cell holding the geographic point, if inside a `width` x
    /// `height` window.
    fn cell(&self, width: u32, height: u32, geo_x: f64, geo_y: f64) -> Option<(u32, u32)> {
        let col = ((geo_x - self.bbox.min_x) / self.x_res).floor();
        let row = ((self.bbox.max_y - geo_y) / self.y_res).floor();
        if col < 0.0 || row < 0.0 || col >= width as f64 || row >= height as f64 {
            return None;
        }
        Some((row as u32, col as u32))
    }
}

/// Geometry of the output raster, detached from its buffer.
#[derive(Debug, Clone, Copy)]
pub(crate) struct OutputShape {
    width: u32,
    height: u32,
    sample_type: SampleType,
    bytes_per_pixel: usize,
}

impl OutputShape {
    pub(crate) fn of(out: &Raster) -> Self {
        Self {
            width: out.width(),
            height: out.height(),
            sample_type: out.sample_type(),
            bytes_per_pixel: out.bytes_per_pixel(),
        }
    }

    pub(crate) fn row_stride(&self) -> usize {
        self.width as usize * self.bytes_per_pixel
    }
}

/// Consecutive full rows of the output buffer, starting at `first_row`.
///
/// Disjoint bands of one output can be painted from different threads.
pub(crate) struct RowBand<'a> {
    shape: OutputShape,
    first_row: u32,
    rows: u32,
    data: &'a mut [u8],
}

impl<'a> RowBand<'a> {
    pub(crate) fn new(shape: OutputShape, first_row: u32, data: &'a mut [u8]) -> Self {
        Self {
            shape,
            first_row,
            rows: (data.len() / shape.row_stride()) as u32,
            data,
        }
    }

    fn contains(&self, row: u32) -> bool {
        row >= self.first_row && row < self.first_row + self.rows
    }

    fn pixel_mut(&mut self, row: u32, col: u32) -> &mut [u8] {
        let bpp = self.shape.bytes_per_pixel;
        let at = ((row - self.first_row) as usize * self.shape.width as usize + col as usize) * bpp;
        &mut self.data[at..at + bpp]
    }
}

/// Paint one decoded tile whose upper-left corner is at
/// (`tile_min_x`, `tile_max_y`) over the whole output.
///
/// Cells are mapped by their centres. Transparent cells and cells equal to
/// `no_data` (raw coverage bytes) leave the output untouched. Returns the
/// number of cells written.
pub(crate) fn composite_tile(
    out: &mut Raster,
    tile: &Raster,
    tile_min_x: f64,
    tile_max_y: f64,
    placement: &Placement,
    routine: &Routine,
    no_data: Option<&[u8]>,
) -> usize {
    let shape = OutputShape::of(out);
    let mut band = RowBand::new(shape, 0, out.buffer_mut());
    composite_rows(&mut band, tile, tile_min_x, tile_max_y, placement, routine, no_data)
}

/// Paint the part of one decoded tile that falls inside `band`.
pub(crate) fn composite_rows(
    band: &mut RowBand<'_>,
    tile: &Raster,
    tile_min_x: f64,
    tile_max_y: f64,
    placement: &Placement,
    routine: &Routine,
    no_data: Option<&[u8]>,
) -> usize {
    let bps = tile.sample_type().bytes_per_sample();
    let out_sample = band.shape.sample_type;
    let out_bps = out_sample.bytes_per_sample();
    let mut written = 0;

    for r in 0..tile.height() {
        let geo_y = tile_max_y - placement.y_res / 2.0 - r as f64 * placement.y_res;
        if geo_y < placement.bbox.min_y || geo_y > placement.bbox.max_y {
            continue;
        }
        for c in 0..tile.width() {
            let geo_x = tile_min_x + placement.x_res / 2.0 + c as f64 * placement.x_res;
            let Some((out_row, out_col)) = placement.cell(band.shape.width, band.shape.height, geo_x, geo_y)
            else {
                continue;
            };
            if !band.contains(out_row) || !tile.is_opaque(r, c) {
                continue;
            }
            let src = tile.pixel_bytes(r, c);
            if no_data == Some(src) {
                continue;
            }

            match routine {
                Routine::Copy => {
                    band.pixel_mut(out_row, out_col).copy_from_slice(src);
                }
                Routine::Triple(bands) => {
                    let dst = band.pixel_mut(out_row, out_col);
                    for (i, &b) in bands.iter().enumerate() {
                        dst[i * bps..(i + 1) * bps].copy_from_slice(&src[b * bps..(b + 1) * bps]);
                    }
                }
                Routine::Single(b) => {
                    band.pixel_mut(out_row, out_col)
                        .copy_from_slice(&src[b * bps..(b + 1) * bps]);
                }
                Routine::Ndvi { red, nir } => {
                    let red = tile.sample_f64(r, c, *red);
                    let nir = tile.sample_f64(r, c, *nir);
                    let sum = nir + red;
                    if sum == 0.0 {
                        continue;
                    }
                    let dst = band.pixel_mut(out_row, out_col);
                    SampleValue::from_f64(out_sample, (nir - red) / sum)
                        .write_le(&mut dst[..out_bps]);
                }
            }
            written += 1;
        }
    }
    written
}

#[cfg(test)]
mod tests {
    use super::*;
    use raster_common::{PixelType, SampleType};

    fn rgb(width: u32, height: u32, fill: u8) -> Raster {
        Raster::new(
            width,
            height,
            SampleType::UInt8,
            PixelType::Rgb,
            3,
            vec![fill; (width * height * 3) as usize],
            None,
        )
        .unwrap()
    }

    fn placement(width: f64, height: f64) -> Placement {
        Placement {
            bbox: BoundingBox::new(0.0, 0.0, width, height),
            x_res: 1.0,
            y_res: 1.0,
        }
    }

    #[test]
    fn test_copy_offsets_by_tile_origin() {
        let mut out = rgb(4, 4, 0);
        let tile = rgb(2, 2, 9);
        // tile covers x 2..4, y 0..2 which is the lower-right quarter
        let n = composite_tile(&mut out, &tile, 2.0, 2.0, &placement(4.0, 4.0), &Routine::Copy, None);
        assert_eq!(n, 4);
        assert_eq!(out.pixel_bytes(3, 3), &[9, 9, 9]);
        assert_eq!(out.pixel_bytes(2, 2), &[9, 9, 9]);
        assert_eq!(out.pixel_bytes(0, 0), &[0, 0, 0]);
        assert_eq!(out.pixel_bytes(1, 2), &[0, 0, 0]);
    }

    #[test]
    fn test_out_of_window_cells_skipped() {
        let mut out = rgb(2, 2, 0);
        let tile = rgb(4, 4, 5);
        let n = composite_tile(&mut out, &tile, -1.0, 3.0, &placement(2.0, 2.0), &Routine::Copy, None);
        assert_eq!(n, 4);
        assert!(out.buffer().iter().all(|&v| v == 5));
    }

    #[test]
    fn test_no_data_and_mask_leave_background() {
        let mut out = rgb(2, 1, 7);
        let mut buffer = vec![0u8; 6];
        buffer[3..].copy_from_slice(&[1, 2, 3]);
        let tile = Raster::new(2, 1, SampleType::UInt8, PixelType::Rgb, 3, buffer, None).unwrap();
        let n = composite_tile(
            &mut out,
            &tile,
            0.0,
            1.0,
            &placement(2.0, 1.0),
            &Routine::Copy,
            Some(&[0, 0, 0]),
        );
        assert_eq!(n, 1);
        assert_eq!(out.buffer(), &[7, 7, 7, 1, 2, 3]);

        let masked = Raster::new(
            2,
            1,
            SampleType::UInt8,
            PixelType::Rgb,
            3,
            vec![4; 6],
            Some(vec![0, 1]),
        )
        .unwrap();
        let mut out = rgb(2, 1, 7);
        composite_tile(&mut out, &masked, 0.0, 1.0, &placement(2.0, 1.0), &Routine::Copy, None);
        assert_eq!(out.buffer(), &[7, 7, 7, 4, 4, 4]);
    }

    #[test]
    fn test_band_routines() {
        let tile = Raster::new(
            1,
            1,
            SampleType::UInt8,
            PixelType::Multiband,
            4,
            vec![10, 20, 30, 40],
            None,
        )
        .unwrap();

        let mut out = rgb(1, 1, 0);
        composite_tile(&mut out, &tile, 0.0, 1.0, &placement(1.0, 1.0), &Routine::Triple([2, 1, 0]), None);
        assert_eq!(out.buffer(), &[30, 20, 10]);

        let mut gray = Raster::new(1, 1, SampleType::UInt8, PixelType::Grayscale, 1, vec![0], None)
            .unwrap();
        composite_tile(&mut gray, &tile, 0.0, 1.0, &placement(1.0, 1.0), &Routine::Single(3), None);
        assert_eq!(gray.buffer(), &[40]);

        let mut ndvi = Raster::new(1, 1, SampleType::Float, PixelType::DataGrid, 1, vec![0; 4], None)
            .unwrap();
        let routine = Routine::Ndvi { red: 0, nir: 3 };
        composite_tile(&mut ndvi, &tile, 0.0, 1.0, &placement(1.0, 1.0), &routine, None);
        assert!((ndvi.sample_f64(0, 0, 0) - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_row_bands_match_whole_output() {
        // two overlapping tiles, the later one wins where both are opaque
        let first = rgb(3, 3, 1);
        let second = Raster::new(
            3,
            3,
            SampleType::UInt8,
            PixelType::Rgb,
            3,
            (0..27).map(|v| v as u8 + 10).collect(),
            None,
        )
        .unwrap();
        let place = placement(4.0, 5.0);

        let mut whole = rgb(4, 5, 0);
        composite_tile(&mut whole, &first, 0.0, 5.0, &place, &Routine::Copy, None);
        composite_tile(&mut whole, &second, 1.0, 3.0, &place, &Routine::Copy, None);

        let mut banded = rgb(4, 5, 0);
        let shape = OutputShape::of(&banded);
        for (i, data) in banded.buffer_mut().chunks_mut(2 * shape.row_stride()).enumerate() {
            let mut band = RowBand::new(shape, (i * 2) as u32, data);
            composite_rows(&mut band, &first, 0.0, 5.0, &place, &Routine::Copy, None);
            composite_rows(&mut band, &second, 1.0, 3.0, &place, &Routine::Copy, None);
        }

        assert_eq!(banded, whole);
        assert_eq!(whole.pixel_bytes(0, 0), &[1, 1, 1]);
        assert_eq!(whole.pixel_bytes(2, 1), &[10, 11, 12]);
        assert_eq!(whole.pixel_bytes(4, 3), &[34, 35, 36]);
    }
}
