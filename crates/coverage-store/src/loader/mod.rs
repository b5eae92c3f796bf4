//! Assemble a dense raster from the stored tiles of one pyramid level.
//!
//! Tiles overlapping the requested window are streamed from the spatial
//! index in `tile_id` order and decoded in batches of at most
//! `max_threads` tiles. Each batch is decoded inside a rayon scope on a pool
//! that lives for one load; once the scope has joined, the batch is
//! composited by the same pool over disjoint bands of output rows, each band
//! applying the tiles in `tile_id` order. The output is therefore the same
//! for every thread count.

mod composite;
mod prime;

pub use prime::{OutputFormat, NDVI_NO_DATA};

use raster_common::{decode_tile, BoundingBox, Pixel, PixelType, Raster, SampleType, Scale};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::coverage::Coverage;
use crate::error::{Result, StoreError};
use crate::resolution::{resolve_level, ResolvedLevel};
use composite::{composite_rows, composite_tile, OutputShape, Placement, Routine, RowBand};
use prime::{ndvi_no_data, prime_raster, project_pixel};

/// Which bands of the coverage end up in the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum BandSelection {
    /// Every band in the coverage format.
    #[default]
    Native,
    /// Three explicit bands as RGB.
    Triple { red: u8, green: u8, blue: u8 },
    /// The coverage's default red, green and blue bands as RGB.
    DefaultTriple,
    /// One band as GRAYSCALE.
    Single(u8),
    /// NDVI from the default red and NIR bands as a FLOAT grid.
    Ndvi,
}

/// A window to read.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterRequest {
    pub bbox: BoundingBox,
    pub width: u32,
    pub height: u32,
    pub section_id: Option<i64>,
    pub bands: BandSelection,
    pub background: Option<Pixel>,
}

impl RasterRequest {
    pub fn new(bbox: BoundingBox, width: u32, height: u32) -> Self {
        Self {
            bbox,
            width,
            height,
            section_id: None,
            bands: BandSelection::Native,
            background: None,
        }
    }

    pub fn with_section(mut self, section_id: i64) -> Self {
        self.section_id = Some(section_id);
        self
    }

    pub fn with_bands(mut self, bands: BandSelection) -> Self {
        self.bands = bands;
        self
    }

    pub fn with_background(mut self, background: Pixel) -> Self {
        self.background = Some(background);
        self
    }

    /// Horizontal size of one output cell.
    pub fn x_res(&self) -> f64 {
        self.bbox.width() / self.width as f64
    }

    /// Vertical size of one output cell.
    pub fn y_res(&self) -> f64 {
        self.bbox.height() / self.height as f64
    }

    fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(StoreError::invalid_argument("output size must be > 0"));
        }
        if !self.bbox.is_valid() {
            return Err(StoreError::invalid_argument(format!(
                "invalid window {:?}",
                self.bbox
            )));
        }
        Ok(())
    }
}

fn band_index(coverage: &Coverage, band: u8) -> Result<usize> {
    if band >= coverage.num_bands() {
        return Err(StoreError::invalid_argument(format!(
            "band {} out of range for {} bands",
            band,
            coverage.num_bands()
        )));
    }
    Ok(band as usize)
}

/// Output format and compositing routine for a band selection.
fn plan_output(coverage: &Coverage, bands: BandSelection) -> Result<(OutputFormat, Routine)> {
    let native = OutputFormat {
        sample_type: coverage.sample_type(),
        pixel_type: coverage.pixel_type(),
        num_bands: coverage.num_bands(),
    };
    let rgb = OutputFormat {
        sample_type: coverage.sample_type(),
        pixel_type: PixelType::Rgb,
        num_bands: 3,
    };
    let multi_band = matches!(coverage.pixel_type(), PixelType::Rgb | PixelType::Multiband);

    match bands {
        BandSelection::Native => Ok((native, Routine::Copy)),
        BandSelection::Single(band) if coverage.num_bands() == 1 => {
            band_index(coverage, band)?;
            Ok((native, Routine::Copy))
        }
        BandSelection::Single(band) => {
            let format = OutputFormat {
                sample_type: coverage.sample_type(),
                pixel_type: PixelType::Grayscale,
                num_bands: 1,
            };
            Ok((format, Routine::Single(band_index(coverage, band)?)))
        }
        BandSelection::Triple { red, green, blue } if multi_band => {
            let bands = [
                band_index(coverage, red)?,
                band_index(coverage, green)?,
                band_index(coverage, blue)?,
            ];
            Ok((rgb, Routine::Triple(bands)))
        }
        BandSelection::DefaultTriple if multi_band => {
            let defaults = coverage.default_bands().ok_or_else(|| {
                StoreError::validation(format!(
                    "coverage {} has no default bands",
                    coverage.name()
                ))
            })?;
            let bands = [
                defaults.red as usize,
                defaults.green as usize,
                defaults.blue as usize,
            ];
            Ok((rgb, Routine::Triple(bands)))
        }
        BandSelection::Triple { .. } | BandSelection::DefaultTriple => {
            Err(StoreError::invalid_argument(format!(
                "triple band output needs an RGB or MULTIBAND coverage, {} is {}",
                coverage.name(),
                coverage.pixel_type()
            )))
        }
        BandSelection::Ndvi => {
            let defaults = match coverage.default_bands() {
                Some(d) if coverage.auto_ndvi() => d,
                _ => {
                    return Err(StoreError::validation(format!(
                        "auto NDVI is not enabled on coverage {}",
                        coverage.name()
                    )))
                }
            };
            let format = OutputFormat {
                sample_type: SampleType::Float,
                pixel_type: PixelType::DataGrid,
                num_bands: 1,
            };
            let routine = Routine::Ndvi {
                red: defaults.red as usize,
                nir: defaults.nir as usize,
            };
            Ok((format, routine))
        }
    }
}

/// No-data pixel of the output: the coverage no-data seen through the
/// routine, or the NDVI fill value.
fn output_no_data(
    coverage: &Coverage,
    format: &OutputFormat,
    routine: &Routine,
) -> Result<Option<Pixel>> {
    if let Routine::Ndvi { .. } = routine {
        return Ok(Some(ndvi_no_data()?));
    }
    match (coverage.no_data(), routine.source_bands()) {
        (None, _) => Ok(None),
        (Some(nd), None) => Ok(Some(nd.clone())),
        (Some(nd), Some(bands)) => Ok(Some(project_pixel(nd, &bands, format)?)),
    }
}

struct TileRow {
    tile_id: i64,
    min_x: f64,
    max_y: f64,
    odd: Vec<u8>,
    even: Option<Vec<u8>>,
}

/// Read a window at an already resolved level.
///
/// Output cells are sized by the request (`x_res`/`y_res` of its window),
/// which may differ slightly from the resolved level within the tolerance.
pub fn load_raster(
    conn: &Connection,
    config: &EngineConfig,
    coverage: &Coverage,
    resolved: &ResolvedLevel,
    request: &RasterRequest,
) -> Result<Raster> {
    request.validate()?;
    if coverage.is_mixed_resolution() && request.section_id.is_none() {
        return Err(StoreError::invalid_argument(format!(
            "coverage {} has mixed resolutions: a section id is required",
            coverage.name()
        )));
    }

    let (format, routine) = plan_output(coverage, request.bands)?;
    let no_data = output_no_data(coverage, &format, &routine)?;
    let fill = request.background.as_ref().or(no_data.as_ref());
    let mut out = prime_raster(request.width, request.height, &format, fill)?;

    let placement = Placement {
        bbox: request.bbox,
        x_res: request.x_res(),
        y_res: request.y_res(),
    };
    let source_no_data = coverage.no_data().map(|p| p.to_le_bytes());
    let threads = config.max_threads();
    // One pool per load, shared by all of its batches.
    let pool = if threads > 1 {
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("rl2-decode-{}", i))
            .build()
            .map_err(|e| StoreError::resource(format!("failed to start decode pool: {}", e)))?;
        Some(pool)
    } else {
        None
    };

    let tables = coverage.tables();
    let sql = format!(
        "SELECT t.tile_id, MbrMinX(t.geometry), MbrMaxY(t.geometry), d.tile_data_odd, \
         CASE WHEN ?1 = 1 THEN d.tile_data_even END \
         FROM \"{tiles}\" AS t JOIN \"{data}\" AS d ON d.tile_id = t.tile_id \
         WHERE t.pyramid_level = ?2 AND t.tile_id IN ( \
             SELECT pkid FROM \"{rtree}\" \
             WHERE xmin <= ?4 AND xmax >= ?3 AND ymin <= ?6 AND ymax >= ?5) \
         AND (?7 IS NULL OR t.section_id = ?7) \
         ORDER BY t.tile_id",
        tiles = tables.tiles,
        data = tables.tile_data,
        rtree = tables.tiles_rtree,
    );
    let bbox = &request.bbox;
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(params![
        i32::from(resolved.scale == Scale::Full),
        resolved.level,
        bbox.min_x,
        bbox.max_x,
        bbox.min_y,
        bbox.max_y,
        request.section_id,
    ])?;

    let ctx = BatchContext {
        coverage,
        resolved,
        placement: &placement,
        routine: &routine,
        source_no_data: source_no_data.as_deref(),
    };
    let mut batch: Vec<TileRow> = Vec::with_capacity(threads);
    let mut tiles = 0usize;
    let mut batches = 0usize;
    while let Some(row) = rows.next()? {
        let tile_id: i64 = row.get(0)?;
        let min_x: Option<f64> = row.get(1)?;
        let max_y: Option<f64> = row.get(2)?;
        let (Some(min_x), Some(max_y)) = (min_x, max_y) else {
            return Err(StoreError::Decode {
                tile_id,
                reason: "tile footprint is not a polygon".to_string(),
            });
        };
        batch.push(TileRow {
            tile_id,
            min_x,
            max_y,
            odd: row.get(3)?,
            even: row.get(4)?,
        });
        if batch.len() == threads {
            // `run` joins every decode and composite task of the batch before
            // the next tile row is fetched.
            tiles += ctx.run(pool.as_ref(), &batch, &mut out)?;
            batches += 1;
            batch.clear();
        }
    }
    if !batch.is_empty() {
        tiles += ctx.run(pool.as_ref(), &batch, &mut out)?;
        batches += 1;
    }

    debug!(
        coverage = %coverage.name(),
        level = resolved.level,
        scale = %resolved.scale,
        tiles,
        batches,
        threads,
        "Loaded raster"
    );

    let mut out = out.with_no_data(no_data)?;
    if routine == Routine::Copy {
        if let Some(palette) = coverage.palette() {
            out = out.with_palette(palette.clone())?;
        }
    }
    Ok(out)
}

struct BatchContext<'a> {
    coverage: &'a Coverage,
    resolved: &'a ResolvedLevel,
    placement: &'a Placement,
    routine: &'a Routine,
    source_no_data: Option<&'a [u8]>,
}

impl BatchContext<'_> {
    fn decode(&self, tile: &TileRow) -> Result<Raster> {
        let decoded = decode_tile(&tile.odd, tile.even.as_deref(), self.resolved.scale).map_err(
            |e| StoreError::Decode {
                tile_id: tile.tile_id,
                reason: e.to_string(),
            },
        )?;
        let cov = self.coverage;
        if decoded.sample_type() != cov.sample_type()
            || decoded.pixel_type() != cov.pixel_type()
            || decoded.num_bands() != cov.num_bands()
        {
            return Err(StoreError::Decode {
                tile_id: tile.tile_id,
                reason: format!(
                    "tile is {} {} x{}, coverage is {} {} x{}",
                    decoded.sample_type(),
                    decoded.pixel_type(),
                    decoded.num_bands(),
                    cov.sample_type(),
                    cov.pixel_type(),
                    cov.num_bands()
                ),
            });
        }
        Ok(decoded)
    }

    /// Decode one batch, then composite it in tile_id order. With a pool
    /// both steps run on its workers and each returns only once all of its
    /// tasks have joined. Returns the number of tiles painted.
    fn run(&self, pool: Option<&ThreadPool>, batch: &[TileRow], out: &mut Raster) -> Result<usize> {
        let decoded: Vec<Result<Raster>> = match pool {
            None => batch.iter().map(|t| self.decode(t)).collect(),
            Some(pool) => {
                let mut slots: Vec<Option<Result<Raster>>> = batch.iter().map(|_| None).collect();
                pool.scope(|s| {
                    for (tile, slot) in batch.iter().zip(slots.iter_mut()) {
                        s.spawn(move |_| *slot = Some(self.decode(tile)));
                    }
                });
                slots
                    .into_iter()
                    .zip(batch)
                    .map(|(slot, tile)| {
                        slot.unwrap_or_else(|| {
                            Err(StoreError::Decode {
                                tile_id: tile.tile_id,
                                reason: "decode task did not run".to_string(),
                            })
                        })
                    })
                    .collect()
            }
        };
        debug!(tiles = batch.len(), "Decoded batch");

        let mut rasters = Vec::with_capacity(decoded.len());
        for result in decoded {
            match result {
                Ok(raster) => rasters.push(raster),
                Err(e) => {
                    warn!(coverage = %self.coverage.name(), error = %e, "Tile decode failed");
                    return Err(e);
                }
            }
        }
        match pool {
            None => {
                for (tile, raster) in batch.iter().zip(&rasters) {
                    composite_tile(
                        out,
                        raster,
                        tile.min_x,
                        tile.max_y,
                        self.placement,
                        self.routine,
                        self.source_no_data,
                    );
                }
            }
            Some(pool) => {
                // Each band of rows applies the whole batch in tile_id order,
                // so overlapping tiles resolve the same way on every thread.
                let shape = OutputShape::of(out);
                let band_rows = (out.height() as usize)
                    .div_ceil(pool.current_num_threads())
                    .max(1);
                pool.install(|| {
                    out.buffer_mut()
                        .par_chunks_mut(band_rows * shape.row_stride())
                        .enumerate()
                        .for_each(|(i, data)| {
                            let mut band = RowBand::new(shape, (i * band_rows) as u32, data);
                            for (tile, raster) in batch.iter().zip(&rasters) {
                                composite_rows(
                                    &mut band,
                                    raster,
                                    tile.min_x,
                                    tile.max_y,
                                    self.placement,
                                    self.routine,
                                    self.source_no_data,
                                );
                            }
                        });
                });
            }
        }
        Ok(rasters.len())
    }
}

/// Resolve the level matching the request resolution and read the window.
pub fn export_raw_pixels(
    conn: &Connection,
    config: &EngineConfig,
    coverage: &Coverage,
    request: &RasterRequest,
) -> Result<Raster> {
    request.validate()?;
    let resolved = resolve_level(
        conn,
        coverage,
        request.section_id,
        request.x_res(),
        request.y_res(),
    )?;
    load_raster(conn, config, coverage, &resolved, request)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_resolution() {
        let request = RasterRequest::new(BoundingBox::new(0.0, 0.0, 1.5, 1.0), 3702, 2468);
        assert!((request.x_res() - 1.5 / 3702.0).abs() < 1e-15);
        assert!((request.y_res() - 1.0 / 2468.0).abs() < 1e-15);
        assert!(RasterRequest::new(BoundingBox::new(0.0, 0.0, 1.0, 1.0), 0, 1)
            .validate()
            .is_err());
    }
}
