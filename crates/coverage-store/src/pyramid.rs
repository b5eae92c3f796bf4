//! Pyramid levels above the base level.

use raster_common::{downsample, encode_tile, Raster, Scale};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::coverage::Coverage;
use crate::error::{Result, StoreError};
use crate::import::tile_raster;
use crate::loader::{load_raster, RasterRequest};
use crate::resolution::ResolvedLevel;
use crate::sections::{get_section, insert_level, insert_section_level, insert_tile, list_sections};

/// What a pyramid build produced for one section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PyramidReport {
    pub section_id: i64,
    pub levels: usize,
    pub tiles: usize,
}

/// Base (level 0, 1:1) resolution recorded for a section's level rows.
fn base_resolution(conn: &Connection, coverage: &Coverage, section_id: i64) -> Result<(f64, f64)> {
    if !coverage.is_mixed_resolution() {
        return Ok(coverage.resolution());
    }
    let sql = format!(
        "SELECT x_resolution_1_1, y_resolution_1_1 FROM \"{}\" \
         WHERE section_id = ?1 AND pyramid_level = 0",
        coverage.tables().section_levels
    );
    conn.query_row(&sql, [section_id], |r| Ok((r.get(0)?, r.get(1)?)))
        .optional()?
        .ok_or_else(|| {
            StoreError::validation(format!(
                "section {} of {} has no base level",
                section_id,
                coverage.name()
            ))
        })
}

/// Remove every level above the base for one section. Returns the number of
/// tiles deleted.
pub fn delete_section_pyramid(conn: &Connection, coverage: &Coverage, section_id: i64) -> Result<usize> {
    get_section(conn, coverage, section_id)?;
    let tables = coverage.tables();
    let deleted = conn.execute(
        &format!(
            "DELETE FROM \"{}\" WHERE section_id = ?1 AND pyramid_level > 0",
            tables.tiles
        ),
        [section_id],
    )?;
    if coverage.is_mixed_resolution() {
        conn.execute(
            &format!(
                "DELETE FROM \"{}\" WHERE section_id = ?1 AND pyramid_level > 0",
                tables.section_levels
            ),
            [section_id],
        )?;
    } else {
        // levels still used by other sections stay
        conn.execute(
            &format!(
                "DELETE FROM \"{}\" WHERE pyramid_level > 0 AND pyramid_level NOT IN \
                 (SELECT DISTINCT pyramid_level FROM \"{}\")",
                tables.levels, tables.tiles
            ),
            params![],
        )?;
    }
    debug!(coverage = %coverage.name(), section_id, tiles = deleted, "Deleted section pyramid");
    Ok(deleted)
}

/// Build levels 1.. for one section, replacing any existing ones.
///
/// Each level downsamples the previous one by the configured factor until a
/// level fits in a single tile. Pyramid tiles are stored unsplit.
pub fn build_section_pyramid(
    conn: &Connection,
    config: &EngineConfig,
    coverage: &Coverage,
    section_id: i64,
) -> Result<PyramidReport> {
    config.pyramid.validate().map_err(StoreError::Config)?;
    delete_section_pyramid(conn, coverage, section_id)?;

    let section = get_section(conn, coverage, section_id)?;
    let (mut x_res, mut y_res) = base_resolution(conn, coverage, section_id)?;
    // Footprints follow the section's own pixel size, which may sit within
    // the tolerance of the recorded level resolution.
    let mut tile_x_res = section.bbox.width() / section.width as f64;
    let mut tile_y_res = section.bbox.height() / section.height as f64;
    let request = RasterRequest::new(section.bbox, section.width, section.height)
        .with_section(section_id);
    let base = ResolvedLevel {
        level: 0,
        scale: Scale::Full,
        x_res: tile_x_res,
        y_res: tile_y_res,
    };
    let mut current: Raster = load_raster(conn, config, coverage, &base, &request)?;

    let factor = config.pyramid.factor;
    let method = config.pyramid.method.for_pixel_type(coverage.pixel_type());
    let mut level = 0;
    let mut tiles = 0;
    while current.width() > coverage.tile_width() || current.height() > coverage.tile_height() {
        current = downsample(&current, factor, method)?;
        level += 1;
        x_res *= factor as f64;
        y_res *= factor as f64;
        tile_x_res *= factor as f64;
        tile_y_res *= factor as f64;
        if coverage.is_mixed_resolution() {
            insert_section_level(conn, coverage, section_id, level, x_res, y_res)?;
        } else {
            insert_level(conn, coverage, level, x_res, y_res)?;
        }
        let tiled = tile_raster(coverage, &current, &section.bbox, tile_x_res, tile_y_res)?;
        for (footprint, tile) in tiled {
            let blobs = encode_tile(&tile, coverage.compression(), false)?;
            insert_tile(conn, coverage, level, Some(section_id), &footprint, &blobs)?;
            tiles += 1;
        }
        debug!(
            coverage = %coverage.name(),
            section_id,
            level,
            width = current.width(),
            height = current.height(),
            "Built pyramid level"
        );
    }

    info!(
        coverage = %coverage.name(),
        section_id,
        levels = level,
        tiles,
        "Built section pyramid"
    );
    Ok(PyramidReport {
        section_id,
        levels: level as usize,
        tiles,
    })
}

/// Build the pyramid of every section of a coverage.
pub fn build_coverage_pyramid(
    conn: &Connection,
    config: &EngineConfig,
    coverage: &Coverage,
) -> Result<Vec<PyramidReport>> {
    list_sections(conn, coverage)?
        .iter()
        .map(|s| build_section_pyramid(conn, config, coverage, s.section_id))
        .collect()
}
