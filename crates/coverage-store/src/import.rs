//! Import an in-memory raster as a new section.

use raster_common::{encode_tile, BoundingBox, Raster, RasterStatistics};
use rusqlite::Connection;
use serde::Serialize;
use tracing::info;

use crate::coverage::Coverage;
use crate::error::{Result, StoreError};
use crate::resolution::within_tolerance;
use crate::sections::{insert_level, insert_section, insert_section_level, insert_tile, NewSection};

/// Relative difference accepted as "the same resolution" under the strict
/// policy.
const STRICT_EPSILON: f64 = 1e-9;

/// Outcome of one import.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ImportReport {
    pub section_id: i64,
    pub tiles: usize,
    pub x_res: f64,
    pub y_res: f64,
}

fn same_resolution(strict: bool, stored: f64, actual: f64) -> bool {
    if strict {
        ((stored - actual) / stored).abs() <= STRICT_EPSILON
    } else {
        within_tolerance(stored, actual)
    }
}

/// Cut `raster` into base-level tiles of the coverage size.
///
/// Edge tiles are padded with the coverage no-data and masked transparent.
/// Each tile comes with its footprint derived from `bbox` and the
/// resolution.
pub(crate) fn tile_raster(
    coverage: &Coverage,
    raster: &Raster,
    bbox: &BoundingBox,
    x_res: f64,
    y_res: f64,
) -> Result<Vec<(BoundingBox, Raster)>> {
    let tw = coverage.tile_width();
    let th = coverage.tile_height();
    let mut tiles = Vec::new();
    for row in (0..raster.height()).step_by(th as usize) {
        for col in (0..raster.width()).step_by(tw as usize) {
            let tile = raster.window(row, col, tw, th, coverage.no_data())?;
            let min_x = bbox.min_x + col as f64 * x_res;
            let max_y = bbox.max_y - row as f64 * y_res;
            let footprint = BoundingBox::new(
                min_x,
                max_y - th as f64 * y_res,
                min_x + tw as f64 * x_res,
                max_y,
            );
            tiles.push((footprint, tile));
        }
    }
    Ok(tiles)
}

/// Store `raster` as a new section of `coverage` covering `section.bbox`.
///
/// The raster must have the coverage format. Its resolution
/// (extent / size) must equal the coverage resolution exactly under the
/// strict policy, within 1% otherwise; mixed-resolution coverages accept
/// any resolution and record it as the section's level 0.
pub fn import_section(
    conn: &Connection,
    coverage: &Coverage,
    section: NewSection,
    raster: &Raster,
) -> Result<ImportReport> {
    if raster.sample_type() != coverage.sample_type()
        || raster.pixel_type() != coverage.pixel_type()
        || raster.num_bands() != coverage.num_bands()
    {
        return Err(StoreError::validation(format!(
            "raster is {} {} x{}, coverage {} is {} {} x{}",
            raster.sample_type(),
            raster.pixel_type(),
            raster.num_bands(),
            coverage.name(),
            coverage.sample_type(),
            coverage.pixel_type(),
            coverage.num_bands()
        )));
    }
    if !section.bbox.is_valid() {
        return Err(StoreError::invalid_argument(format!(
            "section {} has an invalid extent",
            section.name
        )));
    }

    let x_res = section.bbox.width() / raster.width() as f64;
    let y_res = section.bbox.height() / raster.height() as f64;
    if !coverage.is_mixed_resolution() {
        let (cov_x, cov_y) = coverage.resolution();
        let strict = coverage.policies().strict_resolution;
        if !same_resolution(strict, cov_x, x_res) || !same_resolution(strict, cov_y, y_res) {
            return Err(StoreError::validation(format!(
                "section {} resolution {} x {} does not match coverage {} ({} x {})",
                section.name,
                x_res,
                y_res,
                coverage.name(),
                cov_x,
                cov_y
            )));
        }
    }

    let statistics = RasterStatistics::compute_with_no_data(raster, coverage.no_data());
    let section = NewSection {
        width: raster.width(),
        height: raster.height(),
        statistics: Some(statistics),
        ..section
    };
    let section_id = insert_section(conn, coverage, &section)?;
    if coverage.is_mixed_resolution() {
        insert_section_level(conn, coverage, section_id, 0, x_res, y_res)?;
    } else {
        let (cov_x, cov_y) = coverage.resolution();
        insert_level(conn, coverage, 0, cov_x, cov_y)?;
    }

    let tiles = tile_raster(coverage, raster, &section.bbox, x_res, y_res)?;
    for (footprint, tile) in &tiles {
        let blobs = encode_tile(tile, coverage.compression(), true)?;
        insert_tile(conn, coverage, 0, Some(section_id), footprint, &blobs)?;
    }

    info!(
        coverage = %coverage.name(),
        section = %section.name,
        section_id,
        width = raster.width(),
        height = raster.height(),
        tiles = tiles.len(),
        "Imported section"
    );
    Ok(ImportReport {
        section_id,
        tiles: tiles.len(),
        x_res,
        y_res,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_resolution() {
        assert!(same_resolution(true, 0.5, 0.5));
        assert!(!same_resolution(true, 0.5, 0.5001));
        assert!(same_resolution(false, 0.5, 0.5001));
        assert!(!same_resolution(false, 0.5, 0.52));
    }
}
