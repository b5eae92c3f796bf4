//! Write path for levels, sections and tiles, plus section lookups.

use raster_common::{validate_tile, BoundingBox, RasterStatistics, Scale, TileBlobs};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use tracing::debug;

use crate::coverage::Coverage;
use crate::error::{Result, StoreError};
use crate::geometry::rect_to_wkb;

/// Resolution pairs at 1:1, 1:2, 1:4 and 1:8 derived from the base pair.
fn scaled_resolutions(x_res: f64, y_res: f64) -> [f64; 8] {
    let mut out = [0.0; 8];
    for (i, scale) in Scale::ALL.iter().enumerate() {
        let f = scale.factor() as f64;
        out[i * 2] = x_res * f;
        out[i * 2 + 1] = y_res * f;
    }
    out
}

/// Record a coverage-wide pyramid level. Existing rows are left untouched.
pub fn insert_level(
    conn: &Connection,
    coverage: &Coverage,
    level: i32,
    x_res: f64,
    y_res: f64,
) -> Result<()> {
    if coverage.is_mixed_resolution() {
        return Err(StoreError::invalid_argument(format!(
            "coverage {} keeps levels per section",
            coverage.name()
        )));
    }
    let r = scaled_resolutions(x_res, y_res);
    conn.execute(
        &format!(
            "INSERT OR IGNORE INTO \"{}\" (pyramid_level, x_resolution_1_1, y_resolution_1_1, \
             x_resolution_1_2, y_resolution_1_2, x_resolution_1_4, y_resolution_1_4, \
             x_resolution_1_8, y_resolution_1_8) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            coverage.tables().levels
        ),
        params![level, r[0], r[1], r[2], r[3], r[4], r[5], r[6], r[7]],
    )?;
    Ok(())
}

/// Record a pyramid level of one section of a mixed-resolution coverage.
pub fn insert_section_level(
    conn: &Connection,
    coverage: &Coverage,
    section_id: i64,
    level: i32,
    x_res: f64,
    y_res: f64,
) -> Result<()> {
    if !coverage.is_mixed_resolution() {
        return Err(StoreError::invalid_argument(format!(
            "coverage {} keeps coverage-wide levels",
            coverage.name()
        )));
    }
    let r = scaled_resolutions(x_res, y_res);
    conn.execute(
        &format!(
            "INSERT OR IGNORE INTO \"{}\" (section_id, pyramid_level, x_resolution_1_1, \
             y_resolution_1_1, x_resolution_1_2, y_resolution_1_2, x_resolution_1_4, \
             y_resolution_1_4, x_resolution_1_8, y_resolution_1_8) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            coverage.tables().section_levels
        ),
        params![section_id, level, r[0], r[1], r[2], r[3], r[4], r[5], r[6], r[7]],
    )?;
    Ok(())
}

/// A section about to be inserted.
#[derive(Debug, Clone)]
pub struct NewSection {
    pub name: String,
    pub bbox: BoundingBox,
    pub width: u32,
    pub height: u32,
    pub file_path: Option<String>,
    pub md5_checksum: Option<String>,
    pub summary: Option<String>,
    pub statistics: Option<RasterStatistics>,
}

impl NewSection {
    pub fn new(name: impl Into<String>, bbox: BoundingBox, width: u32, height: u32) -> Self {
        Self {
            name: name.into(),
            bbox,
            width,
            height,
            file_path: None,
            md5_checksum: None,
            summary: None,
            statistics: None,
        }
    }

    pub fn with_file_path(mut self, path: impl Into<String>) -> Self {
        self.file_path = Some(path.into());
        self
    }

    pub fn with_md5(mut self, md5: impl Into<String>) -> Self {
        self.md5_checksum = Some(md5.into());
        self
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }
}

/// Insert a section row and return its id.
///
/// Path, checksum and summary are only stored when the matching coverage
/// policy is enabled.
pub fn insert_section(conn: &Connection, coverage: &Coverage, section: &NewSection) -> Result<i64> {
    if section.name.is_empty() {
        return Err(StoreError::invalid_argument("section name is empty"));
    }
    if section.width == 0 || section.height == 0 || !section.bbox.is_valid() {
        return Err(StoreError::invalid_argument(format!(
            "section {} has an empty extent",
            section.name
        )));
    }
    let policies = coverage.policies();
    let keep = |flag: bool, value: &Option<String>| if flag { value.clone() } else { None };
    conn.execute(
        &format!(
            "INSERT INTO \"{}\" (section_name, width, height, file_path, md5_checksum, summary, \
             statistics, geometry) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            coverage.tables().sections
        ),
        params![
            section.name,
            section.width,
            section.height,
            keep(policies.section_paths, &section.file_path),
            keep(policies.section_md5, &section.md5_checksum),
            keep(policies.section_summary, &section.summary),
            section.statistics.as_ref().map(|s| s.encode()),
            rect_to_wkb(&section.bbox),
        ],
    )?;
    let section_id = conn.last_insert_rowid();
    debug!(coverage = %coverage.name(), section_id, name = %section.name, "Inserted section");
    Ok(section_id)
}

/// Insert one tile and its payload, returning the tile id.
///
/// The payload is validated against the coverage format before anything is
/// written.
pub fn insert_tile(
    conn: &Connection,
    coverage: &Coverage,
    level: i32,
    section_id: Option<i64>,
    bbox: &BoundingBox,
    blobs: &TileBlobs,
) -> Result<i64> {
    validate_tile(&blobs.odd, blobs.even.as_deref(), level, &coverage.tile_format())
        .map_err(|e| StoreError::validation(format!("tile rejected: {}", e)))?;
    let tables = coverage.tables();
    conn.execute(
        &format!(
            "INSERT INTO \"{}\" (pyramid_level, section_id, geometry) VALUES (?1, ?2, ?3)",
            tables.tiles
        ),
        params![level, section_id, rect_to_wkb(bbox)],
    )?;
    let tile_id = conn.last_insert_rowid();
    conn.execute(
        &format!(
            "INSERT INTO \"{}\" (tile_id, tile_data_odd, tile_data_even) VALUES (?1, ?2, ?3)",
            tables.tile_data
        ),
        params![tile_id, blobs.odd, blobs.even],
    )?;
    Ok(tile_id)
}

/// Stored description of a section.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SectionInfo {
    pub section_id: i64,
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub file_path: Option<String>,
    pub md5_checksum: Option<String>,
    pub summary: Option<String>,
    pub bbox: BoundingBox,
}

const SECTION_COLUMNS: &str = "section_id, section_name, width, height, file_path, \
    md5_checksum, summary, MbrMinX(geometry), MbrMinY(geometry), MbrMaxX(geometry), \
    MbrMaxY(geometry)";

fn section_from_row(row: &Row<'_>) -> rusqlite::Result<SectionInfo> {
    Ok(SectionInfo {
        section_id: row.get(0)?,
        name: row.get(1)?,
        width: row.get(2)?,
        height: row.get(3)?,
        file_path: row.get(4)?,
        md5_checksum: row.get(5)?,
        summary: row.get(6)?,
        bbox: BoundingBox::new(row.get(7)?, row.get(8)?, row.get(9)?, row.get(10)?),
    })
}

pub fn get_section(conn: &Connection, coverage: &Coverage, section_id: i64) -> Result<SectionInfo> {
    let sql = format!(
        "SELECT {} FROM \"{}\" WHERE section_id = ?1",
        SECTION_COLUMNS,
        coverage.tables().sections
    );
    conn.query_row(&sql, [section_id], section_from_row)
        .optional()?
        .ok_or_else(|| StoreError::section_not_found(coverage.name(), section_id))
}

/// Look a section up by name.
pub fn find_section(conn: &Connection, coverage: &Coverage, name: &str) -> Result<Option<SectionInfo>> {
    let sql = format!(
        "SELECT {} FROM \"{}\" WHERE section_name = ?1",
        SECTION_COLUMNS,
        coverage.tables().sections
    );
    Ok(conn.query_row(&sql, [name], section_from_row).optional()?)
}

pub fn list_sections(conn: &Connection, coverage: &Coverage) -> Result<Vec<SectionInfo>> {
    let sql = format!(
        "SELECT {} FROM \"{}\" ORDER BY section_id",
        SECTION_COLUMNS,
        coverage.tables().sections
    );
    let mut stmt = conn.prepare(&sql)?;
    let sections = stmt
        .query_map([], section_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(sections)
}

/// Decoded statistics of a section, `None` when none were stored.
pub fn section_statistics(
    conn: &Connection,
    coverage: &Coverage,
    section_id: i64,
) -> Result<Option<RasterStatistics>> {
    let sql = format!(
        "SELECT statistics FROM \"{}\" WHERE section_id = ?1",
        coverage.tables().sections
    );
    let blob: Option<Vec<u8>> = conn
        .query_row(&sql, [section_id], |r| r.get(0))
        .optional()?
        .ok_or_else(|| StoreError::section_not_found(coverage.name(), section_id))?;
    Ok(blob.map(|b| RasterStatistics::decode(&b)).transpose()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scaled_resolutions() {
        let r = scaled_resolutions(0.5, 0.25);
        assert_eq!(r, [0.5, 0.25, 1.0, 0.5, 2.0, 1.0, 4.0, 2.0]);
    }
}
