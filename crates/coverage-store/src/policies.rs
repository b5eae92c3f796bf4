//! Coverage metadata and policy updates.

use raster_common::{BoundingBox, PixelType, RasterStatistics};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use tracing::{debug, info};

use crate::coverage::{Coverage, DefaultBands};
use crate::error::{Result, StoreError};
use crate::sections::{list_sections, section_statistics};

/// SRID whose extent doubles as the geographic extent.
const WGS84: i32 = 4326;

/// Set the default red/green/blue/NIR bands of a MULTIBAND coverage.
pub fn set_default_bands(conn: &Connection, name: &str, bands: DefaultBands) -> Result<()> {
    let coverage = Coverage::load(conn, name)?;
    if coverage.pixel_type() != PixelType::Multiband {
        return Err(StoreError::validation(format!(
            "coverage {} is {}: default bands need MULTIBAND",
            coverage.name(),
            coverage.pixel_type()
        )));
    }
    bands.validate(coverage.num_bands())?;
    conn.execute(
        "UPDATE raster_coverages SET red_band_index = ?1, green_band_index = ?2, \
         blue_band_index = ?3, nir_band_index = ?4 WHERE coverage_name = ?5",
        params![bands.red, bands.green, bands.blue, bands.nir, coverage.name()],
    )?;
    info!(coverage = %coverage.name(), ?bands, "Set default bands");
    Ok(())
}

/// Default bands of a coverage, `None` when never set.
pub fn get_default_bands(conn: &Connection, name: &str) -> Result<Option<DefaultBands>> {
    Ok(Coverage::load(conn, name)?.default_bands())
}

/// Turn automatic NDVI output on or off. Enabling needs default bands.
pub fn enable_auto_ndvi(conn: &Connection, name: &str, enabled: bool) -> Result<()> {
    let coverage = Coverage::load(conn, name)?;
    if enabled && coverage.default_bands().is_none() {
        return Err(StoreError::validation(format!(
            "coverage {} has no default bands",
            coverage.name()
        )));
    }
    conn.execute(
        "UPDATE raster_coverages SET enable_auto_ndvi = ?1 WHERE coverage_name = ?2",
        params![enabled, coverage.name()],
    )?;
    info!(coverage = %coverage.name(), enabled, "Set auto NDVI");
    Ok(())
}

pub fn set_coverage_infos(
    conn: &Connection,
    name: &str,
    title: &str,
    abstract_text: &str,
    is_queryable: bool,
) -> Result<()> {
    let coverage = Coverage::load(conn, name)?;
    conn.execute(
        "UPDATE raster_coverages SET title = ?1, abstract = ?2, is_queryable = ?3 \
         WHERE coverage_name = ?4",
        params![title, abstract_text, is_queryable, coverage.name()],
    )?;
    Ok(())
}

/// Recompute the coverage extent from its section footprints.
///
/// Returns `None` (and clears the extent) for a coverage without sections.
pub fn update_coverage_extent(conn: &Connection, name: &str) -> Result<Option<BoundingBox>> {
    let coverage = Coverage::load(conn, name)?;
    let sql = format!(
        "SELECT min(MbrMinX(geometry)), min(MbrMinY(geometry)), max(MbrMaxX(geometry)), \
         max(MbrMaxY(geometry)) FROM \"{}\"",
        coverage.tables().sections
    );
    let extent = conn.query_row(&sql, [], |r| {
        let corners: (Option<f64>, Option<f64>, Option<f64>, Option<f64>) =
            (r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?);
        Ok(match corners {
            (Some(a), Some(b), Some(c), Some(d)) => Some(BoundingBox::new(a, b, c, d)),
            _ => None,
        })
    })?;
    let geo = extent.filter(|_| coverage.srid() == WGS84);

    conn.execute(
        "UPDATE raster_coverages SET extent_minx = ?1, extent_miny = ?2, extent_maxx = ?3, \
         extent_maxy = ?4, geo_minx = ?5, geo_miny = ?6, geo_maxx = ?7, geo_maxy = ?8 \
         WHERE coverage_name = ?9",
        params![
            extent.map(|e| e.min_x),
            extent.map(|e| e.min_y),
            extent.map(|e| e.max_x),
            extent.map(|e| e.max_y),
            geo.map(|e| e.min_x),
            geo.map(|e| e.min_y),
            geo.map(|e| e.max_x),
            geo.map(|e| e.max_y),
            coverage.name(),
        ],
    )?;
    debug!(coverage = %coverage.name(), ?extent, "Updated coverage extent");
    Ok(extent)
}

/// Aggregate the statistics of every section into the registry row.
///
/// Returns `None` when no section carries statistics.
pub fn update_coverage_statistics(conn: &Connection, name: &str) -> Result<Option<RasterStatistics>> {
    let coverage = Coverage::load(conn, name)?;
    let mut total: Option<RasterStatistics> = None;
    for section in list_sections(conn, &coverage)? {
        let Some(stats) = section_statistics(conn, &coverage, section.section_id)? else {
            continue;
        };
        match total.as_mut() {
            Some(t) => t.aggregate(&stats)?,
            None => total = Some(stats),
        }
    }
    conn.execute(
        "UPDATE raster_coverages SET statistics = ?1 WHERE coverage_name = ?2",
        params![total.as_ref().map(|s| s.encode()), coverage.name()],
    )?;
    Ok(total)
}

/// Decoded coverage statistics from the registry.
pub fn coverage_statistics(conn: &Connection, name: &str) -> Result<Option<RasterStatistics>> {
    let coverage = Coverage::load(conn, name)?;
    let blob: Option<Vec<u8>> = conn.query_row(
        "SELECT statistics FROM raster_coverages WHERE coverage_name = ?1",
        [coverage.name()],
        |r| r.get(0),
    )?;
    Ok(blob.map(|b| RasterStatistics::decode(&b)).transpose()?)
}

/// Register an alternative SRID the coverage can be served in.
pub fn register_alternative_srid(conn: &Connection, name: &str, srid: i32) -> Result<()> {
    let coverage = Coverage::load(conn, name)?;
    if srid <= 0 {
        return Err(StoreError::invalid_argument(format!("invalid SRID {}", srid)));
    }
    if srid == coverage.srid() {
        return Err(StoreError::validation(format!(
            "SRID {} is the native SRID of {}",
            srid,
            coverage.name()
        )));
    }
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO raster_coverages_srid (coverage_name, srid) VALUES (?1, ?2)",
        params![coverage.name(), srid],
    )?;
    if inserted == 0 {
        return Err(StoreError::validation(format!(
            "SRID {} already registered for {}",
            srid,
            coverage.name()
        )));
    }
    Ok(())
}

pub fn unregister_alternative_srid(conn: &Connection, name: &str, srid: i32) -> Result<bool> {
    let coverage = Coverage::load(conn, name)?;
    let deleted = conn.execute(
        "DELETE FROM raster_coverages_srid WHERE coverage_name = ?1 AND srid = ?2",
        params![coverage.name(), srid],
    )?;
    Ok(deleted > 0)
}

pub fn alternative_srids(conn: &Connection, name: &str) -> Result<Vec<i32>> {
    let coverage = Coverage::load(conn, name)?;
    let mut stmt = conn
        .prepare("SELECT srid FROM raster_coverages_srid WHERE coverage_name = ?1 ORDER BY srid")?;
    let srids = stmt
        .query_map([coverage.name()], |r| r.get(0))?
        .collect::<rusqlite::Result<Vec<i32>>>()?;
    Ok(srids)
}

pub fn register_keyword(conn: &Connection, name: &str, keyword: &str) -> Result<()> {
    let coverage = Coverage::load(conn, name)?;
    let keyword = keyword.trim();
    if keyword.is_empty() {
        return Err(StoreError::invalid_argument("keyword is empty"));
    }
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO raster_coverages_keyword (coverage_name, keyword) VALUES (?1, ?2)",
        params![coverage.name(), keyword],
    )?;
    if inserted == 0 {
        return Err(StoreError::validation(format!(
            "keyword {:?} already registered for {}",
            keyword,
            coverage.name()
        )));
    }
    Ok(())
}

pub fn unregister_keyword(conn: &Connection, name: &str, keyword: &str) -> Result<bool> {
    let coverage = Coverage::load(conn, name)?;
    let deleted = conn.execute(
        "DELETE FROM raster_coverages_keyword WHERE coverage_name = ?1 AND keyword = ?2",
        params![coverage.name(), keyword.trim()],
    )?;
    Ok(deleted > 0)
}

pub fn keywords(conn: &Connection, name: &str) -> Result<Vec<String>> {
    let coverage = Coverage::load(conn, name)?;
    let mut stmt = conn.prepare(
        "SELECT keyword FROM raster_coverages_keyword WHERE coverage_name = ?1 ORDER BY keyword",
    )?;
    let keywords = stmt
        .query_map([coverage.name()], |r| r.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(keywords)
}

/// One line of the coverage listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoverageSummary {
    pub name: String,
    pub title: String,
    pub sample_type: String,
    pub pixel_type: String,
    pub num_bands: u8,
    pub compression: String,
    pub tile_width: u32,
    pub tile_height: u32,
    pub srid: i32,
    pub mixed_resolutions: bool,
    pub sections: usize,
    pub extent: Option<BoundingBox>,
}

impl CoverageSummary {
    fn new(coverage: &Coverage, sections: usize) -> Self {
        Self {
            name: coverage.name().to_string(),
            title: coverage.title().to_string(),
            sample_type: coverage.sample_type().to_string(),
            pixel_type: coverage.pixel_type().to_string(),
            num_bands: coverage.num_bands(),
            compression: coverage.compression().to_string(),
            tile_width: coverage.tile_width(),
            tile_height: coverage.tile_height(),
            srid: coverage.srid(),
            mixed_resolutions: coverage.is_mixed_resolution(),
            sections,
            extent: coverage.extent(),
        }
    }
}

/// Summaries of every registered coverage, by name.
pub fn list_coverages(conn: &Connection) -> Result<Vec<CoverageSummary>> {
    let mut stmt = conn.prepare("SELECT coverage_name FROM raster_coverages ORDER BY coverage_name")?;
    let names = stmt
        .query_map([], |r| r.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    names
        .iter()
        .map(|name| {
            let coverage = Coverage::load(conn, name)?;
            let sections: i64 = conn.query_row(
                &format!("SELECT count(*) FROM \"{}\"", coverage.tables().sections),
                [],
                |r| r.get(0),
            )?;
            Ok(CoverageSummary::new(&coverage, sections as usize))
        })
        .collect()
}

/// Summary of one coverage, `None` when it does not exist.
pub fn coverage_summary(conn: &Connection, name: &str) -> Result<Option<CoverageSummary>> {
    let exists: Option<String> = conn
        .query_row(
            "SELECT coverage_name FROM raster_coverages WHERE coverage_name = ?1",
            [name],
            |r| r.get(0),
        )
        .optional()?;
    match exists {
        Some(_) => {
            let coverage = Coverage::load(conn, name)?;
            let sections = list_sections(conn, &coverage)?.len();
            Ok(Some(CoverageSummary::new(&coverage, sections)))
        }
        None => Ok(None),
    }
}
