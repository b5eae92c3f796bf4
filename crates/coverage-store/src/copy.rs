//! Copy a coverage from an attached database into `main`.

use rusqlite::Connection;
use tracing::info;

use crate::coverage::Coverage;
use crate::error::{Result, StoreError};
use crate::schema::{check_identifier, coverage_exists, create_coverage, table_exists};

/// Registry columns not covered by the coverage definition.
const EXTRA_COLUMNS: &str = "title, abstract, statistics, geo_minx, geo_miny, geo_maxx, \
    geo_maxy, extent_minx, extent_miny, extent_maxx, extent_maxy, is_queryable, \
    red_band_index, green_band_index, blue_band_index, nir_band_index, enable_auto_ndvi";

const LEVEL_COLUMNS: &str = "pyramid_level, x_resolution_1_1, y_resolution_1_1, \
    x_resolution_1_2, y_resolution_1_2, x_resolution_1_4, y_resolution_1_4, \
    x_resolution_1_8, y_resolution_1_8";

/// Copy coverage `name` (registry row, levels, sections, tiles, tile data,
/// SRIDs and keywords) from the database attached as `db_prefix`.
///
/// The destination name must be free and the source schema complete.
pub fn copy_coverage(conn: &Connection, db_prefix: &str, name: &str) -> Result<()> {
    check_identifier(db_prefix)?;
    check_identifier(name)?;
    if coverage_exists(conn, name)? {
        return Err(StoreError::CoverageExists(name.to_string()));
    }
    let source = Coverage::load_from(conn, Some(db_prefix), name)?;
    let tables = source.tables();
    let levels_table = if source.is_mixed_resolution() {
        &tables.section_levels
    } else {
        &tables.levels
    };
    for table in [levels_table, &tables.sections, &tables.tiles, &tables.tile_data] {
        if !table_exists(conn, db_prefix, table)? {
            return Err(StoreError::validation(format!(
                "source coverage {} is incomplete: {}.{} is missing",
                name, db_prefix, table
            )));
        }
    }

    create_coverage(conn, &source.definition())?;
    conn.execute(
        &format!(
            "UPDATE raster_coverages SET ({cols}) = \
             (SELECT {cols} FROM \"{db}\".raster_coverages WHERE coverage_name = ?1) \
             WHERE coverage_name = ?1",
            cols = EXTRA_COLUMNS,
            db = db_prefix
        ),
        [source.name()],
    )?;

    let copy = |table: &str, columns: &str| -> Result<usize> {
        Ok(conn.execute(
            &format!(
                "INSERT INTO main.\"{t}\" ({c}) SELECT {c} FROM \"{db}\".\"{t}\"",
                t = table,
                c = columns,
                db = db_prefix
            ),
            [],
        )?)
    };
    let sections = copy(
        &tables.sections,
        "section_id, section_name, width, height, file_path, md5_checksum, summary, \
         statistics, geometry",
    )?;
    if source.is_mixed_resolution() {
        copy(&tables.section_levels, &format!("section_id, {}", LEVEL_COLUMNS))?;
    } else {
        copy(&tables.levels, LEVEL_COLUMNS)?;
    }
    let tiles = copy(&tables.tiles, "tile_id, pyramid_level, section_id, geometry")?;
    copy(&tables.tile_data, "tile_id, tile_data_odd, tile_data_even")?;

    for (side, column) in [
        ("raster_coverages_srid", "srid"),
        ("raster_coverages_keyword", "keyword"),
    ] {
        if !table_exists(conn, db_prefix, side)? {
            continue;
        }
        conn.execute(
            &format!(
                "INSERT INTO main.{side} (coverage_name, {column}) \
                 SELECT ?1, {column} FROM \"{db_prefix}\".{side} WHERE coverage_name = ?1"
            ),
            [source.name()],
        )?;
    }

    info!(
        coverage = %source.name(),
        from = %db_prefix,
        sections,
        tiles,
        "Copied coverage"
    );
    Ok(())
}
