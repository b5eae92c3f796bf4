//! Per-coverage schema: create, drop, delete sections.
//!
//! None of these functions opens a transaction. Callers that need the
//! multi-statement sequences to be atomic pass a transaction (see
//! [`RasterDb::unit_of_work`](crate::RasterDb::unit_of_work)).

use rusqlite::{params, Connection};
use tracing::{debug, info};

use crate::coverage::{Coverage, CoverageDefinition, CoverageTables};
use crate::error::{Result, StoreError};

/// `geometry_columns.geometry_type` code for POLYGON.
const GEOMETRY_POLYGON: i32 = 3;

/// Check a coverage name or database alias is a plain SQL identifier.
pub fn check_identifier(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let first_ok = chars
        .next()
        .map_or(false, |c| c.is_ascii_alphabetic() || c == '_');
    if !first_ok || name.len() > 64 || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(StoreError::invalid_argument(format!(
            "invalid name {:?}: expected letters, digits and underscores",
            name
        )));
    }
    Ok(())
}

/// Whether a coverage is registered (case-insensitive).
pub fn coverage_exists(conn: &Connection, name: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT count(*) FROM raster_coverages WHERE coverage_name = ?1",
        [name],
        |r| r.get(0),
    )?;
    Ok(count > 0)
}

/// Whether a table exists in `schema` ("main" or an attached alias).
pub(crate) fn table_exists(conn: &Connection, schema: &str, table: &str) -> Result<bool> {
    let sql = format!(
        "SELECT count(*) FROM \"{}\".sqlite_master WHERE type = 'table' AND name = ?1 COLLATE NOCASE",
        schema
    );
    let count: i64 = conn.query_row(&sql, [table], |r| r.get(0))?;
    Ok(count > 0)
}

/// Register a coverage and create its tables, indexes and triggers.
pub fn create_coverage(conn: &Connection, def: &CoverageDefinition) -> Result<()> {
    def.validate()?;
    if coverage_exists(conn, &def.name)? {
        return Err(StoreError::CoverageExists(def.name.clone()));
    }

    insert_registry_row(conn, def)?;
    let tables = CoverageTables::new(&def.name);
    if def.policies.mixed_resolutions {
        create_section_levels_table(conn, &tables)?;
    } else {
        create_levels_table(conn, &tables)?;
    }
    create_sections_table(conn, &def.name, &tables, def.srid)?;
    create_tiles_tables(conn, &def.name, &tables, def.srid, def.policies.mixed_resolutions)?;

    info!(
        coverage = %def.name,
        sample = %def.sample_type,
        pixel = %def.pixel_type,
        bands = def.num_bands,
        compression = %def.compression,
        mixed = def.policies.mixed_resolutions,
        "Created coverage"
    );
    Ok(())
}

fn insert_registry_row(conn: &Connection, def: &CoverageDefinition) -> Result<()> {
    let (x_res, y_res) = def.registry_resolution();
    conn.execute(
        "INSERT INTO raster_coverages (coverage_name, sample_type, pixel_type, num_bands, \
         compression, quality, tile_width, tile_height, horz_resolution, vert_resolution, \
         srid, nodata_pixel, palette, strict_resolution, mixed_resolutions, section_paths, \
         section_md5, section_summary) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
        params![
            def.name,
            def.sample_type.as_str(),
            def.pixel_type.as_str(),
            def.num_bands,
            def.compression.as_str(),
            def.quality,
            def.tile_width,
            def.tile_height,
            x_res,
            y_res,
            def.srid,
            def.no_data.as_ref().map(|p| p.encode()),
            def.palette.as_ref().map(|p| p.encode()),
            def.policies.strict_resolution,
            def.policies.mixed_resolutions,
            def.policies.section_paths,
            def.policies.section_md5,
            def.policies.section_summary,
        ],
    )?;
    Ok(())
}

const RESOLUTION_COLUMNS: &str = "
    x_resolution_1_1 DOUBLE NOT NULL,
    y_resolution_1_1 DOUBLE NOT NULL,
    x_resolution_1_2 DOUBLE,
    y_resolution_1_2 DOUBLE,
    x_resolution_1_4 DOUBLE,
    y_resolution_1_4 DOUBLE,
    x_resolution_1_8 DOUBLE,
    y_resolution_1_8 DOUBLE";

fn create_levels_table(conn: &Connection, tables: &CoverageTables) -> Result<()> {
    conn.execute_batch(&format!(
        "CREATE TABLE \"{levels}\" (
            pyramid_level INTEGER PRIMARY KEY,{cols}
        );",
        levels = tables.levels,
        cols = RESOLUTION_COLUMNS,
    ))?;
    debug!(table = %tables.levels, "Created levels table");
    Ok(())
}

fn create_section_levels_table(conn: &Connection, tables: &CoverageTables) -> Result<()> {
    conn.execute_batch(&format!(
        "CREATE TABLE \"{levels}\" (
            section_id INTEGER NOT NULL,
            pyramid_level INTEGER NOT NULL,{cols},
            CONSTRAINT \"pk_{levels}\" PRIMARY KEY (section_id, pyramid_level),
            CONSTRAINT \"fk_{levels}\" FOREIGN KEY (section_id)
                REFERENCES \"{sections}\" (section_id) ON DELETE CASCADE
        );",
        levels = tables.section_levels,
        sections = tables.sections,
        cols = RESOLUTION_COLUMNS,
    ))?;
    debug!(table = %tables.section_levels, "Created section levels table");
    Ok(())
}

/// R*Tree index over a geometry column plus the triggers keeping it in sync.
fn spatial_index_ddl(table: &str, pk: &str, rtree: &str) -> String {
    format!(
        "CREATE VIRTUAL TABLE \"{rtree}\" USING rtree(pkid, xmin, xmax, ymin, ymax);
        CREATE TRIGGER \"ggi_{table}_geometry\" AFTER INSERT ON \"{table}\"
        FOR EACH ROW WHEN NEW.geometry IS NOT NULL BEGIN
            INSERT INTO \"{rtree}\" (pkid, xmin, xmax, ymin, ymax)
            VALUES (NEW.{pk}, MbrMinX(NEW.geometry), MbrMaxX(NEW.geometry),
                    MbrMinY(NEW.geometry), MbrMaxY(NEW.geometry));
        END;
        CREATE TRIGGER \"ggu_{table}_geometry\" AFTER UPDATE OF geometry ON \"{table}\"
        FOR EACH ROW BEGIN
            DELETE FROM \"{rtree}\" WHERE pkid = OLD.{pk};
            INSERT INTO \"{rtree}\" (pkid, xmin, xmax, ymin, ymax)
            SELECT NEW.{pk}, MbrMinX(NEW.geometry), MbrMaxX(NEW.geometry),
                   MbrMinY(NEW.geometry), MbrMaxY(NEW.geometry)
            WHERE NEW.geometry IS NOT NULL;
        END;
        CREATE TRIGGER \"gid_{table}_geometry\" AFTER DELETE ON \"{table}\"
        FOR EACH ROW BEGIN
            DELETE FROM \"{rtree}\" WHERE pkid = OLD.{pk};
        END;"
    )
}

fn register_geometry_column(conn: &Connection, table: &str, srid: i32) -> Result<()> {
    conn.execute(
        "INSERT INTO geometry_columns (f_table_name, f_geometry_column, geometry_type, \
         coord_dimension, srid, spatial_index_enabled) VALUES (lower(?1), 'geometry', ?2, 2, ?3, 1)",
        params![table, GEOMETRY_POLYGON, srid],
    )?;
    Ok(())
}

fn create_sections_table(
    conn: &Connection,
    coverage: &str,
    tables: &CoverageTables,
    srid: i32,
) -> Result<()> {
    let sections = &tables.sections;
    conn.execute_batch(&format!(
        "CREATE TABLE \"{sections}\" (
            section_id INTEGER PRIMARY KEY AUTOINCREMENT,
            section_name TEXT NOT NULL,
            width INTEGER NOT NULL,
            height INTEGER NOT NULL,
            file_path TEXT,
            md5_checksum TEXT,
            summary TEXT,
            statistics BLOB,
            geometry BLOB NOT NULL
        );
        CREATE UNIQUE INDEX \"idx_{coverage}_sect_name\" ON \"{sections}\" (section_name);
        CREATE INDEX \"idx_{coverage}_sect_md5\" ON \"{sections}\" (md5_checksum);
        CREATE TRIGGER \"{sections}_statistics_insert\" BEFORE INSERT ON \"{sections}\"
        FOR EACH ROW BEGIN
            SELECT RAISE(ABORT, 'insert on {sections} violates constraint: invalid statistics')
            WHERE NEW.statistics IS NOT NULL AND IsValidRasterStatistics(NEW.statistics,
                (SELECT sample_type FROM raster_coverages WHERE coverage_name = '{coverage}'),
                (SELECT num_bands FROM raster_coverages WHERE coverage_name = '{coverage}')) <> 1;
        END;
        CREATE TRIGGER \"{sections}_statistics_update\" BEFORE UPDATE OF statistics ON \"{sections}\"
        FOR EACH ROW BEGIN
            SELECT RAISE(ABORT, 'update on {sections} violates constraint: invalid statistics')
            WHERE NEW.statistics IS NOT NULL AND IsValidRasterStatistics(NEW.statistics,
                (SELECT sample_type FROM raster_coverages WHERE coverage_name = '{coverage}'),
                (SELECT num_bands FROM raster_coverages WHERE coverage_name = '{coverage}')) <> 1;
        END;
        {rtree}",
        rtree = spatial_index_ddl(sections, "section_id", &tables.sections_rtree),
    ))?;
    register_geometry_column(conn, sections, srid)?;
    debug!(table = %sections, "Created sections table");
    Ok(())
}

fn create_tiles_tables(
    conn: &Connection,
    coverage: &str,
    tables: &CoverageTables,
    srid: i32,
    mixed: bool,
) -> Result<()> {
    let tiles = &tables.tiles;
    let tile_data = &tables.tile_data;
    let level_fk = if mixed {
        format!(
            "CONSTRAINT \"fk_{tiles}_level\" FOREIGN KEY (section_id, pyramid_level)
                REFERENCES \"{}\" (section_id, pyramid_level) ON DELETE CASCADE",
            tables.section_levels
        )
    } else {
        format!(
            "CONSTRAINT \"fk_{tiles}_level\" FOREIGN KEY (pyramid_level)
                REFERENCES \"{}\" (pyramid_level)",
            tables.levels
        )
    };
    let validate_tile = |op: &str| {
        format!(
            "SELECT RAISE(ABORT, '{op} on {tile_data} violates constraint: invalid tile')
            WHERE (SELECT IsValidRasterTile(t.pyramid_level, c.tile_width, c.tile_height,
                        NEW.tile_data_odd, NEW.tile_data_even, c.sample_type, c.pixel_type,
                        c.num_bands, c.compression)
                   FROM \"{tiles}\" AS t, raster_coverages AS c
                   WHERE t.tile_id = NEW.tile_id AND c.coverage_name = '{coverage}') IS NOT 1;"
        )
    };

    conn.execute_batch(&format!(
        "CREATE TABLE \"{tiles}\" (
            tile_id INTEGER PRIMARY KEY AUTOINCREMENT,
            pyramid_level INTEGER NOT NULL,
            section_id INTEGER,
            geometry BLOB NOT NULL,
            CONSTRAINT \"fk_{tiles}_section\" FOREIGN KEY (section_id)
                REFERENCES \"{sections}\" (section_id) ON DELETE CASCADE,
            {level_fk}
        );
        CREATE INDEX \"idx_{coverage}_tiles_lev\" ON \"{tiles}\" (pyramid_level);
        CREATE INDEX \"idx_{coverage}_tiles_sect\" ON \"{tiles}\" (section_id);
        {rtree}
        CREATE TABLE \"{tile_data}\" (
            tile_id INTEGER NOT NULL PRIMARY KEY,
            tile_data_odd BLOB NOT NULL,
            tile_data_even BLOB,
            CONSTRAINT \"fk_{tile_data}\" FOREIGN KEY (tile_id)
                REFERENCES \"{tiles}\" (tile_id) ON DELETE CASCADE
        );
        CREATE TRIGGER \"{tile_data}_insert\" BEFORE INSERT ON \"{tile_data}\"
        FOR EACH ROW BEGIN
            {check_insert}
        END;
        CREATE TRIGGER \"{tile_data}_update\" BEFORE UPDATE ON \"{tile_data}\"
        FOR EACH ROW BEGIN
            {check_update}
        END;",
        sections = tables.sections,
        rtree = spatial_index_ddl(tiles, "tile_id", &tables.tiles_rtree),
        check_insert = validate_tile("insert"),
        check_update = validate_tile("update"),
    ))?;
    register_geometry_column(conn, tiles, srid)?;
    debug!(table = %tiles, "Created tiles and tile data tables");
    Ok(())
}

/// Remove a coverage: spatial indexes, tables, geometry registrations,
/// side-table rows and the registry row.
pub fn drop_coverage(conn: &Connection, name: &str) -> Result<()> {
    check_identifier(name)?;
    let coverage = Coverage::load(conn, name)?;
    let name = coverage.name();
    let tables = coverage.tables();

    let mut ddl = String::new();
    for (table, rtree) in [
        (&tables.tiles, &tables.tiles_rtree),
        (&tables.sections, &tables.sections_rtree),
    ] {
        for prefix in ["ggi", "ggu", "gid"] {
            ddl.push_str(&format!(
                "DROP TRIGGER IF EXISTS \"{}_{}_geometry\";\n",
                prefix, table
            ));
        }
        ddl.push_str(&format!("DROP TABLE IF EXISTS \"{}\";\n", rtree));
    }
    for table in [
        &tables.tile_data,
        &tables.tiles,
        &tables.section_levels,
        &tables.sections,
        &tables.levels,
    ] {
        ddl.push_str(&format!("DROP TABLE IF EXISTS \"{}\";\n", table));
    }
    conn.execute_batch(&ddl)?;

    conn.execute(
        "DELETE FROM geometry_columns WHERE f_table_name IN (lower(?1), lower(?2))",
        params![tables.sections, tables.tiles],
    )?;
    conn.execute(
        "DELETE FROM raster_coverages_srid WHERE coverage_name = ?1",
        [name],
    )?;
    conn.execute(
        "DELETE FROM raster_coverages_keyword WHERE coverage_name = ?1",
        [name],
    )?;
    conn.execute(
        "DELETE FROM raster_coverages WHERE coverage_name = ?1",
        [name],
    )?;

    info!(coverage = %name, "Dropped coverage");
    Ok(())
}

/// Delete one section; its tiles, tile data and section levels follow
/// through cascading foreign keys.
pub fn delete_section(conn: &Connection, coverage: &str, section_id: i64) -> Result<()> {
    check_identifier(coverage)?;
    let coverage = Coverage::load(conn, coverage)?;
    let deleted = conn.execute(
        &format!(
            "DELETE FROM \"{}\" WHERE section_id = ?1",
            coverage.tables().sections
        ),
        [section_id],
    )?;
    if deleted == 0 {
        return Err(StoreError::section_not_found(coverage.name(), section_id));
    }
    info!(coverage = %coverage.name(), section_id, "Deleted section");
    Ok(())
}
