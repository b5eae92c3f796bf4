//! Common helpers for coverage-store integration tests.
//!
//! Provides helpers for:
//! - Log output captured by the test harness
//! - In-memory stores with a ready-made coverage
//! - Importing synthetic rasters

#![allow(dead_code)]

use coverage_store::{
    create_coverage, import_section, Coverage, CoverageDefinition, CoveragePolicies,
    ImportReport, NewSection, RasterDb,
};
use raster_common::{BoundingBox, Compression, Pixel, PixelType, Raster, SampleType};
use rusqlite::Connection;

/// Route `tracing` output to the test harness (`RUST_LOG` filters it).
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn memory_db() -> RasterDb {
    init_tracing();
    RasterDb::open_in_memory().expect("in-memory store")
}

/// RGB UINT8 coverage with black no-data and unit resolution.
pub fn rgb_definition(name: &str, tile: u32) -> CoverageDefinition {
    CoverageDefinition::new(name, SampleType::UInt8, PixelType::Rgb, 3)
        .with_compression(Compression::None, 100)
        .with_tile_size(tile, tile)
        .with_no_data(Pixel::rgb8(0, 0, 0))
}

pub fn mixed_policies() -> CoveragePolicies {
    CoveragePolicies {
        mixed_resolutions: true,
        ..Default::default()
    }
}

/// Create a coverage and load it back.
pub fn create(conn: &Connection, def: &CoverageDefinition) -> Coverage {
    create_coverage(conn, def).expect("create coverage");
    Coverage::load(conn, &def.name).expect("load coverage")
}

/// Import `raster` as a section whose upper-left corner is (`min_x`, `max_y`)
/// at resolution `res` in both directions.
pub fn import_at(
    conn: &Connection,
    coverage: &Coverage,
    name: &str,
    raster: &Raster,
    min_x: f64,
    max_y: f64,
    res: f64,
) -> ImportReport {
    let bbox = BoundingBox::new(
        min_x,
        max_y - raster.height() as f64 * res,
        min_x + raster.width() as f64 * res,
        max_y,
    );
    let section = NewSection::new(name, bbox, raster.width(), raster.height());
    import_section(conn, coverage, section, raster).expect("import section")
}

/// Number of rows in `table`.
pub fn count(conn: &Connection, table: &str) -> i64 {
    conn.query_row(&format!("SELECT count(*) FROM \"{}\"", table), [], |r| r.get(0))
        .expect("count rows")
}

/// Names of every schema object of `kind` ("table", "trigger", "index")
/// whose name contains `fragment`.
pub fn schema_objects(conn: &Connection, kind: &str, fragment: &str) -> Vec<String> {
    let mut stmt = conn
        .prepare(
            "SELECT name FROM sqlite_master WHERE type = ?1 AND instr(name, ?2) > 0 ORDER BY name",
        )
        .expect("prepare");
    stmt.query_map([kind, fragment], |r| r.get(0))
        .expect("query")
        .collect::<rusqlite::Result<Vec<String>>>()
        .expect("collect")
}
