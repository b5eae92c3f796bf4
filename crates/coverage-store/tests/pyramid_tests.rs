//! Pyramid construction and removal.

mod common;

use common::*;
use coverage_store::{
    build_coverage_pyramid, build_section_pyramid, delete_section_pyramid, export_raw_pixels,
    CoverageDefinition, EngineConfig, RasterRequest,
};
use raster_common::{downsample, BoundingBox, DownsampleMethod, Pixel, PixelType, SampleType};
use test_utils::{dem_grid, gray_palette, palette_raster, rgb_gradient};

fn tiles_at(conn: &rusqlite::Connection, coverage: &str, level: i32, even_null: bool) -> i64 {
    let sql = format!(
        "SELECT count(*) FROM \"{c}_tiles\" AS t JOIN \"{c}_tile_data\" AS d ON d.tile_id = t.tile_id \
         WHERE t.pyramid_level = ?1 AND (d.tile_data_even IS NULL) = ?2",
        c = coverage
    );
    conn.query_row(&sql, rusqlite::params![level, even_null], |r| r.get(0))
        .unwrap()
}

#[test]
fn test_even_half_only_at_base_level() {
    let db = memory_db();
    let conn = db.conn();
    let coverage = create(conn, &rgb_definition("ortho", 256));
    let report = import_at(conn, &coverage, "a", &rgb_gradient(600, 300), 0.0, 300.0, 1.0);

    let pyramid =
        build_section_pyramid(conn, &EngineConfig::default(), &coverage, report.section_id)
            .unwrap();
    assert_eq!(pyramid.levels, 1);
    assert_eq!(pyramid.tiles, 1);

    assert_eq!(tiles_at(conn, "ortho", 0, false), 6);
    assert_eq!(tiles_at(conn, "ortho", 0, true), 0);
    assert_eq!(tiles_at(conn, "ortho", 1, true), 1);
    assert_eq!(tiles_at(conn, "ortho", 1, false), 0);
    assert_eq!(count(conn, "ortho_levels"), 2);
}

#[test]
fn test_pyramid_level_matches_downsampled_base() {
    let db = memory_db();
    let conn = db.conn();
    let coverage = create(conn, &rgb_definition("ortho", 256));
    let source = rgb_gradient(600, 300);
    let report = import_at(conn, &coverage, "a", &source, 0.0, 300.0, 1.0);
    let config = EngineConfig::default();
    build_section_pyramid(conn, &config, &coverage, report.section_id).unwrap();

    let expected = downsample(
        &source.with_no_data(Some(Pixel::rgb8(0, 0, 0))).unwrap(),
        8,
        DownsampleMethod::Mean,
    )
    .unwrap();
    assert_eq!((expected.width(), expected.height()), (75, 38));

    // 38 rows of 8 units reach 4 units below the section
    let request = RasterRequest::new(BoundingBox::new(0.0, -4.0, 600.0, 300.0), 75, 38);
    let raster = export_raw_pixels(conn, &config, &coverage, &request).unwrap();
    assert!(raster.buffer() == expected.buffer());
}

#[test]
fn test_pyramid_footprints_follow_section_resolution() {
    let db = memory_db();
    let conn = db.conn();
    let coverage = create(conn, &rgb_definition("ortho", 256));
    // 0.9% coarser than the coverage resolution, still accepted
    let source = rgb_gradient(2048, 64);
    let report = import_at(conn, &coverage, "a", &source, 0.0, 64.576, 1.009);
    let config = EngineConfig::default();
    build_section_pyramid(conn, &config, &coverage, report.section_id).unwrap();

    let max_x = |level: i32| -> f64 {
        conn.query_row(
            "SELECT max(MbrMaxX(geometry)) FROM ortho_tiles WHERE pyramid_level = ?1",
            [level],
            |r| r.get(0),
        )
        .unwrap()
    };
    let section_max_x: f64 = conn
        .query_row("SELECT MbrMaxX(geometry) FROM ortho_sections", [], |r| r.get(0))
        .unwrap();
    test_utils::assert_approx_eq!(section_max_x, 2066.432, 1e-9);
    test_utils::assert_approx_eq!(max_x(0), section_max_x, 1e-9);
    test_utils::assert_approx_eq!(max_x(1), section_max_x, 1e-9);

    let expected = downsample(
        &source.with_no_data(Some(Pixel::rgb8(0, 0, 0))).unwrap(),
        8,
        DownsampleMethod::Mean,
    )
    .unwrap();
    let request = RasterRequest::new(BoundingBox::new(0.0, 0.0, 2066.432, 64.576), 256, 8);
    let raster = export_raw_pixels(conn, &config, &coverage, &request).unwrap();
    assert!(raster.buffer() == expected.buffer());
}

#[test]
fn test_rebuild_replaces_existing_pyramid() {
    let db = memory_db();
    let conn = db.conn();
    let coverage = create(conn, &rgb_definition("ortho", 256));
    let report = import_at(conn, &coverage, "a", &rgb_gradient(2100, 300), 0.0, 300.0, 1.0);
    let config = EngineConfig::default();

    let first = build_section_pyramid(conn, &config, &coverage, report.section_id).unwrap();
    let tiles_after_first = count(conn, "ortho_tiles");
    let second = build_section_pyramid(conn, &config, &coverage, report.section_id).unwrap();
    assert_eq!(first, second);
    assert_eq!(count(conn, "ortho_tiles"), tiles_after_first);

    let deleted = delete_section_pyramid(conn, &coverage, report.section_id).unwrap();
    assert_eq!(deleted, second.tiles);
    assert_eq!(count(conn, "ortho_tiles"), report.tiles as i64);
    assert_eq!(count(conn, "ortho_levels"), 1);
    assert_eq!(count(conn, "ortho_tile_data"), count(conn, "ortho_tiles"));
    assert_eq!(count(conn, "idx_ortho_tiles_geometry"), count(conn, "ortho_tiles"));
}

#[test]
fn test_small_section_needs_no_pyramid() {
    let db = memory_db();
    let conn = db.conn();
    let coverage = create(conn, &rgb_definition("ortho", 256));
    let report = import_at(conn, &coverage, "a", &rgb_gradient(200, 100), 0.0, 100.0, 1.0);
    let pyramid =
        build_section_pyramid(conn, &EngineConfig::default(), &coverage, report.section_id)
            .unwrap();
    assert_eq!((pyramid.levels, pyramid.tiles), (0, 0));
    assert_eq!(count(conn, "ortho_levels"), 1);
}

#[test]
fn test_coverage_pyramid_covers_every_section() {
    let db = memory_db();
    let conn = db.conn();
    let coverage = create(conn, &rgb_definition("ortho", 256));
    import_at(conn, &coverage, "a", &rgb_gradient(600, 300), 0.0, 300.0, 1.0);
    import_at(conn, &coverage, "b", &rgb_gradient(300, 600), 600.0, 600.0, 1.0);

    let reports = build_coverage_pyramid(conn, &EngineConfig::default(), &coverage).unwrap();
    assert_eq!(reports.len(), 2);
    assert!(reports.iter().all(|r| r.levels == 1 && r.tiles == 1));
    // both sections share the coverage-wide level row
    assert_eq!(count(conn, "ortho_levels"), 2);
}

#[test]
fn test_mixed_resolution_pyramid_uses_section_levels() {
    let db = memory_db();
    let conn = db.conn();
    let def = CoverageDefinition::new("dem", SampleType::Float, PixelType::DataGrid, 1)
        .with_policies(mixed_policies());
    let coverage = create(conn, &def);
    let fine = import_at(conn, &coverage, "fine", &dem_grid(600, 300), 0.0, 300.0, 1.0);
    let coarse = import_at(conn, &coverage, "coarse", &dem_grid(300, 300), 600.0, 300.0, 2.0);

    let config = EngineConfig::default();
    build_section_pyramid(conn, &config, &coverage, fine.section_id).unwrap();
    build_section_pyramid(conn, &config, &coverage, coarse.section_id).unwrap();

    let level_one: Vec<f64> = {
        let mut stmt = conn
            .prepare(
                "SELECT x_resolution_1_1 FROM dem_section_levels \
                 WHERE pyramid_level = 1 ORDER BY section_id",
            )
            .unwrap();
        stmt.query_map([], |r| r.get(0))
            .unwrap()
            .collect::<rusqlite::Result<Vec<f64>>>()
            .unwrap()
    };
    assert_eq!(level_one, vec![8.0, 16.0]);

    delete_section_pyramid(conn, &coverage, fine.section_id).unwrap();
    assert_eq!(count(conn, "dem_section_levels"), 3);
}

#[test]
fn test_palette_pyramid_keeps_valid_indices() {
    let db = memory_db();
    let conn = db.conn();
    let def = CoverageDefinition::new("classes", SampleType::UInt8, PixelType::Palette, 1)
        .with_palette(gray_palette(4));
    let coverage = create(conn, &def);
    let report = import_at(conn, &coverage, "a", &palette_raster(600, 600, 4), 0.0, 600.0, 1.0);

    let config = EngineConfig::default();
    build_section_pyramid(conn, &config, &coverage, report.section_id).unwrap();

    let request = RasterRequest::new(BoundingBox::new(0.0, 0.0, 600.0, 600.0), 75, 75);
    let raster = export_raw_pixels(conn, &config, &coverage, &request).unwrap();
    assert!(raster.buffer().iter().all(|&i| i < 4));
    // nearest keeps the first cell of each 8x8 block
    assert_eq!(raster.pixel_bytes(1, 0), &[0]);
    assert_eq!(raster.pixel_bytes(0, 1), &[0]);
}
