//! Copying a coverage between store files.

mod common;

use common::*;
use coverage_store::{
    alternative_srids, copy_coverage, coverage_statistics, export_raw_pixels, keywords,
    register_alternative_srid, register_keyword, set_coverage_infos, update_coverage_extent,
    update_coverage_statistics, Coverage, EngineConfig, RasterDb, RasterRequest, StoreError,
};
use raster_common::BoundingBox;
use test_utils::{rgb_gradient, temp_store_path, temp_test_dir};

/// Build a populated "ortho" coverage in a store file at `path`.
fn populate_source(path: &std::path::Path) {
    let db = RasterDb::open(path).unwrap();
    let conn = db.conn();
    let coverage = create(conn, &rgb_definition("ortho", 256));
    import_at(conn, &coverage, "a", &rgb_gradient(600, 300), 0.0, 300.0, 1.0);
    import_at(conn, &coverage, "b", &rgb_gradient(300, 300), 600.0, 300.0, 1.0);
    set_coverage_infos(conn, "ortho", "Orthophoto", "Synthetic sheets", true).unwrap();
    register_alternative_srid(conn, "ortho", 3857).unwrap();
    register_keyword(conn, "ortho", "imagery").unwrap();
    update_coverage_extent(conn, "ortho").unwrap();
    update_coverage_statistics(conn, "ortho").unwrap();
}

#[test]
fn test_copy_from_attached_store() {
    init_tracing();
    let dir = temp_test_dir();
    let source_path = temp_store_path(&dir, "source");
    populate_source(&source_path);

    let db = RasterDb::open(temp_store_path(&dir, "target")).unwrap();
    db.attach(&source_path, "src").unwrap();
    copy_coverage(db.conn(), "src", "ortho").unwrap();
    db.detach("src").unwrap();

    let conn = db.conn();
    let coverage = Coverage::load(conn, "ortho").unwrap();
    assert_eq!(coverage.title(), "Orthophoto");
    assert!(coverage.is_queryable());
    assert_eq!(coverage.extent(), Some(BoundingBox::new(0.0, 0.0, 900.0, 300.0)));
    assert_eq!(count(conn, "ortho_sections"), 2);
    assert_eq!(count(conn, "ortho_tiles"), 10);
    assert_eq!(count(conn, "ortho_tile_data"), 10);
    assert_eq!(count(conn, "idx_ortho_tiles_geometry"), 10);
    assert_eq!(count(conn, "idx_ortho_sections_geometry"), 2);
    assert_eq!(alternative_srids(conn, "ortho").unwrap(), vec![3857]);
    assert_eq!(keywords(conn, "ortho").unwrap(), vec!["imagery".to_string()]);
    assert!(coverage_statistics(conn, "ortho").unwrap().is_some());

    let request = RasterRequest::new(BoundingBox::new(0.0, 0.0, 600.0, 300.0), 600, 300);
    let raster = export_raw_pixels(conn, &EngineConfig::default(), &coverage, &request).unwrap();
    assert!(raster.buffer() == rgb_gradient(600, 300).buffer());
}

#[test]
fn test_copy_refuses_existing_target() {
    let dir = temp_test_dir();
    let source_path = temp_store_path(&dir, "source");
    populate_source(&source_path);

    let db = memory_db();
    create(db.conn(), &rgb_definition("ortho", 256));
    db.attach(&source_path, "src").unwrap();

    let err = copy_coverage(db.conn(), "src", "ORTHO").unwrap_err();
    assert!(matches!(err, StoreError::CoverageExists(_)));
    assert_eq!(count(db.conn(), "ortho_sections"), 0);
}

#[test]
fn test_copy_missing_coverage() {
    let dir = temp_test_dir();
    let source_path = temp_store_path(&dir, "source");
    populate_source(&source_path);

    let db = memory_db();
    db.attach(&source_path, "src").unwrap();
    let err = copy_coverage(db.conn(), "src", "elevation").unwrap_err();
    assert!(matches!(err, StoreError::CoverageNotFound(_)));

    let err = copy_coverage(db.conn(), "no such db", "ortho").unwrap_err();
    assert!(matches!(err, StoreError::InvalidArgument(_)));
}

#[test]
fn test_copy_incomplete_source_is_rejected() {
    let dir = temp_test_dir();
    let source_path = temp_store_path(&dir, "source");
    populate_source(&source_path);
    {
        let source = RasterDb::open(&source_path).unwrap();
        source
            .conn()
            .execute_batch("DROP TABLE ortho_tile_data;")
            .unwrap();
    }

    let db = memory_db();
    db.attach(&source_path, "src").unwrap();
    let err = copy_coverage(db.conn(), "src", "ortho").unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));
    assert!(!coverage_store::coverage_exists(db.conn(), "ortho").unwrap());
}
