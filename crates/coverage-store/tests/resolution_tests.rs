//! Level resolution against stored pyramid levels.

mod common;

use common::*;
use coverage_store::{
    build_section_pyramid, resolve_full_section_extent, resolve_level, CoverageDefinition,
    EngineConfig, StoreError,
};
use raster_common::{PixelType, SampleType, Scale};
use test_utils::{dem_grid, rgb_gradient};

#[test]
fn test_tolerance_accepts_one_percent() {
    let db = memory_db();
    let conn = db.conn();
    let coverage = create(conn, &rgb_definition("ortho", 256));
    import_at(conn, &coverage, "a", &rgb_gradient(600, 300), 0.0, 300.0, 1.0);

    for requested in [1.0, 1.009, 0.991] {
        let resolved = resolve_level(conn, &coverage, None, requested, requested).unwrap();
        assert!(resolved.is_native(), "{} should resolve to 1:1", requested);
        assert_eq!(resolved.x_res, 1.0);
    }
    for requested in [1.02, 0.98, 3.0] {
        let err = resolve_level(conn, &coverage, None, requested, requested).unwrap_err();
        assert!(matches!(err, StoreError::ResolutionNotFound { .. }), "{}", requested);
    }
}

#[test]
fn test_scales_within_base_level() {
    let db = memory_db();
    let conn = db.conn();
    let coverage = create(conn, &rgb_definition("ortho", 256));
    import_at(conn, &coverage, "a", &rgb_gradient(600, 300), 0.0, 300.0, 1.0);

    let cases = [(2.0, Scale::Half), (4.0, Scale::Quarter), (8.0, Scale::Eighth)];
    for (res, scale) in cases {
        let resolved = resolve_level(conn, &coverage, None, res, res).unwrap();
        assert_eq!(resolved.level, 0);
        assert_eq!(resolved.scale, scale);
    }
}

#[test]
fn test_last_matching_level_wins() {
    let db = memory_db();
    let conn = db.conn();
    let coverage = create(conn, &rgb_definition("ortho", 256));
    let report = import_at(conn, &coverage, "a", &rgb_gradient(600, 300), 0.0, 300.0, 1.0);
    build_section_pyramid(conn, &EngineConfig::default(), &coverage, report.section_id).unwrap();

    // 8.0 is both level 0 at 1:8 and level 1 at 1:1
    let resolved = resolve_level(conn, &coverage, None, 8.0, 8.0).unwrap();
    assert_eq!(resolved.level, 1);
    assert_eq!(resolved.scale, Scale::Full);

    let coarse = resolve_level(conn, &coverage, None, 64.0, 64.0).unwrap();
    assert_eq!(coarse.level, 1);
    assert_eq!(coarse.scale, Scale::Eighth);
}

#[test]
fn test_non_positive_resolution_is_invalid() {
    let db = memory_db();
    let conn = db.conn();
    let coverage = create(conn, &rgb_definition("ortho", 256));
    let err = resolve_level(conn, &coverage, None, 0.0, 1.0).unwrap_err();
    assert_eq!(err.outcome().code(), -1);
    let err = resolve_level(conn, &coverage, None, 1.0, -1.0).unwrap_err();
    assert!(matches!(err, StoreError::InvalidArgument(_)));
}

#[test]
fn test_mixed_resolution_requires_section() {
    let db = memory_db();
    let conn = db.conn();
    let def = CoverageDefinition::new("dem", SampleType::Float, PixelType::DataGrid, 1)
        .with_policies(mixed_policies());
    let coverage = create(conn, &def);
    let fine = import_at(conn, &coverage, "fine", &dem_grid(300, 300), 0.0, 300.0, 1.0);
    let coarse = import_at(conn, &coverage, "coarse", &dem_grid(150, 150), 300.0, 300.0, 2.0);

    let err = resolve_level(conn, &coverage, None, 1.0, 1.0).unwrap_err();
    assert!(matches!(err, StoreError::InvalidArgument(_)));

    let resolved = resolve_level(conn, &coverage, Some(fine.section_id), 1.0, 1.0).unwrap();
    assert!(resolved.is_native());

    let resolved = resolve_level(conn, &coverage, Some(coarse.section_id), 2.0, 2.0).unwrap();
    assert!(resolved.is_native());
    assert_eq!(resolved.x_res, 2.0);

    // 2.0 is 1:2 of the fine section
    let resolved = resolve_level(conn, &coverage, Some(fine.section_id), 2.0, 2.0).unwrap();
    assert_eq!(resolved.scale, Scale::Half);

    let err = resolve_level(conn, &coverage, Some(coarse.section_id), 1.0, 1.0).unwrap_err();
    assert!(matches!(err, StoreError::ResolutionNotFound { .. }));
}

#[test]
fn test_full_section_extent() {
    let db = memory_db();
    let conn = db.conn();
    let coverage = create(conn, &rgb_definition("ortho", 256));
    let report = import_at(conn, &coverage, "a", &rgb_gradient(600, 300), 0.0, 300.0, 1.0);

    let native = resolve_full_section_extent(conn, &coverage, report.section_id, 1.0, 1.0).unwrap();
    assert!(native.resolved.is_native());
    assert_eq!((native.width, native.height), (600, 300));
    assert_eq!(native.bbox.max_x, 600.0);

    let half = resolve_full_section_extent(conn, &coverage, report.section_id, 2.0, 2.0).unwrap();
    assert_eq!(half.resolved.scale, Scale::Half);
    assert_eq!((half.width, half.height), (300, 150));

    let eighth = resolve_full_section_extent(conn, &coverage, report.section_id, 8.0, 8.0).unwrap();
    assert_eq!((eighth.width, eighth.height), (75, 38));

    let err = resolve_full_section_extent(conn, &coverage, 999, 1.0, 1.0).unwrap_err();
    assert!(matches!(err, StoreError::SectionNotFound { .. }));
}
