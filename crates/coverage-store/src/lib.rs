//! SQLite-backed store for tiled, multi-resolution raster coverages.
//!
//! A coverage is split into sections (one per imported raster), each cut
//! into fixed-size tiles at the base level plus optional pyramid levels.
//! Reads resolve the pyramid level matching a requested resolution and
//! assemble a dense raster from the overlapping tiles.
//!
//! Every operation takes a `&rusqlite::Connection`; pass a transaction
//! (or use [`RasterDb::unit_of_work`]) to make a sequence atomic.

pub mod config;
pub mod copy;
pub mod coverage;
pub mod database;
pub mod error;
pub mod geometry;
pub mod import;
pub mod loader;
pub mod policies;
pub mod pyramid;
pub mod resolution;
pub mod schema;
pub mod sections;
pub mod sql_functions;

pub use config::{EngineConfig, PyramidConfig, MAX_THREADS, MIN_THREADS};
pub use copy::copy_coverage;
pub use coverage::{
    Coverage, CoverageDefinition, CoveragePolicies, CoverageTables, DefaultBands,
    MIXED_RESOLUTION_SENTINEL,
};
pub use database::RasterDb;
pub use error::{Outcome, Result, StoreError};
pub use import::{import_section, ImportReport};
pub use loader::{export_raw_pixels, load_raster, BandSelection, RasterRequest};
pub use policies::{
    alternative_srids, coverage_statistics, coverage_summary, enable_auto_ndvi,
    get_default_bands, keywords, list_coverages, register_alternative_srid, register_keyword,
    set_coverage_infos, set_default_bands, unregister_alternative_srid, unregister_keyword,
    update_coverage_extent, update_coverage_statistics, CoverageSummary,
};
pub use pyramid::{
    build_coverage_pyramid, build_section_pyramid, delete_section_pyramid, PyramidReport,
};
pub use resolution::{resolve_full_section_extent, resolve_level, ResolvedLevel, SectionExtent};
pub use schema::{coverage_exists, create_coverage, delete_section, drop_coverage};
pub use sections::{
    find_section, get_section, list_sections, section_statistics, NewSection, SectionInfo,
};
