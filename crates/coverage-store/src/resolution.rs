//! Map a requested resolution onto a stored pyramid level and scale.

use raster_common::{BoundingBox, Scale};
use rusqlite::Connection;
use serde::Serialize;
use tracing::debug;

use crate::coverage::Coverage;
use crate::error::{Result, StoreError};
use crate::sections::get_section;

/// A stored (level, scale) pair matching a request.
///
/// `x_res`/`y_res` are the stored resolutions of the match, not the
/// requested ones.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ResolvedLevel {
    pub level: i32,
    pub scale: Scale,
    pub x_res: f64,
    pub y_res: f64,
}

impl ResolvedLevel {
    /// The base level read at 1:1.
    pub fn is_native(&self) -> bool {
        self.level == 0 && self.scale == Scale::Full
    }
}

/// Whether `requested` is within 1% of `stored`.
pub fn within_tolerance(stored: f64, requested: f64) -> bool {
    let tolerance = stored / 100.0;
    requested >= stored - tolerance && requested <= stored + tolerance
}

/// Find the level and scale for a requested resolution.
///
/// Levels are scanned in ascending order and each row checks 1:1, 1:2, 1:4
/// and 1:8 in turn; the last match wins. Mixed-resolution coverages look
/// only at the levels of `section_id`, which is then required.
pub fn resolve_level(
    conn: &Connection,
    coverage: &Coverage,
    section_id: Option<i64>,
    x_res: f64,
    y_res: f64,
) -> Result<ResolvedLevel> {
    if !(x_res > 0.0 && y_res > 0.0) {
        return Err(StoreError::invalid_argument("requested resolution must be > 0"));
    }
    let tables = coverage.tables();
    let columns = "pyramid_level, x_resolution_1_1, y_resolution_1_1, x_resolution_1_2, \
        y_resolution_1_2, x_resolution_1_4, y_resolution_1_4, x_resolution_1_8, y_resolution_1_8";

    let rows: Vec<(i32, [Option<f64>; 8])> = if coverage.is_mixed_resolution() {
        let section_id = section_id.ok_or_else(|| {
            StoreError::invalid_argument(format!(
                "coverage {} has mixed resolutions: a section id is required",
                coverage.name()
            ))
        })?;
        let sql = format!(
            "SELECT {} FROM \"{}\" WHERE section_id = ?1 ORDER BY pyramid_level",
            columns, tables.section_levels
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([section_id], level_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows
    } else {
        let sql = format!(
            "SELECT {} FROM \"{}\" ORDER BY pyramid_level",
            columns, tables.levels
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], level_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows
    };

    let mut found = None;
    for (level, res) in &rows {
        for (i, scale) in Scale::ALL.iter().enumerate() {
            let (Some(sx), Some(sy)) = (res[i * 2], res[i * 2 + 1]) else {
                continue;
            };
            if within_tolerance(sx, x_res) && within_tolerance(sy, y_res) {
                found = Some(ResolvedLevel {
                    level: *level,
                    scale: *scale,
                    x_res: sx,
                    y_res: sy,
                });
            }
        }
    }

    let resolved = found.ok_or(StoreError::ResolutionNotFound { x_res, y_res })?;
    debug!(
        coverage = %coverage.name(),
        level = resolved.level,
        scale = %resolved.scale,
        x_res = resolved.x_res,
        y_res = resolved.y_res,
        "Resolved pyramid level"
    );
    Ok(resolved)
}

fn level_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(i32, [Option<f64>; 8])> {
    let mut res = [None; 8];
    for (i, slot) in res.iter_mut().enumerate() {
        *slot = row.get(i + 1)?;
    }
    Ok((row.get(0)?, res))
}

/// Full extent of a section as read at a given resolution.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SectionExtent {
    pub resolved: ResolvedLevel,
    pub bbox: BoundingBox,
    pub width: u32,
    pub height: u32,
}

/// Resolve the level for one section and size its full extent accordingly.
///
/// Outside the base level at 1:1 the dimensions are recomputed from the
/// section footprint and the matched resolution.
pub fn resolve_full_section_extent(
    conn: &Connection,
    coverage: &Coverage,
    section_id: i64,
    x_res: f64,
    y_res: f64,
) -> Result<SectionExtent> {
    let resolved = resolve_level(conn, coverage, Some(section_id), x_res, y_res)?;
    let section = get_section(conn, coverage, section_id)?;
    let (width, height) = if resolved.is_native() {
        (section.width, section.height)
    } else {
        (
            (section.bbox.width() / resolved.x_res).ceil() as u32,
            (section.bbox.height() / resolved.y_res).ceil() as u32,
        )
    };
    Ok(SectionExtent {
        resolved,
        bbox: section.bbox,
        width,
        height,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tolerance_bounds() {
        assert!(within_tolerance(1.0, 1.0));
        assert!(within_tolerance(1.0, 1.009));
        assert!(within_tolerance(1.0, 0.991));
        assert!(!within_tolerance(1.0, 1.02));
        assert!(!within_tolerance(1.0, 0.98));
    }

    #[test]
    fn test_native_level() {
        let native = ResolvedLevel {
            level: 0,
            scale: Scale::Full,
            x_res: 1.0,
            y_res: 1.0,
        };
        assert!(native.is_native());
        assert!(!ResolvedLevel {
            scale: Scale::Half,
            ..native
        }
        .is_native());
    }
}
