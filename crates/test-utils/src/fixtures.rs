//! Common fixtures for coverage store tests.

use raster_common::BoundingBox;

/// The reference orthophoto scenario: one RGB section imported into a
/// 256x256-tiled WGS84 coverage and read back at native resolution.
pub mod ortho {
    pub const COVERAGE: &str = "ortho";
    pub const SECTION: &str = "sheet_1";
    pub const WIDTH: u32 = 3702;
    pub const HEIGHT: u32 = 2468;
    pub const TILE_SIZE: u32 = 256;
    pub const SRID: i32 = 4326;
    /// (min_x, min_y, max_x, max_y)
    pub const BBOX: (f64, f64, f64, f64) = (0.0, 0.0, 1.5, 1.0);

    /// Horizontal resolution of the section.
    pub fn x_res() -> f64 {
        (BBOX.2 - BBOX.0) / WIDTH as f64
    }

    /// Vertical resolution of the section.
    pub fn y_res() -> f64 {
        (BBOX.3 - BBOX.1) / HEIGHT as f64
    }
}

/// Bounding box from a `(min_x, min_y, max_x, max_y)` tuple.
pub fn bbox(corners: (f64, f64, f64, f64)) -> BoundingBox {
    BoundingBox::new(corners.0, corners.1, corners.2, corners.3)
}

/// A `size` x `size` cell window with unit resolution, upper-left at
/// (`min_x`, `max_y`).
pub fn unit_window(min_x: f64, max_y: f64, size: u32) -> BoundingBox {
    BoundingBox::new(min_x, max_y - size as f64, min_x + size as f64, max_y)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ortho_resolution() {
        assert!((ortho::x_res() * ortho::WIDTH as f64 - 1.5).abs() < 1e-12);
        assert!((ortho::y_res() * ortho::HEIGHT as f64 - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_unit_window() {
        let w = unit_window(10.0, 20.0, 4);
        assert_eq!(w, BoundingBox::new(10.0, 16.0, 14.0, 20.0));
    }
}
