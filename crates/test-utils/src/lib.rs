//! Shared test utilities for the raster coverage workspace: synthetic
//! rasters, reference fixtures and temporary store locations.
//!
//! ```ignore
//! use test_utils::{rgb_gradient, fixtures::ortho};
//! ```

pub mod fixtures;
pub mod generators;
pub mod paths;

pub use fixtures::*;
pub use generators::*;
pub use paths::*;

/// Panics when `|left - right| > epsilon`, all compared as `f64`.
#[macro_export]
macro_rules! assert_approx_eq {
    ($left:expr, $right:expr, $epsilon:expr) => {{
        let left: f64 = $left as f64;
        let right: f64 = $right as f64;
        let epsilon: f64 = $epsilon as f64;
        let diff = (left - right).abs();
        if diff > epsilon {
            panic!(
                "assertion failed: `(left ≈ right)`\n  left: `{:?}`,\n right: `{:?}`,\n  diff: `{:?}` > epsilon `{:?}`",
                left, right, diff, epsilon
            );
        }
    }};
}

/// Approximate equality of two `BoundingBox` values, corner by corner.
///
/// ```ignore
/// use test_utils::assert_bbox_approx_eq;
///
/// assert_bbox_approx_eq!(extent, BoundingBox::new(0.0, 0.0, 1.5, 1.0), 1e-9);
/// ```
#[macro_export]
macro_rules! assert_bbox_approx_eq {
    ($left:expr, $right:expr, $epsilon:expr) => {{
        let (l, r) = ($left, $right);
        $crate::assert_approx_eq!(l.min_x, r.min_x, $epsilon);
        $crate::assert_approx_eq!(l.min_y, r.min_y, $epsilon);
        $crate::assert_approx_eq!(l.max_x, r.max_x, $epsilon);
        $crate::assert_approx_eq!(l.max_y, r.max_y, $epsilon);
    }};
}
