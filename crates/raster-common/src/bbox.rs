//! Bounding box in coverage CRS units.

use serde::{Deserialize, Serialize};

/// An axis-aligned rectangle in the coverage CRS.
///
/// For geographic CRS (EPSG:4326) coordinates are in degrees, for projected
/// CRS they are in the projection's linear unit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    /// Create a new bounding box from corner coordinates.
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// Parse "minx,miny,maxx,maxy".
    pub fn parse(s: &str) -> Result<Self, BboxParseError> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        if parts.len() != 4 {
            return Err(BboxParseError::InvalidFormat(s.to_string()));
        }

        let number = |p: &str| {
            p.parse::<f64>()
                .map_err(|_| BboxParseError::InvalidNumber(p.to_string()))
        };

        Ok(Self {
            min_x: number(parts[0])?,
            min_y: number(parts[1])?,
            max_x: number(parts[2])?,
            max_y: number(parts[3])?,
        })
    }

    /// True when both extents are finite and strictly positive.
    pub fn is_valid(&self) -> bool {
        self.min_x.is_finite()
            && self.min_y.is_finite()
            && self.max_x.is_finite()
            && self.max_y.is_finite()
            && self.max_x > self.min_x
            && self.max_y > self.min_y
    }

    /// Width of the bounding box in coordinate units.
    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    /// Height of the bounding box in coordinate units.
    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// Check if this bbox intersects another (touching edges do not count).
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min_x < other.max_x
            && self.max_x > other.min_x
            && self.min_y < other.max_y
            && self.max_y > other.min_y
    }

    /// Smallest box covering both.
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            min_x: self.min_x.min(other.min_x),
            min_y: self.min_y.min(other.min_y),
            max_x: self.max_x.max(other.max_x),
            max_y: self.max_y.max(other.max_y),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BboxParseError {
    #[error("Invalid BBOX format: {0}. Expected 'minx,miny,maxx,maxy'")]
    InvalidFormat(String),

    #[error("Invalid number in BBOX: {0}")]
    InvalidNumber(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bbox() {
        let bbox = BoundingBox::parse("0, 0,1.5,1").unwrap();
        assert_eq!(bbox, BoundingBox::new(0.0, 0.0, 1.5, 1.0));
        assert!(bbox.is_valid());
        assert!(matches!(
            BoundingBox::parse("0,0,1"),
            Err(BboxParseError::InvalidFormat(_))
        ));
        assert!(matches!(
            BoundingBox::parse("0,0,x,1"),
            Err(BboxParseError::InvalidNumber(_))
        ));
    }

    #[test]
    fn test_intersects_and_union() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(5.0, 5.0, 15.0, 15.0);
        let c = BoundingBox::new(20.0, 20.0, 30.0, 30.0);

        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
        assert!(!a.intersects(&BoundingBox::new(10.0, 0.0, 20.0, 10.0)));
        assert_eq!(a.union(&c), BoundingBox::new(0.0, 0.0, 30.0, 30.0));
    }

    #[test]
    fn test_degenerate_is_invalid() {
        assert!(!BoundingBox::new(1.0, 0.0, 1.0, 5.0).is_valid());
        assert!(!BoundingBox::new(0.0, 0.0, f64::NAN, 5.0).is_valid());
    }
}
