//! Footprint geometries.
//!
//! Section and tile footprints are stored as little-endian WKB polygons
//! holding a single closed rectangular ring.

use raster_common::BoundingBox;

const WKB_LITTLE_ENDIAN: u8 = 0x01;
const WKB_POLYGON: u32 = 3;

/// Encode a rectangle as a WKB polygon.
pub fn rect_to_wkb(bbox: &BoundingBox) -> Vec<u8> {
    let ring = [
        (bbox.min_x, bbox.min_y),
        (bbox.max_x, bbox.min_y),
        (bbox.max_x, bbox.max_y),
        (bbox.min_x, bbox.max_y),
        (bbox.min_x, bbox.min_y),
    ];
    let mut wkb = Vec::with_capacity(13 + ring.len() * 16);
    wkb.push(WKB_LITTLE_ENDIAN);
    wkb.extend_from_slice(&WKB_POLYGON.to_le_bytes());
    wkb.extend_from_slice(&1u32.to_le_bytes());
    wkb.extend_from_slice(&(ring.len() as u32).to_le_bytes());
    for (x, y) in ring {
        wkb.extend_from_slice(&x.to_le_bytes());
        wkb.extend_from_slice(&y.to_le_bytes());
    }
    wkb
}

/// Minimum bounding rectangle of a WKB polygon, or `None` when the BLOB is
/// not a little-endian polygon.
pub fn wkb_mbr(wkb: &[u8]) -> Option<BoundingBox> {
    let u32_at = |at: usize| -> Option<u32> {
        wkb.get(at..at + 4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    };
    let f64_at = |at: usize| -> Option<f64> {
        let b = wkb.get(at..at + 8)?;
        let mut a = [0u8; 8];
        a.copy_from_slice(b);
        Some(f64::from_le_bytes(a))
    };

    if wkb.first() != Some(&WKB_LITTLE_ENDIAN) || u32_at(1)? != WKB_POLYGON {
        return None;
    }
    let rings = u32_at(5)?;
    let mut pos = 9;
    let mut mbr: Option<BoundingBox> = None;
    for _ in 0..rings {
        let points = u32_at(pos)? as usize;
        pos += 4;
        for _ in 0..points {
            let x = f64_at(pos)?;
            let y = f64_at(pos + 8)?;
            pos += 16;
            mbr = Some(match mbr {
                None => BoundingBox::new(x, y, x, y),
                Some(b) => BoundingBox::new(
                    b.min_x.min(x),
                    b.min_y.min(y),
                    b.max_x.max(x),
                    b.max_y.max(y),
                ),
            });
        }
    }
    if pos != wkb.len() {
        return None;
    }
    mbr
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rect_roundtrip() {
        let bbox = BoundingBox::new(-10.5, 20.0, 30.25, 45.0);
        let wkb = rect_to_wkb(&bbox);
        assert_eq!(wkb.len(), 93);
        assert_eq!(wkb_mbr(&wkb), Some(bbox));
    }

    #[test]
    fn test_rejects_other_blobs() {
        assert_eq!(wkb_mbr(&[]), None);
        let mut wkb = rect_to_wkb(&BoundingBox::new(0.0, 0.0, 1.0, 1.0));
        wkb[0] = 0x00;
        assert_eq!(wkb_mbr(&wkb), None);
        let wkb = rect_to_wkb(&BoundingBox::new(0.0, 0.0, 1.0, 1.0));
        assert_eq!(wkb_mbr(&wkb[..wkb.len() - 1]), None);
    }
}
