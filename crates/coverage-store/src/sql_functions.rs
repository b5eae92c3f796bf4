//! SQL functions registered on every store connection.
//!
//! The validators back the safeguard triggers on `sections` and
//! `tile_data`; the `Mbr*` functions keep the R*Tree spatial indexes in
//! sync with footprint geometries.

use raster_common::codec::{is_valid_tile, TileFormat};
use raster_common::{Compression, Palette, Pixel, PixelType, RasterStatistics, SampleType};
use rusqlite::functions::{Context, FunctionFlags};
use rusqlite::types::ValueRef;
use rusqlite::Connection;

use crate::geometry::wkb_mbr;

fn flags() -> FunctionFlags {
    FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC
}

fn blob_arg<'a>(ctx: &'a Context<'_>, idx: usize) -> Option<&'a [u8]> {
    match ctx.get_raw(idx) {
        ValueRef::Blob(b) => Some(b),
        _ => None,
    }
}

fn int_arg(ctx: &Context<'_>, idx: usize) -> Option<i64> {
    match ctx.get_raw(idx) {
        ValueRef::Integer(i) => Some(i),
        _ => None,
    }
}

fn text_arg<'a>(ctx: &'a Context<'_>, idx: usize) -> Option<&'a str> {
    match ctx.get_raw(idx) {
        ValueRef::Text(t) => std::str::from_utf8(t).ok(),
        _ => None,
    }
}

fn bands_arg(ctx: &Context<'_>, idx: usize) -> Option<u8> {
    int_arg(ctx, idx).and_then(|b| u8::try_from(b).ok())
}

fn sample_arg(ctx: &Context<'_>, idx: usize) -> Option<SampleType> {
    text_arg(ctx, idx).and_then(SampleType::from_name)
}

/// `IsValidRasterTile(level, tile_w, tile_h, odd, even, sample, pixel, bands, compression)`
fn is_valid_raster_tile(ctx: &Context<'_>) -> Option<bool> {
    let level = i32::try_from(int_arg(ctx, 0)?).ok()?;
    let tile_width = u32::try_from(int_arg(ctx, 1)?).ok()?;
    let tile_height = u32::try_from(int_arg(ctx, 2)?).ok()?;
    let odd = blob_arg(ctx, 3)?;
    let even = blob_arg(ctx, 4);
    let format = TileFormat {
        tile_width,
        tile_height,
        sample_type: sample_arg(ctx, 5)?,
        pixel_type: PixelType::from_name(text_arg(ctx, 6)?)?,
        num_bands: bands_arg(ctx, 7)?,
        compression: Compression::from_name(text_arg(ctx, 8)?)?,
    };
    Some(is_valid_tile(odd, even, level, &format))
}

/// Register the store's SQL functions on a connection.
pub fn register(conn: &Connection) -> rusqlite::Result<()> {
    conn.create_scalar_function("IsValidPixel", 3, flags(), |ctx| {
        let valid = match (blob_arg(ctx, 0), sample_arg(ctx, 1), bands_arg(ctx, 2)) {
            (Some(blob), Some(sample), Some(bands)) => Pixel::is_valid_blob(blob, sample, bands),
            _ => false,
        };
        Ok(i32::from(valid))
    })?;

    conn.create_scalar_function("IsValidRasterPalette", 2, flags(), |ctx| {
        let valid = match (blob_arg(ctx, 0), sample_arg(ctx, 1)) {
            (Some(blob), Some(sample)) => Palette::is_valid_blob(blob, sample),
            _ => false,
        };
        Ok(i32::from(valid))
    })?;

    conn.create_scalar_function("IsValidRasterStatistics", 3, flags(), |ctx| {
        let valid = match (blob_arg(ctx, 0), sample_arg(ctx, 1), bands_arg(ctx, 2)) {
            (Some(blob), Some(sample), Some(bands)) => {
                RasterStatistics::is_valid_blob(blob, sample, bands)
            }
            _ => false,
        };
        Ok(i32::from(valid))
    })?;

    conn.create_scalar_function("IsValidRasterTile", 9, flags(), |ctx| {
        Ok(i32::from(is_valid_raster_tile(ctx).unwrap_or(false)))
    })?;

    conn.create_scalar_function("MbrMinX", 1, flags(), |ctx| {
        Ok(blob_arg(ctx, 0).and_then(wkb_mbr).map(|b| b.min_x))
    })?;
    conn.create_scalar_function("MbrMaxX", 1, flags(), |ctx| {
        Ok(blob_arg(ctx, 0).and_then(wkb_mbr).map(|b| b.max_x))
    })?;
    conn.create_scalar_function("MbrMinY", 1, flags(), |ctx| {
        Ok(blob_arg(ctx, 0).and_then(wkb_mbr).map(|b| b.min_y))
    })?;
    conn.create_scalar_function("MbrMaxY", 1, flags(), |ctx| {
        Ok(blob_arg(ctx, 0).and_then(wkb_mbr).map(|b| b.max_y))
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::rect_to_wkb;
    use raster_common::{encode_tile, BoundingBox, Raster};

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        register(&conn).unwrap();
        conn
    }

    #[test]
    fn test_mbr_functions() {
        let conn = conn();
        let wkb = rect_to_wkb(&BoundingBox::new(1.0, 2.0, 3.0, 4.0));
        let (minx, maxy): (f64, f64) = conn
            .query_row("SELECT MbrMinX(?1), MbrMaxY(?1)", [&wkb], |r| {
                Ok((r.get(0)?, r.get(1)?))
            })
            .unwrap();
        assert_eq!((minx, maxy), (1.0, 4.0));

        let none: Option<f64> = conn
            .query_row("SELECT MbrMinX(x'00')", [], |r| r.get(0))
            .unwrap();
        assert!(none.is_none());
    }

    #[test]
    fn test_is_valid_pixel() {
        let conn = conn();
        let blob = Pixel::rgb8(1, 2, 3).encode();
        let check = |sample: &str, bands: i64| -> i32 {
            conn.query_row(
                "SELECT IsValidPixel(?1, ?2, ?3)",
                rusqlite::params![blob, sample, bands],
                |r| r.get(0),
            )
            .unwrap()
        };
        assert_eq!(check("UINT8", 3), 1);
        assert_eq!(check("UINT16", 3), 0);
        assert_eq!(check("UINT8", 1), 0);
    }

    #[test]
    fn test_is_valid_raster_tile() {
        let conn = conn();
        let raster =
            Raster::filled(256, 256, SampleType::UInt8, PixelType::Grayscale, 1, None).unwrap();
        let blobs = encode_tile(&raster, Compression::Deflate, true).unwrap();
        let sql = "SELECT IsValidRasterTile(?1, 256, 256, ?2, ?3, 'UINT8', 'GRAYSCALE', 1, 'DEFLATE')";
        let base: i32 = conn
            .query_row(sql, rusqlite::params![0, blobs.odd, blobs.even], |r| r.get(0))
            .unwrap();
        assert_eq!(base, 1);
        let wrong_level: i32 = conn
            .query_row(sql, rusqlite::params![1, blobs.odd, blobs.even], |r| r.get(0))
            .unwrap();
        assert_eq!(wrong_level, 0);
    }
}
