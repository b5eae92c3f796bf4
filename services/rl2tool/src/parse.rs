//! Argument parsers for values clap cannot parse on its own.

use coverage_store::BandSelection;
use raster_common::{BoundingBox, Pixel, PixelType, SampleType, SampleValue};

/// "minx,miny,maxx,maxy"
pub fn bbox(s: &str) -> Result<BoundingBox, String> {
    let bbox = BoundingBox::parse(s).map_err(|e| e.to_string())?;
    if !bbox.is_valid() {
        return Err(format!("{} is not a valid bounding box", s));
    }
    Ok(bbox)
}

/// "WIDTHxHEIGHT"
pub fn size(s: &str) -> Result<(u32, u32), String> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got {}", s))?;
    let dim = |v: &str| {
        v.trim()
            .parse::<u32>()
            .ok()
            .filter(|&n| n > 0)
            .ok_or_else(|| format!("invalid dimension {:?}", v))
    };
    Ok((dim(w)?, dim(h)?))
}

/// "RES" or "XRES,YRES"
pub fn resolution(s: &str) -> Result<(f64, f64), String> {
    let parse = |v: &str| {
        v.trim()
            .parse::<f64>()
            .ok()
            .filter(|r| r.is_finite() && *r > 0.0)
            .ok_or_else(|| format!("invalid resolution {:?}", v))
    };
    match s.split_once(',') {
        Some((x, y)) => Ok((parse(x)?, parse(y)?)),
        None => {
            let r = parse(s)?;
            Ok((r, r))
        }
    }
}

/// "native", "default", "ndvi", a band index, or "R,G,B".
pub fn bands(s: &str) -> Result<BandSelection, String> {
    let index = |v: &str| {
        v.trim()
            .parse::<u8>()
            .map_err(|_| format!("invalid band index {:?}", v))
    };
    match s.trim().to_lowercase().as_str() {
        "native" => Ok(BandSelection::Native),
        "default" => Ok(BandSelection::DefaultTriple),
        "ndvi" => Ok(BandSelection::Ndvi),
        other => {
            let parts: Vec<&str> = other.split(',').collect();
            match parts.as_slice() {
                [one] => Ok(BandSelection::Single(index(one)?)),
                [r, g, b] => Ok(BandSelection::Triple {
                    red: index(r)?,
                    green: index(g)?,
                    blue: index(b)?,
                }),
                _ => Err(format!("unrecognised band selection {:?}", s)),
            }
        }
    }
}

/// Comma-separated sample values as a pixel of the given format.
pub fn pixel(s: &str, sample: SampleType, pixel: PixelType) -> anyhow::Result<Pixel> {
    let samples = s
        .split(',')
        .map(|v| {
            v.trim()
                .parse::<f64>()
                .map(|n| SampleValue::from_f64(sample, n))
                .map_err(|_| anyhow::anyhow!("invalid sample value {:?}", v))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(Pixel::with_samples(sample, pixel, samples)?)
}
