//! Sample, pixel and compression identifiers.
//!
//! Every identifier has a stable one-byte code used inside the binary
//! encodings and a stable upper-case name used in the `raster_coverages`
//! registry.

use serde::{Deserialize, Serialize};

use crate::error::{RasterError, Result};

/// Data type of a single band sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SampleType {
    Bit1,
    Bit2,
    Bit4,
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Float,
    Double,
}

impl SampleType {
    pub const ALL: [SampleType; 11] = [
        SampleType::Bit1,
        SampleType::Bit2,
        SampleType::Bit4,
        SampleType::Int8,
        SampleType::UInt8,
        SampleType::Int16,
        SampleType::UInt16,
        SampleType::Int32,
        SampleType::UInt32,
        SampleType::Float,
        SampleType::Double,
    ];

    /// Registry name (e.g. "UINT8").
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bit1 => "1-BIT",
            Self::Bit2 => "2-BIT",
            Self::Bit4 => "4-BIT",
            Self::Int8 => "INT8",
            Self::UInt8 => "UINT8",
            Self::Int16 => "INT16",
            Self::UInt16 => "UINT16",
            Self::Int32 => "INT32",
            Self::UInt32 => "UINT32",
            Self::Float => "FLOAT",
            Self::Double => "DOUBLE",
        }
    }

    /// Parse a registry name (case-insensitive).
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|s| s.as_str().eq_ignore_ascii_case(name))
    }

    /// One-byte code used in binary encodings.
    pub fn code(&self) -> u8 {
        match self {
            Self::Bit1 => 0xa1,
            Self::Bit2 => 0xa2,
            Self::Bit4 => 0xa3,
            Self::Int8 => 0xa4,
            Self::UInt8 => 0xa5,
            Self::Int16 => 0xa6,
            Self::UInt16 => 0xa7,
            Self::Int32 => 0xa8,
            Self::UInt32 => 0xa9,
            Self::Float => 0xaa,
            Self::Double => 0xab,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|s| s.code() == code)
    }

    /// Bytes used by one sample in memory. Sub-byte samples use a whole byte.
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            Self::Bit1 | Self::Bit2 | Self::Bit4 | Self::Int8 | Self::UInt8 => 1,
            Self::Int16 | Self::UInt16 => 2,
            Self::Int32 | Self::UInt32 | Self::Float => 4,
            Self::Double => 8,
        }
    }

    /// Largest value a sub-byte sample may hold.
    pub fn sub_byte_max(&self) -> Option<u8> {
        match self {
            Self::Bit1 => Some(1),
            Self::Bit2 => Some(3),
            Self::Bit4 => Some(15),
            _ => None,
        }
    }

    /// Number of histogram bins used by statistics for this sample type.
    pub fn histogram_bins(&self) -> usize {
        match self {
            Self::Bit1 => 2,
            Self::Bit2 => 4,
            Self::Bit4 => 16,
            _ => 256,
        }
    }

    /// Maximum palette entries addressable by a palette pixel of this type.
    pub fn max_palette_entries(&self) -> Option<usize> {
        match self {
            Self::Bit1 => Some(2),
            Self::Bit2 => Some(4),
            Self::Bit4 => Some(16),
            Self::UInt8 => Some(256),
            _ => None,
        }
    }
}

impl std::fmt::Display for SampleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Semantic interpretation of a pixel's bands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelType {
    Monochrome,
    Palette,
    Grayscale,
    Rgb,
    Multiband,
    DataGrid,
}

impl PixelType {
    pub const ALL: [PixelType; 6] = [
        PixelType::Monochrome,
        PixelType::Palette,
        PixelType::Grayscale,
        PixelType::Rgb,
        PixelType::Multiband,
        PixelType::DataGrid,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Monochrome => "MONOCHROME",
            Self::Palette => "PALETTE",
            Self::Grayscale => "GRAYSCALE",
            Self::Rgb => "RGB",
            Self::Multiband => "MULTIBAND",
            Self::DataGrid => "DATAGRID",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|p| p.as_str().eq_ignore_ascii_case(name))
    }

    pub fn code(&self) -> u8 {
        match self {
            Self::Monochrome => 0x11,
            Self::Palette => 0x12,
            Self::Grayscale => 0x13,
            Self::Rgb => 0x14,
            Self::Multiband => 0x15,
            Self::DataGrid => 0x16,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|p| p.code() == code)
    }
}

impl std::fmt::Display for PixelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Tile payload compression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Compression {
    None,
    Deflate,
    Lzma,
    Png,
    Jpeg,
    LossyWebp,
    LosslessWebp,
    CcittFax4,
    LossyJp2,
    LosslessJp2,
}

impl Compression {
    pub const ALL: [Compression; 10] = [
        Compression::None,
        Compression::Deflate,
        Compression::Lzma,
        Compression::Png,
        Compression::Jpeg,
        Compression::LossyWebp,
        Compression::LosslessWebp,
        Compression::CcittFax4,
        Compression::LossyJp2,
        Compression::LosslessJp2,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::Deflate => "DEFLATE",
            Self::Lzma => "LZMA",
            Self::Png => "PNG",
            Self::Jpeg => "JPEG",
            Self::LossyWebp => "LOSSY_WEBP",
            Self::LosslessWebp => "LOSSLESS_WEBP",
            Self::CcittFax4 => "CCITTFAX4",
            Self::LossyJp2 => "LOSSY_JP2",
            Self::LosslessJp2 => "LOSSLESS_JP2",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.as_str().eq_ignore_ascii_case(name))
    }

    pub fn code(&self) -> u8 {
        match self {
            Self::None => 0x21,
            Self::Deflate => 0x22,
            Self::Lzma => 0x23,
            Self::Png => 0x25,
            Self::Jpeg => 0x26,
            Self::LossyWebp => 0x27,
            Self::LosslessWebp => 0x28,
            Self::CcittFax4 => 0x30,
            Self::LossyJp2 => 0x33,
            Self::LosslessJp2 => 0x34,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| c.code() == code)
    }

    /// Whether the tile codec in this crate can encode the given layout.
    pub fn supports(&self, sample: SampleType, bands: u8) -> bool {
        match self {
            Self::None | Self::Deflate => true,
            Self::Png => sample.bytes_per_sample() == 1 && (1..=4).contains(&bands),
            _ => false,
        }
    }
}

impl std::fmt::Display for Compression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Decimation scale applied when decoding a tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scale {
    /// 1:1, full resolution.
    Full,
    /// 1:2
    Half,
    /// 1:4
    Quarter,
    /// 1:8
    Eighth,
}

impl Scale {
    pub const ALL: [Scale; 4] = [Scale::Full, Scale::Half, Scale::Quarter, Scale::Eighth];

    /// Decimation factor (1, 2, 4 or 8).
    pub fn factor(&self) -> u32 {
        match self {
            Self::Full => 1,
            Self::Half => 2,
            Self::Quarter => 4,
            Self::Eighth => 8,
        }
    }

    pub fn from_factor(factor: u32) -> Option<Self> {
        Self::ALL.iter().copied().find(|s| s.factor() == factor)
    }
}

impl std::fmt::Display for Scale {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "1:{}", self.factor())
    }
}

/// Check that a sample/pixel/band combination is one a coverage may declare.
pub fn validate_format(sample: SampleType, pixel: PixelType, bands: u8) -> Result<()> {
    use SampleType::*;

    let sample_ok = match pixel {
        PixelType::Monochrome => sample == Bit1,
        PixelType::Palette => matches!(sample, Bit1 | Bit2 | Bit4 | UInt8),
        PixelType::Grayscale => matches!(sample, Bit2 | Bit4 | UInt8 | UInt16),
        PixelType::Rgb | PixelType::Multiband => matches!(sample, UInt8 | UInt16),
        PixelType::DataGrid => matches!(
            sample,
            Int8 | UInt8 | Int16 | UInt16 | Int32 | UInt32 | Float | Double
        ),
    };
    if !sample_ok {
        return Err(RasterError::invalid_format(format!(
            "{} pixels cannot use {} samples",
            pixel, sample
        )));
    }

    let bands_ok = match pixel {
        PixelType::Rgb => bands == 3,
        PixelType::Multiband => bands >= 2,
        _ => bands == 1,
    };
    if !bands_ok {
        return Err(RasterError::invalid_format(format!(
            "{} pixels cannot have {} band(s)",
            pixel, bands
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_roundtrip_case_insensitive() {
        for s in SampleType::ALL {
            assert_eq!(SampleType::from_name(&s.as_str().to_lowercase()), Some(s));
            assert_eq!(SampleType::from_code(s.code()), Some(s));
        }
        for p in PixelType::ALL {
            assert_eq!(PixelType::from_name(p.as_str()), Some(p));
        }
        assert_eq!(Compression::from_name("png"), Some(Compression::Png));
        assert_eq!(Compression::from_name("GIF"), None);
    }

    #[test]
    fn test_validate_format() {
        assert!(validate_format(SampleType::UInt8, PixelType::Rgb, 3).is_ok());
        assert!(validate_format(SampleType::UInt8, PixelType::Rgb, 4).is_err());
        assert!(validate_format(SampleType::Float, PixelType::Rgb, 3).is_err());
        assert!(validate_format(SampleType::Bit1, PixelType::Monochrome, 1).is_ok());
        assert!(validate_format(SampleType::UInt16, PixelType::Multiband, 5).is_ok());
        assert!(validate_format(SampleType::UInt16, PixelType::Multiband, 1).is_err());
        assert!(validate_format(SampleType::Double, PixelType::DataGrid, 1).is_ok());
        assert!(validate_format(SampleType::Bit4, PixelType::DataGrid, 1).is_err());
    }

    #[test]
    fn test_png_support() {
        assert!(Compression::Png.supports(SampleType::UInt8, 3));
        assert!(!Compression::Png.supports(SampleType::UInt16, 3));
        assert!(!Compression::Png.supports(SampleType::UInt8, 6));
        assert!(Compression::Deflate.supports(SampleType::Double, 1));
        assert!(!Compression::Jpeg.supports(SampleType::UInt8, 3));
    }
}
