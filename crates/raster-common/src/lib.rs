//! Value model shared by the coverage store: pixel formats, pixels,
//! palettes, in-memory rasters, statistics and the tile BLOB codec.

pub mod bbox;
pub mod codec;
pub mod downsample;
pub mod error;
pub mod palette;
pub mod pixel;
pub mod raster;
pub mod statistics;
pub mod types;

pub use bbox::{BboxParseError, BoundingBox};
pub use codec::{decode_tile, encode_tile, validate_tile, TileBlobs, TileFormat};
pub use downsample::{downsample, DownsampleMethod};
pub use error::{RasterError, Result};
pub use palette::{Palette, PaletteEntry};
pub use pixel::{Pixel, SampleValue};
pub use raster::Raster;
pub use statistics::{BandStatistics, RasterStatistics};
pub use types::{validate_format, Compression, PixelType, SampleType, Scale};
