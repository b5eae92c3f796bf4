//! Coverage definitions and the in-memory coverage descriptor.

use raster_common::codec::TileFormat;
use raster_common::{
    validate_format, BoundingBox, Compression, Palette, Pixel, PixelType, SampleType,
};
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};
use crate::schema::check_identifier;

/// Resolution written to the registry for mixed-resolution coverages.
pub const MIXED_RESOLUTION_SENTINEL: f64 = 999999.999999;

/// Accepted tile edge lengths.
pub const MIN_TILE_SIZE: u32 = 256;
pub const MAX_TILE_SIZE: u32 = 1024;

/// Section and resolution policies of a coverage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CoveragePolicies {
    /// Sections must match the coverage resolution exactly.
    pub strict_resolution: bool,
    /// Each section keeps its own resolution (per-section levels).
    pub mixed_resolutions: bool,
    /// Record source file paths.
    pub section_paths: bool,
    /// Record source MD5 checksums.
    pub section_md5: bool,
    /// Record a human-readable summary.
    pub section_summary: bool,
}

/// Default band mapping of a MULTIBAND coverage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultBands {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
    pub nir: u8,
}

impl DefaultBands {
    pub fn new(red: u8, green: u8, blue: u8, nir: u8) -> Self {
        Self {
            red,
            green,
            blue,
            nir,
        }
    }

    /// Check the four indices are distinct and below `num_bands`.
    pub fn validate(&self, num_bands: u8) -> Result<()> {
        let all = [self.red, self.green, self.blue, self.nir];
        if let Some(b) = all.iter().find(|&&b| b >= num_bands) {
            return Err(StoreError::validation(format!(
                "band index {} out of range for {} bands",
                b, num_bands
            )));
        }
        for (i, a) in all.iter().enumerate() {
            if all[i + 1..].contains(a) {
                return Err(StoreError::validation(format!(
                    "band index {} used more than once",
                    a
                )));
            }
        }
        Ok(())
    }
}

/// Everything needed to create a coverage.
#[derive(Debug, Clone, PartialEq)]
pub struct CoverageDefinition {
    pub name: String,
    pub sample_type: SampleType,
    pub pixel_type: PixelType,
    pub num_bands: u8,
    pub compression: Compression,
    pub quality: u8,
    pub tile_width: u32,
    pub tile_height: u32,
    pub srid: i32,
    pub x_res: f64,
    pub y_res: f64,
    pub no_data: Option<Pixel>,
    pub palette: Option<Palette>,
    pub policies: CoveragePolicies,
}

impl CoverageDefinition {
    /// A definition with 256x256 DEFLATE tiles, quality 100 and SRID 4326.
    pub fn new(
        name: impl Into<String>,
        sample_type: SampleType,
        pixel_type: PixelType,
        num_bands: u8,
    ) -> Self {
        Self {
            name: name.into(),
            sample_type,
            pixel_type,
            num_bands,
            compression: Compression::Deflate,
            quality: 100,
            tile_width: MIN_TILE_SIZE,
            tile_height: MIN_TILE_SIZE,
            srid: 4326,
            x_res: 1.0,
            y_res: 1.0,
            no_data: None,
            palette: None,
            policies: CoveragePolicies::default(),
        }
    }

    pub fn with_compression(mut self, compression: Compression, quality: u8) -> Self {
        self.compression = compression;
        self.quality = quality;
        self
    }

    pub fn with_tile_size(mut self, width: u32, height: u32) -> Self {
        self.tile_width = width;
        self.tile_height = height;
        self
    }

    pub fn with_srid(mut self, srid: i32) -> Self {
        self.srid = srid;
        self
    }

    pub fn with_resolution(mut self, x_res: f64, y_res: f64) -> Self {
        self.x_res = x_res;
        self.y_res = y_res;
        self
    }

    pub fn with_no_data(mut self, no_data: Pixel) -> Self {
        self.no_data = Some(no_data);
        self
    }

    pub fn with_palette(mut self, palette: Palette) -> Self {
        self.palette = Some(palette);
        self
    }

    pub fn with_policies(mut self, policies: CoveragePolicies) -> Self {
        self.policies = policies;
        self
    }

    /// Check the definition before anything is written.
    ///
    /// Malformed values are invalid arguments; a no-data pixel or palette
    /// that does not fit the declared format is a validation failure.
    pub fn validate(&self) -> Result<()> {
        check_identifier(&self.name)?;
        validate_format(self.sample_type, self.pixel_type, self.num_bands)
            .map_err(|e| StoreError::invalid_argument(e.to_string()))?;
        if !self.compression.supports(self.sample_type, self.num_bands) {
            return Err(StoreError::invalid_argument(format!(
                "{} compression does not support {} x{}",
                self.compression, self.sample_type, self.num_bands
            )));
        }
        if self.quality > 100 {
            return Err(StoreError::invalid_argument("quality must be 0-100"));
        }
        for edge in [self.tile_width, self.tile_height] {
            if !(MIN_TILE_SIZE..=MAX_TILE_SIZE).contains(&edge) || edge % 16 != 0 {
                return Err(StoreError::invalid_argument(format!(
                    "tile size {} must be {}-{} and a multiple of 16",
                    edge, MIN_TILE_SIZE, MAX_TILE_SIZE
                )));
            }
        }
        if !self.policies.mixed_resolutions {
            let ok = |r: f64| r.is_finite() && r > 0.0;
            if !ok(self.x_res) || !ok(self.y_res) {
                return Err(StoreError::invalid_argument("resolution must be > 0"));
            }
        }
        if let Some(nd) = &self.no_data {
            if !nd.matches(self.sample_type, self.pixel_type, self.num_bands) {
                return Err(StoreError::validation(
                    "no-data pixel does not match the coverage format",
                ));
            }
        }
        match (&self.palette, self.pixel_type) {
            (None, PixelType::Palette) => {
                return Err(StoreError::validation("PALETTE coverages require a palette"))
            }
            (Some(_), pixel) if pixel != PixelType::Palette => {
                return Err(StoreError::validation(format!(
                    "{} coverages do not take a palette",
                    pixel
                )))
            }
            (Some(p), _) if !p.fits(self.sample_type) => {
                return Err(StoreError::validation(format!(
                    "{} palette entries exceed {} range",
                    p.len(),
                    self.sample_type
                )))
            }
            _ => {}
        }
        Ok(())
    }

    /// Resolution written to the registry.
    pub fn registry_resolution(&self) -> (f64, f64) {
        if self.policies.mixed_resolutions {
            (MIXED_RESOLUTION_SENTINEL, MIXED_RESOLUTION_SENTINEL)
        } else {
            (self.x_res, self.y_res)
        }
    }
}

/// Names of the tables backing one coverage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverageTables {
    pub levels: String,
    pub section_levels: String,
    pub sections: String,
    pub tiles: String,
    pub tile_data: String,
    pub sections_rtree: String,
    pub tiles_rtree: String,
}

impl CoverageTables {
    pub fn new(coverage: &str) -> Self {
        Self {
            levels: format!("{}_levels", coverage),
            section_levels: format!("{}_section_levels", coverage),
            sections: format!("{}_sections", coverage),
            tiles: format!("{}_tiles", coverage),
            tile_data: format!("{}_tile_data", coverage),
            sections_rtree: format!("idx_{}_sections_geometry", coverage),
            tiles_rtree: format!("idx_{}_tiles_geometry", coverage),
        }
    }
}

/// A coverage as described by its registry row.
#[derive(Debug, Clone, PartialEq)]
pub struct Coverage {
    name: String,
    title: String,
    abstract_text: String,
    sample_type: SampleType,
    pixel_type: PixelType,
    num_bands: u8,
    compression: Compression,
    quality: u8,
    tile_width: u32,
    tile_height: u32,
    x_res: f64,
    y_res: f64,
    srid: i32,
    no_data: Option<Pixel>,
    palette: Option<Palette>,
    policies: CoveragePolicies,
    is_queryable: bool,
    default_bands: Option<DefaultBands>,
    auto_ndvi: bool,
    extent: Option<BoundingBox>,
}

const COVERAGE_COLUMNS: &str = "coverage_name, title, abstract, sample_type, pixel_type, \
    num_bands, compression, quality, tile_width, tile_height, horz_resolution, \
    vert_resolution, srid, nodata_pixel, palette, strict_resolution, mixed_resolutions, \
    section_paths, section_md5, section_summary, is_queryable, red_band_index, \
    green_band_index, blue_band_index, nir_band_index, enable_auto_ndvi, \
    extent_minx, extent_miny, extent_maxx, extent_maxy";

impl Coverage {
    /// Load a coverage from the main database.
    pub fn load(conn: &Connection, name: &str) -> Result<Self> {
        Self::load_from(conn, None, name)
    }

    /// Load a coverage from the main database or an attached one.
    pub fn load_from(conn: &Connection, db_prefix: Option<&str>, name: &str) -> Result<Self> {
        if name.is_empty() {
            return Err(StoreError::invalid_argument("coverage name is empty"));
        }
        let prefix = match db_prefix {
            Some(p) => {
                check_identifier(p)?;
                format!("\"{}\".", p)
            }
            None => String::new(),
        };
        let sql = format!(
            "SELECT {} FROM {}raster_coverages WHERE coverage_name = ?1",
            COVERAGE_COLUMNS, prefix
        );
        let coverage = conn
            .query_row(&sql, [name], |row| Ok(Self::from_row(row)))
            .optional()?
            .ok_or_else(|| StoreError::CoverageNotFound(name.to_string()))??;
        coverage.check_policies()?;
        Ok(coverage)
    }

    fn from_row(row: &Row<'_>) -> Result<Self> {
        let sample_name = text_col(row, 3, "sample_type")?;
        let pixel_name = text_col(row, 4, "pixel_type")?;
        let compression_name = text_col(row, 6, "compression")?;
        let sample_type = SampleType::from_name(&sample_name)
            .ok_or_else(|| StoreError::validation(format!("unknown sample type {}", sample_name)))?;
        let pixel_type = PixelType::from_name(&pixel_name)
            .ok_or_else(|| StoreError::validation(format!("unknown pixel type {}", pixel_name)))?;
        let compression = Compression::from_name(&compression_name).ok_or_else(|| {
            StoreError::validation(format!("unknown compression {}", compression_name))
        })?;

        let no_data = opt_blob_col(row, 13, "nodata_pixel")?
            .map(|b| Pixel::decode(&b))
            .transpose()?;
        let palette = opt_blob_col(row, 14, "palette")?
            .map(|b| Palette::decode(&b))
            .transpose()?;

        let bands = [
            opt_int_col(row, 21, "red_band_index")?,
            opt_int_col(row, 22, "green_band_index")?,
            opt_int_col(row, 23, "blue_band_index")?,
            opt_int_col(row, 24, "nir_band_index")?,
        ];
        let default_bands = match bands {
            [Some(r), Some(g), Some(b), Some(n)] => Some(DefaultBands::new(
                narrow(r, "red_band_index")?,
                narrow(g, "green_band_index")?,
                narrow(b, "blue_band_index")?,
                narrow(n, "nir_band_index")?,
            )),
            [None, None, None, None] => None,
            _ => {
                return Err(StoreError::validation(
                    "default band indices are only partially set",
                ))
            }
        };

        let extent = match (
            opt_real_col(row, 26, "extent_minx")?,
            opt_real_col(row, 27, "extent_miny")?,
            opt_real_col(row, 28, "extent_maxx")?,
            opt_real_col(row, 29, "extent_maxy")?,
        ) {
            (Some(a), Some(b), Some(c), Some(d)) => Some(BoundingBox::new(a, b, c, d)),
            _ => None,
        };

        Ok(Self {
            name: text_col(row, 0, "coverage_name")?,
            title: text_col(row, 1, "title")?,
            abstract_text: text_col(row, 2, "abstract")?,
            sample_type,
            pixel_type,
            num_bands: narrow(int_col(row, 5, "num_bands")?, "num_bands")?,
            compression,
            quality: narrow(int_col(row, 7, "quality")?, "quality")?,
            tile_width: narrow(int_col(row, 8, "tile_width")?, "tile_width")?,
            tile_height: narrow(int_col(row, 9, "tile_height")?, "tile_height")?,
            x_res: real_col(row, 10, "horz_resolution")?,
            y_res: real_col(row, 11, "vert_resolution")?,
            srid: narrow(int_col(row, 12, "srid")?, "srid")?,
            no_data,
            palette,
            policies: CoveragePolicies {
                strict_resolution: int_col(row, 15, "strict_resolution")? != 0,
                mixed_resolutions: int_col(row, 16, "mixed_resolutions")? != 0,
                section_paths: int_col(row, 17, "section_paths")? != 0,
                section_md5: int_col(row, 18, "section_md5")? != 0,
                section_summary: int_col(row, 19, "section_summary")? != 0,
            },
            is_queryable: int_col(row, 20, "is_queryable")? != 0,
            default_bands,
            auto_ndvi: int_col(row, 25, "enable_auto_ndvi")? != 0,
            extent,
        })
    }

    /// Reject stored policy combinations no coverage may hold.
    fn check_policies(&self) -> Result<()> {
        validate_format(self.sample_type, self.pixel_type, self.num_bands)
            .map_err(|e| StoreError::validation(e.to_string()))?;
        if let Some(nd) = &self.no_data {
            if !nd.matches(self.sample_type, self.pixel_type, self.num_bands) {
                return Err(StoreError::validation(format!(
                    "coverage {}: stored no-data pixel does not match the format",
                    self.name
                )));
            }
        }
        if self.pixel_type == PixelType::Palette && self.palette.is_none() {
            return Err(StoreError::validation(format!(
                "coverage {}: PALETTE coverage without palette",
                self.name
            )));
        }
        if self.policies.mixed_resolutions {
            if self.x_res != MIXED_RESOLUTION_SENTINEL
                || self.y_res != MIXED_RESOLUTION_SENTINEL
            {
                return Err(StoreError::validation(format!(
                    "coverage {}: mixed resolutions without the sentinel resolution",
                    self.name
                )));
            }
        } else if self.x_res <= 0.0 || self.y_res <= 0.0 {
            return Err(StoreError::validation(format!(
                "coverage {}: non-positive resolution",
                self.name
            )));
        }
        if let Some(bands) = &self.default_bands {
            if self.pixel_type != PixelType::Multiband {
                return Err(StoreError::validation(format!(
                    "coverage {}: default bands on a {} coverage",
                    self.name, self.pixel_type
                )));
            }
            bands.validate(self.num_bands)?;
        }
        if self.auto_ndvi && self.default_bands.is_none() {
            return Err(StoreError::validation(format!(
                "coverage {}: auto NDVI enabled without default bands",
                self.name
            )));
        }
        Ok(())
    }

    /// Definition that recreates this coverage.
    pub fn definition(&self) -> CoverageDefinition {
        CoverageDefinition {
            name: self.name.clone(),
            sample_type: self.sample_type,
            pixel_type: self.pixel_type,
            num_bands: self.num_bands,
            compression: self.compression,
            quality: self.quality,
            tile_width: self.tile_width,
            tile_height: self.tile_height,
            srid: self.srid,
            x_res: self.x_res,
            y_res: self.y_res,
            no_data: self.no_data.clone(),
            palette: self.palette.clone(),
            policies: self.policies,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn abstract_text(&self) -> &str {
        &self.abstract_text
    }

    pub fn sample_type(&self) -> SampleType {
        self.sample_type
    }

    pub fn pixel_type(&self) -> PixelType {
        self.pixel_type
    }

    pub fn num_bands(&self) -> u8 {
        self.num_bands
    }

    pub fn compression(&self) -> Compression {
        self.compression
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    pub fn tile_width(&self) -> u32 {
        self.tile_width
    }

    pub fn tile_height(&self) -> u32 {
        self.tile_height
    }

    /// Registry resolution (the sentinel for mixed-resolution coverages).
    pub fn resolution(&self) -> (f64, f64) {
        (self.x_res, self.y_res)
    }

    pub fn srid(&self) -> i32 {
        self.srid
    }

    pub fn no_data(&self) -> Option<&Pixel> {
        self.no_data.as_ref()
    }

    pub fn palette(&self) -> Option<&Palette> {
        self.palette.as_ref()
    }

    pub fn policies(&self) -> &CoveragePolicies {
        &self.policies
    }

    pub fn is_mixed_resolution(&self) -> bool {
        self.policies.mixed_resolutions
    }

    pub fn is_queryable(&self) -> bool {
        self.is_queryable
    }

    pub fn default_bands(&self) -> Option<DefaultBands> {
        self.default_bands
    }

    pub fn auto_ndvi(&self) -> bool {
        self.auto_ndvi
    }

    /// Extent recorded by the last extent update.
    pub fn extent(&self) -> Option<BoundingBox> {
        self.extent
    }

    pub fn tables(&self) -> CoverageTables {
        CoverageTables::new(&self.name)
    }

    /// What every tile of this coverage must look like.
    pub fn tile_format(&self) -> TileFormat {
        TileFormat {
            tile_width: self.tile_width,
            tile_height: self.tile_height,
            sample_type: self.sample_type,
            pixel_type: self.pixel_type,
            num_bands: self.num_bands,
            compression: self.compression,
        }
    }
}

fn type_error(column: &str) -> StoreError {
    StoreError::validation(format!("raster_coverages.{} has an unexpected type", column))
}

fn narrow<T: TryFrom<i64>>(value: i64, column: &str) -> Result<T> {
    T::try_from(value).map_err(|_| {
        StoreError::validation(format!("raster_coverages.{} value {} out of range", column, value))
    })
}

fn text_col(row: &Row<'_>, idx: usize, column: &str) -> Result<String> {
    match row.get_ref(idx)? {
        ValueRef::Text(t) => String::from_utf8(t.to_vec()).map_err(|_| type_error(column)),
        _ => Err(type_error(column)),
    }
}

fn int_col(row: &Row<'_>, idx: usize, column: &str) -> Result<i64> {
    match row.get_ref(idx)? {
        ValueRef::Integer(i) => Ok(i),
        _ => Err(type_error(column)),
    }
}

fn real_col(row: &Row<'_>, idx: usize, column: &str) -> Result<f64> {
    match row.get_ref(idx)? {
        ValueRef::Real(r) => Ok(r),
        _ => Err(type_error(column)),
    }
}

fn opt_int_col(row: &Row<'_>, idx: usize, column: &str) -> Result<Option<i64>> {
    match row.get_ref(idx)? {
        ValueRef::Null => Ok(None),
        ValueRef::Integer(i) => Ok(Some(i)),
        _ => Err(type_error(column)),
    }
}

fn opt_real_col(row: &Row<'_>, idx: usize, column: &str) -> Result<Option<f64>> {
    match row.get_ref(idx)? {
        ValueRef::Null => Ok(None),
        ValueRef::Real(r) => Ok(Some(r)),
        _ => Err(type_error(column)),
    }
}

fn opt_blob_col(row: &Row<'_>, idx: usize, column: &str) -> Result<Option<Vec<u8>>> {
    match row.get_ref(idx)? {
        ValueRef::Null => Ok(None),
        ValueRef::Blob(b) => Ok(Some(b.to_vec())),
        _ => Err(type_error(column)),
    }
}
