//! Subcommand implementations. Each returns the JSON report to print.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Args;
use coverage_store::{
    alternative_srids, build_coverage_pyramid, build_section_pyramid, copy_coverage,
    coverage_summary, create_coverage, delete_section as remove_section, drop_coverage,
    enable_auto_ndvi, get_default_bands, import_section, keywords, list_coverages,
    list_sections, load_raster, resolve_level, set_default_bands, update_coverage_extent,
    update_coverage_statistics, BandSelection, Coverage, CoverageDefinition, CoveragePolicies,
    DefaultBands, EngineConfig, NewSection, RasterDb, RasterRequest,
};
use raster_common::{BoundingBox, Compression, DownsampleMethod, PixelType, Raster, SampleType};
use serde_json::{json, Value};
use tracing::info;

use crate::parse;

/// Alias under which a copy source is attached.
const COPY_SOURCE: &str = "copy_source";

#[derive(Args, Debug)]
pub struct CreateArgs {
    pub coverage: String,

    /// Sample type (1-BIT, 2-BIT, 4-BIT, INT8, UINT8, INT16, UINT16, INT32, UINT32, FLOAT, DOUBLE)
    #[arg(long, default_value = "UINT8")]
    pub sample: String,

    /// Pixel type (MONOCHROME, PALETTE, GRAYSCALE, RGB, MULTIBAND, DATAGRID)
    #[arg(long, default_value = "RGB")]
    pub pixel: String,

    #[arg(long, default_value_t = 3)]
    pub bands: u8,

    #[arg(long, default_value = "DEFLATE")]
    pub compression: String,

    #[arg(long, default_value_t = 100)]
    pub quality: u8,

    /// Tile edge length (256-1024, multiple of 16)
    #[arg(long, default_value_t = 256)]
    pub tile_size: u32,

    #[arg(long, default_value_t = 4326)]
    pub srid: i32,

    /// "RES" or "XRES,YRES"; ignored with --mixed-resolutions
    #[arg(long, value_parser = parse::resolution, default_value = "1.0")]
    pub resolution: (f64, f64),

    /// Comma-separated no-data sample values
    #[arg(long)]
    pub no_data: Option<String>,

    #[arg(long)]
    pub strict_resolution: bool,

    #[arg(long)]
    pub mixed_resolutions: bool,

    #[arg(long)]
    pub section_paths: bool,

    #[arg(long)]
    pub section_md5: bool,

    #[arg(long)]
    pub section_summary: bool,
}

impl CreateArgs {
    fn definition(&self) -> Result<CoverageDefinition> {
        let sample = SampleType::from_name(&self.sample)
            .with_context(|| format!("unknown sample type {}", self.sample))?;
        let pixel = PixelType::from_name(&self.pixel)
            .with_context(|| format!("unknown pixel type {}", self.pixel))?;
        let compression = Compression::from_name(&self.compression)
            .with_context(|| format!("unknown compression {}", self.compression))?;

        let mut def = CoverageDefinition::new(&self.coverage, sample, pixel, self.bands)
            .with_compression(compression, self.quality)
            .with_tile_size(self.tile_size, self.tile_size)
            .with_srid(self.srid)
            .with_resolution(self.resolution.0, self.resolution.1)
            .with_policies(CoveragePolicies {
                strict_resolution: self.strict_resolution,
                mixed_resolutions: self.mixed_resolutions,
                section_paths: self.section_paths,
                section_md5: self.section_md5,
                section_summary: self.section_summary,
            });
        if let Some(values) = &self.no_data {
            def = def.with_no_data(parse::pixel(values, sample, pixel)?);
        }
        Ok(def)
    }
}

pub fn create(db: &mut RasterDb, args: &CreateArgs) -> Result<Value> {
    let def = args.definition()?;
    db.unit_of_work(|tx| create_coverage(tx, &def))?;
    Ok(json!({ "created": def.name }))
}

pub fn drop(db: &mut RasterDb, coverage: &str) -> Result<Value> {
    db.unit_of_work(|tx| drop_coverage(tx, coverage))?;
    Ok(json!({ "dropped": coverage }))
}

pub fn list(db: &RasterDb) -> Result<Value> {
    Ok(serde_json::to_value(list_coverages(db.conn())?)?)
}

pub fn info(db: &RasterDb, name: &str) -> Result<Value> {
    let conn = db.conn();
    let Some(summary) = coverage_summary(conn, name)? else {
        bail!(coverage_store::StoreError::CoverageNotFound(name.to_string()));
    };
    let coverage = Coverage::load(conn, name)?;
    Ok(json!({
        "coverage": summary,
        "resolution": coverage.resolution(),
        "policies": coverage.policies(),
        "default_bands": coverage.default_bands(),
        "auto_ndvi": coverage.auto_ndvi(),
        "alternative_srids": alternative_srids(conn, name)?,
        "keywords": keywords(conn, name)?,
        "sections": list_sections(conn, &coverage)?,
    }))
}

#[derive(Args, Debug)]
pub struct ImportArgs {
    pub coverage: String,

    /// Section name, unique within the coverage
    pub section: String,

    /// Raw band-interleaved little-endian pixels in the coverage format
    #[arg(long)]
    pub input: PathBuf,

    /// "WIDTHxHEIGHT" of the input
    #[arg(long, value_parser = parse::size)]
    pub size: (u32, u32),

    /// Section extent "minx,miny,maxx,maxy"
    #[arg(long, value_parser = parse::bbox)]
    pub bbox: BoundingBox,

    /// MD5 checksum of the source file, kept when the coverage records them
    #[arg(long)]
    pub md5: Option<String>,

    #[arg(long)]
    pub summary: Option<String>,
}

pub fn import(db: &mut RasterDb, args: &ImportArgs) -> Result<Value> {
    let coverage = Coverage::load(db.conn(), &args.coverage)?;
    let (width, height) = args.size;
    let buffer = fs::read(&args.input)
        .with_context(|| format!("failed to read {}", args.input.display()))?;
    let mut raster = Raster::new(
        width,
        height,
        coverage.sample_type(),
        coverage.pixel_type(),
        coverage.num_bands(),
        buffer,
        None,
    )?;
    if let Some(palette) = coverage.palette() {
        raster = raster.with_palette(palette.clone())?;
    }

    let mut section = NewSection::new(&args.section, args.bbox, width, height)
        .with_file_path(args.input.display().to_string());
    if let Some(md5) = &args.md5 {
        section = section.with_md5(md5);
    }
    if let Some(summary) = &args.summary {
        section = section.with_summary(summary);
    }

    let report = db.unit_of_work(|tx| {
        let report = import_section(tx, &coverage, section, &raster)?;
        update_coverage_extent(tx, coverage.name())?;
        update_coverage_statistics(tx, coverage.name())?;
        Ok(report)
    })?;
    Ok(serde_json::to_value(report)?)
}

pub fn delete_section(db: &mut RasterDb, coverage: &str, section_id: i64) -> Result<Value> {
    db.unit_of_work(|tx| {
        remove_section(tx, coverage, section_id)?;
        update_coverage_extent(tx, coverage)?;
        update_coverage_statistics(tx, coverage)?;
        Ok(())
    })?;
    Ok(json!({ "coverage": coverage, "deleted_section": section_id }))
}

#[derive(Args, Debug)]
pub struct DefaultBandsArgs {
    pub coverage: String,

    /// Set all four bands; without them the current setting is shown
    #[arg(long, requires_all = ["green", "blue", "nir"])]
    pub red: Option<u8>,
    #[arg(long)]
    pub green: Option<u8>,
    #[arg(long)]
    pub blue: Option<u8>,
    #[arg(long)]
    pub nir: Option<u8>,
}

pub fn default_bands(db: &mut RasterDb, args: &DefaultBandsArgs) -> Result<Value> {
    let requested = match (args.red, args.green, args.blue, args.nir) {
        (Some(r), Some(g), Some(b), Some(n)) => Some(DefaultBands::new(r, g, b, n)),
        (None, None, None, None) => None,
        _ => bail!(coverage_store::StoreError::invalid_argument(
            "--red, --green, --blue and --nir go together"
        )),
    };
    if let Some(bands) = requested {
        db.unit_of_work(|tx| set_default_bands(tx, &args.coverage, bands))?;
    }
    let current = get_default_bands(db.conn(), &args.coverage)?;
    Ok(json!({ "coverage": args.coverage, "default_bands": current }))
}

pub fn auto_ndvi(db: &RasterDb, coverage: &str, enabled: bool) -> Result<Value> {
    enable_auto_ndvi(db.conn(), coverage, enabled)?;
    Ok(json!({ "coverage": coverage, "auto_ndvi": enabled }))
}

pub fn copy(db: &mut RasterDb, coverage: &str, from: &Path) -> Result<Value> {
    if !from.exists() {
        bail!("source store {} does not exist", from.display());
    }
    db.attach(from, COPY_SOURCE)?;
    let copied = db.unit_of_work(|tx| copy_coverage(tx, COPY_SOURCE, coverage));
    db.detach(COPY_SOURCE)?;
    copied?;
    info!(coverage = %coverage, from = %from.display(), "Copy finished");
    Ok(json!({ "copied": coverage, "from": from.display().to_string() }))
}

#[derive(Args, Debug)]
pub struct PyramidizeArgs {
    pub coverage: String,

    /// Only this section (default: every section)
    #[arg(long)]
    pub section: Option<i64>,

    /// Reduction between levels (2, 4 or 8)
    #[arg(long)]
    pub factor: Option<u32>,

    /// mean, max or nearest
    #[arg(long)]
    pub method: Option<DownsampleMethod>,
}

pub fn pyramidize(
    db: &mut RasterDb,
    config: &mut EngineConfig,
    args: &PyramidizeArgs,
) -> Result<Value> {
    if let Some(factor) = args.factor {
        config.pyramid.factor = factor;
    }
    if let Some(method) = args.method {
        config.pyramid.method = method;
    }
    if let Err(e) = config.validate() {
        bail!(coverage_store::StoreError::invalid_argument(e));
    }

    let coverage = Coverage::load(db.conn(), &args.coverage)?;
    let config = &*config;
    let reports = db.unit_of_work(|tx| match args.section {
        Some(section_id) => Ok(vec![build_section_pyramid(tx, config, &coverage, section_id)?]),
        None => build_coverage_pyramid(tx, config, &coverage),
    })?;
    Ok(serde_json::to_value(reports)?)
}

#[derive(Args, Debug)]
pub struct ExportArgs {
    pub coverage: String,

    /// Window "minx,miny,maxx,maxy"
    #[arg(long, value_parser = parse::bbox)]
    pub bbox: BoundingBox,

    /// Output "WIDTHxHEIGHT"
    #[arg(long, value_parser = parse::size)]
    pub size: (u32, u32),

    /// native, default, ndvi, a band index or "R,G,B"
    #[arg(long, value_parser = parse::bands, default_value = "native")]
    pub bands: BandSelection,

    /// Section id (required for mixed-resolution coverages)
    #[arg(long)]
    pub section: Option<i64>,

    /// Fill for cells without data, comma-separated values in the output format
    #[arg(long)]
    pub background: Option<String>,

    /// File receiving the raw pixels
    #[arg(long)]
    pub out: PathBuf,
}

pub fn export(db: &RasterDb, config: &EngineConfig, args: &ExportArgs) -> Result<Value> {
    let conn = db.conn();
    let coverage = Coverage::load(conn, &args.coverage)?;
    let (width, height) = args.size;
    let mut request = RasterRequest::new(args.bbox, width, height).with_bands(args.bands);
    if let Some(section_id) = args.section {
        request = request.with_section(section_id);
    }
    if let Some(values) = &args.background {
        let (sample, pixel) = output_format(&coverage, args.bands);
        request = request.with_background(parse::pixel(values, sample, pixel)?);
    }

    let resolved = resolve_level(conn, &coverage, args.section, request.x_res(), request.y_res())?;
    let raster = load_raster(conn, config, &coverage, &resolved, &request)?;
    fs::write(&args.out, raster.buffer())
        .with_context(|| format!("failed to write {}", args.out.display()))?;

    Ok(json!({
        "out": args.out.display().to_string(),
        "width": raster.width(),
        "height": raster.height(),
        "sample_type": raster.sample_type().as_str(),
        "pixel_type": raster.pixel_type().as_str(),
        "bands": raster.num_bands(),
        "bytes": raster.buffer().len(),
        "level": resolved,
    }))
}

/// Sample and pixel type a band selection produces.
fn output_format(coverage: &Coverage, bands: BandSelection) -> (SampleType, PixelType) {
    match bands {
        BandSelection::Native => (coverage.sample_type(), coverage.pixel_type()),
        BandSelection::Single(_) if coverage.num_bands() == 1 => {
            (coverage.sample_type(), coverage.pixel_type())
        }
        BandSelection::Single(_) => (coverage.sample_type(), PixelType::Grayscale),
        BandSelection::Triple { .. } | BandSelection::DefaultTriple => {
            (coverage.sample_type(), PixelType::Rgb)
        }
        BandSelection::Ndvi => (SampleType::Float, PixelType::DataGrid),
    }
}
