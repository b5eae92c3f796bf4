//! Store database handle.

use std::path::Path;

use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::{Result, StoreError};
use crate::schema::check_identifier;
use crate::sql_functions;

const METADATA_DDL: &str = "
CREATE TABLE IF NOT EXISTS raster_coverages (
    coverage_name TEXT NOT NULL COLLATE NOCASE PRIMARY KEY,
    title TEXT NOT NULL DEFAULT '*** missing Title ***',
    abstract TEXT NOT NULL DEFAULT '*** missing Abstract ***',
    sample_type TEXT NOT NULL,
    pixel_type TEXT NOT NULL,
    num_bands INTEGER NOT NULL CHECK (num_bands > 0),
    compression TEXT NOT NULL,
    quality INTEGER NOT NULL CHECK (quality BETWEEN 0 AND 100),
    tile_width INTEGER NOT NULL,
    tile_height INTEGER NOT NULL,
    horz_resolution DOUBLE NOT NULL,
    vert_resolution DOUBLE NOT NULL,
    srid INTEGER NOT NULL,
    nodata_pixel BLOB,
    palette BLOB,
    statistics BLOB,
    geo_minx DOUBLE,
    geo_miny DOUBLE,
    geo_maxx DOUBLE,
    geo_maxy DOUBLE,
    extent_minx DOUBLE,
    extent_miny DOUBLE,
    extent_maxx DOUBLE,
    extent_maxy DOUBLE,
    strict_resolution INTEGER NOT NULL DEFAULT 0,
    mixed_resolutions INTEGER NOT NULL DEFAULT 0,
    section_paths INTEGER NOT NULL DEFAULT 0,
    section_md5 INTEGER NOT NULL DEFAULT 0,
    section_summary INTEGER NOT NULL DEFAULT 0,
    is_queryable INTEGER NOT NULL DEFAULT 0,
    red_band_index INTEGER,
    green_band_index INTEGER,
    blue_band_index INTEGER,
    nir_band_index INTEGER,
    enable_auto_ndvi INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS raster_coverages_srid (
    coverage_name TEXT NOT NULL COLLATE NOCASE,
    srid INTEGER NOT NULL,
    PRIMARY KEY (coverage_name, srid),
    FOREIGN KEY (coverage_name) REFERENCES raster_coverages (coverage_name) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS raster_coverages_keyword (
    coverage_name TEXT NOT NULL COLLATE NOCASE,
    keyword TEXT NOT NULL,
    PRIMARY KEY (coverage_name, keyword),
    FOREIGN KEY (coverage_name) REFERENCES raster_coverages (coverage_name) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS geometry_columns (
    f_table_name TEXT NOT NULL COLLATE NOCASE,
    f_geometry_column TEXT NOT NULL COLLATE NOCASE,
    geometry_type INTEGER NOT NULL,
    coord_dimension INTEGER NOT NULL,
    srid INTEGER NOT NULL,
    spatial_index_enabled INTEGER NOT NULL,
    PRIMARY KEY (f_table_name, f_geometry_column)
);
";

/// An open raster store.
///
/// Every connection has foreign keys enabled, the store SQL functions
/// registered and the metadata tables present.
pub struct RasterDb {
    conn: Connection,
}

impl RasterDb {
    /// Open (or create) a store file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        info!(path = %path.display(), "Opened raster store");
        Self::init(conn)
    }

    /// Open a transient in-memory store.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        sql_functions::register(&conn)?;
        conn.execute_batch(METADATA_DDL)?;
        debug!("Store metadata tables ready");
        Ok(Self { conn })
    }

    /// Borrow the underlying connection.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Attach another store file under `alias` (used as a copy source).
    pub fn attach(&self, path: impl AsRef<Path>, alias: &str) -> Result<()> {
        check_identifier(alias)?;
        let path = path
            .as_ref()
            .to_str()
            .ok_or_else(|| StoreError::invalid_argument("database path is not valid UTF-8"))?;
        self.conn
            .execute(&format!("ATTACH DATABASE ?1 AS \"{}\"", alias), [path])?;
        debug!(alias = %alias, path = %path, "Attached database");
        Ok(())
    }

    /// Detach a previously attached database.
    pub fn detach(&self, alias: &str) -> Result<()> {
        check_identifier(alias)?;
        self.conn
            .execute_batch(&format!("DETACH DATABASE \"{}\"", alias))?;
        Ok(())
    }

    /// Run `f` inside one transaction.
    ///
    /// Commits when `f` returns `Ok`; an `Err` drops the transaction, which
    /// rolls it back.
    pub fn unit_of_work<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let tx = self.conn.transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }
}
