//! Tile storage.
//!
//! Everything in here is keyed by [`TileCoord`] in TMS row numbering (row 0
//! is the southernmost row), which is what MBTiles files use on disk.

use anyhow::{ensure, Context, Result};
use r2d2::Pool;
use r2d2_sqlite::{
    rusqlite::{params, OptionalExtension},
    SqliteConnectionManager,
};
use std::{
    collections::BTreeMap,
    fmt,
    path::{Path, PathBuf},
};

use crate::bounding_box::BoundingBox;
use crate::tile::{Tile, TileCoord, MAX_LAT};

/// A random access tile store.
pub trait TileStore: Send + Sync {
    fn exists(&self, coord: &TileCoord) -> Result<bool>;

    fn read(&self, coord: &TileCoord) -> Result<Option<Vec<u8>>>;

    fn write_one(&self, tile: &Tile) -> Result<()>;

    /// Writes all tiles at once. Tiles already in the store are overwritten.
    fn write_batch(&self, tiles: &[Tile]) -> Result<()>;

    /// A page of the stored coordinates in `(z, x, y)` order.
    fn list(&self, offset: u64, limit: usize) -> Result<Vec<TileCoord>>;

    fn count(&self) -> Result<u64>;

    /// Identifies the underlying storage, e.g. the file backing it.
    fn location(&self) -> String;
}

/// Dataset description written into a freshly created store.
#[derive(Clone, Debug, PartialEq)]
pub struct Metadata {
    pub name: String,
    pub description: String,
    pub version: String,
    pub attribution: String,
    /// `overlay` or `baselayer`.
    pub layer_type: String,
    /// Tile payload format, e.g. `png`.
    pub format: String,
    pub bounds: Option<BoundingBox>,
    pub min_zoom: u8,
    pub max_zoom: u8,
}

impl Metadata {
    fn rows(&self) -> Vec<(&'static str, String)> {
        let bounds = self.bounds.unwrap_or_else(BoundingBox::world);
        let (south, north) = (bounds.south.max(-MAX_LAT), bounds.north.min(MAX_LAT));
        let center = format!(
            "{},{},{}",
            (bounds.west + bounds.east) / 2f64,
            (south + north) / 2f64,
            self.min_zoom
        );

        vec![
            ("name", self.name.clone()),
            ("description", self.description.clone()),
            ("version", self.version.clone()),
            ("attribution", self.attribution.clone()),
            ("credits", self.attribution.clone()),
            ("type", self.layer_type.clone()),
            ("format", self.format.clone()),
            (
                "bounds",
                format!("{},{},{},{}", bounds.west, south, bounds.east, north),
            ),
            ("center", center),
            ("minzoom", self.min_zoom.to_string()),
            ("maxzoom", self.max_zoom.to_string()),
        ]
    }
}

impl Default for Metadata {
    fn default() -> Self {
        Self {
            name: "tiles".to_owned(),
            description: String::new(),
            version: "1.0".to_owned(),
            attribution: String::new(),
            layer_type: "overlay".to_owned(),
            format: "png".to_owned(),
            bounds: None,
            min_zoom: 0,
            max_zoom: 0,
        }
    }
}

/// An MBTiles (SQLite) tile store.
pub struct MbTiles {
    path: PathBuf,
    pool: Pool<SqliteConnectionManager>,
}

impl MbTiles {
    /// Opens the store at `path`, creating it with the given metadata if it
    /// doesn't exist yet. Metadata of an existing store is left untouched.
    pub fn create(path: &Path, metadata: &Metadata) -> Result<Self> {
        let is_new = !path.exists();
        let store = Self::connect(path)?;

        store
            .pool
            .get()?
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS metadata (name TEXT, value TEXT, UNIQUE (name));
                CREATE TABLE IF NOT EXISTS tiles (zoom_level INTEGER, tile_column INTEGER, tile_row INTEGER, tile_data BLOB, UNIQUE (zoom_level, tile_column, tile_row));
                CREATE UNIQUE INDEX IF NOT EXISTS tile_index on tiles (zoom_level, tile_column, tile_row);",
            )
            .with_context(|| format!("failed creating schema in {}", path.display()))?;

        if is_new {
            log::debug!("initializing metadata of {}", path.display());
            for (name, value) in metadata.rows() {
                store.set_metadata(name, &value)?;
            }
        }

        Ok(store)
    }

    /// Opens an existing store.
    pub fn open(path: &Path) -> Result<Self> {
        ensure!(path.exists(), "tile store {} does not exist", path.display());
        Self::connect(path)
    }

    fn connect(path: &Path) -> Result<Self> {
        let manager = SqliteConnectionManager::file(path);
        let pool = Pool::builder()
            .max_size(4)
            .build(manager)
            .with_context(|| format!("failed opening tile store {}", path.display()))?;

        Ok(Self {
            path: path.to_owned(),
            pool,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the whole metadata table.
    pub fn metadata(&self) -> Result<BTreeMap<String, String>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare("SELECT name, value FROM metadata")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        rows.collect::<Result<_, _>>()
            .context("failed reading store metadata")
    }

    fn set_metadata(&self, name: &str, value: &str) -> Result<()> {
        self.pool.get()?.execute(
            "INSERT OR REPLACE INTO metadata (name, value) VALUES (?1, ?2)",
            params![name, value],
        )?;
        Ok(())
    }
}

impl TileStore for MbTiles {
    fn exists(&self, coord: &TileCoord) -> Result<bool> {
        let found = self
            .pool
            .get()?
            .query_row(
                "SELECT 1 FROM tiles WHERE zoom_level = ?1 AND tile_column = ?2 AND tile_row = ?3 LIMIT 1",
                params![coord.z, coord.x, coord.y],
                |_| Ok(()),
            )
            .optional()
            .with_context(|| format!("failed looking up tile {}", coord))?;

        Ok(found.is_some())
    }

    fn read(&self, coord: &TileCoord) -> Result<Option<Vec<u8>>> {
        self.pool
            .get()?
            .query_row(
                "SELECT tile_data FROM tiles WHERE zoom_level = ?1 AND tile_column = ?2 AND tile_row = ?3 LIMIT 1",
                params![coord.z, coord.x, coord.y],
                |row| row.get(0),
            )
            .optional()
            .with_context(|| format!("failed reading tile {}", coord))
    }

    fn write_one(&self, tile: &Tile) -> Result<()> {
        let c = tile.coord;
        self.pool
            .get()?
            .execute(
                "INSERT OR REPLACE INTO tiles (zoom_level, tile_column, tile_row, tile_data) VALUES (?1, ?2, ?3, ?4)",
                params![c.z, c.x, c.y, tile.data.as_slice()],
            )
            .with_context(|| format!("failed writing tile {}", c))?;
        Ok(())
    }

    fn write_batch(&self, tiles: &[Tile]) -> Result<()> {
        if tiles.is_empty() {
            return Ok(());
        }

        let mut conn = self.pool.get()?;
        let transaction = conn.transaction()?;
        {
            let mut stmt = transaction.prepare_cached(
                "INSERT OR REPLACE INTO tiles (zoom_level, tile_column, tile_row, tile_data) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for tile in tiles {
                let c = tile.coord;
                stmt.execute(params![c.z, c.x, c.y, tile.data.as_slice()])?;
            }
        }
        transaction
            .commit()
            .with_context(|| format!("failed committing {} tiles", tiles.len()))?;

        Ok(())
    }

    fn list(&self, offset: u64, limit: usize) -> Result<Vec<TileCoord>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare_cached(
            "SELECT zoom_level, tile_column, tile_row FROM tiles ORDER BY zoom_level, tile_column, tile_row LIMIT ?1 OFFSET ?2",
        )?;
        let rows = stmt.query_map(params![limit as i64, offset as i64], |row| {
            Ok(TileCoord {
                z: row.get(0)?,
                x: row.get(1)?,
                y: row.get(2)?,
            })
        })?;

        rows.collect::<Result<_, _>>()
            .context("failed listing tiles")
    }

    fn count(&self) -> Result<u64> {
        let count: i64 = self
            .pool
            .get()?
            .query_row("SELECT COUNT(*) FROM tiles", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn location(&self) -> String {
        self.path
            .canonicalize()
            .unwrap_or_else(|_| self.path.clone())
            .display()
            .to_string()
    }
}

impl fmt::Debug for MbTiles {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MbTiles").field("path", &self.path).finish()
    }
}
