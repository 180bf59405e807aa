//! Download a tile pyramid from a tileserver into an MBTiles file.
//!
//! **Use with absolute caution.** Downloading tiles en-masse can hog
//! down a tile server easily.
//!
//! Tiles are fetched zoom level by zoom level with a bounded number of
//! parallel requests. Tiles already in the output are skipped, tiles the
//! server reports as empty (by their content length) are never downloaded,
//! and progress is checkpointed per batch so an interrupted run can be
//! resumed. Separate runs can be combined afterwards with [`merge`].
//!
//! # CLI Example
//!
//! ```bash
//! mbtiles-downloader download \
//!   --url "https://s3.amazonaws.com/elevation-tiles-prod/terrarium/{z}/{x}/{y}.png" \
//!   --output elevation.mbtiles \
//!   --checkpoints ./checkpoints \
//!   --min-zoom 0 \
//!   --max-zoom 6 \
//!   --rate 10
//!
//! mbtiles-downloader merge --source elevation2.mbtiles --target elevation.mbtiles
//! ```
//!
//! # Library Example
//! ```rust,no_run
//! use mbtiles_downloader::{download, BoundingBox, Config, Fetcher, MbTiles, Metadata};
//! use std::path::Path;
//!
//! # #[tokio::main]
//! # async fn main() -> anyhow::Result<()> {
//! let config = Config {
//!     bounds: Some(BoundingBox::new(6.031, 50.7492, 6.1649, 50.811)?),
//!     concurrency: 10,
//!     min_zoom: 1,
//!     max_zoom: 12,
//!     ..Config::new("https://{s}.tile.openstreetmap.de/{z}/{x}/{y}.png")
//! };
//! let store = MbTiles::create(Path::new("aachen.mbtiles"), &Metadata::default())?;
//!
//! download(&config, &Fetcher::http(&config)?, &store, None).await?;
//! # Ok(())
//! # }
//! ```

mod bounding_box;
mod checkpoint;
mod config;
mod download;
mod enumerate;
mod fetch;
mod filter;
mod merge;
mod store;
mod tile;
mod url;

#[cfg(test)]
mod testing;

pub use bounding_box::{BoundingBox, TileRange};
pub use checkpoint::{CheckpointSet, CheckpointStore};
pub use config::{Config, DEFAULT_EMPTY_TILE_LENGTH};
pub use download::{download, RunSummary};
pub use enumerate::TileSpace;
pub use fetch::{progress_bar, FetchReport, Fetcher, HttpTransport, Outcome, Transport};
pub use filter::missing_tiles;
pub use merge::{merge, MergeReport, DEFAULT_PAGE_SIZE};
pub use store::{MbTiles, Metadata, TileStore};
pub use tile::{Tile, TileCoord, MAX_ZOOM};
pub use url::UrlFormat;
