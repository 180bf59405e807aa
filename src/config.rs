use anyhow::{ensure, Result};
use std::time::Duration;

use crate::bounding_box::BoundingBox;
use crate::enumerate::TileSpace;
use crate::tile::MAX_ZOOM;

/// Byte length of the blank 1x1 PNG served for tiles without data by the
/// Terrarium elevation tiles.
pub const DEFAULT_EMPTY_TILE_LENGTH: u64 = 757;

/// Tile downloading configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    /// The URL to download individual tiles from including the replacement
    /// specifiers `{x}`, `{y}` and `{z}`.
    pub url: String,

    /// The minimum zoom level to download.
    pub min_zoom: u8,

    /// The maximum zoom level to download.
    pub max_zoom: u8,

    /// Only download tiles intersecting this box. The whole world if `None`.
    pub bounds: Option<BoundingBox>,

    /// Maximum number of tiles fetched in parallel.
    pub concurrency: usize,

    /// How many candidate tiles are handled per batch. Checkpoints are
    /// written after every batch.
    pub batch_size: usize,

    /// Whether to skip tiles that are already in the store.
    pub skip_existing: bool,

    /// Content length of the placeholder the server returns for tiles
    /// without data.
    pub empty_tile_length: u64,

    /// How many times to retry a failed HTTP request.
    pub request_retries: u8,

    /// Delay between two attempts of the same request.
    pub backoff: Duration,

    /// Timeout for a single HTTP request.
    ///
    /// Pass the zero duration to disable the timeout.
    pub timeout: Duration,

    /// Abort once more than this share of the attempted tiles of a zoom
    /// level failed permanently.
    pub max_failure_ratio: f64,

    /// Discard existing checkpoints before starting.
    pub reset: bool,

    /// Draw progress bars on stderr.
    pub progress: bool,
}

impl Config {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            min_zoom: 0,
            max_zoom: 4,
            bounds: None,
            concurrency: 5,
            batch_size: 1000,
            skip_existing: true,
            empty_tile_length: DEFAULT_EMPTY_TILE_LENGTH,
            request_retries: 3,
            backoff: Duration::from_secs(10),
            timeout: Duration::from_secs(30),
            max_failure_ratio: 0.1,
            reset: false,
            progress: false,
        }
    }

    /// Checks the configuration before anything touches the network.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.min_zoom <= self.max_zoom,
            "min zoom ({}) must not exceed max zoom ({})",
            self.min_zoom,
            self.max_zoom
        );
        ensure!(
            self.max_zoom <= MAX_ZOOM,
            "max zoom must be at most {}",
            MAX_ZOOM
        );
        ensure!(self.concurrency > 0, "concurrency must be > 0");
        ensure!(self.batch_size > 0, "batch size must be > 0");
        ensure!(self.empty_tile_length > 0, "empty tile length must be > 0");
        ensure!(
            (0f64..=1f64).contains(&self.max_failure_ratio),
            "max failure ratio must lie within [0, 1]"
        );

        if let Some(bounds) = self.bounds {
            // re-run the constructor checks for boxes built by hand
            BoundingBox::new(bounds.west, bounds.south, bounds.east, bounds.north)?;
        }

        Ok(())
    }

    /// All tiles the configuration covers.
    pub fn tile_space(&self) -> TileSpace {
        TileSpace::new(self.min_zoom, self.max_zoom, self.bounds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config::new("https://example.com/{z}/{x}/{y}.png")
    }

    #[test]
    fn defaults_are_valid() {
        let config = config();
        config.validate().unwrap();
        assert!(config.skip_existing);
        assert_eq!(config.empty_tile_length, 757);
    }

    #[test]
    fn rejects_inverted_zoom_range() {
        let config = Config {
            min_zoom: 5,
            max_zoom: 2,
            ..config()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_limits() {
        assert!(Config { concurrency: 0, ..config() }.validate().is_err());
        assert!(Config { batch_size: 0, ..config() }.validate().is_err());
        assert!(Config { empty_tile_length: 0, ..config() }.validate().is_err());
        assert!(Config { max_failure_ratio: 1.5, ..config() }.validate().is_err());
    }

    #[test]
    fn rejects_empty_bounds() {
        let bounds = BoundingBox {
            west: 10.0,
            south: 0.0,
            east: 10.0,
            north: 5.0,
        };
        let config = Config {
            bounds: Some(bounds),
            ..config()
        };
        assert!(config.validate().is_err());
    }
}
