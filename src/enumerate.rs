use std::ops::RangeInclusive;

use crate::bounding_box::{BoundingBox, TileRange};

/// The set of tiles to consider for a run: every zoom level between
/// `min_zoom` and `max_zoom`, restricted to `bounds` if given.
///
/// Coordinates use XYZ row numbering and are produced coarse to fine, in the
/// same order every time for the same input.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TileSpace {
    pub min_zoom: u8,
    pub max_zoom: u8,
    pub bounds: Option<BoundingBox>,
}

impl TileSpace {
    pub fn new(min_zoom: u8, max_zoom: u8, bounds: Option<BoundingBox>) -> Self {
        Self {
            min_zoom,
            max_zoom,
            bounds,
        }
    }

    pub fn zoom_levels(&self) -> RangeInclusive<u8> {
        self.min_zoom..=self.max_zoom
    }

    pub fn level(&self, zoom: u8) -> TileRange {
        self.bounds
            .unwrap_or_else(BoundingBox::world)
            .tile_range(zoom)
    }

    /// Total number of tiles across all levels.
    pub fn count(&self) -> u64 {
        self.zoom_levels().map(|z| self.level(z).count()).sum()
    }

    #[cfg(test)]
    fn tiles(&self) -> impl Iterator<Item = crate::tile::TileCoord> + '_ {
        self.zoom_levels().flat_map(move |z| self.level(z).iter())
    }
}
