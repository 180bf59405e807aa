use anyhow::{bail, ensure, Context, Result};
use std::{fmt, str::FromStr};

use crate::tile::{clamp_index, fractional_xy, max_index, TileCoord};

/// A geographic bounding box given in degrees.
///
/// # Example
/// ```rust
/// # use mbtiles_downloader::BoundingBox;
/// let aachen_germany = BoundingBox::new(6.031, 50.7492, 6.1649, 50.811).unwrap();
/// ```
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct BoundingBox {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

/// The rectangle of tiles a bounding box covers on a single zoom level, in
/// XYZ row numbering. Both ranges are inclusive.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TileRange {
    pub z: u8,
    pub x_min: u32,
    pub x_max: u32,
    pub y_min: u32,
    pub y_max: u32,
}

impl BoundingBox {
    /// Create a new bounding box from longitudes in [-180, 180] and
    /// latitudes in [-90, 90].
    ///
    /// Boxes crossing the antimeridian or without area are rejected.
    pub fn new(west: f64, south: f64, east: f64, north: f64) -> Result<Self> {
        for (name, value, limit) in [
            ("west", west, 180f64),
            ("east", east, 180f64),
            ("south", south, 90f64),
            ("north", north, 90f64),
        ] {
            ensure!(
                value.is_finite() && value.abs() <= limit,
                "{} boundary {} must lie within [-{}, {}]",
                name,
                value,
                limit,
                limit
            );
        }

        ensure!(west < east, "west ({}) must be smaller than east ({})", west, east);
        ensure!(south < north, "south ({}) must be smaller than north ({})", south, north);

        Ok(Self {
            west,
            south,
            east,
            north,
        })
    }

    /// The whole Web Mercator world.
    pub fn world() -> Self {
        Self {
            west: -180f64,
            south: -90f64,
            east: 180f64,
            north: 90f64,
        }
    }

    /// The tiles intersecting this box at `zoom`.
    ///
    /// Edges lying exactly on a tile boundary do not pull in the tile on the
    /// far side of it.
    pub fn tile_range(&self, zoom: u8) -> TileRange {
        let max = max_index(zoom);
        let (west, north) = fractional_xy(self.west, self.north, zoom);
        let (east, south) = fractional_xy(self.east, self.south, zoom);

        let x_min = clamp_index(west.floor(), max);
        let y_min = clamp_index(north.floor(), max);

        TileRange {
            z: zoom,
            x_min,
            x_max: clamp_index(east.ceil() - 1f64, max).max(x_min),
            y_min,
            y_max: clamp_index(south.ceil() - 1f64, max).max(y_min),
        }
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{},{}", self.west, self.south, self.east, self.north)
    }
}

impl FromStr for BoundingBox {
    type Err = anyhow::Error;

    /// Parses `west,south,east,north`.
    fn from_str(s: &str) -> Result<Self> {
        let values = s
            .split(',')
            .map(|v| v.trim().parse::<f64>())
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("invalid bounding box '{}'", s))?;

        match values.as_slice() {
            &[west, south, east, north] => Self::new(west, south, east, north),
            _ => bail!("bounding box '{}' must have four comma separated values", s),
        }
    }
}

impl TileRange {
    pub fn count(&self) -> u64 {
        u64::from(self.x_max - self.x_min + 1) * u64::from(self.y_max - self.y_min + 1)
    }

    /// Iterates column by column, top to bottom.
    pub fn iter(&self) -> impl Iterator<Item = TileCoord> + Clone {
        let TileRange {
            z,
            x_min,
            x_max,
            y_min,
            y_max,
        } = *self;

        (x_min..=x_max).flat_map(move |x| (y_min..=y_max).map(move |y| TileCoord::new(z, x, y)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_out_of_range_values() {
        assert!(BoundingBox::new(-181.0, 0.0, 10.0, 10.0).is_err());
        assert!(BoundingBox::new(0.0, -91.0, 10.0, 10.0).is_err());
        assert!(BoundingBox::new(0.0, 0.0, f64::NAN, 10.0).is_err());
    }

    #[test]
    fn rejects_empty_boxes() {
        assert!(BoundingBox::new(10.0, 0.0, 10.0, 10.0).is_err());
        assert!(BoundingBox::new(0.0, 10.0, 10.0, 5.0).is_err());
    }

    #[test]
    fn parses_from_str() {
        let bbox: BoundingBox = "6.031, 50.7492, 6.1649, 50.811".parse().unwrap();
        assert_eq!(bbox, BoundingBox::new(6.031, 50.7492, 6.1649, 50.811).unwrap());
        assert!("1,2,3".parse::<BoundingBox>().is_err());
        assert!("a,b,c,d".parse::<BoundingBox>().is_err());
    }

    #[test]
    fn world_covers_full_grid() {
        for z in 0..6 {
            let range = BoundingBox::world().tile_range(z);
            assert_eq!(range.count(), 1 << (2 * z));
        }
    }

    #[test]
    fn quadrant_covers_single_tile() {
        let north_east = BoundingBox::new(0.0, 0.0, 180.0, 90.0).unwrap();
        let tiles: Vec<_> = north_east.tile_range(1).iter().collect();
        assert_eq!(tiles, vec![TileCoord::new(1, 1, 0)]);

        let south_west = BoundingBox::new(-180.0, -90.0, 0.0, 0.0).unwrap();
        let tiles: Vec<_> = south_west.tile_range(1).iter().collect();
        assert_eq!(tiles, vec![TileCoord::new(1, 0, 1)]);
    }

    #[test]
    fn small_box_stays_local() {
        let aachen = BoundingBox::new(6.031, 50.7492, 6.1649, 50.811).unwrap();
        let range = aachen.tile_range(10);
        assert_eq!(range.count(), range.iter().count() as u64);
        assert!(range.count() <= 4);
        assert!(range.iter().all(|t| t.x == 529 || t.x == 530));
    }
}
