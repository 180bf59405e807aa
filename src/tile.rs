use std::{f64::consts::PI, fmt};

/// The highest zoom level whose grid still fits into `u32` coordinates.
pub const MAX_ZOOM: u8 = 30;

/// Latitude limit of the Web Mercator projection, in degrees.
pub const MAX_LAT: f64 = 85.051_128_779_806_59;

/// A tile in a quadtree pyramid with zoom level `z`, column `x` and row `y`.
///
/// Which way rows are counted depends on where the coordinate came from: the
/// tile server counts rows from the north (XYZ, as in the slippy map scheme at
/// https://wiki.openstreetmap.org/wiki/Slippy_map_tilenames), the MBTiles store
/// counts them from the south (TMS). [`TileCoord::flip_y`] converts between the
/// two. Store lookups and checkpoints always use the store's convention.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct TileCoord {
    pub z: u8,
    pub x: u32,
    pub y: u32,
}

impl TileCoord {
    pub fn new(z: u8, x: u32, y: u32) -> Self {
        debug_assert!(z <= MAX_ZOOM);
        debug_assert!(u64::from(x) < grid_size(z) && u64::from(y) < grid_size(z));

        Self { z, x, y }
    }

    /// Returns the XYZ tile containing the given point. Coordinates outside
    /// the projection are clamped onto the grid.
    pub fn from_lon_lat(lon_deg: f64, lat_deg: f64, zoom: u8) -> Self {
        let (x, y) = fractional_xy(lon_deg, lat_deg, zoom);
        let max = max_index(zoom);

        Self::new(zoom, clamp_index(x.floor(), max), clamp_index(y.floor(), max))
    }

    /// Mirrors the row index, switching between north-up and south-up
    /// row numbering.
    pub fn flip_y(&self) -> Self {
        Self {
            y: max_index(self.z) - self.y,
            ..*self
        }
    }
}

impl fmt::Display for TileCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.z, self.x, self.y)
    }
}

/// A fetched tile, keyed in store convention.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Tile {
    pub coord: TileCoord,
    pub data: Vec<u8>,
}

impl Tile {
    pub fn new(coord: TileCoord, data: Vec<u8>) -> Self {
        Self { coord, data }
    }
}

/// Number of rows (and columns) at the given zoom level.
pub fn grid_size(zoom: u8) -> u64 {
    1u64 << zoom
}

pub(crate) fn max_index(zoom: u8) -> u32 {
    (grid_size(zoom) - 1) as u32
}

/// Position of a point on the grid of `zoom`, in tile units.
pub(crate) fn fractional_xy(lon_deg: f64, lat_deg: f64, zoom: u8) -> (f64, f64) {
    // scale factor
    let n = grid_size(zoom) as f64;
    let lat_rad = lat_deg.clamp(-MAX_LAT, MAX_LAT).to_radians();

    let x = (lon_deg + 180_f64) / 360_f64 * n;
    let y = (1_f64 - lat_rad.tan().asinh() / PI) / 2_f64 * n;

    (x, y)
}

pub(crate) fn clamp_index(value: f64, max: u32) -> u32 {
    value.max(0_f64).min(f64::from(max)) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flip_is_an_involution() {
        for z in 0..=4u8 {
            let n = grid_size(z) as u32;
            for x in 0..n {
                for y in 0..n {
                    let c = TileCoord::new(z, x, y);
                    assert_eq!(c.flip_y().flip_y(), c);
                }
            }
        }
    }

    #[test]
    fn flip_mirrors_rows() {
        assert_eq!(TileCoord::new(0, 0, 0).flip_y(), TileCoord::new(0, 0, 0));
        assert_eq!(TileCoord::new(2, 1, 0).flip_y(), TileCoord::new(2, 1, 3));
        assert_eq!(TileCoord::new(3, 5, 2).flip_y(), TileCoord::new(3, 5, 5));
    }

    #[test]
    fn flipped_coords_are_distinct() {
        let c = TileCoord::new(1, 0, 0);
        assert_ne!(c, c.flip_y());
    }

    #[test]
    fn tile_index() {
        let tile = TileCoord::from_lon_lat(6.0402, 50.7929, 18);
        assert_eq!((tile.x, tile.y), (135470, 87999));
    }

    #[test]
    fn corners_are_clamped_onto_the_grid() {
        assert_eq!(TileCoord::from_lon_lat(180.0, -90.0, 3), TileCoord::new(3, 7, 7));
        assert_eq!(TileCoord::from_lon_lat(-180.0, 90.0, 3), TileCoord::new(3, 0, 0));
        assert_eq!(TileCoord::from_lon_lat(12.0, 40.0, 0), TileCoord::new(0, 0, 0));
    }
}
