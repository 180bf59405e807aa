use anyhow::Result;

use crate::checkpoint::CheckpointSet;
use crate::store::TileStore;
use crate::tile::TileCoord;

/// Keeps the candidates (XYZ row numbering) that still need to be fetched:
/// those neither in the checkpoint nor, with `skip_existing`, in the store.
///
/// The checkpoint is looked at first since it is cheap.
pub fn missing_tiles(
    store: &dyn TileStore,
    checkpoint: &CheckpointSet,
    skip_existing: bool,
    candidates: impl IntoIterator<Item = TileCoord>,
) -> Result<Vec<TileCoord>> {
    let mut missing = Vec::new();

    for candidate in candidates {
        let stored = candidate.flip_y();
        if checkpoint.contains(&stored) {
            continue;
        }
        if skip_existing && store.exists(&stored)? {
            continue;
        }
        missing.push(candidate);
    }

    Ok(missing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tile::Tile;
    use std::collections::HashSet;

    /// Reports every tile with an even column as present.
    struct EvenColumns;

    impl TileStore for EvenColumns {
        fn exists(&self, coord: &TileCoord) -> Result<bool> {
            Ok(coord.x % 2 == 0)
        }
        fn read(&self, _: &TileCoord) -> Result<Option<Vec<u8>>> {
            unimplemented!()
        }
        fn write_one(&self, _: &Tile) -> Result<()> {
            unimplemented!()
        }
        fn write_batch(&self, _: &[Tile]) -> Result<()> {
            unimplemented!()
        }
        fn list(&self, _: u64, _: usize) -> Result<Vec<TileCoord>> {
            unimplemented!()
        }
        fn count(&self) -> Result<u64> {
            unimplemented!()
        }
        fn location(&self) -> String {
            "even columns".to_owned()
        }
    }

    fn grid(z: u8) -> Vec<TileCoord> {
        let n = 1u32 << z;
        (0..n).flat_map(|x| (0..n).map(move |y| TileCoord::new(z, x, y))).collect()
    }

    #[test]
    fn never_emits_stored_tiles() -> Result<()> {
        let missing = missing_tiles(&EvenColumns, &HashSet::new(), true, grid(3))?;

        assert_eq!(missing.len(), 32);
        assert!(missing.iter().all(|c| !EvenColumns.exists(&c.flip_y()).unwrap()));
        Ok(())
    }

    #[test]
    fn checkpoint_uses_store_rows() -> Result<()> {
        // (2, 1, 0) in XYZ is (2, 1, 3) in the store
        let checkpoint: CheckpointSet = [TileCoord::new(2, 1, 3)].into_iter().collect();
        let missing = missing_tiles(&EvenColumns, &checkpoint, false, grid(2))?;

        assert_eq!(missing.len(), 15);
        assert!(!missing.contains(&TileCoord::new(2, 1, 0)));
        assert!(missing.contains(&TileCoord::new(2, 1, 3)));
        Ok(())
    }

    #[test]
    fn store_is_ignored_without_skip_existing() -> Result<()> {
        let missing = missing_tiles(&EvenColumns, &HashSet::new(), false, grid(1))?;
        assert_eq!(missing, grid(1));
        Ok(())
    }
}
