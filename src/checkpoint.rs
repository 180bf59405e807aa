use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashSet,
    io::ErrorKind,
    path::{Path, PathBuf},
};
use tokio::{fs, io::AsyncWriteExt};

use crate::tile::TileCoord;

/// Tiles (in store row numbering) already handled on one zoom level of the
/// current run.
pub type CheckpointSet = HashSet<TileCoord>;

#[derive(Serialize, Deserialize)]
struct Record {
    zoom: u8,
    run: String,
    tiles: Vec<(u32, u32)>,
}

/// Persists one [`CheckpointSet`] per zoom level as a JSON file in a
/// directory, so an interrupted run can pick up where it stopped.
///
/// Every checkpoint is tagged with a run key identifying the output and the
/// tile source. A checkpoint is only used by a run with the same key.
#[derive(Clone, Debug)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, zoom: u8) -> PathBuf {
        self.dir.join(format!("zoom_{}.json", zoom))
    }

    /// Loads the checkpoint of `zoom` written by the run `run`.
    ///
    /// A missing or unreadable checkpoint, or one left by a different run,
    /// yields an empty set: the run then falls back to checking the store.
    pub async fn load(&self, zoom: u8, run: &str) -> CheckpointSet {
        let path = self.path(zoom);
        let raw = match fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return CheckpointSet::new(),
            Err(e) => {
                log::warn!("ignoring unreadable checkpoint {}: {}", path.display(), e);
                return CheckpointSet::new();
            }
        };

        match serde_json::from_slice::<Record>(&raw) {
            Ok(record) if record.zoom == zoom && record.run == run => record
                .tiles
                .into_iter()
                .map(|(x, y)| TileCoord { z: zoom, x, y })
                .collect(),
            Ok(record) if record.zoom != zoom => {
                log::warn!(
                    "ignoring checkpoint {}: recorded for zoom {}",
                    path.display(),
                    record.zoom
                );
                CheckpointSet::new()
            }
            Ok(record) => {
                log::warn!(
                    "ignoring checkpoint {}: recorded by another run ({})",
                    path.display(),
                    record.run
                );
                CheckpointSet::new()
            }
            Err(e) => {
                log::warn!("ignoring corrupt checkpoint {}: {}", path.display(), e);
                CheckpointSet::new()
            }
        }
    }

    /// Replaces the checkpoint of `zoom`. The data is synced to disk before
    /// this returns.
    pub async fn save(&self, zoom: u8, run: &str, set: &CheckpointSet) -> Result<()> {
        let mut tiles: Vec<_> = set
            .iter()
            .filter(|c| c.z == zoom)
            .map(|c| (c.x, c.y))
            .collect();
        tiles.sort_unstable();

        let raw = serde_json::to_vec(&Record {
            zoom,
            run: run.to_owned(),
            tiles,
        })?;
        let path = self.path(zoom);
        let temp_path = path.with_extension("json.tmp");

        fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("failed creating checkpoint directory {}", self.dir.display()))?;

        let mut file = fs::File::create(&temp_path)
            .await
            .with_context(|| format!("failed creating {}", temp_path.display()))?;
        file.write_all(&raw).await?;
        file.sync_all()
            .await
            .with_context(|| format!("failed syncing {}", temp_path.display()))?;
        drop(file);

        fs::rename(&temp_path, &path)
            .await
            .with_context(|| format!("failed replacing checkpoint {}", path.display()))?;
        sync_dir(&self.dir).await?;

        Ok(())
    }

    /// Removes the checkpoint of `zoom`, if any.
    pub async fn clear(&self, zoom: u8) -> Result<()> {
        let path = self.path(zoom);
        match fs::remove_file(&path).await {
            Err(e) if e.kind() != ErrorKind::NotFound => {
                Err(e).with_context(|| format!("failed removing checkpoint {}", path.display()))
            }
            _ => Ok(()),
        }
    }

    pub async fn clear_range(&self, min_zoom: u8, max_zoom: u8) -> Result<()> {
        for zoom in min_zoom..=max_zoom {
            self.clear(zoom).await?;
        }
        Ok(())
    }
}

/// Makes a rename inside `dir` durable.
#[cfg(unix)]
async fn sync_dir(dir: &Path) -> Result<()> {
    fs::File::open(dir)
        .await?
        .sync_all()
        .await
        .with_context(|| format!("failed syncing checkpoint directory {}", dir.display()))
}

#[cfg(not(unix))]
async fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const RUN: &str = "out.mbtiles https://tiles/{z}/{x}/{y}.png";

    fn set(zoom: u8, coords: &[(u32, u32)]) -> CheckpointSet {
        coords.iter().map(|&(x, y)| TileCoord::new(zoom, x, y)).collect()
    }

    #[tokio::test]
    async fn missing_checkpoint_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path());
        assert!(store.load(3, RUN).await.is_empty());
    }

    #[tokio::test]
    async fn save_then_load() -> Result<()> {
        let dir = TempDir::new()?;
        let store = CheckpointStore::new(dir.path().join("checkpoints"));
        let expected = set(2, &[(0, 0), (3, 1), (2, 2)]);

        store.save(2, RUN, &expected).await?;

        assert_eq!(store.load(2, RUN).await, expected);
        assert!(store.load(1, RUN).await.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn save_overwrites() -> Result<()> {
        let dir = TempDir::new()?;
        let store = CheckpointStore::new(dir.path());

        store.save(1, RUN, &set(1, &[(0, 0)])).await?;
        store.save(1, RUN, &set(1, &[(1, 1), (0, 1)])).await?;

        assert_eq!(store.load(1, RUN).await, set(1, &[(1, 1), (0, 1)]));
        assert!(!dir.path().join("zoom_1.json.tmp").exists());
        Ok(())
    }

    #[tokio::test]
    async fn corrupt_checkpoint_is_empty() -> Result<()> {
        let dir = TempDir::new()?;
        let store = CheckpointStore::new(dir.path());

        std::fs::write(dir.path().join("zoom_4.json"), b"{\"zoom\": 4, \"run\": \"\", \"tiles\": [[1,")?;
        assert!(store.load(4, RUN).await.is_empty());

        let other_zoom = format!(r#"{{"zoom": 6, "run": "{}", "tiles": [[1, 2]]}}"#, RUN);
        std::fs::write(dir.path().join("zoom_5.json"), other_zoom)?;
        assert!(store.load(5, RUN).await.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn checkpoint_of_another_run_is_ignored() -> Result<()> {
        let dir = TempDir::new()?;
        let store = CheckpointStore::new(dir.path());

        store.save(3, RUN, &set(3, &[(1, 2), (4, 4)])).await?;

        assert!(store.load(3, "other.mbtiles https://tiles/{z}/{x}/{y}.png").await.is_empty());
        assert_eq!(store.load(3, RUN).await.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn clear_removes_checkpoint() -> Result<()> {
        let dir = TempDir::new()?;
        let store = CheckpointStore::new(dir.path());

        store.save(0, RUN, &set(0, &[(0, 0)])).await?;
        store.save(1, RUN, &set(1, &[(0, 0)])).await?;
        store.clear_range(0, 1).await?;
        store.clear(7).await?;

        assert!(store.load(0, RUN).await.is_empty());
        assert!(store.load(1, RUN).await.is_empty());
        Ok(())
    }
}
