use anyhow::{bail, Context, Result};
use std::ops::AddAssign;

use crate::checkpoint::{CheckpointSet, CheckpointStore};
use crate::config::Config;
use crate::enumerate::TileSpace;
use crate::fetch::{progress_bar, FetchReport, Fetcher};
use crate::filter::missing_tiles;
use crate::store::TileStore;

/// Tile counts of a run or of a single zoom level.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct RunSummary {
    /// Tiles downloaded and written to the store.
    pub fetched: u64,
    /// Tiles the server had no data for.
    pub empty: u64,
    /// Tiles already in the store or the checkpoint.
    pub skipped: u64,
    /// Tiles that could not be downloaded.
    pub failed: u64,
}

impl RunSummary {
    fn attempted(&self) -> u64 {
        self.fetched + self.empty + self.failed
    }
}

impl AddAssign for RunSummary {
    fn add_assign(&mut self, other: Self) {
        self.fetched += other.fetched;
        self.empty += other.empty;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

/// Download the tiles specified in `cfg` into `store`.
///
/// Works through the zoom levels coarse to fine, `cfg.batch_size` tiles at a
/// time. With a checkpoint store every batch is recorded once it is written,
/// so a restarted run only repeats the batch that was interrupted. Checkpoints
/// left by a run with another store, URL or bounding box are not used. The
/// checkpoints are removed when the run completes.
///
/// Errors from the store abort the run. Tiles that fail to download are
/// logged and counted; the run is only aborted if more than
/// `cfg.max_failure_ratio` of a zoom level fails.
///
/// # Example
/// ```rust,no_run
/// use mbtiles_downloader::{download, CheckpointStore, Config, Fetcher, MbTiles, Metadata};
/// # use std::path::Path;
///
/// # #[tokio::main]
/// # async fn main() -> anyhow::Result<()> {
/// let config = Config {
///     max_zoom: 4,
///     ..Config::new("https://s3.amazonaws.com/elevation-tiles-prod/terrarium/{z}/{x}/{y}.png")
/// };
/// let store = MbTiles::create(Path::new("elevation.mbtiles"), &Metadata::default())?;
/// let checkpoints = CheckpointStore::new("checkpoints");
///
/// download(&config, &Fetcher::http(&config)?, &store, Some(&checkpoints)).await?;
/// # Ok(())
/// # }
/// ```
pub async fn download(
    cfg: &Config,
    fetcher: &Fetcher,
    store: &dyn TileStore,
    checkpoints: Option<&CheckpointStore>,
) -> Result<RunSummary> {
    cfg.validate()?;
    let space = cfg.tile_space();

    if let (true, Some(checkpoints)) = (cfg.reset, checkpoints) {
        log::info!("discarding checkpoints in {}", checkpoints.dir().display());
        checkpoints.clear_range(cfg.min_zoom, cfg.max_zoom).await?;
    }

    let run = run_key(cfg, store);
    let mut summary = RunSummary::default();

    for zoom in space.zoom_levels() {
        let level = download_level(cfg, fetcher, store, checkpoints, &run, &space, zoom).await?;

        log::info!(
            "zoom {}: {} fetched, {} empty, {} skipped, {} failed",
            zoom,
            level.fetched,
            level.empty,
            level.skipped,
            level.failed
        );

        let attempted = level.attempted();
        if attempted > 0 && level.failed as f64 / attempted as f64 > cfg.max_failure_ratio {
            bail!(
                "{} of {} tiles on zoom {} failed to download",
                level.failed,
                attempted,
                zoom
            );
        }

        summary += level;
    }

    if let Some(checkpoints) = checkpoints {
        checkpoints.clear_range(cfg.min_zoom, cfg.max_zoom).await?;
    }

    Ok(summary)
}

/// Identifies the output and the tile source of a run in its checkpoints.
fn run_key(cfg: &Config, store: &dyn TileStore) -> String {
    let bounds = cfg
        .bounds
        .map(|b| b.to_string())
        .unwrap_or_else(|| "world".to_owned());

    format!("{} {} {}", store.location(), cfg.url, bounds)
}

async fn download_level(
    cfg: &Config,
    fetcher: &Fetcher,
    store: &dyn TileStore,
    checkpoints: Option<&CheckpointStore>,
    run: &str,
    space: &TileSpace,
    zoom: u8,
) -> Result<RunSummary> {
    let range = space.level(zoom);
    let mut checkpoint = match checkpoints {
        Some(checkpoints) => checkpoints.load(zoom, run).await,
        None => CheckpointSet::new(),
    };
    if !checkpoint.is_empty() {
        log::info!("resuming zoom {} with {} tiles done", zoom, checkpoint.len());
    }

    let pb = progress_bar(range.count(), cfg.progress);
    pb.set_message(format!("zoom {}", zoom));

    let mut summary = RunSummary::default();
    let mut candidates = range.iter();

    loop {
        let batch: Vec<_> = candidates.by_ref().take(cfg.batch_size).collect();
        if batch.is_empty() {
            break;
        }

        let pending = missing_tiles(store, &checkpoint, cfg.skip_existing, batch.iter().copied())?;
        let skipped = (batch.len() - pending.len()) as u64;
        summary.skipped += skipped;
        pb.inc(skipped);

        if pending.is_empty() {
            continue;
        }

        let report = fetcher.fetch_batch(&pending, &pb).await;
        for (coord, error) in &report.failed {
            log::warn!("giving up on tile {}: {}", coord.flip_y(), error);
        }

        commit_batch(store, checkpoints, run, zoom, &mut checkpoint, &report).await?;

        summary.fetched += report.tiles.len() as u64;
        summary.empty += report.empty.len() as u64;
        summary.failed += report.failed.len() as u64;
    }

    pb.finish_and_clear();

    Ok(summary)
}

/// Writes the tiles of a batch and then records the batch in the checkpoint.
/// A batch is only done once both are on disk.
async fn commit_batch(
    store: &dyn TileStore,
    checkpoints: Option<&CheckpointStore>,
    run: &str,
    zoom: u8,
    checkpoint: &mut CheckpointSet,
    report: &FetchReport,
) -> Result<()> {
    store
        .write_batch(&report.tiles)
        .with_context(|| format!("failed writing {} tiles of zoom {}", report.tiles.len(), zoom))?;

    if let Some(checkpoints) = checkpoints {
        checkpoint.extend(report.tiles.iter().map(|tile| tile.coord));
        checkpoint.extend(report.empty.iter().copied());
        checkpoints
            .save(zoom, run, checkpoint)
            .await
            .with_context(|| format!("failed saving checkpoint of zoom {}", zoom))?;
    }

    Ok(())
}
