use anyhow::{Context, Result};

use crate::fetch::progress_bar;
use crate::store::TileStore;
use crate::tile::Tile;

/// Default number of tiles copied per transaction.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Tile counts of a merge.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct MergeReport {
    /// Tiles looked at in the source.
    pub scanned: u64,
    /// Tiles written to the destination.
    pub copied: u64,
}

/// Copies every tile of `source` missing from `destination`, `page_size`
/// tiles at a time. Running it again copies nothing.
pub fn merge(
    source: &dyn TileStore,
    destination: &dyn TileStore,
    page_size: usize,
    progress: bool,
) -> Result<MergeReport> {
    let page_size = page_size.max(1);
    let pb = progress_bar(source.count()?, progress);
    let mut report = MergeReport::default();
    let mut offset = 0u64;

    loop {
        let page = source
            .list(offset, page_size)
            .with_context(|| format!("failed listing source tiles at offset {}", offset))?;
        offset += page.len() as u64;
        report.scanned += page.len() as u64;

        let mut tiles = Vec::new();
        for coord in &page {
            if destination.exists(coord)? {
                continue;
            }
            if let Some(data) = source.read(coord)? {
                tiles.push(Tile::new(*coord, data));
            }
        }

        log::debug!("offset {}: {} of {} tiles to copy", offset, tiles.len(), page.len());
        if !tiles.is_empty() {
            destination.write_batch(&tiles)?;
            report.copied += tiles.len() as u64;
        }
        pb.inc(page.len() as u64);

        if page.len() < page_size {
            break;
        }
    }

    pb.finish_and_clear();
    log::info!("copied {} of {} tiles", report.copied, report.scanned);

    Ok(report)
}
