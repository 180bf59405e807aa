mod args;
mod validators;

use anyhow::Result;
use args::{Args, DownloadArgs, MergeArgs};
use mbtiles_downloader::{download, merge, CheckpointStore, Config, Fetcher, MbTiles, Metadata};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match Args::parse() {
        Args::Download(args) => run_download(args).await,
        Args::Merge(args) => run_merge(args),
    }
}

async fn run_download(args: DownloadArgs) -> Result<()> {
    let config = Config::from(&args);
    config.validate()?;

    if args.dry_run {
        let tile_count = config.tile_space().count();

        eprintln!(
            "would download {} tiles (approx {}, assuming 10 kb per tile)",
            tile_count,
            pretty_bytes::converter::convert((tile_count as f64) * 10_000f64)
        );

        return Ok(());
    }

    let store = MbTiles::create(&args.output, &Metadata::from(&args))?;
    let checkpoints = args.checkpoints.as_ref().map(CheckpointStore::new);
    let fetcher = Fetcher::http(&config)?;

    let summary = download(&config, &fetcher, &store, checkpoints.as_ref()).await?;
    log::info!(
        "done: {} tiles fetched, {} empty, {} already present, {} failed",
        summary.fetched,
        summary.empty,
        summary.skipped,
        summary.failed
    );

    Ok(())
}

fn run_merge(args: MergeArgs) -> Result<()> {
    let source = MbTiles::open(&args.source)?;
    let target = MbTiles::open(&args.target)?;

    merge(&source, &target, args.page_size, args.progress)?;

    Ok(())
}
