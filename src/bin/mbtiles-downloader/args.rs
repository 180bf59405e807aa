use clap::{command, Arg, ArgAction, ArgMatches, Command};
use std::{path::PathBuf, time::Duration};

use crate::validators::*;
use mbtiles_downloader::{BoundingBox, Config, Metadata};

const DOWNLOAD_CMD: &str = "download";
const MERGE_CMD: &str = "merge";

const URL_ARG: &str = "url";
const ZOOM_ARG: &str = "zoom";
const OUTPUT_ARG: &str = "output";
const CHECKPOINTS_ARG: &str = "checkpoints";
const BOUNDS_ARG: &str = "bounds";
const MIN_ZOOM_ARG: &str = "min_zoom";
const MAX_ZOOM_ARG: &str = "max_zoom";
const TIMEOUT_ARG: &str = "timeout";
const DRY_RUN_ARG: &str = "dry_run";
const REQUEST_RETRIES_ARG: &str = "num_retries";
const BACKOFF_ARG: &str = "backoff";
const PARALLEL_FETCHES_ARG: &str = "num_parallel";
const BATCH_SIZE_ARG: &str = "batch_size";
const FETCH_EXISTING_ARG: &str = "should_fetch_existing";
const EMPTY_LENGTH_ARG: &str = "empty_length";
const MAX_FAILURE_RATIO_ARG: &str = "max_failure_ratio";
const RESET_ARG: &str = "reset";
const NO_PROGRESS_ARG: &str = "no_progress";
const NAME_ARG: &str = "name";
const DESCRIPTION_ARG: &str = "description";
const ATTRIBUTION_ARG: &str = "attribution";
const FORMAT_ARG: &str = "format";
const LAYER_TYPE_ARG: &str = "layer_type";
const SOURCE_ARG: &str = "source";
const TARGET_ARG: &str = "target";
const PAGE_SIZE_ARG: &str = "page_size";

pub enum Args {
    Download(DownloadArgs),
    Merge(MergeArgs),
}

pub struct DownloadArgs {
    pub url: String,
    pub bounds: Option<BoundingBox>,
    pub parallel_fetches: usize,
    pub batch_size: usize,
    pub retries: u8,
    pub backoff: Duration,
    pub timeout: Duration,
    pub min_zoom: u8,
    pub max_zoom: u8,
    pub output: PathBuf,
    pub checkpoints: Option<PathBuf>,
    pub fetch_existing: bool,
    pub empty_length: u64,
    pub max_failure_ratio: f64,
    pub reset: bool,
    pub progress: bool,
    pub dry_run: bool,
    pub name: String,
    pub description: String,
    pub attribution: String,
    pub format: String,
    pub layer_type: String,
}

pub struct MergeArgs {
    pub source: PathBuf,
    pub target: PathBuf,
    pub page_size: usize,
    pub progress: bool,
}

impl From<&DownloadArgs> for Config {
    fn from(args: &DownloadArgs) -> Self {
        Self {
            url: args.url.clone(),
            min_zoom: args.min_zoom,
            max_zoom: args.max_zoom,
            bounds: args.bounds,
            concurrency: args.parallel_fetches,
            batch_size: args.batch_size,
            skip_existing: !args.fetch_existing,
            empty_tile_length: args.empty_length,
            request_retries: args.retries,
            backoff: args.backoff,
            timeout: args.timeout,
            max_failure_ratio: args.max_failure_ratio,
            reset: args.reset,
            progress: args.progress,
        }
    }
}

impl From<&DownloadArgs> for Metadata {
    fn from(args: &DownloadArgs) -> Self {
        Self {
            name: args.name.clone(),
            description: args.description.clone(),
            attribution: args.attribution.clone(),
            format: args.format.clone(),
            layer_type: args.layer_type.clone(),
            bounds: args.bounds,
            min_zoom: args.min_zoom,
            max_zoom: args.max_zoom,
            ..Metadata::default()
        }
    }
}

impl Args {
    pub fn parse() -> Self {
        let matches = get_matches();

        match matches.subcommand() {
            Some((MERGE_CMD, m)) => Args::Merge(MergeArgs::from_matches(m)),
            Some((_, m)) => Args::Download(DownloadArgs::from_matches(m)),
            None => unreachable!("subcommand is required"),
        }
    }
}

impl DownloadArgs {
    fn from_matches(matches: &ArgMatches) -> Self {
        let (min_zoom, max_zoom) = match matches.get_one::<u8>(ZOOM_ARG) {
            // if `zoom` is set, use it for both min/max
            Some(&zoom) => (zoom, zoom),
            // otherwise, parse min/max separately
            None => (
                *matches.get_one::<u8>(MIN_ZOOM_ARG).unwrap(),
                *matches.get_one::<u8>(MAX_ZOOM_ARG).unwrap(),
            ),
        };

        Self {
            url: string(matches, URL_ARG),
            bounds: matches.get_one::<BoundingBox>(BOUNDS_ARG).copied(),
            parallel_fetches: *matches.get_one::<usize>(PARALLEL_FETCHES_ARG).unwrap(),
            batch_size: *matches.get_one::<usize>(BATCH_SIZE_ARG).unwrap(),
            retries: u8::try_from(*matches.get_one::<usize>(REQUEST_RETRIES_ARG).unwrap())
                .unwrap_or(u8::MAX),
            backoff: seconds(matches, BACKOFF_ARG),
            timeout: seconds(matches, TIMEOUT_ARG),
            min_zoom,
            max_zoom,
            output: path(matches, OUTPUT_ARG),
            checkpoints: matches.get_one::<String>(CHECKPOINTS_ARG).map(PathBuf::from),
            fetch_existing: matches.get_flag(FETCH_EXISTING_ARG),
            empty_length: *matches.get_one::<usize>(EMPTY_LENGTH_ARG).unwrap() as u64,
            max_failure_ratio: *matches.get_one::<f64>(MAX_FAILURE_RATIO_ARG).unwrap(),
            reset: matches.get_flag(RESET_ARG),
            progress: !matches.get_flag(NO_PROGRESS_ARG),
            dry_run: matches.get_flag(DRY_RUN_ARG),
            name: string(matches, NAME_ARG),
            description: string(matches, DESCRIPTION_ARG),
            attribution: string(matches, ATTRIBUTION_ARG),
            format: string(matches, FORMAT_ARG),
            layer_type: string(matches, LAYER_TYPE_ARG),
        }
    }
}

impl MergeArgs {
    fn from_matches(matches: &ArgMatches) -> Self {
        Self {
            source: path(matches, SOURCE_ARG),
            target: path(matches, TARGET_ARG),
            page_size: *matches.get_one::<usize>(PAGE_SIZE_ARG).unwrap(),
            progress: !matches.get_flag(NO_PROGRESS_ARG),
        }
    }
}

fn string(matches: &ArgMatches, id: &str) -> String {
    matches.get_one::<String>(id).cloned().unwrap_or_default()
}

fn path(matches: &ArgMatches, id: &str) -> PathBuf {
    PathBuf::from(string(matches, id))
}

fn seconds(matches: &ArgMatches, id: &str) -> Duration {
    Duration::from_secs(*matches.get_one::<usize>(id).unwrap() as u64)
}

fn no_progress_arg() -> Arg {
    Arg::new(NO_PROGRESS_ARG)
        .help("Don't draw progress bars")
        .action(ArgAction::SetTrue)
        .long("no-progress")
}

fn get_matches() -> ArgMatches {
    command!()
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(download_command())
        .subcommand(merge_command())
        .get_matches()
}

fn download_command() -> Command {
    Command::new(DOWNLOAD_CMD)
        .about("Download tiles into an MBTiles file")
        .arg(
            Arg::new(URL_ARG)
                .help("The URL with format specifiers `{x}`, `{y}`, `{z}` to fetch the tiles from. Also supports the format specifier `{s}` which is replaced with `a`, `b` or `c` in turn to spread the load between different servers.")
                .required(true)
                .short('u')
                .long("url"),
        )
        .arg(
            Arg::new(OUTPUT_ARG)
                .help("The MBTiles file to write the tiles to. Created if it doesn't exist.")
                .default_value("output.mbtiles")
                .short('o')
                .long("output"),
        )
        .arg(
            Arg::new(CHECKPOINTS_ARG)
                .help("Folder to keep progress checkpoints in, enabling an interrupted run to resume")
                .long("checkpoints"),
        )
        .arg(
            Arg::new(BOUNDS_ARG)
                .help("Only fetch tiles within `west,south,east,north` (in degrees). Fetches the whole world if omitted.")
                .value_parser(is_bounding_box)
                .allow_hyphen_values(true)
                .short('b')
                .long("bounds"),
        )
        .arg(
            Arg::new(PARALLEL_FETCHES_ARG)
                .help("The amount of tiles fetched in parallel.")
                .value_parser(is_numeric_min(1))
                .default_value("5")
                .short('r')
                .long("rate"),
        )
        .arg(
            Arg::new(BATCH_SIZE_ARG)
                .help("The amount of tiles written (and checkpointed) at once.")
                .value_parser(is_numeric_min(1))
                .default_value("1000")
                .long("batch-size"),
        )
        .arg(
            Arg::new(REQUEST_RETRIES_ARG)
                .help("The amount of times to retry a failed HTTP request.")
                .value_parser(is_numeric_min(0))
                .default_value("3")
                .long("retries"),
        )
        .arg(
            Arg::new(BACKOFF_ARG)
                .help("Seconds to wait before retrying a failed HTTP request.")
                .value_parser(is_numeric_min(0))
                .default_value("10")
                .long("backoff"),
        )
        .arg(
            Arg::new(TIMEOUT_ARG)
                .help("The timeout (in seconds) for a single HTTP request. Pass 0 for no timeout.")
                .value_parser(is_numeric_min(0))
                .default_value("30")
                .short('t')
                .long("timeout"),
        )
        .arg(
            Arg::new(MIN_ZOOM_ARG)
                .help("The minimum zoom level to fetch")
                .value_parser(is_zoom)
                .default_value("0")
                .long("min-zoom"),
        )
        .arg(
            Arg::new(MAX_ZOOM_ARG)
                .help("The maximum zoom level to fetch")
                .value_parser(is_zoom)
                .default_value("4")
                .long("max-zoom"),
        )
        .arg(
            Arg::new(ZOOM_ARG)
                .help("Only fetch a single zoom level (implies min=x/max=x)")
                .value_parser(is_zoom)
                .short('z')
                .long("zoom"),
        )
        .arg(
            Arg::new(EMPTY_LENGTH_ARG)
                .help("Content length (in bytes) of the placeholder the server sends for tiles without data")
                .value_parser(is_numeric_min(1))
                .default_value("757")
                .long("empty-length"),
        )
        .arg(
            Arg::new(MAX_FAILURE_RATIO_ARG)
                .help("Abort once more than this share of a zoom level's tiles failed to download")
                .value_parser(is_ratio)
                .default_value("0.1")
                .long("max-failure-ratio"),
        )
        .arg(
            Arg::new(FETCH_EXISTING_ARG)
                .help("Fetch tiles that are already in the output file (this usually isn't required)")
                .action(ArgAction::SetTrue)
                .long("fetch-existing"),
        )
        .arg(
            Arg::new(RESET_ARG)
                .help("Discard checkpoints of a previous run before starting")
                .action(ArgAction::SetTrue)
                .long("reset"),
        )
        .arg(
            Arg::new(DRY_RUN_ARG)
                .help("Don't actually fetch anything, just determine how many tiles would be fetched.")
                .action(ArgAction::SetTrue)
                .long("dry-run"),
        )
        .arg(no_progress_arg())
        .arg(
            Arg::new(NAME_ARG)
                .help("Name stored in the metadata of a new output file")
                .default_value("tiles")
                .long("name"),
        )
        .arg(
            Arg::new(DESCRIPTION_ARG)
                .help("Description stored in the metadata of a new output file")
                .default_value("")
                .long("description"),
        )
        .arg(
            Arg::new(ATTRIBUTION_ARG)
                .help("Attribution stored in the metadata of a new output file")
                .default_value("")
                .long("attribution"),
        )
        .arg(
            Arg::new(FORMAT_ARG)
                .help("Tile format stored in the metadata of a new output file")
                .default_value("png")
                .long("format"),
        )
        .arg(
            Arg::new(LAYER_TYPE_ARG)
                .help("Layer type stored in the metadata of a new output file")
                .value_parser(["overlay", "baselayer"])
                .default_value("overlay")
                .long("layer-type"),
        )
}

fn merge_command() -> Command {
    Command::new(MERGE_CMD)
        .about("Copy the tiles of one MBTiles file missing from another")
        .arg(
            Arg::new(SOURCE_ARG)
                .help("The MBTiles file to copy from")
                .required(true)
                .short('s')
                .long("source"),
        )
        .arg(
            Arg::new(TARGET_ARG)
                .help("The MBTiles file to copy into")
                .required(true)
                .short('t')
                .long("target"),
        )
        .arg(
            Arg::new(PAGE_SIZE_ARG)
                .help("The amount of tiles copied at once.")
                .value_parser(is_numeric_min(1))
                .default_value("1000")
                .long("page-size"),
        )
        .arg(no_progress_arg())
}
