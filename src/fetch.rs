use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use clap::crate_version;
use futures::{prelude::*, stream};
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::{
    header::{HeaderMap, HeaderValue, CONTENT_LENGTH, RETRY_AFTER, USER_AGENT},
    RequestBuilder, Response, StatusCode,
};
use std::{sync::Arc, time::Duration};

use crate::config::Config;
use crate::tile::{Tile, TileCoord};
use crate::url::UrlFormat;

/// How long to wait on `429 Too Many Requests` without a `Retry-After`.
const RATE_LIMIT_DELAY: Duration = Duration::from_secs(10);
const MAX_RATE_LIMIT_WAITS: u8 = 5;

/// The network side of the fetcher.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends a `HEAD` request and returns the reported `Content-Length`, if
    /// there is a usable one.
    async fn content_length(&self, url: &str) -> Result<Option<u64>>;

    /// Downloads the body at `url`.
    async fn get(&self, url: &str) -> Result<Vec<u8>>;
}

/// [`Transport`] over a pooled `reqwest` client.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Pass the zero duration to disable the client-side timeout.
    pub fn new(timeout: Duration) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if timeout > Duration::ZERO {
            builder = builder.timeout(timeout);
        }

        let mut headers = HeaderMap::new();
        headers.append(
            USER_AGENT,
            HeaderValue::from_str(&format!("mbtiles-downloader_rs_{}", crate_version!()))?,
        );

        let client = builder
            .default_headers(headers)
            .build()
            .context("failed creating HTTP client")?;

        Ok(Self { client })
    }

    /// Sends the request, waiting out rate limiting, and fails on any
    /// non-success status.
    async fn send(&self, request: impl Fn() -> RequestBuilder) -> Result<Response> {
        let mut waits = 0;

        loop {
            let response = request().send().await?;

            if response.status() == StatusCode::TOO_MANY_REQUESTS && waits < MAX_RATE_LIMIT_WAITS {
                let retry_after = response
                    .headers()
                    .get(RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|val| val.parse::<u64>().ok())
                    .map(Duration::from_secs)
                    .unwrap_or(RATE_LIMIT_DELAY);

                log::debug!("rate limited by {}, waiting {:?}", response.url(), retry_after);
                tokio::time::sleep(retry_after).await;
                waits += 1;
                continue;
            }

            return Ok(response.error_for_status()?);
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn content_length(&self, url: &str) -> Result<Option<u64>> {
        let response = self.send(|| self.client.head(url)).await?;

        // the header is read directly, `Response::content_length` reports
        // the (empty) body of a HEAD response
        Ok(response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok()))
    }

    async fn get(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.send(|| self.client.get(url)).await?;
        Ok(response.bytes().await?.to_vec())
    }
}

/// Terminal state of a single tile. Coordinates use store row numbering.
#[derive(Debug)]
pub enum Outcome {
    Fetched(Tile),
    Empty(TileCoord),
    Failed(TileCoord, anyhow::Error),
}

/// Result of fetching one batch.
#[derive(Debug, Default)]
pub struct FetchReport {
    pub tiles: Vec<Tile>,
    pub empty: Vec<TileCoord>,
    pub failed: Vec<(TileCoord, String)>,
}

impl FromIterator<Outcome> for FetchReport {
    fn from_iter<I: IntoIterator<Item = Outcome>>(outcomes: I) -> Self {
        let mut report = FetchReport::default();

        for outcome in outcomes {
            match outcome {
                Outcome::Fetched(tile) => report.tiles.push(tile),
                Outcome::Empty(coord) => report.empty.push(coord),
                Outcome::Failed(coord, e) => report.failed.push((coord, format!("{:#}", e))),
            }
        }

        report
    }
}

/// Downloads batches of tiles with a fixed ceiling on parallel requests.
pub struct Fetcher {
    transport: Arc<dyn Transport>,
    url: UrlFormat,
    concurrency: usize,
    retries: u8,
    backoff: Duration,
    timeout: Duration,
    empty_tile_length: u64,
}

impl Fetcher {
    pub fn new(cfg: &Config, transport: Arc<dyn Transport>) -> Result<Self> {
        Ok(Self {
            transport,
            url: UrlFormat::new(cfg.url.as_str())?,
            concurrency: cfg.concurrency.max(1),
            retries: cfg.request_retries,
            backoff: cfg.backoff,
            timeout: cfg.timeout,
            empty_tile_length: cfg.empty_tile_length,
        })
    }

    /// A fetcher talking HTTP.
    pub fn http(cfg: &Config) -> Result<Self> {
        Self::new(cfg, Arc::new(HttpTransport::new(cfg.timeout)?))
    }

    /// Fetches all tiles of the batch (XYZ row numbering) and returns the
    /// non-empty ones in store row numbering.
    ///
    /// Returns once every tile either arrived, turned out empty or ran out
    /// of retries. Failures don't affect the other tiles.
    pub async fn fetch_batch(&self, batch: &[TileCoord], progress: &ProgressBar) -> FetchReport {
        stream::iter(batch.iter().copied())
            .map(|tile| async move {
                let outcome = self.fetch_tile(tile).await;
                progress.inc(1);
                outcome
            })
            .buffer_unordered(self.concurrency)
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .collect()
    }

    pub async fn fetch_tile(&self, tile: TileCoord) -> Outcome {
        let stored = tile.flip_y();

        match self.try_fetch(&tile).await {
            Ok(Some(data)) => Outcome::Fetched(Tile::new(stored, data)),
            Ok(None) => Outcome::Empty(stored),
            Err(e) => Outcome::Failed(stored, e),
        }
    }

    async fn try_fetch(&self, tile: &TileCoord) -> Result<Option<Vec<u8>>> {
        let url = self.url.tile_url(tile)?;

        let length = self
            .with_retries(|| self.transport.content_length(&url))
            .await
            .with_context(|| format!("failed probing tile {}", tile))?;

        match length {
            Some(length) if length == self.empty_tile_length => {
                log::info!("empty tile: {}", tile);
                return Ok(None);
            }
            None => {
                log::info!("no usable content length for tile {}, treating it as empty", tile);
                return Ok(None);
            }
            Some(_) => {}
        }

        log::debug!("downloading {}", url);
        let data = self
            .with_retries(|| self.transport.get(&url))
            .await
            .with_context(|| format!("failed fetching tile {}", tile))?;

        if data.is_empty() {
            log::info!("empty body for tile {}", tile);
            return Ok(None);
        }

        Ok(Some(data))
    }

    async fn with_retries<T, F, Fut>(&self, request: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;

        loop {
            match self.with_timeout(request()).await {
                Ok(value) => return Ok(value),
                Err(e) if attempt >= self.retries => return Err(e),
                Err(e) => {
                    attempt += 1;
                    log::debug!("attempt {} failed, retrying: {:#}", attempt, e);
                    tokio::time::sleep(self.backoff).await;
                }
            }
        }
    }

    async fn with_timeout<T>(&self, request: impl Future<Output = Result<T>>) -> Result<T> {
        if self.timeout == Duration::ZERO {
            return request.await;
        }

        tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| anyhow!("timed out after {:?}", self.timeout))?
    }
}

/// A progress bar drawn on stderr, or a hidden one.
pub fn progress_bar(len: u64, visible: bool) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }

    let pb = ProgressBar::new(len);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:60.cyan/blue} {pos:>7}/{len:7} ETA: {eta} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("##-"),
    );
    pb
}
