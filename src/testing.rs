//! Mocks shared by the unit tests.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
    time::Duration,
};

use crate::config::Config;
use crate::fetch::Transport;
use crate::store::{MbTiles, TileStore};
use crate::tile::{Tile, TileCoord};

pub const MOCK_URL: &str = "mock://{z}/{x}/{y}";

pub fn mock_config() -> Config {
    Config {
        concurrency: 4,
        request_retries: 0,
        backoff: Duration::ZERO,
        timeout: Duration::from_secs(5),
        ..Config::new(MOCK_URL)
    }
}

type LengthFn = Box<dyn Fn(TileCoord) -> Option<u64> + Send + Sync>;

/// Serves tiles whose content length is decided by a closure over the XYZ
/// coordinate. Bodies consist of that many zero bytes.
pub struct MockTransport {
    length: LengthFn,
    delay: Duration,
    failures: Mutex<HashMap<TileCoord, usize>>,
    probes: AtomicUsize,
    gets: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockTransport {
    pub fn new(length: impl Fn(TileCoord) -> Option<u64> + Send + Sync + 'static) -> Self {
        Self {
            length: Box::new(length),
            delay: Duration::ZERO,
            failures: Mutex::new(HashMap::new()),
            probes: AtomicUsize::new(0),
            gets: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Lets the next `times` requests for `tile` fail.
    pub fn failing(self, tile: TileCoord, times: usize) -> Self {
        self.failures.lock().unwrap().insert(tile, times);
        self
    }

    pub fn probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn request(&self, url: &str) -> Result<Option<u64>> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if self.delay > Duration::ZERO {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let tile = parse_url(url)?;
        if let Some(remaining) = self.failures.lock().unwrap().get_mut(&tile) {
            if *remaining > 0 {
                *remaining -= 1;
                bail!("connection reset fetching {}", url);
            }
        }

        Ok((self.length)(tile))
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn content_length(&self, url: &str) -> Result<Option<u64>> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        self.request(url).await
    }

    async fn get(&self, url: &str) -> Result<Vec<u8>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        let length = self.request(url).await?.unwrap_or(0);
        Ok(vec![0; length as usize])
    }
}

fn parse_url(url: &str) -> Result<TileCoord> {
    let parts: Vec<&str> = url.trim_start_matches("mock://").split('/').collect();
    match parts.as_slice() {
        [z, x, y] => Ok(TileCoord::new(z.parse()?, x.parse()?, y.parse()?)),
        _ => bail!("unexpected url {}", url),
    }
}

/// Wraps a store and fails every batch write after the first `allowed`.
pub struct FlakyStore<'a> {
    pub inner: &'a MbTiles,
    pub allowed: usize,
    pub writes: AtomicUsize,
}

impl<'a> FlakyStore<'a> {
    pub fn new(inner: &'a MbTiles, allowed: usize) -> Self {
        Self {
            inner,
            allowed,
            writes: AtomicUsize::new(0),
        }
    }
}

impl TileStore for FlakyStore<'_> {
    fn exists(&self, coord: &TileCoord) -> Result<bool> {
        self.inner.exists(coord)
    }

    fn read(&self, coord: &TileCoord) -> Result<Option<Vec<u8>>> {
        self.inner.read(coord)
    }

    fn write_one(&self, tile: &Tile) -> Result<()> {
        self.inner.write_one(tile)
    }

    fn write_batch(&self, tiles: &[Tile]) -> Result<()> {
        if self.writes.fetch_add(1, Ordering::SeqCst) >= self.allowed {
            bail!("disk full");
        }
        self.inner.write_batch(tiles)
    }

    fn list(&self, offset: u64, limit: usize) -> Result<Vec<TileCoord>> {
        self.inner.list(offset, limit)
    }

    fn count(&self) -> Result<u64> {
        self.inner.count()
    }

    fn location(&self) -> String {
        self.inner.location()
    }
}
