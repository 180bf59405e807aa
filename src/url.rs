use anyhow::{ensure, Context, Result};
use maplit::hashmap;
use std::{
    fmt,
    sync::atomic::{AtomicUsize, Ordering},
};
use strfmt::strfmt;

use crate::tile::TileCoord;

const SUBDOMAINS: &[&str] = &["a", "b", "c"];

/// A tile URL template with the placeholders `{z}`, `{x}` and `{y}`.
///
/// `{s}` is replaced with `a`, `b` or `c` in turn to spread the load between
/// mirrored servers.
pub struct UrlFormat {
    inc: AtomicUsize,
    format_str: String,
}

impl UrlFormat {
    pub fn new(format_str: impl Into<String>) -> Result<Self> {
        let format = Self {
            inc: AtomicUsize::new(0),
            format_str: format_str.into(),
        };

        // catches unknown placeholders before the first request goes out
        format.tile_url(&TileCoord::new(0, 0, 0))?;
        ensure!(
            ["{z}", "{x}", "{y}"]
                .iter()
                .all(|p| format.format_str.contains(p)),
            "URL template '{}' must contain {{z}}, {{x}} and {{y}}",
            format.format_str
        );

        Ok(format)
    }

    pub fn as_str(&self) -> &str {
        &self.format_str
    }

    /// Expands the template for a tile in XYZ row numbering.
    pub fn tile_url(&self, tile: &TileCoord) -> Result<String> {
        let inc = self.inc.fetch_add(1, Ordering::Relaxed);
        let vars = hashmap! {
            "s".to_owned() => SUBDOMAINS[inc % SUBDOMAINS.len()].to_owned(),
            "x".to_owned() => tile.x.to_string(),
            "y".to_owned() => tile.y.to_string(),
            "z".to_owned() => tile.z.to_string(),
        };

        strfmt(&self.format_str, &vars).context("failed formatting URL")
    }
}

impl PartialEq for UrlFormat {
    fn eq(&self, other: &Self) -> bool {
        self.format_str == other.format_str
    }
}

impl fmt::Debug for UrlFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UrlFormat")
            .field("format_str", &self.format_str)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_coordinates() {
        let url = UrlFormat::new("https://tiles.example.com/{z}/{x}/{y}.png").unwrap();
        assert_eq!(
            url.tile_url(&TileCoord::new(12, 692, 1800)).unwrap(),
            "https://tiles.example.com/12/692/1800.png"
        );
    }

    #[test]
    fn rotates_subdomains() {
        let url = UrlFormat::new("https://{s}.example.com/{z}/{x}/{y}.png").unwrap();
        let tile = TileCoord::new(1, 1, 1);
        let hosts: Vec<_> = (0..4).map(|_| url.tile_url(&tile).unwrap()).collect();

        assert_eq!(hosts[0], hosts[3]);
        assert_ne!(hosts[0], hosts[1]);
        assert_ne!(hosts[1], hosts[2]);
    }

    #[test]
    fn rejects_incomplete_templates() {
        assert!(UrlFormat::new("https://example.com/{z}/{x}.png").is_err());
        assert!(UrlFormat::new("https://example.com/{z}/{x}/{y}/{q}.png").is_err());
    }
}
