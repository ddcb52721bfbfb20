use std::cell::OnceCell;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use image::RgbImage;
use log::{info, warn};
use reqwest::blocking::Client;

use crate::photo::Scale;
use crate::timeutil::round_time;

/// Side length of one tile in pixels
pub const TILE_SIZE: u32 = 550;

const URL_BASE: &str = "http://himawari8.nict.go.jp/img/D531106";

/// Retry budget for a single tile request
const MAX_ATTEMPTS: u32 = 5;

/// Producer of raw tile bytes plus the server's "no data" reference tile
pub trait TileSource {
    fn fetch_tile(&self, time: DateTime<Utc>, scale: Scale, x: u32, y: u32) -> Result<Vec<u8>>;

    /// The image the server answers with when it has no photo for a time
    fn sentinel(&self) -> Result<RgbImage>;
}

/// Tile URL for an already-rounded timestamp
pub fn tile_url(time: DateTime<Utc>, scale: Scale, x: u32, y: u32) -> String {
    format!(
        "{}/{}d/{}/{}00_{}_{}.png",
        URL_BASE,
        scale.grid(),
        TILE_SIZE,
        time.format("%Y/%m/%d/%H%M"),
        x,
        y,
    )
}

/// Downloader for photo tiles over a reused HTTP connection
pub struct TileFetcher {
    client: Client,
    sentinel: OnceCell<RgbImage>,
}

impl TileFetcher {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            sentinel: OnceCell::new(),
        }
    }

    /// Download a URL with a bounded retry on connection errors
    fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
        let mut delay = Duration::from_secs(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self
                .client
                .get(url)
                .timeout(Duration::from_secs(30))
                .send()
            {
                Ok(response) => {
                    if !response.status().is_success() {
                        bail!("Failed to download {}: HTTP {}", url, response.status());
                    }
                    let data = response.bytes().context("Failed to read response bytes")?;
                    return Ok(data.to_vec());
                }
                Err(err) => {
                    if attempt >= MAX_ATTEMPTS {
                        return Err(err).with_context(|| {
                            format!("Failed to download {} after {} attempts", url, MAX_ATTEMPTS)
                        });
                    }
                    warn!(
                        "Connection error, retrying in {}s: {}",
                        delay.as_secs(),
                        err
                    );
                    thread::sleep(delay);
                    delay *= 2;
                }
            }
        }
    }

    /// Requesting a tile from the near future always returns the blank
    /// "no data" image, which is what later downloads are compared against
    fn fetch_sentinel(&self) -> Result<RgbImage> {
        let near_future = round_time(Utc::now() + chrono::Duration::hours(1));
        let url = tile_url(near_future, Scale::X1, 0, 0);
        info!("Fetching blank reference tile: {}", url);
        let data = self.get_bytes(&url)?;
        let image =
            image::load_from_memory(&data).context("Failed to decode blank reference tile")?;
        Ok(image.to_rgb8())
    }
}

impl TileSource for TileFetcher {
    fn fetch_tile(&self, time: DateTime<Utc>, scale: Scale, x: u32, y: u32) -> Result<Vec<u8>> {
        let url = tile_url(time, scale, x, y);
        info!("Fetching tile: {}", url);
        self.get_bytes(&url)
    }

    fn sentinel(&self) -> Result<RgbImage> {
        if let Some(cached) = self.sentinel.get() {
            return Ok(cached.clone());
        }
        let image = self.fetch_sentinel()?;
        let _ = self.sentinel.set(image.clone());
        Ok(image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_tile_url_zero_pads_date_fields() {
        let time = Utc.with_ymd_and_hms(2020, 6, 1, 8, 0, 0).unwrap();
        let url = tile_url(time, Scale::X2, 0, 1);

        assert_eq!(
            url,
            "http://himawari8.nict.go.jp/img/D531106/2d/550/2020/06/01/080000_0_1.png"
        );
    }

    #[test]
    fn test_tile_url_uses_grid_dimension_and_coordinates() {
        let time = Utc.with_ymd_and_hms(2021, 12, 31, 23, 50, 0).unwrap();
        let url = tile_url(time, Scale::X16, 15, 7);

        assert_eq!(
            url,
            "http://himawari8.nict.go.jp/img/D531106/16d/550/2021/12/31/235000_15_7.png"
        );
    }
}
