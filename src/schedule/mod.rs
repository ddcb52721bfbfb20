use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::{info, warn};

use crate::fetch::TileSource;
use crate::photo::{PhotoRepository, Scale};
use crate::timeutil::BUCKET_SECONDS;
use crate::wallpaper::WallpaperSink;

/// Install the Ctrl-C handler. The returned flag flips once on interrupt
/// and is shared with the batch loop and the scheduler.
pub fn stop_flag() -> Result<Arc<AtomicBool>> {
    let flag = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&flag);
    ctrlc::set_handler(move || handler_flag.store(true, Ordering::SeqCst))
        .context("Failed to install Ctrl-C handler")?;
    Ok(flag)
}

/// Fetches a photo every fixed interval until interrupted, advancing the
/// target time by one interval each cycle
pub struct Scheduler {
    interval: Duration,
    stop: Arc<AtomicBool>,
}

impl Scheduler {
    pub fn new(interval: Duration, stop: Arc<AtomicBool>) -> Self {
        Self { interval, stop }
    }

    /// Run until the interrupt flag flips, then return cleanly.
    /// A failed cycle is logged and skipped so the timer keeps running.
    pub fn run<S: TileSource>(
        &self,
        repository: &PhotoRepository<S>,
        start: DateTime<Utc>,
        scale: Scale,
        sink: Option<&dyn WallpaperSink>,
    ) -> Result<()> {
        let mut target = start;
        info!("Fetching a new photo every {}s", self.interval.as_secs());

        while !self.stop.load(Ordering::SeqCst) {
            let cycle_started = Instant::now();

            match repository.fetch_one(target, scale) {
                Ok(Some(path)) => {
                    if let Some(sink) = sink {
                        if let Err(err) = sink.apply(&path) {
                            warn!("Failed to set wallpaper: {:#}", err);
                        }
                    }
                }
                Ok(None) => info!("No photo available for {}", target),
                Err(err) => warn!("Fetch failed for {}: {:#}", target, err),
            }

            target += chrono::Duration::seconds(BUCKET_SECONDS);
            info!("Next photo will be downloaded at {}", target);
            self.sleep_until_next_cycle(cycle_started);
        }

        info!("Scheduler stopped");
        Ok(())
    }

    /// Sleep out the rest of the cycle in short slices so an interrupt is
    /// noticed promptly
    fn sleep_until_next_cycle(&self, cycle_started: Instant) {
        loop {
            if self.stop.load(Ordering::SeqCst) {
                return;
            }
            let remaining = self.interval.saturating_sub(cycle_started.elapsed());
            if remaining.is_zero() {
                return;
            }
            thread::sleep(remaining.min(Duration::from_secs(1)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::{TILE_SIZE, TileSource};
    use chrono::TimeZone;
    use image::{Rgb, RgbImage};
    use std::io::Cursor;
    use tempfile::TempDir;

    struct SolidSource;

    impl TileSource for SolidSource {
        fn fetch_tile(
            &self,
            _time: DateTime<Utc>,
            _scale: Scale,
            _x: u32,
            _y: u32,
        ) -> Result<Vec<u8>> {
            let tile = RgbImage::from_pixel(TILE_SIZE, TILE_SIZE, Rgb([50, 60, 70]));
            let mut data = Vec::new();
            tile.write_to(&mut Cursor::new(&mut data), image::ImageFormat::Png)
                .expect("Failed to encode test tile");
            Ok(data)
        }

        fn sentinel(&self) -> Result<RgbImage> {
            Ok(RgbImage::from_pixel(TILE_SIZE, TILE_SIZE, Rgb([0, 0, 0])))
        }
    }

    #[test]
    fn test_pre_set_interrupt_stops_before_the_first_cycle() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let repository =
            PhotoRepository::new(dir.path(), SolidSource).expect("Failed to create repository");

        let stop = Arc::new(AtomicBool::new(true));
        let scheduler = Scheduler::new(Duration::from_secs(600), stop);
        let start = Utc.with_ymd_and_hms(2020, 6, 1, 12, 0, 0).unwrap();

        scheduler
            .run(&repository, start, Scale::X1, None)
            .expect("Scheduler should stop cleanly");
    }
}
