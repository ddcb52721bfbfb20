use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Duration, Utc};
use log::info;

use crate::fetch::TileSource;
use crate::stitch;
use crate::timeutil::{BUCKET_SECONDS, round_time};

/// Zoom levels offered by the server, as NxN tile grids
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scale {
    X1 = 1,
    X2 = 2,
    X4 = 4,
    X8 = 8,
    X16 = 16,
    X20 = 20,
}

impl Scale {
    pub fn from_factor(factor: u32) -> Result<Self> {
        match factor {
            1 => Ok(Scale::X1),
            2 => Ok(Scale::X2),
            4 => Ok(Scale::X4),
            8 => Ok(Scale::X8),
            16 => Ok(Scale::X16),
            20 => Ok(Scale::X20),
            other => bail!("Scale must be 1, 2, 4, 8, 16 or 20, got {}", other),
        }
    }

    /// Grid dimension: the full photo is grid x grid tiles
    pub fn grid(&self) -> u32 {
        *self as u32
    }

    /// Size tag used in stored file names
    pub fn size_tag(&self) -> &'static str {
        match self {
            Scale::X1 => "xs",
            Scale::X2 => "small",
            Scale::X4 => "big",
            Scale::X8 => "large",
            Scale::X16 => "xl",
            Scale::X20 => "xxl",
        }
    }
}

/// Maps (time, scale) pairs to photo files in the storage directory,
/// downloading and stitching whatever is not there yet
pub struct PhotoRepository<S> {
    storage_dir: PathBuf,
    source: S,
}

impl<S: TileSource> PhotoRepository<S> {
    pub fn new<P: AsRef<Path>>(storage_dir: P, source: S) -> Result<Self> {
        let storage_dir = storage_dir.as_ref().to_path_buf();
        if !storage_dir.exists() {
            fs::create_dir_all(&storage_dir).context("Failed to create storage directory")?;
        }
        Ok(Self {
            storage_dir,
            source,
        })
    }

    /// Canonical file path for a photo
    pub fn photo_path(&self, time: DateTime<Utc>, scale: Scale) -> PathBuf {
        let time = round_time(time);
        self.storage_dir.join(format!(
            "earth_{}_{}.png",
            time.format("%Y-%m-%d_%H-%M"),
            scale.size_tag(),
        ))
    }

    /// Download and save one photo. Returns the stored path, without any
    /// network activity when the file already exists, or None when the
    /// server has no imagery for that time.
    pub fn fetch_one(&self, time: DateTime<Utc>, scale: Scale) -> Result<Option<PathBuf>> {
        let time = round_time(time);
        let path = self.photo_path(time, scale);
        if path.exists() {
            info!("Image already downloaded: {}", path.display());
            return Ok(Some(path));
        }

        let composite = match stitch::assemble(&self.source, time, scale)? {
            Some(composite) => composite,
            None => {
                info!("No Earth image at {}. File not saved.", time);
                return Ok(None);
            }
        };

        composite
            .save(&path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!("Image saved as: {}", path.display());
        Ok(Some(path))
    }

    /// Download every photo on the 10-minute grid between start and end,
    /// inclusive, one at a time. Stops early and returns what it has when
    /// the interrupt flag flips.
    pub fn fetch_many(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        scale: Scale,
        stop: &AtomicBool,
    ) -> Result<Vec<PathBuf>> {
        let end = round_time(end);
        let mut target = round_time(start);
        let mut saved = Vec::new();

        while target <= end {
            if stop.load(Ordering::SeqCst) {
                info!("Interrupted, stopping after {} photo(s)", saved.len());
                break;
            }
            if let Some(path) = self.fetch_one(target, scale)? {
                saved.push(path);
            }
            target += Duration::seconds(BUCKET_SECONDS);
        }

        Ok(saved)
    }
}
