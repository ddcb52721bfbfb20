use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use image::{GenericImage, RgbImage};
use log::debug;

use crate::fetch::{TILE_SIZE, TileSource};
use crate::photo::Scale;

/// Assemble the full grid of tiles for a time into one image.
/// Returns None when the server has no imagery for that time; no partial
/// composite survives in that case.
pub fn assemble<S: TileSource>(
    source: &S,
    time: DateTime<Utc>,
    scale: Scale,
) -> Result<Option<RgbImage>> {
    let grid = scale.grid();
    let sentinel = source.sentinel()?;
    let mut composite = RgbImage::new(TILE_SIZE * grid, TILE_SIZE * grid);

    for x in 0..grid {
        for y in 0..grid {
            let data = source.fetch_tile(time, scale, x, y)?;
            let tile = image::load_from_memory(&data)
                .with_context(|| format!("Failed to decode tile ({}, {})", x, y))?
                .to_rgb8();

            if tile.dimensions() == sentinel.dimensions() && tile.as_raw() == sentinel.as_raw() {
                debug!("Tile ({}, {}) is the blank tile, aborting", x, y);
                return Ok(None);
            }

            composite
                .copy_from(&tile, TILE_SIZE * x, TILE_SIZE * y)
                .with_context(|| format!("Tile ({}, {}) does not fit the canvas", x, y))?;
        }
    }

    Ok(Some(composite))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use image::Rgb;
    use std::io::Cursor;

    /// Serves one solid-colored tile per grid cell, or the blank tile at
    /// chosen coordinates
    struct GridSource {
        blank: RgbImage,
        blank_at: Vec<(u32, u32)>,
    }

    impl GridSource {
        fn new(blank_at: Vec<(u32, u32)>) -> Self {
            Self {
                blank: solid_tile(Rgb([0, 0, 0])),
                blank_at,
            }
        }
    }

    fn solid_tile(color: Rgb<u8>) -> RgbImage {
        RgbImage::from_pixel(TILE_SIZE, TILE_SIZE, color)
    }

    fn tile_color(x: u32, y: u32) -> Rgb<u8> {
        Rgb([10 + x as u8 * 40, 10 + y as u8 * 40, 200])
    }

    fn encode_png(image: &RgbImage) -> Vec<u8> {
        let mut data = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut data), image::ImageFormat::Png)
            .expect("Failed to encode test tile");
        data
    }

    impl TileSource for GridSource {
        fn fetch_tile(
            &self,
            _time: DateTime<Utc>,
            _scale: Scale,
            x: u32,
            y: u32,
        ) -> Result<Vec<u8>> {
            let tile = if self.blank_at.contains(&(x, y)) {
                self.blank.clone()
            } else {
                solid_tile(tile_color(x, y))
            };
            Ok(encode_png(&tile))
        }

        fn sentinel(&self) -> Result<RgbImage> {
            Ok(self.blank.clone())
        }
    }

    fn test_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_single_tile_composite_has_tile_dimensions() {
        let source = GridSource::new(vec![]);
        let composite = assemble(&source, test_time(), Scale::X1)
            .expect("Assembly failed")
            .expect("Expected a composite");

        assert_eq!(composite.dimensions(), (TILE_SIZE, TILE_SIZE));
    }

    #[test]
    fn test_tiles_are_pasted_at_their_grid_offsets() {
        let source = GridSource::new(vec![]);
        let composite = assemble(&source, test_time(), Scale::X2)
            .expect("Assembly failed")
            .expect("Expected a composite");

        assert_eq!(composite.dimensions(), (TILE_SIZE * 2, TILE_SIZE * 2));
        assert_eq!(*composite.get_pixel(0, 0), tile_color(0, 0));
        assert_eq!(*composite.get_pixel(TILE_SIZE, 0), tile_color(1, 0));
        assert_eq!(*composite.get_pixel(0, TILE_SIZE), tile_color(0, 1));
        assert_eq!(*composite.get_pixel(TILE_SIZE, TILE_SIZE), tile_color(1, 1));
    }

    #[test]
    fn test_blank_tile_anywhere_aborts_assembly() {
        let source = GridSource::new(vec![(1, 0)]);
        let result = assemble(&source, test_time(), Scale::X2).expect("Assembly failed");

        assert!(result.is_none(), "Blank tile should abort the composite");
    }
}
