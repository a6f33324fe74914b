//! Pixel sampling: decoded bitmap in, grid of packed 24-bit colors out.

use std::fmt;

use image::{DynamicImage, GenericImageView, RgbImage, RgbaImage};

use crate::error::{PiwoError, PiwoResult};

/// A 24-bit RGB value stored as `(R << 16) | (G << 8) | B`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PackedColor(u32);

impl PackedColor {
    pub const MAX: u32 = 0xFF_FFFF;

    pub fn from_rgb(r: u8, g: u8, b: u8) -> Self {
        Self(((r as u32) << 16) | ((g as u32) << 8) | b as u32)
    }

    /// Returns `None` for values that do not fit in 24 bits.
    pub fn from_value(value: u32) -> Option<Self> {
        (value <= Self::MAX).then_some(Self(value))
    }

    pub fn value(self) -> u32 {
        self.0
    }

    pub fn channels(self) -> [u8; 3] {
        [(self.0 >> 16) as u8, (self.0 >> 8) as u8, self.0 as u8]
    }
}

impl fmt::Display for PackedColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-pixel RGB access to a decoded frame.
///
/// `rgb_at` returns `None` when the frame cannot produce a sample for the
/// coordinate, which the sampler treats as a corrupt bitmap.
pub trait PixelSource {
    fn rgb_at(&self, x: u32, y: u32) -> Option<[u8; 3]>;
}

impl PixelSource for RgbImage {
    fn rgb_at(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        self.get_pixel_checked(x, y).map(|px| px.0)
    }
}

impl PixelSource for RgbaImage {
    fn rgb_at(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        self.get_pixel_checked(x, y).map(|px| [px[0], px[1], px[2]])
    }
}

impl PixelSource for DynamicImage {
    fn rgb_at(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if !self.in_bounds(x, y) {
            return None;
        }
        let px = self.get_pixel(x, y);
        Some([px[0], px[1], px[2]])
    }
}

impl<S: PixelSource + ?Sized> PixelSource for &S {
    fn rgb_at(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        (**self).rgb_at(x, y)
    }
}

/// Row-major `height x width` grid of packed colors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelGrid {
    width: u32,
    height: u32,
    cells: Vec<PackedColor>,
}

impl PixelGrid {
    /// A black grid.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            cells: vec![PackedColor::default(); (width as usize) * (height as usize)],
        }
    }

    /// Builds a grid from row-major cells. Returns `None` if the cell count
    /// does not match the dimensions.
    pub fn from_cells(width: u32, height: u32, cells: Vec<PackedColor>) -> Option<Self> {
        (cells.len() == (width as usize) * (height as usize)).then_some(Self {
            width,
            height,
            cells,
        })
    }

    /// Samples a fresh grid of the given size from `source`.
    pub fn sample<S: PixelSource + ?Sized>(source: &S, width: u32, height: u32) -> PiwoResult<Self> {
        let mut grid = Self::new(width, height);
        grid.fill_from(source)?;
        Ok(grid)
    }

    /// Overwrites every cell from `source`, so a reused grid never carries
    /// values over from the previous frame. On error the grid contents are
    /// unspecified.
    pub fn fill_from<S: PixelSource + ?Sized>(&mut self, source: &S) -> PiwoResult<()> {
        let width = self.width as usize;
        for (idx, cell) in self.cells.iter_mut().enumerate() {
            let x = (idx % width) as u32;
            let y = (idx / width) as u32;
            let [r, g, b] = source
                .rgb_at(x, y)
                .ok_or(PiwoError::ColorSampleMissing { x, y })?;
            *cell = PackedColor::from_rgb(r, g, b);
        }
        Ok(())
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn get(&self, row: u32, col: u32) -> Option<PackedColor> {
        if row >= self.height || col >= self.width {
            return None;
        }
        self.cells
            .get(row as usize * self.width as usize + col as usize)
            .copied()
    }

    pub fn rows(&self) -> impl Iterator<Item = &[PackedColor]> {
        // chunks() panics on zero; a zero-width grid has no rows anyway.
        self.cells.chunks(self.width.max(1) as usize)
    }

    pub fn cells(&self) -> &[PackedColor] {
        &self.cells
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, Rgba};

    #[test]
    fn packs_primary_colors() {
        assert_eq!(PackedColor::from_rgb(255, 0, 0).value(), 16_711_680);
        assert_eq!(PackedColor::from_rgb(0, 255, 0).value(), 65_280);
        assert_eq!(PackedColor::from_rgb(0, 0, 255).value(), 255);
        assert_eq!(PackedColor::from_rgb(255, 255, 255).value(), 16_777_215);
        assert_eq!(PackedColor::from_rgb(0, 0, 0).value(), 0);
        assert_eq!(PackedColor::from_rgb(10, 20, 30).value(), 660_510);
    }

    #[test]
    fn channels_unpack() {
        assert_eq!(PackedColor::from_rgb(1, 2, 3).channels(), [1, 2, 3]);
        assert!(PackedColor::from_value(PackedColor::MAX + 1).is_none());
    }

    #[test]
    fn samples_row_major() {
        let img = RgbImage::from_fn(12, 10, |x, y| Rgb([x as u8, y as u8, 0]));
        let grid = PixelGrid::sample(&img, 12, 10).unwrap();
        assert_eq!(grid.cells().len(), 120);
        assert_eq!(grid.get(3, 7), Some(PackedColor::from_rgb(7, 3, 0)));
        assert_eq!(grid.rows().count(), 10);
        assert!(grid.rows().all(|row| row.len() == 12));
    }

    #[test]
    fn alpha_is_ignored() {
        let img = RgbaImage::from_pixel(2, 2, Rgba([10, 20, 30, 0]));
        let grid = PixelGrid::sample(&img, 2, 2).unwrap();
        assert!(grid.cells().iter().all(|c| c.value() == 660_510));
    }

    #[test]
    fn short_bitmap_reports_missing_sample() {
        let img = RgbImage::new(12, 9);
        let err = PixelGrid::sample(&img, 12, 10).unwrap_err();
        assert!(matches!(err, PiwoError::ColorSampleMissing { x: 0, y: 9 }));
    }

    #[test]
    fn refill_overwrites_previous_frame() {
        let mut grid = PixelGrid::new(3, 2);
        grid.fill_from(&RgbImage::from_pixel(3, 2, Rgb([255, 255, 255])))
            .unwrap();
        grid.fill_from(&RgbImage::from_pixel(3, 2, Rgb([0, 0, 1])))
            .unwrap();
        assert!(grid.cells().iter().all(|c| c.value() == 1));
    }
}
