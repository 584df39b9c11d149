//! Grayscale PNG export of diagnostic grids

use crate::Result;
use crate::grid::Grid;
use image::GrayImage;
use std::path::Path;

/// Write a grid as an 8-bit grayscale PNG, rescaled to the full range
pub fn export_grid_png(grid: &Grid, path: &Path) -> Result<()> {
    let scaled = grid.rescaled(0.0, 1.0);
    let mut img = GrayImage::new(grid.width() as u32, grid.height() as u32);
    for (x, y, pixel) in img.enumerate_pixels_mut() {
        let v = scaled[(y as usize, x as usize)];
        *pixel = image::Luma([(v * 255.0).round() as u8]);
    }
    img.save(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_grid_png_roundtrip() {
        let grid = Grid::from_fn(16, 8, |row, col| (row + col) as f64);
        let path = std::env::temp_dir().join("caustica_test_grid.png");
        export_grid_png(&grid, &path).unwrap();

        let img = image::open(&path).unwrap().to_luma8();
        assert_eq!(img.width(), 16);
        assert_eq!(img.height(), 8);
        // Darkest corner maps to 0, brightest to 255
        assert_eq!(img.get_pixel(0, 0).0[0], 0);
        assert_eq!(img.get_pixel(15, 7).0[0], 255);

        let _ = std::fs::remove_file(&path);
    }
}
