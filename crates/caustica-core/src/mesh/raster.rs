//! Rasterization of per-vertex scalars through the target parameterization,
//! and the reverse transfer that integrates grid fields back into dual cells.

use super::Mesh;
use crate::grid::Grid;
use crate::polygon::{self, AREA_EPSILON, INSIDE_EPSILON};
use glam::{DVec2, DVec3};

/// Inclusion tolerance for the BVH retry on seam pixels
const MISS_EPSILON: f64 = 1e-6;

impl Mesh {
    /// Rasterize a per-vertex scalar field onto a `res_x` x `res_y` grid.
    ///
    /// Every triangle scatters barycentric-interpolated values over the
    /// integer sample points its target-space projection covers. Samples
    /// inside the mesh bounding box that no triangle hits are retried
    /// through the BVH point query when an index is built; if one still
    /// misses, the returned flag is set and the caller is expected to
    /// smooth and retry instead of stepping.
    pub fn interpolate_raster(&self, values: &[f64], res_x: usize, res_y: usize) -> (Grid, bool) {
        assert_eq!(values.len(), self.vertex_count());
        let sx = res_x as f64 / self.width;
        let sy = res_y as f64 / self.height;

        let mut grid = Grid::new(res_x, res_y);
        let mut covered = vec![false; res_x * res_y];

        for tri in &self.triangles {
            let [ia, ib, ic] = *tri;
            let a = scaled(self.target_points[ia], sx, sy);
            let b = scaled(self.target_points[ib], sx, sy);
            let c = scaled(self.target_points[ic], sx, sy);

            let min = a.min(b).min(c);
            let max = a.max(b).max(c);
            let col_range = sample_range(min.x, max.x, res_x);
            let row_range = sample_range(min.y, max.y, res_y);

            for row in row_range.clone() {
                for col in col_range.clone() {
                    let p = DVec2::new(col as f64, row as f64);
                    let Some(l) = polygon::barycentric(p, a, b, c) else {
                        continue;
                    };
                    if l.iter().all(|&v| v >= -INSIDE_EPSILON) {
                        grid[(row, col)] =
                            l[0] * values[ia] + l[1] * values[ib] + l[2] * values[ic];
                        covered[row * res_x + col] = true;
                    }
                }
            }
        }

        let mut miss = false;
        let (mesh_min, mesh_max) = self.target_bounds();
        let col_range = sample_range(mesh_min.x * sx, mesh_max.x * sx, res_x);
        let row_range = sample_range(mesh_min.y * sy, mesh_max.y * sy, res_y);
        for row in row_range {
            for col in col_range.clone() {
                if covered[row * res_x + col] {
                    continue;
                }
                let p = DVec2::new(col as f64 / sx, row as f64 / sy);
                if let Some((t, l)) = self.locate_target_point(p, MISS_EPSILON) {
                    let [ia, ib, ic] = self.triangles[t];
                    grid[(row, col)] = l[0] * values[ia] + l[1] * values[ib] + l[2] * values[ic];
                    covered[row * res_x + col] = true;
                } else {
                    miss = true;
                }
            }
        }
        if miss {
            tracing::debug!("rasterization missed pixels inside the mesh bounds");
        }
        (grid, miss)
    }

    /// Area-weighted average of a grid vector field over each dual cell.
    ///
    /// Every cell is clipped against the pixel rectangles it overlaps and
    /// the per-pixel field values accumulate weighted by the clipped area.
    /// Degenerate cells come back as zero vectors.
    pub fn integrate_cell_gradients(
        &self,
        gx: &Grid,
        gy: &Grid,
        cells: &[Vec<DVec3>],
    ) -> (Vec<f64>, Vec<f64>) {
        let sx = gx.width() as f64 / self.width;
        let sy = gx.height() as f64 / self.height;
        let mut vx = Vec::with_capacity(cells.len());
        let mut vy = Vec::with_capacity(cells.len());

        for cell in cells {
            let poly: Vec<DVec2> = cell
                .iter()
                .map(|p| DVec2::new(p.x * sx, p.y * sy))
                .collect();
            let mut min = DVec2::splat(f64::INFINITY);
            let mut max = DVec2::splat(f64::NEG_INFINITY);
            for p in &poly {
                min = min.min(*p);
                max = max.max(*p);
            }

            let mut acc = DVec2::ZERO;
            let mut total = 0.0;
            if min.x.is_finite() {
                let col_lo = (min.x.floor() as i64).clamp(0, gx.width() as i64 - 1) as usize;
                let col_hi =
                    ((max.x.ceil() as i64) - 1).clamp(0, gx.width() as i64 - 1) as usize;
                let row_lo = (min.y.floor() as i64).clamp(0, gx.height() as i64 - 1) as usize;
                let row_hi =
                    ((max.y.ceil() as i64) - 1).clamp(0, gx.height() as i64 - 1) as usize;
                for row in row_lo..=row_hi {
                    for col in col_lo..=col_hi {
                        let lo = DVec2::new(col as f64, row as f64);
                        let clipped = polygon::clip_to_rect(&poly, lo, lo + DVec2::ONE);
                        let area = polygon::signed_area(&clipped);
                        if area.abs() <= AREA_EPSILON {
                            continue;
                        }
                        acc += area * DVec2::new(gx[(row, col)], gy[(row, col)]);
                        total += area;
                    }
                }
            }

            if total.abs() <= AREA_EPSILON {
                vx.push(0.0);
                vy.push(0.0);
            } else {
                vx.push(acc.x / total);
                vy.push(acc.y / total);
            }
        }
        (vx, vy)
    }

    fn target_bounds(&self) -> (DVec2, DVec2) {
        let mut min = DVec2::splat(f64::INFINITY);
        let mut max = DVec2::splat(f64::NEG_INFINITY);
        for p in &self.target_points {
            min = min.min(p.truncate());
            max = max.max(p.truncate());
        }
        (min, max)
    }
}

fn scaled(p: DVec3, sx: f64, sy: f64) -> DVec2 {
    DVec2::new(p.x * sx, p.y * sy)
}

/// Integer sample coordinates covered by `[min, max]`, clamped to the grid
fn sample_range(min: f64, max: f64, len: usize) -> std::ops::RangeInclusive<usize> {
    let lo = (min - INSIDE_EPSILON).ceil().max(0.0) as usize;
    let hi = ((max + INSIDE_EPSILON).floor().min(len as f64 - 1.0)).max(0.0) as usize;
    if lo > hi {
        // Empty range
        return 1..=0;
    }
    lo..=hi
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_rasterized_ones_give_ones() {
        let mesh = Mesh::new(1.0, 1.0, 6, 6);
        let ones = vec![1.0; mesh.vertex_count()];
        let (grid, miss) = mesh.interpolate_raster(&ones, 12, 12);
        assert!(!miss);
        for &v in grid.as_slice() {
            assert_relative_eq!(v, 1.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_rasterized_linear_field_is_exact() {
        let mesh = Mesh::new(2.0, 2.0, 5, 5);
        let values: Vec<f64> = mesh.source_points.iter().map(|p| p.x).collect();
        let (grid, miss) = mesh.interpolate_raster(&values, 8, 8);
        assert!(!miss);
        for row in 0..8 {
            for col in 0..8 {
                // Sample (col, row) sits at physical x = col * width / res
                assert_relative_eq!(grid[(row, col)], col as f64 * 0.25, epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn test_collapsed_triangle_sets_miss_flag() {
        let mut mesh = Mesh::new(1.0, 1.0, 2, 2);
        // Collapse the lower-left triangle onto the left edge; the lower
        // right region of the domain is no longer covered by any triangle.
        mesh.target_points[1] = mesh.target_points[0];
        let values = vec![1.0; 4];
        let (_, miss) = mesh.interpolate_raster(&values, 4, 4);
        assert!(miss);
    }

    #[test]
    fn test_bvh_fills_seam_pixels() {
        let mut mesh = Mesh::new(1.0, 1.0, 6, 6);
        mesh.build_bvh(super::super::BVH_MAX_LEAF_SIZE, super::super::BVH_MAX_DEPTH);
        let ones = vec![1.0; mesh.vertex_count()];
        let (grid, miss) = mesh.interpolate_raster(&ones, 16, 16);
        assert!(!miss);
        for &v in grid.as_slice() {
            assert_relative_eq!(v, 1.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_integrated_constant_gradient_is_constant() {
        let mesh = Mesh::new(1.0, 1.0, 5, 5);
        let cells = mesh.build_target_dual_cells();
        let gx = Grid::from_fn(10, 10, |_, _| 1.5);
        let gy = Grid::from_fn(10, 10, |_, _| -0.5);
        let (vx, vy) = mesh.integrate_cell_gradients(&gx, &gy, &cells);
        for i in 0..mesh.vertex_count() {
            assert_relative_eq!(vx[i], 1.5, epsilon = 1e-9);
            assert_relative_eq!(vy[i], -0.5, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_degenerate_cell_yields_zero_vector() {
        let mesh = Mesh::new(1.0, 1.0, 3, 3);
        let cells = vec![vec![DVec3::new(0.5, 0.5, 0.0); 4]];
        let gx = Grid::from_fn(6, 6, |_, _| 2.0);
        let gy = Grid::from_fn(6, 6, |_, _| 2.0);
        let (vx, vy) = mesh.integrate_cell_gradients(&gx, &gy, &cells);
        assert_relative_eq!(vx[0], 0.0);
        assert_relative_eq!(vy[0], 0.0);
    }
}
