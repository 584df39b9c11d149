//! Optimal-transport relaxation of the target parameterization.
//!
//! Each iteration turns per-cell area errors into a potential, integrates
//! its gradient over the dual cells and advances every vertex along the
//! resulting flow, capped so no triangle can invert.

use crate::engine::Engine;
use crate::mesh::{BVH_MAX_DEPTH, BVH_MAX_LEAF_SIZE, calculate_errors, cell_areas};
use crate::poisson;

/// Safety factor applied to the largest non-inverting step
const STEP_SAFETY: f64 = 0.95;
/// Smoothing strength used to recover from a rasterization miss
const MISS_SMOOTHING: f64 = 0.1;

/// Outcome of [`Engine::solve_transport`]
#[derive(Debug, Clone, Copy)]
pub struct TransportSummary {
    /// Iterations performed, including miss-recovery rounds
    pub iterations: usize,
    /// Last scale-invariant step measure
    pub last_step: f64,
    /// Whether the step fell below the tolerance before the cap
    pub converged: bool,
}

impl Engine {
    /// Run a single transport iteration.
    ///
    /// Returns the scale-invariant convergence measure: the largest applied
    /// vertex displacement in raster-pixel units. A rasterization miss
    /// yields NaN after smoothing the parameterization; the caller skips
    /// the convergence check for that round.
    pub fn transport_iteration(&mut self) -> f64 {
        let res_x = self.config.resolution_x();
        let res_y = self.config.resolution_y();
        let pixels_per_unit = res_x as f64 / self.config.width;

        self.target_cells = self.mesh.build_target_dual_cells();
        let source_areas = cell_areas(&self.target_cells);
        self.errors = calculate_errors(&source_areas, &self.target_areas);

        self.mesh.build_bvh(BVH_MAX_LEAF_SIZE, BVH_MAX_DEPTH);
        let (raster, miss) = self.mesh.interpolate_raster(&self.errors, res_x, res_y);
        self.raster = raster;
        if miss {
            tracing::warn!("rasterization miss, smoothing parameterization instead of stepping");
            self.mesh.laplacian_smoothing(MISS_SMOOTHING);
            return f64::NAN;
        }

        self.raster.subtract_average();
        poisson::solve(
            &self.raster,
            &mut self.phi,
            self.config.poisson_max_sweeps,
            self.config.poisson_tolerance,
        );

        self.gradient = self.phi.gradient();
        let (vx, vy) = self.mesh.integrate_cell_gradients(
            &self.gradient.0,
            &self.gradient.1,
            &self.target_cells,
        );

        let min_step = self.mesh.step_grid(&vx, &vy, STEP_SAFETY);
        self.mesh
            .laplacian_smoothing(min_step * pixels_per_unit / 2.0);

        min_step * pixels_per_unit
    }

    /// Iterate transport until the step measure drops below the configured
    /// tolerance or the iteration cap is reached.
    pub fn solve_transport(&mut self) -> TransportSummary {
        let mut summary = TransportSummary {
            iterations: 0,
            last_step: f64::NAN,
            converged: false,
        };
        for iteration in 0..self.config.max_transport_iterations {
            let step = self.transport_iteration();
            summary.iterations = iteration + 1;
            summary.last_step = step;
            tracing::info!(iteration, step, "transport iteration");
            if step.is_nan() {
                continue;
            }
            if step < self.config.transport_tolerance {
                summary.converged = true;
                break;
            }
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Config;
    use crate::grid::Grid;

    fn small_config() -> Config {
        Config::default()
            .with_width(1.0)
            .with_mesh_resolution(8)
            .with_focal_length(2.0)
    }

    fn engine_for(pixels: &Grid) -> Engine {
        Engine::new(small_config(), pixels).unwrap()
    }

    #[test]
    fn test_uniform_image_is_a_fixed_point() {
        let pixels = Grid::from_fn(32, 32, |_, _| 0.7);
        let mut engine = engine_for(&pixels);
        let before = engine.mesh().target_points.clone();
        let step = engine.transport_iteration();
        assert!(step.is_finite());
        assert!(step < 1e-6, "uniform image stepped by {step}");
        for (p, q) in before.iter().zip(&engine.mesh().target_points) {
            assert!((*p - *q).length() < 1e-8);
        }
    }

    #[test]
    fn test_vertices_flow_toward_bright_half() {
        // Right half bright: vertices must drift rightward
        let pixels = Grid::from_fn(32, 32, |_, col| if col < 16 { 0.05 } else { 0.95 });
        let mut engine = engine_for(&pixels);
        let before: f64 = engine.mesh().target_points.iter().map(|p| p.x).sum();
        for _ in 0..5 {
            engine.transport_iteration();
        }
        let after: f64 = engine.mesh().target_points.iter().map(|p| p.x).sum();
        assert!(
            after > before + 1e-6,
            "mean x went {before} -> {after}, expected rightward drift"
        );
    }

    #[test]
    fn test_errors_remain_zero_sum_each_iteration() {
        let pixels = Grid::from_fn(32, 32, |row, col| {
            let dx = col as f64 - 16.0;
            let dy = row as f64 - 16.0;
            (-(dx * dx + dy * dy) / 64.0).exp()
        });
        let mut engine = engine_for(&pixels);
        for _ in 0..3 {
            engine.transport_iteration();
            let sum: f64 = engine.errors().iter().sum();
            let abs_sum: f64 = engine.errors().iter().map(|e| e.abs()).sum();
            assert!(sum.abs() <= 1e-9 * abs_sum.max(1e-300));
        }
    }

    #[test]
    fn test_no_triangle_inverts_during_transport() {
        let pixels = Grid::from_fn(32, 32, |row, col| {
            if (8..24).contains(&row) && (8..24).contains(&col) {
                1.0
            } else {
                0.02
            }
        });
        let mut engine = engine_for(&pixels);
        for _ in 0..10 {
            engine.transport_iteration();
            let mesh = engine.mesh();
            for &tri in &mesh.triangles {
                assert!(mesh.target_triangle_area(tri) > 0.0, "triangle inverted");
            }
            let cells = mesh.build_target_dual_cells();
            let total: f64 = cell_areas(&cells).iter().sum();
            assert!((total - 1.0).abs() < 1e-9, "cells no longer tile: {total}");
        }
    }

    #[test]
    fn test_near_fold_recovers_through_miss_and_smoothing() {
        let pixels = Grid::from_fn(32, 32, |_, _| 0.5);
        let mut engine = engine_for(&pixels);
        // Shrink one lattice row toward the origin. Its right end leaves
        // the boundary, notching a hole into the mesh that raster samples
        // fall into.
        let res_x = engine.mesh().res_x;
        for col in 0..res_x {
            let i = engine.mesh().grid_index(3, col);
            engine.mesh.target_points[i].x *= 0.9;
            engine.mesh.target_points[i].y *= 0.9;
        }
        let first = engine.transport_iteration();
        assert!(first.is_nan(), "expected a miss on the notched mesh");
        // Smoothing slid the stray vertices back onto the boundary; the
        // next round takes a finite step
        let second = engine.transport_iteration();
        assert!(second.is_finite());
    }
}
