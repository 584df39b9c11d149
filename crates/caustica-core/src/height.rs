//! Height recovery: refractive normals to a surface heightfield.
//!
//! The divergence of the per-vertex slope fields is pushed through the
//! Poisson solver on the raster grid, and the resulting height grid is
//! sampled back at the lattice of the configured surface. A small fixed
//! number of iterations refines the slopes against the solved heights.

use crate::engine::{Engine, HeightSurface};
use crate::grid::{self, Grid};
use crate::mesh::{BVH_MAX_DEPTH, BVH_MAX_LEAF_SIZE, Mesh};
use crate::poisson;

pub(crate) struct HeightSolve {
    pub heights: Vec<f64>,
    pub grid: Grid,
    pub divergence: Grid,
}

impl Engine {
    /// Run one height iteration.
    ///
    /// Returns false when rasterizing the slope fields misses, which
    /// terminates the height loop with whatever heights are in place.
    pub fn height_iteration(&mut self) -> bool {
        let surface = self.config.height_surface;
        let heights = surface_heights(&self.mesh, surface);
        let (slope_x, slope_y) = self.mesh.calculate_refractive_normals(
            self.config.focal_length,
            self.config.refractive_index,
            &heights,
            surface,
        );

        self.mesh.build_bvh(BVH_MAX_LEAF_SIZE, BVH_MAX_DEPTH);
        let Some(solve) = recover_surface(
            &self.mesh,
            &slope_x,
            &slope_y,
            self.config.resolution_x(),
            self.config.resolution_y(),
            self.config.poisson_max_sweeps,
            self.config.poisson_tolerance,
            surface,
        ) else {
            tracing::warn!("slope rasterization missed, stopping height refinement");
            return false;
        };

        match surface {
            HeightSurface::SourceSurface => self.mesh.set_source_heights(&solve.heights),
            HeightSurface::TargetSurface => self.mesh.set_target_heights(&solve.heights),
        }
        self.height_grid = solve.grid;
        self.divergence = solve.divergence;
        true
    }

    /// Run the configured number of height iterations
    pub fn solve_height(&mut self) -> usize {
        for iteration in 0..self.config.height_iterations {
            tracing::info!(iteration, "height iteration");
            if !self.height_iteration() {
                return iteration;
            }
        }
        self.config.height_iterations
    }
}

/// Current per-vertex heights of the chosen surface
fn surface_heights(mesh: &Mesh, surface: HeightSurface) -> Vec<f64> {
    match surface {
        HeightSurface::SourceSurface => mesh.source_points.iter().map(|p| p.z).collect(),
        HeightSurface::TargetSurface => mesh.target_points.iter().map(|p| p.z).collect(),
    }
}

/// Rasterize slope fields, solve the Poisson problem on their divergence
/// and sample the heights back at the surface lattice.
///
/// The grid works in pixel spacing, so the sampled values are scaled by
/// the physical pixel size on the way out.
pub(crate) fn recover_surface(
    mesh: &Mesh,
    slope_x: &[f64],
    slope_y: &[f64],
    res_x: usize,
    res_y: usize,
    max_sweeps: usize,
    tolerance: f64,
    surface: HeightSurface,
) -> Option<HeightSolve> {
    let (nx, miss_x) = mesh.interpolate_raster(slope_x, res_x, res_y);
    let (ny, miss_y) = mesh.interpolate_raster(slope_y, res_x, res_y);
    if miss_x || miss_y {
        return None;
    }

    let mut div = grid::divergence(&nx, &ny);
    div.subtract_average();

    // Fresh potential: heights are not warm-started across iterations
    let mut h = Grid::new(res_x, res_y);
    poisson::solve(&div, &mut h, max_sweeps, tolerance);

    let sx = res_x as f64 / mesh.width;
    let sy = res_y as f64 / mesh.height;
    let pixel_size = mesh.width / res_x as f64;
    let lattice = match surface {
        HeightSurface::SourceSurface => &mesh.source_points,
        HeightSurface::TargetSurface => &mesh.target_points,
    };
    let heights: Vec<f64> = lattice
        .iter()
        .map(|p| h.bilinear_sample(p.x * sx, p.y * sy) * pixel_size)
        .collect();

    Some(HeightSolve {
        heights,
        grid: h,
        divergence: div,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Config;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    #[test]
    fn test_flat_parameterization_yields_flat_surface() {
        let pixels = Grid::from_fn(32, 32, |_, _| 1.0);
        let config = Config::default().with_width(1.0).with_mesh_resolution(8);
        let mut engine = Engine::new(config, &pixels).unwrap();
        assert_eq!(engine.solve_height(), 3);
        for p in &engine.mesh().source_points {
            assert_relative_eq!(p.z, 0.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_known_slopes_recover_surface() {
        // h(x, y) = A cos(pi x) cos(pi y) has zero normal slope on the
        // boundary of the unit square, matching the solver's boundary
        // treatment.
        let amplitude = 0.05;
        let mut mesh = Mesh::new(1.0, 1.0, 9, 9);
        mesh.build_bvh(1, 30);
        let h_true = |x: f64, y: f64| amplitude * (PI * x).cos() * (PI * y).cos();
        let slope_x: Vec<f64> = mesh
            .source_points
            .iter()
            .map(|p| -amplitude * PI * (PI * p.x).sin() * (PI * p.y).cos())
            .collect();
        let slope_y: Vec<f64> = mesh
            .source_points
            .iter()
            .map(|p| -amplitude * PI * (PI * p.x).cos() * (PI * p.y).sin())
            .collect();

        let solve = recover_surface(
            &mesh,
            &slope_x,
            &slope_y,
            36,
            36,
            400_000,
            1e-12,
            HeightSurface::SourceSurface,
        )
        .unwrap();

        let truth: Vec<f64> = mesh
            .source_points
            .iter()
            .map(|p| h_true(p.x, p.y))
            .collect();
        let truth_mean = truth.iter().sum::<f64>() / truth.len() as f64;
        let rec_mean = solve.heights.iter().sum::<f64>() / solve.heights.len() as f64;
        let rms = truth
            .iter()
            .zip(&solve.heights)
            .map(|(t, r)| {
                let d = (t - truth_mean) - (r - rec_mean);
                d * d
            })
            .sum::<f64>()
            .sqrt()
            / (truth.len() as f64).sqrt();
        assert!(
            rms < 0.05 * amplitude,
            "height recovery rms {rms} exceeds tolerance"
        );
    }

    #[test]
    fn test_converged_spot_yields_converging_surface() {
        // Bright spot in the image center: transport pulls the landing
        // points inward, so every exit ray must bend toward the middle and
        // the exported surface has to rise from the rim to a central peak.
        let pixels = Grid::from_fn(32, 32, |row, col| {
            let dx = col as f64 - 15.5;
            let dy = row as f64 - 15.5;
            0.02 + (-(dx * dx + dy * dy) / 40.0).exp()
        });
        let config = Config::default()
            .with_width(1.0)
            .with_mesh_resolution(8)
            .with_focal_length(2.0)
            .with_thickness(0.1);
        let mut engine = Engine::new(config, &pixels).unwrap();
        engine.config.max_transport_iterations = 12;
        engine.solve_transport();
        assert!(engine.solve_height() > 0);

        let solid = engine.solidify();
        let mesh = engine.mesh();
        let mid_row = mesh.res_y / 2;
        let center = solid.vertices[mesh.grid_index(mid_row, mesh.res_x / 2)].z;
        let left = solid.vertices[mesh.grid_index(mid_row, 0)].z;
        let right = solid.vertices[mesh.grid_index(mid_row, mesh.res_x - 1)].z;
        assert!(
            center > left + 1e-8,
            "surface must rise toward the spot: center {center}, left rim {left}"
        );
        assert!(
            center > right + 1e-8,
            "surface must rise toward the spot: center {center}, right rim {right}"
        );
    }

    #[test]
    fn test_full_pipeline_produces_solid_lens() {
        let pixels = Grid::from_fn(32, 32, |row, col| {
            let dx = col as f64 - 16.0;
            let dy = row as f64 - 16.0;
            0.05 + (-(dx * dx + dy * dy) / 100.0).exp()
        });
        let config = Config::default()
            .with_width(1.0)
            .with_mesh_resolution(8)
            .with_focal_length(3.0)
            .with_thickness(0.1);
        let mut engine = Engine::new(config, &pixels).unwrap();
        engine.config.max_transport_iterations = 8;
        engine.solve_transport();
        assert!(engine.solve_height() > 0);

        let solid = engine.solidify();
        let n = engine.mesh().vertex_count();
        // Back face planar
        for v in &solid.vertices[n..] {
            assert_relative_eq!(v.z, -0.1, epsilon = 1e-9);
        }
        // Front face triangles keep outward-up normals
        for tri in solid.triangles.iter().take(engine.mesh().triangle_count()) {
            let [a, b, c] = *tri;
            let normal = (solid.vertices[b] - solid.vertices[a])
                .cross(solid.vertices[c] - solid.vertices[a]);
            assert!(normal.z > 0.0);
        }
    }
}
