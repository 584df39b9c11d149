//! The owning engine value shared by the transport and height drivers.
//!
//! Everything the optimization mutates lives here: the lens mesh, the
//! warm-started transport potential, the image-derived target areas and
//! the per-iteration diagnostic grids.

use crate::error::{Error, Result};
use crate::grid::Grid;
use crate::mesh::Mesh;
use glam::DVec3;

/// Which lattice carries the solved heights and becomes the lens surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HeightSurface {
    /// Heights on the fixed source lattice (regular front surface)
    #[default]
    SourceSurface,
    /// Heights on the deformed target lattice
    TargetSurface,
}

/// Solver parameters
#[derive(Debug, Clone)]
pub struct Config {
    /// Physical slab width
    pub width: f64,
    /// Image width / height; the slab height and mesh rows derive from it
    pub aspect_ratio: f64,
    /// Distance from the lens to the screen
    pub focal_length: f64,
    /// Slab thickness for solidification
    pub thickness: f64,
    /// Lattice vertices per row; rows derive from the aspect ratio
    pub mesh_res_x: usize,
    /// Index of refraction of the lens material
    pub refractive_index: f64,
    /// Transport stops once the scale-invariant step falls below this
    pub transport_tolerance: f64,
    /// Hard cap on transport iterations
    pub max_transport_iterations: usize,
    /// Fixed number of height iterations
    pub height_iterations: usize,
    /// Poisson sweep cap
    pub poisson_max_sweeps: usize,
    /// Poisson max-delta tolerance
    pub poisson_tolerance: f64,
    /// Surface variant fed by the height solver
    pub height_surface: HeightSurface,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            width: 100.0,
            aspect_ratio: 1.0,
            focal_length: 200.0,
            thickness: 5.0,
            mesh_res_x: 64,
            refractive_index: 1.49,
            transport_tolerance: 0.005,
            max_transport_iterations: 100,
            height_iterations: 3,
            poisson_max_sweeps: 100_000,
            poisson_tolerance: 1e-7,
            height_surface: HeightSurface::SourceSurface,
        }
    }
}

impl Config {
    pub fn with_width(mut self, width: f64) -> Self {
        self.width = width;
        self
    }

    pub fn with_aspect_ratio(mut self, aspect_ratio: f64) -> Self {
        self.aspect_ratio = aspect_ratio;
        self
    }

    pub fn with_focal_length(mut self, focal_length: f64) -> Self {
        self.focal_length = focal_length;
        self
    }

    pub fn with_thickness(mut self, thickness: f64) -> Self {
        self.thickness = thickness;
        self
    }

    pub fn with_mesh_resolution(mut self, mesh_res_x: usize) -> Self {
        self.mesh_res_x = mesh_res_x;
        self
    }

    pub fn with_height_surface(mut self, surface: HeightSurface) -> Self {
        self.height_surface = surface;
        self
    }

    /// Physical slab height
    pub fn height(&self) -> f64 {
        self.width / self.aspect_ratio
    }

    /// Lattice rows, derived from the aspect ratio
    pub fn mesh_res_y(&self) -> usize {
        ((self.mesh_res_x as f64 / self.aspect_ratio).round() as usize).max(2)
    }

    /// Raster grid width, four samples per lattice column
    pub fn resolution_x(&self) -> usize {
        4 * self.mesh_res_x
    }

    /// Raster grid height
    pub fn resolution_y(&self) -> usize {
        4 * self.mesh_res_y()
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.width > 0.0) {
            return Err(Error::InvalidParameter(format!(
                "width must be positive, got {}",
                self.width
            )));
        }
        if !(self.aspect_ratio > 0.0) || !self.aspect_ratio.is_finite() {
            return Err(Error::InvalidParameter(format!(
                "aspect ratio must be positive and finite, got {}",
                self.aspect_ratio
            )));
        }
        if !(self.focal_length > 0.0) {
            return Err(Error::InvalidParameter(format!(
                "focal length must be positive, got {}",
                self.focal_length
            )));
        }
        if self.thickness < 0.0 {
            return Err(Error::InvalidParameter(format!(
                "thickness must not be negative, got {}",
                self.thickness
            )));
        }
        if self.mesh_res_x < 2 {
            return Err(Error::InvalidParameter(format!(
                "mesh resolution must be at least 2, got {}",
                self.mesh_res_x
            )));
        }
        if !(self.refractive_index > 1.0) {
            return Err(Error::InvalidParameter(format!(
                "refractive index must exceed 1, got {}",
                self.refractive_index
            )));
        }
        Ok(())
    }
}

/// Owning state for one lens computation.
///
/// Created once from a config and the resampled grayscale image; both
/// drivers mutate it in place through `&mut Engine`.
pub struct Engine {
    pub(crate) config: Config,
    pub(crate) mesh: Mesh,
    /// Transport potential, warm-started across iterations
    pub(crate) phi: Grid,
    pub(crate) target_areas: Vec<f64>,
    // Last-iteration diagnostics, exposed by reference
    pub(crate) errors: Vec<f64>,
    pub(crate) target_cells: Vec<Vec<DVec3>>,
    pub(crate) raster: Grid,
    pub(crate) gradient: (Grid, Grid),
    pub(crate) height_grid: Grid,
    pub(crate) divergence: Grid,
}

impl Engine {
    /// Build the engine from a config and the grayscale target image,
    /// already resampled to `(resolution_x, resolution_y)`.
    pub fn new(config: Config, pixels: &Grid) -> Result<Self> {
        config.validate()?;
        let res_x = config.resolution_x();
        let res_y = config.resolution_y();
        if pixels.width() != res_x || pixels.height() != res_y {
            return Err(Error::InvalidParameter(format!(
                "image grid is {}x{}, expected {}x{}",
                pixels.width(),
                pixels.height(),
                res_x,
                res_y
            )));
        }

        let mesh = Mesh::new(
            config.width,
            config.height(),
            config.mesh_res_x,
            config.mesh_res_y(),
        );
        let target_areas = mesh.target_areas_from_image(pixels);
        tracing::info!(
            vertices = mesh.vertex_count(),
            triangles = mesh.triangle_count(),
            res_x,
            res_y,
            "engine initialized"
        );

        Ok(Self {
            config,
            mesh,
            phi: Grid::new(res_x, res_y),
            target_areas,
            errors: Vec::new(),
            target_cells: Vec::new(),
            raster: Grid::new(res_x, res_y),
            gradient: (Grid::new(res_x, res_y), Grid::new(res_x, res_y)),
            height_grid: Grid::new(res_x, res_y),
            divergence: Grid::new(res_x, res_y),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn mesh(&self) -> &Mesh {
        &self.mesh
    }

    pub fn mesh_mut(&mut self) -> &mut Mesh {
        &mut self.mesh
    }

    /// Image-derived per-vertex target areas
    pub fn target_areas(&self) -> &[f64] {
        &self.target_areas
    }

    /// Warm-started transport potential
    pub fn phi(&self) -> &Grid {
        &self.phi
    }

    /// Last rasterized error grid
    pub fn raster(&self) -> &Grid {
        &self.raster
    }

    /// Last potential gradient components
    pub fn gradient(&self) -> (&Grid, &Grid) {
        (&self.gradient.0, &self.gradient.1)
    }

    /// Last solved height grid
    pub fn height_grid(&self) -> &Grid {
        &self.height_grid
    }

    /// Last normal divergence grid
    pub fn divergence_grid(&self) -> &Grid {
        &self.divergence
    }

    /// Last per-vertex area errors
    pub fn errors(&self) -> &[f64] {
        &self.errors
    }

    /// Last target dual cells
    pub fn target_cells(&self) -> &[Vec<DVec3>] {
        &self.target_cells
    }

    /// Extrude the solved surface into a closed solid
    pub fn solidify(&self) -> crate::mesh::SolidMesh {
        self.mesh
            .solidify(self.config.thickness, self.config.height_surface)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_config_derived_resolutions() {
        let config = Config::default()
            .with_mesh_resolution(32)
            .with_aspect_ratio(2.0);
        assert_eq!(config.mesh_res_y(), 16);
        assert_eq!(config.resolution_x(), 128);
        assert_eq!(config.resolution_y(), 64);
        assert_relative_eq!(config.height(), 50.0);
    }

    #[test]
    fn test_config_rejects_bad_parameters() {
        assert!(Config::default().with_width(-1.0).validate().is_err());
        assert!(Config::default().with_aspect_ratio(0.0).validate().is_err());
        assert!(Config::default().with_mesh_resolution(1).validate().is_err());
        let mut config = Config::default();
        config.refractive_index = 0.9;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_engine_rejects_mismatched_image() {
        let config = Config::default().with_mesh_resolution(8);
        let pixels = Grid::new(10, 10);
        assert!(Engine::new(config, &pixels).is_err());
    }

    #[test]
    fn test_engine_initializes_targets() {
        let config = Config::default().with_mesh_resolution(8).with_width(10.0);
        let pixels = Grid::from_fn(32, 32, |_, _| 1.0);
        let engine = Engine::new(config, &pixels).unwrap();
        let total: f64 = engine.target_areas().iter().sum();
        assert_relative_eq!(total, 100.0, epsilon = 1e-9 * 100.0);
    }
}
