//! # Caustica Core
//!
//! Computes the back-surface geometry of a refractive caustic lens: a
//! transparent slab whose surface redistributes parallel light into a
//! prescribed grayscale image on a distant screen.
//!
//! The computation runs in two stages. An optimal-transport relaxation
//! deforms the target parameterization of a triangular lens mesh until
//! every median dual cell matches its image-derived target area; a height
//! solver then turns the refractive normals of the converged map into a
//! surface heightfield through a Poisson problem on the normal divergence.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use caustica_core::prelude::*;
//!
//! let config = Config::default()
//!     .with_width(100.0)
//!     .with_focal_length(200.0)
//!     .with_mesh_resolution(64);
//!
//! // `pixels` is the grayscale image resampled to the raster resolution
//! let mut engine = Engine::new(config, &pixels)?;
//! engine.solve_transport();
//! engine.solve_height();
//! export_obj(&engine.solidify(), Path::new("lens.obj"))?;
//! ```
//!
//! ## Units and Conventions
//!
//! - **Lengths**: arbitrary physical units, typically millimeters
//! - **Grids**: row-major `(row, col)` indexing, `f64` throughout
//! - **Winding**: counter-clockwise triangles carry positive signed area

pub mod engine;
pub mod export;
pub mod grid;
pub mod mesh;
pub mod poisson;
pub mod polygon;

mod error;
mod height;
mod transport;

pub use error::{Error, Result};
pub use transport::TransportSummary;

/// Prelude module for convenient imports
pub mod prelude {
    // Engine and configuration
    pub use crate::engine::{Config, Engine, HeightSurface};

    // Grids and mesh machinery
    pub use crate::grid::Grid;
    pub use crate::mesh::{Bvh, Mesh, SolidMesh};

    // Export
    pub use crate::export::{
        export_cells_svg, export_grid_png, export_inverted_map_svg, export_obj,
        export_parameterization_svg,
    };

    // Math (re-export glam)
    pub use glam::{DVec2, DVec3};

    // Error handling
    pub use crate::{Error, Result, TransportSummary};
}
