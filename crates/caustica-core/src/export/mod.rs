//! Export functionality: solid OBJ meshes, diagnostic PNGs and SVG views
//! of the transport parameterization.

mod obj;
mod png;
mod svg;

pub use obj::export_obj;
pub use png::export_grid_png;
pub use svg::{export_cells_svg, export_inverted_map_svg, export_parameterization_svg};
