//! OBJ file export

use crate::Result;
use crate::mesh::SolidMesh;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Export a solidified lens mesh to OBJ format
pub fn export_obj(solid: &SolidMesh, path: &Path) -> Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);

    // Header
    writeln!(writer, "# Caustica OBJ Export")?;
    writeln!(writer, "# Vertices: {}", solid.vertices.len())?;
    writeln!(writer, "# Triangles: {}", solid.triangles.len())?;
    writeln!(writer)?;

    for v in &solid.vertices {
        writeln!(writer, "v {} {} {}", v.x, v.y, v.z)?;
    }
    writeln!(writer)?;

    // Faces (OBJ uses 1-based indexing)
    for tri in &solid.triangles {
        writeln!(writer, "f {} {} {}", tri[0] + 1, tri[1] + 1, tri[2] + 1)?;
    }

    writer.flush()?;
    Ok(())
}
