//! SVG exports of the dual cells, the deformed parameterization and the
//! inverted transport map.

use crate::Result;
use crate::mesh::{BVH_MAX_DEPTH, BVH_MAX_LEAF_SIZE, Mesh};
use glam::{DVec2, DVec3};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Export dual cells filled by a per-cell scalar in `[0, 1]`
pub fn export_cells_svg(
    cells: &[Vec<DVec3>],
    values: &[f64],
    width: f64,
    height: f64,
    path: &Path,
) -> Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    write_header(&mut writer, width, height)?;
    for (cell, value) in cells.iter().zip(values) {
        let shade = (value.clamp(0.0, 1.0) * 255.0).round() as u8;
        write!(writer, "  <polygon points=\"")?;
        write_points(&mut writer, cell.iter().map(|p| p.truncate()))?;
        writeln!(
            writer,
            "\" fill=\"rgb({shade},{shade},{shade})\" stroke=\"black\" stroke-width=\"0.1\"/>"
        )?;
    }
    writeln!(writer, "</svg>")?;
    writer.flush()?;
    Ok(())
}

/// Export the deformed target parameterization as a triangle wireframe
pub fn export_parameterization_svg(mesh: &Mesh, path: &Path) -> Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    write_header(&mut writer, mesh.width, mesh.height)?;
    for tri in &mesh.triangles {
        write!(writer, "  <polygon points=\"")?;
        write_points(
            &mut writer,
            tri.iter().map(|&v| mesh.target_points[v].truncate()),
        )?;
        writeln!(writer, "\" fill=\"none\" stroke=\"black\" stroke-width=\"0.1\"/>")?;
    }
    writeln!(writer, "</svg>")?;
    writer.flush()?;
    Ok(())
}

/// Export the inverted transport map.
///
/// Every source lattice node is located in the target mesh and mapped
/// back through the barycentric weights onto the source lattice; the
/// resulting inverse grid is drawn as row and column polylines. Rebuilds
/// the point-location index when the mesh has moved since the last build.
/// Nodes falling outside the deformed mesh are skipped.
pub fn export_inverted_map_svg(mesh: &mut Mesh, path: &Path) -> Result<()> {
    if mesh.bvh().is_none() {
        mesh.build_bvh(BVH_MAX_LEAF_SIZE, BVH_MAX_DEPTH);
    }

    let inverse: Vec<Option<DVec2>> = mesh
        .source_points
        .iter()
        .map(|p| {
            mesh.locate_target_point(p.truncate(), 1e-9).map(|(t, l)| {
                let [a, b, c] = mesh.triangles[t];
                l[0] * mesh.source_points[a].truncate()
                    + l[1] * mesh.source_points[b].truncate()
                    + l[2] * mesh.source_points[c].truncate()
            })
        })
        .collect();

    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    write_header(&mut writer, mesh.width, mesh.height)?;
    for row in 0..mesh.res_y {
        let nodes = (0..mesh.res_x).map(|col| inverse[row * mesh.res_x + col]);
        write_polyline(&mut writer, nodes)?;
    }
    for col in 0..mesh.res_x {
        let nodes = (0..mesh.res_y).map(|row| inverse[row * mesh.res_x + col]);
        write_polyline(&mut writer, nodes)?;
    }
    writeln!(writer, "</svg>")?;
    writer.flush()?;
    Ok(())
}

fn write_header<W: Write>(writer: &mut W, width: f64, height: f64) -> std::io::Result<()> {
    writeln!(
        writer,
        "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{width}\" height=\"{height}\" viewBox=\"0 0 {width} {height}\">"
    )
}

fn write_points<W: Write>(
    writer: &mut W,
    points: impl Iterator<Item = DVec2>,
) -> std::io::Result<()> {
    let mut first = true;
    for p in points {
        if !first {
            write!(writer, " ")?;
        }
        write!(writer, "{},{}", p.x, p.y)?;
        first = false;
    }
    Ok(())
}

fn write_polyline<W: Write>(
    writer: &mut W,
    nodes: impl Iterator<Item = Option<DVec2>>,
) -> std::io::Result<()> {
    let present: Vec<DVec2> = nodes.flatten().collect();
    if present.len() < 2 {
        return Ok(());
    }
    write!(writer, "  <polyline points=\"")?;
    write_points(writer, present.into_iter())?;
    writeln!(writer, "\" fill=\"none\" stroke=\"black\" stroke-width=\"0.1\"/>")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("caustica_test_{}", name))
    }

    #[test]
    fn test_export_cells_svg() {
        let mesh = Mesh::new(2.0, 2.0, 4, 4);
        let cells = mesh.build_target_dual_cells();
        let values = vec![0.5; cells.len()];
        let path = temp_path("cells.svg");
        export_cells_svg(&cells, &values, mesh.width, mesh.height, &path).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with("<svg"));
        assert_eq!(contents.matches("<polygon").count(), cells.len());

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_export_parameterization_svg() {
        let mesh = Mesh::new(1.0, 1.0, 5, 5);
        let path = temp_path("parameterization.svg");
        export_parameterization_svg(&mesh, &path).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.matches("<polygon").count(), mesh.triangle_count());

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_export_inverted_map_identity() {
        let mut mesh = Mesh::new(1.0, 1.0, 5, 5);
        let path = temp_path("inverted.svg");
        export_inverted_map_svg(&mut mesh, &path).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        // Identity parameterization inverts to the full row and column grid
        assert_eq!(contents.matches("<polyline").count(), 10);

        let _ = std::fs::remove_file(&path);
    }
}
