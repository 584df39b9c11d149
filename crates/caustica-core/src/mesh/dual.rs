//! Median dual cells and the per-vertex area bookkeeping built on them.
//!
//! The dual cell of an interior vertex alternates the centroids of its
//! incident triangles with the midpoints of its incident edges, in ring
//! order. Boundary cells close along the domain boundary through the two
//! boundary edge midpoints and the vertex itself. The cells tile the mesh
//! domain exactly once.

use super::Mesh;
use crate::grid::Grid;
use crate::polygon::{self, AREA_EPSILON};
use glam::{DVec2, DVec3};

impl Mesh {
    /// Dual cells of the fixed source lattice
    pub fn build_source_dual_cells(&self) -> Vec<Vec<DVec3>> {
        self.build_dual_cells(&self.source_points)
    }

    /// Dual cells of the current target parameterization
    pub fn build_target_dual_cells(&self) -> Vec<Vec<DVec3>> {
        self.build_dual_cells(&self.target_points)
    }

    fn build_dual_cells(&self, points: &[DVec3]) -> Vec<Vec<DVec3>> {
        (0..self.vertex_count())
            .map(|i| self.build_dual_cell(i, points))
            .collect()
    }

    fn build_dual_cell(&self, vertex: usize, points: &[DVec3]) -> Vec<DVec3> {
        let ring = self.triangle_ring(vertex);
        let m = ring.len();
        let centroid = |t: usize| -> DVec3 {
            let [a, b, c] = self.triangles[t];
            (points[a] + points[b] + points[c]) / 3.0
        };
        let midpoint = |v: usize| (points[vertex] + points[v]) / 2.0;

        let mut cell = Vec::with_capacity(2 * m + 2);
        if !self.is_boundary(vertex) {
            // Closed ring: centroid, shared edge midpoint, centroid, ...
            for k in 0..m {
                cell.push(centroid(ring[k]));
                cell.push(midpoint(self.shared_ring_vertex(vertex, ring[k], ring[(k + 1) % m])));
            }
        } else {
            // Open fan: boundary midpoint, centroids and shared midpoints,
            // boundary midpoint, then the vertex itself to close the cell
            cell.push(midpoint(self.outer_ring_vertex(vertex, ring, true)));
            for k in 0..m {
                cell.push(centroid(ring[k]));
                if k + 1 < m {
                    cell.push(midpoint(self.shared_ring_vertex(vertex, ring[k], ring[k + 1])));
                }
            }
            cell.push(midpoint(self.outer_ring_vertex(vertex, ring, false)));
            cell.push(points[vertex]);
            if cell_area(&cell) < 0.0 {
                cell.reverse();
            }
        }
        cell
    }

    /// The vertex completing the edge shared by two consecutive ring triangles
    fn shared_ring_vertex(&self, vertex: usize, t: usize, u: usize) -> usize {
        let other = self.triangles[u];
        *self.triangles[t]
            .iter()
            .find(|v| **v != vertex && other.contains(v))
            .unwrap_or_else(|| panic!("ring triangles {t} and {u} share no edge through {vertex}"))
    }

    /// The vertex completing the boundary-side edge at one end of an open fan
    fn outer_ring_vertex(&self, vertex: usize, ring: &[usize], at_start: bool) -> usize {
        let end = if at_start { 0 } else { ring.len() - 1 };
        let tri = self.triangles[ring[end]];
        if ring.len() == 1 {
            // Corner fan of one triangle: both other vertices bound the
            // cell; pick one per end and let the caller fix the winding.
            let mut others = tri.iter().filter(|v| **v != vertex);
            let first = *others.next().unwrap_or(&vertex);
            let second = *others.next().unwrap_or(&vertex);
            return if at_start { first } else { second };
        }
        let inner = if at_start { ring[1] } else { ring[end - 1] };
        let shared = self.shared_ring_vertex(vertex, ring[end], inner);
        *tri.iter()
            .find(|v| **v != vertex && **v != shared)
            .unwrap_or_else(|| panic!("degenerate fan triangle at vertex {vertex}"))
    }

    /// Image-derived target area for every vertex.
    ///
    /// Each source dual cell is clipped against the pixel rectangles it
    /// overlaps, accumulating `intensity * clipped_area`; the result is
    /// renormalized so the targets sum to the measured source cell total
    /// rather than the nominal slab area.
    pub fn target_areas_from_image(&self, pixels: &Grid) -> Vec<f64> {
        let cells = self.build_source_dual_cells();
        let source_total: f64 = cell_areas(&cells).iter().sum();
        let sx = pixels.width() as f64 / self.width;
        let sy = pixels.height() as f64 / self.height;

        let mut weighted: Vec<f64> = cells
            .iter()
            .map(|cell| {
                let poly: Vec<DVec2> = cell
                    .iter()
                    .map(|p| DVec2::new(p.x * sx, p.y * sy))
                    .collect();
                integrate_over_pixels(&poly, pixels)
            })
            .collect();

        let total: f64 = weighted.iter().sum();
        if total <= AREA_EPSILON {
            tracing::warn!("image carries no intensity, falling back to uniform target areas");
            return cell_areas(&cells);
        }
        let scale = source_total / total;
        for w in &mut weighted {
            *w *= scale;
        }
        weighted
    }
}

/// Signed area of a dual cell's xy projection
fn cell_area(cell: &[DVec3]) -> f64 {
    let poly: Vec<DVec2> = cell.iter().map(|p| p.truncate()).collect();
    polygon::signed_area(&poly)
}

/// Signed areas of a batch of dual cells
pub fn cell_areas(cells: &[Vec<DVec3>]) -> Vec<f64> {
    cells.iter().map(|c| cell_area(c)).collect()
}

/// Per-vertex area errors `source - target`, shifted to sum to zero.
///
/// The zero sum is the compatibility condition the Poisson solve needs;
/// renormalizing explicitly absorbs the floating error left by the two
/// area computations.
pub fn calculate_errors(source_areas: &[f64], target_areas: &[f64]) -> Vec<f64> {
    assert_eq!(source_areas.len(), target_areas.len());
    let mut errors: Vec<f64> = source_areas
        .iter()
        .zip(target_areas)
        .map(|(&s, &t)| s - t)
        .collect();
    let mean = errors.iter().sum::<f64>() / errors.len().max(1) as f64;
    for e in &mut errors {
        *e -= mean;
    }
    errors
}

/// `intensity * clipped_area` accumulated over every pixel the polygon
/// overlaps; polygon given in pixel coordinates
fn integrate_over_pixels(poly: &[DVec2], pixels: &Grid) -> f64 {
    let mut min = DVec2::splat(f64::INFINITY);
    let mut max = DVec2::splat(f64::NEG_INFINITY);
    for p in poly {
        min = min.min(*p);
        max = max.max(*p);
    }
    if !min.x.is_finite() {
        return 0.0;
    }
    let col_lo = (min.x.floor() as i64).clamp(0, pixels.width() as i64 - 1) as usize;
    let col_hi = ((max.x.ceil() as i64) - 1).clamp(0, pixels.width() as i64 - 1) as usize;
    let row_lo = (min.y.floor() as i64).clamp(0, pixels.height() as i64 - 1) as usize;
    let row_hi = ((max.y.ceil() as i64) - 1).clamp(0, pixels.height() as i64 - 1) as usize;

    let mut acc = 0.0;
    for row in row_lo..=row_hi {
        for col in col_lo..=col_hi {
            let lo = DVec2::new(col as f64, row as f64);
            let clipped = polygon::clip_to_rect(poly, lo, lo + DVec2::ONE);
            let area = polygon::signed_area(&clipped);
            if area.abs() <= AREA_EPSILON {
                continue;
            }
            acc += pixels[(row, col)] * area;
        }
    }
    acc
}
