//! Triangular lens mesh with paired source and target vertex lattices.
//!
//! The source lattice is the fixed regular grid over the slab rectangle;
//! the target lattice starts congruent to it and is deformed by the
//! transport solver. Connectivity is shared and fixed at construction.

mod bvh;
mod dual;
mod raster;

pub use bvh::Bvh;
pub use dual::{calculate_errors, cell_areas};

use crate::engine::HeightSurface;
use glam::{DVec2, DVec3};

/// Default BVH leaf capacity
pub const BVH_MAX_LEAF_SIZE: usize = 1;
/// Default BVH depth limit
pub const BVH_MAX_DEPTH: usize = 30;

/// Lens mesh: a regular `res_x` x `res_y` vertex lattice over
/// `[0, width] x [0, height]`, triangulated two triangles per quad.
#[derive(Debug, Clone)]
pub struct Mesh {
    /// Physical slab width
    pub width: f64,
    /// Physical slab height
    pub height: f64,
    /// Vertices per lattice row
    pub res_x: usize,
    /// Lattice rows
    pub res_y: usize,
    /// Fixed lattice; `z` later carries the solved surface height
    pub source_points: Vec<DVec3>,
    /// Transport parameterization, mutated each transport step
    pub target_points: Vec<DVec3>,
    /// Vertex index triples, consistent positive winding
    pub triangles: Vec<[usize; 3]>,
    /// Incident triangles per vertex, in angular ring order
    neighbors: Vec<Vec<usize>>,
    /// Edge-connected vertex neighbors, derived from the triangles
    vertex_ring: Vec<Vec<usize>>,
    bvh: Option<Bvh>,
}

impl Mesh {
    /// Build the lattice and its fixed connectivity
    pub fn new(width: f64, height: f64, res_x: usize, res_y: usize) -> Self {
        assert!(res_x >= 2 && res_y >= 2, "mesh needs at least a 2x2 lattice");
        let mut source_points = Vec::with_capacity(res_x * res_y);
        for row in 0..res_y {
            for col in 0..res_x {
                source_points.push(DVec3::new(
                    col as f64 / (res_x - 1) as f64 * width,
                    row as f64 / (res_y - 1) as f64 * height,
                    0.0,
                ));
            }
        }

        let mut triangles = Vec::with_capacity((res_x - 1) * (res_y - 1) * 2);
        for row in 0..res_y - 1 {
            for col in 0..res_x - 1 {
                let a = row * res_x + col;
                let b = a + 1;
                let c = a + res_x;
                let d = c + 1;
                // Lower-left and upper-right split, both wound positive
                triangles.push([a, b, c]);
                triangles.push([b, d, c]);
            }
        }

        let neighbors = build_triangle_rings(&source_points, &triangles);
        let vertex_ring = build_vertex_rings(source_points.len(), &triangles);

        Self {
            width,
            height,
            res_x,
            res_y,
            target_points: source_points.clone(),
            source_points,
            triangles,
            neighbors,
            vertex_ring,
            bvh: None,
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.source_points.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    /// Ring of incident triangles around a vertex, in angular order
    pub fn triangle_ring(&self, vertex: usize) -> &[usize] {
        &self.neighbors[vertex]
    }

    pub(crate) fn grid_index(&self, row: usize, col: usize) -> usize {
        row * self.res_x + col
    }

    /// Lattice position `(row, col)` of a vertex index
    pub(crate) fn grid_coords(&self, vertex: usize) -> (usize, usize) {
        (vertex / self.res_x, vertex % self.res_x)
    }

    pub(crate) fn is_boundary(&self, vertex: usize) -> bool {
        let (row, col) = self.grid_coords(vertex);
        row == 0 || row == self.res_y - 1 || col == 0 || col == self.res_x - 1
    }

    /// Signed area of a triangle in the target parameterization
    pub fn target_triangle_area(&self, tri: [usize; 3]) -> f64 {
        let [a, b, c] = tri;
        let p = self.target_points[a].truncate();
        let q = self.target_points[b].truncate();
        let r = self.target_points[c].truncate();
        (q - p).perp_dot(r - p) / 2.0
    }

    /// Advance the target lattice along a per-vertex flow without inverting
    /// any triangle.
    ///
    /// For each triangle the signed area along the flow is a quadratic in
    /// the step parameter; the admissible step is capped below its smallest
    /// positive root. The global parameter is `safety` times the tightest
    /// triangle cap, boundary vertices are constrained to slide along the
    /// slab rectangle, and corners stay pinned. Returns the largest
    /// displacement actually applied, which the transport driver uses as
    /// its convergence measure.
    pub fn step_grid(&mut self, dx: &[f64], dy: &[f64], safety: f64) -> f64 {
        assert_eq!(dx.len(), self.vertex_count());
        assert_eq!(dy.len(), self.vertex_count());

        let mut flow: Vec<DVec2> = dx
            .iter()
            .zip(dy)
            .map(|(&x, &y)| DVec2::new(x, y))
            .collect();
        for (i, d) in flow.iter_mut().enumerate() {
            let (row, col) = self.grid_coords(i);
            if row == 0 || row == self.res_y - 1 {
                d.y = 0.0;
            }
            if col == 0 || col == self.res_x - 1 {
                d.x = 0.0;
            }
        }

        let mut t_max: f64 = 1.0;
        for &tri in &self.triangles {
            let [a, b, c] = tri;
            let p = self.target_points[a].truncate();
            let e1 = self.target_points[b].truncate() - p;
            let e2 = self.target_points[c].truncate() - p;
            let f1 = flow[b] - flow[a];
            let f2 = flow[c] - flow[a];

            // 2 * area(t) = c0 + c1 t + c2 t^2
            let c0 = e1.perp_dot(e2);
            let c1 = e1.perp_dot(f2) + f1.perp_dot(e2);
            let c2 = f1.perp_dot(f2);

            if c0 <= 0.0 {
                tracing::warn!(triangle = ?tri, area = c0 / 2.0, "skipping degenerate triangle in step");
                continue;
            }
            if let Some(root) = smallest_positive_root(c2, c1, c0) {
                t_max = t_max.min(root);
            }
        }

        let t = safety * t_max;
        let mut max_displacement = 0.0f64;
        for (point, d) in self.target_points.iter_mut().zip(&flow) {
            let applied = t * *d;
            point.x += applied.x;
            point.y += applied.y;
            max_displacement = max_displacement.max(applied.length());
        }
        self.bvh = None;
        max_displacement
    }

    /// Relax the target lattice toward each vertex's neighbor average.
    ///
    /// Interior vertices move by `alpha` of the way to the mean of their
    /// edge-connected neighbors, capped at a full relaxation step.
    /// Boundary vertices only slide along their boundary edge; corners are
    /// pinned.
    pub fn laplacian_smoothing(&mut self, alpha: f64) {
        let alpha = alpha.clamp(0.0, 1.0);
        let current = self.target_points.clone();
        for i in 0..current.len() {
            let (row, col) = self.grid_coords(i);
            let on_x_edge = col == 0 || col == self.res_x - 1;
            let on_y_edge = row == 0 || row == self.res_y - 1;
            if on_x_edge && on_y_edge {
                continue;
            }
            if on_x_edge || on_y_edge {
                // Slide along the boundary line: smooth the tangential
                // coordinate, snap the normal one back onto the rectangle
                let (p, q) = if on_y_edge {
                    (
                        current[self.grid_index(row, col - 1)],
                        current[self.grid_index(row, col + 1)],
                    )
                } else {
                    (
                        current[self.grid_index(row - 1, col)],
                        current[self.grid_index(row + 1, col)],
                    )
                };
                let mid = (p + q) / 2.0;
                let point = &mut self.target_points[i];
                if on_y_edge {
                    point.x += alpha * (mid.x - point.x);
                    point.y = if row == 0 { 0.0 } else { self.height };
                } else {
                    point.y += alpha * (mid.y - point.y);
                    point.x = if col == 0 { 0.0 } else { self.width };
                }
            } else {
                let ring = &self.vertex_ring[i];
                let mean = ring.iter().map(|&v| current[v]).sum::<DVec3>() / ring.len() as f64;
                let point = &mut self.target_points[i];
                point.x += alpha * (mean.x - point.x);
                point.y += alpha * (mean.y - point.y);
            }
        }
        self.bvh = None;
    }

    /// Rebuild the point-location index over the target triangles
    pub fn build_bvh(&mut self, max_leaf_size: usize, max_depth: usize) {
        self.bvh = Some(Bvh::build(
            &self.target_points,
            &self.triangles,
            max_leaf_size,
            max_depth,
        ));
    }

    pub fn bvh(&self) -> Option<&Bvh> {
        self.bvh.as_ref()
    }

    /// Locate the target triangle containing `p`, with its barycentric
    /// coordinates. Falls back to `None` when no index has been built.
    pub fn locate_target_point(&self, p: DVec2, epsilon: f64) -> Option<(usize, [f64; 3])> {
        self.bvh
            .as_ref()?
            .locate(&self.target_points, &self.triangles, p, epsilon)
    }

    /// Per-vertex surface slope fields `(h_x, h_y)` from Snell's law.
    ///
    /// The lens point for vertex `i` sits on the lattice that becomes the
    /// physical front surface: the source lattice when the heights are
    /// solved on it, the target lattice otherwise. The incoming `(0, 0, 1)`
    /// ray must refract onto the ray reaching the screen point at
    /// `focal_length` above the paired vertex of the other lattice. The
    /// surface normal is the direction `eta * incoming - transmitted`; the
    /// returned values are the equivalent height-field slopes `-n_x / n_z`
    /// and `-n_y / n_z`.
    pub fn calculate_refractive_normals(
        &self,
        focal_length: f64,
        eta: f64,
        heights: &[f64],
        surface: HeightSurface,
    ) -> (Vec<f64>, Vec<f64>) {
        assert_eq!(heights.len(), self.vertex_count());
        let mut slope_x = Vec::with_capacity(self.vertex_count());
        let mut slope_y = Vec::with_capacity(self.vertex_count());
        for i in 0..self.vertex_count() {
            let (lens, screen) = match surface {
                HeightSurface::SourceSurface => (self.source_points[i], self.target_points[i]),
                HeightSurface::TargetSurface => (self.target_points[i], self.source_points[i]),
            };
            let transmitted =
                DVec3::new(screen.x - lens.x, screen.y - lens.y, focal_length - heights[i])
                    .normalize();
            let denom = eta - transmitted.z;
            slope_x.push(transmitted.x / denom);
            slope_y.push(transmitted.y / denom);
        }
        (slope_x, slope_y)
    }

    /// Write a solved height vector into the source lattice
    pub fn set_source_heights(&mut self, heights: &[f64]) {
        assert_eq!(heights.len(), self.vertex_count());
        for (point, &h) in self.source_points.iter_mut().zip(heights) {
            point.z = h;
        }
    }

    /// Write a solved height vector into the target lattice
    pub fn set_target_heights(&mut self, heights: &[f64]) {
        assert_eq!(heights.len(), self.vertex_count());
        for (point, &h) in self.target_points.iter_mut().zip(heights) {
            point.z = h;
        }
    }

    /// Extrude the solved surface into a closed, printable solid.
    ///
    /// The front face carries the chosen lattice with its heights, the back
    /// face is flat at `z = -thickness`, and the boundary is stitched with
    /// wall quads. All faces wind outward.
    pub fn solidify(&self, thickness: f64, surface: HeightSurface) -> SolidMesh {
        let front: &[DVec3] = match surface {
            HeightSurface::SourceSurface => &self.source_points,
            HeightSurface::TargetSurface => &self.target_points,
        };
        let n = front.len();
        let mut vertices = Vec::with_capacity(2 * n);
        vertices.extend_from_slice(front);
        vertices.extend(front.iter().map(|p| DVec3::new(p.x, p.y, -thickness)));

        let mut triangles = Vec::with_capacity(self.triangles.len() * 2 + 4 * (self.res_x + self.res_y));
        // Front face keeps the lattice winding (outward +z)
        triangles.extend_from_slice(&self.triangles);
        // Back face reversed (outward -z)
        triangles.extend(self.triangles.iter().map(|&[a, b, c]| [a + n, c + n, b + n]));
        // Walls along the counter-clockwise boundary loop
        for (u, v) in self.boundary_loop() {
            triangles.push([u, u + n, v + n]);
            triangles.push([u, v + n, v]);
        }

        SolidMesh {
            vertices,
            triangles,
        }
    }

    /// Boundary edges in counter-clockwise order (interior on the left)
    fn boundary_loop(&self) -> Vec<(usize, usize)> {
        let rx = self.res_x;
        let ry = self.res_y;
        let mut edges = Vec::with_capacity(2 * (rx + ry) - 4);
        for col in 0..rx - 1 {
            edges.push((self.grid_index(0, col), self.grid_index(0, col + 1)));
        }
        for row in 0..ry - 1 {
            edges.push((self.grid_index(row, rx - 1), self.grid_index(row + 1, rx - 1)));
        }
        for col in (1..rx).rev() {
            edges.push((self.grid_index(ry - 1, col), self.grid_index(ry - 1, col - 1)));
        }
        for row in (1..ry).rev() {
            edges.push((self.grid_index(row, 0), self.grid_index(row - 1, 0)));
        }
        edges
    }
}

/// A closed triangle mesh produced by [`Mesh::solidify`]
#[derive(Debug, Clone)]
pub struct SolidMesh {
    pub vertices: Vec<DVec3>,
    pub triangles: Vec<[usize; 3]>,
}

/// Smallest positive root of `c2 t^2 + c1 t + c0 = 0`, if any
fn smallest_positive_root(c2: f64, c1: f64, c0: f64) -> Option<f64> {
    const TINY: f64 = 1e-30;
    if c2.abs() <= TINY {
        if c1.abs() <= TINY {
            return None;
        }
        let root = -c0 / c1;
        return (root > 0.0).then_some(root);
    }
    let disc = c1 * c1 - 4.0 * c2 * c0;
    if disc < 0.0 {
        return None;
    }
    let sq = disc.sqrt();
    // Numerically stable split of the two roots
    let q = -0.5 * (c1 + c1.signum() * sq);
    let mut roots = [q / c2, if q.abs() <= TINY { f64::NAN } else { c0 / q }];
    roots.sort_by(|a, b| a.total_cmp(b));
    roots.into_iter().find(|&r| r.is_finite() && r > 0.0)
}

/// Incident triangles per vertex, sorted by centroid angle around the
/// vertex and rotated so consecutive entries share an edge even on the
/// boundary (the largest angular gap marks the open side of the fan).
fn build_triangle_rings(points: &[DVec3], triangles: &[[usize; 3]]) -> Vec<Vec<usize>> {
    let mut rings: Vec<Vec<(f64, usize)>> = vec![Vec::new(); points.len()];
    for (t, tri) in triangles.iter().enumerate() {
        let centroid = (points[tri[0]] + points[tri[1]] + points[tri[2]]) / 3.0;
        for &v in tri {
            let d = centroid.truncate() - points[v].truncate();
            rings[v].push((d.y.atan2(d.x), t));
        }
    }
    rings
        .into_iter()
        .map(|mut ring| {
            ring.sort_by(|a, b| a.0.total_cmp(&b.0));
            // Rotate past the widest gap so open fans start at one end
            let m = ring.len();
            if m > 1 {
                let mut widest = 0;
                let mut widest_gap = f64::NEG_INFINITY;
                for k in 0..m {
                    let next = ring[(k + 1) % m].0 + if k + 1 == m { std::f64::consts::TAU } else { 0.0 };
                    let gap = next - ring[k].0;
                    if gap > widest_gap {
                        widest_gap = gap;
                        widest = (k + 1) % m;
                    }
                }
                ring.rotate_left(widest);
            }
            ring.into_iter().map(|(_, t)| t).collect()
        })
        .collect()
}

/// Edge-connected neighbor vertices per vertex
fn build_vertex_rings(vertex_count: usize, triangles: &[[usize; 3]]) -> Vec<Vec<usize>> {
    let mut rings: Vec<Vec<usize>> = vec![Vec::new(); vertex_count];
    for tri in triangles {
        for k in 0..3 {
            let a = tri[k];
            let b = tri[(k + 1) % 3];
            if !rings[a].contains(&b) {
                rings[a].push(b);
            }
            if !rings[b].contains(&a) {
                rings[b].push(a);
            }
        }
    }
    rings
}
