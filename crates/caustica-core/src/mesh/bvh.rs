//! Bounding volume hierarchy over the target-parameterization triangles.
//!
//! Top-down build, splitting triangle centroids at the median of the
//! longest box axis. Queries answer point-location: which triangle
//! contains a point, and with which barycentric coordinates.

use crate::polygon;
use glam::{DVec2, DVec3};

#[derive(Debug, Clone)]
struct Node {
    min: DVec2,
    max: DVec2,
    kind: NodeKind,
}

#[derive(Debug, Clone)]
enum NodeKind {
    Leaf { start: usize, count: usize },
    Internal { left: usize, right: usize },
}

/// Point-location index over a triangle set
#[derive(Debug, Clone)]
pub struct Bvh {
    nodes: Vec<Node>,
    /// Triangle indices, permuted so every leaf owns a contiguous slice
    order: Vec<usize>,
    pad: f64,
}

impl Bvh {
    /// Build the tree over the xy projections of `triangles`.
    ///
    /// `max_leaf_size` bounds how many triangles a leaf may hold unless
    /// `max_depth` forces an early leaf.
    pub fn build(
        points: &[DVec3],
        triangles: &[[usize; 3]],
        max_leaf_size: usize,
        max_depth: usize,
    ) -> Self {
        let bounds: Vec<(DVec2, DVec2)> = triangles
            .iter()
            .map(|&[a, b, c]| {
                let pa = points[a].truncate();
                let pb = points[b].truncate();
                let pc = points[c].truncate();
                (pa.min(pb).min(pc), pa.max(pb).max(pc))
            })
            .collect();
        let centroids: Vec<DVec2> = bounds.iter().map(|(lo, hi)| (*lo + *hi) / 2.0).collect();

        let mut order: Vec<usize> = (0..triangles.len()).collect();
        let mut bvh = Self {
            nodes: Vec::with_capacity(triangles.len() * 2),
            order: Vec::new(),
            pad: 0.0,
        };
        let extent = bounds
            .iter()
            .fold(f64::NEG_INFINITY, |acc, (lo, hi)| acc.max((*hi - *lo).max_element()))
            .max(1.0);
        bvh.pad = 1e-9 * extent;
        if !triangles.is_empty() {
            bvh.split(&mut order, 0, &bounds, &centroids, max_leaf_size.max(1), max_depth);
        }
        bvh.order = order;
        bvh
    }

    fn split(
        &mut self,
        order: &mut [usize],
        start: usize,
        bounds: &[(DVec2, DVec2)],
        centroids: &[DVec2],
        max_leaf_size: usize,
        depth_left: usize,
    ) -> usize {
        let mut min = DVec2::splat(f64::INFINITY);
        let mut max = DVec2::splat(f64::NEG_INFINITY);
        for &t in order.iter() {
            min = min.min(bounds[t].0);
            max = max.max(bounds[t].1);
        }

        let index = self.nodes.len();
        self.nodes.push(Node {
            min,
            max,
            kind: NodeKind::Leaf {
                start,
                count: order.len(),
            },
        });

        if order.len() <= max_leaf_size || depth_left == 0 {
            return index;
        }

        let size = max - min;
        let mid = order.len() / 2;
        if size.x >= size.y {
            order.select_nth_unstable_by(mid, |&a, &b| centroids[a].x.total_cmp(&centroids[b].x));
        } else {
            order.select_nth_unstable_by(mid, |&a, &b| centroids[a].y.total_cmp(&centroids[b].y));
        }

        let (front, back) = order.split_at_mut(mid);
        let left = self.split(front, start, bounds, centroids, max_leaf_size, depth_left - 1);
        let right = self.split(back, start + mid, bounds, centroids, max_leaf_size, depth_left - 1);
        self.nodes[index].kind = NodeKind::Internal { left, right };
        index
    }

    /// Find a triangle containing `p`, with its barycentric coordinates
    pub fn locate(
        &self,
        points: &[DVec3],
        triangles: &[[usize; 3]],
        p: DVec2,
        epsilon: f64,
    ) -> Option<(usize, [f64; 3])> {
        if self.nodes.is_empty() {
            return None;
        }
        let mut stack = vec![0usize];
        while let Some(node_index) = stack.pop() {
            let node = &self.nodes[node_index];
            if p.x < node.min.x - self.pad
                || p.x > node.max.x + self.pad
                || p.y < node.min.y - self.pad
                || p.y > node.max.y + self.pad
            {
                continue;
            }
            match node.kind {
                NodeKind::Internal { left, right } => {
                    stack.push(left);
                    stack.push(right);
                }
                NodeKind::Leaf { start, count } => {
                    for &t in &self.order[start..start + count] {
                        let [a, b, c] = triangles[t];
                        let l = polygon::barycentric(
                            p,
                            points[a].truncate(),
                            points[b].truncate(),
                            points[c].truncate(),
                        );
                        if let Some(l) = l {
                            if l.iter().all(|&v| v >= -epsilon) {
                                return Some((t, l));
                            }
                        }
                    }
                }
            }
        }
        None
    }
}
