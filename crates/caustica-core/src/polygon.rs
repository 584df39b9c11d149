//! Small convex polygon helpers: signed area, centroid, rectangle clipping
//! and barycentric coordinates.
//!
//! All polygons are flat `&[DVec2]` vertex lists in winding order. Signed
//! area is positive for counter-clockwise polygons.

use glam::DVec2;

/// Polygons with |area| at or below this are treated as zero-weight
pub const AREA_EPSILON: f64 = 1e-12;

/// Barycentric inclusion tolerance for point-in-triangle tests
pub const INSIDE_EPSILON: f64 = 1e-9;

/// Signed polygon area via the shoelace formula
pub fn signed_area(poly: &[DVec2]) -> f64 {
    if poly.len() < 3 {
        return 0.0;
    }
    let mut sum = 0.0;
    for (i, p) in poly.iter().enumerate() {
        let q = poly[(i + 1) % poly.len()];
        sum += p.x * q.y - q.x * p.y;
    }
    sum / 2.0
}

/// Area-weighted polygon centroid.
///
/// Computed as a triangle fan from the first vertex; fan triangles with
/// near-zero area are skipped. A fully degenerate polygon falls back to the
/// plain vertex average.
pub fn centroid(poly: &[DVec2]) -> DVec2 {
    if poly.is_empty() {
        return DVec2::ZERO;
    }
    let mut weighted = DVec2::ZERO;
    let mut total_area = 0.0;
    for i in 1..poly.len().saturating_sub(1) {
        let tri = [poly[0], poly[i], poly[i + 1]];
        let a = signed_area(&tri);
        if a.abs() <= AREA_EPSILON {
            continue;
        }
        weighted += (tri[0] + tri[1] + tri[2]) / 3.0 * a;
        total_area += a;
    }
    if total_area.abs() <= AREA_EPSILON {
        return poly.iter().sum::<DVec2>() / poly.len() as f64;
    }
    weighted / total_area
}

/// Clip a convex polygon against the axis-aligned rectangle `[min, max]`.
///
/// Sutherland-Hodgman against the four half-planes. The result may be
/// empty when the polygon lies entirely outside the rectangle.
pub fn clip_to_rect(poly: &[DVec2], min: DVec2, max: DVec2) -> Vec<DVec2> {
    #[derive(Clone, Copy)]
    enum Side {
        Left(f64),
        Right(f64),
        Bottom(f64),
        Top(f64),
    }

    impl Side {
        fn inside(self, p: DVec2) -> bool {
            match self {
                Side::Left(x) => p.x >= x,
                Side::Right(x) => p.x <= x,
                Side::Bottom(y) => p.y >= y,
                Side::Top(y) => p.y <= y,
            }
        }

        fn intersect(self, p: DVec2, q: DVec2) -> DVec2 {
            match self {
                Side::Left(x) | Side::Right(x) => {
                    let t = (x - p.x) / (q.x - p.x);
                    DVec2::new(x, p.y + t * (q.y - p.y))
                }
                Side::Bottom(y) | Side::Top(y) => {
                    let t = (y - p.y) / (q.y - p.y);
                    DVec2::new(p.x + t * (q.x - p.x), y)
                }
            }
        }
    }

    let sides = [
        Side::Left(min.x),
        Side::Right(max.x),
        Side::Bottom(min.y),
        Side::Top(max.y),
    ];

    let mut output = poly.to_vec();
    for side in sides {
        if output.is_empty() {
            break;
        }
        let input = std::mem::take(&mut output);
        for (i, &p) in input.iter().enumerate() {
            let q = input[(i + 1) % input.len()];
            let p_in = side.inside(p);
            let q_in = side.inside(q);
            if p_in {
                output.push(p);
                if !q_in {
                    output.push(side.intersect(p, q));
                }
            } else if q_in {
                output.push(side.intersect(p, q));
            }
        }
    }
    output
}

/// Barycentric coordinates of `p` in triangle `(a, b, c)`.
///
/// Returns `None` for degenerate triangles.
pub fn barycentric(p: DVec2, a: DVec2, b: DVec2, c: DVec2) -> Option<[f64; 3]> {
    let v0 = b - a;
    let v1 = c - a;
    let v2 = p - a;
    let denom = v0.perp_dot(v1);
    if denom.abs() <= AREA_EPSILON {
        return None;
    }
    let l1 = v2.perp_dot(v1) / denom;
    let l2 = v0.perp_dot(v2) / denom;
    Some([1.0 - l1 - l2, l1, l2])
}

/// Whether `p` lies inside triangle `(a, b, c)`, edges included
pub fn point_in_triangle(p: DVec2, a: DVec2, b: DVec2, c: DVec2) -> bool {
    match barycentric(p, a, b, c) {
        Some(l) => l.iter().all(|&v| v >= -INSIDE_EPSILON),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn unit_square() -> Vec<DVec2> {
        vec![
            DVec2::new(0.0, 0.0),
            DVec2::new(1.0, 0.0),
            DVec2::new(1.0, 1.0),
            DVec2::new(0.0, 1.0),
        ]
    }

    #[test]
    fn test_signed_area_ccw_positive() {
        assert_relative_eq!(signed_area(&unit_square()), 1.0);
        let mut cw = unit_square();
        cw.reverse();
        assert_relative_eq!(signed_area(&cw), -1.0);
    }

    #[test]
    fn test_centroid_of_square() {
        let c = centroid(&unit_square());
        assert_relative_eq!(c.x, 0.5);
        assert_relative_eq!(c.y, 0.5);
    }

    #[test]
    fn test_centroid_degenerate_polygon() {
        let line = [DVec2::new(0.0, 0.0), DVec2::new(2.0, 0.0), DVec2::new(4.0, 0.0)];
        let c = centroid(&line);
        assert_relative_eq!(c.x, 2.0);
        assert_relative_eq!(c.y, 0.0);
    }

    #[test]
    fn test_clip_polygon_inside_is_unchanged_area() {
        let clipped = clip_to_rect(&unit_square(), DVec2::splat(-1.0), DVec2::splat(2.0));
        assert_relative_eq!(signed_area(&clipped), 1.0);
    }

    #[test]
    fn test_clip_polygon_outside_is_empty() {
        let clipped = clip_to_rect(&unit_square(), DVec2::splat(5.0), DVec2::splat(6.0));
        assert!(clipped.is_empty());
    }

    #[test]
    fn test_clip_partial_overlap() {
        // Right half of the unit square
        let clipped = clip_to_rect(
            &unit_square(),
            DVec2::new(0.5, -1.0),
            DVec2::new(2.0, 2.0),
        );
        assert_relative_eq!(signed_area(&clipped), 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_barycentric_at_vertices_and_center() {
        let a = DVec2::new(0.0, 0.0);
        let b = DVec2::new(1.0, 0.0);
        let c = DVec2::new(0.0, 1.0);
        let at_a = barycentric(a, a, b, c).unwrap();
        assert_relative_eq!(at_a[0], 1.0);
        let mid = barycentric(DVec2::new(1.0 / 3.0, 1.0 / 3.0), a, b, c).unwrap();
        for l in mid {
            assert_relative_eq!(l, 1.0 / 3.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_point_in_triangle_includes_edges() {
        let a = DVec2::new(0.0, 0.0);
        let b = DVec2::new(2.0, 0.0);
        let c = DVec2::new(0.0, 2.0);
        assert!(point_in_triangle(DVec2::new(1.0, 0.0), a, b, c));
        assert!(point_in_triangle(DVec2::new(0.5, 0.5), a, b, c));
        assert!(!point_in_triangle(DVec2::new(2.0, 2.0), a, b, c));
    }
}
