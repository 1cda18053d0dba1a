//! 2D convex hull and perimeter.

use nalgebra::Point2;

/// Hulls with less area than this (m²) are degenerate.
pub const HULL_MIN_AREA_M2: f64 = 1e-10;

/// Convex hull of a point set with its perimeter.
#[derive(Debug, Clone, PartialEq)]
pub struct HullResult {
    /// Hull vertices, counter-clockwise, starting from the lowest x (then z).
    pub vertices: Vec<Point2<f64>>,
    /// Closed perimeter, `None` when the hull is not usable.
    pub perimeter: Option<f64>,
    pub area: f64,
    pub hull_ok: bool,
    /// Extent along x of the input points.
    pub width: Option<f64>,
    /// Extent along z of the input points.
    pub depth: Option<f64>,
    /// `[x_min, x_max, z_min, z_max]` of the input points.
    pub bbox: Option<[f64; 4]>,
}

/// Convex hull of `points` by Andrew's monotone chain.
///
/// Colinear points are dropped. Fewer than three points, fewer than three
/// hull vertices, an area under [`HULL_MIN_AREA_M2`] or a non-finite
/// perimeter all yield `hull_ok = false` with no perimeter.
pub fn convex_hull_perimeter(points: &[Point2<f64>]) -> HullResult {
    let bbox = bounding_box(points);
    let width = bbox.map(|b| b[1] - b[0]);
    let depth = bbox.map(|b| b[3] - b[2]);

    let vertices = if points.len() < 3 {
        points.to_vec()
    } else {
        monotone_chain(points)
    };

    let area = polygon_area(&vertices);
    let perimeter = closed_length(&vertices);
    let hull_ok = vertices.len() >= 3 && area >= HULL_MIN_AREA_M2 && perimeter.is_finite();

    HullResult {
        vertices,
        perimeter: hull_ok.then_some(perimeter),
        area,
        hull_ok,
        width,
        depth,
        bbox,
    }
}

fn monotone_chain(points: &[Point2<f64>]) -> Vec<Point2<f64>> {
    let mut pts = points.to_vec();
    pts.sort_by(|a, b| a.x.total_cmp(&b.x).then(a.y.total_cmp(&b.y)));
    pts.dedup();
    if pts.len() < 3 {
        return pts;
    }

    let mut lower: Vec<Point2<f64>> = Vec::new();
    for p in &pts {
        while lower.len() >= 2 && cross_2d(lower[lower.len() - 2], lower[lower.len() - 1], *p) <= 0.0
        {
            lower.pop();
        }
        lower.push(*p);
    }
    let mut upper: Vec<Point2<f64>> = Vec::new();
    for p in pts.iter().rev() {
        while upper.len() >= 2 && cross_2d(upper[upper.len() - 2], upper[upper.len() - 1], *p) <= 0.0
        {
            upper.pop();
        }
        upper.push(*p);
    }
    lower.pop();
    upper.pop();
    lower.extend(upper);
    lower
}

#[inline]
fn cross_2d(a: Point2<f64>, b: Point2<f64>, c: Point2<f64>) -> f64 {
    (b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x)
}

/// Shoelace area of a closed polygon.
fn polygon_area(vertices: &[Point2<f64>]) -> f64 {
    if vertices.len() < 3 {
        return 0.0;
    }
    let n = vertices.len();
    let twice: f64 = (0..n)
        .map(|i| {
            let (a, b) = (vertices[i], vertices[(i + 1) % n]);
            a.x * b.y - b.x * a.y
        })
        .sum();
    twice.abs() / 2.0
}

/// Sum of edge lengths including the closing edge.
fn closed_length(vertices: &[Point2<f64>]) -> f64 {
    let n = vertices.len();
    if n < 2 {
        return 0.0;
    }
    (0..n)
        .map(|i| (vertices[(i + 1) % n] - vertices[i]).norm())
        .sum()
}

fn bounding_box(points: &[Point2<f64>]) -> Option<[f64; 4]> {
    let first = points.first()?;
    let mut b = [first.x, first.x, first.y, first.y];
    for p in &points[1..] {
        b[0] = b[0].min(p.x);
        b[1] = b[1].max(p.x);
        b[2] = b[2].min(p.y);
        b[3] = b[3].max(p.y);
    }
    Some(b)
}
