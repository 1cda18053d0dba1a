//! Connected-component selection within a cross-section.
//!
//! A band through the lower torso can also cut the arms or hands, giving
//! several disjoint clusters. Points are linked when closer than a link
//! distance derived from the slice's own point spacing, and one cluster is
//! picked by a fixed rule.
//!
//! Ranking is by size (descending), then mean source height (ascending when
//! the band prefers the lower component, descending otherwise), then
//! centroid x, then centroid z. The input is put in canonical order first,
//! so reordering the same points never changes the result.

use hashbrown::HashMap;
use nalgebra::Point2;
use tracing::debug;

use crate::config::ComponentRule;
use crate::slice::SlicePoint;

/// Lower bound on the link distance, in meters.
pub const COMPONENT_LINK_MIN_M: f64 = 0.03;

/// Link distance as a multiple of the median nearest-neighbor spacing.
pub const COMPONENT_LINK_FACTOR: f64 = 2.5;

/// How the selected component was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentMode {
    /// No points.
    None,
    /// Only one component existed.
    Single,
    /// Chosen by [`ComponentRule::Largest`].
    Largest,
    /// Chosen by [`ComponentRule::Central`].
    Central,
}

impl ComponentMode {
    /// Mode name as reported in debug records.
    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentMode::None => "none",
            ComponentMode::Single => "single",
            ComponentMode::Largest => "largest",
            ComponentMode::Central => "central",
        }
    }
}

/// One proximity cluster.
#[derive(Debug, Clone, PartialEq)]
pub struct Component {
    /// Indices into the canonically ordered points, ascending.
    pub indices: Vec<usize>,
    pub centroid: Point2<f64>,
    pub mean_height: f64,
}

impl Component {
    /// Number of points.
    #[inline]
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    /// Check if the component has no points.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// Result of component selection.
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentSelection {
    /// Points of the chosen component, in canonical order.
    pub points: Vec<SlicePoint>,
    pub mode: ComponentMode,
    /// Size rank of the chosen component (0 = largest).
    pub selected_rank: usize,
    pub component_count: usize,
    pub link_distance: f64,
}

/// Link distance for a canonically ordered point set.
pub fn link_distance(points: &[SlicePoint]) -> f64 {
    match median_nearest_neighbor(points) {
        Some(median) => (COMPONENT_LINK_FACTOR * median).max(COMPONENT_LINK_MIN_M),
        None => COMPONENT_LINK_MIN_M,
    }
}

/// Median nearest-neighbor distance, `None` for fewer than two points.
///
/// `points` must be sorted by x; the search sweeps outward from each point
/// and stops once the x gap alone exceeds the best distance so far.
fn median_nearest_neighbor(points: &[SlicePoint]) -> Option<f64> {
    if points.len() < 2 {
        return None;
    }

    let mut nearest: Vec<f64> = Vec::with_capacity(points.len());
    for (i, p) in points.iter().enumerate() {
        let mut best_sq = f64::INFINITY;
        for q in points[i + 1..].iter() {
            let dx = q.x - p.x;
            if dx * dx >= best_sq {
                break;
            }
            best_sq = best_sq.min(dx * dx + (q.z - p.z).powi(2));
        }
        for q in points[..i].iter().rev() {
            let dx = p.x - q.x;
            if dx * dx >= best_sq {
                break;
            }
            best_sq = best_sq.min(dx * dx + (q.z - p.z).powi(2));
        }
        nearest.push(best_sq.sqrt());
    }

    nearest.sort_by(f64::total_cmp);
    let mid = nearest.len() / 2;
    Some(if nearest.len() % 2 == 0 {
        (nearest[mid - 1] + nearest[mid]) / 2.0
    } else {
        nearest[mid]
    })
}

/// Union-find over point indices. The smaller index always becomes the root.
struct DisjointSet {
    parent: Vec<usize>,
}

impl DisjointSet {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, mut i: usize) -> usize {
        while self.parent[i] != i {
            self.parent[i] = self.parent[self.parent[i]];
            i = self.parent[i];
        }
        i
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            let (lo, hi) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[hi] = lo;
        }
    }
}

/// Split canonically ordered points into ranked components.
pub fn find_components(
    points: &[SlicePoint],
    link: f64,
    tie_prefer_lower_y: bool,
) -> Vec<Component> {
    if points.is_empty() {
        return Vec::new();
    }

    let cell = |v: f64| (v / link).floor() as i64;
    let mut grid: HashMap<(i64, i64), Vec<usize>> = HashMap::new();
    for (i, p) in points.iter().enumerate() {
        grid.entry((cell(p.x), cell(p.z))).or_default().push(i);
    }

    let link_sq = link * link;
    let mut sets = DisjointSet::new(points.len());
    for (i, p) in points.iter().enumerate() {
        let (cx, cz) = (cell(p.x), cell(p.z));
        for dx in -1..=1 {
            for dz in -1..=1 {
                let Some(bucket) = grid.get(&(cx.saturating_add(dx), cz.saturating_add(dz)))
                else {
                    continue;
                };
                for &j in bucket.iter().filter(|&&j| j > i) {
                    let q = &points[j];
                    if (p.x - q.x).powi(2) + (p.z - q.z).powi(2) <= link_sq {
                        sets.union(i, j);
                    }
                }
            }
        }
    }

    let mut by_root: std::collections::BTreeMap<usize, Vec<usize>> = Default::default();
    for i in 0..points.len() {
        by_root.entry(sets.find(i)).or_default().push(i);
    }

    let mut components: Vec<Component> = by_root
        .into_values()
        .map(|indices| {
            let n = indices.len() as f64;
            let (sx, sz, sh) = indices.iter().fold((0.0, 0.0, 0.0), |(sx, sz, sh), &i| {
                let p = &points[i];
                (sx + p.x, sz + p.z, sh + p.h)
            });
            Component {
                centroid: Point2::new(sx / n, sz / n),
                mean_height: sh / n,
                indices,
            }
        })
        .collect();

    components.sort_by(|a, b| {
        let height = if tie_prefer_lower_y {
            a.mean_height.total_cmp(&b.mean_height)
        } else {
            b.mean_height.total_cmp(&a.mean_height)
        };
        b.len()
            .cmp(&a.len())
            .then(height)
            .then(a.centroid.x.total_cmp(&b.centroid.x))
            .then(a.centroid.y.total_cmp(&b.centroid.y))
    });
    components
}

/// Pick one component from a slice.
pub fn select_component(
    points: &[SlicePoint],
    tie_prefer_lower_y: bool,
    rule: ComponentRule,
) -> ComponentSelection {
    let mut sorted = points.to_vec();
    sorted.sort_by(SlicePoint::canonical_cmp);

    let link = link_distance(&sorted);
    let components = find_components(&sorted, link, tie_prefer_lower_y);

    let (mode, selected_rank) = match components.len() {
        0 => (ComponentMode::None, 0),
        1 => (ComponentMode::Single, 0),
        _ => match rule {
            ComponentRule::Largest => (ComponentMode::Largest, 0),
            ComponentRule::Central => (ComponentMode::Central, most_central(&sorted, &components)),
        },
    };

    if components.len() > 1 {
        debug!(
            target: "body_measure::components",
            component_count = components.len(),
            selected_rank,
            mode = mode.as_str(),
            link_distance = format!("{:.4}", link),
            "Multiple components in slice"
        );
    }

    let points = components
        .get(selected_rank)
        .map(|c| c.indices.iter().map(|&i| sorted[i]).collect())
        .unwrap_or_default();

    ComponentSelection {
        points,
        mode,
        selected_rank,
        component_count: components.len(),
        link_distance: link,
    }
}

/// Rank of the component whose centroid is nearest the overall centroid.
fn most_central(points: &[SlicePoint], components: &[Component]) -> usize {
    let n = points.len() as f64;
    let (sx, sz) = points
        .iter()
        .fold((0.0, 0.0), |(sx, sz), p| (sx + p.x, sz + p.z));
    let center = Point2::new(sx / n, sz / n);

    let mut best = 0;
    let mut best_dist = f64::INFINITY;
    for (rank, c) in components.iter().enumerate() {
        let d = (c.centroid - center).norm_squared();
        if d < best_dist {
            best = rank;
            best_dist = d;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ring(cx: f64, cz: f64, r: f64, n: usize, h: f64) -> Vec<SlicePoint> {
        (0..n)
            .map(|k| {
                let a = k as f64 * std::f64::consts::TAU / n as f64;
                SlicePoint {
                    x: cx + r * a.cos(),
                    z: cz + r * a.sin(),
                    h,
                }
            })
            .collect()
    }

    #[test]
    fn test_single_ring_is_single_component() {
        let points = ring(0.0, 0.0, 0.3, 20, 0.5);
        let selection = select_component(&points, false, ComponentRule::Largest);
        assert_eq!(selection.mode, ComponentMode::Single);
        assert_eq!(selection.component_count, 1);
        assert_eq!(selection.points.len(), 20);
    }

    #[test]
    fn test_largest_component_wins() {
        let mut points = ring(0.0, 0.0, 0.15, 24, 0.5);
        points.extend(ring(0.6, 0.0, 0.04, 8, 0.5));
        let selection = select_component(&points, false, ComponentRule::Largest);
        assert_eq!(selection.mode, ComponentMode::Largest);
        assert_eq!(selection.component_count, 2);
        assert_eq!(selection.selected_rank, 0);
        assert_eq!(selection.points.len(), 24);
        assert!(selection.points.iter().all(|p| p.x < 0.3));
    }

    #[test]
    fn test_equal_sizes_break_on_height_preference() {
        let mut points = ring(-0.5, 0.0, 0.05, 10, 0.52);
        points.extend(ring(0.5, 0.0, 0.05, 10, 0.50));

        let lower = select_component(&points, true, ComponentRule::Largest);
        assert!(lower.points.iter().all(|p| p.h == 0.50));

        let upper = select_component(&points, false, ComponentRule::Largest);
        assert!(upper.points.iter().all(|p| p.h == 0.52));
    }

    #[test]
    fn test_equal_sizes_and_heights_break_on_x() {
        let mut points = ring(0.5, 0.0, 0.05, 10, 0.5);
        points.extend(ring(-0.5, 0.0, 0.05, 10, 0.5));
        let selection = select_component(&points, false, ComponentRule::Largest);
        assert!(selection.points.iter().all(|p| p.x < 0.0));
    }

    #[test]
    fn test_central_rule() {
        // Large off-center arm cluster, smaller torso cluster near the middle.
        let mut points = ring(0.0, 0.0, 0.05, 8, 0.5);
        points.extend(ring(0.25, 0.0, 0.02, 12, 0.5));
        points.extend(ring(-0.25, 0.0, 0.02, 6, 0.5));
        let selection = select_component(&points, false, ComponentRule::Central);
        assert_eq!(selection.mode, ComponentMode::Central);
        assert_eq!(selection.component_count, 3);
        assert_eq!(selection.selected_rank, 1);
        assert!(selection.points.iter().all(|p| p.x.abs() < 0.1));
    }

    #[test]
    fn test_selection_is_order_independent() {
        let mut points = ring(0.0, 0.0, 0.15, 24, 0.5);
        points.extend(ring(0.6, 0.0, 0.04, 8, 0.5));
        let forward = select_component(&points, false, ComponentRule::Largest);
        points.reverse();
        let backward = select_component(&points, false, ComponentRule::Largest);
        assert_eq!(forward, backward);
    }

    #[test]
    fn test_empty_input() {
        let selection = select_component(&[], false, ComponentRule::Largest);
        assert_eq!(selection.mode, ComponentMode::None);
        assert_eq!(selection.component_count, 0);
        assert!(selection.points.is_empty());
        assert_eq!(selection.link_distance, COMPONENT_LINK_MIN_M);
    }

    #[test]
    fn test_link_distance_tracks_spacing() {
        // Spacing 0.1 m -> link 0.25 m.
        let points: Vec<SlicePoint> = (0..10)
            .map(|i| SlicePoint {
                x: i as f64 * 0.1,
                z: 0.0,
                h: 0.0,
            })
            .collect();
        assert!((link_distance(&points) - 0.25).abs() < 1e-9);

        // Dense points clamp to the floor.
        let dense: Vec<SlicePoint> = (0..10)
            .map(|i| SlicePoint {
                x: i as f64 * 0.001,
                z: 0.0,
                h: 0.0,
            })
            .collect();
        assert_eq!(link_distance(&dense), COMPONENT_LINK_MIN_M);
    }
}
