// navigation/geometry.rs

// Planar primitives used by the coverage planner: points, implicitly closed
// polygons, ray-casting membership, centroid, shoelace area and a simple inward
// shrink toward the vertex mean.

use serde::{Deserialize, Serialize};

// Enclosed area (m²) at or below which a polygon counts as flat.
const DEGENERATE_AREA: f64 = 1e-9;

/// 2D point in the local Cartesian frame (meters).
#[derive(Clone, Copy, Serialize, Deserialize, Debug, Default, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Point { x, y }
    }

    /// Euclidean distance to `other`
    pub fn distance_to(&self, other: &Point) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    /// Bearing from this point to `other` (radians)
    pub fn angle_to(&self, other: &Point) -> f64 {
        (other.y - self.y).atan2(other.x - self.x)
    }
}

/// Axis-aligned bounding box.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Bounds {
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
}

/// Ordered vertex list, implicitly closed. Fewer than three vertices is a
/// degenerate polygon: it contains nothing and has zero area.
#[derive(Clone, Serialize, Deserialize, Debug, Default, PartialEq)]
#[serde(transparent)]
pub struct Polygon {
    vertices: Vec<Point>,
}

impl Polygon {
    pub fn new(vertices: Vec<Point>) -> Self {
        Polygon { vertices }
    }

    pub fn vertices(&self) -> &[Point] {
        &self.vertices
    }

    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// At least three vertices.
    pub fn is_valid(&self) -> bool {
        self.vertices.len() >= 3
    }

    /// Fewer than three vertices, or vertices that enclose no area.
    pub fn is_degenerate(&self) -> bool {
        !self.is_valid() || !(self.area() > DEGENERATE_AREA)
    }

    /// Ray-casting membership test. Counts crossings of a horizontal ray cast
    /// toward +x from `point`.
    pub fn contains(&self, point: &Point) -> bool {
        if !self.is_valid() {
            return false;
        }

        let n = self.vertices.len();
        let mut inside = false;
        let mut p1 = self.vertices[0];
        for i in 1..=n {
            let p2 = self.vertices[i % n];
            if point.y > p1.y.min(p2.y) && point.y <= p1.y.max(p2.y) && point.x <= p1.x.max(p2.x) {
                // p1.y != p2.y is guaranteed by the strict/non-strict bounds above
                let x_intersect = (point.y - p1.y) * (p2.x - p1.x) / (p2.y - p1.y) + p1.x;
                if p1.x == p2.x || point.x <= x_intersect {
                    inside = !inside;
                }
            }
            p1 = p2;
        }
        inside
    }

    pub fn bounds(&self) -> Option<Bounds> {
        let first = self.vertices.first()?;
        let init = Bounds {
            min_x: first.x,
            max_x: first.x,
            min_y: first.y,
            max_y: first.y,
        };
        Some(self.vertices.iter().fold(init, |b, p| Bounds {
            min_x: b.min_x.min(p.x),
            max_x: b.max_x.max(p.x),
            min_y: b.min_y.min(p.y),
            max_y: b.max_y.max(p.y),
        }))
    }

    /// Arithmetic mean of the vertices.
    pub fn vertex_mean(&self) -> Option<Point> {
        if self.vertices.is_empty() {
            return None;
        }
        let n = self.vertices.len() as f64;
        let (sx, sy) = self
            .vertices
            .iter()
            .fold((0.0, 0.0), |(sx, sy), p| (sx + p.x, sy + p.y));
        Some(Point::new(sx / n, sy / n))
    }

    /// Signed shoelace area (positive for counter-clockwise vertex order).
    pub fn signed_area(&self) -> f64 {
        if !self.is_valid() {
            return 0.0;
        }
        let n = self.vertices.len();
        let twice: f64 = (0..n)
            .map(|i| {
                let a = self.vertices[i];
                let b = self.vertices[(i + 1) % n];
                a.x * b.y - b.x * a.y
            })
            .sum();
        twice / 2.0
    }

    /// Unsigned shoelace area (m²).
    pub fn area(&self) -> f64 {
        self.signed_area().abs()
    }

    /// Area-weighted centroid; falls back to the vertex mean for polygons
    /// with (near) zero area.
    pub fn centroid(&self) -> Option<Point> {
        let signed = self.signed_area();
        if signed.abs() < 1e-12 {
            return self.vertex_mean();
        }
        let n = self.vertices.len();
        let (cx, cy) = (0..n).fold((0.0, 0.0), |(cx, cy), i| {
            let a = self.vertices[i];
            let b = self.vertices[(i + 1) % n];
            let cross = a.x * b.y - b.x * a.y;
            (cx + (a.x + b.x) * cross, cy + (a.y + b.y) * cross)
        });
        Some(Point::new(cx / (6.0 * signed), cy / (6.0 * signed)))
    }

    /// Moves every vertex `margin` meters toward the vertex mean. Vertices
    /// closer than `margin` to the mean are dropped; `None` when fewer than
    /// three vertices survive.
    pub fn shrink(&self, margin: f64) -> Option<Polygon> {
        let center = self.vertex_mean()?;
        let shrunk: Vec<Point> = self
            .vertices
            .iter()
            .filter_map(|p| {
                let dx = p.x - center.x;
                let dy = p.y - center.y;
                let length = dx.hypot(dy);
                (length > margin).then(|| {
                    let factor = (length - margin) / length;
                    Point::new(center.x + dx * factor, center.y + dy * factor)
                })
            })
            .collect();

        (shrunk.len() >= 3).then(|| Polygon::new(shrunk))
    }

    /// Largest distance from `center` to any vertex.
    pub fn max_radius_from(&self, center: &Point) -> f64 {
        self.vertices
            .iter()
            .map(|p| p.distance_to(center))
            .fold(0.0, f64::max)
    }
}

impl From<Vec<Point>> for Polygon {
    fn from(vertices: Vec<Point>) -> Self {
        Polygon::new(vertices)
    }
}

impl FromIterator<Point> for Polygon {
    fn from_iter<I: IntoIterator<Item = Point>>(iter: I) -> Self {
        Polygon::new(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn square(side: f64) -> Polygon {
        Polygon::new(vec![
            Point::new(0.0, 0.0),
            Point::new(side, 0.0),
            Point::new(side, side),
            Point::new(0.0, side),
        ])
    }

    #[test]
    fn square_membership() {
        let polygon = square(4.0);
        assert!(polygon.contains(&Point::new(2.0, 2.0)));
        assert!(!polygon.contains(&Point::new(5.0, 5.0)));
        assert!(!polygon.contains(&Point::new(-0.5, 2.0)));
    }

    #[test]
    fn l_shape_notch_is_outside() {
        let l_shape = Polygon::new(vec![
            Point::new(0.0, 0.0),
            Point::new(15.0, 0.0),
            Point::new(15.0, 8.0),
            Point::new(8.0, 8.0),
            Point::new(8.0, 15.0),
            Point::new(0.0, 15.0),
        ]);
        assert!(l_shape.contains(&Point::new(4.0, 12.0)));
        assert!(l_shape.contains(&Point::new(12.0, 4.0)));
        assert!(!l_shape.contains(&Point::new(12.0, 12.0)));
    }

    #[test]
    fn degenerate_polygon_contains_nothing() {
        let line = Polygon::new(vec![Point::new(0.0, 0.0), Point::new(1.0, 1.0)]);
        assert!(!line.contains(&Point::new(0.5, 0.5)));
        assert_eq!(line.area(), 0.0);
    }

    #[test]
    fn flat_polygons_are_degenerate() {
        let collinear = Polygon::new(vec![Point::new(0.0, 0.0), Point::new(1.0, 1.0), Point::new(3.0, 3.0)]);
        assert!(collinear.is_degenerate());
        assert!(Polygon::new(vec![Point::new(0.0, 0.0)]).is_degenerate());
        assert!(!square(1.0).is_degenerate());
    }

    #[test]
    fn area_and_centroid() {
        let polygon = square(5.0);
        assert_relative_eq!(polygon.area(), 25.0, epsilon = 1e-12);
        let c = polygon.centroid().unwrap();
        assert_relative_eq!(c.x, 2.5, epsilon = 1e-12);
        assert_relative_eq!(c.y, 2.5, epsilon = 1e-12);
    }

    #[test]
    fn shrink_moves_vertices_inward() {
        let inner = square(10.0).shrink(0.5).expect("inner polygon");
        assert_eq!(inner.len(), 4);
        assert!(inner.area() < 100.0);
        assert!(inner.vertices().iter().all(|p| square(10.0).contains(p)));
    }

    #[test]
    fn shrink_collapses_small_polygon() {
        assert!(square(0.5).shrink(1.0).is_none());
    }

    #[test]
    fn point_helpers() {
        let a = Point::new(0.0, 0.0);
        let b = Point::new(3.0, 4.0);
        assert_relative_eq!(a.distance_to(&b), 5.0);
        assert_relative_eq!(a.angle_to(&Point::new(0.0, 1.0)), std::f64::consts::FRAC_PI_2);
    }
}
