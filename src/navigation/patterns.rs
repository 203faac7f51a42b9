// navigation/patterns.rs

// Coverage pattern generators. Each generator is a pure function of an area and
// the planner parameters, returning waypoints in traversal order. Waypoints that
// fall inside an obstacle polygon are removed after generation.

// Dependencies
use log::{debug, warn};
use std::f64::consts::PI;

use super::geometry::{Point, Polygon};
use super::planner::PlannerConfig;
use super::{Area, CoveragePattern, Waypoint, WaypointAction};
use crate::core::localization::wrap_angle;

// Stripe spacings below this would generate an unbounded number of rows.
const MIN_SPACING: f64 = 1e-3;
// Upper bound on sweep rows or spiral samples for a single area.
const MAX_STEPS: usize = 100_000;

/// Generates the full, obstacle-filtered path for `area` using its pattern.
pub fn generate_path(area: &Area, config: &PlannerConfig) -> Vec<Waypoint> {
    if !area.boundary.is_valid() {
        warn!(
            "Area {} has {} boundary vertices; no path generated",
            area.id,
            area.boundary.len()
        );
        return Vec::new();
    }

    let path = match area.pattern {
        CoveragePattern::Boustrophedon => boustrophedon(&area.boundary, area, config),
        CoveragePattern::Spiral => spiral(area, config),
        CoveragePattern::PerimeterFirst => perimeter_first(area, config),
    };
    let path = filter_obstacles(path, &area.obstacles);

    if path.is_empty() {
        warn!("Pattern {:?} yielded zero waypoints for area {}", area.pattern, area.id);
    } else {
        debug!("Pattern {:?} generated {} waypoints for area {}", area.pattern, path.len(), area.id);
    }
    path
}

/// Distance between adjacent sweep lines.
pub fn stripe_spacing(area: &Area, config: &PlannerConfig) -> f64 {
    config.blade_width * (1.0 - area.overlap_fraction)
}

/// Parallel sweep lines along x, spaced one stripe apart in y, alternating
/// direction. Line endpoints outside `boundary` are dropped, not clamped.
pub fn boustrophedon(boundary: &Polygon, area: &Area, config: &PlannerConfig) -> Vec<Waypoint> {
    let Some(bounds) = boundary.bounds().filter(|_| boundary.is_valid()) else {
        return Vec::new();
    };
    let spacing = stripe_spacing(area, config);
    if !(spacing > MIN_SPACING) || !spacing.is_finite() {
        warn!("Invalid stripe spacing {:.4} for area {}", spacing, area.id);
        return Vec::new();
    }

    let min_x = bounds.min_x + config.safety_margin;
    let max_x = bounds.max_x - config.safety_margin;
    let min_y = bounds.min_y + config.safety_margin;
    let max_y = bounds.max_y - config.safety_margin;
    if min_y > max_y {
        return Vec::new();
    }

    let Some(rows) = step_count(max_y - min_y, spacing) else {
        warn!(
            "Area {} needs more than {} sweep rows at spacing {:.4}; no path generated",
            area.id, MAX_STEPS, spacing
        );
        return Vec::new();
    };
    let mut waypoints = Vec::with_capacity(rows * 2);
    for row in 0..rows {
        let y = min_y + row as f64 * spacing;
        let (start, end) = if row % 2 == 0 {
            (Point::new(min_x, y), Point::new(max_x, y))
        } else {
            (Point::new(max_x, y), Point::new(min_x, y))
        };

        for point in [start, end] {
            if boundary.contains(&point) {
                waypoints.push(Waypoint::new(point, area.travel_speed, area.blade_height, WaypointAction::Move));
            }
        }
    }

    add_turn_waypoints(waypoints, config)
}

/// Inward spiral around the polygon centroid. The radius shrinks by one
/// stripe per revolution; samples outside the boundary are skipped.
pub fn spiral(area: &Area, config: &PlannerConfig) -> Vec<Waypoint> {
    let boundary = &area.boundary;
    let Some(center) = boundary.centroid() else {
        return Vec::new();
    };
    let radius_step = stripe_spacing(area, config);
    let angle_step = config.spiral_angle_step;
    if !(radius_step > MIN_SPACING) || !(angle_step > 0.0) {
        warn!("Invalid spiral parameters for area {}", area.id);
        return Vec::new();
    }

    let shrink_per_step = radius_step * angle_step / (2.0 * PI);
    let mut radius = boundary.max_radius_from(&center);
    if step_count(radius, shrink_per_step).is_none() {
        warn!(
            "Area {} needs more than {} spiral samples; no path generated",
            area.id, MAX_STEPS
        );
        return Vec::new();
    }
    let mut angle: f64 = 0.0;
    let mut waypoints = Vec::new();

    while radius >= radius_step {
        let point = Point::new(center.x + radius * angle.cos(), center.y + radius * angle.sin());
        if boundary.contains(&point) {
            waypoints.push(Waypoint::new(point, area.travel_speed, area.blade_height, WaypointAction::Move));
        }
        angle += angle_step;
        radius -= shrink_per_step;
    }

    waypoints
}

/// One slow lap over the boundary vertices, then a boustrophedon pass over the
/// boundary shrunk inward by one blade width.
pub fn perimeter_first(area: &Area, config: &PlannerConfig) -> Vec<Waypoint> {
    let vertices = area.boundary.vertices();
    let perimeter_speed = area.travel_speed * config.perimeter_speed_factor;

    let mut waypoints: Vec<Waypoint> = vertices
        .iter()
        .chain(vertices.first())
        .map(|p| Waypoint::new(*p, perimeter_speed, area.blade_height, WaypointAction::Move))
        .collect();

    match area.boundary.shrink(config.blade_width) {
        Some(inner) => waypoints.extend(boustrophedon(&inner, area, config)),
        None => debug!("Area {} too small for an inner pass", area.id),
    }

    waypoints
}

// Number of steps of size `step` covering `span`, counting both ends; None when
// it is not finite or exceeds MAX_STEPS.
fn step_count(span: f64, step: f64) -> Option<usize> {
    let steps = (span / step).floor() + 1.0;
    (steps.is_finite() && steps >= 1.0 && steps <= MAX_STEPS as f64).then(|| steps as usize)
}

/// Removes every waypoint lying inside one of `obstacles`.
pub fn filter_obstacles(waypoints: Vec<Waypoint>, obstacles: &[Polygon]) -> Vec<Waypoint> {
    if obstacles.is_empty() {
        return waypoints;
    }
    waypoints
        .into_iter()
        .filter(|wp| !obstacles.iter().any(|obstacle| obstacle.contains(&wp.position)))
        .collect()
}

// Inserts a slow TURN waypoint before every vertex where the heading changes by
// more than the turn threshold.
fn add_turn_waypoints(waypoints: Vec<Waypoint>, config: &PlannerConfig) -> Vec<Waypoint> {
    if waypoints.len() < 3 {
        return waypoints;
    }

    let mut enhanced = Vec::with_capacity(waypoints.len() * 2);
    enhanced.push(waypoints[0]);
    for i in 1..waypoints.len() {
        let current = waypoints[i];
        if let Some(next) = waypoints.get(i + 1) {
            let previous = &waypoints[i - 1];
            let inbound = previous.position.angle_to(&current.position);
            let outbound = current.position.angle_to(&next.position);
            if wrap_angle(outbound - inbound).abs() > config.turn_threshold {
                enhanced.push(Waypoint::new(
                    current.position,
                    current.speed * config.turn_speed_factor,
                    current.blade_height,
                    WaypointAction::Turn,
                ));
            }
        }
        enhanced.push(current);
    }
    enhanced
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square_area(side: f64, pattern: CoveragePattern) -> Area {
        Area::new(
            "square",
            Polygon::new(vec![
                Point::new(0.0, 0.0),
                Point::new(side, 0.0),
                Point::new(side, side),
                Point::new(0.0, side),
            ]),
            pattern,
        )
    }

    #[test]
    fn boustrophedon_alternates_direction() {
        let area = square_area(10.0, CoveragePattern::Boustrophedon);
        let path = generate_path(&area, &PlannerConfig::default());
        let moves: Vec<_> = path.iter().filter(|w| w.action == WaypointAction::Move).collect();
        assert!(moves.len() >= 4);
        assert!(moves[0].position.x < moves[1].position.x);
        assert!(moves[2].position.x > moves[3].position.x);
    }

    #[test]
    fn boustrophedon_marks_turns() {
        let area = square_area(10.0, CoveragePattern::Boustrophedon);
        let path = generate_path(&area, &PlannerConfig::default());
        let turns = path.iter().filter(|w| w.action == WaypointAction::Turn).count();
        assert!(turns > 0);
        assert!(path
            .iter()
            .filter(|w| w.action == WaypointAction::Turn)
            .all(|w| (w.speed - area.travel_speed * 0.5).abs() < 1e-12));
    }

    #[test]
    fn spiral_radius_shrinks() {
        let area = square_area(10.0, CoveragePattern::Spiral);
        let path = generate_path(&area, &PlannerConfig::default());
        assert!(!path.is_empty());
        let center = area.boundary.centroid().unwrap();
        let first = path.first().unwrap().position.distance_to(&center);
        let last = path.last().unwrap().position.distance_to(&center);
        assert!(last < first);
        assert!(path.iter().all(|w| area.boundary.contains(&w.position)));
    }

    #[test]
    fn perimeter_first_starts_with_slow_lap() {
        let area = square_area(10.0, CoveragePattern::PerimeterFirst);
        let path = generate_path(&area, &PlannerConfig::default());
        assert!(path.len() > 5);
        assert_eq!(path[0].position, path[4].position);
        assert!(path[..5].iter().all(|w| (w.speed - 0.35).abs() < 1e-12));
    }

    #[test]
    fn perimeter_first_without_inner_pass_on_tiny_area() {
        let area = square_area(0.6, CoveragePattern::PerimeterFirst);
        let path = generate_path(&area, &PlannerConfig::default());
        assert_eq!(path.len(), 5);
    }

    #[test]
    fn oversized_area_is_refused_before_allocating() {
        let huge = square_area(1.0e9, CoveragePattern::Boustrophedon);
        assert!(boustrophedon(&huge.boundary, &huge, &PlannerConfig::default()).is_empty());
        let huge = square_area(1.0e9, CoveragePattern::Spiral);
        assert!(spiral(&huge, &PlannerConfig::default()).is_empty());
        assert_eq!(step_count(f64::INFINITY, 0.5), None);
        assert_eq!(step_count(10.0, 0.5), Some(21));
    }

    #[test]
    fn degenerate_boundary_yields_empty_path() {
        let area = Area::new(
            "line",
            Polygon::new(vec![Point::new(0.0, 0.0), Point::new(5.0, 5.0)]),
            CoveragePattern::Spiral,
        );
        assert!(generate_path(&area, &PlannerConfig::default()).is_empty());
    }

    #[test]
    fn full_overlap_yields_empty_path() {
        let area = square_area(10.0, CoveragePattern::Boustrophedon).with_overlap(1.0);
        assert!(generate_path(&area, &PlannerConfig::default()).is_empty());
    }

    #[test]
    fn obstacle_waypoints_are_removed() {
        let obstacle = Polygon::new(vec![
            Point::new(3.0, 3.0),
            Point::new(7.0, 3.0),
            Point::new(7.0, 7.0),
            Point::new(3.0, 7.0),
        ]);
        let area = square_area(10.0, CoveragePattern::Spiral).with_obstacles(vec![obstacle.clone()]);
        let path = generate_path(&area, &PlannerConfig::default());
        assert!(!path.is_empty());
        assert!(path.iter().all(|w| !obstacle.contains(&w.position)));
    }
}
