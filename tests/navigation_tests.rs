// tests/navigation_tests.rs
// Properties of the estimator, planner and avoidance layer through the public API.

use approx::assert_relative_eq;
use mowbot::core::{EstimatorConfig, PoseEstimator, wrap_angle};
use mowbot::hal::ProximityReading;
use mowbot::navigation::{
    Area, AvoidanceConfig, AvoidanceLayer, AvoidanceMode, CoveragePattern, CoveragePlanner, PlannerConfig, Point,
    Polygon,
};
use rstest::rstest;
use std::f64::consts::PI;

fn square(side: f64) -> Polygon {
    Polygon::new(vec![
        Point::new(0.0, 0.0),
        Point::new(side, 0.0),
        Point::new(side, side),
        Point::new(0.0, side),
    ])
}

#[rstest]
#[case(0.0)]
#[case(PI)]
#[case(-PI)]
#[case(3.0 * PI)]
#[case(-7.5)]
#[case(100.25)]
#[case(1e-9)]
fn heading_wrap_is_bounded_and_idempotent(#[case] angle: f64) {
    let wrapped = wrap_angle(angle);
    assert!(wrapped > -PI && wrapped <= PI, "{} wrapped to {}", angle, wrapped);
    assert_relative_eq!(wrap_angle(wrapped), wrapped);
}

#[test]
fn covariance_stays_symmetric_over_mixed_updates() {
    let mut estimator = PoseEstimator::new(EstimatorConfig::default());
    let mut now = 0.0;
    for i in 0..200 {
        now += 0.05;
        estimator.predict(0.05);
        let _ = estimator.correct_with_encoders(10 + i % 7, 14 - i % 5, 360, now);
        let _ = estimator.correct_with_imu(0.01 * i as f64, Some(0.2), now);
    }
    let p = estimator.full_covariance();
    for r in 0..6 {
        for c in 0..6 {
            assert!((p[(r, c)] - p[(c, r)]).abs() < 1e-9);
        }
    }
}

#[test]
fn straight_encoder_stream_advances_along_heading() {
    let mut estimator = PoseEstimator::new(EstimatorConfig::default());
    estimator.reset(1.0, 2.0, PI / 2.0);
    for i in 1..=50 {
        estimator.correct_with_encoders(20, 20, 360, 0.1 * i as f64).unwrap();
    }
    let pose = estimator.get_pose();
    assert_relative_eq!(pose.heading, PI / 2.0, epsilon = 1e-3);
    assert!(pose.y > 2.5);
    assert_relative_eq!(pose.x, 1.0, epsilon = 1e-2);
}

#[test]
fn faster_right_wheel_turns_left() {
    let mut estimator = PoseEstimator::new(EstimatorConfig::default());
    estimator.correct_with_encoders(10, 30, 360, 0.1).unwrap();
    assert!(estimator.velocity().angular > 0.0);
}

#[rstest]
#[case(Point::new(2.0, 2.0), true)]
#[case(Point::new(5.0, 5.0), false)]
#[case(Point::new(-0.1, 2.0), false)]
fn point_in_square(#[case] point: Point, #[case] inside: bool) {
    assert_eq!(square(4.0).contains(&point), inside);
}

#[test]
fn coverage_path_stays_inside_area() {
    let planner = CoveragePlanner::new(PlannerConfig::default());
    let area = Area::new("open", square(10.0), CoveragePattern::Boustrophedon).with_overlap(0.1);
    let path = planner.generate_path(&area);
    assert!(!path.is_empty());
    assert!(path.iter().all(|w| area.boundary.contains(&w.position)));
}

#[rstest]
#[case(CoveragePattern::Boustrophedon)]
#[case(CoveragePattern::PerimeterFirst)]
fn halving_stripe_spacing_adds_waypoints(#[case] pattern: CoveragePattern) {
    let area = Area::new("open", square(10.0), pattern).with_overlap(0.1);
    let wide = CoveragePlanner::new(PlannerConfig::default()).generate_path(&area);
    let narrow = CoveragePlanner::new(PlannerConfig {
        blade_width: 0.25,
        ..PlannerConfig::default()
    })
    .generate_path(&area);
    assert!(narrow.len() > wide.len());
}

#[test]
fn spiral_path_stays_inside_area() {
    let planner = CoveragePlanner::new(PlannerConfig::default());
    let area = Area::new("round", square(8.0), CoveragePattern::Spiral);
    let path = planner.generate_path(&area);
    assert!(!path.is_empty());
    assert!(path.iter().all(|w| area.boundary.contains(&w.position)));
}

#[test]
fn keep_out_zones_are_skipped() {
    let planner = CoveragePlanner::new(PlannerConfig::default());
    let bed = Polygon::new(vec![
        Point::new(3.0, 3.0),
        Point::new(7.0, 3.0),
        Point::new(7.0, 7.0),
        Point::new(3.0, 7.0),
    ]);
    let area = Area::new("bed", square(10.0), CoveragePattern::Spiral).with_obstacles(vec![bed.clone()]);
    let path = planner.generate_path(&area);
    assert!(!path.is_empty());
    assert!(path.iter().all(|w| !bed.contains(&w.position)));
}

fn front_sensor_layer() -> AvoidanceLayer {
    let mut config = AvoidanceConfig::default();
    config.perception.proximity_angles_deg = vec![0.0];
    AvoidanceLayer::new(config)
}

#[test]
fn obstacle_directly_ahead_forces_zero_command() {
    let mut layer = front_sensor_layer();
    layer.update_proximity_sensors(&ProximityReading { distances: vec![Some(0.1)] }, 0.0);
    let cmd = layer.compute_command(0.5, 0.3, &Point::new(0.0, 0.0), 0.1);
    assert!(cmd.is_zero());
}

#[test]
fn clear_surroundings_pass_the_command_through() {
    let mut layer = front_sensor_layer();
    let mut cmd = Default::default();
    for i in 1..=30 {
        let t = 0.1 * i as f64;
        cmd = layer.compute_command(0.4, 0.2, &Point::new(0.04 * i as f64, 0.0), t);
    }
    assert_relative_eq!(cmd.linear, 0.4, epsilon = 1e-9);
    assert_relative_eq!(cmd.angular, 0.2, epsilon = 1e-9);
}

#[test]
fn stuck_robot_recovers_after_moving() {
    let mut layer = AvoidanceLayer::default();
    let parked = Point::new(1.0, 1.0);
    let mut now = 0.0;
    while now < 3.5 {
        now += 0.1;
        layer.check_stuck_condition(&parked, now);
    }
    assert_eq!(layer.mode(), AvoidanceMode::Recovery);

    for i in 1..=5 {
        now += 0.1;
        layer.check_stuck_condition(&Point::new(1.0 + 0.1 * i as f64, 1.0), now);
    }
    assert_eq!(layer.mode(), AvoidanceMode::Normal);
}
