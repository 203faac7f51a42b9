// navigation/controller.rs

// Nominal waypoint tracking: turns the current pose and a target point into a
// linear/angular velocity command. The robot turns in place while the heading
// error is large, otherwise drives with proportional steering and slows down on
// approach. Obstacle handling happens afterwards in the avoidance layer.

// Dependencies
use serde::{Deserialize, Serialize};

use super::geometry::Point;
use super::{Waypoint, WaypointAction};
use crate::core::localization::{Pose, wrap_angle};

/// Differential-drive velocity command
#[derive(Clone, Copy, Serialize, Deserialize, Debug, Default, PartialEq)]
pub struct VelocityCommand {
    pub linear: f64,  // m/s, positive = forward
    pub angular: f64, // rad/s, positive = counter-clockwise
}

impl VelocityCommand {
    pub const fn new(linear: f64, angular: f64) -> Self {
        VelocityCommand { linear, angular }
    }

    pub const fn zero() -> Self {
        VelocityCommand::new(0.0, 0.0)
    }

    pub fn is_zero(&self) -> bool {
        self.linear == 0.0 && self.angular == 0.0
    }

    /// Clamps both components to the given magnitudes.
    pub fn clamped(&self, max_linear: f64, max_angular: f64) -> Self {
        VelocityCommand::new(
            self.linear.clamp(-max_linear, max_linear),
            self.angular.clamp(-max_angular, max_angular),
        )
    }
}

/// Waypoint tracking gains and limits
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ControllerConfig {
    pub heading_gain: f64,             // angular = gain * heading error
    pub approach_gain: f64,            // linear = gain * distance near the target
    pub rotate_threshold: f64,         // heading error above which the robot turns in place (rad)
    pub turn_heading_tolerance: f64,   // tighter threshold on TURN waypoints (rad)
    pub max_linear: f64,               // m/s
    pub max_angular: f64,              // rad/s
    pub min_linear: f64,               // creep speed so the approach converges (m/s)
}

impl Default for ControllerConfig {
    fn default() -> Self {
        ControllerConfig {
            heading_gain: 1.5,
            approach_gain: 0.5,
            rotate_threshold: 0.8,
            turn_heading_tolerance: 0.1,
            max_linear: 0.5,
            max_angular: 1.0,
            min_linear: 0.05,
        }
    }
}

pub struct MotionController {
    config: ControllerConfig,
}

impl MotionController {
    pub fn new(config: ControllerConfig) -> Self {
        MotionController { config }
    }

    /// Command toward a coverage waypoint at the waypoint's speed.
    pub fn track_waypoint(&self, pose: &Pose, waypoint: &Waypoint) -> VelocityCommand {
        let tolerance = match waypoint.action {
            WaypointAction::Move => self.config.rotate_threshold,
            WaypointAction::Turn => self.config.turn_heading_tolerance,
        };
        self.steer(pose, &waypoint.position, waypoint.speed, tolerance)
    }

    /// Command toward an arbitrary point (e.g. the charging station) at cruise speed.
    pub fn track_point(&self, pose: &Pose, target: &Point) -> VelocityCommand {
        self.steer(pose, target, self.config.max_linear, self.config.rotate_threshold)
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    fn steer(&self, pose: &Pose, target: &Point, speed: f64, rotate_threshold: f64) -> VelocityCommand {
        let position = Point::new(pose.x, pose.y);
        let distance = position.distance_to(target);
        if distance < f64::EPSILON {
            return VelocityCommand::zero();
        }

        let error = wrap_angle(position.angle_to(target) - pose.heading);
        let angular = (self.config.heading_gain * error).clamp(-self.config.max_angular, self.config.max_angular);

        if error.abs() > rotate_threshold {
            return VelocityCommand::new(0.0, angular);
        }

        let cruise = speed.clamp(0.0, self.config.max_linear);
        let linear = (distance * self.config.approach_gain).clamp(self.config.min_linear.min(cruise), cruise);
        VelocityCommand::new(linear, angular)
    }
}

impl Default for MotionController {
    fn default() -> Self {
        MotionController::new(ControllerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    fn pose(x: f64, y: f64, heading: f64) -> Pose {
        Pose {
            x,
            y,
            heading,
            timestamp: 0.0,
        }
    }

    fn waypoint(x: f64, y: f64, action: WaypointAction) -> Waypoint {
        Waypoint::new(Point::new(x, y), 0.5, 5.0, action)
    }

    #[test]
    fn drives_straight_at_aligned_target() {
        let cmd = MotionController::default().track_waypoint(&pose(0.0, 0.0, 0.0), &waypoint(5.0, 0.0, WaypointAction::Move));
        assert_relative_eq!(cmd.linear, 0.5);
        assert_relative_eq!(cmd.angular, 0.0);
    }

    #[test]
    fn turns_in_place_when_target_is_behind() {
        let cmd = MotionController::default().track_waypoint(&pose(0.0, 0.0, 0.0), &waypoint(-5.0, 0.1, WaypointAction::Move));
        assert_eq!(cmd.linear, 0.0);
        assert!(cmd.angular > 0.0);
    }

    #[test]
    fn turn_waypoint_uses_tighter_tolerance() {
        let controller = MotionController::default();
        let current = pose(0.0, 0.0, 0.0);
        let target = (5.0 * (0.3f64).cos(), 5.0 * (0.3f64).sin());
        let moving = controller.track_waypoint(&current, &waypoint(target.0, target.1, WaypointAction::Move));
        let turning = controller.track_waypoint(&current, &waypoint(target.0, target.1, WaypointAction::Turn));
        assert!(moving.linear > 0.0);
        assert_eq!(turning.linear, 0.0);
    }

    #[test]
    fn slows_down_near_target() {
        let cmd = MotionController::default().track_point(&pose(0.0, 0.0, 0.0), &Point::new(0.2, 0.0));
        assert_relative_eq!(cmd.linear, 0.1, epsilon = 1e-12);
    }

    #[test]
    fn heading_error_wraps_across_pi() {
        let cmd = MotionController::default().track_point(&pose(0.0, 0.0, PI - 0.05), &Point::new(-5.0, -0.2));
        // bearing sits just past -π, a small left turn away
        assert!(cmd.linear > 0.0);
        assert!(cmd.angular.abs() < 0.5);
    }

    #[test]
    fn clamped_limits_both_axes() {
        let cmd = VelocityCommand::new(3.0, -5.0).clamped(1.0, 2.0);
        assert_eq!(cmd, VelocityCommand::new(1.0, -2.0));
    }
}
