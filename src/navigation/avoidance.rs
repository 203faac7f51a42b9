// navigation/avoidance.rs

// Obstacle avoidance layer. Sits between the nominal waypoint command and the
// actuators: picks the closest fused obstacle and stops, steers away or slows
// down depending on its distance, watches the position history for a stuck
// robot and then plays a fixed reverse/rotate/advance recovery script. Every
// returned command is rate limited against the previous one and clamped to the
// absolute speed limits, except the emergency stop, which is immediate.

// Dependencies
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::f64::consts::FRAC_PI_4;

use super::controller::VelocityCommand;
use super::geometry::Point;
use crate::core::perception::{Obstacle, ObstacleTracker, PerceptionConfig};
use crate::hal::{ProximityReading, RangePoint, VisionDetection};

// Stuck detection needs this many samples in the history and in the window.
const MIN_HISTORY_SAMPLES: usize = 10;
const MIN_WINDOW_SAMPLES: usize = 5;
// Elapsed time used by the smoother on the first call or after a long gap.
const DEFAULT_SMOOTHING_DT: f64 = 0.1;
const MAX_SMOOTHING_GAP: f64 = 0.5;

/// Avoidance thresholds, stuck detection, recovery script and smoothing limits
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct AvoidanceConfig {
    pub emergency_distance: f64, // hard stop below this (m)
    pub safe_distance: f64,      // steer or slow below this (m)
    pub warning_distance: f64,   // slow down below this (m)
    pub front_sector: f64,       // half-angle counted as "ahead" (rad)
    pub stuck_window_secs: f64,
    pub stuck_history_secs: f64,
    pub stuck_threshold: f64, // displacement below which the robot is stuck (m)
    pub recovery_phase_secs: f64,
    pub recovery_reverse_speed: f64, // m/s
    pub recovery_rotate_speed: f64,  // rad/s
    pub recovery_advance_speed: f64, // m/s
    pub max_linear_speed: f64,
    pub max_angular_speed: f64,
    pub linear_acceleration: f64,  // m/s²
    pub angular_acceleration: f64, // rad/s²
    pub path_check_step: f64,      // sampling step along a checked line (m)
    pub perception: PerceptionConfig,
}

impl Default for AvoidanceConfig {
    fn default() -> Self {
        AvoidanceConfig {
            emergency_distance: 0.2,
            safe_distance: 0.5,
            warning_distance: 1.0,
            front_sector: FRAC_PI_4,
            stuck_window_secs: 3.0,
            stuck_history_secs: 5.0,
            stuck_threshold: 0.1,
            recovery_phase_secs: 2.0,
            recovery_reverse_speed: -0.3,
            recovery_rotate_speed: -1.0,
            recovery_advance_speed: 0.2,
            max_linear_speed: 1.0,
            max_angular_speed: 2.0,
            linear_acceleration: 0.5,
            angular_acceleration: 2.0,
            path_check_step: 0.1,
            perception: PerceptionConfig::default(),
        }
    }
}

/// Operating mode of the layer
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AvoidanceMode {
    Normal,
    Recovery,
}

/// Snapshot for status reporting
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq)]
pub struct AvoidanceStatistics {
    pub obstacle_count: usize,
    pub avoidance_active: bool,
    pub closest_distance: f64, // infinity when no obstacle is known
    pub recovery_active: bool,
    pub last_sensor_update: Option<f64>,
}

// Outcome of the distance policy
enum Decision {
    EmergencyStop,
    Command(VelocityCommand),
}

pub struct AvoidanceLayer {
    config: AvoidanceConfig,
    tracker: ObstacleTracker,
    mode: AvoidanceMode,
    avoidance_active: bool,
    recovery_started: Option<f64>,
    history: VecDeque<(Point, f64)>,
    last_command: VelocityCommand,
    last_command_time: Option<f64>,
}

impl AvoidanceLayer {
    pub fn new(config: AvoidanceConfig) -> Self {
        let tracker = ObstacleTracker::new(config.perception.clone());
        AvoidanceLayer {
            config,
            tracker,
            mode: AvoidanceMode::Normal,
            avoidance_active: false,
            recovery_started: None,
            history: VecDeque::new(),
            last_command: VelocityCommand::zero(),
            last_command_time: None,
        }
    }

    /// Ingests one proximity reading. Returns the number of new obstacles.
    pub fn update_proximity_sensors(&mut self, reading: &ProximityReading, now: f64) -> usize {
        self.tracker.update_proximity(reading, now)
    }

    /// Merges the latest rangefinder and vision data with the proximity
    /// obstacles into one clustered list. `None` keeps the previous data of
    /// that modality. Returns the fused obstacle count.
    pub fn fuse(
        &mut self,
        rangefinder: Option<&[RangePoint]>,
        vision: Option<&[VisionDetection]>,
        now: f64,
    ) -> usize {
        if let Some(points) = rangefinder {
            self.tracker.update_rangefinder(points, now);
        }
        if let Some(detections) = vision {
            self.tracker.update_vision(detections, now);
        }
        let count = self.tracker.fuse(now).len();
        debug!("Fused obstacles: {}", count);
        count
    }

    /// Sanitizes the desired command against the current obstacles.
    pub fn compute_command(
        &mut self,
        desired_linear: f64,
        desired_angular: f64,
        position: &Point,
        now: f64,
    ) -> VelocityCommand {
        self.tracker.fuse(now);
        self.check_stuck_condition(position, now);

        if self.mode == AvoidanceMode::Recovery {
            if let Some(script) = self.recovery_command(now) {
                // Reversing away is allowed, advancing into an obstacle is not
                if script.linear > 0.0 && self.within_emergency_distance() {
                    return self.brake(now);
                }
                return self.smooth(script, now);
            }
        }

        let desired = VelocityCommand::new(desired_linear, desired_angular);
        if self.tracker.obstacles().is_empty() {
            self.avoidance_active = false;
            return self.smooth(desired, now);
        }

        match self.policy(desired) {
            Decision::EmergencyStop => self.brake(now),
            Decision::Command(target) => self.smooth(target, now),
        }
    }

    /// Appends `position` to the history and decides whether the robot is stuck.
    /// Entering RECOVERY happens on the first stuck verdict; any displacement
    /// above the threshold inside the window leaves it.
    pub fn check_stuck_condition(&mut self, position: &Point, now: f64) -> bool {
        self.history.push_back((*position, now));
        let history_secs = self.config.stuck_history_secs;
        while self.history.front().is_some_and(|(_, t)| now - t >= history_secs) {
            self.history.pop_front();
        }

        if self.history.len() < MIN_HISTORY_SAMPLES {
            return false;
        }
        // The history has to cover the whole window before a verdict
        let span = self.history.front().map_or(0.0, |(_, t)| now - t);
        if span < self.config.stuck_window_secs {
            return false;
        }

        let window = self.config.stuck_window_secs;
        let recent: Vec<Point> = self
            .history
            .iter()
            .filter(|(_, t)| now - t <= window)
            .map(|(p, _)| *p)
            .collect();
        if recent.len() < MIN_WINDOW_SAMPLES {
            return false;
        }

        let spread = max_pairwise_distance(&recent);
        if spread < self.config.stuck_threshold {
            if self.mode == AvoidanceMode::Normal {
                self.mode = AvoidanceMode::Recovery;
                self.recovery_started = Some(now);
                warn!("Robot stuck: {:.3} m moved in {:.1} s, starting recovery", spread, window);
            }
            true
        } else {
            if self.mode == AvoidanceMode::Recovery {
                info!("Movement detected ({:.3} m), leaving recovery", spread);
                self.exit_recovery();
            }
            false
        }
    }

    /// Whether the straight line from the robot to `target`, or every point of
    /// `path` when given, keeps clear of all obstacles by their radius plus
    /// the safe distance. Points are robot-relative.
    pub fn check_path_clear(&self, target: &Point, path: Option<&[Point]>) -> bool {
        match path {
            Some(points) if !points.is_empty() => points.iter().all(|p| self.is_point_safe(p)),
            _ => self.is_line_clear(&Point::new(0.0, 0.0), target),
        }
    }

    pub fn statistics(&self) -> AvoidanceStatistics {
        AvoidanceStatistics {
            obstacle_count: self.tracker.obstacles().len(),
            avoidance_active: self.avoidance_active,
            closest_distance: self.tracker.closest().map_or(f64::INFINITY, Obstacle::distance),
            recovery_active: self.mode == AvoidanceMode::Recovery,
            last_sensor_update: self.tracker.last_update(),
        }
    }

    pub fn obstacles(&self) -> &[Obstacle] {
        self.tracker.obstacles()
    }

    pub fn mode(&self) -> AvoidanceMode {
        self.mode
    }

    pub fn is_avoiding(&self) -> bool {
        self.avoidance_active
    }

    pub fn last_command(&self) -> VelocityCommand {
        self.last_command
    }

    pub fn config(&self) -> &AvoidanceConfig {
        &self.config
    }

    /// Forgets obstacles, history and the smoother state.
    pub fn reset(&mut self) {
        self.tracker.clear();
        self.exit_recovery();
        self.avoidance_active = false;
        self.last_command = VelocityCommand::zero();
        self.last_command_time = None;
    }

    fn policy(&mut self, desired: VelocityCommand) -> Decision {
        let Some(closest) = self.tracker.closest().copied() else {
            self.avoidance_active = false;
            return Decision::Command(desired);
        };
        let distance = closest.distance();

        if distance < self.config.emergency_distance {
            warn!("Emergency brake: obstacle at {:.2} m", distance);
            self.avoidance_active = true;
            Decision::EmergencyStop
        } else if distance < self.config.safe_distance {
            self.avoidance_active = true;
            let bearing = closest.bearing();
            if bearing.abs() < self.config.front_sector {
                // Turn away from the side the obstacle is on
                let angular = if bearing > 0.0 { -1.0 } else { 1.0 };
                debug!("Obstacle ahead at {:.2} m, turning {:+.1}", distance, angular);
                Decision::Command(VelocityCommand::new((desired.linear * 0.3).max(0.1), angular))
            } else {
                Decision::Command(VelocityCommand::new((desired.linear * 0.5).max(0.1), desired.angular * 0.5))
            }
        } else if distance < self.config.warning_distance {
            self.avoidance_active = false;
            debug!("Obstacle at {:.2} m, slowing down", distance);
            Decision::Command(VelocityCommand::new(desired.linear * 0.7, desired.angular))
        } else {
            self.avoidance_active = false;
            Decision::Command(desired)
        }
    }

    // Open-loop script timed from recovery entry; `None` once it has finished.
    fn recovery_command(&mut self, now: f64) -> Option<VelocityCommand> {
        let started = *self.recovery_started.get_or_insert(now);
        let elapsed = now - started;
        let phase = self.config.recovery_phase_secs;

        if elapsed < phase {
            debug!("Recovery: reversing");
            Some(VelocityCommand::new(self.config.recovery_reverse_speed, 0.0))
        } else if elapsed < 2.0 * phase {
            debug!("Recovery: rotating");
            Some(VelocityCommand::new(0.0, self.config.recovery_rotate_speed))
        } else if elapsed < 3.0 * phase {
            debug!("Recovery: advancing");
            Some(VelocityCommand::new(self.config.recovery_advance_speed, 0.0))
        } else {
            info!("Recovery script finished");
            self.exit_recovery();
            None
        }
    }

    // Immediate zero, bypassing the acceleration limits
    fn brake(&mut self, now: f64) -> VelocityCommand {
        self.last_command = VelocityCommand::zero();
        self.last_command_time = Some(now);
        VelocityCommand::zero()
    }

    fn within_emergency_distance(&self) -> bool {
        self.tracker
            .closest()
            .is_some_and(|o| o.distance() < self.config.emergency_distance)
    }

    fn exit_recovery(&mut self) {
        self.mode = AvoidanceMode::Normal;
        self.recovery_started = None;
        self.history.clear();
    }

    fn smooth(&mut self, target: VelocityCommand, now: f64) -> VelocityCommand {
        let dt = match self.last_command_time {
            Some(last) if now - last > 0.0 && now - last <= MAX_SMOOTHING_GAP => now - last,
            _ => DEFAULT_SMOOTHING_DT,
        };

        let max_linear_change = self.config.linear_acceleration * dt;
        let max_angular_change = self.config.angular_acceleration * dt;
        let previous = self.last_command;

        let smoothed = VelocityCommand::new(
            previous.linear + (target.linear - previous.linear).clamp(-max_linear_change, max_linear_change),
            previous.angular + (target.angular - previous.angular).clamp(-max_angular_change, max_angular_change),
        )
        .clamped(self.config.max_linear_speed, self.config.max_angular_speed);

        self.last_command = smoothed;
        self.last_command_time = Some(now);
        smoothed
    }

    fn is_point_safe(&self, point: &Point) -> bool {
        self.tracker.obstacles().iter().all(|o| {
            point.distance_to(&Point::new(o.x, o.y)) >= o.radius + self.config.safe_distance
        })
    }

    fn is_line_clear(&self, from: &Point, to: &Point) -> bool {
        let steps = (from.distance_to(to) / self.config.path_check_step).floor() as usize;
        if steps == 0 {
            return true;
        }
        (0..=steps).all(|i| {
            let t = i as f64 / steps as f64;
            self.is_point_safe(&Point::new(from.x + t * (to.x - from.x), from.y + t * (to.y - from.y)))
        })
    }
}

impl Default for AvoidanceLayer {
    fn default() -> Self {
        AvoidanceLayer::new(AvoidanceConfig::default())
    }
}

fn max_pairwise_distance(points: &[Point]) -> f64 {
    let mut max = 0.0f64;
    for (i, a) in points.iter().enumerate() {
        for b in &points[i + 1..] {
            max = max.max(a.distance_to(b));
        }
    }
    max
}
