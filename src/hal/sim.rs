// hal/sim.rs

// Simulated hardware. A kinematic unicycle integrates the last drive command and
// produces encoder ticks, inertial heading, proximity and rangefinder returns from
// circular world obstacles, a battery that drains while working and charges while
// docked, and a docking result based on the distance to the charger. All four
// boundary traits are implemented on lightweight handles sharing one world.

// Dependencies
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use super::{
    ActuationBoundary, DockingBoundary, EncoderReading, HalError, ImuReading, PowerBoundary, ProximityReading,
    RangePoint, SensorBoundary, VisionDetection,
};
use crate::core::localization::wrap_angle;
use crate::navigation::geometry::Point;

/// Circular obstacle in world coordinates
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq)]
pub struct SimObstacle {
    pub x: f64,
    pub y: f64,
    pub radius: f64,
}

/// Simulated robot and world parameters
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct SimConfig {
    pub realtime: bool, // integrate on wall-clock time when sensors are read
    pub start_x: f64,
    pub start_y: f64,
    pub start_heading: f64,
    pub wheel_radius: f64,
    pub wheel_base: f64,
    pub ticks_per_revolution: u32,
    pub proximity_angles_deg: Vec<f64>,
    pub proximity_max_range: f64,
    pub rangefinder_enabled: bool,
    pub rangefinder_max_range: f64,
    pub obstacles: Vec<SimObstacle>,
    pub charger: Point,
    pub dock_radius: f64,
    pub battery_start: f64,      // percent
    pub idle_drain: f64,         // percent per second
    pub drive_drain: f64,        // percent per meter
    pub blade_drain: f64,        // percent per second while the blade spins
    pub charge_rate: f64,        // percent per second while docked
}

impl Default for SimConfig {
    fn default() -> Self {
        SimConfig {
            realtime: true,
            start_x: 0.0,
            start_y: 0.0,
            start_heading: 0.0,
            wheel_radius: 0.1,
            wheel_base: 0.5,
            ticks_per_revolution: 360,
            proximity_angles_deg: vec![-45.0, 45.0],
            proximity_max_range: 2.0,
            rangefinder_enabled: true,
            rangefinder_max_range: 10.0,
            obstacles: Vec::new(),
            charger: Point::new(0.0, 0.0),
            dock_radius: 0.3,
            battery_start: 100.0,
            idle_drain: 0.005,
            drive_drain: 0.02,
            blade_drain: 0.02,
            charge_rate: 0.5,
        }
    }
}

// World: ground truth of the simulation
#[derive(Debug)]
struct World {
    config: SimConfig,
    x: f64,
    y: f64,
    heading: f64,
    linear: f64,
    angular: f64,
    blade_rpm: f64,
    cutting_height: f64,
    battery: f64,
    docked: bool,
    shut_down: bool,
    actuation_fault: bool,
    left_ticks: f64,  // accumulated since the last encoder read
    right_ticks: f64,
    last_sync: Instant,
    drive_commands: u64,
    stop_commands: u64,
}

impl World {
    fn new(config: SimConfig) -> Self {
        World {
            x: config.start_x,
            y: config.start_y,
            heading: wrap_angle(config.start_heading),
            linear: 0.0,
            angular: 0.0,
            blade_rpm: 0.0,
            cutting_height: 0.0,
            battery: config.battery_start.clamp(0.0, 100.0),
            docked: false,
            shut_down: false,
            actuation_fault: false,
            left_ticks: 0.0,
            right_ticks: 0.0,
            last_sync: Instant::now(),
            drive_commands: 0,
            stop_commands: 0,
            config,
        }
    }

    fn step(&mut self, dt: f64) {
        if dt <= 0.0 {
            return;
        }

        let half_base = self.config.wheel_base / 2.0;
        let ticks_per_meter = f64::from(self.config.ticks_per_revolution) / (2.0 * PI * self.config.wheel_radius);
        self.left_ticks += (self.linear - self.angular * half_base) * dt * ticks_per_meter;
        self.right_ticks += (self.linear + self.angular * half_base) * dt * ticks_per_meter;

        let mid_heading = self.heading + self.angular * dt / 2.0;
        self.x += self.linear * dt * mid_heading.cos();
        self.y += self.linear * dt * mid_heading.sin();
        self.heading = wrap_angle(self.heading + self.angular * dt);

        if self.docked {
            self.battery += self.config.charge_rate * dt;
        } else {
            self.battery -= self.config.idle_drain * dt + self.config.drive_drain * self.linear.abs() * dt;
            if self.blade_rpm > 0.0 {
                self.battery -= self.config.blade_drain * dt;
            }
        }
        self.battery = self.battery.clamp(0.0, 100.0);
    }

    fn sync(&mut self) {
        if !self.config.realtime {
            return;
        }
        let now = Instant::now();
        let dt = now.duration_since(self.last_sync).as_secs_f64();
        self.last_sync = now;
        self.step(dt);
    }

    fn check_actuation(&self) -> Result<(), HalError> {
        if self.actuation_fault {
            return Err(HalError::Actuation("injected motor driver fault".to_string()));
        }
        if self.shut_down {
            return Err(HalError::Power("power rail is shut down".to_string()));
        }
        Ok(())
    }

    // Distance along a ray from the robot to the first obstacle surface.
    fn ray_distance(&self, bearing: f64, max_range: f64) -> Option<f64> {
        let (dx, dy) = (bearing.cos(), bearing.sin());
        self.config
            .obstacles
            .iter()
            .filter_map(|o| {
                let (ox, oy) = (o.x - self.x, o.y - self.y);
                let along = ox * dx + oy * dy;
                let perpendicular_sq = ox * ox + oy * oy - along * along;
                let radius_sq = o.radius * o.radius;
                if along < 0.0 || perpendicular_sq > radius_sq {
                    return None;
                }
                Some((along - (radius_sq - perpendicular_sq).sqrt()).max(0.0))
            })
            .filter(|d| *d <= max_range)
            .min_by(|a, b| a.total_cmp(b))
    }

    fn distance_to_charger(&self) -> f64 {
        Point::new(self.x, self.y).distance_to(&self.config.charger)
    }
}

fn lock(world: &Mutex<World>) -> MutexGuard<'_, World> {
    world.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Shared simulated world. Clone it freely; every clone and every handle
/// refers to the same ground truth.
#[derive(Clone)]
pub struct SimWorld {
    world: Arc<Mutex<World>>,
}

impl SimWorld {
    pub fn new(config: SimConfig) -> Self {
        info!(
            "Simulated world: {} obstacles, charger at ({:.2}, {:.2})",
            config.obstacles.len(),
            config.charger.x,
            config.charger.y
        );
        SimWorld {
            world: Arc::new(Mutex::new(World::new(config))),
        }
    }

    /// Advances the simulation by `dt` seconds.
    pub fn step(&self, dt: f64) {
        lock(&self.world).step(dt);
    }

    pub fn actuation(&self) -> SimActuation {
        SimActuation { world: self.world.clone() }
    }

    pub fn power(&self) -> SimPower {
        SimPower { world: self.world.clone() }
    }

    pub fn docking(&self) -> SimDocking {
        SimDocking { world: self.world.clone() }
    }

    pub fn sensors(&self) -> SimSensors {
        SimSensors { world: self.world.clone() }
    }

    /// Ground-truth position and heading
    pub fn true_pose(&self) -> (f64, f64, f64) {
        let world = lock(&self.world);
        (world.x, world.y, world.heading)
    }

    /// Last drive command applied (linear, angular)
    pub fn drive_command(&self) -> (f64, f64) {
        let world = lock(&self.world);
        (world.linear, world.angular)
    }

    pub fn battery(&self) -> f64 {
        lock(&self.world).battery
    }

    pub fn set_battery(&self, level: f64) {
        lock(&self.world).battery = level.clamp(0.0, 100.0);
    }

    pub fn is_docked(&self) -> bool {
        lock(&self.world).docked
    }

    pub fn blade_rpm(&self) -> f64 {
        lock(&self.world).blade_rpm
    }

    pub fn cutting_height(&self) -> f64 {
        lock(&self.world).cutting_height
    }

    /// Number of `stop_all` calls received
    pub fn stop_count(&self) -> u64 {
        lock(&self.world).stop_commands
    }

    /// Number of `set_drive_speed` calls received
    pub fn drive_count(&self) -> u64 {
        lock(&self.world).drive_commands
    }

    pub fn add_obstacle(&self, obstacle: SimObstacle) {
        lock(&self.world).config.obstacles.push(obstacle);
    }

    /// Makes every actuation call fail until cleared.
    pub fn set_actuation_fault(&self, faulty: bool) {
        lock(&self.world).actuation_fault = faulty;
    }
}

impl Default for SimWorld {
    fn default() -> Self {
        SimWorld::new(SimConfig::default())
    }
}

pub struct SimActuation {
    world: Arc<Mutex<World>>,
}

impl ActuationBoundary for SimActuation {
    fn set_drive_speed(&mut self, linear: f64, angular: f64) -> Result<(), HalError> {
        let mut world = lock(&self.world);
        world.check_actuation()?;
        world.sync();
        world.drive_commands += 1;
        if world.docked && linear != 0.0 {
            debug!("Leaving the charging station");
            world.docked = false;
        }
        world.linear = linear;
        world.angular = angular;
        Ok(())
    }

    fn stop_all(&mut self) -> Result<(), HalError> {
        let mut world = lock(&self.world);
        world.sync();
        world.stop_commands += 1;
        world.linear = 0.0;
        world.angular = 0.0;
        world.blade_rpm = 0.0;
        Ok(())
    }

    fn start_blade(&mut self, rpm: f64) -> Result<(), HalError> {
        let mut world = lock(&self.world);
        world.check_actuation()?;
        world.blade_rpm = rpm.max(0.0);
        Ok(())
    }

    fn stop_blade(&mut self) -> Result<(), HalError> {
        lock(&self.world).blade_rpm = 0.0;
        Ok(())
    }

    fn set_cutting_height(&mut self, height_cm: f64) -> Result<(), HalError> {
        let mut world = lock(&self.world);
        world.check_actuation()?;
        world.cutting_height = height_cm;
        Ok(())
    }
}

pub struct SimPower {
    world: Arc<Mutex<World>>,
}

impl PowerBoundary for SimPower {
    fn get_battery_level(&mut self) -> Result<f64, HalError> {
        let mut world = lock(&self.world);
        world.sync();
        Ok(world.battery)
    }

    fn emergency_shutdown(&mut self) -> Result<(), HalError> {
        let mut world = lock(&self.world);
        warn!("Simulated power rail shut down");
        world.shut_down = true;
        world.linear = 0.0;
        world.angular = 0.0;
        world.blade_rpm = 0.0;
        Ok(())
    }
}

pub struct SimDocking {
    world: Arc<Mutex<World>>,
}

impl DockingBoundary for SimDocking {
    fn dock_to_station(&mut self) -> bool {
        let mut world = lock(&self.world);
        world.sync();
        let distance = world.distance_to_charger();
        if distance > world.config.dock_radius {
            debug!("Docking failed: charger {:.2} m away", distance);
            return false;
        }
        let charger = world.config.charger;
        world.x = charger.x;
        world.y = charger.y;
        world.linear = 0.0;
        world.angular = 0.0;
        world.docked = true;
        true
    }
}

pub struct SimSensors {
    world: Arc<Mutex<World>>,
}

impl SensorBoundary for SimSensors {
    fn read_encoders(&mut self) -> Result<Option<EncoderReading>, HalError> {
        let mut world = lock(&self.world);
        world.sync();
        let left = world.left_ticks.trunc();
        let right = world.right_ticks.trunc();
        world.left_ticks -= left;
        world.right_ticks -= right;
        Ok(Some(EncoderReading {
            left_ticks: left as i64,
            right_ticks: right as i64,
            ticks_per_revolution: world.config.ticks_per_revolution,
        }))
    }

    fn read_imu(&mut self) -> Result<Option<ImuReading>, HalError> {
        let mut world = lock(&self.world);
        world.sync();
        Ok(Some(ImuReading {
            heading: world.heading,
            angular_velocity: Some(world.angular),
        }))
    }

    fn read_proximity(&mut self) -> Result<ProximityReading, HalError> {
        let mut world = lock(&self.world);
        world.sync();
        let max_range = world.config.proximity_max_range;
        let distances = world
            .config
            .proximity_angles_deg
            .iter()
            .map(|angle| world.ray_distance(world.heading + angle.to_radians(), max_range))
            .collect();
        Ok(ProximityReading { distances })
    }

    fn read_rangefinder(&mut self) -> Result<Option<Vec<RangePoint>>, HalError> {
        let mut world = lock(&self.world);
        if !world.config.rangefinder_enabled {
            return Ok(None);
        }
        world.sync();

        // Nearest surface point of every obstacle in range, robot frame
        let (sin_h, cos_h) = world.heading.sin_cos();
        let points = world
            .config
            .obstacles
            .iter()
            .filter_map(|o| {
                let (dx, dy) = (o.x - world.x, o.y - world.y);
                let center = dx.hypot(dy);
                let surface = (center - o.radius).max(0.0);
                if surface > world.config.rangefinder_max_range || center <= f64::EPSILON {
                    return None;
                }
                let scale = surface / center;
                let (wx, wy) = (dx * scale, dy * scale);
                Some(RangePoint::new(wx * cos_h + wy * sin_h, -wx * sin_h + wy * cos_h))
            })
            .collect();
        Ok(Some(points))
    }

    fn read_vision(&mut self) -> Result<Option<Vec<VisionDetection>>, HalError> {
        // No camera in the simulated robot
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn offline(config: SimConfig) -> SimWorld {
        SimWorld::new(SimConfig { realtime: false, ..config })
    }

    #[test]
    fn straight_drive_produces_equal_ticks() {
        let world = offline(SimConfig::default());
        let mut actuation = world.actuation();
        let mut sensors = world.sensors();
        actuation.set_drive_speed(0.5, 0.0).unwrap();
        world.step(1.0);

        let reading = sensors.read_encoders().unwrap().unwrap();
        assert_eq!(reading.left_ticks, reading.right_ticks);
        // 0.5 m on a 0.1 m wheel, 360 ticks per revolution
        assert_eq!(reading.left_ticks, (0.5 / (2.0 * PI * 0.1) * 360.0) as i64);
        let (x, y, _) = world.true_pose();
        assert_relative_eq!(x, 0.5, epsilon = 1e-9);
        assert_relative_eq!(y, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn proximity_sees_obstacle_at_mounting_angle() {
        let world = offline(SimConfig {
            obstacles: vec![SimObstacle {
                x: 1.0,
                y: 1.0,
                radius: 0.2,
            }],
            ..SimConfig::default()
        });
        let reading = world.sensors().read_proximity().unwrap();
        assert_eq!(reading.distances[0], None);
        let left = reading.distances[1].unwrap();
        assert_relative_eq!(left, 2f64.sqrt() - 0.2, epsilon = 1e-9);
    }

    #[test]
    fn rangefinder_reports_robot_frame() {
        let world = offline(SimConfig {
            start_heading: PI / 2.0,
            obstacles: vec![SimObstacle {
                x: 0.0,
                y: 3.0,
                radius: 0.5,
            }],
            ..SimConfig::default()
        });
        let points = world.sensors().read_rangefinder().unwrap().unwrap();
        assert_eq!(points.len(), 1);
        assert_relative_eq!(points[0].x, 2.5, epsilon = 1e-9);
        assert_relative_eq!(points[0].y, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn battery_drains_and_charges() {
        let world = offline(SimConfig {
            battery_start: 50.0,
            ..SimConfig::default()
        });
        world.actuation().set_drive_speed(1.0, 0.0).unwrap();
        world.step(10.0);
        let drained = world.battery();
        assert!(drained < 50.0);

        world.actuation().stop_all().unwrap();
        assert!(!world.docking().dock_to_station());

        let world = offline(SimConfig {
            battery_start: 50.0,
            ..SimConfig::default()
        });
        assert!(world.docking().dock_to_station());
        world.step(10.0);
        assert!(world.battery() > 50.0);
    }

    #[test]
    fn injected_fault_fails_actuation() {
        let world = offline(SimConfig::default());
        world.set_actuation_fault(true);
        assert!(matches!(
            world.actuation().set_drive_speed(0.1, 0.0),
            Err(HalError::Actuation(_))
        ));
        // stopping always succeeds
        assert!(world.actuation().stop_all().is_ok());
    }
}
