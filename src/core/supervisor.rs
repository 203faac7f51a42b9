// core/supervisor.rs

// Top-level state machine of the mower, evaluated once per control tick. A tick
// applies the battery rules, keeps the blade in step with the state, then runs
// the behaviour of the current state: follow the coverage path, drive home and
// dock, wait on the charger, or hold still. Every motion command goes through
// the avoidance layer and then the safety gate. A failure inside a tick is a
// state fault: the robot halts and enters ERROR.

// Dependencies
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};

use super::{BatteryConfig, Core, RobotState};
use crate::hal::BoxedDocking;
use crate::navigation::{MotionController, Point, VelocityCommand};
use crate::{MowerConfig, MowerError};

/// Charger location in the local frame
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ChargingStationConfig {
    pub position: Point,
    pub docking_precision: f64, // distance at which docking is attempted (m)
}

impl Default for ChargingStationConfig {
    fn default() -> Self {
        ChargingStationConfig {
            position: Point::new(0.0, 0.0),
            docking_precision: 0.1,
        }
    }
}

/// Loop rates and supervisor policy
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ControlConfig {
    pub rate_hz: f64,        // state machine tick
    pub fusion_rate_hz: f64, // encoder and inertial polling
    pub sensor_rate_hz: f64, // obstacle sensors and battery
    pub error_cooldown_secs: f64,
    pub error_requires_clear: bool, // stay in ERROR until cleared externally
    pub blade_rpm: f64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        ControlConfig {
            rate_hz: 10.0,
            fusion_rate_hz: 50.0,
            sensor_rate_hz: 10.0,
            error_cooldown_secs: 5.0,
            error_requires_clear: false,
            blade_rpm: 3000.0,
        }
    }
}

pub struct RobotStateMachine {
    core: Core,
    docking: BoxedDocking,
    controller: MotionController,
    station: ChargingStationConfig,
    control: ControlConfig,
    battery: BatteryConfig,
    blade_running: bool,
    cutting_height: Option<f64>, // last height sent to the actuators
    last_tick: Option<f64>,
    last_observed: RobotState,
}

impl RobotStateMachine {
    pub fn new(core: Core, docking: BoxedDocking, config: &MowerConfig) -> Self {
        RobotStateMachine {
            core,
            docking,
            controller: MotionController::new(config.controller.clone()),
            station: config.charging_station.clone(),
            control: config.control.clone(),
            battery: config.battery.clone(),
            blade_running: false,
            cutting_height: None,
            last_tick: None,
            last_observed: RobotState::Idle,
        }
    }

    pub fn core(&self) -> &Core {
        &self.core
    }

    pub fn blade_running(&self) -> bool {
        self.blade_running
    }

    /// Runs one control tick at time `now` and returns the state afterwards.
    pub fn tick(&mut self, now: f64) -> RobotState {
        if self.core.state().current() != RobotState::EmergencyStop {
            match self.core.read_battery() {
                Ok(level) => {
                    self.core.apply_battery_level(level, now);
                }
                Err(e) => warn!("Battery read failed: {}", e),
            }
        }

        let state = self.core.state().current();
        if let Err(e) = self.step(state, now) {
            self.fail(state, now, &e);
        }

        self.update_stats(state, now);
        self.core.state().current()
    }

    /// Stops the drive and the blade, e.g. before the control loop exits.
    pub fn shutdown(&mut self) {
        if let Err(e) = self.core.gate().stop_all() {
            error!("Final stop failed: {}", e);
        }
        self.blade_running = false;
        self.cutting_height = None;
    }

    fn step(&mut self, state: RobotState, now: f64) -> Result<(), MowerError> {
        self.sync_outputs(state)?;
        self.run_state(state, now)?;
        let after = self.core.state().current();
        self.sync_outputs(after)
    }

    fn run_state(&mut self, state: RobotState, now: f64) -> Result<(), MowerError> {
        match state {
            RobotState::Idle | RobotState::ManualControl => Ok(()),
            RobotState::Mowing => self.mow(now),
            RobotState::ReturningToCharge => self.return_to_charger(now),
            RobotState::Charging => {
                self.charge(now);
                Ok(())
            }
            RobotState::Error => {
                self.hold_still();
                self.recover_from_error(now);
                Ok(())
            }
            RobotState::EmergencyStop => {
                self.hold_still();
                Ok(())
            }
        }
    }

    fn mow(&mut self, now: f64) -> Result<(), MowerError> {
        let pose = self.core.pose();
        let position = Point::new(pose.x, pose.y);
        let next = self.core.planner().get_next_waypoint(&position);

        let Some(waypoint) = next else {
            self.core.gate().halt()?;
            let progress = self.core.planner().get_progress();
            if self
                .core
                .state()
                .transition_if(&[RobotState::Mowing], RobotState::Idle, now, "coverage complete")
                .is_ok()
            {
                info!("Mowing task finished: {} waypoints", progress.waypoints_total);
            }
            return Ok(());
        };

        if self.cutting_height != Some(waypoint.blade_height) {
            self.core.gate().set_cutting_height(waypoint.blade_height)?;
            self.cutting_height = Some(waypoint.blade_height);
            debug!("Cutting height set to {:.1} cm", waypoint.blade_height);
        }

        let nominal = self.controller.track_waypoint(&pose, &waypoint);
        self.drive(nominal, &position, now)
    }

    fn return_to_charger(&mut self, now: f64) -> Result<(), MowerError> {
        let pose = self.core.pose();
        let position = Point::new(pose.x, pose.y);
        let distance = position.distance_to(&self.station.position);

        if distance > self.station.docking_precision {
            let nominal = self.controller.track_point(&pose, &self.station.position);
            return self.drive(nominal, &position, now);
        }

        self.core.gate().halt()?;
        if self.docking.dock_to_station() {
            self.core
                .state()
                .transition_if(&[RobotState::ReturningToCharge], RobotState::Charging, now, "docked")
                .ok();
        } else {
            warn!("Docking attempt failed {:.2} m from the charger", distance);
        }
        Ok(())
    }

    fn charge(&mut self, now: f64) {
        let Some(level) = self.core.state().stats().battery_level else {
            return;
        };
        if level < self.battery.full {
            return;
        }
        if self
            .core
            .state()
            .transition_if(&[RobotState::Charging], RobotState::Idle, now, "battery full")
            .is_ok()
        {
            self.core.state().update_stats(|stats| stats.charging_cycles += 1);
            info!("Charging complete at {:.1}%", level);
        }
    }

    // Zero command; a failure here must not keep the robot in its current state.
    fn hold_still(&self) {
        if let Err(e) = self.core.gate().halt() {
            debug!("Halt failed: {}", e);
        }
    }

    fn recover_from_error(&mut self, now: f64) {
        if self.control.error_requires_clear {
            return;
        }
        let since = self.core.state().snapshot().since;
        if now - since < self.control.error_cooldown_secs {
            return;
        }
        self.core
            .state()
            .transition_if(&[RobotState::Error], RobotState::Idle, now, "error cool-down elapsed")
            .ok();
    }

    // Nominal command -> avoidance -> gate
    fn drive(&mut self, nominal: VelocityCommand, position: &Point, now: f64) -> Result<(), MowerError> {
        let command = self
            .core
            .avoidance()
            .compute_command(nominal.linear, nominal.angular, position, now);
        self.core.gate().drive(command)?;
        Ok(())
    }

    // Keeps the blade and the drive in step with the state: the blade spins only
    // while mowing, and leaving a driving state halts the wheels.
    fn sync_outputs(&mut self, state: RobotState) -> Result<(), MowerError> {
        if state == self.last_observed {
            return Ok(());
        }
        let previous = std::mem::replace(&mut self.last_observed, state);

        if previous.is_autonomous_motion() && !state.is_autonomous_motion() {
            self.core.gate().halt()?;
        }
        if state == RobotState::Mowing {
            self.cutting_height = None;
            self.blade_running = self.core.gate().start_blade(self.control.blade_rpm)?;
            if self.blade_running {
                info!("Blade started at {:.0} rpm", self.control.blade_rpm);
            }
        } else if self.blade_running {
            self.blade_running = false;
            self.core.gate().stop_blade()?;
            info!("Blade stopped");
        }
        Ok(())
    }

    fn fail(&mut self, state: RobotState, now: f64, fault: &MowerError) {
        error!("Control tick failed in {}: {}", state, fault);
        if let Err(e) = self.core.gate().halt() {
            error!("Halt after fault failed: {}", e);
        }
        if self.blade_running {
            self.blade_running = false;
            if let Err(e) = self.core.gate().stop_blade() {
                error!("Blade stop after fault failed: {}", e);
            }
        }

        match state {
            // a stopped robot stays stopped, a faulted one stays faulted
            RobotState::EmergencyStop | RobotState::Error => {}
            RobotState::Idle
            | RobotState::Mowing
            | RobotState::ReturningToCharge
            | RobotState::Charging
            | RobotState::ManualControl => {
                let reason = fault.to_string();
                self.core
                    .state()
                    .transition_if(&[state], RobotState::Error, now, &reason)
                    .ok();
            }
        }
    }

    fn update_stats(&mut self, state: RobotState, now: f64) {
        let dt = self.last_tick.map(|last| (now - last).max(0.0)).unwrap_or(0.0);
        self.last_tick = Some(now);
        let pose = self.core.pose();
        self.core.state().update_stats(|stats| {
            stats.total_runtime_secs += dt;
            if state == RobotState::Mowing {
                stats.mowing_time_secs += dt;
            }
            stats.current_position = pose;
        });
    }
}
