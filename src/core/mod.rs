// core/mod.rs

// Declares the decision core of the mower and the `Core` handle shared by the
// control loop, the pose-fusion loop, the sensor loop and the external API.
// Every component sits behind its own short-held lock; no lock is held across
// I/O except the actuator lock inside the safety gate. Battery safety rules are
// applied here so any thread that reads the battery can act on it at once.

pub mod api;
pub mod localization;
pub mod perception;
pub mod safety;
pub mod state;
pub mod supervisor;

pub use api::{MowerApi, MowerStatus};
pub use localization::{EstimatorConfig, EstimatorFault, Pose, PoseEstimator, wrap_angle};
pub use perception::{Obstacle, ObstacleSource, ObstacleTracker, PerceptionConfig};
pub use safety::SafetyGate;
pub use state::{RobotState, RobotStats, SharedState, StateSnapshot};
pub use supervisor::{ChargingStationConfig, ControlConfig, RobotStateMachine};

// Dependencies
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use crate::hal::{BoxedActuation, BoxedPower, HalError};
use crate::navigation::{AvoidanceLayer, CoveragePlanner};
use crate::{MowerConfig, MowerError};

/// Locks a mutex, recovering the data if another thread panicked while holding it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Battery thresholds in percent
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct BatteryConfig {
    pub low: f64,      // return to charge below this
    pub critical: f64, // emergency stop below this
    pub full: f64,     // leave the charger at or above this
    pub shutdown: f64, // cut the power rail below this
}

impl Default for BatteryConfig {
    fn default() -> Self {
        BatteryConfig {
            low: 20.0,
            critical: 15.0,
            full: 95.0,
            shutdown: 5.0,
        }
    }
}

/// Classification of a battery reading against the thresholds
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BatteryCondition {
    Normal,
    Low,
    Critical,
    Depleted,
}

impl BatteryConfig {
    pub fn classify(&self, level: f64) -> BatteryCondition {
        if level < self.shutdown {
            BatteryCondition::Depleted
        } else if level < self.critical {
            BatteryCondition::Critical
        } else if level < self.low {
            BatteryCondition::Low
        } else {
            BatteryCondition::Normal
        }
    }
}

// Core struct: the shared component handles. Cloning is cheap; every clone
// refers to the same estimator, planner, avoidance layer, state and gate.
#[derive(Clone)]
pub struct Core {
    estimator: Arc<Mutex<PoseEstimator>>,
    planner: Arc<Mutex<CoveragePlanner>>,
    avoidance: Arc<Mutex<AvoidanceLayer>>,
    state: Arc<SharedState>,
    gate: Arc<SafetyGate>,
    power: Arc<Mutex<BoxedPower>>,
    battery: BatteryConfig,
    battery_critical: Arc<AtomicBool>, // set on the first critical reading, cleared on recovery
    power_cut: Arc<AtomicBool>,
    emergency: Arc<Mutex<()>>, // serializes trigger and clear
    epoch: Instant,
}

impl Core {
    /// Builds every component from `config` and wraps the actuation boundary
    /// in a safety gate.
    pub fn new(config: &MowerConfig, actuation: BoxedActuation, power: BoxedPower) -> Result<Self, MowerError> {
        let mut planner = CoveragePlanner::with_areas(config.planner.clone(), config.areas.clone());
        if let Some(origin) = config.gps_origin {
            planner.set_origin(origin.latitude, origin.longitude)?;
        }

        let epoch = Instant::now();
        info!("Mower core initialized");

        Ok(Core {
            estimator: Arc::new(Mutex::new(PoseEstimator::new(config.estimator.clone()))),
            planner: Arc::new(Mutex::new(planner)),
            avoidance: Arc::new(Mutex::new(AvoidanceLayer::new(config.avoidance.clone()))),
            state: Arc::new(SharedState::new(0.0)),
            gate: Arc::new(SafetyGate::new(actuation)),
            power: Arc::new(Mutex::new(power)),
            battery: config.battery.clone(),
            battery_critical: Arc::new(AtomicBool::new(false)),
            power_cut: Arc::new(AtomicBool::new(false)),
            emergency: Arc::new(Mutex::new(())),
            epoch,
        })
    }

    /// Seconds since the core was created, on a monotonic clock.
    pub fn now(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    pub fn estimator(&self) -> MutexGuard<'_, PoseEstimator> {
        lock(&self.estimator)
    }

    pub fn planner(&self) -> MutexGuard<'_, CoveragePlanner> {
        lock(&self.planner)
    }

    pub fn avoidance(&self) -> MutexGuard<'_, AvoidanceLayer> {
        lock(&self.avoidance)
    }

    pub fn state(&self) -> &SharedState {
        &self.state
    }

    pub fn gate(&self) -> &SafetyGate {
        &self.gate
    }

    pub fn battery_config(&self) -> &BatteryConfig {
        &self.battery
    }

    /// Current pose estimate
    pub fn pose(&self) -> Pose {
        self.estimator().get_pose()
    }

    pub fn read_battery(&self) -> Result<f64, HalError> {
        lock(&self.power).get_battery_level()
    }

    /// True once the power rail has been cut for a depleted battery.
    pub fn power_cut(&self) -> bool {
        self.power_cut.load(Ordering::SeqCst)
    }

    /// Latches the safety gate (stopping every motor once) and enters
    /// EMERGENCY_STOP. `resume` overrides the state restored on clear.
    /// Returns `false` when the robot was already stopped.
    pub fn trigger_emergency_stop(&self, resume: Option<RobotState>, now: f64, reason: &str) -> bool {
        let _guard = lock(&self.emergency);
        let engaged = self.gate.engage();
        let entered = self.state.enter_emergency_stop(resume, now, reason).is_some();
        engaged || entered
    }

    /// Leaves EMERGENCY_STOP for the remembered state and releases the gate.
    pub fn clear_emergency_stop(&self, now: f64) -> Option<RobotState> {
        let _guard = lock(&self.emergency);
        let resumed = self.state.leave_emergency_stop(now)?;
        self.gate.release();
        Some(resumed)
    }

    /// Applies the battery rules to one reading: below `low` an idle or mowing
    /// robot returns to charge, below `critical` the robot stops with
    /// RETURNING_TO_CHARGE as the state to resume, below `shutdown` the power
    /// rail is cut. `None` for a malformed reading.
    pub fn apply_battery_level(&self, level: f64, now: f64) -> Option<BatteryCondition> {
        if !level.is_finite() {
            warn!("Battery reading ignored: {}", level);
            return None;
        }
        let level = level.clamp(0.0, 100.0);
        self.state.update_stats(|stats| stats.battery_level = Some(level));

        let condition = self.battery.classify(level);
        match condition {
            BatteryCondition::Depleted => {
                self.force_critical_stop(level, now);
                if !self.power_cut.swap(true, Ordering::SeqCst) {
                    error!("Battery depleted ({:.1}%), cutting the power rail", level);
                    if let Err(e) = lock(&self.power).emergency_shutdown() {
                        error!("Emergency shutdown failed: {}", e);
                    }
                }
            }
            BatteryCondition::Critical => {
                self.force_critical_stop(level, now);
                self.return_to_charge(level, now);
            }
            BatteryCondition::Low => {
                self.battery_critical.store(false, Ordering::SeqCst);
                self.return_to_charge(level, now);
            }
            BatteryCondition::Normal => self.battery_critical.store(false, Ordering::SeqCst),
        }
        Some(condition)
    }

    // Edge-triggered: after an operator clears the stop, the robot may keep
    // driving home on the same critical charge.
    fn force_critical_stop(&self, level: f64, now: f64) {
        match self.state.current() {
            RobotState::Charging | RobotState::EmergencyStop => return,
            RobotState::Idle
            | RobotState::Mowing
            | RobotState::ReturningToCharge
            | RobotState::ManualControl
            | RobotState::Error => {}
        }
        if self.battery_critical.swap(true, Ordering::SeqCst) {
            return;
        }
        error!("Battery critical ({:.1}%)", level);
        self.trigger_emergency_stop(Some(RobotState::ReturningToCharge), now, "battery critical");
    }

    fn return_to_charge(&self, level: f64, now: f64) {
        let allowed = [RobotState::Idle, RobotState::Mowing];
        if self
            .state
            .transition_if(&allowed, RobotState::ReturningToCharge, now, "battery low")
            .is_ok()
        {
            warn!("Battery low ({:.1}%), returning to charge", level);
        }
    }
}
