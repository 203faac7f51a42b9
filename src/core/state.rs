// core/state.rs

// Operating state of the mower. A closed enum matched exhaustively at every
// transition site, held in a small mutex-protected cell shared by the control
// loop, the sensor loops and the external API. Transitions are compare-and-set:
// a caller names the states it may leave, so two threads racing on the same
// state cannot both win. Running statistics live next to the state.

// Dependencies
use log::{error, info};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Mutex;

use super::localization::Pose;
use super::lock;

// Robot operating states
#[derive(Clone, Copy, Serialize, Deserialize, Debug, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RobotState {
    #[default]
    Idle,              // Stopped, awaiting a task
    Mowing,            // Following the coverage path
    ReturningToCharge, // Driving to the charging station
    Charging,          // Docked and charging
    ManualControl,     // Driven by an external operator
    Error,             // Fault in the control tick
    EmergencyStop,     // Latched stop, cleared externally
}

impl RobotState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RobotState::Idle => "idle",
            RobotState::Mowing => "mowing",
            RobotState::ReturningToCharge => "returning_to_charge",
            RobotState::Charging => "charging",
            RobotState::ManualControl => "manual_control",
            RobotState::Error => "error",
            RobotState::EmergencyStop => "emergency_stop",
        }
    }

    /// States in which the control loop drives the wheels on its own.
    pub fn is_autonomous_motion(&self) -> bool {
        match self {
            RobotState::Mowing | RobotState::ReturningToCharge => true,
            RobotState::Idle
            | RobotState::Charging
            | RobotState::ManualControl
            | RobotState::Error
            | RobotState::EmergencyStop => false,
        }
    }
}

impl fmt::Display for RobotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of the state cell
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq)]
pub struct StateSnapshot {
    pub current: RobotState,
    pub previous: RobotState,
    pub since: f64, // time the current state was entered
}

/// Running statistics
#[derive(Clone, Copy, Serialize, Deserialize, Debug, Default, PartialEq)]
pub struct RobotStats {
    pub total_runtime_secs: f64,
    pub mowing_time_secs: f64,
    pub charging_cycles: u32,
    pub current_position: Pose,
    pub battery_level: Option<f64>, // last reading, percent
    pub transitions: u64,
}

#[derive(Debug)]
struct StateCell {
    current: RobotState,
    previous: RobotState,
    since: f64,
}

// SharedState: the single RobotState instance and its statistics
#[derive(Debug)]
pub struct SharedState {
    cell: Mutex<StateCell>,
    stats: Mutex<RobotStats>,
}

impl SharedState {
    /// Starts in IDLE
    pub fn new(now: f64) -> Self {
        SharedState {
            cell: Mutex::new(StateCell {
                current: RobotState::Idle,
                previous: RobotState::Idle,
                since: now,
            }),
            stats: Mutex::new(RobotStats::default()),
        }
    }

    pub fn current(&self) -> RobotState {
        lock(&self.cell).current
    }

    pub fn snapshot(&self) -> StateSnapshot {
        let cell = lock(&self.cell);
        StateSnapshot {
            current: cell.current,
            previous: cell.previous,
            since: cell.since,
        }
    }

    /// Unconditional transition. Returns the state that was left.
    pub fn transition(&self, to: RobotState, now: f64, reason: &str) -> RobotState {
        let mut cell = lock(&self.cell);
        let from = cell.current;
        self.apply(&mut cell, to, from, now, reason);
        from
    }

    /// Transitions only when the current state is one of `allowed`.
    /// Returns the state that was left, or the current state on rejection.
    pub fn transition_if(
        &self,
        allowed: &[RobotState],
        to: RobotState,
        now: f64,
        reason: &str,
    ) -> Result<RobotState, RobotState> {
        let mut cell = lock(&self.cell);
        let from = cell.current;
        if !allowed.contains(&from) {
            return Err(from);
        }
        self.apply(&mut cell, to, from, now, reason);
        Ok(from)
    }

    /// Enters EMERGENCY_STOP, remembering `resume` (or the current state) as
    /// the state to restore on clear. `None` when already stopped.
    pub fn enter_emergency_stop(&self, resume: Option<RobotState>, now: f64, reason: &str) -> Option<RobotState> {
        let mut cell = lock(&self.cell);
        let from = cell.current;
        if from == RobotState::EmergencyStop {
            return None;
        }
        self.apply(&mut cell, RobotState::EmergencyStop, resume.unwrap_or(from), now, reason);
        Some(from)
    }

    /// Leaves EMERGENCY_STOP for the remembered state. `None` when not stopped.
    pub fn leave_emergency_stop(&self, now: f64) -> Option<RobotState> {
        let mut cell = lock(&self.cell);
        if cell.current != RobotState::EmergencyStop {
            return None;
        }
        let resume = match cell.previous {
            RobotState::EmergencyStop => RobotState::Idle,
            other => other,
        };
        self.apply(&mut cell, resume, RobotState::EmergencyStop, now, "emergency stop cleared");
        Some(resume)
    }

    pub fn stats(&self) -> RobotStats {
        *lock(&self.stats)
    }

    pub fn update_stats(&self, update: impl FnOnce(&mut RobotStats)) {
        update(&mut lock(&self.stats));
    }

    fn apply(&self, cell: &mut StateCell, to: RobotState, previous: RobotState, now: f64, reason: &str) {
        let from = cell.current;
        if from == to {
            return;
        }
        cell.previous = previous;
        cell.current = to;
        cell.since = now;
        lock(&self.stats).transitions += 1;

        match to {
            RobotState::Error | RobotState::EmergencyStop => error!("State {} -> {}: {}", from, to, reason),
            _ => info!("State {} -> {}: {}", from, to, reason),
        }
    }
}

impl Default for SharedState {
    fn default() -> Self {
        SharedState::new(0.0)
    }
}
