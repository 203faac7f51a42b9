// core/api.rs

// Operations exposed to external callers (a remote-control surface, the demo
// binary, tests). These are the only entry points through which the outside
// world may change what the core is doing; everything else is driven by the
// control, fusion and sensor loops.

// Dependencies
use log::{info, warn};
use serde::{Deserialize, Serialize};

use super::{Core, Pose, RobotState, RobotStats};
use crate::navigation::{AvoidanceStatistics, GeoPoint, Point, Progress, VelocityCommand};
use crate::{MowerError, Result};

/// Status report returned by `get_status`
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct MowerStatus {
    pub state: RobotState,
    pub previous_state: RobotState,
    pub position: Pose,
    pub geo_position: Option<GeoPoint>, // only with a GPS origin
    pub battery_level: Option<f64>,
    pub progress: Progress,
    pub area_id: Option<String>,
    pub emergency_stop: bool,
    pub stats: RobotStats,
    pub avoidance: AvoidanceStatistics,
}

// MowerApi: cheap to clone, every clone drives the same core
#[derive(Clone)]
pub struct MowerApi {
    core: Core,
    max_linear: f64,
    max_angular: f64,
}

impl MowerApi {
    pub fn new(core: Core, max_linear: f64, max_angular: f64) -> Self {
        MowerApi {
            core,
            max_linear,
            max_angular,
        }
    }

    /// Loads `area_id` and starts mowing. Allowed from IDLE or MANUAL_CONTROL.
    pub fn start_mowing_task(&self, area_id: &str) -> Result<()> {
        let allowed = [RobotState::Idle, RobotState::ManualControl];
        let current = self.core.state().current();
        if !allowed.contains(&current) {
            warn!("Mowing task {} rejected in state {}", area_id, current);
            return Err(MowerError::State(format!("cannot start mowing from {}", current)));
        }

        {
            let mut planner = self.core.planner();
            planner.load_area_by_id(area_id).inspect_err(|e| warn!("Mowing task rejected: {}", e))?;
            if planner.current_path().is_empty() {
                warn!("Area {} yields no waypoints", area_id);
                return Err(MowerError::State(format!("area {} yields no waypoints", area_id)));
            }
        }
        self.core.avoidance().reset();

        let reason = format!("mowing task {}", area_id);
        self.core
            .state()
            .transition_if(&allowed, RobotState::Mowing, self.core.now(), &reason)
            .map_err(|state| MowerError::State(format!("cannot start mowing from {}", state)))?;
        Ok(())
    }

    /// Enters or leaves MANUAL_CONTROL. Entering is allowed from IDLE only.
    pub fn set_manual_control(&self, enabled: bool) -> Result<RobotState> {
        let now = self.core.now();
        let (allowed, target) = if enabled {
            (RobotState::Idle, RobotState::ManualControl)
        } else {
            (RobotState::ManualControl, RobotState::Idle)
        };

        match self.core.state().transition_if(&[allowed], target, now, "manual control") {
            Ok(_) => {
                if !enabled {
                    self.core.gate().halt()?;
                }
                Ok(target)
            }
            Err(state) if state == target => Ok(target),
            Err(state) => Err(MowerError::State(format!("manual control unavailable in {}", state))),
        }
    }

    /// Forwards an operator command, clamped to the cruise limits. Only in
    /// MANUAL_CONTROL; a latched emergency stop still wins.
    pub fn manual_drive(&self, linear: f64, angular: f64) -> Result<VelocityCommand> {
        let state = self.core.state().current();
        if state != RobotState::ManualControl {
            return Err(MowerError::State(format!("manual drive rejected in {}", state)));
        }
        let command = VelocityCommand::new(linear, angular).clamped(self.max_linear, self.max_angular);
        Ok(self.core.gate().drive(command)?)
    }

    /// Stops every motor and enters EMERGENCY_STOP. Returns `false` when the
    /// robot was already stopped.
    pub fn trigger_emergency_stop(&self) -> bool {
        self.core.trigger_emergency_stop(None, self.core.now(), "external trigger")
    }

    /// Returns to the state held before the stop. `false` when not stopped.
    pub fn clear_emergency_stop(&self) -> bool {
        match self.core.clear_emergency_stop(self.core.now()) {
            Some(resumed) => {
                info!("Emergency stop cleared, resuming {}", resumed);
                true
            }
            None => false,
        }
    }

    /// Leaves ERROR for IDLE. `false` when not in ERROR.
    pub fn clear_error(&self) -> bool {
        self.core
            .state()
            .transition_if(&[RobotState::Error], RobotState::Idle, self.core.now(), "error cleared")
            .is_ok()
    }

    /// Feeds a battery reading from outside the control loop; the battery
    /// rules apply immediately.
    pub fn report_battery_level(&self, level: f64) {
        self.core.apply_battery_level(level, self.core.now());
    }

    pub fn get_status(&self) -> MowerStatus {
        let snapshot = self.core.state().snapshot();
        let stats = self.core.state().stats();
        let position = self.core.pose();
        let (progress, area_id, geo_position) = {
            let planner = self.core.planner();
            let geo = planner.local_to_gps(&Point::new(position.x, position.y)).ok();
            (planner.get_progress(), planner.current_area().map(|a| a.id.clone()), geo)
        };
        let avoidance = self.core.avoidance().statistics();

        MowerStatus {
            state: snapshot.current,
            previous_state: snapshot.previous,
            position,
            geo_position,
            battery_level: stats.battery_level,
            progress,
            area_id,
            emergency_stop: self.core.gate().is_engaged(),
            stats,
            avoidance,
        }
    }

    pub fn core(&self) -> &Core {
        &self.core
    }
}
