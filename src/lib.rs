//! Mowbot - navigation and decision core of an autonomous mowing robot
//!
//! This library estimates the robot pose from wheel encoders and an inertial
//! sensor, plans coverage paths over polygonal work areas, keeps the robot clear
//! of obstacles and arbitrates all of it in a state machine with emergency-stop
//! and battery safety rules. Hardware is reached only through the traits in
//! [`hal`]; a simulated implementation ships with the crate.

#![warn(unused_extern_crates)]

pub mod core;
pub mod hal;
pub mod navigation;
pub mod runtime;

// Re-export commonly used items for easier access
pub use self::core::{
    BatteryConfig, ChargingStationConfig, ControlConfig, Core, MowerApi, MowerStatus, Pose, PoseEstimator,
    RobotState, RobotStateMachine,
};
pub use hal::{HalError, SimConfig, SimWorld};
pub use navigation::{Area, AvoidanceLayer, CoveragePlanner, GeoPoint, NavigationError, Point, Polygon};
pub use runtime::{Boundaries, Runtime};

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use self::core::EstimatorConfig;
use navigation::{AvoidanceConfig, ControllerConfig, PlannerConfig};

/// Main configuration structure, loaded from YAML
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MowerConfig {
    /// Pose estimator noise and geometry
    pub estimator: EstimatorConfig,
    /// Coverage planner parameters
    pub planner: PlannerConfig,
    /// Obstacle avoidance thresholds and sensor layout
    pub avoidance: AvoidanceConfig,
    /// Waypoint tracking gains
    pub controller: ControllerConfig,
    pub battery: BatteryConfig,
    pub charging_station: ChargingStationConfig,
    pub control: ControlConfig,
    /// Origin of the local frame, if GPS conversion is wanted
    pub gps_origin: Option<GeoPoint>,
    /// Work areas; empty seeds the built-in test areas
    pub areas: Vec<Area>,
    /// Simulated world used by the demo binary
    pub simulation: SimConfig,
}

impl MowerConfig {
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let config: MowerConfig = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        log::info!("Configuration loaded from {}", path.as_ref().display());
        Self::from_yaml_str(&text)
    }

    /// Rejects settings the loops cannot run with.
    pub fn validate(&self) -> Result<()> {
        let control = &self.control;
        for (name, rate) in [
            ("control.rate_hz", control.rate_hz),
            ("control.fusion_rate_hz", control.fusion_rate_hz),
            ("control.sensor_rate_hz", control.sensor_rate_hz),
        ] {
            if !(rate.is_finite() && rate > 0.0) {
                return Err(MowerError::Config(format!("{} must be positive, got {}", name, rate)));
            }
        }

        let battery = &self.battery;
        if !(battery.shutdown <= battery.critical && battery.critical <= battery.low && battery.low < battery.full) {
            return Err(MowerError::Config(
                "battery thresholds must satisfy shutdown <= critical <= low < full".to_string(),
            ));
        }

        if self.planner.blade_width <= 0.0 {
            return Err(MowerError::Config("planner.blade_width must be positive".to_string()));
        }
        if self.estimator.wheel_base <= 0.0 || self.estimator.wheel_radius <= 0.0 {
            return Err(MowerError::Config("estimator wheel geometry must be positive".to_string()));
        }
        Ok(())
    }
}

/// Crate error types
#[derive(Error, Debug)]
pub enum MowerError {
    /// Invalid configuration value
    #[error("configuration error: {0}")]
    Config(String),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error(transparent)]
    Navigation(#[from] NavigationError),
    #[error(transparent)]
    Hal(#[from] HalError),
    /// Operation not allowed in the current state
    #[error("state error: {0}")]
    State(String),
}

pub type Result<T> = std::result::Result<T, MowerError>;
