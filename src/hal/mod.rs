// hal/mod.rs

// Hardware boundary of the mower core. Every physical read or write goes through
// one of the four traits below; the core never touches GPIO, PWM or buses
// directly and never branches on whether it is simulated. Readings are typed
// per modality, and an absent reading is an explicit `None`.

// Dependencies
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod sim;

pub use sim::{SimConfig, SimWorld};

/// Hardware boundary error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HalError {
    /// Motor or blade command rejected
    #[error("actuation failure: {0}")]
    Actuation(String),
    /// Sensor unreadable
    #[error("sensor failure: {0}")]
    Sensor(String),
    /// Battery gauge or power rail failure
    #[error("power failure: {0}")]
    Power(String),
    /// Docking maneuver failure
    #[error("docking failure: {0}")]
    Docking(String),
}

// Encoder ticks counted since the previous reading
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq)]
pub struct EncoderReading {
    pub left_ticks: i64,
    pub right_ticks: i64,
    pub ticks_per_revolution: u32,
}

// Inertial heading (radians) with optional yaw rate (rad/s)
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq)]
pub struct ImuReading {
    pub heading: f64,
    pub angular_velocity: Option<f64>,
}

/// One distance per proximity sensor, in mounting order. `None` means the
/// sensor returned nothing this cycle.
#[derive(Clone, Serialize, Deserialize, Debug, Default, PartialEq)]
pub struct ProximityReading {
    pub distances: Vec<Option<f64>>,
}

// Rangefinder return in robot-relative meters
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq)]
pub struct RangePoint {
    pub x: f64,
    pub y: f64,
}

impl RangePoint {
    pub fn new(x: f64, y: f64) -> Self {
        RangePoint { x, y }
    }
}

/// Object reported by the vision pipeline
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct VisionDetection {
    pub class: String,
    pub distance: f64,           // meters
    pub bearing: f64,            // radians, 0 = straight ahead, positive = left
    pub confidence: Option<f64>, // detector score in [0, 1]
    pub size: Option<f64>,       // estimated radius, meters
}

/// Drive, blade and cutting-height actuators.
#[cfg_attr(test, mockall::automock)]
pub trait ActuationBoundary {
    fn set_drive_speed(&mut self, linear: f64, angular: f64) -> Result<(), HalError>;
    fn stop_all(&mut self) -> Result<(), HalError>;
    fn start_blade(&mut self, rpm: f64) -> Result<(), HalError>;
    fn stop_blade(&mut self) -> Result<(), HalError>;
    fn set_cutting_height(&mut self, height_cm: f64) -> Result<(), HalError>;
}

/// Battery gauge and power rail.
#[cfg_attr(test, mockall::automock)]
pub trait PowerBoundary {
    /// State of charge in percent
    fn get_battery_level(&mut self) -> Result<f64, HalError>;
    fn emergency_shutdown(&mut self) -> Result<(), HalError>;
}

/// Close-range approach and latch onto the charging station.
#[cfg_attr(test, mockall::automock)]
pub trait DockingBoundary {
    /// Blocks until docked or the internal search timeout expires.
    fn dock_to_station(&mut self) -> bool;
}

/// Raw sensor input.
#[cfg_attr(test, mockall::automock)]
pub trait SensorBoundary {
    fn read_encoders(&mut self) -> Result<Option<EncoderReading>, HalError>;
    fn read_imu(&mut self) -> Result<Option<ImuReading>, HalError>;
    fn read_proximity(&mut self) -> Result<ProximityReading, HalError>;
    fn read_rangefinder(&mut self) -> Result<Option<Vec<RangePoint>>, HalError>;
    fn read_vision(&mut self) -> Result<Option<Vec<VisionDetection>>, HalError>;
}

pub type BoxedActuation = Box<dyn ActuationBoundary + Send>;
pub type BoxedPower = Box<dyn PowerBoundary + Send>;
pub type BoxedDocking = Box<dyn DockingBoundary + Send>;
pub type BoxedSensors = Box<dyn SensorBoundary + Send>;
