//! Navigation system for the mower
//!
//! This module handles coverage path planning over polygonal work areas, the
//! GPS/local coordinate bridge, obstacle avoidance and the waypoint-tracking
//! motion controller.

pub mod avoidance;
pub mod controller;
pub mod geodesy;
pub mod geometry;
pub mod patterns;
pub mod planner;

pub use avoidance::{AvoidanceConfig, AvoidanceLayer, AvoidanceMode, AvoidanceStatistics};
pub use controller::{ControllerConfig, MotionController, VelocityCommand};
pub use geodesy::{GeoPoint, UtmProjection};
pub use geometry::{Point, Polygon};
pub use planner::{CoveragePlanner, PlannerConfig, Progress};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Coverage pattern selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CoveragePattern {
    /// Back-and-forth parallel sweep lines
    #[default]
    #[serde(alias = "lawn_mower")]
    Boustrophedon,
    /// Inward spiral around the centroid
    Spiral,
    /// Perimeter loop, then a boustrophedon pass over the shrunk interior
    PerimeterFirst,
}

/// What the robot does on reaching a waypoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WaypointAction {
    #[default]
    Move,
    Turn,
}

/// Single target of a coverage path
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    /// Target position in the local frame
    pub position: Point,
    /// Travel speed toward the target (m/s)
    pub speed: f64,
    /// Cutting height while travelling (cm)
    pub blade_height: f64,
    /// Move or turn in place
    pub action: WaypointAction,
}

impl Waypoint {
    pub fn new(position: Point, speed: f64, blade_height: f64, action: WaypointAction) -> Self {
        Waypoint {
            position,
            speed,
            blade_height,
            action,
        }
    }
}

/// Mowing work area.
///
/// Deserialises from the configuration format
/// `{id, name?, boundary: [{x,y}], obstacles: [[{x,y}]], pattern, blade_height, speed, overlap}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Area {
    /// Unique area identifier
    pub id: String,
    /// Human readable name
    #[serde(default)]
    pub name: String,
    /// Outer boundary
    pub boundary: Polygon,
    /// Keep-out polygons inside the boundary
    #[serde(default)]
    pub obstacles: Vec<Polygon>,
    /// Coverage pattern
    #[serde(default)]
    pub pattern: CoveragePattern,
    /// Cutting height (cm)
    #[serde(default = "default_blade_height")]
    pub blade_height: f64,
    /// Travel speed (m/s)
    #[serde(default = "default_travel_speed", rename = "speed")]
    pub travel_speed: f64,
    /// Stripe overlap fraction in [0, 1)
    #[serde(default = "default_overlap", rename = "overlap")]
    pub overlap_fraction: f64,
}

fn default_blade_height() -> f64 {
    5.0
}

fn default_travel_speed() -> f64 {
    0.5
}

fn default_overlap() -> f64 {
    0.1
}

impl Area {
    /// Creates an area with the default blade height, speed and overlap.
    pub fn new(id: impl Into<String>, boundary: Polygon, pattern: CoveragePattern) -> Self {
        let id = id.into();
        Area {
            name: id.clone(),
            id,
            boundary,
            obstacles: Vec::new(),
            pattern,
            blade_height: default_blade_height(),
            travel_speed: default_travel_speed(),
            overlap_fraction: default_overlap(),
        }
    }

    pub fn with_obstacles(mut self, obstacles: Vec<Polygon>) -> Self {
        self.obstacles = obstacles;
        self
    }

    pub fn with_overlap(mut self, overlap_fraction: f64) -> Self {
        self.overlap_fraction = overlap_fraction;
        self
    }

    pub fn with_speed(mut self, travel_speed: f64) -> Self {
        self.travel_speed = travel_speed;
        self
    }

    pub fn with_blade_height(mut self, blade_height: f64) -> Self {
        self.blade_height = blade_height;
        self
    }
}

/// Navigation error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NavigationError {
    /// Area id not present in the registry
    #[error("unknown area: {0}")]
    UnknownArea(String),
    /// GPS conversion requested before an origin was set
    #[error("GPS origin has not been set")]
    NoOrigin,
    /// Latitude/longitude out of range or not finite
    #[error("invalid coordinate: {0}")]
    InvalidCoordinate(String),
    /// Boundary with fewer than three vertices
    #[error("area {0} has a degenerate boundary")]
    DegeneratePolygon(String),
}
