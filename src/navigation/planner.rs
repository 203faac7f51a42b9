// navigation/planner.rs

// Coverage planner: keeps the registry of known work areas, turns the selected
// area into an ordered waypoint path and tracks traversal progress against the
// estimated position. Also owns the GPS origin used to bridge global
// coordinates into the local planning frame.

// Dependencies
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::f64::consts::FRAC_PI_4;

use super::geodesy::{GeoPoint, UtmProjection};
use super::geometry::{Point, Polygon};
use super::patterns;
use super::{Area, CoveragePattern, NavigationError, Waypoint};

/// Planner parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Cutting width of the blade (m)
    pub blade_width: f64,
    /// Inset from the bounding box for sweep line endpoints (m)
    pub safety_margin: f64,
    /// Arrival radius around a waypoint (m)
    pub waypoint_tolerance: f64,
    /// Speed multiplier on the perimeter lap
    pub perimeter_speed_factor: f64,
    /// Speed multiplier on TURN waypoints
    pub turn_speed_factor: f64,
    /// Heading change that triggers a TURN waypoint (rad)
    pub turn_threshold: f64,
    /// Angular sampling step of the spiral (rad)
    pub spiral_angle_step: f64,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        PlannerConfig {
            blade_width: 0.5,
            safety_margin: 0.2,
            waypoint_tolerance: 0.5,
            perimeter_speed_factor: 0.7,
            turn_speed_factor: 0.5,
            turn_threshold: FRAC_PI_4,
            spiral_angle_step: 0.1,
        }
    }
}

/// Task progress
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Progress {
    /// Completed share in [0, 1]
    pub fraction_complete: f64,
    pub waypoints_done: usize,
    pub waypoints_total: usize,
}

pub struct CoveragePlanner {
    config: PlannerConfig,
    areas: BTreeMap<String, Area>,
    current_area: Option<Area>,
    current_path: Vec<Waypoint>,
    cursor: usize,
    projection: Option<UtmProjection>,
}

impl CoveragePlanner {
    /// Creates a planner with an empty registry
    pub fn new(config: PlannerConfig) -> Self {
        CoveragePlanner {
            config,
            areas: BTreeMap::new(),
            current_area: None,
            current_path: Vec::new(),
            cursor: 0,
            projection: None,
        }
    }

    /// Creates a planner whose registry holds `areas`, or the built-in test
    /// areas when `areas` is empty.
    pub fn with_areas(config: PlannerConfig, areas: Vec<Area>) -> Self {
        let mut planner = CoveragePlanner::new(config);
        if areas.is_empty() {
            warn!("No areas configured, using built-in test areas");
            planner.register_default_areas();
        } else {
            for area in areas {
                planner.add_area(area);
            }
        }
        info!("{} areas registered", planner.areas.len());
        planner
    }

    /// Regenerates the current path from `area` and rewinds the cursor.
    pub fn load_area(&mut self, area: &Area) -> bool {
        self.current_path = patterns::generate_path(area, &self.config);
        self.current_area = Some(area.clone());
        self.cursor = 0;
        info!("Area loaded: {}, {} waypoints generated", area.id, self.current_path.len());
        true
    }

    /// Looks `area_id` up in the registry and loads it. A registered area whose
    /// boundary encloses no surface is refused and the current path is kept.
    pub fn load_area_by_id(&mut self, area_id: &str) -> Result<(), NavigationError> {
        let area = self
            .areas
            .get(area_id)
            .cloned()
            .ok_or_else(|| NavigationError::UnknownArea(area_id.to_string()))?;
        if area.boundary.is_degenerate() {
            warn!("Area {} rejected: boundary encloses no surface", area_id);
            return Err(NavigationError::DegeneratePolygon(area_id.to_string()));
        }
        self.load_area(&area);
        Ok(())
    }

    /// Generates the path for `area` without touching the planner state.
    pub fn generate_path(&self, area: &Area) -> Vec<Waypoint> {
        patterns::generate_path(area, &self.config)
    }

    /// Advances the cursor past every waypoint within the arrival tolerance of
    /// `current_position` and returns the new target, or `None` when the path
    /// is exhausted.
    pub fn get_next_waypoint(&mut self, current_position: &Point) -> Option<Waypoint> {
        while let Some(target) = self.current_path.get(self.cursor) {
            if current_position.distance_to(&target.position) >= self.config.waypoint_tolerance {
                break;
            }
            debug!("Waypoint {} reached", self.cursor);
            self.cursor += 1;
        }
        self.current_path.get(self.cursor).copied()
    }

    /// Target under the cursor without advancing it.
    pub fn current_waypoint(&self) -> Option<Waypoint> {
        self.current_path.get(self.cursor).copied()
    }

    pub fn get_progress(&self) -> Progress {
        let total = self.current_path.len();
        let done = self.cursor.min(total);
        Progress {
            fraction_complete: if total > 0 { done as f64 / total as f64 } else { 0.0 },
            waypoints_done: done,
            waypoints_total: total,
        }
    }

    /// Waypoints not yet reached.
    pub fn remaining_path(&self) -> &[Waypoint] {
        &self.current_path[self.cursor.min(self.current_path.len())..]
    }

    pub fn current_path(&self) -> &[Waypoint] {
        &self.current_path
    }

    pub fn current_area(&self) -> Option<&Area> {
        self.current_area.as_ref()
    }

    /// Rewinds the cursor to the start of the current path.
    pub fn reset_path(&mut self) {
        self.cursor = 0;
        info!("Path reset");
    }

    /// Adds or replaces an area in the registry.
    pub fn add_area(&mut self, area: Area) {
        if !area.boundary.is_valid() {
            warn!("Area {} has a degenerate boundary and will yield no path", area.id);
        }
        info!("Area registered: {}", area.id);
        self.areas.insert(area.id.clone(), area);
    }

    pub fn remove_area(&mut self, area_id: &str) -> Option<Area> {
        let removed = self.areas.remove(area_id);
        if removed.is_some() {
            info!("Area removed: {}", area_id);
        }
        removed
    }

    pub fn area(&self, area_id: &str) -> Option<&Area> {
        self.areas.get(area_id)
    }

    pub fn areas(&self) -> impl Iterator<Item = &Area> {
        self.areas.values()
    }

    /// Estimated mowing time in minutes: area / (speed × blade width), plus
    /// 20 % for turns and transit.
    pub fn estimate_completion_minutes(&self, area_id: &str) -> Result<f64, NavigationError> {
        let area = self
            .areas
            .get(area_id)
            .ok_or_else(|| NavigationError::UnknownArea(area_id.to_string()))?;
        let coverage_rate = area.travel_speed * self.config.blade_width;
        if coverage_rate <= 0.0 {
            return Ok(0.0);
        }
        Ok(area.boundary.area() / coverage_rate * 1.2 / 60.0)
    }

    /// Fixes the UTM origin of the local frame.
    pub fn set_origin(&mut self, latitude: f64, longitude: f64) -> Result<(), NavigationError> {
        let projection = UtmProjection::new(GeoPoint::new(latitude, longitude))?;
        info!(
            "GPS origin set: lat={:.7}, lon={:.7} (UTM zone {}{})",
            latitude,
            longitude,
            projection.zone(),
            if projection.is_northern() { 'N' } else { 'S' }
        );
        self.projection = Some(projection);
        Ok(())
    }

    pub fn origin(&self) -> Option<GeoPoint> {
        self.projection.as_ref().map(|p| p.origin())
    }

    pub fn gps_to_local(&self, latitude: f64, longitude: f64) -> Result<Point, NavigationError> {
        let projection = self.projection.as_ref().ok_or(NavigationError::NoOrigin)?;
        projection.to_local(GeoPoint::new(latitude, longitude))
    }

    pub fn local_to_gps(&self, point: &Point) -> Result<GeoPoint, NavigationError> {
        let projection = self.projection.as_ref().ok_or(NavigationError::NoOrigin)?;
        projection.to_geo(point)
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    fn register_default_areas(&mut self) {
        let square = Area {
            name: "Test square".to_string(),
            ..Area::new(
                "test_square",
                Polygon::new(vec![
                    Point::new(0.0, 0.0),
                    Point::new(10.0, 0.0),
                    Point::new(10.0, 10.0),
                    Point::new(0.0, 10.0),
                ]),
                CoveragePattern::Boustrophedon,
            )
        };
        let l_shape = Area {
            name: "Test L shape".to_string(),
            ..Area::new(
                "test_l_shape",
                Polygon::new(vec![
                    Point::new(0.0, 0.0),
                    Point::new(15.0, 0.0),
                    Point::new(15.0, 8.0),
                    Point::new(8.0, 8.0),
                    Point::new(8.0, 15.0),
                    Point::new(0.0, 15.0),
                ]),
                CoveragePattern::Boustrophedon,
            )
        };
        self.add_area(square);
        self.add_area(l_shape);
    }
}

impl Default for CoveragePlanner {
    fn default() -> Self {
        CoveragePlanner::new(PlannerConfig::default())
    }
}
