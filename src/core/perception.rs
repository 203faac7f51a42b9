// core/perception.rs

// Turns raw proximity, rangefinder and vision readings into a single list of
// robot-relative obstacles. Each modality is converted on ingestion, weighted by a
// fixed per-modality confidence factor at fusion time, and obstacles closer than
// the cluster radius are merged so that one physical object seen by several
// sensors is counted once.

// Dependencies
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::hal::{ProximityReading, RangePoint, VisionDetection};

/// Sensor that produced an obstacle
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ObstacleSource {
    Proximity,
    Rangefinder,
    Vision,
}

// Obstacle: robot-relative detection (x forward, y left)
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq)]
pub struct Obstacle {
    pub x: f64,          // meters ahead of the robot
    pub y: f64,          // meters to the left of the robot
    pub radius: f64,     // meters
    pub source: ObstacleSource,
    pub confidence: f64, // [0, 1]
    pub timestamp: f64,  // seconds, monotonic clock
}

impl Obstacle {
    /// Distance from the robot center
    pub fn distance(&self) -> f64 {
        self.x.hypot(self.y)
    }

    /// Bearing from straight ahead (radians, positive = left)
    pub fn bearing(&self) -> f64 {
        self.y.atan2(self.x)
    }
}

/// Per-modality conversion parameters and fusion weights
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct PerceptionConfig {
    pub proximity_angles_deg: Vec<f64>, // mounting angle per sensor, index order
    pub proximity_min_range: f64,
    pub proximity_max_range: f64,
    pub proximity_radius: f64,
    pub proximity_confidence: f64,
    pub rangefinder_min_range: f64,
    pub rangefinder_max_range: f64,
    pub rangefinder_radius: f64,
    pub rangefinder_confidence: f64,
    pub vision_classes: Vec<String>, // classes treated as obstacles
    pub vision_default_confidence: f64,
    pub vision_default_size: f64,
    pub proximity_weight: f64,
    pub rangefinder_weight: f64,
    pub vision_weight: f64,
    pub obstacle_max_age: f64, // seconds
    pub cluster_radius: f64,   // meters
}

impl Default for PerceptionConfig {
    fn default() -> Self {
        PerceptionConfig {
            proximity_angles_deg: vec![-45.0, 45.0],
            proximity_min_range: 0.05,
            proximity_max_range: 2.0,
            proximity_radius: 0.2,
            proximity_confidence: 0.8,
            rangefinder_min_range: 0.1,
            rangefinder_max_range: 10.0,
            rangefinder_radius: 0.1,
            rangefinder_confidence: 0.9,
            vision_classes: ["person", "chair", "table", "obstacle"]
                .iter()
                .map(|c| c.to_string())
                .collect(),
            vision_default_confidence: 0.7,
            vision_default_size: 0.3,
            proximity_weight: 0.4,
            rangefinder_weight: 0.4,
            vision_weight: 0.2,
            obstacle_max_age: 5.0,
            cluster_radius: 0.3,
        }
    }
}

impl PerceptionConfig {
    fn weight(&self, source: ObstacleSource) -> f64 {
        match source {
            ObstacleSource::Proximity => self.proximity_weight,
            ObstacleSource::Rangefinder => self.rangefinder_weight,
            ObstacleSource::Vision => self.vision_weight,
        }
    }
}

// ObstacleTracker: raw per-modality lists plus the last fused result
#[derive(Debug, Clone)]
pub struct ObstacleTracker {
    config: PerceptionConfig,
    proximity: Vec<Obstacle>,
    rangefinder: Vec<Obstacle>,
    vision: Vec<Obstacle>,
    fused: Vec<Obstacle>,
    last_update: Option<f64>,
}

impl ObstacleTracker {
    pub fn new(config: PerceptionConfig) -> Self {
        ObstacleTracker {
            config,
            proximity: Vec::new(),
            rangefinder: Vec::new(),
            vision: Vec::new(),
            fused: Vec::new(),
            last_update: None,
        }
    }

    /// Converts proximity distances into obstacles at the sensors' mounting
    /// angles. Proximity obstacles accumulate; anything older than the maximum
    /// age is dropped on every call. Returns the number of new obstacles.
    pub fn update_proximity(&mut self, reading: &ProximityReading, now: f64) -> usize {
        if reading.distances.len() > self.config.proximity_angles_deg.len() {
            warn!(
                "Proximity reading has {} channels, {} sensors configured; extra channels ignored",
                reading.distances.len(),
                self.config.proximity_angles_deg.len()
            );
        }

        let mut added = 0;
        for (angle_deg, distance) in self.config.proximity_angles_deg.iter().zip(&reading.distances) {
            let Some(distance) = *distance else {
                continue;
            };
            if !distance.is_finite() {
                warn!("Malformed proximity distance {} at {}°, skipped", distance, angle_deg);
                continue;
            }
            // Outside the usable band means nothing detected
            if distance < self.config.proximity_min_range || distance > self.config.proximity_max_range {
                continue;
            }
            let angle = angle_deg.to_radians();
            self.proximity.push(Obstacle {
                x: distance * angle.cos(),
                y: distance * angle.sin(),
                radius: self.config.proximity_radius,
                source: ObstacleSource::Proximity,
                confidence: self.config.proximity_confidence,
                timestamp: now,
            });
            added += 1;
        }

        let max_age = self.config.obstacle_max_age;
        self.proximity.retain(|o| now - o.timestamp < max_age);
        self.last_update = Some(now);
        debug!("Proximity updated: {} new obstacles", added);
        added
    }

    /// Replaces the rangefinder obstacles with `points`. Returns the number kept.
    pub fn update_rangefinder(&mut self, points: &[RangePoint], now: f64) -> usize {
        let (min, max) = (self.config.rangefinder_min_range, self.config.rangefinder_max_range);
        let mut rejected = 0;
        self.rangefinder = points
            .iter()
            .filter(|p| {
                let distance = p.x.hypot(p.y);
                let keep = distance.is_finite() && (min..=max).contains(&distance);
                if !keep {
                    rejected += 1;
                }
                keep
            })
            .map(|p| Obstacle {
                x: p.x,
                y: p.y,
                radius: self.config.rangefinder_radius,
                source: ObstacleSource::Rangefinder,
                confidence: self.config.rangefinder_confidence,
                timestamp: now,
            })
            .collect();

        if rejected > 0 {
            debug!("Rangefinder: {} points outside {:.2}-{:.2} m dropped", rejected, min, max);
        }
        self.last_update = Some(now);
        self.rangefinder.len()
    }

    /// Replaces the vision obstacles with the detections whose class is an
    /// obstacle class. Returns the number kept.
    pub fn update_vision(&mut self, detections: &[VisionDetection], now: f64) -> usize {
        let mut obstacles = Vec::with_capacity(detections.len());
        for detection in detections {
            if !self.config.vision_classes.iter().any(|c| c == &detection.class) {
                continue;
            }
            if !detection.distance.is_finite() || !detection.bearing.is_finite() || detection.distance < 0.0 {
                warn!("Malformed vision detection of class {}, skipped", detection.class);
                continue;
            }
            obstacles.push(Obstacle {
                x: detection.distance * detection.bearing.cos(),
                y: detection.distance * detection.bearing.sin(),
                radius: detection.size.unwrap_or(self.config.vision_default_size),
                source: ObstacleSource::Vision,
                confidence: detection
                    .confidence
                    .unwrap_or(self.config.vision_default_confidence)
                    .clamp(0.0, 1.0),
                timestamp: now,
            });
        }
        self.vision = obstacles;
        self.last_update = Some(now);
        self.vision.len()
    }

    /// Expires stale detections, weights every modality and clusters the
    /// result. Raw confidences are kept, so fusing twice gives the same list.
    pub fn fuse(&mut self, now: f64) -> &[Obstacle] {
        let max_age = self.config.obstacle_max_age;
        for list in [&mut self.proximity, &mut self.rangefinder, &mut self.vision] {
            list.retain(|o| now - o.timestamp < max_age);
        }

        let weighted: Vec<Obstacle> = self
            .proximity
            .iter()
            .chain(&self.rangefinder)
            .chain(&self.vision)
            .map(|o| Obstacle {
                confidence: o.confidence * self.config.weight(o.source),
                ..*o
            })
            .collect();

        self.fused = cluster(&weighted, self.config.cluster_radius);
        &self.fused
    }

    /// Last fused obstacle list
    pub fn obstacles(&self) -> &[Obstacle] {
        &self.fused
    }

    /// Closest fused obstacle
    pub fn closest(&self) -> Option<&Obstacle> {
        self.fused
            .iter()
            .min_by(|a, b| a.distance().total_cmp(&b.distance()))
    }

    pub fn last_update(&self) -> Option<f64> {
        self.last_update
    }

    pub fn config(&self) -> &PerceptionConfig {
        &self.config
    }

    pub fn clear(&mut self) {
        self.proximity.clear();
        self.rangefinder.clear();
        self.vision.clear();
        self.fused.clear();
    }
}

// Greedy clustering: each obstacle joins the first cluster whose mean center lies
// within `radius`, otherwise it starts a new cluster.
fn cluster(obstacles: &[Obstacle], radius: f64) -> Vec<Obstacle> {
    let mut clusters: Vec<Vec<Obstacle>> = Vec::new();
    for obstacle in obstacles {
        let home = clusters.iter_mut().find(|members| {
            let n = members.len() as f64;
            let cx = members.iter().map(|m| m.x).sum::<f64>() / n;
            let cy = members.iter().map(|m| m.y).sum::<f64>() / n;
            (obstacle.x - cx).hypot(obstacle.y - cy) < radius
        });
        match home {
            Some(members) => members.push(*obstacle),
            None => clusters.push(vec![*obstacle]),
        }
    }

    clusters.iter().map(|members| merge(members)).collect()
}

// Confidence-weighted centroid, largest radius, mean confidence capped at 1.
fn merge(members: &[Obstacle]) -> Obstacle {
    let first = members[0];
    if members.len() == 1 {
        return first;
    }

    let n = members.len() as f64;
    let total_confidence: f64 = members.iter().map(|m| m.confidence).sum();
    let (x, y) = if total_confidence > 0.0 {
        (
            members.iter().map(|m| m.x * m.confidence).sum::<f64>() / total_confidence,
            members.iter().map(|m| m.y * m.confidence).sum::<f64>() / total_confidence,
        )
    } else {
        (
            members.iter().map(|m| m.x).sum::<f64>() / n,
            members.iter().map(|m| m.y).sum::<f64>() / n,
        )
    };

    Obstacle {
        x,
        y,
        radius: members.iter().map(|m| m.radius).fold(0.0, f64::max),
        source: first.source,
        confidence: (total_confidence / n).min(1.0),
        timestamp: members.iter().map(|m| m.timestamp).fold(f64::NEG_INFINITY, f64::max),
    }
}
