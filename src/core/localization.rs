// core/localization.rs

// Estimates the robot pose by fusing relative wheel motion (encoder ticks) and
// inertial heading with an Extended Kalman Filter. The state vector is
// [x, y, heading, vx, vy, angular_velocity] with a 6x6 covariance. Every correction
// keeps the covariance symmetric and positive semi-definite (Joseph form), and a
// singular innovation covariance skips the update instead of corrupting the state.

// Dependencies
use log::{debug, info, warn};
use nalgebra::{Matrix1, Matrix3, Matrix6, SMatrix, SVector, Vector3, Vector6};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use thiserror::Error;

const X: usize = 0;
const Y: usize = 1;
const HEADING: usize = 2;
const VX: usize = 3;
const VY: usize = 4;
const OMEGA: usize = 5;

/// Wraps an angle into (-π, π].
///
/// Angles already inside the interval are returned untouched, which keeps the
/// function exactly idempotent.
pub fn wrap_angle(angle: f64) -> f64 {
    if !angle.is_finite() || (angle > -PI && angle <= PI) {
        return angle;
    }
    let wrapped = angle.rem_euclid(2.0 * PI); // [0, 2π)
    if wrapped > PI { wrapped - 2.0 * PI } else { wrapped }
}

// Pose: Planar robot pose in the local Cartesian frame
#[derive(Clone, Copy, Serialize, Deserialize, Debug, Default, PartialEq)]
pub struct Pose {
    pub x: f64,         // X position (meters)
    pub y: f64,         // Y position (meters)
    pub heading: f64,   // Orientation (radians, wrapped to (-π, π])
    pub timestamp: f64, // Seconds on the monotonic control clock
}

/// Velocity part of the filter state.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, Default, PartialEq)]
pub struct Velocity {
    pub vx: f64,
    pub vy: f64,
    pub angular: f64,
}

/// Full six-element state estimate, as returned by [`PoseEstimator::predict_state`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StateEstimate {
    pub pose: Pose,
    pub velocity: Velocity,
}

/// Standard deviations of the pose block.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PoseUncertainty {
    pub x_std: f64,
    pub y_std: f64,
    pub heading_std: f64,
}

/// Running statistics of the estimator.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EstimatorStatistics {
    pub total_distance: f64,
    pub position_uncertainty: f64,
    pub heading_uncertainty: f64,
    pub velocity_uncertainty: f64,
    pub angular_velocity_uncertainty: f64,
    pub covariance_trace: f64,
    pub filter_stable: bool,
}

/// Recoverable faults raised by a correction. The state is left untouched.
#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum EstimatorFault {
    #[error("innovation covariance is singular")]
    SingularInnovation,
    #[error("ticks per revolution must be positive")]
    InvalidTicksPerRevolution,
    #[error("measurement is not finite")]
    NonFiniteMeasurement,
}

/// Physical and noise parameters of the filter.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct EstimatorConfig {
    pub wheel_radius: f64,           // meters
    pub wheel_base: f64,             // track width, meters
    pub process_noise: [f64; 6],     // diagonal of Q (per second)
    pub encoder_noise: [f64; 3],     // diagonal of R_enc
    pub imu_noise: f64,              // R_imu
    pub initial_covariance: f64,     // startup prior, diagonal
    pub nominal_period: f64,         // elapsed time assumed for the first reading
    pub stability_trace: f64,        // covariance trace above which the filter is unstable
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        EstimatorConfig {
            wheel_radius: 0.1,
            wheel_base: 0.5,
            process_noise: [0.01, 0.01, 0.001, 0.1, 0.1, 0.01],
            encoder_noise: [0.05, 0.05, 0.01],
            imu_noise: 0.01,
            initial_covariance: 0.1,
            nominal_period: 0.1,
            stability_trace: 10.0,
        }
    }
}

// PoseEstimator: EKF over [x, y, heading, vx, vy, omega]
#[derive(Debug, Clone)]
pub struct PoseEstimator {
    config: EstimatorConfig,
    state: Vector6<f64>,
    covariance: Matrix6<f64>,
    process_noise: Matrix6<f64>,
    encoder_noise: Matrix3<f64>,
    imu_noise: Matrix1<f64>,
    last_predict: Option<f64>,
    last_encoder: Option<f64>,
    // pose [x, y, heading] right after the previous encoder correction
    odometry_anchor: Option<Vector3<f64>>,
    last_timestamp: f64,
    heading_offset: f64,
    total_distance: f64,
}

impl PoseEstimator {
    /// Creates an estimator at the origin with the startup prior.
    pub fn new(config: EstimatorConfig) -> Self {
        let process_noise = Matrix6::from_diagonal(&Vector6::from_row_slice(&config.process_noise));
        let encoder_noise = Matrix3::from_diagonal(&Vector3::from_row_slice(&config.encoder_noise));
        let imu_noise = Matrix1::new(config.imu_noise);
        let covariance = Matrix6::identity() * config.initial_covariance;

        PoseEstimator {
            config,
            state: Vector6::zeros(),
            covariance,
            process_noise,
            encoder_noise,
            imu_noise,
            last_predict: None,
            last_encoder: None,
            odometry_anchor: None,
            last_timestamp: 0.0,
            heading_offset: 0.0,
            total_distance: 0.0,
        }
    }

    /// Hard-sets the pose, zeroes velocities and restores the startup prior.
    pub fn reset(&mut self, x: f64, y: f64, heading: f64) {
        self.state = Vector6::new(x, y, wrap_angle(heading), 0.0, 0.0, 0.0);
        self.covariance = Matrix6::identity() * self.config.initial_covariance;
        self.last_predict = None;
        self.last_encoder = None;
        self.odometry_anchor = None;
        info!("Pose reset: x={:.3}, y={:.3}, heading={:.3}", x, y, heading);
    }

    /// Constant-velocity prediction. `dt <= 0` is a no-op.
    pub fn predict(&mut self, dt: f64) {
        if !(dt > 0.0) || !dt.is_finite() {
            return;
        }
        let (state, covariance) = self.propagate(dt);
        self.state = state;
        self.covariance = covariance;
    }

    /// Previews a prediction by `dt` without touching the filter.
    pub fn predict_state(&self, dt: f64) -> StateEstimate {
        let state = if dt > 0.0 && dt.is_finite() { self.propagate(dt).0 } else { self.state };
        Self::estimate_from(&state, self.last_timestamp + dt.max(0.0))
    }

    /// Corrects the filter with differential encoder ticks counted since the
    /// previous encoder reading.
    pub fn correct_with_encoders(
        &mut self,
        left_ticks: i64,
        right_ticks: i64,
        ticks_per_rev: u32,
        now: f64,
    ) -> Result<(), EstimatorFault> {
        if ticks_per_rev == 0 {
            return Err(EstimatorFault::InvalidTicksPerRevolution);
        }
        if !now.is_finite() {
            return Err(EstimatorFault::NonFiniteMeasurement);
        }

        let dt = self
            .last_encoder
            .map(|last| now - last)
            .unwrap_or(self.config.nominal_period);
        if dt <= 0.0 {
            debug!("Encoder reading skipped: non-positive elapsed time {:.4}", dt);
            return Ok(());
        }

        let (left, right) = self.wheel_distances(left_ticks, right_ticks, ticks_per_rev);
        let linear_velocity = (left + right) / (2.0 * dt);
        let angular_velocity = (right - left) / (self.config.wheel_base * dt);

        // The odometry step covers the whole interval since the previous encoder
        // reading, so it is applied to the pose at that reading. Inertial
        // corrections in between only move the prediction it is compared to.
        let anchor = self
            .odometry_anchor
            .unwrap_or_else(|| Vector3::new(self.state[X], self.state[Y], self.state[HEADING]));
        self.advance_to(now);

        let theta = anchor[2];
        let dx = linear_velocity * dt * theta.cos();
        let dy = linear_velocity * dt * theta.sin();
        let dtheta = angular_velocity * dt;

        let mut h = SMatrix::<f64, 3, 6>::zeros();
        h[(0, X)] = 1.0;
        h[(1, Y)] = 1.0;
        h[(2, HEADING)] = 1.0;

        // z - h(x) with z = [x + dx, y + dy, heading + dθ]
        let innovation = Vector3::new(
            anchor[0] + dx - self.state[X],
            anchor[1] + dy - self.state[Y],
            wrap_angle(anchor[2] + dtheta - self.state[HEADING]),
        );
        let noise = self.encoder_noise;
        self.kalman_update(innovation, h, noise)?;

        self.state[VX] = linear_velocity * theta.cos();
        self.state[VY] = linear_velocity * theta.sin();
        self.state[OMEGA] = angular_velocity;

        self.last_encoder = Some(now);
        self.odometry_anchor = Some(Vector3::new(self.state[X], self.state[Y], self.state[HEADING]));
        self.total_distance += dx.hypot(dy);
        Ok(())
    }

    /// Corrects the heading alone from an inertial reading.
    pub fn correct_with_imu(
        &mut self,
        heading: f64,
        angular_velocity: Option<f64>,
        now: f64,
    ) -> Result<(), EstimatorFault> {
        if !heading.is_finite() || !now.is_finite() {
            return Err(EstimatorFault::NonFiniteMeasurement);
        }

        self.advance_to(now);

        let measured = wrap_angle(heading - self.heading_offset);
        let mut h = SMatrix::<f64, 1, 6>::zeros();
        h[(0, HEADING)] = 1.0;

        // The residual must be wrapped: near ±π an unwrapped residual is ~2π.
        let innovation = SVector::<f64, 1>::new(wrap_angle(measured - self.state[HEADING]));
        let noise = self.imu_noise;
        self.kalman_update(innovation, h, noise)?;

        if let Some(omega) = angular_velocity.filter(|w| w.is_finite()) {
            self.state[OMEGA] = omega;
        }
        Ok(())
    }

    /// Stores the offset between the true heading and the current estimate; it
    /// is subtracted from every later inertial heading.
    pub fn calibrate_heading(&mut self, true_heading: f64) {
        self.heading_offset = wrap_angle(true_heading - self.state[HEADING]);
        info!("Heading calibrated: offset={:.4}", self.heading_offset);
    }

    /// Converts ticks into a displacement along the current heading: (dx, dy, dθ).
    pub fn encoder_displacement(&self, left_ticks: i64, right_ticks: i64, ticks_per_rev: u32) -> (f64, f64, f64) {
        if ticks_per_rev == 0 {
            return (0.0, 0.0, 0.0);
        }
        let (left, right) = self.wheel_distances(left_ticks, right_ticks, ticks_per_rev);
        let linear = (left + right) / 2.0;
        let angular = (right - left) / self.config.wheel_base;
        let theta = self.state[HEADING];
        (linear * theta.cos(), linear * theta.sin(), angular)
    }

    /// Returns the current pose
    pub fn get_pose(&self) -> Pose {
        Self::estimate_from(&self.state, self.last_timestamp).pose
    }

    /// Returns the velocity sub-state
    pub fn velocity(&self) -> Velocity {
        Self::estimate_from(&self.state, self.last_timestamp).velocity
    }

    /// Returns the 3x3 pose block of the covariance.
    pub fn covariance(&self) -> Matrix3<f64> {
        self.covariance.fixed_view::<3, 3>(0, 0).into_owned()
    }

    /// Returns the full 6x6 covariance.
    pub fn full_covariance(&self) -> &Matrix6<f64> {
        &self.covariance
    }

    pub fn position_uncertainty(&self) -> PoseUncertainty {
        PoseUncertainty {
            x_std: self.covariance[(X, X)].max(0.0).sqrt(),
            y_std: self.covariance[(Y, Y)].max(0.0).sqrt(),
            heading_std: self.covariance[(HEADING, HEADING)].max(0.0).sqrt(),
        }
    }

    pub fn statistics(&self) -> EstimatorStatistics {
        let p = &self.covariance;
        let trace = p.trace();
        EstimatorStatistics {
            total_distance: self.total_distance,
            position_uncertainty: (p[(X, X)] + p[(Y, Y)]).max(0.0).sqrt(),
            heading_uncertainty: p[(HEADING, HEADING)].max(0.0).sqrt(),
            velocity_uncertainty: (p[(VX, VX)] + p[(VY, VY)]).max(0.0).sqrt(),
            angular_velocity_uncertainty: p[(OMEGA, OMEGA)].max(0.0).sqrt(),
            covariance_trace: trace,
            filter_stable: trace < self.config.stability_trace,
        }
    }

    pub fn config(&self) -> &EstimatorConfig {
        &self.config
    }

    // Predicts forward to `now` using the time since the previous prediction.
    fn advance_to(&mut self, now: f64) {
        let dt = self
            .last_predict
            .map(|last| now - last)
            .unwrap_or(self.config.nominal_period);
        self.predict(dt);
        if self.last_predict.is_none_or(|last| now > last) {
            self.last_predict = Some(now);
        }
        self.last_timestamp = self.last_timestamp.max(now);
    }

    fn propagate(&self, dt: f64) -> (Vector6<f64>, Matrix6<f64>) {
        let mut f = Matrix6::identity();
        f[(X, VX)] = dt;
        f[(Y, VY)] = dt;
        f[(HEADING, OMEGA)] = dt;

        let mut state = f * self.state;
        state[HEADING] = wrap_angle(state[HEADING]);

        let covariance = symmetrize(f * self.covariance * f.transpose() + self.process_noise * dt);
        (state, covariance)
    }

    fn kalman_update<const M: usize>(
        &mut self,
        innovation: SVector<f64, M>,
        h: SMatrix<f64, M, 6>,
        r: SMatrix<f64, M, M>,
    ) -> Result<(), EstimatorFault> {
        if innovation.iter().any(|v| !v.is_finite()) {
            warn!("Kalman update skipped: non-finite innovation");
            return Err(EstimatorFault::NonFiniteMeasurement);
        }

        let s = h * self.covariance * h.transpose() + r;
        let s_inv = match s.try_inverse() {
            Some(inv) if inv.iter().all(|v| v.is_finite()) => inv,
            _ => {
                warn!("Kalman gain could not be computed: singular innovation covariance");
                return Err(EstimatorFault::SingularInnovation);
            }
        };

        let gain = self.covariance * h.transpose() * s_inv;
        self.state += gain * innovation;
        self.state[HEADING] = wrap_angle(self.state[HEADING]);

        // Joseph form keeps P symmetric positive semi-definite.
        let i_kh = Matrix6::identity() - gain * h;
        self.covariance = symmetrize(i_kh * self.covariance * i_kh.transpose() + gain * r * gain.transpose());
        Ok(())
    }

    fn wheel_distances(&self, left_ticks: i64, right_ticks: i64, ticks_per_rev: u32) -> (f64, f64) {
        let circumference = 2.0 * PI * self.config.wheel_radius;
        let per_tick = circumference / f64::from(ticks_per_rev);
        (left_ticks as f64 * per_tick, right_ticks as f64 * per_tick)
    }

    fn estimate_from(state: &Vector6<f64>, timestamp: f64) -> StateEstimate {
        StateEstimate {
            pose: Pose {
                x: state[X],
                y: state[Y],
                heading: state[HEADING],
                timestamp,
            },
            velocity: Velocity {
                vx: state[VX],
                vy: state[VY],
                angular: state[OMEGA],
            },
        }
    }
}

impl Default for PoseEstimator {
    fn default() -> Self {
        PoseEstimator::new(EstimatorConfig::default())
    }
}

fn symmetrize(m: Matrix6<f64>) -> Matrix6<f64> {
    (m + m.transpose()) * 0.5
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rstest::rstest;

    const TICKS_PER_REV: u32 = 1000;

    fn asymmetry(p: &Matrix6<f64>) -> f64 {
        (p - p.transpose()).norm()
    }

    #[rstest]
    #[case(0.0)]
    #[case(PI)]
    #[case(-PI)]
    #[case(3.0 * PI)]
    #[case(-3.5 * PI)]
    #[case(100.25)]
    #[case(-7.0)]
    #[case(1e-12)]
    fn wrap_angle_lands_in_half_open_interval(#[case] theta: f64) {
        let wrapped = wrap_angle(theta);
        assert!(wrapped > -PI && wrapped <= PI, "{} wrapped to {}", theta, wrapped);
        assert_eq!(wrap_angle(wrapped), wrapped);
    }

    #[test]
    fn minus_pi_maps_to_plus_pi() {
        assert_relative_eq!(wrap_angle(-PI), PI, epsilon = 1e-12);
    }

    #[test]
    fn predict_with_non_positive_dt_is_a_no_op() {
        let mut estimator = PoseEstimator::default();
        let before = *estimator.full_covariance();
        estimator.predict(0.0);
        estimator.predict(-1.0);
        assert_eq!(*estimator.full_covariance(), before);
    }

    #[test]
    fn predict_grows_covariance_trace() {
        let mut estimator = PoseEstimator::default();
        let before = estimator.full_covariance().trace();
        estimator.predict(0.1);
        assert!(estimator.full_covariance().trace() > before);
    }

    #[test]
    fn straight_line_keeps_heading_and_advances_x() {
        let mut estimator = PoseEstimator::default();
        for step in 1..=50 {
            let now = step as f64 * 0.1;
            estimator
                .correct_with_encoders(80, 80, TICKS_PER_REV, now)
                .expect("encoder correction");
        }
        let pose = estimator.get_pose();
        assert!(pose.heading.abs() < 1e-6);
        assert!(pose.y.abs() < 1e-6);
        assert!(pose.x > 1.0, "x = {}", pose.x);
    }

    #[test]
    fn steady_drive_does_not_overshoot_odometry() {
        let mut estimator = PoseEstimator::default();
        for step in 1..=50 {
            estimator
                .correct_with_encoders(80, 80, TICKS_PER_REV, step as f64 * 0.1)
                .unwrap();
        }
        let (dx, _, _) = estimator.encoder_displacement(80 * 50, 80 * 50, TICKS_PER_REV);
        let x = estimator.get_pose().x;
        assert!(x <= dx + 1e-9, "x = {}, odometry = {}", x, dx);
        assert!(dx - x < 0.1, "x = {}, odometry = {}", x, dx);
    }

    #[test]
    fn inertial_readings_between_encoder_readings_do_not_add_distance() {
        let mut interleaved = PoseEstimator::default();
        let mut encoder_only = PoseEstimator::default();
        for step in 1..=50 {
            let now = step as f64 * 0.1;
            interleaved.correct_with_encoders(80, 80, TICKS_PER_REV, now).unwrap();
            encoder_only.correct_with_encoders(80, 80, TICKS_PER_REV, now).unwrap();
            if step < 50 {
                interleaved.correct_with_imu(0.0, Some(0.0), now + 0.05).unwrap();
            }
        }
        let (travelled, _, _) = interleaved.encoder_displacement(80 * 50, 80 * 50, TICKS_PER_REV);
        let x = interleaved.get_pose().x;
        assert!((x - travelled).abs() < 0.05, "x = {}, wheels = {}", x, travelled);
        assert!((x - encoder_only.get_pose().x).abs() < 0.05);
    }

    #[test]
    fn encoder_correction_does_not_grow_covariance_trace() {
        let mut estimator = PoseEstimator::default();
        estimator.correct_with_imu(0.0, None, 1.0).unwrap();
        let before = estimator.full_covariance().trace();
        // same timestamp: the prediction inside the correction is a no-op
        estimator.correct_with_encoders(40, 40, TICKS_PER_REV, 1.0).unwrap();
        let after = estimator.full_covariance().trace();
        assert!(after <= before + 1e-12, "trace {} -> {}", before, after);
        assert!(asymmetry(estimator.full_covariance()) < 1e-12);
    }

    #[test]
    fn right_wheel_faster_turns_left() {
        let mut estimator = PoseEstimator::default();
        estimator
            .correct_with_encoders(50, 150, TICKS_PER_REV, 0.1)
            .expect("encoder correction");
        assert!(estimator.velocity().angular > 0.0);
        assert!(estimator.get_pose().heading > 0.0);
    }

    #[test]
    fn imu_correction_near_pi_does_not_diverge() {
        let mut estimator = PoseEstimator::default();
        estimator.reset(0.0, 0.0, PI - 0.01);
        for step in 1..=20 {
            let now = step as f64 * 0.05;
            estimator
                .correct_with_imu(-PI + 0.01, None, now)
                .expect("imu correction");
        }
        let heading = estimator.get_pose().heading;
        // Either side of the ±π seam, never pulled through zero.
        assert!(heading.abs() > PI - 0.05, "heading = {}", heading);
    }

    #[test]
    fn correction_does_not_increase_trace() {
        let mut estimator = PoseEstimator::default();
        estimator.predict(0.1);
        estimator.last_predict = Some(1.0);
        let before = estimator.full_covariance().trace();
        estimator.correct_with_imu(0.2, Some(0.0), 1.0).expect("imu correction");
        assert!(estimator.full_covariance().trace() <= before + 1e-12);
    }

    #[test]
    fn covariance_stays_symmetric_and_psd() {
        let mut estimator = PoseEstimator::default();
        for step in 1..=200 {
            let now = step as f64 * 0.02;
            if step % 2 == 0 {
                estimator.correct_with_encoders(40, 47, TICKS_PER_REV, now).unwrap();
            } else {
                estimator.correct_with_imu((now * 0.3).sin() * 3.0, Some(0.1), now).unwrap();
            }
            assert!(asymmetry(estimator.full_covariance()) < 1e-9);
        }
        let eigen = estimator.full_covariance().symmetric_eigen();
        assert!(eigen.eigenvalues.iter().all(|&l| l > -1e-9));
    }

    #[test]
    fn singular_innovation_is_skipped() {
        let config = EstimatorConfig {
            imu_noise: 0.0,
            initial_covariance: 0.0,
            process_noise: [0.0; 6],
            ..EstimatorConfig::default()
        };
        let mut estimator = PoseEstimator::new(config);
        let result = estimator.correct_with_imu(1.0, None, 0.5);
        assert_eq!(result, Err(EstimatorFault::SingularInnovation));
        assert_eq!(estimator.get_pose().heading, 0.0);
    }

    #[test]
    fn zero_ticks_per_revolution_is_rejected() {
        let mut estimator = PoseEstimator::default();
        assert_eq!(
            estimator.correct_with_encoders(10, 10, 0, 0.1),
            Err(EstimatorFault::InvalidTicksPerRevolution)
        );
    }

    #[test]
    fn reset_restores_prior() {
        let mut estimator = PoseEstimator::default();
        estimator.correct_with_encoders(100, 120, TICKS_PER_REV, 0.1).unwrap();
        estimator.reset(1.0, 2.0, 0.5);
        let pose = estimator.get_pose();
        assert_eq!((pose.x, pose.y, pose.heading), (1.0, 2.0, 0.5));
        assert_eq!(estimator.velocity(), Velocity::default());
        assert_relative_eq!(estimator.full_covariance().trace(), 0.6, epsilon = 1e-12);
    }

    #[test]
    fn encoder_displacement_matches_wheel_geometry() {
        let estimator = PoseEstimator::default();
        let (dx, dy, dtheta) = estimator.encoder_displacement(1000, 1000, TICKS_PER_REV);
        assert_relative_eq!(dx, 2.0 * PI * 0.1, epsilon = 1e-12);
        assert_relative_eq!(dy, 0.0, epsilon = 1e-12);
        assert_relative_eq!(dtheta, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn predict_state_leaves_filter_untouched() {
        let mut estimator = PoseEstimator::default();
        estimator.correct_with_encoders(100, 100, TICKS_PER_REV, 0.1).unwrap();
        let before = estimator.get_pose();
        let preview = estimator.predict_state(1.0);
        assert!(preview.pose.x > before.x);
        assert_eq!(estimator.get_pose(), before);
    }

    #[test]
    fn calibrated_offset_is_removed_from_imu_heading() {
        let mut estimator = PoseEstimator::default();
        estimator.calibrate_heading(0.5);
        for step in 1..=30 {
            estimator.correct_with_imu(0.5, None, step as f64 * 0.1).unwrap();
        }
        assert!(estimator.get_pose().heading.abs() < 1e-3);
    }
}
