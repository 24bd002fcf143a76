//! The three landmark geometries FastSLAM tracks, each a thin wrapper
//! around a fixed-dimension [`Ekf`](crate::ekf::Ekf): unoriented points
//! (plain 2-D position), oriented points (fiducials: position + in-plane
//! angle), and infinite lines (rho/alpha with the rho >= 0 canonicalization).
//!
//! The measurement models below are grounded on
//! `original_source/slam/particle.py` (`h_uo`/`h_o` and their Jacobians) and
//! `original_source/slam/map.py` (`h_line`/`h_inv_line` and their
//! Jacobians), translated from the parameters-tuple style into explicit
//! context structs per the per-call-context design note.

use crate::ekf::{subtract, Ekf};
use crate::error::SlamError;
use crate::geometry::{sign, wrap_angle};
use nalgebra::{Matrix2, Matrix3, Vector2, Vector3};

/// Lidar mounting offset in the robot frame, used when projecting line
/// observations between robot and world coordinates.
pub const LIDAR_OFFSET: Vector2<f64> = Vector2::new(-0.0625, 0.0);

fn diff_angle_last(z: &Vector2<f64>, z_hat: &Vector2<f64>) -> Vector2<f64> {
    Vector2::new(z.x - z_hat.x, wrap_angle(z.y - z_hat.y))
}

fn diff_angle_third(z: &Vector3<f64>, z_hat: &Vector3<f64>) -> Vector3<f64> {
    Vector3::new(z.x - z_hat.x, z.y - z_hat.y, wrap_angle(z.z - z_hat.z))
}

// ---------------------------------------------------------------------
// Unoriented point landmark
// ---------------------------------------------------------------------

/// Per-call measurement context for an unoriented point landmark: the
/// robot's world position, its world-to-robot rotation, and the
/// measurement-noise gain (noise covariance is `n_gain * n_gain^T`).
#[derive(Debug, Clone, Copy)]
pub struct UnorientedContext {
    pub robot_position: Vector2<f64>,
    /// World-to-robot rotation (i.e. `R` such that `R @ world_vector` gives
    /// the robot-frame vector).
    pub world_to_robot: Matrix2<f64>,
    pub noise_gain: Matrix2<f64>,
}

fn h_unoriented(x: &Vector2<f64>, ctx: &UnorientedContext) -> Vector2<f64> {
    ctx.world_to_robot * (x - ctx.robot_position)
}

fn h_inv_unoriented(z: &Vector2<f64>, ctx: &UnorientedContext) -> Vector2<f64> {
    ctx.world_to_robot.transpose() * z + ctx.robot_position
}

fn jacobian_x_unoriented(_x: &Vector2<f64>, ctx: &UnorientedContext) -> Matrix2<f64> {
    ctx.world_to_robot
}

fn jacobian_n_unoriented(x: &Vector2<f64>, ctx: &UnorientedContext) -> Matrix2<f64> {
    let z = ctx.world_to_robot * (x - ctx.robot_position);
    Matrix2::new(z.x, -z.y, z.y, z.x) * ctx.noise_gain
}

#[derive(Debug, Clone)]
pub struct UnorientedLandmark {
    pub ekf: Ekf<2, 2>,
    pub latest_measurement: Option<Vector2<f64>>,
    pub seen_count: u32,
}

impl UnorientedLandmark {
    pub fn initialize(z: &Vector2<f64>, ctx: &UnorientedContext) -> Result<Self, SlamError> {
        let mu0 = h_inv_unoriented(z, ctx);
        let cov0 = initial_covariance(&mu0, ctx, jacobian_x_unoriented, jacobian_n_unoriented)?;
        Ok(Self {
            ekf: Ekf::new(mu0, cov0, None),
            latest_measurement: Some(mu0),
            seen_count: 1,
        })
    }

    pub fn update(&mut self, z: &Vector2<f64>, ctx: &UnorientedContext) -> Result<(), SlamError> {
        self.ekf.update(
            z,
            h_unoriented,
            jacobian_x_unoriented,
            jacobian_n_unoriented,
            subtract,
            ctx,
        )?;
        self.latest_measurement = Some(h_inv_unoriented(z, ctx));
        self.seen_count += 1;
        Ok(())
    }

    pub fn likelihood(&self, z: &Vector2<f64>, ctx: &UnorientedContext) -> Result<f64, SlamError> {
        self.ekf.likelihood(
            z,
            h_unoriented,
            jacobian_x_unoriented,
            jacobian_n_unoriented,
            subtract,
            ctx,
            false,
        )
    }
}

// ---------------------------------------------------------------------
// Oriented point landmark (fiducial)
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct OrientedContext {
    pub robot_position: Vector2<f64>,
    pub robot_heading: f64,
    /// World-to-robot rotation.
    pub world_to_robot: Matrix2<f64>,
    /// 3x3 noise gain; the top-left 2x2 block scales range/bearing noise,
    /// the `[2,2]` entry scales orientation noise.
    pub noise_gain: Matrix3<f64>,
}

fn h_oriented(x: &Vector3<f64>, ctx: &OrientedContext) -> Vector3<f64> {
    let position = x.xy();
    let psi = x.z;
    let z = ctx.world_to_robot * (position - ctx.robot_position);
    Vector3::new(z.x, z.y, psi - ctx.robot_heading)
}

fn h_inv_oriented(z: &Vector3<f64>, ctx: &OrientedContext) -> Vector3<f64> {
    let z_pos = z.xy();
    let position = ctx.world_to_robot.transpose() * z_pos + ctx.robot_position;
    Vector3::new(position.x, position.y, z.z + ctx.robot_heading)
}

fn jacobian_x_oriented(_x: &Vector3<f64>, ctx: &OrientedContext) -> Matrix3<f64> {
    let mut dh = Matrix3::zeros();
    dh.fixed_view_mut::<2, 2>(0, 0).copy_from(&ctx.world_to_robot);
    dh[(2, 2)] = 1.0;
    dh
}

fn jacobian_n_oriented(x: &Vector3<f64>, ctx: &OrientedContext) -> Matrix3<f64> {
    let z = ctx.world_to_robot * (x.xy() - ctx.robot_position);
    let rot_like = Matrix2::new(z.x, -z.y, z.y, z.x);
    let n_gain_pos = ctx.noise_gain.fixed_view::<2, 2>(0, 0).into_owned();
    let dh_pos = rot_like * n_gain_pos;

    let mut dh = Matrix3::zeros();
    dh.fixed_view_mut::<2, 2>(0, 0).copy_from(&dh_pos);
    dh[(2, 2)] = ctx.noise_gain[(2, 2)];
    dh
}

#[derive(Debug, Clone)]
pub struct OrientedLandmark {
    pub ekf: Ekf<3, 3>,
    pub latest_measurement: Option<Vector3<f64>>,
    pub seen_count: u32,
}

impl OrientedLandmark {
    pub fn initialize(z: &Vector3<f64>, ctx: &OrientedContext) -> Result<Self, SlamError> {
        let mu0 = h_inv_oriented(z, ctx);
        let cov0 = initial_covariance(&mu0, ctx, jacobian_x_oriented, jacobian_n_oriented)?;
        Ok(Self {
            ekf: Ekf::new(mu0, cov0, None),
            latest_measurement: Some(mu0),
            seen_count: 1,
        })
    }

    pub fn update(&mut self, z: &Vector3<f64>, ctx: &OrientedContext) -> Result<(), SlamError> {
        self.ekf.update(
            z,
            h_oriented,
            jacobian_x_oriented,
            jacobian_n_oriented,
            diff_angle_third,
            ctx,
        )?;
        self.latest_measurement = Some(h_inv_oriented(z, ctx));
        self.seen_count += 1;
        Ok(())
    }

    pub fn likelihood(&self, z: &Vector3<f64>, ctx: &OrientedContext) -> Result<f64, SlamError> {
        self.ekf.likelihood(
            z,
            h_oriented,
            jacobian_x_oriented,
            jacobian_n_oriented,
            diff_angle_third,
            ctx,
            false,
        )
    }
}

// ---------------------------------------------------------------------
// Line landmark
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct LineContext {
    pub robot_position: Vector2<f64>,
    pub robot_heading: f64,
    /// Robot-to-world rotation.
    pub robot_to_world: Matrix2<f64>,
    pub lidar_offset: Vector2<f64>,
    pub noise_gain: Matrix2<f64>,
}

/// Canonicalizes a `(rho, alpha)` pair to `rho >= 0`, `alpha in (-pi, pi]`.
fn canonicalize_line(rho: f64, alpha: f64) -> Vector2<f64> {
    if rho < 0.0 {
        Vector2::new(-rho, wrap_angle(alpha + std::f64::consts::PI))
    } else {
        Vector2::new(rho, wrap_angle(alpha))
    }
}

/// World-frame `(rho, alpha)` -> robot-frame `(rho, alpha)`.
fn h_line(x: &Vector2<f64>, ctx: &LineContext) -> Vector2<f64> {
    let (rho_world, theta_world) = (x.x, x.y);
    let theta_robot = wrap_angle(theta_world - ctx.robot_heading);
    let point_on_line_world = Vector2::new(rho_world * theta_world.cos(), rho_world * theta_world.sin());
    let point_on_line_robot = ctx.robot_to_world.transpose() * (point_on_line_world - ctx.robot_position) - ctx.lidar_offset;
    let rho_robot = point_on_line_robot.dot(&Vector2::new(theta_robot.cos(), theta_robot.sin()));
    canonicalize_line(rho_robot, theta_robot)
}

/// Robot-frame `(rho, alpha)` -> world-frame `(rho, alpha)`.
fn h_inv_line(z: &Vector2<f64>, ctx: &LineContext) -> Vector2<f64> {
    let (rho_robot, theta_robot) = (z.x, z.y);
    let theta_world = wrap_angle(theta_robot + ctx.robot_heading);
    let point_on_line_robot = Vector2::new(rho_robot * theta_robot.cos(), rho_robot * theta_robot.sin()) + ctx.lidar_offset;
    let point_on_line_world = ctx.robot_to_world * point_on_line_robot + ctx.robot_position;
    let rho_world = point_on_line_world.dot(&Vector2::new(theta_world.cos(), theta_world.sin()));
    canonicalize_line(rho_world, theta_world)
}

fn jacobian_x_line(x: &Vector2<f64>, ctx: &LineContext) -> Matrix2<f64> {
    let direction = -sign(ctx.robot_position.dot(&Vector2::new(x.y.cos(), x.y.sin())) - x.x);
    let rho = ctx.robot_position.norm();
    let alpha = ctx.robot_position.y.atan2(ctx.robot_position.x);
    let mut dhx = Matrix2::identity();
    dhx[(0, 0)] = direction;
    dhx[(0, 1)] = rho * (x.y - alpha + (-direction + 1.0) / 2.0 * std::f64::consts::PI).sin();
    dhx
}

fn jacobian_n_line(_x: &Vector2<f64>, ctx: &LineContext) -> Matrix2<f64> {
    ctx.noise_gain
}

#[derive(Debug, Clone)]
pub struct LineLandmark {
    pub ekf: Ekf<2, 2>,
    pub latest_measurement: Option<Vector2<f64>>,
    pub seen_count: u32,
}

impl LineLandmark {
    pub fn initialize(z: &Vector2<f64>, ctx: &LineContext) -> Result<Self, SlamError> {
        let mu0 = h_inv_line(z, ctx);
        let cov0 = initial_covariance(&mu0, ctx, jacobian_x_line, jacobian_n_line)?;
        Ok(Self {
            ekf: Ekf::new(mu0, cov0, None),
            latest_measurement: Some(mu0),
            seen_count: 1,
        })
    }

    pub fn update(&mut self, z: &Vector2<f64>, ctx: &LineContext) -> Result<(), SlamError> {
        self.ekf
            .update(z, h_line, jacobian_x_line, jacobian_n_line, diff_angle_last, ctx)?;
        self.latest_measurement = Some(h_inv_line(z, ctx));
        self.seen_count += 1;
        Ok(())
    }

    pub fn likelihood(&self, z: &Vector2<f64>, ctx: &LineContext) -> Result<f64, SlamError> {
        self.ekf
            .likelihood(z, h_line, jacobian_x_line, jacobian_n_line, diff_angle_last, ctx, false)
    }

    pub fn mahalanobis_squared(&self, z: &Vector2<f64>, ctx: &LineContext) -> Result<f64, SlamError> {
        self.ekf
            .mahalanobis_squared(z, h_line, jacobian_x_line, jacobian_n_line, diff_angle_last, ctx)
    }
}

/// Projects measurement noise into state space at landmark birth:
/// `cov0 = Hx^-1 Hn Hn^T Hx^-T`.
fn initial_covariance<const N: usize, C>(
    x0: &nalgebra::SVector<f64, N>,
    ctx: &C,
    jacobian_x: impl Fn(&nalgebra::SVector<f64, N>, &C) -> nalgebra::SMatrix<f64, N, N>,
    jacobian_n: impl Fn(&nalgebra::SVector<f64, N>, &C) -> nalgebra::SMatrix<f64, N, N>,
) -> Result<nalgebra::SMatrix<f64, N, N>, SlamError> {
    let hx = jacobian_x(x0, ctx);
    let hn = jacobian_n(x0, ctx);
    let hx_inv = hx.try_inverse().ok_or(SlamError::NumericalFailure)?;
    Ok(hx_inv * hn * hn.transpose() * hx_inv.transpose())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    fn identity_unoriented_ctx() -> UnorientedContext {
        UnorientedContext {
            robot_position: Vector2::zeros(),
            world_to_robot: Matrix2::identity(),
            noise_gain: Matrix2::identity() * 0.1,
        }
    }

    #[test]
    fn unoriented_round_trip_h_and_h_inv() {
        let ctx = identity_unoriented_ctx();
        let x = Vector2::new(3.0, -2.0);
        let z = h_unoriented(&x, &ctx);
        let x_back = h_inv_unoriented(&z, &ctx);
        assert_relative_eq!(x, x_back, epsilon = 1e-10);
    }

    #[test]
    fn unoriented_landmark_created_then_updated() {
        let ctx = identity_unoriented_ctx();
        let z0 = Vector2::new(2.0, 0.0);
        let mut lm = UnorientedLandmark::initialize(&z0, &ctx).unwrap();
        assert_eq!(lm.seen_count, 1);
        lm.update(&z0, &ctx).unwrap();
        assert_eq!(lm.seen_count, 2);
        assert_relative_eq!(lm.ekf.mu, z0, epsilon = 1e-6);
    }

    fn identity_oriented_ctx() -> OrientedContext {
        OrientedContext {
            robot_position: Vector2::zeros(),
            robot_heading: 0.0,
            world_to_robot: Matrix2::identity(),
            noise_gain: Matrix3::identity() * 0.1,
        }
    }

    #[test]
    fn oriented_round_trip_h_and_h_inv() {
        let ctx = identity_oriented_ctx();
        let x = Vector3::new(1.0, 2.0, 0.4);
        let z = h_oriented(&x, &ctx);
        let x_back = h_inv_oriented(&z, &ctx);
        assert_relative_eq!(x, x_back, epsilon = 1e-10);
    }

    #[test]
    fn oriented_diff_wraps_angle_component_only() {
        let a = Vector3::new(1.0, 1.0, PI - 0.1);
        let b = Vector3::new(1.0, 1.0, -PI + 0.1);
        let d = diff_angle_third(&a, &b);
        assert!(d.z > -PI && d.z <= PI);
        assert_relative_eq!(d.x, 0.0, epsilon = 1e-12);
        assert_relative_eq!(d.y, 0.0, epsilon = 1e-12);
    }

    fn identity_line_ctx() -> LineContext {
        LineContext {
            robot_position: Vector2::zeros(),
            robot_heading: 0.0,
            robot_to_world: Matrix2::identity(),
            lidar_offset: Vector2::zeros(),
            noise_gain: Matrix2::identity() * 0.1,
        }
    }

    #[test]
    fn line_round_trip_on_canonical_set() {
        let ctx = identity_line_ctx();
        for &(rho, alpha) in &[
            (1.0, 0.0),
            (2.5, PI / 2.0),
            (0.3, -PI / 2.0 + 0.01),
            (5.0, PI),
        ] {
            let x = Vector2::new(rho, alpha);
            let z = h_line(&x, &ctx);
            let x_back = h_inv_line(&z, &ctx);
            assert_relative_eq!(x.x, x_back.x, epsilon = 1e-8);
            assert_relative_eq!(x.y, x_back.y, epsilon = 1e-8);
        }
    }

    #[test]
    fn line_canonicalization_rejects_negative_rho() {
        let c = canonicalize_line(-2.0, 0.3);
        assert!(c.x >= 0.0);
        let alt = canonicalize_line(2.0, 0.3 + PI);
        assert_relative_eq!(c.x, alt.x, epsilon = 1e-10);
    }

    #[test]
    fn line_landmark_creation_and_mahalanobis_zero_on_exact_repeat() {
        let ctx = identity_line_ctx();
        let z0 = Vector2::new(1.0, 0.2);
        let lm = LineLandmark::initialize(&z0, &ctx).unwrap();
        let d = lm.mahalanobis_squared(&z0, &ctx).unwrap();
        assert_relative_eq!(d, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn line_landmark_birth_reports_numerical_failure_when_robot_sits_on_the_line() {
        let mut ctx = identity_line_ctx();
        ctx.robot_position = Vector2::new(1.0, 0.0);
        let z0 = Vector2::new(0.0, 0.0);
        let err = LineLandmark::initialize(&z0, &ctx).unwrap_err();
        assert_eq!(err, SlamError::NumericalFailure);
    }
}
