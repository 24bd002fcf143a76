//! Pose representation and the angle-wrapping convention used throughout the
//! filter. Every angular quantity in this crate wraps to `(-pi, pi]`; see
//! `wrap_angle`.

use nalgebra::{Matrix2, Vector2};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Robot pose in the world frame: position plus heading, in radians.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub x: f64,
    pub y: f64,
    pub theta: f64,
}

impl Pose {
    pub fn new(x: f64, y: f64, theta: f64) -> Self {
        Self {
            x,
            y,
            theta: wrap_angle(theta),
        }
    }

    pub fn origin() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    pub fn position(&self) -> Vector2<f64> {
        Vector2::new(self.x, self.y)
    }

    /// Rotation matrix taking robot-frame vectors to world-frame vectors.
    pub fn world_rotation(&self) -> Matrix2<f64> {
        let (s, c) = self.theta.sin_cos();
        Matrix2::new(c, -s, s, c)
    }

    /// Rotation matrix taking world-frame vectors to robot-frame vectors
    /// (the transpose of `world_rotation`, computed directly to avoid
    /// depending on evaluation order).
    pub fn robot_rotation(&self) -> Matrix2<f64> {
        let (s, c) = self.theta.sin_cos();
        Matrix2::new(c, s, -s, c)
    }
}

impl Default for Pose {
    fn default() -> Self {
        Self::origin()
    }
}

/// Wraps an angle in radians to `(-pi, pi]`.
pub fn wrap_angle(theta: f64) -> f64 {
    let wrapped = (theta + PI).rem_euclid(2.0 * PI) - PI;
    if wrapped <= -PI { wrapped + 2.0 * PI } else { wrapped }
}

/// Sign of `x` with `sign(0) == 0`, matching the convention the line-landmark
/// Jacobian relies on (numpy's `np.sign`, unlike `f64::signum`, maps zero to
/// zero rather than to +1).
pub fn sign(x: f64) -> f64 {
    if x > 0.0 {
        1.0
    } else if x < 0.0 {
        -1.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn wrap_angle_stays_in_range() {
        for i in -20..20 {
            let theta = i as f64 * 0.7;
            let wrapped = wrap_angle(theta);
            assert!(wrapped > -PI && wrapped <= PI, "theta={theta} wrapped={wrapped}");
        }
    }

    #[test]
    fn wrap_angle_identity_in_range() {
        assert_relative_eq!(wrap_angle(0.0), 0.0);
        assert_relative_eq!(wrap_angle(PI), PI);
        assert_relative_eq!(wrap_angle(PI / 2.0), PI / 2.0);
    }

    #[test]
    fn wrap_angle_wraps_boundary() {
        assert_relative_eq!(wrap_angle(-PI), PI);
        assert_relative_eq!(wrap_angle(3.0 * PI), PI, epsilon = 1e-9);
    }

    #[test]
    fn sign_matches_numpy_convention() {
        assert_eq!(sign(0.0), 0.0);
        assert_eq!(sign(2.5), 1.0);
        assert_eq!(sign(-2.5), -1.0);
    }

    #[test]
    fn rotation_matrices_are_transposes() {
        let pose = Pose::new(1.0, -2.0, 0.7);
        let diff = pose.robot_rotation() - pose.world_rotation().transpose();
        assert_relative_eq!(diff.norm(), 0.0, epsilon = 1e-12);
    }
}
