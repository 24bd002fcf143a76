//! A single particle: a candidate robot pose plus the landmark map
//! conditioned on that pose. Motion sampling and the three observation
//! entry points (`apply_action`, `make_unoriented_observation`,
//! `make_oriented_observation`, `make_line_observation`) are grounded on
//! `original_source/slam/particle.py`'s `Particle` class.

use crate::geometry::{wrap_angle, Pose};
use crate::landmark::{LineContext, OrientedContext, UnorientedContext, LIDAR_OFFSET};
use crate::map::{Map, DEFAULT_LINE_ASSOCIATION_THRESHOLD_SQ};
use nalgebra::{Matrix2, Matrix3, Vector2, Vector3};

/// Added to an externally supplied fiducial id before it is used as a map
/// key, so fiducial keys land in the Map's strictly-positive key space and
/// can never collide with line landmarks' strictly-negative keys. Grounded
/// on `original_source/slam/particle.py::make_unoriented_observation`'s
/// `landmark_id=obs_data[0]+100`; applied to both point-landmark kinds here
/// since spec.md's key-discipline invariant binds both, not just unoriented.
pub const FIDUCIAL_KEY_OFFSET: i64 = 100;

/// Odometry-derived motion increment: forward translation and in-place
/// rotation, as produced by a differential-drive odometry model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OdometryDelta {
    pub distance: f64,
    pub rotation: f64,
}

#[derive(Debug, Clone)]
pub struct Particle {
    pub pose: Pose,
    pub map: Map,
    pub weight: f64,
}

impl Particle {
    pub fn new(pose: Pose) -> Self {
        Self { pose, map: Map::new(), weight: 1.0 }
    }

    /// Advances the pose by a noisy draw of `delta`. `distance_noise` and
    /// `rotation_noise` are already-sampled Gaussian perturbations (the
    /// caller owns the RNG so that resampling never has to worry about
    /// per-particle stream divergence).
    pub fn apply_action(&mut self, delta: &OdometryDelta, distance_noise: f64, rotation_noise: f64) {
        let distance = delta.distance + distance_noise;
        let rotation = delta.rotation + rotation_noise;
        let theta_mid = wrap_angle(self.pose.theta + rotation / 2.0);
        self.pose.x += distance * theta_mid.cos();
        self.pose.y += distance * theta_mid.sin();
        self.pose.theta = wrap_angle(self.pose.theta + rotation);
    }

    fn unoriented_context(&self, noise_gain: Matrix2<f64>) -> UnorientedContext {
        UnorientedContext {
            robot_position: self.pose.position(),
            world_to_robot: self.pose.robot_rotation(),
            noise_gain,
        }
    }

    fn oriented_context(&self, noise_gain: Matrix3<f64>) -> OrientedContext {
        OrientedContext {
            robot_position: self.pose.position(),
            robot_heading: self.pose.theta,
            world_to_robot: self.pose.robot_rotation(),
            noise_gain,
        }
    }

    fn line_context(&self, noise_gain: Matrix2<f64>) -> LineContext {
        LineContext {
            robot_position: self.pose.position(),
            robot_heading: self.pose.theta,
            robot_to_world: self.pose.world_rotation(),
            lidar_offset: LIDAR_OFFSET,
            noise_gain,
        }
    }

    /// Updates the unoriented landmark identified by `external_id` with a
    /// range/bearing measurement `(range, bearing)`, converting it to the
    /// robot-frame Cartesian coordinates the landmark model expects before
    /// dispatching to the map, and folds the resulting likelihood into this
    /// particle's weight. Landmark creation (first sighting) leaves the
    /// weight untouched.
    pub fn make_unoriented_observation(
        &mut self,
        external_id: i64,
        range: f64,
        bearing: f64,
        noise_gain: Matrix2<f64>,
    ) -> Result<(), crate::error::SlamError> {
        let z = Vector2::new(range * bearing.cos(), range * bearing.sin());
        let ctx = self.unoriented_context(noise_gain);
        let id = external_id + FIDUCIAL_KEY_OFFSET;
        if let Some(likelihood) = self.map.update_unoriented(id, &z, &ctx)? {
            self.weight *= likelihood;
        }
        Ok(())
    }

    /// Updates the oriented (fiducial) landmark identified by `external_id`
    /// with a range/bearing/orientation measurement
    /// `(range, bearing, orientation)`, converting the range/bearing pair to
    /// robot-frame Cartesian coordinates before dispatching to the map.
    pub fn make_oriented_observation(
        &mut self,
        external_id: i64,
        range: f64,
        bearing: f64,
        orientation: f64,
        noise_gain: Matrix3<f64>,
    ) -> Result<(), crate::error::SlamError> {
        let z = Vector3::new(range * bearing.cos(), range * bearing.sin(), orientation);
        let ctx = self.oriented_context(noise_gain);
        let id = external_id + FIDUCIAL_KEY_OFFSET;
        if let Some(likelihood) = self.map.update_oriented(id, &z, &ctx)? {
            self.weight *= likelihood;
        }
        Ok(())
    }

    /// Associates a line observation `z` against this particle's existing
    /// line landmarks via Mahalanobis-squared nearest-neighbor gating
    /// (threshold `tau_sq`), updating the match if one clears the gate or
    /// creating a new line landmark otherwise.
    pub fn make_line_observation(
        &mut self,
        z: &Vector2<f64>,
        noise_gain: Matrix2<f64>,
        tau_sq: f64,
    ) -> Result<i64, crate::error::SlamError> {
        let ctx = self.line_context(noise_gain);
        let id = match self.map.best_line_match(z, &ctx) {
            Some((key, distance_sq)) if distance_sq <= tau_sq => key,
            _ => self.map.next_line_key(),
        };
        if let Some(likelihood) = self.map.update_line(id, z, &ctx)? {
            self.weight *= likelihood;
        }
        Ok(id)
    }

    /// Convenience wrapper around [`make_line_observation`](Self::make_line_observation)
    /// using the default association gate.
    pub fn make_line_observation_default_gate(
        &mut self,
        z: &Vector2<f64>,
        noise_gain: Matrix2<f64>,
    ) -> Result<i64, crate::error::SlamError> {
        self.make_line_observation(z, noise_gain, DEFAULT_LINE_ASSOCIATION_THRESHOLD_SQ)
    }

    /// Deep copy used when a particle is selected more than once during
    /// resampling, so that two surviving particles never alias the same map.
    pub fn copy(&self) -> Self {
        self.clone()
    }
}
