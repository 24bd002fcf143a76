//! External data-interchange types: the sensor stream this crate consumes
//! and the filter output it produces. Decoding raw sensor frames (rosbags,
//! camera images, lidar drivers) is out of scope; this module only defines
//! the typed envelopes downstream ingestion/visualization code implements
//! against.
//!
//! `SensorDataSet` and `content_hash` are grounded on
//! `original_source/sensor_data/sensor_data.py`'s `SensorData` dataclass and
//! its `hash_str` method.

use crate::geometry::Pose;
use crate::map::LandmarkKind;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct OdometryReading {
    pub timestamp_ns: u64,
    pub pose: Pose,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LidarScan {
    pub timestamp_ns: u64,
    pub ranges: Vec<f64>,
}

/// A single line extracted from a lidar scan by an external line-extraction
/// step (e.g. split-and-merge or RANSAC); this crate consumes these, not raw
/// ranges, for `FastSlam::observe_line`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct LineObservationSample {
    pub rho: f64,
    pub alpha: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct FiducialDetection {
    pub id: u32,
    pub bearing: f64,
    pub range: f64,
    pub orientation: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CameraDetection {
    pub timestamp_ns: u64,
    pub detections: Vec<FiducialDetection>,
    /// Raw frame bytes, retained only for offline replay/debugging; excluded
    /// from `content_hash` (see below).
    pub image: Option<Vec<u8>>,
}

/// Ground-truth trajectory and landmark positions available only in
/// simulated sensor data, carried through for scenario-test scoring.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimulationGroundTruth {
    pub poses: Vec<Pose>,
    pub landmark_positions: Vec<(f64, f64)>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SensorDataSet {
    pub odometry: Vec<OdometryReading>,
    pub lidar: Vec<LidarScan>,
    pub camera: Vec<CameraDetection>,
    pub comment: String,
    pub from_rosbag: bool,
    pub sim_data: Option<SimulationGroundTruth>,
}

impl SensorDataSet {
    /// SHA-1 digest over timestamps and numeric payloads (little-endian
    /// IEEE-754 doubles, row-major for scan ranges), excluding camera image
    /// bytes and the free-form comment — mirrors `sensor_data.py`'s
    /// `hash_str`, which hashes only the data that determines filter
    /// behavior.
    pub fn content_hash(&self) -> [u8; 20] {
        let mut hasher = Sha1::new();
        for reading in &self.odometry {
            hasher.update(reading.timestamp_ns.to_le_bytes());
            hasher.update(reading.pose.x.to_le_bytes());
            hasher.update(reading.pose.y.to_le_bytes());
            hasher.update(reading.pose.theta.to_le_bytes());
        }
        for scan in &self.lidar {
            hasher.update(scan.timestamp_ns.to_le_bytes());
            for range in &scan.ranges {
                hasher.update(range.to_le_bytes());
            }
        }
        for frame in &self.camera {
            hasher.update(frame.timestamp_ns.to_le_bytes());
            for detection in &frame.detections {
                hasher.update(detection.id.to_le_bytes());
                hasher.update(detection.bearing.to_le_bytes());
                hasher.update(detection.range.to_le_bytes());
                hasher.update(detection.orientation.to_le_bytes());
            }
        }
        hasher.finalize().into()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConfirmedLandmark {
    pub id: i64,
    pub mean: Vec<f64>,
    pub covariance: Vec<f64>,
    pub seen_count: u32,
}

impl ConfirmedLandmark {
    pub fn from_landmark(id: i64, kind: &LandmarkKind) -> Self {
        match kind {
            LandmarkKind::Unoriented(lm) => Self {
                id,
                mean: lm.ekf.mu.iter().copied().collect(),
                covariance: lm.ekf.cov.iter().copied().collect(),
                seen_count: lm.seen_count,
            },
            LandmarkKind::Oriented(lm) => Self {
                id,
                mean: lm.ekf.mu.iter().copied().collect(),
                covariance: lm.ekf.cov.iter().copied().collect(),
                seen_count: lm.seen_count,
            },
            LandmarkKind::Line(lm) => Self {
                id,
                mean: lm.ekf.mu.iter().copied().collect(),
                covariance: lm.ekf.cov.iter().copied().collect(),
                seen_count: lm.seen_count,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FilterOutput {
    pub best_pose: Pose,
    pub particles: Vec<(Pose, f64)>,
    pub landmarks: Vec<ConfirmedLandmark>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_hash_is_stable_for_identical_data() {
        let data = SensorDataSet {
            odometry: vec![OdometryReading { timestamp_ns: 100, pose: Pose::new(1.0, 2.0, 0.3) }],
            ..Default::default()
        };
        assert_eq!(data.content_hash(), data.content_hash());
    }

    #[test]
    fn content_hash_ignores_camera_image_bytes() {
        let base = CameraDetection { timestamp_ns: 5, detections: vec![], image: None };
        let with_image = CameraDetection {
            image: Some(vec![1, 2, 3, 4]),
            ..base.clone()
        };
        let a = SensorDataSet { camera: vec![base], ..Default::default() };
        let b = SensorDataSet { camera: vec![with_image], ..Default::default() };
        assert_eq!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn content_hash_differs_for_different_odometry() {
        let a = SensorDataSet {
            odometry: vec![OdometryReading { timestamp_ns: 0, pose: Pose::origin() }],
            ..Default::default()
        };
        let b = SensorDataSet {
            odometry: vec![OdometryReading { timestamp_ns: 0, pose: Pose::new(1.0, 0.0, 0.0) }],
            ..Default::default()
        };
        assert_ne!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn content_hash_ignores_the_comment_field() {
        let a = SensorDataSet { comment: "run 1".into(), ..Default::default() };
        let b = SensorDataSet { comment: "run 2".into(), ..Default::default() };
        assert_eq!(a.content_hash(), b.content_hash());
    }
}
