//! FastSLAM core: per-landmark EKF, per-particle map with data association,
//! and particle filtering with resampling for a differential-drive robot
//! carrying wheel odometry, a 2-D lidar, and a fiducial-detecting camera.
//!
//! This crate owns the estimation core only. Sensor decoding (image
//! processing, rosbag ingestion, lidar line extraction), persistence I/O,
//! and visualization are external collaborators that consume the types in
//! [`sensor_data`].

pub mod ekf;
pub mod error;
pub mod filter;
pub mod geometry;
pub mod landmark;
pub mod map;
pub mod particle;
pub mod sensor_data;

pub use error::SlamError;
pub use filter::{FastSlam, FastSlamConfig};
pub use geometry::Pose;
pub use map::{LandmarkKind, Map};
pub use particle::{OdometryDelta, Particle};
