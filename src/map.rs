//! A particle's map: a keyed collection of landmarks plus the dispatch
//! logic that turns an observation into either a new landmark or an EKF
//! update against an existing one.
//!
//! Grounded on `original_source/slam/map.py`'s `Map.update`. Per spec, a
//! freshly created landmark must not perturb the particle's weight — this
//! is expressed in Rust as `update_*` returning `Option<f64>`, with `None`
//! standing in for the Python implementation's sentinel `None` return
//! (as opposed to a numeric `1.0`, which would bias particles toward richer
//! maps).

use crate::error::SlamError;
use crate::landmark::{
    LineContext, LineLandmark, OrientedContext, OrientedLandmark, UnorientedContext,
    UnorientedLandmark,
};
use nalgebra::{Vector2, Vector3};
use std::collections::HashMap;
use tracing::debug;

/// A stored landmark of one of the three supported geometries.
#[derive(Debug, Clone)]
pub enum LandmarkKind {
    Unoriented(UnorientedLandmark),
    Oriented(OrientedLandmark),
    Line(LineLandmark),
}

/// Default Mahalanobis-squared gate (tau = 3) for line-landmark association.
pub const DEFAULT_LINE_ASSOCIATION_THRESHOLD_SQ: f64 = 9.0;

#[derive(Debug, Clone, Default)]
pub struct Map {
    landmarks: HashMap<i64, LandmarkKind>,
    /// One less than the most negative line key ever assigned; `None` before
    /// any line landmark exists.
    min_line_key: Option<i64>,
}

impl Map {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn landmarks(&self) -> &HashMap<i64, LandmarkKind> {
        &self.landmarks
    }

    pub fn get(&self, id: i64) -> Option<&LandmarkKind> {
        self.landmarks.get(&id)
    }

    /// Keys of currently tracked line landmarks (always strictly negative).
    pub fn line_keys(&self) -> impl Iterator<Item = i64> + '_ {
        self.landmarks.keys().copied().filter(|&k| k < 0)
    }

    /// The key a brand-new line landmark would receive.
    pub fn next_line_key(&self) -> i64 {
        self.min_line_key.map(|k| k - 1).unwrap_or(-1)
    }

    pub fn update_unoriented(
        &mut self,
        id: i64,
        z: &Vector2<f64>,
        ctx: &UnorientedContext,
    ) -> Result<Option<f64>, SlamError> {
        match self.landmarks.get_mut(&id) {
            None => {
                debug!(id, "creating unoriented landmark");
                self.landmarks
                    .insert(id, LandmarkKind::Unoriented(UnorientedLandmark::initialize(z, ctx)?));
                Ok(None)
            }
            Some(LandmarkKind::Unoriented(lm)) => {
                let likelihood = lm.likelihood(z, ctx)?;
                lm.update(z, ctx)?;
                Ok(Some(likelihood))
            }
            Some(other) => Err(SlamError::ShapeMismatch { expected: 2, got: state_dimension(other) }),
        }
    }

    pub fn update_oriented(
        &mut self,
        id: i64,
        z: &Vector3<f64>,
        ctx: &OrientedContext,
    ) -> Result<Option<f64>, SlamError> {
        match self.landmarks.get_mut(&id) {
            None => {
                debug!(id, "creating oriented landmark");
                self.landmarks
                    .insert(id, LandmarkKind::Oriented(OrientedLandmark::initialize(z, ctx)?));
                Ok(None)
            }
            Some(LandmarkKind::Oriented(lm)) => {
                let likelihood = lm.likelihood(z, ctx)?;
                lm.update(z, ctx)?;
                Ok(Some(likelihood))
            }
            Some(other) => Err(SlamError::ShapeMismatch { expected: 3, got: state_dimension(other) }),
        }
    }

    /// Updates a line landmark at `id`, or creates a new one if `id` is not
    /// yet tracked. Unlike the point-landmark variants, the caller
    /// (`Particle::make_line_observation`) is responsible for choosing `id`
    /// via Mahalanobis-gated association before calling this.
    pub fn update_line(
        &mut self,
        id: i64,
        z: &Vector2<f64>,
        ctx: &LineContext,
    ) -> Result<Option<f64>, SlamError> {
        match self.landmarks.get_mut(&id) {
            None => {
                debug!(id, "creating line landmark");
                self.landmarks.insert(id, LandmarkKind::Line(LineLandmark::initialize(z, ctx)?));
                self.min_line_key = Some(self.min_line_key.map_or(id, |m| m.min(id)));
                Ok(None)
            }
            Some(LandmarkKind::Line(lm)) => {
                let likelihood = lm.likelihood(z, ctx)?;
                lm.update(z, ctx)?;
                Ok(Some(likelihood))
            }
            Some(other) => Err(SlamError::ShapeMismatch { expected: 2, got: state_dimension(other) }),
        }
    }

    /// Best (key, Mahalanobis-squared) pair among existing line landmarks,
    /// or `None` if no line landmark has been created yet.
    pub fn best_line_match(&self, z: &Vector2<f64>, ctx: &LineContext) -> Option<(i64, f64)> {
        self.line_keys()
            .filter_map(|key| {
                let LandmarkKind::Line(lm) = self.landmarks.get(&key)? else {
                    return None;
                };
                lm.mahalanobis_squared(z, ctx).ok().map(|d| (key, d))
            })
            .min_by(|a, b| a.1.total_cmp(&b.1))
    }

    /// Confirmed landmarks: those seen at least `min_seen_count` times.
    pub fn confirmed(&self, min_seen_count: u32) -> Vec<(i64, &LandmarkKind)> {
        self.landmarks
            .iter()
            .filter(|(_, lm)| seen_count(lm) >= min_seen_count)
            .map(|(&id, lm)| (id, lm))
            .collect()
    }
}

pub fn seen_count(kind: &LandmarkKind) -> u32 {
    match kind {
        LandmarkKind::Unoriented(lm) => lm.seen_count,
        LandmarkKind::Oriented(lm) => lm.seen_count,
        LandmarkKind::Line(lm) => lm.seen_count,
    }
}

/// State dimension of a stored landmark, used to report the actual kind found
/// when a caller's measurement shape doesn't match it.
fn state_dimension(kind: &LandmarkKind) -> usize {
    match kind {
        LandmarkKind::Unoriented(_) => 2,
        LandmarkKind::Oriented(_) => 3,
        LandmarkKind::Line(_) => 2,
    }
}
