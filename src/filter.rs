//! The FastSLAM filter: owns the particle population, the shared RNG, and
//! configuration, and drives `perform_action`/`make_*_observation`/`resample`.
//!
//! The systematic-resampling draw is grounded on
//! `examples/other_examples/23dc9c2d_BazzaCipher-robotics-rs__src-localization-particle_filter.rs.rs`'s
//! `resampling_systematic`/`resample`, adapted to clone owned `Particle`
//! values (copy-on-write maps) rather than bare `nalgebra` vectors.

use crate::error::SlamError;
use crate::geometry::Pose;
use crate::particle::{OdometryDelta, Particle};
use nalgebra::{Matrix2, Matrix3, Vector2};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Tunable knobs for a `FastSlam` instance. `Serialize`/`Deserialize` so an
/// out-of-scope CLI/replay wrapper can load it from a config file (the exact
/// format is that wrapper's choice), following the shape of
/// `MariamCoder22-eos`'s `LocalizationConfig` and `antbern-slamrs`'s
/// `IcpParameters`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FastSlamConfig {
    pub particle_count: usize,
    /// Fixed std-dev (meters) of the Gaussian translation noise added to
    /// every `perform_action` call, independent of the delta's magnitude.
    pub distance_noise_std: f64,
    /// Fixed std-dev (radians) of the Gaussian rotation noise added to
    /// every `perform_action` call, independent of the delta's magnitude.
    pub rotation_noise_std: f64,
    /// Mahalanobis-squared gate for line-landmark data association.
    pub line_association_threshold_sq: f64,
    /// Resample after this many observation batches (camera or lidar scans).
    pub resample_every_n_observations: u32,
    /// Effective-sample-size fraction of `particle_count` below which a
    /// resample additionally triggers regardless of cadence.
    pub neff_resample_fraction: f64,
    pub rng_seed: u64,
}

impl Default for FastSlamConfig {
    fn default() -> Self {
        Self {
            particle_count: 100,
            distance_noise_std: 0.05,
            rotation_noise_std: 0.05,
            line_association_threshold_sq: 9.0,
            resample_every_n_observations: 10,
            neff_resample_fraction: 0.5,
            rng_seed: 0,
        }
    }
}

pub struct FastSlam {
    config: FastSlamConfig,
    particles: Vec<Particle>,
    rng: StdRng,
    observations_since_resample: u32,
    last_timestamp_ns: Option<u64>,
}

impl FastSlam {
    pub fn new(config: FastSlamConfig, initial_pose: Pose) -> Self {
        let rng = StdRng::seed_from_u64(config.rng_seed);
        let uniform_weight = 1.0 / config.particle_count as f64;
        let particles = (0..config.particle_count)
            .map(|_| {
                let mut particle = Particle::new(initial_pose);
                particle.weight = uniform_weight;
                particle
            })
            .collect();
        info!(count = config.particle_count, "FastSLAM filter constructed");
        Self { config, particles, rng, observations_since_resample: 0, last_timestamp_ns: None }
    }

    /// Enforces the monotonic-timestamp ordering guarantee: sensor events
    /// must be fed to this filter in non-decreasing timestamp order
    /// (odometry before lidar before camera within a tied timestamp). The
    /// driver that demultiplexes a raw sensor stream is expected to call
    /// this once per event before dispatching to `perform_action`/
    /// `observe_*`.
    pub fn advance_to(&mut self, timestamp_ns: u64) -> Result<(), SlamError> {
        if let Some(previous_ns) = self.last_timestamp_ns {
            if timestamp_ns < previous_ns {
                return Err(SlamError::OrderViolation { timestamp_ns, previous_ns });
            }
        }
        self.last_timestamp_ns = Some(timestamp_ns);
        Ok(())
    }

    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }

    /// Advances every particle's pose by a noisy draw of `delta`, sampling
    /// independent Gaussian perturbations per particle from the shared RNG.
    /// Noise std-devs are the fixed, configured process noise (spec.md
    /// §4.5's "diagonal 2-vector of std-devs for translation and rotation"),
    /// not a function of `delta`'s magnitude.
    pub fn perform_action(&mut self, delta: &OdometryDelta) {
        let distance_noise_dist = Normal::new(0.0, self.config.distance_noise_std)
            .expect("normal distribution parameters must be finite");
        let rotation_noise_dist = Normal::new(0.0, self.config.rotation_noise_std)
            .expect("normal distribution parameters must be finite");
        for particle in &mut self.particles {
            let distance_noise = distance_noise_dist.sample(&mut self.rng);
            let rotation_noise = rotation_noise_dist.sample(&mut self.rng);
            particle.apply_action(delta, distance_noise, rotation_noise);
        }
    }

    pub fn observe_unoriented(&mut self, external_id: i64, range: f64, bearing: f64, noise_gain: Matrix2<f64>) {
        for particle in &mut self.particles {
            if let Err(err) = particle.make_unoriented_observation(external_id, range, bearing, noise_gain) {
                warn!(?err, external_id, "skipping unoriented observation update");
            }
        }
        self.after_observation_batch();
    }

    pub fn observe_oriented(
        &mut self,
        external_id: i64,
        range: f64,
        bearing: f64,
        orientation: f64,
        noise_gain: Matrix3<f64>,
    ) {
        for particle in &mut self.particles {
            if let Err(err) =
                particle.make_oriented_observation(external_id, range, bearing, orientation, noise_gain)
            {
                warn!(?err, external_id, "skipping oriented observation update");
            }
        }
        self.after_observation_batch();
    }

    pub fn observe_line(&mut self, z: &Vector2<f64>, noise_gain: Matrix2<f64>) {
        let tau_sq = self.config.line_association_threshold_sq;
        for particle in &mut self.particles {
            match particle.make_line_observation(z, noise_gain, tau_sq) {
                Ok(id) => debug!(id, "line observation associated"),
                Err(err) => warn!(?err, "skipping line observation update"),
            }
        }
        self.after_observation_batch();
    }

    fn after_observation_batch(&mut self) {
        self.observations_since_resample += 1;
        let neff = self.effective_sample_size();
        let neff_trigger = neff < self.config.neff_resample_fraction * self.particles.len() as f64;
        let cadence_trigger =
            self.observations_since_resample >= self.config.resample_every_n_observations;
        if cadence_trigger || neff_trigger {
            self.resample();
        }
    }

    fn total_weight(&self) -> f64 {
        self.particles.iter().map(|p| p.weight).sum()
    }

    /// `1 / sum(normalized_weight^2)`, a standard measure of weight
    /// degeneracy; `particle_count` at perfect uniformity, `1.0` when a
    /// single particle holds all the weight.
    pub fn effective_sample_size(&self) -> f64 {
        let total = self.total_weight();
        if total <= 0.0 {
            return self.particles.len() as f64;
        }
        let sum_sq: f64 = self.particles.iter().map(|p| (p.weight / total).powi(2)).sum();
        if sum_sq <= 0.0 {
            self.particles.len() as f64
        } else {
            1.0 / sum_sq
        }
    }

    /// Systematic (low-variance) resampling. If the total weight has
    /// collapsed to zero or non-finite (every particle's likelihood
    /// underflowed or overflowed), resets to a uniform population instead of
    /// dividing by zero — a recoverable condition, not an error, per the
    /// weight-degeneracy policy. Survivors' weights are reset to `1/N`.
    pub fn resample(&mut self) {
        self.observations_since_resample = 0;
        let n = self.particles.len();
        let uniform_weight = 1.0 / n as f64;
        let total = self.total_weight();
        if total <= 0.0 || !total.is_finite() {
            warn!("particle weights degenerated; resetting to uniform");
            for particle in &mut self.particles {
                particle.weight = uniform_weight;
            }
            return;
        }

        let draw: f64 = rand::Rng::random(&mut self.rng);
        let step = total / n as f64;
        let mut cumulative = self.particles[0].weight;
        let mut index = 0;
        let mut survivors = Vec::with_capacity(n);
        for i in 0..n {
            let target = (i as f64 + draw) * step;
            while cumulative < target && index < n - 1 {
                index += 1;
                cumulative += self.particles[index].weight;
            }
            survivors.push(self.particles[index].copy());
        }
        for particle in &mut survivors {
            particle.weight = uniform_weight;
        }
        info!(neff = self.effective_sample_size(), "resampled particle population");
        self.particles = survivors;
    }

    /// The particle with the highest weight (ties broken by lowest index),
    /// and the set of landmarks seen at least `min_seen_count` times by that
    /// particle.
    pub fn report(&self, min_seen_count: u32) -> crate::sensor_data::FilterOutput {
        let best = self
            .particles
            .iter()
            .enumerate()
            .max_by(|(ia, a), (ib, b)| {
                a.weight.total_cmp(&b.weight).then_with(|| ib.cmp(ia))
            })
            .map(|(_, particle)| particle)
            .expect("particle population is never empty");

        let landmarks = best
            .map
            .confirmed(min_seen_count)
            .into_iter()
            .map(|(id, kind)| crate::sensor_data::ConfirmedLandmark::from_landmark(id, kind))
            .collect();

        crate::sensor_data::FilterOutput {
            best_pose: best.pose,
            particles: self.particles.iter().map(|p| (p.pose, p.weight)).collect(),
            landmarks,
        }
    }
}

/// Corrected odometry delta: the successive difference between two
/// consecutive raw pose readings, expressed as forward distance and
/// in-place rotation. Unlike the original implementation's `pose[-k]`
/// indexing bug (see design notes), this always compares a reading against
/// its immediate predecessor.
pub fn odometry_delta(previous: &Pose, current: &Pose) -> Result<OdometryDelta, SlamError> {
    let dx = current.x - previous.x;
    let dy = current.y - previous.y;
    let distance = (dx * dx + dy * dy).sqrt();
    let rotation = crate::geometry::wrap_angle(current.theta - previous.theta);
    Ok(OdometryDelta { distance, rotation })
}
