//! Generic Extended Kalman Filter.
//!
//! `Ekf<N, M>` holds a Gaussian belief `(mu, cov)` over an `N`-dimensional
//! latent state and knows nothing about what that state represents. The
//! nonlinear motion model `g` and measurement model `h` (and their
//! Jacobians) are supplied per call as closures rather than stored on the
//! struct: this is the "reify as an explicit per-call context" resolution
//! of the parameters-bundle design note — it lets a landmark's measurement
//! model close over the robot's current pose without the EKF (or the
//! landmark) needing to store that pose itself.

use crate::error::SlamError;
use nalgebra::SMatrix;
use nalgebra::SVector;

/// Numerical floor added to a near-singular innovation covariance before a
/// second inversion attempt.
const REGULARIZATION_EPS: f64 = 1e-9;

/// Default `diff` operator: plain componentwise subtraction. Landmark kinds
/// with an angular component supply their own `diff` that wraps that
/// component to `(-pi, pi]` instead.
pub fn subtract<const M: usize>(a: &SVector<f64, M>, b: &SVector<f64, M>) -> SVector<f64, M> {
    a - b
}

#[derive(Debug, Clone)]
pub struct Ekf<const N: usize, const M: usize> {
    pub mu: SVector<f64, N>,
    pub cov: SMatrix<f64, N, N>,
    /// Element-wise floor applied to `cov`'s diagonal after every update.
    pub cov_min: Option<SMatrix<f64, N, N>>,
}

impl<const N: usize, const M: usize> Ekf<N, M> {
    pub fn new(
        mu: SVector<f64, N>,
        cov: SMatrix<f64, N, N>,
        cov_min: Option<SMatrix<f64, N, N>>,
    ) -> Self {
        let mut ekf = Self { mu, cov, cov_min };
        ekf.clamp_covariance();
        ekf
    }

    fn clamp_covariance(&mut self) {
        if let Some(cov_min) = &self.cov_min {
            for i in 0..N {
                if self.cov[(i, i)] < cov_min[(i, i)] {
                    self.cov[(i, i)] = cov_min[(i, i)];
                }
            }
        }
    }

    /// `mu <- g(mu, u, 0)`, `cov <- Gx cov Gx^T + Gm Gm^T`.
    pub fn predict<U>(
        &mut self,
        u: &U,
        g: impl Fn(&SVector<f64, N>, &U, &SVector<f64, N>) -> SVector<f64, N>,
        jacobian_x: impl Fn(&SVector<f64, N>, &U) -> SMatrix<f64, N, N>,
        jacobian_m: impl Fn(&SVector<f64, N>, &U) -> SMatrix<f64, N, N>,
    ) {
        let zero_noise = SVector::<f64, N>::zeros();
        let gx = jacobian_x(&self.mu, u);
        let gm = jacobian_m(&self.mu, u);
        self.mu = g(&self.mu, u, &zero_noise);
        self.cov = gx * self.cov * gx.transpose() + gm * gm.transpose();
        self.clamp_covariance();
    }

    /// Computes `(innovation, innovation_covariance)` without mutating state.
    fn innovation<C>(
        &self,
        z: &SVector<f64, M>,
        h: impl Fn(&SVector<f64, N>, &C) -> SVector<f64, M>,
        jacobian_x: impl Fn(&SVector<f64, N>, &C) -> SMatrix<f64, M, N>,
        jacobian_n: impl Fn(&SVector<f64, N>, &C) -> SMatrix<f64, M, M>,
        diff: impl Fn(&SVector<f64, M>, &SVector<f64, M>) -> SVector<f64, M>,
        ctx: &C,
    ) -> (
        SVector<f64, M>,
        SMatrix<f64, M, M>,
        SMatrix<f64, M, N>,
    ) {
        let z_hat = h(&self.mu, ctx);
        let y = diff(z, &z_hat);
        let hx = jacobian_x(&self.mu, ctx);
        let hn = jacobian_n(&self.mu, ctx);
        let s = hx * self.cov * hx.transpose() + hn * hn.transpose();
        (y, s, hx)
    }

    fn invert_innovation(s: &SMatrix<f64, M, M>) -> Result<SMatrix<f64, M, M>, SlamError> {
        if let Some(inv) = s.try_inverse() {
            return Ok(inv);
        }
        let regularized = s + SMatrix::<f64, M, M>::identity() * REGULARIZATION_EPS;
        regularized.try_inverse().ok_or(SlamError::NumericalFailure)
    }

    /// `mu <- mu + K y`, `cov <- (I - K Hx) cov`, then clamps against `cov_min`.
    pub fn update<C>(
        &mut self,
        z: &SVector<f64, M>,
        h: impl Fn(&SVector<f64, N>, &C) -> SVector<f64, M>,
        jacobian_x: impl Fn(&SVector<f64, N>, &C) -> SMatrix<f64, M, N>,
        jacobian_n: impl Fn(&SVector<f64, N>, &C) -> SMatrix<f64, M, M>,
        diff: impl Fn(&SVector<f64, M>, &SVector<f64, M>) -> SVector<f64, M>,
        ctx: &C,
    ) -> Result<(), SlamError> {
        let (y, s, hx) = self.innovation(z, h, jacobian_x, jacobian_n, diff, ctx);
        let s_inv = Self::invert_innovation(&s)?;
        let k = self.cov * hx.transpose() * s_inv;
        self.mu += k * y;
        self.cov = (SMatrix::<f64, N, N>::identity() - k * hx) * self.cov;
        self.clamp_covariance();
        Ok(())
    }

    /// `y^T S^-1 y`, without mutating state.
    pub fn mahalanobis_squared<C>(
        &self,
        z: &SVector<f64, M>,
        h: impl Fn(&SVector<f64, N>, &C) -> SVector<f64, M>,
        jacobian_x: impl Fn(&SVector<f64, N>, &C) -> SMatrix<f64, M, N>,
        jacobian_n: impl Fn(&SVector<f64, N>, &C) -> SMatrix<f64, M, M>,
        diff: impl Fn(&SVector<f64, M>, &SVector<f64, M>) -> SVector<f64, M>,
        ctx: &C,
    ) -> Result<f64, SlamError> {
        let (y, s, _hx) = self.innovation(z, h, jacobian_x, jacobian_n, diff, ctx);
        let s_inv = Self::invert_innovation(&s)?;
        Ok((y.transpose() * s_inv * y)[(0, 0)])
    }

    /// Gaussian PDF of the innovation under `S`. When `normalize` is false,
    /// returns `exp(-0.5 * maha_sq)` without the `(2 pi)^(-k/2) |S|^(-1/2)`
    /// prefactor, which is all that matters when only relative likelihoods
    /// across particles are compared.
    pub fn likelihood<C>(
        &self,
        z: &SVector<f64, M>,
        h: impl Fn(&SVector<f64, N>, &C) -> SVector<f64, M>,
        jacobian_x: impl Fn(&SVector<f64, N>, &C) -> SMatrix<f64, M, N>,
        jacobian_n: impl Fn(&SVector<f64, N>, &C) -> SMatrix<f64, M, M>,
        diff: impl Fn(&SVector<f64, M>, &SVector<f64, M>) -> SVector<f64, M>,
        ctx: &C,
        normalize: bool,
    ) -> Result<f64, SlamError>
    where
        nalgebra::Const<M>: nalgebra::DimMin<nalgebra::Const<M>, Output = nalgebra::Const<M>>,
    {
        let (y, s, _hx) = self.innovation(z, h, jacobian_x, jacobian_n, diff, ctx);
        let s_inv = Self::invert_innovation(&s)?;
        let maha_sq = (y.transpose() * s_inv * y)[(0, 0)];
        let exponential = (-0.5 * maha_sq).exp();
        if !normalize {
            return Ok(exponential);
        }
        let det = s.determinant();
        if det <= 0.0 {
            return Err(SlamError::NumericalFailure);
        }
        let prefactor = 1.0 / ((2.0 * std::f64::consts::PI).powi(M as i32) * det).sqrt();
        Ok(prefactor * exponential)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::{Matrix2, Vector2};

    fn identity_h(x: &Vector2<f64>, _ctx: &()) -> Vector2<f64> {
        *x
    }
    fn identity_jx(_x: &Vector2<f64>, _ctx: &()) -> Matrix2<f64> {
        Matrix2::identity()
    }
    fn identity_jn(_x: &Vector2<f64>, _ctx: &()) -> Matrix2<f64> {
        Matrix2::identity()
    }

    #[test]
    fn identity_update_at_mean_leaves_mu_unchanged_and_shrinks_covariance() {
        let mu0 = Vector2::new(1.0, 2.0);
        let cov0 = Matrix2::identity() * 0.5;
        let mut ekf: Ekf<2, 2> = Ekf::new(mu0, cov0, None);

        ekf.update(&mu0, identity_h, identity_jx, identity_jn, subtract, &())
            .unwrap();

        assert_relative_eq!(ekf.mu, mu0, epsilon = 1e-10);
        for i in 0..2 {
            assert!(ekf.cov[(i, i)] < cov0[(i, i)]);
        }
    }

    #[test]
    fn repeated_updates_converge_covariance_toward_zero() {
        let mu0 = Vector2::new(0.0, 0.0);
        let cov0 = Matrix2::identity();
        let mut ekf: Ekf<2, 2> = Ekf::new(mu0, cov0, None);
        let z = Vector2::new(3.0, -1.0);

        let mut previous_trace = ekf.cov.trace();
        for _ in 0..20 {
            ekf.update(&z, identity_h, identity_jx, identity_jn, subtract, &())
                .unwrap();
            let trace = ekf.cov.trace();
            assert!(trace <= previous_trace + 1e-12);
            previous_trace = trace;
        }
        assert_relative_eq!(ekf.mu, z, epsilon = 1e-3);
    }

    #[test]
    fn cov_min_clamps_diagonal_but_not_off_diagonal() {
        let mu0 = Vector2::new(0.0, 0.0);
        let cov0 = Matrix2::identity();
        let cov_min = Matrix2::new(0.2, 0.0, 0.0, 0.2);
        let mut ekf: Ekf<2, 2> = Ekf::new(mu0, cov0, Some(cov_min));

        for _ in 0..50 {
            ekf.update(&mu0, identity_h, identity_jx, identity_jn, subtract, &())
                .unwrap();
        }
        assert!(ekf.cov[(0, 0)] >= 0.2 - 1e-9);
        assert!(ekf.cov[(1, 1)] >= 0.2 - 1e-9);
    }

    #[test]
    fn mahalanobis_zero_at_exact_prediction() {
        let mu0 = Vector2::new(1.0, 1.0);
        let cov0 = Matrix2::identity();
        let ekf: Ekf<2, 2> = Ekf::new(mu0, cov0, None);
        let d = ekf
            .mahalanobis_squared(&mu0, identity_h, identity_jx, identity_jn, subtract, &())
            .unwrap();
        assert_relative_eq!(d, 0.0, epsilon = 1e-10);
    }

    #[test]
    fn unnormalized_likelihood_is_bounded_by_one() {
        let mu0 = Vector2::new(0.0, 0.0);
        let cov0 = Matrix2::identity();
        let ekf: Ekf<2, 2> = Ekf::new(mu0, cov0, None);
        let l = ekf
            .likelihood(
                &Vector2::new(5.0, 5.0),
                identity_h,
                identity_jx,
                identity_jn,
                subtract,
                &(),
                false,
            )
            .unwrap();
        assert!(l > 0.0 && l <= 1.0);
    }

    #[test]
    fn predict_with_identity_motion_model_leaves_state_unchanged() {
        let mu0 = Vector2::new(1.0, -1.0);
        let cov0 = Matrix2::identity() * 0.1;
        let mut ekf: Ekf<2, 2> = Ekf::new(mu0, cov0, None);
        ekf.predict(
            &(),
            |x, _u, _m| *x,
            |_x, _u| Matrix2::identity(),
            |_x, _u| Matrix2::zeros(),
        );
        assert_relative_eq!(ekf.mu, mu0, epsilon = 1e-12);
        assert_relative_eq!(ekf.cov, cov0, epsilon = 1e-12);
    }

    #[test]
    fn predict_grows_covariance_with_process_noise() {
        let mu0 = Vector2::new(0.0, 0.0);
        let cov0 = Matrix2::zeros();
        let mut ekf: Ekf<2, 2> = Ekf::new(mu0, cov0, None);
        ekf.predict(
            &(),
            |x, _u, _m| *x,
            |_x, _u| Matrix2::identity(),
            |_x, _u| Matrix2::identity() * 0.3,
        );
        assert!(ekf.cov.trace() > 0.0);
    }

    #[test]
    fn normalized_likelihood_peaks_at_the_mean() {
        let mu0 = Vector2::new(0.0, 0.0);
        let cov0 = Matrix2::identity();
        let ekf: Ekf<2, 2> = Ekf::new(mu0, cov0, None);
        let at_mean = ekf
            .likelihood(&mu0, identity_h, identity_jx, identity_jn, subtract, &(), true)
            .unwrap();
        let away = ekf
            .likelihood(
                &Vector2::new(2.0, 2.0),
                identity_h,
                identity_jx,
                identity_jn,
                subtract,
                &(),
                true,
            )
            .unwrap();
        assert!(at_mean > away);
    }
}
