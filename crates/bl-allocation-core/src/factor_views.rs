//! Top-down views: macro-factor shocks mapped onto asset returns through a
//! factor-exposure matrix B (n_assets x n_factors).
//!
//! Every asset receives one absolute view row (P = I), so the resulting
//! system is as large as the universe but each row reads directly as
//! "asset i moves by (B df)_i".

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::AllocationError;
use crate::linalg::{diagonal, diagonal_of, identity, is_square, mat_vec_multiply};
use crate::types::Matrix;
use crate::views::{validate_confidence, FactorView, ViewMatrices, CONFIDENCE_FLOOR};
use crate::AllocationResult;

/// Confidence given to assets no active factor loads on.
pub const DEFAULT_ASSET_CONFIDENCE: Decimal = dec!(0.5);

/// Below this total |exposure| an asset counts as unexposed.
const EXPOSURE_FLOOR: Decimal = dec!(0.0000000001);

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Named factor-exposure table. `loadings[i][j]` is the sensitivity of
/// `assets[i]` to `factors[j]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorExposures {
    pub assets: Vec<String>,
    pub factors: Vec<String>,
    pub loadings: Matrix,
}

impl FactorExposures {
    pub fn validate(&self) -> AllocationResult<()> {
        if self.loadings.len() != self.assets.len() {
            return Err(AllocationError::invalid(
                "factor_exposures.loadings",
                format!(
                    "{} assets but {} loading rows",
                    self.assets.len(),
                    self.loadings.len()
                ),
            ));
        }
        if let Some(i) = self
            .loadings
            .iter()
            .position(|row| row.len() != self.factors.len())
        {
            return Err(AllocationError::invalid(
                format!("factor_exposures.loadings[{}]", i),
                format!("Expected {} factor loadings", self.factors.len()),
            ));
        }
        Ok(())
    }

    pub fn factor_index(&self, factor: &str) -> AllocationResult<usize> {
        self.factors
            .iter()
            .position(|f| f == factor)
            .ok_or_else(|| AllocationError::unknown_label("factor", factor, &self.factors))
    }

    /// Rows for `assets` (by name, in that order) and columns for
    /// `factors` (by name, in that order).
    pub fn select(&self, assets: &[String], factors: &[String]) -> AllocationResult<FactorExposures> {
        self.validate()?;
        let cols = factors
            .iter()
            .map(|f| self.factor_index(f))
            .collect::<AllocationResult<Vec<usize>>>()?;
        let loadings = assets
            .iter()
            .map(|a| {
                let i = self
                    .assets
                    .iter()
                    .position(|b| b == a)
                    .ok_or_else(|| AllocationError::unknown_label("asset", a, &self.assets))?;
                Ok(cols.iter().map(|&j| self.loadings[i][j]).collect())
            })
            .collect::<AllocationResult<Matrix>>()?;
        Ok(FactorExposures {
            assets: assets.to_vec(),
            factors: factors.to_vec(),
            loadings,
        })
    }

    /// Multiply one factor's column of loadings by `scale`.
    pub fn scale_factor(&self, factor: &str, scale: Decimal) -> AllocationResult<FactorExposures> {
        let j = self.factor_index(factor)?;
        let mut out = self.clone();
        for row in out.loadings.iter_mut() {
            row[j] *= scale;
        }
        Ok(out)
    }
}

/// Factor views collapsed onto one shock and one confidence per factor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedShocks {
    pub delta_f: Vec<Decimal>,
    pub factor_confidence: Vec<Decimal>,
    /// Number of views that targeted each factor.
    pub view_counts: Vec<usize>,
}

impl AggregatedShocks {
    pub fn is_active(&self, factor: usize) -> bool {
        self.view_counts[factor] > 0
    }
}

/// What a set of factor views would do to asset returns, without a
/// posterior update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorImpact {
    pub delta_f: Vec<Decimal>,
    pub delta_mu: Vec<Decimal>,
    pub factor_confidence: Vec<Decimal>,
    pub asset_confidence: Vec<Decimal>,
}

#[derive(Debug, Clone)]
pub struct FactorViewTransformer {
    exposures: Matrix,
    tau: Decimal,
    variances: Vec<Decimal>,
    n_assets: usize,
    n_factors: usize,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

impl FactorViewTransformer {
    pub fn new(exposures: Matrix, tau: Decimal, cov: &[Vec<Decimal>]) -> AllocationResult<Self> {
        if tau <= Decimal::ZERO {
            return Err(AllocationError::invalid("tau", "Tau must be positive"));
        }
        let n_assets = exposures.len();
        if n_assets == 0 {
            return Err(AllocationError::EmptyInput(
                "Factor exposure matrix has no rows".into(),
            ));
        }
        let n_factors = exposures[0].len();
        if exposures.iter().any(|r| r.len() != n_factors) {
            return Err(AllocationError::invalid(
                "exposures",
                "Factor exposure rows have differing lengths",
            ));
        }
        if cov.len() != n_assets || !is_square(cov) {
            return Err(AllocationError::invalid(
                "covariance",
                format!(
                    "Covariance must be {0}x{0} to match the exposure matrix ({0}x{1})",
                    n_assets, n_factors
                ),
            ));
        }
        Ok(FactorViewTransformer {
            exposures,
            tau,
            variances: diagonal_of(cov),
            n_assets,
            n_factors,
        })
    }

    pub fn n_assets(&self) -> usize {
        self.n_assets
    }

    pub fn n_factors(&self) -> usize {
        self.n_factors
    }

    /// Sum shocks per factor; average confidences per factor. Factors
    /// without a view get shock 0 and confidence 0.
    pub fn aggregate_factor_shocks(&self, views: &[FactorView]) -> AllocationResult<AggregatedShocks> {
        let mut delta_f = vec![Decimal::ZERO; self.n_factors];
        let mut conf_sum = vec![Decimal::ZERO; self.n_factors];
        let mut view_counts = vec![0usize; self.n_factors];

        for (k, view) in views.iter().enumerate() {
            if view.factor_index >= self.n_factors {
                return Err(AllocationError::IndexOutOfRange {
                    field: format!("factor_views[{}].factor_index", k),
                    index: view.factor_index,
                    len: self.n_factors,
                });
            }
            validate_confidence(view.confidence, &format!("factor_views[{}].confidence", k))?;
            delta_f[view.factor_index] += view.shock;
            conf_sum[view.factor_index] += view.confidence;
            view_counts[view.factor_index] += 1;
        }

        let factor_confidence = conf_sum
            .iter()
            .zip(view_counts.iter())
            .map(|(s, &n)| {
                if n > 0 {
                    *s / Decimal::from(n as u64)
                } else {
                    Decimal::ZERO
                }
            })
            .collect();

        Ok(AggregatedShocks {
            delta_f,
            factor_confidence,
            view_counts,
        })
    }

    /// dmu = B df.
    pub fn compute_asset_return_shifts(&self, delta_f: &[Decimal]) -> Vec<Decimal> {
        mat_vec_multiply(&self.exposures, delta_f)
    }

    /// Per-asset confidence: |B|-weighted mean of the confidences of the
    /// factors that carry at least one view.
    pub fn asset_confidence(&self, shocks: &AggregatedShocks) -> Vec<Decimal> {
        self.exposures
            .iter()
            .map(|row| {
                let mut weight_sum = Decimal::ZERO;
                let mut weighted = Decimal::ZERO;
                for (j, b) in row.iter().enumerate() {
                    if !shocks.is_active(j) {
                        continue;
                    }
                    let w = b.abs();
                    weight_sum += w;
                    weighted += w * shocks.factor_confidence[j];
                }
                if weight_sum > EXPOSURE_FLOOR {
                    weighted / weight_sum
                } else {
                    DEFAULT_ASSET_CONFIDENCE
                }
            })
            .collect()
    }

    /// Diagonal Omega: tau * Sigma_ii / max(asset confidence, floor).
    pub fn build_omega_matrix(&self, shocks: &AggregatedShocks) -> Matrix {
        let diag: Vec<Decimal> = self
            .asset_confidence(shocks)
            .iter()
            .zip(self.variances.iter())
            .map(|(c, var)| self.tau * *var / (*c).max(CONFIDENCE_FLOOR))
            .collect();
        diagonal(&diag)
    }

    /// P = I, Q = B df, Omega as above.
    pub fn build_matrices(&self, views: &[FactorView]) -> AllocationResult<ViewMatrices> {
        if views.is_empty() {
            return Err(AllocationError::EmptyInput(
                "At least one factor view is required".into(),
            ));
        }
        let shocks = self.aggregate_factor_shocks(views)?;
        let delta_mu = self.compute_asset_return_shifts(&shocks.delta_f);
        let omega = self.build_omega_matrix(&shocks);
        debug!(
            n_views = views.len(),
            n_factors = self.n_factors,
            n_assets = self.n_assets,
            "factor views translated"
        );
        Ok(ViewMatrices {
            p: identity(self.n_assets),
            q: delta_mu,
            omega,
        })
    }

    /// Same as `build_matrices` but with Q = prior + B df, so the views
    /// state where returns land rather than how far they move. A zero shock
    /// then restates the prior and leaves the posterior unchanged.
    pub fn build_anchored_matrices(
        &self,
        views: &[FactorView],
        prior: &[Decimal],
    ) -> AllocationResult<ViewMatrices> {
        if prior.len() != self.n_assets {
            return Err(AllocationError::invalid(
                "prior_returns",
                format!("Expected {} prior returns, got {}", self.n_assets, prior.len()),
            ));
        }
        let mut vm = self.build_matrices(views)?;
        for (q, pi) in vm.q.iter_mut().zip(prior.iter()) {
            *q += *pi;
        }
        Ok(vm)
    }

    /// Loadings of one asset on every factor.
    pub fn factor_exposures(&self, asset_index: usize) -> AllocationResult<&[Decimal]> {
        self.exposures
            .get(asset_index)
            .map(|r| r.as_slice())
            .ok_or(AllocationError::IndexOutOfRange {
                field: "asset_index".into(),
                index: asset_index,
                len: self.n_assets,
            })
    }

    pub fn simulate_factor_impact(&self, views: &[FactorView]) -> AllocationResult<FactorImpact> {
        let shocks = self.aggregate_factor_shocks(views)?;
        let delta_mu = self.compute_asset_return_shifts(&shocks.delta_f);
        let asset_confidence = self.asset_confidence(&shocks);
        Ok(FactorImpact {
            delta_f: shocks.delta_f,
            delta_mu,
            factor_confidence: shocks.factor_confidence,
            asset_confidence,
        })
    }
}
