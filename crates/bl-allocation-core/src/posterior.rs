//! Black-Litterman posterior: Bayesian combination of equilibrium returns
//! with a combined view system.
//!
//! ```text
//! precision = (tau Sigma)^-1 + P' Omega^-1 P
//! M         = precision^-1
//! mu_BL     = M [ (tau Sigma)^-1 pi + P' Omega^-1 Q ]
//! ```

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::AllocationError;
use crate::linalg::{
    condition_number, is_diagonal, is_square, is_symmetric, mat_add, mat_inverse, mat_multiply,
    mat_scale, mat_transpose, mat_vec_multiply, pseudo_inverse_symmetric, symmetrize,
};
use crate::prior::CovarianceMatrix;
use crate::settings::NumericalSettings;
use crate::types::{AssetReturns, Matrix};
use crate::views::ViewMatrices;
use crate::AllocationResult;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Posterior mean and covariance of expected returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Posterior {
    pub returns: Vec<Decimal>,
    pub covariance: Matrix,
    /// True if any inversion went through the pseudo-inverse path.
    pub used_pseudo_inverse: bool,
}

/// One posterior computation. Returns are solved on first request and
/// cached on the instance; `bl_cov` triggers the same solve if needed.
#[derive(Debug, Clone)]
pub struct BlackLittermanModel {
    assets: Vec<String>,
    cov: Matrix,
    pi: Vec<Decimal>,
    views: ViewMatrices,
    tau: Decimal,
    settings: NumericalSettings,
    posterior: Option<Posterior>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

impl BlackLittermanModel {
    pub fn new(
        cov: &CovarianceMatrix,
        prior: &AssetReturns,
        views: ViewMatrices,
        tau: Decimal,
        settings: NumericalSettings,
    ) -> AllocationResult<Self> {
        validate_inputs(cov, prior, &views, tau)?;
        Ok(BlackLittermanModel {
            assets: cov.assets.clone(),
            cov: cov.values.clone(),
            pi: prior.values.clone(),
            views,
            tau,
            settings,
            posterior: None,
        })
    }

    /// Posterior expected returns.
    pub fn bl_returns(&mut self) -> AllocationResult<AssetReturns> {
        let assets = self.assets.clone();
        let posterior = self.solve()?;
        Ok(AssetReturns {
            assets,
            values: posterior.returns.clone(),
        })
    }

    /// Posterior covariance of the mean estimate, M = precision^-1.
    pub fn bl_cov(&mut self) -> AllocationResult<CovarianceMatrix> {
        let assets = self.assets.clone();
        let posterior = self.solve()?;
        Ok(CovarianceMatrix {
            assets,
            values: posterior.covariance.clone(),
        })
    }

    pub fn posterior(&mut self) -> AllocationResult<&Posterior> {
        self.solve().map(|p| &*p)
    }

    fn solve(&mut self) -> AllocationResult<&mut Posterior> {
        let posterior = match self.posterior.take() {
            Some(p) => p,
            None => self.compute()?,
        };
        Ok(self.posterior.insert(posterior))
    }

    fn compute(&self) -> AllocationResult<Posterior> {
        let n = self.assets.len();
        let k = self.views.n_views();
        debug!(n_assets = n, n_views = k, tau = %self.tau, "solving posterior");

        let tau_cov = mat_scale(&self.cov, self.tau);
        let (tau_cov_inv, pinv_prior) = checked_inverse(&tau_cov, "tau_sigma", &self.settings)?;
        let (omega_inv, pinv_omega) = checked_inverse(&self.views.omega, "omega", &self.settings)?;

        let p_t = mat_transpose(&self.views.p);
        let pt_omega_inv = mat_multiply(&p_t, &omega_inv);
        let precision = symmetrize(&mat_add(
            &tau_cov_inv,
            &mat_multiply(&pt_omega_inv, &self.views.p),
        ));
        let (post_cov, pinv_post) = checked_inverse(&precision, "posterior_precision", &self.settings)?;
        let post_cov = symmetrize(&post_cov);

        let rhs: Vec<Decimal> = mat_vec_multiply(&tau_cov_inv, &self.pi)
            .iter()
            .zip(mat_vec_multiply(&pt_omega_inv, &self.views.q).iter())
            .map(|(a, b)| *a + *b)
            .collect();
        let returns = mat_vec_multiply(&post_cov, &rhs);

        Ok(Posterior {
            returns,
            covariance: post_cov,
            used_pseudo_inverse: pinv_prior || pinv_omega || pinv_post,
        })
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate_inputs(
    cov: &CovarianceMatrix,
    prior: &AssetReturns,
    views: &ViewMatrices,
    tau: Decimal,
) -> AllocationResult<()> {
    let n = cov.n_assets();
    if n == 0 {
        return Err(AllocationError::EmptyInput("Empty asset universe".into()));
    }
    if tau <= Decimal::ZERO {
        return Err(AllocationError::invalid("tau", "Tau must be positive"));
    }
    if !is_square(&cov.values) || cov.values.len() != n {
        return Err(AllocationError::invalid(
            "covariance",
            format!("Expected a {0}x{0} matrix", n),
        ));
    }
    if !is_symmetric(&cov.values, Decimal::new(1, 12)) {
        return Err(AllocationError::invalid(
            "covariance",
            "Covariance matrix must be symmetric",
        ));
    }
    if prior.assets != cov.assets {
        return Err(AllocationError::invalid(
            "prior_returns",
            "Prior returns and covariance must cover the same assets in the same order",
        ));
    }
    if prior.values.len() != n {
        return Err(AllocationError::invalid(
            "prior_returns",
            format!("Expected {} values, got {}", n, prior.values.len()),
        ));
    }
    let k = views.n_views();
    if k == 0 {
        return Err(AllocationError::EmptyInput(
            "Posterior requires at least one view; use the prior directly otherwise".into(),
        ));
    }
    if views.p.len() != k || views.p.iter().any(|row| row.len() != n) {
        return Err(AllocationError::invalid(
            "P",
            format!("Pick matrix must be {}x{}", k, n),
        ));
    }
    if views.omega.len() != k || !is_square(&views.omega) {
        return Err(AllocationError::invalid(
            "omega",
            format!("Uncertainty matrix must be {0}x{0}", k),
        ));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Conditioned inversion
// ---------------------------------------------------------------------------

/// Invert `a` if its 1-norm condition number is within the threshold.
/// Otherwise fail, or, when explicitly allowed, fall back to the symmetric
/// pseudo-inverse and log it. Returns the inverse and whether the fallback
/// was taken.
fn checked_inverse(
    a: &[Vec<Decimal>],
    context: &str,
    settings: &NumericalSettings,
) -> AllocationResult<(Matrix, bool)> {
    let attempt = if is_diagonal(a) {
        diagonal_inverse(a, context)
    } else {
        mat_inverse(a, context)
    };

    let failure = match attempt {
        Ok(inv) => {
            let cond = condition_number(a, &inv);
            if cond <= settings.condition_threshold {
                return Ok((inv, false));
            }
            AllocationError::NumericalInstability {
                context: context.to_string(),
                condition_number: Some(cond),
                threshold: settings.condition_threshold,
            }
        }
        Err(AllocationError::NumericalInstability { .. }) => {
            AllocationError::NumericalInstability {
                context: context.to_string(),
                condition_number: None,
                threshold: settings.condition_threshold,
            }
        }
        Err(e) => return Err(e),
    };

    if !settings.allow_pseudo_inverse {
        return Err(failure);
    }
    warn!(
        context,
        error = %failure,
        "ill-conditioned matrix, using pseudo-inverse fallback"
    );
    Ok((
        pseudo_inverse_symmetric(a, settings.pseudo_inverse_tolerance),
        true,
    ))
}

fn diagonal_inverse(a: &[Vec<Decimal>], context: &str) -> AllocationResult<Matrix> {
    let n = a.len();
    let mut inv = vec![vec![Decimal::ZERO; n]; n];
    for i in 0..n {
        if a[i][i].is_zero() {
            return Err(AllocationError::NumericalInstability {
                context: context.to_string(),
                condition_number: None,
                threshold: Decimal::ZERO,
            });
        }
        inv[i][i] = Decimal::ONE / a[i][i];
    }
    Ok(inv)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::{identity, is_positive_definite};
    use rust_decimal_macros::dec;
    use tracing_test::traced_test;

    fn names(xs: &[&str]) -> Vec<String> {
        xs.iter().map(|s| s.to_string()).collect()
    }

    fn cov3() -> CovarianceMatrix {
        CovarianceMatrix::new(
            names(&["A", "B", "C"]),
            vec![
                vec![dec!(0.04), dec!(0.012), dec!(0.006)],
                vec![dec!(0.012), dec!(0.09), dec!(0.018)],
                vec![dec!(0.006), dec!(0.018), dec!(0.0625)],
            ],
        )
        .unwrap()
    }

    fn prior3() -> AssetReturns {
        AssetReturns {
            assets: names(&["A", "B", "C"]),
            values: vec![dec!(0.05), dec!(0.08), dec!(0.07)],
        }
    }

    fn relative_view() -> ViewMatrices {
        ViewMatrices {
            p: vec![vec![dec!(1), dec!(-1), dec!(0)]],
            q: vec![dec!(0.05)],
            omega: vec![vec![dec!(0.004)]],
        }
    }

    // -- 1. Closed form on a single asset --

    #[test]
    fn test_single_asset_precision_weighted_mean() {
        // tau * sigma^2 = 0.05 * 0.04 = 0.002 = omega, so mu = (pi + q) / 2
        let cov = CovarianceMatrix::new(names(&["A"]), vec![vec![dec!(0.04)]]).unwrap();
        let prior = AssetReturns {
            assets: names(&["A"]),
            values: vec![dec!(0.06)],
        };
        let views = ViewMatrices {
            p: vec![vec![dec!(1)]],
            q: vec![dec!(0.10)],
            omega: vec![vec![dec!(0.002)]],
        };
        let mut bl =
            BlackLittermanModel::new(&cov, &prior, views, dec!(0.05), NumericalSettings::default())
                .unwrap();
        let mu = bl.bl_returns().unwrap();
        assert!((mu.values[0] - dec!(0.08)).abs() < dec!(0.0000000001));
        let m = bl.bl_cov().unwrap();
        assert!((m.values[0][0] - dec!(0.001)).abs() < dec!(0.0000000001));
    }

    // -- 2. Relative view tilts the pair --

    #[test]
    fn test_relative_view_moves_pair_apart() {
        let mut bl = BlackLittermanModel::new(
            &cov3(),
            &prior3(),
            relative_view(),
            dec!(0.05),
            NumericalSettings::default(),
        )
        .unwrap();
        let mu = bl.bl_returns().unwrap();
        let pi = prior3();
        // prior spread A - B = -0.03, view says +0.05
        assert!(mu.values[0] > pi.values[0]);
        assert!(mu.values[1] < pi.values[1]);
    }

    // -- 3. Posterior covariance is SPD --

    #[test]
    fn test_posterior_covariance_symmetric_positive_definite() {
        let views = ViewMatrices {
            p: vec![vec![dec!(1), dec!(-1), dec!(0)], vec![dec!(0), dec!(0), dec!(1)]],
            q: vec![dec!(0.05), dec!(0.02)],
            omega: vec![vec![dec!(0.004), dec!(0)], vec![dec!(0), dec!(0.01)]],
        };
        let mut bl =
            BlackLittermanModel::new(&cov3(), &prior3(), views, dec!(0.05), NumericalSettings::default())
                .unwrap();
        let m = bl.bl_cov().unwrap();
        assert!(is_symmetric(&m.values, Decimal::ZERO));
        assert!(is_positive_definite(&m.values));
    }

    // -- 4. Memoisation order --

    #[test]
    fn test_cov_before_returns_is_consistent() {
        let mut a = BlackLittermanModel::new(
            &cov3(),
            &prior3(),
            relative_view(),
            dec!(0.05),
            NumericalSettings::default(),
        )
        .unwrap();
        let mut b = a.clone();
        let cov_first = a.bl_cov().unwrap();
        let ret_after = a.bl_returns().unwrap();
        let ret_first = b.bl_returns().unwrap();
        let cov_after = b.bl_cov().unwrap();
        assert_eq!(cov_first, cov_after);
        assert_eq!(ret_first, ret_after);
    }

    // -- 5. Views that restate the prior leave it unchanged --

    #[test]
    fn test_views_equal_to_prior_leave_posterior_at_prior() {
        let views = ViewMatrices {
            p: identity(3),
            q: prior3().values,
            omega: vec![
                vec![dec!(0.004), dec!(0), dec!(0)],
                vec![dec!(0), dec!(0.009), dec!(0)],
                vec![dec!(0), dec!(0), dec!(0.00625)],
            ],
        };
        let mut bl =
            BlackLittermanModel::new(&cov3(), &prior3(), views, dec!(0.05), NumericalSettings::default())
                .unwrap();
        let mu = bl.bl_returns().unwrap();
        for (post, pi) in mu.values.iter().zip(prior3().values.iter()) {
            assert!((*post - *pi).abs() < dec!(0.000000001), "{} vs {}", post, pi);
        }
    }

    // -- 6. Ill-conditioning --

    fn ill_conditioned_cov() -> CovarianceMatrix {
        CovarianceMatrix::new(
            names(&["A", "B"]),
            vec![
                vec![dec!(0.04), dec!(0)],
                vec![dec!(0), dec!(0.000000000000004)],
            ],
        )
        .unwrap()
    }

    fn two_asset_inputs() -> (AssetReturns, ViewMatrices) {
        (
            AssetReturns {
                assets: names(&["A", "B"]),
                values: vec![dec!(0.05), dec!(0.01)],
            },
            ViewMatrices {
                p: vec![vec![dec!(1), dec!(0)]],
                q: vec![dec!(0.07)],
                omega: vec![vec![dec!(0.002)]],
            },
        )
    }

    #[test]
    fn test_ill_conditioned_sigma_is_rejected() {
        let (prior, views) = two_asset_inputs();
        let mut bl = BlackLittermanModel::new(
            &ill_conditioned_cov(),
            &prior,
            views,
            dec!(0.05),
            NumericalSettings::default(),
        )
        .unwrap();
        match bl.bl_returns() {
            Err(AllocationError::NumericalInstability {
                context,
                condition_number,
                ..
            }) => {
                assert_eq!(context, "tau_sigma");
                assert!(condition_number.unwrap() > dec!(1000000000000));
            }
            other => panic!("expected instability, got {:?}", other),
        }
    }

    #[test]
    fn test_singular_sigma_reports_infinite_condition() {
        let (prior, views) = two_asset_inputs();
        let cov = CovarianceMatrix::new(
            names(&["A", "B"]),
            vec![vec![dec!(0.04), dec!(0.04)], vec![dec!(0.04), dec!(0.04)]],
        )
        .unwrap();
        let mut bl =
            BlackLittermanModel::new(&cov, &prior, views, dec!(0.05), NumericalSettings::default())
                .unwrap();
        let err = bl.bl_returns().unwrap_err();
        assert!(err.to_string().contains("inf (singular)"));
    }

    #[test]
    #[traced_test]
    fn test_pseudo_inverse_fallback_is_opt_in_and_logged() {
        let (prior, _) = two_asset_inputs();
        let cov = CovarianceMatrix::new(
            names(&["A", "B"]),
            vec![vec![dec!(0.04), dec!(0.04)], vec![dec!(0.04), dec!(0.04)]],
        )
        .unwrap();
        let views = ViewMatrices {
            p: identity(2),
            q: vec![dec!(0.07), dec!(0.02)],
            omega: vec![vec![dec!(0.002), dec!(0)], vec![dec!(0), dec!(0.002)]],
        };
        let settings = NumericalSettings {
            allow_pseudo_inverse: true,
            ..NumericalSettings::default()
        };
        let mut bl = BlackLittermanModel::new(&cov, &prior, views, dec!(0.05), settings).unwrap();
        let posterior = bl.posterior().unwrap();
        assert!(posterior.used_pseudo_inverse);
        assert!(logs_contain("pseudo-inverse fallback"));
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let views = ViewMatrices {
            p: vec![vec![dec!(1), dec!(0)]],
            q: vec![dec!(0.05)],
            omega: vec![vec![dec!(0.004)]],
        };
        let result =
            BlackLittermanModel::new(&cov3(), &prior3(), views, dec!(0.05), NumericalSettings::default());
        assert!(result.is_err());
    }
}
