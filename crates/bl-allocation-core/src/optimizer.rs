//! Constrained mean-variance optimisation on Decimal weights.
//!
//! Every problem is solved by projected gradient steps onto the feasible
//! set `{sum(w) = 1, lo_i <= w_i <= hi_i}`, starting from equal weights.
//! Target-return and target-risk problems wrap that inner solver in an
//! augmented Lagrangian. Solver state lives only inside a single call.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::AllocationError;
use crate::linalg::{diagonal_of, is_square, mat_vec_multiply, quadratic_form, sqrt_decimal, vec_dot};
use crate::prior::CovarianceMatrix;
use crate::settings::{Objective, SolverSettings};
use crate::types::{AssetReturns, Matrix, PortfolioPerformance, PortfolioWeights};
use crate::AllocationResult;

/// Largest step the backtracking line search may grow to.
const STEP_CAP: Decimal = dec!(10000);
/// Below this step size the line search is considered stalled.
const STEP_FLOOR: Decimal = dec!(0.0000000000000001);
const DISPERSION_FLOOR: Decimal = dec!(0.00000000000000000001);
/// Penalty parameters never grow beyond this multiple of their start value.
const PENALTY_GROWTH_CAP: Decimal = dec!(1000000);

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Box constraints on each weight. `per_asset` overrides the uniform pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightBounds {
    pub lower: Decimal,
    pub upper: Decimal,
    #[serde(default)]
    pub per_asset: BTreeMap<String, (Decimal, Decimal)>,
}

impl Default for WeightBounds {
    fn default() -> Self {
        WeightBounds::long_only()
    }
}

impl WeightBounds {
    pub fn long_only() -> Self {
        WeightBounds::uniform(Decimal::ZERO, Decimal::ONE)
    }

    pub fn uniform(lower: Decimal, upper: Decimal) -> Self {
        WeightBounds {
            lower,
            upper,
            per_asset: BTreeMap::new(),
        }
    }

    pub fn with_asset(mut self, asset: &str, lower: Decimal, upper: Decimal) -> Self {
        self.per_asset.insert(asset.to_string(), (lower, upper));
        self
    }

    /// Per-asset (lo, hi) in `assets` order, checked for feasibility.
    pub fn resolve(&self, assets: &[String]) -> AllocationResult<Vec<(Decimal, Decimal)>> {
        for asset in self.per_asset.keys() {
            if !assets.contains(asset) {
                return Err(AllocationError::unknown_label("asset", asset, assets));
            }
        }
        let bounds: Vec<(Decimal, Decimal)> = assets
            .iter()
            .map(|a| {
                self.per_asset
                    .get(a)
                    .copied()
                    .unwrap_or((self.lower, self.upper))
            })
            .collect();

        for (asset, (lo, hi)) in assets.iter().zip(bounds.iter()) {
            if lo > hi {
                return Err(AllocationError::invalid(
                    format!("weight_bounds.{}", asset),
                    format!("Lower bound {} exceeds upper bound {}", lo, hi),
                ));
            }
        }
        let sum_lo: Decimal = bounds.iter().map(|b| b.0).sum();
        let sum_hi: Decimal = bounds.iter().map(|b| b.1).sum();
        if sum_lo > Decimal::ONE || sum_hi < Decimal::ONE {
            return Err(AllocationError::invalid(
                "weight_bounds",
                format!(
                    "No fully invested portfolio fits the bounds (sum of lower {}, sum of upper {})",
                    sum_lo, sum_hi
                ),
            ));
        }
        Ok(bounds)
    }
}

/// Mean-variance optimiser over a fixed universe. Holds the inputs and the
/// weights of the last successful optimisation.
#[derive(Debug, Clone)]
pub struct EfficientFrontier {
    assets: Vec<String>,
    mu: Vec<Decimal>,
    cov: Matrix,
    bounds: Vec<(Decimal, Decimal)>,
    risk_free_rate: Decimal,
    settings: SolverSettings,
    weights: Option<Vec<Decimal>>,
}

/// Counts projected-gradient steps across every inner solve of one call.
struct IterationBudget {
    used: u32,
    limit: u32,
}

impl IterationBudget {
    fn new(limit: u32) -> Self {
        IterationBudget { used: 0, limit }
    }

    fn tick(&mut self) -> bool {
        if self.used >= self.limit {
            return false;
        }
        self.used += 1;
        true
    }
}

struct InnerSolution {
    w: Vec<Decimal>,
    converged: bool,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

impl EfficientFrontier {
    pub fn new(
        expected_returns: &AssetReturns,
        cov: &CovarianceMatrix,
        bounds: &WeightBounds,
        risk_free_rate: Decimal,
        settings: SolverSettings,
    ) -> AllocationResult<Self> {
        let n = cov.n_assets();
        if n == 0 {
            return Err(AllocationError::EmptyInput("Empty asset universe".into()));
        }
        if expected_returns.assets != cov.assets || expected_returns.values.len() != n {
            return Err(AllocationError::invalid(
                "expected_returns",
                "Expected returns and covariance must cover the same assets in the same order",
            ));
        }
        if !is_square(&cov.values) || cov.values.len() != n {
            return Err(AllocationError::invalid(
                "covariance",
                format!("Expected a {0}x{0} matrix", n),
            ));
        }
        if diagonal_of(&cov.values).iter().any(|v| *v < Decimal::ZERO) {
            return Err(AllocationError::invalid(
                "covariance",
                "Variances must be non-negative",
            ));
        }
        settings.validate()?;
        let resolved = bounds.resolve(&cov.assets)?;
        Ok(EfficientFrontier {
            assets: cov.assets.clone(),
            mu: expected_returns.values.clone(),
            cov: cov.values.clone(),
            bounds: resolved,
            risk_free_rate,
            settings,
            weights: None,
        })
    }

    /// Dispatch on a configured objective.
    pub fn optimize(&mut self, objective: &Objective) -> AllocationResult<PortfolioWeights> {
        match objective {
            Objective::MaxSharpe => self.max_sharpe(),
            Objective::MinVolatility => self.min_volatility(),
            Objective::EfficientReturn { target_return } => self.efficient_return(*target_return),
            Objective::EfficientRisk { target_volatility } => {
                self.efficient_risk(*target_volatility)
            }
        }
    }

    /// Tangency portfolio.
    pub fn max_sharpe(&mut self) -> AllocationResult<PortfolioWeights> {
        let rf = self.risk_free_rate;
        if !self.mu.iter().any(|m| *m > rf) {
            return Err(AllocationError::invalid(
                "expected_returns",
                format!(
                    "At least one asset must have an expected return exceeding the risk-free rate ({})",
                    rf
                ),
            ));
        }

        let mu = &self.mu;
        let cov = &self.cov;
        let objective = |w: &[Decimal]| {
            let vol = sqrt_decimal(quadratic_form(cov, w));
            if vol.is_zero() {
                return Decimal::ZERO;
            }
            -(vec_dot(w, mu) - rf) / vol
        };
        let gradient = |w: &[Decimal]| {
            let sigma_w = mat_vec_multiply(cov, w);
            let var = vec_dot(w, &sigma_w);
            let vol = sqrt_decimal(var);
            if vol.is_zero() {
                return vec![Decimal::ZERO; w.len()];
            }
            let excess = vec_dot(w, mu) - rf;
            let vol_cubed = var * vol;
            mu.iter()
                .zip(sigma_w.iter())
                .map(|(m, sw)| -(*m / vol - excess * *sw / vol_cubed))
                .collect()
        };

        let mut budget = IterationBudget::new(self.settings.max_iterations);
        let inner = minimize(
            &objective,
            &gradient,
            equal_weights(self.assets.len()),
            &self.bounds,
            self.settings.tolerance,
            &mut budget,
        );
        if !inner.converged {
            return Err(self.failure(
                "max_sharpe",
                "Projected gradient did not converge",
                &budget,
                objective(&inner.w),
                budget_violation(&inner.w),
            ));
        }
        debug!(iterations = budget.used, "max_sharpe converged");
        Ok(self.store(inner.w))
    }

    /// Global minimum-variance portfolio.
    pub fn min_volatility(&mut self) -> AllocationResult<PortfolioWeights> {
        let mut budget = IterationBudget::new(self.settings.max_iterations);
        let w = self.solve_min_volatility(&mut budget)?;
        debug!(iterations = budget.used, "min_volatility converged");
        Ok(self.store(w))
    }

    /// Minimum variance subject to `w'mu = target_return`.
    pub fn efficient_return(&mut self, target_return: Decimal) -> AllocationResult<PortfolioWeights> {
        let ctol = self.settings.constraint_tolerance;
        let lowest = vec_dot(&extreme_return_weights(&self.mu, &self.bounds, false), &self.mu);
        let highest = vec_dot(&extreme_return_weights(&self.mu, &self.bounds, true), &self.mu);
        if target_return > highest + ctol || target_return < lowest - ctol {
            return Err(AllocationError::invalid(
                "target_return",
                format!(
                    "Target return {} is outside the attainable range [{}, {}]",
                    target_return, lowest, highest
                ),
            ));
        }

        let n = self.assets.len();
        let mean = self.mu.iter().copied().sum::<Decimal>() / Decimal::from(n as u64);
        let dispersion: Decimal = self.mu.iter().map(|m| (*m - mean) * (*m - mean)).sum();
        if dispersion < DISPERSION_FLOOR {
            // Every feasible portfolio earns the same return.
            return self.min_volatility();
        }

        let mu = self.mu.clone();
        let cov = self.cov.clone();
        let rho_start = dec!(10) * self.average_variance() / dispersion;
        let mut rho = rho_start;
        let mut lambda = Decimal::ZERO;
        let mut w = equal_weights(n);
        let mut last_violation: Option<Decimal> = None;
        let mut budget = IterationBudget::new(self.settings.max_iterations);

        for outer in 0..self.settings.max_outer_iterations {
            let (l, r) = (lambda, rho);
            let objective = |x: &[Decimal]| {
                let h = vec_dot(x, &mu) - target_return;
                quadratic_form(&cov, x) + l * h + r / dec!(2) * h * h
            };
            let gradient = |x: &[Decimal]| {
                let h = vec_dot(x, &mu) - target_return;
                let coef = l + r * h;
                mat_vec_multiply(&cov, x)
                    .iter()
                    .zip(mu.iter())
                    .map(|(sw, m)| dec!(2) * *sw + coef * *m)
                    .collect()
            };
            let inner = minimize(
                objective,
                gradient,
                w,
                &self.bounds,
                self.settings.tolerance,
                &mut budget,
            );
            w = inner.w;
            let h = vec_dot(&w, &mu) - target_return;
            debug!(outer, violation = %h, rho = %rho, "efficient_return outer step");

            if inner.converged && h.abs() <= ctol {
                return Ok(self.store(w));
            }
            if budget.used >= budget.limit {
                break;
            }
            lambda += rho * h;
            if last_violation.is_some_and(|prev| h.abs() > prev / dec!(4)) {
                rho = (rho * dec!(4)).min(rho_start * PENALTY_GROWTH_CAP);
            }
            last_violation = Some(h.abs());
        }

        let violation = (vec_dot(&w, &mu) - target_return).abs();
        Err(self.failure(
            "efficient_return",
            "Augmented Lagrangian did not reach the target return",
            &budget,
            quadratic_form(&cov, &w),
            violation,
        ))
    }

    /// Maximum return subject to `sqrt(w' Sigma w) = target_volatility`.
    ///
    /// A target above the volatility of the maximum-return portfolio leaves
    /// the risk constraint slack and that portfolio is returned. A target
    /// below the minimum attainable volatility is rejected.
    pub fn efficient_risk(&mut self, target_volatility: Decimal) -> AllocationResult<PortfolioWeights> {
        if target_volatility <= Decimal::ZERO {
            return Err(AllocationError::invalid(
                "target_volatility",
                "Target volatility must be positive",
            ));
        }
        let ctol = self.settings.constraint_tolerance;
        let mut budget = IterationBudget::new(self.settings.max_iterations);

        let min_w = self.solve_min_volatility(&mut budget)?;
        let min_vol = self.volatility(&min_w);
        if target_volatility < min_vol - ctol {
            return Err(AllocationError::invalid(
                "target_volatility",
                format!(
                    "Target volatility {} is below the minimum attainable volatility {}",
                    target_volatility, min_vol
                ),
            ));
        }
        if target_volatility <= min_vol {
            return Ok(self.store(min_w));
        }

        let max_w = extreme_return_weights(&self.mu, &self.bounds, true);
        if self.volatility(&max_w) <= target_volatility {
            debug!("efficient_risk target above maximum-return volatility");
            return Ok(self.store(max_w));
        }

        let mu = self.mu.clone();
        let cov = self.cov.clone();
        let target_var = target_volatility * target_volatility;
        let avg_var = self.average_variance();
        let rho_start = Decimal::ONE / (dec!(16) * avg_var * avg_var);
        let mut rho = rho_start;
        let mut lambda = Decimal::ZERO;
        let mut w = equal_weights(self.assets.len());
        let mut last_violation: Option<Decimal> = None;

        for outer in 0..self.settings.max_outer_iterations {
            let (l, r) = (lambda, rho);
            let objective = |x: &[Decimal]| {
                let g = quadratic_form(&cov, x) - target_var;
                let shifted = (l + r * g).max(Decimal::ZERO);
                -vec_dot(x, &mu) + (shifted * shifted - l * l) / (dec!(2) * r)
            };
            let gradient = |x: &[Decimal]| {
                let sigma_x = mat_vec_multiply(&cov, x);
                let g = vec_dot(x, &sigma_x) - target_var;
                let coef = (l + r * g).max(Decimal::ZERO);
                mu.iter()
                    .zip(sigma_x.iter())
                    .map(|(m, sx)| -*m + coef * dec!(2) * *sx)
                    .collect()
            };
            let inner = minimize(
                objective,
                gradient,
                w,
                &self.bounds,
                self.settings.tolerance,
                &mut budget,
            );
            w = inner.w;
            let g = quadratic_form(&cov, &w) - target_var;
            let violation = (self.volatility(&w) - target_volatility).abs();
            debug!(outer, violation = %violation, rho = %rho, "efficient_risk outer step");

            if inner.converged && violation <= ctol {
                return Ok(self.store(w));
            }
            if budget.used >= budget.limit {
                break;
            }
            lambda = (lambda + rho * g).max(Decimal::ZERO);
            if last_violation.is_some_and(|prev| violation > prev / dec!(4)) {
                rho = (rho * dec!(4)).min(rho_start * PENALTY_GROWTH_CAP);
            }
            last_violation = Some(violation);
        }

        let violation = (self.volatility(&w) - target_volatility).abs();
        Err(self.failure(
            "efficient_risk",
            "Augmented Lagrangian did not reach the target volatility",
            &budget,
            vec_dot(&w, &mu),
            violation,
        ))
    }

    /// Weights of the last optimisation, as produced by the solver.
    pub fn weights(&self) -> Option<PortfolioWeights> {
        self.weights
            .as_ref()
            .map(|w| PortfolioWeights::from_parts(&self.assets, w))
    }

    /// Zero weights with |w| < cutoff, round to `rounding` places and
    /// renormalise; repeated until no further weight drops below the cutoff.
    pub fn clean_weights(&self, cutoff: Decimal, rounding: u32) -> AllocationResult<PortfolioWeights> {
        let raw = self.weights.as_ref().ok_or_else(|| {
            AllocationError::invalid("weights", "No weights to clean; run an optimisation first")
        })?;
        Ok(PortfolioWeights::from_parts(
            &self.assets,
            &clean_weight_vector(raw, cutoff, rounding),
        ))
    }

    /// Expected return, volatility and Sharpe ratio of the last weights.
    pub fn portfolio_performance(&self) -> AllocationResult<PortfolioPerformance> {
        let w = self.weights.as_ref().ok_or_else(|| {
            AllocationError::invalid("weights", "No weights available; run an optimisation first")
        })?;
        Ok(performance_of(w, &self.mu, &self.cov, self.risk_free_rate))
    }

    fn solve_min_volatility(&self, budget: &mut IterationBudget) -> AllocationResult<Vec<Decimal>> {
        let cov = &self.cov;
        let inner = minimize(
            |w: &[Decimal]| quadratic_form(cov, w),
            |w: &[Decimal]| {
                mat_vec_multiply(cov, w)
                    .into_iter()
                    .map(|x| dec!(2) * x)
                    .collect()
            },
            equal_weights(self.assets.len()),
            &self.bounds,
            self.settings.tolerance,
            budget,
        );
        if !inner.converged {
            return Err(self.failure(
                "min_volatility",
                "Projected gradient did not converge",
                budget,
                quadratic_form(cov, &inner.w),
                budget_violation(&inner.w),
            ));
        }
        Ok(inner.w)
    }

    fn store(&mut self, w: Vec<Decimal>) -> PortfolioWeights {
        let out = PortfolioWeights::from_parts(&self.assets, &w);
        self.weights = Some(w);
        out
    }

    fn volatility(&self, w: &[Decimal]) -> Decimal {
        sqrt_decimal(quadratic_form(&self.cov, w))
    }

    fn average_variance(&self) -> Decimal {
        let n = Decimal::from(self.assets.len() as u64);
        let avg = diagonal_of(&self.cov).iter().copied().sum::<Decimal>() / n;
        avg.max(dec!(0.000000000001))
    }

    fn failure(
        &self,
        method: &str,
        reason: &str,
        budget: &IterationBudget,
        objective: Decimal,
        constraint_violation: Decimal,
    ) -> AllocationError {
        AllocationError::OptimizationFailure {
            method: method.to_string(),
            reason: reason.to_string(),
            iterations: budget.used,
            objective,
            constraint_violation,
        }
    }
}

/// Performance figures for an arbitrary weight vector.
pub fn performance_of(
    w: &[Decimal],
    mu: &[Decimal],
    cov: &[Vec<Decimal>],
    risk_free_rate: Decimal,
) -> PortfolioPerformance {
    let expected_return = vec_dot(w, mu);
    let volatility = sqrt_decimal(quadratic_form(cov, w));
    let sharpe_ratio = if volatility.is_zero() {
        Decimal::ZERO
    } else {
        (expected_return - risk_free_rate) / volatility
    };
    PortfolioPerformance {
        expected_return,
        volatility,
        sharpe_ratio,
    }
}

/// The cleaning rule behind `EfficientFrontier::clean_weights`.
pub fn clean_weight_vector(raw: &[Decimal], cutoff: Decimal, rounding: u32) -> Vec<Decimal> {
    let mut w = raw.to_vec();
    for _ in 0..=w.len() {
        let mut dropped = false;
        for wi in w.iter_mut() {
            if wi.is_zero() {
                continue;
            }
            if wi.abs() < cutoff {
                *wi = Decimal::ZERO;
                dropped = true;
            } else {
                *wi = wi.round_dp(rounding);
            }
        }
        let total: Decimal = w.iter().copied().sum();
        if total > Decimal::ZERO {
            for wi in w.iter_mut() {
                *wi /= total;
            }
        }
        let below = w.iter().any(|wi| !wi.is_zero() && wi.abs() < cutoff);
        if !dropped && !below {
            break;
        }
    }
    w
}

// ---------------------------------------------------------------------------
// Solver
// ---------------------------------------------------------------------------

/// Projected gradient descent with a backtracking line search on the
/// quadratic upper bound `f(w) + g'd + |d|^2 / (2 step)`. The step doubles
/// after each accepted move. Converged when no weight moves by more than
/// `tolerance` in one accepted step.
fn minimize<F, G>(
    objective: F,
    gradient: G,
    start: Vec<Decimal>,
    bounds: &[(Decimal, Decimal)],
    tolerance: Decimal,
    budget: &mut IterationBudget,
) -> InnerSolution
where
    F: Fn(&[Decimal]) -> Decimal,
    G: Fn(&[Decimal]) -> Vec<Decimal>,
{
    let mut w = project_onto_constraints(&start, bounds);
    let mut f = objective(&w);
    let mut step = Decimal::ONE;

    while budget.tick() {
        let g = gradient(&w);
        let (w_new, f_new, movement) = loop {
            let trial: Vec<Decimal> = w
                .iter()
                .zip(g.iter())
                .map(|(wi, gi)| *wi - step * *gi)
                .collect();
            let candidate = project_onto_constraints(&trial, bounds);
            let d: Vec<Decimal> = candidate
                .iter()
                .zip(w.iter())
                .map(|(a, b)| *a - *b)
                .collect();
            let f_candidate = objective(&candidate);
            let upper = f + vec_dot(&g, &d) + vec_dot(&d, &d) / (dec!(2) * step);
            let movement = d.iter().map(|x| x.abs()).max().unwrap_or(Decimal::ZERO);
            if f_candidate <= upper {
                break (candidate, f_candidate, movement);
            }
            step /= dec!(2);
            if step < STEP_FLOOR {
                return InnerSolution {
                    converged: movement <= tolerance,
                    w,
                };
            }
        };

        w = w_new;
        f = f_new;
        if movement <= tolerance {
            return InnerSolution { w, converged: true };
        }
        step = (step * dec!(2)).min(STEP_CAP);
    }

    InnerSolution {
        w,
        converged: false,
    }
}

/// Euclidean projection onto `{sum(w) = 1, lo <= w <= hi}`.
///
/// The projection is `clamp(v_i - t, lo_i, hi_i)` for the shift `t` at
/// which the clamped sum equals one. That sum is piecewise linear and
/// non-increasing in `t` with kinks at `v_i - lo_i` and `v_i - hi_i`, so `t`
/// is found exactly by locating the bracketing kinks and interpolating.
/// Bounds are assumed feasible.
fn project_onto_constraints(v: &[Decimal], bounds: &[(Decimal, Decimal)]) -> Vec<Decimal> {
    let clamped = |t: Decimal| -> Vec<Decimal> {
        v.iter()
            .zip(bounds.iter())
            .map(|(x, (lo, hi))| (*x - t).max(*lo).min(*hi))
            .collect()
    };
    let total = |t: Decimal| -> Decimal { clamped(t).iter().copied().sum() };

    let mut kinks: Vec<Decimal> = v
        .iter()
        .zip(bounds.iter())
        .flat_map(|(x, (lo, hi))| [*x - *lo, *x - *hi])
        .collect();
    kinks.sort();
    kinks.dedup();

    let mut shift = kinks.last().copied().unwrap_or(Decimal::ZERO);
    let mut prev = kinks.first().copied().unwrap_or(Decimal::ZERO);
    let mut prev_total = total(prev);
    for &kink in kinks.iter().skip(1) {
        let kink_total = total(kink);
        if prev_total >= Decimal::ONE && kink_total <= Decimal::ONE {
            shift = if prev_total == kink_total {
                prev
            } else {
                prev + (prev_total - Decimal::ONE) * (kink - prev) / (prev_total - kink_total)
            };
            break;
        }
        prev = kink;
        prev_total = kink_total;
    }

    let mut w = clamped(shift);

    // Rounding residue goes to the first coordinate that can absorb it.
    let residual = Decimal::ONE - w.iter().copied().sum::<Decimal>();
    if !residual.is_zero() {
        if let Some(i) = (0..w.len()).find(|&i| {
            let x = w[i] + residual;
            x >= bounds[i].0 && x <= bounds[i].1
        }) {
            w[i] += residual;
        }
    }
    w
}

/// Fully invested weights with the largest (or smallest) return: every
/// asset at its lower bound, then the remaining budget poured into assets
/// in order of return.
fn extreme_return_weights(
    mu: &[Decimal],
    bounds: &[(Decimal, Decimal)],
    maximize: bool,
) -> Vec<Decimal> {
    let mut w: Vec<Decimal> = bounds.iter().map(|b| b.0).collect();
    let mut remaining = Decimal::ONE - w.iter().copied().sum::<Decimal>();
    let mut order: Vec<usize> = (0..mu.len()).collect();
    order.sort_by(|&a, &b| if maximize { mu[b].cmp(&mu[a]) } else { mu[a].cmp(&mu[b]) });
    for i in order {
        if remaining <= Decimal::ZERO {
            break;
        }
        let add = (bounds[i].1 - bounds[i].0).min(remaining);
        w[i] += add;
        remaining -= add;
    }
    w
}

fn equal_weights(n: usize) -> Vec<Decimal> {
    let w = Decimal::ONE / Decimal::from(n as u64);
    vec![w; n]
}

fn budget_violation(w: &[Decimal]) -> Decimal {
    (w.iter().copied().sum::<Decimal>() - Decimal::ONE).abs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn names(xs: &[&str]) -> Vec<String> {
        xs.iter().map(|s| s.to_string()).collect()
    }

    fn three_asset_cov() -> CovarianceMatrix {
        CovarianceMatrix::new(
            names(&["A", "B", "C"]),
            vec![
                vec![dec!(0.04), dec!(0.006), dec!(0.002)],
                vec![dec!(0.006), dec!(0.09), dec!(0.01)],
                vec![dec!(0.002), dec!(0.01), dec!(0.0625)],
            ],
        )
        .unwrap()
    }

    fn three_asset_returns() -> AssetReturns {
        AssetReturns {
            assets: names(&["A", "B", "C"]),
            values: vec![dec!(0.06), dec!(0.12), dec!(0.09)],
        }
    }

    fn frontier(bounds: WeightBounds) -> EfficientFrontier {
        EfficientFrontier::new(
            &three_asset_returns(),
            &three_asset_cov(),
            &bounds,
            dec!(0.02),
            SolverSettings::default(),
        )
        .unwrap()
    }

    fn assert_fully_invested(w: &PortfolioWeights) {
        assert!(
            (w.total() - Decimal::ONE).abs() < dec!(0.000001),
            "weights sum to {}",
            w.total()
        );
    }

    fn assert_within(w: &PortfolioWeights, lo: Decimal, hi: Decimal) {
        for aw in &w.weights {
            assert!(
                aw.weight >= lo - dec!(0.000000001) && aw.weight <= hi + dec!(0.000000001),
                "{} = {} outside [{}, {}]",
                aw.asset,
                aw.weight,
                lo,
                hi
            );
        }
    }

    // -- 1. Projection --

    #[test]
    fn test_projection_onto_simplex() {
        let bounds = vec![(Decimal::ZERO, Decimal::ONE); 3];
        let w = project_onto_constraints(&[dec!(0.5), dec!(0.5), dec!(0.5)], &bounds);
        for wi in &w {
            assert!((*wi - dec!(0.3333333333)).abs() < dec!(0.0000001));
        }
        let w = project_onto_constraints(&[dec!(2), dec!(0), dec!(-1)], &bounds);
        assert_eq!(w, vec![dec!(1), dec!(0), dec!(0)]);
    }

    #[test]
    fn test_projection_respects_tight_upper_bound() {
        let bounds = vec![
            (Decimal::ZERO, dec!(0.2)),
            (Decimal::ZERO, Decimal::ONE),
            (Decimal::ZERO, Decimal::ONE),
        ];
        let w = project_onto_constraints(&[dec!(0.9), dec!(0.1), dec!(0.0)], &bounds);
        assert_eq!(w[0], dec!(0.2));
        assert_eq!(w.iter().copied().sum::<Decimal>(), Decimal::ONE);
        // remaining 0.8 split so both move by the same shift: 0.1 - t + 0 - t = 0.8
        assert_eq!(w[1], dec!(0.45));
        assert_eq!(w[2], dec!(0.35));
    }

    // -- 2. Min volatility --

    #[test]
    fn test_min_volatility_two_asset_closed_form() {
        // Uncorrelated: w_A = var_B / (var_A + var_B) = 0.09 / 0.13
        let cov = CovarianceMatrix::new(
            names(&["A", "B"]),
            vec![vec![dec!(0.04), dec!(0)], vec![dec!(0), dec!(0.09)]],
        )
        .unwrap();
        let mu = AssetReturns {
            assets: names(&["A", "B"]),
            values: vec![dec!(0.05), dec!(0.08)],
        };
        let mut ef = EfficientFrontier::new(
            &mu,
            &cov,
            &WeightBounds::long_only(),
            dec!(0.02),
            SolverSettings::default(),
        )
        .unwrap();
        let w = ef.min_volatility().unwrap();
        let expected = dec!(0.09) / dec!(0.13);
        assert!((w.get("A").unwrap() - expected).abs() < dec!(0.000001));
    }

    #[test]
    fn test_min_volatility_sums_to_one_within_bounds() {
        let mut ef = frontier(WeightBounds::long_only());
        let w = ef.min_volatility().unwrap();
        assert_fully_invested(&w);
        assert_within(&w, Decimal::ZERO, Decimal::ONE);
    }

    // -- 3. Max Sharpe --

    #[test]
    fn test_max_sharpe_beats_equal_weight_and_min_vol() {
        let mut ef = frontier(WeightBounds::long_only());
        let w = ef.max_sharpe().unwrap();
        assert_fully_invested(&w);
        assert_within(&w, Decimal::ZERO, Decimal::ONE);
        let best = ef.portfolio_performance().unwrap();

        let mu = three_asset_returns().values;
        let cov = three_asset_cov().values;
        let third = Decimal::ONE / dec!(3);
        let equal = performance_of(&[third, third, third], &mu, &cov, dec!(0.02));
        assert!(best.sharpe_ratio >= equal.sharpe_ratio);

        let mut ef2 = frontier(WeightBounds::long_only());
        ef2.min_volatility().unwrap();
        let mv = ef2.portfolio_performance().unwrap();
        assert!(best.sharpe_ratio >= mv.sharpe_ratio);
    }

    #[test]
    fn test_max_sharpe_respects_per_asset_cap() {
        let bounds = WeightBounds::long_only().with_asset("B", Decimal::ZERO, dec!(0.2));
        let mut ef = frontier(bounds);
        let w = ef.max_sharpe().unwrap();
        assert_fully_invested(&w);
        assert!(w.get("B").unwrap() <= dec!(0.2) + dec!(0.000000001));
    }

    #[test]
    fn test_max_sharpe_requires_return_above_rf() {
        let mu = AssetReturns {
            assets: names(&["A", "B", "C"]),
            values: vec![dec!(0.01), dec!(0.015), dec!(0.0)],
        };
        let mut ef = EfficientFrontier::new(
            &mu,
            &three_asset_cov(),
            &WeightBounds::long_only(),
            dec!(0.02),
            SolverSettings::default(),
        )
        .unwrap();
        assert!(matches!(
            ef.max_sharpe(),
            Err(AllocationError::InvalidInput { .. })
        ));
    }

    #[test]
    fn test_tiny_budget_reports_failure_diagnostics() {
        let settings = SolverSettings {
            max_iterations: 2,
            ..SolverSettings::default()
        };
        let mut ef = EfficientFrontier::new(
            &three_asset_returns(),
            &three_asset_cov(),
            &WeightBounds::long_only(),
            dec!(0.02),
            settings,
        )
        .unwrap();
        match ef.max_sharpe() {
            Err(AllocationError::OptimizationFailure {
                method, iterations, ..
            }) => {
                assert_eq!(method, "max_sharpe");
                assert_eq!(iterations, 2);
            }
            other => panic!("expected optimisation failure, got {:?}", other),
        }
    }

    // -- 4. Target return / target risk --

    #[test]
    fn test_efficient_return_hits_target() {
        let mut ef = frontier(WeightBounds::long_only());
        let w = ef.efficient_return(dec!(0.10)).unwrap();
        assert_fully_invested(&w);
        let perf = ef.portfolio_performance().unwrap();
        assert!((perf.expected_return - dec!(0.10)).abs() < dec!(0.000001));
    }

    #[test]
    fn test_efficient_return_unreachable_target() {
        let mut ef = frontier(WeightBounds::long_only());
        let err = ef.efficient_return(dec!(0.20)).unwrap_err();
        assert!(err.is_input_validation());
    }

    #[test]
    fn test_efficient_risk_hits_target() {
        let mut ef = frontier(WeightBounds::long_only());
        let w = ef.efficient_risk(dec!(0.2)).unwrap();
        assert_fully_invested(&w);
        let perf = ef.portfolio_performance().unwrap();
        assert!((perf.volatility - dec!(0.2)).abs() < dec!(0.000001));
    }

    #[test]
    fn test_efficient_risk_slack_target_returns_max_return() {
        let mut ef = frontier(WeightBounds::long_only());
        let w = ef.efficient_risk(dec!(0.5)).unwrap();
        assert_eq!(w.get("B"), Some(Decimal::ONE));
    }

    #[test]
    fn test_efficient_risk_below_minimum_rejected() {
        let mut ef = frontier(WeightBounds::long_only());
        assert!(ef.efficient_risk(dec!(0.05)).is_err());
    }

    // -- 5. Cleaning and bounds --

    #[test]
    fn test_clean_weights_removes_dust_and_renormalises() {
        let w = clean_weight_vector(
            &[dec!(0.59995), dec!(0.4), dec!(0.00005)],
            dec!(0.0001),
            5,
        );
        assert_eq!(w[2], Decimal::ZERO);
        let total: Decimal = w.iter().copied().sum();
        assert!((total - Decimal::ONE).abs() < dec!(0.000000001));
        assert!(w
            .iter()
            .all(|x| x.is_zero() || x.abs() >= dec!(0.0001)));
    }

    #[test]
    fn test_clean_weights_requires_optimisation() {
        let ef = frontier(WeightBounds::long_only());
        assert!(ef.clean_weights(dec!(0.0001), 5).is_err());
    }

    #[test]
    fn test_infeasible_bounds_rejected() {
        let bounds = WeightBounds::uniform(Decimal::ZERO, dec!(0.3));
        let result = EfficientFrontier::new(
            &three_asset_returns(),
            &three_asset_cov(),
            &bounds,
            dec!(0.02),
            SolverSettings::default(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_bounds_for_unknown_asset_rejected() {
        let bounds = WeightBounds::long_only().with_asset("Z", Decimal::ZERO, dec!(0.5));
        let err = bounds.resolve(&names(&["A", "B"])).unwrap_err();
        assert!(matches!(err, AllocationError::UnknownLabel { .. }));
    }
}
