//! Run-time configuration for the allocation engine.
//!
//! Every component receives its settings explicitly; nothing here is global.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::AllocationError;
use crate::AllocationResult;

/// Controls for matrix inversion inside the posterior engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NumericalSettings {
    /// 1-norm condition number above which a matrix is rejected.
    pub condition_threshold: Decimal,
    /// Opt in to a Moore-Penrose pseudo-inverse for ill-conditioned
    /// symmetric matrices instead of failing. Logged at `warn` when used.
    pub allow_pseudo_inverse: bool,
    /// Eigenvalues at or below this magnitude are dropped by the pseudo-inverse.
    pub pseudo_inverse_tolerance: Decimal,
}

impl Default for NumericalSettings {
    fn default() -> Self {
        NumericalSettings {
            condition_threshold: dec!(1000000000000),
            allow_pseudo_inverse: false,
            pseudo_inverse_tolerance: dec!(0.000000000000000001),
        }
    }
}

/// Iteration budget and tolerances for the portfolio optimizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverSettings {
    /// Total projected-gradient steps allowed in a single optimization call.
    pub max_iterations: u32,
    /// Converged when no weight moves by more than this in one step.
    pub tolerance: Decimal,
    /// Augmented-Lagrangian rounds for the target-return/target-risk problems.
    pub max_outer_iterations: u32,
    /// Largest accepted violation of a target-return or target-risk constraint.
    pub constraint_tolerance: Decimal,
}

impl Default for SolverSettings {
    fn default() -> Self {
        SolverSettings {
            max_iterations: 20_000,
            tolerance: dec!(0.0000000001),
            max_outer_iterations: 40,
            constraint_tolerance: dec!(0.0000001),
        }
    }
}

impl SolverSettings {
    pub fn validate(&self) -> AllocationResult<()> {
        if self.max_iterations == 0 {
            return Err(AllocationError::invalid(
                "solver.max_iterations",
                "Iteration budget must be positive",
            ));
        }
        if self.tolerance <= Decimal::ZERO || self.constraint_tolerance <= Decimal::ZERO {
            return Err(AllocationError::invalid(
                "solver.tolerance",
                "Tolerances must be positive",
            ));
        }
        Ok(())
    }
}

/// Which mean-variance problem the optimizer solves.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Objective {
    /// Tangency portfolio: maximise (w'mu - rf) / sqrt(w' Sigma w).
    #[default]
    MaxSharpe,
    /// Global minimum-variance portfolio.
    MinVolatility,
    /// Minimum variance subject to w'mu = target_return.
    EfficientReturn { target_return: Decimal },
    /// Maximum return subject to sqrt(w' Sigma w) = target_volatility.
    EfficientRisk { target_volatility: Decimal },
}

/// Settings for one end-to-end allocation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocationSettings {
    /// Return periods per year used to annualise the sample covariance.
    pub frequency: u32,
    pub objective: Objective,
    /// Weights with magnitude below this are zeroed by `clean_weights`.
    pub clean_cutoff: Decimal,
    /// Decimal places kept by `clean_weights`.
    pub clean_rounding: u32,
    pub numerical: NumericalSettings,
    pub solver: SolverSettings,
}

impl Default for AllocationSettings {
    fn default() -> Self {
        AllocationSettings {
            frequency: 252,
            objective: Objective::MaxSharpe,
            clean_cutoff: dec!(0.0001),
            clean_rounding: 5,
            numerical: NumericalSettings::default(),
            solver: SolverSettings::default(),
        }
    }
}
