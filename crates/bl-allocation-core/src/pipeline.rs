//! End-to-end allocation: prior, views, posterior, optimisation and weight
//! cleaning for one recipe, plus scenario application for stress runs.

use std::collections::BTreeMap;
use std::time::Instant;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::combiner::{combine_views, CombinedViews};
use crate::error::AllocationError;
use crate::factor_views::{FactorExposures, FactorViewTransformer};
use crate::optimizer::{performance_of, EfficientFrontier};
use crate::posterior::BlackLittermanModel;
use crate::prior::{market_implied_prior_returns, sample_cov, CovarianceMatrix, PriceSeries};
use crate::recipe::Recipe;
use crate::settings::AllocationSettings;
use crate::types::{with_metadata, AssetReturns, ComputationOutput, PortfolioPerformance, PortfolioWeights};
use crate::views::translate_views;
use crate::AllocationResult;

#[cfg(feature = "stress")]
use crate::stress::{Scenario, ScenarioParameters, StressType};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Market inputs supplied by the caller. Tables may cover more assets (and
/// factors) than the recipe uses; the universe is selected by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketData {
    pub prices: PriceSeries,
    pub market_caps: BTreeMap<String, Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub factor_exposures: Option<FactorExposures>,
}

/// Everything one allocation run needs, restricted to the recipe universe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationProblem {
    pub recipe: Recipe,
    pub covariance: CovarianceMatrix,
    pub market_caps: BTreeMap<String, Decimal>,
    /// Rows follow the universe, columns follow `factor_model.factors`.
    pub factor_exposures: Option<FactorExposures>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationOutput {
    pub weights: PortfolioWeights,
    pub prior_returns: AssetReturns,
    pub posterior_returns: AssetReturns,
    /// Absent when no views were given and the prior was used directly.
    pub posterior_covariance: Option<CovarianceMatrix>,
    pub performance: PortfolioPerformance,
    pub n_bottom_up_views: usize,
    pub n_top_down_views: usize,
    pub used_prior_fallback: bool,
}

/// Result of one scenario in a stress run: the allocation, or why it failed.
#[cfg(feature = "stress")]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioOutcome {
    pub scenario_id: String,
    pub stress_type: StressType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allocation: Option<AllocationOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(feature = "stress")]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StressTestOutput {
    pub outcomes: Vec<ScenarioOutcome>,
    pub n_succeeded: usize,
    pub n_failed: usize,
}

// ---------------------------------------------------------------------------
// Problem construction
// ---------------------------------------------------------------------------

impl AllocationProblem {
    /// Validate the recipe, estimate the annualised covariance over the
    /// universe and pick out the matching caps and exposure rows.
    pub fn from_recipe(
        recipe: Recipe,
        data: &MarketData,
        frequency: u32,
    ) -> AllocationResult<AllocationProblem> {
        recipe.validate()?;
        let assets = recipe.assets().to_vec();

        let prices = data.prices.select(&assets)?;
        let covariance = sample_cov(&prices, frequency)?;

        let mut market_caps = BTreeMap::new();
        for asset in &assets {
            let cap = data.market_caps.get(asset).ok_or_else(|| {
                AllocationError::invalid(
                    format!("market_caps.{}", asset),
                    "No market capitalisation for universe asset",
                )
            })?;
            market_caps.insert(asset.clone(), *cap);
        }

        let factors = recipe.factor_names();
        let has_shocks = recipe
            .top_down_views
            .as_ref()
            .is_some_and(|t| !t.factor_shocks.is_empty());
        let factor_exposures = match &data.factor_exposures {
            Some(fe) if !factors.is_empty() => Some(fe.select(&assets, &factors)?),
            None if has_shocks => {
                return Err(AllocationError::invalid(
                    "factor_exposures",
                    "Recipe has factor shocks but no factor-exposure table was supplied",
                ))
            }
            _ => None,
        };

        Ok(AllocationProblem {
            recipe,
            covariance,
            market_caps,
            factor_exposures,
        })
    }
}

// ---------------------------------------------------------------------------
// Allocation
// ---------------------------------------------------------------------------

/// Run prior, view translation, posterior and optimisation for one problem.
///
/// A recipe without views is optimised on the market-implied prior; that
/// fallback is flagged in the output and the warnings.
pub fn allocate(
    problem: &AllocationProblem,
    settings: &AllocationSettings,
) -> AllocationResult<ComputationOutput<AllocationOutput>> {
    let start = Instant::now();
    let mut warnings: Vec<String> = Vec::new();
    let recipe = &problem.recipe;
    let cov = &problem.covariance;
    info!(
        recipe = %recipe.meta.name,
        n_assets = cov.n_assets(),
        n_views = recipe.n_views(),
        "allocation run started"
    );

    let prior = market_implied_prior_returns(&problem.market_caps, cov, recipe.risk_aversion())?;

    let bottom_up = recipe.bottom_up();
    let factor_views = recipe.factor_views()?;

    let bottom_up_matrices = if bottom_up.is_empty() {
        None
    } else {
        Some(translate_views(&bottom_up, cov, recipe.tau()?)?)
    };
    let top_down_matrices = if factor_views.is_empty() {
        None
    } else {
        let exposures = problem.factor_exposures.as_ref().ok_or_else(|| {
            AllocationError::invalid(
                "factor_exposures",
                "Factor shocks need a factor-exposure table",
            )
        })?;
        let transformer =
            FactorViewTransformer::new(exposures.loadings.clone(), recipe.tau()?, &cov.values)?;
        Some(transformer.build_anchored_matrices(&factor_views, &prior.values)?)
    };

    let (posterior_returns, posterior_covariance, used_prior_fallback) =
        match combine_views(bottom_up_matrices.as_ref(), top_down_matrices.as_ref())? {
            CombinedViews::PriorOnly => {
                warn!("recipe has no views, optimising on the market-implied prior");
                warnings.push("No views supplied; optimised on the market-implied prior".into());
                (prior.clone(), None, true)
            }
            CombinedViews::Views(matrices) => {
                debug!(n_views = matrices.n_views(), "combined view system");
                let mut model = BlackLittermanModel::new(
                    cov,
                    &prior,
                    matrices,
                    recipe.tau()?,
                    settings.numerical.clone(),
                )?;
                let returns = model.bl_returns()?;
                let covariance = model.bl_cov()?;
                if model.posterior()?.used_pseudo_inverse {
                    warnings.push(
                        "Ill-conditioned matrix inverted with the pseudo-inverse fallback".into(),
                    );
                }
                (returns, Some(covariance), false)
            }
        };

    let mut frontier = EfficientFrontier::new(
        &posterior_returns,
        cov,
        &recipe.weight_bounds(),
        recipe.risk_free_rate(),
        settings.solver.clone(),
    )?;
    frontier.optimize(&settings.objective)?;
    let weights = frontier.clean_weights(settings.clean_cutoff, settings.clean_rounding)?;
    let performance = performance_of(
        &weights.values(),
        &posterior_returns.values,
        &cov.values,
        recipe.risk_free_rate(),
    );

    let output = AllocationOutput {
        weights,
        prior_returns: prior,
        posterior_returns,
        posterior_covariance,
        performance,
        n_bottom_up_views: bottom_up.len(),
        n_top_down_views: factor_views.len(),
        used_prior_fallback,
    };

    let elapsed = start.elapsed().as_micros() as u64;
    info!(elapsed_us = elapsed, "allocation run finished");
    Ok(with_metadata(
        "Black-Litterman posterior with constrained mean-variance optimisation",
        &serde_json::json!({
            "tau": recipe.model_parameters.tau.map(|t| t.to_string()),
            "risk_aversion": recipe.risk_aversion().to_string(),
            "risk_free_rate": recipe.risk_free_rate().to_string(),
            "frequency": settings.frequency,
            "objective": settings.objective,
            "omega": "tau * diag(P Sigma P') / confidence",
            "optimiser_covariance": "sample",
        }),
        warnings,
        elapsed,
        output,
    ))
}

/// Build the problem from raw inputs and allocate.
pub fn run_recipe(
    recipe: Recipe,
    data: &MarketData,
    settings: &AllocationSettings,
) -> AllocationResult<ComputationOutput<AllocationOutput>> {
    let problem = AllocationProblem::from_recipe(recipe, data, settings.frequency)?;
    allocate(&problem, settings)
}

// ---------------------------------------------------------------------------
// Stress runs
// ---------------------------------------------------------------------------

#[cfg(feature = "stress")]
fn replace_view(
    recipe: &mut Recipe,
    label: &str,
    magnitude: Decimal,
    confidence: Option<Decimal>,
) -> AllocationResult<()> {
    let (index, _) = recipe.find_view(label)?;
    let entry = &mut recipe.bottom_up_views[index];
    let mut view = entry.view.with_magnitude(magnitude);
    if let Some(c) = confidence {
        view = view.with_confidence(c);
    }
    entry.view = view;
    Ok(())
}

/// The problem with one scenario's perturbation applied. The input is
/// left untouched.
#[cfg(feature = "stress")]
pub fn apply_scenario(
    problem: &AllocationProblem,
    scenario: &Scenario,
) -> AllocationResult<AllocationProblem> {
    let mut out = problem.clone();
    match &scenario.parameters {
        ScenarioParameters::ViewMagnitude {
            target_label,
            new_value,
            ..
        } => replace_view(&mut out.recipe, target_label, *new_value, None)?,
        ScenarioParameters::ConfidenceScale { scale_factor, .. } => {
            out.recipe.scale_confidences(*scale_factor)
        }
        ScenarioParameters::FactorAmplification {
            factor,
            scale_factor,
            ..
        } => {
            let exposures = out.factor_exposures.as_ref().ok_or_else(|| {
                AllocationError::invalid(
                    "factor_exposures",
                    "Factor amplification needs a factor-exposure table",
                )
            })?;
            let scaled = exposures.scale_factor(factor, *scale_factor)?;
            out.factor_exposures = Some(scaled);
        }
        ScenarioParameters::TauShift { new_tau, .. } => {
            out.recipe.model_parameters.tau = Some(*new_tau)
        }
        ScenarioParameters::VolatilityMultiplier {
            volatility_multiplier,
            ..
        } => out.covariance = out.covariance.scaled(*volatility_multiplier),
        ScenarioParameters::RegimeTemplate { preset, .. } => {
            let tau = out.recipe.tau()?;
            out.recipe.model_parameters.tau = Some(tau * preset.tau_multiplier);
            out.recipe.scale_confidences(preset.confidence_scale);
            out.covariance = out.covariance.scaled(preset.volatility_multiplier);
            let risk_aversion = out.recipe.risk_aversion() + preset.risk_aversion_shift;
            if risk_aversion <= Decimal::ZERO {
                return Err(AllocationError::invalid(
                    "risk_aversion_shift",
                    format!("Shifted risk aversion {} must stay positive", risk_aversion),
                ));
            }
            out.recipe.model_parameters.risk_aversion = Some(risk_aversion);
        }
        ScenarioParameters::ViewJoint {
            target_label,
            new_magnitude,
            new_confidence,
            ..
        } => replace_view(
            &mut out.recipe,
            target_label,
            *new_magnitude,
            Some(*new_confidence),
        )?,
    }
    out.recipe.validate()?;
    debug!(scenario_id = %scenario.scenario_id, "scenario applied");
    Ok(out)
}

/// Allocate once per scenario, in scenario order. A failing scenario is
/// recorded in its outcome and does not stop the run.
#[cfg(feature = "stress")]
pub fn run_stress_test(
    problem: &AllocationProblem,
    scenarios: &[Scenario],
    settings: &AllocationSettings,
) -> AllocationResult<ComputationOutput<StressTestOutput>> {
    let start = Instant::now();
    if scenarios.is_empty() {
        return Err(AllocationError::EmptyInput(
            "At least one scenario is required for a stress run".into(),
        ));
    }

    let mut warnings: Vec<String> = Vec::new();
    let mut outcomes = Vec::with_capacity(scenarios.len());
    for scenario in scenarios {
        let result = apply_scenario(problem, scenario).and_then(|p| allocate(&p, settings));
        let outcome = match result {
            Ok(run) => ScenarioOutcome {
                scenario_id: scenario.scenario_id.clone(),
                stress_type: scenario.stress_type(),
                allocation: Some(run.result),
                error: None,
            },
            Err(e) => {
                warn!(scenario_id = %scenario.scenario_id, error = %e, "scenario failed");
                warnings.push(format!("Scenario '{}' failed: {}", scenario.scenario_id, e));
                ScenarioOutcome {
                    scenario_id: scenario.scenario_id.clone(),
                    stress_type: scenario.stress_type(),
                    allocation: None,
                    error: Some(e.to_string()),
                }
            }
        };
        outcomes.push(outcome);
    }

    let n_failed = outcomes.iter().filter(|o| o.error.is_some()).count();
    let output = StressTestOutput {
        n_succeeded: outcomes.len() - n_failed,
        n_failed,
        outcomes,
    };

    let elapsed = start.elapsed().as_micros() as u64;
    info!(
        n_scenarios = scenarios.len(),
        n_failed,
        elapsed_us = elapsed,
        "stress run finished"
    );
    Ok(with_metadata(
        "Black-Litterman allocation re-run under each stress scenario",
        &serde_json::json!({
            "num_scenarios": scenarios.len(),
            "objective": settings.objective,
        }),
        warnings,
        elapsed,
        output,
    ))
}
