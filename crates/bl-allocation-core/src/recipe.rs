//! The recipe document: universe, model parameters, constraints and the
//! two view families that drive one allocation.

use std::collections::{BTreeMap, BTreeSet};

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::AllocationError;
use crate::optimizer::WeightBounds;
use crate::views::{validate_confidence, FactorView, View};
use crate::AllocationResult;

pub const DEFAULT_RISK_AVERSION: Decimal = dec!(2.5);
pub const DEFAULT_RISK_FREE_RATE: Decimal = dec!(0.02);

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RecipeMeta {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Universe {
    pub assets: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ModelParameters {
    #[serde(default)]
    pub tau: Option<Decimal>,
    #[serde(default)]
    pub risk_aversion: Option<Decimal>,
    #[serde(default)]
    pub risk_free_rate: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constraints {
    #[serde(default = "default_long_only")]
    pub long_only: bool,
    /// asset -> [lower, upper]
    #[serde(default)]
    pub weight_bounds: BTreeMap<String, (Decimal, Decimal)>,
}

fn default_long_only() -> bool {
    true
}

impl Default for Constraints {
    fn default() -> Self {
        Constraints {
            long_only: true,
            weight_bounds: BTreeMap::new(),
        }
    }
}

/// An asset-level view with an optional human label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BottomUpView {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(flatten)]
    pub view: View,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorModel {
    pub factors: Vec<String>,
}

/// A shock to a named factor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorShock {
    pub factor: String,
    pub shock: Decimal,
    pub confidence: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopDownViews {
    pub factor_model: FactorModel,
    #[serde(default)]
    pub factor_shocks: Vec<FactorShock>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipe {
    #[serde(default)]
    pub meta: RecipeMeta,
    pub universe: Universe,
    #[serde(default)]
    pub model_parameters: ModelParameters,
    #[serde(default)]
    pub constraints: Constraints,
    #[serde(default)]
    pub bottom_up_views: Vec<BottomUpView>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_down_views: Option<TopDownViews>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

impl Recipe {
    /// Parse and validate a recipe document.
    pub fn from_json(json: &str) -> AllocationResult<Recipe> {
        let recipe: Recipe = serde_json::from_str(json)?;
        recipe.validate()?;
        Ok(recipe)
    }

    pub fn validate(&self) -> AllocationResult<()> {
        let assets = &self.universe.assets;
        if assets.is_empty() {
            return Err(AllocationError::EmptyInput(
                "universe.assets must name at least one asset".into(),
            ));
        }
        let unique: BTreeSet<&String> = assets.iter().collect();
        if unique.len() != assets.len() {
            return Err(AllocationError::invalid(
                "universe.assets",
                "Duplicate asset in universe",
            ));
        }

        let params = &self.model_parameters;
        if let Some(tau) = params.tau {
            if tau <= Decimal::ZERO {
                return Err(AllocationError::invalid(
                    "model_parameters.tau",
                    "Tau must be positive",
                ));
            }
        }
        if let Some(delta) = params.risk_aversion {
            if delta <= Decimal::ZERO {
                return Err(AllocationError::invalid(
                    "model_parameters.risk_aversion",
                    "Risk aversion must be positive",
                ));
            }
        }

        for asset in self.constraints.weight_bounds.keys() {
            if !assets.contains(asset) {
                return Err(AllocationError::unknown_label("asset", asset, assets));
            }
        }

        let mut labels = BTreeSet::new();
        for (i, v) in self.bottom_up_views.iter().enumerate() {
            let field = format!("bottom_up_views[{}]", i);
            if let View::FactorShock(_) = v.view {
                return Err(AllocationError::invalid(
                    field,
                    "Factor shocks belong under top_down_views.factor_shocks",
                ));
            }
            v.view.validate(&field)?;
            if let Some(label) = &v.label {
                if !labels.insert(label.clone()) {
                    return Err(AllocationError::invalid(
                        format!("{}.label", field),
                        format!("Duplicate view label '{}'", label),
                    ));
                }
            }
        }

        if let Some(top) = &self.top_down_views {
            let factors = &top.factor_model.factors;
            let unique: BTreeSet<&String> = factors.iter().collect();
            if unique.len() != factors.len() {
                return Err(AllocationError::invalid(
                    "top_down_views.factor_model.factors",
                    "Duplicate factor name",
                ));
            }
            for (i, shock) in top.factor_shocks.iter().enumerate() {
                let field = format!("top_down_views.factor_shocks[{}]", i);
                if !factors.contains(&shock.factor) {
                    return Err(AllocationError::unknown_label("factor", &shock.factor, factors));
                }
                validate_confidence(shock.confidence, &format!("{}.confidence", field))?;
                if let Some(label) = &shock.label {
                    if !labels.insert(label.clone()) {
                        return Err(AllocationError::invalid(
                            format!("{}.label", field),
                            format!("Duplicate view label '{}'", label),
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    pub fn assets(&self) -> &[String] {
        &self.universe.assets
    }

    /// Tau is required wherever a posterior or stress grid is built.
    pub fn tau(&self) -> AllocationResult<Decimal> {
        self.model_parameters.tau.ok_or_else(|| {
            AllocationError::invalid("model_parameters.tau", "Recipe is missing required field")
        })
    }

    pub fn risk_aversion(&self) -> Decimal {
        self.model_parameters
            .risk_aversion
            .unwrap_or(DEFAULT_RISK_AVERSION)
    }

    pub fn risk_free_rate(&self) -> Decimal {
        self.model_parameters
            .risk_free_rate
            .unwrap_or(DEFAULT_RISK_FREE_RATE)
    }

    /// (0, 1) per asset when long-only, (-1, 1) otherwise, with the
    /// recipe's per-asset bounds on top.
    pub fn weight_bounds(&self) -> WeightBounds {
        let base = if self.constraints.long_only {
            WeightBounds::long_only()
        } else {
            WeightBounds::uniform(-Decimal::ONE, Decimal::ONE)
        };
        self.constraints
            .weight_bounds
            .iter()
            .fold(base, |b, (asset, (lo, hi))| b.with_asset(asset, *lo, *hi))
    }

    pub fn bottom_up(&self) -> Vec<View> {
        self.bottom_up_views.iter().map(|v| v.view.clone()).collect()
    }

    pub fn factor_names(&self) -> Vec<String> {
        self.top_down_views
            .as_ref()
            .map(|t| t.factor_model.factors.clone())
            .unwrap_or_default()
    }

    /// Factor shocks as indexed views against `factor_model.factors`.
    pub fn factor_views(&self) -> AllocationResult<Vec<FactorView>> {
        let Some(top) = &self.top_down_views else {
            return Ok(Vec::new());
        };
        let factors = &top.factor_model.factors;
        top.factor_shocks
            .iter()
            .map(|s| {
                let factor_index = factors
                    .iter()
                    .position(|f| *f == s.factor)
                    .ok_or_else(|| AllocationError::unknown_label("factor", &s.factor, factors))?;
                Ok(FactorView {
                    factor_index,
                    shock: s.shock,
                    confidence: s.confidence,
                })
            })
            .collect()
    }

    pub fn view_labels(&self) -> Vec<String> {
        self.bottom_up_views
            .iter()
            .filter_map(|v| v.label.clone())
            .collect()
    }

    /// Position and content of the bottom-up view with this label.
    pub fn find_view(&self, label: &str) -> AllocationResult<(usize, &BottomUpView)> {
        self.bottom_up_views
            .iter()
            .enumerate()
            .find(|(_, v)| v.label.as_deref() == Some(label))
            .ok_or_else(|| AllocationError::unknown_label("view", label, &self.view_labels()))
    }

    /// Multiply every view confidence, bottom-up and top-down, by `scale`.
    pub fn scale_confidences(&mut self, scale: Decimal) {
        for v in self.bottom_up_views.iter_mut() {
            v.view = v.view.with_confidence(v.view.confidence() * scale);
        }
        if let Some(top) = self.top_down_views.as_mut() {
            for s in top.factor_shocks.iter_mut() {
                s.confidence *= scale;
            }
        }
    }

    pub fn n_views(&self) -> usize {
        self.bottom_up_views.len()
            + self
                .top_down_views
                .as_ref()
                .map(|t| t.factor_shocks.len())
                .unwrap_or(0)
    }
}
