//! Concrete stress scenarios and their identifiers.

use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};

use super::defaults::RegimePreset;
use super::spec::{MagnitudeMode, StressType};

/// Parameters of one scenario, tagged by the stress type that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stress_type", rename_all = "snake_case")]
pub enum ScenarioParameters {
    ViewMagnitude {
        target_label: String,
        multiplier: i32,
        base_value: Decimal,
        new_value: Decimal,
        mode: MagnitudeMode,
    },
    ConfidenceScale {
        scale_factor: Decimal,
        description: String,
    },
    FactorAmplification {
        factor: String,
        scale_factor: Decimal,
        description: String,
    },
    TauShift {
        tau_multiplier: Decimal,
        base_tau: Decimal,
        new_tau: Decimal,
    },
    VolatilityMultiplier {
        volatility_multiplier: Decimal,
        description: String,
    },
    RegimeTemplate {
        template_name: String,
        preset: RegimePreset,
    },
    ViewJoint {
        target_label: String,
        magnitude_multiplier: i32,
        confidence_scale: Decimal,
        base_magnitude: Decimal,
        base_confidence: Decimal,
        new_magnitude: Decimal,
        new_confidence: Decimal,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub scenario_id: String,
    pub parameters: ScenarioParameters,
}

impl Scenario {
    pub fn stress_type(&self) -> StressType {
        match self.parameters {
            ScenarioParameters::ViewMagnitude { .. } => StressType::ViewMagnitude,
            ScenarioParameters::ConfidenceScale { .. } => StressType::ConfidenceScale,
            ScenarioParameters::FactorAmplification { .. } => StressType::FactorAmplification,
            ScenarioParameters::TauShift { .. } => StressType::TauShift,
            ScenarioParameters::VolatilityMultiplier { .. } => StressType::VolatilityMultiplier,
            ScenarioParameters::RegimeTemplate { .. } => StressType::RegimeTemplate,
            ScenarioParameters::ViewJoint { .. } => StressType::ViewJoint,
        }
    }
}

// ---------------------------------------------------------------------------
// Identifiers and descriptions
// ---------------------------------------------------------------------------

/// Fixed-point rendering with exactly `dp` decimals.
pub(crate) fn fixed(value: Decimal, dp: u32) -> String {
    let mut v = value.round_dp_with_strategy(dp, RoundingStrategy::MidpointAwayFromZero);
    v.rescale(dp);
    v.to_string()
}

pub(crate) fn magnitude_id(multiplier: i32) -> String {
    format!("mag_{:+}x", multiplier)
}

pub(crate) fn confidence_id(scale: Decimal) -> String {
    format!("conf_{}", fixed(scale, 1))
}

pub(crate) fn factor_id(factor: &str, scale: Decimal) -> String {
    let prefix: String = factor.to_lowercase().chars().take(3).collect();
    format!("factor_{}_{}x", prefix, fixed(scale, 1))
}

pub(crate) fn tau_id(multiplier: Decimal) -> String {
    format!("tau_{}x", fixed(multiplier, 2))
}

pub(crate) fn volatility_id(multiplier: Decimal) -> String {
    format!("vol_{}x", fixed(multiplier, 1))
}

pub(crate) fn regime_id(name: &str) -> String {
    format!("regime_{}", name)
}

pub(crate) fn joint_id(multiplier: i32, scale: Decimal) -> String {
    format!("joint_mag{:+}x_conf{}", multiplier, fixed(scale, 1))
}

fn whole_percent(value: Decimal) -> Decimal {
    (value * Decimal::ONE_HUNDRED).trunc()
}

pub(crate) fn confidence_description(scale: Decimal) -> String {
    format!("{}% of base confidence", whole_percent(scale))
}

pub(crate) fn factor_description(factor: &str, scale: Decimal) -> String {
    if scale > Decimal::ONE {
        format!("{} factor amplified {}x", factor, scale)
    } else if scale < Decimal::ONE {
        format!("{} factor dampened to {}x", factor, scale)
    } else {
        format!("{} factor unchanged (baseline)", factor)
    }
}

pub(crate) fn volatility_description(multiplier: Decimal) -> String {
    if multiplier > Decimal::ONE {
        format!(
            "{}% increase in market volatility",
            whole_percent(multiplier - Decimal::ONE)
        )
    } else if multiplier < Decimal::ONE {
        format!(
            "{}% decrease in market volatility",
            whole_percent(Decimal::ONE - multiplier)
        )
    } else {
        "Baseline volatility (no change)".to_string()
    }
}
