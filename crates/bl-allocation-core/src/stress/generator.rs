//! Expand a validated stress instruction into concrete scenarios resolved
//! against a recipe.

use rust_decimal::Decimal;
use tracing::{debug, info};

use super::defaults::StressDefaults;
use super::scenario::{
    confidence_description, confidence_id, factor_description, factor_id, joint_id, magnitude_id,
    regime_id, tau_id, volatility_description, volatility_id, Scenario, ScenarioParameters,
};
use super::spec::{GridLevel, MagnitudeMode, StressSpec, ValidatedStress};
use crate::error::AllocationError;
use crate::recipe::Recipe;
use crate::AllocationResult;

pub struct ScenarioGenerator<'a> {
    recipe: &'a Recipe,
    defaults: &'a StressDefaults,
    base_tau: Decimal,
}

impl<'a> ScenarioGenerator<'a> {
    /// Fails when the recipe has no tau, since every tau grid scales it.
    pub fn new(recipe: &'a Recipe, defaults: &'a StressDefaults) -> AllocationResult<Self> {
        let base_tau = recipe.tau()?;
        Ok(ScenarioGenerator {
            recipe,
            defaults,
            base_tau,
        })
    }

    pub fn generate(&self, stress: &ValidatedStress) -> AllocationResult<Vec<Scenario>> {
        let scenarios = match stress {
            ValidatedStress::ViewMagnitude {
                target_label,
                grid_level,
                mode,
            } => self.view_magnitude(target_label, *grid_level, *mode)?,
            ValidatedStress::ConfidenceScale { grid_level } => self.confidence_scale(*grid_level),
            ValidatedStress::FactorAmplification { factor, grid_level } => {
                self.factor_amplification(factor, *grid_level)?
            }
            ValidatedStress::TauShift { grid_level } => self.tau_shift(*grid_level),
            ValidatedStress::VolatilityMultiplier { grid_level } => {
                self.volatility_multiplier(*grid_level)
            }
            ValidatedStress::RegimeTemplate { template_name } => {
                self.regime_template(template_name)?
            }
            ValidatedStress::ViewJoint {
                target_label,
                magnitude_grid_level,
                confidence_grid_level,
            } => self.view_joint(target_label, *magnitude_grid_level, *confidence_grid_level)?,
        };

        info!(
            stress_type = %stress.stress_type(),
            n_scenarios = scenarios.len(),
            "generated stress scenarios"
        );
        Ok(scenarios)
    }

    fn view_magnitude(
        &self,
        target_label: &str,
        grid_level: GridLevel,
        mode: MagnitudeMode,
    ) -> AllocationResult<Vec<Scenario>> {
        let (_, view) = self.recipe.find_view(target_label)?;
        let base_value = view.view.magnitude();
        let reference = match mode {
            MagnitudeMode::RelativeToBase => base_value,
            MagnitudeMode::Absolute => base_value.abs(),
        };
        debug!(target_label, %base_value, "view magnitude grid");

        Ok(self
            .defaults
            .view_magnitude_multipliers
            .get(grid_level)
            .iter()
            .map(|&m| Scenario {
                scenario_id: magnitude_id(m),
                parameters: ScenarioParameters::ViewMagnitude {
                    target_label: target_label.to_string(),
                    multiplier: m,
                    base_value,
                    new_value: reference * Decimal::from(m),
                    mode,
                },
            })
            .collect())
    }

    fn confidence_scale(&self, grid_level: GridLevel) -> Vec<Scenario> {
        self.defaults
            .confidence_scales
            .get(grid_level)
            .iter()
            .map(|&scale| Scenario {
                scenario_id: confidence_id(scale),
                parameters: ScenarioParameters::ConfidenceScale {
                    scale_factor: scale,
                    description: confidence_description(scale),
                },
            })
            .collect()
    }

    fn factor_amplification(
        &self,
        factor: &str,
        grid_level: GridLevel,
    ) -> AllocationResult<Vec<Scenario>> {
        let factors = self.recipe.factor_names();
        if !factors.iter().any(|f| f == factor) {
            return Err(AllocationError::unknown_label("factor", factor, &factors));
        }

        Ok(self
            .defaults
            .factor_scales
            .get(grid_level)
            .iter()
            .map(|&scale| Scenario {
                scenario_id: factor_id(factor, scale),
                parameters: ScenarioParameters::FactorAmplification {
                    factor: factor.to_string(),
                    scale_factor: scale,
                    description: factor_description(factor, scale),
                },
            })
            .collect())
    }

    fn tau_shift(&self, grid_level: GridLevel) -> Vec<Scenario> {
        self.defaults
            .tau_multipliers
            .get(grid_level)
            .iter()
            .map(|&m| Scenario {
                scenario_id: tau_id(m),
                parameters: ScenarioParameters::TauShift {
                    tau_multiplier: m,
                    base_tau: self.base_tau,
                    new_tau: self.base_tau * m,
                },
            })
            .collect()
    }

    fn volatility_multiplier(&self, grid_level: GridLevel) -> Vec<Scenario> {
        self.defaults
            .volatility_multipliers
            .get(grid_level)
            .iter()
            .map(|&m| Scenario {
                scenario_id: volatility_id(m),
                parameters: ScenarioParameters::VolatilityMultiplier {
                    volatility_multiplier: m,
                    description: volatility_description(m),
                },
            })
            .collect()
    }

    fn regime_template(&self, template_name: &str) -> AllocationResult<Vec<Scenario>> {
        let preset = self.defaults.regime(template_name)?;
        Ok(vec![Scenario {
            scenario_id: regime_id(template_name),
            parameters: ScenarioParameters::RegimeTemplate {
                template_name: template_name.to_string(),
                preset: preset.clone(),
            },
        }])
    }

    /// Cartesian product, magnitude-major.
    fn view_joint(
        &self,
        target_label: &str,
        magnitude_grid_level: GridLevel,
        confidence_grid_level: GridLevel,
    ) -> AllocationResult<Vec<Scenario>> {
        let (_, view) = self.recipe.find_view(target_label)?;
        let base_magnitude = view.view.magnitude();
        let base_confidence = view.view.confidence();

        let multipliers = self.defaults.view_magnitude_multipliers.get(magnitude_grid_level);
        let scales = self.defaults.confidence_scales.get(confidence_grid_level);

        let mut scenarios = Vec::with_capacity(multipliers.len() * scales.len());
        for &m in multipliers {
            for &scale in scales {
                scenarios.push(Scenario {
                    scenario_id: joint_id(m, scale),
                    parameters: ScenarioParameters::ViewJoint {
                        target_label: target_label.to_string(),
                        magnitude_multiplier: m,
                        confidence_scale: scale,
                        base_magnitude,
                        base_confidence,
                        new_magnitude: base_magnitude * Decimal::from(m),
                        new_confidence: base_confidence * scale,
                    },
                });
            }
        }
        Ok(scenarios)
    }
}

/// Validate `spec` and expand it against `recipe`.
pub fn generate_scenarios(
    spec: &StressSpec,
    recipe: &Recipe,
    defaults: &StressDefaults,
) -> AllocationResult<Vec<Scenario>> {
    let stress = spec.validate()?;
    ScenarioGenerator::new(recipe, defaults)?.generate(&stress)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stress::spec::StressType;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    const RECIPE: &str = r#"{
        "universe": {"assets": ["AAPL", "MSFT", "GOOGL"]},
        "model_parameters": {"tau": "0.05"},
        "bottom_up_views": [
            {"label": "AAPL outperforms MSFT", "type": "relative", "asset_long": "AAPL",
             "asset_short": "MSFT", "expected_outperformance": "0.02", "confidence": "0.6"},
            {"label": "MSFT falls", "type": "absolute", "asset": "MSFT",
             "expected_return": "-0.03", "confidence": "0.5"}
        ],
        "top_down_views": {
            "factor_model": {"factors": ["Growth", "Rates"]},
            "factor_shocks": [{"factor": "Growth", "shock": "0.01", "confidence": "0.6"}]
        }
    }"#;

    fn recipe() -> Recipe {
        Recipe::from_json(RECIPE).unwrap()
    }

    fn spec(json: &str) -> StressSpec {
        StressSpec::from_json(json).unwrap()
    }

    fn find<'s>(scenarios: &'s [Scenario], id: &str) -> &'s Scenario {
        scenarios.iter().find(|s| s.scenario_id == id).unwrap()
    }

    #[test]
    fn test_view_magnitude_standard_grid() {
        let r = recipe();
        let d = StressDefaults::default();
        let s = generate_scenarios(
            &spec(r#"{"stress_type": "view_magnitude", "target_label": "AAPL outperforms MSFT"}"#),
            &r,
            &d,
        )
        .unwrap();
        assert_eq!(s.len(), 5);
        let ids: Vec<&str> = s.iter().map(|s| s.scenario_id.as_str()).collect();
        assert_eq!(ids, vec!["mag_-2x", "mag_-1x", "mag_+0x", "mag_+1x", "mag_+2x"]);
        match &find(&s, "mag_-2x").parameters {
            ScenarioParameters::ViewMagnitude {
                base_value,
                new_value,
                ..
            } => {
                assert_eq!(*base_value, dec!(0.02));
                assert_eq!(*new_value, dec!(-0.04));
            }
            other => panic!("unexpected parameters {:?}", other),
        }
    }

    #[test]
    fn test_view_magnitude_absolute_mode_uses_sign_of_multiplier() {
        let r = recipe();
        let d = StressDefaults::default();
        let s = generate_scenarios(
            &spec(r#"{"stress_type": "view_magnitude", "target_label": "MSFT falls", "mode": "absolute"}"#),
            &r,
            &d,
        )
        .unwrap();
        match &find(&s, "mag_+2x").parameters {
            ScenarioParameters::ViewMagnitude { new_value, .. } => {
                assert_eq!(*new_value, dec!(0.06))
            }
            other => panic!("unexpected parameters {:?}", other),
        }
    }

    #[test]
    fn test_view_magnitude_unknown_label_lists_available() {
        let r = recipe();
        let d = StressDefaults::default();
        let err = generate_scenarios(
            &spec(r#"{"stress_type": "view_magnitude", "target_label": "GOOGL rallies"}"#),
            &r,
            &d,
        )
        .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("GOOGL rallies"));
        assert!(msg.contains("AAPL outperforms MSFT, MSFT falls"));
    }

    #[test]
    fn test_confidence_grid() {
        let r = recipe();
        let d = StressDefaults::default();
        let s = generate_scenarios(
            &spec(r#"{"stress_type": "confidence_scale", "grid_level": "conservative"}"#),
            &r,
            &d,
        )
        .unwrap();
        assert_eq!(s.len(), 3);
        assert_eq!(s[0].scenario_id, "conf_0.8");
        match &s[0].parameters {
            ScenarioParameters::ConfidenceScale { description, .. } => {
                assert_eq!(description, "80% of base confidence")
            }
            other => panic!("unexpected parameters {:?}", other),
        }
    }

    #[test]
    fn test_factor_amplification_checks_factor_model() {
        let r = recipe();
        let d = StressDefaults::default();
        let s = generate_scenarios(
            &spec(r#"{"stress_type": "factor_amplification", "factor": "Growth"}"#),
            &r,
            &d,
        )
        .unwrap();
        assert_eq!(s.len(), 4);
        assert_eq!(s[3].scenario_id, "factor_gro_2.0x");

        let err = generate_scenarios(
            &spec(r#"{"stress_type": "factor_amplification", "factor": "Value"}"#),
            &r,
            &d,
        )
        .unwrap_err();
        assert!(err.to_string().contains("Growth, Rates"));
    }

    #[test]
    fn test_tau_shift_scales_recipe_tau() {
        let r = recipe();
        let d = StressDefaults::default();
        let s = generate_scenarios(&spec(r#"{"stress_type": "tau_shift"}"#), &r, &d).unwrap();
        assert_eq!(s.len(), 5);
        match &find(&s, "tau_4.00x").parameters {
            ScenarioParameters::TauShift {
                base_tau, new_tau, ..
            } => {
                assert_eq!(*base_tau, dec!(0.05));
                assert_eq!(*new_tau, dec!(0.2));
            }
            other => panic!("unexpected parameters {:?}", other),
        }
    }

    #[test]
    fn test_volatility_grid_ids() {
        let r = recipe();
        let d = StressDefaults::default();
        let s = generate_scenarios(
            &spec(r#"{"stress_type": "volatility_multiplier", "grid_level": "aggressive"}"#),
            &r,
            &d,
        )
        .unwrap();
        let ids: Vec<&str> = s.iter().map(|s| s.scenario_id.as_str()).collect();
        assert_eq!(ids, vec!["vol_0.5x", "vol_1.0x", "vol_1.5x", "vol_2.0x", "vol_3.0x"]);
        assert!(s.iter().all(|s| s.stress_type() == StressType::VolatilityMultiplier));
    }

    #[test]
    fn test_crisis_regime_matches_preset() {
        let r = recipe();
        let d = StressDefaults::default();
        let s = generate_scenarios(
            &spec(r#"{"stress_type": "regime_template", "template_name": "crisis"}"#),
            &r,
            &d,
        )
        .unwrap();
        assert_eq!(s.len(), 1);
        assert_eq!(s[0].scenario_id, "regime_crisis");
        match &s[0].parameters {
            ScenarioParameters::RegimeTemplate { preset, .. } => {
                assert_eq!(preset, d.regime("crisis").unwrap())
            }
            other => panic!("unexpected parameters {:?}", other),
        }
    }

    #[test]
    fn test_view_joint_is_cartesian_product() {
        let r = recipe();
        let d = StressDefaults::default();
        let s = generate_scenarios(
            &spec(
                r#"{"stress_type": "view_joint", "target_label": "AAPL outperforms MSFT",
                    "magnitude_grid_level": "standard", "confidence_grid_level": "conservative"}"#,
            ),
            &r,
            &d,
        )
        .unwrap();
        assert_eq!(s.len(), 5 * 3);
        assert_eq!(s[0].scenario_id, "joint_mag-2x_conf0.8");
        match &find(&s, "joint_mag+1x_conf0.9").parameters {
            ScenarioParameters::ViewJoint {
                base_confidence,
                new_magnitude,
                new_confidence,
                ..
            } => {
                assert_eq!(*base_confidence, dec!(0.6));
                assert_eq!(*new_magnitude, dec!(0.02));
                assert_eq!(*new_confidence, dec!(0.54));
            }
            other => panic!("unexpected parameters {:?}", other),
        }
    }

    #[test]
    fn test_recipe_without_tau_rejected() {
        let r = Recipe::from_json(r#"{"universe": {"assets": ["A", "B"]}}"#).unwrap();
        let d = StressDefaults::default();
        assert!(ScenarioGenerator::new(&r, &d).is_err());
    }
}
