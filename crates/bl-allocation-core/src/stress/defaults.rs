//! Grid tables and regime presets that turn a symbolic grid level into
//! concrete stress values.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use super::spec::GridLevel;
use crate::error::AllocationError;
use crate::AllocationResult;

/// One value list per grid level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridTable<T> {
    pub conservative: Vec<T>,
    pub standard: Vec<T>,
    pub aggressive: Vec<T>,
}

impl<T> GridTable<T> {
    pub fn get(&self, level: GridLevel) -> &[T] {
        match level {
            GridLevel::Conservative => &self.conservative,
            GridLevel::Standard => &self.standard,
            GridLevel::Aggressive => &self.aggressive,
        }
    }

    fn levels(&self) -> [(GridLevel, &[T]); 3] {
        [
            (GridLevel::Conservative, &self.conservative),
            (GridLevel::Standard, &self.standard),
            (GridLevel::Aggressive, &self.aggressive),
        ]
    }
}

/// Named combination of stress multipliers describing a market regime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimePreset {
    pub tau_multiplier: Decimal,
    pub confidence_scale: Decimal,
    pub volatility_multiplier: Decimal,
    /// Added to the recipe's risk aversion.
    pub risk_aversion_shift: Decimal,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StressDefaults {
    pub view_magnitude_multipliers: GridTable<i32>,
    pub confidence_scales: GridTable<Decimal>,
    pub factor_scales: GridTable<Decimal>,
    pub tau_multipliers: GridTable<Decimal>,
    pub volatility_multipliers: GridTable<Decimal>,
    pub regimes: BTreeMap<String, RegimePreset>,
}

impl Default for StressDefaults {
    fn default() -> Self {
        let mut regimes = BTreeMap::new();
        regimes.insert(
            "crisis".to_string(),
            RegimePreset {
                tau_multiplier: dec!(3.0),
                confidence_scale: dec!(0.4),
                volatility_multiplier: dec!(2.0),
                risk_aversion_shift: dec!(3.0),
                description: "Extreme market stress scenario".into(),
            },
        );
        regimes.insert(
            "high_uncertainty".to_string(),
            RegimePreset {
                tau_multiplier: dec!(2.0),
                confidence_scale: dec!(0.5),
                volatility_multiplier: dec!(1.3),
                risk_aversion_shift: dec!(1.0),
                description: "Elevated parameter uncertainty with weak conviction in views".into(),
            },
        );
        regimes.insert(
            "risk_off".to_string(),
            RegimePreset {
                tau_multiplier: dec!(1.5),
                confidence_scale: dec!(0.7),
                volatility_multiplier: dec!(1.5),
                risk_aversion_shift: dec!(1.5),
                description: "Flight to safety with rising volatility".into(),
            },
        );
        regimes.insert(
            "risk_on".to_string(),
            RegimePreset {
                tau_multiplier: dec!(0.8),
                confidence_scale: dec!(1.0),
                volatility_multiplier: dec!(0.8),
                risk_aversion_shift: dec!(-0.5),
                description: "Calm markets with strong conviction in views".into(),
            },
        );

        StressDefaults {
            view_magnitude_multipliers: GridTable {
                conservative: vec![-1, 0, 1],
                standard: vec![-2, -1, 0, 1, 2],
                aggressive: vec![-3, -2, -1, 0, 1, 2, 3],
            },
            confidence_scales: GridTable {
                conservative: vec![dec!(0.8), dec!(0.9), dec!(1.0)],
                standard: vec![dec!(0.4), dec!(0.6), dec!(0.8), dec!(1.0)],
                aggressive: vec![dec!(0.2), dec!(0.4), dec!(0.6), dec!(0.8), dec!(1.0)],
            },
            factor_scales: GridTable {
                conservative: vec![dec!(0.8), dec!(1.0), dec!(1.2)],
                standard: vec![dec!(0.5), dec!(1.0), dec!(1.5), dec!(2.0)],
                aggressive: vec![dec!(0.3), dec!(0.5), dec!(1.0), dec!(2.0), dec!(3.0)],
            },
            tau_multipliers: GridTable {
                conservative: vec![dec!(0.5), dec!(1.0), dec!(2.0)],
                standard: vec![dec!(0.25), dec!(0.5), dec!(1.0), dec!(2.0), dec!(4.0)],
                aggressive: vec![
                    dec!(0.1),
                    dec!(0.25),
                    dec!(0.5),
                    dec!(1.0),
                    dec!(2.0),
                    dec!(5.0),
                    dec!(10.0),
                ],
            },
            volatility_multipliers: GridTable {
                conservative: vec![dec!(0.9), dec!(1.0), dec!(1.1), dec!(1.2)],
                standard: vec![dec!(0.8), dec!(1.0), dec!(1.2), dec!(1.5)],
                aggressive: vec![dec!(0.5), dec!(1.0), dec!(1.5), dec!(2.0), dec!(3.0)],
            },
            regimes,
        }
    }
}

fn check_positive(table: &GridTable<Decimal>, name: &str) -> AllocationResult<()> {
    for (level, values) in table.levels() {
        let field = format!("{}.{}", name, level.as_str());
        if values.is_empty() {
            return Err(AllocationError::EmptyInput(field));
        }
        if values.iter().any(|v| *v <= Decimal::ZERO) {
            return Err(AllocationError::invalid(field, "Multipliers must be positive"));
        }
    }
    Ok(())
}

impl StressDefaults {
    pub fn from_json(json: &str) -> AllocationResult<StressDefaults> {
        let defaults: StressDefaults = serde_json::from_str(json)?;
        defaults.validate()?;
        Ok(defaults)
    }

    pub fn validate(&self) -> AllocationResult<()> {
        for (level, values) in self.view_magnitude_multipliers.levels() {
            if values.is_empty() {
                return Err(AllocationError::EmptyInput(format!(
                    "view_magnitude_multipliers.{}",
                    level.as_str()
                )));
            }
        }
        check_positive(&self.confidence_scales, "confidence_scales")?;
        for (level, values) in self.confidence_scales.levels() {
            if values.iter().any(|v| *v > Decimal::ONE) {
                return Err(AllocationError::invalid(
                    format!("confidence_scales.{}", level.as_str()),
                    "Confidence scales must lie in (0, 1]",
                ));
            }
        }
        check_positive(&self.factor_scales, "factor_scales")?;
        check_positive(&self.tau_multipliers, "tau_multipliers")?;
        check_positive(&self.volatility_multipliers, "volatility_multipliers")?;

        for (name, preset) in &self.regimes {
            let field = format!("regimes.{}", name);
            if preset.tau_multiplier <= Decimal::ZERO
                || preset.volatility_multiplier <= Decimal::ZERO
                || preset.confidence_scale <= Decimal::ZERO
                || preset.confidence_scale > Decimal::ONE
            {
                return Err(AllocationError::invalid(
                    field,
                    "Regime multipliers must be positive and confidence scale at most 1",
                ));
            }
        }
        Ok(())
    }

    pub fn regime(&self, name: &str) -> AllocationResult<&RegimePreset> {
        self.regimes.get(name).ok_or_else(|| {
            let available: Vec<String> = self.regimes.keys().cloned().collect();
            AllocationError::unknown_label("regime template", name, &available)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_tables_are_valid() {
        let d = StressDefaults::default();
        d.validate().unwrap();
        assert_eq!(d.view_magnitude_multipliers.get(GridLevel::Standard), &[-2, -1, 0, 1, 2]);
        assert_eq!(d.tau_multipliers.get(GridLevel::Aggressive).len(), 7);
    }

    #[test]
    fn test_grids_grow_with_intensity() {
        let d = StressDefaults::default();
        let spans = |t: &GridTable<Decimal>| {
            t.levels()
                .iter()
                .map(|(_, v)| v[v.len() - 1] - v[0])
                .collect::<Vec<_>>()
        };
        for table in [&d.factor_scales, &d.tau_multipliers, &d.volatility_multipliers] {
            let s = spans(table);
            assert!(s[0] < s[1] && s[1] < s[2]);
        }
    }

    #[test]
    fn test_unknown_regime_lists_presets() {
        let d = StressDefaults::default();
        assert_eq!(d.regime("crisis").unwrap().tau_multiplier, dec!(3.0));
        let msg = d.regime("stagflation").unwrap_err().to_string();
        assert!(msg.contains("stagflation"));
        assert!(msg.contains("crisis, high_uncertainty, risk_off, risk_on"));
    }

    #[test]
    fn test_confidence_scale_above_one_rejected() {
        let mut d = StressDefaults::default();
        d.confidence_scales.standard.push(dec!(1.5));
        assert!(d.validate().unwrap_err().is_input_validation());
    }

    #[test]
    fn test_json_overrides_load() {
        let json = serde_json::to_string(&StressDefaults::default()).unwrap();
        let d = StressDefaults::from_json(&json).unwrap();
        assert_eq!(d, StressDefaults::default());
    }
}
