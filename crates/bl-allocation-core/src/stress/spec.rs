//! Stress specifications as received (`StressSpec`) and after the
//! per-type required-field rules have been applied (`ValidatedStress`).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AllocationError;
use crate::AllocationResult;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StressType {
    ViewMagnitude,
    ConfidenceScale,
    FactorAmplification,
    TauShift,
    VolatilityMultiplier,
    RegimeTemplate,
    ViewJoint,
}

impl StressType {
    pub const ALL: [StressType; 7] = [
        StressType::ViewMagnitude,
        StressType::ConfidenceScale,
        StressType::FactorAmplification,
        StressType::TauShift,
        StressType::VolatilityMultiplier,
        StressType::RegimeTemplate,
        StressType::ViewJoint,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StressType::ViewMagnitude => "view_magnitude",
            StressType::ConfidenceScale => "confidence_scale",
            StressType::FactorAmplification => "factor_amplification",
            StressType::TauShift => "tau_shift",
            StressType::VolatilityMultiplier => "volatility_multiplier",
            StressType::RegimeTemplate => "regime_template",
            StressType::ViewJoint => "view_joint",
        }
    }
}

impl fmt::Display for StressType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StressType {
    type Err = AllocationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StressType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| AllocationError::UnknownScenarioType(s.to_string()))
    }
}

/// Grid intensity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GridLevel {
    Conservative,
    #[default]
    Standard,
    Aggressive,
}

impl GridLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            GridLevel::Conservative => "conservative",
            GridLevel::Standard => "standard",
            GridLevel::Aggressive => "aggressive",
        }
    }

    fn parse(value: &str, field: &str) -> AllocationResult<GridLevel> {
        match value {
            "conservative" => Ok(GridLevel::Conservative),
            "standard" => Ok(GridLevel::Standard),
            "aggressive" => Ok(GridLevel::Aggressive),
            other => Err(AllocationError::invalid(
                field,
                format!(
                    "Grid level must be one of: conservative, standard, aggressive. Got: {}",
                    other
                ),
            )),
        }
    }
}

/// How a view-magnitude multiplier is applied.
///
/// `RelativeToBase`: new = base * m, so a negative multiplier flips the view.
/// `Absolute`: new = |base| * m, so the multiplier's sign alone sets the
/// direction whatever the sign of the base view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MagnitudeMode {
    #[default]
    RelativeToBase,
    Absolute,
}

/// A stress instruction as written by a user or upstream parser.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StressSpec {
    pub stress_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub factor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grid_level: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub magnitude_grid_level: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_grid_level: Option<String>,
}

/// A stress instruction with every field its type needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stress_type", rename_all = "snake_case")]
pub enum ValidatedStress {
    ViewMagnitude {
        target_label: String,
        grid_level: GridLevel,
        mode: MagnitudeMode,
    },
    ConfidenceScale {
        grid_level: GridLevel,
    },
    FactorAmplification {
        factor: String,
        grid_level: GridLevel,
    },
    TauShift {
        grid_level: GridLevel,
    },
    VolatilityMultiplier {
        grid_level: GridLevel,
    },
    RegimeTemplate {
        template_name: String,
    },
    ViewJoint {
        target_label: String,
        magnitude_grid_level: GridLevel,
        confidence_grid_level: GridLevel,
    },
}

impl ValidatedStress {
    pub fn stress_type(&self) -> StressType {
        match self {
            ValidatedStress::ViewMagnitude { .. } => StressType::ViewMagnitude,
            ValidatedStress::ConfidenceScale { .. } => StressType::ConfidenceScale,
            ValidatedStress::FactorAmplification { .. } => StressType::FactorAmplification,
            ValidatedStress::TauShift { .. } => StressType::TauShift,
            ValidatedStress::VolatilityMultiplier { .. } => StressType::VolatilityMultiplier,
            ValidatedStress::RegimeTemplate { .. } => StressType::RegimeTemplate,
            ValidatedStress::ViewJoint { .. } => StressType::ViewJoint,
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn required(value: &Option<String>, stress_type: StressType, field: &str) -> AllocationResult<String> {
    present(value).map(str::to_string).ok_or_else(|| {
        AllocationError::invalid(
            field,
            format!("stress_type '{}' requires '{}' field", stress_type, field),
        )
    })
}

fn grid(value: &Option<String>, field: &str) -> AllocationResult<GridLevel> {
    match present(value) {
        Some(v) => GridLevel::parse(v, field),
        None => Ok(GridLevel::default()),
    }
}

impl StressSpec {
    pub fn from_json(json: &str) -> AllocationResult<StressSpec> {
        Ok(serde_json::from_str(json)?)
    }

    /// Apply the per-type required-field rules. Grid levels are checked
    /// whenever present; `grid_level` defaults to `standard`.
    pub fn validate(&self) -> AllocationResult<ValidatedStress> {
        let stress_type: StressType = self.stress_type.parse()?;

        let grid_level = grid(&self.grid_level, "grid_level")?;
        let magnitude_grid = present(&self.magnitude_grid_level)
            .map(|v| GridLevel::parse(v, "magnitude_grid_level"))
            .transpose()?;
        let confidence_grid = present(&self.confidence_grid_level)
            .map(|v| GridLevel::parse(v, "confidence_grid_level"))
            .transpose()?;
        let mode = match present(&self.mode) {
            None | Some("relative_to_base") => MagnitudeMode::RelativeToBase,
            Some("absolute") => MagnitudeMode::Absolute,
            Some(other) => {
                return Err(AllocationError::invalid(
                    "mode",
                    format!("Mode must be 'relative_to_base' or 'absolute'. Got: {}", other),
                ))
            }
        };

        let validated = match stress_type {
            StressType::ViewMagnitude => ValidatedStress::ViewMagnitude {
                target_label: required(&self.target_label, stress_type, "target_label")?,
                grid_level,
                mode,
            },
            StressType::ConfidenceScale => ValidatedStress::ConfidenceScale { grid_level },
            StressType::FactorAmplification => ValidatedStress::FactorAmplification {
                factor: required(&self.factor, stress_type, "factor")?,
                grid_level,
            },
            StressType::TauShift => ValidatedStress::TauShift { grid_level },
            StressType::VolatilityMultiplier => ValidatedStress::VolatilityMultiplier { grid_level },
            StressType::RegimeTemplate => ValidatedStress::RegimeTemplate {
                template_name: required(&self.template_name, stress_type, "template_name")?,
            },
            StressType::ViewJoint => {
                let target_label = required(&self.target_label, stress_type, "target_label")?;
                match (magnitude_grid, confidence_grid) {
                    (Some(magnitude_grid_level), Some(confidence_grid_level)) => {
                        ValidatedStress::ViewJoint {
                            target_label,
                            magnitude_grid_level,
                            confidence_grid_level,
                        }
                    }
                    _ => {
                        return Err(AllocationError::invalid(
                            "magnitude_grid_level",
                            "stress_type 'view_joint' requires both 'magnitude_grid_level' and 'confidence_grid_level' fields",
                        ))
                    }
                }
            }
        };
        Ok(validated)
    }
}
