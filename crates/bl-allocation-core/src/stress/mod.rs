//! Stress testing: symbolic stress specifications expanded into concrete,
//! numerically resolved scenarios that re-drive the allocation pipeline.

pub mod defaults;
pub mod generator;
pub mod scenario;
pub mod spec;

pub use defaults::{GridTable, RegimePreset, StressDefaults};
pub use generator::{generate_scenarios, ScenarioGenerator};
pub use scenario::{Scenario, ScenarioParameters};
pub use spec::{GridLevel, MagnitudeMode, StressSpec, StressType, ValidatedStress};
