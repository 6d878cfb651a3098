use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Row-major dense matrix.
pub type Matrix = Vec<Vec<Decimal>>;

/// A named weight for one asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetWeight {
    pub asset: String,
    pub weight: Decimal,
}

/// Portfolio weights in universe order.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PortfolioWeights {
    pub weights: Vec<AssetWeight>,
}

impl PortfolioWeights {
    pub fn from_parts(assets: &[String], values: &[Decimal]) -> Self {
        PortfolioWeights {
            weights: assets
                .iter()
                .zip(values.iter())
                .map(|(a, w)| AssetWeight {
                    asset: a.clone(),
                    weight: *w,
                })
                .collect(),
        }
    }

    pub fn get(&self, asset: &str) -> Option<Decimal> {
        self.weights
            .iter()
            .find(|w| w.asset == asset)
            .map(|w| w.weight)
    }

    pub fn total(&self) -> Decimal {
        self.weights.iter().map(|w| w.weight).sum()
    }

    pub fn values(&self) -> Vec<Decimal> {
        self.weights.iter().map(|w| w.weight).collect()
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }
}

/// Expected returns (prior or posterior) keyed by asset, in universe order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetReturns {
    pub assets: Vec<String>,
    pub values: Vec<Decimal>,
}

impl AssetReturns {
    pub fn get(&self, asset: &str) -> Option<Decimal> {
        self.assets
            .iter()
            .position(|a| a == asset)
            .map(|i| self.values[i])
    }
}

/// Expected return, volatility and Sharpe ratio of a weight vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioPerformance {
    pub expected_return: Decimal,
    pub volatility: Decimal,
    pub sharpe_ratio: Decimal,
}

/// Standard computation output envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputationOutput<T: Serialize> {
    pub result: T,
    pub methodology: String,
    pub assumptions: serde_json::Value,
    pub warnings: Vec<String>,
    pub metadata: ComputationMetadata,
}

/// Metadata for every computation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputationMetadata {
    pub version: String,
    pub computation_time_us: u64,
    pub precision: String,
}

/// Helper to wrap computation results with metadata
pub fn with_metadata<T: Serialize>(
    methodology: &str,
    assumptions: &impl Serialize,
    warnings: Vec<String>,
    elapsed_us: u64,
    result: T,
) -> ComputationOutput<T> {
    ComputationOutput {
        result,
        methodology: methodology.to_string(),
        assumptions: serde_json::to_value(assumptions).unwrap_or_default(),
        warnings,
        metadata: ComputationMetadata {
            version: env!("CARGO_PKG_VERSION").to_string(),
            computation_time_us: elapsed_us,
            precision: "rust_decimal_128bit".to_string(),
        },
    }
}
