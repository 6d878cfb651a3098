//! Prior estimation: annualised sample covariance from a price table and
//! market-implied equilibrium returns from capitalisation weights.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::AllocationError;
use crate::linalg::{is_square, mat_vec_multiply, zeros};
use crate::types::{AssetReturns, Matrix};
use crate::AllocationResult;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Date-indexed price table. `prices[t][j]` is the close of `assets[j]` on
/// `dates[t]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSeries {
    pub dates: Vec<NaiveDate>,
    pub assets: Vec<String>,
    pub prices: Vec<Vec<Decimal>>,
}

/// Annualised covariance matrix labelled by asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CovarianceMatrix {
    pub assets: Vec<String>,
    pub values: Matrix,
}

impl PriceSeries {
    /// Build a price table, checking shape, date order and positivity.
    pub fn new(
        dates: Vec<NaiveDate>,
        assets: Vec<String>,
        prices: Vec<Vec<Decimal>>,
    ) -> AllocationResult<Self> {
        let series = PriceSeries {
            dates,
            assets,
            prices,
        };
        series.validate()?;
        Ok(series)
    }

    pub fn validate(&self) -> AllocationResult<()> {
        if self.assets.is_empty() {
            return Err(AllocationError::EmptyInput(
                "Price table has no asset columns".into(),
            ));
        }
        if self.dates.len() != self.prices.len() {
            return Err(AllocationError::invalid(
                "prices",
                format!(
                    "{} dates but {} price rows",
                    self.dates.len(),
                    self.prices.len()
                ),
            ));
        }
        let unique: BTreeSet<&String> = self.assets.iter().collect();
        if unique.len() != self.assets.len() {
            return Err(AllocationError::invalid(
                "assets",
                "Duplicate asset column in price table",
            ));
        }
        for (t, row) in self.prices.iter().enumerate() {
            if row.len() != self.assets.len() {
                return Err(AllocationError::invalid(
                    format!("prices[{}]", t),
                    format!("Expected {} columns, got {}", self.assets.len(), row.len()),
                ));
            }
            if let Some(j) = row.iter().position(|p| *p <= Decimal::ZERO) {
                return Err(AllocationError::invalid(
                    format!("prices[{}][{}]", t, j),
                    "Prices must be positive",
                ));
            }
        }
        if self.dates.windows(2).any(|w| w[1] <= w[0]) {
            return Err(AllocationError::invalid(
                "dates",
                "Dates must be strictly increasing",
            ));
        }
        Ok(())
    }

    pub fn n_rows(&self) -> usize {
        self.prices.len()
    }

    /// Keep only the named columns, in the order given.
    pub fn select(&self, assets: &[String]) -> AllocationResult<PriceSeries> {
        let idx = assets
            .iter()
            .map(|a| {
                self.assets
                    .iter()
                    .position(|b| b == a)
                    .ok_or_else(|| AllocationError::unknown_label("asset", a, &self.assets))
            })
            .collect::<AllocationResult<Vec<usize>>>()?;
        Ok(PriceSeries {
            dates: self.dates.clone(),
            assets: assets.to_vec(),
            prices: self
                .prices
                .iter()
                .map(|row| idx.iter().map(|&j| row[j]).collect())
                .collect(),
        })
    }

    /// Simple returns p_t / p_{t-1} - 1. The leading row has no return and
    /// is dropped.
    pub fn returns(&self) -> Matrix {
        self.prices
            .windows(2)
            .map(|w| {
                w[1].iter()
                    .zip(w[0].iter())
                    .map(|(cur, prev)| *cur / *prev - Decimal::ONE)
                    .collect()
            })
            .collect()
    }
}

impl CovarianceMatrix {
    pub fn new(assets: Vec<String>, values: Matrix) -> AllocationResult<Self> {
        if values.len() != assets.len() || !is_square(&values) {
            return Err(AllocationError::invalid(
                "covariance",
                format!("Expected a {0}x{0} matrix", assets.len()),
            ));
        }
        Ok(CovarianceMatrix { assets, values })
    }

    pub fn n_assets(&self) -> usize {
        self.assets.len()
    }

    /// Per-asset variances.
    pub fn variances(&self) -> Vec<Decimal> {
        crate::linalg::diagonal_of(&self.values)
    }

    pub fn scaled(&self, factor: Decimal) -> CovarianceMatrix {
        CovarianceMatrix {
            assets: self.assets.clone(),
            values: crate::linalg::mat_scale(&self.values, factor),
        }
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Annualised sample covariance of simple returns (unbiased, n-1 divisor)
/// multiplied by `frequency` periods per year.
#[allow(clippy::needless_range_loop)]
pub fn sample_cov(prices: &PriceSeries, frequency: u32) -> AllocationResult<CovarianceMatrix> {
    prices.validate()?;
    if frequency == 0 {
        return Err(AllocationError::invalid(
            "frequency",
            "Frequency must be positive",
        ));
    }

    let returns = prices.returns();
    let t = returns.len();
    if t < 2 {
        return Err(AllocationError::InsufficientData(format!(
            "Need at least 2 return observations for a covariance estimate, got {}",
            t
        )));
    }

    let n = prices.assets.len();
    let t_dec = Decimal::from(t as u64);
    let means: Vec<Decimal> = (0..n)
        .map(|j| returns.iter().map(|r| r[j]).sum::<Decimal>() / t_dec)
        .collect();

    let divisor = Decimal::from((t - 1) as u64);
    let annual = Decimal::from(frequency);
    let mut cov = zeros(n, n);
    for i in 0..n {
        for j in i..n {
            let s: Decimal = returns
                .iter()
                .map(|r| (r[i] - means[i]) * (r[j] - means[j]))
                .sum();
            let c = s / divisor * annual;
            cov[i][j] = c;
            cov[j][i] = c;
        }
    }

    debug!(n_assets = n, n_returns = t, frequency, "sample covariance estimated");
    CovarianceMatrix::new(prices.assets.clone(), cov)
}

/// Normalise capitalisations to weights in `assets` order.
pub fn market_weights(
    market_caps: &BTreeMap<String, Decimal>,
    assets: &[String],
) -> AllocationResult<Vec<Decimal>> {
    for (asset, cap) in market_caps {
        if *cap < Decimal::ZERO {
            return Err(AllocationError::invalid(
                format!("market_caps.{}", asset),
                "Market capitalisation cannot be negative",
            ));
        }
    }
    let cap_assets: BTreeSet<&String> = market_caps.keys().collect();
    let cov_assets: BTreeSet<&String> = assets.iter().collect();
    if cap_assets != cov_assets {
        let missing: Vec<String> = cov_assets
            .difference(&cap_assets)
            .map(|s| s.to_string())
            .collect();
        let extra: Vec<String> = cap_assets
            .difference(&cov_assets)
            .map(|s| s.to_string())
            .collect();
        return Err(AllocationError::invalid(
            "market_caps",
            format!(
                "Asset sets disagree with covariance (missing caps: [{}], unexpected caps: [{}])",
                missing.join(", "),
                extra.join(", ")
            ),
        ));
    }

    let total: Decimal = market_caps.values().copied().sum();
    if total <= Decimal::ZERO {
        return Err(AllocationError::invalid(
            "market_caps",
            "Market capitalisations must sum to a positive value",
        ));
    }
    Ok(assets.iter().map(|a| market_caps[a] / total).collect())
}

/// Equilibrium returns pi = delta * Sigma * w_mkt.
pub fn market_implied_prior_returns(
    market_caps: &BTreeMap<String, Decimal>,
    cov: &CovarianceMatrix,
    risk_aversion: Decimal,
) -> AllocationResult<AssetReturns> {
    if risk_aversion <= Decimal::ZERO {
        return Err(AllocationError::invalid(
            "risk_aversion",
            "Risk aversion must be positive",
        ));
    }
    let w = market_weights(market_caps, &cov.assets)?;
    let pi: Vec<Decimal> = mat_vec_multiply(&cov.values, &w)
        .into_iter()
        .map(|x| risk_aversion * x)
        .collect();
    Ok(AssetReturns {
        assets: cov.assets.clone(),
        values: pi,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    fn names(xs: &[&str]) -> Vec<String> {
        xs.iter().map(|s| s.to_string()).collect()
    }

    fn two_asset_prices() -> PriceSeries {
        // Returns: A = [0.10, -0.10, 0.10], B = [0.05, 0.00, -0.05]
        PriceSeries::new(
            vec![day(1), day(2), day(3), day(4)],
            names(&["A", "B"]),
            vec![
                vec![dec!(100), dec!(100)],
                vec![dec!(110), dec!(105)],
                vec![dec!(99), dec!(105)],
                vec![dec!(108.9), dec!(99.75)],
            ],
        )
        .unwrap()
    }

    // -- sample_cov --

    #[test]
    fn test_sample_cov_matches_hand_computation() {
        let cov = sample_cov(&two_asset_prices(), 1).unwrap();
        // mean A = 1/30, deviations (0.0667, -0.1333, 0.0667)
        // var A = (0.004444 + 0.017778 + 0.004444) / 2 = 0.013333
        assert!((cov.values[0][0] - dec!(0.0133333333)).abs() < dec!(0.0000001));
        // var B = (0.0025 + 0 + 0.0025) / 2 = 0.0025
        assert!((cov.values[1][1] - dec!(0.0025)).abs() < dec!(0.0000001));
        // cov AB = (0.0667*0.05 + 0 + 0.0667*-0.05) / 2 = 0
        assert!(cov.values[0][1].abs() < dec!(0.0000001));
        assert_eq!(cov.values[0][1], cov.values[1][0]);
    }

    #[test]
    fn test_sample_cov_annualises_by_frequency() {
        let daily = sample_cov(&two_asset_prices(), 1).unwrap();
        let annual = sample_cov(&two_asset_prices(), 252).unwrap();
        assert_eq!(annual.values[1][1], daily.values[1][1] * dec!(252));
    }

    #[test]
    fn test_sample_cov_needs_two_returns() {
        let prices = PriceSeries::new(
            vec![day(1), day(2)],
            names(&["A"]),
            vec![vec![dec!(100)], vec![dec!(101)]],
        )
        .unwrap();
        let err = sample_cov(&prices, 252).unwrap_err();
        assert!(matches!(err, AllocationError::InsufficientData(_)));
        assert!(err.is_input_validation());
    }

    #[test]
    fn test_price_table_rejects_non_positive_price() {
        let result = PriceSeries::new(
            vec![day(1), day(2)],
            names(&["A"]),
            vec![vec![dec!(100)], vec![dec!(0)]],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_select_reorders_and_rejects_unknown() {
        let p = two_asset_prices();
        let sel = p.select(&names(&["B", "A"])).unwrap();
        assert_eq!(sel.prices[1], vec![dec!(105), dec!(110)]);

        match p.select(&names(&["C"])) {
            Err(AllocationError::UnknownLabel {
                label, available, ..
            }) => {
                assert_eq!(label, "C");
                assert_eq!(available, names(&["A", "B"]));
            }
            other => panic!("expected unknown label, got {:?}", other),
        }
    }

    // -- market_implied_prior_returns --

    #[test]
    fn test_prior_returns_reverse_optimisation() {
        let cov = CovarianceMatrix::new(
            names(&["A", "B"]),
            vec![
                vec![dec!(0.04), dec!(0.01)],
                vec![dec!(0.01), dec!(0.09)],
            ],
        )
        .unwrap();
        let caps = BTreeMap::from([("A".to_string(), dec!(300)), ("B".to_string(), dec!(100))]);
        let pi = market_implied_prior_returns(&caps, &cov, dec!(2)).unwrap();
        // w = (0.75, 0.25); Sigma w = (0.0325, 0.03); pi = 2 * that
        assert_eq!(pi.values, vec![dec!(0.065), dec!(0.06)]);
    }

    #[test]
    fn test_prior_rejects_mismatched_assets() {
        let cov = CovarianceMatrix::new(names(&["A"]), vec![vec![dec!(0.04)]]).unwrap();
        let caps = BTreeMap::from([("Z".to_string(), dec!(1))]);
        assert!(market_implied_prior_returns(&caps, &cov, dec!(2.5)).is_err());
    }

    #[test]
    fn test_prior_rejects_zero_total_cap() {
        let cov = CovarianceMatrix::new(names(&["A"]), vec![vec![dec!(0.04)]]).unwrap();
        let caps = BTreeMap::from([("A".to_string(), dec!(0))]);
        assert!(market_implied_prior_returns(&caps, &cov, dec!(2.5)).is_err());
    }
}
