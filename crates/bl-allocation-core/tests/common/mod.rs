#![allow(dead_code)]

use std::collections::BTreeMap;

use bl_allocation_core::factor_views::FactorExposures;
use bl_allocation_core::pipeline::MarketData;
use bl_allocation_core::prior::PriceSeries;
use bl_allocation_core::recipe::Recipe;
use chrono::{Days, NaiveDate};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

// ---------------------------------------------------------------------------
// Deterministic synthetic market
// ---------------------------------------------------------------------------
//
// Daily returns are drift + beta * common + idiosyncratic, where each series
// repeats a fixed pattern. Pattern lengths 10, 7, 11 and 13 are co-prime so
// the idiosyncratic parts decorrelate over 120 days. TSLA is an extra column
// outside the recipe universe.

const COMMON: [Decimal; 10] = [
    dec!(0.012),
    dec!(-0.008),
    dec!(0.005),
    dec!(-0.011),
    dec!(0.007),
    dec!(0.003),
    dec!(-0.006),
    dec!(0.009),
    dec!(-0.004),
    dec!(-0.007),
];

const IDIO_AAPL: [Decimal; 7] = [
    dec!(0.006),
    dec!(-0.004),
    dec!(0.009),
    dec!(-0.007),
    dec!(0.002),
    dec!(-0.008),
    dec!(0.003),
];

const IDIO_MSFT: [Decimal; 11] = [
    dec!(-0.005),
    dec!(0.007),
    dec!(-0.002),
    dec!(0.004),
    dec!(-0.009),
    dec!(0.006),
    dec!(0.001),
    dec!(-0.006),
    dec!(0.008),
    dec!(-0.003),
    dec!(-0.001),
];

const IDIO_GOOGL: [Decimal; 13] = [
    dec!(0.010),
    dec!(-0.006),
    dec!(0.004),
    dec!(-0.011),
    dec!(0.007),
    dec!(-0.002),
    dec!(0.005),
    dec!(-0.008),
    dec!(0.003),
    dec!(0.006),
    dec!(-0.009),
    dec!(0.002),
    dec!(-0.001),
];

pub const N_RETURNS: usize = 120;

fn daily_returns(t: usize) -> [Decimal; 4] {
    let f = COMMON[t % 10];
    [
        dec!(0.0008) + f + IDIO_AAPL[t % 7],
        dec!(0.0006) + dec!(0.9) * f + IDIO_MSFT[t % 11],
        dec!(0.0005) + dec!(1.2) * f + IDIO_GOOGL[t % 13],
        dec!(0.0010) + dec!(1.5) * f - IDIO_AAPL[t % 7],
    ]
}

pub fn names(xs: &[&str]) -> Vec<String> {
    xs.iter().map(|s| s.to_string()).collect()
}

/// 121 daily closes for AAPL, MSFT, GOOGL and TSLA starting at 100.
pub fn synthetic_prices() -> PriceSeries {
    let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    let dates: Vec<NaiveDate> = (0..=N_RETURNS as u64)
        .map(|d| start.checked_add_days(Days::new(d)).unwrap())
        .collect();

    let mut prices = vec![vec![dec!(100); 4]];
    for t in 0..N_RETURNS {
        let r = daily_returns(t);
        let prev = &prices[t];
        let row: Vec<Decimal> = (0..4)
            .map(|j| (prev[j] * (Decimal::ONE + r[j])).round_dp(6))
            .collect();
        prices.push(row);
    }
    PriceSeries::new(dates, names(&["AAPL", "MSFT", "GOOGL", "TSLA"]), prices).unwrap()
}

/// Factor columns deliberately ordered differently from the recipe.
pub fn exposures() -> FactorExposures {
    FactorExposures {
        assets: names(&["TSLA", "AAPL", "MSFT", "GOOGL"]),
        factors: names(&["Rates", "Growth"]),
        loadings: vec![
            vec![dec!(-0.6), dec!(1.8)],
            vec![dec!(-0.3), dec!(1.2)],
            vec![dec!(-0.2), dec!(0.8)],
            vec![dec!(-0.5), dec!(1.0)],
        ],
    }
}

pub fn market_data() -> MarketData {
    let mut market_caps = BTreeMap::new();
    market_caps.insert("AAPL".to_string(), dec!(3000));
    market_caps.insert("MSFT".to_string(), dec!(2800));
    market_caps.insert("GOOGL".to_string(), dec!(1800));
    market_caps.insert("TSLA".to_string(), dec!(800));
    MarketData {
        prices: synthetic_prices(),
        market_caps,
        factor_exposures: Some(exposures()),
    }
}

pub const TECH_RECIPE: &str = r#"{
    "meta": {"name": "Tech tilt", "description": "AAPL over MSFT"},
    "universe": {"assets": ["AAPL", "MSFT", "GOOGL"]},
    "model_parameters": {"tau": "0.05"},
    "constraints": {"long_only": true},
    "bottom_up_views": [
        {"label": "AAPL outperforms MSFT", "type": "relative", "asset_long": "AAPL",
         "asset_short": "MSFT", "expected_outperformance": "0.05", "confidence": "0.7"}
    ]
}"#;

pub const FACTOR_RECIPE: &str = r#"{
    "meta": {"name": "Growth shock"},
    "universe": {"assets": ["AAPL", "MSFT", "GOOGL"]},
    "model_parameters": {"tau": "0.05"},
    "top_down_views": {
        "factor_model": {"factors": ["Growth", "Rates"]},
        "factor_shocks": [{"factor": "Growth", "shock": "0.02", "confidence": "0.6"}]
    }
}"#;

pub fn recipe(json: &str) -> Recipe {
    Recipe::from_json(json).unwrap()
}

pub fn assert_close(actual: Decimal, expected: Decimal, tol: Decimal) {
    assert!(
        (actual - expected).abs() <= tol,
        "expected {} within {} of {}",
        actual,
        tol,
        expected
    );
}
