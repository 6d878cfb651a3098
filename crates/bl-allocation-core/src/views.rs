//! Investor views and their translation into the Black-Litterman
//! pick matrix P, view vector Q and uncertainty matrix Omega.
//!
//! Uncertainty convention: for every view row k,
//! `Omega[k][k] = tau * (P Sigma P')[k][k] / max(confidence_k, CONFIDENCE_FLOOR)`.
//! The same proportional form is used by the factor transformer.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::AllocationError;
use crate::linalg::{mat_multiply, mat_transpose, zeros};
use crate::prior::CovarianceMatrix;
use crate::types::Matrix;
use crate::AllocationResult;

/// Lower bound on confidence when dividing; a zero-confidence view gets a
/// very large (but finite) variance.
pub const CONFIDENCE_FLOOR: Decimal = dec!(0.0000000001);

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// "Asset X will return r".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbsoluteView {
    pub asset: String,
    pub expected_return: Decimal,
    pub confidence: Decimal,
}

/// "Asset X will outperform asset Y by d".
///
/// Also accepts the pair form `{"assets": [x, y], "weights": [1, -1]}`,
/// where the positively weighted asset is the long leg.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RelativeViewDoc")]
pub struct RelativeView {
    pub asset_long: String,
    pub asset_short: String,
    pub expected_outperformance: Decimal,
    pub confidence: Decimal,
}

#[derive(Deserialize)]
struct RelativeViewDoc {
    asset_long: Option<String>,
    asset_short: Option<String>,
    assets: Option<Vec<String>>,
    weights: Option<Vec<Decimal>>,
    expected_outperformance: Decimal,
    confidence: Decimal,
}

impl TryFrom<RelativeViewDoc> for RelativeView {
    type Error = String;

    fn try_from(doc: RelativeViewDoc) -> Result<Self, Self::Error> {
        let (asset_long, asset_short) = match (doc.asset_long, doc.asset_short, doc.assets) {
            (Some(long), Some(short), _) => (long, short),
            (None, None, Some(pair)) => {
                let [first, second]: [String; 2] = pair
                    .try_into()
                    .map_err(|_| "relative view 'assets' must name exactly two assets".to_string())?;
                match doc.weights.as_deref() {
                    None => (first, second),
                    Some([a, b]) if *a > Decimal::ZERO && *b < Decimal::ZERO => (first, second),
                    Some([a, b]) if *a < Decimal::ZERO && *b > Decimal::ZERO => (second, first),
                    Some(_) => {
                        return Err(
                            "relative view 'weights' must be one positive and one negative entry"
                                .to_string(),
                        )
                    }
                }
            }
            _ => {
                return Err(
                    "relative view needs 'asset_long' and 'asset_short' (or an 'assets' pair)"
                        .to_string(),
                )
            }
        };
        Ok(RelativeView {
            asset_long,
            asset_short,
            expected_outperformance: doc.expected_outperformance,
            confidence: doc.confidence,
        })
    }
}

/// A shock to one macro factor, by index into the exposure matrix columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorView {
    pub factor_index: usize,
    pub shock: Decimal,
    pub confidence: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum View {
    Absolute(AbsoluteView),
    Relative(RelativeView),
    FactorShock(FactorView),
}

/// The (P, Q, Omega) triple for one family of views.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewMatrices {
    pub p: Matrix,
    pub q: Vec<Decimal>,
    pub omega: Matrix,
}

impl ViewMatrices {
    pub fn n_views(&self) -> usize {
        self.q.len()
    }

    pub fn n_assets(&self) -> usize {
        self.p.first().map(|r| r.len()).unwrap_or(0)
    }
}

impl View {
    pub fn confidence(&self) -> Decimal {
        match self {
            View::Absolute(v) => v.confidence,
            View::Relative(v) => v.confidence,
            View::FactorShock(v) => v.confidence,
        }
    }

    /// Expected return, outperformance or shock, depending on the variant.
    pub fn magnitude(&self) -> Decimal {
        match self {
            View::Absolute(v) => v.expected_return,
            View::Relative(v) => v.expected_outperformance,
            View::FactorShock(v) => v.shock,
        }
    }

    pub fn with_magnitude(&self, magnitude: Decimal) -> View {
        let mut out = self.clone();
        match &mut out {
            View::Absolute(v) => v.expected_return = magnitude,
            View::Relative(v) => v.expected_outperformance = magnitude,
            View::FactorShock(v) => v.shock = magnitude,
        }
        out
    }

    pub fn with_confidence(&self, confidence: Decimal) -> View {
        let mut out = self.clone();
        match &mut out {
            View::Absolute(v) => v.confidence = confidence,
            View::Relative(v) => v.confidence = confidence,
            View::FactorShock(v) => v.confidence = confidence,
        }
        out
    }

    pub fn validate(&self, field: &str) -> AllocationResult<()> {
        validate_confidence(self.confidence(), &format!("{}.confidence", field))?;
        if let View::Relative(v) = self {
            if v.asset_long == v.asset_short {
                return Err(AllocationError::invalid(
                    field,
                    format!("Relative view compares '{}' with itself", v.asset_long),
                ));
            }
        }
        Ok(())
    }
}

pub(crate) fn validate_confidence(confidence: Decimal, field: &str) -> AllocationResult<()> {
    if confidence < Decimal::ZERO || confidence > Decimal::ONE {
        return Err(AllocationError::invalid(
            field,
            format!("Confidence must be in [0, 1], got {}", confidence),
        ));
    }
    Ok(())
}

fn asset_index(assets: &[String], asset: &str) -> AllocationResult<usize> {
    assets
        .iter()
        .position(|a| a == asset)
        .ok_or_else(|| AllocationError::unknown_label("asset", asset, assets))
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// One row per view: +1 on the asset of an absolute view, +1/-1 on the
/// long/short legs of a relative view.
pub fn build_p_matrix(views: &[View], assets: &[String]) -> AllocationResult<Matrix> {
    let mut p = zeros(views.len(), assets.len());
    for (k, view) in views.iter().enumerate() {
        match view {
            View::Absolute(v) => {
                p[k][asset_index(assets, &v.asset)?] = Decimal::ONE;
            }
            View::Relative(v) => {
                let long = asset_index(assets, &v.asset_long)?;
                let short = asset_index(assets, &v.asset_short)?;
                p[k][long] = Decimal::ONE;
                p[k][short] = -Decimal::ONE;
            }
            View::FactorShock(_) => {
                return Err(AllocationError::invalid(
                    format!("views[{}]", k),
                    "Factor shocks are translated by the factor transformer, not as asset views",
                ));
            }
        }
    }
    Ok(p)
}

/// View magnitudes in view order.
pub fn build_q_vector(views: &[View]) -> Vec<Decimal> {
    views.iter().map(|v| v.magnitude()).collect()
}

/// Diagonal Omega with `tau * (P Sigma P')_kk / max(c_k, floor)`.
pub fn build_omega(
    views: &[View],
    p: &[Vec<Decimal>],
    cov: &[Vec<Decimal>],
    tau: Decimal,
) -> AllocationResult<Matrix> {
    if tau <= Decimal::ZERO {
        return Err(AllocationError::invalid("tau", "Tau must be positive"));
    }
    if p.len() != views.len() {
        return Err(AllocationError::invalid(
            "views",
            format!("{} views but {} pick rows", views.len(), p.len()),
        ));
    }
    let view_cov = mat_multiply(&mat_multiply(p, cov), &mat_transpose(p));
    let mut omega = zeros(views.len(), views.len());
    for (k, view) in views.iter().enumerate() {
        let c = view.confidence().max(CONFIDENCE_FLOOR);
        omega[k][k] = tau * view_cov[k][k] / c;
    }
    Ok(omega)
}

/// Validate and translate asset-level views into (P, Q, Omega).
pub fn translate_views(
    views: &[View],
    cov: &CovarianceMatrix,
    tau: Decimal,
) -> AllocationResult<ViewMatrices> {
    for (k, view) in views.iter().enumerate() {
        view.validate(&format!("views[{}]", k))?;
    }
    let p = build_p_matrix(views, &cov.assets)?;
    let q = build_q_vector(views);
    let omega = build_omega(views, &p, &cov.values, tau)?;
    debug!(
        n_views = views.len(),
        n_assets = cov.n_assets(),
        "bottom-up views translated"
    );
    Ok(ViewMatrices { p, q, omega })
}
