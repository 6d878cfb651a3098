//! Merge bottom-up and top-down view families into one (P, Q, Omega).

use rust_decimal::Decimal;
use tracing::debug;

use crate::error::AllocationError;
use crate::linalg::block_diagonal;
use crate::views::ViewMatrices;
use crate::AllocationResult;

/// Outcome of combining view families.
#[derive(Debug, Clone, PartialEq)]
pub enum CombinedViews {
    /// No views at all: optimise directly on the prior.
    PriorOnly,
    Views(ViewMatrices),
}

impl CombinedViews {
    pub fn n_views(&self) -> usize {
        match self {
            CombinedViews::PriorOnly => 0,
            CombinedViews::Views(vm) => vm.n_views(),
        }
    }
}

fn check_shape(vm: &ViewMatrices, family: &str) -> AllocationResult<()> {
    let k = vm.q.len();
    if vm.p.len() != k || vm.omega.len() != k || vm.omega.iter().any(|r| r.len() != k) {
        return Err(AllocationError::invalid(
            family,
            format!(
                "Inconsistent view system: P has {} rows, Q {} entries, Omega {} rows",
                vm.p.len(),
                k,
                vm.omega.len()
            ),
        ));
    }
    Ok(())
}

/// Stack P vertically, concatenate Q and put the two Omega blocks on the
/// diagonal (zero cross-family covariance). A single family passes
/// through untouched; empty families are ignored.
pub fn combine_views(
    bottom_up: Option<&ViewMatrices>,
    top_down: Option<&ViewMatrices>,
) -> AllocationResult<CombinedViews> {
    let bottom_up = bottom_up.filter(|vm| vm.n_views() > 0);
    let top_down = top_down.filter(|vm| vm.n_views() > 0);

    let combined = match (bottom_up, top_down) {
        (None, None) => CombinedViews::PriorOnly,
        (Some(b), None) => {
            check_shape(b, "bottom_up_views")?;
            CombinedViews::Views(b.clone())
        }
        (None, Some(t)) => {
            check_shape(t, "top_down_views")?;
            CombinedViews::Views(t.clone())
        }
        (Some(b), Some(t)) => {
            check_shape(b, "bottom_up_views")?;
            check_shape(t, "top_down_views")?;
            if b.n_assets() != t.n_assets() {
                return Err(AllocationError::invalid(
                    "views",
                    format!(
                        "Bottom-up views cover {} assets but top-down views cover {}",
                        b.n_assets(),
                        t.n_assets()
                    ),
                ));
            }
            let mut p = b.p.clone();
            p.extend(t.p.iter().cloned());
            let mut q: Vec<Decimal> = b.q.clone();
            q.extend(t.q.iter().copied());
            CombinedViews::Views(ViewMatrices {
                p,
                q,
                omega: block_diagonal(&b.omega, &t.omega),
            })
        }
    };

    debug!(
        n_bottom_up = bottom_up.map(|v| v.n_views()).unwrap_or(0),
        n_top_down = top_down.map(|v| v.n_views()).unwrap_or(0),
        n_combined = combined.n_views(),
        "view families combined"
    );
    Ok(combined)
}
