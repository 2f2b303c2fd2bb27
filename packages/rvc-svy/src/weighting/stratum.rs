// src/weighting/stratum.rs

use crate::dataset::StratumFrame;
use crate::utils::{EstimationError, Result};

/// Expansion weights of one design stratum.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StratumWeights {
    /// `NTOT / n`
    pub wh: f64,
    /// `NMTOT / nm`, only computed for when-present estimates
    pub wh_m: Option<f64>,
}

/// Expansion weight `total / sampled`.
///
/// Zero sampled units leave the weight undefined; callers are expected to
/// exclude unsampled strata instead of relying on a zero or infinite weight.
pub fn expansion_weight(total: f64, sampled: usize, label: &str) -> Result<f64> {
    if sampled == 0 {
        return Err(EstimationError::DivisionUndefined(format!(
            "{} has no sampled stations",
            label
        )));
    }
    if total < sampled as f64 {
        return Err(EstimationError::InvalidInput(format!(
            "{} frame size {} is smaller than its sample size {}",
            label, total, sampled
        )));
    }
    Ok(total / sampled as f64)
}

/// Compute `wh` and, when requested, `wh_m` for a design stratum with `n`
/// sampled stations of which `nm` had the species present.
pub fn stratum_weights(frame: &StratumFrame, n: usize, nm: usize, when_present: bool) -> Result<StratumWeights> {
    let wh = expansion_weight(frame.ntot, n, "NTOT")?;

    let wh_m = if when_present {
        let nmtot = frame.nmtot.ok_or_else(|| {
            EstimationError::InvalidInput("NMTOT is required for when-present estimates".to_string())
        })?;
        Some(expansion_weight(nmtot, nm, "NMTOT")?)
    } else {
        None
    };

    Ok(StratumWeights { wh, wh_m })
}
