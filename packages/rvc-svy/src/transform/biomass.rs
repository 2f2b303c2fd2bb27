// src/transform/biomass.rs

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dataset::{Individual, LifeHistory};
use crate::utils::{EstimationError, Result};

/// Allometric length-weight coefficients: `mass = a * length^b`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GrowthParameters {
    pub a: f64,
    pub b: f64,
}

impl GrowthParameters {
    pub fn new(a: f64, b: f64) -> Result<Self> {
        let params = GrowthParameters { a, b };
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.a.is_finite() && self.a > 0.0) {
            return Err(EstimationError::InvalidInput(format!(
                "growth coefficient a must be positive, got {}",
                self.a
            )));
        }
        if !self.b.is_finite() {
            return Err(EstimationError::InvalidInput(format!(
                "growth exponent b must be finite, got {}",
                self.b
            )));
        }
        Ok(())
    }

    #[inline]
    pub fn mass(&self, length: f64) -> f64 {
        self.a * length.powf(self.b)
    }
}

/// Caller-supplied parameters win; otherwise fall back to the life history row.
pub fn resolve_growth_parameters(
    species: &str,
    supplied: &HashMap<String, GrowthParameters>,
    life_history: Option<&LifeHistory>,
) -> Result<GrowthParameters> {
    if let Some(params) = supplied.get(species) {
        return Ok(*params);
    }

    match life_history.and_then(|lh| lh.wlen_a.zip(lh.wlen_b)) {
        Some((a, b)) => {
            debug!(species, a, b, "growth parameters taken from life history data");
            GrowthParameters::new(a, b)
        }
        None => Err(EstimationError::MissingGrowthParameters(species.to_string())),
    }
}

/// Total mass of the individuals recorded at one station.
pub fn station_biomass(individuals: &[Individual], params: &GrowthParameters) -> Result<f64> {
    let mut total = 0.0;
    for ind in individuals {
        if ind.num == 0.0 {
            continue;
        }
        let length = ind.len.ok_or_else(|| {
            EstimationError::InvalidInput(format!(
                "{} individuals recorded without a length; biomass needs lengths",
                ind.num
            ))
        })?;
        total += ind.num * params.mass(length);
    }
    Ok(total)
}
