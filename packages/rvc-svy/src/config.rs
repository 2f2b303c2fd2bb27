// src/config.rs

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::transform::{GrowthParameters, LengthClassSpec};
use crate::utils::{EstimationError, Result};

/// Aggregation level of the output table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    Stratum,
    #[default]
    Domain,
}

impl Level {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "stratum" | "strat" => Some(Level::Stratum),
            "domain" => Some(Level::Domain),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Statistic {
    #[default]
    Density,
    Occurrence,
    Abundance,
    LengthFrequency,
    Biomass,
}

impl Statistic {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "density" => Some(Statistic::Density),
            "occurrence" | "occ" => Some(Statistic::Occurrence),
            "abundance" | "abun" => Some(Statistic::Abundance),
            "length_frequency" | "length_freq" | "lf" => Some(Statistic::LengthFrequency),
            "biomass" => Some(Statistic::Biomass),
            _ => None,
        }
    }

    /// Name of the statistic column in the output table.
    pub fn column_name(&self) -> &'static str {
        match self {
            Statistic::Density => "density",
            Statistic::Occurrence => "occurrence",
            Statistic::Abundance => "abundance",
            Statistic::LengthFrequency => "frequency",
            Statistic::Biomass => "biomass",
        }
    }

    /// Extrapolated totals are reported without dividing by the frame size.
    pub fn is_total(&self) -> bool {
        matches!(self, Statistic::Abundance)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimationConfig {
    pub level: Level,
    pub stat: Statistic,
    /// Condition on stations where the species was seen (NMTOT / nm weighting).
    pub when_present: bool,
    /// Pool protected and unprotected parts of a stratum in the output.
    pub merge_protected: bool,
    pub growth_parameters: HashMap<String, GrowthParameters>,
    /// Per-species breakpoint; empty means no length classes.
    pub length_class: HashMap<String, LengthClassSpec>,
    /// Edges of length-frequency bins in cm; `None` uses 1 cm bins.
    pub length_bins: Option<Vec<f64>>,
    pub finite_population_correction: bool,
}

impl EstimationConfig {
    pub fn new(level: Level, stat: Statistic) -> Self {
        EstimationConfig { level, stat, ..Default::default() }
    }

    pub fn from_json(s: &str) -> Result<Self> {
        let config: EstimationConfig = serde_json::from_str(s)
            .map_err(|e| EstimationError::InvalidInput(format!("invalid estimation config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.when_present && self.stat == Statistic::Occurrence {
            return Err(EstimationError::InvalidInput(
                "occurrence cannot be conditioned on presence".to_string(),
            ));
        }

        for (species, params) in &self.growth_parameters {
            params.validate().map_err(|e| {
                EstimationError::InvalidInput(format!("growth parameters for {}: {}", species, e))
            })?;
        }

        if let Some(edges) = &self.length_bins {
            if edges.len() < 2 {
                return Err(EstimationError::InvalidInput(
                    "length_bins needs at least two edges".to_string(),
                ));
            }
            if edges.iter().any(|e| !e.is_finite()) || edges.windows(2).any(|w| w[0] >= w[1]) {
                return Err(EstimationError::InvalidInput(
                    "length_bins must be finite and strictly increasing".to_string(),
                ));
            }
        }

        Ok(())
    }
}
