// src/estimation/statistics.rs

use ndarray::Array1;

use crate::config::Statistic;
use crate::dataset::Individual;
use crate::transform::{station_biomass, GrowthParameters};
use crate::utils::{EstimationError, Result};

use super::length_frequency::station_length_frequency;

/// Per-station input to the weighted reduction.
#[derive(Debug, Clone, PartialEq)]
pub struct StationValue {
    /// Species seen at the station (within the length class, if any).
    pub present: bool,
    /// One value per output channel; scalar statistics have a single channel.
    pub values: Array1<f64>,
}

/// Everything a statistic needs besides the observations themselves.
#[derive(Debug, Clone, Copy)]
pub struct StatisticComputer<'a> {
    pub stat: Statistic,
    pub growth: Option<GrowthParameters>,
    pub bin_edges: &'a [f64],
}

impl<'a> StatisticComputer<'a> {
    pub fn new(stat: Statistic, growth: Option<GrowthParameters>, bin_edges: &'a [f64]) -> Result<Self> {
        if stat == Statistic::Biomass && growth.is_none() {
            return Err(EstimationError::InvalidInput(
                "biomass computer built without growth parameters".to_string(),
            ));
        }
        if stat == Statistic::LengthFrequency && bin_edges.len() < 2 {
            return Err(EstimationError::InvalidInput(
                "length frequency needs at least two bin edges".to_string(),
            ));
        }
        Ok(StatisticComputer { stat, growth, bin_edges })
    }

    pub fn n_channels(&self) -> usize {
        match self.stat {
            Statistic::LengthFrequency => self.bin_edges.len() - 1,
            _ => 1,
        }
    }

    pub fn station_value(&self, individuals: &[Individual]) -> Result<StationValue> {
        let count: f64 = individuals.iter().map(|ind| ind.num).sum();
        let present = count > 0.0;

        let values = match self.stat {
            Statistic::Density | Statistic::Abundance => Array1::from_elem(1, count),
            Statistic::Occurrence => Array1::from_elem(1, if present { 1.0 } else { 0.0 }),
            Statistic::Biomass => {
                let params = self
                    .growth
                    .as_ref()
                    .ok_or_else(|| EstimationError::InvalidInput("biomass without growth parameters".to_string()))?;
                Array1::from_elem(1, station_biomass(individuals, params)?)
            }
            Statistic::LengthFrequency => station_length_frequency(individuals, self.bin_edges)?,
        };

        Ok(StationValue { present, values })
    }
}
