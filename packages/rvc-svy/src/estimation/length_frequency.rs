// src/estimation/length_frequency.rs
//! Per-station length composition as a triangular distribution.

use ndarray::Array1;
use statrs::distribution::{ContinuousCDF, Triangular};

use crate::dataset::Individual;
use crate::utils::{EstimationError, Result};

/// Count-weighted median of observed lengths.
///
/// Returns the smallest length whose cumulative share reaches one half; when
/// the share lands exactly on one half the two neighbouring lengths are
/// averaged.
pub fn weighted_median(individuals: &[Individual]) -> Option<f64> {
    let mut pairs: Vec<(f64, f64)> = individuals
        .iter()
        .filter(|ind| ind.num > 0.0)
        .filter_map(|ind| Some((ind.len?, ind.num)))
        .collect();

    if pairs.is_empty() {
        return None;
    }

    pairs.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

    let total: f64 = pairs.iter().map(|(_, w)| w).sum();
    let mut cumsum = 0.0;
    for (i, &(len, w)) in pairs.iter().enumerate() {
        cumsum += w;
        let cdf = cumsum / total;
        if (cdf - 0.5).abs() < 1e-12 && i + 1 < pairs.len() {
            return Some((len + pairs[i + 1].0) / 2.0);
        }
        if cdf > 0.5 {
            return Some(len);
        }
    }
    pairs.last().map(|(len, _)| *len)
}

/// Triangular distribution anchored at the min, median and max length.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriangularFit {
    pub min: f64,
    pub mode: f64,
    pub max: f64,
}

impl TriangularFit {
    /// Fit from a station's observations; `None` when nothing was measured.
    pub fn from_individuals(individuals: &[Individual]) -> Option<Self> {
        let lengths = individuals.iter().filter(|ind| ind.num > 0.0).filter_map(|ind| ind.len);
        let (min, max) = lengths.fold(None, |acc: Option<(f64, f64)>, l| match acc {
            None => Some((l, l)),
            Some((lo, hi)) => Some((lo.min(l), hi.max(l))),
        })?;
        let mode = weighted_median(individuals)?.clamp(min, max);
        Some(TriangularFit { min, mode, max })
    }

    fn distribution(&self) -> Result<Triangular> {
        Triangular::new(self.min, self.max, self.mode).map_err(|e| {
            EstimationError::InvalidInput(format!(
                "triangular fit ({}, {}, {}): {}",
                self.min, self.mode, self.max, e
            ))
        })
    }

    /// `P(X < x)`. A degenerate fit is a point mass at `min`.
    pub fn prob_below(&self, x: f64) -> Result<f64> {
        if self.min == self.max {
            return Ok(if x > self.min { 1.0 } else { 0.0 });
        }
        Ok(self.distribution()?.cdf(x))
    }

    /// Probability of each half-open bin `[edges[i], edges[i+1])`.
    pub fn bin_probabilities(&self, edges: &[f64]) -> Result<Array1<f64>> {
        let below: Vec<f64> = if self.min == self.max {
            edges.iter().map(|&e| if e > self.min { 1.0 } else { 0.0 }).collect()
        } else {
            let dist = self.distribution()?;
            edges.iter().map(|&e| dist.cdf(e)).collect()
        };
        Ok(Array1::from_iter(below.windows(2).map(|w| (w[1] - w[0]).max(0.0))))
    }
}

/// Expected count of a station in each length bin.
///
/// Every positive count needs a length; an unmeasured count is an error
/// rather than a silent loss of individuals from the curve.
pub fn station_length_frequency(individuals: &[Individual], edges: &[f64]) -> Result<Array1<f64>> {
    let n_bins = edges.len().saturating_sub(1);
    if let Some(ind) = individuals.iter().find(|ind| ind.num > 0.0 && ind.len.is_none()) {
        return Err(EstimationError::InvalidInput(format!(
            "{} individuals recorded without a length; length frequency needs lengths",
            ind.num
        )));
    }
    let total: f64 = individuals.iter().map(|ind| ind.num).sum();
    match TriangularFit::from_individuals(individuals) {
        Some(fit) if total > 0.0 => Ok(fit.bin_probabilities(edges)? * total),
        _ => Ok(Array1::zeros(n_bins)),
    }
}

/// Most default 1 cm bins a species may produce before explicit edges are required.
pub const MAX_DEFAULT_BINS: usize = 10_000;

/// 1 cm bins from 0 up to one past the largest length.
pub fn default_bin_edges(max_length: f64) -> Result<Vec<f64>> {
    let upper = max_length.max(0.0).floor() + 1.0;
    if !upper.is_finite() || upper > MAX_DEFAULT_BINS as f64 {
        return Err(EstimationError::InvalidInput(format!(
            "largest length {} needs more than {} default bins; pass explicit length bins",
            max_length, MAX_DEFAULT_BINS
        )));
    }
    Ok((0..=upper as usize).map(|e| e as f64).collect())
}
