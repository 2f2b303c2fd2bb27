// src/estimation/reduction.rs
//! Weighted grouped reduction shared by every statistic.
//!
//! Each design stratum (year x stratum x protection) is reduced on its own:
//! station values are expanded by `wh = NTOT / n` into a weighted total and
//! a stratified variance. Stratum results are then summed into output
//! groups, so a group's estimate is
//!
//! ```text
//!   yi  = sum_h wh * sum_i y_hi
//!   var = sum_h wh^2 * sum_i n_h/(n_h-1) * (y_hi - ybar_h)^2
//! ```
//!
//! reported as `yi / NTOT` and `var / NTOT^2` for rates, or as-is for totals.

use std::collections::BTreeMap;

use ndarray::{Array1, Array2, ArrayView1};
use tracing::trace;

use crate::config::Level;
use crate::dataset::{DesignStratum, Individual, StratumFrame};
use crate::transform::LengthClass;
use crate::utils::{variance_contributions, EstimationError, Result};
use crate::weighting::stratum_weights;

use super::statistics::StationValue;

/// Per-unit variance expression: returns the sample mean and one optional
/// contribution per unit.
pub type VarianceFn = fn(ArrayView1<f64>) -> (f64, Vec<Option<f64>>);

#[derive(Debug, Clone, Copy)]
pub struct ReductionOptions {
    pub when_present: bool,
    pub finite_population_correction: bool,
    pub variance: VarianceFn,
}

impl Default for ReductionOptions {
    fn default() -> Self {
        ReductionOptions {
            when_present: false,
            finite_population_correction: false,
            variance: variance_contributions,
        }
    }
}

/// Identifies the sampled stations of one species and length class in one
/// design stratum.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CellKey {
    pub species: String,
    pub class: LengthClass,
    pub design: DesignStratum,
}

/// Output row key; fields dropped by the level or by merging are `None`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupKey {
    pub species: String,
    pub year: i64,
    pub stratum: Option<String>,
    pub prot: Option<i64>,
    pub class: LengthClass,
}

impl GroupKey {
    pub fn for_cell(cell: &CellKey, level: Level, merge_protected: bool) -> Self {
        GroupKey {
            species: cell.species.clone(),
            year: cell.design.year,
            stratum: match level {
                Level::Stratum => Some(cell.design.stratum.clone()),
                Level::Domain => None,
            },
            prot: if merge_protected { None } else { Some(cell.design.prot) },
            class: cell.class,
        }
    }

    pub fn describe(&self) -> String {
        let mut s = format!("{} {}", self.species, self.year);
        if let Some(stratum) = &self.stratum {
            s.push_str(&format!(" stratum {}", stratum));
        }
        if let Some(prot) = self.prot {
            s.push_str(&format!(" prot {}", prot));
        }
        s
    }
}

/// Stations of one design stratum, as slices of their observations.
#[derive(Debug, Clone)]
pub struct DesignCell<'a> {
    pub key: CellKey,
    pub frame: &'a StratumFrame,
    pub stations: Vec<&'a [Individual]>,
}

/// Weighted totals accumulated over the strata of one group.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupTotals {
    pub ntot: f64,
    pub nmtot: f64,
    pub n: usize,
    pub nm: usize,
    pub yi: Array1<f64>,
    pub var: Array1<f64>,
}

/// Reported estimate of one group; `None` when no station contributed.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupEstimate {
    pub estimate: Option<Array1<f64>>,
    pub variance: Option<Array1<f64>>,
}

impl GroupTotals {
    pub fn zeros(n_channels: usize) -> Self {
        GroupTotals {
            ntot: 0.0,
            nmtot: 0.0,
            n: 0,
            nm: 0,
            yi: Array1::zeros(n_channels),
            var: Array1::zeros(n_channels),
        }
    }

    /// Fold another partial total into this one.
    pub fn absorb(&mut self, other: &GroupTotals) {
        self.ntot += other.ntot;
        self.nmtot += other.nmtot;
        self.n += other.n;
        self.nm += other.nm;
        self.yi += &other.yi;
        self.var += &other.var;
    }

    /// Add a possible-but-unsampled stratum: it enlarges the frame only.
    pub fn absorb_frame(&mut self, frame: &StratumFrame) {
        self.ntot += frame.ntot;
        self.nmtot += frame.nmtot.unwrap_or(0.0);
    }

    pub fn finalize(&self, is_total: bool, when_present: bool, label: &str) -> Result<GroupEstimate> {
        let (frame_total, contributing) = if when_present { (self.nmtot, self.nm) } else { (self.ntot, self.n) };

        if frame_total <= 0.0 {
            return Err(EstimationError::EmptyGroup(label.to_string()));
        }
        if contributing == 0 {
            return Ok(GroupEstimate { estimate: None, variance: None });
        }

        let (estimate, variance) = if is_total {
            (self.yi.clone(), self.var.clone())
        } else {
            (&self.yi / frame_total, &self.var / frame_total.powi(2))
        };
        Ok(GroupEstimate { estimate: Some(estimate), variance: Some(variance) })
    }
}

/// Reduce one design stratum to its weighted total and variance.
pub fn reduce_cell(
    frame: &StratumFrame,
    stations: &[StationValue],
    n_channels: usize,
    options: &ReductionOptions,
) -> Result<GroupTotals> {
    let n = stations.len();
    let nm = stations.iter().filter(|s| s.present).count();
    let mut totals = GroupTotals::zeros(n_channels);
    totals.ntot = frame.ntot;
    totals.nmtot = frame.nmtot.unwrap_or(0.0);
    totals.n = n;
    totals.nm = nm;

    // No presence leaves the when-present weight undefined: the stratum keeps
    // its frame size but adds nothing to the totals.
    let conditioned_empty = options.when_present && nm == 0;
    let weights = stratum_weights(frame, n, nm, options.when_present && !conditioned_empty)?;
    if conditioned_empty {
        if frame.nmtot.is_none() {
            return Err(EstimationError::InvalidInput(
                "NMTOT is required for when-present estimates".to_string(),
            ));
        }
        return Ok(totals);
    }

    let (used, weight, frame_size): (Vec<&StationValue>, f64, f64) = match weights.wh_m {
        Some(wh_m) => (
            stations.iter().filter(|s| s.present).collect(),
            wh_m,
            frame.nmtot.unwrap_or(0.0),
        ),
        None => (stations.iter().collect(), weights.wh, frame.ntot),
    };

    let k = used.len();
    let mut y: Array2<f64> = Array2::zeros((k, n_channels));
    for (i, station) in used.iter().enumerate() {
        if station.values.len() != n_channels {
            return Err(EstimationError::InvalidInput(format!(
                "station has {} channels, expected {}",
                station.values.len(),
                n_channels
            )));
        }
        y.row_mut(i).assign(&station.values);
    }

    let fpc = if options.finite_population_correction { 1.0 - k as f64 / frame_size } else { 1.0 };

    for c in 0..n_channels {
        let column = y.column(c);
        let (_, contributions) = (options.variance)(column);
        let sum_var: f64 = contributions.iter().flatten().sum();
        totals.yi[c] = weight * column.sum();
        totals.var[c] = weight.powi(2) * sum_var * fpc;
    }

    trace!(n, nm, weight, "design stratum reduced");
    Ok(totals)
}

/// Weighted grouped reduction.
///
/// `value_of` maps a station's observations to its channel values and
/// `group_of` maps each design stratum to the output group it pools into.
/// The sum over cells is commutative, so the result does not depend on the
/// order of `cells`.
pub fn weighted_grouped_reduction<K, G, V>(
    cells: &[DesignCell<'_>],
    n_channels: usize,
    options: &ReductionOptions,
    group_of: G,
    value_of: V,
) -> Result<BTreeMap<K, GroupTotals>>
where
    K: Ord,
    G: Fn(&CellKey) -> K,
    V: Fn(&CellKey, &[Individual]) -> Result<StationValue>,
{
    let mut groups: BTreeMap<K, GroupTotals> = BTreeMap::new();

    for cell in cells {
        let values = cell
            .stations
            .iter()
            .map(|obs| value_of(&cell.key, obs))
            .collect::<Result<Vec<_>>>()?;
        let totals = reduce_cell(cell.frame, &values, n_channels, options)?;

        groups
            .entry(group_of(&cell.key))
            .or_insert_with(|| GroupTotals::zeros(n_channels))
            .absorb(&totals);
    }

    Ok(groups)
}
