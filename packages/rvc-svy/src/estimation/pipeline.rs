// src/estimation/pipeline.rs

use std::collections::{BTreeMap, BTreeSet};

use polars::prelude::*;
use rayon::prelude::*;
use tracing::{debug, info};

use crate::config::{EstimationConfig, Level, Statistic};
use crate::dataset::{Individual, SurveyDataset, NMTOT, NTOT, PROT, SPECIES_CD, STRAT, YEAR};
use crate::transform::{partition, resolve_growth_parameters, GrowthParameters, LengthClass};
use crate::utils::{EstimationError, Result};

use super::length_frequency::default_bin_edges;
use super::reduction::{
    weighted_grouped_reduction, CellKey, DesignCell, GroupKey, GroupTotals, ReductionOptions,
};
use super::statistics::{StationValue, StatisticComputer};

/// Grouped totals of one species plus what is needed to label its rows.
#[derive(Debug, Clone)]
struct SpeciesTotals {
    groups: BTreeMap<GroupKey, GroupTotals>,
    breakpoint: Option<f64>,
    bin_edges: Vec<f64>,
}

/// Compute the configured statistic for every species in the dataset.
pub fn compute_statistic(dataset: &SurveyDataset, config: &EstimationConfig) -> Result<DataFrame> {
    config.validate()?;

    let sampled_years: BTreeSet<i64> = dataset.stations().keys().map(|d| d.year).collect();
    if config.when_present {
        for (design, frame) in dataset.frames() {
            if sampled_years.contains(&design.year) && frame.nmtot.is_none() {
                return Err(EstimationError::InvalidInput(format!(
                    "NMTOT missing for year {}, stratum {}, protection {}; required when present",
                    design.year, design.stratum, design.prot
                )));
            }
        }
    }

    info!(
        stat = ?config.stat,
        level = ?config.level,
        when_present = config.when_present,
        merge_protected = config.merge_protected,
        "computing statistic"
    );

    let species = dataset.species();
    let results = species
        .par_iter()
        .map(|sp| reduce_species(dataset, config, sp, &sampled_years))
        .collect::<Result<Vec<_>>>()?;

    build_output(config, &results)
}

fn reduce_species(
    dataset: &SurveyDataset,
    config: &EstimationConfig,
    species: &str,
    sampled_years: &BTreeSet<i64>,
) -> Result<SpeciesTotals> {
    let life_history = dataset.life_history(species);
    if life_history.is_none() {
        debug!(species, "no life history data");
    }

    let breakpoint = if config.length_class.is_empty() {
        None
    } else {
        let breakpoint_setting = config.length_class.get(species).ok_or_else(|| {
            EstimationError::InvalidInput(format!("no length class breakpoint for species {}", species))
        })?;
        Some(breakpoint_setting.resolve(species, life_history)?)
    };

    let growth: Option<GrowthParameters> = match config.stat {
        Statistic::Biomass => Some(resolve_growth_parameters(species, &config.growth_parameters, life_history)?),
        _ => None,
    };

    let bin_edges = match (config.stat, &config.length_bins) {
        (Statistic::LengthFrequency, Some(edges)) => edges.clone(),
        (Statistic::LengthFrequency, None) => default_bin_edges(dataset.max_length(species).unwrap_or(0.0))?,
        _ => Vec::new(),
    };

    let computer = StatisticComputer::new(config.stat, growth, &bin_edges)?;
    let classes = match breakpoint {
        Some(_) => vec![LengthClass::Below, LengthClass::AtOrAbove],
        None => vec![LengthClass::All],
    };

    let mut cells = Vec::new();
    for &class in &classes {
        for (design, stations) in dataset.stations() {
            cells.push(DesignCell {
                key: CellKey { species: species.to_string(), class, design: design.clone() },
                frame: dataset.frame(design)?,
                stations: stations.iter().map(|st| dataset.observations(species, design, st)).collect(),
            });
        }
    }

    let options = ReductionOptions {
        when_present: config.when_present,
        finite_population_correction: config.finite_population_correction,
        ..Default::default()
    };
    let group_of = |key: &CellKey| GroupKey::for_cell(key, config.level, config.merge_protected);
    let value_of = |key: &CellKey, obs: &[Individual]| -> Result<StationValue> {
        match (key.class, breakpoint) {
            (LengthClass::All, _) | (_, None) => computer.station_value(obs),
            (class, Some(b)) => {
                let parts = partition(obs, b)?;
                let selected = parts
                    .iter()
                    .find(|(c, _)| *c == class)
                    .map(|(_, inds)| inds.as_slice())
                    .unwrap_or(&[]);
                computer.station_value(selected)
            }
        }
    };

    let mut groups = weighted_grouped_reduction(&cells, computer.n_channels(), &options, group_of, value_of)?;

    // Possible but unsampled strata stay in the denominator of the groups they
    // belong to; a group made only of them is reported with n = 0.
    let mut unsampled: BTreeMap<GroupKey, GroupTotals> = BTreeMap::new();
    for (design, frame) in dataset.frames() {
        if dataset.stations().contains_key(design) || !sampled_years.contains(&design.year) {
            continue;
        }
        for &class in &classes {
            let key = group_of(&CellKey { species: species.to_string(), class, design: design.clone() });
            match groups.get_mut(&key) {
                Some(totals) => totals.absorb_frame(frame),
                None => unsampled
                    .entry(key)
                    .or_insert_with(|| GroupTotals::zeros(computer.n_channels()))
                    .absorb_frame(frame),
            }
        }
    }
    for (key, totals) in unsampled {
        let frame_total = if config.when_present { totals.nmtot } else { totals.ntot };
        if frame_total > 0.0 {
            groups.insert(key, totals);
        } else {
            debug!(group = %key.describe(), "unsampled group with an empty frame skipped");
        }
    }

    debug!(species, groups = groups.len(), cells = cells.len(), "species reduced");
    Ok(SpeciesTotals { groups, breakpoint, bin_edges })
}

fn sample_size(count: usize, key: &GroupKey) -> Result<u32> {
    u32::try_from(count).map_err(|_| {
        EstimationError::InvalidInput(format!("sample size {} of group {} overflows u32", count, key.describe()))
    })
}

fn build_output(config: &EstimationConfig, results: &[SpeciesTotals]) -> Result<DataFrame> {
    let length_classes = !config.length_class.is_empty();
    let length_freq = config.stat == Statistic::LengthFrequency;

    let mut species_col: Vec<String> = Vec::new();
    let mut year_col: Vec<i64> = Vec::new();
    let mut strat_col: Vec<Option<String>> = Vec::new();
    let mut prot_col: Vec<Option<i64>> = Vec::new();
    let mut class_col: Vec<Option<String>> = Vec::new();
    let mut length_col: Vec<f64> = Vec::new();
    let mut value_col: Vec<Option<f64>> = Vec::new();
    let mut var_col: Vec<Option<f64>> = Vec::new();
    let mut n_col: Vec<u32> = Vec::new();
    let mut nm_col: Vec<u32> = Vec::new();
    let mut ntot_col: Vec<f64> = Vec::new();
    let mut nmtot_col: Vec<f64> = Vec::new();

    for result in results {
        for (key, totals) in &result.groups {
            let est = totals.finalize(config.stat.is_total(), config.when_present, &key.describe())?;
            let n_channels = totals.yi.len();

            for c in 0..n_channels {
                species_col.push(key.species.clone());
                year_col.push(key.year);
                strat_col.push(key.stratum.clone());
                prot_col.push(key.prot);
                class_col.push(key.class.label(result.breakpoint));
                if length_freq {
                    length_col.push(result.bin_edges[c]);
                }
                value_col.push(est.estimate.as_ref().map(|e| e[c]));
                var_col.push(est.variance.as_ref().map(|v| v[c]));
                n_col.push(sample_size(totals.n, &key)?);
                nm_col.push(sample_size(totals.nm, &key)?);
                ntot_col.push(totals.ntot);
                nmtot_col.push(totals.nmtot);
            }
        }
    }

    let mut columns = vec![
        Column::new(SPECIES_CD.into(), species_col),
        Column::new(YEAR.into(), year_col),
    ];
    if config.level == Level::Stratum {
        columns.push(Column::new(STRAT.into(), strat_col));
    }
    if !config.merge_protected {
        columns.push(Column::new(PROT.into(), prot_col));
    }
    if length_classes {
        columns.push(Column::new("length_class".into(), class_col));
    }
    if length_freq {
        columns.push(Column::new("length".into(), length_col));
    }
    columns.push(Column::new(config.stat.column_name().into(), value_col));
    columns.push(Column::new("var".into(), var_col));
    columns.push(Column::new("n".into(), n_col));
    columns.push(Column::new("nm".into(), nm_col));
    columns.push(Column::new(NTOT.into(), ntot_col));
    if config.when_present {
        columns.push(Column::new(NMTOT.into(), nmtot_col));
    }

    let out = DataFrame::new(columns)?;
    info!(rows = out.height(), "statistic computed");
    Ok(out)
}
