// src/dataset.rs
//! Validated bundle of sample, stratum and life history tables.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use polars::prelude::*;
use tracing::{debug, info};

use crate::utils::{f64_values, i64_values, require_columns, str_values, EstimationError, Result};

pub const YEAR: &str = "YEAR";
pub const STRAT: &str = "STRAT";
pub const PROT: &str = "PROT";
pub const STATION_NR: &str = "STATION_NR";
pub const SPECIES_CD: &str = "SPECIES_CD";
pub const NUM: &str = "NUM";
pub const LEN: &str = "LEN";
pub const NTOT: &str = "NTOT";
pub const NMTOT: &str = "NMTOT";
pub const LC: &str = "LC";
pub const LM: &str = "LM";
pub const WLEN_A: &str = "WLEN_A";
pub const WLEN_B: &str = "WLEN_B";

/// A design stratum: the unit inside which stations were sampled at random.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DesignStratum {
    pub year: i64,
    pub stratum: String,
    pub prot: i64,
}

/// Sampling frame of one design stratum.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StratumFrame {
    pub ntot: f64,
    pub nmtot: Option<f64>,
}

/// Count of individuals recorded at one length (length absent on zero rows).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Individual {
    pub num: f64,
    pub len: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LifeHistory {
    pub lc: Option<f64>,
    pub lm: Option<f64>,
    pub wlen_a: Option<f64>,
    pub wlen_b: Option<f64>,
}

/// A station within its design stratum.
pub type StationKey = (DesignStratum, String);

#[derive(Debug, Clone)]
pub struct SurveyDataset {
    sample_data: DataFrame,
    stratum_data: DataFrame,
    lhp_data: Option<DataFrame>,
    stations: BTreeMap<DesignStratum, BTreeSet<String>>,
    observations: HashMap<String, HashMap<StationKey, Vec<Individual>>>,
    frames: BTreeMap<DesignStratum, StratumFrame>,
    life_history: HashMap<String, LifeHistory>,
}

impl SurveyDataset {
    /// Validate and index the three tables.
    ///
    /// Fails on missing columns, null keys or counts, negative counts,
    /// duplicate stratum rows, and sample rows whose design stratum has no
    /// `stratum_data` row. A null `SPECIES_CD` records a station where
    /// nothing was seen.
    pub fn new(sample_data: DataFrame, stratum_data: DataFrame, lhp_data: Option<DataFrame>) -> Result<Self> {
        require_columns(&sample_data, "sample_data", &[YEAR, STRAT, PROT, STATION_NR, SPECIES_CD, NUM, LEN])?;
        require_columns(&stratum_data, "stratum_data", &[YEAR, STRAT, PROT, NTOT])?;
        if let Some(lhp) = &lhp_data {
            require_columns(lhp, "lhp_data", &[SPECIES_CD, LC, LM, WLEN_A, WLEN_B])?;
        }

        let frames = index_frames(&stratum_data)?;
        let (stations, observations) = index_sample(&sample_data)?;

        for design in stations.keys() {
            if !frames.contains_key(design) {
                return Err(EstimationError::MissingStratumMetadata {
                    year: design.year,
                    stratum: design.stratum.clone(),
                    prot: design.prot,
                });
            }
        }

        let life_history = match &lhp_data {
            Some(lhp) => index_life_history(lhp)?,
            None => HashMap::new(),
        };

        info!(
            rows = sample_data.height(),
            design_strata = stations.len(),
            frames = frames.len(),
            species = observations.len(),
            "survey dataset validated"
        );

        Ok(SurveyDataset { sample_data, stratum_data, lhp_data, stations, observations, frames, life_history })
    }

    pub fn sample_data(&self) -> &DataFrame {
        &self.sample_data
    }

    pub fn stratum_data(&self) -> &DataFrame {
        &self.stratum_data
    }

    pub fn lhp_data(&self) -> Option<&DataFrame> {
        self.lhp_data.as_ref()
    }

    /// Species codes in the sample, sorted.
    pub fn species(&self) -> Vec<&str> {
        let mut species: Vec<&str> = self.observations.keys().map(String::as_str).collect();
        species.sort_unstable();
        species
    }

    /// Sampled stations of every sampled design stratum.
    pub fn stations(&self) -> &BTreeMap<DesignStratum, BTreeSet<String>> {
        &self.stations
    }

    pub fn frames(&self) -> &BTreeMap<DesignStratum, StratumFrame> {
        &self.frames
    }

    pub fn frame(&self, design: &DesignStratum) -> Result<&StratumFrame> {
        self.frames.get(design).ok_or_else(|| EstimationError::MissingStratumMetadata {
            year: design.year,
            stratum: design.stratum.clone(),
            prot: design.prot,
        })
    }

    /// Observations of `species` at a station; empty when none were recorded.
    pub fn observations(&self, species: &str, design: &DesignStratum, station: &str) -> &[Individual] {
        self.observations
            .get(species)
            .and_then(|by_station| by_station.get(&(design.clone(), station.to_string())))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn life_history(&self, species: &str) -> Option<&LifeHistory> {
        self.life_history.get(species)
    }

    /// Largest recorded length of a species with a positive count.
    pub fn max_length(&self, species: &str) -> Option<f64> {
        self.observations.get(species).and_then(|by_station| {
            by_station
                .values()
                .flatten()
                .filter(|ind| ind.num > 0.0)
                .filter_map(|ind| ind.len)
                .fold(None, |acc: Option<f64>, l| Some(acc.map_or(l, |a| a.max(l))))
        })
    }
}

fn required<T>(value: Option<T>, table: &str, column: &str, row: usize) -> Result<T> {
    value.ok_or_else(|| EstimationError::InvalidInput(format!("null {} in {} row {}", column, table, row)))
}

fn index_frames(stratum_data: &DataFrame) -> Result<BTreeMap<DesignStratum, StratumFrame>> {
    let years = i64_values(stratum_data, YEAR)?;
    let strata = str_values(stratum_data, STRAT)?;
    let prots = i64_values(stratum_data, PROT)?;
    let ntots = f64_values(stratum_data, NTOT)?;
    let nmtots = match stratum_data.column(NMTOT) {
        Ok(_) => f64_values(stratum_data, NMTOT)?,
        Err(_) => vec![None; stratum_data.height()],
    };

    let mut frames = BTreeMap::new();
    for i in 0..stratum_data.height() {
        let design = DesignStratum {
            year: required(years[i], "stratum_data", YEAR, i)?,
            stratum: required(strata[i].clone(), "stratum_data", STRAT, i)?,
            prot: required(prots[i], "stratum_data", PROT, i)?,
        };
        let ntot = required(ntots[i], "stratum_data", NTOT, i)?;
        if !(ntot.is_finite() && ntot >= 0.0) {
            return Err(EstimationError::InvalidInput(format!("NTOT must be non-negative, got {} in row {}", ntot, i)));
        }
        let frame = StratumFrame { ntot, nmtot: nmtots[i] };
        if frames.insert(design.clone(), frame).is_some() {
            return Err(EstimationError::InvalidInput(format!(
                "duplicate stratum_data row for year {}, stratum {}, protection {}",
                design.year, design.stratum, design.prot
            )));
        }
    }
    Ok(frames)
}

type SampleIndex = (
    BTreeMap<DesignStratum, BTreeSet<String>>,
    HashMap<String, HashMap<StationKey, Vec<Individual>>>,
);

fn index_sample(sample_data: &DataFrame) -> Result<SampleIndex> {
    let years = i64_values(sample_data, YEAR)?;
    let strata = str_values(sample_data, STRAT)?;
    let prots = i64_values(sample_data, PROT)?;
    let station_ids = str_values(sample_data, STATION_NR)?;
    let species = str_values(sample_data, SPECIES_CD)?;
    let nums = f64_values(sample_data, NUM)?;
    let lens = f64_values(sample_data, LEN)?;

    let mut stations: BTreeMap<DesignStratum, BTreeSet<String>> = BTreeMap::new();
    let mut observations: HashMap<String, HashMap<StationKey, Vec<Individual>>> = HashMap::new();

    for i in 0..sample_data.height() {
        let design = DesignStratum {
            year: required(years[i], "sample_data", YEAR, i)?,
            stratum: required(strata[i].clone(), "sample_data", STRAT, i)?,
            prot: required(prots[i], "sample_data", PROT, i)?,
        };
        let station = required(station_ids[i].clone(), "sample_data", STATION_NR, i)?;
        let num = required(nums[i], "sample_data", NUM, i)?;
        if !(num.is_finite() && num >= 0.0) {
            return Err(EstimationError::InvalidInput(format!("NUM must be non-negative, got {} in row {}", num, i)));
        }
        let len = lens[i];
        if let Some(l) = len {
            if !(l.is_finite() && l >= 0.0) {
                return Err(EstimationError::InvalidInput(format!("LEN must be non-negative, got {} in row {}", l, i)));
            }
        }
        if num > 0.0 && len.is_none() {
            debug!(row = i, num, "count recorded without length");
        }

        stations.entry(design.clone()).or_default().insert(station.clone());

        // A null species marks a station sampled with nothing seen.
        if let Some(code) = species[i].clone() {
            observations
                .entry(code)
                .or_default()
                .entry((design, station))
                .or_default()
                .push(Individual { num, len });
        }
    }
    Ok((stations, observations))
}

fn index_life_history(lhp: &DataFrame) -> Result<HashMap<String, LifeHistory>> {
    let species = str_values(lhp, SPECIES_CD)?;
    let lc = f64_values(lhp, LC)?;
    let lm = f64_values(lhp, LM)?;
    let wlen_a = f64_values(lhp, WLEN_A)?;
    let wlen_b = f64_values(lhp, WLEN_B)?;

    let mut out = HashMap::new();
    for i in 0..lhp.height() {
        let code = required(species[i].clone(), "lhp_data", SPECIES_CD, i)?;
        out.insert(code, LifeHistory { lc: lc[i], lm: lm[i], wlen_a: wlen_a[i], wlen_b: wlen_b[i] });
    }
    Ok(out)
}
