// src/utils.rs

use ndarray::ArrayView1;
use polars::prelude::*;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EstimationError {
    #[error("No stratum metadata for year {year}, stratum {stratum}, protection {prot}")]
    MissingStratumMetadata { year: i64, stratum: String, prot: i64 },

    #[error("Division undefined: {0}")]
    DivisionUndefined(String),

    #[error("No growth parameters (a, b) available for species {0}")]
    MissingGrowthParameters(String),

    #[error("Cannot resolve length class {keyword} for species {species}: no life history value")]
    UnresolvableLengthClass { species: String, keyword: String },

    #[error("Output group {0} has zero total sampling units")]
    EmptyGroup(String),

    #[error("Missing column {column} in {table}")]
    MissingColumn { table: &'static str, column: &'static str },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Polars(#[from] PolarsError),
}

pub type Result<T> = std::result::Result<T, EstimationError>;

/// Fail unless every named column exists in `df`.
pub fn require_columns(df: &DataFrame, table: &'static str, columns: &[&'static str]) -> Result<()> {
    for &column in columns {
        if df.column(column).is_err() {
            return Err(EstimationError::MissingColumn { table, column });
        }
    }
    Ok(())
}

pub fn f64_values(df: &DataFrame, name: &str) -> Result<Vec<Option<f64>>> {
    let col = df.column(name)?.cast(&DataType::Float64)?;
    Ok(col.f64()?.into_iter().collect())
}

pub fn i64_values(df: &DataFrame, name: &str) -> Result<Vec<Option<i64>>> {
    let col = df.column(name)?.cast(&DataType::Int64)?;
    Ok(col.i64()?.into_iter().collect())
}

/// Read any column as text; integer identifiers such as station numbers are cast.
pub fn str_values(df: &DataFrame, name: &str) -> Result<Vec<Option<String>>> {
    let col = df.column(name)?.cast(&DataType::String)?;
    Ok(col.str()?.into_iter().map(|v| v.map(str::to_string)).collect())
}

/// Sample mean and per-unit variance contributions `k/(k-1) * (y_i - ybar)^2`.
///
/// Summing the contributions gives `k * s^2`, so scaling by `wh^2 = (N/k)^2`
/// yields the usual `N^2 s^2 / k` variance of a stratum total. A single unit
/// has no estimable variance and every contribution is `None`.
pub fn variance_contributions(y: ArrayView1<f64>) -> (f64, Vec<Option<f64>>) {
    let k = y.len();
    if k == 0 {
        return (f64::NAN, Vec::new());
    }
    let mean = y.sum() / k as f64;
    if k == 1 {
        return (mean, vec![None]);
    }
    let scale = k as f64 / (k as f64 - 1.0);
    let contributions = y.iter().map(|&yi| Some(scale * (yi - mean).powi(2))).collect();
    (mean, contributions)
}
