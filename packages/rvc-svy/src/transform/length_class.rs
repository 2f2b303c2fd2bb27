// src/transform/length_class.rs

use serde::{Deserialize, Serialize};

use crate::dataset::{Individual, LifeHistory};
use crate::utils::{EstimationError, Result};

/// Life history quantity a breakpoint can refer to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LifeHistoryKey {
    /// Minimum length at capture
    Lc,
    /// Median length at maturity
    Lm,
}

impl LifeHistoryKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifeHistoryKey::Lc => "LC",
            LifeHistoryKey::Lm => "LM",
        }
    }
}

/// Either a literal breakpoint in cm or a reference into life history data.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LengthClassSpec {
    Breakpoint(f64),
    Keyword(LifeHistoryKey),
}

impl LengthClassSpec {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "LC" => Some(LengthClassSpec::Keyword(LifeHistoryKey::Lc)),
            "LM" => Some(LengthClassSpec::Keyword(LifeHistoryKey::Lm)),
            other => other.parse::<f64>().ok().map(LengthClassSpec::Breakpoint),
        }
    }

    /// Turn the configured breakpoint into a number before any per-station work happens.
    pub fn resolve(&self, species: &str, life_history: Option<&LifeHistory>) -> Result<f64> {
        let value = match self {
            LengthClassSpec::Breakpoint(b) => Some(*b),
            LengthClassSpec::Keyword(key) => life_history.and_then(|lh| match key {
                LifeHistoryKey::Lc => lh.lc,
                LifeHistoryKey::Lm => lh.lm,
            }),
        };

        match value {
            Some(b) if b.is_finite() => Ok(b),
            Some(b) => Err(EstimationError::InvalidInput(format!(
                "length class breakpoint for {} is not finite: {}",
                species, b
            ))),
            None => {
                let keyword = match self {
                    LengthClassSpec::Keyword(key) => key.as_str().to_string(),
                    LengthClassSpec::Breakpoint(b) => b.to_string(),
                };
                Err(EstimationError::UnresolvableLengthClass {
                    species: species.to_string(),
                    keyword,
                })
            }
        }
    }
}

/// Size class of a partitioned observation. `All` means no partitioning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LengthClass {
    All,
    Below,
    AtOrAbove,
}

impl LengthClass {
    pub fn label(&self, breakpoint: Option<f64>) -> Option<String> {
        match (self, breakpoint) {
            (LengthClass::Below, Some(b)) => Some(format!("< {}", b)),
            (LengthClass::AtOrAbove, Some(b)) => Some(format!(">= {}", b)),
            _ => None,
        }
    }
}

/// Split one station's observations at `breakpoint`: `[Below, AtOrAbove]`.
///
/// The lower class is exclusive of the breakpoint, the upper inclusive.
/// Zero-count rows carry no individuals and are dropped.
pub fn partition(individuals: &[Individual], breakpoint: f64) -> Result<[(LengthClass, Vec<Individual>); 2]> {
    let mut below = Vec::new();
    let mut at_or_above = Vec::new();

    for ind in individuals {
        if ind.num == 0.0 {
            continue;
        }
        match ind.len {
            Some(len) if len < breakpoint => below.push(*ind),
            Some(_) => at_or_above.push(*ind),
            None => {
                return Err(EstimationError::InvalidInput(format!(
                    "{} individuals without a length cannot be assigned a length class",
                    ind.num
                )))
            }
        }
    }

    Ok([(LengthClass::Below, below), (LengthClass::AtOrAbove, at_or_above)])
}
