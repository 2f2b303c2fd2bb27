// src/weighting/mod.rs

pub mod stratum;

pub use stratum::{expansion_weight, stratum_weights, StratumWeights};
