// src/estimation/mod.rs
pub mod length_frequency;
pub mod pipeline;
pub mod reduction;
pub mod statistics;

pub use length_frequency::{default_bin_edges, station_length_frequency, weighted_median, TriangularFit};
pub use pipeline::compute_statistic;
pub use reduction::{
    reduce_cell, weighted_grouped_reduction, CellKey, DesignCell, GroupEstimate, GroupKey, GroupTotals,
    ReductionOptions, VarianceFn,
};
pub use statistics::{StationValue, StatisticComputer};
