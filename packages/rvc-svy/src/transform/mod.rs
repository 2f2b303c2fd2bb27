// src/transform/mod.rs

pub mod biomass;
pub mod length_class;

pub use biomass::{resolve_growth_parameters, station_biomass, GrowthParameters};
pub use length_class::{partition, LengthClass, LengthClassSpec, LifeHistoryKey};
