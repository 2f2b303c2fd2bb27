// src/lib.rs
//! Design-based estimators for stratified reef visual census surveys.
//!
//! Input is a [`SurveyDataset`] (sample, stratum and life history tables as
//! polars `DataFrame`s, already filtered to the species, years and strata of
//! interest). Output is a `DataFrame` with one row per species, year and
//! optional stratum / protection / length class, carrying the statistic, its
//! variance, the sample sizes `n`/`nm` and the frame size `NTOT`.

use std::collections::HashMap;

use polars::prelude::DataFrame;

pub mod config;
pub mod dataset;
pub mod estimation;
pub mod transform;
pub mod utils;
pub mod weighting;

pub use config::{EstimationConfig, Level, Statistic};
pub use dataset::{DesignStratum, Individual, LifeHistory, StratumFrame, SurveyDataset};
pub use estimation::compute_statistic;
pub use transform::{GrowthParameters, LengthClass, LengthClassSpec, LifeHistoryKey};
pub use utils::{EstimationError, Result};

// ============================================================================
// Convenience entry points
// ============================================================================

/// Mean count per station.
pub fn get_density(dataset: &SurveyDataset, level: Level, when_present: bool, merge_protected: bool) -> Result<DataFrame> {
    let config = EstimationConfig {
        when_present,
        merge_protected,
        ..EstimationConfig::new(level, Statistic::Density)
    };
    compute_statistic(dataset, &config)
}

/// Proportion of stations where the species was seen.
pub fn get_occurrence(dataset: &SurveyDataset, level: Level, merge_protected: bool) -> Result<DataFrame> {
    let config = EstimationConfig { merge_protected, ..EstimationConfig::new(level, Statistic::Occurrence) };
    compute_statistic(dataset, &config)
}

/// Total number of individuals extrapolated to the sampling frame.
pub fn get_abundance(dataset: &SurveyDataset, level: Level, when_present: bool, merge_protected: bool) -> Result<DataFrame> {
    let config = EstimationConfig {
        when_present,
        merge_protected,
        ..EstimationConfig::new(level, Statistic::Abundance)
    };
    compute_statistic(dataset, &config)
}

/// Mean mass per station; species without supplied parameters fall back to `lhp_data`.
pub fn get_biomass(
    dataset: &SurveyDataset,
    level: Level,
    growth_parameters: HashMap<String, GrowthParameters>,
    when_present: bool,
    merge_protected: bool,
) -> Result<DataFrame> {
    let config = EstimationConfig {
        when_present,
        merge_protected,
        growth_parameters,
        ..EstimationConfig::new(level, Statistic::Biomass)
    };
    compute_statistic(dataset, &config)
}

/// Mean count per station in each length bin.
pub fn get_length_frequency(
    dataset: &SurveyDataset,
    level: Level,
    length_bins: Option<Vec<f64>>,
    when_present: bool,
    merge_protected: bool,
) -> Result<DataFrame> {
    let config = EstimationConfig {
        when_present,
        merge_protected,
        length_bins,
        ..EstimationConfig::new(level, Statistic::LengthFrequency)
    };
    compute_statistic(dataset, &config)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use polars::prelude::*;

    type Row<'a> = (&'a str, i64, &'a str, &'a str, f64, Option<f64>);

    /// Rows of (stratum, protection, station, species, count, length), all in 2016.
    fn sample(rows: &[Row]) -> DataFrame {
        df![
            "YEAR" => vec![2016i64; rows.len()],
            "STRAT" => rows.iter().map(|r| r.0).collect::<Vec<_>>(),
            "PROT" => rows.iter().map(|r| r.1).collect::<Vec<_>>(),
            "STATION_NR" => rows.iter().map(|r| r.2).collect::<Vec<_>>(),
            "SPECIES_CD" => rows.iter().map(|r| r.3).collect::<Vec<_>>(),
            "NUM" => rows.iter().map(|r| r.4).collect::<Vec<_>>(),
            "LEN" => rows.iter().map(|r| r.5).collect::<Vec<_>>(),
        ]
        .unwrap()
    }

    fn strata(frames: &[(&str, i64, f64, f64)]) -> DataFrame {
        df![
            "YEAR" => vec![2016i64; frames.len()],
            "STRAT" => frames.iter().map(|f| f.0).collect::<Vec<_>>(),
            "PROT" => frames.iter().map(|f| f.1).collect::<Vec<_>>(),
            "NTOT" => frames.iter().map(|f| f.2).collect::<Vec<_>>(),
            "NMTOT" => frames.iter().map(|f| f.3).collect::<Vec<_>>(),
        ]
        .unwrap()
    }

    fn values(df: &DataFrame, col: &str) -> Vec<Option<f64>> {
        df.column(col).unwrap().f64().unwrap().into_iter().collect()
    }

    /// Stratum A: 10 stations, stratum B: 5 stations, every station counts 2.
    fn homogeneous() -> SurveyDataset {
        let stations: Vec<String> = (0..15).map(|i| format!("s{}", i)).collect();
        let rows: Vec<Row> = stations
            .iter()
            .enumerate()
            .map(|(i, st)| (if i < 10 { "A" } else { "B" }, 0, st.as_str(), "SPA AURO", 2.0, Some(12.0)))
            .collect();
        SurveyDataset::new(sample(&rows), strata(&[("A", 0, 100.0, 100.0), ("B", 0, 50.0, 50.0)]), None).unwrap()
    }

    /// Two strata with uneven counts, one of them split by protection.
    fn mixed() -> SurveyDataset {
        let rows: Vec<Row> = vec![
            ("A", 0, "1", "LUT GRIS", 3.0, Some(22.0)),
            ("A", 0, "2", "LUT GRIS", 0.0, None),
            ("A", 0, "3", "LUT GRIS", 1.0, Some(30.0)),
            ("A", 1, "4", "LUT GRIS", 5.0, Some(25.0)),
            ("A", 1, "5", "LUT GRIS", 2.0, Some(18.0)),
            ("B", 0, "6", "LUT GRIS", 0.0, None),
            ("B", 0, "7", "LUT GRIS", 4.0, Some(40.0)),
            ("B", 0, "8", "LUT GRIS", 1.0, Some(12.0)),
        ];
        let frames = [("A", 0, 60.0, 30.0), ("A", 1, 20.0, 10.0), ("B", 0, 90.0, 45.0)];
        SurveyDataset::new(sample(&rows), strata(&frames), None).unwrap()
    }

    #[test]
    fn test_homogeneous_density_is_constant() {
        let ds = homogeneous();

        let by_stratum = get_density(&ds, Level::Stratum, false, false).unwrap();
        assert_eq!(values(&by_stratum, "density"), vec![Some(2.0), Some(2.0)]);

        let domain = get_density(&ds, Level::Domain, false, false).unwrap();
        assert_eq!(domain.height(), 1);
        assert_relative_eq!(values(&domain, "density")[0].unwrap(), 2.0, epsilon = 1e-12);
        assert_relative_eq!(values(&domain, "var")[0].unwrap(), 0.0);
        assert_eq!(values(&domain, "NTOT"), vec![Some(150.0)]);
        let n: Vec<Option<u32>> = domain.column("n").unwrap().u32().unwrap().into_iter().collect();
        assert_eq!(n, vec![Some(15)]);
    }

    #[test]
    fn test_census_occurrence_is_sample_proportion() {
        let rows: Vec<Row> = vec![
            ("A", 0, "1", "HAE PLUM", 2.0, Some(15.0)),
            ("A", 0, "2", "HAE PLUM", 0.0, None),
            ("A", 0, "3", "HAE PLUM", 1.0, Some(14.0)),
            ("A", 0, "4", "HAE PLUM", 6.0, Some(16.0)),
        ];
        let ds = SurveyDataset::new(sample(&rows), strata(&[("A", 0, 4.0, 4.0)]), None).unwrap();

        let out = get_occurrence(&ds, Level::Domain, false).unwrap();
        assert_relative_eq!(values(&out, "occurrence")[0].unwrap(), 0.75);
        // Binomial form: N^2 * n/(n-1) p(1-p) / n / N^2
        assert_relative_eq!(values(&out, "var")[0].unwrap(), 0.75 * 0.25 / 3.0, epsilon = 1e-12);
    }

    #[test]
    fn test_domain_variance_matches_stratified_formula() {
        let ds = mixed();
        let out = get_density(&ds, Level::Domain, false, true).unwrap();

        // Strata (N, values): (60, [3,0,1]), (20, [5,2]), (90, [0,4,1])
        let strata: [(f64, Vec<f64>); 3] = [(60.0, vec![3.0, 0.0, 1.0]), (20.0, vec![5.0, 2.0]), (90.0, vec![0.0, 4.0, 1.0])];
        let big_n: f64 = strata.iter().map(|(n, _)| n).sum();
        let mut mean = 0.0;
        let mut var = 0.0;
        for (n_h, y) in &strata {
            let k = y.len() as f64;
            let ybar = y.iter().sum::<f64>() / k;
            let s2 = y.iter().map(|v| (v - ybar).powi(2)).sum::<f64>() / (k - 1.0);
            mean += n_h / big_n * ybar;
            var += (n_h / big_n).powi(2) * s2 / k;
        }

        assert_relative_eq!(values(&out, "density")[0].unwrap(), mean, epsilon = 1e-12);
        assert_relative_eq!(values(&out, "var")[0].unwrap(), var, epsilon = 1e-12);
    }

    #[test]
    fn test_row_order_does_not_matter() {
        let ds = mixed();
        let reversed = ds.sample_data().reverse();
        let ds_rev = SurveyDataset::new(reversed, ds.stratum_data().clone(), None).unwrap();

        for level in [Level::Stratum, Level::Domain] {
            let a = get_density(&ds, level, false, false).unwrap();
            let b = get_density(&ds_rev, level, false, false).unwrap();
            assert!(a.equals_missing(&b));
        }
    }

    #[test]
    fn test_merging_singleton_protection_is_noop() {
        let ds = homogeneous();
        for level in [Level::Stratum, Level::Domain] {
            let merged = get_density(&ds, level, false, true).unwrap();
            let split = get_density(&ds, level, false, false).unwrap();

            assert!(merged.column("PROT").is_err());
            assert_eq!(values(&merged, "density"), values(&split, "density"));
            assert_eq!(values(&merged, "var"), values(&split, "var"));
        }
    }

    #[test]
    fn test_merge_protected_pools_stratum() {
        let ds = mixed();

        let split = get_density(&ds, Level::Stratum, false, false).unwrap();
        assert_eq!(split.height(), 3);

        let merged = get_density(&ds, Level::Stratum, false, true).unwrap();
        assert_eq!(merged.height(), 2);
        // Stratum A: (60 * 4/3 + 20 * 7/2) / 80
        assert_relative_eq!(values(&merged, "density")[0].unwrap(), (80.0 + 70.0) / 80.0, epsilon = 1e-12);
        assert_eq!(values(&merged, "NTOT")[0], Some(80.0));
    }

    #[test]
    fn test_domain_abundance_is_sum_of_strata() {
        let ds = mixed();

        let by_stratum = get_abundance(&ds, Level::Stratum, false, false).unwrap();
        let domain = get_abundance(&ds, Level::Domain, false, true).unwrap();

        let stratum_sum: f64 = values(&by_stratum, "abundance").iter().flatten().sum();
        let stratum_var: f64 = values(&by_stratum, "var").iter().flatten().sum();
        assert_relative_eq!(values(&domain, "abundance")[0].unwrap(), stratum_sum, epsilon = 1e-9);
        assert_relative_eq!(values(&domain, "var")[0].unwrap(), stratum_var, epsilon = 1e-9);
        // 20 * 4 + 10 * 7 + 30 * 5
        assert_relative_eq!(stratum_sum, 300.0, epsilon = 1e-9);
    }

    #[test]
    fn test_length_class_boundary_goes_up() {
        let rows: Vec<Row> = vec![
            ("A", 0, "1", "OCY CHRY", 1.0, Some(10.0)),
            ("A", 0, "1", "OCY CHRY", 1.0, Some(15.0)),
            ("A", 0, "1", "OCY CHRY", 1.0, Some(20.0)),
        ];
        let ds = SurveyDataset::new(sample(&rows), strata(&[("A", 0, 1.0, 1.0)]), None).unwrap();

        let mut config = EstimationConfig::new(Level::Domain, Statistic::Density);
        config.length_class.insert("OCY CHRY".to_string(), LengthClassSpec::Breakpoint(15.0));
        let out = compute_statistic(&ds, &config).unwrap();

        let labels: Vec<Option<String>> = out
            .column("length_class")
            .unwrap()
            .str()
            .unwrap()
            .into_iter()
            .map(|s| s.map(str::to_string))
            .collect();
        assert_eq!(labels, vec![Some("< 15".to_string()), Some(">= 15".to_string())]);
        assert_eq!(values(&out, "density"), vec![Some(1.0), Some(2.0)]);
    }

    #[test]
    fn test_length_class_keyword_needs_life_history() {
        let ds = mixed();
        let mut config = EstimationConfig::new(Level::Domain, Statistic::Density);
        config.length_class.insert("LUT GRIS".to_string(), LengthClassSpec::Keyword(LifeHistoryKey::Lm));

        let err = compute_statistic(&ds, &config).unwrap_err();
        assert!(matches!(err, EstimationError::UnresolvableLengthClass { .. }));

        let lhp = df![
            "SPECIES_CD" => ["LUT GRIS"],
            "LC" => [Some(20.0)],
            "LM" => [Some(25.0)],
            "WLEN_A" => [Some(1.5e-5)],
            "WLEN_B" => [Some(3.0)],
        ]
        .unwrap();
        let ds = SurveyDataset::new(ds.sample_data().clone(), ds.stratum_data().clone(), Some(lhp)).unwrap();
        let out = compute_statistic(&ds, &config).unwrap();
        assert_eq!(out.height(), 4);
    }

    #[test]
    fn test_biomass_sums_individual_masses() {
        let rows: Vec<Row> = vec![
            ("A", 0, "1", "EPI MORI", 2.0, Some(20.0)),
            ("A", 0, "2", "EPI MORI", 1.0, Some(20.0)),
        ];
        let ds = SurveyDataset::new(sample(&rows), strata(&[("A", 0, 2.0, 2.0)]), None).unwrap();

        let mut params = HashMap::new();
        params.insert("EPI MORI".to_string(), GrowthParameters::new(1e-5, 3.0).unwrap());
        let out = get_biomass(&ds, Level::Domain, params, false, false).unwrap();

        // Stations hold 0.16 and 0.08
        assert_relative_eq!(values(&out, "biomass")[0].unwrap(), 0.12, epsilon = 1e-12);
    }

    #[test]
    fn test_biomass_without_parameters_fails() {
        let err = get_biomass(&mixed(), Level::Domain, HashMap::new(), false, false).unwrap_err();
        assert!(matches!(err, EstimationError::MissingGrowthParameters(ref s) if s == "LUT GRIS"));
    }

    #[test]
    fn test_when_present_density() {
        let ds = mixed();
        let out = get_density(&ds, Level::Stratum, true, false).unwrap();

        // Stratum B prot 0: present values [4, 1], wh_m = 45 / 2
        let b = values(&out, "density")[2].unwrap();
        assert_relative_eq!(b, 2.5, epsilon = 1e-12);
        assert_eq!(values(&out, "NMTOT")[2], Some(45.0));
    }

    #[test]
    fn test_unsampled_stratum_stays_in_frame() {
        let ds = homogeneous();
        let frames = strata(&[("A", 0, 100.0, 100.0), ("B", 0, 50.0, 50.0), ("C", 0, 150.0, 150.0)]);
        let ds = SurveyDataset::new(ds.sample_data().clone(), frames, None).unwrap();

        let out = get_density(&ds, Level::Domain, false, false).unwrap();
        assert_eq!(values(&out, "NTOT"), vec![Some(300.0)]);
        assert_relative_eq!(values(&out, "density")[0].unwrap(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_length_frequency_sums_to_density() {
        let ds = mixed();
        let lf = get_length_frequency(&ds, Level::Domain, None, false, true).unwrap();
        let density = get_density(&ds, Level::Domain, false, true).unwrap();

        let total: f64 = values(&lf, "frequency").iter().flatten().sum();
        assert_relative_eq!(total, values(&density, "density")[0].unwrap(), epsilon = 1e-9);
        // 1 cm bins up to 41
        assert_eq!(lf.height(), 41);
        assert_eq!(values(&lf, "length")[0], Some(0.0));
    }

    #[test]
    fn test_splitting_rows_does_not_change_estimates() {
        let rows: Vec<Row> = vec![
            ("A", 0, "1", "EPI MORI", 2.0, Some(20.0)),
            ("A", 0, "1", "EPI MORI", 2.0, Some(30.0)),
            ("A", 0, "2", "EPI MORI", 3.0, Some(25.0)),
            ("A", 0, "3", "EPI MORI", 0.0, None),
        ];
        // Same fish, with the first and third rows recorded one count at a time.
        let split: Vec<Row> = vec![
            ("A", 0, "1", "EPI MORI", 1.0, Some(20.0)),
            ("A", 0, "1", "EPI MORI", 1.0, Some(20.0)),
            ("A", 0, "1", "EPI MORI", 2.0, Some(30.0)),
            ("A", 0, "2", "EPI MORI", 1.0, Some(25.0)),
            ("A", 0, "2", "EPI MORI", 2.0, Some(25.0)),
            ("A", 0, "3", "EPI MORI", 0.0, None),
        ];
        let frames = strata(&[("A", 0, 30.0, 20.0)]);
        let ds = SurveyDataset::new(sample(&rows), frames.clone(), None).unwrap();
        let ds_split = SurveyDataset::new(sample(&split), frames, None).unwrap();

        let params = || {
            let mut p = HashMap::new();
            p.insert("EPI MORI".to_string(), GrowthParameters::new(1e-5, 3.0).unwrap());
            p
        };
        let pairs = [
            (get_density(&ds, Level::Domain, false, false).unwrap(), get_density(&ds_split, Level::Domain, false, false).unwrap(), "density"),
            (
                get_biomass(&ds, Level::Domain, params(), false, false).unwrap(),
                get_biomass(&ds_split, Level::Domain, params(), false, false).unwrap(),
                "biomass",
            ),
            (
                get_length_frequency(&ds, Level::Domain, None, false, false).unwrap(),
                get_length_frequency(&ds_split, Level::Domain, None, false, false).unwrap(),
                "frequency",
            ),
        ];

        for (a, b, col) in &pairs {
            assert_eq!(a.height(), b.height());
            for stat in [*col, "var"] {
                for (x, y) in values(a, stat).iter().zip(values(b, stat)) {
                    assert_relative_eq!(x.unwrap(), y.unwrap(), epsilon = 1e-12);
                }
            }
        }

        // Station 1 has half its count at 20 and half at 30, so the mode sits at 25.
        let lf = &pairs[2].0;
        let freq = values(lf, "frequency");
        let total: f64 = freq.iter().flatten().sum();
        // (4 + 3 + 0) fish over three stations
        assert_relative_eq!(total, 7.0 / 3.0, epsilon = 1e-9);
        let lengths = values(lf, "length");
        let below_25: f64 = lengths
            .iter()
            .zip(&freq)
            .filter(|(l, _)| l.unwrap() < 25.0)
            .map(|(_, f)| f.unwrap())
            .sum();
        // Station 1 puts half of its 4 fish below 25; station 2 has all 3 at 25.
        assert_relative_eq!(below_25, 2.0 / 3.0, epsilon = 1e-9);
    }

    #[test]
    fn test_length_frequency_needs_every_length() {
        let rows: Vec<Row> = vec![
            ("A", 0, "1", "LUT GRIS", 2.0, Some(20.0)),
            ("A", 0, "2", "LUT GRIS", 3.0, None),
        ];
        let ds = SurveyDataset::new(sample(&rows), strata(&[("A", 0, 10.0, 10.0)]), None).unwrap();

        assert!(get_density(&ds, Level::Domain, false, false).is_ok());
        let err = get_length_frequency(&ds, Level::Domain, None, false, false).unwrap_err();
        assert!(matches!(err, EstimationError::InvalidInput(_)));
    }

    #[test]
    fn test_unsampled_stratum_reported_with_no_samples() {
        let ds = homogeneous();
        let frames = strata(&[("A", 0, 100.0, 100.0), ("B", 0, 50.0, 50.0), ("C", 0, 150.0, 150.0)]);
        let ds = SurveyDataset::new(ds.sample_data().clone(), frames, None).unwrap();

        let out = get_density(&ds, Level::Stratum, false, false).unwrap();
        assert_eq!(out.height(), 3);
        assert_eq!(values(&out, "density"), vec![Some(2.0), Some(2.0), None]);
        assert_eq!(values(&out, "var")[2], None);
        assert_eq!(values(&out, "NTOT")[2], Some(150.0));
        let n: Vec<Option<u32>> = out.column("n").unwrap().u32().unwrap().into_iter().collect();
        assert_eq!(n, vec![Some(10), Some(5), Some(0)]);
    }

    #[test]
    fn test_missing_stratum_metadata_is_reported() {
        let ds = mixed();
        let frames = strata(&[("A", 0, 60.0, 30.0), ("B", 0, 90.0, 45.0)]);
        let err = SurveyDataset::new(ds.sample_data().clone(), frames, None).unwrap_err();

        assert!(matches!(err, EstimationError::MissingStratumMetadata { prot: 1, .. }));
    }
}
