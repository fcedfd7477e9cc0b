//! Replicate-weight generation for resampling variance.
//!
//! Two schemes are supported. The stratified bootstrap redraws each
//! stratum's primary sampling units with replacement and multiplies the
//! base weight by the draw count. The delete-one jackknife removes one
//! PSU per replicate and rescales the remaining PSUs of its stratum by
//! `n_h / (n_h - 1)`.
//!
//! Replicates are generated in a deterministic order (strata and PSUs in
//! first-seen row order, bootstrap seeded per replicate), so the same
//! design inputs always produce the same weight matrix.

use indexmap::IndexMap;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{CreelError, Result};

/// Resampling scheme attached to a design.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicateMethod {
    Bootstrap,
    Jackknife,
}

/// Requested replication, carried by the design builder and survey config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "method")]
pub enum ReplicateSpec {
    /// Stratified bootstrap with a fixed replicate count and RNG seed.
    Bootstrap { replicates: usize, seed: u64 },
    /// Delete-one-PSU jackknife; the replicate count follows from the PSUs.
    Jackknife,
}

/// Generated replicate weights plus their variance coefficients.
///
/// `weights[r]` is the full per-row weight vector of replicate `r`;
/// `coefficients[r]` is the multiplier applied to that replicate's squared
/// deviation when variances are aggregated.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplicateWeights {
    pub method: ReplicateMethod,
    pub weights: Vec<Vec<f64>>,
    pub coefficients: Vec<f64>,
}

impl ReplicateWeights {
    /// Number of replicates.
    pub fn count(&self) -> usize {
        self.weights.len()
    }
}

/// PSU structure of a design: dense PSU index per row plus the PSU lists
/// of each stratum, all in first-seen order.
struct PsuLayout {
    psu_of_row: Vec<usize>,
    strata_psus: Vec<Vec<usize>>,
    rows_of_psu: Vec<Vec<usize>>,
}

fn build_layout(strata: &[String], psu: &[String]) -> PsuLayout {
    let mut psu_ids: IndexMap<(&str, &str), usize> = IndexMap::new();
    let mut stratum_ids: IndexMap<&str, usize> = IndexMap::new();
    let mut psu_of_row = Vec::with_capacity(psu.len());
    let mut strata_psus: Vec<Vec<usize>> = Vec::new();
    let mut rows_of_psu: Vec<Vec<usize>> = Vec::new();

    for (row, (stratum, unit)) in strata.iter().zip(psu.iter()).enumerate() {
        let stratum_id = *stratum_ids.entry(stratum.as_str()).or_insert_with(|| {
            strata_psus.push(Vec::new());
            strata_psus.len() - 1
        });
        // PSU labels are scoped to their stratum so reused labels across
        // strata stay distinct units.
        let psu_id = *psu_ids
            .entry((stratum.as_str(), unit.as_str()))
            .or_insert_with(|| {
                rows_of_psu.push(Vec::new());
                strata_psus[stratum_id].push(rows_of_psu.len() - 1);
                rows_of_psu.len() - 1
            });
        psu_of_row.push(psu_id);
        rows_of_psu[psu_id].push(row);
    }

    PsuLayout {
        psu_of_row,
        strata_psus,
        rows_of_psu,
    }
}

/// Generates replicate weights for a design.
///
/// `strata` and `psu` are the rendered per-row stratum and PSU labels;
/// `weights` are the full-sample weights.
pub(crate) fn generate(
    spec: ReplicateSpec,
    weights: &[f64],
    strata: &[String],
    psu: &[String],
) -> Result<ReplicateWeights> {
    let layout = build_layout(strata, psu);
    match spec {
        ReplicateSpec::Bootstrap { replicates, seed } => {
            bootstrap(weights, &layout, replicates, seed)
        }
        ReplicateSpec::Jackknife => jackknife(weights, &layout),
    }
}

fn bootstrap(
    weights: &[f64],
    layout: &PsuLayout,
    replicates: usize,
    seed: u64,
) -> Result<ReplicateWeights> {
    if replicates == 0 {
        return Err(CreelError::invalid(
            "replicates",
            "bootstrap needs at least one replicate",
        ));
    }
    let n_psus = layout.rows_of_psu.len();
    let rep_weights: Vec<Vec<f64>> = (0..replicates)
        .into_par_iter()
        .map(|r| {
            // One RNG per replicate keeps draws independent of scheduling.
            let mut rng = fastrand::Rng::with_seed(seed.wrapping_add(r as u64));
            let mut draws = vec![0u32; n_psus];
            for stratum_psus in &layout.strata_psus {
                for _ in 0..stratum_psus.len() {
                    let pick = stratum_psus[rng.usize(0..stratum_psus.len())];
                    draws[pick] += 1;
                }
            }
            weights
                .iter()
                .zip(layout.psu_of_row.iter())
                .map(|(w, psu_id)| w * f64::from(draws[*psu_id]))
                .collect()
        })
        .collect();

    let coefficient = 1.0 / replicates as f64;
    Ok(ReplicateWeights {
        method: ReplicateMethod::Bootstrap,
        weights: rep_weights,
        coefficients: vec![coefficient; replicates],
    })
}

fn jackknife(weights: &[f64], layout: &PsuLayout) -> Result<ReplicateWeights> {
    // One replicate per PSU, but only in strata with two or more PSUs;
    // a deleted singleton would leave its stratum empty.
    let mut deletions: Vec<(usize, usize)> = Vec::new();
    let mut singleton_strata = 0usize;
    for stratum_psus in &layout.strata_psus {
        if stratum_psus.len() < 2 {
            singleton_strata += 1;
            continue;
        }
        for &psu_id in stratum_psus {
            deletions.push((psu_id, stratum_psus.len()));
        }
    }
    if singleton_strata > 0 {
        log::warn!(
            "jackknife: skipped {singleton_strata} single-PSU strata; their \
             variance contribution is not replicated"
        );
    }
    if deletions.is_empty() {
        return Err(CreelError::invalid(
            "psu",
            "jackknife needs at least one stratum with two or more primary sampling units",
        ));
    }

    let stratum_of_psu: Vec<usize> = {
        let mut lookup = vec![0usize; layout.rows_of_psu.len()];
        for (stratum_id, stratum_psus) in layout.strata_psus.iter().enumerate() {
            for &psu_id in stratum_psus {
                lookup[psu_id] = stratum_id;
            }
        }
        lookup
    };

    let rep_weights: Vec<Vec<f64>> = deletions
        .par_iter()
        .map(|&(deleted, n_h)| {
            let stratum_id = stratum_of_psu[deleted];
            let scale = n_h as f64 / (n_h as f64 - 1.0);
            weights
                .iter()
                .zip(layout.psu_of_row.iter())
                .map(|(w, psu_id)| {
                    if *psu_id == deleted {
                        0.0
                    } else if stratum_of_psu[*psu_id] == stratum_id {
                        w * scale
                    } else {
                        *w
                    }
                })
                .collect()
        })
        .collect();

    let coefficients = deletions
        .iter()
        .map(|&(_, n_h)| (n_h as f64 - 1.0) / n_h as f64)
        .collect();

    Ok(ReplicateWeights {
        method: ReplicateMethod::Jackknife,
        weights: rep_weights,
        coefficients,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_bootstrap_is_deterministic() {
        let weights = vec![2.0, 2.0, 4.0, 4.0];
        let strata = labels(&["a", "a", "b", "b"]);
        let psu = labels(&["p1", "p2", "p1", "p2"]);
        let spec = ReplicateSpec::Bootstrap {
            replicates: 50,
            seed: 7,
        };
        let first = generate(spec, &weights, &strata, &psu).unwrap();
        let second = generate(spec, &weights, &strata, &psu).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.count(), 50);
        assert_eq!(first.coefficients[0], 1.0 / 50.0);
    }

    #[test]
    fn test_bootstrap_preserves_stratum_draw_totals() {
        // Each stratum redraws exactly n_h PSUs, so the draw counts within
        // a stratum always sum to n_h.
        let weights = vec![1.0; 6];
        let strata = labels(&["a", "a", "a", "b", "b", "b"]);
        let psu = labels(&["p1", "p2", "p3", "p1", "p2", "p3"]);
        let spec = ReplicateSpec::Bootstrap {
            replicates: 20,
            seed: 11,
        };
        let reps = generate(spec, &weights, &strata, &psu).unwrap();
        for replicate in &reps.weights {
            let a_total: f64 = replicate[..3].iter().sum();
            let b_total: f64 = replicate[3..].iter().sum();
            assert_eq!(a_total, 3.0);
            assert_eq!(b_total, 3.0);
        }
    }

    #[test]
    fn test_bootstrap_rejects_zero_replicates() {
        let spec = ReplicateSpec::Bootstrap {
            replicates: 0,
            seed: 1,
        };
        let result = generate(spec, &[1.0], &labels(&["a"]), &labels(&["p1"]));
        assert!(result.is_err());
    }

    #[test]
    fn test_jackknife_delete_and_rescale() {
        let weights = vec![2.0, 2.0, 2.0];
        let strata = labels(&["a", "a", "a"]);
        let psu = labels(&["p1", "p2", "p3"]);
        let reps = generate(ReplicateSpec::Jackknife, &weights, &strata, &psu).unwrap();

        assert_eq!(reps.count(), 3);
        // First replicate deletes p1 and rescales the rest by 3/2.
        assert_eq!(reps.weights[0], vec![0.0, 3.0, 3.0]);
        assert_eq!(reps.weights[1], vec![3.0, 0.0, 3.0]);
        assert!((reps.coefficients[0] - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_jackknife_leaves_other_strata_untouched() {
        let weights = vec![1.0, 1.0, 5.0, 5.0];
        let strata = labels(&["a", "a", "b", "b"]);
        let psu = labels(&["p1", "p2", "p1", "p2"]);
        let reps = generate(ReplicateSpec::Jackknife, &weights, &strata, &psu).unwrap();

        assert_eq!(reps.count(), 4);
        // Replicates for stratum a keep stratum b weights at full sample.
        assert_eq!(reps.weights[0], vec![0.0, 2.0, 5.0, 5.0]);
        assert_eq!(reps.weights[2], vec![1.0, 1.0, 0.0, 10.0]);
    }

    #[test]
    fn test_jackknife_skips_singleton_strata() {
        let weights = vec![1.0, 1.0, 1.0];
        let strata = labels(&["a", "b", "b"]);
        let psu = labels(&["p1", "p1", "p2"]);
        let reps = generate(ReplicateSpec::Jackknife, &weights, &strata, &psu).unwrap();
        // Only stratum b is replicated.
        assert_eq!(reps.count(), 2);
        assert_eq!(reps.weights[0], vec![1.0, 0.0, 2.0]);
    }

    #[test]
    fn test_jackknife_all_singletons_is_an_error() {
        let weights = vec![1.0, 1.0];
        let strata = labels(&["a", "b"]);
        let psu = labels(&["p1", "p1"]);
        assert!(generate(ReplicateSpec::Jackknife, &weights, &strata, &psu).is_err());
    }

    #[test]
    fn test_psu_labels_scoped_to_stratum() {
        // The label p1 in stratum a and p1 in stratum b are different units.
        let weights = vec![1.0, 1.0, 1.0, 1.0];
        let strata = labels(&["a", "a", "b", "b"]);
        let psu = labels(&["p1", "p2", "p1", "p2"]);
        let layout = build_layout(&strata, &psu);
        assert_eq!(layout.rows_of_psu.len(), 4);
        assert_eq!(layout.strata_psus.len(), 2);
    }
}
