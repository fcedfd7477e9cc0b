//! Weighted estimators, linearization scores, and variance machinery.
//!
//! Point estimates are weighted means, totals, and ratios. Variances come
//! from one of two engines: Taylor linearization (scores aggregated to PSU
//! totals, then the with-replacement between-PSU variance) or replicate
//! weights (squared deviations of replicate estimates scaled by stored
//! coefficients). Both engines honor the same singleton rule: a group with
//! fewer than two PSUs contributes zero between-PSU variance.

use indexmap::IndexMap;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::design::ReplicateWeights;

/// Center used when aggregating replicate deviations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VarianceCenter {
    /// Deviations from the mean of the replicate estimates.
    #[default]
    ReplicateMean,
    /// Deviations from the full-sample estimate.
    FullSample,
}

/// `Σ w_i y_i`.
pub(crate) fn weighted_total(y: &[f64], w: &[f64]) -> f64 {
    y.iter().zip(w).map(|(yi, wi)| yi * wi).sum()
}

/// `Σ w_i y_i / Σ w_i`, or `None` when the weights sum to zero.
pub(crate) fn weighted_mean(y: &[f64], w: &[f64]) -> Option<f64> {
    let sum_w: f64 = w.iter().sum();
    if sum_w <= 0.0 {
        return None;
    }
    Some(weighted_total(y, w) / sum_w)
}

/// `Σ w_i y_i / Σ w_i x_i`, or `None` when the denominator is zero.
pub(crate) fn weighted_ratio(y: &[f64], x: &[f64], w: &[f64]) -> Option<f64> {
    let denominator = weighted_total(x, w);
    if denominator == 0.0 {
        return None;
    }
    Some(weighted_total(y, w) / denominator)
}

/// Linearization scores for a weighted mean: `(w_i / Σw)(y_i - ŷ)`.
pub(crate) fn scores_mean(y: &[f64], w: &[f64], estimate: f64) -> Vec<f64> {
    let sum_w: f64 = w.iter().sum();
    y.iter()
        .zip(w)
        .map(|(yi, wi)| (wi / sum_w) * (yi - estimate))
        .collect()
}

/// Linearization scores for a weighted total: `w_i y_i`.
pub(crate) fn scores_total(y: &[f64], w: &[f64]) -> Vec<f64> {
    y.iter().zip(w).map(|(yi, wi)| wi * yi).collect()
}

/// Linearization scores for a ratio: `(w_i / Σwx)(y_i - R̂ x_i)`.
pub(crate) fn scores_ratio(y: &[f64], x: &[f64], w: &[f64], ratio: f64) -> Vec<f64> {
    let sum_wx = weighted_total(x, w);
    y.iter()
        .zip(x)
        .zip(w)
        .map(|((yi, xi), wi)| (wi / sum_wx) * (yi - ratio * xi))
        .collect()
}

/// Between-PSU variance of linearization scores within one stratum.
///
/// Scores are summed to PSU totals `t_k`; the variance is
/// `fpc * m/(m-1) * Σ (t_k - t̄)²` over the `m` PSUs. One PSU or fewer
/// yields zero: a singleton has no between-unit spread to measure.
pub(crate) fn linearized_variance(scores: &[f64], psu: &[&str], fpc: f64) -> f64 {
    let mut totals: IndexMap<&str, f64> = IndexMap::new();
    for (score, unit) in scores.iter().zip(psu) {
        *totals.entry(unit).or_insert(0.0) += score;
    }
    let m = totals.len();
    if m <= 1 {
        return 0.0;
    }
    let m_f = m as f64;
    let mean = totals.values().sum::<f64>() / m_f;
    let ss: f64 = totals.values().map(|t| (t - mean).powi(2)).sum();
    fpc * (m_f / (m_f - 1.0)) * ss
}

/// Re-estimates a statistic under every replicate weight vector.
///
/// Returns `None` if any replicate fails to produce a finite estimate;
/// a variance built from a partial replicate set would be misleading.
pub(crate) fn replicate_estimates<F>(replicates: &ReplicateWeights, estimate: F) -> Option<Vec<f64>>
where
    F: Fn(&[f64]) -> Option<f64> + Sync,
{
    let thetas: Vec<Option<f64>> = replicates
        .weights
        .par_iter()
        .map(|weights| estimate(weights))
        .collect();
    let mut values = Vec::with_capacity(thetas.len());
    for theta in thetas {
        let value = theta?;
        if !value.is_finite() {
            return None;
        }
        values.push(value);
    }
    Some(values)
}

/// Aggregates replicate estimates into a variance:
/// `Σ_r c_r (θ_r - center)²`.
pub(crate) fn variance_from_replicates(
    full: f64,
    estimates: &[f64],
    coefficients: &[f64],
    center: VarianceCenter,
) -> f64 {
    let center_value = match center {
        VarianceCenter::ReplicateMean => {
            estimates.iter().sum::<f64>() / estimates.len() as f64
        }
        VarianceCenter::FullSample => full,
    };
    estimates
        .iter()
        .zip(coefficients)
        .map(|(theta, c)| c * (theta - center_value).powi(2))
        .sum()
}

/// Replicate covariance of two statistics estimated under the same
/// replicate weights: `Σ_r c_r (a_r - center_a)(b_r - center_b)`.
pub(crate) fn covariance_from_replicates(
    full_a: f64,
    full_b: f64,
    a: &[f64],
    b: &[f64],
    coefficients: &[f64],
    center: VarianceCenter,
) -> f64 {
    let (center_a, center_b) = match center {
        VarianceCenter::ReplicateMean => (
            a.iter().sum::<f64>() / a.len() as f64,
            b.iter().sum::<f64>() / b.len() as f64,
        ),
        VarianceCenter::FullSample => (full_a, full_b),
    };
    a.iter()
        .zip(b)
        .zip(coefficients)
        .map(|((ai, bi), c)| c * (ai - center_a) * (bi - center_b))
        .sum()
}

/// Inverse standard normal CDF via Acklam's rational approximation.
///
/// Relative error is below 1.2e-9 over (0, 1), which is far tighter than
/// any creel survey warrants. Callers validate the confidence level, so
/// `p` is always strictly inside the unit interval here.
pub(crate) fn normal_quantile(p: f64) -> f64 {
    const A: [f64; 6] = [
        -3.969683028665376e+01,
        2.209460984245205e+02,
        -2.759285104469687e+02,
        1.383577518672690e+02,
        -3.066479806614716e+01,
        2.506628277459239e+00,
    ];
    const B: [f64; 5] = [
        -5.447609879822406e+01,
        1.615858368580409e+02,
        -1.556989798598866e+02,
        6.680131188771972e+01,
        -1.328068155288572e+01,
    ];
    const C: [f64; 6] = [
        -7.784894002430293e-03,
        -3.223964580411365e-01,
        -2.400758277161838e+00,
        -2.549732539343734e+00,
        4.374664141464968e+00,
        2.938163982698783e+00,
    ];
    const D: [f64; 4] = [
        7.784695709041462e-03,
        3.224671290700398e-01,
        2.445134137142996e+00,
        3.754408661907416e+00,
    ];
    const P_LOW: f64 = 0.02425;

    debug_assert!(p > 0.0 && p < 1.0);
    if p < P_LOW {
        let q = (-2.0 * p.ln()).sqrt();
        (((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    } else if p <= 1.0 - P_LOW {
        let q = p - 0.5;
        let r = q * q;
        (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q
            / (((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0)
    } else {
        let q = (-2.0 * (1.0 - p).ln()).sqrt();
        -(((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    }
}
