//! Unsupervised group separation: mean pairwise DTW distance between group curves.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::curves::{collect_samples, CurveStatistic, GroupCurves, Sample};
use super::dtw::dtw_distance;
use super::RankedFeature;
use crate::stats;
use crate::table::RawResultsTable;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeparationParams {
    pub statistic: CurveStatistic,
    /// Z-normalize each group curve before comparing shapes.
    pub z_normalize: bool,
    /// Label permutations for the p-value; zero skips it.
    pub permutations: usize,
    pub seed: u64,
}

impl Default for SeparationParams {
    fn default() -> Self {
        Self {
            statistic: CurveStatistic::Mean,
            z_normalize: false,
            permutations: 0,
            seed: 42,
        }
    }
}

/// Pairwise DTW distances between all group curves, in group-name order.
pub fn pairwise_distances(curves: &GroupCurves) -> Vec<f64> {
    let series: Vec<&Vec<f64>> = curves.curves.values().collect();
    let mut out = Vec::new();
    for i in 0..series.len() {
        for j in i + 1..series.len() {
            out.push(dtw_distance(series[i], series[j]));
        }
    }
    out
}

/// `(mean, spread)` of the pairwise distances; needs at least two groups.
pub fn separation_score(curves: &GroupCurves) -> Option<(f64, f64)> {
    if curves.len() < 2 {
        return None;
    }
    let distances = pairwise_distances(curves);
    let mean = stats::mean(&distances)?;
    let spread = stats::population_variance(&distances)?.sqrt();
    mean.is_finite().then_some((mean, spread))
}

fn curves_for(samples: &[Sample], params: &SeparationParams) -> GroupCurves {
    let curves = GroupCurves::from_samples(samples, params.statistic);
    if params.z_normalize {
        curves.z_normalized()
    } else {
        curves
    }
}

/// Score one feature. `None` when fewer than two groups have data.
pub fn score_feature(raw: &RawResultsTable, feature: &str, params: &SeparationParams) -> Option<RankedFeature> {
    let samples = collect_samples(raw, feature);
    let (score, spread) = separation_score(&curves_for(&samples, params))?;
    let p_value = (params.permutations > 0).then(|| permutation_p_value(&samples, score, params));
    Some(RankedFeature {
        feature: feature.to_string(),
        score,
        p_value,
        effect: Some(spread),
        support: samples.len(),
    })
}

/// Shuffle group labels across subjects and count scores at least as large.
fn permutation_p_value(samples: &[Sample], observed: f64, params: &SeparationParams) -> f64 {
    let mut subject_group: BTreeMap<&str, &str> = BTreeMap::new();
    for s in samples {
        subject_group.entry(&s.subject).or_insert(&s.group);
    }
    let subjects: Vec<&str> = subject_group.keys().copied().collect();
    let mut labels: Vec<&str> = subject_group.values().copied().collect();
    let mut rng = StdRng::seed_from_u64(params.seed);
    let mut hits = 0usize;
    for _ in 0..params.permutations {
        labels.shuffle(&mut rng);
        let assignment: BTreeMap<&str, &str> = subjects.iter().copied().zip(labels.iter().copied()).collect();
        let permuted: Vec<Sample> = samples
            .iter()
            .map(|s| Sample {
                group: assignment.get(s.subject.as_str()).copied().unwrap_or(s.group.as_str()).to_string(),
                ..s.clone()
            })
            .collect();
        if let Some((score, _)) = separation_score(&curves_for(&permuted, params)) {
            if score >= observed {
                hits += 1;
            }
        }
    }
    (hits + 1) as f64 / (params.permutations + 1) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_groups_do_not_separate() {
        let mut curves = GroupCurves::default();
        curves.times = vec![0.0, 1.0, 2.0];
        curves.curves.insert("A".into(), vec![1.0, 2.0, 3.0]);
        curves.curves.insert("B".into(), vec![1.0, 2.0, 3.0]);
        assert_eq!(separation_score(&curves), Some((0.0, 0.0)));
        curves.curves.remove("B");
        assert_eq!(separation_score(&curves), None);
    }
}
