//! Recovery toward baseline: does the treated group's deviation from its own
//! first time point shrink relative to the control group's?

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::RankedFeature;
use crate::stats;
use crate::table::RawResultsTable;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizationParams {
    pub control_group: String,
    pub treated_group: String,
}

/// Mean absolute deviation from baseline per post-baseline time, for one group.
///
/// Each subject's baseline is its earliest finite observation; later
/// observations are bucketed on the table-wide time axis.
pub fn deviation_curve(raw: &RawResultsTable, feature: &str, group: &str, times: &[f64]) -> Vec<f64> {
    let mut per_subject: BTreeMap<&str, Vec<(f64, f64)>> = BTreeMap::new();
    for (row, value) in raw.valid_rows(feature).filter(|(r, _)| r.group == group) {
        per_subject.entry(&row.subject).or_default().push((row.time, value));
    }
    let mut buckets: BTreeMap<OrderedFloat<f64>, Vec<f64>> = BTreeMap::new();
    for series in per_subject.values_mut() {
        series.sort_by(|a, b| a.0.total_cmp(&b.0));
        let (t0, base) = series[0];
        for &(t, v) in &series[1..] {
            if t > t0 {
                buckets.entry(OrderedFloat(t)).or_default().push((v - base).abs());
            }
        }
    }
    times
        .iter()
        .map(|&t| {
            buckets
                .get(&OrderedFloat(t))
                .and_then(|v| stats::mean(v))
                .unwrap_or(f64::NAN)
        })
        .collect()
}

/// `Σ k (A_c(k) − A_t(k)) / Σ k A_c(k)` over post-baseline points where both
/// curves are defined, plus the treated group's recovery from its peak.
pub fn recovery_score(control: &[f64], treated: &[f64]) -> Option<(f64, f64)> {
    let mut num = 0.0;
    let mut den = 0.0;
    let mut treated_seen = Vec::new();
    for (k, (&c, &t)) in control.iter().zip(treated).enumerate() {
        if !c.is_finite() || !t.is_finite() {
            continue;
        }
        let w = (k + 1) as f64;
        num += w * (c - t);
        den += w * c;
        treated_seen.push(t);
    }
    if den <= 0.0 || treated_seen.is_empty() {
        return None;
    }
    let peak = treated_seen.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let last = treated_seen[treated_seen.len() - 1];
    let effect = if peak > 0.0 { 1.0 - last / peak } else { 0.0 };
    Some((num / den, effect))
}

pub fn score_feature(raw: &RawResultsTable, feature: &str, params: &NormalizationParams) -> Option<RankedFeature> {
    let times = raw.times();
    let post = times.get(1..)?;
    let control = deviation_curve(raw, feature, &params.control_group, post);
    let treated = deviation_curve(raw, feature, &params.treated_group, post);
    let (score, effect) = recovery_score(&control, &treated)?;
    let support = raw
        .valid_rows(feature)
        .filter(|(r, _)| r.group == params.control_group || r.group == params.treated_group)
        .count();
    Some(RankedFeature {
        feature: feature.to_string(),
        score,
        p_value: None,
        effect: Some(effect),
        support,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grouping::GroupLabel;
    use crate::table::ResultRow;

    fn raw(treated_curve: [f64; 4]) -> RawResultsTable {
        let control_curve = [1.0, 3.0, 3.0, 3.0];
        let mut raw = RawResultsTable::new();
        for (group, curve) in [("CTL", control_curve), ("DRUG", treated_curve)] {
            for s in 0..2 {
                for (i, t) in [0.0, 30.0, 60.0, 90.0].iter().enumerate() {
                    let mut row = ResultRow::new(format!("{group}{s}"), &GroupLabel::parse(group), *t);
                    row.values.insert("f".into(), curve[i]);
                    raw.push(row);
                }
            }
        }
        raw
    }

    fn params() -> NormalizationParams {
        NormalizationParams {
            control_group: "CTL".into(),
            treated_group: "DRUG".into(),
        }
    }

    #[test]
    fn recovering_treatment_scores_higher() {
        let recovering = score_feature(&raw([1.0, 3.0, 2.0, 1.0]), "f", &params()).unwrap();
        let persistent = score_feature(&raw([1.0, 3.0, 3.0, 3.0]), "f", &params()).unwrap();
        assert!(recovering.score > persistent.score);
        assert_eq!(persistent.score, 0.0);
        // Weighted (2·1 + 3·2) / (2 + 4 + 6) with deviations 2, 1, 0 against 2, 2, 2.
        assert!((recovering.score - 8.0 / 12.0).abs() < 1e-12);
        assert_eq!(recovering.effect, Some(1.0));
    }

    #[test]
    fn flat_control_gives_no_score() {
        assert_eq!(recovery_score(&[0.0, 0.0], &[1.0, 1.0]), None);
        let mut p = params();
        p.treated_group = "missing".into();
        assert!(score_feature(&raw([1.0; 4]), "f", &p).is_none());
    }
}
