//! One representative curve per group over a shared time axis.

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::aggregate::GroupSummaryTable;
use crate::stats;
use crate::table::RawResultsTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CurveStatistic {
    #[default]
    Mean,
    Median,
}

impl CurveStatistic {
    pub fn reduce(&self, values: &[f64]) -> Option<f64> {
        match self {
            CurveStatistic::Mean => stats::mean(values),
            CurveStatistic::Median => stats::median(values),
        }
    }
}

/// A finite observation of one feature.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub subject: String,
    pub group: String,
    pub time: f64,
    pub value: f64,
}

pub fn collect_samples(raw: &RawResultsTable, feature: &str) -> Vec<Sample> {
    raw.valid_rows(feature)
        .map(|(row, value)| Sample {
            subject: row.subject.clone(),
            group: row.group.clone(),
            time: row.time,
            value,
        })
        .collect()
}

/// Group curves sampled on the union of observed times. Gaps inside a curve
/// are forward-filled, then back-filled.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupCurves {
    pub times: Vec<f64>,
    pub curves: BTreeMap<String, Vec<f64>>,
}

impl GroupCurves {
    pub fn from_samples(samples: &[Sample], statistic: CurveStatistic) -> Self {
        let mut buckets: BTreeMap<&str, BTreeMap<OrderedFloat<f64>, Vec<f64>>> = BTreeMap::new();
        let mut times = BTreeSet::new();
        for s in samples {
            let key = OrderedFloat(s.time);
            times.insert(key);
            buckets
                .entry(s.group.as_str())
                .or_default()
                .entry(key)
                .or_default()
                .push(s.value);
        }
        let keys: Vec<OrderedFloat<f64>> = times.into_iter().collect();
        let curves = buckets
            .into_iter()
            .map(|(group, by_time)| {
                let raw: Vec<f64> = keys
                    .iter()
                    .map(|k| {
                        by_time
                            .get(k)
                            .and_then(|v| statistic.reduce(v))
                            .unwrap_or(f64::NAN)
                    })
                    .collect();
                (group.to_string(), fill_gaps(raw))
            })
            .collect();
        Self {
            times: keys.into_iter().map(OrderedFloat::into_inner).collect(),
            curves,
        }
    }

    pub fn from_raw(raw: &RawResultsTable, feature: &str, statistic: CurveStatistic) -> Self {
        Self::from_samples(&collect_samples(raw, feature), statistic)
    }

    /// Curves from the summary table's mean or median column.
    pub fn from_summary(summary: &GroupSummaryTable, feature: &str, statistic: CurveStatistic) -> Self {
        let mut samples = Vec::new();
        for row in summary.rows.iter().filter(|r| r.feature == feature) {
            let value = match statistic {
                CurveStatistic::Mean => row.mean,
                CurveStatistic::Median => row.median,
            };
            if value.is_finite() {
                samples.push(Sample {
                    subject: String::new(),
                    group: row.group.clone(),
                    time: row.time,
                    value,
                });
            }
        }
        // One value per (group, time): the reduction is the identity.
        Self::from_samples(&samples, CurveStatistic::Mean)
    }

    pub fn z_normalized(&self) -> Self {
        Self {
            times: self.times.clone(),
            curves: self
                .curves
                .iter()
                .map(|(g, c)| (g.clone(), stats::z_normalize(c)))
                .collect(),
        }
    }

    pub fn groups(&self) -> Vec<&str> {
        self.curves.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.curves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.curves.is_empty()
    }
}

fn fill_gaps(mut values: Vec<f64>) -> Vec<f64> {
    let mut last = None;
    for v in values.iter_mut() {
        if v.is_finite() {
            last = Some(*v);
        } else if let Some(prev) = last {
            *v = prev;
        }
    }
    let mut next = None;
    for v in values.iter_mut().rev() {
        if v.is_finite() {
            next = Some(*v);
        } else if let Some(n) = next {
            *v = n;
        }
    }
    values
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(group: &str, time: f64, value: f64) -> Sample {
        Sample {
            subject: format!("{group}-{time}"),
            group: group.into(),
            time,
            value,
        }
    }

    #[test]
    fn curves_fill_missing_times() {
        let samples = vec![
            sample("A", 0.0, 1.0),
            sample("A", 30.0, 3.0),
            sample("A", 30.0, 5.0),
            sample("B", 60.0, 2.0),
            sample("A", -5.0, 0.5),
        ];
        let curves = GroupCurves::from_samples(&samples, CurveStatistic::Mean);
        assert_eq!(curves.times, vec![-5.0, 0.0, 30.0, 60.0]);
        assert_eq!(curves.curves["A"], vec![0.5, 1.0, 4.0, 4.0]);
        assert_eq!(curves.curves["B"], vec![2.0, 2.0, 2.0, 2.0]);
    }
}
