//! Reduce per-subject rows to per-group summary statistics.

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::stats;
use crate::table::RawResultsTable;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRow {
    pub group: String,
    pub time: f64,
    pub feature: String,
    pub mean: f64,
    pub median: f64,
    pub std: f64,
    pub sem: f64,
    pub count: usize,
}

/// One row per (group, time, feature) with at least one finite sample.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupSummaryTable {
    pub rows: Vec<SummaryRow>,
}

type Key = (String, OrderedFloat<f64>, String);

impl GroupSummaryTable {
    pub fn from_raw(raw: &RawResultsTable) -> Self {
        let mut buckets: BTreeMap<Key, Vec<f64>> = BTreeMap::new();
        for row in &raw.rows {
            for (feature, &value) in &row.values {
                if !value.is_finite() {
                    continue;
                }
                buckets
                    .entry((row.group.clone(), OrderedFloat(row.time), feature.clone()))
                    .or_default()
                    .push(value);
            }
        }
        let rows = buckets
            .into_iter()
            .filter_map(|((group, time, feature), values)| {
                summarize(&values).map(|(mean, median, std)| SummaryRow {
                    group,
                    time: time.into_inner(),
                    feature,
                    mean,
                    median,
                    std,
                    sem: std / (values.len() as f64).sqrt(),
                    count: values.len(),
                })
            })
            .collect();
        Self { rows }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn features(&self) -> Vec<String> {
        let mut names: Vec<String> = self.rows.iter().map(|r| r.feature.clone()).collect();
        names.sort();
        names.dedup();
        names
    }

    pub fn groups(&self) -> Vec<String> {
        let mut names: Vec<String> = self.rows.iter().map(|r| r.group.clone()).collect();
        names.sort();
        names.dedup();
        names
    }

    /// Time-ordered `(time, statistic)` pairs for one group and feature.
    pub fn curve(
        &self,
        group: &str,
        feature: &str,
        statistic: impl Fn(&SummaryRow) -> f64,
    ) -> Vec<(f64, f64)> {
        let mut points: Vec<(f64, f64)> = self
            .rows
            .iter()
            .filter(|r| r.group == group && r.feature == feature)
            .map(|r| (r.time, statistic(r)))
            .collect();
        points.sort_by(|a, b| a.0.total_cmp(&b.0));
        points
    }
}

fn summarize(values: &[f64]) -> Option<(f64, f64, f64)> {
    Some((
        stats::mean(values)?,
        stats::median(values)?,
        stats::sample_std(values)?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grouping::GroupLabel;
    use crate::table::ResultRow;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn mean_matches_raw_rows_for_random_tables() {
        let mut rng = StdRng::seed_from_u64(7);
        let groups = [GroupLabel::parse("A"), GroupLabel::parse("B")];
        let mut raw = RawResultsTable::new();
        for s in 0..12 {
            let group = &groups[s % 2];
            for t in [0.0, 30.0, 60.0] {
                let mut row = ResultRow::new(format!("s{s}"), group, t);
                let v: f64 = if rng.gen_bool(0.2) {
                    f64::NAN
                } else {
                    rng.gen_range(-5.0..5.0)
                };
                row.values.insert("f".into(), v);
                raw.push(row);
            }
        }
        let summary = GroupSummaryTable::from_raw(&raw);
        for entry in &summary.rows {
            let values: Vec<f64> = raw
                .rows
                .iter()
                .filter(|r| r.group == entry.group && r.time == entry.time)
                .map(|r| r.value("f"))
                .filter(|v| v.is_finite())
                .collect();
            let expected = values.iter().sum::<f64>() / values.len() as f64;
            assert!((entry.mean - expected).abs() < 1e-12);
            assert_eq!(entry.count, values.len());
        }
    }

    #[test]
    fn all_nan_combinations_are_omitted() {
        let mut raw = RawResultsTable::new();
        let mut row = ResultRow::new("s1", &GroupLabel::parse("A"), 0.0);
        row.values.insert("f".into(), f64::NAN);
        row.values.insert("g".into(), 3.0);
        raw.push(row);
        let summary = GroupSummaryTable::from_raw(&raw);
        assert_eq!(summary.rows.len(), 1);
        assert_eq!(summary.rows[0].feature, "g");
        assert_eq!(summary.rows[0].std, 0.0);
    }
}
