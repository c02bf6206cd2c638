//! Per-subject results: one row per (subject, time), metadata plus features.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::{Error, Result};
use crate::grouping::GroupLabel;

/// Column order for the metadata block of a raw results file.
pub const META_COLUMNS: [&str; 7] = [
    "subject",
    "group",
    "group_number",
    "sex",
    "dose",
    "treatment",
    "time",
];

/// Columns an analysis input must carry.
pub const REQUIRED_COLUMNS: [&str; 3] = ["subject", "group", "time"];

/// Canonical metadata name for a header cell, accepting a few legacy spellings.
pub fn canonical_column(header: &str) -> Option<&'static str> {
    let lower = header.trim().to_ascii_lowercase();
    let name = match lower.as_str() {
        "subject" | "animal" | "animal_key" | "subject_id" => "subject",
        "group" | "group_name" => "group",
        "time" | "time_min" | "time_point" => "time",
        "group_number" => "group_number",
        "sex" => "sex",
        "dose" => "dose",
        "treatment" => "treatment",
        _ => return None,
    };
    Some(name)
}

/// Feature name to value. NaN marks a failed or absent feature.
pub type FeatureVector = BTreeMap<String, f64>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRow {
    pub subject: String,
    pub group: String,
    pub time: f64,
    /// Factor columns other than subject/group/time (sex, dose, ...).
    pub metadata: BTreeMap<String, String>,
    pub values: FeatureVector,
}

impl ResultRow {
    pub fn new(subject: impl Into<String>, group: &GroupLabel, time: f64) -> Self {
        let mut metadata = BTreeMap::new();
        metadata.insert("group_number".to_string(), group.number.clone());
        metadata.insert("sex".to_string(), group.sex.clone());
        metadata.insert("dose".to_string(), group.dose.clone());
        metadata.insert("treatment".to_string(), group.treatment.clone());
        Self {
            subject: subject.into(),
            group: group.label.clone(),
            time,
            metadata,
            values: FeatureVector::new(),
        }
    }

    /// Feature value, NaN when the column is missing.
    pub fn value(&self, feature: &str) -> f64 {
        self.values.get(feature).copied().unwrap_or(f64::NAN)
    }

    /// Value of a named factor column: `time`, `group`, `subject` or metadata.
    pub fn factor(&self, column: &str) -> Option<String> {
        match canonical_column(column).unwrap_or(column) {
            "subject" => Some(self.subject.clone()),
            "group" => Some(self.group.clone()),
            "time" => Some(format_time(self.time)),
            other => self
                .metadata
                .get(other)
                .or_else(|| {
                    self.metadata
                        .iter()
                        .find(|(k, _)| k.eq_ignore_ascii_case(other))
                        .map(|(_, v)| v)
                })
                .cloned(),
        }
    }
}

/// Integral times print without a fractional part.
pub fn format_time(time: f64) -> String {
    if time.fract() == 0.0 && time.abs() < 1e15 {
        format!("{}", time as i64)
    } else {
        format!("{}", time)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawResultsTable {
    pub rows: Vec<ResultRow>,
}

impl RawResultsTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, row: ResultRow) {
        self.rows.push(row);
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Union of all feature columns, sorted by name.
    pub fn feature_names(&self) -> Vec<String> {
        let names: BTreeSet<&String> = self.rows.iter().flat_map(|r| r.values.keys()).collect();
        names.into_iter().cloned().collect()
    }

    /// Union of metadata keys beyond the fixed set, sorted.
    pub fn extra_metadata(&self) -> Vec<String> {
        let fixed: BTreeSet<&str> = META_COLUMNS.iter().copied().collect();
        let names: BTreeSet<&String> = self
            .rows
            .iter()
            .flat_map(|r| r.metadata.keys())
            .filter(|k| !fixed.contains(k.as_str()))
            .collect();
        names.into_iter().cloned().collect()
    }

    pub fn groups(&self) -> Vec<String> {
        let set: BTreeSet<&String> = self.rows.iter().map(|r| &r.group).collect();
        set.into_iter().cloned().collect()
    }

    pub fn times(&self) -> Vec<f64> {
        let mut times: Vec<f64> = self.rows.iter().map(|r| r.time).collect();
        times.sort_by(|a, b| a.total_cmp(b));
        times.dedup();
        times
    }

    /// Canonical order: subject key, then time.
    pub fn sort(&mut self) {
        self.rows.sort_by(|a, b| {
            a.subject
                .cmp(&b.subject)
                .then_with(|| a.time.total_cmp(&b.time))
        });
    }

    /// Rows with a finite value for `feature`.
    pub fn valid_rows<'a>(&'a self, feature: &'a str) -> impl Iterator<Item = (&'a ResultRow, f64)> + 'a {
        self.rows.iter().filter_map(move |r| {
            let v = r.value(feature);
            v.is_finite().then_some((r, v))
        })
    }

    /// Error out unless the table has rows to analyze.
    pub fn ensure_analyzable(&self) -> Result<()> {
        if self.rows.is_empty() {
            return Err(Error::InputMalformed(
                "results table has no data rows".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn label() -> GroupLabel {
        GroupLabel::parse("G1-M-5mg-DRUG")
    }

    #[test]
    fn header_aliases_map_to_canonical_names() {
        assert_eq!(canonical_column("Animal_Key"), Some("subject"));
        assert_eq!(canonical_column("Group_Name"), Some("group"));
        assert_eq!(canonical_column("TIME_MIN"), Some("time"));
        assert_eq!(canonical_column("firstorder_Mean"), None);
    }

    #[test]
    fn factor_lookup_covers_metadata_and_time() {
        let row = ResultRow::new("s1", &label(), 30.0);
        assert_eq!(row.factor("Dose").as_deref(), Some("5mg"));
        assert_eq!(row.factor("time").as_deref(), Some("30"));
        assert_eq!(row.factor("group").as_deref(), Some("G1-M-5mg-DRUG"));
        assert!(row.value("missing").is_nan());
    }

    #[test]
    fn feature_names_are_union_sorted() {
        let mut table = RawResultsTable::new();
        let mut a = ResultRow::new("s1", &label(), 0.0);
        a.values.insert("zeta".into(), 1.0);
        let mut b = ResultRow::new("s2", &label(), 0.0);
        b.values.insert("alpha".into(), 2.0);
        table.push(b);
        table.push(a);
        assert_eq!(table.feature_names(), vec!["alpha", "zeta"]);
        table.sort();
        assert_eq!(table.rows[0].subject, "s1");
    }
}
