//! Feature ranking over the raw per-subject table.
//!
//! Every method coerces, drops what it cannot use and returns an empty
//! ranking when nothing qualifies. Only a malformed table is an error.

pub mod curves;
pub mod dtw;
pub mod interaction;
pub mod normalization;
pub mod separation;

use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::error::{Degradation, Error, Result};
use crate::table::RawResultsTable;

pub use curves::{CurveStatistic, GroupCurves};
pub use dtw::dtw_distance;
pub use interaction::InteractionParams;
pub use normalization::NormalizationParams;
pub use separation::SeparationParams;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedFeature {
    pub feature: String,
    pub score: f64,
    pub p_value: Option<f64>,
    pub effect: Option<f64>,
    /// Finite observations that went into the score.
    pub support: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum RankingMethod {
    Separation(SeparationParams),
    Interaction(InteractionParams),
    Normalization(NormalizationParams),
}

impl RankingMethod {
    pub fn name(&self) -> &'static str {
        match self {
            RankingMethod::Separation(_) => "separation",
            RankingMethod::Interaction(_) => "interaction",
            RankingMethod::Normalization(_) => "normalization",
        }
    }

    /// Higher scores rank first, except for p-values.
    pub fn descending(&self) -> bool {
        !matches!(self, RankingMethod::Interaction(_))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingResult {
    pub method: String,
    pub entries: Vec<RankedFeature>,
    /// Features excluded because a model could not be fitted.
    pub failures: Vec<Degradation>,
}

/// Rank every feature column of `raw` with `method`.
pub fn rank(raw: &RawResultsTable, method: &RankingMethod) -> Result<RankingResult> {
    raw.ensure_analyzable()?;
    if let RankingMethod::Normalization(p) = method {
        if p.control_group.is_empty() || p.treated_group.is_empty() {
            return Err(Error::InputMalformed(
                "normalization ranking needs control and treated group names".into(),
            ));
        }
    }

    let mut entries = Vec::new();
    let mut failures = Vec::new();
    for feature in raw.feature_names() {
        let entry = match method {
            RankingMethod::Separation(p) => separation::score_feature(raw, &feature, p),
            RankingMethod::Normalization(p) => normalization::score_feature(raw, &feature, p),
            RankingMethod::Interaction(p) => match interaction::test_feature(raw, &feature, p) {
                Ok(interaction::InteractionOutcome::Ranked(r)) => Some(r),
                Ok(interaction::InteractionOutcome::Insufficient) => None,
                Err(err) => {
                    let failure = Degradation::StatModelFailure {
                        feature: feature.clone(),
                        reason: err.to_string(),
                    };
                    failure.log();
                    failures.push(failure);
                    None
                }
            },
        };
        if let Some(entry) = entry.filter(|e| e.score.is_finite()) {
            entries.push(entry);
        }
    }

    sort_entries(&mut entries, method.descending());
    if entries.is_empty() {
        warn!("{} ranking: no feature had enough valid data", method.name());
    } else {
        info!("{} ranking: {} feature(s) scored", method.name(), entries.len());
    }
    Ok(RankingResult {
        method: method.name().to_string(),
        entries,
        failures,
    })
}

fn sort_entries(entries: &mut [RankedFeature], descending: bool) {
    entries.sort_by(|a, b| {
        let primary = a.score.total_cmp(&b.score);
        let primary = if descending { primary.reverse() } else { primary };
        match primary {
            Ordering::Equal => a.feature.cmp(&b.feature),
            other => other,
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grouping::GroupLabel;
    use crate::table::ResultRow;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn trend_and_noise() -> RawResultsTable {
        let mut rng = StdRng::seed_from_u64(3);
        let mut raw = RawResultsTable::new();
        for (group, trend) in [("Control", [1.0, 1.0, 1.0]), ("Treated", [1.0, 2.0, 3.0])] {
            for s in 0..4 {
                for (i, t) in [0.0, 30.0, 60.0].iter().enumerate() {
                    let mut row = ResultRow::new(format!("{group}-{s}"), &GroupLabel::parse(group), *t);
                    row.values.insert("trend".into(), trend[i]);
                    row.values.insert("noise".into(), rng.gen_range(0.0..0.1));
                    raw.push(row);
                }
            }
        }
        raw
    }

    #[test]
    fn trend_outranks_noise() {
        let result = rank(&trend_and_noise(), &RankingMethod::Separation(SeparationParams::default())).unwrap();
        assert_eq!(result.entries[0].feature, "trend");
        assert_eq!(result.entries[1].feature, "noise");
        assert!(result.entries[0].score > result.entries[1].score);
    }

    #[test]
    fn permutation_p_value_is_bounded() {
        let params = SeparationParams {
            permutations: 20,
            ..Default::default()
        };
        let result = rank(&trend_and_noise(), &RankingMethod::Separation(params)).unwrap();
        let p = result.entries[0].p_value.unwrap();
        assert!(p > 0.0 && p <= 1.0);
    }

    #[test]
    fn all_nan_table_ranks_nothing() {
        let mut raw = RawResultsTable::new();
        let mut row = ResultRow::new("s", &GroupLabel::parse("A"), 0.0);
        row.values.insert("f".into(), f64::NAN);
        raw.push(row);
        for method in [
            RankingMethod::Separation(SeparationParams::default()),
            RankingMethod::Interaction(InteractionParams::default()),
        ] {
            assert!(rank(&raw, &method).unwrap().entries.is_empty());
        }
    }

    #[test]
    fn empty_table_is_malformed() {
        let err = rank(&RawResultsTable::new(), &RankingMethod::Separation(SeparationParams::default()));
        assert!(matches!(err, Err(Error::InputMalformed(_))));
    }

    #[test]
    fn ties_break_by_name() {
        let mut entries = vec![
            RankedFeature { feature: "b".into(), score: 1.0, p_value: None, effect: None, support: 1 },
            RankedFeature { feature: "a".into(), score: 1.0, p_value: None, effect: None, support: 1 },
        ];
        sort_entries(&mut entries, true);
        assert_eq!(entries[0].feature, "a");
    }
}
