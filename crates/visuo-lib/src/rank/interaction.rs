//! Two-factor interaction test with a per-subject random intercept.
//!
//! The model is `y = X β + b_subject + ε` with `b ~ N(0, λσ²)` and
//! `ε ~ N(0, σ²)`. For a fixed variance ratio `λ` the GLS estimate of `β` and
//! the ML estimate of `σ²` are closed form, so the likelihood is profiled
//! over `ln λ` with a golden-section search. The interaction block of `β` is
//! then tested with a Wald χ² statistic.

use log::debug;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ChiSquared, ContinuousCDF};
use std::collections::{BTreeMap, BTreeSet};

use super::RankedFeature;
use crate::error::{Error, Result};
use crate::table::{RawResultsTable, ResultRow};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InteractionParams {
    /// First factor column, usually `time`.
    pub factor_a: String,
    pub factor_b: String,
}

impl Default for InteractionParams {
    fn default() -> Self {
        Self {
            factor_a: "time".into(),
            factor_b: "treatment".into(),
        }
    }
}

/// How a factor column enters the design.
#[derive(Debug, Clone, PartialEq)]
enum Coding {
    /// Mean-centered numeric covariate.
    Numeric { center: f64 },
    /// Treatment coding against the first level.
    Levels(Vec<String>),
}

impl Coding {
    fn infer(values: &[String]) -> Self {
        let numbers: Option<Vec<f64>> = values.iter().map(|v| v.trim().parse::<f64>().ok()).collect();
        match numbers {
            Some(nums) if !nums.is_empty() => Coding::Numeric {
                center: nums.iter().sum::<f64>() / nums.len() as f64,
            },
            _ => {
                let levels: BTreeSet<&String> = values.iter().collect();
                Coding::Levels(levels.into_iter().cloned().collect())
            }
        }
    }

    fn columns(&self, value: &str) -> Vec<f64> {
        match self {
            Coding::Numeric { center } => vec![value.trim().parse::<f64>().unwrap_or(f64::NAN) - center],
            Coding::Levels(levels) => levels[1..]
                .iter()
                .map(|l| if l == value { 1.0 } else { 0.0 })
                .collect(),
        }
    }

    fn width(&self) -> usize {
        match self {
            Coding::Numeric { .. } => 1,
            Coding::Levels(levels) => levels.len().saturating_sub(1),
        }
    }
}

/// Fitted fixed effects and their covariance.
#[derive(Debug, Clone)]
pub struct MixedFit {
    pub beta: DVector<f64>,
    pub covariance: DMatrix<f64>,
    pub sigma2: f64,
    pub lambda: f64,
    pub neg2_log_likelihood: f64,
}

/// Per-subject sufficient statistics.
struct Cluster {
    n: f64,
    xx: DMatrix<f64>,
    xy: DVector<f64>,
    yy: f64,
    sx: DVector<f64>,
    sy: f64,
}

struct Profile {
    clusters: Vec<Cluster>,
    total: f64,
    p: usize,
}

impl Profile {
    fn new(rows: &[(String, Vec<f64>, f64)], p: usize) -> Self {
        let mut by_subject: BTreeMap<&str, Vec<(&Vec<f64>, f64)>> = BTreeMap::new();
        for (subject, x, y) in rows {
            by_subject.entry(subject).or_default().push((x, *y));
        }
        let clusters = by_subject
            .into_values()
            .map(|obs| {
                let mut c = Cluster {
                    n: obs.len() as f64,
                    xx: DMatrix::zeros(p, p),
                    xy: DVector::zeros(p),
                    yy: 0.0,
                    sx: DVector::zeros(p),
                    sy: 0.0,
                };
                for (x, y) in obs {
                    let xv = DVector::from_column_slice(x);
                    c.xx += &xv * xv.transpose();
                    c.xy += &xv * y;
                    c.yy += y * y;
                    c.sx += &xv;
                    c.sy += y;
                }
                c
            })
            .collect();
        Self {
            clusters,
            total: rows.len() as f64,
            p,
        }
    }

    /// GLS solution at `λ`: `(β, XᵀV⁻¹X, -2 log L, σ²)`.
    fn solve(&self, lambda: f64) -> Option<(DVector<f64>, DMatrix<f64>, f64, f64)> {
        let mut a = DMatrix::zeros(self.p, self.p);
        let mut b = DVector::zeros(self.p);
        let mut log_det = 0.0;
        for c in &self.clusters {
            let w = lambda / (1.0 + lambda * c.n);
            a += &c.xx - &c.sx * c.sx.transpose() * w;
            b += &c.xy - &c.sx * (c.sy * w);
            log_det += (1.0 + lambda * c.n).ln();
        }
        let beta = a.clone().lu().solve(&b)?;
        let mut q = 0.0;
        for c in &self.clusters {
            let w = lambda / (1.0 + lambda * c.n);
            let rr = c.yy - 2.0 * beta.dot(&c.xy) + (beta.transpose() * &c.xx * &beta)[(0, 0)];
            let rs = c.sy - beta.dot(&c.sx);
            q += rr - w * rs * rs;
        }
        let sigma2 = q / self.total;
        if !(sigma2 > 0.0) || !sigma2.is_finite() {
            return None;
        }
        let neg2ll = self.total * (2.0 * std::f64::consts::PI * sigma2).ln() + log_det + self.total;
        Some((beta, a, neg2ll, sigma2))
    }
}

const LOG_LAMBDA_RANGE: (f64, f64) = (-12.0, 8.0);
const GOLDEN_ITERATIONS: usize = 80;

/// ML fit of a random-intercept model. Rows are `(subject, x, y)`.
pub fn fit_random_intercept(rows: &[(String, Vec<f64>, f64)], p: usize) -> Result<MixedFit> {
    let profile = Profile::new(rows, p);
    let objective = |theta: f64| {
        profile
            .solve(theta.exp())
            .map(|s| s.2)
            .unwrap_or(f64::INFINITY)
    };
    let inv_phi = (5f64.sqrt() - 1.0) / 2.0;
    let (mut lo, mut hi) = LOG_LAMBDA_RANGE;
    let mut c = hi - inv_phi * (hi - lo);
    let mut d = lo + inv_phi * (hi - lo);
    let (mut fc, mut fd) = (objective(c), objective(d));
    for _ in 0..GOLDEN_ITERATIONS {
        if fc < fd {
            hi = d;
            d = c;
            fd = fc;
            c = hi - inv_phi * (hi - lo);
            fc = objective(c);
        } else {
            lo = c;
            c = d;
            fc = fd;
            d = lo + inv_phi * (hi - lo);
            fd = objective(d);
        }
    }
    let mut theta = (lo + hi) / 2.0;
    // The optimum may sit on the boundary (no subject variance).
    if objective(LOG_LAMBDA_RANGE.0) < objective(theta) {
        theta = LOG_LAMBDA_RANGE.0;
    }
    let lambda = theta.exp();
    let (beta, information, neg2ll, sigma2) = profile
        .solve(lambda)
        .ok_or_else(|| Error::Model("likelihood is not finite".into()))?;
    let inverse = information
        .try_inverse()
        .ok_or_else(|| Error::Model("singular fixed-effect information matrix".into()))?;
    Ok(MixedFit {
        beta,
        covariance: inverse * sigma2,
        sigma2,
        lambda,
        neg2_log_likelihood: neg2ll,
    })
}

/// Outcome of testing one feature.
#[derive(Debug, Clone, PartialEq)]
pub enum InteractionOutcome {
    Ranked(RankedFeature),
    /// Not enough observations to fit; skipped quietly.
    Insufficient,
}

/// Fit `feature ~ A * B + (1 | subject)` and test the `A:B` terms.
pub fn test_feature(raw: &RawResultsTable, feature: &str, params: &InteractionParams) -> Result<InteractionOutcome> {
    let mut usable: Vec<(&ResultRow, String, String, f64)> = Vec::new();
    for (row, value) in raw.valid_rows(feature) {
        let (Some(a), Some(b)) = (row.factor(&params.factor_a), row.factor(&params.factor_b)) else {
            continue;
        };
        if a.trim().is_empty() || b.trim().is_empty() {
            continue;
        }
        usable.push((row, a, b, value));
    }
    let a_values: Vec<String> = usable.iter().map(|u| u.1.clone()).collect();
    let b_values: Vec<String> = usable.iter().map(|u| u.2.clone()).collect();
    let coding_a = Coding::infer(&a_values);
    let coding_b = Coding::infer(&b_values);
    let (wa, wb) = (coding_a.width(), coding_b.width());
    if wa == 0 || wb == 0 {
        return Ok(InteractionOutcome::Insufficient);
    }

    let mut rows: Vec<(String, Vec<f64>, f64)> = usable
        .iter()
        .map(|(row, a, b, y)| {
            let ca = coding_a.columns(a);
            let cb = coding_b.columns(b);
            let mut x = Vec::with_capacity(1 + wa + wb + wa * wb);
            x.push(1.0);
            x.extend(&ca);
            x.extend(&cb);
            for va in &ca {
                for vb in &cb {
                    x.push(va * vb);
                }
            }
            (row.subject.clone(), x, *y)
        })
        .collect();

    // Columns that are identically zero carry no information.
    let width = 1 + wa + wb + wa * wb;
    let keep: Vec<usize> = (0..width)
        .filter(|&j| rows.iter().any(|r| r.1[j] != 0.0))
        .collect();
    let interaction: Vec<usize> = keep
        .iter()
        .enumerate()
        .filter(|(_, &j)| j >= 1 + wa + wb)
        .map(|(pos, _)| pos)
        .collect();
    for r in &mut rows {
        r.1 = keep.iter().map(|&j| r.1[j]).collect();
    }
    let subjects: BTreeSet<&str> = rows.iter().map(|r| r.0.as_str()).collect();
    if interaction.is_empty() || subjects.len() < 2 || rows.len() <= keep.len() + 1 {
        return Ok(InteractionOutcome::Insufficient);
    }

    let fit = fit_random_intercept(&rows, keep.len())?;
    let k = interaction.len();
    let beta_i = DVector::from_iterator(k, interaction.iter().map(|&i| fit.beta[i]));
    let cov_i = DMatrix::from_fn(k, k, |r, c| fit.covariance[(interaction[r], interaction[c])]);
    let cov_inv = cov_i
        .try_inverse()
        .ok_or_else(|| Error::Model("singular interaction covariance".into()))?;
    let wald = (beta_i.transpose() * cov_inv * &beta_i)[(0, 0)];
    if !wald.is_finite() || wald < 0.0 {
        return Err(Error::Model(format!("invalid Wald statistic {}", wald)));
    }
    let chi2 = ChiSquared::new(k as f64).map_err(|e| Error::Model(e.to_string()))?;
    let p_value = (1.0 - chi2.cdf(wald)).clamp(0.0, 1.0);
    let effect = beta_i.iter().fold(0.0f64, |m, v| m.max(v.abs()));
    debug!(
        "{}: wald={:.3} df={} p={:.3e} lambda={:.3e}",
        feature, wald, k, p_value, fit.lambda
    );
    Ok(InteractionOutcome::Ranked(RankedFeature {
        feature: feature.to_string(),
        score: p_value,
        p_value: Some(p_value),
        effect: Some(effect),
        support: rows.len(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grouping::GroupLabel;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn table(slope_gap: f64, seed: u64) -> RawResultsTable {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut raw = RawResultsTable::new();
        for s in 0..12 {
            let treated = s % 2 == 1;
            let label = GroupLabel::parse(if treated { "G2-M-5-DRUG" } else { "G1-M-0-CTL" });
            let baseline: f64 = rng.gen_range(-2.0..2.0);
            for t in [0.0, 30.0, 60.0, 90.0] {
                let slope = if treated { 0.01 + slope_gap } else { 0.01 };
                let y = 5.0 + baseline + slope * t + rng.gen_range(-0.1..0.1);
                let mut row = ResultRow::new(format!("s{s:02}"), &label, t);
                row.values.insert("y".into(), y);
                raw.push(row);
            }
        }
        raw
    }

    #[test]
    fn detects_slope_difference() {
        let params = InteractionParams::default();
        let InteractionOutcome::Ranked(strong) = test_feature(&table(0.05, 1), "y", &params).unwrap() else {
            panic!("expected a fit");
        };
        let InteractionOutcome::Ranked(none) = test_feature(&table(0.0, 1), "y", &params).unwrap() else {
            panic!("expected a fit");
        };
        assert!(strong.score < 1e-6, "p={}", strong.score);
        assert!(none.score > strong.score);
        assert!((strong.effect.unwrap() - 0.05).abs() < 0.01);
    }

    #[test]
    fn single_level_factor_is_insufficient() {
        let mut raw = table(0.0, 2);
        for row in &mut raw.rows {
            row.metadata.insert("treatment".into(), "CTL".into());
        }
        let outcome = test_feature(&raw, "y", &InteractionParams::default()).unwrap();
        assert_eq!(outcome, InteractionOutcome::Insufficient);
    }

    #[test]
    fn random_intercept_absorbs_baselines() {
        let rows: Vec<(String, Vec<f64>, f64)> = (0..6)
            .flat_map(|s| {
                (0..4).map(move |t| {
                    let noise = if t % 2 == 0 { 0.05 } else { -0.05 };
                    (format!("s{s}"), vec![1.0, t as f64], 10.0 * s as f64 + 2.0 * t as f64 + noise)
                })
            })
            .collect();
        let fit = fit_random_intercept(&rows, 2).unwrap();
        assert!((fit.beta[1] - 2.0).abs() < 0.05);
        assert!(fit.lambda > 1.0);
    }
}
