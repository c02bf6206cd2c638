//! Group-to-group DTW distance matrices and agglomerative clustering.

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::aggregate::GroupSummaryTable;
use crate::error::{Error, Result};
use crate::rank::{dtw_distance, CurveStatistic, GroupCurves};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterMode {
    /// One matrix per feature.
    #[default]
    Univariate,
    /// Min-max scaled per-feature matrices averaged into one.
    Multivariate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Linkage {
    #[default]
    Average,
    Complete,
    Single,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterParams {
    pub mode: ClusterMode,
    pub linkage: Linkage,
    pub statistic: CurveStatistic,
    /// Features to use; empty means every feature in the summary.
    pub features: Vec<String>,
}

impl Default for ClusterParams {
    fn default() -> Self {
        Self {
            mode: ClusterMode::Univariate,
            linkage: Linkage::Average,
            statistic: CurveStatistic::Mean,
            features: Vec::new(),
        }
    }
}

/// Square, symmetric, zero-diagonal distance matrix over labelled groups.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DistanceMatrix {
    pub labels: Vec<String>,
    pub values: Vec<Vec<f64>>,
}

impl DistanceMatrix {
    /// Builds from any pairwise function; only the upper triangle is evaluated.
    pub fn from_fn(labels: Vec<String>, mut distance: impl FnMut(usize, usize) -> f64) -> Self {
        let n = labels.len();
        let mut values = vec![vec![0.0; n]; n];
        for i in 0..n {
            for j in i + 1..n {
                let d = distance(i, j);
                values[i][j] = d;
                values[j][i] = d;
            }
        }
        Self { labels, values }
    }

    /// DTW distances between the given groups' curves.
    pub fn from_curves(curves: &GroupCurves, groups: &[String]) -> Self {
        let series: Vec<&[f64]> = groups
            .iter()
            .map(|g| curves.curves.get(g).map(Vec::as_slice).unwrap_or(&[]))
            .collect();
        Self::from_fn(groups.to_vec(), |i, j| dtw_distance(series[i], series[j]))
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.values[i][j]
    }

    /// Entries scaled to `[0, 1]` over the whole matrix, diagonal included.
    /// An all-zero matrix stays zero.
    pub fn min_max_scaled(&self) -> Self {
        let off: Vec<f64> = self.upper_triangle().filter(|v| v.is_finite()).collect();
        let lo = off.iter().copied().fold(0.0, f64::min);
        let hi = off.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let span = hi - lo;
        Self::from_fn(self.labels.clone(), |i, j| {
            let v = self.values[i][j];
            if span > 0.0 && v.is_finite() {
                (v - lo) / span
            } else {
                0.0
            }
        })
    }

    /// Rows and columns permuted into `order`.
    pub fn reordered(&self, order: &[usize]) -> Self {
        Self {
            labels: order.iter().map(|&i| self.labels[i].clone()).collect(),
            values: order
                .iter()
                .map(|&i| order.iter().map(|&j| self.values[i][j]).collect())
                .collect(),
        }
    }

    fn upper_triangle(&self) -> impl Iterator<Item = f64> + '_ {
        let n = self.len();
        (0..n).flat_map(move |i| (i + 1..n).map(move |j| self.values[i][j]))
    }

    /// Element-wise mean of equally labelled matrices.
    fn average(matrices: &[DistanceMatrix]) -> Option<Self> {
        let first = matrices.first()?;
        let k = matrices.len() as f64;
        Some(Self::from_fn(first.labels.clone(), |i, j| {
            matrices.iter().map(|m| m.values[i][j]).sum::<f64>() / k
        }))
    }
}

/// One agglomeration step. Ids below the leaf count are leaves; merge `k`
/// creates cluster id `leaves + k`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Merge {
    pub left: usize,
    pub right: usize,
    pub distance: f64,
    pub size: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dendrogram {
    /// Leaf indices in dendrogram order.
    pub order: Vec<usize>,
    pub merges: Vec<Merge>,
}

struct Cluster {
    id: usize,
    members: Vec<usize>,
}

fn linkage_distance(matrix: &DistanceMatrix, a: &[usize], b: &[usize], linkage: Linkage) -> f64 {
    let pairs = a.iter().flat_map(|&i| b.iter().map(move |&j| (i, j)));
    match linkage {
        Linkage::Average => {
            let sum: f64 = pairs.map(|(i, j)| matrix.get(i, j)).sum();
            sum / (a.len() * b.len()) as f64
        }
        Linkage::Complete => pairs.map(|(i, j)| matrix.get(i, j)).fold(f64::NEG_INFINITY, f64::max),
        Linkage::Single => pairs.map(|(i, j)| matrix.get(i, j)).fold(f64::INFINITY, f64::min),
    }
}

/// Agglomerative clustering. Ties go to the earliest pair in current cluster
/// order, so the result depends only on the matrix.
pub fn hierarchical(matrix: &DistanceMatrix, linkage: Linkage) -> Dendrogram {
    let n = matrix.len();
    let mut active: Vec<Cluster> = (0..n).map(|i| Cluster { id: i, members: vec![i] }).collect();
    let mut merges = Vec::with_capacity(n.saturating_sub(1));
    while active.len() > 1 {
        let mut best: Option<(usize, usize, f64)> = None;
        for i in 0..active.len() {
            for j in i + 1..active.len() {
                let d = linkage_distance(matrix, &active[i].members, &active[j].members, linkage);
                // NaN never compares smaller, so it only wins when nothing else is finite.
                if best.map_or(true, |(_, _, b)| d < b || (b.is_nan() && !d.is_nan())) {
                    best = Some((i, j, d));
                }
            }
        }
        let (i, j, distance) = best.unwrap_or((0, 1, f64::NAN));
        let right = active.remove(j);
        let left = &mut active[i];
        merges.push(Merge {
            left: left.id,
            right: right.id,
            distance,
            size: left.members.len() + right.members.len(),
        });
        left.id = n + merges.len() - 1;
        left.members.extend(right.members);
    }
    let order = active.pop().map(|c| c.members).unwrap_or_default();
    Dendrogram { order, merges }
}

/// A distance matrix with its clustering, named after the feature or mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clustering {
    pub name: String,
    pub matrix: DistanceMatrix,
    pub dendrogram: Dendrogram,
}

impl Clustering {
    fn new(name: impl Into<String>, matrix: DistanceMatrix, linkage: Linkage) -> Self {
        let dendrogram = hierarchical(&matrix, linkage);
        Self {
            name: name.into(),
            matrix,
            dendrogram,
        }
    }

    /// The matrix with rows and columns in dendrogram order.
    pub fn ordered_matrix(&self) -> DistanceMatrix {
        self.matrix.reordered(&self.dendrogram.order)
    }
}

fn selected_features(summary: &GroupSummaryTable, params: &ClusterParams) -> Result<Vec<String>> {
    let available = summary.features();
    if params.features.is_empty() {
        return Ok(available);
    }
    for f in &params.features {
        if !available.contains(f) {
            return Err(Error::InputMalformed(format!("feature `{f}` is not in the group summary")));
        }
    }
    Ok(params.features.clone())
}

/// Cluster groups by their feature curves.
pub fn cluster(summary: &GroupSummaryTable, params: &ClusterParams) -> Result<Vec<Clustering>> {
    if summary.is_empty() {
        return Err(Error::InputMalformed("group summary has no rows".into()));
    }
    let features = selected_features(summary, params)?;
    let curves: Vec<(String, GroupCurves)> = features
        .into_iter()
        .map(|f| {
            let c = GroupCurves::from_summary(summary, &f, params.statistic);
            (f, c)
        })
        .collect();

    let out = match params.mode {
        ClusterMode::Univariate => curves
            .iter()
            .filter_map(|(feature, c)| {
                if c.len() < 2 {
                    warn!("clustering: `{feature}` has fewer than two groups, skipped");
                    return None;
                }
                let groups: Vec<String> = c.curves.keys().cloned().collect();
                let matrix = DistanceMatrix::from_curves(c, &groups);
                Some(Clustering::new(feature.clone(), matrix, params.linkage))
            })
            .collect(),
        ClusterMode::Multivariate => {
            let mut common: Option<BTreeSet<String>> = None;
            for (_, c) in &curves {
                let groups: BTreeSet<String> = c.curves.keys().cloned().collect();
                common = Some(match common {
                    None => groups,
                    Some(acc) => acc.intersection(&groups).cloned().collect(),
                });
            }
            let groups: Vec<String> = common.unwrap_or_default().into_iter().collect();
            if groups.len() < 2 {
                Vec::new()
            } else {
                let scaled: Vec<DistanceMatrix> = curves
                    .iter()
                    .map(|(_, c)| DistanceMatrix::from_curves(c, &groups).min_max_scaled())
                    .collect();
                debug!("multivariate clustering over {} feature(s)", scaled.len());
                DistanceMatrix::average(&scaled)
                    .map(|m| vec![Clustering::new("multivariate", m, params.linkage)])
                    .unwrap_or_default()
            }
        }
    };
    if out.is_empty() {
        let available = summary.groups().len();
        return Err(Error::InsufficientData { required: 2, available });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::SummaryRow;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn summary(curves: &[(&str, &str, [f64; 3])]) -> GroupSummaryTable {
        let mut rows = Vec::new();
        for (group, feature, values) in curves {
            for (k, v) in values.iter().enumerate() {
                rows.push(SummaryRow {
                    group: group.to_string(),
                    time: k as f64 * 30.0,
                    feature: feature.to_string(),
                    mean: *v,
                    median: *v,
                    std: 0.0,
                    sem: 0.0,
                    count: 1,
                });
            }
        }
        GroupSummaryTable { rows }
    }

    #[test]
    fn random_matrices_are_symmetric_with_zero_diagonal() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut rows = Vec::new();
        for g in 0..5 {
            for f in ["a", "b"] {
                let values = [rng.gen_range(-5.0..5.0), rng.gen_range(-5.0..5.0), rng.gen_range(-5.0..5.0)];
                rows.push((format!("G{g}"), f, values));
            }
        }
        let spec: Vec<(&str, &str, [f64; 3])> = rows.iter().map(|(g, f, v)| (g.as_str(), *f, *v)).collect();
        let table = summary(&spec);
        for mode in [ClusterMode::Univariate, ClusterMode::Multivariate] {
            let params = ClusterParams { mode, ..Default::default() };
            for c in cluster(&table, &params).unwrap() {
                let m = &c.matrix;
                for i in 0..m.len() {
                    assert_eq!(m.get(i, i), 0.0);
                    for j in 0..m.len() {
                        assert_eq!(m.get(i, j), m.get(j, i));
                    }
                }
                let mut order = c.dendrogram.order.clone();
                order.sort();
                assert_eq!(order, (0..m.len()).collect::<Vec<_>>());
                assert_eq!(c.dendrogram.merges.len(), m.len() - 1);
            }
        }
    }

    #[test]
    fn identical_curves_have_zero_distance() {
        let table = summary(&[
            ("A", "f", [1.0, 2.0, 3.0]),
            ("B", "f", [1.0, 2.0, 3.0]),
            ("C", "f", [5.0, 5.0, 5.0]),
        ]);
        let c = &cluster(&table, &ClusterParams::default()).unwrap()[0];
        assert_eq!(c.matrix.labels, vec!["A", "B", "C"]);
        assert_eq!(c.matrix.get(0, 1), 0.0);
        assert!(c.matrix.get(0, 2) > 0.0);
        assert_eq!(c.dendrogram.merges[0].left, 0);
        assert_eq!(c.dendrogram.merges[0].right, 1);
        assert_eq!(c.dendrogram.merges[0].distance, 0.0);
    }

    #[test]
    fn linkage_orders_nearby_leaves_together() {
        let points: [f64; 4] = [0.0, 10.0, 1.0, 11.0];
        let matrix = DistanceMatrix::from_fn((0..4).map(|i| i.to_string()).collect(), |i, j| {
            (points[i] - points[j]).abs()
        });
        for linkage in [Linkage::Average, Linkage::Complete, Linkage::Single] {
            let d = hierarchical(&matrix, linkage);
            assert_eq!(d.order, vec![0, 2, 1, 3]);
            assert_eq!(d.merges[2].size, 4);
            assert_eq!((d.merges[2].left, d.merges[2].right), (4, 5));
        }
        let ordered = matrix.reordered(&[0, 2, 1, 3]);
        assert_eq!(ordered.get(0, 1), 1.0);
    }

    #[test]
    fn multivariate_uses_common_groups_and_scales() {
        let table = summary(&[
            ("A", "f", [0.0, 0.0, 0.0]),
            ("B", "f", [1.0, 1.0, 1.0]),
            ("C", "f", [3.0, 3.0, 3.0]),
            ("A", "g", [0.0, 0.0, 0.0]),
            ("B", "g", [2.0, 2.0, 2.0]),
        ]);
        let params = ClusterParams {
            mode: ClusterMode::Multivariate,
            ..Default::default()
        };
        let c = &cluster(&table, &params).unwrap()[0];
        assert_eq!(c.name, "multivariate");
        assert_eq!(c.matrix.labels, vec!["A", "B"]);
        assert_eq!(c.matrix.get(0, 1), 1.0);
    }

    #[test]
    fn unknown_feature_and_empty_summary_are_malformed() {
        let table = summary(&[("A", "f", [1.0, 1.0, 1.0]), ("B", "f", [2.0, 2.0, 2.0])]);
        let params = ClusterParams {
            features: vec!["missing".into()],
            ..Default::default()
        };
        assert!(matches!(cluster(&table, &params), Err(Error::InputMalformed(_))));
        assert!(matches!(
            cluster(&GroupSummaryTable::default(), &ClusterParams::default()),
            Err(Error::InputMalformed(_))
        ));
        let single = summary(&[("A", "f", [1.0, 1.0, 1.0])]);
        assert!(matches!(
            cluster(&single, &ClusterParams::default()),
            Err(Error::InsufficientData { .. })
        ));
    }
}
