//! Table-level analyses and the files they produce.

use anyhow::{Context, Result};
use csv::WriterBuilder;
use log::{info, warn};
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};

use visuo_lib::aggregate::GroupSummaryTable;
use visuo_lib::cluster::{cluster, ClusterParams, Clustering};
use visuo_lib::io::tables::{read_group_summary, read_raw_results};
use visuo_lib::plot::{figure_from_clustering, figure_from_curves, PlotBackend};
use visuo_lib::rank::{rank, CurveStatistic, GroupCurves, RankingMethod, RankingResult};

use crate::render::PngBackend;

fn opt_cell(v: Option<f64>) -> String {
    v.map(|x| x.to_string()).unwrap_or_default()
}

pub fn write_ranking_csv(path: &Path, result: &RankingResult) -> Result<()> {
    let file = fs::File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = WriterBuilder::new().from_writer(file);
    writer.write_record(["feature", "score", "p_value", "effect", "support"])?;
    for entry in &result.entries {
        writer.write_record(&[
            entry.feature.clone(),
            entry.score.to_string(),
            opt_cell(entry.p_value),
            opt_cell(entry.effect),
            entry.support.to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_ranking_json(path: &Path, result: &RankingResult) -> Result<()> {
    let file = fs::File::create(path).with_context(|| format!("creating {}", path.display()))?;
    serde_json::to_writer_pretty(file, result)?;
    Ok(())
}

/// Rank the raw table at `raw_path`, writing `<stem>.csv` and `<stem>.json` into `out_dir`.
pub fn rank_file(raw_path: &Path, method: &RankingMethod, out_dir: &Path) -> Result<(RankingResult, Vec<PathBuf>)> {
    let raw = read_raw_results(raw_path)
        .with_context(|| format!("reading raw results {}", raw_path.display()))?;
    let result = rank(&raw, method)?;
    fs::create_dir_all(out_dir).with_context(|| format!("creating {}", out_dir.display()))?;
    let stem = format!("ranking_{}", result.method);
    let csv_path = out_dir.join(format!("{}.csv", stem));
    let json_path = out_dir.join(format!("{}.json", stem));
    write_ranking_csv(&csv_path, &result)?;
    write_ranking_json(&json_path, &result)?;
    info!(
        "{} ranking written: {} feature(s), {} model failure(s)",
        result.method,
        result.entries.len(),
        result.failures.len()
    );
    Ok((result, vec![csv_path, json_path]))
}

pub fn write_distance_csv(path: &Path, clustering: &Clustering) -> Result<()> {
    let file = fs::File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = WriterBuilder::new().from_writer(file);
    let mut header = vec!["group".to_string()];
    header.extend(clustering.matrix.labels.iter().cloned());
    writer.write_record(&header)?;
    for (label, row) in clustering.matrix.labels.iter().zip(&clustering.matrix.values) {
        let mut record = vec![label.clone()];
        record.extend(row.iter().map(|v| v.to_string()));
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_order_json(path: &Path, clustering: &Clustering) -> Result<()> {
    let order: Vec<&str> = clustering
        .dendrogram
        .order
        .iter()
        .filter_map(|&i| clustering.matrix.labels.get(i).map(String::as_str))
        .collect();
    let doc = json!({
        "name": clustering.name,
        "labels": clustering.matrix.labels,
        "order": clustering.dendrogram.order,
        "ordered_labels": order,
        "merges": clustering.dendrogram.merges,
    });
    fs::write(path, serde_json::to_string_pretty(&doc)?)
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

/// File names cannot carry every character a feature name may contain.
fn file_stem(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' { c } else { '_' })
        .collect()
}

/// Cluster a summary table and write matrix, order and heatmap per result.
///
/// A heatmap that fails to render is logged and skipped; the matrix and order
/// files are still written.
pub fn cluster_summary(summary: &GroupSummaryTable, params: &ClusterParams, out_dir: &Path) -> Result<Vec<PathBuf>> {
    let clusterings = cluster(summary, params)?;
    fs::create_dir_all(out_dir).with_context(|| format!("creating {}", out_dir.display()))?;
    let mut written = Vec::new();
    for c in &clusterings {
        let stem = file_stem(&c.name);
        let distance = out_dir.join(format!("{}_distance.csv", stem));
        let order = out_dir.join(format!("{}_order.json", stem));
        let heatmap = out_dir.join(format!("{}_heatmap.png", stem));
        write_distance_csv(&distance, c)?;
        write_order_json(&order, c)?;
        written.push(distance);
        written.push(order);
        let side = (360 + 40 * c.matrix.len() as u32).min(2000);
        match PngBackend::new(&heatmap, (side, side)).draw(&figure_from_clustering(c)) {
            Ok(()) => written.push(heatmap),
            Err(err) => warn!("heatmap for {} not rendered: {:#}", c.name, err),
        }
    }
    info!("clustering wrote {} file(s) to {}", written.len(), out_dir.display());
    Ok(written)
}

pub fn cluster_file(summary_path: &Path, params: &ClusterParams, out_dir: &Path) -> Result<Vec<PathBuf>> {
    let summary = read_group_summary(summary_path)
        .with_context(|| format!("reading group summary {}", summary_path.display()))?;
    cluster_summary(&summary, params, out_dir)
}

/// Per-feature group curve chart from a summary table.
pub fn plot_curves(summary_path: &Path, feature: &str, statistic: CurveStatistic, out: &Path) -> Result<()> {
    let summary = read_group_summary(summary_path)
        .with_context(|| format!("reading group summary {}", summary_path.display()))?;
    let curves = GroupCurves::from_summary(&summary, feature, statistic);
    if curves.is_empty() {
        anyhow::bail!("feature `{}` has no values in {}", feature, summary_path.display());
    }
    PngBackend::new(out, (800, 480)).draw(&figure_from_curves(feature, &curves, 1024))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use visuo_lib::aggregate::SummaryRow;
    use visuo_lib::grouping::GroupLabel;
    use visuo_lib::io::tables::{write_group_summary, write_raw_results};
    use visuo_lib::rank::SeparationParams;
    use visuo_lib::{RawResultsTable, ResultRow};

    #[test]
    fn ranking_files_have_expected_columns() {
        let dir = tempdir().unwrap();
        let mut raw = RawResultsTable::new();
        for (group, slope) in [("Control", 0.0), ("Treated", 1.0)] {
            for s in 0..3 {
                for t in [0.0, 30.0, 60.0] {
                    let mut row = ResultRow::new(format!("{group}{s}"), &GroupLabel::parse(group), t);
                    row.values.insert("trend".into(), 1.0 + slope * t / 30.0);
                    row.values.insert("flat".into(), 5.0);
                    raw.push(row);
                }
            }
        }
        let raw_path = dir.path().join("raw.csv");
        write_raw_results(&raw, &raw_path).unwrap();
        let method = RankingMethod::Separation(SeparationParams::default());
        let (result, paths) = rank_file(&raw_path, &method, dir.path()).unwrap();
        assert_eq!(result.entries[0].feature, "trend");
        let text = fs::read_to_string(&paths[0]).unwrap();
        assert!(text.starts_with("feature,score,p_value,effect,support"));
        let json: serde_json::Value = serde_json::from_str(&fs::read_to_string(&paths[1]).unwrap()).unwrap();
        assert_eq!(json["method"], "separation");
    }

    #[test]
    fn cluster_writes_matrix_and_order() {
        let dir = tempdir().unwrap();
        let mut rows = Vec::new();
        for (group, values) in [("A", [1.0, 2.0]), ("B", [1.0, 2.0]), ("C", [4.0, 4.0])] {
            for (k, v) in values.iter().enumerate() {
                rows.push(SummaryRow {
                    group: group.into(),
                    time: k as f64,
                    feature: "f/x".into(),
                    mean: *v,
                    median: *v,
                    std: 0.0,
                    sem: 0.0,
                    count: 1,
                });
            }
        }
        let summary_path = dir.path().join("summary.csv");
        write_group_summary(&GroupSummaryTable { rows }, &summary_path).unwrap();
        let out = dir.path().join("clusters");
        let written = cluster_file(&summary_path, &ClusterParams::default(), &out).unwrap();
        assert!(written.contains(&out.join("f_x_distance.csv")));
        let matrix = fs::read_to_string(out.join("f_x_distance.csv")).unwrap();
        let mut lines = matrix.lines();
        assert_eq!(lines.next(), Some("group,A,B,C"));
        assert!(lines.next().unwrap().starts_with("A,0,0,"));
        let order: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(out.join("f_x_order.json")).unwrap()).unwrap();
        assert_eq!(order["order"].as_array().unwrap().len(), 3);
    }
}
