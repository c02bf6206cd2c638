use assert_cmd::Command;
use serde_json::Value;
use std::{fs, path::Path, path::PathBuf};
use tempfile::tempdir;

use visuo_lib::io::image::save_frame;
use visuo_lib::Frame;

fn workspace_root() -> PathBuf {
    let manifest_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    manifest_dir
        .parent()
        .unwrap()
        .parent()
        .unwrap()
        .to_path_buf()
}

fn visuo() -> Command {
    Command::cargo_bin("visuo").unwrap()
}

fn stdout_json(output: &[u8]) -> Value {
    let text = String::from_utf8_lossy(output);
    let last = text.lines().last().unwrap_or_default();
    serde_json::from_str(last).unwrap()
}

#[test]
fn summarize_then_cluster() {
    let temp = tempdir().unwrap();
    let raw = workspace_root().join("test_data/raw_results.csv");
    let summary = temp.path().join("summary.csv");
    let out = visuo()
        .args(["summarize", "--input", raw.to_str().unwrap(), "--out", summary.to_str().unwrap()])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    // 2 groups x 3 times x 3 features
    assert_eq!(stdout_json(&out)["rows"], 18);

    let clusters = temp.path().join("clusters");
    visuo()
        .args([
            "cluster",
            "--input",
            summary.to_str().unwrap(),
            "--mode",
            "multivariate",
            "--linkage",
            "complete",
            "--out",
            clusters.to_str().unwrap(),
        ])
        .assert()
        .success();
    let matrix = fs::read_to_string(clusters.join("multivariate_distance.csv")).unwrap();
    assert!(matrix.starts_with("group,G1-M-0mg-VEH,G2-M-5mg-DRUG"));
    let order: Value =
        serde_json::from_str(&fs::read_to_string(clusters.join("multivariate_order.json")).unwrap()).unwrap();
    assert_eq!(order["merges"].as_array().unwrap().len(), 1);

    visuo()
        .args([
            "cluster",
            "--input",
            summary.to_str().unwrap(),
            "--feature",
            "no_such_feature",
            "--out",
            clusters.to_str().unwrap(),
        ])
        .assert()
        .failure();
}

#[test]
fn rank_methods_write_tables() {
    let temp = tempdir().unwrap();
    let raw = workspace_root().join("test_data/raw_results.csv");
    let out = visuo()
        .args([
            "rank",
            "--input",
            raw.to_str().unwrap(),
            "--method",
            "separation",
            "--permutations",
            "50",
            "--out",
            temp.path().to_str().unwrap(),
        ])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let summary = stdout_json(&out);
    assert_eq!(summary["method"], "separation");
    assert_eq!(summary["top"][0], "mean_intensity");
    let table = fs::read_to_string(temp.path().join("ranking_separation.csv")).unwrap();
    assert!(table.starts_with("feature,score,p_value,effect,support"));

    visuo()
        .args([
            "rank",
            "--input",
            raw.to_str().unwrap(),
            "--method",
            "normalization",
            "--control",
            "G1-M-0mg-VEH",
            "--treated",
            "G2-M-5mg-DRUG",
            "--out",
            temp.path().to_str().unwrap(),
        ])
        .assert()
        .success();
    assert!(temp.path().join("ranking_normalization.json").exists());

    visuo()
        .args([
            "rank",
            "--input",
            raw.to_str().unwrap(),
            "--method",
            "normalization",
            "--out",
            temp.path().to_str().unwrap(),
        ])
        .assert()
        .failure();
}

#[test]
fn init_config_is_loadable_by_run() {
    let temp = tempdir().unwrap();
    let config = temp.path().join("run.toml");
    visuo()
        .args(["init-config", "--out", config.to_str().unwrap()])
        .assert()
        .success();
    let text = fs::read_to_string(&config).unwrap();
    assert!(text.contains("[registration]"));
    assert!(text.contains("[outputs]"));

    // Default input dir is "." next to the config, which holds no acquisitions.
    let out = visuo()
        .args(["run", "--config", config.to_str().unwrap()])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let summary = stdout_json(&out);
    assert_eq!(summary["subjects_total"], 0);
    assert!(temp.path().join("output/run_log.json").exists());
}

fn write_series(dir: &Path) {
    for (group, animal) in [("G1-F-0mg-VEH", 1), ("G2-F-5mg-DRUG", 2)] {
        for (k, time) in [0u32, 60].iter().enumerate() {
            let stem = format!("20240301_{}-A{:02}_{:04}", group, animal, time);
            let wf = Frame::from_fn(32, 32, |x, y| 500.0 + (x * 7 + y * 3) as f32);
            let fl = Frame::from_fn(32, 32, |x, y| {
                let inside = x > 10 && x < 16 + 3 * k && y > 10 && y < 20;
                if inside {
                    2500.0
                } else {
                    80.0
                }
            });
            save_frame(&wf, &dir.join(format!("{}_WF.png", stem))).unwrap();
            save_frame(&fl, &dir.join(format!("{}_FL.png", stem))).unwrap();
        }
    }
}

#[test]
fn run_with_overrides_and_inspect() {
    let temp = tempdir().unwrap();
    let input = temp.path().join("images");
    let output = temp.path().join("results");
    fs::create_dir_all(&input).unwrap();
    write_series(&input);

    let out = visuo()
        .args(["inspect", "--input", input.to_str().unwrap()])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let listing: Value = serde_json::from_slice(&out).unwrap();
    assert_eq!(listing["subjects"].as_array().unwrap().len(), 2);
    assert_eq!(listing["canonical_times"], serde_json::json!([0, 60]));

    let config = workspace_root().join("test_data/run.toml");
    let out = visuo()
        .args([
            "run",
            "--config",
            config.to_str().unwrap(),
            "--input",
            input.to_str().unwrap(),
            "--output",
            output.to_str().unwrap(),
            "--features-only",
            "--json-progress",
        ])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let text = String::from_utf8_lossy(&out);
    assert!(text.lines().any(|l| l.contains("\"event\":\"started\"")));
    let summary = stdout_json(&out);
    assert_eq!(summary["subjects_completed"], 2);
    assert!(output.join("_Feature_Extraction_Raw_Results__pilot.csv").exists());
    assert!(!output.join("collages").exists());

    // The session written by the run reproduces it.
    let rerun = temp.path().join("rerun");
    visuo()
        .args([
            "run",
            "--session",
            output.join("session.json").to_str().unwrap(),
            "--output",
            rerun.to_str().unwrap(),
        ])
        .assert()
        .success();
    assert!(rerun.join("_Feature_Extraction_Group_Summary__pilot.csv").exists());
}
