use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use visuo_lib::Degradation;

/// Summary of one batch run, written as `run_log.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunLog {
    pub started_unix: f64,
    pub finished_unix: f64,
    pub subjects_total: usize,
    pub subjects_completed: usize,
    pub cancelled: bool,
    pub degradations: Vec<Degradation>,
    pub artifacts: Vec<String>,
}

impl RunLog {
    /// Degradation counts keyed by kind.
    pub fn counts(&self) -> Vec<(&'static str, usize)> {
        let mut counts: Vec<(&'static str, usize)> = Vec::new();
        for d in &self.degradations {
            let kind = match d {
                Degradation::ParseSkip { .. } => "parse_skip",
                Degradation::IncompletePair { .. } => "incomplete_pair",
                Degradation::RegistrationFallback { .. } => "registration_fallback",
                Degradation::ExtractionGap { .. } => "extraction_gap",
                Degradation::StatModelFailure { .. } => "stat_model_failure",
            };
            match counts.iter_mut().find(|(k, _)| *k == kind) {
                Some((_, n)) => *n += 1,
                None => counts.push((kind, 1)),
            }
        }
        counts
    }
}

pub(crate) fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|dur| dur.as_secs_f64())
        .unwrap_or(0.0)
}

pub fn write_run_log(path: &Path, log: &RunLog) -> Result<()> {
    let file = fs::File::create(path).with_context(|| format!("creating run log {}", path.display()))?;
    serde_json::to_writer_pretty(file, log)?;
    Ok(())
}

pub fn read_run_log(path: &Path) -> Result<RunLog> {
    let file =
        fs::File::open(path).with_context(|| format!("opening run log {}", path.display()))?;
    let log = serde_json::from_reader::<_, RunLog>(file)
        .with_context(|| format!("parsing run log {}", path.display()))?;
    Ok(log)
}
