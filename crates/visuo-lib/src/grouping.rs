//! Filename grammar and subject/time/channel grouping.
//!
//! Acquisitions are named `<YYYYMMDD>_<GROUP>-A<NN>_<TTTT>_<WF|FL>.<tif|tiff|png>`,
//! where `GROUP` is `<number>-<sex>-<dose>-<treatment>`.

use chrono::NaiveDate;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Degradation, Result};
use crate::frame::{Channel, Frame};
use crate::io::image::load_frame;

const EXTENSIONS: [&str; 3] = ["tif", "tiff", "png"];

/// Experimental group label plus the factor tokens encoded in it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupLabel {
    pub label: String,
    pub number: String,
    pub sex: String,
    pub dose: String,
    pub treatment: String,
}

impl GroupLabel {
    pub fn parse(label: &str) -> Self {
        let mut parts = label.splitn(4, '-').map(str::to_string);
        Self {
            label: label.to_string(),
            number: parts.next().unwrap_or_default(),
            sex: parts.next().unwrap_or_default(),
            dose: parts.next().unwrap_or_default(),
            treatment: parts.next().unwrap_or_default(),
        }
    }
}

/// Everything encoded in one acquisition filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedName {
    pub date: NaiveDate,
    pub subject: String,
    pub group: GroupLabel,
    pub animal: u16,
    pub time: u32,
    pub channel: Channel,
}

pub fn parse_filename(name: &str) -> std::result::Result<ParsedName, String> {
    let (stem, ext) = name
        .rsplit_once('.')
        .ok_or_else(|| "no file extension".to_string())?;
    if !EXTENSIONS.iter().any(|e| e.eq_ignore_ascii_case(ext)) {
        return Err(format!("unsupported extension '{}'", ext));
    }
    let tokens: Vec<&str> = stem.split('_').collect();
    if tokens.len() < 4 {
        return Err(format!("expected at least 4 '_' tokens, found {}", tokens.len()));
    }
    let date_token = tokens[0];
    let channel_token = tokens[tokens.len() - 1];
    let time_token = tokens[tokens.len() - 2];
    let animal_part = tokens[1..tokens.len() - 2].join("_");

    let date = NaiveDate::parse_from_str(date_token, "%Y%m%d")
        .map_err(|e| format!("bad date '{}': {}", date_token, e))?;
    let channel = Channel::from_token(channel_token)
        .ok_or_else(|| format!("unknown channel '{}'", channel_token))?;
    if time_token.is_empty() || !time_token.bytes().all(|b| b.is_ascii_digit()) {
        return Err(format!("bad time token '{}'", time_token));
    }
    let time: u32 = time_token
        .parse()
        .map_err(|e| format!("bad time token '{}': {}", time_token, e))?;

    let (group, animal) = split_animal(&animal_part)
        .ok_or_else(|| format!("no '-A<NN>' animal suffix in '{}'", animal_part))?;

    Ok(ParsedName {
        date,
        subject: format!("{}_{}", date_token, animal_part),
        group: GroupLabel::parse(group),
        animal,
        time,
        channel,
    })
}

fn split_animal(part: &str) -> Option<(&str, u16)> {
    let idx = part.rfind('-')?;
    let (group, suffix) = (&part[..idx], &part[idx + 1..]);
    let digits = suffix.strip_prefix('A').or_else(|| suffix.strip_prefix('a'))?;
    if group.is_empty() || digits.is_empty() || digits.len() > 3 {
        return None;
    }
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some((group, digits.parse().ok()?))
}

/// One channel capture on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acquisition {
    pub subject: String,
    pub group: String,
    pub time: u32,
    pub channel: Channel,
    pub path: PathBuf,
}

impl Acquisition {
    pub fn load(&self) -> Result<Frame> {
        load_frame(&self.path)
    }
}

/// A complete structural + signal pair at one time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimePoint {
    pub time: u32,
    pub structural: Acquisition,
    pub signal: Acquisition,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectSeries {
    pub subject: String,
    pub date: NaiveDate,
    pub group: GroupLabel,
    pub animal: u16,
    /// Sorted by time.
    pub time_points: Vec<TimePoint>,
}

impl SubjectSeries {
    pub fn times(&self) -> Vec<u32> {
        self.time_points.iter().map(|tp| tp.time).collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Grouping {
    /// Sorted by subject key.
    pub subjects: Vec<SubjectSeries>,
    pub skipped: Vec<Degradation>,
}

impl Grouping {
    /// Union of all subjects' time points, ascending.
    pub fn canonical_times(&self) -> Vec<u32> {
        let mut times: Vec<u32> = self
            .subjects
            .iter()
            .flat_map(|s| s.time_points.iter().map(|tp| tp.time))
            .collect();
        times.sort_unstable();
        times.dedup();
        times
    }
}

#[derive(Default)]
struct SubjectBuilder {
    date: Option<NaiveDate>,
    group: Option<GroupLabel>,
    animal: u16,
    slots: BTreeMap<u32, (Option<Acquisition>, Option<Acquisition>)>,
}

/// Group a list of files. The result does not depend on the order of `paths`.
pub fn group_files(paths: &[PathBuf]) -> Grouping {
    let mut sorted: Vec<&PathBuf> = paths.iter().collect();
    sorted.sort();
    let mut skipped = Vec::new();
    let mut builders: BTreeMap<String, SubjectBuilder> = BTreeMap::new();

    for path in sorted {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            skipped.push(Degradation::ParseSkip {
                path: path.display().to_string(),
                reason: "file name is not valid UTF-8".into(),
            });
            continue;
        };
        let parsed = match parse_filename(name) {
            Ok(parsed) => parsed,
            Err(reason) => {
                skipped.push(Degradation::ParseSkip {
                    path: path.display().to_string(),
                    reason,
                });
                continue;
            }
        };
        let builder = builders.entry(parsed.subject.clone()).or_default();
        builder.date = Some(parsed.date);
        builder.animal = parsed.animal;
        let acquisition = Acquisition {
            subject: parsed.subject.clone(),
            group: parsed.group.label.clone(),
            time: parsed.time,
            channel: parsed.channel,
            path: path.clone(),
        };
        builder.group = Some(parsed.group);
        let slot = builder.slots.entry(parsed.time).or_default();
        let target = match parsed.channel {
            Channel::Structural => &mut slot.0,
            Channel::Signal => &mut slot.1,
        };
        if target.is_some() {
            skipped.push(Degradation::ParseSkip {
                path: path.display().to_string(),
                reason: format!(
                    "duplicate {} frame for {} at t={}",
                    parsed.channel.token(),
                    parsed.subject,
                    parsed.time
                ),
            });
            continue;
        }
        *target = Some(acquisition);
    }

    let mut subjects = Vec::with_capacity(builders.len());
    for (subject, builder) in builders {
        let (Some(date), Some(group)) = (builder.date, builder.group) else {
            continue;
        };
        let mut time_points = Vec::new();
        for (time, slot) in builder.slots {
            match slot {
                (Some(structural), Some(signal)) => time_points.push(TimePoint {
                    time,
                    structural,
                    signal,
                }),
                (Some(_), None) => skipped.push(Degradation::IncompletePair {
                    subject: subject.clone(),
                    time,
                    missing: Channel::Signal,
                }),
                (None, Some(_)) => skipped.push(Degradation::IncompletePair {
                    subject: subject.clone(),
                    time,
                    missing: Channel::Structural,
                }),
                (None, None) => {}
            }
        }
        if time_points.is_empty() {
            debug!("subject {} has no complete time point", subject);
            continue;
        }
        subjects.push(SubjectSeries {
            subject,
            date,
            group,
            animal: builder.animal,
            time_points,
        });
    }

    Grouping { subjects, skipped }
}

/// Scan a directory (non-recursive) and group every regular file in it.
pub fn scan_directory(dir: &Path) -> Result<Grouping> {
    let mut paths = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            paths.push(entry.path());
        }
    }
    let grouping = group_files(&paths);
    info!(
        "grouped {} file(s) into {} subject(s), {} skipped",
        paths.len(),
        grouping.subjects.len(),
        grouping.skipped.len()
    );
    Ok(grouping)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_grammar() {
        let parsed = parse_filename("20240115_G1-M-10mg-VEH-A03_0030_FL.tif").unwrap();
        assert_eq!(parsed.subject, "20240115_G1-M-10mg-VEH-A03");
        assert_eq!(parsed.group.label, "G1-M-10mg-VEH");
        assert_eq!(parsed.group.dose, "10mg");
        assert_eq!(parsed.group.treatment, "VEH");
        assert_eq!(parsed.animal, 3);
        assert_eq!(parsed.time, 30);
        assert_eq!(parsed.channel, Channel::Signal);
        assert_eq!(parsed.date, NaiveDate::from_ymd_opt(2024, 1, 15).unwrap());
    }

    #[test]
    fn rejects_names_outside_grammar() {
        assert!(parse_filename("notes.txt").is_err());
        assert!(parse_filename("20240115_G1-A01_0000_XX.tif").is_err());
        assert!(parse_filename("2024011_G1-A01_0000_WF.tif").is_err());
        assert!(parse_filename("20240115_G1_0000_WF.tif").is_err());
        assert!(parse_filename("20240115_G1-A01_00x0_WF.tif").is_err());
    }

    #[test]
    fn group_label_tolerates_missing_factors() {
        let label = GroupLabel::parse("G2-F");
        assert_eq!(label.number, "G2");
        assert_eq!(label.sex, "F");
        assert_eq!(label.dose, "");
        assert_eq!(label.treatment, "");
    }

    #[test]
    fn grouping_orders_time_numerically_and_excludes_half_pairs() {
        let names = [
            "20240101_G1-M-0-CTL-A01_0120_FL.tif",
            "20240101_G1-M-0-CTL-A01_0030_WF.tif",
            "20240101_G1-M-0-CTL-A01_0120_WF.tif",
            "20240101_G1-M-0-CTL-A01_0030_FL.tif",
            "20240101_G1-M-0-CTL-A01_0060_WF.tif",
            "20240101_G1-M-0-CTL-A01_0000_FL.tif",
            "20240101_G1-M-0-CTL-A01_0000_WF.tif",
            "readme.md",
        ];
        let paths: Vec<PathBuf> = names.iter().map(PathBuf::from).collect();
        let grouping = group_files(&paths);
        assert_eq!(grouping.subjects.len(), 1);
        assert_eq!(grouping.subjects[0].times(), vec![0, 30, 120]);
        assert!(grouping.skipped.iter().any(|d| matches!(
            d,
            Degradation::IncompletePair { time: 60, missing: Channel::Signal, .. }
        )));
        assert!(grouping
            .skipped
            .iter()
            .any(|d| matches!(d, Degradation::ParseSkip { .. })));

        let mut reversed = paths.clone();
        reversed.reverse();
        assert_eq!(group_files(&reversed).subjects, grouping.subjects);
    }
}
