//! CSV encodings of the raw results and group summary tables.
//!
//! Numeric cells that fail to parse (blank, `NaN`, text) are read as NaN.

use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use log::warn;
use std::io::{Read, Write};
use std::path::Path;

use crate::aggregate::{GroupSummaryTable, SummaryRow};
use crate::error::{Error, Result};
use crate::table::{canonical_column, format_time, RawResultsTable, ResultRow, META_COLUMNS, REQUIRED_COLUMNS};

pub fn coerce_f64(cell: &str) -> f64 {
    cell.trim().parse::<f64>().unwrap_or(f64::NAN)
}

pub fn write_raw_results(table: &RawResultsTable, path: &Path) -> Result<()> {
    let writer = WriterBuilder::new().from_path(path)?;
    write_raw_results_to(table, writer)
}

pub fn write_raw_results_to<W: Write>(table: &RawResultsTable, mut writer: csv::Writer<W>) -> Result<()> {
    let extra = table.extra_metadata();
    let features = table.feature_names();
    let mut header: Vec<&str> = META_COLUMNS.to_vec();
    header.extend(extra.iter().map(String::as_str));
    header.extend(features.iter().map(String::as_str));
    writer.write_record(&header)?;
    for row in &table.rows {
        let mut record: Vec<String> = Vec::with_capacity(header.len());
        for column in META_COLUMNS.iter().copied().chain(extra.iter().map(String::as_str)) {
            record.push(match column {
                "subject" => row.subject.clone(),
                "group" => row.group.clone(),
                "time" => format_time(row.time),
                other => row.metadata.get(other).cloned().unwrap_or_default(),
            });
        }
        for feature in &features {
            record.push(row.value(feature).to_string());
        }
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn read_raw_results(path: &Path) -> Result<RawResultsTable> {
    let reader = ReaderBuilder::new().has_headers(true).from_path(path)?;
    read_raw_results_from(reader)
}

pub fn read_raw_results_from<R: Read>(mut reader: csv::Reader<R>) -> Result<RawResultsTable> {
    let headers = reader.headers()?.clone();
    let roles: Vec<Option<&'static str>> = headers.iter().map(canonical_column).collect();
    let find = |name: &str| roles.iter().position(|r| *r == Some(name));
    let missing: Vec<&str> = REQUIRED_COLUMNS
        .iter()
        .copied()
        .filter(|c| find(c).is_none())
        .collect();
    if !missing.is_empty() {
        return Err(Error::InputMalformed(format!(
            "missing required column(s): {}",
            missing.join(", ")
        )));
    }

    let mut table = RawResultsTable::new();
    let mut record = StringRecord::new();
    let mut line = 1usize;
    while reader.read_record(&mut record)? {
        line += 1;
        let mut subject = String::new();
        let mut group = String::new();
        let mut time = f64::NAN;
        let mut row_meta = Vec::new();
        let mut values = Vec::new();
        for (idx, cell) in record.iter().enumerate() {
            let Some(header) = headers.get(idx) else {
                continue;
            };
            match roles[idx] {
                Some("subject") => subject = cell.to_string(),
                Some("group") => group = cell.to_string(),
                Some("time") => time = coerce_f64(cell),
                Some(meta) => row_meta.push((meta.to_string(), cell.to_string())),
                None => values.push((header.to_string(), coerce_f64(cell))),
            }
        }
        if !time.is_finite() || subject.is_empty() {
            warn!("dropping row {}: missing subject or time", line);
            continue;
        }
        let mut row = ResultRow {
            subject,
            group,
            time,
            metadata: Default::default(),
            values: Default::default(),
        };
        row.metadata.extend(row_meta);
        row.values.extend(values);
        table.push(row);
    }
    Ok(table)
}

const SUMMARY_COLUMNS: [&str; 8] = ["group", "time", "feature", "mean", "median", "std", "sem", "count"];

pub fn write_group_summary(table: &GroupSummaryTable, path: &Path) -> Result<()> {
    let mut writer = WriterBuilder::new().from_path(path)?;
    writer.write_record(SUMMARY_COLUMNS)?;
    for row in &table.rows {
        writer.write_record(&[
            row.group.clone(),
            format_time(row.time),
            row.feature.clone(),
            row.mean.to_string(),
            row.median.to_string(),
            row.std.to_string(),
            row.sem.to_string(),
            row.count.to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

pub fn read_group_summary(path: &Path) -> Result<GroupSummaryTable> {
    let mut reader = ReaderBuilder::new().has_headers(true).from_path(path)?;
    let headers = reader.headers()?.clone();
    let index = |name: &str| headers.iter().position(|h| h.trim().eq_ignore_ascii_case(name));
    let (Some(g), Some(t), Some(f), Some(m)) =
        (index("group"), index("time"), index("feature"), index("mean"))
    else {
        return Err(Error::InputMalformed(
            "summary table needs group, time, feature and mean columns".into(),
        ));
    };
    let (median, std, sem, count) = (index("median"), index("std"), index("sem"), index("count"));
    let cell = |record: &StringRecord, idx: Option<usize>| {
        idx.and_then(|i| record.get(i)).map(coerce_f64).unwrap_or(f64::NAN)
    };

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let time = cell(&record, Some(t));
        let mean = cell(&record, Some(m));
        if !time.is_finite() || !mean.is_finite() {
            continue;
        }
        rows.push(SummaryRow {
            group: record.get(g).unwrap_or_default().to_string(),
            time,
            feature: record.get(f).unwrap_or_default().to_string(),
            mean,
            median: cell(&record, median),
            std: cell(&record, std),
            sem: cell(&record, sem),
            count: count
                .and_then(|i| record.get(i))
                .and_then(|c| c.trim().parse().ok())
                .unwrap_or(0),
        });
    }
    Ok(GroupSummaryTable { rows })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grouping::GroupLabel;
    use tempfile::tempdir;

    #[test]
    fn missing_required_column_is_malformed() {
        let data = "subject,time,feat\ns1,0,1.0\n";
        let reader = ReaderBuilder::new().from_reader(data.as_bytes());
        let err = read_raw_results_from(reader).unwrap_err();
        assert!(matches!(err, Error::InputMalformed(msg) if msg.contains("group")));
    }

    #[test]
    fn non_numeric_cells_become_nan() {
        let data = "Animal_Key,Group_Name,Time_Min,Dose,feat,other\ns1,A,30,5mg,oops,\ns1,A,60,5mg,2.5,NaN\n";
        let reader = ReaderBuilder::new().from_reader(data.as_bytes());
        let table = read_raw_results_from(reader).unwrap();
        assert_eq!(table.len(), 2);
        assert!(table.rows[0].value("feat").is_nan());
        assert!(table.rows[0].value("other").is_nan());
        assert_eq!(table.rows[1].value("feat"), 2.5);
        assert_eq!(table.rows[0].factor("dose").as_deref(), Some("5mg"));
    }

    #[test]
    fn raw_table_survives_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("raw.csv");
        let mut table = RawResultsTable::new();
        let mut row = ResultRow::new("20240101_G1-M-0-CTL-A01", &GroupLabel::parse("G1-M-0-CTL"), 30.0);
        row.values.insert("b".into(), f64::NAN);
        row.values.insert("a".into(), 1.5);
        table.push(row);
        write_raw_results(&table, &path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("subject,group,group_number,sex,dose,treatment,time,a,b"));
        let back = read_raw_results(&path).unwrap();
        assert_eq!(back.rows[0].value("a"), 1.5);
        assert!(back.rows[0].value("b").is_nan());
        assert_eq!(back.rows[0].factor("treatment").as_deref(), Some("CTL"));
    }
}
