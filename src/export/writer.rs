use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use super::{AlignedMeasurement, RunExport};

pub const MEASUREMENT_HEADERS: [&str; 10] = [
    "ts_iso",
    "iaq",
    "iaq_accuracy",
    "b_voc_eq_ppm",
    "eco2_ppm",
    "temp_C",
    "rh_pct",
    "press_hPa",
    "quality_flag",
    "min_since_start",
];
pub const EVENT_HEADERS: [&str; 3] = ["ts_iso", "label", "value"];
pub const METADATA_HEADERS: [&str; 2] = ["key", "value"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportPaths {
    pub measurements: PathBuf,
    pub events: PathBuf,
    pub metadata: PathBuf,
}

impl ExportPaths {
    pub fn new(out_dir: &Path, run_id: &str) -> Self {
        Self {
            measurements: out_dir.join(format!("{run_id}_measurements.csv")),
            events: out_dir.join(format!("{run_id}_events.csv")),
            metadata: out_dir.join(format!("{run_id}_metadata.csv")),
        }
    }
}

#[derive(Serialize)]
struct MeasurementRow<'a> {
    ts_iso: String,
    iaq: Option<f64>,
    iaq_accuracy: Option<i64>,
    b_voc_eq_ppm: Option<f64>,
    eco2_ppm: Option<f64>,
    temp_c: Option<f64>,
    rh_pct: Option<f64>,
    press_hpa: Option<f64>,
    quality_flag: Option<&'a str>,
    min_since_start: Option<f64>,
}

impl<'a> From<&'a AlignedMeasurement> for MeasurementRow<'a> {
    fn from(row: &'a AlignedMeasurement) -> Self {
        let m = &row.measurement;
        Self {
            ts_iso: m.timestamp.to_export(),
            iaq: m.channels.iaq,
            iaq_accuracy: m.channels.iaq_accuracy,
            b_voc_eq_ppm: m.channels.b_voc_eq_ppm,
            eco2_ppm: m.channels.eco2_ppm,
            temp_c: m.channels.temp_c,
            rh_pct: m.channels.rh_pct,
            press_hpa: m.channels.press_hpa,
            quality_flag: m.quality.map(|q| q.as_str()),
            min_since_start: row.min_since_start,
        }
    }
}

#[derive(Serialize)]
struct EventRow<'a> {
    ts_iso: String,
    label: &'a str,
    value: Option<&'a str>,
}

#[derive(Serialize)]
struct MetadataRow<'a> {
    key: &'a str,
    value: Option<&'a str>,
}

/// Writes the three CSV files for `export` into `out_dir`, creating it if needed.
pub fn write_run(out_dir: &Path, export: &RunExport) -> Result<ExportPaths> {
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("failed to create output directory {}", out_dir.display()))?;

    let paths = ExportPaths::new(out_dir, &export.run_id);

    write_csv(
        &paths.measurements,
        &MEASUREMENT_HEADERS,
        export.measurements.iter().map(MeasurementRow::from),
    )?;
    write_csv(
        &paths.events,
        &EVENT_HEADERS,
        export.events.iter().map(|event| EventRow {
            ts_iso: event.timestamp.to_export(),
            label: &event.label,
            value: event.value.as_deref(),
        }),
    )?;
    write_csv(
        &paths.metadata,
        &METADATA_HEADERS,
        export.conditions.iter().map(|condition| MetadataRow {
            key: &condition.key,
            value: condition.value.as_deref(),
        }),
    )?;

    Ok(paths)
}

// Headers are written by hand so that a file with no rows still has them.
fn write_csv<T, I>(path: &Path, headers: &[&str], rows: I) -> Result<()>
where
    T: Serialize,
    I: IntoIterator<Item = T>,
{
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    writer
        .write_record(headers)
        .with_context(|| format!("failed to write header to {}", path.display()))?;
    for row in rows {
        writer
            .serialize(row)
            .with_context(|| format!("failed to write row to {}", path.display()))?;
    }
    writer
        .flush()
        .with_context(|| format!("failed to flush {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::db::{ChannelReadings, Condition, Event, Measurement, QualityLabel, Timestamp};
    use crate::export::window::Window;

    fn sample_export() -> RunExport {
        let ts = Timestamp::from(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap());
        RunExport {
            run_id: "exp-1".into(),
            window: Window::unbounded(),
            alignment: Some(ts.instant()),
            measurements: vec![
                AlignedMeasurement {
                    measurement: Measurement {
                        run_id: "exp-1".into(),
                        timestamp: ts,
                        channels: ChannelReadings {
                            temp_c: Some(20.5),
                            iaq_accuracy: Some(3),
                            ..Default::default()
                        },
                        quality: Some(QualityLabel::LowAccuracy),
                    },
                    min_since_start: Some(0.0),
                },
                AlignedMeasurement {
                    measurement: Measurement {
                        run_id: "exp-1".into(),
                        timestamp: ts,
                        channels: ChannelReadings::default(),
                        quality: None,
                    },
                    min_since_start: None,
                },
            ],
            events: vec![Event::new("exp-1", ts, "note", Some("lid, on".into()))],
            conditions: vec![Condition {
                key: "pot_size".into(),
                value: None,
            }],
        }
    }

    #[test]
    fn writes_three_files_with_expected_layout() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("nested/out");
        let paths = write_run(&out, &sample_export()).unwrap();

        assert_eq!(paths.measurements, out.join("exp-1_measurements.csv"));
        let measurements = std::fs::read_to_string(&paths.measurements).unwrap();
        let lines: Vec<&str> = measurements.lines().collect();
        assert_eq!(lines[0], MEASUREMENT_HEADERS.join(","));
        assert_eq!(lines[1], "2025-01-01T00:00:00+0000,,3,,,20.5,,,acc<2,0.0");
        assert_eq!(lines[2], "2025-01-01T00:00:00+0000,,,,,,,,,");

        let events = std::fs::read_to_string(&paths.events).unwrap();
        assert_eq!(
            events,
            "ts_iso,label,value\n2025-01-01T00:00:00+0000,note,\"lid, on\"\n"
        );

        let metadata = std::fs::read_to_string(&paths.metadata).unwrap();
        assert_eq!(metadata, "key,value\npot_size,\n");
    }

    #[test]
    fn empty_measurements_still_get_a_header() {
        let mut export = sample_export();
        export.measurements.clear();
        let dir = tempfile::tempdir().unwrap();
        let paths = write_run(dir.path(), &export).unwrap();

        let contents = std::fs::read_to_string(&paths.measurements).unwrap();
        assert_eq!(contents.trim_end(), MEASUREMENT_HEADERS.join(","));
    }
}
