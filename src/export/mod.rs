//! Extraction: one run out of the store as three aligned CSV files.
//!
//! The export never writes to the store and never waits on the ingestion
//! writer (see [`crate::db::snapshot`]). All fatal checks run before any output
//! file is created.

use std::{path::PathBuf, time::Duration};

use anyhow::Result;
use chrono::{DateTime, Utc};
use log::{info, warn};
use thiserror::Error;

use crate::db::{open_readonly, Condition, Event, Measurement, ReadHandle, DEFAULT_OPEN_TIMEOUT};

pub mod window;
pub mod writer;

pub use window::{resolve_window, Window, DEFAULT_START_LABEL, FALLBACK_END_LABELS};
pub use writer::ExportPaths;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("store {} does not exist", .0.display())]
    StoreMissing(PathBuf),
    #[error("no experiments found")]
    NoRun,
    #[error("no measurements for {run_id}")]
    NoMeasurements { run_id: String },
}

#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub db_path: PathBuf,
    pub out_dir: PathBuf,
    /// Latest run by start time when unset.
    pub run_id: Option<String>,
    pub start_label: String,
    /// Falls back to [`FALLBACK_END_LABELS`] when unset.
    pub end_label: Option<String>,
    /// Replaces event-based window resolution when set.
    pub window: Option<Window>,
    /// Skip windowing entirely.
    pub full_run: bool,
    pub open_timeout: Duration,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("project.db"),
            out_dir: PathBuf::from("exports"),
            run_id: None,
            start_label: DEFAULT_START_LABEL.to_string(),
            end_label: None,
            window: None,
            full_run: false,
            open_timeout: DEFAULT_OPEN_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AlignedMeasurement {
    pub measurement: Measurement,
    /// Minutes since the alignment reference; `None` when there is no reference.
    pub min_since_start: Option<f64>,
}

/// Everything that goes into the three output files.
#[derive(Debug, Clone, PartialEq)]
pub struct RunExport {
    pub run_id: String,
    pub window: Window,
    pub alignment: Option<DateTime<Utc>>,
    pub measurements: Vec<AlignedMeasurement>,
    pub events: Vec<Event>,
    pub conditions: Vec<Condition>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExportSummary {
    pub run_id: String,
    pub paths: ExportPaths,
    pub window: Window,
    pub measurement_rows: usize,
    pub event_rows: usize,
    pub condition_rows: usize,
    pub used_snapshot: bool,
}

pub fn export_run(options: &ExportOptions) -> Result<ExportSummary> {
    let handle = open_readonly(&options.db_path, options.open_timeout)?;
    let used_snapshot = handle.is_snapshot();
    let assembled = assemble_run(&handle, options);
    handle.close();
    let export = assembled?;

    let paths = writer::write_run(&options.out_dir, &export)?;
    info!(
        "Exported {}:\n  {}\n  {}\n  {}",
        export.run_id,
        paths.measurements.display(),
        paths.events.display(),
        paths.metadata.display()
    );

    Ok(ExportSummary {
        run_id: export.run_id,
        paths,
        window: export.window,
        measurement_rows: export.measurements.len(),
        event_rows: export.events.len(),
        condition_rows: export.conditions.len(),
        used_snapshot,
    })
}

/// Loads one run and applies windowing and alignment, without touching the filesystem.
pub fn assemble_run(handle: &ReadHandle, options: &ExportOptions) -> Result<RunExport> {
    let run_id = select_run_id(handle, options.run_id.as_deref())?;

    let measurements = handle.measurements_for_run(&run_id)?;
    if measurements.is_empty() {
        return Err(ExportError::NoMeasurements { run_id }.into());
    }
    let events = handle.events_for_run(&run_id)?;
    let conditions = handle.conditions_for_run(&run_id)?;

    let window = if options.full_run {
        Window::unbounded()
    } else if let Some(window) = options.window {
        window
    } else {
        resolve_window(
            handle,
            &run_id,
            &options.start_label,
            options.end_label.as_deref(),
        )?
    };

    let total = measurements.len();
    let (alignment, measurements) =
        window_and_align(measurements, &events, &options.start_label, &window);
    if measurements.is_empty() {
        warn!("window {window:?} excludes all {total} measurements of {run_id}");
    }

    Ok(RunExport {
        run_id,
        window,
        alignment,
        measurements,
        events,
        conditions,
    })
}

fn select_run_id(handle: &ReadHandle, requested: Option<&str>) -> Result<String> {
    if let Some(run_id) = requested.map(str::trim).filter(|id| !id.is_empty()) {
        return Ok(run_id.to_string());
    }
    handle
        .latest_run_id()?
        .ok_or_else(|| ExportError::NoRun.into())
}

/// Keeps the samples inside `window` and attaches minutes since the alignment
/// reference: the first `start_label` event, else the earliest kept sample.
pub fn window_and_align(
    measurements: Vec<Measurement>,
    events: &[Event],
    start_label: &str,
    window: &Window,
) -> (Option<DateTime<Utc>>, Vec<AlignedMeasurement>) {
    let mut kept: Vec<Measurement> = measurements
        .into_iter()
        .filter(|m| window.contains(m.timestamp.instant()))
        .collect();
    kept.sort_by_key(|m| m.timestamp);

    let alignment = events
        .iter()
        .filter(|event| event.label == start_label)
        .map(|event| event.timestamp.instant())
        .min()
        .or_else(|| kept.first().map(|m| m.timestamp.instant()));

    let aligned = kept
        .into_iter()
        .map(|measurement| AlignedMeasurement {
            min_since_start: alignment
                .map(|reference| measurement.timestamp.minutes_since(reference)),
            measurement,
        })
        .collect();

    (alignment, aligned)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::db::{ChannelReadings, Timestamp};

    fn at(minute: u32) -> Timestamp {
        Timestamp::from(Utc.with_ymd_and_hms(2025, 1, 1, 0, minute, 0).unwrap())
    }

    fn sample(minute: u32) -> Measurement {
        Measurement {
            run_id: "exp-1".into(),
            timestamp: at(minute),
            channels: ChannelReadings {
                temp_c: Some(20.0 + f64::from(minute)),
                ..Default::default()
            },
            quality: None,
        }
    }

    fn minutes(rows: &[AlignedMeasurement]) -> Vec<Option<f64>> {
        rows.iter().map(|row| row.min_since_start).collect()
    }

    #[test]
    fn aligns_to_start_event_even_before_it() {
        let events = vec![Event::new("exp-1", at(5), "start_cook", None)];
        let (alignment, rows) = window_and_align(
            vec![sample(10), sample(0), sample(5)],
            &events,
            "start_cook",
            &Window::unbounded(),
        );

        assert_eq!(alignment, Some(at(5).instant()));
        assert_eq!(minutes(&rows), vec![Some(-5.0), Some(0.0), Some(5.0)]);
    }

    #[test]
    fn falls_back_to_first_kept_sample() {
        let window = Window::new(Some(at(4).instant()), None);
        let (alignment, rows) =
            window_and_align(vec![sample(0), sample(5), sample(8)], &[], "start_cook", &window);

        assert_eq!(alignment, Some(at(5).instant()));
        assert_eq!(minutes(&rows), vec![Some(0.0), Some(3.0)]);
    }

    #[test]
    fn empty_window_yields_no_rows_and_no_reference() {
        let window = Window::new(Some(at(30).instant()), Some(at(40).instant()));
        let (alignment, rows) = window_and_align(vec![sample(0)], &[], "start_cook", &window);
        assert_eq!(alignment, None);
        assert!(rows.is_empty());
    }
}
