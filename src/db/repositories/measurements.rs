use anyhow::{Context, Result};
use rusqlite::{params, Connection, Row};

use crate::db::{
    helpers::{conversion_error, parse_timestamp},
    models::{ChannelReadings, Measurement, QualityLabel},
    snapshot::ReadHandle,
    Database,
};

fn row_to_measurement(row: &Row) -> Result<Measurement, rusqlite::Error> {
    let ts_iso: String = row.get("ts_iso")?;
    let quality_flag: Option<String> = row.get("quality_flag")?;

    Ok(Measurement {
        run_id: row.get("run_id")?,
        timestamp: parse_timestamp(&ts_iso, "measurements.ts_iso").map_err(conversion_error)?,
        channels: ChannelReadings {
            iaq: row.get("iaq")?,
            iaq_accuracy: row.get("iaq_accuracy")?,
            b_voc_eq_ppm: row.get("b_voc_eq_ppm")?,
            eco2_ppm: row.get("eco2_ppm")?,
            temp_c: row.get("temp_C")?,
            rh_pct: row.get("rh_pct")?,
            press_hpa: row.get("press_hPa")?,
        },
        quality: quality_flag
            .map(|flag| flag.parse::<QualityLabel>())
            .transpose()
            .map_err(conversion_error)?,
    })
}

fn select_measurements(conn: &Connection, run_id: &str) -> Result<Vec<Measurement>> {
    let mut stmt = conn.prepare(
        "SELECT run_id, ts_iso, iaq, iaq_accuracy, b_voc_eq_ppm, eco2_ppm,
                temp_C, rh_pct, press_hPa, quality_flag
         FROM measurements
         WHERE run_id = ?1
         ORDER BY ts_iso ASC",
    )?;

    let rows = stmt.query_map(params![run_id], row_to_measurement)?;
    let mut measurements = rows
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("failed to load measurements for {run_id}"))?;
    // Insertion order is not time order (clock drift); sort on the instant.
    measurements.sort_by_key(|m| m.timestamp);
    Ok(measurements)
}

fn count_measurements(conn: &Connection, run_id: &str) -> Result<u64> {
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM measurements WHERE run_id = ?1",
            params![run_id],
            |row| row.get(0),
        )
        .with_context(|| format!("failed to count measurements for {run_id}"))?;
    Ok(u64::try_from(count).unwrap_or_default())
}

impl Database {
    pub async fn append_measurement(&self, measurement: &Measurement) -> Result<()> {
        let record = measurement.clone();
        self.execute(move |conn| {
            let channels = record.channels;
            conn.execute(
                "INSERT INTO measurements (
                    run_id,
                    ts_iso,
                    iaq,
                    iaq_accuracy,
                    b_voc_eq_ppm,
                    eco2_ppm,
                    temp_C,
                    rh_pct,
                    press_hPa,
                    quality_flag
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    record.run_id,
                    record.timestamp.to_storage(),
                    channels.iaq,
                    channels.iaq_accuracy,
                    channels.b_voc_eq_ppm,
                    channels.eco2_ppm,
                    channels.temp_c,
                    channels.rh_pct,
                    channels.press_hpa,
                    record.quality.map(|q| q.as_str()),
                ],
            )
            .context("failed to append measurement")?;
            Ok(())
        })
        .await
    }

    pub async fn count_measurements(&self, run_id: &str) -> Result<u64> {
        let run_id = run_id.to_string();
        self.execute(move |conn| count_measurements(conn, &run_id))
            .await
    }
}

impl ReadHandle {
    /// All samples of a run, sorted by timestamp.
    pub fn measurements_for_run(&self, run_id: &str) -> Result<Vec<Measurement>> {
        select_measurements(self.connection(), run_id)
    }
}
