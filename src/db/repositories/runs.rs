use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::db::{
    helpers::{conversion_error, parse_datetime, Timestamp},
    models::Run,
    snapshot::ReadHandle,
    Database,
};

fn row_to_run(row: &Row) -> Result<Run, rusqlite::Error> {
    let date_start: String = row.get("date_start")?;

    Ok(Run {
        run_id: row.get("run_id")?,
        date_start: parse_datetime(&date_start, "date_start").map_err(conversion_error)?,
        location: row.get("location")?,
        device_id: row.get("device_id")?,
        notes: row.get("notes")?,
    })
}

fn insert_run_if_absent(conn: &Connection, run: &Run) -> Result<bool> {
    let inserted = conn
        .execute(
            "INSERT OR IGNORE INTO experiments (run_id, date_start, location, device_id, notes)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                run.run_id,
                Timestamp::from(run.date_start).to_storage(),
                run.location,
                run.device_id,
                run.notes,
            ],
        )
        .with_context(|| format!("failed to ensure run {}", run.run_id))?;
    Ok(inserted == 1)
}

fn select_run(conn: &Connection, run_id: &str) -> Result<Option<Run>> {
    conn.query_row(
        "SELECT run_id, date_start, location, device_id, notes
         FROM experiments
         WHERE run_id = ?1",
        params![run_id],
        row_to_run,
    )
    .optional()
    .with_context(|| format!("failed to load run {run_id}"))
}

fn select_latest_run_id(conn: &Connection) -> Result<Option<String>> {
    conn.query_row(
        "SELECT run_id FROM experiments ORDER BY date_start DESC LIMIT 1",
        [],
        |row| row.get(0),
    )
    .optional()
    .context("failed to select latest run")
}

impl Database {
    /// Inserts the run unless one with the same id exists. Existing metadata is
    /// never overwritten. Returns `true` when a row was created.
    pub async fn ensure_run(&self, run: &Run) -> Result<bool> {
        let record = run.clone();
        self.execute(move |conn| insert_run_if_absent(conn, &record))
            .await
    }

    pub async fn get_run(&self, run_id: &str) -> Result<Option<Run>> {
        let run_id = run_id.to_string();
        self.execute(move |conn| select_run(conn, &run_id)).await
    }

    pub async fn latest_run_id(&self) -> Result<Option<String>> {
        self.execute(|conn| select_latest_run_id(conn)).await
    }

    pub async fn update_run_notes(&self, run_id: &str, notes: &str) -> Result<bool> {
        let run_id = run_id.to_string();
        let notes = notes.to_string();
        self.execute(move |conn| {
            let updated = conn
                .execute(
                    "UPDATE experiments SET notes = ?1 WHERE run_id = ?2",
                    params![notes, run_id],
                )
                .with_context(|| format!("failed to update notes for {run_id}"))?;
            Ok(updated == 1)
        })
        .await
    }
}

impl ReadHandle {
    pub fn run(&self, run_id: &str) -> Result<Option<Run>> {
        select_run(self.connection(), run_id)
    }

    pub fn latest_run_id(&self) -> Result<Option<String>> {
        select_latest_run_id(self.connection())
    }
}
