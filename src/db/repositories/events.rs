use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};

use crate::db::{
    helpers::{conversion_error, parse_timestamp},
    models::Event,
    snapshot::ReadHandle,
    Database,
};

fn row_to_event(row: &Row) -> Result<Event, rusqlite::Error> {
    let ts_iso: String = row.get("ts_iso")?;

    Ok(Event {
        run_id: row.get("run_id")?,
        timestamp: parse_timestamp(&ts_iso, "events.ts_iso").map_err(conversion_error)?,
        label: row.get("label")?,
        value: row.get("value")?,
    })
}

fn select_events(conn: &Connection, run_id: &str) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT run_id, ts_iso, label, value
         FROM events
         WHERE run_id = ?1
         ORDER BY ts_iso ASC",
    )?;

    let rows = stmt.query_map(params![run_id], row_to_event)?;
    let mut events = rows
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("failed to load events for {run_id}"))?;
    // Stored strings may mix formats; order by the parsed instant.
    events.sort_by_key(|event| event.timestamp);
    Ok(events)
}

/// Earliest occurrence of `label`, compared as instants rather than strings.
fn select_first_event_at(
    conn: &Connection,
    run_id: &str,
    label: &str,
) -> Result<Option<DateTime<Utc>>> {
    let mut stmt = conn.prepare(
        "SELECT ts_iso FROM events WHERE run_id = ?1 AND label = ?2",
    )?;
    let mut rows = stmt.query(params![run_id, label])?;

    let mut earliest: Option<DateTime<Utc>> = None;
    while let Some(row) = rows.next()? {
        let raw: String = row.get(0)?;
        let at = parse_timestamp(&raw, "events.ts_iso")?.instant();
        earliest = Some(earliest.map_or(at, |current| current.min(at)));
    }
    Ok(earliest)
}

impl Database {
    pub async fn append_event(&self, event: &Event) -> Result<()> {
        let record = event.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO events (run_id, ts_iso, label, value) VALUES (?1, ?2, ?3, ?4)",
                params![
                    record.run_id,
                    record.timestamp.to_storage(),
                    record.label,
                    record.value,
                ],
            )
            .with_context(|| format!("failed to append {} event", record.label))?;
            Ok(())
        })
        .await
    }
}

impl ReadHandle {
    pub fn events_for_run(&self, run_id: &str) -> Result<Vec<Event>> {
        select_events(self.connection(), run_id)
    }

    pub fn first_event_at(&self, run_id: &str, label: &str) -> Result<Option<DateTime<Utc>>> {
        select_first_event_at(self.connection(), run_id, label)
            .with_context(|| format!("failed to look up '{label}' events for {run_id}"))
    }
}
