use anyhow::{Context, Result};
use rusqlite::{params, Connection};

use crate::db::{models::Condition, snapshot::ReadHandle, Database};

fn select_conditions(conn: &Connection, run_id: &str) -> Result<Vec<Condition>> {
    let mut stmt = conn.prepare(
        "SELECT key, value FROM conditions WHERE run_id = ?1 ORDER BY key ASC",
    )?;
    let rows = stmt.query_map(params![run_id], |row| {
        Ok(Condition {
            key: row.get(0)?,
            value: row.get(1)?,
        })
    })?;
    rows.collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("failed to load conditions for {run_id}"))
}

impl Database {
    /// Writes `key = value` for the run, replacing any earlier value for the key.
    pub async fn upsert_condition(&self, run_id: &str, key: &str, value: &str) -> Result<()> {
        let run_id = run_id.to_string();
        let key = key.to_string();
        let value = value.to_string();
        self.execute(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO conditions (run_id, key, value) VALUES (?1, ?2, ?3)",
                params![run_id, key, value],
            )
            .with_context(|| format!("failed to write condition '{key}' for {run_id}"))?;
            Ok(())
        })
        .await
    }

    pub async fn conditions_for_run(&self, run_id: &str) -> Result<Vec<Condition>> {
        let run_id = run_id.to_string();
        self.execute(move |conn| select_conditions(conn, &run_id))
            .await
    }
}

impl ReadHandle {
    pub fn conditions_for_run(&self, run_id: &str) -> Result<Vec<Condition>> {
        select_conditions(self.connection(), run_id)
    }
}
