use anyhow::{bail, Context, Result};
use rusqlite::{Connection, Transaction};

pub const CURRENT_SCHEMA_VERSION: i32 = 1;

/// Tables that older, unversioned loggers keyed on `exp_id`.
const LEGACY_RUN_TABLES: [&str; 3] = ["experiments", "measurements", "events"];

/// Brings the store up to [`CURRENT_SCHEMA_VERSION`]. Safe to call on every start.
pub fn run_migrations(conn: &mut Connection) -> Result<()> {
    let mut version: i32 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .context("failed to read user_version pragma")?;

    if version > CURRENT_SCHEMA_VERSION {
        bail!(
            "database version ({}) is newer than supported schema ({})",
            version,
            CURRENT_SCHEMA_VERSION
        );
    }

    if version == CURRENT_SCHEMA_VERSION {
        return Ok(());
    }

    let tx = conn
        .transaction()
        .context("failed to open migration transaction")?;

    while version < CURRENT_SCHEMA_VERSION {
        let next_version = version + 1;
        apply_migration(&tx, next_version)
            .with_context(|| format!("migration to version {next_version} failed"))?;
        version = next_version;
    }

    tx.pragma_update(None, "user_version", CURRENT_SCHEMA_VERSION)
        .context("failed to update user_version pragma")?;
    tx.commit().context("failed to commit migrations")?;

    Ok(())
}

fn apply_migration(tx: &Transaction<'_>, version: i32) -> Result<()> {
    match version {
        1 => {
            rename_legacy_run_columns(tx)?;
            tx.execute_batch(include_str!("schemas/schema_v1.sql"))
                .context("failed to execute schema_v1.sql")?;
            Ok(())
        }
        _ => bail!("unknown migration target version: {version}"),
    }
}

fn rename_legacy_run_columns(tx: &Transaction<'_>) -> Result<()> {
    for table in LEGACY_RUN_TABLES {
        let columns = table_columns(tx, table)?;
        let has = |name: &str| columns.iter().any(|column| column == name);
        if has("exp_id") && !has("run_id") {
            tx.execute_batch(&format!(
                "ALTER TABLE {table} RENAME COLUMN exp_id TO run_id"
            ))
            .with_context(|| format!("failed to rename exp_id in {table}"))?;
        }
    }
    Ok(())
}

/// Column names of `table`; empty when the table does not exist.
fn table_columns(conn: &Connection, table: &str) -> Result<Vec<String>> {
    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({table})"))
        .with_context(|| format!("failed to inspect {table}"))?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>("name"))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(columns)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_names(conn: &Connection) -> Vec<String> {
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .unwrap();
        stmt.query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap()
    }

    #[test]
    fn creates_all_tables_and_is_repeatable() {
        let mut conn = Connection::open_in_memory().unwrap();
        run_migrations(&mut conn).unwrap();
        run_migrations(&mut conn).unwrap();

        assert_eq!(
            table_names(&conn),
            vec!["conditions", "events", "experiments", "measurements"]
        );
        let version: i32 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap();
        assert_eq!(version, CURRENT_SCHEMA_VERSION);
    }

    const LEGACY_SCHEMA: &str = "
        CREATE TABLE experiments(
          exp_id TEXT PRIMARY KEY, date_start TEXT, location TEXT, device_id TEXT, notes TEXT
        );
        CREATE TABLE measurements(
          exp_id TEXT, ts_iso TEXT,
          iaq REAL, iaq_accuracy INTEGER, b_voc_eq_ppm REAL, eco2_ppm REAL,
          temp_C REAL, rh_pct REAL, press_hPa REAL, quality_flag TEXT
        );
        CREATE TABLE events(
          exp_id TEXT, ts_iso TEXT, label TEXT, value TEXT
        );
        INSERT INTO experiments VALUES
          ('exp-1', '2025-01-01T00:00:00.000000+00:00', 'kitchen', 'dev', 'init');
        INSERT INTO measurements (exp_id, ts_iso, iaq, quality_flag) VALUES
          ('exp-1', '2025-01-01T00:00:05.000000+00:00', 42.0, 'acc<2');
        INSERT INTO events VALUES
          ('exp-1', '2025-01-01T00:00:01.000000+00:00', 'status', 'online');
    ";

    #[test]
    fn adopts_unversioned_store_without_losing_rows() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(LEGACY_SCHEMA).unwrap();

        run_migrations(&mut conn).unwrap();

        for table in LEGACY_RUN_TABLES {
            let columns = table_columns(&conn, table).unwrap();
            assert!(columns.iter().any(|c| c == "run_id"), "{table}: {columns:?}");
            assert!(!columns.iter().any(|c| c == "exp_id"), "{table}: {columns:?}");
            let count: i64 = conn
                .query_row(
                    &format!("SELECT COUNT(*) FROM {table} WHERE run_id = 'exp-1'"),
                    [],
                    |row| row.get(0),
                )
                .unwrap();
            assert_eq!(count, 1, "{table}");
        }
        assert_eq!(
            table_names(&conn),
            vec!["conditions", "events", "experiments", "measurements"]
        );
    }

    #[test]
    fn leaves_current_columns_alone() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE events(run_id TEXT, ts_iso TEXT, label TEXT, value TEXT);",
        )
        .unwrap();

        run_migrations(&mut conn).unwrap();

        assert_eq!(
            table_columns(&conn, "events").unwrap(),
            vec!["run_id", "ts_iso", "label", "value"]
        );
        assert!(table_columns(&conn, "missing").unwrap().is_empty());
    }

    #[test]
    fn rejects_newer_store() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "user_version", CURRENT_SCHEMA_VERSION + 1)
            .unwrap();
        assert!(run_migrations(&mut conn).is_err());
    }
}
