//! Read-only access that never waits on the ingestion writer.
//!
//! A direct read-only open is tried first. If the store is locked the file is
//! copied next to itself and the copy is read instead. The copy is removed when
//! the handle is closed or dropped, on every exit path.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use log::{debug, info, warn};
use rusqlite::{Connection, OpenFlags};
use tempfile::NamedTempFile;

use crate::export::ExportError;

pub const DEFAULT_OPEN_TIMEOUT: Duration = Duration::from_secs(1);

const SIDECAR_SUFFIXES: [&str; 3] = ["-wal", "-shm", "-journal"];

/// The copied store. Dropping it unlinks the copy and any files SQLite created
/// beside it.
struct SnapshotFile(NamedTempFile);

impl SnapshotFile {
    fn path(&self) -> &Path {
        self.0.path()
    }
}

impl Drop for SnapshotFile {
    fn drop(&mut self) {
        for suffix in SIDECAR_SUFFIXES {
            let _ = std::fs::remove_file(sidecar(self.0.path(), suffix));
        }
    }
}

fn sidecar(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

pub struct ReadHandle {
    // Declared before `snapshot` so the connection closes before the copy is unlinked.
    conn: Connection,
    snapshot: Option<SnapshotFile>,
}

impl ReadHandle {
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn is_snapshot(&self) -> bool {
        self.snapshot.is_some()
    }

    pub fn snapshot_path(&self) -> Option<&Path> {
        self.snapshot.as_ref().map(SnapshotFile::path)
    }

    /// Closes the connection and removes the snapshot copy, if any.
    ///
    /// Failures are logged and swallowed so they never replace the caller's
    /// own result.
    pub fn close(self) {
        let Self { conn, snapshot } = self;

        if let Err((_, err)) = conn.close() {
            warn!("failed to close read connection: {err}");
        }
        if let Some(file) = snapshot {
            let path = file.path().to_path_buf();
            drop(file);
            if path.exists() {
                warn!("failed to remove snapshot {}", path.display());
            } else {
                debug!("removed snapshot {}", path.display());
            }
        }
    }
}

/// Opens `path` for reading, falling back to a point-in-time copy when the live
/// store cannot be read within `timeout`.
pub fn open_readonly(path: &Path, timeout: Duration) -> Result<ReadHandle> {
    if !path.is_file() {
        return Err(ExportError::StoreMissing(path.to_path_buf()).into());
    }

    match open_probed(path, timeout, OpenFlags::SQLITE_OPEN_READ_ONLY) {
        Ok(conn) => Ok(ReadHandle {
            conn,
            snapshot: None,
        }),
        Err(err) => {
            debug!("direct read of {} failed: {err:#}", path.display());
            let snapshot = copy_to_snapshot(path)?;
            // The copy is private, so SQLite may replay its WAL into it.
            let conn = open_probed(
                snapshot.path(),
                timeout,
                OpenFlags::SQLITE_OPEN_READ_WRITE,
            )
            .with_context(|| {
                format!("failed to open snapshot {}", snapshot.path().display())
            })?;
            info!(
                "store busy; reading from snapshot {}",
                snapshot.path().display()
            );
            Ok(ReadHandle {
                conn,
                snapshot: Some(snapshot),
            })
        }
    }
}

fn open_probed(path: &Path, timeout: Duration, mode: OpenFlags) -> Result<Connection> {
    let conn = Connection::open_with_flags(path, mode | OpenFlags::SQLITE_OPEN_NO_MUTEX)
        .with_context(|| format!("failed to open {}", path.display()))?;
    conn.busy_timeout(timeout)
        .context("failed to set busy timeout")?;
    // Touching the schema takes a shared lock, which fails while a writer holds
    // the file exclusively.
    conn.query_row("SELECT COUNT(*) FROM sqlite_master", [], |row| {
        row.get::<_, i64>(0)
    })
    .with_context(|| format!("store {} is not readable", path.display()))?;
    Ok(conn)
}

fn copy_to_snapshot(path: &Path) -> Result<SnapshotFile> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "store".to_string());
    let suffix = path
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default();

    let snapshot = tempfile::Builder::new()
        .prefix(&format!("{stem}_snapshot"))
        .suffix(&suffix)
        .tempfile_in(dir)
        .with_context(|| format!("failed to create snapshot file in {}", dir.display()))?;
    std::fs::copy(path, snapshot.path()).with_context(|| {
        format!(
            "failed to copy {} to {}",
            path.display(),
            snapshot.path().display()
        )
    })?;
    let snapshot = SnapshotFile(snapshot);

    // Committed rows that were never checkpointed only exist in the WAL.
    let wal = sidecar(path, "-wal");
    if wal.is_file() {
        let target = sidecar(snapshot.path(), "-wal");
        std::fs::copy(&wal, &target).with_context(|| {
            format!("failed to copy {} to {}", wal.display(), target.display())
        })?;
    }
    Ok(snapshot)
}
