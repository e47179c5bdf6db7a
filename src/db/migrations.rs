use rusqlite::{Connection, OptionalExtension, Transaction};

use crate::error::{DdtError, Result};

/// Version of the `_ddt_*` bookkeeping tables, stored in `user_version`.
pub(crate) const CURRENT_SCHEMA_VERSION: i32 = 1;

pub(crate) const STATUS_KEY: &str = "status";
pub(crate) const STATUS_MERGING: &str = "merging";
pub(crate) const STATUS_COMPLETE: &str = "complete";
pub(crate) const CREATED_AT_KEY: &str = "created_at";
pub(crate) const COMPLETED_AT_KEY: &str = "completed_at";

pub(crate) fn run_migrations(conn: &mut Connection) -> Result<()> {
    let mut version = schema_version(conn)?;

    if version > CURRENT_SCHEMA_VERSION {
        return Err(DdtError::DatasetNotReady(format!(
            "bookkeeping version ({version}) is newer than supported ({CURRENT_SCHEMA_VERSION})"
        )));
    }

    if version == CURRENT_SCHEMA_VERSION {
        return Ok(());
    }

    let tx = conn.transaction()?;

    while version < CURRENT_SCHEMA_VERSION {
        let next_version = version + 1;
        apply_migration(&tx, next_version)?;
        version = next_version;
    }

    tx.pragma_update(None, "user_version", CURRENT_SCHEMA_VERSION)?;
    tx.commit()?;

    Ok(())
}

fn apply_migration(tx: &Transaction<'_>, version: i32) -> Result<()> {
    match version {
        1 => {
            tx.execute_batch(include_str!("schemas/bookkeeping_v1.sql"))?;
            Ok(())
        }
        _ => Err(DdtError::Worker(format!(
            "unknown bookkeeping migration target version: {version}"
        ))),
    }
}

pub(crate) fn schema_version(conn: &Connection) -> Result<i32> {
    Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?)
}

pub(crate) fn write_state(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO _ddt_state (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        [key, value],
    )?;
    Ok(())
}

pub(crate) fn read_state(conn: &Connection, key: &str) -> Result<Option<String>> {
    if !super::helpers::table_exists(conn, "main", "_ddt_state")? {
        return Ok(None);
    }
    Ok(conn
        .query_row("SELECT value FROM _ddt_state WHERE key = ?1", [key], |row| {
            row.get(0)
        })
        .optional()?)
}

/// A dataset may only be served once the merger marked it complete.
pub(crate) fn ensure_complete(conn: &Connection) -> Result<()> {
    let version = schema_version(conn)?;
    if version != CURRENT_SCHEMA_VERSION {
        return Err(DdtError::DatasetNotReady(format!(
            "unexpected bookkeeping version {version}"
        )));
    }
    match read_state(conn, STATUS_KEY)?.as_deref() {
        Some(STATUS_COMPLETE) => Ok(()),
        Some(other) => Err(DdtError::DatasetNotReady(format!(
            "merge status is '{other}'; clear the data folder and re-run"
        ))),
        None => Err(DdtError::DatasetNotReady(
            "file carries no merge status".into(),
        )),
    }
}
