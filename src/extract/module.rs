use std::path::{Path, PathBuf};

use rusqlite::{Connection, OpenFlags};
use serde::Serialize;

use crate::db::helpers::{quote_ident, to_raw_timestamp, TIMESTAMP_COLUMN};
use crate::error::Result;
use crate::timezone::RawTimestamp;

/// One per-module SQLite file pulled out of an archive. Transient: the merger
/// reads it once and the extraction directory may be discarded afterwards.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModuleDatabase {
    pub module_id: String,
    pub path: PathBuf,
    /// `PRAGMA user_version` of the module file.
    pub schema_version: i32,
    pub first_timestamp: Option<RawTimestamp>,
    pub last_timestamp: Option<RawTimestamp>,
    /// Tables the merger copies from this file.
    pub tables: Vec<String>,
}

impl ModuleDatabase {
    pub fn inspect(path: &Path) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        let schema_version: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

        let mut stmt = conn.prepare(
            "SELECT name FROM sqlite_master
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
             ORDER BY name",
        )?;
        let tables = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut first_timestamp: Option<RawTimestamp> = None;
        let mut last_timestamp: Option<RawTimestamp> = None;
        for table in &tables {
            if !has_column(&conn, table, TIMESTAMP_COLUMN)? {
                continue;
            }
            let sql = format!(
                "SELECT MIN({ts}), MAX({ts}) FROM {table}",
                ts = TIMESTAMP_COLUMN,
                table = quote_ident(table)
            );
            let (min, max) = conn.query_row(&sql, [], |row| {
                Ok((to_raw_timestamp(row.get_ref(0)?), to_raw_timestamp(row.get_ref(1)?)))
            })?;
            first_timestamp = match (first_timestamp, min) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };
            last_timestamp = match (last_timestamp, max) {
                (Some(a), Some(b)) => Some(a.max(b)),
                (a, b) => a.or(b),
            };
        }

        Ok(Self {
            module_id: module_id(path),
            path: path.to_path_buf(),
            schema_version,
            first_timestamp,
            last_timestamp,
            tables,
        })
    }

    /// Restricts the merge to `keep`; used for auxiliary files that contribute a
    /// single lookup table.
    pub fn retain_tables(mut self, keep: &[&str]) -> Self {
        self.tables.retain(|table| keep.contains(&table.as_str()));
        self
    }
}

fn module_id(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn has_column(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    let sql = format!("PRAGMA table_info({})", quote_ident(table));
    let mut stmt = conn.prepare(&sql)?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(names.iter().any(|name| name == column))
}
