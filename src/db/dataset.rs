use std::{
    path::{Path, PathBuf},
    sync::OnceLock,
};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags};
use serde::Serialize;

use crate::db::{
    connection::Database,
    migrations::{ensure_complete, read_state, CREATED_AT_KEY},
};
use crate::error::{DdtError, Result};
use crate::timezone::{OffsetSource, RawTimestamp, TimezoneOffset};

/// One module database that contributed to a merged dataset, in merge order.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SourceRecord {
    pub archive: String,
    pub module_id: String,
    pub path: PathBuf,
    pub schema_version: i32,
    pub first_timestamp: Option<RawTimestamp>,
    pub last_timestamp: Option<RawTimestamp>,
}

pub(crate) fn insert_source(conn: &Connection, ordinal: usize, source: &SourceRecord) -> Result<()> {
    conn.execute(
        "INSERT INTO _ddt_sources
            (ordinal, archive, module_id, path, schema_version, first_timestamp, last_timestamp)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            ordinal as i64,
            source.archive,
            source.module_id,
            source.path.to_string_lossy(),
            source.schema_version,
            source.first_timestamp.map(|t| t.as_nanos()),
            source.last_timestamp.map(|t| t.as_nanos()),
        ],
    )?;
    Ok(())
}

fn read_sources(conn: &Connection) -> Result<Vec<SourceRecord>> {
    let mut stmt = conn.prepare(
        "SELECT archive, module_id, path, schema_version, first_timestamp, last_timestamp
         FROM _ddt_sources
         ORDER BY ordinal ASC",
    )?;
    let rows = stmt.query_map([], |row| {
        let path: String = row.get(2)?;
        Ok(SourceRecord {
            archive: row.get(0)?,
            module_id: row.get(1)?,
            path: PathBuf::from(path),
            schema_version: row.get(3)?,
            first_timestamp: row.get::<_, Option<i64>>(4)?.map(RawTimestamp::from_nanos),
            last_timestamp: row.get::<_, Option<i64>>(5)?.map(RawTimestamp::from_nanos),
        })
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// The consolidated, read-only dataset of one session.
///
/// Created by the merger (or reopened from disk when a completed merge already
/// exists) and shared as `Arc<MergedDataset>`. The timezone offset is the only
/// state that changes after creation, and it is written at most once.
pub struct MergedDataset {
    db: Database,
    path: PathBuf,
    created_at: DateTime<Utc>,
    sources: Vec<SourceRecord>,
    timezone: OnceLock<(TimezoneOffset, OffsetSource)>,
}

impl MergedDataset {
    /// Opens a completed merged file. Fails with [`DdtError::DatasetNotReady`] if
    /// the file was left behind by an interrupted merge.
    pub fn open(path: &Path) -> Result<Self> {
        let (created_at, sources) = {
            let conn = Connection::open_with_flags(
                path,
                OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?;
            ensure_complete(&conn)?;
            let created_at = read_state(&conn, CREATED_AT_KEY)?
                .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
                .map(|dt| dt.with_timezone(&Utc))
                .ok_or_else(|| {
                    DdtError::DatasetNotReady("merged file carries no creation time".into())
                })?;
            (created_at, read_sources(&conn)?)
        };

        Ok(Self {
            db: Database::open(path.to_path_buf())?,
            path: path.to_path_buf(),
            created_at,
            sources,
            timezone: OnceLock::new(),
        })
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn sources(&self) -> &[SourceRecord] {
        &self.sources
    }

    /// Distinct archives in contribution order.
    pub fn archives(&self) -> Vec<&str> {
        let mut archives: Vec<&str> = Vec::new();
        for source in &self.sources {
            if !archives.contains(&source.archive.as_str()) {
                archives.push(&source.archive);
            }
        }
        archives
    }

    pub fn timezone(&self) -> Option<TimezoneOffset> {
        self.timezone.get().map(|(offset, _)| *offset)
    }

    pub fn timezone_source(&self) -> Option<OffsetSource> {
        self.timezone.get().map(|(_, source)| *source)
    }

    /// Stores the offset unless one is already cached; returns whichever is cached.
    pub(crate) fn cache_timezone(&self, offset: TimezoneOffset, source: OffsetSource) -> TimezoneOffset {
        self.timezone.get_or_init(|| (offset, source)).0
    }
}

impl std::fmt::Debug for MergedDataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MergedDataset")
            .field("path", &self.path)
            .field("created_at", &self.created_at)
            .field("sources", &self.sources.len())
            .field("timezone", &self.timezone())
            .finish()
    }
}
