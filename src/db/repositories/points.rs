use rusqlite::{params, Connection, OptionalExtension};

use crate::db::{
    connection::Database,
    helpers::{
        json_path, quote_ident, table_exists, to_f64, to_key_i64, to_raw_timestamp, SAMPLE_COLUMN,
        TIMESTAMP_COLUMN,
    },
    models::{IoPointInfo, RawRange, VfdPointInfo},
};
use crate::error::Result;
use crate::timezone::RawTimestamp;

const IO_CONFIG_TABLE: &str = "IOConfig@0";
const VFD_CONFIG_TABLE: &str = "VFDConfig@0";
const VFD_INFO_TABLE: &str = "VFDInfo@0";

impl Database {
    /// Latest `IOConfig@0` row whose `ioName` matches.
    pub async fn io_point_info(&self, io_name: &str) -> Result<Option<IoPointInfo>> {
        let io_name = io_name.to_string();
        self.execute(move |conn| {
            if !table_exists(conn, "main", IO_CONFIG_TABLE)? {
                return Ok(None);
            }
            let sql = format!(
                "SELECT
                    json_extract({sample}, '$.ioId'),
                    json_extract({sample}, '$.ioType'),
                    json_extract({sample}, '$.active')
                 FROM {table}
                 WHERE json_extract({sample}, '$.ioName') = ?1
                 ORDER BY {ts} DESC
                 LIMIT 1",
                sample = SAMPLE_COLUMN,
                ts = TIMESTAMP_COLUMN,
                table = quote_ident(IO_CONFIG_TABLE),
            );
            let info = conn
                .query_row(&sql, params![io_name], |row| {
                    let io_id = to_key_i64(row.get_ref(0)?);
                    let io_type = row.get::<_, Option<String>>(1)?.unwrap_or_default();
                    let active = row.get::<_, Option<i64>>(2)?.unwrap_or(1) != 0;
                    Ok(io_id.map(|io_id| IoPointInfo {
                        io_id,
                        io_type,
                        active,
                    }))
                })
                .optional()?;
            Ok(info.flatten())
        })
        .await
    }

    /// `(timestamp, value)` rows of one IO channel, ascending by timestamp.
    pub async fn io_point_samples(
        &self,
        table: &str,
        io_id: i64,
        range: RawRange,
    ) -> Result<Vec<(RawTimestamp, f64)>> {
        let table = table.to_string();
        self.execute(move |conn| {
            if !table_exists(conn, "main", &table)? {
                return Ok(Vec::new());
            }
            select_series(conn, &table, "ioId", io_id, "value", range)
        })
        .await
    }

    /// Latest `VFDConfig@0` row whose `vfdName` matches.
    pub async fn vfd_point_info(&self, vfd_name: &str) -> Result<Option<VfdPointInfo>> {
        let vfd_name = vfd_name.to_string();
        self.execute(move |conn| {
            if !table_exists(conn, "main", VFD_CONFIG_TABLE)? {
                return Ok(None);
            }
            let sql = format!(
                "SELECT
                    json_extract({sample}, '$.vfdId'),
                    json_extract({sample}, '$.active')
                 FROM {table}
                 WHERE json_extract({sample}, '$.vfdName') = ?1
                 ORDER BY {ts} DESC
                 LIMIT 1",
                sample = SAMPLE_COLUMN,
                ts = TIMESTAMP_COLUMN,
                table = quote_ident(VFD_CONFIG_TABLE),
            );
            let info = conn
                .query_row(&sql, params![vfd_name], |row| {
                    let vfd_id = to_key_i64(row.get_ref(0)?);
                    let active = row.get::<_, Option<i64>>(1)?.unwrap_or(1) != 0;
                    Ok(vfd_id.map(|vfd_id| VfdPointInfo { vfd_id, active }))
                })
                .optional()?;
            Ok(info.flatten())
        })
        .await
    }

    /// `(timestamp, field)` rows of one drive from `VFDInfo@0`, ascending by timestamp.
    pub async fn vfd_point_samples(
        &self,
        vfd_id: i64,
        field: &str,
        range: RawRange,
    ) -> Result<Vec<(RawTimestamp, f64)>> {
        let field = field.to_string();
        self.execute(move |conn| {
            if !table_exists(conn, "main", VFD_INFO_TABLE)? {
                return Ok(Vec::new());
            }
            select_series(conn, VFD_INFO_TABLE, "vfdId", vfd_id, &field, range)
        })
        .await
    }
}

fn select_series(
    conn: &Connection,
    table: &str,
    key_field: &str,
    key: i64,
    value_field: &str,
    range: RawRange,
) -> Result<Vec<(RawTimestamp, f64)>> {
    let sql = format!(
        "SELECT {ts}, json_extract({sample}, {value})
         FROM {table}
         WHERE json_extract({sample}, {key_path}) IN (?1, CAST(?1 AS TEXT))
           AND (?2 IS NULL OR {ts} >= ?2)
           AND (?3 IS NULL OR {ts} <= ?3)
         ORDER BY {ts} ASC, rowid ASC",
        ts = TIMESTAMP_COLUMN,
        sample = SAMPLE_COLUMN,
        value = json_path(value_field),
        key_path = json_path(key_field),
        table = quote_ident(table),
    );

    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(params![
        key,
        range.start.map(|t| t.as_nanos()),
        range.end.map(|t| t.as_nanos()),
    ])?;

    let mut series: Vec<(RawTimestamp, f64)> = Vec::new();
    while let Some(row) = rows.next()? {
        let Some(timestamp) = to_raw_timestamp(row.get_ref(0)?) else {
            continue;
        };
        // Missing values stay gaps; nothing is interpolated.
        let Some(value) = to_f64(row.get_ref(1)?) else {
            continue;
        };
        // One sample per timestamp: a later row for the same instant replaces the earlier one.
        match series.last_mut() {
            Some(last) if last.0 == timestamp => last.1 = value,
            _ => series.push((timestamp, value)),
        }
    }
    Ok(series)
}
