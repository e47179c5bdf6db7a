use rusqlite::{params, Connection, OptionalExtension};
use serde::Deserialize;

use crate::db::{
    connection::Database,
    helpers::{quote_ident, table_exists, to_key_string, SAMPLE_COLUMN, TIMESTAMP_COLUMN},
};
use crate::error::Result;

const PARAMETER_CONFIG_TABLE: &str = "ParConfig@0";
const PARAMETER_VALUE_TABLE: &str = "ParValue@0";

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ParameterValue {
    long_value: Option<i64>,
}

impl Database {
    /// Integer value of the named machine parameter. `None` when either parameter
    /// table is absent, the name is unknown, or the value is not a `longValue`.
    pub async fn timezone_parameter(&self, name: &str) -> Result<Option<i64>> {
        let name = name.to_string();
        self.execute(move |conn| parameter_long_value(conn, &name)).await
    }
}

fn parameter_long_value(conn: &Connection, name: &str) -> Result<Option<i64>> {
    if !table_exists(conn, "main", PARAMETER_CONFIG_TABLE)?
        || !table_exists(conn, "main", PARAMETER_VALUE_TABLE)?
    {
        return Ok(None);
    }

    let tidx_sql = format!(
        "SELECT json_extract({sample}, '$.parNameTidx')
         FROM {table}
         WHERE json_extract({sample}, '$.parName') = ?1
         ORDER BY {ts} ASC
         LIMIT 1",
        sample = SAMPLE_COLUMN,
        ts = TIMESTAMP_COLUMN,
        table = quote_ident(PARAMETER_CONFIG_TABLE),
    );
    let tidx = conn
        .query_row(&tidx_sql, params![name], |row| {
            Ok(to_key_string(row.get_ref(0)?))
        })
        .optional()?
        .flatten();
    let Some(tidx) = tidx else {
        return Ok(None);
    };

    // Compare as text: the index is an integer in some dumps and a string in others.
    let value_sql = format!(
        "SELECT json_extract({sample}, '$.value')
         FROM {table}
         WHERE CAST(json_extract({sample}, '$.parNameTidx') AS TEXT) = ?1
         ORDER BY {ts} ASC
         LIMIT 1",
        sample = SAMPLE_COLUMN,
        ts = TIMESTAMP_COLUMN,
        table = quote_ident(PARAMETER_VALUE_TABLE),
    );
    let raw: Option<String> = conn
        .query_row(&value_sql, params![tidx], |row| {
            Ok(to_key_string(row.get_ref(0)?))
        })
        .optional()?
        .flatten();

    Ok(raw
        .and_then(|raw| serde_json::from_str::<ParameterValue>(&raw).ok())
        .and_then(|value| value.long_value))
}
