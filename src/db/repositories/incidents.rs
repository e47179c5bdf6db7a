use std::collections::HashMap;

use log::warn;
use rusqlite::Row;

use crate::db::{
    connection::Database,
    helpers::{quote_ident, table_exists, to_key_string, to_raw_timestamp, SAMPLE_COLUMN, TIMESTAMP_COLUMN},
    models::{Incident, IncidentArgument, IncidentKind, IncidentState},
};
use crate::error::Result;

const INCIDENT_TABLE: &str = "IncidentAll@0";
const USERS_TABLE: &str = "fb_users";

fn row_to_incident(row: &Row) -> rusqlite::Result<Option<Incident>> {
    let Some(timestamp) = to_raw_timestamp(row.get_ref(0)?) else {
        return Ok(None);
    };
    let Some(code) = to_key_string(row.get_ref(1)?) else {
        return Ok(None);
    };
    let help_code = to_key_string(row.get_ref(2)?);
    let kind: Option<String> = row.get(3)?;
    let state: Option<String> = row.get(4)?;
    let args: Option<String> = row.get(5)?;

    let args = match args.as_deref() {
        None => Vec::new(),
        Some(raw) => serde_json::from_str::<Vec<IncidentArgument>>(raw).unwrap_or_else(|err| {
            warn!("Incident {code} has unreadable arguments ({err}); formatting without them");
            Vec::new()
        }),
    };

    Ok(Some(Incident {
        id: code.clone(),
        timestamp,
        code,
        help_code,
        kind: IncidentKind::parse(kind.as_deref().unwrap_or_default()),
        state: IncidentState::parse(state.as_deref().unwrap_or_default()),
        args,
    }))
}

impl Database {
    /// Every incident record, ascending by timestamp then id.
    pub async fn incidents(&self) -> Result<Vec<Incident>> {
        self.execute(|conn| {
            if !table_exists(conn, "main", INCIDENT_TABLE)? {
                return Ok(Vec::new());
            }
            let sql = format!(
                "SELECT
                    {ts},
                    json_extract({sample}, '$.incidentTidx'),
                    json_extract({sample}, '$.helpTidx'),
                    json_extract({sample}, '$.type'),
                    json_extract({sample}, '$.state'),
                    json_extract({sample}, '$.args')
                 FROM {table}
                 ORDER BY {ts} ASC",
                ts = TIMESTAMP_COLUMN,
                sample = SAMPLE_COLUMN,
                table = quote_ident(INCIDENT_TABLE),
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query([])?;
            let mut incidents = Vec::new();
            while let Some(row) = rows.next()? {
                if let Some(incident) = row_to_incident(row)? {
                    incidents.push(incident);
                }
            }
            incidents.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
            Ok(incidents)
        })
        .await
    }

    /// `userId` → `loginId` from the HMI user table, empty when the dump has none.
    pub async fn user_names(&self) -> Result<HashMap<String, String>> {
        self.execute(|conn| {
            if !table_exists(conn, "main", USERS_TABLE)? {
                return Ok(HashMap::new());
            }
            let sql = format!(
                "SELECT userId, loginId FROM {}",
                quote_ident(USERS_TABLE)
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query([])?;
            let mut users = HashMap::new();
            while let Some(row) = rows.next()? {
                let (Some(id), Some(login)) =
                    (to_key_string(row.get_ref(0)?), to_key_string(row.get_ref(1)?))
                else {
                    continue;
                };
                users.insert(id, login);
            }
            Ok(users)
        })
        .await
    }
}
