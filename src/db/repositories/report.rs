use crate::db::{
    connection::Database,
    helpers::{quote_ident, table_exists, to_key_string, to_raw_timestamp, SAMPLE_COLUMN, TIMESTAMP_COLUMN},
    models::MachineSummary,
};
use crate::error::Result;

const SYNC_TABLE: &str = "CCUSync@0";

impl Database {
    pub async fn machine_summary(&self) -> Result<MachineSummary> {
        self.execute(|conn| {
            if !table_exists(conn, "main", SYNC_TABLE)? {
                return Ok(MachineSummary::default());
            }
            let sql = format!(
                "SELECT
                    (SELECT json_extract({sample}, '$.machineId') FROM {table}
                     ORDER BY {ts} DESC LIMIT 1),
                    MIN({ts}),
                    MAX({ts})
                 FROM {table}",
                sample = SAMPLE_COLUMN,
                ts = TIMESTAMP_COLUMN,
                table = quote_ident(SYNC_TABLE),
            );
            let summary = conn.query_row(&sql, [], |row| {
                Ok(MachineSummary {
                    machine_id: to_key_string(row.get_ref(0)?),
                    first_sample: to_raw_timestamp(row.get_ref(1)?),
                    last_sample: to_raw_timestamp(row.get_ref(2)?),
                })
            })?;
            Ok(summary)
        })
        .await
    }
}
