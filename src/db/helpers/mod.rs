use rusqlite::{types::ValueRef, Connection, OptionalExtension};

use crate::timezone::RawTimestamp;

/// Column holding the DDS source timestamp (nanoseconds) in every sample table.
pub const TIMESTAMP_COLUMN: &str = "SampleInfo_source_timestamp";
/// Column holding the JSON-encoded sample in every sample table.
pub const SAMPLE_COLUMN: &str = "rti_json_sample";

/// Quotes an SQL identifier; dump table names contain `@`.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// JSON path literal for a sample field. Field names come from configuration, so
/// anything but identifier characters is dropped.
pub fn json_path(field: &str) -> String {
    let clean: String = field
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect();
    format!("'$.{clean}'")
}

pub fn table_exists(conn: &Connection, schema: &str, table: &str) -> rusqlite::Result<bool> {
    let sql = format!(
        "SELECT 1 FROM {}.sqlite_master WHERE type = 'table' AND name = ?1",
        quote_ident(schema)
    );
    Ok(conn
        .query_row(&sql, [table], |_| Ok(()))
        .optional()?
        .is_some())
}

/// Timestamps are stored as INTEGER but older dumps wrote REAL.
pub fn to_raw_timestamp(value: ValueRef<'_>) -> Option<RawTimestamp> {
    match value {
        ValueRef::Integer(v) => Some(RawTimestamp::from_nanos(v)),
        ValueRef::Real(v) => Some(RawTimestamp::from_nanos(v as i64)),
        ValueRef::Text(t) => std::str::from_utf8(t)
            .ok()
            .and_then(|s| s.trim().parse::<f64>().ok())
            .map(|v| RawTimestamp::from_nanos(v as i64)),
        _ => None,
    }
}

/// Numeric sample value; JSON booleans arrive as 0/1 integers.
pub fn to_f64(value: ValueRef<'_>) -> Option<f64> {
    match value {
        ValueRef::Integer(v) => Some(v as f64),
        ValueRef::Real(v) => Some(v),
        ValueRef::Text(t) => std::str::from_utf8(t).ok()?.trim().parse().ok(),
        _ => None,
    }
}

/// Identifiers (`ioId`, `incidentTidx`, ...) may be numbers or strings in the JSON.
pub fn to_key_string(value: ValueRef<'_>) -> Option<String> {
    match value {
        ValueRef::Integer(v) => Some(v.to_string()),
        ValueRef::Real(v) => Some(v.to_string()),
        ValueRef::Text(t) => Some(String::from_utf8_lossy(t).into_owned()),
        _ => None,
    }
}

/// Numeric identifier that some dumps write as a JSON string (`"5"` for `5`).
pub fn to_key_i64(value: ValueRef<'_>) -> Option<i64> {
    match value {
        ValueRef::Integer(v) => Some(v),
        ValueRef::Real(v) if v.fract() == 0.0 => Some(v as i64),
        ValueRef::Text(t) => std::str::from_utf8(t).ok()?.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quotes_dump_table_names() {
        assert_eq!(quote_ident("IOConfig@0"), "\"IOConfig@0\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn json_path_strips_injection() {
        assert_eq!(json_path("vfdId"), "'$.vfdId'");
        assert_eq!(json_path("x') OR 1=1 --"), "'$.xOR11'");
    }

    #[test]
    fn converts_sqlite_values() {
        assert_eq!(to_f64(ValueRef::Integer(3)), Some(3.0));
        assert_eq!(to_f64(ValueRef::Text(b" 2.5 ")), Some(2.5));
        assert_eq!(to_f64(ValueRef::Null), None);
        assert_eq!(
            to_raw_timestamp(ValueRef::Real(1.0e9)),
            Some(RawTimestamp::from_nanos(1_000_000_000))
        );
        assert_eq!(to_key_string(ValueRef::Text(b"X99")), Some("X99".to_string()));
        assert_eq!(to_key_string(ValueRef::Integer(42)), Some("42".to_string()));
        assert_eq!(to_key_i64(ValueRef::Text(b"5")), Some(5));
        assert_eq!(to_key_i64(ValueRef::Real(7.0)), Some(7));
        assert_eq!(to_key_i64(ValueRef::Text(b"pump")), None);
    }

    #[test]
    fn detects_tables() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE \"VFDInfo@0\" (a INTEGER)").unwrap();
        assert!(table_exists(&conn, "main", "VFDInfo@0").unwrap());
        assert!(!table_exists(&conn, "main", "IOConfig@0").unwrap());
    }
}
