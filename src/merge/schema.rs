use rusqlite::Connection;

use crate::db::helpers::{json_path, quote_ident, SAMPLE_COLUMN, TIMESTAMP_COLUMN};
use crate::error::Result;
use crate::settings::Settings;

use super::ConflictPolicy;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub decl_type: String,
}

/// How records of a table are identified when two sources contribute the same one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordKey {
    /// Sample table with a configured channel field: one row per (timestamp, field value).
    Channel { field: String },
    /// Sample table without a configured field: one row per (timestamp, sample).
    Sample,
    /// Any other table: identical rows collapse.
    WholeRow,
}

/// Tagged descriptor of one table as declared by a module database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    pub key: RecordKey,
}

impl TableSchema {
    /// Reads the declaration of `table` in the attached `schema`; `None` if absent.
    pub fn read(conn: &Connection, schema: &str, table: &str, settings: &Settings) -> Result<Option<Self>> {
        let sql = format!("PRAGMA {}.table_info({})", quote_ident(schema), quote_ident(table));
        let mut stmt = conn.prepare(&sql)?;
        let columns = stmt
            .query_map([], |row| {
                Ok(ColumnDef {
                    name: row.get(1)?,
                    decl_type: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        if columns.is_empty() {
            return Ok(None);
        }

        let is_sample = [TIMESTAMP_COLUMN, SAMPLE_COLUMN]
            .iter()
            .all(|required| columns.iter().any(|c| c.name == *required));
        let key = match (is_sample, settings.table_key(table)) {
            (true, Some(field)) => RecordKey::Channel {
                field: field.to_string(),
            },
            (true, None) => RecordKey::Sample,
            (false, _) => RecordKey::WholeRow,
        };

        Ok(Some(Self {
            name: table.to_string(),
            columns,
            key,
        }))
    }

    /// Same column names and declared types, regardless of order.
    pub fn compatible_with(&self, other: &TableSchema) -> bool {
        self.signature() == other.signature()
    }

    fn signature(&self) -> Vec<(String, String)> {
        let mut signature: Vec<(String, String)> = self
            .columns
            .iter()
            .map(|c| (c.name.clone(), c.decl_type.to_ascii_uppercase()))
            .collect();
        signature.sort();
        signature
    }

    pub fn describe_columns(&self) -> String {
        self.columns
            .iter()
            .map(|c| {
                if c.decl_type.is_empty() {
                    c.name.clone()
                } else {
                    format!("{} {}", c.name, c.decl_type)
                }
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn column_list(&self) -> String {
        self.columns
            .iter()
            .map(|c| quote_ident(&c.name))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Table plus the unique index that enforces the record key. Source constraints
    /// are not carried over: row ids from different modules would collide. A sample
    /// without the key field indexes as `''`, since NULLs never collide in a unique index.
    pub fn create_sql(&self) -> String {
        let columns = self
            .columns
            .iter()
            .map(|c| format!("{} {}", quote_ident(&c.name), c.decl_type).trim_end().to_string())
            .collect::<Vec<_>>()
            .join(", ");
        let mut sql = format!(
            "CREATE TABLE IF NOT EXISTS main.{} ({columns});",
            quote_ident(&self.name)
        );

        let index = quote_ident(&format!("_ddt_key_{}", self.name));
        match &self.key {
            RecordKey::Channel { field } => sql.push_str(&format!(
                "\nCREATE UNIQUE INDEX IF NOT EXISTS main.{index} ON {table} ({ts}, IFNULL(json_extract({sample}, {path}), ''));",
                table = quote_ident(&self.name),
                ts = quote_ident(TIMESTAMP_COLUMN),
                sample = quote_ident(SAMPLE_COLUMN),
                path = json_path(field),
            )),
            RecordKey::Sample => sql.push_str(&format!(
                "\nCREATE UNIQUE INDEX IF NOT EXISTS main.{index} ON {table} ({ts}, {sample});",
                table = quote_ident(&self.name),
                ts = quote_ident(TIMESTAMP_COLUMN),
                sample = quote_ident(SAMPLE_COLUMN),
            )),
            RecordKey::WholeRow => {}
        }
        sql
    }

    /// Copies every row of `schema.<table>` into `main.<table>` under `policy`.
    pub fn insert_sql(&self, schema: &str, policy: ConflictPolicy) -> String {
        let table = quote_ident(&self.name);
        let columns = self.column_list();
        let source = format!("{}.{table}", quote_ident(schema));
        match self.key {
            RecordKey::WholeRow => format!(
                "INSERT INTO main.{table} ({columns})
                 SELECT {columns} FROM {source}
                 EXCEPT SELECT {columns} FROM main.{table}"
            ),
            RecordKey::Channel { .. } | RecordKey::Sample => {
                let verb = match policy {
                    ConflictPolicy::LastContributorWins => "INSERT OR REPLACE",
                    ConflictPolicy::FirstContributorWins => "INSERT OR IGNORE",
                };
                format!("{verb} INTO main.{table} ({columns}) SELECT {columns} FROM {source} ORDER BY rowid")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_table(name: &str) -> TableSchema {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(&format!(
            "CREATE TABLE {} (SampleInfo_source_timestamp INTEGER, rti_json_sample TEXT)",
            quote_ident(name)
        ))
        .unwrap();
        TableSchema::read(&conn, "main", name, &Settings::default())
            .unwrap()
            .unwrap()
    }

    #[test]
    fn keys_follow_configuration() {
        assert_eq!(
            sample_table("VFDInfo@0").key,
            RecordKey::Channel {
                field: "vfdId".into()
            }
        );
        assert_eq!(sample_table("Unmapped@0").key, RecordKey::Sample);

        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE fb_users (userId INTEGER, loginId TEXT)").unwrap();
        let users = TableSchema::read(&conn, "main", "fb_users", &Settings::default())
            .unwrap()
            .unwrap();
        assert_eq!(users.key, RecordKey::WholeRow);
        assert!(TableSchema::read(&conn, "main", "missing", &Settings::default())
            .unwrap()
            .is_none());
    }

    #[test]
    fn compatibility_ignores_column_order_and_type_case() {
        let a = TableSchema {
            name: "t".into(),
            columns: vec![
                ColumnDef { name: "a".into(), decl_type: "integer".into() },
                ColumnDef { name: "b".into(), decl_type: "TEXT".into() },
            ],
            key: RecordKey::WholeRow,
        };
        let mut b = a.clone();
        b.columns.reverse();
        b.columns[0].decl_type = "text".into();
        assert!(a.compatible_with(&b));

        let mut c = a.clone();
        c.columns.push(ColumnDef { name: "extra".into(), decl_type: String::new() });
        assert!(!a.compatible_with(&c));
        assert_eq!(c.describe_columns(), "a integer, b TEXT, extra");
    }

    #[test]
    fn insert_statements_follow_policy() {
        let table = sample_table("IOConfig@0");
        assert!(table
            .insert_sql("src", ConflictPolicy::LastContributorWins)
            .starts_with("INSERT OR REPLACE INTO main.\"IOConfig@0\""));
        assert!(table
            .insert_sql("src", ConflictPolicy::FirstContributorWins)
            .starts_with("INSERT OR IGNORE"));
        assert!(table
            .create_sql()
            .contains("IFNULL(json_extract(\"rti_json_sample\", '$.ioId'), '')"));
    }

    #[test]
    fn samples_without_the_key_field_still_collide() {
        let table = sample_table("VFDInfo@0");
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(&table.create_sql()).unwrap();
        for _ in 0..2 {
            conn.execute(
                "INSERT OR REPLACE INTO \"VFDInfo@0\" VALUES (100, '{\"motorCurrent\":12.0}')",
                [],
            )
            .unwrap();
        }
        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM \"VFDInfo@0\"", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 1);
    }
}
