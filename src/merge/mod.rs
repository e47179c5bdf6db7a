//! Consolidation of module databases into the session's merged dataset.

mod schema;

pub use schema::{ColumnDef, RecordKey, TableSchema};

use std::{collections::BTreeMap, fs, path::Path, sync::Arc};

use chrono::Utc;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use crate::db::{
    dataset::insert_source,
    migrations::{
        run_migrations, write_state, COMPLETED_AT_KEY, CREATED_AT_KEY, STATUS_COMPLETE, STATUS_KEY,
        STATUS_MERGING,
    },
    MergedDataset, SourceRecord,
};
use crate::error::{DdtError, Result};
use crate::extract::{Extraction, ModuleDatabase};
use crate::progress::{Stage, StageProgress};
use crate::session::SessionContext;
use crate::{log_debug, log_error, log_info};

const ENABLE_LOGS: bool = true;

const SOURCE_ALIAS: &str = "src";

/// Which contribution survives when two sources carry the same record key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConflictPolicy {
    /// The source merged later (archive order, then module file name) replaces earlier rows.
    #[default]
    LastContributorWins,
    FirstContributorWins,
}

pub struct DatabaseMerger<'a> {
    session: &'a SessionContext,
}

impl<'a> DatabaseMerger<'a> {
    pub fn new(session: &'a SessionContext) -> Self {
        Self { session }
    }

    /// Installs a completed dataset left in the run directory by an earlier merge.
    /// `None` when there is none and a merge is needed.
    pub fn resume(&self) -> Result<Option<Arc<MergedDataset>>> {
        let guard = self.session.begin_merge()?;
        let existing = self.existing()?;
        if let Some(dataset) = &existing {
            guard.complete(Arc::clone(dataset));
        }
        Ok(existing)
    }

    fn existing(&self) -> Result<Option<Arc<MergedDataset>>> {
        let merged = self.session.merged_path();
        if !merged.exists() {
            return Ok(None);
        }
        let dataset = MergedDataset::open(&merged)?;
        log_info!(
            "Reusing merged dataset at {} ({} sources)",
            merged.display(),
            dataset.sources().len()
        );
        Ok(Some(Arc::new(dataset)))
    }

    /// Merges every module database of `extraction` into one dataset and installs
    /// it on the session. If the run directory already holds a completed dataset,
    /// it is reused and nothing is merged; callers clear the outputs first to merge
    /// a different set of archives.
    pub fn merge(&self, extraction: &Extraction) -> Result<Arc<MergedDataset>> {
        let guard = self.session.begin_merge()?;

        if let Some(dataset) = self.existing()? {
            guard.complete(Arc::clone(&dataset));
            return Ok(dataset);
        }

        let partial = self.session.partial_merged_path();
        if partial.exists() {
            fs::remove_file(&partial)?;
        }

        if let Err(err) = self.write(&partial, extraction) {
            if let Err(cleanup) = fs::remove_file(&partial) {
                log_error!("Failed to remove {}: {cleanup}", partial.display());
            }
            return Err(err);
        }

        let merged = self.session.merged_path();
        fs::rename(&partial, &merged)?;
        let dataset = Arc::new(MergedDataset::open(&merged)?);
        log_info!("Merged dataset ready at {}", merged.display());
        guard.complete(Arc::clone(&dataset));
        Ok(dataset)
    }

    fn write(&self, partial: &Path, extraction: &Extraction) -> Result<()> {
        let settings = self.session.settings();
        let policy = settings.conflict_policy;
        let mut conn = Connection::open(partial)?;
        run_migrations(&mut conn)?;
        write_state(&conn, STATUS_KEY, STATUS_MERGING)?;
        write_state(&conn, CREATED_AT_KEY, &Utc::now().to_rfc3339())?;

        let total: usize = extraction
            .archives
            .iter()
            .map(|archive| archive.merge_sources().count())
            .sum();
        let progress = StageProgress::new(self.session.progress(), Stage::Merge, total);
        log_info!("Merging {total} module database(s) with policy {policy:?}");

        let mut schemas: BTreeMap<String, TableSchema> = BTreeMap::new();
        let mut ordinal = 0;
        for archive in &extraction.archives {
            let archive_name = archive.name();
            for module in archive.merge_sources() {
                self.session.check_cancelled(Stage::Merge)?;
                progress.step(ordinal, format!("Merging {} / {}", archive_name, module.module_id));

                self.merge_module(&mut conn, module, &mut schemas)?;
                insert_source(
                    &conn,
                    ordinal,
                    &SourceRecord {
                        archive: archive_name.clone(),
                        module_id: module.module_id.clone(),
                        path: module.path.clone(),
                        schema_version: module.schema_version,
                        first_timestamp: module.first_timestamp,
                        last_timestamp: module.last_timestamp,
                    },
                )?;
                ordinal += 1;
            }
        }

        self.session.check_cancelled(Stage::Merge)?;
        extraction.catalog.store(&conn)?;
        write_state(&conn, COMPLETED_AT_KEY, &Utc::now().to_rfc3339())?;
        write_state(&conn, STATUS_KEY, STATUS_COMPLETE)?;

        conn.close().map_err(|(_, err)| DdtError::Database(err))?;
        progress.finish(format!("Merged {ordinal} module database(s)"));
        Ok(())
    }

    fn merge_module(
        &self,
        conn: &mut Connection,
        module: &ModuleDatabase,
        schemas: &mut BTreeMap<String, TableSchema>,
    ) -> Result<()> {
        let settings = self.session.settings();
        conn.execute(
            &format!("ATTACH DATABASE ?1 AS {SOURCE_ALIAS}"),
            params![module.path.to_string_lossy()],
        )?;

        let result = (|| -> Result<()> {
            let tx = conn.transaction()?;
            for table in &module.tables {
                if table.starts_with("_ddt_") {
                    continue;
                }
                self.session.check_cancelled(Stage::Merge)?;

                let Some(schema) = TableSchema::read(&tx, SOURCE_ALIAS, table, settings)? else {
                    continue;
                };
                match schemas.get(table) {
                    Some(expected) if !expected.compatible_with(&schema) => {
                        return Err(DdtError::SchemaConflict {
                            table: table.clone(),
                            module: module.module_id.clone(),
                            expected: expected.describe_columns(),
                            found: schema.describe_columns(),
                        });
                    }
                    Some(_) => {}
                    None => {
                        tx.execute_batch(&schema.create_sql())?;
                        schemas.insert(table.clone(), schema.clone());
                    }
                }

                let inserted = tx.execute(&schema.insert_sql(SOURCE_ALIAS, settings.conflict_policy), [])?;
                log_debug!("  {table}: {inserted} row(s) from {}", module.module_id);
            }
            tx.commit()?;
            Ok(())
        })();

        conn.execute(&format!("DETACH DATABASE {SOURCE_ALIAS}"), [])?;
        result
    }
}
