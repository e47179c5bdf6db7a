//! Session workflow: ingest archives, resolve the timezone, then query.
//!
//! Extraction and merge are blocking work and run on the blocking pool so a host
//! can keep rendering progress. Everything after ingest reads the session's
//! merged dataset and fails with `DatasetNotReady` until one is installed.

use std::{
    fs::File,
    io::{BufWriter, Write},
    path::PathBuf,
    sync::Arc,
};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::db::{MergedDataset, SourceRecord};
use crate::error::{DdtError, Result};
use crate::extract::ArchiveExtractor;
use crate::incidents::{IncidentLog, IncidentMatcher};
use crate::merge::DatabaseMerger;
use crate::points::PointCatalog;
use crate::query::{PointQueryEngine, PointSeries};
use crate::session::SessionContext;
use crate::timezone::{LocalTimestamp, OffsetSource, TimezoneOffset, TimezonePrompt, TimezoneResolver};
use crate::log_info;

const ENABLE_LOGS: bool = true;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetSummary {
    pub run_dir: PathBuf,
    pub machine_id: Option<String>,
    pub first_sample: Option<LocalTimestamp>,
    pub last_sample: Option<LocalTimestamp>,
    pub timezone: String,
    pub timezone_source: Option<OffsetSource>,
    pub archives: Vec<String>,
    pub sources: Vec<SourceRecord>,
    pub created_at: DateTime<Utc>,
}

pub struct Pipeline {
    session: Arc<SessionContext>,
    points: Arc<PointCatalog>,
}

impl Pipeline {
    pub fn new(session: Arc<SessionContext>, points: Arc<PointCatalog>) -> Self {
        Self { session, points }
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    pub fn points(&self) -> &PointCatalog {
        &self.points
    }

    /// Extracts and merges `archives`, or installs the dataset an earlier ingest
    /// left in the run directory. Clear the session outputs first to ingest a
    /// different set of archives.
    pub async fn ingest(&self, archives: Vec<PathBuf>) -> Result<Arc<MergedDataset>> {
        let session = Arc::clone(&self.session);
        tokio::task::spawn_blocking(move || {
            let merger = DatabaseMerger::new(&session);
            if let Some(dataset) = merger.resume()? {
                return Ok(dataset);
            }
            let extraction = ArchiveExtractor::new(&session).extract_all(&archives)?;
            merger.merge(&extraction)
        })
        .await
        .map_err(|err| DdtError::Worker(format!("ingest worker join failed: {err}")))?
    }

    /// Installs a completed dataset from the run directory without extracting.
    pub async fn resume(&self) -> Result<Option<Arc<MergedDataset>>> {
        let session = Arc::clone(&self.session);
        tokio::task::spawn_blocking(move || DatabaseMerger::new(&session).resume())
            .await
            .map_err(|err| DdtError::Worker(format!("resume worker join failed: {err}")))?
    }

    /// Reads the embedded offset. [`DdtError::TimezoneUnresolved`] asks the caller
    /// for one through [`Pipeline::supply_timezone`].
    pub async fn resolve_timezone(&self) -> Result<TimezoneOffset> {
        let dataset = self.session.dataset()?;
        TimezoneResolver::resolve(&dataset, &self.session.settings().timezone_parameter).await
    }

    /// Like [`Pipeline::resolve_timezone`], asking `prompt` when the dataset has no offset.
    pub async fn ensure_timezone(&self, prompt: &dyn TimezonePrompt) -> Result<TimezoneOffset> {
        let dataset = self.session.dataset()?;
        TimezoneResolver::ensure(&dataset, &self.session.settings().timezone_parameter, prompt).await
    }

    pub fn supply_timezone(&self, offset: TimezoneOffset) -> Result<TimezoneOffset> {
        let dataset = self.session.dataset()?;
        Ok(TimezoneResolver::supply(&dataset, offset))
    }

    pub fn point_engine(&self) -> Result<PointQueryEngine> {
        Ok(PointQueryEngine::new(
            self.session.dataset()?,
            Arc::clone(&self.points),
            self.session.settings_handle(),
            self.session.progress_handle(),
        ))
    }

    /// The alarm/event log, resolved against the catalog stored with the dataset.
    pub async fn incident_log(&self) -> Result<IncidentLog> {
        let dataset = self.session.dataset()?;
        let catalog = dataset.db().catalog().await?;
        IncidentMatcher::new(self.session.progress_handle())
            .build_log(&dataset, &catalog)
            .await
    }

    pub async fn summary(&self) -> Result<DatasetSummary> {
        let dataset = self.session.dataset()?;
        let offset = dataset.timezone().ok_or(DdtError::TimezoneUnresolved)?;
        let machine = dataset.db().machine_summary().await?;

        Ok(DatasetSummary {
            run_dir: self.session.run_dir().to_path_buf(),
            machine_id: machine.machine_id,
            first_sample: machine.first_sample.map(|t| offset.apply(t)),
            last_sample: machine.last_sample.map(|t| offset.apply(t)),
            timezone: offset.to_string(),
            timezone_source: dataset.timezone_source(),
            archives: dataset.archives().into_iter().map(str::to_string).collect(),
            sources: dataset.sources().to_vec(),
            created_at: dataset.created_at(),
        })
    }

    /// Writes one `<point>.csv` per series into a fresh generation directory and
    /// returns that directory.
    pub fn export_series<'a, I>(&self, series: I) -> Result<PathBuf>
    where
        I: IntoIterator<Item = &'a PointSeries>,
    {
        let dir = self.session.new_generation_dir()?;
        let mut written = 0;
        for entry in series {
            let path = dir.join(format!("{}.csv", entry.point.id));
            let mut out = BufWriter::new(File::create(&path)?);
            writeln!(out, "timestamp,{}", entry.point.id)?;
            for sample in &entry.samples {
                writeln!(out, "{},{}", sample.timestamp, sample.value)?;
            }
            out.flush()?;
            written += 1;
        }
        log_info!("Exported {written} series to {}", dir.display());
        Ok(dir)
    }
}
