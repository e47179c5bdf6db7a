//! Per-run session context: output directory, settings snapshot, progress sink,
//! cancellation and the single merged dataset slot.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::db::MergedDataset;
use crate::error::{DdtError, Result};
use crate::progress::{ProgressSink, Stage};
use crate::settings::Settings;
use crate::{log_info, log_warn};

const ENABLE_LOGS: bool = true;

const EXTRACTED_DIR: &str = "extracted";
const PARTIAL_SUFFIX: &str = "partial";

enum DatasetSlot {
    Empty,
    Merging,
    Ready(Arc<MergedDataset>),
}

pub struct SessionContext {
    id: Uuid,
    run_dir: PathBuf,
    settings: Arc<Settings>,
    progress: Arc<dyn ProgressSink>,
    cancel: RwLock<CancellationToken>,
    slot: RwLock<DatasetSlot>,
}

impl SessionContext {
    /// Starts a session in a fresh run directory under the configured output root.
    /// An existing `data` directory is never reused: `data(1)`, `data(2)`, ... are tried.
    pub fn create(settings: Arc<Settings>, progress: Arc<dyn ProgressSink>) -> Result<Self> {
        fs::create_dir_all(&settings.output_root)?;
        let run_dir = unique_dir(&settings.output_root, &settings.run_folder_name)?;
        log_info!("Session run directory {}", run_dir.display());
        Ok(Self::with_run_dir(run_dir, settings, progress))
    }

    /// Continues in an existing run directory, picking up a completed merge if present.
    pub fn open(
        run_dir: impl Into<PathBuf>,
        settings: Arc<Settings>,
        progress: Arc<dyn ProgressSink>,
    ) -> Result<Self> {
        let run_dir = run_dir.into();
        fs::create_dir_all(&run_dir)?;
        Ok(Self::with_run_dir(run_dir, settings, progress))
    }

    fn with_run_dir(run_dir: PathBuf, settings: Arc<Settings>, progress: Arc<dyn ProgressSink>) -> Self {
        Self {
            id: Uuid::new_v4(),
            run_dir,
            settings,
            progress,
            cancel: RwLock::new(CancellationToken::new()),
            slot: RwLock::new(DatasetSlot::Empty),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn settings_handle(&self) -> Arc<Settings> {
        Arc::clone(&self.settings)
    }

    pub fn progress(&self) -> &dyn ProgressSink {
        self.progress.as_ref()
    }

    pub fn progress_handle(&self) -> Arc<dyn ProgressSink> {
        Arc::clone(&self.progress)
    }

    pub fn extraction_dir(&self) -> PathBuf {
        self.run_dir.join(EXTRACTED_DIR)
    }

    pub fn merged_path(&self) -> PathBuf {
        self.run_dir.join(&self.settings.merged_file_name)
    }

    pub fn partial_merged_path(&self) -> PathBuf {
        let mut name = self.settings.merged_file_name.clone();
        name.push('.');
        name.push_str(PARTIAL_SUFFIX);
        self.run_dir.join(name)
    }

    pub fn cancellation(&self) -> CancellationToken {
        match self.cancel.read() {
            Ok(token) => token.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Asks running extraction/merge work to stop at its next checkpoint.
    pub fn cancel(&self) {
        log_warn!("Cancellation requested for session {}", self.id);
        self.cancellation().cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation().is_cancelled()
    }

    pub(crate) fn check_cancelled(&self, stage: Stage) -> Result<()> {
        if self.is_cancelled() {
            return Err(DdtError::Cancelled { stage });
        }
        Ok(())
    }

    /// The merged dataset, or [`DdtError::DatasetNotReady`] while none is complete.
    pub fn dataset(&self) -> Result<Arc<MergedDataset>> {
        match &*self.read_slot() {
            DatasetSlot::Ready(dataset) => Ok(Arc::clone(dataset)),
            DatasetSlot::Merging => Err(DdtError::DatasetNotReady("merge in progress".into())),
            DatasetSlot::Empty => Err(DdtError::DatasetNotReady(
                "no dataset has been merged in this session".into(),
            )),
        }
    }

    pub fn has_dataset(&self) -> bool {
        matches!(&*self.read_slot(), DatasetSlot::Ready(_))
    }

    /// Claims the single writer slot. Dropping the guard without calling
    /// [`MergeGuard::complete`] puts the session back to having no dataset.
    pub(crate) fn begin_merge(&self) -> Result<MergeGuard<'_>> {
        let mut slot = self.write_slot();
        match &*slot {
            DatasetSlot::Merging => Err(DdtError::DatasetNotReady(
                "another merge is already running".into(),
            )),
            _ => {
                *slot = DatasetSlot::Merging;
                Ok(MergeGuard {
                    session: self,
                    done: false,
                })
            }
        }
    }

    /// Removes the merged dataset and extracted files so a different set of
    /// archives can be processed. Generated artifact directories are kept.
    pub fn clear_outputs(&self) -> Result<()> {
        {
            let mut slot = self.write_slot();
            if matches!(&*slot, DatasetSlot::Merging) {
                return Err(DdtError::DatasetNotReady(
                    "cannot clear outputs while a merge is running".into(),
                ));
            }
            *slot = DatasetSlot::Empty;
        }

        for file in [self.merged_path(), self.partial_merged_path()] {
            if file.exists() {
                fs::remove_file(&file)?;
            }
        }
        let extracted = self.extraction_dir();
        if extracted.exists() {
            fs::remove_dir_all(&extracted)?;
        }

        let mut token = match self.cancel.write() {
            Ok(token) => token,
            Err(poisoned) => poisoned.into_inner(),
        };
        *token = CancellationToken::new();

        log_info!("Cleared outputs in {}", self.run_dir.display());
        Ok(())
    }

    /// A new directory for one generation request's artifacts (plots, exports).
    pub fn new_generation_dir(&self) -> Result<PathBuf> {
        let stamp = Utc::now().format("output_%Y%m%d_%H%M%S").to_string();
        unique_dir(&self.run_dir, &stamp)
    }

    fn read_slot(&self) -> RwLockReadGuard<'_, DatasetSlot> {
        match self.slot.read() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write_slot(&self) -> RwLockWriteGuard<'_, DatasetSlot> {
        match self.slot.write() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

pub(crate) struct MergeGuard<'a> {
    session: &'a SessionContext,
    done: bool,
}

impl MergeGuard<'_> {
    pub(crate) fn complete(mut self, dataset: Arc<MergedDataset>) {
        *self.session.write_slot() = DatasetSlot::Ready(dataset);
        self.done = true;
    }
}

impl Drop for MergeGuard<'_> {
    fn drop(&mut self) {
        if !self.done {
            *self.session.write_slot() = DatasetSlot::Empty;
        }
    }
}

/// Creates `base/name`, or the first free `base/name(N)`.
fn unique_dir(base: &Path, name: &str) -> Result<PathBuf> {
    let mut candidate = base.join(name);
    let mut counter = 1;
    while candidate.exists() {
        candidate = base.join(format!("{name}({counter})"));
        counter += 1;
    }
    fs::create_dir_all(&candidate)?;
    Ok(candidate)
}
