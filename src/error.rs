use std::path::PathBuf;

use thiserror::Error;

use crate::progress::Stage;

pub type Result<T, E = DdtError> = std::result::Result<T, E>;

/// Why a single archive could not be extracted.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("unsupported compression variant ({0}); expected an LZ4 frame")]
    UnsupportedCompression(&'static str),
    #[error("corrupt archive: {0}")]
    Corrupt(String),
    #[error("no module databases found (expected members containing '{0}')")]
    MissingModules(String),
    #[error("no metadata catalog found in any archive (expected a member containing '{0}')")]
    MissingCatalog(String),
    #[error("archive entry escapes the extraction directory: {0}")]
    UnsafeEntry(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum DdtError {
    #[error("extraction of {} failed: {source}", archive.display())]
    Extraction {
        archive: PathBuf,
        #[source]
        source: ExtractionError,
    },

    #[error(
        "schema conflict in table '{table}': module '{module}' has columns [{found}], \
         earlier modules declared [{expected}]"
    )]
    SchemaConflict {
        table: String,
        module: String,
        expected: String,
        found: String,
    },

    #[error("metadata catalog conflict for code '{code}' contributed by {}", source_path.display())]
    CatalogConflict { code: String, source_path: PathBuf },

    #[error("merged dataset is not ready: {0}")]
    DatasetNotReady(String),

    #[error("timezone offset could not be resolved from the dataset; an offset must be supplied")]
    TimezoneUnresolved,

    #[error("unknown point identifier '{0}'")]
    UnknownPoint(String),

    #[error("unknown preset graph '{0}'")]
    UnknownPreset(String),

    #[error("point '{id}' is unavailable in this dataset: {reason}")]
    PointUnavailable { id: String, reason: String },

    #[error("{stage} was cancelled")]
    Cancelled { stage: Stage },

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("worker failure: {0}")]
    Worker(String),
}

impl DdtError {
    pub fn extraction(archive: impl Into<PathBuf>, source: ExtractionError) -> Self {
        DdtError::Extraction {
            archive: archive.into(),
            source,
        }
    }

    /// Pipeline stage the error belongs to, for user-facing reporting.
    pub fn stage(&self) -> Stage {
        match self {
            DdtError::Extraction { .. } | DdtError::CatalogConflict { .. } => Stage::Extract,
            DdtError::SchemaConflict { .. } => Stage::Merge,
            DdtError::TimezoneUnresolved => Stage::Timezone,
            DdtError::UnknownPoint(_)
            | DdtError::UnknownPreset(_)
            | DdtError::PointUnavailable { .. } => Stage::PointQuery,
            DdtError::Cancelled { stage } => *stage,
            DdtError::DatasetNotReady(_)
            | DdtError::Database(_)
            | DdtError::Io(_)
            | DdtError::Worker(_) => Stage::Session,
        }
    }

    /// Recoverable conditions resume the pipeline once the caller acts.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, DdtError::TimezoneUnresolved)
    }
}
