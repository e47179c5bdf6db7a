pub mod db;
pub mod error;
pub mod extract;
pub mod incidents;
pub mod merge;
pub mod pipeline;
pub mod points;
pub mod progress;
pub mod query;
pub mod selection;
pub mod session;
pub mod settings;
pub mod timezone;
pub mod utils;

pub use db::{MergedDataset, SourceRecord};
pub use error::{DdtError, ExtractionError, Result};
pub use extract::{ArchiveExtractor, Extraction, MetadataCatalog};
pub use incidents::{IncidentLog, IncidentMatcher};
pub use merge::{ConflictPolicy, DatabaseMerger};
pub use pipeline::{DatasetSummary, Pipeline};
pub use points::{DataPoint, PointCatalog, PresetGroup};
pub use progress::{ChannelProgress, LogProgress, NoProgress, ProgressEvent, ProgressSink, Stage};
pub use query::{BatchMode, PointQueryEngine, TimeRange};
pub use selection::{ReferenceLimit, SelectionSnapshot, SelectionStore};
pub use session::SessionContext;
pub use settings::{Settings, SettingsStore};
pub use timezone::{TimezoneOffset, TimezonePrompt, TimezoneResolver};
pub use utils::logging::init_logging;
