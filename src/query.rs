//! Time-series queries for configured points against a merged dataset.

use std::{
    collections::{BTreeMap, HashSet},
    sync::Arc,
};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;

use crate::db::{
    models::{RawRange, TimeSeriesSample},
    MergedDataset,
};
use crate::error::{DdtError, Result};
use crate::points::{DataPoint, PointCatalog, PointCategory, PresetGroup};
use crate::progress::{ProgressSink, Stage, StageProgress};
use crate::selection::{ReferenceLimit, SelectionSnapshot};
use crate::settings::Settings;
use crate::timezone::{RawTimestamp, TimezoneOffset};
use crate::{log_debug, log_info, log_warn};

const ENABLE_LOGS: bool = true;

/// Inclusive bounds in the machine's local wall-clock time; `None` is open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeRange {
    pub start: Option<NaiveDateTime>,
    pub end: Option<NaiveDateTime>,
}

impl TimeRange {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn between(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
        }
    }

    fn to_raw(self, offset: TimezoneOffset) -> RawRange {
        let bound = |local: NaiveDateTime| {
            let nanos = local
                .and_utc()
                .timestamp_nanos_opt()
                .unwrap_or_else(|| local.and_utc().timestamp().saturating_mul(1_000_000_000));
            offset.raw_bound(nanos)
        };
        RawRange {
            start: self.start.map(bound),
            end: self.end.map(bound),
        }
    }
}

/// Whether one failing point fails the whole request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BatchMode {
    /// Failures are collected next to the successful series.
    #[default]
    Partial,
    AllOrNothing,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PointSeries {
    pub point: DataPoint,
    /// Ascending by timestamp, at most one sample per timestamp.
    pub samples: Vec<TimeSeriesSample>,
}

#[derive(Debug, Default)]
pub struct PointQueryOutcome {
    pub series: BTreeMap<String, PointSeries>,
    /// Points configured as inactive on the machine; they have no series.
    pub inactive: Vec<String>,
    /// Per-point failures in request order. Always empty in all-or-nothing mode.
    pub failures: Vec<DdtError>,
}

impl PointQueryOutcome {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PresetSeries {
    pub preset: PresetGroup,
    /// Value of the preset's reference limit when the selection carries one.
    pub reference_limit: Option<ReferenceLimit>,
    pub series: Vec<PointSeries>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SkippedPreset {
    pub preset_id: String,
    pub inactive_points: Vec<String>,
}

#[derive(Debug, Default)]
pub struct PresetQueryOutcome {
    pub presets: BTreeMap<String, PresetSeries>,
    /// Presets with at least one inactive member are not drawn at all.
    pub skipped: Vec<SkippedPreset>,
    pub failures: Vec<DdtError>,
}

#[derive(Debug, Default)]
pub struct SelectionQueryOutcome {
    pub points: PointQueryOutcome,
    pub presets: PresetQueryOutcome,
}

enum PointFetch {
    Active(Vec<(RawTimestamp, f64)>),
    Inactive,
}

pub struct PointQueryEngine {
    dataset: Arc<MergedDataset>,
    catalog: Arc<PointCatalog>,
    settings: Arc<Settings>,
    progress: Arc<dyn ProgressSink>,
}

impl PointQueryEngine {
    pub fn new(
        dataset: Arc<MergedDataset>,
        catalog: Arc<PointCatalog>,
        settings: Arc<Settings>,
        progress: Arc<dyn ProgressSink>,
    ) -> Self {
        Self {
            dataset,
            catalog,
            settings,
            progress,
        }
    }

    /// Series for each requested point, keyed by point id.
    ///
    /// Points are resolved independently and concurrently. Unknown ids fail with
    /// [`DdtError::UnknownPoint`]; in [`BatchMode::Partial`] such failures are
    /// returned next to the valid series, in [`BatchMode::AllOrNothing`] the first
    /// one (in request order) is the result. Timestamps are shifted by the
    /// dataset's resolved offset, which must be resolved beforehand.
    pub async fn query<I, S>(&self, ids: I, range: TimeRange, mode: BatchMode) -> Result<PointQueryOutcome>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let offset = self.dataset.timezone().ok_or(DdtError::TimezoneUnresolved)?;
        let raw_range = range.to_raw(offset);

        let mut seen = HashSet::new();
        let requested: Vec<String> = ids
            .into_iter()
            .map(|id| id.as_ref().to_string())
            .filter(|id| seen.insert(id.clone()))
            .collect();

        let mut failures: Vec<(usize, DdtError)> = Vec::new();
        let mut tasks = JoinSet::new();
        for (index, id) in requested.iter().enumerate() {
            let Some(point) = self.catalog.point(id).cloned() else {
                if mode == BatchMode::AllOrNothing {
                    return Err(DdtError::UnknownPoint(id.clone()));
                }
                log_warn!("Unknown point '{id}' requested");
                failures.push((index, DdtError::UnknownPoint(id.clone())));
                continue;
            };
            let dataset = Arc::clone(&self.dataset);
            let settings = Arc::clone(&self.settings);
            tasks.spawn(async move {
                let fetched = fetch_point(&dataset, &settings, &point, raw_range).await;
                (index, point, fetched)
            });
        }

        log_info!("Querying {} point(s)", tasks.len());
        let progress = StageProgress::new(self.progress.as_ref(), Stage::PointQuery, tasks.len());
        let mut outcome = PointQueryOutcome::default();
        let mut done = 0;
        while let Some(joined) = tasks.join_next().await {
            let (index, point, fetched) =
                joined.map_err(|err| DdtError::Worker(format!("point query task failed: {err}")))?;
            done += 1;
            progress.step(done, format!("Loaded {}", point.id));

            match fetched {
                Ok(PointFetch::Active(rows)) => {
                    log_debug!("{}: {} sample(s)", point.id, rows.len());
                    let samples = rows
                        .into_iter()
                        .map(|(timestamp, value)| TimeSeriesSample {
                            point_id: point.id.clone(),
                            timestamp: offset.apply(timestamp),
                            value,
                        })
                        .collect();
                    outcome
                        .series
                        .insert(point.id.clone(), PointSeries { point, samples });
                }
                Ok(PointFetch::Inactive) => {
                    log_warn!("Point {} is inactive on this machine", point.id);
                    outcome.inactive.push(point.id);
                }
                Err(err) => failures.push((index, err)),
            }
        }
        progress.finish(format!("Loaded {} series", outcome.series.len()));

        failures.sort_by_key(|(index, _)| *index);
        if mode == BatchMode::AllOrNothing {
            if let Some((_, err)) = failures.into_iter().next() {
                return Err(err);
            }
        } else {
            outcome.failures = failures.into_iter().map(|(_, err)| err).collect();
        }
        outcome.inactive.sort();
        Ok(outcome)
    }

    /// Series for each requested preset graph. `limits` supplies the values of the
    /// presets' reference limits.
    pub async fn query_presets<I, S>(
        &self,
        ids: I,
        range: TimeRange,
        mode: BatchMode,
        limits: &BTreeMap<String, ReferenceLimit>,
    ) -> Result<PresetQueryOutcome>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut outcome = PresetQueryOutcome::default();
        let mut presets = Vec::new();
        for id in ids {
            let id = id.as_ref();
            match self.catalog.preset(id) {
                Some(preset) => presets.push(preset.clone()),
                None if mode == BatchMode::AllOrNothing => {
                    return Err(DdtError::UnknownPreset(id.to_string()))
                }
                None => outcome.failures.push(DdtError::UnknownPreset(id.to_string())),
            }
        }

        let members: Vec<String> = presets
            .iter()
            .flat_map(|preset| preset.points.iter().cloned())
            .collect();
        let mut points = self.query(members, range, mode).await?;
        outcome.failures.append(&mut points.failures);

        for preset in presets {
            let inactive: Vec<String> = preset
                .points
                .iter()
                .filter(|id| points.inactive.contains(id))
                .cloned()
                .collect();
            if !inactive.is_empty() {
                log_warn!("Skipping preset {}: inactive point(s) {:?}", preset.id, inactive);
                outcome.skipped.push(SkippedPreset {
                    preset_id: preset.id.clone(),
                    inactive_points: inactive,
                });
                continue;
            }

            let series = preset
                .points
                .iter()
                .filter_map(|id| points.series.get(id).cloned())
                .collect();
            let reference_limit = preset
                .reference_limit
                .as_ref()
                .and_then(|name| limits.get(name).cloned());
            outcome.presets.insert(
                preset.id.clone(),
                PresetSeries {
                    preset,
                    reference_limit,
                    series,
                },
            );
        }
        Ok(outcome)
    }

    /// Everything a selection asks for, tolerating per-item failures.
    pub async fn query_selection(&self, selection: &SelectionSnapshot) -> Result<SelectionQueryOutcome> {
        let points = self
            .query(&selection.points, selection.range, BatchMode::Partial)
            .await?;
        let presets = self
            .query_presets(
                &selection.presets,
                selection.range,
                BatchMode::Partial,
                &selection.reference_limits,
            )
            .await?;
        Ok(SelectionQueryOutcome { points, presets })
    }
}

async fn fetch_point(
    dataset: &MergedDataset,
    settings: &Settings,
    point: &DataPoint,
    range: RawRange,
) -> Result<PointFetch> {
    let db = dataset.db();
    let unavailable = |reason: String| DdtError::PointUnavailable {
        id: point.id.clone(),
        reason,
    };

    match &point.category {
        PointCategory::Io { io_name } => {
            let info = db
                .io_point_info(io_name)
                .await?
                .ok_or_else(|| unavailable(format!("no IO configuration named '{io_name}'")))?;
            if !info.active {
                return Ok(PointFetch::Inactive);
            }
            let table = settings
                .io_type_tables
                .get(&info.io_type)
                .ok_or_else(|| unavailable(format!("unsupported IO type '{}'", info.io_type)))?;
            let rows = db.io_point_samples(table, info.io_id, range).await?;
            Ok(PointFetch::Active(rows))
        }
        PointCategory::Vfd { vfd_name, field } => {
            let info = db
                .vfd_point_info(vfd_name)
                .await?
                .ok_or_else(|| unavailable(format!("no drive configuration named '{vfd_name}'")))?;
            if !info.active {
                return Ok(PointFetch::Inactive);
            }
            let rows = db.vfd_point_samples(info.vfd_id, field, range).await?;
            Ok(PointFetch::Active(rows))
        }
    }
}
