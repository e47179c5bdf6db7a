//! Alarm/event log: incident records resolved to readable text.

mod format;
mod search;

pub use format::IncidentFormatter;

use std::{collections::HashMap, sync::Arc};

use serde::Serialize;

use crate::db::{
    models::{CatalogLookupMiss, Incident, ResolvedIncident},
    MergedDataset,
};
use crate::error::{DdtError, Result};
use crate::extract::MetadataCatalog;
use crate::progress::{ProgressSink, Stage, StageProgress};
use crate::timezone::TimezoneOffset;
use crate::{log_info, log_warn};

const ENABLE_LOGS: bool = true;

const PROGRESS_EVERY: usize = 1000;

/// Text shown for an incident whose code the catalog does not know.
pub fn unknown_incident_text(code: &str) -> String {
    format!("Unknown incident (code {code})")
}

/// Resolved incidents in timestamp order (id breaks ties), plus the codes that
/// could not be resolved.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IncidentLog {
    entries: Vec<ResolvedIncident>,
    misses: Vec<CatalogLookupMiss>,
}

impl IncidentLog {
    pub fn entries(&self) -> &[ResolvedIncident] {
        &self.entries
    }

    pub fn misses(&self) -> &[CatalogLookupMiss] {
        &self.misses
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, position: usize) -> Option<&ResolvedIncident> {
        self.entries.get(position)
    }

    /// Entries whose resolved text or raw code contains `query` (case-insensitive).
    pub fn filter(&self, query: &str) -> Vec<&ResolvedIncident> {
        search::filter(&self.entries, query)
    }

    /// Next match at or after `cursor`, wrapping to the start. Returns the position
    /// so callers can advance the cursor past it for the following search.
    pub fn find_next(&self, query: &str, cursor: usize) -> Option<(usize, &ResolvedIncident)> {
        search::find_next(&self.entries, query, cursor).map(|position| (position, &self.entries[position]))
    }

    /// Entries whose id is among `ids`, in log order.
    pub fn select<S: AsRef<str>>(&self, ids: &[S]) -> Vec<&ResolvedIncident> {
        self.entries
            .iter()
            .filter(|entry| ids.iter().any(|id| id.as_ref() == entry.incident.id))
            .collect()
    }
}

pub struct IncidentMatcher {
    progress: Arc<dyn ProgressSink>,
}

impl IncidentMatcher {
    pub fn new(progress: Arc<dyn ProgressSink>) -> Self {
        Self { progress }
    }

    /// Reads every incident of `dataset` and resolves it against `catalog`.
    /// The dataset's timezone must be resolved first.
    pub async fn build_log(&self, dataset: &MergedDataset, catalog: &MetadataCatalog) -> Result<IncidentLog> {
        let offset = dataset.timezone().ok_or(DdtError::TimezoneUnresolved)?;
        let incidents = dataset.db().incidents().await?;
        let users = dataset.db().user_names().await?;
        log_info!(
            "Resolving {} incident(s) against {} catalog entries",
            incidents.len(),
            catalog.len()
        );

        let log = resolve(incidents, catalog, &users, offset, self.progress.as_ref())?;
        if !log.misses.is_empty() {
            log_warn!("{} incident(s) have no catalog text", log.misses.len());
        }
        Ok(log)
    }
}

/// Resolves already loaded incidents. Misses never fail the log.
pub fn resolve(
    mut incidents: Vec<Incident>,
    catalog: &MetadataCatalog,
    users: &HashMap<String, String>,
    offset: TimezoneOffset,
    progress: &dyn ProgressSink,
) -> Result<IncidentLog> {
    let formatter = IncidentFormatter::new(catalog, users)
        .map_err(|err| DdtError::Worker(format!("incident text patterns: {err}")))?;
    incidents.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));

    let stage = StageProgress::new(progress, Stage::Incidents, incidents.len());
    let mut log = IncidentLog {
        entries: Vec::with_capacity(incidents.len()),
        misses: Vec::new(),
    };

    for (done, incident) in incidents.into_iter().enumerate() {
        if done % PROGRESS_EVERY == 0 {
            stage.step(done, format!("Resolved {done} incident(s)"));
        }

        let (text, resolved) = match catalog.get(&incident.code) {
            Some(template) => (formatter.format(template, &incident.args), true),
            None => {
                log.misses.push(CatalogLookupMiss {
                    incident_id: incident.id.clone(),
                    code: incident.code.clone(),
                });
                (unknown_incident_text(&incident.code), false)
            }
        };
        let help_text = incident
            .help_code
            .as_deref()
            .and_then(|code| catalog.get(code))
            .map(|raw| formatter.plain_help_text(raw))
            .unwrap_or_default();

        log.entries.push(ResolvedIncident {
            local_time: offset.apply(incident.timestamp),
            incident,
            text,
            help_text,
            resolved,
        });
    }

    stage.finish(format!("Resolved {} incident(s)", log.entries.len()));
    Ok(log)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{IncidentArgument, IncidentKind, IncidentState};
    use crate::progress::NoProgress;
    use crate::timezone::RawTimestamp;

    fn incident(code: &str, at: i64) -> Incident {
        Incident {
            id: code.to_string(),
            timestamp: RawTimestamp::from_nanos(at),
            code: code.to_string(),
            help_code: None,
            kind: IncidentKind::Alarm,
            state: IncidentState::Set,
            args: Vec::new(),
        }
    }

    fn catalog() -> MetadataCatalog {
        MetadataCatalog::from_entries([
            ("10", "Haulage overload %d A"),
            ("11", "Left cutter motor hot"),
            ("12", "Water pressure low"),
            ("90", "<p>Check the&#32;filter</p>"),
        ])
    }

    fn build(incidents: Vec<Incident>) -> IncidentLog {
        resolve(
            incidents,
            &catalog(),
            &HashMap::new(),
            TimezoneOffset::UTC,
            &NoProgress,
        )
        .unwrap()
    }

    #[test]
    fn unknown_codes_resolve_to_sentinel_text() {
        let log = build(vec![incident("11", 100), incident("X99", 200), incident("X99", 300)]);

        assert_eq!(log.len(), 3);
        assert_eq!(log.entries()[1].text, "Unknown incident (code X99)");
        assert!(!log.entries()[1].resolved);
        assert!(log.entries()[0].resolved);
        assert_eq!(log.misses().len(), 2);
        assert_eq!(log.misses()[0].code, "X99");
    }

    #[test]
    fn entries_are_ordered_by_time_then_id() {
        let mut overload = incident("10", 200);
        overload.args = vec![IncidentArgument {
            long_value: Some(450),
            ..Default::default()
        }];
        overload.help_code = Some("90".into());
        let log = build(vec![incident("12", 200), overload, incident("11", 100)]);

        let ids: Vec<&str> = log.entries().iter().map(|e| e.incident.id.as_str()).collect();
        assert_eq!(ids, ["11", "10", "12"]);
        assert_eq!(log.entries()[1].text, "Haulage overload 450 A");
        assert_eq!(log.entries()[1].help_text, "Check the filter");
        assert_eq!(log.entries()[0].help_text, "");
    }

    #[test]
    fn filter_matches_text_or_code() {
        let log = build(vec![incident("10", 100), incident("11", 200), incident("X99", 300)]);
        assert_eq!(log.filter("CUTTER").len(), 1);
        assert_eq!(log.filter("x9").len(), 1);
        assert_eq!(log.filter("").len(), 3);
        assert!(log.filter("conveyor").is_empty());
    }

    #[test]
    fn find_next_wraps_past_the_end() {
        let log = build(vec![incident("11", 100), incident("12", 200), incident("10", 300)]);

        let (first, _) = log.find_next("cutter", 0).unwrap();
        assert_eq!(first, 0);
        // The only match lies before the cursor: wrap around to it.
        let (again, found) = log.find_next("cutter", first + 1).unwrap();
        assert_eq!(again, 0);
        assert_eq!(found.incident.code, "11");
        assert_eq!(log.find_next("pressure", 1).map(|(p, _)| p), Some(1));
        assert!(log.find_next("conveyor", 0).is_none());
        assert!(log.find_next("", 0).is_none());
    }

    #[test]
    fn select_keeps_log_order() {
        let log = build(vec![incident("10", 100), incident("11", 200), incident("12", 300)]);
        let picked: Vec<&str> = log
            .select(&["12", "10"])
            .iter()
            .map(|e| e.incident.id.as_str())
            .collect();
        assert_eq!(picked, ["10", "12"]);
    }
}
