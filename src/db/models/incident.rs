use serde::{Deserialize, Serialize};

use crate::timezone::{LocalTimestamp, RawTimestamp};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum IncidentKind {
    Event,
    Warning,
    Alarm,
    Other(String),
}

impl IncidentKind {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "J_INCIDENT_EVENT" => IncidentKind::Event,
            "J_INCIDENT_WARNING" => IncidentKind::Warning,
            "J_INCIDENT_ALARM" => IncidentKind::Alarm,
            other => IncidentKind::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            IncidentKind::Event => "event",
            IncidentKind::Warning => "warning",
            IncidentKind::Alarm => "alarm",
            IncidentKind::Other(raw) => raw,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum IncidentState {
    OneShot,
    Set,
    Clear,
    Other(String),
}

impl IncidentState {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "J_INCIDENT_ONE_SHOT" => IncidentState::OneShot,
            "J_INCIDENT_SET" => IncidentState::Set,
            "J_INCIDENT_CLEAR" => IncidentState::Clear,
            other => IncidentState::Other(other.to_string()),
        }
    }
}

/// One entry of an incident's `args` array. Exactly one field is normally set.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IncidentArgument {
    #[serde(default)]
    pub long_value: Option<i64>,
    #[serde(default)]
    pub string_tidx_value: Option<i64>,
    #[serde(default)]
    pub real_value: Option<f64>,
}

/// Raw alarm/event record from `IncidentAll@0`.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Incident {
    /// `incidentTidx`; doubles as the catalog code of the incident text.
    pub id: String,
    pub timestamp: RawTimestamp,
    pub code: String,
    pub help_code: Option<String>,
    pub kind: IncidentKind,
    pub state: IncidentState,
    pub args: Vec<IncidentArgument>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedIncident {
    #[serde(flatten)]
    pub incident: Incident,
    pub local_time: LocalTimestamp,
    pub text: String,
    pub help_text: String,
    /// False when the code had no catalog entry and `text` is the sentinel.
    pub resolved: bool,
}

/// A code that had no catalog entry. Absorbed per record, never fatal.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CatalogLookupMiss {
    pub incident_id: String,
    pub code: String,
}
