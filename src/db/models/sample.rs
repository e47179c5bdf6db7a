use serde::Serialize;

use crate::timezone::{LocalTimestamp, RawTimestamp};

/// One reading of a channel, timezone already applied. Never mutated after creation.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TimeSeriesSample {
    pub point_id: String,
    pub timestamp: LocalTimestamp,
    pub value: f64,
}

/// Latest configuration row for an IO channel in `IOConfig@0`.
#[derive(Debug, Clone, PartialEq)]
pub struct IoPointInfo {
    pub io_id: i64,
    pub io_type: String,
    pub active: bool,
}

/// Latest configuration row for a drive in `VFDConfig@0`.
#[derive(Debug, Clone, PartialEq)]
pub struct VfdPointInfo {
    pub vfd_id: i64,
    pub active: bool,
}

/// Inclusive bounds in the dataset's raw time space.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RawRange {
    pub start: Option<RawTimestamp>,
    pub end: Option<RawTimestamp>,
}
