//! Timezone resolution and the two timestamp spaces.
//!
//! Timestamps read from the dataset are [`RawTimestamp`]s (nanoseconds, as
//! recorded by the machine). The only way to obtain a [`LocalTimestamp`] is
//! [`TimezoneOffset::apply`], which consumes a raw value, so an offset can
//! never be applied to an already shifted time.

use std::{fmt, str::FromStr};

use chrono::DateTime;
use serde::{Deserialize, Serialize};

use crate::db::MergedDataset;
use crate::error::{DdtError, Result};
use crate::progress::Stage;
use crate::{log_info, log_warn};

const ENABLE_LOGS: bool = true;

const NANOS_PER_SECOND: i64 = 1_000_000_000;
/// Largest offset the machine encodes: 14 hours, in hundredths of an hour.
const MAX_ENCODED_OFFSET: i64 = 1400;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawTimestamp(i64);

impl RawTimestamp {
    pub fn from_nanos(nanos: i64) -> Self {
        Self(nanos)
    }

    pub fn as_nanos(&self) -> i64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct LocalTimestamp(i64);

impl LocalTimestamp {
    pub fn as_nanos(&self) -> i64 {
        self.0
    }

    /// `YYYY-MM-DD HH:MM:SS`, the format used throughout reports and the alarm log.
    pub fn readable(&self) -> String {
        DateTime::from_timestamp_nanos(self.0)
            .naive_utc()
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()
    }
}

impl fmt::Display for LocalTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.readable())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OffsetSource {
    Embedded,
    Supplied,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimezoneOffset {
    seconds: i32,
}

impl TimezoneOffset {
    pub const UTC: TimezoneOffset = TimezoneOffset { seconds: 0 };

    /// Decodes the machine representation: hundredths of an hour (`800` is +8h,
    /// `-550` is -5.5h).
    pub fn from_encoded(value: i64) -> Option<Self> {
        if value.abs() > MAX_ENCODED_OFFSET {
            return None;
        }
        Some(Self {
            seconds: (value * 36) as i32,
        })
    }

    pub fn from_minutes(minutes: i32) -> Option<Self> {
        if minutes.abs() > 14 * 60 {
            return None;
        }
        Some(Self {
            seconds: minutes * 60,
        })
    }

    pub fn from_hours(hours: i32) -> Option<Self> {
        hours.checked_mul(60).and_then(Self::from_minutes)
    }

    pub fn seconds(&self) -> i32 {
        self.seconds
    }

    fn nanos(&self) -> i64 {
        i64::from(self.seconds) * NANOS_PER_SECOND
    }

    pub fn apply(&self, raw: RawTimestamp) -> LocalTimestamp {
        LocalTimestamp(raw.0.saturating_add(self.nanos()))
    }

    /// Converts a caller-side local bound back into the dataset's raw time space.
    pub fn raw_bound(&self, local_nanos: i64) -> RawTimestamp {
        RawTimestamp(local_nanos.saturating_sub(self.nanos()))
    }
}

impl fmt::Display for TimezoneOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.seconds < 0 { '-' } else { '+' };
        let minutes = self.seconds.abs() / 60;
        write!(f, "{sign}{:02}:{:02}", minutes / 60, minutes % 60)
    }
}

impl FromStr for TimezoneOffset {
    type Err = String;

    /// Accepts `8`, `+8`, `-5`, `+05:30`, `-0330`.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim();
        let (negative, digits) = match value.as_bytes().first() {
            Some(b'-') => (true, &value[1..]),
            Some(b'+') => (false, &value[1..]),
            _ => (false, value),
        };
        let invalid = || format!("invalid timezone offset '{value}'");

        let (hours, minutes) = if let Some((h, m)) = digits.split_once(':') {
            (h, m)
        } else if digits.len() == 4 {
            digits.split_at(2)
        } else {
            (digits, "0")
        };
        let hours: i32 = hours.parse().map_err(|_| invalid())?;
        let minutes: i32 = minutes.parse().map_err(|_| invalid())?;
        if !(0..60).contains(&minutes) {
            return Err(invalid());
        }

        let total = hours
            .checked_mul(60)
            .and_then(|m| m.checked_add(minutes))
            .ok_or_else(invalid)?;
        Self::from_minutes(if negative { -total } else { total }).ok_or_else(invalid)
    }
}

/// Collects an offset from outside the core when the dataset carries none.
/// Returning `None` cancels the operation that needed it.
pub trait TimezonePrompt {
    fn request_offset(&self) -> Option<TimezoneOffset>;
}

/// A fixed answer, for hosts that take the offset from a flag or config.
impl TimezonePrompt for Option<TimezoneOffset> {
    fn request_offset(&self) -> Option<TimezoneOffset> {
        *self
    }
}

pub struct TimezoneResolver;

impl TimezoneResolver {
    /// Returns the cached offset, or looks `parameter` up in the dataset's parameter
    /// tables and caches it. Fails with [`DdtError::TimezoneUnresolved`] when the
    /// parameter is missing or malformed; the caller then supplies one.
    pub async fn resolve(dataset: &MergedDataset, parameter: &str) -> Result<TimezoneOffset> {
        if let Some(offset) = dataset.timezone() {
            return Ok(offset);
        }

        let encoded = dataset.db().timezone_parameter(parameter).await?;
        match encoded.and_then(TimezoneOffset::from_encoded) {
            Some(offset) => {
                let cached = dataset.cache_timezone(offset, OffsetSource::Embedded);
                log_info!("Resolved timezone offset {cached} from parameter '{parameter}'");
                Ok(cached)
            }
            None => {
                log_warn!(
                    "Timezone parameter '{parameter}' missing or malformed ({encoded:?}); offset required"
                );
                Err(DdtError::TimezoneUnresolved)
            }
        }
    }

    /// Caches an externally supplied offset. Resolution happens at most once per
    /// dataset: if an offset is already cached it wins and is returned.
    pub fn supply(dataset: &MergedDataset, offset: TimezoneOffset) -> TimezoneOffset {
        dataset.cache_timezone(offset, OffsetSource::Supplied)
    }

    /// Resolves, falling back to `prompt` when the dataset has no usable offset.
    pub async fn ensure(
        dataset: &MergedDataset,
        parameter: &str,
        prompt: &dyn TimezonePrompt,
    ) -> Result<TimezoneOffset> {
        match Self::resolve(dataset, parameter).await {
            Err(DdtError::TimezoneUnresolved) => match prompt.request_offset() {
                Some(offset) => Ok(Self::supply(dataset, offset)),
                None => Err(DdtError::Cancelled {
                    stage: Stage::Timezone,
                }),
            },
            other => other,
        }
    }
}
