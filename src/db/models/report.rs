use serde::Serialize;

use crate::timezone::RawTimestamp;

/// Machine identity and recording span, as kept in `CCUSync@0`.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MachineSummary {
    pub machine_id: Option<String>,
    pub first_sample: Option<RawTimestamp>,
    pub last_sample: Option<RawTimestamp>,
}
