pub mod incident;
pub mod report;
pub mod sample;

pub use incident::{
    CatalogLookupMiss, Incident, IncidentArgument, IncidentKind, IncidentState, ResolvedIncident,
};
pub use report::MachineSummary;
pub use sample::{IoPointInfo, RawRange, TimeSeriesSample, VfdPointInfo};
