use crate::db::models::ResolvedIncident;

fn matches(incident: &ResolvedIncident, needle: &str) -> bool {
    incident.text.to_lowercase().contains(needle) || incident.incident.code.to_lowercase().contains(needle)
}

/// Entries whose text or code contains `query`, case-insensitively, in log order.
/// An empty query keeps everything.
pub fn filter<'a>(entries: &'a [ResolvedIncident], query: &str) -> Vec<&'a ResolvedIncident> {
    let needle = query.trim().to_lowercase();
    entries
        .iter()
        .filter(|incident| needle.is_empty() || matches(incident, &needle))
        .collect()
}

/// Position of the first match at or after `cursor`, wrapping around to the start
/// of the log. A cursor past the end searches from the start.
pub fn find_next(entries: &[ResolvedIncident], query: &str, cursor: usize) -> Option<usize> {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() || entries.is_empty() {
        return None;
    }
    let start = cursor.min(entries.len());
    (start..entries.len())
        .chain(0..start)
        .find(|&position| matches(&entries[position], &needle))
}
