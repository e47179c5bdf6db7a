//! The user's current choice of points, presets, incidents and reference limits.

use std::{collections::BTreeMap, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::query::TimeRange;

/// A threshold as the user typed it. The text is kept verbatim so nothing is lost
/// to float formatting; graphs read it through [`ReferenceLimit::as_f64`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReferenceLimit(String);

impl ReferenceLimit {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_f64(&self) -> Option<f64> {
        self.0.trim().parse().ok()
    }
}

/// Immutable view of a selection, shared with query callers.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionSnapshot {
    pub points: Vec<String>,
    pub presets: Vec<String>,
    pub incidents: Vec<String>,
    pub reference_limits: BTreeMap<String, ReferenceLimit>,
    pub range: TimeRange,
}

impl SelectionSnapshot {
    pub fn is_empty(&self) -> bool {
        self.points.is_empty() && self.presets.is_empty() && self.incidents.is_empty()
    }

    pub fn reference_limit(&self, name: &str) -> Option<&ReferenceLimit> {
        self.reference_limits.get(name)
    }
}

#[derive(Debug, Default)]
pub struct SelectionStore {
    current: SelectionSnapshot,
    published: Option<Arc<SelectionSnapshot>>,
}

fn add_unique(list: &mut Vec<String>, id: String) -> bool {
    if list.contains(&id) {
        return false;
    }
    list.push(id);
    true
}

fn remove_item(list: &mut Vec<String>, id: &str) -> bool {
    let before = list.len();
    list.retain(|existing| existing != id);
    list.len() != before
}

impl SelectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops the published snapshot when the selection changed; returns `changed`.
    fn touch_if(&mut self, changed: bool) -> bool {
        if changed {
            self.published = None;
        }
        changed
    }

    /// Returns false if the point was already selected.
    pub fn add_point(&mut self, id: impl Into<String>) -> bool {
        let added = add_unique(&mut self.current.points, id.into());
        self.touch_if(added)
    }

    pub fn remove_point(&mut self, id: &str) -> bool {
        let removed = remove_item(&mut self.current.points, id);
        self.touch_if(removed)
    }

    pub fn clear_points(&mut self) {
        let had_any = !self.current.points.is_empty();
        self.current.points.clear();
        self.touch_if(had_any);
    }

    pub fn add_preset(&mut self, id: impl Into<String>) -> bool {
        let added = add_unique(&mut self.current.presets, id.into());
        self.touch_if(added)
    }

    pub fn remove_preset(&mut self, id: &str) -> bool {
        let removed = remove_item(&mut self.current.presets, id);
        self.touch_if(removed)
    }

    pub fn clear_presets(&mut self) {
        let had_any = !self.current.presets.is_empty();
        self.current.presets.clear();
        self.touch_if(had_any);
    }

    pub fn add_incident(&mut self, id: impl Into<String>) -> bool {
        let added = add_unique(&mut self.current.incidents, id.into());
        self.touch_if(added)
    }

    pub fn remove_incident(&mut self, id: &str) -> bool {
        let removed = remove_item(&mut self.current.incidents, id);
        self.touch_if(removed)
    }

    pub fn clear_incidents(&mut self) {
        let had_any = !self.current.incidents.is_empty();
        self.current.incidents.clear();
        self.touch_if(had_any);
    }

    /// Sets or replaces a named threshold; returns the previous value.
    pub fn set_reference_limit(
        &mut self,
        name: impl Into<String>,
        raw: impl Into<String>,
    ) -> Option<ReferenceLimit> {
        let limit = ReferenceLimit::new(raw);
        let previous = self.current.reference_limits.insert(name.into(), limit.clone());
        self.touch_if(previous.as_ref() != Some(&limit));
        previous
    }

    pub fn remove_reference_limit(&mut self, name: &str) -> Option<ReferenceLimit> {
        let removed = self.current.reference_limits.remove(name);
        self.touch_if(removed.is_some());
        removed
    }

    pub fn clear_reference_limits(&mut self) {
        let had_any = !self.current.reference_limits.is_empty();
        self.current.reference_limits.clear();
        self.touch_if(had_any);
    }

    pub fn set_range(&mut self, range: TimeRange) {
        let changed = self.current.range != range;
        self.current.range = range;
        self.touch_if(changed);
    }

    /// Back to an empty selection, as at session start.
    pub fn clear(&mut self) {
        let changed = self.current != SelectionSnapshot::default();
        self.current = SelectionSnapshot::default();
        self.touch_if(changed);
    }

    /// The current selection. Repeated calls without mutation share one allocation.
    pub fn snapshot(&mut self) -> Arc<SelectionSnapshot> {
        if let Some(published) = &self.published {
            return Arc::clone(published);
        }
        let snapshot = Arc::new(self.current.clone());
        self.published = Some(Arc::clone(&snapshot));
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_remove_and_clear() {
        let mut store = SelectionStore::new();
        assert!(store.add_point("HAULAGE_AMPS"));
        assert!(!store.add_point("HAULAGE_AMPS"));
        assert!(store.add_point("PUMP_AMPS"));
        assert!(store.add_preset("CUTTERS"));
        assert!(store.add_incident("4711"));

        assert!(store.remove_point("HAULAGE_AMPS"));
        assert!(!store.remove_point("HAULAGE_AMPS"));

        let snapshot = store.snapshot();
        assert_eq!(snapshot.points, vec!["PUMP_AMPS"]);
        assert_eq!(snapshot.presets, vec!["CUTTERS"]);
        assert_eq!(snapshot.incidents, vec!["4711"]);

        store.clear();
        assert!(store.snapshot().is_empty());
    }

    #[test]
    fn snapshots_are_immutable_views() {
        let mut store = SelectionStore::new();
        store.add_point("A");
        let first = store.snapshot();
        let again = store.snapshot();
        assert!(Arc::ptr_eq(&first, &again));

        store.add_point("B");
        let second = store.snapshot();
        assert_eq!(first.points, vec!["A"]);
        assert_eq!(second.points, vec!["A", "B"]);
    }

    #[test]
    fn no_op_changes_keep_the_published_snapshot() {
        let mut store = SelectionStore::new();
        store.add_point("A");
        store.set_reference_limit("cutterAmpLimit", "0.5");
        let before = store.snapshot();

        assert!(!store.add_point("A"));
        assert!(!store.remove_point("B"));
        assert!(!store.remove_preset("CUTTERS"));
        store.clear_incidents();
        store.set_reference_limit("cutterAmpLimit", "0.5");
        assert!(store.remove_reference_limit("missing").is_none());
        assert!(Arc::ptr_eq(&before, &store.snapshot()));

        assert!(store.remove_point("A"));
        assert!(!Arc::ptr_eq(&before, &store.snapshot()));
    }

    #[test]
    fn reference_limits_are_lossless() {
        let mut store = SelectionStore::new();
        store.set_reference_limit("cutterAmpLimit", "0.1000");
        store.set_reference_limit("jnaCurrentLimit", "12");
        let previous = store.set_reference_limit("jnaCurrentLimit", "12.50");
        assert_eq!(previous, Some(ReferenceLimit::new("12")));

        let snapshot = store.snapshot();
        let limit = snapshot.reference_limit("cutterAmpLimit").unwrap();
        assert_eq!(limit.as_str(), "0.1000");
        assert_eq!(limit.as_f64(), Some(0.1));
        assert_eq!(snapshot.reference_limit("jnaCurrentLimit").unwrap().as_f64(), Some(12.5));

        store.remove_reference_limit("cutterAmpLimit");
        assert!(store.snapshot().reference_limit("cutterAmpLimit").is_none());
        store.clear_reference_limits();
        assert!(store.snapshot().reference_limits.is_empty());
    }
}
