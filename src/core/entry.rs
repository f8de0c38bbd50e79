//! In-memory entry model and the serialized envelope written per key.

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Bounds required of session payloads and run sub-states.
///
/// Blanket-implemented; any `Clone + Serialize + DeserializeOwned` type that
/// can move into timer tasks qualifies.
pub trait StatePayload: Serialize + DeserializeOwned + Clone + Send + 'static {}

impl<X> StatePayload for X where X: Serialize + DeserializeOwned + Clone + Send + 'static {}

/// In-memory record for one session key.
///
/// The store owns every `Entry`; callers only ever see clones of `state` and
/// the run payloads.
pub(crate) struct Entry<T, R> {
    pub key: String,
    pub state: T,
    pub runs: HashMap<String, R>,
    /// True when the in-memory state has diverged from the last successful
    /// disk write.
    pub dirty: bool,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
    /// Bumped on every mutation. Debounce timers capture the value they were
    /// scheduled for, so a superseded timer never performs a redundant write.
    pub mutation_seq: u64,
}

impl<T, R> Entry<T, R> {
    /// A freshly created entry starts dirty: its default payload exists
    /// nowhere on disk yet, and must survive eviction.
    pub fn new(key: impl Into<String>, state: T) -> Self {
        let now = now_ms();
        Self {
            key: key.into(),
            state,
            runs: HashMap::new(),
            dirty: true,
            created_at_ms: now,
            updated_at_ms: now,
            mutation_seq: 1,
        }
    }

    pub fn touch_mutation(&mut self) {
        self.dirty = true;
        self.updated_at_ms = now_ms();
        self.mutation_seq = self.mutation_seq.wrapping_add(1);
    }
}

impl<T: Clone, R: Clone> Entry<T, R> {
    pub fn to_envelope(&self) -> Envelope<T, R> {
        Envelope {
            key: self.key.clone(),
            created_at: self.created_at_ms,
            updated_at: self.updated_at_ms,
            state: self.state.clone(),
            runs: self.runs.clone(),
        }
    }

    /// Entries reconstituted from disk are clean by definition.
    pub fn from_envelope(envelope: Envelope<T, R>) -> Self {
        Self {
            key: envelope.key,
            state: envelope.state,
            runs: envelope.runs,
            dirty: false,
            created_at_ms: envelope.created_at,
            updated_at_ms: envelope.updated_at,
            mutation_seq: 1,
        }
    }
}

/// On-disk record for one key. Field names match the original wire format;
/// `runs` is omitted when no run sub-state exists.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope<T, R> {
    pub key: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub state: T,
    #[serde(default = "HashMap::new", skip_serializing_if = "HashMap::is_empty")]
    pub runs: HashMap<String, R>,
}

/// Named mutable access to list-valued payload fields, required by
/// [`append_to_list`](crate::SessionRuntimeStore::append_to_list).
pub trait ListFieldAccess {
    /// Element type stored in the payload's list fields.
    type Item;

    /// Returns the list named `field`, or `None` if the payload has no such
    /// list field.
    fn list_field_mut(&mut self, field: &str) -> Option<&mut Vec<Self::Item>>;
}

/// Appends `item`, then trims from the front until the list holds at most
/// `max_items` elements. `max_items == 0` leaves the list unbounded.
pub fn append_bounded<V>(list: &mut Vec<V>, item: V, max_items: usize) {
    list.push(item);
    if max_items == 0 {
        return;
    }
    while list.len() > max_items {
        list.remove(0);
    }
}

pub(crate) fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_bounded_evicts_oldest_when_over_max() {
        let mut list = vec![1, 2, 3];
        append_bounded(&mut list, 4, 3);
        assert_eq!(list, vec![2, 3, 4]);
    }

    #[test]
    fn append_bounded_grows_while_under_max() {
        let mut list = vec![1];
        append_bounded(&mut list, 2, 5);
        assert_eq!(list, vec![1, 2]);
    }

    #[test]
    fn append_bounded_max_items_one() {
        let mut list: Vec<i64> = Vec::new();
        append_bounded(&mut list, 10, 1);
        assert_eq!(list, vec![10]);
        append_bounded(&mut list, 20, 1);
        assert_eq!(list, vec![20]);
    }

    #[test]
    fn append_bounded_zero_means_unbounded() {
        let mut list = Vec::new();
        for i in 0..10 {
            append_bounded(&mut list, i, 0);
        }
        assert_eq!(list.len(), 10);
    }

    #[test]
    fn new_entry_starts_dirty() {
        let entry: Entry<i64, ()> = Entry::new("k", 7);
        assert!(entry.dirty);
        assert_eq!(entry.created_at_ms, entry.updated_at_ms);
    }

    #[test]
    fn envelope_round_trip_preserves_runs() {
        let mut entry: Entry<i64, i64> = Entry::new("k", 7);
        entry.runs.insert("run-1".to_string(), 3);

        let json = serde_json::to_string(&entry.to_envelope()).unwrap();
        let envelope: Envelope<i64, i64> = serde_json::from_str(&json).unwrap();
        let restored = Entry::from_envelope(envelope);

        assert_eq!(restored.state, 7);
        assert_eq!(restored.runs.get("run-1"), Some(&3));
        assert!(!restored.dirty);
    }

    #[test]
    fn envelope_omits_empty_runs_and_uses_camel_case() {
        let entry: Entry<i64, ()> = Entry::new("session-1", 42);
        let json = serde_json::to_value(entry.to_envelope()).unwrap();

        assert_eq!(json["key"], "session-1");
        assert!(json["createdAt"].is_i64());
        assert!(json["updatedAt"].is_i64());
        assert_eq!(json["state"], 42);
        assert!(json.get("runs").is_none());
    }
}
