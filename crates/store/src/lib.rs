//! kwatch store: per-resource-type snapshot cache and the change tracker that
//! turns watch notifications into rendered diffs.

#![forbid(unsafe_code)]

use chrono::Local;
use kwatch_core::{empty_state, object_key, ChangeEvent, EventType, ObjectState};
use metrics::counter;
use rustc_hash::FxHashMap;
use tracing::trace;

/// Last known state of every object of one resource type, keyed by object key.
///
/// Owned by a single watch loop; never shared.
#[derive(Debug, Default)]
pub struct SnapshotCache {
    map: FxHashMap<String, ObjectState>,
}

impl SnapshotCache {
    pub fn new() -> Self { Self::default() }

    /// Seed from a list of objects; later duplicates of a key win.
    pub fn from_objects<I: IntoIterator<Item = ObjectState>>(objects: I) -> Self {
        let mut cache = Self::new();
        for obj in objects {
            cache.insert(object_key(&obj), obj);
        }
        cache
    }

    pub fn len(&self) -> usize { self.map.len() }
    pub fn is_empty(&self) -> bool { self.map.is_empty() }

    pub fn get(&self, key: &str) -> Option<&ObjectState> { self.map.get(key) }

    pub fn insert(&mut self, key: String, state: ObjectState) -> Option<ObjectState> {
        self.map.insert(key, state)
    }

    pub fn remove(&mut self, key: &str) -> Option<ObjectState> { self.map.remove(key) }
}

/// Diffs each incoming object against its cached predecessor and updates the cache.
#[derive(Debug)]
pub struct ChangeTracker {
    cache: SnapshotCache,
    styled: bool,
}

impl ChangeTracker {
    pub fn new(cache: SnapshotCache, styled: bool) -> Self {
        Self { cache, styled }
    }

    pub fn cache(&self) -> &SnapshotCache { &self.cache }

    /// Apply one notification. Returns a change event only when the object
    /// actually differs from what was cached; bookmarks never produce one.
    pub fn observe(&mut self, event_type: EventType, object: ObjectState) -> Option<ChangeEvent> {
        let key = object_key(&object);
        let (old, new) = match event_type {
            EventType::Bookmark => return None,
            EventType::Deleted => {
                let old = self.cache.remove(&key).unwrap_or_else(empty_state);
                (old, empty_state())
            }
            EventType::Added | EventType::Modified => {
                let old = self.cache.insert(key.clone(), object.clone()).unwrap_or_else(empty_state);
                (old, object)
            }
        };

        let diff = kwatch_diff::compare(&old, &new);
        if !diff.modified() {
            trace!(key = %key, "no change; suppressed");
            counter!("kwatch_changes_suppressed_total", 1u64);
            return None;
        }
        counter!("kwatch_changes_total", 1u64);
        Some(ChangeEvent { timestamp: Local::now(), key, diff: diff.render(self.styled) })
    }
}
