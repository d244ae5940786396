//! Change notifications for collections.
//!
//! Events are emitted after the change is applied, with the collection's new
//! version. Behind a [`SharedCollection`](crate::SharedCollection) they are
//! emitted once the write lock is released, so a renderer can re-read a
//! consistent snapshot from inside `emit`.

use crate::EntityId;
use parking_lot::Mutex;

/// A change applied to a collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectionEvent {
    Inserted { id: EntityId, index: usize },
    /// `old_id` differs from `new_id` when a temporary id was swapped.
    Replaced {
        old_id: EntityId,
        new_id: EntityId,
        index: usize,
    },
    Updated { id: EntityId, index: usize },
    Removed { id: EntityId, index: usize },
    Reset { len: usize },
}

/// Receives collection changes, typically to schedule a re-render.
pub trait CollectionSink: Send + Sync {
    fn emit(&self, version: u64, event: CollectionEvent);
}

/// A sink that discards all events.
#[derive(Debug, Default)]
pub struct NullSink;

impl CollectionSink for NullSink {
    fn emit(&self, _version: u64, _event: CollectionEvent) {}
}

/// A sink that records all events for testing.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<(u64, CollectionEvent)>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded events without versions.
    pub fn events(&self) -> Vec<CollectionEvent> {
        self.events.lock().iter().map(|(_, event)| event.clone()).collect()
    }

    /// Versions in emission order.
    pub fn versions(&self) -> Vec<u64> {
        self.events.lock().iter().map(|(version, _)| *version).collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CollectionSink for RecordingSink {
    fn emit(&self, version: u64, event: CollectionEvent) {
        self.events.lock().push((version, event));
    }
}
