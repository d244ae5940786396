//! The ordered record registry.

use crate::{
    CollectionError, CollectionEvent, CollectionResult, CollectionSink, EntityId, EntityRecord,
    NullSink, SyncState,
};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// Where to insert a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertPosition {
    Front,
    Back,
    /// Before the record currently at this index; `len` appends.
    At(usize),
}

/// Ordered, id-keyed records of one entity type.
///
/// No network access. Ids are unique across the collection at all times.
pub struct EntityCollection<T> {
    records: Vec<EntityRecord<T>>,
    version: u64,
    sink: Arc<dyn CollectionSink>,
    /// Events held back while a [`SharedCollection`](crate::SharedCollection)
    /// write lock is taken.
    deferred: Option<Vec<(u64, CollectionEvent)>>,
}

impl<T> Default for EntityCollection<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: fmt::Debug> fmt::Debug for EntityCollection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityCollection")
            .field("records", &self.records)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

impl<T> EntityCollection<T> {
    pub fn new() -> Self {
        Self::with_sink(Arc::new(NullSink))
    }

    pub fn with_sink(sink: Arc<dyn CollectionSink>) -> Self {
        Self {
            records: Vec::new(),
            version: 0,
            sink,
            deferred: None,
        }
    }

    /// Build a collection from records, rejecting duplicate ids.
    pub fn from_records(records: Vec<EntityRecord<T>>) -> CollectionResult<Self> {
        let mut collection = Self::new();
        collection.reset(records)?;
        Ok(collection)
    }

    /// Bumped on every change.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Borrowed view of the records in order.
    pub fn records(&self) -> &[EntityRecord<T>] {
        &self.records
    }

    pub fn ids(&self) -> Vec<EntityId> {
        self.records.iter().map(|record| record.id.clone()).collect()
    }

    pub fn position(&self, id: &EntityId) -> Option<usize> {
        self.records.iter().position(|record| &record.id == id)
    }

    pub fn contains(&self, id: &EntityId) -> bool {
        self.position(id).is_some()
    }

    pub fn get(&self, id: &EntityId) -> Option<&EntityRecord<T>> {
        self.records.iter().find(|record| &record.id == id)
    }

    /// Insert a record at the given position. Returns the index it landed at.
    pub fn insert(&mut self, record: EntityRecord<T>, at: InsertPosition) -> CollectionResult<usize> {
        if self.contains(&record.id) {
            return Err(CollectionError::DuplicateId(record.id));
        }

        let len = self.records.len();
        let index = match at {
            InsertPosition::Front => 0,
            InsertPosition::Back => len,
            InsertPosition::At(index) if index <= len => index,
            InsertPosition::At(index) => return Err(CollectionError::IndexOutOfBounds { index, len }),
        };

        let id = record.id.clone();
        self.records.insert(index, record);
        self.changed(CollectionEvent::Inserted { id, index });
        Ok(index)
    }

    pub fn insert_at_front(&mut self, record: EntityRecord<T>) -> CollectionResult<()> {
        self.insert(record, InsertPosition::Front).map(|_| ())
    }

    /// Swap the record `id` for `record` in place. Returns the old record.
    ///
    /// `record` may carry a different id (a temporary id being confirmed),
    /// which must not already be present elsewhere.
    pub fn replace(&mut self, id: &EntityId, record: EntityRecord<T>) -> CollectionResult<EntityRecord<T>> {
        let index = self
            .position(id)
            .ok_or_else(|| CollectionError::NotFound(id.clone()))?;
        if &record.id != id && self.contains(&record.id) {
            return Err(CollectionError::DuplicateId(record.id));
        }

        let new_id = record.id.clone();
        let old = std::mem::replace(&mut self.records[index], record);
        self.changed(CollectionEvent::Replaced {
            old_id: old.id.clone(),
            new_id,
            index,
        });
        Ok(old)
    }

    /// Remove the record `id`, returning it and the index it held.
    pub fn remove(&mut self, id: &EntityId) -> CollectionResult<(EntityRecord<T>, usize)> {
        let index = self
            .position(id)
            .ok_or_else(|| CollectionError::NotFound(id.clone()))?;
        let record = self.records.remove(index);
        self.changed(CollectionEvent::Removed {
            id: record.id.clone(),
            index,
        });
        Ok((record, index))
    }

    /// Mutate the fields of `id` in place.
    pub fn update<F>(&mut self, id: &EntityId, patcher: F) -> CollectionResult<()>
    where
        F: FnOnce(&mut T),
    {
        let index = self
            .position(id)
            .ok_or_else(|| CollectionError::NotFound(id.clone()))?;
        patcher(&mut self.records[index].fields);
        self.changed(CollectionEvent::Updated {
            id: id.clone(),
            index,
        });
        Ok(())
    }

    /// Set the sync state of `id`, returning the previous one.
    pub fn set_sync_state(&mut self, id: &EntityId, state: SyncState) -> CollectionResult<SyncState> {
        let index = self
            .position(id)
            .ok_or_else(|| CollectionError::NotFound(id.clone()))?;
        let previous = std::mem::replace(&mut self.records[index].sync_state, state);
        if previous != state {
            self.changed(CollectionEvent::Updated {
                id: id.clone(),
                index,
            });
        }
        Ok(previous)
    }

    /// Replace the whole contents, rejecting duplicate ids.
    pub fn reset(&mut self, records: Vec<EntityRecord<T>>) -> CollectionResult<()> {
        {
            let mut seen = HashSet::with_capacity(records.len());
            for record in &records {
                if !seen.insert(&record.id) {
                    return Err(CollectionError::DuplicateId(record.id.clone()));
                }
            }
        }

        self.records = records;
        let len = self.records.len();
        self.changed(CollectionEvent::Reset { len });
        Ok(())
    }

    /// Queue events instead of emitting them until [`Self::take_deferred`].
    pub(crate) fn defer_events(&mut self) {
        self.deferred.get_or_insert_with(Vec::new);
    }

    /// Stop queueing and hand back the sink with the queued events.
    pub(crate) fn take_deferred(&mut self) -> (Arc<dyn CollectionSink>, Vec<(u64, CollectionEvent)>) {
        (Arc::clone(&self.sink), self.deferred.take().unwrap_or_default())
    }

    fn changed(&mut self, event: CollectionEvent) {
        self.version += 1;
        trace!(version = self.version, event = ?event, "Collection changed");
        match &mut self.deferred {
            Some(queue) => queue.push((self.version, event)),
            None => self.sink.emit(self.version, event),
        }
    }
}

impl<T: Clone> EntityCollection<T> {
    /// Cloned, ordered view for rendering.
    pub fn snapshot(&self) -> Vec<EntityRecord<T>> {
        self.records.clone()
    }
}
