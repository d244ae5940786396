//! Collection shared between a controller and its readers.

use crate::{EntityCollection, EntityRecord};
use parking_lot::RwLock;
use std::sync::Arc;

/// Cloneable handle to a collection behind a read-write lock.
///
/// Access goes through closures so a guard can never be held across an
/// `.await`. Change events from a [`write`](Self::write) reach the sink after
/// the lock is released, so a sink may read the collection again.
pub struct SharedCollection<T> {
    inner: Arc<RwLock<EntityCollection<T>>>,
}

impl<T> Clone for SharedCollection<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for SharedCollection<T> {
    fn default() -> Self {
        Self::new(EntityCollection::new())
    }
}

impl<T> SharedCollection<T> {
    pub fn new(collection: EntityCollection<T>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(collection)),
        }
    }

    pub fn read<R>(&self, f: impl FnOnce(&EntityCollection<T>) -> R) -> R {
        f(&self.inner.read())
    }

    pub fn write<R>(&self, f: impl FnOnce(&mut EntityCollection<T>) -> R) -> R {
        let (result, sink, events) = {
            let mut collection = self.inner.write();
            collection.defer_events();
            let result = f(&mut collection);
            let (sink, events) = collection.take_deferred();
            (result, sink, events)
        };

        for (version, event) in events {
            sink.emit(version, event);
        }
        result
    }

    pub fn version(&self) -> u64 {
        self.read(EntityCollection::version)
    }

    pub fn len(&self) -> usize {
        self.read(EntityCollection::len)
    }

    pub fn is_empty(&self) -> bool {
        self.read(EntityCollection::is_empty)
    }
}

impl<T: Clone> SharedCollection<T> {
    pub fn snapshot(&self) -> Vec<EntityRecord<T>> {
        self.read(EntityCollection::snapshot)
    }
}
