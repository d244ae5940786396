//! Pending mutations and the state needed to undo them.

use entity_collection::{
    CollectionError, CollectionResult, EntityCollection, EntityId, EntityRecord, InsertPosition,
    SyncState,
};
use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    Create,
    Update,
    Delete,
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MutationKind::Create => write!(f, "create"),
            MutationKind::Update => write!(f, "update"),
            MutationKind::Delete => write!(f, "delete"),
        }
    }
}

/// What the collection looked like before an update or delete.
#[derive(Debug, Clone, PartialEq)]
pub enum PriorSnapshot<T> {
    /// Fields and sync state of an updated record
    Fields { fields: T, sync_state: SyncState },
    /// A deleted record, the index it held and the record that followed it
    Record {
        record: EntityRecord<T>,
        index: usize,
        next: Option<EntityId>,
    },
}

/// A change already applied to the collection and awaiting the server.
///
/// Consumed exactly once, by [`MutationIntent::rollback`] on failure or by
/// dropping it on success.
#[derive(Debug, Clone)]
pub struct MutationIntent<T> {
    pub kind: MutationKind,
    pub entity_type: &'static str,
    pub target: EntityId,
    pub payload: Option<Value>,
    pub prior_snapshot: Option<PriorSnapshot<T>>,
}

impl<T> MutationIntent<T> {
    pub fn create(entity_type: &'static str, target: EntityId, payload: Option<Value>) -> Self {
        Self {
            kind: MutationKind::Create,
            entity_type,
            target,
            payload,
            prior_snapshot: None,
        }
    }

    pub fn update(
        entity_type: &'static str,
        target: EntityId,
        payload: Value,
        fields: T,
        sync_state: SyncState,
    ) -> Self {
        Self {
            kind: MutationKind::Update,
            entity_type,
            target,
            payload: Some(payload),
            prior_snapshot: Some(PriorSnapshot::Fields { fields, sync_state }),
        }
    }

    /// `next` is the id of the record that followed the deleted one.
    pub fn delete(
        entity_type: &'static str,
        record: EntityRecord<T>,
        index: usize,
        next: Option<EntityId>,
    ) -> Self {
        Self {
            kind: MutationKind::Delete,
            entity_type,
            target: record.id.clone(),
            payload: None,
            prior_snapshot: Some(PriorSnapshot::Record {
                record,
                index,
                next,
            }),
        }
    }

    /// Undo the optimistic change.
    ///
    /// A deleted record goes back in front of the record that followed it.
    /// When that record is gone too, it goes back to its old index, clamped
    /// to the current length.
    ///
    /// A reload may have replaced the collection while the request was in
    /// flight. Restoring is then skipped: an updated or created record that
    /// is no longer present stays absent, and a deleted record that the
    /// reload brought back is not inserted twice.
    pub fn rollback(self, collection: &mut EntityCollection<T>) -> CollectionResult<()> {
        let present = collection.contains(&self.target);
        match (self.kind, self.prior_snapshot) {
            (MutationKind::Create, _) if !present => Ok(()),
            (MutationKind::Create, _) => collection.remove(&self.target).map(|_| ()),
            (MutationKind::Update, Some(PriorSnapshot::Fields { .. })) if !present => Ok(()),
            (MutationKind::Update, Some(PriorSnapshot::Fields { fields, sync_state })) => {
                collection.update(&self.target, |current| *current = fields)?;
                collection.set_sync_state(&self.target, sync_state).map(|_| ())
            }
            (MutationKind::Delete, Some(PriorSnapshot::Record { .. })) if present => Ok(()),
            (MutationKind::Delete, Some(PriorSnapshot::Record { record, index, next })) => {
                let index = next
                    .and_then(|next| collection.position(&next))
                    .unwrap_or_else(|| index.min(collection.len()));
                collection
                    .insert(record, InsertPosition::At(index))
                    .map(|_| ())
            }
            _ => Err(CollectionError::NotFound(self.target)),
        }
    }
}
